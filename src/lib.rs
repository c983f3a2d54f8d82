//! Netlist hierarchy tracing and control-chain sizing for SRAM22.
//!
//! [`netlist`] parses SPICE subcircuits and resolves pins down to the
//! transistor terminals they touch. [`delay`] models buffer chains with
//! first-order RC delays and sizes them; [`strategy`] picks a sizing policy
//! per control signal and memoizes the results.

pub mod cli;
pub mod delay;
pub mod error;
pub mod netlist;
pub mod paths;
pub mod strategy;
pub mod tech;

pub use error::{Error, Result};
