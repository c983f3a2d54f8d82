//! First-order delay models and the solvers that size chains against them.

pub mod chain;
pub mod load;
pub mod optimize;

pub use chain::{ArrayChain, ArrayGeometry, DelayModel, EnChain, EnEnBarChain, PICO};
pub use load::{Driven, Load, ParasiticLoad};
pub use optimize::{minimize_delays, minimize_sizes, Bounds, OptimizerOpts};
