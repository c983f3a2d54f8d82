//! RC load primitives for first-order (Elmore) delay estimates.
//!
//! Every primitive is evaluated against the resistance of whatever drives it
//! and reports both its delay and the resistance seen by anything further
//! down the line. Nothing is cached between evaluations.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tech::TechConfig;

/// Delay through a primitive and the accumulated resistance behind it.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Driven {
    pub delay: f64,
    pub resistance: f64,
}

/// The self-loading of a gate of relative size `size`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ParasiticLoad {
    pub size: f64,
    /// Drain capacitance relative to an inverter (2 for NAND drivers).
    pub drain_cap_rel: f64,
}

impl ParasiticLoad {
    pub fn inv(size: f64) -> Self {
        Self {
            size,
            drain_cap_rel: 1.0,
        }
    }

    pub fn nand(size: f64) -> Self {
        Self {
            size,
            drain_cap_rel: 2.0,
        }
    }

    /// Output resistance of the gate.
    #[inline]
    pub fn resistance(&self, tech: &TechConfig) -> f64 {
        tech.r_intrinsic / self.size
    }

    /// Intrinsic delay. Independent of size since resistance and drain
    /// capacitance scale inversely.
    pub fn delay(&self, tech: &TechConfig) -> f64 {
        self.resistance(tech) * tech.c_drain * self.drain_cap_rel * self.size
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Load {
    /// A lumped capacitance.
    Cap { cap: f64 },
    /// The input of an inverter of relative size `size`.
    Inverter { size: f64 },
    /// One input of a NAND2 of relative size `size`.
    Nand { size: f64 },
    /// A lumped-RC wire.
    Wire {
        length: f64,
        layer: String,
        width: f64,
    },
    /// `num_stages` identical cells of pitch `stage_width` on a shared wire,
    /// such as a wordline or bitline.
    Distributed {
        cap_per_stage: f64,
        stage_width: f64,
        num_stages: usize,
        layer: String,
        width: f64,
    },
}

impl Load {
    pub fn cap(cap: f64) -> Self {
        Self::Cap { cap }
    }

    pub fn inverter(size: f64) -> Self {
        Self::Inverter { size }
    }

    pub fn nand(size: f64) -> Self {
        Self::Nand { size }
    }

    pub fn wire(length: f64, layer: impl Into<String>, width: f64) -> Self {
        Self::Wire {
            length,
            layer: layer.into(),
            width,
        }
    }

    pub fn distributed(
        cap_per_stage: f64,
        stage_width: f64,
        num_stages: usize,
        layer: impl Into<String>,
        width: f64,
    ) -> Self {
        Self::Distributed {
            cap_per_stage,
            stage_width,
            num_stages,
            layer: layer.into(),
            width,
        }
    }

    /// Checks that every referenced wire layer exists.
    pub fn validate(&self, tech: &TechConfig) -> Result<()> {
        match self {
            Self::Wire { layer, .. } | Self::Distributed { layer, .. } => {
                tech.layer(layer)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Wire resistance and total capacitance of the load.
    fn rc(&self, tech: &TechConfig) -> (f64, f64) {
        match self {
            Self::Cap { cap } => (0.0, *cap),
            Self::Inverter { size } => (0.0, size * tech.c_gate),
            Self::Nand { size } => (0.0, size * tech.c_gate * tech.nand_cap_rel()),
            Self::Wire {
                length,
                layer,
                width,
            } => match tech.layer(layer) {
                Ok(l) => (l.res_per_square * length / width, l.cap_per_length * length),
                Err(_) => (0.0, 0.0),
            },
            Self::Distributed {
                cap_per_stage,
                stage_width,
                num_stages,
                layer,
                width,
            } => {
                let n = *num_stages as f64;
                let res = tech
                    .layer(layer)
                    .map(|l| l.res_per_square * stage_width * n / width)
                    .unwrap_or(0.0);
                (res, cap_per_stage * n)
            }
        }
    }

    /// Total capacitance presented to the driver.
    pub fn capacitance(&self, tech: &TechConfig) -> f64 {
        self.rc(tech).1
    }

    /// Elmore delay of the load when driven through `driver_res`.
    ///
    /// The driver charges the full capacitance; a distributed wire adds half
    /// of its own RC product.
    pub fn eval(&self, tech: &TechConfig, driver_res: f64) -> Driven {
        let (res, cap) = self.rc(tech);
        Driven {
            delay: driver_res * cap + 0.5 * res * cap,
            resistance: driver_res + res,
        }
    }
}
