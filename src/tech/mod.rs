//! Technology constants shared by the netlist tracer and the delay models.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Device model names used to classify transistor statements.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct DeviceModels {
    pub nmos: String,
    pub pmos: String,
}

impl DeviceModels {
    pub fn new(nmos: impl Into<String>, pmos: impl Into<String>) -> Self {
        Self {
            nmos: nmos.into().to_lowercase(),
            pmos: pmos.into().to_lowercase(),
        }
    }

    #[inline]
    pub fn is_model(&self, token: &str) -> bool {
        token == self.nmos || token == self.pmos
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireLayer {
    /// Sheet resistance in ohms per square.
    pub res_per_square: f64,
    /// Capacitance per meter of wire.
    pub cap_per_length: f64,
    /// Default drawn width in meters.
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechConfig {
    pub name: String,
    /// Input capacitance of a 1x inverter.
    pub c_gate: f64,
    /// Drain capacitance of a 1x inverter.
    pub c_drain: f64,
    /// Output resistance of a 1x inverter.
    pub r_intrinsic: f64,
    /// pmos/nmos width ratio.
    pub beta: f64,
    /// nmos width of a 1x inverter.
    pub min_width: f64,
    pub models: DeviceModels,
    #[serde(default)]
    pub layers: BTreeMap<String, WireLayer>,
}

impl TechConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let txt = std::fs::read_to_string(path)?;
        Self::parse_toml(&txt)
    }

    pub fn parse_toml(s: &str) -> Result<Self> {
        let mut tech: TechConfig = toml::from_str(s)?;
        tech.models = DeviceModels::new(&tech.models.nmos, &tech.models.pmos);
        Ok(tech)
    }

    pub fn layer(&self, name: &str) -> Result<&WireLayer> {
        self.layers
            .get(name)
            .ok_or_else(|| Error::UnknownLayer(name.to_string()))
    }

    /// The capacitance presented by `width` meters of gate, measured against a
    /// 1x inverter (`min_width` of nmos plus `beta * min_width` of pmos).
    pub fn gate_cap_for_width(&self, width: f64) -> f64 {
        width * self.c_gate / (self.min_width * (1.0 + self.beta))
    }

    /// Per-input logical effort of a NAND2 relative to an inverter.
    #[inline]
    pub fn nand_cap_rel(&self) -> f64 {
        (self.beta + 2.0) / (self.beta + 1.0)
    }
}

/// Path to the reference technology files shipped with the crate.
#[inline]
pub fn sample_tech_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tech/sample")
}

#[cfg(test)]
pub(crate) mod tests {
    use approx::assert_relative_eq;

    use super::*;

    pub(crate) fn sample_tech() -> TechConfig {
        TechConfig::load(sample_tech_dir().join("tech.toml")).expect("failed to load sample tech")
    }

    #[test]
    fn test_sample_tech() {
        let tech = sample_tech();
        assert_eq!(tech.name, "sample45");
        assert_eq!(tech.models.nmos, "nmos_vtg");
        assert_eq!(tech.models.pmos, "pmos_vtg");
        assert_relative_eq!(tech.beta, 2.0);
        assert_eq!(tech.layers.len(), 3);
        assert_relative_eq!(tech.layer("m1").unwrap().res_per_square, 0.38);
    }

    #[test]
    fn test_unknown_layer() {
        let tech = sample_tech();
        assert!(matches!(tech.layer("poly"), Err(Error::UnknownLayer(_))));
    }

    #[test]
    fn test_gate_cap_for_width() {
        let tech = sample_tech();
        // A 1x inverter is 90n of nmos plus 180n of pmos.
        assert_relative_eq!(tech.gate_cap_for_width(270e-9), tech.c_gate, max_relative = 1e-12);
    }

    #[test]
    fn test_models_are_lowercased() {
        let tech = TechConfig::parse_toml(
            r#"
            name = "t"
            c_gate = 1e-15
            c_drain = 1e-15
            r_intrinsic = 1e4
            beta = 2.0
            min_width = 1e-7

            [models]
            nmos = "NMOS_VTG"
            pmos = "PMOS_VTG"
            "#,
        )
        .unwrap();
        assert!(tech.models.is_model("nmos_vtg"));
        assert!(tech.layers.is_empty());
    }
}
