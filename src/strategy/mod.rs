//! Per-signal sizing policies for the SRAM control chains.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::delay::chain::{ArrayChain, ArrayGeometry, DelayModel, EnChain, EnEnBarChain};
use crate::delay::load::Load;
use crate::delay::optimize::{minimize_delays, minimize_sizes, OptimizerOpts};
use crate::error::{Error, Result};
use crate::netlist::trace::HierarchyTracer;
use crate::netlist::SpiceHierarchy;
use crate::paths::cache_file;
use crate::tech::TechConfig;

pub mod cache;

pub use cache::{cache_key, SizingCache};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalFamily {
    Clk,
    WordlineEn,
    WordlineDriver,
    WriteEn,
    SenseEn,
    Precharge,
    Predecoder,
}

impl SignalFamily {
    pub const ALL: [SignalFamily; 7] = [
        SignalFamily::Clk,
        SignalFamily::WordlineEn,
        SignalFamily::WordlineDriver,
        SignalFamily::WriteEn,
        SignalFamily::SenseEn,
        SignalFamily::Precharge,
        SignalFamily::Predecoder,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SignalFamily::Clk => "clk",
            SignalFamily::WordlineEn => "wordline_en",
            SignalFamily::WordlineDriver => "wordline_driver",
            SignalFamily::WriteEn => "write_en",
            SignalFamily::SenseEn => "sense_en",
            SignalFamily::Precharge => "precharge",
            SignalFamily::Predecoder => "predecoder",
        }
    }

    /// Whether the family drives both a true and a complement rail.
    #[inline]
    pub fn is_dual_rail(&self) -> bool {
        matches!(self, SignalFamily::Clk | SignalFamily::SenseEn)
    }

    /// Whether the family ends in a row of array drivers.
    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, SignalFamily::Precharge | SignalFamily::Predecoder)
    }
}

impl Display for SignalFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Use `sizes` as given.
    Fixed { sizes: Vec<f64> },
    /// Minimize delay with every stage in `[1, max_size]`.
    MinDelay { max_size: f64 },
    /// Minimize total size subject to a delay of at most `max_delay` seconds.
    MinSize { max_delay: f64 },
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Fixed { .. } => "fixed",
            Strategy::MinDelay { .. } => "min_delay",
            Strategy::MinSize { .. } => "min_size",
        }
    }
}

/// A peripheral load: a literal primitive, or `count` copies of the gate
/// capacitance behind `pin` of a cell in the cell netlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoadSource {
    Load(Load),
    Pin {
        module: String,
        pin: String,
        #[serde(default = "one")]
        count: usize,
    },
}

fn one() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyConfig {
    pub num_stages: usize,
    pub strategy: Strategy,
    /// Loads on the chain output. Unused by array families.
    #[serde(default)]
    pub loads: Vec<LoadSource>,
    /// Loads on the complement rail of a dual-rail family.
    #[serde(default)]
    pub penultimate_loads: Vec<LoadSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Families {
    pub clk: Option<FamilyConfig>,
    pub wordline_en: Option<FamilyConfig>,
    pub wordline_driver: Option<FamilyConfig>,
    pub write_en: Option<FamilyConfig>,
    pub sense_en: Option<FamilyConfig>,
    pub precharge: Option<FamilyConfig>,
    pub predecoder: Option<FamilyConfig>,
}

impl Families {
    pub fn get(&self, family: SignalFamily) -> Option<&FamilyConfig> {
        match family {
            SignalFamily::Clk => self.clk.as_ref(),
            SignalFamily::WordlineEn => self.wordline_en.as_ref(),
            SignalFamily::WordlineDriver => self.wordline_driver.as_ref(),
            SignalFamily::WriteEn => self.write_en.as_ref(),
            SignalFamily::SenseEn => self.sense_en.as_ref(),
            SignalFamily::Precharge => self.precharge.as_ref(),
            SignalFamily::Predecoder => self.predecoder.as_ref(),
        }
    }

    /// Configured families, in dispatch order.
    pub fn configured(&self) -> Vec<SignalFamily> {
        SignalFamily::ALL
            .into_iter()
            .filter(|f| self.get(*f).is_some())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub dir: PathBuf,
    #[serde(default = "default_cache_prefix")]
    pub prefix: String,
}

fn default_cache_prefix() -> String {
    "sizing".to_string()
}

fn default_driver_c_drain() -> f64 {
    1.0
}

fn default_equalize() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingConfig {
    pub array: ArrayGeometry,
    /// Drain loading of the unit driver at the head of every chain.
    #[serde(default = "default_driver_c_drain")]
    pub driver_c_drain: f64,
    /// Keep the equalization penalty when finding the fastest dual-rail sizing.
    #[serde(default = "default_equalize")]
    pub equalize_final_stages: bool,
    /// Cell netlist that `{ module, pin }` loads are traced in.
    pub cells: Option<PathBuf>,
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub families: Families,
}

impl SizingConfig {
    /// The cache file for this configuration, if caching is enabled.
    pub fn cache_path(&self, tech: &TechConfig) -> Option<PathBuf> {
        self.cache
            .as_ref()
            .map(|c| cache_file(&c.dir, &c.prefix, &tech.name))
    }
}

pub fn parse_sizing_config(path: impl AsRef<Path>) -> Result<SizingConfig> {
    let contents = fs::read_to_string(path)?;
    let data = toml::from_str(&contents)?;
    Ok(data)
}

/// Solved sizes per signal family, handed to the layout generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizingResults {
    pub tech: String,
    pub num_rows: usize,
    pub num_cols: usize,
    pub sizes: BTreeMap<String, Vec<f64>>,
}

impl SizingResults {
    pub fn get(&self, family: SignalFamily) -> Option<&[f64]> {
        self.sizes.get(family.name()).map(|v| v.as_slice())
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Picks and runs the configured sizing policy of each signal family.
pub struct Dispatcher<'a> {
    tech: &'a TechConfig,
    config: &'a SizingConfig,
    cells: Option<&'a SpiceHierarchy>,
    cache: Option<SizingCache>,
    opts: OptimizerOpts,
}

impl<'a> Dispatcher<'a> {
    pub fn new(tech: &'a TechConfig, config: &'a SizingConfig) -> Self {
        Self {
            tech,
            config,
            cells: None,
            cache: None,
            opts: OptimizerOpts::default(),
        }
    }

    pub fn with_cells(mut self, cells: &'a SpiceHierarchy) -> Self {
        self.cells = Some(cells);
        self
    }

    pub fn with_cache(mut self, cache: SizingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_opts(mut self, opts: OptimizerOpts) -> Self {
        self.opts = opts;
        self
    }

    #[inline]
    pub fn cache(&self) -> Option<&SizingCache> {
        self.cache.as_ref()
    }

    fn family_config(&self, family: SignalFamily) -> Result<&'a FamilyConfig> {
        self.config
            .families
            .get(family)
            .ok_or_else(|| Error::FamilyNotConfigured(family.name().to_string()))
    }

    /// Turns load sources into load primitives, tracing pin loads through the
    /// cell netlist.
    pub fn resolve_loads(&self, sources: &[LoadSource]) -> Result<Vec<Load>> {
        sources
            .iter()
            .map(|source| match source {
                LoadSource::Load(load) => Ok(load.clone()),
                LoadSource::Pin { module, pin, count } => {
                    let cells = self.cells.ok_or_else(|| Error::MissingNetlist {
                        module: module.clone(),
                        pin: pin.clone(),
                    })?;
                    let caps = HierarchyTracer::new(cells).extract_caps_for_pin(pin, module)?;
                    let cap = caps.gate_cap(self.tech) * *count as f64;
                    debug!("{module}/{pin} x{count} presents {cap:.3e}F");
                    Ok(Load::cap(cap))
                }
            })
            .collect()
    }

    /// The delay model of a family's chain.
    pub fn model(&self, family: SignalFamily) -> Result<Box<dyn DelayModel + 'a>> {
        let fc = self.family_config(family)?;
        let cfg = self.config;
        let tech = self.tech;
        let n = fc.num_stages;

        if family.is_array() && !fc.loads.is_empty() {
            warn!("{family} is sized against the array; its configured loads are ignored");
        }

        Ok(match family {
            SignalFamily::Clk | SignalFamily::SenseEn => Box::new(EnEnBarChain::new(
                tech,
                n,
                self.resolve_loads(&fc.loads)?,
                self.resolve_loads(&fc.penultimate_loads)?,
                cfg.driver_c_drain,
            )?),
            SignalFamily::WordlineEn | SignalFamily::WordlineDriver | SignalFamily::WriteEn => {
                Box::new(EnChain::new(
                    tech,
                    n,
                    self.resolve_loads(&fc.loads)?,
                    cfg.driver_c_drain,
                    true,
                )?)
            }
            SignalFamily::Precharge => Box::new(ArrayChain::precharge(
                tech,
                n,
                &cfg.array,
                cfg.driver_c_drain,
            )?),
            SignalFamily::Predecoder => Box::new(ArrayChain::decoder(
                tech,
                n,
                &cfg.array,
                cfg.driver_c_drain,
            )?),
        })
    }

    fn key(&self, family: SignalFamily, fc: &FamilyConfig) -> String {
        let method = format!("{family}_{}", fc.strategy.name());
        cache_key(&method, self.config.array.num_rows, self.config.array.num_cols)
    }

    /// Length of a solved sizing: the leading unit stage, one size per
    /// stage, and the array driver for array families.
    fn sizes_len(family: SignalFamily, fc: &FamilyConfig) -> usize {
        1 + fc.num_stages + usize::from(family.is_array())
    }

    /// Cached sizes for `family`, if present and of the expected length.
    fn cached(&self, family: SignalFamily, fc: &FamilyConfig) -> Option<Vec<f64>> {
        let key = self.key(family, fc);
        let sizes = self.cache.as_ref()?.get(&key)?;
        let expected = Self::sizes_len(family, fc);
        if sizes.len() != expected {
            warn!(
                "cached sizes for {key} have {} entries, expected {expected}; re-solving",
                sizes.len()
            );
            return None;
        }
        Some(sizes.to_vec())
    }

    /// Whether sizing `family` would be answered from the cache.
    pub fn is_cached(&self, family: SignalFamily) -> bool {
        let Some(fc) = self.config.families.get(family) else {
            return false;
        };
        if matches!(fc.strategy, Strategy::Fixed { .. }) {
            return false;
        }
        let key = self.key(family, fc);
        self.cache.as_ref().map_or(false, |c| {
            c.get(&key)
                .map_or(false, |sizes| sizes.len() == Self::sizes_len(family, fc))
        })
    }

    /// Sizes one family.
    ///
    /// Fixed sizes are returned as configured. Solved sizes carry a leading
    /// unit stage and are memoized in the cache, if one is attached.
    pub fn size(&mut self, family: SignalFamily) -> Result<Vec<f64>> {
        let fc = self.family_config(family)?;
        if let Strategy::Fixed { sizes } = &fc.strategy {
            return Ok(sizes.clone());
        }

        let key = self.key(family, fc);
        if let Some(sizes) = self.cached(family, fc) {
            info!("using cached sizes for {key}");
            return Ok(sizes);
        }

        let model = self.model(family)?;
        let initial = model.initial_guess();
        let solved = match &fc.strategy {
            Strategy::MinDelay { max_size } => {
                minimize_delays(model.as_ref(), &initial, *max_size, None, &self.opts)?
            }
            Strategy::MinSize { max_delay } => minimize_sizes(
                model.as_ref(),
                &initial,
                *max_delay,
                self.config.equalize_final_stages,
                &self.opts,
            )?,
            Strategy::Fixed { sizes } => return Ok(sizes.clone()),
        };

        let mut sizes = Vec::with_capacity(solved.len() + 1);
        sizes.push(1.0);
        sizes.extend(solved);
        info!("sized {family} with {}: {sizes:?}", fc.strategy.name());

        if let Some(cache) = self.cache.as_mut() {
            cache.store(&key, sizes.clone())?;
        }
        Ok(sizes)
    }

    /// Sizes every configured family.
    pub fn size_all(&mut self) -> Result<SizingResults> {
        let mut results = SizingResults {
            tech: self.tech.name.clone(),
            num_rows: self.config.array.num_rows,
            num_cols: self.config.array.num_cols,
            ..Default::default()
        };
        for family in self.config.families.configured() {
            let sizes = self.size(family)?;
            results.sizes.insert(family.name().to_string(), sizes);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::netlist::tests::{parse, TRI_GATE};
    use crate::tech::sample_tech_dir;
    use crate::tech::tests::sample_tech;

    fn sample_config() -> SizingConfig {
        parse_sizing_config(sample_tech_dir().join("sizing.toml")).unwrap()
    }

    fn family(strategy: Strategy, loads: Vec<LoadSource>) -> FamilyConfig {
        FamilyConfig {
            num_stages: 2,
            strategy,
            loads,
            penultimate_loads: vec![LoadSource::Load(Load::cap(4e-15))],
        }
    }

    #[test]
    fn test_sample_config() {
        let config = sample_config();
        assert_eq!(config.families.configured(), SignalFamily::ALL.to_vec());
        assert_eq!(config.cells, Some(PathBuf::from("cells.sp")));
        assert!(config.equalize_final_stages);
        assert!(matches!(
            config.families.wordline_driver.as_ref().unwrap().strategy,
            Strategy::Fixed { .. }
        ));
        assert!(matches!(
            config.families.clk.as_ref().unwrap().loads[0],
            LoadSource::Pin { .. }
        ));
    }

    #[test]
    fn test_strategy_from_toml() {
        #[derive(Deserialize)]
        struct S {
            strategy: Strategy,
        }
        let s: S = toml::from_str("strategy = { kind = \"min_size\", max_delay = 2e-10 }").unwrap();
        assert_eq!(s.strategy, Strategy::MinSize { max_delay: 2e-10 });
        assert_eq!(s.strategy.name(), "min_size");
    }

    #[test]
    fn test_fixed_sizes_are_returned_unchanged() {
        let tech = sample_tech();
        let mut config = sample_config();
        config.cache = None;
        config.families.write_en = Some(family(
            Strategy::Fixed {
                sizes: vec![2.0, 7.0],
            },
            vec![],
        ));
        let mut dispatcher = Dispatcher::new(&tech, &config);
        assert_eq!(dispatcher.size(SignalFamily::WriteEn).unwrap(), vec![2.0, 7.0]);
    }

    #[test]
    fn test_min_delay_prepends_unit_stage() {
        let tech = sample_tech();
        let mut config = sample_config();
        config.families.write_en = Some(family(
            Strategy::MinDelay { max_size: 16.0 },
            vec![LoadSource::Load(Load::cap(60e-15))],
        ));
        let mut dispatcher = Dispatcher::new(&tech, &config);
        let sizes = dispatcher.size(SignalFamily::WriteEn).unwrap();
        assert_eq!(sizes.len(), 3);
        assert_relative_eq!(sizes[0], 1.0);
        assert!(sizes.iter().all(|s| (1.0..=16.0).contains(s)));
    }

    #[test]
    fn test_min_size_infeasible() {
        let tech = sample_tech();
        let mut config = sample_config();
        config.families.wordline_en = Some(family(
            Strategy::MinSize { max_delay: 1e-13 },
            vec![LoadSource::Load(Load::cap(60e-15))],
        ));
        let mut dispatcher = Dispatcher::new(&tech, &config);
        assert!(matches!(
            dispatcher.size(SignalFamily::WordlineEn),
            Err(Error::InfeasibleDelayTarget { .. })
        ));
    }

    #[test]
    fn test_unconfigured_family() {
        let tech = sample_tech();
        let mut config = sample_config();
        config.families.sense_en = None;
        let mut dispatcher = Dispatcher::new(&tech, &config);
        assert!(matches!(
            dispatcher.size(SignalFamily::SenseEn),
            Err(Error::FamilyNotConfigured(_))
        ));
    }

    #[test]
    fn test_pin_loads_are_traced() {
        let tech = sample_tech();
        let config = sample_config();
        let cells = parse(TRI_GATE);
        let dispatcher = Dispatcher::new(&tech, &config).with_cells(&cells);
        let loads = dispatcher
            .resolve_loads(&[LoadSource::Pin {
                module: "tri_gate".into(),
                pin: "in".into(),
                count: 4,
            }])
            .unwrap();
        // The input inverter of tri_gate is a 1x inverter.
        assert_relative_eq!(loads[0].capacitance(&tech), 4.0 * tech.c_gate, max_relative = 1e-9);

        let bare = Dispatcher::new(&tech, &config);
        assert!(matches!(
            bare.resolve_loads(&[LoadSource::Pin {
                module: "tri_gate".into(),
                pin: "in".into(),
                count: 1,
            }]),
            Err(Error::MissingNetlist { .. })
        ));
    }

    #[test]
    fn test_models_per_family() {
        let tech = sample_tech();
        let config = sample_config();
        let cells = parse(TRI_GATE);
        let dispatcher = Dispatcher::new(&tech, &config).with_cells(&cells);
        for family in SignalFamily::ALL {
            let model = dispatcher.model(family).unwrap();
            let fc = config.families.get(family).unwrap();
            let extra = usize::from(family.is_array());
            assert_eq!(model.num_vars(), fc.num_stages + extra, "{family}");
            let rails = if family.is_dual_rail() { 2 } else { 1 };
            assert_eq!(model.rail_delays(&model.initial_guess()).len(), rails);
        }
    }

    #[test]
    fn test_results_are_cached() {
        let tech = sample_tech();
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config();
        config.cache = Some(CacheConfig {
            dir: dir.path().to_path_buf(),
            prefix: "test".into(),
        });
        config.families.write_en = Some(family(
            Strategy::MinDelay { max_size: 32.0 },
            vec![LoadSource::Load(Load::cap(30e-15))],
        ));
        let path = config.cache_path(&tech).unwrap();
        assert_eq!(path, dir.path().join("test_sample45.json"));

        let mut dispatcher =
            Dispatcher::new(&tech, &config).with_cache(SizingCache::open(&path).unwrap());
        let sizes = dispatcher.size(SignalFamily::WriteEn).unwrap();
        let key = cache_key("write_en_min_delay", config.array.num_rows, config.array.num_cols);
        assert_eq!(dispatcher.cache().unwrap().get(&key), Some(sizes.as_slice()));

        // A cached entry is returned without solving.
        let mut cache = SizingCache::open(&path).unwrap();
        cache.store(&key, vec![1.0, 3.0, 9.0]).unwrap();
        let mut dispatcher = Dispatcher::new(&tech, &config).with_cache(cache);
        assert!(dispatcher.is_cached(SignalFamily::WriteEn));
        assert!(!dispatcher.is_cached(SignalFamily::Clk));
        assert_eq!(dispatcher.size(SignalFamily::WriteEn).unwrap(), vec![1.0, 3.0, 9.0]);
    }

    #[test]
    fn test_stale_cache_entry_is_resolved() {
        let tech = sample_tech();
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config();
        config.cache = Some(CacheConfig {
            dir: dir.path().to_path_buf(),
            prefix: "stale".into(),
        });
        config.families.write_en = Some(family(
            Strategy::MinDelay { max_size: 32.0 },
            vec![LoadSource::Load(Load::cap(30e-15))],
        ));
        let path = config.cache_path(&tech).unwrap();
        let key = cache_key("write_en_min_delay", config.array.num_rows, config.array.num_cols);

        // Left over from a one-stage configuration.
        let mut cache = SizingCache::open(&path).unwrap();
        cache.store(&key, vec![1.0, 3.0]).unwrap();
        let mut dispatcher = Dispatcher::new(&tech, &config).with_cache(cache);
        assert!(!dispatcher.is_cached(SignalFamily::WriteEn));

        let sizes = dispatcher.size(SignalFamily::WriteEn).unwrap();
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes[0], 1.0);
        assert_eq!(dispatcher.cache().unwrap().get(&key), Some(sizes.as_slice()));
        assert!(dispatcher.is_cached(SignalFamily::WriteEn));
    }

    #[test]
    fn test_size_all_and_write_results() {
        let tech = sample_tech();
        let mut config = sample_config();
        config.cache = None;
        let cells = parse(TRI_GATE);
        let mut dispatcher = Dispatcher::new(&tech, &config).with_cells(&cells);
        let results = dispatcher.size_all().unwrap();
        assert_eq!(results.sizes.len(), 7);
        assert_eq!(results.tech, "sample45");
        for family in SignalFamily::ALL {
            assert!(results.get(family).is_some(), "{family}");
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/sram.sizes.json");
        results.write(&path).unwrap();
        assert_eq!(SizingResults::load(&path).unwrap(), results);
    }
}
