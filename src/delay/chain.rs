//! Delay models of inverter buffer chains.
//!
//! A chain is a unit driver followed by inverters of relative sizes
//! `x[0], x[1], ...`. Each stage delay is the parasitic delay of the driving
//! gate plus the Elmore delay of everything on its output net.

use serde::{Deserialize, Serialize};

use super::load::{Load, ParasiticLoad};
use crate::error::{Error, Result};
use crate::tech::TechConfig;

/// Seconds to picoseconds.
pub const PICO: f64 = 1e12;

/// Default weight of the squared rail mismatch in a dual-rail objective.
pub const DEFAULT_EQUALIZATION_PENALTY: f64 = 100.0;

/// A delay model over a vector of relative gate sizes.
pub trait DelayModel {
    /// Number of free size variables.
    fn num_vars(&self) -> usize;

    /// A geometric taper toward the load, clamped to sizes of at least 1.
    fn initial_guess(&self) -> Vec<f64>;

    /// Delay of every stage, in seconds.
    fn stage_delays(&self, x: &[f64]) -> Vec<f64>;

    /// Objective value in seconds.
    fn total_delay(&self, x: &[f64]) -> f64 {
        self.stage_delays(x).iter().sum()
    }

    /// [`DelayModel::total_delay`] in picoseconds, which keeps the solver
    /// well conditioned.
    fn scaled_objective(&self, x: &[f64]) -> f64 {
        PICO * self.total_delay(x)
    }

    /// Arrival time of every output rail, in seconds.
    fn rail_delays(&self, x: &[f64]) -> Vec<f64> {
        vec![self.total_delay(x)]
    }

    /// Rail mismatch term of the objective, in picoseconds. Zero for models
    /// with a single output rail.
    fn equalization_penalty(&self, _x: &[f64]) -> f64 {
        0.0
    }

    /// The same model without any rail equalization term, if it has one.
    fn relax_equalization(&self) -> Option<Box<dyn DelayModel + '_>> {
        None
    }
}

fn total_cap(tech: &TechConfig, loads: &[Load]) -> f64 {
    loads.iter().map(|l| l.capacitance(tech)).sum()
}

fn taper(tech: &TechConfig, cap: f64, num_stages: usize) -> Vec<f64> {
    let scale = (cap / tech.c_gate).powf(1.0 / (num_stages as f64 + 1.0));
    (0..num_stages)
        .map(|i| scale.powi(i as i32 + 1).max(1.0))
        .collect()
}

/// Stages `0..=last` of an inverter chain: the unit driver into `x[0]` and
/// each `x[i - 1]` into `x[i]`.
fn inverter_stages(tech: &TechConfig, driver_c_drain: f64, x: &[f64], last: usize) -> Vec<f64> {
    let unit = ParasiticLoad::inv(1.0);
    let mut delays = Vec::with_capacity(last + 2);
    delays.push(
        driver_c_drain * unit.delay(tech)
            + Load::inverter(x[0]).eval(tech, unit.resistance(tech)).delay,
    );
    for i in 1..=last {
        let driver = ParasiticLoad::inv(x[i - 1]);
        delays.push(
            driver.delay(tech) + Load::inverter(x[i]).eval(tech, driver.resistance(tech)).delay,
        );
    }
    delays
}

fn terminal_stage(tech: &TechConfig, driver: ParasiticLoad, loads: &[Load]) -> f64 {
    let r = driver.resistance(tech);
    driver.delay(tech) + loads.iter().map(|l| l.eval(tech, r).delay).sum::<f64>()
}

fn validate_loads(tech: &TechConfig, loads: &[Load]) -> Result<()> {
    loads.iter().try_for_each(|l| l.validate(tech))
}

/// A single-output enable chain.
///
/// With `final_stage` unset the output is tapped one inverter early, at the
/// input of `x[num_stages - 1]`, which then still loads the tap.
#[derive(Debug, Clone)]
pub struct EnChain<'a> {
    tech: &'a TechConfig,
    num_stages: usize,
    loads: Vec<Load>,
    driver_c_drain: f64,
    final_stage: bool,
}

impl<'a> EnChain<'a> {
    pub fn new(
        tech: &'a TechConfig,
        num_stages: usize,
        loads: Vec<Load>,
        driver_c_drain: f64,
        final_stage: bool,
    ) -> Result<Self> {
        let min_stages = if final_stage { 1 } else { 2 };
        if num_stages < min_stages {
            return Err(Error::InvalidChain(format!(
                "need at least {min_stages} stages, got {num_stages}"
            )));
        }
        validate_loads(tech, &loads)?;
        Ok(Self {
            tech,
            num_stages,
            loads,
            driver_c_drain,
            final_stage,
        })
    }

    #[inline]
    pub fn num_stages(&self) -> usize {
        self.num_stages
    }

    #[inline]
    pub fn loads(&self) -> &[Load] {
        &self.loads
    }
}

impl DelayModel for EnChain<'_> {
    fn num_vars(&self) -> usize {
        self.num_stages
    }

    fn initial_guess(&self) -> Vec<f64> {
        taper(self.tech, total_cap(self.tech, &self.loads), self.num_stages)
    }

    fn stage_delays(&self, x: &[f64]) -> Vec<f64> {
        let n = self.num_stages;
        if self.final_stage {
            let mut delays = inverter_stages(self.tech, self.driver_c_drain, x, n - 1);
            delays.push(terminal_stage(
                self.tech,
                ParasiticLoad::inv(x[n - 1]),
                &self.loads,
            ));
            delays
        } else {
            let mut delays = inverter_stages(self.tech, self.driver_c_drain, x, n - 2);
            let driver = ParasiticLoad::inv(x[n - 2]);
            let next_gate = Load::inverter(x[n - 1])
                .eval(self.tech, driver.resistance(self.tech))
                .delay;
            delays.push(terminal_stage(self.tech, driver, &self.loads) + next_gate);
            delays
        }
    }
}

/// A dual-rail chain whose final inverter drives `final_loads` and whose
/// penultimate node drives `penultimate_loads`.
///
/// The objective adds `penalty * (fin - pen)^2` (in picoseconds) to the sum
/// of both rail delays.
#[derive(Debug, Clone)]
pub struct EnEnBarChain<'a> {
    fin: EnChain<'a>,
    pen: EnChain<'a>,
    penalty: f64,
}

impl<'a> EnEnBarChain<'a> {
    pub fn new(
        tech: &'a TechConfig,
        num_stages: usize,
        final_loads: Vec<Load>,
        penultimate_loads: Vec<Load>,
        driver_c_drain: f64,
    ) -> Result<Self> {
        Ok(Self {
            fin: EnChain::new(tech, num_stages, final_loads, driver_c_drain, true)?,
            pen: EnChain::new(tech, num_stages, penultimate_loads, driver_c_drain, false)?,
            penalty: DEFAULT_EQUALIZATION_PENALTY,
        })
    }

    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.penalty = penalty;
        self
    }

    #[inline]
    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    /// Delay of the final (true) rail.
    pub fn final_delay(&self, x: &[f64]) -> f64 {
        self.fin.total_delay(x)
    }

    /// Delay of the penultimate (complement) rail.
    pub fn penultimate_delay(&self, x: &[f64]) -> f64 {
        self.pen.total_delay(x)
    }
}

impl DelayModel for EnEnBarChain<'_> {
    fn num_vars(&self) -> usize {
        self.fin.num_vars()
    }

    fn initial_guess(&self) -> Vec<f64> {
        self.fin.initial_guess()
    }

    /// Stages of the final rail.
    fn stage_delays(&self, x: &[f64]) -> Vec<f64> {
        self.fin.stage_delays(x)
    }

    fn total_delay(&self, x: &[f64]) -> f64 {
        self.penultimate_delay(x) + self.final_delay(x) + self.equalization_penalty(x) / PICO
    }

    fn equalization_penalty(&self, x: &[f64]) -> f64 {
        let gap = PICO * (self.final_delay(x) - self.penultimate_delay(x));
        self.penalty * gap * gap
    }

    fn rail_delays(&self, x: &[f64]) -> Vec<f64> {
        vec![self.penultimate_delay(x), self.final_delay(x)]
    }

    fn relax_equalization(&self) -> Option<Box<dyn DelayModel + '_>> {
        Some(Box::new(self.clone().with_penalty(0.0)))
    }
}

/// Geometry and wiring of the bitcell array seen by array drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayGeometry {
    pub num_rows: usize,
    pub num_cols: usize,
    /// Bitcell height.
    pub row_pitch: f64,
    /// Bitcell width.
    pub col_pitch: f64,
    /// Bitline capacitance contributed by each cell.
    pub bitline_cap_per_cell: f64,
    /// Wordline capacitance contributed by each cell.
    pub wordline_cap_per_cell: f64,
    pub bitline_layer: String,
    pub wordline_layer: String,
}

/// A chain that ends in a row of array drivers of shared size `x[num_stages]`.
///
/// The last inverter fans out over `fanout_count` drivers spread along a
/// wire; each driver then pulls its own array line.
#[derive(Debug, Clone)]
pub struct ArrayChain<'a> {
    tech: &'a TechConfig,
    num_stages: usize,
    driver_c_drain: f64,
    fanout_count: usize,
    fanout_pitch: f64,
    /// Gate capacitance of one unit-size array driver.
    fanout_unit_cap: f64,
    fanout_layer: String,
    array_driver: ParasiticLoad,
    array_load: Load,
}

impl<'a> ArrayChain<'a> {
    /// Precharge drivers along the columns, each pulling a bitline.
    pub fn precharge(
        tech: &'a TechConfig,
        num_stages: usize,
        array: &ArrayGeometry,
        driver_c_drain: f64,
    ) -> Result<Self> {
        let width = tech.layer(&array.bitline_layer)?.width;
        Self::new(
            tech,
            num_stages,
            driver_c_drain,
            array.num_cols,
            array.col_pitch,
            tech.c_gate,
            array.wordline_layer.clone(),
            ParasiticLoad::inv(1.0),
            Load::distributed(
                array.bitline_cap_per_cell,
                array.row_pitch,
                array.num_rows,
                array.bitline_layer.clone(),
                width,
            ),
        )
    }

    /// Row decoder NAND gates along the rows, each driving a wordline.
    pub fn decoder(
        tech: &'a TechConfig,
        num_stages: usize,
        array: &ArrayGeometry,
        driver_c_drain: f64,
    ) -> Result<Self> {
        let width = tech.layer(&array.wordline_layer)?.width;
        Self::new(
            tech,
            num_stages,
            driver_c_drain,
            array.num_rows,
            array.row_pitch,
            tech.c_gate * tech.nand_cap_rel(),
            array.bitline_layer.clone(),
            ParasiticLoad::nand(1.0),
            Load::distributed(
                array.wordline_cap_per_cell,
                array.col_pitch,
                array.num_cols,
                array.wordline_layer.clone(),
                width,
            ),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        tech: &'a TechConfig,
        num_stages: usize,
        driver_c_drain: f64,
        fanout_count: usize,
        fanout_pitch: f64,
        fanout_unit_cap: f64,
        fanout_layer: String,
        array_driver: ParasiticLoad,
        array_load: Load,
    ) -> Result<Self> {
        if num_stages == 0 {
            return Err(Error::InvalidChain("need at least 1 stage, got 0".into()));
        }
        if fanout_count == 0 {
            return Err(Error::InvalidChain("array has no rows or columns".into()));
        }
        tech.layer(&fanout_layer)?;
        array_load.validate(tech)?;
        Ok(Self {
            tech,
            num_stages,
            driver_c_drain,
            fanout_count,
            fanout_pitch,
            fanout_unit_cap,
            fanout_layer,
            array_driver,
            array_load,
        })
    }

    fn fanout(&self, driver_size: f64) -> Result<Load> {
        let width = self.tech.layer(&self.fanout_layer)?.width;
        Ok(Load::distributed(
            self.fanout_unit_cap * driver_size,
            self.fanout_pitch,
            self.fanout_count,
            self.fanout_layer.clone(),
            width,
        ))
    }

    #[inline]
    pub fn num_stages(&self) -> usize {
        self.num_stages
    }
}

impl DelayModel for ArrayChain<'_> {
    fn num_vars(&self) -> usize {
        self.num_stages + 1
    }

    fn initial_guess(&self) -> Vec<f64> {
        let fanout_cap = self.fanout_unit_cap * self.fanout_count as f64;
        let mut x = taper(self.tech, fanout_cap, self.num_stages);
        let array_cap = self.array_load.capacitance(self.tech);
        x.push((array_cap / self.tech.c_gate).sqrt().max(1.0));
        x
    }

    fn stage_delays(&self, x: &[f64]) -> Vec<f64> {
        let n = self.num_stages;
        let s = x[n];
        let mut delays = inverter_stages(self.tech, self.driver_c_drain, x, n - 1);

        let last = ParasiticLoad::inv(x[n - 1]);
        // The fanout layer is checked on construction.
        let fanout = self.fanout(s).map(|l| l.eval(self.tech, last.resistance(self.tech)).delay);
        delays.push(last.delay(self.tech) + fanout.unwrap_or(f64::INFINITY));

        let driver = ParasiticLoad {
            size: s,
            ..self.array_driver
        };
        delays.push(terminal_stage(self.tech, driver, std::slice::from_ref(&self.array_load)));
        delays
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::delay::optimize::{minimize_delays, minimize_sizes, Bounds, OptimizerOpts};
    use super::*;
    use crate::tech::tests::sample_tech;

    fn sample_array() -> ArrayGeometry {
        ArrayGeometry {
            num_rows: 64,
            num_cols: 32,
            row_pitch: 1.2e-6,
            col_pitch: 0.9e-6,
            bitline_cap_per_cell: 0.15e-15,
            wordline_cap_per_cell: 0.2e-15,
            bitline_layer: "m2".into(),
            wordline_layer: "m3".into(),
        }
    }

    fn max_rail(model: &dyn DelayModel, x: &[f64]) -> f64 {
        model.rail_delays(x).into_iter().fold(f64::NEG_INFINITY, f64::max)
    }

    #[test]
    fn test_single_stage_delay() {
        let tech = sample_tech();
        let chain = EnChain::new(&tech, 1, vec![Load::cap(10e-15)], 1.0, true).unwrap();
        let x = [4.0];
        let r = tech.r_intrinsic;
        let p = r * tech.c_drain;
        let delays = chain.stage_delays(&x);
        assert_eq!(delays.len(), 2);
        assert_relative_eq!(delays[0], p + r * 4.0 * tech.c_gate, max_relative = 1e-12);
        assert_relative_eq!(delays[1], p + r / 4.0 * 10e-15, max_relative = 1e-12);
    }

    #[test]
    fn test_non_final_tap_sees_next_gate() {
        let tech = sample_tech();
        let loads = vec![Load::cap(5e-15)];
        let full = EnChain::new(&tech, 3, loads.clone(), 1.0, true).unwrap();
        let tap = EnChain::new(&tech, 3, loads, 1.0, false).unwrap();
        let x = [2.0, 4.0, 8.0];
        let full_stages = full.stage_delays(&x);
        let tap_stages = tap.stage_delays(&x);
        assert_eq!(tap_stages.len(), 3);
        let extra = tech.r_intrinsic / 4.0 * 5e-15;
        assert_relative_eq!(tap_stages[2], full_stages[2] + extra, max_relative = 1e-12);
    }

    #[test]
    fn test_invalid_chains() {
        let tech = sample_tech();
        assert!(EnChain::new(&tech, 0, vec![], 1.0, true).is_err());
        assert!(EnChain::new(&tech, 1, vec![], 1.0, false).is_err());
        assert!(matches!(
            EnChain::new(&tech, 2, vec![Load::wire(1e-6, "m7", 1e-7)], 1.0, true),
            Err(Error::UnknownLayer(_))
        ));
    }

    #[test]
    fn test_initial_guess_taper() {
        let tech = sample_tech();
        let cap = 64.0 * tech.c_gate;
        let chain = EnChain::new(&tech, 2, vec![Load::cap(cap)], 1.0, true).unwrap();
        let x = chain.initial_guess();
        assert_relative_eq!(x[0], 4.0, max_relative = 1e-9);
        assert_relative_eq!(x[1], 16.0, max_relative = 1e-9);
    }

    #[test]
    fn test_scaled_objective_matches_total_delay() {
        let tech = sample_tech();
        let array = sample_array();
        let en = EnChain::new(&tech, 3, vec![Load::cap(40e-15)], 2.0, true).unwrap();
        let dual = EnEnBarChain::new(
            &tech,
            3,
            vec![Load::cap(40e-15)],
            vec![Load::inverter(6.0)],
            1.0,
        )
        .unwrap();
        let pre = ArrayChain::precharge(&tech, 2, &array, 1.0).unwrap();
        let dec = ArrayChain::decoder(&tech, 2, &array, 1.0).unwrap();
        let models: [&dyn DelayModel; 4] = [&en, &dual, &pre, &dec];
        for model in models {
            for x in [model.initial_guess(), vec![3.0; model.num_vars()]] {
                assert_relative_eq!(
                    model.scaled_objective(&x),
                    PICO * model.total_delay(&x),
                    max_relative = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_dual_rail_objective() {
        let tech = sample_tech();
        let dual = EnEnBarChain::new(
            &tech,
            2,
            vec![Load::cap(20e-15)],
            vec![Load::cap(2e-15)],
            1.0,
        )
        .unwrap();
        let x = [3.0, 9.0];
        let (pen, fin) = (dual.penultimate_delay(&x), dual.final_delay(&x));
        assert_eq!(dual.rail_delays(&x), vec![pen, fin]);
        let ps = PICO * (fin - pen);
        assert_relative_eq!(
            dual.scaled_objective(&x),
            PICO * (pen + fin) + 100.0 * ps * ps,
            max_relative = 1e-9
        );
        let relaxed = dual.relax_equalization().unwrap();
        assert_relative_eq!(relaxed.total_delay(&x), pen + fin, max_relative = 1e-12);
        assert!(relaxed.relax_equalization().is_some());
    }

    #[test]
    fn test_array_chain_has_driver_variable() {
        let tech = sample_tech();
        let array = sample_array();
        let pre = ArrayChain::precharge(&tech, 2, &array, 1.0).unwrap();
        assert_eq!(pre.num_vars(), 3);
        assert_eq!(pre.initial_guess().len(), 3);
        assert_eq!(pre.stage_delays(&[2.0, 4.0, 8.0]).len(), 4);

        // A larger array driver is faster on the array and slower on the fanout.
        let small = pre.stage_delays(&[2.0, 4.0, 2.0]);
        let large = pre.stage_delays(&[2.0, 4.0, 16.0]);
        assert!(large[3] < small[3]);
        assert!(large[2] > small[2]);

        let mut bad = array.clone();
        bad.bitline_layer = "poly".into();
        assert!(ArrayChain::precharge(&tech, 2, &bad, 1.0).is_err());
    }

    #[test]
    fn test_min_delay_respects_bounds() {
        let tech = sample_tech();
        let chain = EnChain::new(&tech, 3, vec![Load::cap(500e-15)], 1.0, true).unwrap();
        let opts = OptimizerOpts::default();
        let x = minimize_delays(&chain, &chain.initial_guess(), 8.0, None, &opts).unwrap();
        assert_eq!(x.len(), 3);
        for v in &x {
            assert!((1.0..=8.0).contains(v), "{x:?}");
        }
        assert!(chain.total_delay(&x) <= chain.total_delay(&chain.initial_guess()));

        let bounds = Bounds {
            lower: vec![1.0, 2.0, 3.0],
            upper: vec![1.5, 2.5, 3.5],
        };
        let x = minimize_delays(&chain, &[1.0, 1.0, 1.0], 8.0, Some(&bounds), &opts).unwrap();
        assert!(bounds.contains(&x), "{x:?}");
    }

    #[test]
    fn test_min_delay_improves_on_taper() {
        let tech = sample_tech();
        let array = sample_array();
        let dec = ArrayChain::decoder(&tech, 2, &array, 1.0).unwrap();
        let x0 = dec.initial_guess();
        let x = minimize_delays(&dec, &x0, 64.0, None, &OptimizerOpts::default()).unwrap();
        assert!(dec.total_delay(&x) <= dec.total_delay(&x0));
    }

    #[test]
    fn test_infeasible_delay_target() {
        let tech = sample_tech();
        let chain = EnChain::new(&tech, 3, vec![Load::cap(100e-15)], 1.0, true).unwrap();
        let err = minimize_sizes(
            &chain,
            &chain.initial_guess(),
            1e-12,
            true,
            &OptimizerOpts::default(),
        )
        .unwrap_err();
        match err {
            Error::InfeasibleDelayTarget {
                max_delay,
                best_delay,
            } => {
                assert_relative_eq!(max_delay, 1e-12);
                assert!(best_delay > max_delay);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_min_size_meets_target() {
        let tech = sample_tech();
        let chain = EnChain::new(&tech, 3, vec![Load::cap(100e-15)], 1.0, true).unwrap();
        let opts = OptimizerOpts::default();
        let fastest =
            minimize_delays(&chain, &chain.initial_guess(), f64::INFINITY, None, &opts).unwrap();
        let target = 1.3 * chain.total_delay(&fastest);
        let x = minimize_sizes(&chain, &chain.initial_guess(), target, true, &opts).unwrap();
        assert!(chain.total_delay(&x) <= target * (1.0 + 1e-9));
        assert!(x.iter().sum::<f64>() < fastest.iter().sum::<f64>());
        assert!(x.iter().all(|v| *v >= 1.0));
    }

    #[test]
    fn test_min_size_dual_rail_meets_target_on_both_rails() {
        let tech = sample_tech();
        let dual = EnEnBarChain::new(
            &tech,
            3,
            vec![Load::cap(80e-15)],
            vec![Load::cap(20e-15)],
            1.0,
        )
        .unwrap();
        let opts = OptimizerOpts::default();
        let relaxed = dual.relax_equalization().unwrap();
        let fastest =
            minimize_delays(relaxed.as_ref(), &dual.initial_guess(), f64::INFINITY, None, &opts)
                .unwrap();
        let target = 1.5 * max_rail(&dual, &fastest);
        let x = minimize_sizes(&dual, &dual.initial_guess(), target, false, &opts).unwrap();
        for rail in dual.rail_delays(&x) {
            assert!(rail <= target * (1.0 + 1e-9));
        }
    }

    #[test]
    fn test_equalization_narrows_rail_gap() {
        let tech = sample_tech();
        let dual = EnEnBarChain::new(
            &tech,
            3,
            vec![Load::cap(200e-15)],
            vec![Load::cap(5e-15)],
            1.0,
        )
        .unwrap();
        let opts = OptimizerOpts::default();
        let relaxed = dual.relax_equalization().unwrap();
        let x0 = dual.initial_guess();
        let x_eq = minimize_delays(&dual, &x0, 1000.0, None, &opts).unwrap();
        let x_rel = minimize_delays(relaxed.as_ref(), &x0, 1000.0, None, &opts).unwrap();
        let gap = |x: &[f64]| (dual.final_delay(x) - dual.penultimate_delay(x)).abs();
        assert!(gap(&x_eq) < gap(&x_rel));
    }

    #[test]
    fn test_equalization_with_equal_loads() {
        let tech = sample_tech();
        let dual = EnEnBarChain::new(
            &tech,
            3,
            vec![Load::cap(20e-15)],
            vec![Load::cap(20e-15)],
            1.0,
        )
        .unwrap();
        let opts = OptimizerOpts::default();
        let relaxed = dual.relax_equalization().unwrap();
        let x0 = dual.initial_guess();
        let x_eq = minimize_delays(&dual, &x0, 1000.0, None, &opts).unwrap();
        let x_rel = minimize_delays(relaxed.as_ref(), &x0, 1000.0, None, &opts).unwrap();
        let gap = |x: &[f64]| (dual.final_delay(x) - dual.penultimate_delay(x)).abs();
        assert!(gap(&x_eq) < gap(&x_rel), "{} vs {}", gap(&x_eq), gap(&x_rel));
        assert!(gap(&x_eq) < 1e-13);
    }

    fn unbalanced_dual(tech: &TechConfig) -> EnEnBarChain<'_> {
        EnEnBarChain::new(
            tech,
            3,
            vec![Load::cap(200e-15)],
            vec![Load::cap(5e-15)],
            1.0,
        )
        .unwrap()
    }

    fn relaxed_best_delay(dual: &EnEnBarChain<'_>, opts: &OptimizerOpts) -> f64 {
        let relaxed = dual.relax_equalization().unwrap();
        let fastest =
            minimize_delays(relaxed.as_ref(), &dual.initial_guess(), f64::INFINITY, None, opts)
                .unwrap();
        max_rail(dual, &fastest)
    }

    #[test]
    fn test_min_size_equalized_accepts_reachable_target() {
        let tech = sample_tech();
        let dual = unbalanced_dual(&tech);
        let opts = OptimizerOpts::default();
        for factor in [1.3, 2.0] {
            let target = factor * relaxed_best_delay(&dual, &opts);
            let x = minimize_sizes(&dual, &dual.initial_guess(), target, true, &opts).unwrap();
            assert_eq!(x.len(), 3);
            for rail in dual.rail_delays(&x) {
                assert!(rail <= target * (1.0 + 1e-9), "{rail:e} > {target:e}");
            }
        }
    }

    #[test]
    fn test_min_size_equalization_narrows_rail_gap() {
        let tech = sample_tech();
        let dual = unbalanced_dual(&tech);
        let opts = OptimizerOpts::default();
        let target = 3.0 * relaxed_best_delay(&dual, &opts);
        let x0 = dual.initial_guess();
        let x_eq = minimize_sizes(&dual, &x0, target, true, &opts).unwrap();
        let x_free = minimize_sizes(&dual, &x0, target, false, &opts).unwrap();
        let gap = |x: &[f64]| (dual.final_delay(x) - dual.penultimate_delay(x)).abs();
        assert!(gap(&x_eq) < gap(&x_free), "{} vs {}", gap(&x_eq), gap(&x_free));
        for x in [&x_eq, &x_free] {
            assert!(max_rail(&dual, x) <= target * (1.0 + 1e-9));
        }
    }
}
