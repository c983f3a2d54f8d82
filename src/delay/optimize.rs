//! Bounded and constrained minimization of chain delay models.
//!
//! Sizes are strictly positive and chain delays are posynomials in them, so
//! the solver works on `ln(x)`. Bounds become boxes in that space and every
//! trial point is projected back into the box before it is evaluated, so the
//! objective is never called outside the bounds.

use derive_builder::Builder;
use log::{debug, info, warn};

use super::chain::{DelayModel, PICO};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct OptimizerOpts {
    /// Iteration limit of the bounded solver.
    pub max_iter: usize,
    /// Projected-gradient tolerance (infinity norm, log domain).
    pub tol: f64,
    /// Relative objective change below which the solver stops.
    pub ftol: f64,
    /// Finite-difference step (log domain).
    pub fd_step: f64,
    /// Outer iterations of the augmented Lagrangian.
    pub max_outer: usize,
    /// Allowed constraint violation before repair.
    pub ctol: f64,
}

impl Default for OptimizerOpts {
    fn default() -> Self {
        Self {
            max_iter: 20_000,
            tol: 1e-7,
            ftol: 1e-13,
            fd_step: 1e-6,
            max_outer: 40,
            ctol: 1e-6,
        }
    }
}

impl OptimizerOpts {
    #[inline]
    pub fn builder() -> OptimizerOptsBuilder {
        OptimizerOptsBuilder::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn uniform(n: usize, lower: f64, upper: f64) -> Self {
        Self {
            lower: vec![lower; n],
            upper: vec![upper; n],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    fn validate(&self, n: usize) -> Result<()> {
        if self.lower.len() != n || self.upper.len() != n {
            return Err(Error::InvalidBounds(format!(
                "expected {n} bounds, got {} lower and {} upper",
                self.lower.len(),
                self.upper.len()
            )));
        }
        for (lo, hi) in self.lower.iter().zip(self.upper.iter()) {
            if !(lo.is_finite() && *lo > 0.0 && lo <= hi) {
                return Err(Error::InvalidBounds(format!("[{lo}, {hi}]")));
            }
        }
        Ok(())
    }

    pub fn clamp(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(v, (lo, hi))| v.clamp(*lo, *hi))
            .collect()
    }

    pub fn contains(&self, x: &[f64]) -> bool {
        x.len() == self.len()
            && x
                .iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(v, (lo, hi))| lo <= v && v <= hi)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
fn exp_all(y: &[f64]) -> Vec<f64> {
    y.iter().map(|v| v.exp()).collect()
}

struct LogBox {
    lo: Vec<f64>,
    hi: Vec<f64>,
}

impl LogBox {
    fn new(bounds: &Bounds) -> Self {
        Self {
            lo: bounds.lower.iter().map(|v| v.ln()).collect(),
            hi: bounds.upper.iter().map(|v| v.ln()).collect(),
        }
    }

    fn project(&self, y: &mut [f64]) {
        for (i, v) in y.iter_mut().enumerate() {
            *v = v.max(self.lo[i]).min(self.hi[i]);
        }
    }

    /// Finite-difference gradient that stays inside the box.
    fn gradient<F: Fn(&[f64]) -> f64>(&self, f: &F, y: &[f64], fy: f64, h: f64) -> Vec<f64> {
        let mut probe = y.to_vec();
        (0..y.len())
            .map(|i| {
                let up = y[i] + h <= self.hi[i];
                let down = y[i] - h >= self.lo[i];
                let mut eval_at = |v: f64| {
                    probe[i] = v;
                    let out = f(&probe);
                    probe[i] = y[i];
                    out
                };
                match (up, down) {
                    (true, true) => (eval_at(y[i] + h) - eval_at(y[i] - h)) / (2.0 * h),
                    (true, false) => (eval_at(y[i] + h) - fy) / h,
                    (false, true) => (fy - eval_at(y[i] - h)) / h,
                    (false, false) => 0.0,
                }
            })
            .collect()
    }
}

/// Minimizes `f` over `bounds` starting from `x0`.
///
/// Uses projected gradient descent with Barzilai-Borwein step lengths and an
/// Armijo backtracking line search. The starting point is clamped into the
/// bounds first.
pub fn minimize_bounded<F>(
    f: F,
    x0: &[f64],
    bounds: &Bounds,
    opts: &OptimizerOpts,
) -> Result<Solution>
where
    F: Fn(&[f64]) -> f64,
{
    bounds.validate(x0.len())?;
    let lbox = LogBox::new(bounds);
    let eval = |y: &[f64]| f(&exp_all(y));

    let mut y = bounds.clamp(x0).iter().map(|v| v.ln()).collect::<Vec<_>>();
    lbox.project(&mut y);
    let mut fy = eval(&y);
    if !fy.is_finite() {
        return Err(Error::InvalidChain(format!(
            "objective is not finite at the starting point {x0:?}"
        )));
    }
    let mut g = lbox.gradient(&eval, &y, fy, opts.fd_step);

    let mut step = 1.0;
    let mut prev: Option<(Vec<f64>, Vec<f64>)> = None;
    let mut converged = false;
    let mut stalls = 0;
    let mut iterations = 0;

    while iterations < opts.max_iter {
        iterations += 1;

        let mut trial = y.iter().zip(g.iter()).map(|(v, d)| v - d).collect::<Vec<_>>();
        lbox.project(&mut trial);
        let pg = trial
            .iter()
            .zip(y.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        if pg < opts.tol {
            converged = true;
            break;
        }

        if let Some((yp, gp)) = prev.as_ref() {
            let s = y.iter().zip(yp.iter()).map(|(a, b)| a - b).collect::<Vec<_>>();
            let r = g.iter().zip(gp.iter()).map(|(a, b)| a - b).collect::<Vec<_>>();
            let sr = dot(&s, &r);
            if sr > 0.0 {
                step = (dot(&s, &s) / sr).clamp(1e-10, 1e4);
            }
        }

        let mut alpha = step;
        let mut accepted = None;
        for _ in 0..60 {
            let mut yn = y
                .iter()
                .zip(g.iter())
                .map(|(v, d)| v - alpha * d)
                .collect::<Vec<_>>();
            lbox.project(&mut yn);
            let dir = yn.iter().zip(y.iter()).map(|(a, b)| a - b).collect::<Vec<_>>();
            let slope = dot(&g, &dir);
            if slope >= 0.0 {
                break;
            }
            let fn_ = eval(&yn);
            if fn_.is_finite() && fn_ <= fy + 1e-4 * slope {
                accepted = Some((yn, fn_));
                break;
            }
            alpha *= 0.5;
        }

        let Some((yn, fn_)) = accepted else {
            // No descent direction left inside the box.
            converged = true;
            break;
        };

        let improvement = fy - fn_;
        let gn = lbox.gradient(&eval, &yn, fn_, opts.fd_step);
        prev = Some((std::mem::replace(&mut y, yn), std::mem::replace(&mut g, gn)));
        fy = fn_;

        if improvement <= opts.ftol * fy.abs().max(1.0) {
            stalls += 1;
            if stalls >= 3 {
                converged = true;
                break;
            }
        } else {
            stalls = 0;
        }
    }

    if !converged {
        warn!("bounded solver stopped after {iterations} iterations without converging");
    }

    let x = bounds.clamp(&exp_all(&y));
    let value = f(&x);
    Ok(Solution {
        x,
        value,
        iterations,
        converged,
    })
}

pub type Constraint<'a> = Box<dyn Fn(&[f64]) -> f64 + 'a>;

/// Minimizes `f` subject to `g(x) >= 0` for every constraint `g`.
///
/// Uses an augmented Lagrangian around [`minimize_bounded`]. If `anchor` is a
/// feasible point and the result still violates a constraint, the result is
/// pulled toward `anchor` (geometrically) until it is feasible.
pub fn minimize_constrained<F>(
    f: F,
    constraints: &[Constraint<'_>],
    x0: &[f64],
    bounds: &Bounds,
    anchor: Option<&[f64]>,
    opts: &OptimizerOpts,
) -> Result<Solution>
where
    F: Fn(&[f64]) -> f64,
{
    let violation = |x: &[f64]| {
        constraints
            .iter()
            .map(|g| (-g(x)).max(0.0))
            .fold(0.0, f64::max)
    };

    let mut lambda = vec![0.0; constraints.len()];
    let mut rho = 10.0;
    let mut x = bounds.clamp(x0);
    let mut prev_viol = f64::INFINITY;
    let mut iterations = 0;
    let mut converged = false;

    for outer in 0..opts.max_outer {
        let lagrangian = |x: &[f64]| {
            let mut v = f(x);
            for (g, l) in constraints.iter().zip(lambda.iter()) {
                let t = (l - rho * g(x)).max(0.0);
                v += (t * t - l * l) / (2.0 * rho);
            }
            v
        };
        let sol = minimize_bounded(lagrangian, &x, bounds, opts)?;
        iterations += sol.iterations;
        x = sol.x;

        let gs = constraints.iter().map(|g| g(&x)).collect::<Vec<_>>();
        let viol = gs.iter().map(|g| (-g).max(0.0)).fold(0.0, f64::max);
        let mut shift = 0.0f64;
        for (l, g) in lambda.iter_mut().zip(gs.iter()) {
            let next = (*l - rho * g).max(0.0);
            shift = shift.max((next - *l).abs());
            *l = next;
        }
        debug!("augmented lagrangian iteration {outer}: violation {viol:.3e}, rho {rho:.1e}");

        let max_lambda = lambda.iter().cloned().fold(0.0, f64::max);
        if viol <= opts.ctol && shift <= opts.ctol.max(1e-9) * (1.0 + max_lambda) {
            converged = true;
            break;
        }
        if viol > 0.25 * prev_viol {
            rho = (rho * 10.0).min(1e9);
        }
        prev_viol = viol;
    }

    if let Some(anchor) = anchor {
        if violation(&x) > 0.0 && violation(anchor) <= 0.0 {
            x = repair(&x, anchor, |x| violation(x) <= 0.0);
            info!("constrained solution pulled back toward a feasible point");
        }
    }

    let value = f(&x);
    Ok(Solution {
        x,
        value,
        iterations,
        converged,
    })
}

/// Bisects along the geometric segment from `x` to the feasible `anchor`.
fn repair<P: Fn(&[f64]) -> bool>(x: &[f64], anchor: &[f64], feasible: P) -> Vec<f64> {
    let at = |t: f64| {
        x.iter()
            .zip(anchor.iter())
            .map(|(a, b)| ((1.0 - t) * a.ln() + t * b.ln()).exp())
            .collect::<Vec<_>>()
    };
    let (mut lo, mut hi) = (0.0, 1.0);
    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        if feasible(&at(mid)) {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    if hi >= 1.0 {
        anchor.to_vec()
    } else {
        at(hi)
    }
}

/// Sizes that minimize the model's objective, each in `[1, max_size]` unless
/// `bounds` are given.
pub fn minimize_delays(
    model: &dyn DelayModel,
    initial_guess: &[f64],
    max_size: f64,
    bounds: Option<&Bounds>,
    opts: &OptimizerOpts,
) -> Result<Vec<f64>> {
    let owned;
    let bounds = match bounds {
        Some(b) => b,
        None => {
            owned = Bounds::uniform(initial_guess.len(), 1.0, max_size);
            &owned
        }
    };
    let sol = minimize_bounded(|x| model.scaled_objective(x), initial_guess, bounds, opts)?;
    debug!(
        "minimized delay to {:.3} ps in {} iterations",
        sol.value, sol.iterations
    );
    Ok(sol.x)
}

/// The smallest total size whose delay meets `max_delay` on every rail.
///
/// Feasibility is judged against the fastest sizing of the relaxed model (no
/// equalization penalty), so a target is only reported as infeasible when no
/// sizing meets it. With `equalize_final_stages` on, the model's rail
/// mismatch term is added to the total size being minimized; with it off the
/// per-rail constraints alone bound both outputs.
pub fn minimize_sizes(
    model: &dyn DelayModel,
    initial_guess: &[f64],
    max_delay: f64,
    equalize_final_stages: bool,
    opts: &OptimizerOpts,
) -> Result<Vec<f64>> {
    let relaxed = model.relax_equalization();
    let fastest_model = relaxed.as_deref().unwrap_or(model);
    let fastest = minimize_delays(fastest_model, initial_guess, f64::INFINITY, None, opts)?;

    let worst_rail = |x: &[f64]| {
        model
            .rail_delays(x)
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max)
    };
    let best_delay = worst_rail(&fastest);
    if best_delay > max_delay {
        warn!("delay target {max_delay:.3e}s is below the best achievable {best_delay:.3e}s");
        return Err(Error::InfeasibleDelayTarget {
            max_delay,
            best_delay,
        });
    }

    let start = if equalize_final_stages && relaxed.is_some() {
        let equalized = minimize_delays(model, &fastest, f64::INFINITY, None, opts)?;
        if worst_rail(&equalized) <= max_delay {
            equalized
        } else {
            fastest.clone()
        }
    } else {
        fastest.clone()
    };

    let num_rails = model.rail_delays(&fastest).len();
    let constraints = (0..num_rails)
        .map(|i| {
            Box::new(move |x: &[f64]| PICO * (max_delay - model.rail_delays(x)[i]))
                as Constraint<'_>
        })
        .collect::<Vec<_>>();
    let objective = |x: &[f64]| {
        let size = x.iter().sum::<f64>();
        if equalize_final_stages {
            size + model.equalization_penalty(x)
        } else {
            size
        }
    };
    let bounds = Bounds::uniform(fastest.len(), 1.0, f64::INFINITY);
    let sol = minimize_constrained(
        objective,
        &constraints,
        &start,
        &bounds,
        Some(fastest.as_slice()),
        opts,
    )?;
    debug!(
        "minimized sizing objective to {:.3} in {} iterations",
        sol.value, sol.iterations
    );
    Ok(sol.x)
}
