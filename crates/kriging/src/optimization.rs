use argmin::core::{CostFunction, Error, Executor, Gradient, State, TerminationReason};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::BFGS;
use egobox_doe::{Lhs, LhsKind, SamplingMethod};
use linfa::Float;
use log::debug;
use ndarray::{Array1, Array2, Zip, arr1, s};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};

/// Lower bound of theta search space relative to the input span
pub(crate) const THETA_LOWER_FACTOR: f64 = 0.02;
/// Upper bound of theta search space relative to the input span
pub(crate) const THETA_UPPER_FACTOR: f64 = 10.;
/// Weight of the quadratic penalty applied outside the search box
const BOX_PENALTY: f64 = 1.;

pub(crate) struct BfgsParams {
    pub max_iter: usize,
    pub gtol: f64,
    pub ftol: f64,
}

/// Result of one local minimization
#[derive(Debug, Clone)]
pub(crate) struct OptimResult {
    pub fval: f64,
    pub x: Array1<f64>,
    pub n_iter: usize,
    pub n_eval: usize,
    pub converged: bool,
}

/// Summary of the hyperparameters optimization made during fitting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct OptimReport {
    /// Number of starting points, 0 when no optimization was run
    pub n_start: usize,
    /// Iterations of the local optimization which gave the best result
    pub n_iter: usize,
    /// Objective evaluations over all starts
    pub n_eval: usize,
    /// Whether the best local optimization met a convergence criterion
    pub converged: bool,
    /// Whether the optimum improves on the objective at the initial guess
    pub improved: bool,
}

impl OptimReport {
    /// Report when theta is not optimized
    pub(crate) fn skipped() -> Self {
        OptimReport {
            converged: true,
            ..Default::default()
        }
    }

    /// Whether an optimization was run
    pub fn is_optimized(&self) -> bool {
        self.n_start > 0
    }
}

/// Heuristic initial guess and search space of theta given input spans
pub(crate) fn theta_search_space<F: Float>(spans: &Array1<F>) -> (Array1<F>, Vec<(F, F)>) {
    let theta0 = spans.mapv(|s| s * F::cast(0.5));
    let bounds = spans
        .iter()
        .map(|s| {
            (
                *s * F::cast(THETA_LOWER_FACTOR),
                *s * F::cast(THETA_UPPER_FACTOR),
            )
        })
        .collect();
    (theta0, bounds)
}

/// Starting points in log(theta) space: `theta0` then `n_start - 1` points spread within bounds.
/// Returns starting points as (n_start, nx) array and bounds in log space
pub(crate) fn prepare_multistart<F: Float>(
    n_start: usize,
    theta0: &Array1<F>,
    bounds: &[(F, F)],
    seed: u64,
) -> (Array2<F>, Vec<(F, F)>) {
    // Use log theta as optimization parameter
    let bounds: Vec<(F, F)> = bounds.iter().map(|(lo, up)| (lo.ln(), up.ln())).collect();

    let mut theta0s = Array2::zeros((n_start.max(1), theta0.len()));
    theta0s.row_mut(0).assign(&theta0.mapv(|v| v.ln()));

    // Use a seed here for reproducibility, it is just to get init values spread over
    // [lower bound, upper bound] for multistart
    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    match n_start.cmp(&2) {
        std::cmp::Ordering::Equal => {
            let vals = bounds
                .iter()
                .map(|(lo, up)| *lo + (*up - *lo) * F::cast(rng.gen::<f64>()))
                .collect::<Array1<F>>();
            theta0s.row_mut(1).assign(&vals)
        }
        std::cmp::Ordering::Greater => {
            let mut xlimits: Array2<F> = Array2::zeros((bounds.len(), 2));
            Zip::from(xlimits.rows_mut())
                .and(&bounds)
                .for_each(|mut row, limits| row.assign(&arr1(&[limits.0, limits.1])));
            let seeds = Lhs::new(&xlimits)
                .kind(LhsKind::Maximin)
                .with_rng(rng)
                .sample(n_start - 1);
            theta0s.slice_mut(s![1.., ..]).assign(&seeds);
        }
        std::cmp::Ordering::Less => (),
    };
    (theta0s, bounds)
}

fn project(x: &Array1<f64>, bounds: &[(f64, f64)]) -> Array1<f64> {
    Zip::from(x)
        .and(bounds)
        .map_collect(|v, (lo, up)| v.max(*lo).min(*up))
}

/// Evaluations made during one local minimization
#[derive(Default)]
struct EvalLog {
    n_eval: Cell<usize>,
    last: RefCell<Option<(Array1<f64>, Option<(f64, Array1<f64>)>)>>,
    best: RefCell<Option<(f64, Array1<f64>)>>,
}

/// Objective extended outside the box `bounds` as `f(p) + g(p).(x - p) + c.|x - p|^2`
/// where `p` is the projection of `x` onto the box, so that the unconstrained solver
/// is pulled back towards the box.
struct BoxedObjective<'a, ObjF> {
    objfn: &'a ObjF,
    bounds: &'a [(f64, f64)],
    log: &'a EvalLog,
}

impl<ObjF> BoxedObjective<'_, ObjF>
where
    ObjF: Fn(&Array1<f64>) -> Option<(f64, Array1<f64>)>,
{
    fn eval_in_box(&self, p: &Array1<f64>) -> Option<(f64, Array1<f64>)> {
        if let Some((x, res)) = self.log.last.borrow().as_ref() {
            if x == p {
                return res.clone();
            }
        }
        self.log.n_eval.set(self.log.n_eval.get() + 1);
        let res = (self.objfn)(p)
            .filter(|(f, g)| f.is_finite() && g.iter().all(|v| v.is_finite()));
        if let Some((f, _)) = &res {
            let mut best = self.log.best.borrow_mut();
            if best.as_ref().map_or(true, |(fbest, _)| f < fbest) {
                *best = Some((*f, p.to_owned()));
            }
        }
        *self.log.last.borrow_mut() = Some((p.to_owned(), res.clone()));
        res
    }

    fn extended(&self, x: &Array1<f64>) -> Result<(f64, Array1<f64>), Error> {
        let p = project(x, self.bounds);
        let (f, g) = self
            .eval_in_box(&p)
            .ok_or_else(|| Error::msg(format!("objective evaluation failed at {p}")))?;
        let dx = x - &p;
        let value = f + g.dot(&dx) + BOX_PENALTY * dx.dot(&dx);
        Ok((value, g + dx.mapv(|v| 2. * BOX_PENALTY * v)))
    }
}

impl<ObjF> CostFunction for BoxedObjective<'_, ObjF>
where
    ObjF: Fn(&Array1<f64>) -> Option<(f64, Array1<f64>)>,
{
    type Param = Array1<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, Error> {
        self.extended(x).map(|(f, _)| f)
    }
}

impl<ObjF> Gradient for BoxedObjective<'_, ObjF>
where
    ObjF: Fn(&Array1<f64>) -> Option<(f64, Array1<f64>)>,
{
    type Param = Array1<f64>;
    type Gradient = Array1<f64>;

    fn gradient(&self, x: &Self::Param) -> Result<Self::Gradient, Error> {
        self.extended(x).map(|(_, g)| g)
    }
}

/// Minimize `objfn` within `bounds` with BFGS starting from `param0`.
///
/// `objfn` returns the objective value and its gradient, or `None` when the evaluation fails.
/// The returned point is the best one evaluated within the box, the solver stopping on
/// a failed evaluation keeps it.
pub(crate) fn optimize_params<ObjF>(
    objfn: &ObjF,
    param0: &Array1<f64>,
    bounds: &[(f64, f64)],
    params: &BfgsParams,
) -> OptimResult
where
    ObjF: Fn(&Array1<f64>) -> Option<(f64, Array1<f64>)>,
{
    let log = EvalLog::default();
    let problem = BoxedObjective {
        objfn,
        bounds,
        log: &log,
    };
    let x0 = project(param0, bounds);
    let nx = x0.len();

    let run = BFGS::new(MoreThuenteLineSearch::new())
        .with_tolerance_grad(params.gtol)
        .and_then(|solver| solver.with_tolerance_cost(params.ftol))
        .and_then(|solver| {
            Executor::new(problem, solver)
                .configure(|state| {
                    state
                        .param(x0.to_owned())
                        .inv_hessian(Array2::eye(nx))
                        .max_iters(params.max_iter as u64)
                })
                .run()
        });

    let (n_iter, converged) = match run {
        Ok(res) => (
            res.state.get_iter() as usize,
            matches!(
                res.state.get_termination_reason(),
                Some(TerminationReason::SolverConverged)
            ),
        ),
        Err(err) => {
            debug!("BFGS stopped: {err}");
            (0, false)
        }
    };

    let n_eval = log.n_eval.get();
    match log.best.into_inner() {
        Some((fval, x)) => OptimResult {
            fval,
            x,
            n_iter,
            n_eval,
            converged,
        },
        None => OptimResult {
            fval: f64::INFINITY,
            x: x0,
            n_iter,
            n_eval,
            converged: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use argmin_testfunctions::{rosenbrock, rosenbrock_derivative};
    use ndarray::array;

    fn rosenbrock_with_grad(x: &Array1<f64>) -> Option<(f64, Array1<f64>)> {
        let x = x.to_vec();
        Some((rosenbrock(&x), Array1::from(rosenbrock_derivative(&x))))
    }

    #[test]
    fn test_bfgs_rosenbrock() {
        let params = BfgsParams {
            max_iter: 500,
            gtol: 1e-8,
            ftol: 0.,
        };
        let res = optimize_params(
            &rosenbrock_with_grad,
            &array![-1.2, 1.],
            &[(-5., 5.), (-5., 5.)],
            &params,
        );
        assert_abs_diff_eq!(res.x, array![1., 1.], epsilon = 1e-4);
        assert!(res.fval < 1e-8);
        assert!(res.n_eval >= res.n_iter);
    }

    #[test]
    fn test_bfgs_active_bounds() {
        let params = BfgsParams {
            max_iter: 100,
            gtol: 1e-8,
            ftol: 0.,
        };
        // unconstrained minimum at (3, -1), box cuts it off
        let quad = |x: &Array1<f64>| {
            let f = (x[0] - 3.).powi(2) + 2. * (x[1] + 1.).powi(2);
            Some((f, array![2. * (x[0] - 3.), 4. * (x[1] + 1.)]))
        };
        let res = optimize_params(&quad, &array![0., 0.], &[(-1., 2.), (-2., 2.)], &params);
        assert_abs_diff_eq!(res.x, array![2., -1.], epsilon = 1e-6);
        assert_abs_diff_eq!(res.fval, 1., epsilon = 1e-10);
    }

    #[test]
    fn test_start_outside_bounds() {
        let params = BfgsParams {
            max_iter: 100,
            gtol: 1e-8,
            ftol: 0.,
        };
        let quad = |x: &Array1<f64>| Some((x[0] * x[0], array![2. * x[0]]));
        let res = optimize_params(&quad, &array![10.], &[(-1., 1.)], &params);
        assert_abs_diff_eq!(res.x, array![0.], epsilon = 1e-6);
    }

    #[test]
    fn test_failed_evaluation() {
        let params = BfgsParams {
            max_iter: 10,
            gtol: 1e-8,
            ftol: 1e-12,
        };
        let res = optimize_params(&|_: &Array1<f64>| None, &array![0.], &[(-1., 1.)], &params);
        assert!(!res.converged);
        assert_eq!(res.fval, f64::INFINITY);
    }

    #[test]
    fn test_max_iter_reached() {
        let params = BfgsParams {
            max_iter: 1,
            gtol: 0.,
            ftol: 0.,
        };
        let res = optimize_params(
            &rosenbrock_with_grad,
            &array![-1.2, 1.],
            &[(-5., 5.), (-5., 5.)],
            &params,
        );
        assert!(!res.converged);
        assert!(res.n_iter <= 1);
        assert!(res.fval <= 24.2);
    }

    #[test]
    fn test_prepare_multistart() {
        let theta0 = array![0.5, 2.];
        let bounds = [(0.01, 5.), (0.1, 20.)];
        for n_start in [1, 2, 5] {
            let (starts, log_bounds) = prepare_multistart(n_start, &theta0, &bounds, 42);
            assert_eq!(starts.dim(), (n_start, 2));
            assert_abs_diff_eq!(starts.row(0), theta0.mapv(f64::ln));
            for row in starts.rows() {
                for (v, (lo, up)) in row.iter().zip(log_bounds.iter()) {
                    assert!(lo <= v && v <= up);
                }
            }
            let (again, _) = prepare_multistart(n_start, &theta0, &bounds, 42);
            assert_eq!(starts, again);
        }
    }

    #[test]
    fn test_theta_search_space() {
        let (theta0, bounds) = theta_search_space(&array![1., 4.]);
        assert_eq!(theta0, array![0.5, 2.]);
        assert_abs_diff_eq!(bounds[1].0, 0.08);
        assert_abs_diff_eq!(bounds[1].1, 40.);
    }
}
