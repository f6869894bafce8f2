//! Model selection criteria used to estimate the kernel length-scales.
//!
//! Given `theta`, the correlation matrix `R` is factored once (`R = T.Tt`) and the trend
//! coefficients `beta` and the variance `sigma2` are profiled out in closed form unless they
//! are held fixed. From these factors one of the following criteria is computed together with
//! its gradient with respect to `theta`:
//! * `LL`: the log-likelihood,
//! * `LOO`: the (negated) leave-one-out mean squared error,
//! * `LMP`: the log marginal posterior under a jointly robust reference prior on `theta`.

use crate::correlation_models::{CorrelationModel, Kernel};
use crate::errors::{KrigingError, Result};
use crate::linalg;
use crate::mean_models::{RegressionModel, Trend};
use crate::parameters::Parameters;
use crate::utils::{DiffMatrix, spans};
use linfa::Float;
use linfa_linalg::svd::*;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shape parameter `a` of the reference prior used by `LMP`
const LMP_PRIOR_A: f64 = 0.2;

/// Model selection criterion
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Objective {
    /// Log-likelihood (`"LL"`)
    #[default]
    LogLikelihood,
    /// Leave-one-out cross validation error (`"LOO"`)
    LeaveOneOut,
    /// Log marginal posterior (`"LMP"`)
    LogMargPost,
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Objective::LogLikelihood => "LL",
            Objective::LeaveOneOut => "LOO",
            Objective::LogMargPost => "LMP",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Objective {
    type Err = KrigingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LL" => Ok(Objective::LogLikelihood),
            "LOO" => Ok(Objective::LeaveOneOut),
            "LMP" => Ok(Objective::LogMargPost),
            _ => Err(KrigingError::ConfigurationError(format!(
                "Unknown objective '{s}', expected one of LL, LOO, LMP"
            ))),
        }
    }
}

/// Internal parameters computed during training
/// used later on in prediction computations
#[derive(Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub(crate) struct KrigingInnerParams<F: Float> {
    /// Process variance
    pub sigma2: F,
    /// Generalized least-squares regression weights or given beta, (p, 1)
    pub beta: Array2<F>,
    /// Kriging weights R^-1.(y - F.beta), (n, 1)
    pub gamma: Array2<F>,
    /// Cholesky decomposition of the correlation matrix \[R\]
    pub r_chol: Array2<F>,
    /// Solution of the triangular system T.Ft = F
    pub ft: Array2<F>,
    /// R upper triangle matrix of QR decomposition of the matrix Ft, none when beta is fixed
    pub ft_qr_r: Option<Array2<F>>,
    /// Jitter added to the diagonal of \[R\] to get its factorization
    pub jitter: F,
}

impl<F: Float> Clone for KrigingInnerParams<F> {
    fn clone(&self) -> Self {
        Self {
            sigma2: self.sigma2,
            beta: self.beta.to_owned(),
            gamma: self.gamma.to_owned(),
            r_chol: self.r_chol.to_owned(),
            ft: self.ft.to_owned(),
            ft_qr_r: self.ft_qr_r.to_owned(),
            jitter: self.jitter,
        }
    }
}

/// Objective value at a given theta, gradient when requested and the corresponding factors
#[derive(Debug)]
pub(crate) struct ObjectiveValue<F: Float> {
    pub value: F,
    pub gradient: Option<Array1<F>>,
    pub inner: KrigingInnerParams<F>,
}

/// Factors of R(theta) and profiled trend
struct Factors<F: Float> {
    r_chol: Array2<F>,
    jitter: F,
    log_det_r: F,
    ft: Array2<F>,
    /// thin QR of Ft, none when beta is fixed
    ft_qr: Option<(Array2<F>, Array2<F>)>,
    beta: Array2<F>,
    gamma: Array2<F>,
    rho_sqr: F,
}

/// Evaluates a model selection criterion on given (normalized) training data
pub(crate) struct ObjectiveEvaluator<'a, F: Float> {
    kernel: Kernel,
    objective: Objective,
    distances: DiffMatrix<F>,
    fx: Array2<F>,
    y: &'a Array2<F>,
    sigma2: Option<F>,
    beta: Option<&'a Array1<F>>,
    /// `C_k` scales of the `LMP` prior
    prior_scales: Array1<F>,
}

impl<'a, F: Float> ObjectiveEvaluator<'a, F> {
    /// `x` (n, nx) and `y` (n, 1) training data, `parameters` gives fixed sigma2 and beta if any
    pub fn new(
        kernel: Kernel,
        trend: Trend,
        objective: Objective,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &'a Array2<F>,
        parameters: &'a Parameters<F>,
    ) -> Self {
        let n = F::cast(x.nrows());
        let nx = F::cast(x.ncols());
        let prior_scales = spans(x).mapv(|s| s * n.powf(-F::one() / nx));
        ObjectiveEvaluator {
            kernel,
            objective,
            distances: DiffMatrix::new(x),
            fx: trend.value(x),
            y,
            sigma2: parameters.sigma2,
            beta: parameters.beta.as_ref(),
            prior_scales,
        }
    }

    /// Pairwise differences of training inputs
    pub fn distances(&self) -> &DiffMatrix<F> {
        &self.distances
    }

    fn n_obs(&self) -> usize {
        self.distances.n_obs
    }

    /// Number of trend coefficients estimated from data
    fn n_estimated_beta(&self) -> usize {
        if self.beta.is_some() {
            0
        } else {
            self.fx.ncols()
        }
    }

    /// Objective value (to be maximized) at `theta`, with its gradient if `with_gradient`
    pub fn evaluate(
        &self,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
        with_gradient: bool,
    ) -> Result<ObjectiveValue<F>> {
        let factors = self.factorize(theta)?;
        let (value, sigma2, gradient) = match self.objective {
            Objective::LogLikelihood => self.log_likelihood(theta, &factors, with_gradient)?,
            Objective::LeaveOneOut => self.leave_one_out(theta, &factors, with_gradient)?,
            Objective::LogMargPost => self.log_marg_post(theta, &factors, with_gradient)?,
        };
        if !value.is_finite() {
            return Err(KrigingError::NumericalError(format!(
                "{} objective is not finite at theta = {}",
                self.objective,
                theta.to_owned()
            )));
        }
        let Factors {
            r_chol,
            jitter,
            ft,
            ft_qr,
            beta,
            gamma,
            ..
        } = factors;
        Ok(ObjectiveValue {
            value,
            gradient,
            inner: KrigingInnerParams {
                sigma2,
                beta,
                gamma,
                r_chol,
                ft,
                ft_qr_r: ft_qr.map(|(_, r)| r),
                jitter,
            },
        })
    }

    /// Leave-one-out residuals `y_i - y_{-i}` and diagonal of the projected precision matrix,
    /// the leave-one-out variances being `sigma2 / diag`
    pub fn leave_one_out_terms(
        &self,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        let factors = self.factorize(theta)?;
        let q = self.projected_precision(&factors)?;
        let q_diag = checked_diag(&q)?;
        let errors = &factors.gamma.column(0) / &q_diag;
        Ok((errors, q_diag))
    }

    fn factorize(&self, theta: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<Factors<F>> {
        if theta.len() != self.distances.d.ncols() {
            return Err(KrigingError::ValidationError(format!(
                "theta should have {} components, got {}",
                self.distances.d.ncols(),
                theta.len()
            )));
        }
        if let Some(beta) = self.beta {
            if beta.len() != self.fx.ncols() {
                return Err(KrigingError::ValidationError(format!(
                    "beta should have {} components, got {}",
                    self.fx.ncols(),
                    beta.len()
                )));
            }
        }
        let rxx = self.kernel.value(&self.distances.d, theta);
        let r_mx = self.distances.assemble(&rxx, F::one());
        let (r_chol, jitter) = linalg::cholesky_jittered(&r_mx)?;
        let log_det_r = linalg::log_det_cholesky(&r_chol);

        let ft = linalg::solve_lower(&r_chol, &self.fx)?;
        let yt = linalg::solve_lower(&r_chol, self.y)?;
        let (ft_qr, beta, rho) = match self.beta {
            Some(beta) => {
                let beta = beta.to_owned().insert_axis(Axis(1));
                let rho = &yt - &ft.dot(&beta);
                (None, beta, rho)
            }
            None => {
                let (ft_qr_q, ft_qr_r) = linalg::qr(&ft)?;
                self.check_conditioning(&ft_qr_r)?;
                let beta = linalg::solve_upper(&ft_qr_r, &ft_qr_q.t().dot(&yt))?;
                let rho = &yt - &ft.dot(&beta);
                (Some((ft_qr_q, ft_qr_r)), beta, rho)
            }
        };
        let rho_sqr = rho.iter().fold(F::zero(), |acc, v| acc + *v * *v);
        let gamma = linalg::solve_lower_transpose(&r_chol, &rho)?;

        Ok(Factors {
            r_chol,
            jitter,
            log_det_r,
            ft,
            ft_qr,
            beta,
            gamma,
            rho_sqr,
        })
    }

    /// Check whether we have an ill-conditioned generalized least squares problem
    fn check_conditioning(&self, ft_qr_r: &Array2<F>) -> Result<()> {
        let cond_ft = inverse_condition(ft_qr_r)?;
        if cond_ft < F::cast(1e-10) {
            let cond_fx = inverse_condition(&self.fx)?;
            if cond_fx < F::cast(1e-15) {
                return Err(KrigingError::NumericalError(
                    "F is too ill conditioned. Poor combination \
                    of regression model and observations."
                        .to_string(),
                ));
            } else {
                return Err(KrigingError::NumericalError(
                    "Ft is too ill conditioned, try another theta again".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// `R^-1 - R^-1.F.(Ft.R^-1.F)^-1.Ft.R^-1`, or `R^-1` when beta is fixed
    fn projected_precision(&self, factors: &Factors<F>) -> Result<Array2<F>> {
        let r_inv = linalg::cholesky_inverse(&factors.r_chol)?;
        match &factors.ft_qr {
            Some((ft_qr_q, _)) => {
                let g = linalg::solve_lower_transpose(&factors.r_chol, ft_qr_q)?;
                Ok(r_inv - g.dot(&g.t()))
            }
            None => Ok(r_inv),
        }
    }

    /// dR/dtheta_k matrices
    fn correlation_gradients(
        &self,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Vec<Array2<F>> {
        let dr = self.kernel.theta_gradient(&self.distances.d, theta);
        dr.columns()
            .into_iter()
            .map(|drk| self.distances.assemble(&drk, F::zero()))
            .collect()
    }

    /// LL = -1/2 [ n.log(2pi) + log|R| + n.log(sigma2) + (y - F.beta)t.R^-1.(y - F.beta) / sigma2 ]
    fn log_likelihood(
        &self,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
        factors: &Factors<F>,
        with_gradient: bool,
    ) -> Result<(F, F, Option<Array1<F>>)> {
        let n = F::cast(self.n_obs());
        let sigma2 = self
            .sigma2
            .unwrap_or_else(|| floored(factors.rho_sqr / n));
        let two_pi = F::cast(2. * std::f64::consts::PI);
        let value = -F::cast(0.5)
            * (n * two_pi.ln() + factors.log_det_r + n * sigma2.ln() + factors.rho_sqr / sigma2);

        let gradient = if with_gradient {
            let r_inv = linalg::cholesky_inverse(&factors.r_chol)?;
            let gamma = factors.gamma.column(0);
            let grad = self
                .correlation_gradients(theta)
                .iter()
                .map(|dr| {
                    let quad = gamma.dot(&dr.dot(&gamma));
                    F::cast(0.5) * quad / sigma2 - F::cast(0.5) * (&r_inv * dr).sum()
                })
                .collect();
            Some(grad)
        } else {
            None
        };
        Ok((value, sigma2, gradient))
    }

    /// LOO = - mean(e_i^2) with e_i = (Q.y)_i / Q_ii
    fn leave_one_out(
        &self,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
        factors: &Factors<F>,
        with_gradient: bool,
    ) -> Result<(F, F, Option<Array1<F>>)> {
        let n = F::cast(self.n_obs());
        let q = self.projected_precision(factors)?;
        let q_diag = checked_diag(&q)?;
        let gamma = factors.gamma.column(0);
        let errors = &gamma / &q_diag;
        let mse = errors.mapv(|e| e * e).sum() / n;
        let sigma2 = self.sigma2.unwrap_or_else(|| {
            floored((&errors * &errors * &q_diag).sum() / n)
        });

        let gradient = if with_gradient {
            let grad = self
                .correlation_gradients(theta)
                .iter()
                .map(|dr| {
                    let qdr = q.dot(dr);
                    // d(Q.y) = -Q.dR.Q.y
                    let dqy = qdr.dot(&gamma).mapv(|v| -v);
                    let mut dmse = F::zero();
                    Zip::indexed(&errors).for_each(|i, e| {
                        // dQ_ii = -(Q.dR.Q)_ii
                        let dq_ii = -qdr.row(i).dot(&q.column(i));
                        let de = (dqy[i] * q_diag[i] - gamma[i] * dq_ii) / (q_diag[i] * q_diag[i]);
                        dmse += *e * de;
                    });
                    -F::cast(2.) * dmse / n
                })
                .collect();
            Some(grad)
        } else {
            None
        };
        Ok((-mse, sigma2, gradient))
    }

    /// LMP = -1/2.log|R| - 1/2.log|Ft.R^-1.F| - (n - p)/2.log(S2) + log prior(theta)
    /// where S2 = yt.Q.y, when sigma2 is profiled
    fn log_marg_post(
        &self,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
        factors: &Factors<F>,
        with_gradient: bool,
    ) -> Result<(F, F, Option<Array1<F>>)> {
        let n = self.n_obs();
        let p = self.n_estimated_beta();
        if n <= p {
            return Err(KrigingError::ValidationError(format!(
                "Log marginal posterior requires more observations ({n}) than trend coefficients ({p})"
            )));
        }
        let n_p = F::cast(n - p);
        let log_det_m = match &factors.ft_qr {
            Some((_, ft_qr_r)) => ft_qr_r
                .diag()
                .fold(F::zero(), |acc, v| acc + v.abs().ln())
                * F::cast(2.),
            None => F::zero(),
        };
        let s2 = floored(factors.rho_sqr);
        let half = F::cast(0.5);
        let marginal = -half * factors.log_det_r - half * log_det_m;
        let (value, sigma2, scale) = match self.sigma2 {
            Some(sigma2) => (
                marginal - half * n_p * sigma2.ln() - half * s2 / sigma2,
                sigma2,
                F::one() / sigma2,
            ),
            None => (marginal - half * n_p * s2.ln(), s2 / n_p, n_p / s2),
        };
        let (log_prior, log_prior_grad) = self.log_prior(theta);

        let gradient = if with_gradient {
            let q = self.projected_precision(factors)?;
            let gamma = factors.gamma.column(0);
            let grad = self
                .correlation_gradients(theta)
                .iter()
                .zip(log_prior_grad.iter())
                .map(|(dr, dprior)| {
                    let quad = gamma.dot(&dr.dot(&gamma));
                    -half * (&q * dr).sum() + half * scale * quad + *dprior
                })
                .collect();
            Some(grad)
        } else {
            None
        };
        Ok((value + log_prior, sigma2, gradient))
    }

    /// Jointly robust prior: a.log(t) - b.t with t = sum_k C_k / theta_k
    fn log_prior(&self, theta: &ArrayBase<impl Data<Elem = F>, Ix1>) -> (F, Array1<F>) {
        let a = F::cast(LMP_PRIOR_A);
        let nx = F::cast(theta.len());
        let n = F::cast(self.n_obs());
        let b = n.powf(-F::one() / nx) * (a + nx);
        let t = Zip::from(&self.prior_scales)
            .and(theta)
            .fold(F::zero(), |acc, c, th| acc + *c / *th);
        let dt = Zip::from(&self.prior_scales)
            .and(theta)
            .map_collect(|c, th| -*c / (*th * *th));
        let value = a * t.ln() - b * t;
        (value, dt.mapv(|v| (a / t - b) * v))
    }
}

/// Smallest over largest singular value
fn inverse_condition<F: Float>(m: &Array2<F>) -> Result<F> {
    let (_, sv, _) = m.svd(false, false)?;
    let smax = sv.iter().fold(F::zero(), |acc, v| acc.max(*v));
    let smin = sv.iter().fold(F::infinity(), |acc, v| acc.min(*v));
    if smax > F::zero() {
        Ok(smin / smax)
    } else {
        Ok(F::zero())
    }
}

/// Diagonal of the projected precision matrix, all entries should be positive
fn checked_diag<F: Float>(q: &Array2<F>) -> Result<Array1<F>> {
    let diag = q.diag().to_owned();
    if diag.iter().any(|v| !(*v > F::zero())) {
        return Err(KrigingError::NumericalError(
            "Leave-one-out variances are degenerated".to_string(),
        ));
    }
    Ok(diag)
}

/// Variances estimates are kept away from zero (e.g. constant responses)
fn floored<F: Float>(v: F) -> F {
    v.max(F::min_positive_value())
}
