use crate::correlation_models::{CorrelationModel, Kernel};
use crate::errors::{KrigingError, Result};
use crate::linalg;
use crate::mean_models::{RegressionModel, Trend};
use crate::objective::{KrigingInnerParams, Objective, ObjectiveEvaluator, ObjectiveValue};
use crate::optimization::{
    BfgsParams, OptimReport, OptimResult, optimize_params, prepare_multistart, theta_search_space,
};
use crate::parameters::{KrigingParams, KrigingValidParams, Optimizer, Parameters};
use crate::utils::{NormalizedData, spans};

use linfa::prelude::{DatasetBase, Fit, Float, PredictInplace};
use linfa_linalg::eigh::EighInto;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
use ndarray_rand::RandomExt;
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

#[cfg(feature = "persistent")]
use std::{fs, io::Write};

/// Posterior distribution at query points, in original output units
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction<F: Float> {
    /// Posterior mean (m,)
    pub mean: Array1<F>,
    /// Posterior variance (m,), never negative
    pub variance: Array1<F>,
    /// Posterior covariance (m, m) when requested
    pub covariance: Option<Array2<F>>,
}

/// Summary of a fitted model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescription<F: Float> {
    /// Correlation kernel
    pub kernel: Kernel,
    /// Trend basis
    pub trend: Trend,
    /// Criterion used for fitting
    pub objective: Objective,
    /// Hyperparameter optimizer
    pub optimizer: Optimizer,
    /// Whether data were normalized
    pub normalize: bool,
    /// Number of training points
    pub n_obs: usize,
    /// Input dimension
    pub dim: usize,
    /// Correlation length-scales
    pub theta: Array1<F>,
    /// `false` when theta was given
    pub theta_estimated: bool,
    /// Process variance
    pub sigma2: F,
    /// `false` when sigma2 was given
    pub sigma2_estimated: bool,
    /// Trend coefficients
    pub beta: Array1<F>,
    /// `false` when beta was given
    pub beta_estimated: bool,
    /// Objective value at theta
    pub objective_value: F,
    /// Optimization summary
    pub optim_report: OptimReport,
}

fn estimated(flag: bool) -> &'static str {
    if flag { "estimated" } else { "given" }
}

impl<F: Float> fmt::Display for ModelDescription<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "* data: {} x {} -> 1{}",
            self.n_obs,
            self.dim,
            if self.normalize { " (normalized)" } else { "" }
        )?;
        writeln!(
            f,
            "* trend: {} ({}): {}",
            self.trend,
            estimated(self.beta_estimated),
            self.beta
        )?;
        writeln!(
            f,
            "* variance ({}): {}",
            estimated(self.sigma2_estimated),
            self.sigma2
        )?;
        writeln!(f, "* covariance:")?;
        writeln!(f, "  * kernel: {}", self.kernel)?;
        writeln!(
            f,
            "  * range ({}): {}",
            estimated(self.theta_estimated),
            self.theta
        )?;
        writeln!(f, "  * fit:")?;
        writeln!(
            f,
            "    * objective: {} = {}",
            self.objective, self.objective_value
        )?;
        if self.optim_report.is_optimized() {
            write!(
                f,
                "    * optim: {} ({} starts): {} after {} iterations, {} evaluations, {}",
                self.optimizer,
                self.optim_report.n_start,
                if self.optim_report.converged {
                    "converged"
                } else {
                    "not converged"
                },
                self.optim_report.n_iter,
                self.optim_report.n_eval,
                if self.optim_report.improved {
                    "improved on initial guess"
                } else {
                    "no improvement on initial guess"
                }
            )
        } else {
            write!(f, "    * optim: none")
        }
    }
}

/// A fitted Kriging model
///
/// Hyperparameters (`theta`, `sigma2`, `beta`) and diagnostics are expressed in the normalized
/// scale when normalization is enabled, predictions and simulations in original units.
///
/// # Example
///
/// ```no_run
/// use kriging::{Kernel, FittedKriging};
/// use linfa::prelude::*;
/// use ndarray::{arr1, arr2};
///
/// let xt = arr2(&[[0.0], [1.0], [2.0], [3.0], [4.0]]);
/// let yt = arr1(&[0.0, 1.0, 1.5, 0.9, 1.0]);
///
/// let kriging = FittedKriging::<f64>::params(Kernel::Matern52)
///     .fit(&Dataset::new(xt, yt))
///     .expect("Kriging fitted");
///
/// println!("Kriging {}", kriging);
///
/// let xtest = arr2(&[[0.5], [2.5]]);
/// let prediction = kriging.predict(&xtest, false).expect("Kriging prediction");
/// println!("mean = {} variance = {}", prediction.mean, prediction.variance);
/// ```
#[derive(Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct FittedKriging<F: Float> {
    /// Correlation length-scales
    theta: Array1<F>,
    /// Objective value at `theta`
    objective_value: F,
    /// Factorization results at `theta`
    inner_params: KrigingInnerParams<F>,
    /// Training inputs and their transform
    xt_norm: NormalizedData<F>,
    /// Training outputs (as a column) and their transform
    yt_norm: NormalizedData<F>,
    /// Training data in original units
    training_data: (Array2<F>, Array1<F>),
    /// Hyperparameter optimization summary
    optim_report: OptimReport,
    /// Parameters used to fit this model
    params: KrigingValidParams<F>,
}

impl<F: Float> Clone for FittedKriging<F> {
    fn clone(&self) -> Self {
        Self {
            theta: self.theta.to_owned(),
            objective_value: self.objective_value,
            inner_params: self.inner_params.clone(),
            xt_norm: self.xt_norm.clone(),
            yt_norm: self.yt_norm.clone(),
            training_data: self.training_data.clone(),
            optim_report: self.optim_report,
            params: self.params.clone(),
        }
    }
}

impl<F: Float> fmt::Display for FittedKriging<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Kriging(trend={}, kernel={}, theta={}, sigma2={}, {}={})",
            self.params.trend,
            self.params.kernel,
            self.theta,
            self.inner_params.sigma2,
            self.params.objective,
            self.objective_value
        )
    }
}

impl<F: Float> FittedKriging<F> {
    /// Kriging parameters constructor
    pub fn params<NewF: Float>(kernel: Kernel) -> KrigingParams<NewF> {
        KrigingParams::new(kernel)
    }

    /// Posterior mean and variance at `x` (m, nx), with the posterior covariance
    /// if `return_cov` is true.
    pub fn predict(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        return_cov: bool,
    ) -> Result<Prediction<F>> {
        self.check_query(x)?;
        let xnorm = self.xt_norm.apply(x);
        let (yscale, yoffset) = self.output_transform();

        let f = self.params.trend.value(&xnorm);
        let corr = self.correlation(&xnorm);
        let y_ = f.dot(&self.inner_params.beta) + corr.dot(&self.inner_params.gamma);
        let mean = y_.column(0).mapv(|v| v * yscale + yoffset);

        let (rt, u) = self.compute_rt_u(&f, &corr)?;
        let sigma2 = self.inner_params.sigma2 * yscale * yscale;
        let mut reduction = rt.mapv(|v| v * v).sum_axis(Axis(0));
        if let Some(u) = &u {
            reduction = reduction - u.mapv(|v| v * v).sum_axis(Axis(0));
        }
        let variance = reduction.mapv(|v| {
            let mse = (F::one() - v) * sigma2;
            if mse < F::zero() { F::zero() } else { mse }
        });

        let covariance = if return_cov {
            let kxx = self
                .params
                .kernel
                .covariance(&xnorm, &xnorm, &self.theta, F::one());
            let mut cov = kxx - rt.t().dot(&rt);
            if let Some(u) = &u {
                cov = cov + u.t().dot(u);
            }
            Some(cov.mapv(|v| v * sigma2))
        } else {
            None
        };

        Ok(Prediction {
            mean,
            variance,
            covariance,
        })
    }

    /// Posterior mean at `x` (m, nx)
    pub fn predict_mean(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        self.predict(x, false).map(|p| p.mean)
    }

    /// Posterior variance at `x` (m, nx)
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        self.predict(x, false).map(|p| p.variance)
    }

    /// `nsim` joint draws from the posterior at `x` (m, nx) as a (m, nsim) array.
    /// The same `seed` gives the same draws.
    pub fn simulate(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        nsim: usize,
        seed: u64,
    ) -> Result<Array2<F>> {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        self.simulate_with_rng(x, nsim, &mut rng)
    }

    /// Same as [`FittedKriging::simulate`] with a given random generator
    pub fn simulate_with_rng<R: Rng + ?Sized>(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        nsim: usize,
        rng: &mut R,
    ) -> Result<Array2<F>> {
        let m = x.nrows();
        let Prediction {
            mean, covariance, ..
        } = self.predict(x, true)?;
        if m == 0 || nsim == 0 {
            return Ok(Array2::zeros((m, nsim)));
        }
        let cov = covariance.unwrap_or_else(|| Array2::zeros((m, m)));
        // eigen decomposition handles the singular covariance at training points
        let (eigvals, eigvecs) = cov.eigh_into()?;
        let l = eigvecs * &eigvals.mapv(|v| v.max(F::zero()).sqrt());
        let z = Array2::<f64>::random_using((m, nsim), StandardNormal, rng).mapv(F::cast);
        Ok(l.dot(&z) + &mean.insert_axis(Axis(1)))
    }

    /// Add observations `(x_new, y_new)` to the training data.
    ///
    /// `theta` and the normalization transform are kept, `beta` and `sigma2` are re-estimated
    /// (unless given at fit time) and the model is factored again. On failure the model
    /// is left unchanged.
    pub fn update(
        &mut self,
        y_new: &ArrayBase<impl Data<Elem = F>, Ix1>,
        x_new: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<()> {
        check_training_data(x_new, y_new)?;
        if x_new.ncols() != self.dim() {
            return Err(KrigingError::ValidationError(format!(
                "new inputs have {} columns, model was trained with {}",
                x_new.ncols(),
                self.dim()
            )));
        }
        let shape_error = |e: ndarray::ShapeError| KrigingError::ValidationError(e.to_string());
        let x = ndarray::concatenate(Axis(0), &[self.training_data.0.view(), x_new.view()])
            .map_err(shape_error)?;
        let y = ndarray::concatenate(Axis(0), &[self.training_data.1.view(), y_new.view()])
            .map_err(shape_error)?;
        check_n_obs(&self.params, x.ncols(), x.nrows())?;

        let xt_norm = self.xt_norm.reapply(&x);
        let yt_norm = self.yt_norm.reapply(&y.view().insert_axis(Axis(1)));
        let evaluator = ObjectiveEvaluator::new(
            self.params.kernel,
            self.params.trend,
            self.params.objective,
            &xt_norm.data,
            &yt_norm.data,
            &self.params.parameters,
        );
        let ObjectiveValue { value, inner, .. } = evaluator.evaluate(&self.theta, false)?;
        info!(
            "Kriging updated with {} new observation(s), {} = {}",
            x_new.nrows(),
            self.params.objective,
            value
        );

        self.objective_value = value;
        self.inner_params = inner;
        self.xt_norm = xt_norm;
        self.yt_norm = yt_norm;
        self.training_data = (x, y);
        Ok(())
    }

    /// Log-likelihood at `theta` (normalized scale)
    pub fn log_likelihood(&self, theta: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<F> {
        self.objective_at(Objective::LogLikelihood, theta)
    }

    /// Log-likelihood and its gradient with respect to `theta`
    pub fn log_likelihood_grad(
        &self,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<(F, Array1<F>)> {
        self.objective_grad_at(Objective::LogLikelihood, theta)
    }

    /// Leave-one-out mean squared error at `theta` (normalized scale)
    pub fn leave_one_out(&self, theta: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<F> {
        self.objective_at(Objective::LeaveOneOut, theta).map(|v| -v)
    }

    /// Leave-one-out mean squared error and its gradient with respect to `theta`
    pub fn leave_one_out_grad(
        &self,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<(F, Array1<F>)> {
        self.objective_grad_at(Objective::LeaveOneOut, theta)
            .map(|(v, g)| (-v, -g))
    }

    /// Log marginal posterior at `theta` (normalized scale)
    pub fn log_marg_post(&self, theta: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<F> {
        self.objective_at(Objective::LogMargPost, theta)
    }

    /// Log marginal posterior and its gradient with respect to `theta`
    pub fn log_marg_post_grad(
        &self,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<(F, Array1<F>)> {
        self.objective_grad_at(Objective::LogMargPost, theta)
    }

    /// Leave-one-out predictions at training points in original units:
    /// means `y_{-i}` and variances, at the fitted `theta`
    pub fn leave_one_out_residuals(&self) -> Result<(Array1<F>, Array1<F>)> {
        let (errors, q_diag) = self
            .evaluator(Objective::LeaveOneOut)
            .leave_one_out_terms(&self.theta)?;
        let (yscale, _) = self.output_transform();
        let mean = Zip::from(&self.training_data.1)
            .and(&errors)
            .map_collect(|y, e| *y - *e * yscale);
        let sigma2 = self.inner_params.sigma2 * yscale * yscale;
        let variance = q_diag.mapv(|q| sigma2 / q);
        Ok((mean, variance))
    }

    /// Summary of the model
    pub fn describe(&self) -> ModelDescription<F> {
        let mask = self.params.parameters.estimation_mask();
        ModelDescription {
            kernel: self.params.kernel,
            trend: self.params.trend,
            objective: self.params.objective,
            optimizer: self.params.optimizer,
            normalize: self.params.normalize,
            n_obs: self.n_obs(),
            dim: self.dim(),
            theta: self.theta.to_owned(),
            theta_estimated: mask.theta,
            sigma2: self.sigma2(),
            sigma2_estimated: mask.sigma2,
            beta: self.beta(),
            beta_estimated: mask.beta,
            objective_value: self.objective_value,
            optim_report: self.optim_report,
        }
    }

    /// Correlation length-scales
    pub fn theta(&self) -> &Array1<F> {
        &self.theta
    }

    /// Process variance
    pub fn sigma2(&self) -> F {
        self.inner_params.sigma2
    }

    /// Trend coefficients
    pub fn beta(&self) -> Array1<F> {
        self.inner_params.beta.column(0).to_owned()
    }

    /// Training inputs in original units
    pub fn x(&self) -> &Array2<F> {
        &self.training_data.0
    }

    /// Training outputs in original units
    pub fn y(&self) -> &Array1<F> {
        &self.training_data.1
    }

    /// Number of training points
    pub fn n_obs(&self) -> usize {
        self.training_data.0.nrows()
    }

    /// Input dimension
    pub fn dim(&self) -> usize {
        self.training_data.0.ncols()
    }

    /// Correlation kernel
    pub fn kernel(&self) -> Kernel {
        self.params.kernel
    }

    /// Trend basis
    pub fn trend(&self) -> Trend {
        self.params.trend
    }

    /// Criterion used for fitting
    pub fn objective(&self) -> Objective {
        self.params.objective
    }

    /// Objective value at the fitted `theta`
    pub fn objective_value(&self) -> F {
        self.objective_value
    }

    /// Hyperparameter optimization summary
    pub fn optim_report(&self) -> &OptimReport {
        &self.optim_report
    }

    /// Whether training data were normalized
    pub fn is_normalized(&self) -> bool {
        self.params.normalize
    }

    /// Lower Cholesky factor of the training correlation matrix
    pub fn cholesky_factor(&self) -> &Array2<F> {
        &self.inner_params.r_chol
    }

    /// Jitter added to the correlation matrix diagonal (zero if none)
    pub fn jitter(&self) -> F {
        self.inner_params.jitter
    }

    /// Parameters used to fit this model
    pub fn fit_params(&self) -> &KrigingValidParams<F> {
        &self.params
    }

    fn evaluator(&self, objective: Objective) -> ObjectiveEvaluator<'_, F> {
        ObjectiveEvaluator::new(
            self.params.kernel,
            self.params.trend,
            objective,
            &self.xt_norm.data,
            &self.yt_norm.data,
            &self.params.parameters,
        )
    }

    fn objective_at(
        &self,
        objective: Objective,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<F> {
        Ok(self.evaluator(objective).evaluate(theta, false)?.value)
    }

    fn objective_grad_at(
        &self,
        objective: Objective,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<(F, Array1<F>)> {
        let res = self.evaluator(objective).evaluate(theta, true)?;
        let grad = res.gradient.ok_or_else(|| {
            KrigingError::NumericalError(format!("{objective} gradient not available"))
        })?;
        Ok((res.value, grad))
    }

    /// (scale, offset) of the output transform
    fn output_transform(&self) -> (F, F) {
        (self.yt_norm.scale[0], self.yt_norm.offset[0])
    }

    fn check_query(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
        if x.ncols() != self.dim() {
            return Err(KrigingError::ValidationError(format!(
                "query points have {} columns, model was trained with {}",
                x.ncols(),
                self.dim()
            )));
        }
        Ok(())
    }

    /// Correlation (m, n) between normalized query points and training points
    fn correlation(&self, xnorm: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        self.params
            .kernel
            .covariance(xnorm, &self.xt_norm.data, &self.theta, F::one())
    }

    /// `rt = L^-1.r(x)^t` and, when beta is estimated, `u = Rq^-t.(Ft^t.rt - f(x)^t)`
    fn compute_rt_u(
        &self,
        f: &Array2<F>,
        corr: &Array2<F>,
    ) -> Result<(Array2<F>, Option<Array2<F>>)> {
        let inners = &self.inner_params;
        let rt = linalg::solve_lower(&inners.r_chol, &corr.t())?;
        let u = match &inners.ft_qr_r {
            Some(ft_qr_r) => {
                let rhs = inners.ft.t().dot(&rt) - f.t();
                Some(linalg::solve_lower(&ft_qr_r.t(), &rhs)?)
            }
            None => None,
        };
        Ok((rt, u))
    }
}

#[cfg(feature = "persistent")]
impl<F: Float + Serialize + for<'de> Deserialize<'de>> FittedKriging<F> {
    /// Save the model as JSON in the file at `path`
    pub fn save(&self, path: &str) -> Result<()> {
        let mut file = fs::File::create(path)?;
        let bytes = serde_json::to_vec(self)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Load a model previously saved with [`FittedKriging::save`]
    pub fn load(path: &str) -> Result<Box<FittedKriging<F>>> {
        let data = fs::read(path)?;
        let kriging = serde_json::from_slice(&data)?;
        Ok(Box::new(kriging))
    }
}

/// Checks shapes and values of training data
pub(crate) fn check_training_data<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> Result<()> {
    if x.nrows() == 0 {
        return Err(KrigingError::ValidationError(
            "empty observation set".to_string(),
        ));
    }
    if x.ncols() == 0 {
        return Err(KrigingError::ValidationError(
            "input dimension should be at least 1".to_string(),
        ));
    }
    if x.nrows() != y.len() {
        return Err(KrigingError::ValidationError(format!(
            "{} input points but {} output values",
            x.nrows(),
            y.len()
        )));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(KrigingError::ValidationError(
            "training data contain non finite values".to_string(),
        ));
    }
    Ok(())
}

/// Estimating the trend needs more observations than trend coefficients
fn check_n_obs<F: Float>(params: &KrigingValidParams<F>, nx: usize, n_obs: usize) -> Result<()> {
    if params.parameters.beta.is_none() {
        let p = RegressionModel::<F>::n_basis(&params.trend, nx);
        if n_obs <= p {
            return Err(KrigingError::ValidationError(format!(
                "{} trend needs more than {} observations to be estimated, got {}",
                params.trend, p, n_obs
            )));
        }
    }
    Ok(())
}

/// Checks given hyperparameters against the input dimension
fn check_parameters_dims<F: Float>(
    trend: Trend,
    parameters: &Parameters<F>,
    nx: usize,
) -> Result<()> {
    if let Some(theta) = &parameters.theta {
        if theta.len() != nx {
            return Err(KrigingError::ValidationError(format!(
                "theta has {} components, input dimension is {}",
                theta.len(),
                nx
            )));
        }
    }
    if let Some(beta) = &parameters.beta {
        let p = RegressionModel::<F>::n_basis(&trend, nx);
        if beta.len() != p {
            return Err(KrigingError::ValidationError(format!(
                "beta has {} components, {} trend has {} basis functions in dimension {}",
                beta.len(),
                trend,
                p,
                nx
            )));
        }
    }
    Ok(())
}

impl<F: Float> KrigingValidParams<F> {
    /// Multistart BFGS on log(theta), returns the best theta found
    fn optimize_theta(
        &self,
        evaluator: &ObjectiveEvaluator<'_, F>,
        theta0: &Array1<F>,
        bounds: &[(F, F)],
        n_start: usize,
    ) -> Result<(Array1<F>, OptimReport)> {
        // minimize the opposite of the objective w.r.t. log(theta)
        let objfn = |log_theta: &Array1<f64>| -> Option<(f64, Array1<f64>)> {
            let theta = log_theta.mapv(|v| F::cast(v.exp()));
            match evaluator.evaluate(&theta, true) {
                Ok(ObjectiveValue {
                    value,
                    gradient: Some(grad),
                    ..
                }) => Some((
                    -into_f64(value),
                    (grad * &theta).mapv(|v| -into_f64(v)),
                )),
                Ok(_) => None,
                Err(err) => {
                    debug!("Objective evaluation failed at theta = {theta}: {err}");
                    None
                }
            }
        };

        let (starts, log_bounds) = prepare_multistart(n_start, theta0, bounds, self.seed);
        debug!("Optimize with multistart theta = {:?}", starts.mapv(|v| v.exp()));
        let starts = starts.mapv(into_f64);
        let log_bounds: Vec<(f64, f64)> = log_bounds
            .iter()
            .map(|(lo, up)| (into_f64(*lo), into_f64(*up)))
            .collect();
        let bfgs = BfgsParams {
            max_iter: self.max_iter,
            gtol: into_f64(self.gtol),
            ftol: into_f64(self.ftol),
        };

        let initial = objfn(&starts.row(0).to_owned()).map(|(f, _)| f);
        let results: Vec<OptimResult> = (0..starts.nrows())
            .into_par_iter()
            .map(|i| optimize_params(&objfn, &starts.row(i).to_owned(), &log_bounds, &bfgs))
            .collect();

        let n_eval = results.iter().map(|r| r.n_eval).sum::<usize>() + 1;
        let best = results
            .into_iter()
            .filter(|r| r.fval.is_finite())
            .reduce(|a, b| if b.fval < a.fval { b } else { a })
            .ok_or_else(|| {
                KrigingError::NumericalError(format!(
                    "{} objective could not be evaluated from any of the {} starting points",
                    self.objective,
                    starts.nrows()
                ))
            })?;

        let report = OptimReport {
            n_start: starts.nrows(),
            n_iter: best.n_iter,
            n_eval,
            converged: best.converged,
            improved: initial.map(|f0| best.fval < f0).unwrap_or(true),
        };
        if !report.converged {
            warn!(
                "Hyperparameters optimization did not converge in {} iterations",
                self.max_iter
            );
        }
        if !report.improved {
            warn!(
                "Hyperparameters optimization did not improve {} on the initial guess",
                self.objective
            );
        }
        Ok((best.x.mapv(|v| F::cast(v.exp())), report))
    }
}

fn into_f64<F: Float>(v: F) -> f64 {
    <f64 as Float>::cast(v)
}

impl<F: Float, D: Data<Elem = F>> Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, KrigingError>
    for KrigingValidParams<F>
{
    type Object = FittedKriging<F>;

    /// Fit Kriging parameters using the optimizer and objective of these parameters
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records();
        let y = dataset.targets();
        check_training_data(x, y)?;
        let nx = x.ncols();
        check_parameters_dims(self.trend, &self.parameters, nx)?;
        check_n_obs(self, nx, x.nrows())?;

        let xt_norm = NormalizedData::with_normalization(x, self.normalize);
        let yt_norm =
            NormalizedData::with_normalization(&y.view().insert_axis(Axis(1)), self.normalize);
        let evaluator = ObjectiveEvaluator::new(
            self.kernel,
            self.trend,
            self.objective,
            &xt_norm.data,
            &yt_norm.data,
            &self.parameters,
        );
        if evaluator.distances().has_duplicates() {
            warn!("Training data contain duplicated points, correlation matrix is singular");
        }

        let now = Instant::now();
        let (theta, optim_report) = match (&self.parameters.theta, self.optimizer) {
            (Some(theta), _) => (theta.to_owned(), OptimReport::skipped()),
            (None, Optimizer::None) => (
                theta_search_space(&spans(&xt_norm.data)).0,
                OptimReport::skipped(),
            ),
            (None, Optimizer::Bfgs { n_start }) => {
                let (theta0, bounds) = theta_search_space(&spans(&xt_norm.data));
                self.optimize_theta(&evaluator, &theta0, &bounds, n_start)?
            }
        };
        debug!("Elapsed optim = {:?}", now.elapsed().as_millis());

        let ObjectiveValue { value, inner, .. } = evaluator.evaluate(&theta, false)?;
        info!(
            "Kriging fitted on {} points: theta = {}, sigma2 = {}, {} = {}",
            x.nrows(),
            theta,
            inner.sigma2,
            self.objective,
            value
        );

        Ok(FittedKriging {
            theta,
            objective_value: value,
            inner_params: inner,
            xt_norm,
            yt_norm,
            training_data: (x.to_owned(), y.to_owned()),
            optim_report,
            params: self.clone(),
        })
    }
}

impl<F: Float, D: Data<Elem = F>> PredictInplace<ArrayBase<D, Ix2>, Array1<F>>
    for FittedKriging<F>
{
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<F>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );

        let values = self.predict_mean(x).expect("Kriging prediction");
        *y = values;
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<F> {
        Array1::zeros((x.nrows(),))
    }
}
