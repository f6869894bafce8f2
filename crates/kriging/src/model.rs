//! Kriging model lifecycle: an unfit model is fitted once, then read (predict, simulate,
//! diagnostics) or extended with new observations (update).
//!
//! `fit` and `update` take `&mut self` so they get exclusive access to the model, while every
//! read takes `&self` and may be called concurrently on a fitted model.
use crate::algorithm::{FittedKriging, ModelDescription, Prediction, check_training_data};
use crate::correlation_models::Kernel;
use crate::errors::{KrigingError, Result};
use crate::mean_models::Trend;
use crate::objective::Objective;
use crate::parameters::{KrigingParams, Optimizer, Parameters};

use linfa::prelude::{Dataset, Fit, Float};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use ndarray_rand::rand::Rng;

/// A Kriging model, either unfit or holding a [`FittedKriging`]
///
/// # Example
///
/// ```no_run
/// use kriging::{Kriging, Parameters, Trend};
/// use ndarray::{arr1, arr2};
///
/// let xt = arr2(&[[0.0], [1.0], [2.0], [3.0], [4.0]]);
/// let yt = arr1(&[0.0, 1.0, 1.5, 0.9, 1.0]);
///
/// let mut model = Kriging::new("matern5_2").expect("known kernel");
/// model
///     .fit(&yt, &xt, Trend::Constant, false, "BFGS", "LL", Parameters::default())
///     .expect("Kriging fitted");
/// let prediction = model.predict(&arr2(&[[2.5]]), false).expect("prediction");
/// println!("{}", model.describe_model().expect("description"));
/// ```
#[derive(Debug, Clone)]
pub struct Kriging<F: Float = f64> {
    kernel: Kernel,
    fitted: Option<FittedKriging<F>>,
}

impl<F: Float> Kriging<F> {
    /// Unfit model with the kernel named `kernel`
    /// (`gauss`, `exp`, `matern3_2` or `matern5_2`)
    pub fn new(kernel: &str) -> Result<Self> {
        Ok(Self::with_kernel(kernel.parse()?))
    }

    /// Unfit model with the given kernel
    pub fn with_kernel(kernel: Kernel) -> Self {
        Kriging {
            kernel,
            fitted: None,
        }
    }

    /// Correlation kernel of the model
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    /// Fit the model on observations `y` (n,) at points `x` (n, d).
    ///
    /// `optim` is `none`, `BFGS` or `BFGS<n>` (n multistart points), `objective` one of
    /// `LL`, `LOO` or `LMP`. Fields set in `parameters` are held fixed, the others are estimated.
    /// Any previous fit is discarded first, so on error the model is left unfit.
    #[allow(clippy::too_many_arguments)]
    pub fn fit(
        &mut self,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        regmodel: Trend,
        normalize: bool,
        optim: &str,
        objective: &str,
        parameters: Parameters<F>,
    ) -> Result<()> {
        self.fitted = None;
        let optimizer: Optimizer = optim.parse()?;
        let objective: Objective = objective.parse()?;
        check_training_data(x, y)?;

        let params = KrigingParams::new(self.kernel)
            .trend(regmodel)
            .normalize(normalize)
            .optimizer(optimizer)
            .objective(objective)
            .parameters(parameters);
        let dataset = Dataset::new(x.to_owned(), y.to_owned());
        self.fitted = Some(params.fit(&dataset)?);
        Ok(())
    }

    /// Whether a fit succeeded
    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// The fitted model, a [`KrigingError::StateError`] when unfit
    pub fn fitted(&self) -> Result<&FittedKriging<F>> {
        self.fitted.as_ref().ok_or_else(unfit)
    }

    /// Posterior mean and variance at `x`, and covariance if `return_cov`
    pub fn predict(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        return_cov: bool,
    ) -> Result<Prediction<F>> {
        self.fitted()?.predict(x, return_cov)
    }

    /// `nsim` conditional simulations at `x` as a (m, nsim) array, reproducible with `seed`
    pub fn simulate(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        nsim: usize,
        seed: u64,
    ) -> Result<Array2<F>> {
        self.fitted()?.simulate(x, nsim, seed)
    }

    /// Same as [`Kriging::simulate`] drawing from the given random generator
    pub fn simulate_with_rng<R: Rng + ?Sized>(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        nsim: usize,
        rng: &mut R,
    ) -> Result<Array2<F>> {
        self.fitted()?.simulate_with_rng(x, nsim, rng)
    }

    /// Append observations `y_new` at `x_new` keeping the current `theta`
    pub fn update(
        &mut self,
        y_new: &ArrayBase<impl Data<Elem = F>, Ix1>,
        x_new: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<()> {
        self.fitted
            .as_mut()
            .ok_or_else(unfit)?
            .update(y_new, x_new)
    }

    /// Leave-one-out mean squared error at `theta`
    pub fn leave_one_out(&self, theta: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<F> {
        self.fitted()?.leave_one_out(theta)
    }

    /// Leave-one-out mean squared error at `theta` and its gradient
    pub fn leave_one_out_grad(
        &self,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<(F, Array1<F>)> {
        self.fitted()?.leave_one_out_grad(theta)
    }

    /// Leave-one-out means and variances at training points
    pub fn leave_one_out_residuals(&self) -> Result<(Array1<F>, Array1<F>)> {
        self.fitted()?.leave_one_out_residuals()
    }

    /// Log-likelihood at `theta`
    pub fn log_likelihood(&self, theta: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<F> {
        self.fitted()?.log_likelihood(theta)
    }

    /// Log-likelihood at `theta` and its gradient
    pub fn log_likelihood_grad(
        &self,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<(F, Array1<F>)> {
        self.fitted()?.log_likelihood_grad(theta)
    }

    /// Log marginal posterior at `theta`
    pub fn log_marg_post(&self, theta: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<F> {
        self.fitted()?.log_marg_post(theta)
    }

    /// Log marginal posterior at `theta` and its gradient
    pub fn log_marg_post_grad(
        &self,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<(F, Array1<F>)> {
        self.fitted()?.log_marg_post_grad(theta)
    }

    /// Summary of the fitted model
    pub fn describe_model(&self) -> Result<ModelDescription<F>> {
        Ok(self.fitted()?.describe())
    }
}

fn unfit() -> KrigingError {
    KrigingError::StateError("Kriging model is not fitted".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, array};

    fn training_data() -> (Array2<f64>, Array1<f64>) {
        let xt = arr2(&[[0.0], [1.0], [2.0], [3.0], [4.0]]);
        let yt = arr1(&[0.0, 1.0, 1.5, 0.9, 1.0]);
        (xt, yt)
    }

    #[test]
    fn test_unknown_kernel() {
        assert!(matches!(
            Kriging::<f64>::new("cubic"),
            Err(KrigingError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_reads_require_fit() {
        let model = Kriging::<f64>::new("exp").unwrap();
        let x = array![[0.5]];
        assert!(!model.is_fitted());
        assert!(matches!(
            model.predict(&x, false),
            Err(KrigingError::StateError(_))
        ));
        assert!(matches!(
            model.simulate(&x, 3, 0),
            Err(KrigingError::StateError(_))
        ));
        assert!(matches!(
            model.leave_one_out(&array![0.1]),
            Err(KrigingError::StateError(_))
        ));
        assert!(matches!(
            model.log_likelihood(&array![0.1]),
            Err(KrigingError::StateError(_))
        ));
        assert!(matches!(
            model.log_marg_post(&array![0.1]),
            Err(KrigingError::StateError(_))
        ));
        assert!(matches!(
            model.describe_model(),
            Err(KrigingError::StateError(_))
        ));
    }

    #[test]
    fn test_update_requires_fit() {
        let mut model = Kriging::<f64>::new("gauss").unwrap();
        assert!(matches!(
            model.update(&array![1.], &array![[0.5]]),
            Err(KrigingError::StateError(_))
        ));
    }

    #[test]
    fn test_fit_bad_configuration() {
        let (xt, yt) = training_data();
        let mut model = Kriging::new("exp").unwrap();
        let res = model.fit(
            &yt,
            &xt,
            Trend::Constant,
            false,
            "Newton",
            "LL",
            Parameters::default(),
        );
        assert!(matches!(res, Err(KrigingError::ConfigurationError(_))));
        let res = model.fit(
            &yt,
            &xt,
            Trend::Constant,
            false,
            "BFGS",
            "MLE",
            Parameters::default(),
        );
        assert!(matches!(res, Err(KrigingError::ConfigurationError(_))));
    }

    #[test]
    fn test_fit_length_mismatch() {
        let (xt, _) = training_data();
        let mut model = Kriging::new("exp").unwrap();
        let res = model.fit(
            &arr1(&[1., 2.]),
            &xt,
            Trend::Constant,
            false,
            "BFGS",
            "LL",
            Parameters::default(),
        );
        assert!(matches!(res, Err(KrigingError::ValidationError(_))));
    }

    #[test]
    fn test_failed_fit_discards_previous_fit() {
        let (xt, yt) = training_data();
        let mut model = Kriging::new("matern5_2").unwrap();
        model
            .fit(
                &yt,
                &xt,
                Trend::Constant,
                false,
                "BFGS",
                "LL",
                Parameters::default(),
            )
            .unwrap();
        assert!(model.is_fitted());

        let res = model.fit(
            &yt,
            &xt,
            Trend::Constant,
            false,
            "BFGS",
            "LL",
            Parameters::default().with_theta(array![0.1, 0.2]),
        );
        assert!(matches!(res, Err(KrigingError::ValidationError(_))));
        assert!(!model.is_fitted());
    }

    #[test]
    fn test_fit_and_describe() {
        let (xt, yt) = training_data();
        let mut model = Kriging::new("matern3_2").unwrap();
        model
            .fit(
                &yt,
                &xt,
                Trend::Linear,
                true,
                "BFGS3",
                "LOO",
                Parameters::default(),
            )
            .unwrap();
        let description = model.describe_model().unwrap();
        assert_eq!(description.kernel, Kernel::Matern32);
        assert_eq!(description.trend, Trend::Linear);
        assert_eq!(description.objective, Objective::LeaveOneOut);
        assert_eq!(description.n_obs, 5);
        assert_eq!(description.beta.len(), 2);
        assert_eq!(description.optim_report.n_start, 3);
        assert!(description.theta_estimated);
        let text = description.to_string();
        assert!(text.contains("matern3_2"));
        assert!(text.contains("LOO"));
    }
}
