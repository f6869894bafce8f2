use crate::correlation_models::Kernel;
use crate::errors::{KrigingError, Result};
use crate::mean_models::Trend;
use crate::objective::Objective;
use linfa::{Float, ParamGuard};

use ndarray::Array1;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default maximum number of BFGS iterations per start
pub const KRIGING_BFGS_MAX_ITER: usize = 100;
/// Default tolerance on the gradient norm
pub const KRIGING_BFGS_GTOL: f64 = 1e-6;
/// Default tolerance on the change of the objective between two iterations
pub const KRIGING_BFGS_FTOL: f64 = 1e-10;
/// Default seed of the multistart sampling
pub const KRIGING_MULTISTART_SEED: u64 = 42;

/// Hyperparameters partially specified by the user.
///
/// A field left to `None` is estimated when fitting, a given field is held fixed.
#[derive(Clone, Debug, PartialEq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct Parameters<F: Float> {
    /// Length-scales of the covariance kernel, one per input dimension
    pub theta: Option<Array1<F>>,
    /// Process variance
    pub sigma2: Option<F>,
    /// Trend coefficients, one per basis function
    pub beta: Option<Array1<F>>,
}

/// Which hyperparameters are estimated (`true`) or held fixed (`false`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct EstimationMask {
    /// theta is searched by the optimizer
    pub theta: bool,
    /// sigma2 is profiled in closed form
    pub sigma2: bool,
    /// beta is profiled in closed form (generalized least squares)
    pub beta: bool,
}

impl<F: Float> Parameters<F> {
    /// Hold theta fixed
    pub fn with_theta(mut self, theta: Array1<F>) -> Self {
        self.theta = Some(theta);
        self
    }

    /// Hold sigma2 fixed
    pub fn with_sigma2(mut self, sigma2: F) -> Self {
        self.sigma2 = Some(sigma2);
        self
    }

    /// Hold beta fixed
    pub fn with_beta(mut self, beta: Array1<F>) -> Self {
        self.beta = Some(beta);
        self
    }

    /// Fixed vs estimated status of each field
    pub fn estimation_mask(&self) -> EstimationMask {
        EstimationMask {
            theta: self.theta.is_none(),
            sigma2: self.sigma2.is_none(),
            beta: self.beta.is_none(),
        }
    }

    /// Check values independently of training data
    fn check(&self) -> Result<()> {
        if let Some(theta) = &self.theta {
            if theta.is_empty() || theta.iter().any(|t| !(t.is_finite() && *t > F::zero())) {
                return Err(KrigingError::ValidationError(format!(
                    "theta should be non empty with strictly positive values, got {theta}"
                )));
            }
        }
        if let Some(sigma2) = self.sigma2 {
            if !(sigma2.is_finite() && sigma2 > F::zero()) {
                return Err(KrigingError::ValidationError(format!(
                    "sigma2 should be strictly positive, got {sigma2}"
                )));
            }
        }
        if let Some(beta) = &self.beta {
            if beta.iter().any(|b| !b.is_finite()) {
                return Err(KrigingError::ValidationError(format!(
                    "beta should have finite values, got {beta}"
                )));
            }
        }
        Ok(())
    }
}

/// Hyperparameters optimization strategy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Optimizer {
    /// No optimization: theta is either given or set to its heuristic initial guess
    None,
    /// BFGS from `n_start` starting points
    Bfgs {
        /// Number of starting points (at least 1)
        n_start: usize,
    },
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::Bfgs { n_start: 1 }
    }
}

impl fmt::Display for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Optimizer::None => write!(f, "none"),
            Optimizer::Bfgs { n_start: 1 } => write!(f, "BFGS"),
            Optimizer::Bfgs { n_start } => write!(f, "BFGS{n_start}"),
        }
    }
}

impl FromStr for Optimizer {
    type Err = KrigingError;

    /// Parse `"none"`, `"BFGS"` or `"BFGS<n>"` where `n >= 1` is the number of starts
    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("none") {
            return Ok(Optimizer::None);
        }
        match s.strip_prefix("BFGS") {
            Some("") => Ok(Optimizer::Bfgs { n_start: 1 }),
            Some(n) => match n.parse::<usize>() {
                Ok(n_start) if n_start > 0 => Ok(Optimizer::Bfgs { n_start }),
                _ => Err(KrigingError::ConfigurationError(format!(
                    "Bad number of starts in optimizer '{s}', expected BFGS<n> with n >= 1"
                ))),
            },
            None => Err(KrigingError::ConfigurationError(format!(
                "Unknown optimizer '{s}', expected none, BFGS or BFGS<n>"
            ))),
        }
    }
}

/// A set of validated kriging parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct KrigingValidParams<F: Float> {
    /// Correlation model representing the spatial correlation between errors at e(x) and e(x')
    pub(crate) kernel: Kernel,
    /// Regression model representing the mean(x)
    pub(crate) trend: Trend,
    /// Rescale inputs and outputs to the unit interval
    pub(crate) normalize: bool,
    /// Hyperparameters optimization strategy
    pub(crate) optimizer: Optimizer,
    /// Model selection criterion
    pub(crate) objective: Objective,
    /// Hyperparameters held fixed
    pub(crate) parameters: Parameters<F>,
    /// Max number of iterations of one local optimization
    pub(crate) max_iter: usize,
    /// Gradient norm tolerance
    pub(crate) gtol: F,
    /// Objective change tolerance
    pub(crate) ftol: F,
    /// Seed of the multistart design
    pub(crate) seed: u64,
}

impl<F: Float> Default for KrigingValidParams<F> {
    fn default() -> KrigingValidParams<F> {
        KrigingValidParams {
            kernel: Kernel::default(),
            trend: Trend::default(),
            normalize: false,
            optimizer: Optimizer::default(),
            objective: Objective::default(),
            parameters: Parameters::default(),
            max_iter: KRIGING_BFGS_MAX_ITER,
            gtol: F::cast(KRIGING_BFGS_GTOL),
            ftol: F::cast(KRIGING_BFGS_FTOL),
            seed: KRIGING_MULTISTART_SEED,
        }
    }
}

impl<F: Float> KrigingValidParams<F> {
    /// Get correlation kernel
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    /// Get trend
    pub fn trend(&self) -> Trend {
        self.trend
    }

    /// Whether data are rescaled
    pub fn normalize(&self) -> bool {
        self.normalize
    }

    /// Get hyperparameters optimizer
    pub fn optimizer(&self) -> Optimizer {
        self.optimizer
    }

    /// Get model selection criterion
    pub fn objective(&self) -> Objective {
        self.objective
    }

    /// Get user specified hyperparameters
    pub fn parameters(&self) -> &Parameters<F> {
        &self.parameters
    }

    /// Get the max number of iterations of one local optimization
    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    /// Get gradient norm tolerance
    pub fn gtol(&self) -> F {
        self.gtol
    }

    /// Get objective change tolerance
    pub fn ftol(&self) -> F {
        self.ftol
    }

    /// Get the seed of the multistart design
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [kriging algorithm](crate::FittedKriging).
pub struct KrigingParams<F: Float>(KrigingValidParams<F>);

impl<F: Float> KrigingParams<F> {
    /// A constructor for kriging parameters given a covariance kernel
    pub fn new(kernel: Kernel) -> KrigingParams<F> {
        Self(KrigingValidParams {
            kernel,
            ..Default::default()
        })
    }

    /// A constructor for kriging parameters from validated parameters
    pub fn new_from_valid(params: &KrigingValidParams<F>) -> Self {
        Self(params.clone())
    }

    /// Set correlation kernel.
    pub fn kernel(mut self, kernel: Kernel) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Set trend.
    pub fn trend(mut self, trend: Trend) -> Self {
        self.0.trend = trend;
        self
    }

    /// Rescale inputs and outputs onto the unit interval before fitting.
    pub fn normalize(mut self, normalize: bool) -> Self {
        self.0.normalize = normalize;
        self
    }

    /// Set hyperparameters optimizer.
    pub fn optimizer(mut self, optimizer: Optimizer) -> Self {
        self.0.optimizer = optimizer;
        self
    }

    /// Set model selection criterion.
    pub fn objective(mut self, objective: Objective) -> Self {
        self.0.objective = objective;
        self
    }

    /// Set hyperparameters held fixed during fitting.
    pub fn parameters(mut self, parameters: Parameters<F>) -> Self {
        self.0.parameters = parameters;
        self
    }

    /// Set the max number of iterations of one local optimization
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.0.max_iter = max_iter;
        self
    }

    /// Set gradient norm tolerance used as stopping criterion
    pub fn gtol(mut self, gtol: F) -> Self {
        self.0.gtol = gtol;
        self
    }

    /// Set objective change tolerance used as stopping criterion
    pub fn ftol(mut self, ftol: F) -> Self {
        self.0.ftol = ftol;
        self
    }

    /// Set the seed of the multistart design
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = seed;
        self
    }
}

impl<F: Float> From<KrigingValidParams<F>> for KrigingParams<F> {
    fn from(valid: KrigingValidParams<F>) -> Self {
        KrigingParams(valid)
    }
}

impl<F: Float> ParamGuard for KrigingParams<F> {
    type Checked = KrigingValidParams<F>;
    type Error = KrigingError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        self.0.parameters.check()?;
        if let Optimizer::Bfgs { n_start: 0 } = self.0.optimizer {
            return Err(KrigingError::ConfigurationError(
                "Optimizer should have at least one start".to_string(),
            ));
        }
        if self.0.max_iter == 0 {
            return Err(KrigingError::ConfigurationError(
                "`max_iter` should be strictly positive".to_string(),
            ));
        }
        if !(self.0.gtol >= F::zero() && self.0.ftol >= F::zero()) {
            return Err(KrigingError::ConfigurationError(
                "Optimizer tolerances should be positive".to_string(),
            ));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_optimizer_from_str() {
        assert_eq!("BFGS".parse::<Optimizer>().unwrap(), Optimizer::Bfgs { n_start: 1 });
        assert_eq!(
            "BFGS10".parse::<Optimizer>().unwrap(),
            Optimizer::Bfgs { n_start: 10 }
        );
        assert_eq!("none".parse::<Optimizer>().unwrap(), Optimizer::None);
        for bad in ["BFGS0", "BFGSx", "Newton", ""] {
            assert!(matches!(
                bad.parse::<Optimizer>(),
                Err(KrigingError::ConfigurationError(_))
            ));
        }
        assert_eq!(Optimizer::Bfgs { n_start: 5 }.to_string(), "BFGS5");
    }

    #[test]
    fn test_estimation_mask() {
        let params = Parameters::<f64>::default().with_sigma2(2.);
        assert_eq!(
            params.estimation_mask(),
            EstimationMask {
                theta: true,
                sigma2: false,
                beta: true
            }
        );
    }

    #[test]
    fn test_param_guard() {
        let params = KrigingParams::<f64>::new(Kernel::Matern52)
            .parameters(Parameters::default().with_theta(array![0.1, 0.]));
        assert!(matches!(
            params.check_ref(),
            Err(KrigingError::ValidationError(_))
        ));

        let params = KrigingParams::<f64>::new(Kernel::Matern52)
            .parameters(Parameters::default().with_sigma2(-1.));
        assert!(params.check().is_err());

        let params = KrigingParams::<f64>::new(Kernel::Matern52).max_iter(0);
        assert!(params.check().is_err());

        let params = KrigingParams::<f64>::new(Kernel::Matern52).trend(Trend::Linear);
        let checked = params.check().unwrap();
        assert_eq!(checked.trend(), Trend::Linear);
        assert_eq!(checked.kernel(), Kernel::Matern52);
    }

    #[test]
    fn test_default_optimizer_settings() {
        let checked = KrigingParams::<f64>::new(Kernel::AbsoluteExponential).check().unwrap();
        assert_eq!(checked.optimizer(), Optimizer::Bfgs { n_start: 1 });
        assert_eq!(checked.max_iter(), KRIGING_BFGS_MAX_ITER);
        assert_eq!(checked.gtol(), KRIGING_BFGS_GTOL);
        assert_eq!(checked.ftol(), KRIGING_BFGS_FTOL);
        assert_eq!(checked.seed(), KRIGING_MULTISTART_SEED);

        let checked = KrigingParams::<f64>::new(Kernel::AbsoluteExponential)
            .max_iter(1)
            .gtol(0.)
            .ftol(0.)
            .check()
            .unwrap();
        assert_eq!(checked.max_iter(), 1);
        assert_eq!(checked.gtol(), 0.);
    }
}
