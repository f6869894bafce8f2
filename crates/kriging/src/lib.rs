//! This library implements [Kriging](https://en.wikipedia.org/wiki/Kriging) models, also known as
//! [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) regression: a parametric
//! trend combined with a stationary correlation structure, fitted on scalar observations,
//! giving predictions with their uncertainty, conditional simulations and cheap updates
//! when new observations come in.
//!
//! Correlation length-scales are estimated by maximizing one of three criteria
//! (profiled log-likelihood, leave-one-out error, log marginal posterior) with a multistart
//! BFGS using analytic gradients. Trend coefficients and process variance are profiled out
//! in closed form unless given.
//!
//! The model lifecycle is handled by [Kriging] (unfit, then fitted with [Kriging::fit]).
//! The fitted model itself is a [FittedKriging], which can also be obtained through the
//! `linfa` [`Fit`](linfa::traits::Fit) trait from [KrigingParams].
//!
//! ```no_run
//! use kriging::{Kriging, Parameters, Trend};
//! use ndarray::{Array1, Array2};
//!
//! let xt = Array2::from_shape_vec((5, 1), vec![0., 1., 2., 3., 4.]).unwrap();
//! let yt = xt.column(0).mapv(|x: f64| x.sin());
//!
//! let mut model = Kriging::new("gauss").unwrap();
//! model
//!     .fit(&yt, &xt, Trend::Constant, true, "BFGS5", "LL", Parameters::default())
//!     .unwrap();
//! let xtest = Array2::from_shape_vec((2, 1), vec![0.5, 2.5]).unwrap();
//! let prediction = model.predict(&xtest, true).unwrap();
//! let draws: Array2<f64> = model.simulate(&xtest, 100, 42).unwrap();
//! let _: Array1<f64> = prediction.variance;
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
pub mod correlation_models;
mod errors;
pub mod linalg;
pub mod mean_models;
mod model;
mod objective;
mod optimization;
mod parameters;
mod utils;

pub use algorithm::*;
pub use correlation_models::Kernel;
pub use errors::*;
pub use mean_models::Trend;
pub use model::*;
pub use objective::Objective;
pub use optimization::OptimReport;
pub use parameters::*;
pub use utils::DiffMatrix;
