//! A module for stationary correlation models used to model the error term of the kriging model.
//!
//! All models are separable: the correlation between `x` and `x'` is the product over input
//! components of a 1D correlation function of the scaled distance `h_k = |x_k - x'_k| / theta_k`
//! where `theta` is the vector of length-scales.
//!
//! The following correlation models are implemented:
//! * squared exponential (`"gauss"`),
//! * absolute exponential (`"exp"`),
//! * matern 3/2 (`"matern3_2"`),
//! * matern 5/2 (`"matern5_2"`).

use crate::errors::KrigingError;
use crate::utils::differences;
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2, Zip};
use paste::paste;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

/// A trait for using a correlation model in kriging
pub trait CorrelationModel<F: Float>: Clone + Copy + Default + fmt::Display + Sync + Send {
    /// 1D correlation function at scaled distance `h >= 0`
    fn corr_1d(&self, h: F) -> F;

    /// Logarithmic derivative `k'(h)/k(h)` of the 1D correlation function
    fn dlog_corr_1d(&self, h: F) -> F;

    /// Compute correlation values r(x, x') given distances `d` between x and x',
    /// and `theta` length-scales, where:
    /// `theta`   : hyperparameters (nx,)
    /// `d`     : distances (n, nx)
    /// Returns (n,) correlation values
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array1<F> {
        d.outer_iter()
            .map(|dist| {
                dist.iter()
                    .zip(theta.iter())
                    .fold(F::one(), |acc, (dk, tk)| acc * self.corr_1d(dk.abs() / *tk))
            })
            .collect()
    }

    /// Compute derivatives of correlation values r(x, x') with respect to each `theta` component
    /// given distances `d`.
    /// Returns (n, nx) array, column k being dr/dtheta_k
    fn theta_gradient(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array2<F> {
        let r = self.value(d, theta);
        let mut grad = Array2::zeros(d.raw_dim());
        Zip::from(grad.rows_mut())
            .and(d.rows())
            .and(&r)
            .for_each(|mut g, dist, r| {
                Zip::from(&mut g)
                    .and(&dist)
                    .and(theta)
                    .for_each(|gk, dk, tk| {
                        let h = dk.abs() / *tk;
                        // dr/dtheta_k = r * dlog(k)/dh * dh/dtheta_k with dh/dtheta_k = -h/theta_k
                        *gk = -*r * self.dlog_corr_1d(h) * h / *tk;
                    });
            });
        grad
    }

    /// Covariance matrix `sigma2 * r(x1_i, x2_j)` between (n1, nx) `x1` and (n2, nx) `x2` points
    fn covariance(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
        sigma2: F,
    ) -> Array2<F> {
        let mut cov = Array2::zeros((x1.nrows(), x2.nrows()));
        Zip::from(cov.rows_mut())
            .and(x1.rows())
            .for_each(|mut row, x| {
                let d = differences(&x, x2);
                row.assign(&self.value(&d, theta).mapv(|v| v * sigma2));
            });
        cov
    }

    /// Derivatives of [`CorrelationModel::covariance`] with respect to each `theta` component,
    /// one (n1, n2) matrix per component
    fn covariance_gradient(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
        sigma2: F,
    ) -> Vec<Array2<F>> {
        let mut grads = vec![Array2::zeros((x1.nrows(), x2.nrows())); theta.len()];
        for (i, x) in x1.rows().into_iter().enumerate() {
            let d = differences(&x, x2);
            let dr = self.theta_gradient(&d, theta);
            for (k, grad) in grads.iter_mut().enumerate() {
                grad.row_mut(i).assign(&dr.column(k).mapv(|v| v * sigma2));
            }
        }
        grads
    }
}

/// Squared exponential correlation models
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct SquaredExponentialCorr();

impl<F: Float> CorrelationModel<F> for SquaredExponentialCorr {
    /// exp(-h^2 / 2)
    fn corr_1d(&self, h: F) -> F {
        F::exp(F::cast(-0.5) * h * h)
    }

    fn dlog_corr_1d(&self, h: F) -> F {
        -h
    }
}

/// Absolute exponential correlation models
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct AbsoluteExponentialCorr();

impl<F: Float> CorrelationModel<F> for AbsoluteExponentialCorr {
    /// exp(-h)
    fn corr_1d(&self, h: F) -> F {
        F::exp(-h)
    }

    fn dlog_corr_1d(&self, _h: F) -> F {
        -F::one()
    }
}

/// Matern 3/2 correlation model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct Matern32Corr();

impl<F: Float> CorrelationModel<F> for Matern32Corr {
    /// (1 + sqrt(3).h) exp(-sqrt(3).h)
    fn corr_1d(&self, h: F) -> F {
        let a = F::cast(3.).sqrt() * h;
        (F::one() + a) * F::exp(-a)
    }

    fn dlog_corr_1d(&self, h: F) -> F {
        let a = F::cast(3.).sqrt() * h;
        -F::cast(3.) * h / (F::one() + a)
    }
}

/// Matern 5/2 correlation model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct Matern52Corr();

impl<F: Float> CorrelationModel<F> for Matern52Corr {
    /// (1 + sqrt(5).h + 5/3.h^2) exp(-sqrt(5).h)
    fn corr_1d(&self, h: F) -> F {
        let a = F::cast(5.).sqrt() * h;
        (F::one() + a + a * a / F::cast(3.)) * F::exp(-a)
    }

    fn dlog_corr_1d(&self, h: F) -> F {
        let a = F::cast(5.).sqrt() * h;
        -F::cast(5. / 3.) * h * (F::one() + a) / (F::one() + a + a * a / F::cast(3.))
    }
}

macro_rules! declare_corr_util_impls {
    ($corr:ident) => {
        paste! {
            impl fmt::Display for [<$corr Corr>] {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}", stringify!($corr))
                }
            }

            impl From<[<$corr Corr>]> for String {
                fn from(_item: [<$corr Corr>]) -> Self {
                    stringify!($corr).to_string()
                }
            }

            impl TryFrom<String> for [<$corr Corr>] {
                type Error = &'static str;
                fn try_from(s: String) -> Result<Self, Self::Error> {
                    if s == stringify!($corr) {
                        Ok(Self::default())
                    } else {
                        Err(concat!("Bad string value for ", stringify!($corr), "Corr, should be \'", stringify!($corr), "\'"))
                    }
                }
            }
        }
    };
}

declare_corr_util_impls!(SquaredExponential);
declare_corr_util_impls!(AbsoluteExponential);
declare_corr_util_impls!(Matern32);
declare_corr_util_impls!(Matern52);

/// The covariance kernel of a kriging model, selected by name
/// and dispatching to the corresponding correlation model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Kernel {
    /// [`SquaredExponentialCorr`], named `"gauss"`
    #[default]
    SquaredExponential,
    /// [`AbsoluteExponentialCorr`], named `"exp"`
    AbsoluteExponential,
    /// [`Matern32Corr`], named `"matern3_2"`
    Matern32,
    /// [`Matern52Corr`], named `"matern5_2"`
    Matern52,
}

impl Kernel {
    /// Short name of the kernel as accepted by [`Kernel::from_str`]
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::SquaredExponential => "gauss",
            Kernel::AbsoluteExponential => "exp",
            Kernel::Matern32 => "matern3_2",
            Kernel::Matern52 => "matern5_2",
        }
    }
}

impl<F: Float> CorrelationModel<F> for Kernel {
    fn corr_1d(&self, h: F) -> F {
        match self {
            Kernel::SquaredExponential => SquaredExponentialCorr().corr_1d(h),
            Kernel::AbsoluteExponential => AbsoluteExponentialCorr().corr_1d(h),
            Kernel::Matern32 => Matern32Corr().corr_1d(h),
            Kernel::Matern52 => Matern52Corr().corr_1d(h),
        }
    }

    fn dlog_corr_1d(&self, h: F) -> F {
        match self {
            Kernel::SquaredExponential => SquaredExponentialCorr().dlog_corr_1d(h),
            Kernel::AbsoluteExponential => AbsoluteExponentialCorr().dlog_corr_1d(h),
            Kernel::Matern32 => Matern32Corr().dlog_corr_1d(h),
            Kernel::Matern52 => Matern52Corr().dlog_corr_1d(h),
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Kernel {
    type Err = KrigingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauss" | "SquaredExponential" => Ok(Kernel::SquaredExponential),
            "exp" | "AbsoluteExponential" => Ok(Kernel::AbsoluteExponential),
            "matern3_2" | "Matern32" => Ok(Kernel::Matern32),
            "matern5_2" | "Matern52" => Ok(Kernel::Matern52),
            _ => Err(KrigingError::ConfigurationError(format!(
                "Unknown kernel '{s}', expected one of gauss, exp, matern3_2, matern5_2"
            ))),
        }
    }
}

impl From<SquaredExponentialCorr> for Kernel {
    fn from(_: SquaredExponentialCorr) -> Self {
        Kernel::SquaredExponential
    }
}

impl From<AbsoluteExponentialCorr> for Kernel {
    fn from(_: AbsoluteExponentialCorr) -> Self {
        Kernel::AbsoluteExponential
    }
}

impl From<Matern32Corr> for Kernel {
    fn from(_: Matern32Corr) -> Self {
        Kernel::Matern32
    }
}

impl From<Matern52Corr> for Kernel {
    fn from(_: Matern52Corr) -> Self {
        Kernel::Matern52
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::DiffMatrix;
    use approx::assert_abs_diff_eq;
    use finitediff::FiniteDiff;
    use ndarray::{arr1, array};

    #[test]
    fn test_squared_exponential() {
        let xt = array![[4.5], [1.2], [2.0], [3.0], [4.0]];
        let dm = DiffMatrix::new(&xt);
        // exp(-0.1 * d^2)
        let res = SquaredExponentialCorr::default().value(&dm.d, &arr1(&[f64::sqrt(5.)]));
        let expected = array![
            0.336552878364737,
            0.5352614285189903,
            0.7985162187593771,
            0.9753099120283326,
            0.9380049995307295,
            0.7232502423798424,
            0.4565760496233148,
            0.9048374180359595,
            0.6703200460356393,
            0.9048374180359595
        ];
        assert_abs_diff_eq!(res, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_matern_unit_distance() {
        let d = array![[1.]];
        let theta = array![1.];
        assert_abs_diff_eq!(
            Matern32Corr().value(&d, &theta)[0],
            0.4833577245965077,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            Matern52Corr().value(&d, &theta)[0],
            0.5239941088318203,
            epsilon = 1e-12
        );
    }

    macro_rules! test_correlation_2d {
        ($corr:ident, $expected:expr) => {
            paste! {
                #[test]
                fn [<test_ $corr:snake _2d>]() {
                    let xt = array![[0., 1.], [2., 3.], [4., 5.]];
                    let dm = DiffMatrix::new(&xt);
                    let res = [<$corr Corr>]::default().value(&dm.d, &arr1(&[2., 4.]));
                    assert_abs_diff_eq!(res, arr1(&$expected), epsilon = 1e-12);
                }
            }
        };
    }

    test_correlation_2d!(
        SquaredExponential,
        [0.5352614285189903, 0.0820849986238988, 0.5352614285189903]
    );
    test_correlation_2d!(
        AbsoluteExponential,
        [0.22313016014842982, 0.049787068367863944, 0.22313016014842982]
    );
    test_correlation_2d!(
        Matern32,
        [0.37938151048076446, 0.06754022748375502, 0.37938151048076446]
    );
    test_correlation_2d!(
        Matern52,
        [0.43420726891563766, 0.07265713795790546, 0.43420726891563766]
    );

    macro_rules! test_theta_gradient {
        ($kernel:ident) => {
            paste! {
                #[test]
                fn [<test_ $kernel:snake _theta_gradient>]() {
                    let kernel = Kernel::$kernel;
                    let d = array![[0.3, 1.2], [0.7, 0.1], [2.5, 0.4]];
                    let theta = array![0.8, 1.7];
                    let grad = kernel.theta_gradient(&d, &theta);
                    for (i, dist) in d.outer_iter().enumerate() {
                        let f = |t: &Vec<f64>| -> f64 {
                            kernel.value(&dist.to_owned().insert_axis(ndarray::Axis(0)), &arr1(t))[0]
                        };
                        let fd = theta.to_vec().central_diff(&f);
                        assert_abs_diff_eq!(grad.row(i), arr1(&fd), epsilon = 1e-6);
                    }
                }
            }
        };
    }

    test_theta_gradient!(SquaredExponential);
    test_theta_gradient!(AbsoluteExponential);
    test_theta_gradient!(Matern32);
    test_theta_gradient!(Matern52);

    #[test]
    fn test_covariance() {
        let x1 = array![[0., 1.], [2., 3.]];
        let x2 = array![[0., 1.], [2., 3.], [4., 5.]];
        let theta = array![2., 4.];
        let cov = Kernel::Matern32.covariance(&x1, &x2, &theta, 2.);
        assert_eq!(cov.dim(), (2, 3));
        assert_abs_diff_eq!(cov[[0, 0]], 2., epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[1, 1]], 2., epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[0, 1]], 2. * 0.37938151048076446, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[0, 2]], 2. * 0.06754022748375502, epsilon = 1e-12);

        let grads = Kernel::Matern32.covariance_gradient(&x1, &x2, &theta, 2.);
        assert_eq!(grads.len(), 2);
        // no sensitivity on the diagonal
        assert_abs_diff_eq!(grads[0][[0, 0]], 0., epsilon = 1e-12);
        let f = |t: &Vec<f64>| -> f64 { Kernel::Matern32.covariance(&x1, &x2, &arr1(t), 2.)[[1, 2]] };
        let fd = theta.to_vec().central_diff(&f);
        assert_abs_diff_eq!(grads[0][[1, 2]], fd[0], epsilon = 1e-6);
        assert_abs_diff_eq!(grads[1][[1, 2]], fd[1], epsilon = 1e-6);
    }

    #[test]
    fn test_kernel_from_str() {
        assert_eq!("gauss".parse::<Kernel>().unwrap(), Kernel::SquaredExponential);
        assert_eq!("exp".parse::<Kernel>().unwrap(), Kernel::AbsoluteExponential);
        assert_eq!("matern3_2".parse::<Kernel>().unwrap(), Kernel::Matern32);
        assert_eq!("Matern52".parse::<Kernel>().unwrap(), Kernel::Matern52);
        assert!(matches!(
            "rbf".parse::<Kernel>(),
            Err(KrigingError::ConfigurationError(_))
        ));
        for kernel in [
            Kernel::SquaredExponential,
            Kernel::AbsoluteExponential,
            Kernel::Matern32,
            Kernel::Matern52,
        ] {
            assert_eq!(kernel.to_string().parse::<Kernel>().unwrap(), kernel);
        }
    }

    #[test]
    fn test_corr_names() {
        assert_eq!(Matern52Corr().to_string(), "Matern52");
        assert_eq!(String::from(AbsoluteExponentialCorr()), "AbsoluteExponential");
        assert!(SquaredExponentialCorr::try_from("Matern32".to_string()).is_err());
        assert_eq!(Kernel::from(Matern32Corr()), Kernel::Matern32);
    }
}
