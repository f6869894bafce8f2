//! A module for regression models to model the mean term (trend) of the kriging model.
//! In practice small degree (<= 2) polynomial regression models are used,
//! as the kriging model is then fitted using the correlated error term.
//!
//! The following models are implemented:
//! * constant,
//! * linear,
//! * interactive (linear plus pairwise products of coordinates),
//! * quadratic (interactive plus squared coordinates).

use crate::errors::KrigingError;
use linfa::Float;
use ndarray::{Array2, ArrayBase, Axis, Data, Ix2, concatenate};
use paste::paste;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

/// A trait for mean models used in kriging
pub trait RegressionModel<F: Float>: Clone + Copy + Default + fmt::Display + Sync + Send {
    /// Compute regression coefficients defining the mean behaviour of the kriging model
    /// for the given `x` data points specified as (n, nx) matrix.
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F>;

    /// Number of basis functions for `nx`-dimensional inputs
    fn n_basis(&self, nx: usize) -> usize;
}

/// A constant function as mean of the kriging model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct ConstantMean();

impl<F: Float> RegressionModel<F> for ConstantMean {
    /// Zero order polynomial (constant) regression model.
    /// regr(x) = [1, ..., 1].T
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        Array2::<F>::ones((x.nrows(), 1))
    }

    fn n_basis(&self, _nx: usize) -> usize {
        1
    }
}

/// An affine function as mean of the kriging model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct LinearMean();

impl<F: Float> RegressionModel<F> for LinearMean {
    /// First order polynomial (linear) regression model.
    /// regr(x) = [ 1, x_1, ..., x_n ].T
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        concatenate![Axis(1), Array2::ones((x.nrows(), 1)), x.to_owned()]
    }

    fn n_basis(&self, nx: usize) -> usize {
        1 + nx
    }
}

/// An affine function with interaction terms as mean of the kriging model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct InteractiveMean();

impl<F: Float> RegressionModel<F> for InteractiveMean {
    /// regr(x) = [ 1, { x_i, i = 1,...,n }, { x_i * x_j, (i,j) = 1,...,n, j > i } ].T
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        concatenate![
            Axis(1),
            Array2::ones((x.nrows(), 1)),
            x.to_owned(),
            cross_products(x)
        ]
    }

    fn n_basis(&self, nx: usize) -> usize {
        1 + nx + nx * nx.saturating_sub(1) / 2
    }
}

/// A 2-degree polynomial as mean of the kriging model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct QuadraticMean();

impl<F: Float> RegressionModel<F> for QuadraticMean {
    /// Second order polynomial (quadratic) regression model.
    /// regr(x) = [ 1, { x_i }, { x_i * x_j, j > i }, { x_i^2 } ].T
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        concatenate![
            Axis(1),
            Array2::ones((x.nrows(), 1)),
            x.to_owned(),
            cross_products(x),
            x.mapv(|v| v * v)
        ]
    }

    fn n_basis(&self, nx: usize) -> usize {
        1 + 2 * nx + nx * nx.saturating_sub(1) / 2
    }
}

/// Products `x_i * x_j` for `j > i`, ordered by `i` then `j`
fn cross_products<F: Float>(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
    let nx = x.ncols();
    let mut res = Array2::zeros((x.nrows(), nx * nx.saturating_sub(1) / 2));
    let mut c = 0;
    for i in 0..nx {
        for j in (i + 1)..nx {
            res.column_mut(c).assign(&(&x.column(i) * &x.column(j)));
            c += 1;
        }
    }
    res
}

macro_rules! declare_mean_util_impls {
    ($regr:ident) => {
        paste! {
            impl fmt::Display for [<$regr Mean>] {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}Mean", stringify!($regr))
                }
            }

            impl From<[<$regr Mean>]> for String {
                fn from(_item: [<$regr Mean>]) -> Self {
                    [<$regr Mean>]().to_string()
                }
            }

            impl TryFrom<String> for [<$regr Mean>] {
                type Error = &'static str;
                fn try_from(s: String) -> Result<Self, Self::Error> {
                    if s == stringify!([<$regr Mean>]) {
                        Ok(Self::default())
                    } else {
                        Err(concat!("Bad string value for ", stringify!([<$regr Mean>])))
                    }
                }
            }

            impl From<[<$regr Mean>]> for Trend {
                fn from(_item: [<$regr Mean>]) -> Self {
                    Trend::$regr
                }
            }
        }
    };
}

declare_mean_util_impls!(Constant);
declare_mean_util_impls!(Linear);
declare_mean_util_impls!(Interactive);
declare_mean_util_impls!(Quadratic);

/// The trend variant of a kriging model.
///
/// Ordinal values are stable: `Constant = 0`, `Linear = 1`, `Interactive = 2`, `Quadratic = 3`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Trend {
    /// [`ConstantMean`]
    #[default]
    Constant = 0,
    /// [`LinearMean`]
    Linear = 1,
    /// [`InteractiveMean`]
    Interactive = 2,
    /// [`QuadraticMean`]
    Quadratic = 3,
}

impl Trend {
    /// Name of the trend as accepted by [`Trend::from_str`]
    pub fn name(&self) -> &'static str {
        match self {
            Trend::Constant => "constant",
            Trend::Linear => "linear",
            Trend::Interactive => "interactive",
            Trend::Quadratic => "quadratic",
        }
    }
}

impl<F: Float> RegressionModel<F> for Trend {
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        match self {
            Trend::Constant => ConstantMean().value(x),
            Trend::Linear => LinearMean().value(x),
            Trend::Interactive => InteractiveMean().value(x),
            Trend::Quadratic => QuadraticMean().value(x),
        }
    }

    fn n_basis(&self, nx: usize) -> usize {
        match self {
            Trend::Constant => RegressionModel::<F>::n_basis(&ConstantMean(), nx),
            Trend::Linear => RegressionModel::<F>::n_basis(&LinearMean(), nx),
            Trend::Interactive => RegressionModel::<F>::n_basis(&InteractiveMean(), nx),
            Trend::Quadratic => RegressionModel::<F>::n_basis(&QuadraticMean(), nx),
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Trend {
    type Err = KrigingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "constant" | "ConstantMean" => Ok(Trend::Constant),
            "linear" | "LinearMean" => Ok(Trend::Linear),
            "interactive" | "InteractiveMean" => Ok(Trend::Interactive),
            "quadratic" | "QuadraticMean" => Ok(Trend::Quadratic),
            _ => Err(KrigingError::ConfigurationError(format!(
                "Unknown trend '{s}', expected one of constant, linear, interactive, quadratic"
            ))),
        }
    }
}

impl TryFrom<u8> for Trend {
    type Error = KrigingError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Trend::Constant),
            1 => Ok(Trend::Linear),
            2 => Ok(Trend::Interactive),
            3 => Ok(Trend::Quadratic),
            _ => Err(KrigingError::ConfigurationError(format!(
                "Unknown trend ordinal {v}, expected 0..=3"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_constant() {
        let a = array![[1., 2.], [3., 4.], [5., 6.]];
        assert_eq!(ConstantMean().value(&a), array![[1.], [1.], [1.]]);
    }

    #[test]
    fn test_linear() {
        let a = array![[1., 2.], [3., 4.]];
        assert_eq!(
            LinearMean().value(&a),
            array![[1., 1., 2.], [1., 3., 4.]]
        );
    }

    #[test]
    fn test_interactive() {
        let a = array![[1., 2., 3.], [3., 4., 5.]];
        let actual = InteractiveMean().value(&a);
        let expected = array![
            [1.0, 1.0, 2.0, 3.0, 2.0, 3.0, 6.0],
            [1.0, 3.0, 4.0, 5.0, 12.0, 15.0, 20.0]
        ];
        assert_abs_diff_eq!(expected, actual);
    }

    #[test]
    fn test_quadratic() {
        let a = array![[1., 2., 3.], [3., 4., 5.]];
        let actual = QuadraticMean().value(&a);
        let expected = array![
            [1.0, 1.0, 2.0, 3.0, 2.0, 3.0, 6.0, 1.0, 4.0, 9.0],
            [1.0, 3.0, 4.0, 5.0, 12.0, 15.0, 20.0, 9.0, 16.0, 25.0]
        ];
        assert_abs_diff_eq!(expected, actual);
    }

    #[test]
    fn test_quadratic_1d() {
        let a = array![[0.], [7.], [25.]];
        let actual = QuadraticMean().value(&a);
        let expected = array![[1., 0., 0.], [1., 7., 49.], [1., 25., 625.]];
        assert_abs_diff_eq!(expected, actual);
    }

    #[test]
    fn test_basis_width() {
        let x = Array2::<f64>::ones((4, 3));
        for trend in [
            Trend::Constant,
            Trend::Linear,
            Trend::Interactive,
            Trend::Quadratic,
        ] {
            let p = RegressionModel::<f64>::n_basis(&trend, 3);
            assert_eq!(trend.value(&x).dim(), (4, p));
        }
        assert_eq!(RegressionModel::<f64>::n_basis(&Trend::Quadratic, 3), 10);
        assert_eq!(RegressionModel::<f64>::n_basis(&Trend::Interactive, 1), 2);
    }

    #[test]
    fn test_trend_ordinals() {
        for v in 0u8..=3 {
            let trend = Trend::try_from(v).unwrap();
            assert_eq!(trend as u8, v);
            assert_eq!(trend.to_string().parse::<Trend>().unwrap(), trend);
        }
        assert!(Trend::try_from(4).is_err());
        assert!("cubic".parse::<Trend>().is_err());
        assert_eq!(Trend::from(QuadraticMean()), Trend::Quadratic);
    }

    #[test]
    fn test_mean_names() {
        assert_eq!(InteractiveMean().to_string(), "InteractiveMean");
        assert_eq!(
            ConstantMean::try_from("ConstantMean".to_string()),
            Ok(ConstantMean())
        );
    }
}
