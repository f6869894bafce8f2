use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, s};
use ndarray_stats::QuantileExt;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// A structure to store (n, nx) matrix data together with the affine transform
/// `(v - offset) / scale` which was applied column-wise to get it.
///
/// When normalization is requested, each column is mapped onto the unit interval
/// (offset is the column minimum, scale its range), otherwise the transform is the identity.
#[derive(Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub(crate) struct NormalizedData<F: Float> {
    /// transformed data
    pub data: Array2<F>,
    /// column offsets
    pub offset: Array1<F>,
    /// column scales (never zero)
    pub scale: Array1<F>,
}

impl<F: Float> Clone for NormalizedData<F> {
    fn clone(&self) -> NormalizedData<F> {
        NormalizedData {
            data: self.data.to_owned(),
            offset: self.offset.to_owned(),
            scale: self.scale.to_owned(),
        }
    }
}

impl<F: Float> NormalizedData<F> {
    /// Rescale `x` columns onto the unit interval
    pub fn new(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> NormalizedData<F> {
        let (offset, scale) = unit_scaling(x);
        let data = (x - &offset) / &scale;
        NormalizedData {
            data,
            offset,
            scale,
        }
    }

    /// Keep `x` as is
    pub fn identity(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> NormalizedData<F> {
        NormalizedData {
            data: x.to_owned(),
            offset: Array1::zeros(x.ncols()),
            scale: Array1::ones(x.ncols()),
        }
    }

    /// Build either a unit-interval rescaling or an identity transform
    pub fn with_normalization(
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        normalize: bool,
    ) -> NormalizedData<F> {
        if normalize {
            Self::new(x)
        } else {
            Self::identity(x)
        }
    }

    /// Apply the recorded transform to new points
    pub fn apply(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        (x - &self.offset) / &self.scale
    }

    /// Same transform, other data (used when observations are appended)
    pub fn reapply(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> NormalizedData<F> {
        NormalizedData {
            data: self.apply(x),
            offset: self.offset.to_owned(),
            scale: self.scale.to_owned(),
        }
    }
}

/// Column minimum and range of `x`, a degenerate range being replaced by one.
fn unit_scaling<F: Float>(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> (Array1<F>, Array1<F>) {
    let lower = x.fold_axis(Axis(0), F::infinity(), |m, v| m.min(*v));
    let upper = x.fold_axis(Axis(0), F::neg_infinity(), |m, v| m.max(*v));
    let mut range = &upper - &lower;
    range.mapv_inplace(|v| if v > F::zero() { v } else { F::one() });
    (lower, range)
}

/// Column spans of `x` (max - min), a degenerate span being replaced by one.
pub(crate) fn spans<F: Float>(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
    unit_scaling(x).1
}

/// A structure to retain absolute differences computation used to compute covariance matrix
#[derive(Debug)]
pub struct DiffMatrix<F: Float> {
    /// Differences as (n_obs * (n_obs-1))/2, nx) array
    pub d: Array2<F>,
    /// Indices of the differences in the original data array
    pub d_indices: Array2<usize>,
    /// Number of observations
    pub n_obs: usize,
}

impl<F: Float> DiffMatrix<F> {
    /// Compute differences given points given as an array (n_obs, nx)
    pub fn new(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> DiffMatrix<F> {
        let (d, d_indices) = Self::_cross_diff(x);
        let n_obs = x.nrows();

        DiffMatrix {
            d,
            d_indices,
            n_obs,
        }
    }

    fn _cross_diff(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> (Array2<F>, Array2<usize>) {
        let n_obs = x.nrows();
        let nx = x.ncols();
        let n_non_zero_cross_dist = n_obs * n_obs.saturating_sub(1) / 2;
        let mut indices = Array2::<usize>::zeros((n_non_zero_cross_dist, 2));
        let mut d = Array2::zeros((n_non_zero_cross_dist, nx));
        let mut idx = 0;
        for k in 0..n_obs.saturating_sub(1) {
            let idx0 = idx;
            let offset = n_obs - k - 1;
            idx = idx0 + offset;

            for i in (k + 1)..n_obs {
                let r = idx0 + i - k - 1;
                indices[[r, 0]] = k;
                indices[[r, 1]] = i;
            }

            let diff = &x.slice(s![k + 1..n_obs, ..]) - &x.slice(s![k, ..]);
            d.slice_mut(s![idx0..idx, ..]).assign(&diff);
        }
        d = d.mapv(|v| v.abs());

        (d, indices)
    }

    /// Whether two training points coincide
    pub fn has_duplicates(&self) -> bool {
        let sums = self.d.sum_axis(Axis(1));
        matches!(sums.min(), Ok(m) if *m == F::zero())
    }

    /// Scatter pairwise `values` (one per row of `d`) into a symmetric (n_obs, n_obs) matrix
    /// with `diag` on the diagonal.
    pub fn assemble(&self, values: &ArrayBase<impl Data<Elem = F>, Ix1>, diag: F) -> Array2<F> {
        let mut mx = Array2::<F>::eye(self.n_obs).mapv(|v| v * diag);
        for (ij, v) in self.d_indices.outer_iter().zip(values.iter()) {
            mx[[ij[0], ij[1]]] = *v;
            mx[[ij[1], ij[0]]] = *v;
        }
        mx
    }
}

/// Computes differences between x and each element of y
/// resulting in a 2d array of shape (nrows(y), ncols(x));
/// *Panics* if x and y have not the same number of components
pub fn differences<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix1>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Array2<F> {
    assert!(x.len() == y.ncols());
    let mut d = y.to_owned();
    for mut row in d.rows_mut() {
        row.zip_mut_with(x, |yi, xi| *yi = *xi - *yi);
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_differences() {
        let x = array![-0.9486833];
        let y = array![
            [-1.26491106],
            [-0.63245553],
            [0.],
            [0.63245553],
            [1.26491106]
        ];
        assert_abs_diff_eq!(
            &array![
                [0.31622777],
                [-0.31622777],
                [-0.9486833],
                [-1.58113883],
                [-2.21359436],
            ],
            &differences(&x, &y),
            epsilon = 1e-6
        )
    }

    #[test]
    fn test_unit_interval_normalization() {
        let x = array![[1., 2.], [3., 2.], [2., 2.]];
        let xnorm = NormalizedData::new(&x);
        assert_eq!(xnorm.data.ncols(), 2);
        assert_eq!(array![1., 2.], xnorm.offset);
        // constant column keeps a unit scale
        assert_eq!(array![2., 1.], xnorm.scale);
        assert_abs_diff_eq!(array![[0., 0.], [1., 0.], [0.5, 0.]], xnorm.data);

        let xnew = array![[5., 4.]];
        assert_abs_diff_eq!(array![[2., 2.]], xnorm.apply(&xnew));
    }

    #[test]
    fn test_identity_normalization() {
        let x = array![[1., 2.], [3., 4.]];
        let xnorm = NormalizedData::with_normalization(&x, false);
        assert_eq!(x, xnorm.data);
        assert_eq!(x, xnorm.apply(&x));
    }

    #[test]
    fn test_diff_matrix() {
        let xt = array![[0.5], [1.2], [2.0], [3.0], [4.0]];
        let expected = (
            array![
                [0.7],
                [1.5],
                [2.5],
                [3.5],
                [0.8],
                [1.8],
                [2.8],
                [1.],
                [2.],
                [1.]
            ],
            array![
                [0, 1],
                [0, 2],
                [0, 3],
                [0, 4],
                [1, 2],
                [1, 3],
                [1, 4],
                [2, 3],
                [2, 4],
                [3, 4]
            ],
        );
        let dm = DiffMatrix::new(&xt);
        assert_abs_diff_eq!(expected.0, dm.d, epsilon = 1e-12);
        assert_eq!(expected.1, dm.d_indices);
    }

    #[test]
    fn test_diff_matrix_single_point() {
        let dm = DiffMatrix::new(&array![[0.5, 1.]]);
        assert_eq!(dm.d.nrows(), 0);
        assert_eq!(dm.assemble(&Array1::<f64>::zeros(0), 1.), array![[1.]]);
    }

    #[test]
    fn test_has_duplicates() {
        assert!(!DiffMatrix::new(&array![[0., 1.], [1., 1.], [0., 2.]]).has_duplicates());
        assert!(DiffMatrix::new(&array![[0., 1.], [1., 1.], [0., 1.]]).has_duplicates());
        assert!(!DiffMatrix::new(&array![[0., 1.]]).has_duplicates());
    }

    #[test]
    fn test_assemble() {
        let dm = DiffMatrix::new(&array![[0.], [1.], [3.]]);
        let mx = dm.assemble(&array![0.1, 0.2, 0.3], 1.);
        assert_eq!(
            mx,
            array![[1., 0.1, 0.2], [0.1, 1., 0.3], [0.2, 0.3, 1.]]
        );
    }
}
