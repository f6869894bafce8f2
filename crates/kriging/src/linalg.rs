//! Dense linear algebra primitives used by kriging computations.
//!
//! Factorizations and solves are delegated to `linfa-linalg`. On top of it, this module adds
//! a Cholesky factorization which recovers from loss of positive-definiteness by adding
//! an increasing jitter on the diagonal.

use crate::errors::{KrigingError, Result};
use linfa::Float;
use linfa_linalg::{cholesky::*, qr::*, triangular::*};
use log::warn;
use ndarray::{Array2, ArrayBase, Data, Ix2};

/// Maximum number of factorization attempts with growing jitter
pub const JITTER_MAX_ATTEMPTS: usize = 30;
/// Initial jitter relative to the mean of the matrix diagonal
pub const JITTER_INITIAL_FACTOR: f64 = 1e-10;

/// Lower triangular Cholesky factor `L` of the symmetric positive definite matrix `m`
/// such that `m = L.Lt`.
///
/// When `m` is numerically not positive definite, the factorization is retried on `m + eps.I`
/// with `eps` doubled at each attempt. Fails with a [`KrigingError::NumericalError`] when
/// [`JITTER_MAX_ATTEMPTS`] are exhausted.
pub fn cholesky<F: Float>(m: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
    cholesky_jittered(m).map(|(l, _)| l)
}

/// Same as [`cholesky`] but also returns the jitter added to the diagonal (zero if none).
pub fn cholesky_jittered<F: Float>(
    m: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<(Array2<F>, F)> {
    check_square(m)?;
    if let Some(l) = try_cholesky(m) {
        return Ok((l, F::zero()));
    }

    let n = m.nrows();
    let mean_diag = m.diag().sum() / F::cast(n.max(1));
    let mut jitter = if mean_diag > F::zero() && mean_diag.is_finite() {
        F::cast(JITTER_INITIAL_FACTOR) * mean_diag
    } else {
        F::cast(JITTER_INITIAL_FACTOR)
    };
    let mut jittered = m.to_owned();
    for _ in 1..JITTER_MAX_ATTEMPTS {
        jittered.assign(m);
        jittered.diag_mut().mapv_inplace(|v| v + jitter);
        if let Some(l) = try_cholesky(&jittered) {
            warn!("Cholesky factorization succeeded with jitter {jitter:e} added to the diagonal");
            return Ok((l, jitter));
        }
        jitter = jitter + jitter;
    }
    Err(KrigingError::NumericalError(format!(
        "Cholesky factorization failed after {JITTER_MAX_ATTEMPTS} attempts (last jitter {jitter:e})"
    )))
}

/// A successful factorization has a finite and strictly positive diagonal
fn try_cholesky<F: Float>(m: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Option<Array2<F>> {
    match m.cholesky() {
        Ok(l) if l.diag().iter().all(|v| v.is_finite() && *v > F::zero()) => Some(l),
        _ => None,
    }
}

/// Solve `l.x = b` where `l` is lower triangular (forward substitution)
pub fn solve_lower<F: Float>(
    l: &ArrayBase<impl Data<Elem = F>, Ix2>,
    b: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<Array2<F>> {
    Ok(l.solve_triangular(b, UPLO::Lower)?)
}

/// Solve `u.x = b` where `u` is upper triangular (backward substitution)
pub fn solve_upper<F: Float>(
    u: &ArrayBase<impl Data<Elem = F>, Ix2>,
    b: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<Array2<F>> {
    Ok(u.solve_triangular(b, UPLO::Upper)?)
}

/// Solve `lt.x = b` where `l` is lower triangular, without building the transpose
pub fn solve_lower_transpose<F: Float>(
    l: &ArrayBase<impl Data<Elem = F>, Ix2>,
    b: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<Array2<F>> {
    Ok(l.t().solve_triangular_into(b.to_owned(), UPLO::Upper)?)
}

/// Solve `m.x = b` given the Cholesky factor `l` of `m`
pub fn cho_solve<F: Float>(
    l: &ArrayBase<impl Data<Elem = F>, Ix2>,
    b: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<Array2<F>> {
    let z = solve_lower(l, b)?;
    Ok(l.t().solve_triangular_into(z, UPLO::Upper)?)
}

/// Thin QR factorization `m = q.r` of a (n, p) matrix with n >= p
pub fn qr<F: Float>(m: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<(Array2<F>, Array2<F>)> {
    if m.nrows() < m.ncols() {
        return Err(KrigingError::ValidationError(format!(
            "QR factorization requires at least as many rows as columns, got ({}, {})",
            m.nrows(),
            m.ncols()
        )));
    }
    Ok(m.qr()?.into_decomp())
}

/// Inverse of a symmetric positive definite matrix given its Cholesky factor `l`
pub fn cholesky_inverse<F: Float>(l: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
    let inv = cho_solve(l, &Array2::<F>::eye(l.nrows()))?;
    // solves leave round-off asymmetry
    let sym = (&inv + &inv.t()).mapv(|v| v * F::cast(0.5));
    Ok(sym)
}

/// Inverse of a symmetric positive definite matrix (jitter escalation applies)
pub fn invert_spd<F: Float>(m: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
    let l = cholesky(m)?;
    cholesky_inverse(&l)
}

/// `log|m|` given the Cholesky factor `l` of `m`
pub fn log_det_cholesky<F: Float>(l: &ArrayBase<impl Data<Elem = F>, Ix2>) -> F {
    l.diag().fold(F::zero(), |acc, v| acc + v.ln()) * F::cast(2.)
}

fn check_square<F: Float>(m: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
    if m.nrows() != m.ncols() {
        return Err(KrigingError::ValidationError(format!(
            "Square matrix expected, got ({}, {})",
            m.nrows(),
            m.ncols()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn spd() -> Array2<f64> {
        array![[4., 12., -16.], [12., 37., -43.], [-16., -43., 98.]]
    }

    #[test]
    fn test_cholesky() {
        let l = cholesky(&spd()).expect("factorization");
        assert_abs_diff_eq!(l, array![[2., 0., 0.], [6., 1., 0.], [-8., 5., 3.]], epsilon = 1e-12);
        assert_abs_diff_eq!(l.dot(&l.t()), spd(), epsilon = 1e-10);
    }

    #[test]
    fn test_cholesky_jitter_on_singular_matrix() {
        let m = Array2::<f64>::ones((3, 3));
        let (l, jitter) = cholesky_jittered(&m).expect("jittered factorization");
        assert!(jitter > 0.);
        let mut mj = m.to_owned();
        mj.diag_mut().mapv_inplace(|v| v + jitter);
        assert_abs_diff_eq!(l.dot(&l.t()), mj, epsilon = 1e-10);
    }

    #[test]
    fn test_cholesky_fails_on_negative_definite() {
        let m = Array2::<f64>::eye(3).mapv(|v| -v);
        assert!(matches!(
            cholesky(&m),
            Err(KrigingError::NumericalError(_))
        ));
    }

    #[test]
    fn test_cholesky_non_square() {
        let m = Array2::<f64>::ones((3, 2));
        assert!(matches!(
            cholesky(&m),
            Err(KrigingError::ValidationError(_))
        ));
    }

    #[test]
    fn test_solves() {
        let m = spd();
        let l = cholesky(&m).unwrap();
        let b = array![[1.], [2.], [3.]];

        let x = solve_lower(&l, &b).unwrap();
        assert_abs_diff_eq!(l.dot(&x), b, epsilon = 1e-10);
        let x = solve_upper(&l.t(), &b).unwrap();
        assert_abs_diff_eq!(l.t().dot(&x), b, epsilon = 1e-10);
        let x = solve_lower_transpose(&l, &b).unwrap();
        assert_abs_diff_eq!(l.t().dot(&x), b, epsilon = 1e-10);
        let x = cho_solve(&l, &b).unwrap();
        assert_abs_diff_eq!(m.dot(&x), b, epsilon = 1e-8);
    }

    #[test]
    fn test_qr() {
        let m = array![[1., 2.], [3., 4.], [5., 7.]];
        let (q, r) = qr(&m).unwrap();
        assert_eq!(q.dim(), (3, 2));
        assert_eq!(r.dim(), (2, 2));
        assert_abs_diff_eq!(q.t().dot(&q), Array2::eye(2), epsilon = 1e-12);
        assert_abs_diff_eq!(q.dot(&r), m, epsilon = 1e-12);
        assert_abs_diff_eq!(r[[1, 0]], 0., epsilon = 1e-12);

        assert!(qr(&m.t()).is_err());
    }

    #[test]
    fn test_invert_spd() {
        let m = spd();
        let inv = invert_spd(&m).unwrap();
        assert_abs_diff_eq!(m.dot(&inv), Array2::eye(3), epsilon = 1e-8);
        assert_abs_diff_eq!(inv, inv.t(), epsilon = 1e-14);
    }

    #[test]
    fn test_log_det() {
        let l = cholesky(&spd()).unwrap();
        // det = (2 * 1 * 3)^2
        assert_abs_diff_eq!(log_det_cholesky(&l), f64::ln(36.), epsilon = 1e-12);
    }
}
