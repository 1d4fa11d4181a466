//! Dense generalized solver: reduce through the overlap, then diagonalize.

use nalgebra::{DMatrix, SymmetricEigen};
use num_complex::Complex64;

use super::{factor_overlap, hermitize, sort_ascending, DenseDriver, DenseOptions, EigenPairs};
use crate::error::EigenError;

/// Transform between the generalized problem and the standard one.
enum Reduction {
    /// Lower Cholesky factor `L` of `S`.
    Cholesky(DMatrix<Complex64>),
    /// `S^{-1/2}`.
    Lowdin(DMatrix<Complex64>),
}

impl Reduction {
    fn cholesky(s: &DMatrix<Complex64>, overlap_tol: f64) -> Result<Self, EigenError> {
        Ok(Reduction::Cholesky(factor_overlap(s, overlap_tol)?.l()))
    }

    fn lowdin(s: &DMatrix<Complex64>, overlap_tol: f64) -> Result<Self, EigenError> {
        let eig = SymmetricEigen::new(s.clone());
        let min = eig.eigenvalues.min();
        let max = eig.eigenvalues.max();
        if !(min > 0.0 && min > overlap_tol * max.max(1.0)) {
            return Err(EigenError::SingularOverlap(format!(
                "overlap eigenvalues span [{min:.3e}, {max:.3e}]"
            )));
        }
        let mut scaled = eig.eigenvectors.clone();
        for (mut column, &value) in scaled.column_iter_mut().zip(eig.eigenvalues.iter()) {
            column *= Complex64::new(1.0 / value.sqrt(), 0.0);
        }
        Ok(Reduction::Lowdin(scaled * eig.eigenvectors.adjoint()))
    }

    /// Standard-form matrix whose eigenvalues are the generalized ones.
    fn reduce(&self, h: &DMatrix<Complex64>) -> Result<DMatrix<Complex64>, EigenError> {
        let c = match self {
            Reduction::Cholesky(l) => {
                // C = L⁻¹ H L⁻ᴴ = (L⁻¹ (L⁻¹ H)ᴴ)ᴴ
                let x = l.solve_lower_triangular(h).ok_or_else(singular_factor)?;
                let y = l
                    .solve_lower_triangular(&x.adjoint())
                    .ok_or_else(singular_factor)?;
                y.adjoint()
            }
            Reduction::Lowdin(x) => x * h * x,
        };
        Ok(hermitize(c))
    }

    /// Map standard-form eigenvectors back to generalized ones.
    fn back_transform(&self, z: DMatrix<Complex64>) -> Result<DMatrix<Complex64>, EigenError> {
        match self {
            Reduction::Cholesky(l) => l
                .adjoint()
                .solve_upper_triangular(&z)
                .ok_or_else(singular_factor),
            Reduction::Lowdin(x) => Ok(x * z),
        }
    }
}

fn singular_factor() -> EigenError {
    EigenError::SingularOverlap("Cholesky factor has a zero pivot".to_string())
}

pub(super) fn solve(
    h: &DMatrix<Complex64>,
    s: &DMatrix<Complex64>,
    opts: &DenseOptions,
    bands_only: bool,
) -> Result<EigenPairs, EigenError> {
    let reduction = match opts.driver {
        DenseDriver::Cholesky => Reduction::cholesky(s, opts.overlap_tol)?,
        DenseDriver::Lowdin => Reduction::lowdin(s, opts.overlap_tol)?,
    };
    let c = reduction.reduce(h)?;

    if bands_only {
        let values = c.symmetric_eigenvalues().iter().copied().collect();
        return Ok(sort_ascending(values, None));
    }

    let eig = SymmetricEigen::new(c);
    let values = eig.eigenvalues.iter().copied().collect();
    let vectors = reduction.back_transform(eig.eigenvectors)?;
    Ok(sort_ascending(values, Some(vectors)))
}
