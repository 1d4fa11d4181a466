//! S-orthonormalization helpers for the Lanczos solver.
//!
//! Every vector `x` travels with its precomputed mass vector `Sx`, so inner
//! products `<x, y>_S = xᴴ S y` cost a single dot product and no extra
//! matrix-vector multiplications.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

// ============================================================================
// Single-Vector Normalization
// ============================================================================

/// S-norm `||x||_S = sqrt(<x, Sx>)` from a vector and its mass vector.
pub fn s_norm(vector: &DVector<Complex64>, mass_vector: &DVector<Complex64>) -> f64 {
    vector.dotc(mass_vector).re.max(0.0).sqrt()
}

/// Scale a vector and its mass vector to unit S-norm.
///
/// Returns the norm before scaling, or `0.0` (leaving both untouched) when it
/// is not above `tol`.
pub fn normalize_to_unit_s_norm_with_tol(
    vector: &mut DVector<Complex64>,
    mass_vector: &mut DVector<Complex64>,
    tol: f64,
) -> f64 {
    let norm = s_norm(vector, mass_vector);
    if norm > tol {
        let scale = Complex64::new(1.0 / norm, 0.0);
        *vector *= scale;
        *mass_vector *= scale;
        norm
    } else {
        0.0
    }
}

// ============================================================================
// Projection
// ============================================================================

/// `<x, y>_S` given `x` and the mass vector `Sy`.
pub fn s_inner_product(x: &DVector<Complex64>, sy: &DVector<Complex64>) -> Complex64 {
    x.dotc(sy)
}

/// Remove the component along an S-normalized basis vector:
/// `v := v − <u, v>_S · u`.
///
/// The mass vector of `v` is not updated; callers recompute it once after all
/// projections.
pub fn project_out(
    vector: &mut DVector<Complex64>,
    basis: &DVector<Complex64>,
    basis_mass: &DVector<Complex64>,
) {
    // <u, v>_S = (Su)ᴴ v because S is Hermitian
    let coeff = basis_mass.dotc(vector);
    vector.axpy(-coeff, basis, Complex64::new(1.0, 0.0));
}

/// Classical Gram-Schmidt against an S-orthonormal basis, applied twice.
pub fn orthogonalize_against_basis(
    vector: &mut DVector<Complex64>,
    basis: &[DVector<Complex64>],
    basis_mass: &[DVector<Complex64>],
) {
    for _ in 0..2 {
        for (u, su) in basis.iter().zip(basis_mass) {
            project_out(vector, u, su);
        }
    }
}

/// Normalize each column of `vectors` to unit S-norm.
pub fn normalize_columns(vectors: &mut DMatrix<Complex64>, s: &DMatrix<Complex64>) {
    for mut column in vectors.column_iter_mut() {
        let x = column.clone_owned();
        let norm = s_norm(&x, &(s * &x));
        if norm > 0.0 {
            column *= Complex64::new(1.0 / norm, 0.0);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
