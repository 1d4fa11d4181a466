//! Generalized Hermitian eigensolvers for `H v = λ S v`.
//!
//! Two solver families share one contract ([`solve`]):
//!
//! - **Dense**: reduce to a standard Hermitian problem through the overlap
//!   (Cholesky or Löwdin) and diagonalize it fully. Always returns all `N_b`
//!   eigenpairs.
//! - **Sparse**: Lanczos iteration in the S-inner product, either on `S⁻¹H`
//!   or, with a shift `σ`, on `(H − σS)⁻¹S`. Returns the `n_eigen` pairs picked
//!   by [`Which`].
//!
//! Eigenvalues always come back ascending with eigenvectors permuted to match,
//! and eigenvectors are S-orthonormal (`vᴴ S v = 1`).

mod dense;
mod lanczos;
pub mod normalization;

use nalgebra::{Cholesky, DMatrix, Dyn};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{EigenError, MatrixKind};

// ============================================================================
// Options
// ============================================================================

/// Reduction used by the dense solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenseDriver {
    /// `S = L Lᴴ`, solve `L⁻¹ H L⁻ᴴ z = λ z`, `v = L⁻ᴴ z`.
    #[default]
    Cholesky,
    /// Symmetric orthogonalization: `X = S^{-1/2}`, solve `X H X z = λ z`, `v = X z`.
    Lowdin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DenseOptions {
    pub driver: DenseDriver,
    /// Smallest accepted overlap eigenvalue (squared Cholesky pivot for the
    /// Cholesky driver), relative to `max(1, largest)`.
    pub overlap_tol: f64,
}

impl Default for DenseOptions {
    fn default() -> Self {
        Self {
            driver: DenseDriver::Cholesky,
            overlap_tol: 1e-12,
        }
    }
}

/// Which Ritz values of the iteration operator the sparse solver keeps.
///
/// In shift-invert mode the operator eigenvalues are `θ = 1/(λ − σ)`, so
/// `LargestMagnitude` selects the eigenvalues closest to the shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Which {
    #[default]
    #[serde(rename = "LM", alias = "largest_magnitude")]
    LargestMagnitude,
    #[serde(rename = "SM", alias = "smallest_magnitude")]
    SmallestMagnitude,
    #[serde(rename = "LA", alias = "largest_algebraic")]
    LargestAlgebraic,
    #[serde(rename = "SA", alias = "smallest_algebraic")]
    SmallestAlgebraic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SparseOptions {
    /// Number of eigenpairs to compute.
    pub n_eigen: usize,
    pub which: Which,
    /// Shift for shift-invert mode; `None` runs Lanczos on `S⁻¹H`.
    pub sigma: Option<f64>,
    /// Relative residual tolerance for Ritz pairs.
    pub tol: f64,
    /// Lanczos step budget; defaults to `10 · N_b`.
    pub max_iter: Option<usize>,
}

impl Default for SparseOptions {
    fn default() -> Self {
        Self {
            n_eigen: 6,
            which: Which::LargestMagnitude,
            sigma: None,
            tol: 1e-10,
            max_iter: None,
        }
    }
}

impl SparseOptions {
    /// Checks that do not depend on the problem size.
    pub fn validate(&self) -> Result<(), EigenError> {
        if self.n_eigen == 0 {
            return Err(EigenError::InvalidRequest(
                "n_eigen must be at least 1".to_string(),
            ));
        }
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(EigenError::InvalidRequest(format!(
                "tol must be positive and finite, got {}",
                self.tol
            )));
        }
        if let Some(sigma) = self.sigma {
            if !sigma.is_finite() {
                return Err(EigenError::InvalidRequest(format!(
                    "sigma must be finite, got {sigma}"
                )));
            }
        }
        if self.max_iter == Some(0) {
            return Err(EigenError::InvalidRequest(
                "max_iter must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks against a problem of `n_orbitals` orbitals.
    pub fn validate_for(&self, n_orbitals: usize) -> Result<(), EigenError> {
        self.validate()?;
        if self.n_eigen > n_orbitals {
            return Err(EigenError::InvalidRequest(format!(
                "requested {} eigenpairs from a {}-orbital problem",
                self.n_eigen, n_orbitals
            )));
        }
        Ok(())
    }

    fn step_budget(&self, n: usize) -> usize {
        self.max_iter.unwrap_or(10 * n).max(1)
    }
}

/// Solver family plus its mode-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SolverMode {
    Dense(DenseOptions),
    Sparse(SparseOptions),
}

impl Default for SolverMode {
    fn default() -> Self {
        SolverMode::Dense(DenseOptions::default())
    }
}

impl SolverMode {
    pub fn validate(&self) -> Result<(), EigenError> {
        match self {
            SolverMode::Dense(opts) => {
                if !(opts.overlap_tol.is_finite() && opts.overlap_tol >= 0.0) {
                    return Err(EigenError::InvalidRequest(format!(
                        "overlap_tol must be non-negative and finite, got {}",
                        opts.overlap_tol
                    )));
                }
                Ok(())
            }
            SolverMode::Sparse(opts) => opts.validate(),
        }
    }

    /// Eigenpair count every solve returns for an `n_orbitals` problem.
    pub fn eigen_count(&self, n_orbitals: usize) -> usize {
        match self {
            SolverMode::Dense(_) => n_orbitals,
            SolverMode::Sparse(opts) => opts.n_eigen,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SolverMode::Dense(_) => "dense",
            SolverMode::Sparse(_) => "sparse",
        }
    }
}

/// Everything a single solve needs besides the matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveSettings {
    pub mode: SolverMode,
    /// Skip eigenvectors entirely.
    pub bands_only: bool,
    /// Relative tolerance of the Hermiticity check on `H` and `S`.
    pub hermitian_tol: f64,
}

impl Default for SolveSettings {
    fn default() -> Self {
        Self {
            mode: SolverMode::default(),
            bands_only: false,
            hermitian_tol: 1e-8,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Eigenpairs at one k-point.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenPairs {
    /// Ascending eigenvalues.
    pub values: Vec<f64>,
    /// `N_b × N_e`; column `i` pairs with `values[i]`.
    pub vectors: Option<DMatrix<Complex64>>,
}

impl EigenPairs {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Solve `H v = λ S v` for one instantaneous pair.
pub fn solve(
    h: &DMatrix<Complex64>,
    s: &DMatrix<Complex64>,
    settings: &SolveSettings,
) -> Result<EigenPairs, EigenError> {
    check_shapes(h, s)?;
    check_hermitian(h, MatrixKind::Hamiltonian, settings.hermitian_tol)?;
    check_hermitian(s, MatrixKind::Overlap, settings.hermitian_tol)?;
    match &settings.mode {
        SolverMode::Dense(opts) => dense::solve(h, s, opts, settings.bands_only),
        SolverMode::Sparse(opts) => lanczos::solve(h, s, opts, settings.bands_only),
    }
}

fn check_shapes(h: &DMatrix<Complex64>, s: &DMatrix<Complex64>) -> Result<(), EigenError> {
    if !h.is_square() || !s.is_square() || h.shape() != s.shape() {
        return Err(EigenError::Shape(format!(
            "hamiltonian is {}x{}, overlap is {}x{}",
            h.nrows(),
            h.ncols(),
            s.nrows(),
            s.ncols()
        )));
    }
    if h.nrows() == 0 {
        return Err(EigenError::Shape("empty matrices".to_string()));
    }
    Ok(())
}

/// Largest elementwise deviation `|M_ij − conj(M_ji)|`.
pub fn hermitian_deviation(m: &DMatrix<Complex64>) -> f64 {
    let n = m.nrows();
    let mut worst = 0.0f64;
    for i in 0..n {
        for j in i..n {
            worst = worst.max((m[(i, j)] - m[(j, i)].conj()).norm());
        }
    }
    worst
}

fn check_hermitian(m: &DMatrix<Complex64>, kind: MatrixKind, tol: f64) -> Result<(), EigenError> {
    let scale = m.iter().fold(1.0f64, |acc, z| acc.max(z.norm()));
    let tolerance = tol * scale;
    let deviation = hermitian_deviation(m);
    if deviation > tolerance {
        return Err(EigenError::NonHermitian {
            matrix: kind,
            deviation,
            tolerance,
        });
    }
    Ok(())
}

/// Cholesky factorization of `S`, rejecting overlaps that are not safely
/// positive definite.
///
/// The squared pivots `L_jj²` are the real Schur pivots of `S`; all must be
/// positive, and the smallest must exceed `overlap_tol · max(1, largest)`, so
/// a uniformly tiny `S` is rejected as well as an ill-conditioned one.
pub(crate) fn factor_overlap(
    s: &DMatrix<Complex64>,
    overlap_tol: f64,
) -> Result<Cholesky<Complex64, Dyn>, EigenError> {
    let chol = Cholesky::new(s.clone()).ok_or_else(|| {
        EigenError::SingularOverlap("Cholesky factorization failed".to_string())
    })?;
    let (min_pivot, max_pivot) = chol
        .l_dirty()
        .diagonal()
        .iter()
        .map(|z| (z * z).re)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p), hi.max(p)));
    if !(min_pivot > 0.0 && min_pivot > overlap_tol * max_pivot.max(1.0)) {
        return Err(EigenError::SingularOverlap(format!(
            "Cholesky pivots span [{min_pivot:.3e}, {max_pivot:.3e}], threshold {overlap_tol:.3e}"
        )));
    }
    Ok(chol)
}

/// Sort eigenvalues ascending and permute eigenvector columns identically.
pub(crate) fn sort_ascending(values: Vec<f64>, vectors: Option<DMatrix<Complex64>>) -> EigenPairs {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let sorted_values = order.iter().map(|&i| values[i]).collect();
    let sorted_vectors = vectors.map(|v| {
        let mut out = DMatrix::<Complex64>::zeros(v.nrows(), order.len());
        for (dst, &src) in order.iter().enumerate() {
            out.set_column(dst, &v.column(src));
        }
        out
    });
    EigenPairs {
        values: sorted_values,
        vectors: sorted_vectors,
    }
}

/// Hermitian part `(C + Cᴴ)/2`, removing rounding asymmetry after a reduction.
pub(crate) fn hermitize(c: DMatrix<Complex64>) -> DMatrix<Complex64> {
    let adj = c.adjoint();
    (c + adj) * Complex64::new(0.5, 0.0)
}
