//! Lanczos solver for a subset of generalized eigenpairs.
//!
//! The iteration operator is self-adjoint in the S-inner product:
//!
//! - regular mode: `OP = S⁻¹H`, Ritz values `θ = λ`;
//! - shift-invert: `OP = (H − σS)⁻¹S`, Ritz values `θ = 1/(λ − σ)`.
//!
//! The Krylov space is grown from a block of `n_eigen` start vectors, one
//! operator application at a time, so an eigenvalue repeated up to `n_eigen`
//! times is seen with its full multiplicity. The basis is kept S-orthonormal
//! with full reorthogonalization and Ritz pairs come from the projected
//! operator `T_ij = <q_i, OP q_j>_S`. The basis never exceeds `N_b` vectors;
//! when it spans the whole space the Ritz pairs are exact.

use log::debug;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn, SymmetricEigen, LU};
use num_complex::Complex64;

use super::normalization::{
    normalize_columns, normalize_to_unit_s_norm_with_tol, orthogonalize_against_basis, s_norm,
};
use super::{factor_overlap, hermitize, sort_ascending, EigenPairs, SparseOptions, Which};
use crate::error::EigenError;

/// Relative size of a new Krylov direction below which it is dropped.
const BREAKDOWN_TOL: f64 = 1e-12;

/// Smallest accepted squared Cholesky pivot of `S`, relative to `max(1, largest)`.
const OVERLAP_PIVOT_TOL: f64 = 1e-12;

/// Start vectors tried before giving up on extending an invariant subspace.
const MAX_RESTART_ATTEMPTS: usize = 8;

const GOLDEN: f64 = 0.618_033_988_749_894_9;
const SQRT2_FRAC: f64 = 0.414_213_562_373_095_1;

enum SpectralOperator<'a> {
    Regular {
        h: &'a DMatrix<Complex64>,
        chol: Cholesky<Complex64, Dyn>,
    },
    ShiftInvert {
        s: &'a DMatrix<Complex64>,
        lu: LU<Complex64, Dyn, Dyn>,
        sigma: f64,
    },
}

impl SpectralOperator<'_> {
    fn apply(&self, q: &DVector<Complex64>) -> Result<DVector<Complex64>, EigenError> {
        match self {
            SpectralOperator::Regular { h, chol } => Ok(chol.solve(&(*h * q))),
            SpectralOperator::ShiftInvert { s, lu, sigma } => lu
                .solve(&(*s * q))
                .ok_or(EigenError::SingularShift { sigma: *sigma }),
        }
    }

    fn eigenvalue(&self, theta: f64) -> f64 {
        match self {
            SpectralOperator::Regular { .. } => theta,
            SpectralOperator::ShiftInvert { sigma, .. } => sigma + 1.0 / theta,
        }
    }
}

/// S-orthonormal Krylov basis with cached mass vectors and operator images.
///
/// `OP` has been applied to the first `applied()` basis vectors; the rest wait
/// in order, which makes the basis a block Krylov space.
struct KrylovBasis {
    vectors: Vec<DVector<Complex64>>,
    mass: Vec<DVector<Complex64>>,
    images: Vec<DVector<Complex64>>,
    /// Column `j` holds `<q_i, OP q_j>_S` for `i <= j`.
    projected: Vec<Vec<Complex64>>,
    restarts: usize,
}

impl KrylovBasis {
    fn new() -> Self {
        Self {
            vectors: Vec::new(),
            mass: Vec::new(),
            images: Vec::new(),
            projected: Vec::new(),
            restarts: 0,
        }
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn applied(&self) -> usize {
        self.images.len()
    }

    fn push(&mut self, vector: DVector<Complex64>, mass: DVector<Complex64>) {
        self.vectors.push(vector);
        self.mass.push(mass);
    }

    /// Append a deterministic start vector S-orthogonal to the current basis.
    fn push_fresh(&mut self, s: &DMatrix<Complex64>) -> bool {
        let n = s.nrows();
        if self.len() >= n {
            return false;
        }
        for _ in 0..MAX_RESTART_ATTEMPTS {
            let offset = self.restarts as f64;
            self.restarts += 1;
            let mut v = DVector::from_fn(n, |i, _| {
                let x = i as f64 + 1.0;
                Complex64::new(
                    (x * GOLDEN + offset * SQRT2_FRAC).fract() - 0.5,
                    (x * SQRT2_FRAC + offset * GOLDEN).fract() - 0.5,
                )
            });
            let initial = v.norm();
            orthogonalize_against_basis(&mut v, &self.vectors, &self.mass);
            let mut sv = s * &v;
            if normalize_to_unit_s_norm_with_tol(&mut v, &mut sv, 1e-8 * initial) > 0.0 {
                self.push(v, sv);
                return true;
            }
        }
        false
    }

    /// Apply `OP` to the next waiting basis vector and record its column of
    /// the projected operator. Returns the image.
    fn advance(&mut self, op: &SpectralOperator<'_>) -> Result<DVector<Complex64>, EigenError> {
        let j = self.applied();
        let image = op.apply(&self.vectors[j])?;
        let column = self.mass[..=j].iter().map(|m| m.dotc(&image)).collect();
        self.projected.push(column);
        self.images.push(image.clone());
        Ok(image)
    }

    /// Hermitian projection of `OP` onto the applied vectors.
    fn projected_matrix(&self) -> DMatrix<Complex64> {
        let m = self.applied();
        let t = DMatrix::from_fn(m, m, |i, j| {
            if i <= j {
                self.projected[j][i]
            } else {
                self.projected[i][j].conj()
            }
        });
        hermitize(t)
    }

    /// Ritz vector `Σ_j q_j y_j`.
    fn combine(&self, coeffs: &DVector<Complex64>) -> DVector<Complex64> {
        let n = self.vectors[0].len();
        let mut x = DVector::<Complex64>::zeros(n);
        for (q, &c) in self.vectors.iter().zip(coeffs.iter()) {
            x.axpy(c, q, Complex64::new(1.0, 0.0));
        }
        x
    }

    /// S-norm of `OP x − θ x` for the Ritz vector with coefficients `coeffs`.
    fn residual_norm(&self, coeffs: &DVector<Complex64>, theta: f64, s: &DMatrix<Complex64>) -> f64 {
        let n = self.vectors[0].len();
        let one = Complex64::new(1.0, 0.0);
        let mut r = DVector::<Complex64>::zeros(n);
        for ((q, image), &c) in self.vectors.iter().zip(&self.images).zip(coeffs.iter()) {
            r.axpy(c, image, one);
            r.axpy(-c * theta, q, one);
        }
        let sr = s * &r;
        s_norm(&r, &sr)
    }
}

pub(super) fn solve(
    h: &DMatrix<Complex64>,
    s: &DMatrix<Complex64>,
    opts: &SparseOptions,
    bands_only: bool,
) -> Result<EigenPairs, EigenError> {
    let n = h.nrows();
    opts.validate_for(n)?;

    // S must define an inner product in both modes
    let chol = factor_overlap(s, OVERLAP_PIVOT_TOL)?;
    let op = match opts.sigma {
        None => SpectralOperator::Regular { h, chol },
        Some(sigma) => {
            let lu = (h - s * Complex64::new(sigma, 0.0)).lu();
            if !lu.is_invertible() {
                return Err(EigenError::SingularShift { sigma });
            }
            SpectralOperator::ShiftInvert { s, lu, sigma }
        }
    };

    let requested = opts.n_eigen;
    let budget = opts.step_budget(n);

    let mut basis = KrylovBasis::new();
    for _ in 0..requested {
        if !basis.push_fresh(s) {
            return Err(EigenError::SingularOverlap(
                "start vectors have vanishing S-norm".to_string(),
            ));
        }
    }
    let mut converged = 0usize;

    for step in 0..budget {
        let mut w = basis.advance(&op)?;
        let m = basis.applied();
        let ritz = SymmetricEigen::new(basis.projected_matrix());
        let wanted = select(ritz.eigenvalues.as_slice(), opts.which, requested.min(m));

        if m >= requested {
            converged = wanted
                .iter()
                .filter(|&&i| {
                    let theta = ritz.eigenvalues[i];
                    let coeffs = ritz.eigenvectors.column(i).clone_owned();
                    basis.residual_norm(&coeffs, theta, s)
                        <= opts.tol * theta.abs().max(f64::EPSILON)
                })
                .count();
            if converged == requested || m == n {
                debug!(
                    "lanczos: {}/{} pairs converged after {} steps (n={}, block={}, restarts={})",
                    converged,
                    requested,
                    step + 1,
                    n,
                    requested,
                    basis.restarts.saturating_sub(requested)
                );
                return Ok(finish(&op, &basis, &ritz, &wanted, s, bands_only));
            }
        }

        let scale = ritz
            .eigenvalues
            .iter()
            .fold(f64::MIN_POSITIVE, |acc, x| acc.max(x.abs()));
        orthogonalize_against_basis(&mut w, &basis.vectors, &basis.mass);
        let mut sw = s * &w;
        if basis.len() < n
            && normalize_to_unit_s_norm_with_tol(&mut w, &mut sw, BREAKDOWN_TOL * scale) > 0.0
        {
            basis.push(w, sw);
        }
        // invariant subspace with nothing left to apply
        if basis.len() == basis.applied() && !basis.push_fresh(s) {
            break;
        }
    }

    Err(EigenError::Convergence {
        iterations: basis.applied(),
        converged,
        requested,
    })
}

/// Indices of the `count` Ritz values preferred by `which`.
fn select(theta: &[f64], which: Which, count: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..theta.len()).collect();
    match which {
        Which::LargestMagnitude => order.sort_by(|&a, &b| theta[b].abs().total_cmp(&theta[a].abs())),
        Which::SmallestMagnitude => order.sort_by(|&a, &b| theta[a].abs().total_cmp(&theta[b].abs())),
        Which::LargestAlgebraic => order.sort_by(|&a, &b| theta[b].total_cmp(&theta[a])),
        Which::SmallestAlgebraic => order.sort_by(|&a, &b| theta[a].total_cmp(&theta[b])),
    }
    order.truncate(count);
    order
}

fn finish(
    op: &SpectralOperator<'_>,
    basis: &KrylovBasis,
    ritz: &SymmetricEigen<Complex64, Dyn>,
    wanted: &[usize],
    s: &DMatrix<Complex64>,
    bands_only: bool,
) -> EigenPairs {
    let values: Vec<f64> = wanted
        .iter()
        .map(|&i| op.eigenvalue(ritz.eigenvalues[i]))
        .collect();
    let vectors = (!bands_only).then(|| {
        let n = s.nrows();
        let mut out = DMatrix::<Complex64>::zeros(n, wanted.len());
        for (col, &i) in wanted.iter().enumerate() {
            out.set_column(col, &basis.combine(&ritz.eigenvectors.column(i).clone_owned()));
        }
        normalize_columns(&mut out, s);
        out
    });
    // the iteration gives no ordering guarantee, with or without vectors
    sort_ascending(values, vectors)
}
