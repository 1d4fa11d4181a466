//! Batch results stacked across k-points.

use nalgebra::DMatrix;
use num_complex::Complex64;

use tbbands_core::EigenPairs;

use crate::pipeline::DiagonalizeError;

/// Eigenvectors of a batch with shape `(N_b, N_e, N_k)`.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenvectorStack {
    n_orbitals: usize,
    n_eigen: usize,
    points: Vec<DMatrix<Complex64>>,
}

impl EigenvectorStack {
    /// `(N_b, N_e, N_k)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.n_orbitals, self.n_eigen, self.points.len())
    }

    /// Component `orbital` of eigenvector `band` at point `k`.
    pub fn get(&self, orbital: usize, band: usize, k: usize) -> Complex64 {
        self.points[k][(orbital, band)]
    }

    /// `N_b × N_e` eigenvectors of point `k`.
    pub fn point(&self, k: usize) -> &DMatrix<Complex64> {
        &self.points[k]
    }

    pub fn into_points(self) -> Vec<DMatrix<Complex64>> {
        self.points
    }
}

/// Eigenvalues (and optionally eigenvectors) of a whole batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    eigenvalues: DMatrix<f64>,
    eigenvectors: Option<EigenvectorStack>,
}

impl BatchResult {
    /// Stack per-point results in input order.
    ///
    /// Every entry must carry exactly `n_eigen` pairs. Eigenvectors are kept
    /// only when `with_vectors` is set and every point has them.
    pub fn assemble(
        n_orbitals: usize,
        n_eigen: usize,
        per_point: Vec<EigenPairs>,
        with_vectors: bool,
    ) -> Result<Self, DiagonalizeError> {
        let n_k = per_point.len();
        let mut eigenvalues = DMatrix::<f64>::zeros(n_eigen, n_k);
        let mut vectors = with_vectors.then(|| Vec::with_capacity(n_k));

        for (k, pairs) in per_point.into_iter().enumerate() {
            check_eigencount(k, n_eigen, &pairs)?;
            for (band, &value) in pairs.values.iter().enumerate() {
                eigenvalues[(band, k)] = value;
            }
            if let Some(stack) = vectors.as_mut() {
                match pairs.vectors {
                    Some(v) if v.shape() == (n_orbitals, n_eigen) => stack.push(v),
                    Some(v) => {
                        return Err(DiagonalizeError::InconsistentEigencount {
                            index: k,
                            expected: n_eigen,
                            found: v.ncols(),
                        })
                    }
                    None => {
                        return Err(DiagonalizeError::InconsistentEigencount {
                            index: k,
                            expected: n_eigen,
                            found: 0,
                        })
                    }
                }
            }
        }

        Ok(Self {
            eigenvalues,
            eigenvectors: vectors.map(|points| EigenvectorStack {
                n_orbitals,
                n_eigen,
                points,
            }),
        })
    }

    /// `N_e × N_k`; column `k` holds the ascending eigenvalues of point `k`.
    pub fn eigenvalues(&self) -> &DMatrix<f64> {
        &self.eigenvalues
    }

    pub fn eigenvectors(&self) -> Option<&EigenvectorStack> {
        self.eigenvectors.as_ref()
    }

    pub fn n_points(&self) -> usize {
        self.eigenvalues.ncols()
    }

    pub fn n_eigen(&self) -> usize {
        self.eigenvalues.nrows()
    }

    /// Eigenvalues of one band across the batch.
    pub fn band(&self, band: usize) -> Vec<f64> {
        self.eigenvalues.row(band).iter().copied().collect()
    }

    pub fn into_parts(self) -> (DMatrix<f64>, Option<EigenvectorStack>) {
        (self.eigenvalues, self.eigenvectors)
    }
}

/// Fails unless `pairs` holds exactly `expected` eigenvalues.
pub(crate) fn check_eigencount(
    index: usize,
    expected: usize,
    pairs: &EigenPairs,
) -> Result<(), DiagonalizeError> {
    if pairs.len() != expected {
        return Err(DiagonalizeError::InconsistentEigencount {
            index,
            expected,
            found: pairs.len(),
        });
    }
    Ok(())
}
