//! Reciprocal-space operators indexed by k-points.

use nalgebra::DMatrix;
use num_complex::Complex64;

use crate::bloch::{self, Parallelism, PhaseSign};
use crate::error::OperatorError;
use crate::lattice::{Displacement, LatticeOperator};

/// One operator sampled at `N_k` reciprocal points (reduced coordinates),
/// with per-point integration weights used by the inverse transform.
#[derive(Debug, Clone)]
pub struct ReciprocalOperator {
    points: Vec<[f64; 3]>,
    n_orbitals: usize,
    block: DMatrix<Complex64>,
    weights: Vec<f64>,
}

impl ReciprocalOperator {
    /// Build from one square matrix per point; weights default to `1/N_k`.
    pub fn new(
        points: Vec<[f64; 3]>,
        matrices: Vec<DMatrix<Complex64>>,
    ) -> Result<Self, OperatorError> {
        if matrices.len() != points.len() {
            return Err(OperatorError::DimensionMismatch(format!(
                "{} matrices for {} reciprocal points",
                matrices.len(),
                points.len()
            )));
        }
        let Some(first) = matrices.first() else {
            return Err(OperatorError::DimensionMismatch(
                "operator needs at least one reciprocal point".to_string(),
            ));
        };
        let n = first.nrows();
        if let Some((idx, m)) = matrices
            .iter()
            .enumerate()
            .find(|(_, m)| m.nrows() != n || m.ncols() != n)
        {
            return Err(OperatorError::DimensionMismatch(format!(
                "matrix {} is {}x{}, expected {}x{}",
                idx,
                m.nrows(),
                m.ncols(),
                n,
                n
            )));
        }
        if n == 0 {
            return Err(OperatorError::DimensionMismatch(
                "matrices must have at least one orbital".to_string(),
            ));
        }
        Ok(Self::from_parts(points, matrices, n))
    }

    /// Assemble from matrices already known to be `n_orbitals` square.
    pub(crate) fn from_parts(
        points: Vec<[f64; 3]>,
        matrices: Vec<DMatrix<Complex64>>,
        n_orbitals: usize,
    ) -> Self {
        let mut block = DMatrix::<Complex64>::zeros(points.len(), n_orbitals * n_orbitals);
        for (row, matrix) in matrices.iter().enumerate() {
            bloch::flatten_into(&mut block, row, matrix);
        }
        let weights = uniform_weights(points.len());
        Self {
            points,
            n_orbitals,
            block,
            weights,
        }
    }

    /// Replace the integration weights.
    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self, OperatorError> {
        validate_weights(&weights, self.points.len())?;
        self.weights = weights;
        Ok(self)
    }

    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn n_orbitals(&self) -> usize {
        self.n_orbitals
    }

    /// Number of reciprocal points `N_k`.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Matrix at the `index`-th point.
    pub fn matrix(&self, index: usize) -> DMatrix<Complex64> {
        bloch::unflatten_row(&self.block, index, self.n_orbitals)
    }

    pub fn matrices(&self) -> Vec<DMatrix<Complex64>> {
        bloch::unflatten_all(&self.block, self.n_orbitals)
    }

    /// Inverse transform `M(R) = Σ_k w_k exp(-i·2π·R·k) M(k)`.
    ///
    /// `weights` overrides the operator's own weights for this call. The
    /// result is only as exact as the k-point sampling of the cell.
    pub fn to_lattice(
        &self,
        displacements: &[Displacement],
        weights: Option<&[f64]>,
    ) -> Result<LatticeOperator, OperatorError> {
        self.to_lattice_with(displacements, weights, Parallelism::Serial)
    }

    pub fn to_lattice_with(
        &self,
        displacements: &[Displacement],
        weights: Option<&[f64]>,
        parallelism: Parallelism<'_>,
    ) -> Result<LatticeOperator, OperatorError> {
        let weights = match weights {
            Some(w) => {
                validate_weights(w, self.points.len())?;
                w
            }
            None => &self.weights,
        };
        let targets: Vec<[f64; 3]> = displacements
            .iter()
            .map(|&d| bloch::displacement_coords(d))
            .collect();
        let block = bloch::contract(
            &targets,
            &self.points,
            &self.block,
            PhaseSign::Inverse,
            Some(weights),
            parallelism,
        );
        LatticeOperator::from_block(displacements.to_vec(), self.n_orbitals, block)
    }
}

fn uniform_weights(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    vec![1.0 / n as f64; n]
}

fn validate_weights(weights: &[f64], expected: usize) -> Result<(), OperatorError> {
    if weights.len() != expected {
        return Err(OperatorError::InvalidWeights(format!(
            "{} weights for {} reciprocal points",
            weights.len(),
            expected
        )));
    }
    if let Some(bad) = weights.iter().find(|w| !w.is_finite()) {
        return Err(OperatorError::InvalidWeights(format!(
            "non-finite weight {bad}"
        )));
    }
    Ok(())
}
