//! Hamiltonian/overlap pair in real space.

use nalgebra::DMatrix;
use num_complex::Complex64;

use tbbands_core::{LatticeOperator, OperatorError, Parallelism};

/// `S_k` and `H_k` at one k-point, in that order.
pub type InstantaneousPair = (DMatrix<Complex64>, DMatrix<Complex64>);

/// Borrowed Hamiltonian and overlap operators describing one band model.
#[derive(Debug, Clone, Copy)]
pub struct BandModel<'a> {
    hamiltonian: &'a LatticeOperator,
    overlap: &'a LatticeOperator,
}

impl<'a> BandModel<'a> {
    /// Pair two operators; they must share orbital and displacement counts.
    pub fn new(
        hamiltonian: &'a LatticeOperator,
        overlap: &'a LatticeOperator,
    ) -> Result<Self, OperatorError> {
        if hamiltonian.n_orbitals() != overlap.n_orbitals() {
            return Err(OperatorError::DimensionMismatch(format!(
                "hamiltonian has {} orbitals, overlap has {}",
                hamiltonian.n_orbitals(),
                overlap.n_orbitals()
            )));
        }
        if hamiltonian.len() != overlap.len() {
            return Err(OperatorError::DimensionMismatch(format!(
                "hamiltonian has {} displacements, overlap has {}",
                hamiltonian.len(),
                overlap.len()
            )));
        }
        Ok(Self {
            hamiltonian,
            overlap,
        })
    }

    pub fn hamiltonian(&self) -> &'a LatticeOperator {
        self.hamiltonian
    }

    pub fn overlap(&self) -> &'a LatticeOperator {
        self.overlap
    }

    pub fn n_orbitals(&self) -> usize {
        self.hamiltonian.n_orbitals()
    }

    /// `(S_k, H_k)` at a single point.
    pub fn instantaneous_pair(&self, point: [f64; 3], parallelism: Parallelism<'_>) -> InstantaneousPair {
        let s_k = self.overlap.transform_one(point, parallelism);
        let h_k = self.hamiltonian.transform_one(point, parallelism);
        (s_k, h_k)
    }

    /// `(S_k, H_k)` for every point of a batch, in input order.
    pub fn instantaneous_pairs(
        &self,
        points: &[[f64; 3]],
        parallelism: Parallelism<'_>,
    ) -> Vec<InstantaneousPair> {
        let s_k = self.overlap.transform_batch(points, parallelism);
        let h_k = self.hamiltonian.transform_batch(points, parallelism);
        s_k.into_iter().zip(h_k).collect()
    }
}
