//! Real-space operators indexed by lattice displacements.

use std::collections::HashMap;

use nalgebra::DMatrix;
use num_complex::Complex64;

use crate::bloch::{self, Parallelism, PhaseSign};
use crate::error::OperatorError;
use crate::reciprocal::ReciprocalOperator;

/// Integer lattice displacement `R = (n1, n2, n3)` in units of the lattice vectors.
pub type Displacement = [i32; 3];

/// One physical operator (Hamiltonian or overlap) in the real-space basis:
/// an `N_b × N_b` matrix for each of `N_R` lattice displacements.
///
/// The matrices are kept as a single `N_R × N_b²` block so the Bloch sum is
/// a single matrix product.
#[derive(Debug, Clone)]
pub struct LatticeOperator {
    displacements: Vec<Displacement>,
    n_orbitals: usize,
    block: DMatrix<Complex64>,
}

impl LatticeOperator {
    /// Build an operator from one square matrix per displacement.
    pub fn new(
        displacements: Vec<Displacement>,
        matrices: Vec<DMatrix<Complex64>>,
    ) -> Result<Self, OperatorError> {
        if matrices.len() != displacements.len() {
            return Err(OperatorError::DimensionMismatch(format!(
                "{} matrices for {} displacements",
                matrices.len(),
                displacements.len()
            )));
        }
        let n_orbitals = validate_square(&matrices)?;
        check_unique(&displacements)?;

        let mut block = DMatrix::<Complex64>::zeros(displacements.len(), n_orbitals * n_orbitals);
        for (row, matrix) in matrices.iter().enumerate() {
            bloch::flatten_into(&mut block, row, matrix);
        }
        Ok(Self {
            displacements,
            n_orbitals,
            block,
        })
    }

    /// Build an operator from real-valued matrices (spinless systems).
    pub fn from_real(
        displacements: Vec<Displacement>,
        matrices: Vec<DMatrix<f64>>,
    ) -> Result<Self, OperatorError> {
        let complex = matrices
            .into_iter()
            .map(|m| m.map(|x| Complex64::new(x, 0.0)))
            .collect();
        Self::new(displacements, complex)
    }

    /// Build an operator from a row-major `(N_R, N_b, N_b)` buffer.
    pub fn from_flat(
        displacements: Vec<Displacement>,
        n_orbitals: usize,
        data: &[Complex64],
    ) -> Result<Self, OperatorError> {
        let per_matrix = n_orbitals * n_orbitals;
        if n_orbitals == 0
            || displacements.is_empty()
            || data.len() != displacements.len() * per_matrix
        {
            return Err(OperatorError::DimensionMismatch(format!(
                "buffer of {} elements cannot hold {} matrices of {}x{}",
                data.len(),
                displacements.len(),
                n_orbitals,
                n_orbitals
            )));
        }
        check_unique(&displacements)?;
        let block = DMatrix::from_row_slice(displacements.len(), per_matrix, data);
        Ok(Self {
            displacements,
            n_orbitals,
            block,
        })
    }

    /// Wrap an already-contracted `N_R × N_b²` block.
    pub(crate) fn from_block(
        displacements: Vec<Displacement>,
        n_orbitals: usize,
        block: DMatrix<Complex64>,
    ) -> Result<Self, OperatorError> {
        if displacements.is_empty() {
            return Err(OperatorError::DimensionMismatch(
                "operator needs at least one displacement".to_string(),
            ));
        }
        check_unique(&displacements)?;
        debug_assert_eq!(block.nrows(), displacements.len());
        debug_assert_eq!(block.ncols(), n_orbitals * n_orbitals);
        Ok(Self {
            displacements,
            n_orbitals,
            block,
        })
    }

    pub fn displacements(&self) -> &[Displacement] {
        &self.displacements
    }

    /// Orbital count `N_b`.
    pub fn n_orbitals(&self) -> usize {
        self.n_orbitals
    }

    /// Number of displacements `N_R`.
    pub fn len(&self) -> usize {
        self.displacements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.displacements.is_empty()
    }

    /// Matrix stored for the `index`-th displacement.
    pub fn matrix(&self, index: usize) -> DMatrix<Complex64> {
        bloch::unflatten_row(&self.block, index, self.n_orbitals)
    }

    /// Matrix stored for a given displacement, if present.
    pub fn matrix_at(&self, displacement: Displacement) -> Option<DMatrix<Complex64>> {
        self.displacements
            .iter()
            .position(|&d| d == displacement)
            .map(|idx| self.matrix(idx))
    }

    /// Flattened `N_R × N_b²` block used by the Bloch kernel.
    pub fn block(&self) -> &DMatrix<Complex64> {
        &self.block
    }

    /// Bloch sums `M(k) = Σ_R exp(i·2π·k·R) M(R)` for every point.
    pub fn transform_batch(
        &self,
        points: &[[f64; 3]],
        parallelism: Parallelism<'_>,
    ) -> Vec<DMatrix<Complex64>> {
        if points.is_empty() {
            return Vec::new();
        }
        let sources: Vec<[f64; 3]> = self
            .displacements
            .iter()
            .map(|&d| bloch::displacement_coords(d))
            .collect();
        let out = bloch::contract(
            points,
            &sources,
            &self.block,
            PhaseSign::Forward,
            None,
            parallelism,
        );
        bloch::unflatten_all(&out, self.n_orbitals)
    }

    /// Bloch sum at a single point.
    pub fn transform_one(&self, point: [f64; 3], parallelism: Parallelism<'_>) -> DMatrix<Complex64> {
        let mut batch = self.transform_batch(&[point], parallelism);
        // a one-point batch always yields exactly one matrix
        batch.swap_remove(0)
    }

    /// Forward transform into a reciprocal-space operator.
    pub fn to_reciprocal(&self, points: &[[f64; 3]]) -> ReciprocalOperator {
        let matrices = self.transform_batch(points, Parallelism::Serial);
        ReciprocalOperator::from_parts(points.to_vec(), matrices, self.n_orbitals)
    }

    /// Whether `M(R) = M(-R)^H` holds for every displacement within `tol`.
    ///
    /// A displacement whose negation is missing from the set breaks the
    /// symmetry.
    pub fn is_hermitian_symmetric(&self, tol: f64) -> bool {
        let index: HashMap<Displacement, usize> = self
            .displacements
            .iter()
            .enumerate()
            .map(|(i, &d)| (d, i))
            .collect();
        self.displacements.iter().enumerate().all(|(i, d)| {
            let Some(&j) = index.get(&[-d[0], -d[1], -d[2]]) else {
                return false;
            };
            let a = self.matrix(i);
            let b = self.matrix(j).adjoint();
            (a - b).iter().all(|z| z.norm() <= tol)
        })
    }
}

fn validate_square(matrices: &[DMatrix<Complex64>]) -> Result<usize, OperatorError> {
    let Some(first) = matrices.first() else {
        return Err(OperatorError::DimensionMismatch(
            "operator needs at least one displacement".to_string(),
        ));
    };
    let n = first.nrows();
    if n == 0 {
        return Err(OperatorError::DimensionMismatch(
            "matrices must have at least one orbital".to_string(),
        ));
    }
    for (idx, m) in matrices.iter().enumerate() {
        if m.nrows() != m.ncols() {
            return Err(OperatorError::DimensionMismatch(format!(
                "matrix {} is {}x{}, expected square",
                idx,
                m.nrows(),
                m.ncols()
            )));
        }
        if m.nrows() != n {
            return Err(OperatorError::DimensionMismatch(format!(
                "matrix {} has {} orbitals, expected {}",
                idx,
                m.nrows(),
                n
            )));
        }
    }
    Ok(n)
}

fn check_unique(displacements: &[Displacement]) -> Result<(), OperatorError> {
    let mut seen = std::collections::HashSet::with_capacity(displacements.len());
    for &d in displacements {
        if !seen.insert(d) {
            return Err(OperatorError::DuplicateDisplacement(d));
        }
    }
    Ok(())
}
