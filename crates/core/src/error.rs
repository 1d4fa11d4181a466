//! Error types for operator construction and eigensolves.

use std::fmt;

/// Errors raised while building or transforming lattice/reciprocal operators.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("duplicate lattice displacement {0:?}")]
    DuplicateDisplacement([i32; 3]),

    #[error("invalid integration weights: {0}")]
    InvalidWeights(String),
}

/// Which operand of the generalized eigenproblem an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    Hamiltonian,
    Overlap,
}

impl fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixKind::Hamiltonian => write!(f, "hamiltonian"),
            MatrixKind::Overlap => write!(f, "overlap"),
        }
    }
}

/// Failures of a single generalized eigensolve `H v = λ S v`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EigenError {
    #[error("shape error: {0}")]
    Shape(String),

    #[error("{matrix} matrix is not Hermitian (max deviation {deviation:.3e}, tolerance {tolerance:.3e})")]
    NonHermitian {
        matrix: MatrixKind,
        deviation: f64,
        tolerance: f64,
    },

    #[error("overlap matrix is singular or not positive definite: {0}")]
    SingularOverlap(String),

    #[error("shifted operator H - sigma*S is singular at sigma = {sigma}")]
    SingularShift { sigma: f64 },

    #[error("Lanczos did not converge after {iterations} iterations ({converged}/{requested} eigenpairs converged)")]
    Convergence {
        iterations: usize,
        converged: usize,
        requested: usize,
    },

    #[error("invalid solver request: {0}")]
    InvalidRequest(String),
}
