//! Core math for tight-binding band structures: Bloch transforms between
//! real-space and reciprocal-space operators, and generalized eigensolvers.

pub mod bloch;
pub mod eigensolver;
pub mod error;
pub mod lattice;
pub mod reciprocal;

pub use bloch::{Parallelism, PhaseSign};
pub use eigensolver::{
    solve, DenseDriver, DenseOptions, EigenPairs, SolveSettings, SolverMode, SparseOptions, Which,
};
pub use error::{EigenError, MatrixKind, OperatorError};
pub use lattice::{Displacement, LatticeOperator};
pub use reciprocal::ReciprocalOperator;

#[cfg(test)]
mod _tests_bloch;
#[cfg(test)]
mod _tests_eigensolver;
