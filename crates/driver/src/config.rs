//! Options for a band diagonalization run.
//!
//! Options can be built in code or loaded from TOML:
//!
//! ```toml
//! bands_only = false
//! workers = 4
//! internal_threads = 1
//! hermitian_tol = 1e-8
//!
//! [solver]
//! mode = "sparse"
//! n_eigen = 4
//! which = "SA"
//! sigma = -2.5
//! tol = 1e-10
//! max_iter = 200
//! ```
//!
//! Every field is optional. Without a `[solver]` table the dense Cholesky
//! solver is used; when the table is present its `mode` key is required.

use std::path::Path;

use serde::{Deserialize, Serialize};

use tbbands_core::{EigenError, SolveSettings, SolverMode};

// ============================================================================
// Options
// ============================================================================

/// Everything [`crate::BandPipeline`] needs besides the operators and points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiagonalizeOptions {
    /// Solver family and its options.
    pub solver: SolverMode,

    /// Compute eigenvalues only.
    pub bands_only: bool,

    /// Number of k-points diagonalized concurrently.
    pub workers: usize,

    /// Threads each worker may spend inside one Bloch contraction.
    pub internal_threads: usize,

    /// Relative Hermiticity tolerance for `H_k` and `S_k`.
    pub hermitian_tol: f64,
}

impl Default for DiagonalizeOptions {
    fn default() -> Self {
        Self {
            solver: SolverMode::default(),
            bands_only: false,
            workers: 1,
            internal_threads: 1,
            hermitian_tol: SolveSettings::default().hermitian_tol,
        }
    }
}

impl DiagonalizeOptions {
    /// Load options from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate options from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let options: DiagonalizeOptions = toml::from_str(s)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidThreads(
                "workers must be at least 1".into(),
            ));
        }
        if self.internal_threads == 0 {
            return Err(ConfigError::InvalidThreads(
                "internal_threads must be at least 1".into(),
            ));
        }
        if !(self.hermitian_tol.is_finite() && self.hermitian_tol >= 0.0) {
            return Err(ConfigError::InvalidTolerance(format!(
                "hermitian_tol must be non-negative and finite, got {}",
                self.hermitian_tol
            )));
        }
        self.solver.validate().map_err(ConfigError::InvalidSolver)
    }

    /// Per-point solver settings.
    pub fn solve_settings(&self) -> SolveSettings {
        SolveSettings {
            mode: self.solver.clone(),
            bands_only: self.bands_only,
            hermitian_tol: self.hermitian_tol,
        }
    }

    /// Total threads the run may occupy.
    pub fn thread_demand(&self) -> usize {
        self.workers.saturating_mul(self.internal_threads)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Option loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid thread settings: {0}")]
    InvalidThreads(String),

    #[error("Invalid solver options: {0}")]
    InvalidSolver(#[source] EigenError),

    #[error("Invalid tolerance: {0}")]
    InvalidTolerance(String),
}

// ============================================================================
// Tests
// ============================================================================
