//! Parallel band diagonalization over a batch of k-points.
//!
//! Each k-point is an independent unit: Bloch-transform `H` and `S`, then
//! solve `H_k v = λ S_k v`. Units fan out on the worker pool of the
//! [`ThreadBudget`] and write into a pre-sized slot for their index, so the
//! result order is the input order whatever the scheduling.
//!
//! A failing unit fails the whole batch. Units past the lowest failing index
//! seen so far are skipped, and the error returned is always the one from the
//! lowest failing index, so the outcome does not depend on the worker count.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rayon::prelude::*;

use tbbands_core::{
    solve, EigenError, EigenPairs, LatticeOperator, OperatorError, SolveSettings, SolverMode,
};

use crate::budget::ThreadBudget;
use crate::config::{ConfigError, DiagonalizeOptions};
use crate::model::BandModel;
use crate::progress::{NullProgress, ProgressSink};
use crate::result::{check_eigencount, BatchResult};

// ============================================================================
// Pipeline
// ============================================================================

pub struct BandPipeline {
    options: DiagonalizeOptions,
    settings: SolveSettings,
    budget: ThreadBudget,
}

impl BandPipeline {
    /// Validate `options` and build the thread pools.
    pub fn new(options: DiagonalizeOptions) -> Result<Self, DiagonalizeError> {
        options.validate()?;
        let budget = ThreadBudget::resolve(options.workers, options.internal_threads)?;
        let settings = options.solve_settings();
        Ok(Self {
            options,
            settings,
            budget,
        })
    }

    pub fn options(&self) -> &DiagonalizeOptions {
        &self.options
    }

    pub fn budget(&self) -> &ThreadBudget {
        &self.budget
    }

    /// Diagonalize `model` at every point of `points`.
    pub fn run(
        &self,
        model: &BandModel<'_>,
        points: &[[f64; 3]],
        progress: &dyn ProgressSink,
    ) -> Result<BatchResult, DiagonalizeError> {
        let n_orbitals = model.n_orbitals();
        if let SolverMode::Sparse(sparse) = &self.settings.mode {
            sparse
                .validate_for(n_orbitals)
                .map_err(|e| DiagonalizeError::Config(ConfigError::InvalidSolver(e)))?;
        }
        let n_eigen = self.settings.mode.eigen_count(n_orbitals);
        let with_vectors = !self.settings.bands_only;

        if points.is_empty() {
            warn!("empty k-point batch; returning {}x0 eigenvalues", n_eigen);
            return BatchResult::assemble(n_orbitals, n_eigen, Vec::new(), with_vectors);
        }

        debug!(
            "diagonalizing {} k-points ({} solver, N_b={}, N_e={}, {} workers)",
            points.len(),
            self.settings.mode.name(),
            n_orbitals,
            n_eigen,
            self.budget.workers()
        );

        let start_time = Instant::now();
        progress.start(points.len());
        let outcome = match self.budget.outer() {
            None => self.run_sequential(model, points, n_eigen, progress),
            Some(pool) => pool.install(|| self.run_parallel(model, points, n_eigen, progress)),
        };
        progress.finish();

        let per_point = outcome.map_err(|e| {
            error!("batch of {} k-points failed: {}", points.len(), e);
            e
        })?;
        let result = BatchResult::assemble(n_orbitals, n_eigen, per_point, with_vectors)?;

        info!(
            "diagonalized {} k-points in {:.3}s",
            points.len(),
            start_time.elapsed().as_secs_f64()
        );
        Ok(result)
    }

    fn run_sequential(
        &self,
        model: &BandModel<'_>,
        points: &[[f64; 3]],
        n_eigen: usize,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<EigenPairs>, DiagonalizeError> {
        let mut out = Vec::with_capacity(points.len());
        for (index, &point) in points.iter().enumerate() {
            out.push(self.solve_point(model, index, point, n_eigen)?);
            progress.advance();
        }
        Ok(out)
    }

    fn run_parallel(
        &self,
        model: &BandModel<'_>,
        points: &[[f64; 3]],
        n_eigen: usize,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<EigenPairs>, DiagonalizeError> {
        let mut slots: Vec<Option<EigenPairs>> = vec![None; points.len()];
        let first_failure = AtomicUsize::new(usize::MAX);
        let failures: Mutex<Vec<DiagonalizeError>> = Mutex::new(Vec::new());

        slots
            .par_iter_mut()
            .zip(points.par_iter())
            .enumerate()
            .for_each(|(index, (slot, &point))| {
                if index > first_failure.load(Ordering::Acquire) {
                    return;
                }
                match self.solve_point(model, index, point, n_eigen) {
                    Ok(pairs) => {
                        *slot = Some(pairs);
                        progress.advance();
                    }
                    Err(e) => {
                        first_failure.fetch_min(index, Ordering::AcqRel);
                        failures.lock().push(e);
                    }
                }
            });

        let first = first_failure.into_inner();
        if first != usize::MAX {
            let mut failures = failures.into_inner();
            let pos = failures
                .iter()
                .position(|e| e.point_index() == Some(first))
                .unwrap_or(0);
            return Err(failures.swap_remove(pos));
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or(DiagonalizeError::InconsistentEigencount {
                    index,
                    expected: n_eigen,
                    found: 0,
                })
            })
            .collect()
    }

    fn solve_point(
        &self,
        model: &BandModel<'_>,
        index: usize,
        point: [f64; 3],
        n_eigen: usize,
    ) -> Result<EigenPairs, DiagonalizeError> {
        let (s_k, h_k) = model.instantaneous_pair(point, self.budget.parallelism());
        let pairs = solve(&h_k, &s_k, &self.settings).map_err(|source| {
            error!("k-point {} {:?} failed: {}", index, point, source);
            DiagonalizeError::Point { index, source }
        })?;
        check_eigencount(index, n_eigen, &pairs)?;
        Ok(pairs)
    }
}

impl std::fmt::Debug for BandPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BandPipeline")
            .field("options", &self.options)
            .field("budget", &self.budget)
            .finish()
    }
}

/// Diagonalize the model `(hamiltonian, overlap)` at every point.
///
/// Builds a one-off [`BandPipeline`]; reuse a pipeline to keep its thread
/// pools across batches.
pub fn diagonalize(
    hamiltonian: &LatticeOperator,
    overlap: &LatticeOperator,
    points: &[[f64; 3]],
    options: &DiagonalizeOptions,
) -> Result<BatchResult, DiagonalizeError> {
    let model = BandModel::new(hamiltonian, overlap)?;
    let pipeline = BandPipeline::new(options.clone())?;
    pipeline.run(&model, points, &NullProgress)
}

// ============================================================================
// Errors
// ============================================================================

/// Batch-level failures.
#[derive(Debug, thiserror::Error)]
pub enum DiagonalizeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("operator error: {0}")]
    Operator(#[from] OperatorError),

    #[error("k-point {index} failed: {source}")]
    Point {
        index: usize,
        #[source]
        source: EigenError,
    },

    #[error("k-point {index} returned {found} eigenpairs, expected {expected}")]
    InconsistentEigencount {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("failed to create thread pool: {0}")]
    ThreadPool(String),
}

impl DiagonalizeError {
    /// Index of the failing k-point, for per-point failures.
    pub fn point_index(&self) -> Option<usize> {
        match self {
            DiagonalizeError::Point { index, .. }
            | DiagonalizeError::InconsistentEigencount { index, .. } => Some(*index),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
