//! Bloch-sum kernel shared by the forward and inverse transforms.
//!
//! Both directions are the same contraction
//!
//! ```text
//! out[t] = Σ_s w_s · exp(sign · i·2π · targets[t]·sources[s]) · M[s]
//! ```
//!
//! with `targets`/`sources` swapped between directions:
//!
//! - **forward** (real → reciprocal): targets are k-points, sources are lattice
//!   displacements, `sign = +1`, no weights.
//! - **inverse** (reciprocal → real): targets are displacements, sources are
//!   k-points, `sign = -1`, quadrature weights on the sources.
//!
//! The source matrices are held as a single `N_s × N_b²` block (each matrix
//! flattened row-major), so one GEMM `Φ · M` produces every target at once.

use std::f64::consts::PI;

use nalgebra::DMatrix;
use num_complex::Complex64;
use rayon::prelude::*;
use rayon::ThreadPool;

/// Minimum number of output columns handed to a single task when the
/// contraction runs on a thread pool.
const MIN_COLUMNS_PER_TASK: usize = 64;

/// Sign of the phase in the Bloch sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseSign {
    /// `exp(+i·2π·k·R)`, real space → reciprocal space.
    Forward,
    /// `exp(-i·2π·R·k)`, reciprocal space → real space.
    Inverse,
}

impl PhaseSign {
    fn factor(self) -> f64 {
        match self {
            PhaseSign::Forward => 1.0,
            PhaseSign::Inverse => -1.0,
        }
    }
}

/// Where the contraction may spend threads.
#[derive(Clone, Copy, Default)]
pub enum Parallelism<'a> {
    /// Run on the calling thread only.
    #[default]
    Serial,
    /// Split output columns across the given pool.
    Pool(&'a ThreadPool),
}

impl std::fmt::Debug for Parallelism<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Parallelism::Serial => write!(f, "Serial"),
            Parallelism::Pool(pool) => write!(f, "Pool({} threads)", pool.current_num_threads()),
        }
    }
}

/// Widen an integer lattice displacement to reduced real coordinates.
pub fn displacement_coords(d: [i32; 3]) -> [f64; 3] {
    [d[0] as f64, d[1] as f64, d[2] as f64]
}

/// Build `Φ[t, s] = w_s · exp(sign · i·2π · targets[t]·sources[s])`.
///
/// The dot product is reduced modulo 1 before scaling by 2π, so large
/// displacements do not lose phase accuracy.
pub fn phase_matrix(
    targets: &[[f64; 3]],
    sources: &[[f64; 3]],
    sign: PhaseSign,
    weights: Option<&[f64]>,
) -> DMatrix<Complex64> {
    let s = sign.factor();
    DMatrix::from_fn(targets.len(), sources.len(), |t, j| {
        let a = targets[t];
        let b = sources[j];
        let dot = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
        let angle = s * 2.0 * PI * dot.rem_euclid(1.0);
        let w = weights.map_or(1.0, |w| w[j]);
        Complex64::from_polar(w, angle)
    })
}

/// Contract a block of flattened source matrices into the target index set.
///
/// `source_block` has one row per source and `N_b²` columns. The result has
/// one row per target; use [`unflatten_row`] to recover each square matrix.
///
/// Weights scale the phase columns, which is the same as pre-scaling each
/// source matrix by its weight.
pub fn contract(
    targets: &[[f64; 3]],
    sources: &[[f64; 3]],
    source_block: &DMatrix<Complex64>,
    sign: PhaseSign,
    weights: Option<&[f64]>,
    parallelism: Parallelism<'_>,
) -> DMatrix<Complex64> {
    debug_assert_eq!(source_block.nrows(), sources.len());
    debug_assert!(weights.map_or(true, |w| w.len() == sources.len()));

    let phase = phase_matrix(targets, sources, sign, weights);
    match parallelism {
        Parallelism::Serial => &phase * source_block,
        Parallelism::Pool(pool) => contract_on_pool(&phase, source_block, pool),
    }
}

fn contract_on_pool(
    phase: &DMatrix<Complex64>,
    source_block: &DMatrix<Complex64>,
    pool: &ThreadPool,
) -> DMatrix<Complex64> {
    let ncols = source_block.ncols();
    let threads = pool.current_num_threads().max(1);
    let chunk = ncols.div_ceil(threads).max(MIN_COLUMNS_PER_TASK);
    if threads == 1 || chunk >= ncols {
        return phase * source_block;
    }

    let ranges: Vec<(usize, usize)> = (0..ncols)
        .step_by(chunk)
        .map(|start| (start, chunk.min(ncols - start)))
        .collect();

    let pieces: Vec<DMatrix<Complex64>> = pool.install(|| {
        ranges
            .par_iter()
            .map(|&(start, len)| phase * source_block.columns(start, len))
            .collect()
    });

    let mut out = DMatrix::<Complex64>::zeros(phase.nrows(), ncols);
    for (&(start, len), piece) in ranges.iter().zip(pieces) {
        out.columns_mut(start, len).copy_from(&piece);
    }
    out
}

/// Flatten a square matrix row-major into row `row` of `block`.
pub fn flatten_into(block: &mut DMatrix<Complex64>, row: usize, matrix: &DMatrix<Complex64>) {
    let n = matrix.nrows();
    for i in 0..n {
        for j in 0..n {
            block[(row, i * n + j)] = matrix[(i, j)];
        }
    }
}

/// Rebuild the `n × n` matrix stored row-major in row `row` of `block`.
pub fn unflatten_row(block: &DMatrix<Complex64>, row: usize, n: usize) -> DMatrix<Complex64> {
    DMatrix::from_fn(n, n, |i, j| block[(row, i * n + j)])
}

/// Split every row of a contracted block back into square matrices.
pub fn unflatten_all(block: &DMatrix<Complex64>, n: usize) -> Vec<DMatrix<Complex64>> {
    (0..block.nrows()).map(|row| unflatten_row(block, row, n)).collect()
}
