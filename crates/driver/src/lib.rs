//! tbbands driver - parallel band diagonalization over k-point batches.
//!
//! This crate turns a real-space Hamiltonian/overlap pair into band energies
//! (and optionally eigenvectors) on a batch of k-points. It handles:
//!
//! - **Model pairing**: `H(R)` and `S(R)` checked for matching dimensions
//! - **Thread budget**: a worker pool over k-points plus bounded per-worker
//!   threads for the Bloch contractions, resolved once per pipeline
//! - **Failure handling**: any failing k-point fails the batch, reported by
//!   its lowest index
//! - **Progress tracking**: optional terminal progress bar
//!
//! # Usage
//!
//! ```ignore
//! let options = DiagonalizeOptions::from_toml_str(&std::fs::read_to_string("run.toml")?)?;
//! let result = diagonalize(&hamiltonian, &overlap, &k_points, &options)?;
//! let lowest_band = result.band(0);
//! ```

pub mod budget;
pub mod config;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod result;

pub use budget::ThreadBudget;
pub use config::{ConfigError, DiagonalizeOptions};
pub use model::{BandModel, InstantaneousPair};
pub use pipeline::{diagonalize, BandPipeline, DiagonalizeError};
pub use progress::{BarProgress, NullProgress, ProgressSink};
pub use result::{BatchResult, EigenvectorStack};
