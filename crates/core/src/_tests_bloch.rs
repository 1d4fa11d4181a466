#![cfg(test)]

use nalgebra::DMatrix;
use num_complex::Complex64;

use super::bloch::{phase_matrix, Parallelism, PhaseSign};
use super::eigensolver::hermitian_deviation;
use super::lattice::LatticeOperator;

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn scalar(value: f64) -> DMatrix<f64> {
    DMatrix::from_element(1, 1, value)
}

fn chain() -> (LatticeOperator, LatticeOperator) {
    let displacements = vec![[-1, 0, 0], [0, 0, 0], [1, 0, 0]];
    let h = LatticeOperator::from_real(
        displacements.clone(),
        vec![scalar(-1.0), scalar(0.0), scalar(-1.0)],
    )
    .expect("hamiltonian");
    let s = LatticeOperator::from_real(displacements, vec![scalar(0.0), scalar(1.0), scalar(0.0)])
        .expect("overlap");
    (h, s)
}

/// Square-lattice model with complex hoppings obeying
/// `M(R) = M(-R)^H`.
fn hermitian_square_model(n_orbitals: usize) -> LatticeOperator {
    let onsite = DMatrix::from_fn(n_orbitals, n_orbitals, |i, j| {
        if i == j {
            c(0.5 * i as f64, 0.0)
        } else if i < j {
            c(0.1, 0.05 * (j - i) as f64)
        } else {
            c(0.1, -0.05 * (i - j) as f64)
        }
    });
    let hop_x = DMatrix::from_fn(n_orbitals, n_orbitals, |i, j| {
        c(-0.3 + 0.01 * (i + 2 * j) as f64, 0.02 * i as f64 - 0.03 * j as f64)
    });
    let hop_y = DMatrix::from_fn(n_orbitals, n_orbitals, |i, j| {
        c(0.07 * ((i * 3 + j) % 4) as f64, -0.04 * ((i + j) % 3) as f64)
    });
    LatticeOperator::new(
        vec![[0, 0, 0], [1, 0, 0], [-1, 0, 0], [0, 1, 0], [0, -1, 0]],
        vec![
            onsite,
            hop_x.clone(),
            hop_x.adjoint(),
            hop_y.clone(),
            hop_y.adjoint(),
        ],
    )
    .expect("square model")
}

#[test]
fn chain_at_gamma_gives_band_bottom() {
    let (h, s) = chain();
    let hk = h.transform_one([0.0, 0.0, 0.0], Parallelism::Serial);
    let sk = s.transform_one([0.0, 0.0, 0.0], Parallelism::Serial);
    assert!((hk[(0, 0)] - c(-2.0, 0.0)).norm() < 1e-12);
    assert!((sk[(0, 0)] - c(1.0, 0.0)).norm() < 1e-12);
}

#[test]
fn chain_at_zone_boundary_gives_band_top() {
    let (h, s) = chain();
    let hk = h.transform_one([0.5, 0.0, 0.0], Parallelism::Serial);
    let sk = s.transform_one([0.5, 0.0, 0.0], Parallelism::Serial);
    assert!((hk[(0, 0)] - c(2.0, 0.0)).norm() < 1e-12);
    assert!((sk[(0, 0)] - c(1.0, 0.0)).norm() < 1e-12);
}

#[test]
fn chain_follows_cosine_dispersion() {
    let (h, _) = chain();
    let points: Vec<[f64; 3]> = (0..8).map(|i| [i as f64 / 8.0, 0.3, -0.1]).collect();
    let mats = h.transform_batch(&points, Parallelism::Serial);
    for (point, m) in points.iter().zip(&mats) {
        let expected = -2.0 * (2.0 * std::f64::consts::PI * point[0]).cos();
        assert!((m[(0, 0)].re - expected).abs() < 1e-12);
        assert!(m[(0, 0)].im.abs() < 1e-12);
    }
}

#[test]
fn phase_matrix_entries_follow_sign_convention() {
    let targets = [[0.25, 0.0, 0.0]];
    let sources = [[1.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
    let forward = phase_matrix(&targets, &sources, PhaseSign::Forward, None);
    let inverse = phase_matrix(&targets, &sources, PhaseSign::Inverse, None);
    assert!((forward[(0, 0)] - c(0.0, 1.0)).norm() < 1e-12);
    assert!((inverse[(0, 0)] - c(0.0, -1.0)).norm() < 1e-12);
    assert!((forward[(0, 1)] - c(1.0, 0.0)).norm() < 1e-12);
}

#[test]
fn phase_matrix_applies_weights_per_source() {
    let targets = [[0.0, 0.0, 0.0]];
    let sources = [[1.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
    let phase = phase_matrix(&targets, &sources, PhaseSign::Inverse, Some(&[0.25, 0.75][..]));
    assert!((phase[(0, 0)] - c(0.25, 0.0)).norm() < 1e-12);
    assert!((phase[(0, 1)] - c(0.75, 0.0)).norm() < 1e-12);
}

#[test]
fn large_displacements_keep_phase_accuracy() {
    let targets = [[0.5, 0.0, 0.0]];
    let sources = [[1_000_001.0, 0.0, 0.0]];
    let phase = phase_matrix(&targets, &sources, PhaseSign::Forward, None);
    assert!((phase[(0, 0)] - c(-1.0, 0.0)).norm() < 1e-12);
}

#[test]
fn hermitian_lattice_symmetry_gives_hermitian_bloch_matrices() {
    let op = hermitian_square_model(3);
    assert!(op.is_hermitian_symmetric(1e-14));
    let points = [
        [0.0, 0.0, 0.0],
        [0.13, 0.0, 0.0],
        [0.5, 0.5, 0.0],
        [0.21, -0.37, 0.4],
        [0.9, 0.33, 0.0],
    ];
    for m in op.transform_batch(&points, Parallelism::Serial) {
        assert!(hermitian_deviation(&m) < 1e-12);
    }
}

#[test]
fn transform_one_matches_batch_row() {
    let op = hermitian_square_model(2);
    let points = [[0.1, 0.2, 0.0], [0.4, -0.3, 0.0]];
    let batch = op.transform_batch(&points, Parallelism::Serial);
    let single = op.transform_one(points[1], Parallelism::Serial);
    assert!((&batch[1] - &single).norm() < 1e-12);
}

#[test]
fn empty_point_batch_gives_no_matrices() {
    let op = hermitian_square_model(2);
    assert!(op.transform_batch(&[], Parallelism::Serial).is_empty());
}

#[test]
fn pooled_contraction_matches_serial() {
    let op = hermitian_square_model(12);
    let points = [[0.1, 0.2, 0.0], [0.35, -0.15, 0.0], [0.5, 0.0, 0.0]];
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(3)
        .build()
        .expect("pool");
    let serial = op.transform_batch(&points, Parallelism::Serial);
    let pooled = op.transform_batch(&points, Parallelism::Pool(&pool));
    for (a, b) in serial.iter().zip(&pooled) {
        assert!((a - b).norm() < 1e-12);
    }
}
