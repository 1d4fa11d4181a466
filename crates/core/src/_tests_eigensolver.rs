#![cfg(test)]

use nalgebra::DMatrix;
use num_complex::Complex64;

use super::bloch::Parallelism;
use super::eigensolver::{
    solve, DenseDriver, DenseOptions, EigenPairs, SolveSettings, SolverMode, SparseOptions, Which,
};
use super::error::{EigenError, MatrixKind};
use super::lattice::LatticeOperator;

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

/// Hermitian `H` and well-conditioned positive-definite `S` of size `n`.
fn generalized_pair(n: usize) -> (DMatrix<Complex64>, DMatrix<Complex64>) {
    let a = DMatrix::from_fn(n, n, |i, j| {
        c(
            ((i * 7 + j * 3) % 5) as f64 * 0.3 - 0.5,
            ((i + 2 * j) % 3) as f64 * 0.2 - 0.2,
        )
    });
    let h = (&a + a.adjoint()) * c(0.5, 0.0);
    let b = DMatrix::from_fn(n, n, |i, j| c(0.1 * ((i + j) % 3) as f64, 0.05 * ((i * j) % 2) as f64));
    let s = DMatrix::<Complex64>::identity(n, n) + &b * b.adjoint();
    (h, s)
}

fn dense(driver: DenseDriver) -> SolveSettings {
    SolveSettings {
        mode: SolverMode::Dense(DenseOptions {
            driver,
            ..DenseOptions::default()
        }),
        ..SolveSettings::default()
    }
}

fn sparse(opts: SparseOptions) -> SolveSettings {
    SolveSettings {
        mode: SolverMode::Sparse(opts),
        ..SolveSettings::default()
    }
}

fn assert_ascending(values: &[f64]) {
    for pair in values.windows(2) {
        assert!(pair[0] <= pair[1], "eigenvalues not ascending: {values:?}");
    }
}

fn assert_eigenpairs(h: &DMatrix<Complex64>, s: &DMatrix<Complex64>, pairs: &EigenPairs, tol: f64) {
    let vectors = pairs.vectors.as_ref().expect("eigenvectors requested");
    assert_eq!(vectors.ncols(), pairs.values.len());
    for (i, &lambda) in pairs.values.iter().enumerate() {
        let v = vectors.column(i).clone_owned();
        let residual = h * &v - (s * &v) * c(lambda, 0.0);
        assert!(
            residual.norm() < tol,
            "residual {:.3e} for eigenvalue {lambda}",
            residual.norm()
        );
        let s_norm = v.dotc(&(s * &v)).re;
        assert!((s_norm - 1.0).abs() < tol, "eigenvector {i} not S-normalized");
    }
}

#[test]
fn chain_eigenvalues_at_gamma_and_zone_boundary() {
    let scalar = |v: f64| DMatrix::from_element(1, 1, v);
    let displacements = vec![[-1, 0, 0], [0, 0, 0], [1, 0, 0]];
    let h = LatticeOperator::from_real(
        displacements.clone(),
        vec![scalar(-1.0), scalar(0.0), scalar(-1.0)],
    )
    .expect("hamiltonian");
    let s = LatticeOperator::from_real(displacements, vec![scalar(0.0), scalar(1.0), scalar(0.0)])
        .expect("overlap");

    for (k, expected) in [(0.0, -2.0), (0.5, 2.0)] {
        let hk = h.transform_one([k, 0.0, 0.0], Parallelism::Serial);
        let sk = s.transform_one([k, 0.0, 0.0], Parallelism::Serial);
        let pairs = solve(&hk, &sk, &SolveSettings::default()).expect("solve");
        assert_eq!(pairs.values.len(), 1);
        assert!((pairs.values[0] - expected).abs() < 1e-12);
    }
}

#[test]
fn dense_cholesky_gives_sorted_generalized_eigenpairs() {
    let (h, s) = generalized_pair(5);
    let pairs = solve(&h, &s, &dense(DenseDriver::Cholesky)).expect("solve");
    assert_eq!(pairs.values.len(), 5);
    assert_ascending(&pairs.values);
    assert_eigenpairs(&h, &s, &pairs, 1e-10);
}

#[test]
fn dense_lowdin_matches_cholesky() {
    let (h, s) = generalized_pair(5);
    let chol = solve(&h, &s, &dense(DenseDriver::Cholesky)).expect("cholesky");
    let lowdin = solve(&h, &s, &dense(DenseDriver::Lowdin)).expect("lowdin");
    assert_eigenpairs(&h, &s, &lowdin, 1e-10);
    for (a, b) in chol.values.iter().zip(&lowdin.values) {
        assert!((a - b).abs() < 1e-10);
    }
}

#[test]
fn bands_only_skips_eigenvectors() {
    let (h, s) = generalized_pair(4);
    let mut settings = dense(DenseDriver::Cholesky);
    let full = solve(&h, &s, &settings).expect("full");
    settings.bands_only = true;
    let bands = solve(&h, &s, &settings).expect("bands");
    assert!(bands.vectors.is_none());
    assert_ascending(&bands.values);
    for (a, b) in full.values.iter().zip(&bands.values) {
        assert!((a - b).abs() < 1e-10);
    }
}

#[test]
fn non_hermitian_hamiltonian_is_rejected() {
    let (mut h, s) = generalized_pair(3);
    h[(0, 1)] += c(0.5, 0.0);
    let err = solve(&h, &s, &SolveSettings::default()).unwrap_err();
    assert!(matches!(
        err,
        EigenError::NonHermitian {
            matrix: MatrixKind::Hamiltonian,
            ..
        }
    ));
}

#[test]
fn non_hermitian_overlap_is_rejected() {
    let (h, mut s) = generalized_pair(3);
    s[(2, 0)] = c(0.0, 0.3);
    let err = solve(&h, &s, &SolveSettings::default()).unwrap_err();
    assert!(matches!(
        err,
        EigenError::NonHermitian {
            matrix: MatrixKind::Overlap,
            ..
        }
    ));
}

#[test]
fn mismatched_shapes_are_rejected() {
    let (h, _) = generalized_pair(3);
    let s = DMatrix::<Complex64>::identity(2, 2);
    let err = solve(&h, &s, &SolveSettings::default()).unwrap_err();
    assert!(matches!(err, EigenError::Shape(_)));
}

#[test]
fn singular_overlap_is_rejected_by_every_solver() {
    let h = DMatrix::from_diagonal_element(2, 2, c(1.0, 0.0));
    let s = DMatrix::from_element(2, 2, c(1.0, 0.0));
    for settings in [
        dense(DenseDriver::Cholesky),
        dense(DenseDriver::Lowdin),
        sparse(SparseOptions {
            n_eigen: 1,
            ..SparseOptions::default()
        }),
    ] {
        let err = solve(&h, &s, &settings).unwrap_err();
        assert!(
            matches!(err, EigenError::SingularOverlap(_)),
            "unexpected error {err:?}"
        );
    }
}

#[test]
fn uniformly_tiny_overlap_is_rejected_by_every_solver() {
    let cases = [
        (
            DMatrix::from_element(1, 1, c(2.0, 0.0)),
            DMatrix::from_element(1, 1, c(1e-17, 0.0)),
        ),
        (
            DMatrix::<Complex64>::identity(2, 2),
            DMatrix::<Complex64>::identity(2, 2) * c(1e-15, 0.0),
        ),
    ];
    for (h, s) in &cases {
        for settings in [
            dense(DenseDriver::Cholesky),
            dense(DenseDriver::Lowdin),
            sparse(SparseOptions {
                n_eigen: 1,
                ..SparseOptions::default()
            }),
        ] {
            let err = solve(h, s, &settings).unwrap_err();
            assert!(
                matches!(err, EigenError::SingularOverlap(_)),
                "n = {}: unexpected error {err:?}",
                h.nrows()
            );
        }
    }
}

#[test]
fn small_but_regular_overlap_is_accepted() {
    let h = DMatrix::from_element(1, 1, c(2.0, 0.0));
    let s = DMatrix::from_element(1, 1, c(1e-3, 0.0));
    let pairs = solve(&h, &s, &SolveSettings::default()).expect("solve");
    assert!((pairs.values[0] - 2e3).abs() < 1e-9);
}

#[test]
fn sparse_full_spectrum_agrees_with_dense() {
    let (h, s) = generalized_pair(6);
    let dense_pairs = solve(&h, &s, &dense(DenseDriver::Cholesky)).expect("dense");
    let sparse_pairs = solve(
        &h,
        &s,
        &sparse(SparseOptions {
            n_eigen: 6,
            which: Which::SmallestAlgebraic,
            ..SparseOptions::default()
        }),
    )
    .expect("sparse");
    assert_ascending(&sparse_pairs.values);
    for (a, b) in dense_pairs.values.iter().zip(&sparse_pairs.values) {
        assert!((a - b).abs() < 1e-8, "dense {a} vs sparse {b}");
    }
    assert_eigenpairs(&h, &s, &sparse_pairs, 1e-8);
}

#[test]
fn shift_invert_finds_eigenvalues_nearest_the_shift() {
    let (h, s) = generalized_pair(6);
    let spectrum = solve(&h, &s, &dense(DenseDriver::Cholesky)).expect("dense").values;
    let sigma = spectrum[2] + 0.1 * (spectrum[3] - spectrum[2]);

    let mut nearest = spectrum.clone();
    nearest.sort_by(|a, b| (a - sigma).abs().total_cmp(&(b - sigma).abs()));
    nearest.truncate(2);
    nearest.sort_by(f64::total_cmp);

    let pairs = solve(
        &h,
        &s,
        &sparse(SparseOptions {
            n_eigen: 2,
            which: Which::LargestMagnitude,
            sigma: Some(sigma),
            ..SparseOptions::default()
        }),
    )
    .expect("shift-invert");
    assert_ascending(&pairs.values);
    for (a, b) in nearest.iter().zip(&pairs.values) {
        assert!((a - b).abs() < 1e-6, "expected {a}, got {b}");
    }
    assert_eigenpairs(&h, &s, &pairs, 1e-6);
}

#[test]
fn sparse_bands_only_is_sorted() {
    let (h, s) = generalized_pair(5);
    let mut settings = sparse(SparseOptions {
        n_eigen: 5,
        which: Which::LargestAlgebraic,
        ..SparseOptions::default()
    });
    settings.bands_only = true;
    let pairs = solve(&h, &s, &settings).expect("sparse");
    assert!(pairs.vectors.is_none());
    assert_eq!(pairs.values.len(), 5);
    assert_ascending(&pairs.values);
}

#[test]
fn degenerate_spectrum_is_recovered_through_restarts() {
    let h = DMatrix::<Complex64>::identity(4, 4) * c(1.5, 0.0);
    let s = DMatrix::<Complex64>::identity(4, 4);
    let pairs = solve(
        &h,
        &s,
        &sparse(SparseOptions {
            n_eigen: 4,
            which: Which::SmallestAlgebraic,
            ..SparseOptions::default()
        }),
    )
    .expect("sparse");
    assert_eq!(pairs.values.len(), 4);
    for value in &pairs.values {
        assert!((value - 1.5).abs() < 1e-12);
    }
    assert_eigenpairs(&h, &s, &pairs, 1e-10);
}

#[test]
fn partial_request_keeps_repeated_eigenvalues() {
    let diagonal = |values: &[f64]| {
        DMatrix::from_diagonal(&nalgebra::DVector::from_iterator(
            values.len(),
            values.iter().map(|&v| c(v, 0.0)),
        ))
    };
    let s = DMatrix::<Complex64>::identity(6, 6);

    // shift just below a doubly degenerate lowest level
    let h = diagonal(&[0.0, 0.0, 1.0, 2.0, 3.0, 4.0]);
    let pairs = solve(
        &h,
        &s,
        &sparse(SparseOptions {
            n_eigen: 2,
            which: Which::LargestMagnitude,
            sigma: Some(-0.5),
            ..SparseOptions::default()
        }),
    )
    .expect("shift-invert");
    assert_eq!(pairs.values.len(), 2);
    for value in &pairs.values {
        assert!(value.abs() < 1e-8, "expected 0, got {value}");
    }
    assert_eigenpairs(&h, &s, &pairs, 1e-8);

    let h = diagonal(&[3.0, -1.0, 0.5, -1.0, 2.0, 5.0]);
    let pairs = solve(
        &h,
        &s,
        &sparse(SparseOptions {
            n_eigen: 2,
            which: Which::SmallestAlgebraic,
            ..SparseOptions::default()
        }),
    )
    .expect("regular");
    for value in &pairs.values {
        assert!((value + 1.0).abs() < 1e-8, "expected -1, got {value}");
    }
    assert_eigenpairs(&h, &s, &pairs, 1e-8);
}

#[test]
fn exhausted_iteration_budget_reports_convergence_failure() {
    let (h, s) = generalized_pair(6);
    let err = solve(
        &h,
        &s,
        &sparse(SparseOptions {
            n_eigen: 3,
            max_iter: Some(1),
            ..SparseOptions::default()
        }),
    )
    .unwrap_err();
    assert_eq!(
        err,
        EigenError::Convergence {
            iterations: 1,
            converged: 0,
            requested: 3
        }
    );
}

#[test]
fn shift_on_an_eigenvalue_is_singular() {
    let h = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![
        c(1.0, 0.0),
        c(2.0, 0.0),
        c(3.0, 0.0),
    ]));
    let s = DMatrix::<Complex64>::identity(3, 3);
    let err = solve(
        &h,
        &s,
        &sparse(SparseOptions {
            n_eigen: 1,
            sigma: Some(2.0),
            ..SparseOptions::default()
        }),
    )
    .unwrap_err();
    assert_eq!(err, EigenError::SingularShift { sigma: 2.0 });
}

#[test]
fn too_many_requested_pairs_is_invalid() {
    let (h, s) = generalized_pair(3);
    let err = solve(
        &h,
        &s,
        &sparse(SparseOptions {
            n_eigen: 4,
            ..SparseOptions::default()
        }),
    )
    .unwrap_err();
    assert!(matches!(err, EigenError::InvalidRequest(_)));
}

#[test]
fn solver_mode_reports_eigen_count() {
    assert_eq!(SolverMode::default().eigen_count(7), 7);
    let mode = SolverMode::Sparse(SparseOptions {
        n_eigen: 3,
        ..SparseOptions::default()
    });
    assert_eq!(mode.eigen_count(7), 3);
    assert_eq!(mode.name(), "sparse");
}
