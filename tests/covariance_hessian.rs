use gphess::{ArdSquaredExponential, CovarianceError, CovarianceFunction, CrossInput};
use ndarray::{Array1, Array2, array};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_inputs(rng: &mut StdRng, n: usize, p: usize) -> Array2<f64> {
    Array2::from_shape_fn((n, p), |_| rng.gen_range(-2.0..2.0))
}

fn assert_close(a: &Array2<f64>, b: &Array2<f64>, tol: f64) {
    assert_eq!(a.dim(), b.dim());
    for ((idx, x), y) in a.indexed_iter().zip(b.iter()) {
        let scale = 1.0_f64.max(x.abs()).max(y.abs());
        assert!(
            (x - y).abs() <= tol * scale,
            "entry {idx:?}: {x} vs {y} (tolerance {tol})"
        );
    }
}

#[test]
fn hessian_is_symmetric_in_its_indices() {
    let mut rng = StdRng::seed_from_u64(7);
    let x = random_inputs(&mut rng, 6, 3);
    let hyp = array![0.1, -0.4, 0.3, 0.2];
    let mut cov = ArdSquaredExponential::new();
    cov.begin_sweep(hyp.view(), x.view(), CrossInput::Training)
        .unwrap();
    for i in 0..4 {
        for j in 0..4 {
            let hij = cov
                .hessian(hyp.view(), x.view(), CrossInput::Training, i, j)
                .unwrap();
            let hji = cov
                .hessian(hyp.view(), x.view(), CrossInput::Training, j, i)
                .unwrap();
            assert_eq!(hij, hji, "pair ({i}, {j})");
        }
    }
}

#[test]
fn output_scale_entries_are_twice_the_gradient() {
    let mut rng = StdRng::seed_from_u64(11);
    let x = random_inputs(&mut rng, 5, 2);
    let hyp = array![-0.2, 0.5, 0.1];
    let mut cov = ArdSquaredExponential::new();
    cov.begin_sweep(hyp.view(), x.view(), CrossInput::Training)
        .unwrap();
    let p = 2;
    for i in 0..=p {
        let expected = cov
            .gradient(hyp.view(), x.view(), CrossInput::Training, i)
            .unwrap()
            * 2.0;
        let got = cov
            .hessian(hyp.view(), x.view(), CrossInput::Training, i, p)
            .unwrap();
        assert_eq!(got, expected, "pair ({i}, {p})");
    }
    // The pure output-scale entry is 4K.
    let k = cov
        .evaluate(hyp.view(), x.view(), CrossInput::Training)
        .unwrap();
    let hpp = cov
        .hessian(hyp.view(), x.view(), CrossInput::Training, p, p)
        .unwrap();
    assert_close(&hpp, &(k * 4.0), 1e-14);
}

#[test]
fn hessian_matches_finite_differences_of_the_gradient() {
    let mut rng = StdRng::seed_from_u64(3);
    let x = random_inputs(&mut rng, 5, 2);
    let z = random_inputs(&mut rng, 3, 2);
    let hyp = array![0.3, -0.1, 0.2];
    let h = 1e-5;
    let mut cov = ArdSquaredExponential::new();

    for cross in [CrossInput::Training, CrossInput::Points(z.view())] {
        cov.begin_sweep(hyp.view(), x.view(), cross).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let analytic = cov.hessian(hyp.view(), x.view(), cross, i, j).unwrap();
                let mut plus = hyp.clone();
                plus[j] += h;
                let mut minus = hyp.clone();
                minus[j] -= h;
                let numeric = (cov.gradient(plus.view(), x.view(), cross, i).unwrap()
                    - cov.gradient(minus.view(), x.view(), cross, i).unwrap())
                    / (2.0 * h);
                assert_close(&analytic, &numeric, 1e-6);
            }
        }
    }
}

#[test]
fn cache_follows_hyperparameter_changes() {
    let mut rng = StdRng::seed_from_u64(23);
    let x = random_inputs(&mut rng, 4, 2);
    let first = array![0.0, 0.0, 0.0];
    let second = array![0.7, -0.6, 0.4];

    let mut cov = ArdSquaredExponential::new();
    cov.begin_sweep(first.view(), x.view(), CrossInput::Training)
        .unwrap();
    let primed = cov.cached_kernel().unwrap().clone();

    // The (0, 0) request re-primes the cache with the hyperparameters it is given.
    let h00 = cov
        .hessian(second.view(), x.view(), CrossInput::Training, 0, 0)
        .unwrap();
    let refreshed = cov.cached_kernel().unwrap().clone();
    let expected_kernel = cov
        .evaluate(second.view(), x.view(), CrossInput::Training)
        .unwrap();
    assert_close(&refreshed, &expected_kernel, 1e-14);
    assert_ne!(primed, refreshed);

    let mut fresh = ArdSquaredExponential::new();
    let h00_fresh = fresh
        .hessian(second.view(), x.view(), CrossInput::Training, 0, 0)
        .unwrap();
    assert_eq!(h00, h00_fresh);

    // Any other pair still notices stale hyperparameters.
    cov.begin_sweep(first.view(), x.view(), CrossInput::Training)
        .unwrap();
    let h01 = cov
        .hessian(second.view(), x.view(), CrossInput::Training, 0, 1)
        .unwrap();
    let h01_fresh = fresh
        .hessian(second.view(), x.view(), CrossInput::Training, 0, 1)
        .unwrap();
    assert_eq!(h01, h01_fresh);
}

#[test]
fn cache_follows_input_changes_of_the_same_shape() {
    let hyp = array![0.0, 0.0, 0.0];
    let first = array![[0.0, 0.0], [1.0, 1.0]];
    let second = array![[0.0, 0.0], [4.0, 5.0]];

    let mut cov = ArdSquaredExponential::new();
    cov.begin_sweep(hyp.view(), first.view(), CrossInput::Training)
        .unwrap();
    let h01 = cov
        .hessian(hyp.view(), second.view(), CrossInput::Training, 0, 1)
        .unwrap();
    let h01_fresh = ArdSquaredExponential::new()
        .hessian(hyp.view(), second.view(), CrossInput::Training, 0, 1)
        .unwrap();
    assert_close(&h01, &h01_fresh, 1e-14);
    let expected_kernel = cov
        .evaluate(hyp.view(), second.view(), CrossInput::Training)
        .unwrap();
    assert_close(cov.cached_kernel().unwrap(), &expected_kernel, 1e-14);

    // Same training rows, different cross points.
    let z_first = array![[0.5, 0.5]];
    let z_second = array![[3.0, -2.0]];
    cov.begin_sweep(hyp.view(), first.view(), CrossInput::Points(z_first.view()))
        .unwrap();
    let cross = cov
        .hessian(hyp.view(), first.view(), CrossInput::Points(z_second.view()), 0, 1)
        .unwrap();
    let cross_fresh = ArdSquaredExponential::new()
        .hessian(hyp.view(), first.view(), CrossInput::Points(z_second.view()), 0, 1)
        .unwrap();
    assert_close(&cross, &cross_fresh, 1e-14);
}

#[test]
fn invalid_requests_are_rejected() {
    let x = array![[0.0, 1.0], [1.0, 0.0]];
    let mut cov = ArdSquaredExponential::new();

    let short: Array1<f64> = array![0.0, 0.0];
    assert!(matches!(
        cov.evaluate(short.view(), x.view(), CrossInput::Training),
        Err(CovarianceError::HyperparameterCount {
            expected: 3,
            found: 2,
            input_dim: 2
        })
    ));

    let hyp = array![0.0, 0.0, 0.0];
    assert!(matches!(
        cov.hessian(hyp.view(), x.view(), CrossInput::Training, 0, 3),
        Err(CovarianceError::IndexOutOfRange { index: 3, count: 3 })
    ));
    assert!(matches!(
        cov.hessian(hyp.view(), x.view(), CrossInput::Diagonal, 0, 1),
        Err(CovarianceError::DiagonalHessianUnsupported)
    ));

    let narrow = array![[0.0], [1.0]];
    assert!(matches!(
        cov.evaluate(hyp.view(), x.view(), CrossInput::Points(narrow.view())),
        Err(CovarianceError::FeatureMismatch {
            expected: 2,
            found: 1
        })
    ));
}
