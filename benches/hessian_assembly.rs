use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use gphess::{
    ArdSquaredExponential, Hyperparameters, InferenceLevel, Likelihood, Observations, ZeroMean,
    infer_exact,
};
use ndarray::{Array1, Array2};
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_problem(n: usize, p: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(0x6A55 + n as u64);
    let x = Array2::from_shape_fn((n, p), |_| rng.sample::<f64, _>(Standard) * 4.0);
    let y = Array1::from_shape_fn(n, |_| rng.sample::<f64, _>(Standard) - 0.5);
    (x, y)
}

fn benchmark_levels(c: &mut Criterion) {
    let p = 3;
    let hyp = Hyperparameters::new(Array1::zeros(p + 1), -1.0, Array1::zeros(0));
    let sizes = [25_usize, 50, 100];
    let problems: Vec<_> = sizes
        .iter()
        .map(|&n| (n, random_problem(n, p)))
        .collect();

    let mut group = c.benchmark_group("exact_inference");
    for (n, (x, y)) in problems.iter() {
        group.throughput(Throughput::Elements((*n * *n) as u64));
        for level in [InferenceLevel::Gradient, InferenceLevel::Hessian] {
            let id = BenchmarkId::new(format!("{level:?}"), n);
            group.bench_with_input(id, &(x, y), |b, (x, y)| {
                let mut cov = ArdSquaredExponential::new();
                b.iter(|| {
                    let out = infer_exact(
                        black_box(&hyp),
                        &ZeroMean,
                        &mut cov,
                        &Likelihood::Gaussian,
                        x.view(),
                        Observations::Targets(y.view()),
                        level,
                    );
                    black_box(out.ok());
                });
            });
        }
    }
    group.finish();
}

criterion_group!(hessian_assembly, benchmark_levels);
criterion_main!(hessian_assembly);
