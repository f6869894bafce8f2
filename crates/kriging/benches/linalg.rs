use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use kriging::correlation_models::{CorrelationModel, Kernel};
use kriging::linalg;
use ndarray::{Array2, array};
use ndarray_rand::RandomExt;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use rand_xoshiro::Xoshiro256Plus;

/// A well conditioned correlation matrix of size `n`
fn correlation_matrix(n: usize) -> Array2<f64> {
    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    let x = Array2::random_using((n, 3), Uniform::new(0., 1.), &mut rng);
    Kernel::Matern52.covariance(&x, &x, &array![0.2, 0.2, 0.2], 1.)
}

fn bench_cholesky(c: &mut Criterion) {
    let mut group = c.benchmark_group("cholesky");
    for size in [50, 100, 200].iter() {
        let r = correlation_matrix(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| linalg::cholesky(&r).expect("cholesky"));
        });
    }
    group.finish();
}

fn bench_triangular_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("triangular_solve");
    for size in [50, 100, 200].iter() {
        let l = linalg::cholesky(&correlation_matrix(*size)).expect("cholesky");
        let rhs = Array2::ones((*size, 1));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| linalg::solve_lower(&l, &rhs).expect("solve"));
        });
    }
    group.finish();
}

fn bench_qr(c: &mut Criterion) {
    let mut group = c.benchmark_group("qr");
    for size in [50, 100, 200].iter() {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let m = Array2::random_using((*size, 10), Uniform::new(0., 1.), &mut rng);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| linalg::qr(&m).expect("qr"));
        });
    }
    group.finish();
}

fn bench_invert_spd(c: &mut Criterion) {
    let mut group = c.benchmark_group("invert_spd");
    for size in [50, 100, 200].iter() {
        let r = correlation_matrix(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| linalg::invert_spd(&r).expect("inverse"));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_cholesky,
    bench_triangular_solve,
    bench_qr,
    bench_invert_spd
);
criterion_main!(benches);
