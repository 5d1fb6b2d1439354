use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};

use specfit_algebra::{NonNegativeLeastSquares, NormalEquations};

fn random_system(dim: usize, rows: usize, rng: &mut StdRng) -> NormalEquations {
    let mut eq = NormalEquations::new(dim);
    let mut row = vec![0.0; dim];
    for _ in 0..rows {
        row.iter_mut().for_each(|v| *v = rng.random_range(0.0..1.0));
        let target = rng.random_range(-0.5..1.0);
        eq.add_row(&row, target, 1.0);
    }
    eq
}

fn bench_nnls(c: &mut Criterion) {
    let mut group = c.benchmark_group("nnls");
    let mut rng = StdRng::seed_from_u64(42);

    for dim in [4, 16, 64] {
        let eq = random_system(dim, dim * 8, &mut rng);
        let solver = NonNegativeLeastSquares::default();

        group.bench_with_input(BenchmarkId::new("solve", dim), &eq, |b, eq| {
            b.iter(|| solver.solve(black_box(eq)))
        });
        group.bench_with_input(BenchmarkId::new("solve_sum_to_one", dim), &eq, |b, eq| {
            b.iter(|| solver.solve_sum_to_one(black_box(eq)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_nnls);
criterion_main!(benches);
