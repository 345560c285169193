//! Solver benchmarks.
//!
//! Run with: `cargo bench -p sbt`
//!
//! Measures full improvement sweeps at varying trial counts and the cost
//! of one simulation step on the Tag problem.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use problems_tag::{GridPosition, TagModel, TagOptions, TagState};
use sbt::{Agent, Solver};
use solver_core::SolverParameters;

const MAP_5X5: &str = "5 5\n.....\n.....\n.....\n.....\n.....\n";

fn tag_model(max_trials: u32) -> TagModel {
    TagModel::from_map_str(
        MAP_5X5,
        TagOptions::default(),
        SolverParameters::for_testing()
            .with_discount(0.95)
            .with_max_trials(max_trials),
    )
    .expect("benchmark map is valid")
}

/// A solver with a seeded root belief, ready for improvement sweeps.
fn seeded_solver(max_trials: u32, rng: &mut ChaCha20Rng) -> Solver<TagModel> {
    let mut solver = Solver::new(tag_model(max_trials));
    let state = solver.pool_mut().create_or_get(TagState {
        robot: GridPosition::new(0, 0),
        opponent: GridPosition::new(4, 4),
        tagged: false,
    });
    let root = solver.tree().root();
    solver.single_search(root, state, 0, 10, rng);
    solver
}

fn bench_improve_trials(c: &mut Criterion) {
    let mut group = c.benchmark_group("improve_trials");

    for trials in [50, 100, 200, 400] {
        group.throughput(Throughput::Elements(trials as u64));
        group.bench_with_input(BenchmarkId::new("tag_5x5", trials), &trials, |b, &trials| {
            b.iter(|| {
                let mut rng = ChaCha20Rng::seed_from_u64(42);
                let mut solver = seeded_solver(trials, &mut rng);
                let root = solver.tree().root();
                solver.improve(root, trials, 30, &mut rng).unwrap();
                black_box(solver.tree().len())
            });
        });
    }

    group.finish();
}

fn bench_run_sim_steps(c: &mut Criterion) {
    c.bench_function("run_sim_5_steps", |b| {
        b.iter(|| {
            let mut rng = ChaCha20Rng::seed_from_u64(42);
            let mut agent = Agent::new(Solver::new(tag_model(50)));
            black_box(agent.run_sim(5, &[], &mut rng).unwrap().discounted_return)
        });
    });
}

criterion_group!(benches, bench_improve_trials, bench_run_sim_steps);
criterion_main!(benches);
