use criterion::{black_box, criterion_group, criterion_main, Criterion};
use phylo_core::rng::RngHandle;
use phylo_core::TreeNodeId;
use phylo_mcmc::moves::{EventAdd, EventRateScale, EventRemove, EventSlide, ScaleMove};
use phylo_mcmc::{Analysis, CancellationToken, MoveScheduler, RunConfig};
use phylo_model::distributions::{BirthDeathShift, LogNormal};
use phylo_model::{Model, ModelBuilder};
use phylo_tree::AugmentedTree;

fn balanced_tree(depth: u32) -> AugmentedTree {
    let mut tree = AugmentedTree::new(depth as f64).unwrap();
    let mut frontier = vec![tree.root()];
    for level in 1..=depth {
        let age = (depth - level) as f64;
        let mut next: Vec<TreeNodeId> = Vec::new();
        for parent in frontier {
            next.push(tree.add_child(parent, age, None).unwrap());
            next.push(tree.add_child(parent, age, None).unwrap());
        }
        frontier = next;
    }
    tree
}

fn shifting_model(depth: u32) -> (Model, MoveScheduler) {
    let mut builder = ModelBuilder::new();
    let ln_lambda = builder.add_constant("ln_lambda", 0.0).unwrap();
    let ln_mu = builder.add_constant("ln_mu", (0.3f64).ln()).unwrap();
    let spread = builder.add_constant("prior_sd", 0.5).unwrap();
    let eta = builder.add_constant("eta", 0.05).unwrap();
    let sigma = builder.add_constant("sigma", 0.5).unwrap();
    let rho = builder.add_constant("rho", 1.0).unwrap();
    let lambda = builder.add_stochastic("lambda", LogNormal, &[ln_lambda, spread]).unwrap();
    let mu = builder.add_stochastic("mu", LogNormal, &[ln_mu, spread]).unwrap();
    let tree = builder
        .add_stochastic("tree", BirthDeathShift, &[lambda, mu, eta, sigma, rho])
        .unwrap();
    builder.set_initial(lambda, 1.0).unwrap();
    builder.set_initial(mu, 0.3).unwrap();
    builder.clamp(tree, balanced_tree(depth)).unwrap();
    let model = builder.build(&mut RngHandle::from_seed(1)).unwrap();

    let mut scheduler = MoveScheduler::new();
    scheduler.register(&model, ScaleMove::new(lambda, 0.5).unwrap(), 2.0).unwrap();
    scheduler.register(&model, ScaleMove::new(mu, 0.5).unwrap(), 2.0).unwrap();
    scheduler
        .register_event_pair(
            &model,
            EventAdd::new(tree, 0.5).unwrap(),
            1.0,
            EventRemove::new(tree, 0.5).unwrap(),
            1.0,
        )
        .unwrap();
    scheduler.register(&model, EventSlide::new(tree, 0.5).unwrap(), 1.0).unwrap();
    scheduler.register(&model, EventRateScale::new(tree, 0.5).unwrap(), 1.0).unwrap();
    (model, scheduler)
}

fn bench_steps(c: &mut Criterion) {
    let (mut model, mut scheduler) = shifting_model(5);
    let mut rng = RngHandle::from_seed(42);
    c.bench_function("scheduler_step_32_tips", |b| {
        b.iter(|| black_box(scheduler.step(&mut model, &mut rng).unwrap()));
    });
}

fn bench_analysis(c: &mut Criterion) {
    let (model, scheduler) = shifting_model(4);
    let mut config = RunConfig::default();
    config.runs = 4;
    config.generations = 200;
    config.concurrency = 4;
    config.trace.printgen = 20;
    let analysis = Analysis::new(model, scheduler, config).unwrap();
    c.bench_function("analysis_4_runs_200_generations", |b| {
        b.iter(|| black_box(analysis.run(&CancellationToken::new()).unwrap()));
    });
}

criterion_group!(benches, bench_steps, bench_analysis);
criterion_main!(benches);
