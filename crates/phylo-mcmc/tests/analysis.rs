use std::fs;
use std::path::PathBuf;

use phylo_core::errors::PhyloError;
use phylo_core::rng::RngHandle;
use phylo_mcmc::combine::combine_traces;
use phylo_mcmc::manifest::RunManifest;
use phylo_mcmc::monitor::{run_file_path, INCOMPLETE_MARKER};
use phylo_mcmc::moves::ScaleMove;
use phylo_mcmc::{
    Analysis, CancellationToken, CombinePolicy, Monitor, MonitorSpec, MoveScheduler, RunConfig, StartingValues,
    TraceRecord,
};
use phylo_model::distributions::{BirthDeathShift, ConstantRateBirthDeath, LogNormal};
use phylo_model::{Model, ModelBuilder};
use phylo_tree::AugmentedTree;
use tempfile::tempdir;

const TRUE_LAMBDA: f64 = 1.2;
const TRUE_MU: f64 = 0.4;

/// ((A:1,B:1):1,C:2); ultrametric with root age 2.
fn three_taxa() -> AugmentedTree {
    AugmentedTree::from_parents(
        &[None, Some(0), Some(1), Some(1), Some(0)],
        &[2.0, 1.0, 0.0, 0.0, 0.0],
        &[
            None,
            None,
            Some("A".to_string()),
            Some("B".to_string()),
            Some("C".to_string()),
        ],
    )
    .unwrap()
}

/// Tight log-normal priors centred on the true rates and an observed
/// constant-rate birth-death tree.
fn rate_model() -> (Model, MoveScheduler) {
    let mut builder = ModelBuilder::new();
    let ln_lambda = builder.add_constant("ln_lambda", TRUE_LAMBDA.ln()).unwrap();
    let ln_mu = builder.add_constant("ln_mu", TRUE_MU.ln()).unwrap();
    let sd = builder.add_constant("sd", 0.05).unwrap();
    let rho = builder.add_constant("rho", 1.0).unwrap();
    let lambda = builder.add_stochastic("lambda", LogNormal, &[ln_lambda, sd]).unwrap();
    let mu = builder.add_stochastic("mu", LogNormal, &[ln_mu, sd]).unwrap();
    let tree = builder
        .add_stochastic("tree", ConstantRateBirthDeath, &[lambda, mu, rho])
        .unwrap();
    builder.set_initial(lambda, TRUE_LAMBDA).unwrap();
    builder.set_initial(mu, TRUE_MU).unwrap();
    builder.clamp(tree, three_taxa()).unwrap();
    let model = builder.build(&mut RngHandle::from_seed(7)).unwrap();
    let mut scheduler = MoveScheduler::new();
    scheduler.register(&model, ScaleMove::new(lambda, 0.1).unwrap(), 1.0).unwrap();
    scheduler.register(&model, ScaleMove::new(mu, 0.1).unwrap(), 1.0).unwrap();
    (model, scheduler)
}

fn config(runs: usize, generations: usize) -> RunConfig {
    let mut config = RunConfig::default();
    config.runs = runs;
    config.generations = generations;
    config.trace.printgen = 10;
    config.trace.nodes = vec!["lambda".to_string(), "mu".to_string()];
    config.seed_policy.master_seed = 42;
    config
}

fn column_mean(records: &[TraceRecord], column: &str) -> f64 {
    records.iter().map(|record| record.values[column]).sum::<f64>() / records.len() as f64
}

#[test]
fn observed_tree_with_tight_priors_recovers_the_true_rates() {
    let (model, scheduler) = rate_model();
    let mut config = config(2, 10_000);
    config.burn_in.generations = 1_000;
    config.burn_in.tuning_interval = 100;
    config.concurrency = 2;
    let analysis = Analysis::new(model, scheduler, config).unwrap();
    let summary = analysis.run(&CancellationToken::new()).unwrap();
    assert!(summary.completed);
    assert_eq!(summary.combined.len(), 2 * 1_001);
    let lambda = column_mean(&summary.combined, "lambda");
    let mu = column_mean(&summary.combined, "mu");
    assert!((lambda - TRUE_LAMBDA).abs() < 0.05 * TRUE_LAMBDA, "lambda {lambda}");
    assert!((mu - TRUE_MU).abs() < 0.05 * TRUE_MU, "mu {mu}");
    for outcome in &summary.runs {
        assert_eq!(outcome.record.iterations, 10_000);
        assert!(outcome.record.final_log_posterior.is_finite());
        assert!(outcome.record.moves.iter().all(|row| row.proposed > 0));
    }
}

#[test]
fn same_seed_gives_identical_traces_regardless_of_threads() {
    let run = |concurrency: usize| {
        let (model, scheduler) = rate_model();
        let mut config = config(3, 300);
        config.concurrency = concurrency;
        Analysis::new(model, scheduler, config)
            .unwrap()
            .run(&CancellationToken::new())
            .unwrap()
    };
    let serial = run(1);
    let parallel = run(3);
    assert_eq!(serial.combined, parallel.combined);
    let seeds: Vec<u64> = serial.runs.iter().map(|outcome| outcome.record.seed).collect();
    assert_eq!(seeds.len(), 3);
    assert!(seeds[0] != seeds[1] && seeds[1] != seeds[2]);
    assert_ne!(serial.runs[0].trace, serial.runs[1].trace);
}

#[test]
fn combination_orders_by_run_and_iteration() {
    let record = |run: usize, iteration: usize| TraceRecord {
        run,
        iteration,
        posterior: 0.0,
        values: Default::default(),
    };
    let traces = vec![
        vec![record(0, 0), record(0, 10), record(0, 20)],
        vec![record(1, 0), record(1, 10)],
    ];
    let keys = |records: Vec<TraceRecord>| -> Vec<(usize, usize)> {
        records.iter().map(|r| (r.run, r.iteration)).collect()
    };
    assert_eq!(
        keys(combine_traces(traces.clone(), CombinePolicy::Mixed)),
        vec![(0, 0), (1, 0), (0, 10), (1, 10), (0, 20)]
    );
    let reversed: Vec<Vec<TraceRecord>> = traces.iter().rev().cloned().collect();
    assert_eq!(
        keys(combine_traces(reversed, CombinePolicy::Sequential)),
        vec![(0, 0), (0, 10), (0, 20), (1, 0), (1, 10)]
    );
}

#[test]
fn artefacts_land_in_the_run_directory() {
    let dir = tempdir().unwrap();
    let (model, scheduler) = rate_model();
    let mut config = config(2, 200);
    config.output.run_directory = Some(dir.path().to_path_buf());
    config.combine = CombinePolicy::Sequential;
    config.monitors = vec![
        MonitorSpec::Model {
            file: PathBuf::from("rates.log"),
            printgen: 50,
            nodes: vec![],
        },
        MonitorSpec::Tree {
            file: PathBuf::from("trees.log"),
            printgen: 100,
            node: "tree".to_string(),
        },
        MonitorSpec::Screen {
            printgen: 100,
            nodes: vec!["lambda".to_string()],
        },
    ];
    let summary = Analysis::new(model, scheduler, config)
        .unwrap()
        .run(&CancellationToken::new())
        .unwrap();
    let manifest_path = summary.manifest_path.clone().unwrap();
    let manifest = RunManifest::load(&manifest_path).unwrap();
    assert!(manifest.completed);
    assert_eq!(manifest.runs.len(), 2);
    assert_eq!(manifest.provenance.config_hash.len(), 64);
    assert_eq!(manifest.master_seed, 42);
    assert_eq!(manifest.runs[1].monitor_files.len(), 2);

    let rates = fs::read_to_string(dir.path().join("rates_run_2.log")).unwrap();
    let lines: Vec<&str> = rates.lines().collect();
    assert_eq!(lines[0], "Iteration\tPosterior\tlambda\tmu");
    assert_eq!(lines.len(), 1 + 5);
    assert!(lines[5].starts_with("200\t"));
    let trees = fs::read_to_string(dir.path().join("trees_run_1.log")).unwrap();
    assert!(trees.lines().nth(1).unwrap().contains("[&num_events=0"));

    let combined = fs::read_to_string(dir.path().join("combined.log")).unwrap();
    let header = combined.lines().next().unwrap();
    assert_eq!(header, "Run\tIteration\tPosterior\tlambda\tmu");
    assert_eq!(combined.lines().count(), 1 + 2 * 21);
    let moves = fs::read_to_string(dir.path().join("moves.csv")).unwrap();
    assert_eq!(moves.lines().count(), 1 + 2 * 2);
}

#[test]
fn cancellation_before_start_marks_outputs_incomplete() {
    let dir = tempdir().unwrap();
    let (model, scheduler) = rate_model();
    let mut config = config(1, 1_000);
    config.output.run_directory = Some(dir.path().to_path_buf());
    config.monitors = vec![MonitorSpec::Model {
        file: PathBuf::from("rates.log"),
        printgen: 10,
        nodes: vec!["lambda".to_string()],
    }];
    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = Analysis::new(model, scheduler, config).unwrap().run(&cancel).unwrap();
    assert!(!summary.completed);
    assert_eq!(summary.runs[0].record.iterations, 0);
    let rates = fs::read_to_string(dir.path().join("rates.log")).unwrap();
    assert_eq!(rates.lines().last(), Some(INCOMPLETE_MARKER));
    assert!(!RunManifest::load(summary.manifest_path.as_ref().unwrap()).unwrap().completed);
}

/// Cancels the shared token once it sees `at`.
struct CancelAt {
    at: usize,
    token: CancellationToken,
}

impl Monitor for CancelAt {
    fn name(&self) -> &str {
        "cancel_at"
    }

    fn printgen(&self) -> usize {
        1
    }

    fn notify(&mut self, iteration: usize, _model: &Model) -> Result<(), PhyloError> {
        if iteration == self.at {
            self.token.cancel();
        }
        Ok(())
    }
}

#[test]
fn cancellation_stops_at_an_iteration_boundary() {
    let (model, scheduler) = rate_model();
    let cancel = CancellationToken::new();
    let mut analysis = Analysis::new(model, scheduler, config(1, 1_000)).unwrap();
    let token = cancel.clone();
    analysis.add_monitor_factory(move |_| {
        Box::new(CancelAt {
            at: 55,
            token: token.clone(),
        })
    });
    let summary = analysis.run(&cancel).unwrap();
    assert!(!summary.completed);
    assert_eq!(summary.runs[0].record.iterations, 55);
    let last = summary.combined.last().unwrap();
    assert_eq!(last.iteration, 50);
}

#[test]
fn fatal_errors_abort_and_mark_monitors_incomplete() {
    let dir = tempdir().unwrap();
    let mut builder = ModelBuilder::new();
    let one = builder.add_constant("one", 1.0).unwrap();
    let half = builder.add_constant("half", 0.5).unwrap();
    let tree = builder
        .add_stochastic("tree", BirthDeathShift, &[one, half, half, half, one])
        .unwrap();
    builder.set_initial(tree, three_taxa()).unwrap();
    let model = builder.build(&mut RngHandle::from_seed(1)).unwrap();
    let mut scheduler = MoveScheduler::new();
    scheduler.register(&model, ScaleMove::new(tree, 1.0).unwrap(), 1.0).unwrap();
    let mut config = config(1, 100);
    config.trace.nodes.clear();
    config.output.run_directory = Some(dir.path().to_path_buf());
    config.monitors = vec![MonitorSpec::Tree {
        file: PathBuf::from("trees.log"),
        printgen: 1,
        node: "tree".to_string(),
    }];
    let err = Analysis::new(model, scheduler, config)
        .unwrap()
        .run(&CancellationToken::new())
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.info().context.get("run").map(String::as_str), Some("0"));
    let trees = fs::read_to_string(dir.path().join("trees.log")).unwrap();
    assert_eq!(trees.lines().last(), Some(INCOMPLETE_MARKER));
}

#[test]
fn unsampleable_nodes_fall_back_to_supplied_values() {
    let mut builder = ModelBuilder::new();
    let zero = builder.add_constant("zero", 0.0).unwrap();
    let sd = builder.add_constant("sd", 0.3).unwrap();
    let half = builder.add_constant("half", 0.5).unwrap();
    let one = builder.add_constant("one", 1.0).unwrap();
    let lambda = builder.add_stochastic("lambda", LogNormal, &[zero, sd]).unwrap();
    let tree = builder
        .add_stochastic("tree", BirthDeathShift, &[lambda, half, half, half, one])
        .unwrap();
    builder.set_initial(tree, three_taxa()).unwrap();
    let model = builder.build(&mut RngHandle::from_seed(1)).unwrap();
    let mut scheduler = MoveScheduler::new();
    scheduler.register(&model, ScaleMove::new(lambda, 0.3).unwrap(), 1.0).unwrap();
    let mut config = config(2, 50);
    config.trace.nodes = vec!["lambda".to_string()];
    config.starting_values = StartingValues::DrawFromPrior;
    let summary = Analysis::new(model, scheduler, config)
        .unwrap()
        .run(&CancellationToken::new())
        .unwrap();
    assert!(summary.completed);
    let first: Vec<f64> = summary
        .runs
        .iter()
        .map(|outcome| outcome.trace[0].values["lambda"])
        .collect();
    assert_ne!(first[0], first[1]);
}

#[test]
fn configuration_is_validated_before_any_iteration() {
    let yaml = r#"
generations: 500
runs: 2
combine: sequential
starting_values: use-supplied
burn_in:
  generations: 100
  tuning_interval: 10
monitors:
  - type: model
    file: out.log
    printgen: 10
    nodes: [lambda, missing]
"#;
    let config = RunConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.runs, 2);
    assert_eq!(config.concurrency, 1);
    assert_eq!(config.combine, CombinePolicy::Sequential);
    assert_eq!(config.starting_values, StartingValues::UseSupplied);
    assert_eq!(config.burn_in.tuning_interval, 10);
    assert_eq!(config.trace.printgen, 10);
    let (model, scheduler) = rate_model();
    match Analysis::new(model, scheduler, config).unwrap_err() {
        PhyloError::Configuration(info) => assert_eq!(info.code, "unknown-node"),
        other => panic!("unexpected error {other:?}"),
    }

    let mut zero_runs = RunConfig::default();
    zero_runs.runs = 0;
    assert!(matches!(zero_runs.validate(), Err(PhyloError::Configuration(_))));
    let mut zero_printgen = RunConfig::default();
    zero_printgen.monitors.push(MonitorSpec::Screen {
        printgen: 0,
        nodes: vec![],
    });
    assert!(matches!(zero_printgen.validate(), Err(PhyloError::Configuration(_))));
    assert!(matches!(
        RunConfig::from_yaml_str("runs: [1, 2]"),
        Err(PhyloError::Serde(_))
    ));
}

#[test]
fn configuration_loads_from_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("run.yaml");
    fs::write(&path, "generations: 20\nseed_policy:\n  master_seed: 9\n  label: replicate\n").unwrap();
    let config = RunConfig::load(&path).unwrap();
    assert_eq!(config.generations, 20);
    assert_eq!(config.seed_policy.master_seed, 9);
    assert_eq!(config.seed_policy.label.as_deref(), Some("replicate"));
    assert!(RunConfig::load(&dir.path().join("absent.yaml")).is_err());
}

#[test]
fn per_run_file_names_carry_the_run_number() {
    let path = PathBuf::from("out/rates.log");
    assert_eq!(run_file_path(&path, 0, 1), PathBuf::from("out/rates.log"));
    assert_eq!(run_file_path(&path, 0, 3), PathBuf::from("out/rates_run_1.log"));
    assert_eq!(run_file_path(&PathBuf::from("trace"), 2, 3), PathBuf::from("trace_run_3"));
}
