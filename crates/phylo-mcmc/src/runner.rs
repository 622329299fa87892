//! Multi-run analysis driver.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_core::{RngHandle, RunProvenance, SchemaVersion};
use phylo_model::Model;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::chain::{Chain, PhaseEnd};
use crate::combine::{combine_traces, write_trace};
use crate::config::RunConfig;
use crate::determinism::{config_hash, labelled_master_seed, run_seed};
use crate::manifest::{RunManifest, RunRecord};
use crate::metrics::{write_move_summary_csv, MoveSummary};
use crate::monitor::{Monitor, TraceMonitor, TraceRecord};
use crate::scheduler::MoveScheduler;

/// Builds an extra monitor for a run, given its index.
pub type MonitorFactory = Arc<dyn Fn(usize) -> Box<dyn Monitor> + Send + Sync>;

/// Result of one run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Manifest record of the run.
    pub record: RunRecord,
    /// In-memory trace of the run.
    pub trace: Vec<TraceRecord>,
}

/// Result of a whole analysis.
#[derive(Debug, Clone)]
pub struct AnalysisSummary {
    /// Per-run outcomes in run order.
    pub runs: Vec<RunOutcome>,
    /// Traces merged under the configured policy.
    pub combined: Vec<TraceRecord>,
    /// Manifest written to the run directory, if one was configured.
    pub manifest_path: Option<PathBuf>,
    /// Whether every run completed.
    pub completed: bool,
}

/// A validated analysis: template model, move registry and configuration.
///
/// Each run works on its own clone of the model and scheduler with an RNG
/// substream derived from the master seed, so results do not depend on the
/// number of threads or the order runs finish in.
#[derive(Clone)]
pub struct Analysis {
    model: Model,
    scheduler: MoveScheduler,
    config: RunConfig,
    factories: Vec<MonitorFactory>,
}

impl std::fmt::Debug for Analysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analysis")
            .field("model", &self.model)
            .field("scheduler", &self.scheduler)
            .field("config", &self.config)
            .field("factories", &self.factories.len())
            .finish()
    }
}

impl Analysis {
    /// Validates the configuration, monitor references and move registry.
    pub fn new(model: Model, scheduler: MoveScheduler, config: RunConfig) -> Result<Self, PhyloError> {
        config.validate()?;
        if scheduler.total_weight() <= 0.0 {
            return Err(PhyloError::Configuration(ErrorInfo::new(
                "no-moves",
                "no move with positive weight is registered",
            )));
        }
        for spec in &config.monitors {
            spec.validate(&model).map_err(|err| as_configuration(err).with_context("monitor", spec.kind_name()))?;
        }
        for name in &config.trace.nodes {
            model.node_id(name).map_err(|err| as_configuration(err).with_context("monitor", "trace"))?;
        }
        Ok(Self {
            model,
            scheduler,
            config,
            factories: Vec::new(),
        })
    }

    /// Attaches an extra monitor to every run.
    pub fn add_monitor_factory(&mut self, factory: impl Fn(usize) -> Box<dyn Monitor> + Send + Sync + 'static) {
        self.factories.push(Arc::new(factory));
    }

    /// The analysis configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Executes every run, combines their traces and writes artefacts.
    ///
    /// A fatal error in one run cancels the others and is returned once all
    /// runs have stopped; their monitors are marked incomplete.
    pub fn run(&self, cancel: &CancellationToken) -> Result<AnalysisSummary, PhyloError> {
        let master_seed = labelled_master_seed(
            self.config.seed_policy.master_seed,
            self.config.seed_policy.label.as_deref(),
        );
        info!(
            runs = self.config.runs,
            generations = self.config.generations,
            burn_in = self.config.burn_in.generations,
            master_seed,
            "starting analysis"
        );
        if let Some(dir) = &self.config.output.run_directory {
            fs::create_dir_all(dir).map_err(|err| {
                PhyloError::Serde(
                    ErrorInfo::new("output-mkdir", err.to_string()).with_context("path", dir.display()),
                )
            })?;
        }
        let abort = cancel.child();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency.max(1))
            .build()
            .map_err(|err| PhyloError::Configuration(ErrorInfo::new("thread-pool", err.to_string())))?;
        let results: Vec<Result<RunOutcome, PhyloError>> = pool.install(|| {
            (0..self.config.runs)
                .into_par_iter()
                .map(|run| {
                    let result = self.execute_run(run, run_seed(master_seed, run), &abort);
                    if result.is_err() {
                        abort.cancel();
                    }
                    result
                })
                .collect()
        });
        let mut runs = Vec::with_capacity(results.len());
        for result in results {
            runs.push(result?);
        }
        let completed = runs.iter().all(|outcome| outcome.record.completed);
        if !completed {
            warn!("analysis stopped before every run completed");
        }
        let combined = combine_traces(
            runs.iter().map(|outcome| outcome.trace.clone()).collect(),
            self.config.combine,
        );
        let manifest_path = self.write_artefacts(master_seed, &runs, &combined, completed)?;
        info!(completed, records = combined.len(), "analysis finished");
        Ok(AnalysisSummary {
            runs,
            combined,
            manifest_path,
            completed,
        })
    }

    fn execute_run(&self, run: usize, seed: u64, cancel: &CancellationToken) -> Result<RunOutcome, PhyloError> {
        let mut chain = Chain::new(run, self.model.clone(), self.scheduler.clone(), RngHandle::from_seed(seed));
        let mut trace = TraceMonitor::new(run, self.config.trace.printgen, self.config.trace.nodes.clone());
        let mut extra: Vec<Box<dyn Monitor>> = self
            .config
            .monitors
            .iter()
            .map(|spec| spec.build(run, self.config.runs, &self.config.output))
            .chain(self.factories.iter().map(|factory| factory(run)))
            .collect();
        let mut monitors: Vec<&mut dyn Monitor> = Vec::with_capacity(extra.len() + 1);
        monitors.push(&mut trace);
        for monitor in extra.iter_mut() {
            monitors.push(monitor.as_mut());
        }

        let outcome = run_phases(&mut chain, &self.config, &mut monitors, cancel);
        let completed = matches!(outcome, Ok(PhaseEnd::Completed));
        for monitor in monitors.iter_mut() {
            if let Err(err) = monitor.finish(completed) {
                if outcome.is_ok() {
                    return Err(err.with_context("run", run));
                }
                warn!(run, monitor = monitor.name(), error = %err, "monitor failed to close");
            }
        }
        outcome.map_err(|err| err.with_context("run", run))?;
        if !completed {
            warn!(run, iteration = chain.iteration(), "run cancelled");
        }
        let monitor_files = monitors
            .iter()
            .filter_map(|monitor| monitor.output_file().map(PathBuf::from))
            .collect();
        drop(monitors);
        info!(run, seed, log_posterior = chain.log_posterior(), completed, "run finished");
        Ok(RunOutcome {
            record: RunRecord {
                run,
                seed,
                iterations: chain.iteration(),
                final_log_posterior: chain.log_posterior(),
                completed,
                monitor_files,
                moves: chain.scheduler().summary(run),
            },
            trace: trace.into_records(),
        })
    }

    fn write_artefacts(
        &self,
        master_seed: u64,
        runs: &[RunOutcome],
        combined: &[TraceRecord],
        completed: bool,
    ) -> Result<Option<PathBuf>, PhyloError> {
        let Some(dir) = &self.config.output.run_directory else {
            return Ok(None);
        };
        let output = &self.config.output;
        write_trace(&dir.join(&output.combined_trace_file), combined)?;
        let moves: Vec<MoveSummary> = runs.iter().flat_map(|outcome| outcome.record.moves.clone()).collect();
        let moves_path = dir.join(&output.moves_file);
        write_move_summary_csv(&moves_path, &moves).map_err(|err| {
            PhyloError::Serde(ErrorInfo::new("moves-write", err.to_string()).with_context("path", moves_path.display()))
        })?;
        let serialized = serde_json::to_string(&self.config)
            .map_err(|err| PhyloError::Serde(ErrorInfo::new("config-serialize", err.to_string())))?;
        let mut tool_versions = BTreeMap::new();
        tool_versions.insert("phylo-mcmc".to_string(), env!("CARGO_PKG_VERSION").to_string());
        let manifest = RunManifest {
            config: self.config.clone(),
            master_seed: self.config.seed_policy.master_seed,
            seed_label: self.config.seed_policy.label.clone(),
            provenance: RunProvenance {
                schema_version: SchemaVersion::default(),
                config_hash: config_hash(&serialized),
                seed: master_seed,
                created_at: chrono::Utc::now().to_rfc3339(),
                tool_versions,
            },
            runs: runs.iter().map(|outcome| outcome.record.clone()).collect(),
            combined_trace_file: Some(output.combined_trace_file.clone()),
            moves_file: Some(output.moves_file.clone()),
            completed,
        };
        let manifest_path = dir.join(&output.manifest_file);
        manifest.write(&manifest_path)?;
        Ok(Some(manifest_path))
    }
}

fn run_phases(
    chain: &mut Chain,
    config: &RunConfig,
    monitors: &mut [&mut dyn Monitor],
    cancel: &CancellationToken,
) -> Result<PhaseEnd, PhyloError> {
    chain.initialize(config.starting_values)?;
    for monitor in monitors.iter_mut() {
        monitor.start(chain.model())?;
    }
    if chain.burn_in(config.burn_in.generations, config.burn_in.tuning_interval, cancel)? == PhaseEnd::Cancelled {
        return Ok(PhaseEnd::Cancelled);
    }
    chain.sample(config.generations, config.tuning_interval, monitors, cancel)
}

fn as_configuration(err: PhyloError) -> PhyloError {
    match err {
        PhyloError::Graph(info) => PhyloError::Configuration(info),
        other => other,
    }
}
