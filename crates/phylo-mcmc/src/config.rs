use std::fs;
use std::path::{Path, PathBuf};

use phylo_core::errors::{ErrorInfo, PhyloError};
use serde::{Deserialize, Serialize};

use crate::monitor::MonitorSpec;

/// YAML-configurable parameters governing an analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of independent runs.
    #[serde(default = "default_runs")]
    pub runs: usize,
    /// Iterations per run after burn-in.
    pub generations: usize,
    /// Tuning phase executed before sampling.
    #[serde(default)]
    pub burn_in: BurnInConfig,
    /// Iterations between tuning rounds while sampling (0 disables tuning).
    #[serde(default)]
    pub tuning_interval: usize,
    /// How per-run traces are merged.
    #[serde(default)]
    pub combine: CombinePolicy,
    /// How each run picks its starting state.
    #[serde(default)]
    pub starting_values: StartingValues,
    /// Master seed and substream policy.
    #[serde(default)]
    pub seed_policy: SeedPolicy,
    /// Maximum number of runs executing at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// In-memory trace used for combination.
    #[serde(default)]
    pub trace: TraceConfig,
    /// File and screen monitors attached to every run.
    #[serde(default)]
    pub monitors: Vec<MonitorSpec>,
    /// Output directory configuration.
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_runs() -> usize {
    1
}

fn default_concurrency() -> usize {
    1
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            runs: default_runs(),
            generations: 1_000,
            burn_in: BurnInConfig::default(),
            tuning_interval: 0,
            combine: CombinePolicy::default(),
            starting_values: StartingValues::default(),
            seed_policy: SeedPolicy::default(),
            concurrency: default_concurrency(),
            trace: TraceConfig::default(),
            monitors: Vec::new(),
            output: OutputConfig::default(),
        }
    }
}

impl RunConfig {
    /// Parses a configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, PhyloError> {
        serde_yaml::from_str(text)
            .map_err(|err| PhyloError::Serde(ErrorInfo::new("config-parse", err.to_string())))
    }

    /// Loads a configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, PhyloError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            PhyloError::Serde(
                ErrorInfo::new("config-read", err.to_string()).with_context("path", path.display()),
            )
        })?;
        Self::from_yaml_str(&contents).map_err(|err| err.with_context("path", path.display()))
    }

    /// Rejects settings no analysis can run with.
    pub fn validate(&self) -> Result<(), PhyloError> {
        let positive = [
            ("runs", self.runs),
            ("generations", self.generations),
            ("concurrency", self.concurrency),
            ("trace.printgen", self.trace.printgen),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(config_error("zero-setting", "setting must be at least 1").with_context("field", field));
            }
        }
        for spec in &self.monitors {
            if spec.printgen() == 0 {
                return Err(config_error("zero-printgen", "monitor printgen must be at least 1")
                    .with_context("monitor", spec.kind_name()));
            }
        }
        Ok(())
    }
}

/// Burn-in phase parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BurnInConfig {
    /// Iterations spent in burn-in.
    #[serde(default)]
    pub generations: usize,
    /// Iterations between tuning rounds during burn-in (0 disables tuning).
    #[serde(default)]
    pub tuning_interval: usize,
}

/// Order in which per-run trace records are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CombinePolicy {
    /// Interleave by iteration, then run index.
    #[default]
    Mixed,
    /// Concatenate whole runs in run order.
    Sequential,
}

/// Starting-state policy for each run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartingValues {
    /// Draw free nodes from their priors, falling back to supplied values.
    #[default]
    DrawFromPrior,
    /// Keep the values the model was built with.
    UseSupplied,
}

/// Deterministic seeding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedPolicy {
    /// Master seed used for the analysis.
    #[serde(default = "default_master_seed")]
    pub master_seed: u64,
    /// Optional label mixed into the master seed.
    #[serde(default)]
    pub label: Option<String>,
}

fn default_master_seed() -> u64 {
    0x9E37_79B9_7F4A_7C15_u64
}

impl Default for SeedPolicy {
    fn default() -> Self {
        Self {
            master_seed: default_master_seed(),
            label: None,
        }
    }
}

/// Columns and sampling period of the in-memory trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Iterations between trace records.
    #[serde(default = "default_trace_printgen")]
    pub printgen: usize,
    /// Node names to record; empty records every numeric non-constant node.
    #[serde(default)]
    pub nodes: Vec<String>,
}

fn default_trace_printgen() -> usize {
    10
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            printgen: default_trace_printgen(),
            nodes: Vec::new(),
        }
    }
}

/// Output directory layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory for run artefacts. Created if it does not exist; when
    /// unset only monitor files are written.
    #[serde(default)]
    pub run_directory: Option<PathBuf>,
    /// Combined trace filename relative to `run_directory`.
    #[serde(default = "default_combined_trace_filename")]
    pub combined_trace_file: PathBuf,
    /// Move summary filename relative to `run_directory`.
    #[serde(default = "default_moves_filename")]
    pub moves_file: PathBuf,
    /// Manifest filename relative to `run_directory`.
    #[serde(default = "default_manifest_filename")]
    pub manifest_file: PathBuf,
}

fn default_combined_trace_filename() -> PathBuf {
    PathBuf::from("combined.log")
}

fn default_moves_filename() -> PathBuf {
    PathBuf::from("moves.csv")
}

fn default_manifest_filename() -> PathBuf {
    PathBuf::from("manifest.json")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            run_directory: None,
            combined_trace_file: default_combined_trace_filename(),
            moves_file: default_moves_filename(),
            manifest_file: default_manifest_filename(),
        }
    }
}

impl OutputConfig {
    /// Resolves a monitor or artefact path against the run directory.
    pub fn resolve(&self, file: &Path) -> PathBuf {
        match &self.run_directory {
            Some(dir) if file.is_relative() => dir.join(file),
            _ => file.to_path_buf(),
        }
    }
}

fn config_error(code: &str, message: &str) -> PhyloError {
    PhyloError::Configuration(ErrorInfo::new(code, message))
}
