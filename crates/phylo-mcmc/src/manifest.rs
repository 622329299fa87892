use std::fs;
use std::path::{Path, PathBuf};

use phylo_core::errors::ErrorInfo;
use phylo_core::{PhyloError, RunProvenance};
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::metrics::MoveSummary;

/// Outcome of one run as recorded in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    /// Run index.
    pub run: usize,
    /// Seed of the run's RNG substream.
    pub seed: u64,
    /// Sampling iterations completed.
    pub iterations: usize,
    /// Log posterior of the final state.
    pub final_log_posterior: f64,
    /// Whether every requested iteration ran.
    pub completed: bool,
    /// Files written by the run's monitors.
    pub monitor_files: Vec<PathBuf>,
    /// Acceptance summary of the run's moves.
    pub moves: Vec<MoveSummary>,
}

/// Structured manifest describing an analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    /// Configuration used for the analysis.
    pub config: RunConfig,
    /// Master seed used to derive run substreams.
    pub master_seed: u64,
    /// Optional seed label captured from the configuration.
    pub seed_label: Option<String>,
    /// Provenance block (schema, config hash, timestamp, tool versions).
    pub provenance: RunProvenance,
    /// Per-run outcomes in run order.
    pub runs: Vec<RunRecord>,
    /// Combined trace file (relative to the run directory).
    pub combined_trace_file: Option<PathBuf>,
    /// Move summary file (relative to the run directory).
    pub moves_file: Option<PathBuf>,
    /// Whether every run completed.
    pub completed: bool,
}

impl RunManifest {
    /// Writes the manifest to a JSON file.
    pub fn write(&self, path: &Path) -> Result<(), PhyloError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                PhyloError::Serde(
                    ErrorInfo::new("manifest-mkdir", err.to_string())
                        .with_context("path", parent.display().to_string()),
                )
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|err| {
            PhyloError::Serde(
                ErrorInfo::new("manifest-serialize", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        fs::write(path, json).map_err(|err| {
            PhyloError::Serde(
                ErrorInfo::new("manifest-write", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })
    }

    /// Loads a manifest from disk.
    pub fn load(path: &Path) -> Result<Self, PhyloError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            PhyloError::Serde(
                ErrorInfo::new("manifest-read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        serde_json::from_str(&contents).map_err(|err| {
            PhyloError::Serde(
                ErrorInfo::new("manifest-parse", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })
    }
}
