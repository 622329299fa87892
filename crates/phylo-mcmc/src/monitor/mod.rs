//! Monitors reading model state at fixed iteration periods.

use std::path::{Path, PathBuf};

use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_core::NodeId;
use phylo_model::{Model, NodeKind};
use serde::{Deserialize, Serialize};

use crate::config::OutputConfig;

mod file;
mod screen;
mod trace;
mod tree;

pub use file::{ModelMonitor, INCOMPLETE_MARKER};
pub use screen::ScreenMonitor;
pub use trace::{TraceMonitor, TraceRecord};
pub use tree::{annotated_newick, TreeMonitor};

/// Receives read-only views of a chain's model.
///
/// `notify` is called at iteration 0 and whenever `iteration % printgen == 0`,
/// after the iteration's keep or restore, so every cached value is current.
pub trait Monitor: Send {
    /// Name used in logs and manifests.
    fn name(&self) -> &str;

    /// Sampling period in iterations.
    fn printgen(&self) -> usize;

    /// Prepares output before the first record.
    fn start(&mut self, _model: &Model) -> Result<(), PhyloError> {
        Ok(())
    }

    /// Appends one record.
    fn notify(&mut self, iteration: usize, model: &Model) -> Result<(), PhyloError>;

    /// Closes output; `completed` is false after cancellation or a fatal error.
    fn finish(&mut self, _completed: bool) -> Result<(), PhyloError> {
        Ok(())
    }

    /// File written by the monitor, if any.
    fn output_file(&self) -> Option<&Path> {
        None
    }
}

/// Declarative monitor description carried in the run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MonitorSpec {
    /// Tab-delimited file of node values.
    Model {
        /// Output path, resolved against the run directory.
        file: PathBuf,
        /// Sampling period.
        printgen: usize,
        /// Nodes to record; empty records every numeric non-constant node.
        #[serde(default)]
        nodes: Vec<String>,
    },
    /// Progress lines emitted through `tracing`.
    Screen {
        /// Sampling period.
        printgen: usize,
        /// Nodes to report.
        #[serde(default)]
        nodes: Vec<String>,
    },
    /// Annotated newick strings of a tree-valued node.
    Tree {
        /// Output path, resolved against the run directory.
        file: PathBuf,
        /// Sampling period.
        printgen: usize,
        /// Tree-valued node to record.
        node: String,
    },
}

impl MonitorSpec {
    /// Sampling period.
    pub fn printgen(&self) -> usize {
        match self {
            MonitorSpec::Model { printgen, .. }
            | MonitorSpec::Screen { printgen, .. }
            | MonitorSpec::Tree { printgen, .. } => *printgen,
        }
    }

    /// Short kind tag.
    pub fn kind_name(&self) -> &'static str {
        match self {
            MonitorSpec::Model { .. } => "model",
            MonitorSpec::Screen { .. } => "screen",
            MonitorSpec::Tree { .. } => "tree",
        }
    }

    /// Checks node references against a model.
    pub fn validate(&self, model: &Model) -> Result<(), PhyloError> {
        match self {
            MonitorSpec::Model { nodes, .. } | MonitorSpec::Screen { nodes, .. } => {
                select_nodes(model, nodes).map(|_| ())
            }
            MonitorSpec::Tree { node, .. } => {
                let id = model.node_id(node)?;
                model.value(id)?.as_tree().map(|_| ()).map_err(|err| {
                    PhyloError::Configuration(err.info().clone()).with_context("monitor", "tree")
                })
            }
        }
    }

    /// Instantiates the monitor for run `run` of `runs`.
    pub fn build(&self, run: usize, runs: usize, output: &OutputConfig) -> Box<dyn Monitor> {
        match self {
            MonitorSpec::Model { file, printgen, nodes } => Box::new(ModelMonitor::new(
                run_file_path(&output.resolve(file), run, runs),
                *printgen,
                nodes.clone(),
            )),
            MonitorSpec::Screen { printgen, nodes } => Box::new(ScreenMonitor::new(run, *printgen, nodes.clone())),
            MonitorSpec::Tree { file, printgen, node } => Box::new(TreeMonitor::new(
                run_file_path(&output.resolve(file), run, runs),
                *printgen,
                node.clone(),
            )),
        }
    }
}

/// Per-run output path: `stem_run_N.ext` (1-based) when more than one run executes.
pub fn run_file_path(path: &Path, run: usize, runs: usize) -> PathBuf {
    if runs <= 1 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_run_{}.{}", run + 1, ext.to_string_lossy()),
        None => format!("{stem}_run_{}", run + 1),
    };
    path.with_file_name(name)
}

/// Resolves monitored node names; an empty list selects every non-constant
/// node whose value has numeric columns, in registration order.
pub(crate) fn select_nodes(model: &Model, names: &[String]) -> Result<Vec<NodeId>, PhyloError> {
    if names.is_empty() {
        let mut ids = Vec::new();
        for id in model.node_ids() {
            let node = model.node(id)?;
            if node.kind() != NodeKind::Constant && !node.value().numeric_columns().is_empty() {
                ids.push(id);
            }
        }
        return Ok(ids);
    }
    names.iter().map(|name| model.node_id(name)).collect()
}

/// Column labels of the selected nodes.
pub(crate) fn column_labels(model: &Model, ids: &[NodeId]) -> Result<Vec<String>, PhyloError> {
    let mut labels = Vec::new();
    for id in ids {
        let node = model.node(*id)?;
        for (suffix, _) in node.value().numeric_columns() {
            labels.push(format!("{}{suffix}", node.name()));
        }
    }
    Ok(labels)
}

/// Current numeric values of the selected nodes, flattened.
pub(crate) fn column_values(model: &Model, ids: &[NodeId]) -> Result<Vec<f64>, PhyloError> {
    let mut values = Vec::new();
    for id in ids {
        values.extend(model.value(*id)?.numeric_columns().into_iter().map(|(_, value)| value));
    }
    Ok(values)
}

pub(crate) fn monitor_io(code: &str, path: &Path, err: std::io::Error) -> PhyloError {
    PhyloError::Serde(ErrorInfo::new(code, err.to_string()).with_context("path", path.display()))
}
