use indexmap::IndexMap;
use phylo_core::errors::PhyloError;
use phylo_core::NodeId;
use phylo_model::Model;
use serde::{Deserialize, Serialize};

use super::{column_labels, column_values, select_nodes, Monitor};

/// One sampled state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Run index.
    pub run: usize,
    /// Iteration within the sampling phase.
    pub iteration: usize,
    /// Log posterior of the state.
    pub posterior: f64,
    /// Column label to value, in column order.
    pub values: IndexMap<String, f64>,
}

/// Keeps trace records in memory for combination across runs.
#[derive(Debug)]
pub struct TraceMonitor {
    run: usize,
    printgen: usize,
    names: Vec<String>,
    ids: Vec<NodeId>,
    labels: Vec<String>,
    records: Vec<TraceRecord>,
}

impl TraceMonitor {
    /// Creates an empty trace for run `run`.
    pub fn new(run: usize, printgen: usize, names: Vec<String>) -> Self {
        Self {
            run,
            printgen,
            names,
            ids: Vec::new(),
            labels: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Records collected so far.
    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    /// Consumes the monitor, returning its records.
    pub fn into_records(self) -> Vec<TraceRecord> {
        self.records
    }
}

impl Monitor for TraceMonitor {
    fn name(&self) -> &str {
        "trace"
    }

    fn printgen(&self) -> usize {
        self.printgen
    }

    fn start(&mut self, model: &Model) -> Result<(), PhyloError> {
        self.ids = select_nodes(model, &self.names)?;
        self.labels = column_labels(model, &self.ids)?;
        Ok(())
    }

    fn notify(&mut self, iteration: usize, model: &Model) -> Result<(), PhyloError> {
        let values = column_values(model, &self.ids)?;
        self.records.push(TraceRecord {
            run: self.run,
            iteration,
            posterior: model.cached_log_posterior()?,
            values: self.labels.iter().cloned().zip(values).collect(),
        });
        Ok(())
    }
}
