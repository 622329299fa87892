use phylo_core::errors::PhyloError;
use phylo_core::NodeId;
use phylo_model::Model;
use tracing::info;

use super::{column_labels, column_values, select_nodes, Monitor};

/// Reports progress through `tracing` at info level.
#[derive(Debug)]
pub struct ScreenMonitor {
    run: usize,
    printgen: usize,
    names: Vec<String>,
    ids: Vec<NodeId>,
    labels: Vec<String>,
}

impl ScreenMonitor {
    /// Creates a monitor for run `run` reporting `names`.
    pub fn new(run: usize, printgen: usize, names: Vec<String>) -> Self {
        Self {
            run,
            printgen,
            names,
            ids: Vec::new(),
            labels: Vec::new(),
        }
    }
}

impl Monitor for ScreenMonitor {
    fn name(&self) -> &str {
        "screen"
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
        let state = self
            .labels
            .iter()
            .zip(values)
            .map(|(label, value)| format!("{label}={value:.4}"))
            .collect::<Vec<_>>()
            .join(" ");
        info!(
            target: "phylo_mcmc::screen",
            run = self.run,
            iteration,
            posterior = model.cached_log_posterior()?,
            state = %state,
            "chain state"
        );
        Ok(())
    }

    fn finish(&mut self, completed: bool) -> Result<(), PhyloError> {
        info!(target: "phylo_mcmc::screen", run = self.run, completed, "monitor closed");
        Ok(())
    }
}
