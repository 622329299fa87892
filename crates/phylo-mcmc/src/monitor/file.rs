use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use phylo_core::errors::PhyloError;
use phylo_core::NodeId;
use phylo_model::Model;

use super::{column_labels, column_values, monitor_io, select_nodes, Monitor};

/// Line appended when a run stops before its last iteration.
pub const INCOMPLETE_MARKER: &str = "# incomplete";

/// Writes tab-delimited node values, one flushed line per record.
#[derive(Debug)]
pub struct ModelMonitor {
    path: PathBuf,
    printgen: usize,
    names: Vec<String>,
    ids: Vec<NodeId>,
    writer: Option<BufWriter<File>>,
}

impl ModelMonitor {
    /// Creates a monitor writing `names` (or every numeric node) to `path`.
    pub fn new(path: PathBuf, printgen: usize, names: Vec<String>) -> Self {
        Self {
            path,
            printgen,
            names,
            ids: Vec::new(),
            writer: None,
        }
    }

    fn write_line(&mut self, line: &str) -> Result<(), PhyloError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        writeln!(writer, "{line}")
            .and_then(|_| writer.flush())
            .map_err(|err| monitor_io("monitor-write", &self.path, err))
    }
}

impl Monitor for ModelMonitor {
    fn name(&self) -> &str {
        "model"
    }

    fn printgen(&self) -> usize {
        self.printgen
    }

    fn start(&mut self, model: &Model) -> Result<(), PhyloError> {
        self.ids = select_nodes(model, &self.names)?;
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| monitor_io("monitor-mkdir", parent, err))?;
        }
        let file = File::create(&self.path).map_err(|err| monitor_io("monitor-create", &self.path, err))?;
        self.writer = Some(BufWriter::new(file));
        let mut header = vec!["Iteration".to_string(), "Posterior".to_string()];
        header.extend(column_labels(model, &self.ids)?);
        self.write_line(&header.join("\t"))
    }

    fn notify(&mut self, iteration: usize, model: &Model) -> Result<(), PhyloError> {
        let mut fields = vec![iteration.to_string(), model.cached_log_posterior()?.to_string()];
        fields.extend(column_values(model, &self.ids)?.iter().map(f64::to_string));
        self.write_line(&fields.join("\t"))
    }

    fn finish(&mut self, completed: bool) -> Result<(), PhyloError> {
        if !completed {
            self.write_line(INCOMPLETE_MARKER)?;
        }
        self.writer = None;
        Ok(())
    }

    fn output_file(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
