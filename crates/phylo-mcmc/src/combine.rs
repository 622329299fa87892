//! Deterministic merging of per-run traces.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use indexmap::IndexSet;
use phylo_core::errors::{ErrorInfo, PhyloError};

use crate::config::CombinePolicy;
use crate::monitor::TraceRecord;

/// Merges per-run traces independently of the order runs finished in.
///
/// `Mixed` orders by iteration then run; `Sequential` by run then iteration.
pub fn combine_traces(traces: Vec<Vec<TraceRecord>>, policy: CombinePolicy) -> Vec<TraceRecord> {
    let mut combined: Vec<TraceRecord> = traces.into_iter().flatten().collect();
    match policy {
        CombinePolicy::Mixed => combined.sort_by_key(|record| (record.iteration, record.run)),
        CombinePolicy::Sequential => combined.sort_by_key(|record| (record.run, record.iteration)),
    }
    combined
}

/// Writes a combined trace as a tab-delimited file.
///
/// Columns are the union of every record's labels in first-seen order; a
/// missing value is written as `NA`.
pub fn write_trace(path: &Path, records: &[TraceRecord]) -> Result<(), PhyloError> {
    let io_error = |code: &str, err: std::io::Error| {
        PhyloError::Serde(ErrorInfo::new(code, err.to_string()).with_context("path", path.display()))
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| io_error("trace-mkdir", err))?;
    }
    let mut columns: IndexSet<&str> = IndexSet::new();
    for record in records {
        columns.extend(record.values.keys().map(String::as_str));
    }
    let file = File::create(path).map_err(|err| io_error("trace-create", err))?;
    let mut writer = BufWriter::new(file);
    let mut header = vec!["Run", "Iteration", "Posterior"];
    header.extend(columns.iter().copied());
    writeln!(writer, "{}", header.join("\t")).map_err(|err| io_error("trace-write", err))?;
    for record in records {
        let mut fields = vec![record.run.to_string(), record.iteration.to_string(), record.posterior.to_string()];
        fields.extend(columns.iter().map(|column| {
            record
                .values
                .get(*column)
                .map(f64::to_string)
                .unwrap_or_else(|| "NA".to_string())
        }));
        writeln!(writer, "{}", fields.join("\t")).map_err(|err| io_error("trace-write", err))?;
    }
    writer.flush().map_err(|err| io_error("trace-write", err))
}
