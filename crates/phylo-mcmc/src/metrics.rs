use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Per-move acceptance summary exported after a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MoveSummary {
    /// Run index the move belongs to.
    pub run: usize,
    /// Move name.
    pub name: String,
    /// Selection weight.
    pub weight: f64,
    /// Proposals issued during sampling.
    pub proposed: u64,
    /// Proposals accepted during sampling.
    pub accepted: u64,
    /// `accepted / proposed`, zero when nothing was proposed.
    pub acceptance_rate: f64,
    /// Final tuning parameter, if the move has one.
    pub tuning_parameter: Option<f64>,
}

/// Writes move summaries to a CSV file.
pub fn write_move_summary_csv<P: AsRef<Path>>(path: P, rows: &[MoveSummary]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "run,move,weight,proposed,accepted,acceptance_rate,tuning_parameter")?;
    for row in rows {
        let tuning = row
            .tuning_parameter
            .map(|value| format!("{value:.6}"))
            .unwrap_or_default();
        writeln!(
            file,
            "{},{},{},{},{},{:.6},{}",
            row.run, row.name, row.weight, row.proposed, row.accepted, row.acceptance_rate, tuning
        )?;
    }
    Ok(())
}
