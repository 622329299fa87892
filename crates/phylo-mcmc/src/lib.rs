#![deny(missing_docs)]
#![doc = include_str!("../docs/mcmc-api.md")]

/// Cancellation flag observed between iterations.
pub mod cancel;
/// Single-chain state and phases.
pub mod chain;
/// Deterministic trace combination.
pub mod combine;
/// YAML configuration schema and defaults.
pub mod config;
/// Deterministic seed derivation helpers.
pub mod determinism;
/// Run manifest serialization helpers.
pub mod manifest;
/// Move acceptance summaries.
pub mod metrics;
/// Monitors that record model state every few iterations.
pub mod monitor;
/// Proposal moves and step-size tuning.
pub mod moves;
/// Multi-run analysis driver.
pub mod runner;
/// Weighted move selection and the accept/reject step.
pub mod scheduler;

pub use cancel::CancellationToken;
pub use chain::{Chain, PhaseEnd};
pub use config::{BurnInConfig, CombinePolicy, OutputConfig, RunConfig, SeedPolicy, StartingValues, TraceConfig};
pub use monitor::{Monitor, MonitorSpec, TraceRecord};
pub use moves::{Move, Proposal};
pub use runner::{Analysis, AnalysisSummary, RunOutcome};
pub use scheduler::{MoveScheduler, MoveStats, StepOutcome};
