//! Weighted move selection, the accept/reject step and windowed tuning.

use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_core::RngHandle;
use phylo_model::Model;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metrics::MoveSummary;
use crate::moves::{EventAdd, EventRemove, Move};

/// Acceptance counters for one registered move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveStats {
    /// Proposals since the counters were last reset.
    pub proposed: u64,
    /// Accepted proposals since the counters were last reset.
    pub accepted: u64,
    /// Proposals in the current tuning window.
    pub window_proposed: u64,
    /// Accepted proposals in the current tuning window.
    pub window_accepted: u64,
}

impl MoveStats {
    /// Overall acceptance rate, zero when nothing was proposed.
    pub fn acceptance_rate(&self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }

    fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        self.window_proposed += 1;
        if accepted {
            self.accepted += 1;
            self.window_accepted += 1;
        }
    }
}

#[derive(Debug, Clone)]
struct ScheduledMove {
    mv: Box<dyn Move>,
    weight: f64,
    stats: MoveStats,
}

/// Result of one scheduler iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Index of the move that was tried.
    pub move_index: usize,
    /// Whether the proposal was accepted.
    pub accepted: bool,
    /// Log posterior after the keep or restore.
    pub log_posterior: f64,
}

/// Insertion-ordered move registry with a cumulative weight table.
#[derive(Debug, Clone, Default)]
pub struct MoveScheduler {
    entries: Vec<ScheduledMove>,
    cumulative: Vec<f64>,
}

impl MoveScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered moves, disabled ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no move is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the weights of every enabled move.
    pub fn total_weight(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    /// Registers a fixed-dimension move.
    ///
    /// The weight must be positive and every target must be writable by the
    /// move. Birth and death moves go through [`MoveScheduler::register_event_pair`].
    pub fn register(&mut self, model: &Model, mv: impl Move + 'static, weight: f64) -> Result<usize, PhyloError> {
        if mv.structural_role().is_some() {
            return Err(PhyloError::Configuration(
                ErrorInfo::new("unpaired-structural-move", "event birth and death moves must be registered as a pair")
                    .with_context("move", mv.name())
                    .with_hint("use register_event_pair"),
            ));
        }
        if !(weight > 0.0 && weight.is_finite()) {
            return Err(scheduler_error("invalid-weight", "move weights must be positive and finite")
                .with_context("move", mv.name())
                .with_context("weight", weight));
        }
        check_targets(model, &mv)?;
        Ok(self.push(Box::new(mv), weight))
    }

    /// Registers an event birth/death pair on the same tree.
    ///
    /// Either weight may be zero, which disables that half; the other half
    /// then always rejects, so the event count stays fixed.
    pub fn register_event_pair(
        &mut self,
        model: &Model,
        mut add: EventAdd,
        add_weight: f64,
        mut remove: EventRemove,
        remove_weight: f64,
    ) -> Result<(usize, usize), PhyloError> {
        for weight in [add_weight, remove_weight] {
            if !(weight >= 0.0 && weight.is_finite()) {
                return Err(scheduler_error("invalid-weight", "move weights must be non-negative and finite")
                    .with_context("weight", weight));
            }
        }
        if add_weight + remove_weight == 0.0 {
            return Err(scheduler_error("inert-event-pair", "at least one half of an event pair needs weight"));
        }
        if add.tree() != remove.tree() {
            return Err(scheduler_error("mismatched-event-pair", "birth and death moves must target the same tree")
                .with_context("add", add.tree())
                .with_context("remove", remove.tree()));
        }
        if add.sigma() != remove.sigma() {
            return Err(scheduler_error("mismatched-event-pair", "birth and death moves must share the multiplier kernel")
                .with_context("add_sigma", add.sigma())
                .with_context("remove_sigma", remove.sigma()));
        }
        check_targets(model, &add)?;
        add.set_selection_log_ratio(remove_weight.ln() - add_weight.ln());
        remove.set_selection_log_ratio(add_weight.ln() - remove_weight.ln());
        let add_index = self.push(Box::new(add), add_weight);
        let remove_index = self.push(Box::new(remove), remove_weight);
        Ok((add_index, remove_index))
    }

    /// Draws a move index with probability proportional to its weight.
    pub fn select(&self, rng: &mut RngHandle) -> Result<usize, PhyloError> {
        let total = self.total_weight();
        if !(total > 0.0) {
            return Err(scheduler_error("no-moves", "no move with positive weight is registered"));
        }
        let draw = rng.uniform() * total;
        let index = self.cumulative.partition_point(|bound| *bound <= draw);
        Ok(index.min(self.entries.len() - 1))
    }

    /// Performs one iteration: select, propose, accept or reject, record.
    ///
    /// Numerical failures reject the proposal; any other failure is returned
    /// after the model has been restored.
    pub fn step(&mut self, model: &mut Model, rng: &mut RngHandle) -> Result<StepOutcome, PhyloError> {
        let current = model.log_posterior()?;
        let move_index = self.select(rng)?;
        let entry = &mut self.entries[move_index];
        let accepted = match entry.mv.propose(model, rng) {
            Ok(proposal) => {
                let log_ratio = proposal.log_ratio();
                if log_ratio.is_nan() || log_ratio == f64::NEG_INFINITY {
                    false
                } else {
                    match model.log_posterior() {
                        Ok(proposed) => {
                            let log_alpha = proposed - current + log_ratio;
                            log_alpha >= 0.0 || rng.uniform_positive().ln() < log_alpha
                        }
                        Err(err) if err.is_fatal() => {
                            model.restore_all();
                            return Err(err.with_context("move", entry.mv.name()));
                        }
                        Err(_) => false,
                    }
                }
            }
            Err(err) if err.is_fatal() => {
                model.restore_all();
                return Err(err.with_context("move", entry.mv.name()));
            }
            Err(_) => false,
        };
        let log_posterior = if accepted {
            model.keep_all()?;
            model.log_posterior()?
        } else {
            model.restore_all();
            current
        };
        entry.stats.record(accepted);
        Ok(StepOutcome {
            move_index,
            accepted,
            log_posterior,
        })
    }

    /// Tunes every tunable move from its window acceptance rate and resets the windows.
    pub fn tune_all(&mut self) {
        for entry in &mut self.entries {
            if entry.mv.is_tunable() && entry.stats.window_proposed > 0 {
                let rate = entry.stats.window_accepted as f64 / entry.stats.window_proposed as f64;
                let before = entry.mv.tuning_parameter();
                entry.mv.tune(rate);
                debug!(
                    target: "phylo_mcmc::tuning",
                    name = entry.mv.name(),
                    acceptance = rate,
                    before = ?before,
                    after = ?entry.mv.tuning_parameter(),
                    "tuned move"
                );
            }
            entry.stats.window_proposed = 0;
            entry.stats.window_accepted = 0;
        }
    }

    /// Clears every acceptance counter.
    pub fn reset_counters(&mut self) {
        for entry in &mut self.entries {
            entry.stats = MoveStats::default();
        }
    }

    /// The registered move at `index`.
    pub fn move_at(&self, index: usize) -> Option<&dyn Move> {
        self.entries.get(index).map(|entry| entry.mv.as_ref())
    }

    /// Counters of the move at `index`.
    pub fn stats(&self, index: usize) -> Option<&MoveStats> {
        self.entries.get(index).map(|entry| &entry.stats)
    }

    /// Per-move summary rows tagged with `run`.
    pub fn summary(&self, run: usize) -> Vec<MoveSummary> {
        self.entries
            .iter()
            .map(|entry| MoveSummary {
                run,
                name: entry.mv.name().to_string(),
                weight: entry.weight,
                proposed: entry.stats.proposed,
                accepted: entry.stats.accepted,
                acceptance_rate: entry.stats.acceptance_rate(),
                tuning_parameter: entry.mv.tuning_parameter(),
            })
            .collect()
    }

    fn push(&mut self, mv: Box<dyn Move>, weight: f64) -> usize {
        self.entries.push(ScheduledMove {
            mv,
            weight,
            stats: MoveStats::default(),
        });
        self.rebuild();
        self.entries.len() - 1
    }

    fn rebuild(&mut self) {
        let mut running = 0.0;
        self.cumulative = self
            .entries
            .iter()
            .map(|entry| {
                running += entry.weight;
                running
            })
            .collect();
    }
}

fn check_targets(model: &Model, mv: &dyn Move) -> Result<(), PhyloError> {
    if mv.targets().is_empty() {
        return Err(scheduler_error("no-targets", "move targets no node").with_context("move", mv.name()));
    }
    for target in mv.targets() {
        let node = model.node(*target)?;
        let Some(distribution) = node.distribution() else {
            return Err(scheduler_error("non-stochastic-target", "moves may only target stochastic nodes")
                .with_context("move", mv.name())
                .with_context("node", node.name()));
        };
        if mv.edits_latent_events_only() {
            if !distribution.has_latent_events() {
                return Err(scheduler_error("no-latent-events", "target distribution carries no latent events")
                    .with_context("move", mv.name())
                    .with_context("node", node.name())
                    .with_context("distribution", distribution.name()));
            }
        } else if node.is_clamped() {
            return Err(scheduler_error("clamped-target", "moves may not change observed values")
                .with_context("move", mv.name())
                .with_context("node", node.name()));
        }
    }
    Ok(())
}

fn scheduler_error(code: &str, message: &str) -> PhyloError {
    PhyloError::Configuration(ErrorInfo::new(code, message))
}
