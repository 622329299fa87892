//! A single Markov chain: model copy, scheduler, RNG substream and iteration counter.

use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_core::RngHandle;
use phylo_model::Model;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::config::StartingValues;
use crate::monitor::Monitor;
use crate::scheduler::MoveScheduler;

/// Prior draws attempted before falling back to supplied starting values.
pub const MAX_STARTING_DRAWS: usize = 100;

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEnd {
    /// Every requested iteration ran.
    Completed,
    /// Cancellation was observed at an iteration boundary.
    Cancelled,
}

/// An independent chain.
#[derive(Debug, Clone)]
pub struct Chain {
    index: usize,
    model: Model,
    scheduler: MoveScheduler,
    rng: RngHandle,
    iteration: usize,
    log_posterior: f64,
}

impl Chain {
    /// Creates a chain from its own copies of the model and scheduler.
    pub fn new(index: usize, model: Model, scheduler: MoveScheduler, rng: RngHandle) -> Self {
        Self {
            index,
            model,
            scheduler,
            rng,
            iteration: 0,
            log_posterior: f64::NAN,
        }
    }

    /// Run index of the chain.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current model state.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Move registry with its counters.
    pub fn scheduler(&self) -> &MoveScheduler {
        &self.scheduler
    }

    /// Sampling iterations completed.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Log posterior of the current state.
    pub fn log_posterior(&self) -> f64 {
        self.log_posterior
    }

    /// Chooses a starting state with a finite posterior.
    ///
    /// Under [`StartingValues::DrawFromPrior`] every free node is redrawn from
    /// its prior; nodes whose distribution cannot draw keep their supplied
    /// value. If no draw yields a finite posterior the supplied values are used.
    pub fn initialize(&mut self, policy: StartingValues) -> Result<f64, PhyloError> {
        if self.scheduler.total_weight() <= 0.0 {
            return Err(PhyloError::Configuration(ErrorInfo::new(
                "no-moves",
                "no move with positive weight is registered",
            )));
        }
        if policy == StartingValues::DrawFromPrior {
            for attempt in 0..MAX_STARTING_DRAWS {
                self.draw_free_nodes()?;
                match self.model.log_posterior() {
                    Ok(value) => {
                        debug!(run = self.index, attempt, log_posterior = value, "starting values drawn from prior");
                        self.log_posterior = value;
                        return Ok(value);
                    }
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => debug!(run = self.index, attempt, error = %err, "starting draw rejected"),
                }
            }
            warn!(
                run = self.index,
                attempts = MAX_STARTING_DRAWS,
                "no valid prior draw; falling back to supplied starting values"
            );
            for id in self.model.free_stochastic_nodes() {
                self.model.reset_to_initial(id)?;
            }
        }
        let value = self.model.log_posterior().map_err(|err| {
            err.with_context("run", self.index)
                .with_context("phase", "initialization")
        })?;
        self.log_posterior = value;
        Ok(value)
    }

    fn draw_free_nodes(&mut self) -> Result<(), PhyloError> {
        for id in self.model.free_stochastic_nodes() {
            if let Err(err) = self.model.redraw(id, &mut self.rng) {
                let name = self.model.node(id)?.name().to_string();
                if !self.model.reset_to_initial(id)? {
                    return Err(err.with_context("node", name));
                }
                debug!(run = self.index, node = %name, "prior draw unavailable; using supplied value");
            }
        }
        Ok(())
    }

    /// Runs a tuning phase that notifies no monitors, then clears the counters.
    pub fn burn_in(
        &mut self,
        generations: usize,
        tuning_interval: usize,
        cancel: &CancellationToken,
    ) -> Result<PhaseEnd, PhyloError> {
        for iteration in 1..=generations {
            if cancel.is_cancelled() {
                return Ok(PhaseEnd::Cancelled);
            }
            self.log_posterior = self.scheduler.step(&mut self.model, &mut self.rng)?.log_posterior;
            if tuning_interval > 0 && iteration % tuning_interval == 0 {
                self.scheduler.tune_all();
            }
        }
        self.scheduler.reset_counters();
        Ok(PhaseEnd::Completed)
    }

    /// Runs the sampling phase.
    ///
    /// Monitors see iteration 0 and every iteration divisible by their
    /// printgen. Cancellation is checked before each iteration.
    pub fn sample(
        &mut self,
        generations: usize,
        tuning_interval: usize,
        monitors: &mut [&mut dyn Monitor],
        cancel: &CancellationToken,
    ) -> Result<PhaseEnd, PhyloError> {
        self.iteration = 0;
        self.notify(monitors)?;
        for iteration in 1..=generations {
            if cancel.is_cancelled() {
                return Ok(PhaseEnd::Cancelled);
            }
            self.log_posterior = self.scheduler.step(&mut self.model, &mut self.rng)?.log_posterior;
            self.iteration = iteration;
            if tuning_interval > 0 && iteration % tuning_interval == 0 {
                self.scheduler.tune_all();
            }
            self.notify(monitors)?;
        }
        Ok(PhaseEnd::Completed)
    }

    fn notify(&self, monitors: &mut [&mut dyn Monitor]) -> Result<(), PhyloError> {
        for monitor in monitors.iter_mut() {
            if self.iteration % monitor.printgen().max(1) == 0 {
                monitor
                    .notify(self.iteration, &self.model)
                    .map_err(|err| err.with_context("monitor", monitor.name()))?;
            }
        }
        Ok(())
    }
}
