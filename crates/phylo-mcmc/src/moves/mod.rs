//! Proposal moves acting on the free parts of a model.

use std::fmt::Debug;

use phylo_core::errors::PhyloError;
use phylo_core::{NodeId, RngHandle};
use phylo_model::Model;

mod events;
mod scalar;

pub use events::{EventAdd, EventRateScale, EventRemove, EventResimulate, EventSlide};
pub use scalar::{ScaleMove, SlideMove};

/// Acceptance rate targeted when tuning single-parameter moves.
pub const DEFAULT_TARGET_ACCEPTANCE: f64 = 0.44;

/// Hastings and Jacobian terms reported by a proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proposal {
    /// Log ratio of reverse to forward proposal densities.
    pub log_hastings: f64,
    /// Log absolute Jacobian of the dimension-matching map.
    pub log_jacobian: f64,
}

impl Proposal {
    /// A symmetric fixed-dimension proposal.
    pub fn symmetric() -> Self {
        Self::with_hastings(0.0)
    }

    /// A proposal with the given log Hastings ratio and unit Jacobian.
    pub fn with_hastings(log_hastings: f64) -> Self {
        Self {
            log_hastings,
            log_jacobian: 0.0,
        }
    }

    /// A proposal that must be rejected without evaluating the posterior.
    pub fn rejected() -> Self {
        Self::with_hastings(f64::NEG_INFINITY)
    }

    /// Sum of the Hastings and Jacobian terms.
    pub fn log_ratio(&self) -> f64 {
        self.log_hastings + self.log_jacobian
    }
}

/// Role of a move inside a reversible-jump pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralRole {
    /// Inserts one latent event.
    Birth,
    /// Deletes one latent event.
    Death,
}

/// Capability implemented by every proposal move.
///
/// A move mutates its targets through the model's write methods and reports
/// the Hastings terms. The scheduler owns the weight and acceptance counters
/// and performs the accept/reject step.
pub trait Move: Debug + Send + Sync {
    /// Stable name used in summaries and logs.
    fn name(&self) -> &str;

    /// Nodes written by the move.
    fn targets(&self) -> &[NodeId];

    /// Whether the move only edits latent events, which stay writable on observed trees.
    fn edits_latent_events_only(&self) -> bool {
        false
    }

    /// Membership in a birth/death pair, if any.
    fn structural_role(&self) -> Option<StructuralRole> {
        None
    }

    /// Receives `ln(w_complement / w_self)` once the pair is registered.
    fn set_selection_log_ratio(&mut self, _log_ratio: f64) {}

    /// Mutates the targets and returns the Hastings terms.
    fn propose(&mut self, model: &mut Model, rng: &mut RngHandle) -> Result<Proposal, PhyloError>;

    /// Whether [`Move::tune`] adapts anything.
    fn is_tunable(&self) -> bool {
        false
    }

    /// Adapts the step size given the acceptance rate of the last window.
    fn tune(&mut self, _acceptance_rate: f64) {}

    /// Current value of the tuning parameter.
    fn tuning_parameter(&self) -> Option<f64> {
        None
    }

    /// Clones the move behind a box.
    fn clone_box(&self) -> Box<dyn Move>;
}

impl Clone for Box<dyn Move> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Multiplicative step-size adaptation towards `target`.
///
/// Above the target the step grows by up to a factor of two; below it the
/// step shrinks by up to a factor of two.
pub fn tuned_step(step: f64, acceptance_rate: f64, target: f64) -> f64 {
    if acceptance_rate > target {
        step * (1.0 + (acceptance_rate - target) / (1.0 - target))
    } else {
        step / (2.0 - acceptance_rate / target)
    }
}

/// Reflects `x` back into `[lower, upper]`.
pub fn reflect(x: f64, lower: f64, upper: f64) -> f64 {
    let width = upper - lower;
    if !(width > 0.0) || !width.is_finite() {
        return x.clamp(lower, upper);
    }
    let mut y = (x - lower).rem_euclid(2.0 * width);
    if y > width {
        y = 2.0 * width - y;
    }
    lower + y
}
