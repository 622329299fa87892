use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_core::{EventId, NodeId, RngHandle};
use phylo_model::Model;
use phylo_tree::{draw_multipliers, AugmentedTree, RatePair, ShiftProcess};

use super::{reflect, tuned_step, Move, Proposal, StructuralRole, DEFAULT_TARGET_ACCEPTANCE};

fn tree_of(model: &Model, id: NodeId) -> Result<&AugmentedTree, PhyloError> {
    model.value(id)?.as_tree().map_err(|err| err.with_context("node", id))
}

fn pick_event(tree: &AugmentedTree, rng: &mut RngHandle) -> Option<EventId> {
    let ids = tree.event_ids();
    if ids.is_empty() {
        None
    } else {
        Some(ids[rng.index(ids.len())])
    }
}

fn proposal_kernel(sigma: f64) -> Result<ShiftProcess, PhyloError> {
    ShiftProcess::new(0.0, sigma).map_err(|err| match err {
        PhyloError::Numerical(info) => PhyloError::Configuration(info),
        other => other,
    })
}

/// Birth half of the reversible-jump pair: inserts one event uniformly over
/// the tree length with log-normal multipliers.
#[derive(Debug, Clone)]
pub struct EventAdd {
    targets: [NodeId; 1],
    kernel: ShiftProcess,
    selection_log_ratio: f64,
}

impl EventAdd {
    /// Creates the move; `sigma` is the log-scale spread of proposed multipliers.
    pub fn new(tree: NodeId, sigma: f64) -> Result<Self, PhyloError> {
        Ok(Self {
            targets: [tree],
            kernel: proposal_kernel(sigma)?,
            selection_log_ratio: 0.0,
        })
    }

    pub(crate) fn sigma(&self) -> f64 {
        self.kernel.sigma
    }

    pub(crate) fn tree(&self) -> NodeId {
        self.targets[0]
    }
}

impl Move for EventAdd {
    fn name(&self) -> &str {
        "event_add"
    }

    fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    fn edits_latent_events_only(&self) -> bool {
        true
    }

    fn structural_role(&self) -> Option<StructuralRole> {
        Some(StructuralRole::Birth)
    }

    fn set_selection_log_ratio(&mut self, log_ratio: f64) {
        self.selection_log_ratio = log_ratio;
    }

    fn propose(&mut self, model: &mut Model, rng: &mut RngHandle) -> Result<Proposal, PhyloError> {
        let (length, count, branch, offset) = {
            let tree = tree_of(model, self.targets[0])?;
            let length = tree.tree_length();
            let (branch, offset) = tree.locate(rng.uniform() * length)?;
            (length, tree.total_num_events(), branch, offset)
        };
        if !(offset > 0.0) {
            return Ok(Proposal::rejected());
        }
        let multipliers = draw_multipliers(rng, self.kernel.sigma)?;
        model.with_events_mut(self.targets[0], |tree| tree.add_event(branch, offset, multipliers))?;
        let log_hastings = length.ln() - ((count + 1) as f64).ln()
            - self.kernel.log_multiplier_density(multipliers)
            + self.selection_log_ratio;
        Ok(Proposal::with_hastings(log_hastings))
    }

    fn clone_box(&self) -> Box<dyn Move> {
        Box::new(self.clone())
    }
}

/// Death half of the reversible-jump pair: deletes one event chosen uniformly.
#[derive(Debug, Clone)]
pub struct EventRemove {
    targets: [NodeId; 1],
    kernel: ShiftProcess,
    selection_log_ratio: f64,
}

impl EventRemove {
    /// Creates the move; `sigma` must match the paired [`EventAdd`].
    pub fn new(tree: NodeId, sigma: f64) -> Result<Self, PhyloError> {
        Ok(Self {
            targets: [tree],
            kernel: proposal_kernel(sigma)?,
            selection_log_ratio: 0.0,
        })
    }

    pub(crate) fn sigma(&self) -> f64 {
        self.kernel.sigma
    }

    pub(crate) fn tree(&self) -> NodeId {
        self.targets[0]
    }
}

impl Move for EventRemove {
    fn name(&self) -> &str {
        "event_remove"
    }

    fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    fn edits_latent_events_only(&self) -> bool {
        true
    }

    fn structural_role(&self) -> Option<StructuralRole> {
        Some(StructuralRole::Death)
    }

    fn set_selection_log_ratio(&mut self, log_ratio: f64) {
        self.selection_log_ratio = log_ratio;
    }

    fn propose(&mut self, model: &mut Model, rng: &mut RngHandle) -> Result<Proposal, PhyloError> {
        let (length, count, chosen) = {
            let tree = tree_of(model, self.targets[0])?;
            (tree.tree_length(), tree.total_num_events(), pick_event(tree, rng))
        };
        let Some(id) = chosen else {
            return Ok(Proposal::rejected());
        };
        let removed = model.with_events_mut(self.targets[0], |tree| tree.remove_event(id))?;
        let log_hastings = (count as f64).ln() - length.ln()
            + self.kernel.log_multiplier_density(removed.multipliers)
            + self.selection_log_ratio;
        Ok(Proposal::with_hastings(log_hastings))
    }

    fn clone_box(&self) -> Box<dyn Move> {
        Box::new(self.clone())
    }
}

/// Slides one event along its branch, reflecting at the branch ends.
#[derive(Debug, Clone)]
pub struct EventSlide {
    targets: [NodeId; 1],
    window: f64,
}

impl EventSlide {
    /// Creates a tunable slide with the given window, in time units.
    pub fn new(tree: NodeId, window: f64) -> Result<Self, PhyloError> {
        if !(window > 0.0 && window.is_finite()) {
            return Err(PhyloError::Configuration(
                ErrorInfo::new("invalid-step", "event slide window must be positive and finite")
                    .with_context("value", window),
            ));
        }
        Ok(Self {
            targets: [tree],
            window,
        })
    }
}

impl Move for EventSlide {
    fn name(&self) -> &str {
        "event_slide"
    }

    fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    fn edits_latent_events_only(&self) -> bool {
        true
    }

    fn propose(&mut self, model: &mut Model, rng: &mut RngHandle) -> Result<Proposal, PhyloError> {
        let (chosen, branch, length, offset) = {
            let tree = tree_of(model, self.targets[0])?;
            match pick_event(tree, rng).and_then(|id| tree.event(id).map(|event| (id, *event))) {
                Some((id, event)) => (id, event.branch, tree.branch_length(event.branch)?, event.offset),
                None => return Ok(Proposal::rejected()),
            }
        };
        let moved = reflect(offset + self.window * (rng.uniform() - 0.5), 0.0, length);
        if !(moved > 0.0 && moved < length) {
            return Ok(Proposal::rejected());
        }
        model.with_events_mut(self.targets[0], |tree| tree.relocate_event(chosen, branch, moved))?;
        Ok(Proposal::symmetric())
    }

    fn is_tunable(&self) -> bool {
        true
    }

    fn tune(&mut self, acceptance_rate: f64) {
        self.window = tuned_step(self.window, acceptance_rate, DEFAULT_TARGET_ACCEPTANCE);
    }

    fn tuning_parameter(&self) -> Option<f64> {
        Some(self.window)
    }

    fn clone_box(&self) -> Box<dyn Move> {
        Box::new(self.clone())
    }
}

/// Scales the speciation or extinction multiplier of one event.
#[derive(Debug, Clone)]
pub struct EventRateScale {
    targets: [NodeId; 1],
    lambda: f64,
}

impl EventRateScale {
    /// Creates a tunable multiplier scale move with step `lambda`.
    pub fn new(tree: NodeId, lambda: f64) -> Result<Self, PhyloError> {
        if !(lambda > 0.0 && lambda.is_finite()) {
            return Err(PhyloError::Configuration(
                ErrorInfo::new("invalid-step", "event rate scale step must be positive and finite")
                    .with_context("value", lambda),
            ));
        }
        Ok(Self {
            targets: [tree],
            lambda,
        })
    }
}

impl Move for EventRateScale {
    fn name(&self) -> &str {
        "event_rate_scale"
    }

    fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    fn edits_latent_events_only(&self) -> bool {
        true
    }

    fn propose(&mut self, model: &mut Model, rng: &mut RngHandle) -> Result<Proposal, PhyloError> {
        let (chosen, current) = {
            let tree = tree_of(model, self.targets[0])?;
            match pick_event(tree, rng).and_then(|id| tree.event(id).map(|event| (id, event.multipliers))) {
                Some(found) => found,
                None => return Ok(Proposal::rejected()),
            }
        };
        let factor = (self.lambda * (rng.uniform() - 0.5)).exp();
        let scaled = if rng.uniform() < 0.5 {
            RatePair::new(current.speciation * factor, current.extinction)
        } else {
            RatePair::new(current.speciation, current.extinction * factor)
        };
        model.with_events_mut(self.targets[0], |tree| tree.set_event_multipliers(chosen, scaled))?;
        Ok(Proposal::with_hastings(factor.ln()))
    }

    fn is_tunable(&self) -> bool {
        true
    }

    fn tune(&mut self, acceptance_rate: f64) {
        self.lambda = tuned_step(self.lambda, acceptance_rate, DEFAULT_TARGET_ACCEPTANCE);
    }

    fn tuning_parameter(&self) -> Option<f64> {
        Some(self.lambda)
    }

    fn clone_box(&self) -> Box<dyn Move> {
        Box::new(self.clone())
    }
}

/// Independence proposal redrawing every event from the node's distribution.
#[derive(Debug, Clone)]
pub struct EventResimulate {
    targets: [NodeId; 1],
}

impl EventResimulate {
    /// Creates the move.
    pub fn new(tree: NodeId) -> Self {
        Self { targets: [tree] }
    }
}

impl Move for EventResimulate {
    fn name(&self) -> &str {
        "event_resimulate"
    }

    fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    fn edits_latent_events_only(&self) -> bool {
        true
    }

    fn propose(&mut self, model: &mut Model, rng: &mut RngHandle) -> Result<Proposal, PhyloError> {
        let before = model.resimulation_log_density(self.targets[0])?;
        model.resimulate(self.targets[0], rng)?;
        let after = model.resimulation_log_density(self.targets[0])?;
        Ok(Proposal::with_hastings(before - after))
    }

    fn clone_box(&self) -> Box<dyn Move> {
        Box::new(self.clone())
    }
}
