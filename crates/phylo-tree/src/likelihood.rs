use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_core::TreeNodeId;
use serde::{Deserialize, Serialize};

use crate::rates::{BranchRateSummary, RatePair};
use crate::tree::AugmentedTree;

const DEGENERATE_TOLERANCE: f64 = 1e-9;
const HALF_LN_TWO_PI: f64 = 0.918_938_533_204_672_8;

/// Extinction probability and log lineage density at a point on a branch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentState {
    /// Probability that a lineage alive at this point leaves no sampled descendants.
    pub extinction: f64,
    /// Log probability density of the observed subtree below this point.
    pub log_density: f64,
}

impl SegmentState {
    /// State at a sampled tip under sampling fraction `rho`.
    pub fn tip(rho: f64) -> Self {
        Self {
            extinction: 1.0 - rho,
            log_density: rho.ln(),
        }
    }
}

/// Integrates `(E, D)` backwards in time over `duration` under constant `rates`.
pub fn integrate_segment(
    state: SegmentState,
    rates: RatePair,
    duration: f64,
) -> Result<SegmentState, PhyloError> {
    if !rates.is_valid_rate() {
        return Err(numerical("invalid-rates", "speciation must be positive and extinction non-negative")
            .with_context("speciation", rates.speciation)
            .with_context("extinction", rates.extinction));
    }
    if !(duration >= 0.0 && duration.is_finite()) {
        return Err(numerical("invalid-duration", "segment duration must be finite and non-negative")
            .with_context("duration", duration));
    }
    let lambda = rates.speciation;
    let mu = rates.extinction;
    let e0 = state.extinction;
    let a = lambda - mu;

    let next = if a.abs() <= DEGENERATE_TOLERANCE * (lambda + mu) {
        let w0 = 1.0 - e0;
        let growth = 1.0 + lambda * w0 * duration;
        SegmentState {
            extinction: 1.0 - w0 / growth,
            log_density: state.log_density - 2.0 * growth.ln(),
        }
    } else {
        let c = (lambda * e0 - mu) / (e0 - 1.0);
        let ln_head = (lambda - c).abs().ln();
        if a >= 0.0 {
            let x = (-a * duration).exp();
            let denom = c * x - lambda;
            SegmentState {
                extinction: (c * x - mu) / denom,
                log_density: state.log_density - a * duration + 2.0 * ln_head
                    - 2.0 * denom.abs().ln(),
            }
        } else {
            let y = (a * duration).exp();
            let denom = c - lambda * y;
            SegmentState {
                extinction: (c - mu * y) / denom,
                log_density: state.log_density + a * duration + 2.0 * ln_head
                    - 2.0 * denom.abs().ln(),
            }
        }
    };
    if !next.extinction.is_finite() || !next.log_density.is_finite() {
        return Err(numerical("segment-non-finite", "segment integration produced a non-finite state")
            .with_context("speciation", lambda)
            .with_context("extinction", mu)
            .with_context("duration", duration));
    }
    Ok(next)
}

/// Log-likelihood of `tree` under a birth-death process whose rates shift at the tree's events.
///
/// Rates on each segment are `root` times the multipliers of every ancestral event.
/// Tips are sampled with probability `rho`; the likelihood is conditioned on the
/// survival of both crown lineages (or of the stem lineage when the root has a
/// single child). With no events this reduces to the constant-rate birth-death
/// likelihood.
pub fn birth_death_log_likelihood(
    tree: &AugmentedTree,
    root: RatePair,
    rho: f64,
) -> Result<f64, PhyloError> {
    if !(rho > 0.0 && rho <= 1.0) {
        return Err(numerical("invalid-sampling-fraction", "sampling fraction must lie in (0, 1]")
            .with_context("rho", rho));
    }
    if !root.is_valid_rate() {
        return Err(numerical("invalid-rates", "speciation must be positive and extinction non-negative")
            .with_context("speciation", root.speciation)
            .with_context("extinction", root.extinction));
    }
    if !tree.is_binary() {
        return Err(PhyloError::Configuration(ErrorInfo::new(
            "non-binary-tree",
            "birth-death likelihoods require bifurcating internal vertices",
        )));
    }
    let root_vertex = tree.root();
    if tree.children(root_vertex).is_empty() {
        return Err(PhyloError::Configuration(ErrorInfo::new(
            "empty-tree",
            "tree has no branches",
        )));
    }
    let summary = BranchRateSummary::compute(tree, root)?;
    let mut top_states: Vec<Option<SegmentState>> = vec![None; tree.num_vertices()];
    for vertex in tree.postorder() {
        if vertex == root_vertex {
            continue;
        }
        let children = tree.children(vertex);
        let bottom = if children.is_empty() {
            SegmentState::tip(rho)
        } else {
            let speciation = summary
                .branch(vertex)
                .map(|b| b.bottom.speciation)
                .unwrap_or(root.speciation);
            let mut log_density = speciation.ln();
            let mut extinction = None;
            for child in children {
                let state = child_state(&top_states, *child)?;
                log_density += state.log_density;
                extinction.get_or_insert(state.extinction);
            }
            SegmentState {
                extinction: extinction.unwrap_or(0.0),
                log_density,
            }
        };
        top_states[vertex.index()] = Some(integrate_branch(tree, &summary, vertex, bottom)?);
    }

    let children = tree.children(root_vertex);
    let mut log_likelihood = 0.0;
    let mut extinction = 0.0;
    for child in children {
        let state = child_state(&top_states, *child)?;
        log_likelihood += state.log_density;
        extinction = state.extinction;
    }
    let survival = (1.0 - extinction).ln();
    log_likelihood -= children.len() as f64 * survival;
    if !log_likelihood.is_finite() {
        return Err(numerical("likelihood-non-finite", "birth-death likelihood is not finite"));
    }
    Ok(log_likelihood)
}

fn child_state(states: &[Option<SegmentState>], child: TreeNodeId) -> Result<SegmentState, PhyloError> {
    states[child.index()].ok_or_else(|| {
        PhyloError::Graph(
            ErrorInfo::new("traversal-order", "child visited after its parent")
                .with_context("vertex", child),
        )
    })
}

/// Integrates from the child end of `branch` to its parent end across its events.
fn integrate_branch(
    tree: &AugmentedTree,
    summary: &BranchRateSummary,
    branch: TreeNodeId,
    bottom: SegmentState,
) -> Result<SegmentState, PhyloError> {
    let length = tree.branch_length(branch)?;
    let top = summary
        .branch(branch)
        .map(|b| b.top)
        .ok_or_else(|| PhyloError::Graph(ErrorInfo::new("unknown-branch", "branch missing from rate summary")))?;

    // (start offset, rates) for every segment, parent end first.
    let mut segments = Vec::with_capacity(tree.num_events_on(branch) + 1);
    let mut current = top;
    segments.push((0.0, current));
    for id in tree.events_on(branch) {
        let event = tree.event(*id).ok_or_else(|| {
            PhyloError::Dimension(
                ErrorInfo::new("dangling-event", "branch references a missing event")
                    .with_context("event", id),
            )
        })?;
        current = current * event.multipliers;
        segments.push((event.offset, current));
    }

    let mut state = bottom;
    let mut end = length;
    for (start, rates) in segments.into_iter().rev() {
        state = integrate_segment(state, rates, end - start)
            .map_err(|err| err.with_context("branch", branch))?;
        end = start;
    }
    Ok(state)
}

/// Log density of the tree's events under a compound Poisson shift process.
///
/// Events arrive at `rate` per unit branch length and each carries independent
/// log-normal(0, `sigma`) speciation and extinction multipliers.
pub fn shift_process_log_prior(tree: &AugmentedTree, rate: f64, sigma: f64) -> Result<f64, PhyloError> {
    if !(rate >= 0.0 && rate.is_finite()) || !(sigma > 0.0 && sigma.is_finite()) {
        return Err(numerical("invalid-shift-process", "shift rate must be non-negative and sigma positive")
            .with_context("rate", rate)
            .with_context("sigma", sigma));
    }
    let count = tree.total_num_events();
    let mut log_prior = -rate * tree.tree_length();
    if count > 0 {
        log_prior += count as f64 * rate.ln();
    }
    for id in tree.event_ids() {
        if let Some(event) = tree.event(*id) {
            log_prior += log_normal_density(event.multipliers.speciation, sigma)
                + log_normal_density(event.multipliers.extinction, sigma);
        }
    }
    Ok(log_prior)
}

/// Log density of a log-normal(0, `sigma`) variate.
pub(crate) fn log_normal_density(value: f64, sigma: f64) -> f64 {
    if value <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let z = value.ln() / sigma;
    -value.ln() - sigma.ln() - HALF_LN_TWO_PI - 0.5 * z * z
}

fn numerical(code: &str, message: &str) -> PhyloError {
    PhyloError::Numerical(ErrorInfo::new(code, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_birth_segment_decays_exponentially() {
        let state = integrate_segment(SegmentState::tip(1.0), RatePair::new(0.7, 0.0), 2.0).unwrap();
        assert_eq!(state.extinction, 0.0);
        assert!((state.log_density + 1.4).abs() < 1e-12);
    }

    #[test]
    fn equal_rates_use_the_limit_form() {
        let exact = integrate_segment(SegmentState::tip(0.5), RatePair::new(1.0, 1.0), 1.5).unwrap();
        let near = integrate_segment(SegmentState::tip(0.5), RatePair::new(1.0, 1.0 - 1e-7), 1.5).unwrap();
        assert!((exact.extinction - near.extinction).abs() < 1e-5);
        assert!((exact.log_density - near.log_density).abs() < 1e-5);
    }

    #[test]
    fn extinction_fixed_point_is_stationary() {
        let rates = RatePair::new(2.0, 0.5);
        let start = SegmentState {
            extinction: 0.25,
            log_density: 0.0,
        };
        let state = integrate_segment(start, rates, 3.0).unwrap();
        assert!((state.extinction - 0.25).abs() < 1e-12);
    }
}
