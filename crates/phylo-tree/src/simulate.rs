use phylo_core::errors::{ErrorInfo, PhyloError};
use rand::Rng;
use rand_distr::{Distribution, LogNormal, Poisson};
use serde::{Deserialize, Serialize};

use crate::likelihood::{log_normal_density, shift_process_log_prior};
use crate::rates::RatePair;
use crate::tree::AugmentedTree;

/// Compound Poisson process placing rate-shift events on a tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShiftProcess {
    /// Expected number of events per unit branch length.
    pub rate: f64,
    /// Log-scale standard deviation of the event multipliers.
    pub sigma: f64,
}

impl ShiftProcess {
    /// Creates a process, rejecting negative rates and non-positive sigma.
    pub fn new(rate: f64, sigma: f64) -> Result<Self, PhyloError> {
        if !(rate >= 0.0 && rate.is_finite()) || !(sigma > 0.0 && sigma.is_finite()) {
            return Err(PhyloError::Numerical(
                ErrorInfo::new("invalid-shift-process", "shift rate must be non-negative and sigma positive")
                    .with_context("rate", rate)
                    .with_context("sigma", sigma),
            ));
        }
        Ok(Self { rate, sigma })
    }

    /// Log density of the tree's current events under this process.
    pub fn log_prior(&self, tree: &AugmentedTree) -> Result<f64, PhyloError> {
        shift_process_log_prior(tree, self.rate, self.sigma)
    }

    /// Log density of a multiplier pair.
    pub fn log_multiplier_density(&self, multipliers: RatePair) -> f64 {
        log_normal_density(multipliers.speciation, self.sigma)
            + log_normal_density(multipliers.extinction, self.sigma)
    }
}

/// Draws a pair of independent log-normal(0, `sigma`) multipliers.
pub fn draw_multipliers<R: Rng + ?Sized>(rng: &mut R, sigma: f64) -> Result<RatePair, PhyloError> {
    let dist = LogNormal::new(0.0, sigma).map_err(|err| {
        PhyloError::Numerical(
            ErrorInfo::new("invalid-multiplier-sigma", err.to_string()).with_context("sigma", sigma),
        )
    })?;
    Ok(RatePair::new(dist.sample(rng), dist.sample(rng)))
}

/// Discards every event and redraws them from `process`.
///
/// Returns the number of events placed.
pub fn resimulate_events<R: Rng + ?Sized>(
    tree: &mut AugmentedTree,
    process: &ShiftProcess,
    rng: &mut R,
) -> Result<usize, PhyloError> {
    tree.clear_events();
    if process.rate == 0.0 {
        return Ok(0);
    }
    let mut placed = 0usize;
    for branch in tree.branches() {
        let length = tree.branch_length(branch)?;
        let poisson = Poisson::new(process.rate * length).map_err(|err| {
            PhyloError::Numerical(
                ErrorInfo::new("invalid-poisson-mean", err.to_string())
                    .with_context("branch", branch)
                    .with_context("mean", process.rate * length),
            )
        })?;
        let count: f64 = poisson.sample(rng);
        for _ in 0..count as usize {
            let offset = loop {
                let candidate = rng.gen::<f64>() * length;
                if candidate > 0.0 && candidate < length {
                    break candidate;
                }
            };
            let multipliers = draw_multipliers(rng, process.sigma)?;
            tree.add_event(branch, offset, multipliers)?;
            placed += 1;
        }
    }
    Ok(placed)
}
