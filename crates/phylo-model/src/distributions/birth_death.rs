use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_core::RngHandle;
use phylo_tree::{birth_death_log_likelihood, resimulate_events, RatePair, ShiftProcess};

use super::{real_param, Distribution};
use crate::value::Value;

fn unsupported_sample(distribution: &str) -> PhyloError {
    PhyloError::Configuration(
        ErrorInfo::new("sample-unsupported", "tree topologies cannot be drawn from this distribution")
            .with_context("distribution", distribution)
            .with_hint("supply an explicit starting tree"),
    )
}

fn shift_process(params: &[&Value], offset: usize) -> Result<ShiftProcess, PhyloError> {
    let rate = real_param(params, offset, "shift_rate")?;
    let sigma = real_param(params, offset + 1, "sigma")?;
    ShiftProcess::new(rate, sigma)
}

/// Constant-rate birth-death process on a time tree.
///
/// Parents: `speciation`, `extinction`, `rho` (sampling fraction). The tree
/// must not carry shift events.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantRateBirthDeath;

impl Distribution for ConstantRateBirthDeath {
    fn name(&self) -> &str {
        "constant_rate_birth_death"
    }

    fn arity(&self) -> usize {
        3
    }

    fn sample(&self, _params: &[&Value], _rng: &mut RngHandle) -> Result<Value, PhyloError> {
        Err(unsupported_sample(self.name()))
    }

    fn log_density(&self, value: &Value, params: &[&Value]) -> Result<f64, PhyloError> {
        let tree = value.as_tree()?;
        if tree.total_num_events() > 0 {
            return Err(PhyloError::Configuration(
                ErrorInfo::new("unexpected-events", "constant-rate trees cannot carry shift events")
                    .with_context("events", tree.total_num_events()),
            ));
        }
        let rates = RatePair::new(
            real_param(params, 0, "speciation")?,
            real_param(params, 1, "extinction")?,
        );
        birth_death_log_likelihood(tree, rates, real_param(params, 2, "rho")?)
    }
}

/// Birth-death process whose rates shift at latent events on the branches.
///
/// Parents: `speciation` and `extinction` at the root, `shift_rate` (events per
/// unit branch length), `sigma` (log-scale spread of the event multipliers) and
/// `rho`. The density is the tree likelihood given the events times the density
/// of the events under the shift process.
#[derive(Debug, Clone, Copy, Default)]
pub struct BirthDeathShift;

impl Distribution for BirthDeathShift {
    fn name(&self) -> &str {
        "birth_death_shift"
    }

    fn arity(&self) -> usize {
        5
    }

    fn sample(&self, _params: &[&Value], _rng: &mut RngHandle) -> Result<Value, PhyloError> {
        Err(unsupported_sample(self.name()))
    }

    fn log_density(&self, value: &Value, params: &[&Value]) -> Result<f64, PhyloError> {
        let tree = value.as_tree()?;
        let root = RatePair::new(
            real_param(params, 0, "speciation")?,
            real_param(params, 1, "extinction")?,
        );
        let process = shift_process(params, 2)?;
        let rho = real_param(params, 4, "rho")?;
        Ok(birth_death_log_likelihood(tree, root, rho)? + process.log_prior(tree)?)
    }

    fn has_latent_events(&self) -> bool {
        true
    }

    fn can_resimulate(&self) -> bool {
        true
    }

    fn resimulate(&self, value: &mut Value, params: &[&Value], rng: &mut RngHandle) -> Result<(), PhyloError> {
        let process = shift_process(params, 2)?;
        resimulate_events(value.as_tree_mut()?, &process, rng)?;
        Ok(())
    }

    fn resimulation_log_density(&self, value: &Value, params: &[&Value]) -> Result<f64, PhyloError> {
        shift_process(params, 2)?.log_prior(value.as_tree()?)
    }
}

/// Compound Poisson prior on the events of a fixed tree.
///
/// Parents: `shift_rate`, `sigma`. Only the events contribute to the density.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShiftProcessPrior;

impl Distribution for ShiftProcessPrior {
    fn name(&self) -> &str {
        "shift_process"
    }

    fn arity(&self) -> usize {
        2
    }

    fn sample(&self, _params: &[&Value], _rng: &mut RngHandle) -> Result<Value, PhyloError> {
        Err(unsupported_sample(self.name()))
    }

    fn log_density(&self, value: &Value, params: &[&Value]) -> Result<f64, PhyloError> {
        shift_process(params, 0)?.log_prior(value.as_tree()?)
    }

    fn has_latent_events(&self) -> bool {
        true
    }

    fn can_resimulate(&self) -> bool {
        true
    }

    fn resimulate(&self, value: &mut Value, params: &[&Value], rng: &mut RngHandle) -> Result<(), PhyloError> {
        let process = shift_process(params, 0)?;
        resimulate_events(value.as_tree_mut()?, &process, rng)?;
        Ok(())
    }

    fn resimulation_log_density(&self, value: &Value, params: &[&Value]) -> Result<f64, PhyloError> {
        self.log_density(value, params)
    }
}
