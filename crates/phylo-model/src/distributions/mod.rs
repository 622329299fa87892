//! Distribution capability and the built-in distributions.

use std::fmt::Debug;

use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_core::RngHandle;

use crate::value::Value;

mod birth_death;
mod continuous;

pub use birth_death::{BirthDeathShift, ConstantRateBirthDeath, ShiftProcessPrior};
pub use continuous::{Exponential, Gamma, LogNormal, Normal, Uniform};

/// Capability implemented by every distribution a stochastic node can carry.
///
/// Parameters arrive as the current values of the node's parents, in the order
/// they were registered.
pub trait Distribution: Debug + Send + Sync {
    /// Stable name used in logs and error context.
    fn name(&self) -> &str;

    /// Number of parent values expected.
    fn arity(&self) -> usize;

    /// Draws a value given the current parameters.
    fn sample(&self, params: &[&Value], rng: &mut RngHandle) -> Result<Value, PhyloError>;

    /// Log-density of `value` given the current parameters.
    ///
    /// Values outside the support yield a numerical error.
    fn log_density(&self, value: &Value, params: &[&Value]) -> Result<f64, PhyloError>;

    /// Whether the value carries latent rate-shift events that may be moved
    /// even when the node is clamped.
    fn has_latent_events(&self) -> bool {
        false
    }

    /// Whether [`Distribution::resimulate`] is supported.
    fn can_resimulate(&self) -> bool {
        false
    }

    /// Redraws the latent structure of `value` in place, keeping its observed part.
    fn resimulate(
        &self,
        _value: &mut Value,
        _params: &[&Value],
        _rng: &mut RngHandle,
    ) -> Result<(), PhyloError> {
        Err(PhyloError::Configuration(
            ErrorInfo::new("resimulate-unsupported", "distribution cannot resimulate latent state")
                .with_context("distribution", self.name()),
        ))
    }

    /// Log-density of the latent structure under the resimulation kernel.
    fn resimulation_log_density(&self, _value: &Value, _params: &[&Value]) -> Result<f64, PhyloError> {
        Err(PhyloError::Configuration(
            ErrorInfo::new("resimulate-unsupported", "distribution cannot resimulate latent state")
                .with_context("distribution", self.name()),
        ))
    }
}

pub(crate) fn real_param(params: &[&Value], index: usize, name: &str) -> Result<f64, PhyloError> {
    let value = params.get(index).ok_or_else(|| {
        PhyloError::Configuration(
            ErrorInfo::new("missing-parameter", "distribution parameter not bound")
                .with_context("parameter", name),
        )
    })?;
    value.as_real().map_err(|err| err.with_context("parameter", name))
}

pub(crate) fn outside_support(distribution: &str, value: f64) -> PhyloError {
    PhyloError::Numerical(
        ErrorInfo::new("outside-support", "value lies outside the distribution's support")
            .with_context("distribution", distribution)
            .with_context("value", value),
    )
}

pub(crate) fn invalid_parameter(distribution: &str, name: &str, value: f64) -> PhyloError {
    PhyloError::Numerical(
        ErrorInfo::new("invalid-parameter", "distribution parameter outside its domain")
            .with_context("distribution", distribution)
            .with_context("parameter", name)
            .with_context("value", value),
    )
}
