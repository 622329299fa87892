use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_core::{NodeId, RngHandle};
use phylo_model::Model;

use super::{reflect, tuned_step, Move, Proposal, DEFAULT_TARGET_ACCEPTANCE};

fn check_step(step: f64, what: &str) -> Result<(), PhyloError> {
    if !(step > 0.0 && step.is_finite()) {
        return Err(PhyloError::Configuration(
            ErrorInfo::new("invalid-step", "move step size must be positive and finite")
                .with_context("parameter", what)
                .with_context("value", step),
        ));
    }
    Ok(())
}

/// Multiplies a positive real by `exp(lambda * (u - 0.5))`.
#[derive(Debug, Clone)]
pub struct ScaleMove {
    targets: [NodeId; 1],
    lambda: f64,
    tunable: bool,
    target_acceptance: f64,
}

impl ScaleMove {
    /// Creates a tunable scale move with step `lambda`.
    pub fn new(target: NodeId, lambda: f64) -> Result<Self, PhyloError> {
        check_step(lambda, "lambda")?;
        Ok(Self {
            targets: [target],
            lambda,
            tunable: true,
            target_acceptance: DEFAULT_TARGET_ACCEPTANCE,
        })
    }

    /// Disables tuning.
    pub fn fixed(mut self) -> Self {
        self.tunable = false;
        self
    }
}

impl Move for ScaleMove {
    fn name(&self) -> &str {
        "scale"
    }

    fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    fn propose(&mut self, model: &mut Model, rng: &mut RngHandle) -> Result<Proposal, PhyloError> {
        let factor = (self.lambda * (rng.uniform() - 0.5)).exp();
        model.with_value_mut(self.targets[0], |value| {
            *value.as_real_mut()? *= factor;
            Ok(())
        })?;
        Ok(Proposal::with_hastings(factor.ln()))
    }

    fn is_tunable(&self) -> bool {
        self.tunable
    }

    fn tune(&mut self, acceptance_rate: f64) {
        if self.tunable {
            self.lambda = tuned_step(self.lambda, acceptance_rate, self.target_acceptance);
        }
    }

    fn tuning_parameter(&self) -> Option<f64> {
        Some(self.lambda)
    }

    fn clone_box(&self) -> Box<dyn Move> {
        Box::new(self.clone())
    }
}

/// Adds `window * (u - 0.5)` to a real, reflecting at optional bounds.
#[derive(Debug, Clone)]
pub struct SlideMove {
    targets: [NodeId; 1],
    window: f64,
    bounds: Option<(f64, f64)>,
    tunable: bool,
    target_acceptance: f64,
}

impl SlideMove {
    /// Creates a tunable, unbounded slide move.
    pub fn new(target: NodeId, window: f64) -> Result<Self, PhyloError> {
        check_step(window, "window")?;
        Ok(Self {
            targets: [target],
            window,
            bounds: None,
            tunable: true,
            target_acceptance: DEFAULT_TARGET_ACCEPTANCE,
        })
    }

    /// Reflects proposals at `lower` and `upper`.
    pub fn bounded(mut self, lower: f64, upper: f64) -> Result<Self, PhyloError> {
        if !(lower < upper) {
            return Err(PhyloError::Configuration(
                ErrorInfo::new("invalid-bounds", "slide bounds must satisfy lower < upper")
                    .with_context("lower", lower)
                    .with_context("upper", upper),
            ));
        }
        self.bounds = Some((lower, upper));
        Ok(self)
    }

    /// Disables tuning.
    pub fn fixed(mut self) -> Self {
        self.tunable = false;
        self
    }
}

impl Move for SlideMove {
    fn name(&self) -> &str {
        "slide"
    }

    fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    fn propose(&mut self, model: &mut Model, rng: &mut RngHandle) -> Result<Proposal, PhyloError> {
        let delta = self.window * (rng.uniform() - 0.5);
        let bounds = self.bounds;
        model.with_value_mut(self.targets[0], |value| {
            let x = value.as_real_mut()?;
            *x = match bounds {
                Some((lower, upper)) => reflect(*x + delta, lower, upper),
                None => *x + delta,
            };
            Ok(())
        })?;
        Ok(Proposal::symmetric())
    }

    fn is_tunable(&self) -> bool {
        self.tunable
    }

    fn tune(&mut self, acceptance_rate: f64) {
        if self.tunable {
            self.window = tuned_step(self.window, acceptance_rate, self.target_acceptance);
        }
    }

    fn tuning_parameter(&self) -> Option<f64> {
        Some(self.window)
    }

    fn clone_box(&self) -> Box<dyn Move> {
        Box::new(self.clone())
    }
}
