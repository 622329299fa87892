use phylo_core::errors::PhyloError;
use phylo_core::RngHandle;
use rand_distr::Distribution as _;
use statrs::function::gamma::ln_gamma;

use super::{invalid_parameter, outside_support, real_param, Distribution};
use crate::value::Value;

const HALF_LN_TWO_PI: f64 = 0.918_938_533_204_672_8;

/// Uniform on `[lower, upper]`. Parents: `lower`, `upper`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uniform;

impl Uniform {
    fn bounds(params: &[&Value]) -> Result<(f64, f64), PhyloError> {
        let lower = real_param(params, 0, "lower")?;
        let upper = real_param(params, 1, "upper")?;
        if !(lower < upper) || !lower.is_finite() || !upper.is_finite() {
            return Err(invalid_parameter("uniform", "upper", upper).with_context("lower", lower));
        }
        Ok((lower, upper))
    }
}

impl Distribution for Uniform {
    fn name(&self) -> &str {
        "uniform"
    }

    fn arity(&self) -> usize {
        2
    }

    fn sample(&self, params: &[&Value], rng: &mut RngHandle) -> Result<Value, PhyloError> {
        let (lower, upper) = Self::bounds(params)?;
        Ok(Value::Real(lower + (upper - lower) * rng.uniform()))
    }

    fn log_density(&self, value: &Value, params: &[&Value]) -> Result<f64, PhyloError> {
        let (lower, upper) = Self::bounds(params)?;
        let x = value.as_real()?;
        if !(x >= lower && x <= upper) {
            return Err(outside_support(self.name(), x));
        }
        Ok(-(upper - lower).ln())
    }
}

/// Exponential with the given rate. Parent: `rate`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exponential;

impl Distribution for Exponential {
    fn name(&self) -> &str {
        "exponential"
    }

    fn arity(&self) -> usize {
        1
    }

    fn sample(&self, params: &[&Value], rng: &mut RngHandle) -> Result<Value, PhyloError> {
        let rate = real_param(params, 0, "rate")?;
        let dist = rand_distr::Exp::new(rate).map_err(|_| invalid_parameter(self.name(), "rate", rate))?;
        Ok(Value::Real(dist.sample(rng.inner_mut())))
    }

    fn log_density(&self, value: &Value, params: &[&Value]) -> Result<f64, PhyloError> {
        let rate = real_param(params, 0, "rate")?;
        if !(rate > 0.0 && rate.is_finite()) {
            return Err(invalid_parameter(self.name(), "rate", rate));
        }
        let x = value.as_real()?;
        if !(x >= 0.0 && x.is_finite()) {
            return Err(outside_support(self.name(), x));
        }
        Ok(rate.ln() - rate * x)
    }
}

/// Normal with mean and standard deviation. Parents: `mean`, `sd`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normal;

impl Distribution for Normal {
    fn name(&self) -> &str {
        "normal"
    }

    fn arity(&self) -> usize {
        2
    }

    fn sample(&self, params: &[&Value], rng: &mut RngHandle) -> Result<Value, PhyloError> {
        let mean = real_param(params, 0, "mean")?;
        let sd = real_param(params, 1, "sd")?;
        let dist = rand_distr::Normal::new(mean, sd).map_err(|_| invalid_parameter(self.name(), "sd", sd))?;
        Ok(Value::Real(dist.sample(rng.inner_mut())))
    }

    fn log_density(&self, value: &Value, params: &[&Value]) -> Result<f64, PhyloError> {
        let mean = real_param(params, 0, "mean")?;
        let sd = real_param(params, 1, "sd")?;
        if !(sd > 0.0 && sd.is_finite()) {
            return Err(invalid_parameter(self.name(), "sd", sd));
        }
        let x = value.as_real()?;
        if !x.is_finite() {
            return Err(outside_support(self.name(), x));
        }
        let z = (x - mean) / sd;
        Ok(-sd.ln() - HALF_LN_TWO_PI - 0.5 * z * z)
    }
}

/// Log-normal with log-scale mean and standard deviation. Parents: `mean_log`, `sd_log`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNormal;

impl Distribution for LogNormal {
    fn name(&self) -> &str {
        "lognormal"
    }

    fn arity(&self) -> usize {
        2
    }

    fn sample(&self, params: &[&Value], rng: &mut RngHandle) -> Result<Value, PhyloError> {
        let mean_log = real_param(params, 0, "mean_log")?;
        let sd_log = real_param(params, 1, "sd_log")?;
        let dist = rand_distr::LogNormal::new(mean_log, sd_log)
            .map_err(|_| invalid_parameter(self.name(), "sd_log", sd_log))?;
        Ok(Value::Real(dist.sample(rng.inner_mut())))
    }

    fn log_density(&self, value: &Value, params: &[&Value]) -> Result<f64, PhyloError> {
        let mean_log = real_param(params, 0, "mean_log")?;
        let sd_log = real_param(params, 1, "sd_log")?;
        if !(sd_log > 0.0 && sd_log.is_finite()) {
            return Err(invalid_parameter(self.name(), "sd_log", sd_log));
        }
        let x = value.as_real()?;
        if !(x > 0.0 && x.is_finite()) {
            return Err(outside_support(self.name(), x));
        }
        let z = (x.ln() - mean_log) / sd_log;
        Ok(-x.ln() - sd_log.ln() - HALF_LN_TWO_PI - 0.5 * z * z)
    }
}

/// Gamma with shape and rate. Parents: `shape`, `rate`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gamma;

impl Gamma {
    fn params(params: &[&Value]) -> Result<(f64, f64), PhyloError> {
        let shape = real_param(params, 0, "shape")?;
        let rate = real_param(params, 1, "rate")?;
        if !(shape > 0.0 && shape.is_finite()) {
            return Err(invalid_parameter("gamma", "shape", shape));
        }
        if !(rate > 0.0 && rate.is_finite()) {
            return Err(invalid_parameter("gamma", "rate", rate));
        }
        Ok((shape, rate))
    }
}

impl Distribution for Gamma {
    fn name(&self) -> &str {
        "gamma"
    }

    fn arity(&self) -> usize {
        2
    }

    fn sample(&self, params: &[&Value], rng: &mut RngHandle) -> Result<Value, PhyloError> {
        let (shape, rate) = Self::params(params)?;
        let dist = rand_distr::Gamma::new(shape, 1.0 / rate)
            .map_err(|_| invalid_parameter(self.name(), "shape", shape))?;
        Ok(Value::Real(dist.sample(rng.inner_mut())))
    }

    fn log_density(&self, value: &Value, params: &[&Value]) -> Result<f64, PhyloError> {
        let (shape, rate) = Self::params(params)?;
        let x = value.as_real()?;
        if !(x > 0.0 && x.is_finite()) {
            return Err(outside_support(self.name(), x));
        }
        Ok(shape * rate.ln() - ln_gamma(shape) + (shape - 1.0) * x.ln() - rate * x)
    }
}
