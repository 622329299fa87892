//! Deterministic functions and the built-in set.

use std::fmt::Debug;

use phylo_core::errors::{ErrorInfo, PhyloError};

use crate::value::Value;

mod arithmetic;
mod tree_stats;

pub use arithmetic::{Arithmetic, ArithmeticOp, Exp};
pub use tree_stats::{BranchRateFunction, BranchRateVector, RateStatistic, TotalNumEvents};

/// Pure function computing a deterministic node from its parents.
pub trait DeterministicFunction: Debug + Send + Sync {
    /// Stable name used in logs and error context.
    fn name(&self) -> &str;

    /// Number of parent values expected.
    fn arity(&self) -> usize;

    /// Computes the value from scratch.
    fn evaluate(&self, args: &[&Value]) -> Result<Value, PhyloError>;

    /// Brings `current` up to date with `args`.
    ///
    /// Functions with an incremental update path override this; the default
    /// recomputes from scratch.
    fn update(&self, current: &mut Value, args: &[&Value]) -> Result<(), PhyloError> {
        *current = self.evaluate(args)?;
        Ok(())
    }
}

pub(crate) fn argument<'a>(args: &[&'a Value], index: usize, function: &str) -> Result<&'a Value, PhyloError> {
    args.get(index).copied().ok_or_else(|| {
        PhyloError::Configuration(
            ErrorInfo::new("missing-argument", "function argument not bound")
                .with_context("function", function)
                .with_context("index", index),
        )
    })
}
