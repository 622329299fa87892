use phylo_core::errors::PhyloError;
use phylo_tree::{BranchRateSummary, RatePair};
use serde::{Deserialize, Serialize};

use super::{argument, DeterministicFunction};
use crate::value::Value;

/// Number of shift events on a tree parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct TotalNumEvents;

impl DeterministicFunction for TotalNumEvents {
    fn name(&self) -> &str {
        "total_num_events"
    }

    fn arity(&self) -> usize {
        1
    }

    fn evaluate(&self, args: &[&Value]) -> Result<Value, PhyloError> {
        let tree = argument(args, 0, self.name())?.as_tree()?;
        Ok(Value::Natural(tree.total_num_events() as u64))
    }
}

/// Per-branch rate summaries of a tree. Parents: `tree`, root `speciation`, root `extinction`.
///
/// Updates reuse the previous summary and only recompute subtrees below edited branches.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchRateFunction;

impl BranchRateFunction {
    fn inputs<'a>(&self, args: &[&'a Value]) -> Result<(&'a phylo_tree::AugmentedTree, RatePair), PhyloError> {
        let tree = argument(args, 0, self.name())?.as_tree()?;
        let root = RatePair::new(
            argument(args, 1, self.name())?.as_real()?,
            argument(args, 2, self.name())?.as_real()?,
        );
        Ok((tree, root))
    }
}

impl DeterministicFunction for BranchRateFunction {
    fn name(&self) -> &str {
        "branch_rates"
    }

    fn arity(&self) -> usize {
        3
    }

    fn evaluate(&self, args: &[&Value]) -> Result<Value, PhyloError> {
        let (tree, root) = self.inputs(args)?;
        Ok(Value::BranchRates(Box::new(BranchRateSummary::compute(tree, root)?)))
    }

    fn update(&self, current: &mut Value, args: &[&Value]) -> Result<(), PhyloError> {
        let (tree, root) = self.inputs(args)?;
        match current {
            Value::BranchRates(summary) => {
                summary.refresh(tree, root)?;
            }
            other => *other = Value::BranchRates(Box::new(BranchRateSummary::compute(tree, root)?)),
        }
        Ok(())
    }
}

/// Statistic extracted per branch by [`BranchRateVector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateStatistic {
    /// Time-averaged speciation rate.
    Speciation,
    /// Time-averaged extinction rate.
    Extinction,
    /// Speciation minus extinction of the averaged rates.
    NetDiversification,
    /// Extinction over speciation of the averaged rates.
    Turnover,
    /// Number of events on the branch.
    NumEvents,
}

/// Vector of one statistic per branch, read from a branch-rate parent.
///
/// Entries follow the tree's branch order (vertex order without the root).
#[derive(Debug, Clone, Copy)]
pub struct BranchRateVector {
    statistic: RateStatistic,
}

impl BranchRateVector {
    /// Creates the function for `statistic`.
    pub fn new(statistic: RateStatistic) -> Self {
        Self { statistic }
    }
}

impl DeterministicFunction for BranchRateVector {
    fn name(&self) -> &str {
        match self.statistic {
            RateStatistic::Speciation => "avg_speciation",
            RateStatistic::Extinction => "avg_extinction",
            RateStatistic::NetDiversification => "net_diversification",
            RateStatistic::Turnover => "turnover",
            RateStatistic::NumEvents => "num_events_per_branch",
        }
    }

    fn arity(&self) -> usize {
        1
    }

    fn evaluate(&self, args: &[&Value]) -> Result<Value, PhyloError> {
        let summary = argument(args, 0, self.name())?.as_branch_rates()?;
        let values = summary
            .branch_entries()
            .map(|(_, branch)| match self.statistic {
                RateStatistic::Speciation => branch.mean.speciation,
                RateStatistic::Extinction => branch.mean.extinction,
                RateStatistic::NetDiversification => branch.mean.net_diversification(),
                RateStatistic::Turnover => branch.mean.turnover(),
                RateStatistic::NumEvents => branch.num_events as f64,
            })
            .collect();
        Ok(Value::Vector(values))
    }
}
