use std::ops::Mul;

use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_core::TreeNodeId;
use serde::{Deserialize, Serialize};

use crate::tree::AugmentedTree;

/// A (speciation, extinction) pair, used both for absolute rates and for multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatePair {
    /// Speciation (birth) component.
    pub speciation: f64,
    /// Extinction (death) component.
    pub extinction: f64,
}

impl RatePair {
    /// Creates a new pair.
    pub const fn new(speciation: f64, extinction: f64) -> Self {
        Self {
            speciation,
            extinction,
        }
    }

    /// The multiplicative identity.
    pub const fn unit() -> Self {
        Self::new(1.0, 1.0)
    }

    /// Speciation minus extinction.
    pub fn net_diversification(&self) -> f64 {
        self.speciation - self.extinction
    }

    /// Extinction divided by speciation.
    pub fn turnover(&self) -> f64 {
        self.extinction / self.speciation
    }

    /// Returns whether both components are finite, speciation is positive and
    /// extinction is non-negative.
    pub fn is_valid_rate(&self) -> bool {
        self.speciation.is_finite()
            && self.extinction.is_finite()
            && self.speciation > 0.0
            && self.extinction >= 0.0
    }

    /// Returns whether both components are finite and strictly positive.
    pub fn is_valid_multiplier(&self) -> bool {
        self.speciation.is_finite()
            && self.extinction.is_finite()
            && self.speciation > 0.0
            && self.extinction > 0.0
    }
}

impl Mul for RatePair {
    type Output = RatePair;

    fn mul(self, rhs: RatePair) -> RatePair {
        RatePair::new(
            self.speciation * rhs.speciation,
            self.extinction * rhs.extinction,
        )
    }
}

/// Rate bookkeeping for a single branch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BranchRates {
    /// Time-averaged rates over the branch.
    pub mean: RatePair,
    /// Rates in effect at the parent end of the branch.
    pub top: RatePair,
    /// Rates in effect at the child end of the branch (and at the child vertex).
    pub bottom: RatePair,
    /// Number of events sitting on the branch.
    pub num_events: usize,
}

impl BranchRates {
    fn at_root(root: RatePair) -> Self {
        Self {
            mean: root,
            top: root,
            bottom: root,
            num_events: 0,
        }
    }
}

/// Per-branch rate summaries derived from an augmented tree and a root rate pair.
///
/// The summary remembers the tree revision it reflects. [`BranchRateSummary::refresh`]
/// recomputes only the subtrees hanging below branches edited after that revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRateSummary {
    root: RatePair,
    root_vertex: TreeNodeId,
    revision: u64,
    branches: Vec<BranchRates>,
}

impl BranchRateSummary {
    /// Computes the summary for every branch of `tree`.
    pub fn compute(tree: &AugmentedTree, root: RatePair) -> Result<Self, PhyloError> {
        let mut summary = Self {
            root,
            root_vertex: tree.root(),
            revision: tree.revision(),
            branches: vec![BranchRates::at_root(root); tree.num_vertices()],
        };
        for vertex in tree.preorder() {
            summary.recompute_branch(tree, vertex)?;
        }
        Ok(summary)
    }

    /// Brings the summary up to date with `tree` and `root`.
    ///
    /// Returns the number of branches that were recomputed.
    pub fn refresh(&mut self, tree: &AugmentedTree, root: RatePair) -> Result<usize, PhyloError> {
        let incremental = self.root == root
            && self.branches.len() == tree.num_vertices()
            && self.revision <= tree.revision();
        if !incremental {
            *self = Self::compute(tree, root)?;
            return Ok(tree.num_vertices());
        }
        let changed: Vec<TreeNodeId> = tree
            .preorder()
            .into_iter()
            .filter(|vertex| tree.branch_revision(*vertex) > self.revision)
            .collect();
        let mut visited = vec![false; tree.num_vertices()];
        let mut recomputed = 0usize;
        for start in changed {
            if visited[start.index()] {
                continue;
            }
            let mut stack = vec![start];
            while let Some(vertex) = stack.pop() {
                if visited[vertex.index()] {
                    continue;
                }
                visited[vertex.index()] = true;
                self.recompute_branch(tree, vertex)?;
                recomputed += 1;
                stack.extend(tree.children(vertex).iter().rev().copied());
            }
        }
        self.revision = tree.revision();
        Ok(recomputed)
    }

    fn recompute_branch(&mut self, tree: &AugmentedTree, vertex: TreeNodeId) -> Result<(), PhyloError> {
        let Some(parent) = tree.parent(vertex) else {
            self.branches[vertex.index()] = BranchRates::at_root(self.root);
            return Ok(());
        };
        let top = self.branches[parent.index()].bottom;
        let length = tree.branch_length(vertex)?;
        let mut current = top;
        let mut cursor = 0.0;
        let mut weighted = RatePair::new(0.0, 0.0);
        let events = tree.events_on(vertex);
        for id in events {
            let event = tree.event(*id).ok_or_else(|| {
                PhyloError::Dimension(
                    ErrorInfo::new("dangling-event", "branch references a missing event")
                        .with_context("event", id)
                        .with_context("branch", vertex),
                )
            })?;
            let span = event.offset - cursor;
            weighted.speciation += current.speciation * span;
            weighted.extinction += current.extinction * span;
            current = current * event.multipliers;
            cursor = event.offset;
        }
        let span = length - cursor;
        weighted.speciation += current.speciation * span;
        weighted.extinction += current.extinction * span;
        self.branches[vertex.index()] = BranchRates {
            mean: RatePair::new(weighted.speciation / length, weighted.extinction / length),
            top,
            bottom: current,
            num_events: events.len(),
        };
        Ok(())
    }

    /// Root rate pair the summary was computed with.
    pub fn root(&self) -> RatePair {
        self.root
    }

    /// Tree revision the summary reflects.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Rates for the branch above `vertex` (the root entry holds the root pair).
    pub fn branch(&self, vertex: TreeNodeId) -> Option<&BranchRates> {
        self.branches.get(vertex.index())
    }

    /// All branch entries indexed by vertex.
    pub fn branches(&self) -> &[BranchRates] {
        &self.branches
    }

    /// `(branch, rates)` for every branch, skipping the root entry.
    pub fn branch_entries(&self) -> impl Iterator<Item = (TreeNodeId, &BranchRates)> + '_ {
        self.branches
            .iter()
            .enumerate()
            .map(|(idx, rates)| (TreeNodeId::from_raw(idx as u32), rates))
            .filter(move |(vertex, _)| *vertex != self.root_vertex)
    }
}
