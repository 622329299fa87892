use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_tree::{AugmentedTree, BranchRateSummary};
use serde::{Deserialize, Serialize};

/// Value held by a model node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Value {
    /// Real scalar.
    Real(f64),
    /// Non-negative integer (counts).
    Natural(u64),
    /// Real vector.
    Vector(Vec<f64>),
    /// Row-major real matrix (data tables, distance matrices).
    Matrix(Vec<Vec<f64>>),
    /// Augmented phylogeny.
    Tree(Box<AugmentedTree>),
    /// Per-branch rate summaries.
    BranchRates(Box<BranchRateSummary>),
    /// Heterogeneous tuple of values.
    Composite(Vec<Value>),
}

impl Value {
    /// Short tag naming the variant, used in error context.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Real(_) => "real",
            Value::Natural(_) => "natural",
            Value::Vector(_) => "vector",
            Value::Matrix(_) => "matrix",
            Value::Tree(_) => "tree",
            Value::BranchRates(_) => "branch_rates",
            Value::Composite(_) => "composite",
        }
    }

    /// Reads a real scalar; naturals are widened.
    pub fn as_real(&self) -> Result<f64, PhyloError> {
        match self {
            Value::Real(value) => Ok(*value),
            Value::Natural(value) => Ok(*value as f64),
            other => Err(mismatch("real", other)),
        }
    }

    /// Mutable access to a real scalar.
    pub fn as_real_mut(&mut self) -> Result<&mut f64, PhyloError> {
        match self {
            Value::Real(value) => Ok(value),
            other => Err(mismatch("real", other)),
        }
    }

    /// Reads a natural count.
    pub fn as_natural(&self) -> Result<u64, PhyloError> {
        match self {
            Value::Natural(value) => Ok(*value),
            other => Err(mismatch("natural", other)),
        }
    }

    /// Borrows a vector.
    pub fn as_vector(&self) -> Result<&[f64], PhyloError> {
        match self {
            Value::Vector(values) => Ok(values),
            other => Err(mismatch("vector", other)),
        }
    }

    /// Borrows a tree.
    pub fn as_tree(&self) -> Result<&AugmentedTree, PhyloError> {
        match self {
            Value::Tree(tree) => Ok(tree),
            other => Err(mismatch("tree", other)),
        }
    }

    /// Mutably borrows a tree.
    pub fn as_tree_mut(&mut self) -> Result<&mut AugmentedTree, PhyloError> {
        match self {
            Value::Tree(tree) => Ok(tree),
            other => Err(mismatch("tree", other)),
        }
    }

    /// Borrows a branch rate summary.
    pub fn as_branch_rates(&self) -> Result<&BranchRateSummary, PhyloError> {
        match self {
            Value::BranchRates(summary) => Ok(summary),
            other => Err(mismatch("branch_rates", other)),
        }
    }

    /// Flattens numeric content into `(suffix, value)` columns for tabular output.
    ///
    /// Scalars produce a single unnamed column, vectors one column per entry
    /// (`[1]`, `[2]`, ...). Trees and rate summaries produce no columns.
    pub fn numeric_columns(&self) -> Vec<(String, f64)> {
        match self {
            Value::Real(value) => vec![(String::new(), *value)],
            Value::Natural(value) => vec![(String::new(), *value as f64)],
            Value::Vector(values) => values
                .iter()
                .enumerate()
                .map(|(idx, value)| (format!("[{}]", idx + 1), *value))
                .collect(),
            Value::Matrix(rows) => rows
                .iter()
                .enumerate()
                .flat_map(|(r, row)| {
                    row.iter()
                        .enumerate()
                        .map(move |(c, value)| (format!("[{}][{}]", r + 1, c + 1), *value))
                })
                .collect(),
            Value::Composite(parts) => parts
                .iter()
                .enumerate()
                .flat_map(|(idx, part)| {
                    part.numeric_columns()
                        .into_iter()
                        .map(move |(suffix, value)| (format!("[{}]{suffix}", idx + 1), value))
                })
                .collect(),
            Value::Tree(_) | Value::BranchRates(_) => Vec::new(),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<AugmentedTree> for Value {
    fn from(tree: AugmentedTree) -> Self {
        Value::Tree(Box::new(tree))
    }
}

fn mismatch(expected: &str, found: &Value) -> PhyloError {
    PhyloError::Graph(
        ErrorInfo::new("value-type-mismatch", "node value has an unexpected type")
            .with_context("expected", expected)
            .with_context("found", found.kind_name()),
    )
}
