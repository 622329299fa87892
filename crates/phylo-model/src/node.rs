use std::sync::Arc;

use phylo_core::NodeId;
use serde::{Deserialize, Serialize};

use crate::distributions::Distribution;
use crate::functions::DeterministicFunction;
use crate::value::Value;

/// Role of a node in the model graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Fixed value supplied at assembly.
    Constant,
    /// Random variable with a distribution; may be clamped to observed data.
    Stochastic,
    /// Pure function of its parents.
    Deterministic,
}

#[derive(Debug, Clone)]
pub(crate) enum Role {
    Constant,
    Stochastic {
        distribution: Arc<dyn Distribution>,
        clamped: bool,
    },
    Deterministic {
        function: Arc<dyn DeterministicFunction>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub(crate) value: Value,
    pub(crate) log_density: f64,
    pub(crate) dirty: bool,
}

/// A vertex of the model graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) role: Role,
    pub(crate) value: Value,
    pub(crate) initial: Option<Value>,
    pub(crate) parents: Vec<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) dirty: bool,
    pub(crate) log_density: f64,
    pub(crate) snapshot: Option<Snapshot>,
}

impl Node {
    /// Unique node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind tag.
    pub fn kind(&self) -> NodeKind {
        match self.role {
            Role::Constant => NodeKind::Constant,
            Role::Stochastic { .. } => NodeKind::Stochastic,
            Role::Deterministic { .. } => NodeKind::Deterministic,
        }
    }

    /// Stored value. May be stale while the node is dirty.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Ordered parents.
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    /// Direct children.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// True when the cached value or log-density awaits recomputation.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// True for stochastic nodes fixed to observed data.
    pub fn is_clamped(&self) -> bool {
        matches!(self.role, Role::Stochastic { clamped: true, .. })
    }

    /// Cached log-density (zero for non-stochastic nodes).
    pub fn cached_log_density(&self) -> f64 {
        self.log_density
    }

    /// Distribution of a stochastic node.
    pub fn distribution(&self) -> Option<&Arc<dyn Distribution>> {
        match &self.role {
            Role::Stochastic { distribution, .. } => Some(distribution),
            _ => None,
        }
    }

    /// Explicit starting value supplied at assembly, if any.
    pub fn initial_value(&self) -> Option<&Value> {
        self.initial.as_ref()
    }
}
