use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_core::{NodeId, RngHandle};
use tracing::debug;

use crate::distributions::Distribution;
use crate::functions::DeterministicFunction;
use crate::graph::Model;
use crate::node::{Node, Role};
use crate::value::Value;

/// Incremental assembly of a [`Model`].
///
/// Edges are validated as they are added; `build` freezes the graph.
#[derive(Debug, Default)]
pub struct ModelBuilder {
    nodes: Vec<Node>,
    names: IndexMap<String, NodeId>,
}

impl ModelBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a registered node by name.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// Registers a constant node.
    pub fn add_constant(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<NodeId, PhyloError> {
        self.register(name.into(), Role::Constant, value.into(), &[])
    }

    /// Registers a stochastic node whose distribution reads `parents` in order.
    pub fn add_stochastic(
        &mut self,
        name: impl Into<String>,
        distribution: impl Distribution + 'static,
        parents: &[NodeId],
    ) -> Result<NodeId, PhyloError> {
        let role = Role::Stochastic {
            distribution: Arc::new(distribution),
            clamped: false,
        };
        self.register(name.into(), role, Value::Real(f64::NAN), parents)
    }

    /// Registers a deterministic node computed from `parents` in order.
    pub fn add_deterministic(
        &mut self,
        name: impl Into<String>,
        function: impl DeterministicFunction + 'static,
        parents: &[NodeId],
    ) -> Result<NodeId, PhyloError> {
        let role = Role::Deterministic {
            function: Arc::new(function),
        };
        self.register(name.into(), role, Value::Real(f64::NAN), parents)
    }

    /// Binds `parent` as the next argument of `child`.
    ///
    /// Fails with a cycle error, leaving the graph unchanged, if `child` is
    /// already an ancestor of `parent`.
    pub fn connect(&mut self, parent: NodeId, child: NodeId) -> Result<(), PhyloError> {
        self.check_known(parent)?;
        self.check_known(child)?;
        if matches!(self.nodes[child.index()].role, Role::Constant) {
            return Err(PhyloError::Configuration(
                ErrorInfo::new("constant-has-no-parents", "constants cannot depend on other nodes")
                    .with_context("node", &self.nodes[child.index()].name),
            ));
        }
        self.nodes[child.index()].parents.push(parent);
        let new_child = !self.nodes[parent.index()].children.contains(&child);
        if new_child {
            self.nodes[parent.index()].children.push(child);
        }
        if self.has_cycle() {
            self.nodes[child.index()].parents.pop();
            if new_child {
                self.nodes[parent.index()].children.pop();
            }
            return Err(PhyloError::Cycle(
                ErrorInfo::new("cycle", "edge would introduce a directed cycle")
                    .with_context("parent", &self.nodes[parent.index()].name)
                    .with_context("child", &self.nodes[child.index()].name),
            ));
        }
        Ok(())
    }

    /// Supplies an explicit starting value for a stochastic node.
    pub fn set_initial(&mut self, id: NodeId, value: impl Into<Value>) -> Result<(), PhyloError> {
        self.check_stochastic(id)?;
        self.nodes[id.index()].initial = Some(value.into());
        Ok(())
    }

    /// Clamps a stochastic node to observed data.
    pub fn clamp(&mut self, id: NodeId, value: impl Into<Value>) -> Result<(), PhyloError> {
        self.check_stochastic(id)?;
        let node = &mut self.nodes[id.index()];
        if let Role::Stochastic { clamped, .. } = &mut node.role {
            *clamped = true;
        }
        node.initial = Some(value.into());
        Ok(())
    }

    /// Freezes the graph.
    ///
    /// Deterministic nodes are evaluated, clamped and explicitly initialised
    /// nodes take their supplied values and the remaining stochastic nodes are
    /// drawn from their distributions, all in topological order.
    pub fn build(mut self, rng: &mut RngHandle) -> Result<Model, PhyloError> {
        for node in &self.nodes {
            let expected = match &node.role {
                Role::Constant => continue,
                Role::Stochastic { distribution, .. } => distribution.arity(),
                Role::Deterministic { function } => function.arity(),
            };
            if node.parents.len() != expected {
                return Err(PhyloError::Configuration(
                    ErrorInfo::new("arity-mismatch", "wrong number of parents bound")
                        .with_context("node", &node.name)
                        .with_context("expected", expected)
                        .with_context("bound", node.parents.len()),
                ));
            }
        }
        let order = self.topological_order();
        for id in &order {
            let idx = id.index();
            let value = {
                let node = &self.nodes[idx];
                let args: Vec<&Value> = node.parents.iter().map(|p| &self.nodes[p.index()].value).collect();
                match &node.role {
                    Role::Constant => None,
                    Role::Deterministic { function } => Some(
                        function
                            .evaluate(&args)
                            .map_err(|err| err.with_context("node", &node.name))?,
                    ),
                    Role::Stochastic { distribution, .. } => match &node.initial {
                        Some(value) => Some(value.clone()),
                        None => {
                            debug!(node = %node.name, distribution = distribution.name(), "drawing starting value");
                            Some(
                                distribution
                                    .sample(&args, rng)
                                    .map_err(|err| err.with_context("node", &node.name))?,
                            )
                        }
                    },
                }
            };
            let node = &mut self.nodes[idx];
            if let Some(value) = value {
                node.value = value;
            }
            node.dirty = !matches!(node.role, Role::Constant);
        }
        debug!(nodes = self.nodes.len(), "model frozen");
        Ok(Model::from_parts(self.nodes, self.names, order))
    }

    fn register(
        &mut self,
        name: String,
        role: Role,
        value: Value,
        parents: &[NodeId],
    ) -> Result<NodeId, PhyloError> {
        if self.names.contains_key(&name) {
            return Err(PhyloError::Configuration(
                ErrorInfo::new("duplicate-name", "node names must be unique").with_context("name", name),
            ));
        }
        for parent in parents {
            self.check_known(*parent)?;
        }
        let id = NodeId::from_raw(self.nodes.len() as u64);
        for parent in parents {
            let children = &mut self.nodes[parent.index()].children;
            if !children.contains(&id) {
                children.push(id);
            }
        }
        self.nodes.push(Node {
            name: name.clone(),
            role,
            value,
            initial: None,
            parents: parents.to_vec(),
            children: Vec::new(),
            dirty: false,
            log_density: 0.0,
            snapshot: None,
        });
        self.names.insert(name, id);
        Ok(id)
    }

    fn check_known(&self, id: NodeId) -> Result<(), PhyloError> {
        if id.index() >= self.nodes.len() {
            return Err(PhyloError::Graph(
                ErrorInfo::new("unknown-node", "node does not exist").with_context("node", id),
            ));
        }
        Ok(())
    }

    fn check_stochastic(&self, id: NodeId) -> Result<(), PhyloError> {
        self.check_known(id)?;
        let node = &self.nodes[id.index()];
        if !matches!(node.role, Role::Stochastic { .. }) {
            return Err(PhyloError::Configuration(
                ErrorInfo::new("not-stochastic", "only stochastic nodes take starting or observed values")
                    .with_context("node", &node.name),
            ));
        }
        Ok(())
    }

    fn has_cycle(&self) -> bool {
        let mut states: BTreeMap<NodeId, VisitState> = BTreeMap::new();
        for idx in 0..self.nodes.len() {
            if dfs(NodeId::from_raw(idx as u64), &self.nodes, &mut states, &mut Vec::new()) {
                return true;
            }
        }
        false
    }

    fn topological_order(&self) -> Vec<NodeId> {
        let mut states: BTreeMap<NodeId, VisitState> = BTreeMap::new();
        let mut finished = Vec::with_capacity(self.nodes.len());
        for idx in 0..self.nodes.len() {
            dfs(NodeId::from_raw(idx as u64), &self.nodes, &mut states, &mut finished);
        }
        finished.reverse();
        finished
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VisitState {
    NotVisited,
    Visiting,
    Visited,
}

/// Depth-first walk along child edges. Returns `true` on a back edge and
/// appends nodes to `finished` in post-order.
fn dfs(
    node: NodeId,
    nodes: &[Node],
    states: &mut BTreeMap<NodeId, VisitState>,
    finished: &mut Vec<NodeId>,
) -> bool {
    match states.get(&node).copied().unwrap_or(VisitState::NotVisited) {
        VisitState::Visiting => true,
        VisitState::Visited => false,
        VisitState::NotVisited => {
            states.insert(node, VisitState::Visiting);
            for child in &nodes[node.index()].children {
                if dfs(*child, nodes, states, finished) {
                    return true;
                }
            }
            states.insert(node, VisitState::Visited);
            finished.push(node);
            false
        }
    }
}
