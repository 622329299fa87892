use indexmap::IndexMap;
use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_core::{NodeId, RngHandle};
use phylo_tree::AugmentedTree;

use crate::node::{Node, Role, Snapshot};
use crate::value::Value;

/// Frozen model graph.
///
/// Every write snapshots the written node and its descendants before marking
/// them dirty. Exactly one of [`Model::keep`] or [`Model::restore`] (or their
/// `_all` forms) must follow each write before the next proposal.
///
/// A descendant shared with another pending write is never committed or
/// reinstated by the single-node forms; it stays dirty until the last write
/// reaching it is settled.
#[derive(Debug, Clone)]
pub struct Model {
    nodes: Vec<Node>,
    names: IndexMap<String, NodeId>,
    order: Vec<NodeId>,
    touched: Vec<NodeId>,
    roots: Vec<NodeId>,
}

impl Model {
    pub(crate) fn from_parts(nodes: Vec<Node>, names: IndexMap<String, NodeId>, order: Vec<NodeId>) -> Self {
        Self {
            nodes,
            names,
            order,
            touched: Vec::new(),
            roots: Vec::new(),
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the model holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up a node.
    pub fn node(&self, id: NodeId) -> Result<&Node, PhyloError> {
        self.nodes.get(id.index()).ok_or_else(|| unknown_node(id))
    }

    /// Resolves a node by name.
    pub fn node_id(&self, name: &str) -> Result<NodeId, PhyloError> {
        self.names.get(name).copied().ok_or_else(|| {
            PhyloError::Graph(ErrorInfo::new("unknown-node", "no node with this name").with_context("name", name))
        })
    }

    /// Node identifiers in registration order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.names.values().copied()
    }

    /// Node identifiers with every parent before its children.
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Stochastic nodes that are not clamped, in topological order.
    pub fn free_stochastic_nodes(&self) -> Vec<NodeId> {
        self.order
            .iter()
            .copied()
            .filter(|id| {
                let node = &self.nodes[id.index()];
                node.distribution().is_some() && !node.is_clamped()
            })
            .collect()
    }

    /// Stored value of a node. Dirty deterministic nodes may be stale; see [`Model::current_value`].
    pub fn value(&self, id: NodeId) -> Result<&Value, PhyloError> {
        Ok(&self.node(id)?.value)
    }

    /// Whether a node awaits recomputation.
    pub fn is_dirty(&self, id: NodeId) -> Result<bool, PhyloError> {
        Ok(self.node(id)?.dirty)
    }

    /// Whether any write is awaiting `keep` or `restore`.
    pub fn has_pending_changes(&self) -> bool {
        !self.touched.is_empty()
    }

    /// Up-to-date value of a node, recomputing dirty ancestors first.
    pub fn current_value(&mut self, id: NodeId) -> Result<&Value, PhyloError> {
        self.refresh_upstream(id, true)?;
        Ok(&self.nodes[id.index()].value)
    }

    /// Up-to-date log-density of a stochastic node.
    pub fn log_density(&mut self, id: NodeId) -> Result<f64, PhyloError> {
        if self.node(id)?.distribution().is_none() {
            return Err(not_stochastic(id, &self.nodes[id.index()].name));
        }
        self.refresh_upstream(id, true)?;
        Ok(self.nodes[id.index()].log_density)
    }

    /// Sum of the log-densities of every stochastic node.
    ///
    /// Dirty nodes are recomputed in topological order and memoised until the
    /// next write. A non-finite term is a numerical error.
    pub fn log_posterior(&mut self) -> Result<f64, PhyloError> {
        for pos in 0..self.order.len() {
            let id = self.order[pos];
            if self.nodes[id.index()].dirty {
                self.recompute(id)?;
            }
        }
        let total: f64 = self
            .nodes
            .iter()
            .filter(|node| node.distribution().is_some())
            .map(|node| node.log_density)
            .sum();
        if !total.is_finite() {
            return Err(PhyloError::Numerical(ErrorInfo::new(
                "non-finite-posterior",
                "log posterior is not finite",
            )));
        }
        Ok(total)
    }

    /// Log posterior summed from cached densities without recomputing.
    ///
    /// Fails if any node awaits recomputation.
    pub fn cached_log_posterior(&self) -> Result<f64, PhyloError> {
        if let Some(node) = self.nodes.iter().find(|node| node.dirty) {
            return Err(PhyloError::Graph(
                ErrorInfo::new("stale-node", "node awaits recomputation").with_context("node", &node.name),
            ));
        }
        Ok(self
            .nodes
            .iter()
            .filter(|node| node.distribution().is_some())
            .map(|node| node.log_density)
            .sum())
    }

    /// Descendants of `id` (excluding `id`) in topological order.
    pub fn descendants(&self, id: NodeId) -> Result<Vec<NodeId>, PhyloError> {
        self.node(id)?;
        let mut reached = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = self.nodes[id.index()].children.clone();
        while let Some(next) = stack.pop() {
            if std::mem::replace(&mut reached[next.index()], true) {
                continue;
            }
            stack.extend(self.nodes[next.index()].children.iter().copied());
        }
        Ok(self.order.iter().copied().filter(|n| reached[n.index()]).collect())
    }

    /// Marks `id` and every descendant dirty, snapshotting each first.
    pub fn touch(&mut self, id: NodeId) -> Result<(), PhyloError> {
        let descendants = self.descendants(id)?;
        for node in std::iter::once(id).chain(descendants) {
            self.snapshot(node);
            self.nodes[node.index()].dirty = true;
        }
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
        Ok(())
    }

    /// Replaces the value of a free stochastic node.
    pub fn set_value(&mut self, id: NodeId, value: Value) -> Result<(), PhyloError> {
        self.check_writable(id, false)?;
        self.snapshot(id);
        self.nodes[id.index()].value = value;
        self.touch(id)
    }

    /// Mutates the value of a free stochastic node in place.
    pub fn with_value_mut<T>(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut Value) -> Result<T, PhyloError>,
    ) -> Result<T, PhyloError> {
        self.check_writable(id, false)?;
        self.snapshot(id);
        let result = f(&mut self.nodes[id.index()].value);
        self.touch(id)?;
        result
    }

    /// Edits the latent events of a tree-valued stochastic node.
    ///
    /// Allowed on clamped nodes whose distribution carries latent events; the
    /// closure must leave the topology unchanged.
    pub fn with_events_mut<T>(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut AugmentedTree) -> Result<T, PhyloError>,
    ) -> Result<T, PhyloError> {
        self.check_writable(id, true)?;
        self.snapshot(id);
        let result = match self.nodes[id.index()].value.as_tree_mut() {
            Ok(tree) => {
                let vertices = tree.num_vertices();
                f(tree).and_then(|out| {
                    if tree.num_vertices() != vertices {
                        return Err(PhyloError::Dimension(
                            ErrorInfo::new("topology-changed", "event edits must not alter the topology")
                                .with_context("node", id),
                        ));
                    }
                    Ok(out)
                })
            }
            Err(err) => Err(err),
        };
        self.touch(id)?;
        result
    }

    /// Redraws the latent structure of a node through its distribution.
    pub fn resimulate(&mut self, id: NodeId, rng: &mut RngHandle) -> Result<(), PhyloError> {
        self.check_writable(id, true)?;
        self.refresh_upstream(id, false)?;
        let distribution = self.nodes[id.index()]
            .distribution()
            .cloned()
            .ok_or_else(|| not_stochastic(id, &self.nodes[id.index()].name))?;
        if !distribution.can_resimulate() {
            return Err(PhyloError::Configuration(
                ErrorInfo::new("resimulate-unsupported", "distribution cannot resimulate latent state")
                    .with_context("node", &self.nodes[id.index()].name)
                    .with_context("distribution", distribution.name()),
            ));
        }
        self.snapshot(id);
        let mut value = std::mem::replace(&mut self.nodes[id.index()].value, Value::Natural(0));
        let result = {
            let params = self.parent_values(id);
            distribution.resimulate(&mut value, &params, rng)
        };
        self.nodes[id.index()].value = value;
        self.touch(id)?;
        result
    }

    /// Log-density of a node's latent structure under its resimulation kernel.
    pub fn resimulation_log_density(&mut self, id: NodeId) -> Result<f64, PhyloError> {
        self.refresh_upstream(id, false)?;
        let node = &self.nodes[id.index()];
        let distribution = node.distribution().ok_or_else(|| not_stochastic(id, &node.name))?;
        let params = self.parent_values(id);
        distribution.resimulation_log_density(&node.value, &params)
    }

    /// Draws a new value for a free stochastic node from its distribution.
    ///
    /// Used while choosing starting values; leaves no snapshot behind.
    pub fn redraw(&mut self, id: NodeId, rng: &mut RngHandle) -> Result<(), PhyloError> {
        self.check_writable(id, false)?;
        self.refresh_upstream(id, false)?;
        let node = &self.nodes[id.index()];
        let distribution = node.distribution().ok_or_else(|| not_stochastic(id, &node.name))?;
        let value = {
            let params = self.parent_values(id);
            distribution.sample(&params, rng)?
        };
        self.assign(id, value)
    }

    /// Resets a free stochastic node to its explicit starting value.
    ///
    /// Returns `false` if no starting value was supplied.
    pub fn reset_to_initial(&mut self, id: NodeId) -> Result<bool, PhyloError> {
        self.check_writable(id, false)?;
        match self.nodes[id.index()].initial.clone() {
            Some(value) => {
                self.assign(id, value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Commits the write to `id`: recomputes what no other pending write
    /// reaches and drops those snapshots.
    pub fn keep(&mut self, id: NodeId) -> Result<(), PhyloError> {
        let descendants = self.descendants(id)?;
        let shared = self.reached_by_other_roots(id)?;
        self.nodes[id.index()].snapshot = None;
        if shared[id.index()] {
            self.nodes[id.index()].dirty = true;
        }
        for node in descendants {
            let entry = &mut self.nodes[node.index()];
            if shared[node.index()] {
                entry.dirty = true;
                if let Some(snapshot) = entry.snapshot.as_mut() {
                    snapshot.dirty = true;
                }
            } else {
                entry.snapshot = None;
            }
        }
        self.recompute_unshared(&shared)?;
        self.settle(id);
        Ok(())
    }

    /// Reverts the write to `id` and whatever no other pending write reaches.
    pub fn restore(&mut self, id: NodeId) -> Result<(), PhyloError> {
        let descendants = self.descendants(id)?;
        let shared = self.reached_by_other_roots(id)?;
        self.restore_node(id);
        if shared[id.index()] {
            self.nodes[id.index()].dirty = true;
        }
        for node in descendants {
            if shared[node.index()] {
                self.nodes[node.index()].dirty = true;
            } else {
                self.restore_node(node);
            }
        }
        self.settle(id);
        self.recompute_unshared(&shared)
    }

    /// Commits every pending write.
    pub fn keep_all(&mut self) -> Result<(), PhyloError> {
        for pos in 0..self.order.len() {
            let node = self.order[pos];
            if self.nodes[node.index()].dirty {
                self.recompute(node)?;
            }
        }
        for node in std::mem::take(&mut self.touched) {
            self.nodes[node.index()].snapshot = None;
        }
        self.roots.clear();
        Ok(())
    }

    /// Reverts every pending write.
    pub fn restore_all(&mut self) {
        for node in std::mem::take(&mut self.touched) {
            self.restore_node(node);
        }
        self.roots.clear();
    }

    /// Ordered parent values of a node.
    pub fn parent_values(&self, id: NodeId) -> Vec<&Value> {
        self.nodes
            .get(id.index())
            .map(|node| node.parents.iter().map(|p| &self.nodes[p.index()].value).collect())
            .unwrap_or_default()
    }

    fn check_writable(&self, id: NodeId, latent: bool) -> Result<(), PhyloError> {
        let node = self.node(id)?;
        let Some(distribution) = node.distribution() else {
            return Err(not_stochastic(id, &node.name));
        };
        if node.is_clamped() && !(latent && distribution.has_latent_events()) {
            return Err(PhyloError::Configuration(
                ErrorInfo::new("clamped-node", "observed values cannot be changed")
                    .with_context("node", &node.name),
            ));
        }
        Ok(())
    }

    /// Marks every node reachable from a pending write other than `id`.
    fn reached_by_other_roots(&self, id: NodeId) -> Result<Vec<bool>, PhyloError> {
        let mut reached = vec![false; self.nodes.len()];
        for root in self.roots.iter().copied().filter(|root| *root != id) {
            reached[root.index()] = true;
            for node in self.descendants(root)? {
                reached[node.index()] = true;
            }
        }
        Ok(reached)
    }

    fn recompute_unshared(&mut self, shared: &[bool]) -> Result<(), PhyloError> {
        for pos in 0..self.order.len() {
            let node = self.order[pos];
            if self.nodes[node.index()].dirty && !shared[node.index()] {
                self.recompute(node)?;
            }
        }
        Ok(())
    }

    fn settle(&mut self, id: NodeId) {
        self.roots.retain(|root| *root != id);
        if self.roots.is_empty() {
            for node in std::mem::take(&mut self.touched) {
                self.nodes[node.index()].snapshot = None;
            }
        } else {
            self.touched.retain(|node| self.nodes[node.index()].snapshot.is_some());
        }
    }

    fn snapshot(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.index()];
        if node.snapshot.is_none() {
            node.snapshot = Some(Snapshot {
                value: node.value.clone(),
                log_density: node.log_density,
                dirty: node.dirty,
            });
            self.touched.push(id);
        }
    }

    fn restore_node(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.index()];
        if let Some(snapshot) = node.snapshot.take() {
            node.value = snapshot.value;
            node.log_density = snapshot.log_density;
            node.dirty = snapshot.dirty;
        }
    }

    /// Writes a value outside the proposal cycle: no snapshots, descendants dirtied.
    fn assign(&mut self, id: NodeId, value: Value) -> Result<(), PhyloError> {
        if self.has_pending_changes() {
            return Err(PhyloError::Configuration(
                ErrorInfo::new("pending-proposal", "starting values cannot change while a proposal is pending")
                    .with_context("node", id),
            ));
        }
        self.nodes[id.index()].value = value;
        let descendants = self.descendants(id)?;
        for node in std::iter::once(id).chain(descendants) {
            self.nodes[node.index()].dirty = true;
        }
        Ok(())
    }

    /// Recomputes the dirty ancestors of `id` (and `id` itself when `inclusive`).
    fn refresh_upstream(&mut self, id: NodeId, inclusive: bool) -> Result<(), PhyloError> {
        self.node(id)?;
        let mut needed = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = self.nodes[id.index()].parents.clone();
        if inclusive {
            stack.push(id);
        }
        while let Some(next) = stack.pop() {
            if std::mem::replace(&mut needed[next.index()], true) {
                continue;
            }
            stack.extend(self.nodes[next.index()].parents.iter().copied());
        }
        for pos in 0..self.order.len() {
            let node = self.order[pos];
            if needed[node.index()] && self.nodes[node.index()].dirty {
                self.recompute(node)?;
            }
        }
        Ok(())
    }

    fn recompute(&mut self, id: NodeId) -> Result<(), PhyloError> {
        let idx = id.index();
        match self.nodes[idx].role.clone() {
            Role::Constant => {}
            Role::Deterministic { function } => {
                let mut value = std::mem::replace(&mut self.nodes[idx].value, Value::Natural(0));
                let result = {
                    let args = self.parent_values(id);
                    function.update(&mut value, &args)
                };
                self.nodes[idx].value = value;
                result.map_err(|err| err.with_context("node", &self.nodes[idx].name))?;
            }
            Role::Stochastic { distribution, .. } => {
                let log_density = {
                    let params = self.parent_values(id);
                    distribution
                        .log_density(&self.nodes[idx].value, &params)
                        .map_err(|err| err.with_context("node", &self.nodes[idx].name))?
                };
                if !log_density.is_finite() {
                    return Err(PhyloError::Numerical(
                        ErrorInfo::new("non-finite-log-density", "log-density is not finite")
                            .with_context("node", &self.nodes[idx].name)
                            .with_context("distribution", distribution.name())
                            .with_context("value", log_density),
                    ));
                }
                self.nodes[idx].log_density = log_density;
            }
        }
        self.nodes[idx].dirty = false;
        Ok(())
    }
}

fn unknown_node(id: NodeId) -> PhyloError {
    PhyloError::Graph(ErrorInfo::new("unknown-node", "node does not exist").with_context("node", id))
}

fn not_stochastic(id: NodeId, name: &str) -> PhyloError {
    PhyloError::Configuration(
        ErrorInfo::new("not-stochastic", "only free stochastic nodes can be written")
            .with_context("node", id)
            .with_context("name", name),
    )
}
