use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_core::{EventId, TreeNodeId};
use serde::{Deserialize, Serialize};

use crate::events::{EventArena, ShiftEvent};
use crate::rates::RatePair;

/// A vertex of a time-calibrated tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeVertex {
    /// Parent vertex (`None` for the root).
    pub parent: Option<TreeNodeId>,
    /// Child vertices in insertion order.
    pub children: Vec<TreeNodeId>,
    /// Age of the vertex, measured backwards from the present.
    pub age: f64,
    /// Taxon or clade label.
    pub name: Option<String>,
}

impl TreeVertex {
    /// True if this vertex has no children.
    pub fn is_tip(&self) -> bool {
        self.children.is_empty()
    }
}

/// Rooted tree whose branches carry ordered sequences of rate-shift events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentedTree {
    vertices: Vec<TreeVertex>,
    root: TreeNodeId,
    events: EventArena,
    revision: u64,
    branch_revisions: Vec<u64>,
}

impl AugmentedTree {
    /// Creates a tree holding a single root vertex of the given age.
    pub fn new(root_age: f64) -> Result<Self, PhyloError> {
        if !root_age.is_finite() || root_age < 0.0 {
            return Err(tree_error("invalid-age", "root age must be finite and non-negative")
                .with_context("age", root_age));
        }
        Ok(Self {
            vertices: vec![TreeVertex {
                parent: None,
                children: Vec::new(),
                age: root_age,
                name: None,
            }],
            root: TreeNodeId::from_raw(0),
            events: EventArena::new(1),
            revision: 0,
            branch_revisions: vec![0],
        })
    }

    /// Builds a tree from a parent table: `parents[i]` is the parent index of vertex `i`.
    ///
    /// Exactly one entry must be `None` (the root). Vertices may be listed in any
    /// order; identifiers follow the table indices.
    pub fn from_parents(
        parents: &[Option<usize>],
        ages: &[f64],
        names: &[Option<String>],
    ) -> Result<Self, PhyloError> {
        if parents.is_empty() || parents.len() != ages.len() {
            return Err(tree_error("table-shape", "parent and age tables must be non-empty and aligned")
                .with_context("parents", parents.len())
                .with_context("ages", ages.len()));
        }
        let roots: Vec<usize> = parents
            .iter()
            .enumerate()
            .filter(|(_, parent)| parent.is_none())
            .map(|(idx, _)| idx)
            .collect();
        if roots.len() != 1 {
            return Err(tree_error("root-count", "exactly one vertex must lack a parent")
                .with_context("roots", roots.len()));
        }
        let mut vertices: Vec<TreeVertex> = ages
            .iter()
            .enumerate()
            .map(|(idx, age)| TreeVertex {
                parent: parents[idx].map(|p| TreeNodeId::from_raw(p as u32)),
                children: Vec::new(),
                age: *age,
                name: names.get(idx).cloned().flatten(),
            })
            .collect();
        for (idx, parent) in parents.iter().enumerate() {
            if let Some(parent) = parent {
                let Some(parent_vertex) = vertices.get_mut(*parent) else {
                    return Err(tree_error("unknown-parent", "parent index out of range")
                        .with_context("vertex", idx)
                        .with_context("parent", parent));
                };
                parent_vertex.children.push(TreeNodeId::from_raw(idx as u32));
            }
        }
        let count = vertices.len();
        let tree = Self {
            vertices,
            root: TreeNodeId::from_raw(roots[0] as u32),
            events: EventArena::new(count),
            revision: 0,
            branch_revisions: vec![0; count],
        };
        if tree.preorder().len() != count {
            return Err(tree_error("disconnected", "parent table contains a cycle or detached vertices"));
        }
        for vertex in tree.branches() {
            tree.branch_length(vertex)?;
        }
        Ok(tree)
    }

    /// Adds a child below `parent` and returns its identifier.
    pub fn add_child(
        &mut self,
        parent: TreeNodeId,
        age: f64,
        name: Option<String>,
    ) -> Result<TreeNodeId, PhyloError> {
        let parent_age = self.vertex(parent)?.age;
        if !age.is_finite() || age < 0.0 || age >= parent_age {
            return Err(tree_error("invalid-age", "child must be strictly younger than its parent")
                .with_context("parent_age", parent_age)
                .with_context("age", age));
        }
        let id = TreeNodeId::from_raw(self.vertices.len() as u32);
        self.vertices.push(TreeVertex {
            parent: Some(parent),
            children: Vec::new(),
            age,
            name,
        });
        self.vertices[parent.index()].children.push(id);
        self.branch_revisions.push(self.revision);
        self.events.grow(self.vertices.len());
        Ok(id)
    }

    /// Returns the vertex with the provided identifier.
    pub fn vertex(&self, id: TreeNodeId) -> Result<&TreeVertex, PhyloError> {
        self.vertices.get(id.index()).ok_or_else(|| {
            tree_error("unknown-vertex", "vertex does not exist").with_context("vertex", id)
        })
    }

    /// The root vertex.
    pub fn root(&self) -> TreeNodeId {
        self.root
    }

    /// Total number of vertices.
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of tips.
    pub fn num_tips(&self) -> usize {
        self.vertices.iter().filter(|v| v.is_tip()).count()
    }

    /// Tip identifiers in arena order.
    pub fn tips(&self) -> Vec<TreeNodeId> {
        self.vertices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_tip())
            .map(|(idx, _)| TreeNodeId::from_raw(idx as u32))
            .collect()
    }

    /// Every vertex that owns a branch (all but the root), in arena order.
    pub fn branches(&self) -> Vec<TreeNodeId> {
        (0..self.vertices.len())
            .map(|idx| TreeNodeId::from_raw(idx as u32))
            .filter(|id| *id != self.root)
            .collect()
    }

    /// Parent of `id`, `None` for the root or unknown vertices.
    pub fn parent(&self, id: TreeNodeId) -> Option<TreeNodeId> {
        self.vertices.get(id.index()).and_then(|v| v.parent)
    }

    /// Children of `id`.
    pub fn children(&self, id: TreeNodeId) -> &[TreeNodeId] {
        self.vertices
            .get(id.index())
            .map(|v| v.children.as_slice())
            .unwrap_or(&[])
    }

    /// Age of `id`.
    pub fn age(&self, id: TreeNodeId) -> Result<f64, PhyloError> {
        Ok(self.vertex(id)?.age)
    }

    /// Length of the branch above `id`.
    pub fn branch_length(&self, id: TreeNodeId) -> Result<f64, PhyloError> {
        let vertex = self.vertex(id)?;
        let parent = vertex.parent.ok_or_else(|| {
            tree_error("root-has-no-branch", "the root does not own a branch").with_context("vertex", id)
        })?;
        let length = self.vertex(parent)?.age - vertex.age;
        if !(length > 0.0 && length.is_finite()) {
            return Err(tree_error("non-positive-branch", "branch length must be positive")
                .with_context("vertex", id)
                .with_context("length", length));
        }
        Ok(length)
    }

    /// Sum of all branch lengths.
    pub fn tree_length(&self) -> f64 {
        self.branches()
            .into_iter()
            .filter_map(|b| self.branch_length(b).ok())
            .sum()
    }

    /// Vertices in preorder (parents before children).
    pub fn preorder(&self) -> Vec<TreeNodeId> {
        let mut order = Vec::with_capacity(self.vertices.len());
        let mut visited = vec![false; self.vertices.len()];
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut visited[id.index()], true) {
                continue;
            }
            order.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        order
    }

    /// Vertices in postorder (children before parents).
    pub fn postorder(&self) -> Vec<TreeNodeId> {
        let mut order = self.preorder();
        order.reverse();
        order
    }

    /// Returns whether every internal vertex is bifurcating (the root may also have one child).
    pub fn is_binary(&self) -> bool {
        self.vertices.iter().enumerate().all(|(idx, v)| {
            let n = v.children.len();
            n == 0 || n == 2 || (n == 1 && idx == self.root.index())
        })
    }

    /// Returns whether every tip sits at age zero (within `tolerance`).
    pub fn is_ultrametric(&self, tolerance: f64) -> bool {
        self.vertices
            .iter()
            .filter(|v| v.is_tip())
            .all(|v| v.age.abs() <= tolerance)
    }

    /// Revision counter bumped on every event edit.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Revision at which the events of `branch` last changed.
    pub fn branch_revision(&self, branch: TreeNodeId) -> u64 {
        self.branch_revisions.get(branch.index()).copied().unwrap_or(0)
    }

    fn mark(&mut self, branch: TreeNodeId) {
        self.revision += 1;
        if let Some(slot) = self.branch_revisions.get_mut(branch.index()) {
            *slot = self.revision;
        }
    }

    /// Total number of events across all branches.
    pub fn total_num_events(&self) -> usize {
        self.events.len()
    }

    /// Number of events on the branch above `branch`.
    pub fn num_events_on(&self, branch: TreeNodeId) -> usize {
        self.events.on_branch(branch).len()
    }

    /// Events on `branch` ordered by offset from the parent end.
    pub fn events_on(&self, branch: TreeNodeId) -> &[EventId] {
        self.events.on_branch(branch)
    }

    /// All live events in an order stable under insertion (removals swap the last entry in).
    pub fn event_ids(&self) -> &[EventId] {
        self.events.live()
    }

    /// Looks up an event.
    pub fn event(&self, id: EventId) -> Option<&ShiftEvent> {
        self.events.get(id)
    }

    /// Inserts an event on `branch` at `offset` from its parent end.
    pub fn add_event(
        &mut self,
        branch: TreeNodeId,
        offset: f64,
        multipliers: RatePair,
    ) -> Result<EventId, PhyloError> {
        self.check_offset(branch, offset)?;
        check_multipliers(multipliers)?;
        let id = self.events.insert(ShiftEvent {
            branch,
            offset,
            multipliers,
        })?;
        self.mark(branch);
        Ok(id)
    }

    /// Removes an event and returns its record.
    pub fn remove_event(&mut self, id: EventId) -> Result<ShiftEvent, PhyloError> {
        let event = self.events.remove(id)?;
        self.mark(event.branch);
        Ok(event)
    }

    /// Moves an event to a new position, possibly on another branch.
    pub fn relocate_event(
        &mut self,
        id: EventId,
        branch: TreeNodeId,
        offset: f64,
    ) -> Result<(), PhyloError> {
        self.check_offset(branch, offset)?;
        let previous = self.events.relocate(id, branch, offset)?;
        self.mark(previous);
        self.mark(branch);
        Ok(())
    }

    /// Replaces the multipliers carried by an event.
    pub fn set_event_multipliers(
        &mut self,
        id: EventId,
        multipliers: RatePair,
    ) -> Result<(), PhyloError> {
        check_multipliers(multipliers)?;
        let branch = self.events.set_multipliers(id, multipliers)?;
        self.mark(branch);
        Ok(())
    }

    /// Removes every event.
    pub fn clear_events(&mut self) {
        let branches: Vec<TreeNodeId> = self
            .events
            .live()
            .iter()
            .filter_map(|id| self.events.get(*id).map(|e| e.branch))
            .collect();
        self.events.clear();
        for branch in branches {
            self.mark(branch);
        }
    }

    /// Maps a position along the concatenated branches (arena order) to `(branch, offset)`.
    ///
    /// Used to place events uniformly over the total tree length.
    pub fn locate(&self, position: f64) -> Result<(TreeNodeId, f64), PhyloError> {
        let mut remaining = position;
        let mut last = None;
        for branch in self.branches() {
            let length = self.branch_length(branch)?;
            if remaining < length {
                return Ok((branch, remaining));
            }
            remaining -= length;
            last = Some((branch, length));
        }
        match last {
            Some((branch, length)) if remaining <= f64::EPSILON * length.max(1.0) * 16.0 => {
                Ok((branch, length * (1.0 - f64::EPSILON)))
            }
            _ => Err(tree_error("position-out-of-range", "position exceeds the tree length")
                .with_context("position", position)),
        }
    }

    /// Verifies that the event bookkeeping is internally consistent.
    pub fn check_consistency(&self) -> Result<(), PhyloError> {
        let lengths: Vec<Option<f64>> = (0..self.vertices.len())
            .map(|idx| self.branch_length(TreeNodeId::from_raw(idx as u32)).ok())
            .collect();
        self.events.check(&lengths)
    }

    fn check_offset(&self, branch: TreeNodeId, offset: f64) -> Result<(), PhyloError> {
        let length = self.branch_length(branch).map_err(|err| {
            PhyloError::Dimension(err.info().clone())
        })?;
        if !(offset > 0.0 && offset < length) {
            return Err(PhyloError::Dimension(
                ErrorInfo::new("event-outside-branch", "event offset must lie strictly inside the branch")
                    .with_context("branch", branch)
                    .with_context("offset", offset)
                    .with_context("branch_length", length),
            ));
        }
        Ok(())
    }
}

fn check_multipliers(multipliers: RatePair) -> Result<(), PhyloError> {
    if !multipliers.is_valid_multiplier() {
        return Err(PhyloError::Numerical(
            ErrorInfo::new("invalid-multiplier", "event multipliers must be finite and positive")
                .with_context("speciation", multipliers.speciation)
                .with_context("extinction", multipliers.extinction),
        ));
    }
    Ok(())
}

fn tree_error(code: impl Into<String>, message: impl Into<String>) -> PhyloError {
    PhyloError::Graph(ErrorInfo::new(code, message))
}
