use phylo_core::errors::{ErrorInfo, PhyloError};
use phylo_core::{EventId, TreeNodeId};
use serde::{Deserialize, Serialize};

use crate::rates::RatePair;

/// A latent rate shift sitting on a branch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShiftEvent {
    /// Branch (identified by its child vertex) carrying the event.
    pub branch: TreeNodeId,
    /// Distance from the parent end of the branch, strictly inside `(0, length)`.
    pub offset: f64,
    /// Multipliers applied to the inherited (speciation, extinction) rates.
    pub multipliers: RatePair,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Slot {
    event: ShiftEvent,
    live_pos: usize,
}

/// Arena of events with per-branch ordered indices.
///
/// Freed slots are recycled, so identifiers of removed events may be reused by
/// later insertions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct EventArena {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    live: Vec<EventId>,
    by_branch: Vec<Vec<EventId>>,
}

impl EventArena {
    pub(crate) fn new(num_vertices: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: Vec::new(),
            by_branch: vec![Vec::new(); num_vertices],
        }
    }

    pub(crate) fn grow(&mut self, num_vertices: usize) {
        if self.by_branch.len() < num_vertices {
            self.by_branch.resize(num_vertices, Vec::new());
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn live(&self) -> &[EventId] {
        &self.live
    }

    pub(crate) fn on_branch(&self, branch: TreeNodeId) -> &[EventId] {
        self.by_branch
            .get(branch.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn get(&self, id: EventId) -> Option<&ShiftEvent> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .map(|slot| &slot.event)
    }

    fn get_mut(&mut self, id: EventId) -> Result<&mut ShiftEvent, PhyloError> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .map(|slot| &mut slot.event)
            .ok_or_else(|| unknown_event(id))
    }

    /// Inserts an event whose offset has already been validated against the branch span.
    pub(crate) fn insert(&mut self, event: ShiftEvent) -> Result<EventId, PhyloError> {
        let position = self.insertion_point(event.branch, event.offset)?;
        let id = match self.free.pop() {
            Some(raw) => EventId::from_raw(raw),
            None => {
                self.slots.push(None);
                EventId::from_raw((self.slots.len() - 1) as u32)
            }
        };
        self.slots[id.index()] = Some(Slot {
            event,
            live_pos: self.live.len(),
        });
        self.live.push(id);
        self.by_branch[event.branch.index()].insert(position, id);
        Ok(id)
    }

    pub(crate) fn remove(&mut self, id: EventId) -> Result<ShiftEvent, PhyloError> {
        let slot = self
            .slots
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or_else(|| unknown_event(id))?;
        let branch_list = &mut self.by_branch[slot.event.branch.index()];
        let Some(pos) = branch_list.iter().position(|candidate| *candidate == id) else {
            return Err(PhyloError::Dimension(
                ErrorInfo::new("event-not-indexed", "event missing from its branch index")
                    .with_context("event", id)
                    .with_context("branch", slot.event.branch),
            ));
        };
        branch_list.remove(pos);
        self.live.swap_remove(slot.live_pos);
        if let Some(moved) = self.live.get(slot.live_pos).copied() {
            if let Some(Some(moved_slot)) = self.slots.get_mut(moved.index()) {
                moved_slot.live_pos = slot.live_pos;
            }
        }
        self.free.push(id.as_raw());
        Ok(slot.event)
    }

    pub(crate) fn relocate(
        &mut self,
        id: EventId,
        branch: TreeNodeId,
        offset: f64,
    ) -> Result<TreeNodeId, PhyloError> {
        let previous = *self.get(id).ok_or_else(|| unknown_event(id))?;
        let old_list = &mut self.by_branch[previous.branch.index()];
        if let Some(pos) = old_list.iter().position(|candidate| *candidate == id) {
            old_list.remove(pos);
        }
        let position = match self.insertion_point(branch, offset) {
            Ok(position) => position,
            Err(err) => {
                let restore_at = self
                    .insertion_point(previous.branch, previous.offset)
                    .unwrap_or(0);
                self.by_branch[previous.branch.index()].insert(restore_at, id);
                return Err(err);
            }
        };
        self.by_branch[branch.index()].insert(position, id);
        let event = self.get_mut(id)?;
        event.branch = branch;
        event.offset = offset;
        Ok(previous.branch)
    }

    pub(crate) fn set_multipliers(
        &mut self,
        id: EventId,
        multipliers: RatePair,
    ) -> Result<TreeNodeId, PhyloError> {
        let event = self.get_mut(id)?;
        event.multipliers = multipliers;
        Ok(event.branch)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.live.clear();
        for list in &mut self.by_branch {
            list.clear();
        }
    }

    fn insertion_point(&self, branch: TreeNodeId, offset: f64) -> Result<usize, PhyloError> {
        let list = self.by_branch.get(branch.index()).ok_or_else(|| {
            PhyloError::Dimension(
                ErrorInfo::new("unknown-branch", "branch does not exist")
                    .with_context("branch", branch),
            )
        })?;
        let position = list.partition_point(|other| {
            self.get(*other)
                .map(|event| event.offset < offset)
                .unwrap_or(false)
        });
        if let Some(next) = list.get(position).and_then(|other| self.get(*other)) {
            if next.offset == offset {
                return Err(PhyloError::Dimension(
                    ErrorInfo::new("duplicate-event-time", "events on a branch must be strictly ordered")
                        .with_context("branch", branch)
                        .with_context("offset", offset),
                ));
            }
        }
        Ok(position)
    }

    /// Verifies the arena against the per-branch indices.
    pub(crate) fn check(&self, branch_lengths: &[Option<f64>]) -> Result<(), PhyloError> {
        let mut indexed = 0usize;
        for (branch_index, list) in self.by_branch.iter().enumerate() {
            let mut previous = 0.0_f64;
            for id in list {
                let event = self.get(*id).ok_or_else(|| {
                    PhyloError::Dimension(
                        ErrorInfo::new("dangling-event", "branch index references a freed slot")
                            .with_context("event", id)
                            .with_context("branch", branch_index),
                    )
                })?;
                if event.branch.index() != branch_index {
                    return Err(PhyloError::Dimension(
                        ErrorInfo::new("event-branch-mismatch", "event indexed under the wrong branch")
                            .with_context("event", id)
                            .with_context("indexed", branch_index)
                            .with_context("recorded", event.branch),
                    ));
                }
                let Some(Some(length)) = branch_lengths.get(branch_index) else {
                    return Err(PhyloError::Dimension(
                        ErrorInfo::new("event-on-root", "events cannot sit above the root")
                            .with_context("event", id),
                    ));
                };
                if !(event.offset > previous && event.offset < *length) {
                    return Err(PhyloError::Dimension(
                        ErrorInfo::new("event-order", "event offsets must be strictly increasing inside the branch")
                            .with_context("event", id)
                            .with_context("offset", event.offset)
                            .with_context("branch_length", length),
                    ));
                }
                previous = event.offset;
                indexed += 1;
            }
        }
        if indexed != self.live.len() {
            return Err(PhyloError::Dimension(
                ErrorInfo::new("event-count-mismatch", "per-branch counts do not sum to the total")
                    .with_context("indexed", indexed)
                    .with_context("live", self.live.len()),
            ));
        }
        for (pos, id) in self.live.iter().enumerate() {
            match self.slots.get(id.index()).and_then(Option::as_ref) {
                Some(slot) if slot.live_pos == pos => {}
                _ => {
                    return Err(PhyloError::Dimension(
                        ErrorInfo::new("live-index-corrupt", "live event list out of sync")
                            .with_context("event", id),
                    ))
                }
            }
        }
        Ok(())
    }
}

fn unknown_event(id: EventId) -> PhyloError {
    PhyloError::Dimension(ErrorInfo::new("unknown-event", "event does not exist").with_context("event", id))
}
