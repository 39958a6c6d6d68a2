use crate::model::{Node, NodeId};
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

/// Payload of the most recent delete.
#[derive(Debug, Clone)]
pub struct DeletedBatch {
    /// Removed nodes, deep copies in their original list order.
    pub nodes: Vec<Node>,
    pub previous_active: Option<NodeId>,
    /// Survivors whose parent lists were rewritten by the delete.
    pub relinked: Vec<Relink>,
    pub deleted_at: Instant,
}

/// A surviving node's parent list before and after a delete rewrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct Relink {
    pub id: NodeId,
    pub original: Vec<NodeId>,
    pub rewritten: Vec<NodeId>,
}

impl Relink {
    /// Candidate parents for undoing the rewrite given the survivor's `current` list.
    ///
    /// Unchanged survivors get their original list back. Otherwise edits made since the
    /// delete win: original edges the survivor still had afterwards come back only if
    /// they are still present, edges the delete added are dropped, and edges added
    /// later are kept after the originals.
    pub fn restored_parents(&self, current: &[NodeId]) -> Vec<NodeId> {
        if current == self.rewritten.as_slice() {
            return self.original.clone();
        }
        let mut parents: Vec<NodeId> = self
            .original
            .iter()
            .filter(|p| !self.rewritten.contains(*p) || current.contains(*p))
            .cloned()
            .collect();
        for parent in current {
            let added_by_delete = !self.original.contains(parent) && self.rewritten.contains(parent);
            if !added_by_delete && !parents.contains(parent) {
                parents.push(parent.clone());
            }
        }
        parents
    }
}

/// Single-slot, time-bounded undo for deletions.
#[derive(Debug, Clone)]
pub struct UndoBuffer {
    slot: Option<DeletedBatch>,
    window: Duration,
}

impl UndoBuffer {
    pub fn new(window: Duration) -> Self {
        Self { slot: None, window }
    }

    /// Overwrites whatever was buffered before.
    pub fn record(
        &mut self,
        nodes: Vec<Node>,
        previous_active: Option<NodeId>,
        relinked: Vec<Relink>,
        now: Instant,
    ) {
        if let Some(previous) = &self.slot {
            tracing::debug!(
                dropped = previous.nodes.len(),
                "undo buffer overwritten by a newer delete"
            );
        }
        self.slot = Some(DeletedBatch {
            nodes,
            previous_active,
            relinked,
            deleted_at: now,
        });
    }

    pub fn is_pending(&self, now: Instant) -> bool {
        self.slot
            .as_ref()
            .is_some_and(|batch| !self.is_expired(batch, now))
    }

    pub fn pending(&self) -> Option<&DeletedBatch> {
        self.slot.as_ref()
    }

    /// Empties the slot and hands back the batch if it is still inside the window.
    pub fn take(&mut self, now: Instant) -> Option<DeletedBatch> {
        let batch = self.slot.take()?;
        if self.is_expired(&batch, now) {
            tracing::debug!(nodes = batch.nodes.len(), "undo window elapsed");
            return None;
        }
        Some(batch)
    }

    /// Clears an expired slot. Returns true when something was dropped.
    pub fn expire(&mut self, now: Instant) -> bool {
        let expired = self
            .slot
            .as_ref()
            .is_some_and(|batch| self.is_expired(batch, now));
        if expired {
            self.slot = None;
        }
        expired
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }

    fn is_expired(&self, batch: &DeletedBatch, now: Instant) -> bool {
        now.saturating_duration_since(batch.deleted_at) > self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewNode;

    fn batch() -> Vec<Node> {
        vec![NewNode::new("user", "gone").with_id("x").into_node()]
    }

    #[test]
    fn take_inside_window_succeeds_once() {
        let clock = ManualClock::new();
        let mut buffer = UndoBuffer::new(Duration::from_secs(30));
        buffer.record(batch(), None, Vec::new(), clock.now());
        clock.advance(Duration::from_millis(29_999));
        let restored = buffer.take(clock.now()).unwrap();
        assert_eq!(restored.nodes[0].id.as_str(), "x");
        assert!(buffer.take(clock.now()).is_none());
    }

    #[test]
    fn take_after_window_fails_and_clears() {
        let clock = ManualClock::new();
        let mut buffer = UndoBuffer::new(Duration::from_secs(30));
        buffer.record(batch(), None, Vec::new(), clock.now());
        clock.advance(Duration::from_millis(30_001));
        assert!(!buffer.is_pending(clock.now()));
        assert!(buffer.take(clock.now()).is_none());
        assert!(buffer.pending().is_none());
    }

    #[test]
    fn newer_delete_replaces_older() {
        let clock = ManualClock::new();
        let mut buffer = UndoBuffer::new(Duration::from_secs(30));
        buffer.record(batch(), None, Vec::new(), clock.now());
        let second = vec![NewNode::new("user", "also").with_id("y").into_node()];
        buffer.record(second, Some(NodeId::from("p")), Vec::new(), clock.now());
        let restored = buffer.take(clock.now()).unwrap();
        assert_eq!(restored.nodes.len(), 1);
        assert_eq!(restored.nodes[0].id.as_str(), "y");
        assert_eq!(restored.previous_active, Some(NodeId::from("p")));
    }

    #[test]
    fn expire_only_drops_stale_batches() {
        let clock = ManualClock::new();
        let mut buffer = UndoBuffer::new(Duration::from_secs(30));
        buffer.record(batch(), None, Vec::new(), clock.now());
        assert!(!buffer.expire(clock.now()));
        clock.advance(Duration::from_secs(31));
        assert!(buffer.expire(clock.now()));
        assert!(buffer.pending().is_none());
    }

    fn relink(original: &[&str], rewritten: &[&str]) -> Relink {
        Relink {
            id: NodeId::from("child"),
            original: original.iter().map(|id| NodeId::from(*id)).collect(),
            rewritten: rewritten.iter().map(|id| NodeId::from(*id)).collect(),
        }
    }

    fn ids(list: &[&str]) -> Vec<NodeId> {
        list.iter().map(|id| NodeId::from(*id)).collect()
    }

    #[test]
    fn untouched_survivor_gets_original_parents() {
        let case = relink(&["gone", "side"], &["side"]);
        assert_eq!(case.restored_parents(&ids(&["side"])), ids(&["gone", "side"]));
    }

    #[test]
    fn later_edits_survive_the_revert() {
        // The delete re-attached the survivor to "anchor"; "extra" was connected later.
        let reattached = relink(&["gone"], &["anchor"]);
        assert_eq!(
            reattached.restored_parents(&ids(&["anchor", "extra"])),
            ids(&["gone", "extra"])
        );
        // A surviving original edge the user removed since stays removed.
        let trimmed = relink(&["gone", "side"], &["side"]);
        assert_eq!(trimmed.restored_parents(&ids(&["extra"])), ids(&["gone", "extra"]));
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let start = clock.now();
        other.advance(Duration::from_secs(5));
        assert_eq!(clock.now() - start, Duration::from_secs(5));
    }
}
