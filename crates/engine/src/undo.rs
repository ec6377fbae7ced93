//! Undo infrastructure — targeted mementos and the two-stack undo/redo
//! machinery.
//!
//! Each executed event leaves one [`UndoEntry`] holding whatever its
//! modality needs to reverse the mutation: additive operations store ids,
//! destructive ones store the full objects. Undoing moves entries to the
//! redo stack; any fresh execution clears the redo stack (the timeline
//! diverged).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use es_modality::{UNDO_ACTION, UNDO_PREV_COUNT, UNDO_PREV_UPDATED};

use es_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// UndoEntry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoEntry {
    pub event_id: Uuid,
    pub modality: String,
    /// Modality-specific memento. Always carries `action`,
    /// `state_previous_update_count`, and `state_previous_last_updated`.
    pub undo_data: Value,
    /// Simulated instant the event executed.
    pub executed_at: DateTime<Utc>,
}

impl UndoEntry {
    pub fn new(
        event_id: Uuid,
        modality: impl Into<String>,
        undo_data: Value,
        executed_at: DateTime<Utc>,
    ) -> Result<Self> {
        let modality = modality.into();
        if modality.trim().is_empty() {
            return Err(Error::validation("undo entry modality cannot be empty"));
        }
        let map = undo_data
            .as_object()
            .ok_or_else(|| Error::validation("undo_data must be an object"))?;
        for key in [UNDO_ACTION, UNDO_PREV_COUNT, UNDO_PREV_UPDATED] {
            if !map.contains_key(key) {
                return Err(Error::validation(format!("undo_data must contain '{key}'")));
            }
        }
        Ok(Self {
            event_id,
            modality,
            undo_data,
            executed_at,
        })
    }

    pub fn action(&self) -> Option<&str> {
        self.undo_data.get(UNDO_ACTION).and_then(Value::as_str)
    }

    /// Compact view used by the undo/redo status listings.
    pub fn summary(&self) -> Value {
        json!({
            "event_id": self.event_id,
            "modality": self.modality,
            "action": self.action(),
            "executed_at": self.executed_at,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// UndoStack
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Two insertion-ordered stacks (top = back) with FIFO eviction past
/// `max_size`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UndoStack {
    undo_entries: VecDeque<UndoEntry>,
    redo_entries: VecDeque<UndoEntry>,
    max_size: Option<usize>,
}

impl UndoStack {
    pub fn new(max_size: Option<usize>) -> Result<Self> {
        if let Some(0) = max_size {
            return Err(Error::validation("max_size must be positive"));
        }
        Ok(Self {
            undo_entries: VecDeque::new(),
            redo_entries: VecDeque::new(),
            max_size,
        })
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_entries.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_entries.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_entries.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_entries.len()
    }

    /// Record a fresh execution. Clears the redo stack (timeline
    /// divergence) and returns the evicted oldest entry when `max_size`
    /// overflows.
    pub fn push(&mut self, entry: UndoEntry) -> Option<UndoEntry> {
        self.redo_entries.clear();
        self.push_preserving_redo(entry)
    }

    /// Record a re-execution during redo: identical to [`UndoStack::push`]
    /// except the remaining redo entries survive.
    pub fn push_preserving_redo(&mut self, entry: UndoEntry) -> Option<UndoEntry> {
        self.undo_entries.push_back(entry);
        match self.max_size {
            Some(max) if self.undo_entries.len() > max => self.undo_entries.pop_front(),
            _ => None,
        }
    }

    /// Pop up to `count` entries for undoing, most recent first.
    pub fn pop_for_undo(&mut self, count: usize) -> Result<Vec<UndoEntry>> {
        if count == 0 {
            return Err(Error::validation("count must be positive"));
        }
        let take = count.min(self.undo_entries.len());
        Ok((0..take)
            .filter_map(|_| self.undo_entries.pop_back())
            .collect())
    }

    /// Record a successfully undone entry so it can be redone.
    pub fn push_to_redo(&mut self, entry: UndoEntry) {
        self.redo_entries.push_back(entry);
        if let Some(max) = self.max_size {
            if self.redo_entries.len() > max {
                self.redo_entries.pop_front();
            }
        }
    }

    /// Pop up to `count` entries for redoing, most recent first.
    pub fn pop_for_redo(&mut self, count: usize) -> Result<Vec<UndoEntry>> {
        if count == 0 {
            return Err(Error::validation("count must be positive"));
        }
        let take = count.min(self.redo_entries.len());
        Ok((0..take)
            .filter_map(|_| self.redo_entries.pop_back())
            .collect())
    }

    /// Return popped-but-unprocessed entries (most recent first, as
    /// returned by [`UndoStack::pop_for_undo`]) to the undo stack in their
    /// original order. Used when a batch undo halts partway.
    pub fn restore_undo(&mut self, entries: Vec<UndoEntry>) {
        for entry in entries.into_iter().rev() {
            self.undo_entries.push_back(entry);
        }
    }

    /// Counterpart of [`UndoStack::restore_undo`] for a halted redo batch.
    pub fn restore_redo(&mut self, entries: Vec<UndoEntry>) {
        for entry in entries.into_iter().rev() {
            self.redo_entries.push_back(entry);
        }
    }

    pub fn clear(&mut self) {
        self.undo_entries.clear();
        self.redo_entries.clear();
    }

    /// Most-recent-first digests of the undoable entries.
    pub fn undo_summary(&self) -> Vec<Value> {
        self.undo_entries.iter().rev().map(UndoEntry::summary).collect()
    }

    pub fn redo_summary(&self) -> Vec<Value> {
        self.redo_entries.iter().rev().map(UndoEntry::summary).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
    }

    fn entry(n: u64) -> UndoEntry {
        UndoEntry::new(
            Uuid::new_v4(),
            "email",
            json!({
                "action": "remove_email",
                "message_id": format!("m{n}"),
                "state_previous_update_count": n,
                "state_previous_last_updated": null,
            }),
            at(),
        )
        .unwrap()
    }

    #[test]
    fn entry_requires_memento_keys() {
        let err = UndoEntry::new(Uuid::new_v4(), "email", json!({"action": "x"}), at()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = UndoEntry::new(Uuid::new_v4(), "", json!({}), at()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn zero_max_size_is_rejected() {
        assert!(UndoStack::new(Some(0)).is_err());
        assert!(UndoStack::new(None).is_ok());
    }

    #[test]
    fn push_clears_redo() {
        let mut stack = UndoStack::new(None).unwrap();
        stack.push(entry(1));
        let undone = stack.pop_for_undo(1).unwrap();
        stack.push_to_redo(undone.into_iter().next().unwrap());
        assert!(stack.can_redo());

        stack.push(entry(2));
        assert!(!stack.can_redo());
        assert_eq!(stack.undo_count(), 1);
    }

    #[test]
    fn push_preserving_redo_keeps_redo() {
        let mut stack = UndoStack::new(None).unwrap();
        stack.push(entry(1));
        stack.push(entry(2));
        for e in stack.pop_for_undo(2).unwrap() {
            stack.push_to_redo(e);
        }
        assert_eq!(stack.redo_count(), 2);
        let popped = stack.pop_for_redo(1).unwrap();
        stack.push_preserving_redo(popped.into_iter().next().unwrap());
        assert_eq!(stack.redo_count(), 1);
        assert_eq!(stack.undo_count(), 1);
    }

    #[test]
    fn max_size_evicts_oldest() {
        let mut stack = UndoStack::new(Some(2)).unwrap();
        let first = entry(1);
        let first_id = first.event_id;
        assert!(stack.push(first).is_none());
        assert!(stack.push(entry(2)).is_none());
        let evicted = stack.push(entry(3)).unwrap();
        assert_eq!(evicted.event_id, first_id);
        assert_eq!(stack.undo_count(), 2);
    }

    #[test]
    fn pop_returns_most_recent_first() {
        let mut stack = UndoStack::new(None).unwrap();
        stack.push(entry(1));
        stack.push(entry(2));
        stack.push(entry(3));
        let popped = stack.pop_for_undo(2).unwrap();
        assert_eq!(popped.len(), 2);
        assert_eq!(popped[0].undo_data["state_previous_update_count"], 3);
        assert_eq!(popped[1].undo_data["state_previous_update_count"], 2);
        assert_eq!(stack.undo_count(), 1);
    }

    #[test]
    fn pop_zero_is_invalid() {
        let mut stack = UndoStack::new(None).unwrap();
        assert!(stack.pop_for_undo(0).is_err());
        assert!(stack.pop_for_redo(0).is_err());
    }

    #[test]
    fn pop_beyond_depth_returns_what_exists() {
        let mut stack = UndoStack::new(None).unwrap();
        stack.push(entry(1));
        let popped = stack.pop_for_undo(5).unwrap();
        assert_eq!(popped.len(), 1);
        assert!(!stack.can_undo());
    }

    #[test]
    fn restore_undo_preserves_original_order() {
        let mut stack = UndoStack::new(None).unwrap();
        stack.push(entry(1));
        stack.push(entry(2));
        stack.push(entry(3));
        let popped = stack.pop_for_undo(3).unwrap();
        stack.restore_undo(popped);
        let again = stack.pop_for_undo(3).unwrap();
        assert_eq!(again[0].undo_data["state_previous_update_count"], 3);
        assert_eq!(again[2].undo_data["state_previous_update_count"], 1);
    }

    #[test]
    fn summaries_are_most_recent_first() {
        let mut stack = UndoStack::new(None).unwrap();
        stack.push(entry(1));
        stack.push(entry(2));
        let summary = stack.undo_summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0]["action"], "remove_email");
        assert_eq!(summary[0]["modality"], "email");
    }

    #[test]
    fn stack_serializes_round_trip() {
        let mut stack = UndoStack::new(Some(10)).unwrap();
        stack.push(entry(1));
        stack.push(entry(2));
        for e in stack.pop_for_undo(1).unwrap() {
            stack.push_to_redo(e);
        }
        let raw = serde_json::to_string(&stack).unwrap();
        let restored: UndoStack = serde_json::from_str(&raw).unwrap();
        assert_eq!(restored.undo_count(), 1);
        assert_eq!(restored.redo_count(), 1);
        assert_eq!(restored.undo_summary(), stack.undo_summary());
        assert_eq!(restored.redo_summary(), stack.redo_summary());
    }
}
