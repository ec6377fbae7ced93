//! Event queue — time- and priority-ordered store of simulator events.
//!
//! Ordering is total and deterministic: `(scheduled_time asc, priority
//! desc, insertion_sequence asc)`. A binary heap of keys gives O(log n)
//! scheduling; keys of events that left the pending state are discarded
//! lazily when they surface. The queue owns every event for the lifetime
//! of the engine — cancelled and executed events stay addressable.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use es_domain::event::{EventStatus, SimEvent};
use es_domain::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    scheduled_time: DateTime<Utc>,
    priority_rank: Reverse<u8>,
    seq: u64,
    event_id: Uuid,
}

/// Filters for [`EventQueue::list`].
#[derive(Debug, Default, Clone)]
pub struct EventFilter {
    pub status: Option<EventStatus>,
    pub modality: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSummary {
    pub total: usize,
    pub pending: usize,
    pub executed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub by_modality: std::collections::BTreeMap<String, usize>,
    pub next_event_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct EventQueue {
    events: HashMap<Uuid, SimEvent>,
    /// Insertion sequence per event, kept across status resets so replays
    /// preserve the original tie-break order.
    seqs: HashMap<Uuid, u64>,
    heap: BinaryHeap<Reverse<QueueKey>>,
    /// Events that currently have a key in the heap (live or stale).
    in_heap: HashSet<Uuid>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn key_for(&self, event: &SimEvent) -> QueueKey {
        QueueKey {
            scheduled_time: event.scheduled_time,
            priority_rank: Reverse(event.priority),
            seq: self.seqs[&event.event_id],
            event_id: event.event_id,
        }
    }

    fn push_key(&mut self, event_id: Uuid) {
        if self.in_heap.insert(event_id) {
            let key = self.key_for(&self.events[&event_id]);
            self.heap.push(Reverse(key));
        }
    }

    /// Insert an event. A `pending` event scheduled before `now` is a
    /// state conflict; non-pending events are accepted unconditionally
    /// (engine reset relies on that).
    pub fn insert(&mut self, event: SimEvent, now: DateTime<Utc>) -> Result<&SimEvent> {
        if self.events.contains_key(&event.event_id) {
            return Err(Error::conflict(format!(
                "event '{}' already exists",
                event.event_id
            )));
        }
        if event.status.is_pending() && event.scheduled_time < now {
            return Err(Error::conflict(format!(
                "cannot schedule event in the past: {} < {}",
                event.scheduled_time.to_rfc3339(),
                now.to_rfc3339()
            )));
        }
        let event_id = event.event_id;
        self.seqs.insert(event_id, self.next_seq);
        self.next_seq += 1;
        let pending = event.status.is_pending();
        self.events.insert(event_id, event);
        if pending {
            self.push_key(event_id);
        }
        Ok(&self.events[&event_id])
    }

    /// Discard heap keys whose event is no longer pending.
    fn prune_stale(&mut self) {
        while let Some(Reverse(key)) = self.heap.peek() {
            let live = self
                .events
                .get(&key.event_id)
                .map_or(false, |e| e.status.is_pending());
            if live {
                return;
            }
            let key = self.heap.pop().expect("peeked above").0;
            self.in_heap.remove(&key.event_id);
        }
    }

    /// The earliest pending event, or `None`.
    pub fn peek_earliest_pending(&mut self) -> Option<&SimEvent> {
        self.prune_stale();
        let id = self.heap.peek().map(|Reverse(key)| key.event_id)?;
        self.events.get(&id)
    }

    /// Pop the earliest pending event scheduled at or before `upto`.
    /// Callers execute (or skip) the event and update its status.
    pub fn next_due(&mut self, upto: DateTime<Utc>) -> Option<Uuid> {
        self.prune_stale();
        let due = self
            .heap
            .peek()
            .map_or(false, |Reverse(key)| key.scheduled_time <= upto);
        if !due {
            return None;
        }
        let key = self.heap.pop().expect("peeked above").0;
        self.in_heap.remove(&key.event_id);
        Some(key.event_id)
    }

    pub fn get(&self, event_id: &Uuid) -> Option<&SimEvent> {
        self.events.get(event_id)
    }

    pub fn get_mut(&mut self, event_id: &Uuid) -> Option<&mut SimEvent> {
        self.events.get_mut(event_id)
    }

    /// Cancel a pending event. Any other status is a conflict.
    pub fn cancel(&mut self, event_id: &Uuid) -> Result<&SimEvent> {
        let event = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| Error::not_found(format!("event '{event_id}' not found")))?;
        if !event.status.is_pending() {
            return Err(Error::validation(format!(
                "cannot cancel event '{}' in status '{}'",
                event_id,
                event.status.as_str()
            )));
        }
        event.mark_cancelled();
        Ok(&self.events[event_id])
    }

    /// Put an executed/failed event back into the pending set, keeping its
    /// original insertion sequence. Used by undo.
    pub fn revert_to_pending(&mut self, event_id: &Uuid) -> Result<()> {
        let event = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| Error::not_found(format!("event '{event_id}' not found")))?;
        event.reset_to_pending();
        self.push_key(*event_id);
        Ok(())
    }

    /// Reset every event back to pending, clearing execution traces.
    /// Events are NOT deleted.
    pub fn reset_statuses(&mut self) -> usize {
        for event in self.events.values_mut() {
            event.reset_to_pending();
        }
        self.heap.clear();
        self.in_heap.clear();
        let ids: Vec<Uuid> = self.events.keys().copied().collect();
        for id in ids {
            self.push_key(id);
        }
        self.events.len()
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.events.len();
        self.events.clear();
        self.seqs.clear();
        self.heap.clear();
        self.in_heap.clear();
        removed
    }

    /// Earliest pending scheduled time without touching the heap.
    pub fn next_event_time(&self) -> Option<DateTime<Utc>> {
        self.events
            .values()
            .filter(|e| e.status.is_pending())
            .map(|e| (e.scheduled_time, Reverse(e.priority), self.seqs[&e.event_id]))
            .min()
            .map(|(time, _, _)| time)
    }

    pub fn count_by_status(&self, status: EventStatus) -> usize {
        self.events.values().filter(|e| e.status == status).count()
    }

    /// Filtered listing ordered by `(scheduled_time, insertion_sequence)`.
    pub fn list(&self, filter: &EventFilter) -> (Vec<SimEvent>, usize) {
        let mut matches: Vec<&SimEvent> = self
            .events
            .values()
            .filter(|e| filter.status.map_or(true, |s| e.status == s))
            .filter(|e| filter.modality.as_ref().map_or(true, |m| &e.modality == m))
            .filter(|e| filter.start_time.map_or(true, |t| e.scheduled_time >= t))
            .filter(|e| filter.end_time.map_or(true, |t| e.scheduled_time <= t))
            .collect();
        matches.sort_by_key(|e| (e.scheduled_time, self.seqs[&e.event_id]));
        let total = matches.len();
        let limit = filter.limit.unwrap_or(100);
        let page = matches
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .cloned()
            .collect();
        (page, total)
    }

    pub fn modality_names_in_use(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .events
            .values()
            .map(|e| e.modality.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        names
    }

    pub fn summary(&self) -> QueueSummary {
        let mut by_modality = std::collections::BTreeMap::new();
        for event in self.events.values() {
            *by_modality.entry(event.modality.clone()).or_insert(0) += 1;
        }
        QueueSummary {
            total: self.events.len(),
            pending: self.count_by_status(EventStatus::Pending),
            executed: self.count_by_status(EventStatus::Executed),
            failed: self.count_by_status(EventStatus::Failed),
            skipped: self.count_by_status(EventStatus::Skipped),
            cancelled: self.count_by_status(EventStatus::Cancelled),
            by_modality,
            next_event_time: self.next_event_time(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use es_domain::event::EventRequest;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
    }

    fn event(offset_secs: i64, priority: u8) -> SimEvent {
        SimEvent::from_request(
            EventRequest {
                scheduled_time: t0() + Duration::seconds(offset_secs),
                modality: "email".into(),
                data: serde_json::json!({}),
                priority,
                metadata: Default::default(),
                agent_id: None,
            },
            t0(),
        )
    }

    #[test]
    fn insert_rejects_past_pending_events() {
        let mut queue = EventQueue::new();
        let stale = event(-10, 50);
        let err = queue.insert(stale, t0()).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(queue.is_empty());
    }

    #[test]
    fn ordering_is_time_then_priority_then_sequence() {
        let mut queue = EventQueue::new();
        let late = event(60, 50);
        let early_low = event(30, 10);
        let early_high = event(30, 90);
        let tie_a = event(45, 50);
        let tie_b = event(45, 50);

        let ids: Vec<Uuid> = [&late, &early_low, &early_high, &tie_a, &tie_b]
            .iter()
            .map(|e| e.event_id)
            .collect();
        for e in [late, early_low, early_high, tie_a, tie_b] {
            queue.insert(e, t0()).unwrap();
        }

        let mut order = Vec::new();
        while let Some(id) = queue.next_due(t0() + Duration::seconds(120)) {
            order.push(id);
            queue.get_mut(&id).unwrap().mark_executed(t0());
        }
        // 30s/p90, 30s/p10, 45s first-inserted, 45s second-inserted, 60s
        assert_eq!(order, vec![ids[2], ids[1], ids[3], ids[4], ids[0]]);
    }

    #[test]
    fn next_due_ignores_events_beyond_upto() {
        let mut queue = EventQueue::new();
        queue.insert(event(30, 50), t0()).unwrap();
        queue.insert(event(90, 50), t0()).unwrap();
        assert!(queue.next_due(t0() + Duration::seconds(60)).is_some());
        assert!(queue.next_due(t0() + Duration::seconds(60)).is_none());
    }

    #[test]
    fn peek_skips_cancelled_events() {
        let mut queue = EventQueue::new();
        let first = event(30, 50);
        let second = event(60, 50);
        let first_id = first.event_id;
        let second_id = second.event_id;
        queue.insert(first, t0()).unwrap();
        queue.insert(second, t0()).unwrap();

        queue.cancel(&first_id).unwrap();
        assert_eq!(queue.peek_earliest_pending().unwrap().event_id, second_id);
        // cancelled event remains addressable
        assert_eq!(queue.get(&first_id).unwrap().status, EventStatus::Cancelled);
    }

    #[test]
    fn cancel_requires_pending() {
        let mut queue = EventQueue::new();
        let e = event(30, 50);
        let id = e.event_id;
        queue.insert(e, t0()).unwrap();
        queue.get_mut(&id).unwrap().mark_executed(t0());
        let err = queue.cancel(&id).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn cancel_unknown_event_is_not_found() {
        let mut queue = EventQueue::new();
        let err = queue.cancel(&Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn reset_statuses_revives_original_order() {
        let mut queue = EventQueue::new();
        let a = event(30, 50);
        let b = event(30, 50);
        let a_id = a.event_id;
        let b_id = b.event_id;
        queue.insert(a, t0()).unwrap();
        queue.insert(b, t0()).unwrap();

        // execute both, then reset
        while let Some(id) = queue.next_due(t0() + Duration::seconds(60)) {
            queue.get_mut(&id).unwrap().mark_executed(t0());
        }
        assert_eq!(queue.reset_statuses(), 2);

        let mut order = Vec::new();
        while let Some(id) = queue.next_due(t0() + Duration::seconds(60)) {
            order.push(id);
            queue.get_mut(&id).unwrap().mark_executed(t0());
        }
        assert_eq!(order, vec![a_id, b_id]);
        assert!(queue
            .events
            .values()
            .all(|e| e.executed_at.is_none() || e.status == EventStatus::Executed));
    }

    #[test]
    fn revert_to_pending_does_not_duplicate_keys() {
        let mut queue = EventQueue::new();
        let e = event(30, 50);
        let id = e.event_id;
        queue.insert(e, t0()).unwrap();

        let popped = queue.next_due(t0() + Duration::seconds(60)).unwrap();
        queue.get_mut(&popped).unwrap().mark_executed(t0());
        queue.revert_to_pending(&id).unwrap();
        queue.revert_to_pending(&id).unwrap();

        assert_eq!(queue.next_due(t0() + Duration::seconds(60)), Some(id));
        queue.get_mut(&id).unwrap().mark_executed(t0());
        assert_eq!(queue.next_due(t0() + Duration::seconds(60)), None);
    }

    #[test]
    fn summary_counts_statuses_and_modalities() {
        let mut queue = EventQueue::new();
        let a = event(30, 50);
        let a_id = a.event_id;
        queue.insert(a, t0()).unwrap();
        queue.insert(event(60, 50), t0()).unwrap();
        queue.cancel(&a_id).unwrap();

        let summary = queue.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.by_modality["email"], 2);
        assert_eq!(summary.next_event_time, Some(t0() + Duration::seconds(60)));
    }

    #[test]
    fn list_filters_and_pages() {
        let mut queue = EventQueue::new();
        for offset in [30, 60, 90, 120] {
            queue.insert(event(offset, 50), t0()).unwrap();
        }
        let (page, total) = queue.list(&EventFilter {
            start_time: Some(t0() + Duration::seconds(60)),
            limit: Some(2),
            ..Default::default()
        });
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].scheduled_time, t0() + Duration::seconds(60));
    }

    #[test]
    fn clear_empties_everything() {
        let mut queue = EventQueue::new();
        queue.insert(event(30, 50), t0()).unwrap();
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
        assert!(queue.peek_earliest_pending().is_none());
    }
}
