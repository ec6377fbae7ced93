//! Simulation engine — drives event execution against the simulated clock
//! and coordinates the queue, environment, and undo stack.
//!
//! The engine is single-owner: the HTTP layer serializes access through one
//! mutex, so every operation here runs to completion before another begins
//! and readers never observe a half-applied event.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use es_domain::event::{EventRequest, EventStatus, SimEvent, IMMEDIATE_PRIORITY};
use es_domain::{Error, Result};

use crate::environment::Environment;
use crate::queue::{EventFilter, EventQueue, QueueSummary};
use crate::undo::{UndoEntry, UndoStack};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct StartSummary {
    pub simulation_id: Uuid,
    pub status: &'static str,
    pub current_time: DateTime<Utc>,
    pub auto_advance: bool,
    pub time_scale: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopSummary {
    pub simulation_id: Uuid,
    pub status: &'static str,
    pub final_time: Option<DateTime<Utc>>,
    pub total_events: Option<usize>,
    pub events_executed: Option<usize>,
    pub events_failed: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetSummary {
    pub status: &'static str,
    pub cleared_events: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearSummary {
    pub status: &'static str,
    pub events_removed: usize,
    pub modalities_cleared: usize,
    pub time_reset: bool,
    pub current_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvanceResult {
    pub previous_time: DateTime<Utc>,
    pub current_time: DateTime<Utc>,
    pub events_executed: usize,
    pub events_failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetTimeResult {
    pub previous_time: DateTime<Utc>,
    pub current_time: DateTime<Utc>,
    pub skipped_events: usize,
    pub executed_events: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkipResult {
    pub current_time: DateTime<Utc>,
    pub events_executed: usize,
    pub next_event_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub is_running: bool,
    pub current_time: DateTime<Utc>,
    pub is_paused: bool,
    pub time_scale: f64,
    pub pending_events: usize,
    pub executed_events: usize,
    pub failed_events: usize,
    pub next_event_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UndoOutcome {
    pub undone: usize,
    pub entries: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedoOutcome {
    pub redone: usize,
    pub entries: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UndoStatus {
    pub can_undo: bool,
    pub can_redo: bool,
    pub undo_count: usize,
    pub redo_count: usize,
    pub undo_summary: Vec<Value>,
    pub redo_summary: Vec<Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SimulationEngine {
    simulation_id: Uuid,
    env: Environment,
    queue: EventQueue,
    undo: UndoStack,
    is_running: bool,
    auto_advance: bool,
    /// Bumped on stop/reset/clear so a live auto-advance worker notices it
    /// should terminate.
    generation: u64,
}

impl SimulationEngine {
    pub fn new(start_time: DateTime<Utc>, undo_max_size: Option<usize>) -> Result<Self> {
        Ok(Self {
            simulation_id: Uuid::new_v4(),
            env: Environment::new(start_time),
            queue: EventQueue::new(),
            undo: UndoStack::new(undo_max_size)?,
            is_running: false,
            auto_advance: false,
            generation: 0,
        })
    }

    pub fn simulation_id(&self) -> Uuid {
        self.simulation_id
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn is_paused(&self) -> bool {
        self.env.clock().is_paused()
    }

    pub fn time_scale(&self) -> f64 {
        self.env.clock().time_scale()
    }

    pub fn auto_advance(&self) -> bool {
        self.auto_advance
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.env.clock().current_time()
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    fn require_running(&self) -> Result<()> {
        if !self.is_running {
            return Err(Error::conflict("simulation is not running"));
        }
        Ok(())
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    pub fn start(&mut self, auto_advance: bool, time_scale: f64) -> Result<StartSummary> {
        if !self.is_running {
            self.env.clock_mut().set_scale(time_scale)?;
            self.is_running = true;
            self.auto_advance = auto_advance;
            self.generation += 1;
            tracing::info!(
                simulation_id = %self.simulation_id,
                auto_advance,
                time_scale,
                "simulation started"
            );
        }
        Ok(StartSummary {
            simulation_id: self.simulation_id,
            status: "running",
            current_time: self.current_time(),
            auto_advance: self.auto_advance,
            time_scale: self.time_scale(),
        })
    }

    /// Stop the engine. Stopping a stopped engine reports null execution
    /// fields.
    pub fn stop(&mut self) -> StopSummary {
        if !self.is_running {
            return StopSummary {
                simulation_id: self.simulation_id,
                status: "stopped",
                final_time: None,
                total_events: None,
                events_executed: None,
                events_failed: None,
            };
        }
        self.is_running = false;
        self.auto_advance = false;
        self.generation += 1;
        let summary = self.queue.summary();
        tracing::info!(simulation_id = %self.simulation_id, "simulation stopped");
        StopSummary {
            simulation_id: self.simulation_id,
            status: "stopped",
            final_time: Some(self.current_time()),
            total_events: Some(summary.total),
            events_executed: Some(summary.executed),
            events_failed: Some(summary.failed),
        }
    }

    /// Stop and mark every event pending again. Keeps the clock, pause
    /// flag, time scale, and all modality state.
    pub fn reset(&mut self) -> ResetSummary {
        self.stop();
        let cleared_events = self.queue.reset_statuses();
        self.undo.clear();
        tracing::info!(simulation_id = %self.simulation_id, cleared_events, "simulation reset");
        ResetSummary {
            status: "reset",
            cleared_events,
            message: format!("{cleared_events} events reset to pending"),
        }
    }

    /// Stop, drop every event, and wipe all modality state. Optionally
    /// rewind the clock to `reset_time_to` (the one path where backwards
    /// motion is legal — the timeline is gone).
    pub fn clear(&mut self, reset_time_to: Option<DateTime<Utc>>) -> ClearSummary {
        self.stop();
        let events_removed = self.queue.clear();
        self.undo.clear();
        let modalities_cleared = self.env.reset_all();
        let time_reset = reset_time_to.is_some();
        if let Some(target) = reset_time_to {
            self.env.clock_mut().force_set(target);
        }
        tracing::info!(
            simulation_id = %self.simulation_id,
            events_removed,
            modalities_cleared,
            time_reset,
            "simulation cleared"
        );
        ClearSummary {
            status: "cleared",
            events_removed,
            modalities_cleared,
            time_reset,
            current_time: self.current_time(),
        }
    }

    // ── Scheduling ────────────────────────────────────────────────────

    /// Validate and enqueue a future event. The payload is normalized by
    /// the target modality up front so execution and undo reference the
    /// same generated ids.
    pub fn schedule(&mut self, mut req: EventRequest) -> Result<SimEvent> {
        let state = self.env.get(&req.modality).ok_or_else(|| {
            Error::not_found(format!("unknown modality '{}'", req.modality))
        })?;
        req.data = state.prepare_input(&req.data)?;
        let now = self.current_time();
        let event = SimEvent::from_request(req, now);
        let event = self.queue.insert(event, now)?;
        tracing::debug!(
            event_id = %event.event_id,
            modality = %event.modality,
            scheduled_time = %event.scheduled_time,
            priority = event.priority,
            "event scheduled"
        );
        Ok(event.clone())
    }

    /// Schedule at the current instant with top priority. Execution still
    /// requires a subsequent advance.
    pub fn schedule_immediate(&mut self, mut req: EventRequest) -> Result<SimEvent> {
        req.scheduled_time = self.current_time();
        req.priority = IMMEDIATE_PRIORITY;
        self.schedule(req)
    }

    pub fn cancel_event(&mut self, event_id: &Uuid) -> Result<SimEvent> {
        self.queue.cancel(event_id).map(Clone::clone)
    }

    pub fn get_event(&self, event_id: &Uuid) -> Option<&SimEvent> {
        self.queue.get(event_id)
    }

    pub fn list_events(&self, filter: &EventFilter) -> (Vec<SimEvent>, usize) {
        self.queue.list(filter)
    }

    pub fn queue_summary(&self) -> QueueSummary {
        self.queue.summary()
    }

    pub fn next_pending(&mut self) -> Option<SimEvent> {
        self.queue.peek_earliest_pending().cloned()
    }

    // ── Time control ──────────────────────────────────────────────────

    /// Advance simulated time, executing every due event in queue order.
    /// The clock steps to each event's scheduled time as it executes, then
    /// lands on the target.
    pub fn advance(&mut self, seconds: f64) -> Result<AdvanceResult> {
        self.require_running()?;
        if self.env.clock().is_paused() {
            return Err(Error::conflict("simulation is paused"));
        }
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(Error::validation("seconds must be a positive number"));
        }
        let previous_time = self.current_time();
        let target = previous_time + Duration::microseconds((seconds * 1_000_000.0).round() as i64);
        let (executed, failed) = self.run_due_events(target);
        self.env.clock_mut().set(target)?;
        Ok(AdvanceResult {
            previous_time,
            current_time: target,
            events_executed: executed,
            events_failed: failed,
        })
    }

    /// Jump the clock forward without executing: every pending event in
    /// the jumped-over window is marked skipped.
    pub fn set_time(&mut self, target: DateTime<Utc>) -> Result<SetTimeResult> {
        self.require_running()?;
        let previous_time = self.current_time();
        if target < previous_time {
            return Err(Error::conflict(format!(
                "cannot move time backwards: {} < {}",
                target.to_rfc3339(),
                previous_time.to_rfc3339()
            )));
        }
        let mut skipped = 0;
        while let Some(event_id) = self.queue.next_due(target) {
            if let Some(event) = self.queue.get_mut(&event_id) {
                event.mark_skipped();
                skipped += 1;
            }
        }
        self.env.clock_mut().set(target)?;
        if skipped > 0 {
            tracing::info!(skipped, target = %target, "events skipped by time jump");
        }
        Ok(SetTimeResult {
            previous_time,
            current_time: target,
            skipped_events: skipped,
            executed_events: 0,
        })
    }

    /// Advance exactly to the earliest pending event and execute every
    /// pending event scheduled at that instant.
    pub fn skip_to_next(&mut self) -> Result<SkipResult> {
        self.require_running()?;
        let next_time = self
            .queue
            .peek_earliest_pending()
            .map(|e| e.scheduled_time)
            .ok_or_else(|| Error::not_found("no pending events to skip to"))?;
        let target = next_time.max(self.current_time());
        self.env.clock_mut().set(target)?;
        let (executed, _) = self.run_due_events(target);
        Ok(SkipResult {
            current_time: self.current_time(),
            events_executed: executed,
            next_event_time: self.queue.next_event_time(),
        })
    }

    pub fn pause(&mut self) {
        self.env.clock_mut().pause();
    }

    pub fn resume(&mut self) {
        self.env.clock_mut().resume();
    }

    pub fn set_time_scale(&mut self, scale: f64) -> Result<f64> {
        self.env.clock_mut().set_scale(scale)?;
        Ok(scale)
    }

    // ── Execution ─────────────────────────────────────────────────────

    /// Execute all due pending events up to `upto`, in queue order.
    /// Individual failures are recorded on the event and do not stop the
    /// sweep.
    fn run_due_events(&mut self, upto: DateTime<Utc>) -> (usize, usize) {
        let mut executed = 0;
        let mut failed = 0;
        while let Some(event_id) = self.queue.next_due(upto) {
            let scheduled = self
                .queue
                .get(&event_id)
                .map(|e| e.scheduled_time)
                .unwrap_or(upto);
            let step = scheduled.max(self.current_time());
            if self.env.clock_mut().set(step).is_err() {
                // unreachable: due events are popped in ascending order
                continue;
            }
            match self.execute_event(event_id, false) {
                Ok(()) => executed += 1,
                Err(_) => failed += 1,
            }
        }
        (executed, failed)
    }

    /// The per-event execution algorithm. On success the event is marked
    /// executed and an undo entry is pushed; on any failure the event is
    /// marked failed and no undo entry is pushed.
    fn execute_event(&mut self, event_id: Uuid, preserve_redo: bool) -> Result<()> {
        let (modality, payload) = match self.queue.get(&event_id) {
            Some(event) => (event.modality.clone(), event.payload.clone()),
            None => return Err(Error::not_found(format!("event '{event_id}' not found"))),
        };
        let now = self.current_time();

        let Some(state) = self.env.get_mut(&modality) else {
            let message = format!("unknown modality '{modality}'");
            self.fail_event(event_id, &message);
            return Err(Error::not_found(message));
        };

        let undo_data = match state.create_undo_data(&payload) {
            Ok(data) => data,
            Err(e) => {
                self.fail_event(event_id, &e.to_string());
                return Err(e);
            }
        };
        if let Err(e) = state.apply(&payload, now) {
            self.fail_event(event_id, &e.to_string());
            return Err(e);
        }

        let entry = UndoEntry::new(event_id, modality.clone(), undo_data, now)?;
        let evicted = if preserve_redo {
            self.undo.push_preserving_redo(entry)
        } else {
            self.undo.push(entry)
        };
        if let Some(old) = evicted {
            tracing::debug!(event_id = %old.event_id, "undo history evicted oldest entry");
        }

        if let Some(event) = self.queue.get_mut(&event_id) {
            event.mark_executed(now);
        }
        tracing::debug!(event_id = %event_id, modality = %modality, executed_at = %now, "event executed");
        Ok(())
    }

    fn fail_event(&mut self, event_id: Uuid, message: &str) {
        if let Some(event) = self.queue.get_mut(&event_id) {
            event.mark_failed(message);
        }
        tracing::warn!(event_id = %event_id, error = %message, "event failed");
    }

    // ── Undo / redo ───────────────────────────────────────────────────

    /// Undo the `count` most recent executions. A failing entry halts the
    /// batch: already-processed entries stay undone, the failing entry and
    /// the remainder return to the undo stack in their original order.
    pub fn undo(&mut self, count: usize) -> Result<UndoOutcome> {
        let entries = self.undo.pop_for_undo(count)?;
        let mut undone = Vec::new();
        let mut pending = entries.into_iter();
        while let Some(entry) = pending.next() {
            let result = match self.env.get_mut(&entry.modality) {
                Some(state) => state.apply_undo(&entry.undo_data),
                None => Err(Error::inconsistent(format!(
                    "unknown modality '{}'",
                    entry.modality
                ))),
            };
            match result {
                Ok(()) => {
                    // the event becomes pending again so redo can re-execute it
                    let _ = self.queue.revert_to_pending(&entry.event_id);
                    tracing::info!(event_id = %entry.event_id, modality = %entry.modality, "event undone");
                    undone.push(entry.summary());
                    self.undo.push_to_redo(entry);
                }
                Err(e) => {
                    let mut leftovers = vec![entry];
                    leftovers.extend(pending);
                    self.undo.restore_undo(leftovers);
                    return Err(Error::inconsistent(format!(
                        "undo halted after {} of {count} entries: {e}",
                        undone.len()
                    )));
                }
            }
        }
        Ok(UndoOutcome {
            undone: undone.len(),
            entries: undone,
        })
    }

    /// Redo the `count` most recently undone executions by re-running the
    /// per-event algorithm (fresh undo entries, original redo order). A
    /// failure halts the batch and leaves the unprocessed entries on the
    /// redo stack.
    pub fn redo(&mut self, count: usize) -> Result<RedoOutcome> {
        let entries = self.undo.pop_for_redo(count)?;
        let mut redone = Vec::new();
        let mut pending = entries.into_iter();
        while let Some(entry) = pending.next() {
            let ready = self
                .queue
                .get(&entry.event_id)
                .map_or(false, |e| e.status == EventStatus::Pending);
            if !ready {
                let mut leftovers = vec![entry];
                leftovers.extend(pending);
                self.undo.restore_redo(leftovers);
                return Err(Error::conflict(format!(
                    "redo halted after {} of {count} entries: event is not pending",
                    redone.len()
                )));
            }
            match self.execute_event(entry.event_id, true) {
                Ok(()) => {
                    tracing::info!(event_id = %entry.event_id, modality = %entry.modality, "event redone");
                    redone.push(entry.summary());
                }
                Err(e) => {
                    self.undo.restore_redo(pending.collect());
                    return Err(Error::inconsistent(format!(
                        "redo halted after {} of {count} entries: {e}",
                        redone.len()
                    )));
                }
            }
        }
        Ok(RedoOutcome {
            redone: redone.len(),
            entries: redone,
        })
    }

    pub fn undo_status(&self) -> UndoStatus {
        UndoStatus {
            can_undo: self.undo.can_undo(),
            can_redo: self.undo.can_redo(),
            undo_count: self.undo.undo_count(),
            redo_count: self.undo.redo_count(),
            undo_summary: self.undo.undo_summary(),
            redo_summary: self.undo.redo_summary(),
        }
    }

    // ── Introspection ─────────────────────────────────────────────────

    pub fn status(&self) -> EngineStatus {
        let summary = self.queue.summary();
        EngineStatus {
            is_running: self.is_running,
            current_time: self.current_time(),
            is_paused: self.is_paused(),
            time_scale: self.time_scale(),
            pending_events: summary.pending,
            executed_events: summary.executed,
            failed_events: summary.failed,
            next_event_time: summary.next_event_time,
        }
    }

    pub fn validate_environment(&self) -> Vec<String> {
        self.env.validate(&self.queue)
    }

    /// Full environment view: clock + per-modality snapshots + summaries.
    pub fn environment_state(&self) -> Value {
        json!({
            "current_time": self.current_time(),
            "modalities": self.env.snapshots(),
            "summary": self.env.summaries(),
        })
    }

    /// Modality-scoped mutable access used by queries at the API layer.
    pub fn query_modality(&self, name: &str, params: &Value) -> Result<Value> {
        let state = self
            .env
            .get(name)
            .ok_or_else(|| Error::not_found(format!("unknown modality '{name}'")))?;
        state.query(params)
    }

    pub fn modality_snapshot(&self, name: &str) -> Result<Value> {
        let state = self
            .env
            .get(name)
            .ok_or_else(|| Error::not_found(format!("unknown modality '{name}'")))?;
        Ok(state.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
    }

    fn engine() -> SimulationEngine {
        let mut engine = SimulationEngine::new(t0(), Some(100)).unwrap();
        engine.start(false, 1.0).unwrap();
        engine
    }

    fn chat_request(offset_secs: i64, content: &str, priority: u8) -> EventRequest {
        EventRequest {
            scheduled_time: t0() + Duration::seconds(offset_secs),
            modality: "chat".into(),
            data: json!({
                "operation": "send_message",
                "role": "user",
                "content": content,
            }),
            priority,
            metadata: HashMap::new(),
            agent_id: None,
        }
    }

    fn email_receive_request(offset_secs: i64, from: &str) -> EventRequest {
        EventRequest {
            scheduled_time: t0() + Duration::seconds(offset_secs),
            modality: "email".into(),
            data: json!({
                "operation": "receive",
                "from_address": from,
                "to_addresses": ["user@example.com"],
                "subject": "Reminder",
                "body_text": "Meeting at 10.",
            }),
            priority: 50,
            metadata: HashMap::new(),
            agent_id: None,
        }
    }

    #[test]
    fn advance_executes_due_email() {
        let mut engine = engine();
        engine
            .schedule(email_receive_request(60, "calendar@company.com"))
            .unwrap();
        let result = engine.advance(120.0).unwrap();
        assert_eq!(result.events_executed, 1);
        assert_eq!(result.current_time, t0() + Duration::seconds(120));

        let snap = engine.modality_snapshot("email").unwrap();
        assert_eq!(snap["total_email_count"], 1);
        let email = snap["emails"].as_object().unwrap().values().next().unwrap();
        assert_eq!(email["from_address"], "calendar@company.com");
        assert_eq!(email["is_read"], false);
        assert_eq!(email["folder"], "inbox");
        // executed exactly at its scheduled time
        assert_eq!(email["timestamp"], json!(t0() + Duration::seconds(60)));
    }

    #[test]
    fn advance_requires_running_positive_unpaused() {
        let mut engine = SimulationEngine::new(t0(), None).unwrap();
        assert!(matches!(engine.advance(10.0), Err(Error::Conflict(_))));
        engine.start(false, 1.0).unwrap();
        assert!(matches!(engine.advance(0.0), Err(Error::Validation(_))));
        assert!(matches!(engine.advance(-1.0), Err(Error::Validation(_))));
        engine.pause();
        assert!(matches!(engine.advance(10.0), Err(Error::Conflict(_))));
    }

    #[test]
    fn same_time_same_priority_executes_in_insertion_order() {
        let mut engine = engine();
        let e1 = engine.schedule(chat_request(60, "first", 50)).unwrap();
        let e2 = engine.schedule(chat_request(60, "second", 50)).unwrap();
        let e3 = engine.schedule(chat_request(60, "third", 50)).unwrap();
        engine.advance(120.0).unwrap();

        for id in [e1.event_id, e2.event_id, e3.event_id] {
            assert_eq!(engine.get_event(&id).unwrap().status, EventStatus::Executed);
        }
        let snap = engine.modality_snapshot("chat").unwrap();
        let contents: Vec<&str> = snap["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn higher_priority_wins_at_same_instant() {
        let mut engine = engine();
        engine.schedule(chat_request(60, "low", 10)).unwrap();
        engine.schedule(chat_request(60, "high", 90)).unwrap();
        engine.advance(120.0).unwrap();
        let snap = engine.modality_snapshot("chat").unwrap();
        assert_eq!(snap["messages"][0]["content"], "high");
        assert_eq!(snap["messages"][1]["content"], "low");
    }

    #[test]
    fn schedule_in_past_is_conflict() {
        let mut engine = engine();
        engine.advance(60.0).unwrap();
        let err = engine.schedule(chat_request(30, "late", 50)).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn schedule_unknown_modality_is_not_found() {
        let mut engine = engine();
        let mut req = chat_request(60, "x", 50);
        req.modality = "telepathy".into();
        assert!(matches!(engine.schedule(req), Err(Error::NotFound(_))));
    }

    #[test]
    fn invalid_payload_is_rejected_at_schedule_time() {
        let mut engine = engine();
        let mut req = email_receive_request(60, "a@b.com");
        req.data = json!({"operation": "receive", "from_address": "a@b.com", "to_addresses": [], "subject": "x", "body_text": "y"});
        assert!(matches!(engine.schedule(req), Err(Error::Validation(_))));
    }

    #[test]
    fn immediate_event_waits_for_advance() {
        let mut engine = engine();
        let event = engine
            .schedule_immediate(chat_request(0, "now", 50))
            .unwrap();
        assert_eq!(event.priority, IMMEDIATE_PRIORITY);
        assert_eq!(event.scheduled_time, t0());
        assert_eq!(
            engine.get_event(&event.event_id).unwrap().status,
            EventStatus::Pending
        );
        engine.advance(0.001).unwrap();
        assert_eq!(
            engine.get_event(&event.event_id).unwrap().status,
            EventStatus::Executed
        );
    }

    #[test]
    fn skip_to_next_executes_in_offset_order() {
        let mut engine = engine();
        engine.schedule(chat_request(30, "A", 50)).unwrap();
        engine.schedule(chat_request(10, "B", 50)).unwrap();
        engine.schedule(chat_request(20, "C", 50)).unwrap();

        let expected = [("B", 10), ("C", 20), ("A", 30)];
        for (i, (content, offset)) in expected.iter().enumerate() {
            let result = engine.skip_to_next().unwrap();
            assert_eq!(result.current_time, t0() + Duration::seconds(*offset));
            assert_eq!(result.events_executed, 1);
            let snap = engine.modality_snapshot("chat").unwrap();
            assert_eq!(snap["message_count"], i as u64 + 1);
            assert_eq!(snap["messages"][i]["content"].as_str(), Some(*content));
        }
        assert!(matches!(engine.skip_to_next(), Err(Error::NotFound(_))));
    }

    #[test]
    fn skip_to_next_runs_all_events_at_that_instant() {
        let mut engine = engine();
        engine.schedule(chat_request(30, "x", 10)).unwrap();
        engine.schedule(chat_request(30, "y", 90)).unwrap();
        engine.schedule(chat_request(60, "z", 50)).unwrap();
        let result = engine.skip_to_next().unwrap();
        assert_eq!(result.events_executed, 2);
        assert_eq!(result.next_event_time, Some(t0() + Duration::seconds(60)));
    }

    #[test]
    fn set_time_skips_without_executing() {
        let mut engine = engine();
        engine.schedule(chat_request(30, "skipme", 50)).unwrap();
        let result = engine.set_time(t0() + Duration::seconds(60)).unwrap();
        assert_eq!(result.skipped_events, 1);
        assert_eq!(result.executed_events, 0);
        assert_eq!(engine.modality_snapshot("chat").unwrap()["message_count"], 0);
        assert_eq!(engine.queue_summary().skipped, 1);
    }

    #[test]
    fn set_time_to_current_is_noop() {
        let mut engine = engine();
        engine.schedule(chat_request(30, "later", 50)).unwrap();
        let result = engine.set_time(t0()).unwrap();
        assert_eq!(result.skipped_events, 0);
        assert_eq!(result.executed_events, 0);
        assert_eq!(result.current_time, t0());
    }

    #[test]
    fn set_time_backwards_is_conflict() {
        let mut engine = engine();
        engine.advance(60.0).unwrap();
        let err = engine.set_time(t0()).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn failed_event_pushes_no_undo_and_sweep_continues() {
        let mut engine = engine();
        // first event deletes a nonexistent email: passes schedule-time
        // schema checks, fails at execution
        engine
            .schedule(EventRequest {
                scheduled_time: t0() + Duration::seconds(30),
                modality: "email".into(),
                data: json!({"operation": "delete", "message_ids": ["ghost"]}),
                priority: 50,
                metadata: HashMap::new(),
                agent_id: None,
            })
            .unwrap();
        engine.schedule(chat_request(40, "survivor", 50)).unwrap();

        let result = engine.advance(60.0).unwrap();
        assert_eq!(result.events_executed, 1);
        assert_eq!(result.events_failed, 1);

        let summary = engine.queue_summary();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.executed, 1);
        // only the successful execution is undoable
        assert_eq!(engine.undo_status().undo_count, 1);
    }

    #[test]
    fn undo_reverts_state_and_event_status() {
        let mut engine = engine();
        let event = engine.schedule(chat_request(30, "hello", 50)).unwrap();
        engine.advance(60.0).unwrap();
        assert_eq!(engine.modality_snapshot("chat").unwrap()["message_count"], 1);

        let outcome = engine.undo(1).unwrap();
        assert_eq!(outcome.undone, 1);
        assert_eq!(engine.modality_snapshot("chat").unwrap()["message_count"], 0);
        let reverted = engine.get_event(&event.event_id).unwrap();
        assert_eq!(reverted.status, EventStatus::Pending);
        assert!(reverted.executed_at.is_none());
        assert!(engine.undo_status().can_redo);
    }

    #[test]
    fn redo_re_executes_with_fresh_undo_entry() {
        let mut engine = engine();
        engine.schedule(chat_request(30, "hello", 50)).unwrap();
        engine.advance(60.0).unwrap();
        engine.undo(1).unwrap();

        let outcome = engine.redo(1).unwrap();
        assert_eq!(outcome.redone, 1);
        assert_eq!(engine.modality_snapshot("chat").unwrap()["message_count"], 1);
        let status = engine.undo_status();
        assert_eq!(status.undo_count, 1);
        assert_eq!(status.redo_count, 0);
    }

    #[test]
    fn undo_count_unwinds_in_reverse_execution_order() {
        let mut engine = engine();
        engine.schedule(chat_request(10, "one", 50)).unwrap();
        engine.schedule(chat_request(20, "two", 50)).unwrap();
        engine.schedule(chat_request(30, "three", 50)).unwrap();
        engine.advance(60.0).unwrap();

        let outcome = engine.undo(2).unwrap();
        assert_eq!(outcome.undone, 2);
        let snap = engine.modality_snapshot("chat").unwrap();
        assert_eq!(snap["message_count"], 1);
        assert_eq!(snap["messages"][0]["content"], "one");
    }

    #[test]
    fn fresh_execution_clears_redo() {
        let mut engine = engine();
        engine.schedule(chat_request(10, "one", 50)).unwrap();
        engine.advance(20.0).unwrap();
        engine.undo(1).unwrap();
        assert!(engine.undo_status().can_redo);

        engine.schedule(chat_request(40, "two", 50)).unwrap();
        engine.advance(40.0).unwrap();
        assert!(!engine.undo_status().can_redo);
    }

    #[test]
    fn undone_event_re_executes_on_advance() {
        let mut engine = engine();
        engine.schedule(chat_request(30, "echo", 50)).unwrap();
        engine.advance(60.0).unwrap();
        engine.undo(1).unwrap();
        // the event is pending at a past time; advancing executes it again
        let result = engine.advance(1.0).unwrap();
        assert_eq!(result.events_executed, 1);
        assert_eq!(engine.modality_snapshot("chat").unwrap()["message_count"], 1);
    }

    #[test]
    fn email_read_undo_restores_unread_and_count() {
        let mut engine = engine();
        engine
            .schedule(email_receive_request(10, "boss@company.com"))
            .unwrap();
        engine.advance(20.0).unwrap();
        let snap = engine.modality_snapshot("email").unwrap();
        let email_id = snap["emails"]
            .as_object()
            .unwrap()
            .keys()
            .next()
            .unwrap()
            .clone();
        let count_after_receive = engine.environment().get("email").unwrap().update_count();

        engine
            .schedule_immediate(EventRequest {
                scheduled_time: t0(),
                modality: "email".into(),
                data: json!({"operation": "read", "message_ids": [email_id.clone()]}),
                priority: 50,
                metadata: HashMap::new(),
                agent_id: None,
            })
            .unwrap();
        engine.advance(0.001).unwrap();
        assert_eq!(
            engine.modality_snapshot("email").unwrap()["emails"][&email_id]["is_read"],
            true
        );

        engine.undo(1).unwrap();
        let snap = engine.modality_snapshot("email").unwrap();
        assert_eq!(snap["emails"][&email_id]["is_read"], false);
        assert_eq!(
            engine.environment().get("email").unwrap().update_count(),
            count_after_receive
        );
    }

    #[test]
    fn reset_preserves_clock_and_state_but_revives_events() {
        let mut engine = engine();
        engine.pause();
        engine.resume();
        engine.schedule(chat_request(30, "hello", 50)).unwrap();
        engine.advance(60.0).unwrap();
        let time_before = engine.current_time();

        let summary = engine.reset();
        assert_eq!(summary.status, "reset");
        assert_eq!(summary.cleared_events, 1);
        assert_eq!(engine.current_time(), time_before);
        assert!(!engine.is_running());
        // modality state survives a reset
        assert_eq!(engine.modality_snapshot("chat").unwrap()["message_count"], 1);
        assert_eq!(engine.queue_summary().pending, 1);
    }

    #[test]
    fn clear_wipes_events_and_state_and_can_rewind() {
        let mut engine = engine();
        engine.schedule(chat_request(30, "hello", 50)).unwrap();
        engine.advance(60.0).unwrap();

        let rewind_to = t0() - Duration::hours(1);
        let summary = engine.clear(Some(rewind_to));
        assert_eq!(summary.status, "cleared");
        assert_eq!(summary.events_removed, 1);
        assert_eq!(summary.modalities_cleared, 7);
        assert!(summary.time_reset);
        assert_eq!(engine.current_time(), rewind_to);
        assert_eq!(engine.modality_snapshot("chat").unwrap()["message_count"], 0);
        assert!(engine.queue().is_empty());
    }

    #[test]
    fn stop_twice_reports_null_execution_fields() {
        let mut engine = engine();
        engine.schedule(chat_request(30, "hello", 50)).unwrap();
        engine.advance(60.0).unwrap();

        let first = engine.stop();
        assert_eq!(first.status, "stopped");
        assert_eq!(first.total_events, Some(1));
        assert_eq!(first.events_executed, Some(1));
        assert!(first.final_time.is_some());

        let second = engine.stop();
        assert_eq!(second.status, "stopped");
        assert!(second.final_time.is_none());
        assert!(second.total_events.is_none());
        assert!(second.events_executed.is_none());
        // same simulation id across stop/start
        assert_eq!(first.simulation_id, second.simulation_id);
        let restart = engine.start(false, 1.0).unwrap();
        assert_eq!(restart.simulation_id, first.simulation_id);
    }

    #[test]
    fn cancel_is_pending_only() {
        let mut engine = engine();
        let event = engine.schedule(chat_request(30, "hello", 50)).unwrap();
        engine.cancel_event(&event.event_id).unwrap();
        assert_eq!(
            engine.get_event(&event.event_id).unwrap().status,
            EventStatus::Cancelled
        );
        // cancelled events don't execute
        let result = engine.advance(60.0).unwrap();
        assert_eq!(result.events_executed, 0);
        // cancelling again conflicts
        assert!(engine.cancel_event(&event.event_id).is_err());
    }

    #[test]
    fn status_reflects_queue_and_clock() {
        let mut engine = engine();
        engine.schedule(chat_request(30, "hello", 50)).unwrap();
        engine.set_time_scale(2.5).unwrap();
        engine.pause();

        let status = engine.status();
        assert!(status.is_running);
        assert!(status.is_paused);
        assert_eq!(status.time_scale, 2.5);
        assert_eq!(status.pending_events, 1);
        assert_eq!(status.executed_events, 0);
        assert_eq!(status.next_event_time, Some(t0() + Duration::seconds(30)));
    }

    #[test]
    fn weather_rounded_keys_share_reports() {
        let mut engine = engine();
        let report = json!({
            "lat": 40.7128,
            "lon": -74.0060,
            "current": {"dt": 1737000000, "temp": 295.15, "wind_speed": 3.5},
        });
        engine
            .schedule_immediate(EventRequest {
                scheduled_time: t0(),
                modality: "weather".into(),
                data: json!({"latitude": 40.7128, "longitude": -74.0060, "report": report}),
                priority: 50,
                metadata: HashMap::new(),
                agent_id: None,
            })
            .unwrap();
        engine.advance(0.001).unwrap();

        // nearby coordinates hit the same rounded key
        let result = engine
            .query_modality(
                "weather",
                &json!({"lat": 40.714, "lon": -74.009, "units": "metric"}),
            )
            .unwrap();
        assert_eq!(result["count"], 1);
        let temp = result["reports"][0]["current"]["temp"].as_f64().unwrap();
        assert!((temp - 22.0).abs() < 0.1);
    }

    #[test]
    fn calendar_recurring_delete_scenario() {
        let mut engine = engine();
        engine
            .schedule_immediate(EventRequest {
                scheduled_time: t0(),
                modality: "calendar".into(),
                data: json!({
                    "operation": "create",
                    "event_id": "standup",
                    "title": "Standup",
                    "start": "2025-01-20T10:00:00Z",
                    "end": "2025-01-20T10:30:00Z",
                    "recurrence": {"frequency": "weekly", "days_of_week": ["monday"]},
                }),
                priority: 50,
                metadata: HashMap::new(),
                agent_id: None,
            })
            .unwrap();
        engine.advance(0.001).unwrap();

        engine
            .schedule_immediate(EventRequest {
                scheduled_time: t0(),
                modality: "calendar".into(),
                data: json!({
                    "operation": "delete",
                    "event_id": "standup",
                    "recurrence_scope": "this",
                    "recurrence_id": "2025-01-22",
                }),
                priority: 50,
                metadata: HashMap::new(),
                agent_id: None,
            })
            .unwrap();
        engine.advance(0.001).unwrap();

        let snap = engine.modality_snapshot("calendar").unwrap();
        assert!(snap["events"]["standup"].is_object());
        assert_eq!(
            snap["events"]["standup"]["recurrence_exceptions"],
            json!(["2025-01-22"])
        );

        engine.undo(1).unwrap();
        let snap = engine.modality_snapshot("calendar").unwrap();
        assert_eq!(snap["events"]["standup"]["recurrence_exceptions"], json!([]));
    }

    #[test]
    fn validate_environment_is_clean_after_activity() {
        let mut engine = engine();
        engine.schedule(chat_request(30, "hello", 50)).unwrap();
        engine.advance(60.0).unwrap();
        assert!(engine.validate_environment().is_empty());
    }
}
