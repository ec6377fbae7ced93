//! Event model — the unit of scheduled work.
//!
//! An event targets exactly one modality and carries an opaque payload that
//! the modality itself validates at execution time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle of an event. `pending` fans out to the four terminal states;
/// a reset moves terminal events back to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Executed,
    Failed,
    Skipped,
    Cancelled,
}

impl EventStatus {
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event request (API-facing)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const DEFAULT_PRIORITY: u8 = 50;
pub const IMMEDIATE_PRIORITY: u8 = 100;

/// Incoming request to schedule an event.
#[derive(Debug, Clone, Deserialize)]
pub struct EventRequest {
    pub scheduled_time: DateTime<Utc>,
    pub modality: String,
    pub data: serde_json::Value,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub event_id: Uuid,
    pub scheduled_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub modality: String,
    pub payload: serde_json::Value,
    /// 0–100; higher executes first at equal scheduled times.
    pub priority: u8,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl SimEvent {
    pub fn from_request(req: EventRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            scheduled_time: req.scheduled_time,
            created_at,
            modality: req.modality,
            payload: req.data,
            priority: req.priority.min(100),
            status: EventStatus::Pending,
            executed_at: None,
            error_message: None,
            metadata: req.metadata,
            agent_id: req.agent_id,
        }
    }

    pub fn mark_executed(&mut self, at: DateTime<Utc>) {
        self.status = EventStatus::Executed;
        self.executed_at = Some(at);
        self.error_message = None;
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = EventStatus::Failed;
        self.error_message = Some(message.into());
    }

    pub fn mark_skipped(&mut self) {
        self.status = EventStatus::Skipped;
    }

    pub fn mark_cancelled(&mut self) {
        self.status = EventStatus::Cancelled;
    }

    /// Revert to `pending`, clearing execution traces. Used by engine reset
    /// and by undo.
    pub fn reset_to_pending(&mut self) {
        self.status = EventStatus::Pending;
        self.executed_at = None;
        self.error_message = None;
    }
}
