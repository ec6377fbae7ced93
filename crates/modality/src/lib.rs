//! Modality state machines.
//!
//! Every modality implements the same behavioral contract so the engine can
//! treat heterogeneous domain state uniformly: payloads go in as JSON, state
//! mutates atomically, and every successful mutation is reversible through a
//! targeted memento captured just before the mutation.

pub mod calendar;
pub mod chat;
pub mod email;
pub mod location;
pub mod sms;
pub mod time_prefs;
pub mod weather;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use es_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Undo-data conventions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Required keys of every undo-data map.
pub const UNDO_ACTION: &str = "action";
pub const UNDO_PREV_COUNT: &str = "state_previous_update_count";
pub const UNDO_PREV_UPDATED: &str = "state_previous_last_updated";

/// Undo action accepted by every modality: restore metadata, touch nothing
/// else. Produced when an input turns out to mutate nothing.
pub const ACTION_NOOP: &str = "noop";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Uniform contract every modality state implements.
///
/// Failure semantics: `apply` either fully succeeds or leaves state
/// untouched; validation problems surface as [`Error::Validation`], undo
/// corruption as [`Error::Inconsistent`]. `create_undo_data` never mutates
/// and is called immediately before `apply` on the same payload.
pub trait ModalityState: Send {
    /// Stable tag, also the registry name ("email", "sms", ...).
    fn modality_type(&self) -> &'static str;

    fn update_count(&self) -> u64;

    fn last_updated(&self) -> Option<DateTime<Utc>>;

    /// Schema-validate a raw payload at scheduling time and return the
    /// normalized form stored on the event (generated message ids are
    /// filled in here so undo data can reference them). Existence checks
    /// against current state belong in `apply`, not here.
    fn prepare_input(&self, input: &Value) -> Result<Value>;

    /// Mutate state according to `input`. `at` is the simulated instant of
    /// execution; it becomes `last_updated` and the default timestamp of
    /// records created by the input.
    fn apply(&mut self, input: &Value, at: DateTime<Utc>) -> Result<()>;

    /// Capture a memento sufficient to reverse a subsequent `apply` of the
    /// same input. Read-only.
    fn create_undo_data(&self, input: &Value) -> Result<Value>;

    /// Reverse a prior `apply` using its memento, restoring `update_count`
    /// and `last_updated` to their captured values.
    fn apply_undo(&mut self, undo_data: &Value) -> Result<()>;

    /// Modality-defined read-only query (filters, pagination, sort).
    fn query(&self, params: &Value) -> Result<Value>;

    /// Full JSON-serializable state dump.
    fn snapshot(&self) -> Value;

    /// Compact counters for environment overviews.
    fn state_summary(&self) -> Value;

    /// Internal consistency check; returns human-readable problems.
    fn validate(&self) -> Vec<String>;

    /// Drop all domain state and metadata, back to the initial empty form.
    fn reset(&mut self);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared metadata (update_count / last_updated)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The two counters every modality tracks, with capture/restore plumbing
/// for the undo contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMeta {
    pub update_count: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl StateMeta {
    pub fn bump(&mut self, at: DateTime<Utc>) {
        self.update_count += 1;
        self.last_updated = Some(at);
    }

    /// Start an undo-data map: the action tag plus the captured metadata.
    pub fn undo_base(&self, action: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(UNDO_ACTION.into(), Value::String(action.to_string()));
        map.insert(UNDO_PREV_COUNT.into(), Value::from(self.update_count));
        map.insert(
            UNDO_PREV_UPDATED.into(),
            match self.last_updated {
                Some(t) => Value::String(t.to_rfc3339()),
                None => Value::Null,
            },
        );
        map
    }

    /// Restore the captured metadata out of an undo-data map.
    pub fn restore(&mut self, undo: &Map<String, Value>) -> Result<()> {
        let count = undo
            .get(UNDO_PREV_COUNT)
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                Error::inconsistent(format!("undo data missing '{UNDO_PREV_COUNT}'"))
            })?;
        let updated = match undo.get(UNDO_PREV_UPDATED) {
            Some(Value::Null) | None => None,
            Some(Value::String(raw)) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| {
                        Error::inconsistent(format!("bad '{UNDO_PREV_UPDATED}' timestamp: {e}"))
                    })?
                    .with_timezone(&Utc),
            ),
            Some(other) => {
                return Err(Error::inconsistent(format!(
                    "bad '{UNDO_PREV_UPDATED}' value: {other}"
                )))
            }
        };
        self.update_count = count;
        self.last_updated = updated;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsing helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deserialize an event payload into a typed input, mapping failures onto
/// validation errors.
pub fn parse_input<T: DeserializeOwned>(input: &Value) -> Result<T> {
    serde_json::from_value(input.clone()).map_err(|e| Error::validation(format!("invalid payload: {e}")))
}

/// Deserialize query params; `null` means "no filters".
pub fn parse_query<T: DeserializeOwned + Default>(params: &Value) -> Result<T> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone())
        .map_err(|e| Error::validation(format!("invalid query: {e}")))
}

/// View an undo-data value as a map, requiring the `action` key.
pub fn undo_object(undo_data: &Value) -> Result<&Map<String, Value>> {
    let map = undo_data
        .as_object()
        .ok_or_else(|| Error::inconsistent("undo data is not an object"))?;
    if !map.contains_key(UNDO_ACTION) {
        return Err(Error::inconsistent(format!("undo data missing '{UNDO_ACTION}'")));
    }
    Ok(map)
}

pub fn undo_action(map: &Map<String, Value>) -> Result<&str> {
    map.get(UNDO_ACTION)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::inconsistent(format!("undo data '{UNDO_ACTION}' is not a string")))
}

pub fn undo_str<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::inconsistent(format!("undo data missing '{key}'")))
}

pub fn undo_field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str) -> Result<T> {
    let value = map
        .get(key)
        .ok_or_else(|| Error::inconsistent(format!("undo data missing '{key}'")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| Error::inconsistent(format!("undo data '{key}' malformed: {e}")))
}

/// Reject undo actions a modality does not recognize.
pub fn unknown_undo_action(modality: &str, action: &str) -> Error {
    Error::inconsistent(format!("unknown undo action '{action}' for modality '{modality}'"))
}

/// Build the default registry: one instance of each of the seven
/// modalities, keyed by `modality_type`.
pub fn default_modalities() -> Vec<Box<dyn ModalityState>> {
    vec![
        Box::new(email::EmailState::new()),
        Box::new(sms::SmsState::new()),
        Box::new(chat::ChatState::new()),
        Box::new(calendar::CalendarState::new()),
        Box::new(location::LocationState::new()),
        Box::new(weather::WeatherState::new()),
        Box::new(time_prefs::TimeState::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn undo_base_carries_required_keys() {
        let mut meta = StateMeta::default();
        meta.bump(Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap());
        let base = meta.undo_base("remove_email");
        assert_eq!(base[UNDO_ACTION], "remove_email");
        assert_eq!(base[UNDO_PREV_COUNT], 1);
        assert!(base[UNDO_PREV_UPDATED].is_string());
    }

    #[test]
    fn meta_restore_round_trips() {
        let at = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
        let mut meta = StateMeta::default();
        meta.bump(at);
        let captured = meta.undo_base(ACTION_NOOP);
        meta.bump(at + chrono::Duration::seconds(5));
        assert_eq!(meta.update_count, 2);
        meta.restore(&captured).unwrap();
        assert_eq!(meta.update_count, 1);
        assert_eq!(meta.last_updated, Some(at));
    }

    #[test]
    fn restore_rejects_missing_keys() {
        let mut meta = StateMeta::default();
        let mut map = Map::new();
        map.insert(UNDO_ACTION.into(), Value::String(ACTION_NOOP.into()));
        assert!(matches!(meta.restore(&map), Err(Error::Inconsistent(_))));
    }

    #[test]
    fn undo_object_requires_action() {
        let data = serde_json::json!({"state_previous_update_count": 0});
        assert!(undo_object(&data).is_err());
        let data = serde_json::json!({"action": "noop"});
        assert!(undo_object(&data).is_ok());
    }

    #[test]
    fn default_registry_has_seven_modalities() {
        let states = default_modalities();
        let names: Vec<&str> = states.iter().map(|s| s.modality_type()).collect();
        assert_eq!(
            names,
            vec!["email", "sms", "chat", "calendar", "location", "weather", "time"]
        );
    }
}
