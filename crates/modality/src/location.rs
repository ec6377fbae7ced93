//! Location modality — a current fix plus an append-only movement history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use es_domain::{Error, Result};

use crate::{
    parse_input, parse_query, undo_action, undo_field, undo_object, unknown_undo_action,
    ModalityState, StateMeta,
};

pub const MODALITY: &str = "location";

const ACTION_RESTORE_LOCATION: &str = "restore_location";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub named_location: Option<String>,
    /// Meters above sea level.
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Accuracy radius in meters.
    #[serde(default)]
    pub accuracy: Option<f64>,
    /// Meters per second.
    #[serde(default)]
    pub speed: Option<f64>,
    /// Degrees clockwise from north, 0–360.
    #[serde(default)]
    pub bearing: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

fn validate_fix(fix: &LocationFix) -> Result<()> {
    if !(-90.0..=90.0).contains(&fix.latitude) {
        return Err(Error::validation(format!(
            "latitude {} out of range [-90, 90]",
            fix.latitude
        )));
    }
    if !(-180.0..=180.0).contains(&fix.longitude) {
        return Err(Error::validation(format!(
            "longitude {} out of range [-180, 180]",
            fix.longitude
        )));
    }
    if let Some(bearing) = fix.bearing {
        if !(0.0..=360.0).contains(&bearing) {
            return Err(Error::validation(format!(
                "bearing {bearing} out of range [0, 360]"
            )));
        }
    }
    if let Some(accuracy) = fix.accuracy {
        if accuracy < 0.0 {
            return Err(Error::validation("accuracy must not be negative"));
        }
    }
    if let Some(speed) = fix.speed {
        if speed < 0.0 {
            return Err(Error::validation("speed must not be negative"));
        }
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocationQuery {
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

#[derive(Debug, Default)]
pub struct LocationState {
    meta: StateMeta,
    current: Option<LocationFix>,
    history: Vec<LocationFix>,
}

impl LocationState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModalityState for LocationState {
    fn modality_type(&self) -> &'static str {
        MODALITY
    }

    fn update_count(&self) -> u64 {
        self.meta.update_count
    }

    fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.meta.last_updated
    }

    fn prepare_input(&self, input: &Value) -> Result<Value> {
        let fix: LocationFix = parse_input(input)?;
        validate_fix(&fix)?;
        Ok(serde_json::to_value(fix)?)
    }

    fn apply(&mut self, input: &Value, at: DateTime<Utc>) -> Result<()> {
        let mut fix: LocationFix = parse_input(input)?;
        validate_fix(&fix)?;
        if fix.timestamp.is_none() {
            fix.timestamp = Some(at);
        }
        self.history.push(fix.clone());
        self.current = Some(fix);
        self.meta.bump(at);
        Ok(())
    }

    fn create_undo_data(&self, _input: &Value) -> Result<Value> {
        let mut undo = self.meta.undo_base(ACTION_RESTORE_LOCATION);
        undo.insert(
            "previous".into(),
            match &self.current {
                Some(fix) => serde_json::to_value(fix)?,
                None => Value::Null,
            },
        );
        Ok(Value::Object(undo))
    }

    fn apply_undo(&mut self, undo_data: &Value) -> Result<()> {
        let undo = undo_object(undo_data)?;
        match undo_action(undo)? {
            ACTION_RESTORE_LOCATION => {
                if self.history.pop().is_none() {
                    return Err(Error::inconsistent("location history is empty"));
                }
                let previous: Option<LocationFix> = match undo.get("previous") {
                    Some(Value::Null) | None => None,
                    Some(_) => Some(undo_field(undo, "previous")?),
                };
                self.current = previous;
            }
            crate::ACTION_NOOP => {}
            action => return Err(unknown_undo_action(MODALITY, action)),
        }
        self.meta.restore(undo)
    }

    fn query(&self, params: &Value) -> Result<Value> {
        let q: LocationQuery = parse_query(params)?;
        let matches: Vec<&LocationFix> = self
            .history
            .iter()
            .filter(|f| {
                q.since
                    .map_or(true, |s| f.timestamp.map_or(false, |t| t >= s))
            })
            .filter(|f| {
                q.until
                    .map_or(true, |u| f.timestamp.map_or(false, |t| t <= u))
            })
            .collect();
        let total_count = matches.len();
        let limit = q.limit.unwrap_or(50);
        let page: Vec<Value> = matches
            .into_iter()
            .skip(q.offset)
            .take(limit)
            .map(|f| serde_json::to_value(f).expect("fix serializes"))
            .collect();
        Ok(json!({
            "history": page,
            "count": page.len(),
            "total_count": total_count,
            "current": self.current,
        }))
    }

    fn snapshot(&self) -> Value {
        json!({
            "modality_type": MODALITY,
            "update_count": self.meta.update_count,
            "last_updated": self.meta.last_updated,
            "current_latitude": self.current.as_ref().map(|f| f.latitude),
            "current_longitude": self.current.as_ref().map(|f| f.longitude),
            "current_address": self.current.as_ref().and_then(|f| f.address.clone()),
            "named_location": self.current.as_ref().and_then(|f| f.named_location.clone()),
            "altitude": self.current.as_ref().and_then(|f| f.altitude),
            "accuracy": self.current.as_ref().and_then(|f| f.accuracy),
            "speed": self.current.as_ref().and_then(|f| f.speed),
            "bearing": self.current.as_ref().and_then(|f| f.bearing),
            "history": self.history,
            "history_count": self.history.len(),
        })
    }

    fn state_summary(&self) -> Value {
        json!({
            "has_fix": self.current.is_some(),
            "named_location": self.current.as_ref().and_then(|f| f.named_location.clone()),
            "history_count": self.history.len(),
        })
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match (&self.current, self.history.last()) {
            (Some(current), Some(last)) if current != last => {
                errors.push("current fix does not match the end of history".to_string());
            }
            (Some(_), None) => {
                errors.push("current fix is set but history is empty".to_string());
            }
            (None, Some(_)) => {
                errors.push("history is non-empty but current fix is unset".to_string());
            }
            _ => {}
        }
        for (i, fix) in self.history.iter().enumerate() {
            if validate_fix(fix).is_err() {
                errors.push(format!("history entry {i} has out-of-range coordinates"));
            }
        }
        errors
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
    }

    fn office() -> Value {
        json!({
            "latitude": 40.7128,
            "longitude": -74.0060,
            "address": "New York, NY",
            "named_location": "Office",
        })
    }

    #[test]
    fn update_sets_current_and_appends_history() {
        let mut state = LocationState::new();
        let payload = state.prepare_input(&office()).unwrap();
        state.apply(&payload, at()).unwrap();
        let snap = state.snapshot();
        assert_eq!(snap["current_latitude"], 40.7128);
        assert_eq!(snap["current_longitude"], -74.0060);
        assert_eq!(snap["current_address"], "New York, NY");
        assert_eq!(snap["named_location"], "Office");
        assert_eq!(snap["history_count"], 1);
    }

    #[test]
    fn out_of_range_coordinates_rejected() {
        let state = LocationState::new();
        let err = state
            .prepare_input(&json!({"latitude": 91.0, "longitude": 0.0}))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = state
            .prepare_input(&json!({"latitude": 0.0, "longitude": 0.0, "bearing": 400.0}))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn undo_restores_previous_fix() {
        let mut state = LocationState::new();
        let first = state.prepare_input(&office()).unwrap();
        state.apply(&first, at()).unwrap();
        let before = state.snapshot();

        let second = state
            .prepare_input(&json!({
                "latitude": 37.7749,
                "longitude": -122.4194,
                "named_location": "Home",
            }))
            .unwrap();
        let undo = state.create_undo_data(&second).unwrap();
        state.apply(&second, at() + chrono::Duration::minutes(5)).unwrap();
        assert_eq!(state.snapshot()["named_location"], "Home");
        assert_eq!(state.snapshot()["history_count"], 2);

        state.apply_undo(&undo).unwrap();
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn undo_of_first_fix_empties_state() {
        let mut state = LocationState::new();
        let before = state.snapshot();
        let payload = state.prepare_input(&office()).unwrap();
        let undo = state.create_undo_data(&payload).unwrap();
        state.apply(&payload, at()).unwrap();
        state.apply_undo(&undo).unwrap();
        assert_eq!(state.snapshot(), before);
        assert_eq!(state.snapshot()["history_count"], 0);
    }

    #[test]
    fn undo_with_empty_history_is_inconsistent() {
        let mut state = LocationState::new();
        let err = state
            .apply_undo(&json!({
                "action": "restore_location",
                "previous": null,
                "state_previous_update_count": 0,
                "state_previous_last_updated": null,
            }))
            .unwrap_err();
        assert!(matches!(err, Error::Inconsistent(_)));
    }

    #[test]
    fn query_filters_history_window() {
        let mut state = LocationState::new();
        for i in 0..4 {
            let payload = state
                .prepare_input(&json!({"latitude": 10.0 + i as f64, "longitude": 20.0}))
                .unwrap();
            state
                .apply(&payload, at() + chrono::Duration::minutes(i))
                .unwrap();
        }
        let result = state
            .query(&json!({
                "since": (at() + chrono::Duration::minutes(1)).to_rfc3339(),
                "until": (at() + chrono::Duration::minutes(2)).to_rfc3339(),
            }))
            .unwrap();
        assert_eq!(result["total_count"], 2);
    }
}
