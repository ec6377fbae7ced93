//! Time-preferences modality — how the user wants time displayed, not the
//! simulated clock itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use es_domain::{Error, Result};

use crate::{
    parse_input, parse_query, undo_action, undo_field, undo_object, unknown_undo_action,
    ModalityState, StateMeta,
};

pub const MODALITY: &str = "time";

const ACTION_RESTORE_PREVIOUS: &str = "restore_previous";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePreferences {
    /// IANA timezone identifier.
    pub timezone: String,
    /// "12h" or "24h".
    pub format_preference: String,
    #[serde(default)]
    pub date_format: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    /// "sunday" or "monday".
    #[serde(default)]
    pub week_start: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Default for TimePreferences {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            format_preference: "24h".to_string(),
            date_format: None,
            locale: None,
            week_start: None,
            timestamp: None,
        }
    }
}

fn validate_preferences(prefs: &TimePreferences) -> Result<()> {
    if prefs.timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(Error::validation(format!(
            "unknown timezone '{}'",
            prefs.timezone
        )));
    }
    if !matches!(prefs.format_preference.as_str(), "12h" | "24h") {
        return Err(Error::validation(format!(
            "format_preference must be '12h' or '24h', got '{}'",
            prefs.format_preference
        )));
    }
    if let Some(week_start) = &prefs.week_start {
        if !matches!(week_start.as_str(), "sunday" | "monday") {
            return Err(Error::validation(format!(
                "week_start must be 'sunday' or 'monday', got '{week_start}'"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimeQuery {
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

#[derive(Debug, Default)]
pub struct TimeState {
    meta: StateMeta,
    current: TimePreferences,
    /// Superseded preference records, oldest first.
    history: Vec<TimePreferences>,
}

impl TimeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &TimePreferences {
        &self.current
    }
}

impl ModalityState for TimeState {
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
        let prefs: TimePreferences = parse_input(input)?;
        validate_preferences(&prefs)?;
        Ok(serde_json::to_value(prefs)?)
    }

    fn apply(&mut self, input: &Value, at: DateTime<Utc>) -> Result<()> {
        let mut prefs: TimePreferences = parse_input(input)?;
        validate_preferences(&prefs)?;
        if prefs.timestamp.is_none() {
            prefs.timestamp = Some(at);
        }
        self.history.push(std::mem::replace(&mut self.current, prefs));
        self.meta.bump(at);
        Ok(())
    }

    fn create_undo_data(&self, _input: &Value) -> Result<Value> {
        let mut undo = self.meta.undo_base(ACTION_RESTORE_PREVIOUS);
        undo.insert("previous".into(), serde_json::to_value(&self.current)?);
        Ok(Value::Object(undo))
    }

    fn apply_undo(&mut self, undo_data: &Value) -> Result<()> {
        let undo = undo_object(undo_data)?;
        match undo_action(undo)? {
            ACTION_RESTORE_PREVIOUS => {
                if self.history.pop().is_none() {
                    return Err(Error::inconsistent("preference history is empty"));
                }
                let previous: TimePreferences = undo_field(undo, "previous")?;
                self.current = previous;
            }
            crate::ACTION_NOOP => {}
            action => return Err(unknown_undo_action(MODALITY, action)),
        }
        self.meta.restore(undo)
    }

    fn query(&self, params: &Value) -> Result<Value> {
        let q: TimeQuery = parse_query(params)?;
        let total_count = self.history.len();
        let limit = q.limit.unwrap_or(50);
        let page: Vec<Value> = self
            .history
            .iter()
            .skip(q.offset)
            .take(limit)
            .map(|p| serde_json::to_value(p).expect("preferences serialize"))
            .collect();
        Ok(json!({
            "current": self.current,
            "history": page,
            "count": page.len(),
            "total_count": total_count,
        }))
    }

    fn snapshot(&self) -> Value {
        json!({
            "modality_type": MODALITY,
            "update_count": self.meta.update_count,
            "last_updated": self.meta.last_updated,
            "current": self.current,
            "history": self.history,
            "history_count": self.history.len(),
        })
    }

    fn state_summary(&self) -> Value {
        json!({
            "timezone": self.current.timezone,
            "format_preference": self.current.format_preference,
            "history_count": self.history.len(),
        })
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if validate_preferences(&self.current).is_err() {
            errors.push(format!(
                "current preferences are invalid (timezone '{}')",
                self.current.timezone
            ));
        }
        for (i, prefs) in self.history.iter().enumerate() {
            if validate_preferences(prefs).is_err() {
                errors.push(format!("history entry {i} has invalid preferences"));
            }
        }
        errors
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
