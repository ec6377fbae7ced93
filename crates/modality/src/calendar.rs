//! Calendar modality — events grouped by calendar, recurrence rules with
//! per-occurrence exceptions, and scoped modifications.
//!
//! An occurrence of a recurring event is addressed by its `recurrence_id`,
//! the `YYYY-MM-DD` date the occurrence starts on. Scoped edits derive any
//! detached/successor event id deterministically from
//! `"{event_id}_{recurrence_id}"` so a memento captured before the edit can
//! name it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use es_domain::{Error, Result};

use crate::{
    parse_input, parse_query, undo_action, undo_field, undo_object, undo_str, unknown_undo_action,
    ModalityState, StateMeta,
};

pub const MODALITY: &str = "calendar";
pub const PRIMARY_CALENDAR: &str = "primary";

const ACTION_REMOVE_EVENT: &str = "remove_event";
const ACTION_RESTORE_EVENT: &str = "restore_event";
const ACTION_REPLACE_EVENT: &str = "replace_event";
const ACTION_REMOVE_EXCEPTION: &str = "remove_exception";
const ACTION_RESTORE_SPLIT: &str = "restore_split";

/// Hard cap on materialized occurrences per event, guarding unbounded rules.
const MAX_OCCURRENCES: usize = 1000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Weekday names; only meaningful for weekly rules.
    #[serde(default)]
    pub days_of_week: Vec<String>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub count: Option<u32>,
}

fn default_interval() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub response_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub event_id: String,
    pub calendar_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    /// Occurrence dates (`YYYY-MM-DD`) deleted from the series.
    #[serde(default)]
    pub recurrence_exceptions: BTreeSet<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceScope {
    This,
    ThisAndFuture,
    #[default]
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventDraft {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default = "default_calendar")]
    calendar_id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    #[serde(default)]
    all_day: bool,
    #[serde(default)]
    attendees: Vec<Attendee>,
    #[serde(default)]
    recurrence: Option<RecurrenceRule>,
}

fn default_calendar() -> String {
    PRIMARY_CALENDAR.to_string()
}

/// Fields an update may change; `None` leaves the field alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct EventPatch {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    start: Option<DateTime<Utc>>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    all_day: Option<bool>,
    #[serde(default)]
    attendees: Option<Vec<Attendee>>,
    #[serde(default)]
    recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    calendar_id: Option<String>,
}

impl EventPatch {
    fn apply_to(&self, event: &mut CalendarEvent) {
        if let Some(title) = &self.title {
            event.title = title.clone();
        }
        if let Some(description) = &self.description {
            event.description = Some(description.clone());
        }
        if let Some(location) = &self.location {
            event.location = Some(location.clone());
        }
        if let Some(start) = self.start {
            event.start = start;
        }
        if let Some(end) = self.end {
            event.end = end;
        }
        if let Some(all_day) = self.all_day {
            event.all_day = all_day;
        }
        if let Some(attendees) = &self.attendees {
            event.attendees = attendees.clone();
        }
        if let Some(recurrence) = &self.recurrence {
            event.recurrence = Some(recurrence.clone());
        }
        if let Some(calendar_id) = &self.calendar_id {
            event.calendar_id = calendar_id.clone();
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
enum CalendarInput {
    Create(EventDraft),
    Update {
        event_id: String,
        #[serde(default)]
        recurrence_scope: RecurrenceScope,
        #[serde(default)]
        recurrence_id: Option<String>,
        #[serde(flatten)]
        patch: EventPatch,
    },
    Delete {
        event_id: String,
        #[serde(default)]
        recurrence_scope: RecurrenceScope,
        #[serde(default)]
        recurrence_id: Option<String>,
    },
}

fn validate_rule(rule: &RecurrenceRule) -> Result<()> {
    if rule.interval == 0 {
        return Err(Error::validation("recurrence interval must be at least 1"));
    }
    for day in &rule.days_of_week {
        parse_weekday(day)?;
    }
    if let Some(count) = rule.count {
        if count == 0 {
            return Err(Error::validation("recurrence count must be at least 1"));
        }
    }
    Ok(())
}

fn validate_draft(draft: &EventDraft) -> Result<()> {
    if draft.title.trim().is_empty() {
        return Err(Error::validation("title must not be empty"));
    }
    if draft.end < draft.start {
        return Err(Error::validation("end must not be before start"));
    }
    if let Some(rule) = &draft.recurrence {
        validate_rule(rule)?;
    }
    Ok(())
}

fn parse_weekday(name: &str) -> Result<Weekday> {
    match name.to_lowercase().as_str() {
        "monday" => Ok(Weekday::Mon),
        "tuesday" => Ok(Weekday::Tue),
        "wednesday" => Ok(Weekday::Wed),
        "thursday" => Ok(Weekday::Thu),
        "friday" => Ok(Weekday::Fri),
        "saturday" => Ok(Weekday::Sat),
        "sunday" => Ok(Weekday::Sun),
        other => Err(Error::validation(format!("unknown weekday '{other}'"))),
    }
}

fn parse_occurrence_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| Error::validation(format!("recurrence_id '{raw}' must be YYYY-MM-DD")))
}

fn occurrence_id(event_id: &str, recurrence_id: &str) -> String {
    format!("{event_id}_{recurrence_id}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Occurrence expansion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Materialize occurrence (start, end) pairs for an event, exceptions
/// already filtered out.
pub fn occurrences_between(
    event: &CalendarEvent,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let duration = event.end - event.start;
    let Some(rule) = &event.recurrence else {
        if event.start < window_end && event.end >= window_start {
            return vec![(event.start, event.end)];
        }
        return Vec::new();
    };

    let weekdays: Vec<Weekday> = rule
        .days_of_week
        .iter()
        .filter_map(|d| parse_weekday(d).ok())
        .collect();

    let mut out = Vec::new();
    let mut generated = 0u32;
    for index in 0..MAX_OCCURRENCES {
        let candidates = candidate_starts(event.start, rule, &weekdays, index);
        if candidates.is_empty() {
            break;
        }
        let mut past_window = false;
        for occ_start in candidates {
            if let Some(until) = rule.until {
                if occ_start > until {
                    return out;
                }
            }
            if let Some(count) = rule.count {
                if generated >= count {
                    return out;
                }
            }
            generated += 1;
            if occ_start >= window_end {
                past_window = true;
                continue;
            }
            let occ_end = occ_start + duration;
            if occ_end < window_start {
                continue;
            }
            let date = occ_start.date_naive().format("%Y-%m-%d").to_string();
            if event.recurrence_exceptions.contains(&date) {
                continue;
            }
            out.push((occ_start, occ_end));
        }
        if past_window && rule.count.is_none() {
            break;
        }
    }
    out
}

/// Starts produced by the `index`-th step of a rule. Weekly rules with
/// explicit weekdays yield one start per matching day of that week.
fn candidate_starts(
    series_start: DateTime<Utc>,
    rule: &RecurrenceRule,
    weekdays: &[Weekday],
    index: usize,
) -> Vec<DateTime<Utc>> {
    let step = index as i64 * rule.interval as i64;
    match rule.frequency {
        Frequency::Daily => vec![series_start + Duration::days(step)],
        Frequency::Weekly => {
            let week_start = series_start + Duration::weeks(step);
            if weekdays.is_empty() {
                return vec![week_start];
            }
            // Walk the 7 days of this rule week, keeping matching weekdays
            // (never earlier than the series start).
            let base = week_start - Duration::days(week_start.weekday().num_days_from_monday() as i64);
            let mut starts: Vec<DateTime<Utc>> = (0..7)
                .map(|offset| base + Duration::days(offset))
                .filter(|day| weekdays.contains(&day.weekday()) && *day >= series_start)
                .collect();
            starts.sort();
            starts
        }
        Frequency::Monthly => match series_start.checked_add_months(Months::new(step as u32)) {
            Some(start) => vec![start],
            None => Vec::new(),
        },
        Frequency::Yearly => match series_start.checked_add_months(Months::new(step as u32 * 12)) {
            Some(start) => vec![start],
            None => Vec::new(),
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CalendarQuery {
    calendar_id: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    expand_recurring: bool,
    /// Case-insensitive substring match over title and description.
    search: Option<String>,
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct CalendarState {
    meta: StateMeta,
    events: BTreeMap<String, CalendarEvent>,
}

impl CalendarState {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_event(&self, id: &str) -> Result<&CalendarEvent> {
        self.events
            .get(id)
            .ok_or_else(|| Error::validation(format!("calendar event '{id}' does not exist")))
    }

    fn calendar_index(&self) -> BTreeMap<String, Vec<String>> {
        let mut calendars: BTreeMap<String, Vec<String>> =
            BTreeMap::from([(PRIMARY_CALENDAR.to_string(), Vec::new())]);
        for event in self.events.values() {
            calendars
                .entry(event.calendar_id.clone())
                .or_default()
                .push(event.event_id.clone());
        }
        calendars
    }

    fn create_event(&mut self, draft: EventDraft) -> Result<()> {
        validate_draft(&draft)?;
        let event_id = draft
            .event_id
            .clone()
            .ok_or_else(|| Error::validation("event_id missing after input preparation"))?;
        if self.events.contains_key(&event_id) {
            return Err(Error::validation(format!(
                "calendar event '{event_id}' already exists"
            )));
        }
        let event = CalendarEvent {
            event_id: event_id.clone(),
            calendar_id: draft.calendar_id,
            title: draft.title,
            description: draft.description,
            location: draft.location,
            start: draft.start,
            end: draft.end,
            all_day: draft.all_day,
            attendees: draft.attendees,
            recurrence: draft.recurrence,
            recurrence_exceptions: BTreeSet::new(),
        };
        self.events.insert(event_id, event);
        Ok(())
    }

    fn update_event(
        &mut self,
        event_id: &str,
        scope: RecurrenceScope,
        recurrence_id: Option<&str>,
        patch: &EventPatch,
    ) -> Result<()> {
        let existing = self.get_event(event_id)?.clone();
        match (scope, &existing.recurrence, recurrence_id) {
            (RecurrenceScope::This, Some(_), Some(date)) => {
                let date = parse_occurrence_date(date)?;
                let detached_id = occurrence_id(event_id, &date.format("%Y-%m-%d").to_string());
                if self.events.contains_key(&detached_id) {
                    return Err(Error::validation(format!(
                        "occurrence '{detached_id}' was already detached"
                    )));
                }
                // Detach the occurrence: exception on the series, override
                // event carrying the patched fields.
                let shift = date
                    .and_time(existing.start.time())
                    .and_utc()
                    - existing.start;
                let mut detached = existing.clone();
                detached.event_id = detached_id.clone();
                detached.recurrence = None;
                detached.recurrence_exceptions = BTreeSet::new();
                detached.start = existing.start + shift;
                detached.end = existing.end + shift;
                patch.apply_to(&mut detached);
                detached.recurrence = None;

                let series = self.events.get_mut(event_id).expect("cloned above");
                series
                    .recurrence_exceptions
                    .insert(date.format("%Y-%m-%d").to_string());
                self.events.insert(detached_id, detached);
            }
            (RecurrenceScope::ThisAndFuture, Some(rule), Some(date)) => {
                let date = parse_occurrence_date(date)?;
                let successor_id = occurrence_id(event_id, &date.format("%Y-%m-%d").to_string());
                if self.events.contains_key(&successor_id) {
                    return Err(Error::validation(format!(
                        "series '{successor_id}' already exists"
                    )));
                }
                let shift = date
                    .and_time(existing.start.time())
                    .and_utc()
                    - existing.start;
                let mut successor = existing.clone();
                successor.event_id = successor_id.clone();
                successor.start = existing.start + shift;
                successor.end = existing.end + shift;
                successor.recurrence_exceptions = existing
                    .recurrence_exceptions
                    .iter()
                    .filter(|d| parse_occurrence_date(d).map_or(false, |d| d >= date))
                    .cloned()
                    .collect();
                patch.apply_to(&mut successor);

                let truncated_until = date.and_time(existing.start.time()).and_utc() - Duration::seconds(1);
                let series = self.events.get_mut(event_id).expect("cloned above");
                let mut truncated_rule = rule.clone();
                truncated_rule.until = Some(truncated_until);
                series.recurrence = Some(truncated_rule);
                self.events.insert(successor_id, successor);
            }
            _ => {
                let mut updated = existing.clone();
                patch.apply_to(&mut updated);
                if updated.end < updated.start {
                    return Err(Error::validation("end must not be before start"));
                }
                if let Some(rule) = &updated.recurrence {
                    validate_rule(rule)?;
                }
                self.events.insert(event_id.to_string(), updated);
            }
        }
        Ok(())
    }

    fn delete_event(
        &mut self,
        event_id: &str,
        scope: RecurrenceScope,
        recurrence_id: Option<&str>,
    ) -> Result<()> {
        let existing = self.get_event(event_id)?.clone();
        match (scope, &existing.recurrence, recurrence_id) {
            (RecurrenceScope::This, Some(_), Some(date)) => {
                let date = parse_occurrence_date(date)?;
                let key = date.format("%Y-%m-%d").to_string();
                let series = self.events.get_mut(event_id).expect("cloned above");
                if !series.recurrence_exceptions.insert(key.clone()) {
                    return Err(Error::validation(format!(
                        "occurrence '{key}' is already deleted"
                    )));
                }
            }
            (RecurrenceScope::ThisAndFuture, Some(rule), Some(date)) => {
                let date = parse_occurrence_date(date)?;
                let truncated_until = date.and_time(existing.start.time()).and_utc() - Duration::seconds(1);
                let series = self.events.get_mut(event_id).expect("cloned above");
                let mut truncated_rule = rule.clone();
                truncated_rule.until = Some(truncated_until);
                series.recurrence = Some(truncated_rule);
            }
            _ => {
                self.events.remove(event_id);
            }
        }
        Ok(())
    }
}

impl ModalityState for CalendarState {
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
        let mut parsed: CalendarInput = parse_input(input)?;
        match &mut parsed {
            CalendarInput::Create(draft) => {
                validate_draft(draft)?;
                if draft.event_id.is_none() {
                    draft.event_id = Some(Uuid::new_v4().to_string());
                }
            }
            CalendarInput::Update { event_id, recurrence_id, patch, .. } => {
                if event_id.trim().is_empty() {
                    return Err(Error::validation("event_id must not be empty"));
                }
                if let Some(date) = recurrence_id {
                    parse_occurrence_date(date)?;
                }
                if let Some(rule) = &patch.recurrence {
                    validate_rule(rule)?;
                }
            }
            CalendarInput::Delete { event_id, recurrence_id, .. } => {
                if event_id.trim().is_empty() {
                    return Err(Error::validation("event_id must not be empty"));
                }
                if let Some(date) = recurrence_id {
                    parse_occurrence_date(date)?;
                }
            }
        }
        Ok(serde_json::to_value(parsed)?)
    }

    fn apply(&mut self, input: &Value, at: DateTime<Utc>) -> Result<()> {
        let input: CalendarInput = parse_input(input)?;
        match input {
            CalendarInput::Create(draft) => self.create_event(draft)?,
            CalendarInput::Update { event_id, recurrence_scope, recurrence_id, patch } => {
                self.update_event(&event_id, recurrence_scope, recurrence_id.as_deref(), &patch)?
            }
            CalendarInput::Delete { event_id, recurrence_scope, recurrence_id } => {
                self.delete_event(&event_id, recurrence_scope, recurrence_id.as_deref())?
            }
        }
        self.meta.bump(at);
        Ok(())
    }

    fn create_undo_data(&self, input: &Value) -> Result<Value> {
        let input: CalendarInput = parse_input(input)?;
        let undo = match &input {
            CalendarInput::Create(draft) => {
                let id = draft
                    .event_id
                    .clone()
                    .ok_or_else(|| Error::validation("event_id missing after input preparation"))?;
                let mut undo = self.meta.undo_base(ACTION_REMOVE_EVENT);
                undo.insert("event_id".into(), Value::String(id));
                undo
            }
            CalendarInput::Update { event_id, recurrence_scope, recurrence_id, .. } => {
                match self.events.get(event_id) {
                    None => self.meta.undo_base(crate::ACTION_NOOP),
                    Some(existing) => match (recurrence_scope, &existing.recurrence, recurrence_id) {
                        (RecurrenceScope::This, Some(_), Some(date))
                        | (RecurrenceScope::ThisAndFuture, Some(_), Some(date)) => {
                            let mut undo = self.meta.undo_base(ACTION_RESTORE_SPLIT);
                            undo.insert("original".into(), serde_json::to_value(existing)?);
                            undo.insert(
                                "created_event_id".into(),
                                Value::String(occurrence_id(event_id, date)),
                            );
                            undo
                        }
                        _ => {
                            let mut undo = self.meta.undo_base(ACTION_REPLACE_EVENT);
                            undo.insert("event".into(), serde_json::to_value(existing)?);
                            undo
                        }
                    },
                }
            }
            CalendarInput::Delete { event_id, recurrence_scope, recurrence_id } => {
                match self.events.get(event_id) {
                    None => self.meta.undo_base(crate::ACTION_NOOP),
                    Some(existing) => match (recurrence_scope, &existing.recurrence, recurrence_id) {
                        (RecurrenceScope::This, Some(_), Some(date)) => {
                            let mut undo = self.meta.undo_base(ACTION_REMOVE_EXCEPTION);
                            undo.insert("event_id".into(), Value::String(event_id.clone()));
                            undo.insert("recurrence_id".into(), Value::String(date.clone()));
                            undo
                        }
                        (RecurrenceScope::ThisAndFuture, Some(_), Some(_)) => {
                            let mut undo = self.meta.undo_base(ACTION_REPLACE_EVENT);
                            undo.insert("event".into(), serde_json::to_value(existing)?);
                            undo
                        }
                        _ => {
                            let mut undo = self.meta.undo_base(ACTION_RESTORE_EVENT);
                            undo.insert("event".into(), serde_json::to_value(existing)?);
                            undo
                        }
                    },
                }
            }
        };
        Ok(Value::Object(undo))
    }

    fn apply_undo(&mut self, undo_data: &Value) -> Result<()> {
        let undo = undo_object(undo_data)?;
        match undo_action(undo)? {
            ACTION_REMOVE_EVENT => {
                let id = undo_str(undo, "event_id")?;
                if self.events.remove(id).is_none() {
                    return Err(Error::inconsistent(format!(
                        "cannot remove calendar event '{id}': not present"
                    )));
                }
            }
            ACTION_RESTORE_EVENT => {
                let event: CalendarEvent = undo_field(undo, "event")?;
                if self.events.contains_key(&event.event_id) {
                    return Err(Error::inconsistent(format!(
                        "cannot restore calendar event '{}': already present",
                        event.event_id
                    )));
                }
                self.events.insert(event.event_id.clone(), event);
            }
            ACTION_REPLACE_EVENT => {
                let event: CalendarEvent = undo_field(undo, "event")?;
                if !self.events.contains_key(&event.event_id) {
                    return Err(Error::inconsistent(format!(
                        "cannot replace calendar event '{}': not present",
                        event.event_id
                    )));
                }
                self.events.insert(event.event_id.clone(), event);
            }
            ACTION_REMOVE_EXCEPTION => {
                let id = undo_str(undo, "event_id")?;
                let date = undo_str(undo, "recurrence_id")?;
                let event = self.events.get_mut(id).ok_or_else(|| {
                    Error::inconsistent(format!("cannot remove exception on '{id}': not present"))
                })?;
                if !event.recurrence_exceptions.remove(date) {
                    return Err(Error::inconsistent(format!(
                        "exception '{date}' not present on '{id}'"
                    )));
                }
            }
            ACTION_RESTORE_SPLIT => {
                let original: CalendarEvent = undo_field(undo, "original")?;
                let created_id = undo_str(undo, "created_event_id")?;
                if self.events.remove(created_id).is_none() {
                    return Err(Error::inconsistent(format!(
                        "cannot remove split event '{created_id}': not present"
                    )));
                }
                self.events.insert(original.event_id.clone(), original);
            }
            crate::ACTION_NOOP => {}
            action => return Err(unknown_undo_action(MODALITY, action)),
        }
        self.meta.restore(undo)
    }

    fn query(&self, params: &Value) -> Result<Value> {
        let q: CalendarQuery = parse_query(params)?;
        let window_start = q.start.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let window_end = q.end.unwrap_or(DateTime::<Utc>::MAX_UTC);
        if window_end < window_start {
            return Err(Error::validation("query end must not be before start"));
        }

        let filtered: Vec<&CalendarEvent> = self
            .events
            .values()
            .filter(|e| q.calendar_id.as_ref().map_or(true, |c| &e.calendar_id == c))
            .filter(|e| {
                q.search.as_ref().map_or(true, |s| {
                    let needle = s.to_lowercase();
                    e.title.to_lowercase().contains(&needle)
                        || e.description
                            .as_ref()
                            .map_or(false, |d| d.to_lowercase().contains(&needle))
                })
            })
            .collect();

        let mut results: Vec<Value> = Vec::new();
        for event in filtered {
            if q.expand_recurring {
                for (occ_start, occ_end) in occurrences_between(event, window_start, window_end) {
                    let mut value = serde_json::to_value(event).expect("event serializes");
                    let map = value.as_object_mut().expect("event is an object");
                    map.insert("start".into(), json!(occ_start));
                    map.insert("end".into(), json!(occ_end));
                    map.insert(
                        "recurrence_id".into(),
                        json!(occ_start.date_naive().format("%Y-%m-%d").to_string()),
                    );
                    results.push(value);
                }
            } else if event.start < window_end
                && (event.end >= window_start || event.recurrence.is_some())
            {
                results.push(serde_json::to_value(event).expect("event serializes"));
            }
        }
        results.sort_by(|a, b| {
            let key = |v: &Value| {
                (
                    v["start"].as_str().unwrap_or_default().to_string(),
                    v["event_id"].as_str().unwrap_or_default().to_string(),
                )
            };
            key(a).cmp(&key(b))
        });

        let total_count = results.len();
        let limit = q.limit.unwrap_or(100);
        let page: Vec<Value> = results.into_iter().skip(q.offset).take(limit).collect();
        Ok(json!({
            "events": page,
            "count": page.len(),
            "total_count": total_count,
        }))
    }

    fn snapshot(&self) -> Value {
        json!({
            "modality_type": MODALITY,
            "update_count": self.meta.update_count,
            "last_updated": self.meta.last_updated,
            "events": self.events,
            "calendars": self.calendar_index(),
            "event_count": self.events.len(),
        })
    }

    fn state_summary(&self) -> Value {
        json!({
            "event_count": self.events.len(),
            "calendar_count": self.calendar_index().len(),
        })
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (key, event) in &self.events {
            if key != &event.event_id {
                errors.push(format!(
                    "event key '{key}' does not match record id '{}'",
                    event.event_id
                ));
            }
            if event.end < event.start {
                errors.push(format!("event '{key}' ends before it starts"));
            }
            if let Some(rule) = &event.recurrence {
                if rule.interval == 0 {
                    errors.push(format!("event '{key}' has a zero recurrence interval"));
                }
            }
            for date in &event.recurrence_exceptions {
                if parse_occurrence_date(date).is_err() {
                    errors.push(format!("event '{key}' has malformed exception date '{date}'"));
                }
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
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap()
    }

    fn create_payload(id: &str, title: &str) -> Value {
        json!({
            "operation": "create",
            "event_id": id,
            "title": title,
            "start": "2025-01-20T14:00:00Z",
            "end": "2025-01-20T15:00:00Z",
        })
    }

    fn weekly_payload(id: &str) -> Value {
        json!({
            "operation": "create",
            "event_id": id,
            "title": "Standup",
            "start": "2025-01-20T10:00:00Z",
            "end": "2025-01-20T10:30:00Z",
            "recurrence": {
                "frequency": "weekly",
                "interval": 1,
                "days_of_week": ["monday"],
            },
        })
    }

    fn state_with(payload: Value) -> CalendarState {
        let mut state = CalendarState::new();
        let prepared = state.prepare_input(&payload).unwrap();
        state.apply(&prepared, at()).unwrap();
        state
    }

    #[test]
    fn create_lands_in_primary_calendar() {
        let state = state_with(create_payload("e1", "Dentist"));
        let snap = state.snapshot();
        assert_eq!(snap["event_count"], 1);
        assert_eq!(snap["events"]["e1"]["calendar_id"], "primary");
        assert_eq!(snap["calendars"]["primary"], json!(["e1"]));
    }

    #[test]
    fn create_rejects_end_before_start() {
        let state = CalendarState::new();
        let err = state
            .prepare_input(&json!({
                "operation": "create",
                "title": "Backwards",
                "start": "2025-01-20T15:00:00Z",
                "end": "2025-01-20T14:00:00Z",
            }))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn create_undo_removes_event() {
        let mut state = CalendarState::new();
        let before = state.snapshot();
        let prepared = state.prepare_input(&create_payload("e1", "Dentist")).unwrap();
        let undo = state.create_undo_data(&prepared).unwrap();
        state.apply(&prepared, at()).unwrap();
        state.apply_undo(&undo).unwrap();
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn update_patches_fields_and_undo_replaces() {
        let mut state = state_with(create_payload("e1", "Dentist"));
        let before = state.snapshot();
        let update = state
            .prepare_input(&json!({
                "operation": "update",
                "event_id": "e1",
                "title": "Dentist (moved)",
                "location": "Downtown",
            }))
            .unwrap();
        let undo = state.create_undo_data(&update).unwrap();
        state.apply(&update, at()).unwrap();
        assert_eq!(state.snapshot()["events"]["e1"]["title"], "Dentist (moved)");
        assert_eq!(state.snapshot()["events"]["e1"]["location"], "Downtown");

        state.apply_undo(&undo).unwrap();
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn delete_this_records_exception_and_undo_removes_it() {
        let mut state = state_with(weekly_payload("standup"));
        let before = state.snapshot();
        let delete = state
            .prepare_input(&json!({
                "operation": "delete",
                "event_id": "standup",
                "recurrence_scope": "this",
                "recurrence_id": "2025-01-27",
            }))
            .unwrap();
        let undo = state.create_undo_data(&delete).unwrap();
        state.apply(&delete, at()).unwrap();

        let snap = state.snapshot();
        assert!(snap["events"]["standup"].is_object());
        assert_eq!(
            snap["events"]["standup"]["recurrence_exceptions"],
            json!(["2025-01-27"])
        );

        state.apply_undo(&undo).unwrap();
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn delete_all_removes_event_and_undo_restores() {
        let mut state = state_with(weekly_payload("standup"));
        let before = state.snapshot();
        let delete = state
            .prepare_input(&json!({
                "operation": "delete",
                "event_id": "standup",
                "recurrence_scope": "all",
            }))
            .unwrap();
        let undo = state.create_undo_data(&delete).unwrap();
        state.apply(&delete, at()).unwrap();
        assert_eq!(state.snapshot()["event_count"], 0);
        state.apply_undo(&undo).unwrap();
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn update_this_and_future_splits_series() {
        let mut state = state_with(weekly_payload("standup"));
        let before = state.snapshot();
        let update = state
            .prepare_input(&json!({
                "operation": "update",
                "event_id": "standup",
                "recurrence_scope": "this_and_future",
                "recurrence_id": "2025-02-03",
                "title": "Standup (new room)",
            }))
            .unwrap();
        let undo = state.create_undo_data(&update).unwrap();
        state.apply(&update, at()).unwrap();

        let snap = state.snapshot();
        assert_eq!(snap["event_count"], 2);
        let successor = &snap["events"]["standup_2025-02-03"];
        assert_eq!(successor["title"], "Standup (new room)");
        assert_eq!(successor["start"], "2025-02-03T10:00:00Z");
        // original series truncated before the split point
        let until = snap["events"]["standup"]["recurrence"]["until"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(until.starts_with("2025-02-03T09:59:59"));

        state.apply_undo(&undo).unwrap();
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn update_this_detaches_single_occurrence() {
        let mut state = state_with(weekly_payload("standup"));
        let update = state
            .prepare_input(&json!({
                "operation": "update",
                "event_id": "standup",
                "recurrence_scope": "this",
                "recurrence_id": "2025-01-27",
                "location": "Room 4",
            }))
            .unwrap();
        state.apply(&update, at()).unwrap();

        let snap = state.snapshot();
        assert_eq!(snap["event_count"], 2);
        assert_eq!(
            snap["events"]["standup"]["recurrence_exceptions"],
            json!(["2025-01-27"])
        );
        let detached = &snap["events"]["standup_2025-01-27"];
        assert_eq!(detached["location"], "Room 4");
        assert!(detached["recurrence"].is_null());
    }

    #[test]
    fn weekly_expansion_honors_exceptions() {
        let mut state = state_with(weekly_payload("standup"));
        let delete = state
            .prepare_input(&json!({
                "operation": "delete",
                "event_id": "standup",
                "recurrence_scope": "this",
                "recurrence_id": "2025-01-27",
            }))
            .unwrap();
        state.apply(&delete, at()).unwrap();

        let result = state
            .query(&json!({
                "start": "2025-01-19T00:00:00Z",
                "end": "2025-02-11T00:00:00Z",
                "expand_recurring": true,
            }))
            .unwrap();
        let starts: Vec<&str> = result["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["start"].as_str().unwrap())
            .collect();
        // Jan 20, Feb 3, Feb 10 — Jan 27 excluded by the exception.
        assert_eq!(
            starts,
            vec![
                "2025-01-20T10:00:00Z",
                "2025-02-03T10:00:00Z",
                "2025-02-10T10:00:00Z"
            ]
        );
    }

    #[test]
    fn daily_expansion_respects_count() {
        let mut state = CalendarState::new();
        let prepared = state
            .prepare_input(&json!({
                "operation": "create",
                "event_id": "med",
                "title": "Medication",
                "start": "2025-01-20T08:00:00Z",
                "end": "2025-01-20T08:05:00Z",
                "recurrence": {"frequency": "daily", "count": 3},
            }))
            .unwrap();
        state.apply(&prepared, at()).unwrap();
        let result = state
            .query(&json!({
                "start": "2025-01-01T00:00:00Z",
                "end": "2025-03-01T00:00:00Z",
                "expand_recurring": true,
            }))
            .unwrap();
        assert_eq!(result["total_count"], 3);
    }

    #[test]
    fn expansion_respects_until() {
        let mut state = CalendarState::new();
        let prepared = state
            .prepare_input(&json!({
                "operation": "create",
                "event_id": "gym",
                "title": "Gym",
                "start": "2025-01-20T18:00:00Z",
                "end": "2025-01-20T19:00:00Z",
                "recurrence": {"frequency": "daily", "until": "2025-01-22T23:59:59Z"},
            }))
            .unwrap();
        state.apply(&prepared, at()).unwrap();
        let result = state
            .query(&json!({
                "start": "2025-01-01T00:00:00Z",
                "end": "2025-03-01T00:00:00Z",
                "expand_recurring": true,
            }))
            .unwrap();
        assert_eq!(result["total_count"], 3); // Jan 20, 21, 22
    }

    #[test]
    fn unknown_undo_action_is_rejected() {
        let mut state = CalendarState::new();
        let err = state
            .apply_undo(&json!({
                "action": "mystery",
                "state_previous_update_count": 0,
                "state_previous_last_updated": null,
            }))
            .unwrap_err();
        assert!(matches!(err, Error::Inconsistent(_)));
    }
}
