//! SMS modality — threaded messages, per-message emoji reactions, soft
//! delete.
//!
//! A conversation is identified by its normalized participant set: numbers
//! are trimmed, deduplicated, and sorted, then joined with `|`. The same
//! people always map to the same thread regardless of who sent what.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use es_domain::{Error, Result};

use crate::{
    parse_input, parse_query, undo_action, undo_field, undo_object, undo_str, unknown_undo_action,
    ModalityState, StateMeta, ACTION_NOOP,
};

pub const MODALITY: &str = "sms";

const ACTION_REMOVE_MESSAGE: &str = "remove_message";
const ACTION_RESTORE_MESSAGES: &str = "restore_messages";
const ACTION_RESTORE_REACTION: &str = "restore_reaction";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsMessage {
    pub message_id: String,
    pub direction: Direction,
    pub from_number: String,
    pub to_numbers: Vec<String>,
    pub body: String,
    pub conversation_id: String,
    /// phone number -> emoji
    #[serde(default)]
    pub reactions: BTreeMap<String, String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_deleted: bool,
    pub timestamp: DateTime<Utc>,
}

/// Normalized participant key: trimmed, deduplicated, sorted.
pub fn conversation_key(from_number: &str, to_numbers: &[String]) -> String {
    let mut participants: BTreeSet<String> = to_numbers.iter().map(|n| n.trim().to_string()).collect();
    participants.insert(from_number.trim().to_string());
    participants.into_iter().collect::<Vec<_>>().join("|")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageData {
    from_number: String,
    to_numbers: Vec<String>,
    body: String,
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum SmsInput {
    SendMessage { message_data: MessageData },
    ReceiveMessage { message_data: MessageData },
    Read { message_ids: Vec<String> },
    Unread { message_ids: Vec<String> },
    Delete { message_ids: Vec<String> },
    React {
        message_id: String,
        phone_number: String,
        /// Empty string removes an existing reaction.
        emoji: String,
    },
}

fn validate_number(number: &str) -> Result<()> {
    let trimmed = number.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("phone number must not be empty"));
    }
    if !trimmed.starts_with('+') || trimmed.len() < 4 {
        return Err(Error::validation(format!(
            "phone number '{trimmed}' must be in E.164 format"
        )));
    }
    Ok(())
}

fn validate_message_data(data: &MessageData) -> Result<()> {
    validate_number(&data.from_number)?;
    if data.to_numbers.is_empty() {
        return Err(Error::validation("to_numbers must not be empty"));
    }
    for number in &data.to_numbers {
        validate_number(number)?;
    }
    if data.body.is_empty() {
        return Err(Error::validation("message body must not be empty"));
    }
    Ok(())
}

fn validate_ids(message_ids: &[String]) -> Result<()> {
    if message_ids.is_empty() {
        return Err(Error::validation("message_ids must not be empty"));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SmsQuery {
    conversation_id: Option<String>,
    /// Any message the number participates in (sender or recipient).
    phone_number: Option<String>,
    direction: Option<Direction>,
    #[serde(default)]
    include_deleted: bool,
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct SmsState {
    meta: StateMeta,
    messages: BTreeMap<String, SmsMessage>,
}

impl SmsState {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_message(&self, id: &str) -> Result<&SmsMessage> {
        self.messages
            .get(id)
            .ok_or_else(|| Error::validation(format!("message '{id}' does not exist")))
    }

    fn check_ids_exist(&self, message_ids: &[String]) -> Result<()> {
        for id in message_ids {
            self.get_message(id)?;
        }
        Ok(())
    }

    fn insert_message(&mut self, data: MessageData, direction: Direction, at: DateTime<Utc>) -> Result<()> {
        validate_message_data(&data)?;
        let message_id = data
            .message_id
            .clone()
            .ok_or_else(|| Error::validation("message_id missing after input preparation"))?;
        if self.messages.contains_key(&message_id) {
            return Err(Error::validation(format!("message '{message_id}' already exists")));
        }
        let conversation_id = conversation_key(&data.from_number, &data.to_numbers);
        let message = SmsMessage {
            message_id: message_id.clone(),
            direction,
            from_number: data.from_number,
            to_numbers: data.to_numbers,
            body: data.body,
            conversation_id,
            reactions: BTreeMap::new(),
            is_read: direction == Direction::Outgoing,
            is_deleted: false,
            timestamp: at,
        };
        self.messages.insert(message_id, message);
        Ok(())
    }

    fn mutate_each(&mut self, message_ids: &[String], f: impl Fn(&mut SmsMessage)) -> Result<()> {
        validate_ids(message_ids)?;
        self.check_ids_exist(message_ids)?;
        for id in message_ids {
            f(self.messages.get_mut(id).expect("checked above"));
        }
        Ok(())
    }

    fn capture_messages(&self, message_ids: &[String]) -> Map<String, Value> {
        let mut captured = Map::new();
        for id in message_ids {
            if let Some(message) = self.messages.get(id) {
                captured.insert(
                    id.clone(),
                    serde_json::to_value(message).expect("message serializes"),
                );
            }
        }
        captured
    }

    fn conversation_index(&self) -> BTreeMap<String, Vec<String>> {
        let mut conversations: BTreeMap<String, Vec<(DateTime<Utc>, String)>> = BTreeMap::new();
        for message in self.messages.values() {
            conversations
                .entry(message.conversation_id.clone())
                .or_default()
                .push((message.timestamp, message.message_id.clone()));
        }
        conversations
            .into_iter()
            .map(|(key, mut entries)| {
                entries.sort();
                (key, entries.into_iter().map(|(_, id)| id).collect())
            })
            .collect()
    }

    fn unread_count(&self) -> usize {
        self.messages
            .values()
            .filter(|m| !m.is_read && !m.is_deleted)
            .count()
    }
}

impl ModalityState for SmsState {
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
        let mut parsed: SmsInput = parse_input(input)?;
        match &mut parsed {
            SmsInput::SendMessage { message_data } | SmsInput::ReceiveMessage { message_data } => {
                validate_message_data(message_data)?;
                if message_data.message_id.is_none() {
                    message_data.message_id = Some(Uuid::new_v4().to_string());
                }
            }
            SmsInput::Read { message_ids }
            | SmsInput::Unread { message_ids }
            | SmsInput::Delete { message_ids } => validate_ids(message_ids)?,
            SmsInput::React { phone_number, message_id, .. } => {
                validate_number(phone_number)?;
                if message_id.trim().is_empty() {
                    return Err(Error::validation("message_id must not be empty"));
                }
            }
        }
        Ok(serde_json::to_value(parsed)?)
    }

    fn apply(&mut self, input: &Value, at: DateTime<Utc>) -> Result<()> {
        let input: SmsInput = parse_input(input)?;
        match input {
            SmsInput::SendMessage { message_data } => {
                self.insert_message(message_data, Direction::Outgoing, at)?
            }
            SmsInput::ReceiveMessage { message_data } => {
                self.insert_message(message_data, Direction::Incoming, at)?
            }
            SmsInput::Read { message_ids } => self.mutate_each(&message_ids, |m| m.is_read = true)?,
            SmsInput::Unread { message_ids } => self.mutate_each(&message_ids, |m| m.is_read = false)?,
            SmsInput::Delete { message_ids } => self.mutate_each(&message_ids, |m| m.is_deleted = true)?,
            SmsInput::React { message_id, phone_number, emoji } => {
                self.get_message(&message_id)?;
                let message = self.messages.get_mut(&message_id).expect("checked above");
                if emoji.is_empty() {
                    message.reactions.remove(phone_number.trim());
                } else {
                    message.reactions.insert(phone_number.trim().to_string(), emoji);
                }
            }
        }
        self.meta.bump(at);
        Ok(())
    }

    fn create_undo_data(&self, input: &Value) -> Result<Value> {
        let input: SmsInput = parse_input(input)?;
        let undo = match &input {
            SmsInput::SendMessage { message_data } | SmsInput::ReceiveMessage { message_data } => {
                let id = message_data
                    .message_id
                    .clone()
                    .ok_or_else(|| Error::validation("message_id missing after input preparation"))?;
                let mut undo = self.meta.undo_base(ACTION_REMOVE_MESSAGE);
                undo.insert("message_id".into(), Value::String(id));
                undo
            }
            SmsInput::Read { message_ids }
            | SmsInput::Unread { message_ids }
            | SmsInput::Delete { message_ids } => {
                let captured = self.capture_messages(message_ids);
                if captured.is_empty() {
                    self.meta.undo_base(ACTION_NOOP)
                } else {
                    let mut undo = self.meta.undo_base(ACTION_RESTORE_MESSAGES);
                    undo.insert("messages".into(), Value::Object(captured));
                    undo
                }
            }
            SmsInput::React { message_id, phone_number, .. } => {
                match self.messages.get(message_id) {
                    Some(message) => {
                        let previous = message.reactions.get(phone_number.trim()).cloned();
                        let mut undo = self.meta.undo_base(ACTION_RESTORE_REACTION);
                        undo.insert("message_id".into(), Value::String(message_id.clone()));
                        undo.insert("phone_number".into(), Value::String(phone_number.trim().to_string()));
                        undo.insert(
                            "previous_emoji".into(),
                            previous.map(Value::String).unwrap_or(Value::Null),
                        );
                        undo
                    }
                    None => self.meta.undo_base(ACTION_NOOP),
                }
            }
        };
        Ok(Value::Object(undo))
    }

    fn apply_undo(&mut self, undo_data: &Value) -> Result<()> {
        let undo = undo_object(undo_data)?;
        match undo_action(undo)? {
            ACTION_REMOVE_MESSAGE => {
                let id = undo_str(undo, "message_id")?;
                if self.messages.remove(id).is_none() {
                    return Err(Error::inconsistent(format!(
                        "cannot remove message '{id}': not present"
                    )));
                }
            }
            ACTION_RESTORE_MESSAGES => {
                let previous: BTreeMap<String, SmsMessage> = undo_field(undo, "messages")?;
                for id in previous.keys() {
                    if !self.messages.contains_key(id) {
                        return Err(Error::inconsistent(format!(
                            "cannot restore message '{id}': not present"
                        )));
                    }
                }
                for (id, message) in previous {
                    self.messages.insert(id, message);
                }
            }
            ACTION_RESTORE_REACTION => {
                let id = undo_str(undo, "message_id")?;
                let number = undo_str(undo, "phone_number")?.to_string();
                let message = self.messages.get_mut(id).ok_or_else(|| {
                    Error::inconsistent(format!("cannot restore reaction on '{id}': not present"))
                })?;
                match undo.get("previous_emoji") {
                    Some(Value::String(emoji)) => {
                        message.reactions.insert(number, emoji.clone());
                    }
                    _ => {
                        message.reactions.remove(&number);
                    }
                }
            }
            ACTION_NOOP => {}
            action => return Err(unknown_undo_action(MODALITY, action)),
        }
        self.meta.restore(undo)
    }

    fn query(&self, params: &Value) -> Result<Value> {
        let q: SmsQuery = parse_query(params)?;
        let mut matches: Vec<&SmsMessage> = self
            .messages
            .values()
            .filter(|m| q.include_deleted || !m.is_deleted)
            .filter(|m| q.conversation_id.as_ref().map_or(true, |c| &m.conversation_id == c))
            .filter(|m| {
                q.phone_number.as_ref().map_or(true, |n| {
                    let n = n.trim();
                    m.from_number == n || m.to_numbers.iter().any(|t| t == n)
                })
            })
            .filter(|m| q.direction.map_or(true, |d| m.direction == d))
            .collect();
        matches.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        let total_count = matches.len();
        let limit = q.limit.unwrap_or(50);
        let page: Vec<Value> = matches
            .into_iter()
            .skip(q.offset)
            .take(limit)
            .map(|m| serde_json::to_value(m).expect("message serializes"))
            .collect();
        Ok(json!({
            "messages": page,
            "count": page.len(),
            "total_count": total_count,
        }))
    }

    fn snapshot(&self) -> Value {
        json!({
            "modality_type": MODALITY,
            "update_count": self.meta.update_count,
            "last_updated": self.meta.last_updated,
            "messages": self.messages,
            "conversations": self.conversation_index(),
            "total_message_count": self.messages.len(),
            "unread_count": self.unread_count(),
        })
    }

    fn state_summary(&self) -> Value {
        json!({
            "total_message_count": self.messages.len(),
            "conversation_count": self.conversation_index().len(),
            "unread_count": self.unread_count(),
        })
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (key, message) in &self.messages {
            if key != &message.message_id {
                errors.push(format!(
                    "message key '{key}' does not match record id '{}'",
                    message.message_id
                ));
            }
            let expected = conversation_key(&message.from_number, &message.to_numbers);
            if message.conversation_id != expected {
                errors.push(format!(
                    "message '{key}' conversation_id '{}' does not match participants",
                    message.conversation_id
                ));
            }
        }
        errors
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
