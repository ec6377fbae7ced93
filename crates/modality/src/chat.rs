//! Chat modality — an ordered transcript of user/assistant/system messages
//! grouped by conversation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use es_domain::{Error, Result};

use crate::{
    parse_input, parse_query, undo_action, undo_object, undo_str, unknown_undo_action,
    ModalityState, StateMeta,
};

pub const MODALITY: &str = "chat";

const ACTION_REMOVE_MESSAGE: &str = "remove_message";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub role: ChatRole,
    /// Text, or a multimodal content array; stored as given.
    pub content: Value,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
enum ChatInput {
    SendMessage {
        role: ChatRole,
        content: Value,
        #[serde(default = "default_conversation")]
        conversation_id: String,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        metadata: Option<Value>,
    },
}

fn default_conversation() -> String {
    "default".to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChatQuery {
    conversation_id: Option<String>,
    role: Option<ChatRole>,
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

#[derive(Debug, Default)]
pub struct ChatState {
    meta: StateMeta,
    /// Transcript in arrival order.
    messages: Vec<ChatMessage>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    fn conversation_index(&self) -> BTreeMap<String, Vec<String>> {
        let mut conversations: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for message in &self.messages {
            conversations
                .entry(message.conversation_id.clone())
                .or_default()
                .push(message.message_id.clone());
        }
        conversations
    }
}

fn validate_content(content: &Value) -> Result<()> {
    match content {
        Value::String(text) if !text.is_empty() => Ok(()),
        Value::Array(parts) if !parts.is_empty() => Ok(()),
        _ => Err(Error::validation(
            "content must be a non-empty string or a non-empty array",
        )),
    }
}

impl ModalityState for ChatState {
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
        let mut parsed: ChatInput = parse_input(input)?;
        let ChatInput::SendMessage { content, message_id, conversation_id, .. } = &mut parsed;
        validate_content(content)?;
        if conversation_id.trim().is_empty() {
            return Err(Error::validation("conversation_id must not be empty"));
        }
        if message_id.is_none() {
            *message_id = Some(Uuid::new_v4().to_string());
        }
        Ok(serde_json::to_value(parsed)?)
    }

    fn apply(&mut self, input: &Value, at: DateTime<Utc>) -> Result<()> {
        let ChatInput::SendMessage { role, content, conversation_id, message_id, metadata } =
            parse_input(input)?;
        validate_content(&content)?;
        let message_id =
            message_id.ok_or_else(|| Error::validation("message_id missing after input preparation"))?;
        if self.messages.iter().any(|m| m.message_id == message_id) {
            return Err(Error::validation(format!("message '{message_id}' already exists")));
        }
        self.messages.push(ChatMessage {
            message_id,
            role,
            content,
            conversation_id,
            timestamp: at,
            metadata,
        });
        self.meta.bump(at);
        Ok(())
    }

    fn create_undo_data(&self, input: &Value) -> Result<Value> {
        let ChatInput::SendMessage { message_id, .. } = parse_input(input)?;
        let id =
            message_id.ok_or_else(|| Error::validation("message_id missing after input preparation"))?;
        let mut undo = self.meta.undo_base(ACTION_REMOVE_MESSAGE);
        undo.insert("message_id".into(), Value::String(id));
        Ok(Value::Object(undo))
    }

    fn apply_undo(&mut self, undo_data: &Value) -> Result<()> {
        let undo = undo_object(undo_data)?;
        match undo_action(undo)? {
            ACTION_REMOVE_MESSAGE => {
                let id = undo_str(undo, "message_id")?;
                let index = self
                    .messages
                    .iter()
                    .position(|m| m.message_id == id)
                    .ok_or_else(|| {
                        Error::inconsistent(format!("cannot remove chat message '{id}': not present"))
                    })?;
                self.messages.remove(index);
            }
            crate::ACTION_NOOP => {}
            action => return Err(unknown_undo_action(MODALITY, action)),
        }
        self.meta.restore(undo)
    }

    fn query(&self, params: &Value) -> Result<Value> {
        let q: ChatQuery = parse_query(params)?;
        let matches: Vec<&ChatMessage> = self
            .messages
            .iter()
            .filter(|m| q.conversation_id.as_ref().map_or(true, |c| &m.conversation_id == c))
            .filter(|m| q.role.map_or(true, |r| m.role == r))
            .collect();
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
            "message_count": self.messages.len(),
        })
    }

    fn state_summary(&self) -> Value {
        json!({
            "message_count": self.messages.len(),
            "conversation_count": self.conversation_index().len(),
        })
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for message in &self.messages {
            if !seen.insert(&message.message_id) {
                errors.push(format!("duplicate message id '{}'", message.message_id));
            }
        }
        for window in self.messages.windows(2) {
            if window[0].timestamp > window[1].timestamp {
                errors.push(format!(
                    "message '{}' is out of chronological order",
                    window[1].message_id
                ));
            }
        }
        errors
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
