//! Email modality — folders, labels, read/star flags, threads, soft delete.

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

pub const MODALITY: &str = "email";

pub const FOLDER_INBOX: &str = "inbox";
pub const FOLDER_SENT: &str = "sent";
pub const FOLDER_DRAFTS: &str = "drafts";
pub const FOLDER_TRASH: &str = "trash";
pub const FOLDER_ARCHIVE: &str = "archive";
pub const FOLDER_SPAM: &str = "spam";

const STANDARD_FOLDERS: [&str; 6] = [
    FOLDER_INBOX,
    FOLDER_SENT,
    FOLDER_DRAFTS,
    FOLDER_TRASH,
    FOLDER_ARCHIVE,
    FOLDER_SPAM,
];

const ACTION_REMOVE_EMAIL: &str = "remove_email";
const ACTION_RESTORE_EMAILS: &str = "restore_emails";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub message_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub from_address: String,
    pub to_addresses: Vec<String>,
    #[serde(default)]
    pub cc_addresses: Vec<String>,
    #[serde(default)]
    pub bcc_addresses: Vec<String>,
    pub subject: String,
    pub body_text: String,
    #[serde(default)]
    pub body_html: Option<String>,
    pub folder: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_starred: bool,
    #[serde(default)]
    pub is_deleted: bool,
    pub timestamp: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmailDraft {
    from_address: String,
    to_addresses: Vec<String>,
    #[serde(default)]
    cc_addresses: Vec<String>,
    #[serde(default)]
    bcc_addresses: Vec<String>,
    subject: String,
    body_text: String,
    #[serde(default)]
    body_html: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
enum EmailInput {
    Send(EmailDraft),
    Receive(EmailDraft),
    Read { message_ids: Vec<String> },
    Unread { message_ids: Vec<String> },
    Star { message_ids: Vec<String> },
    Unstar { message_ids: Vec<String> },
    Archive { message_ids: Vec<String> },
    Delete { message_ids: Vec<String> },
    Move { message_ids: Vec<String>, folder: String },
    Label { message_ids: Vec<String>, labels: Vec<String> },
    Unlabel { message_ids: Vec<String>, labels: Vec<String> },
}

impl EmailInput {
    fn message_ids(&self) -> Option<&[String]> {
        match self {
            Self::Send(_) | Self::Receive(_) => None,
            Self::Read { message_ids }
            | Self::Unread { message_ids }
            | Self::Star { message_ids }
            | Self::Unstar { message_ids }
            | Self::Archive { message_ids }
            | Self::Delete { message_ids }
            | Self::Move { message_ids, .. }
            | Self::Label { message_ids, .. }
            | Self::Unlabel { message_ids, .. } => Some(message_ids),
        }
    }
}

fn validate_address(addr: &str) -> Result<()> {
    if addr.trim().is_empty() || !addr.contains('@') {
        return Err(Error::validation(format!("invalid email address: '{addr}'")));
    }
    Ok(())
}

fn validate_draft(draft: &EmailDraft) -> Result<()> {
    validate_address(&draft.from_address)?;
    if draft.to_addresses.is_empty() {
        return Err(Error::validation("to_addresses must not be empty"));
    }
    for addr in draft
        .to_addresses
        .iter()
        .chain(&draft.cc_addresses)
        .chain(&draft.bcc_addresses)
    {
        validate_address(addr)?;
    }
    if draft.subject.is_empty() && draft.body_text.is_empty() {
        return Err(Error::validation("email needs a subject or a body"));
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
struct EmailQuery {
    folder: Option<String>,
    is_read: Option<bool>,
    is_starred: Option<bool>,
    from_address: Option<String>,
    label: Option<String>,
    thread_id: Option<String>,
    /// Case-insensitive substring match over subject and body.
    search: Option<String>,
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
pub struct EmailState {
    meta: StateMeta,
    emails: BTreeMap<String, Email>,
}

impl EmailState {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_email(&self, id: &str) -> Result<&Email> {
        self.emails
            .get(id)
            .ok_or_else(|| Error::validation(format!("email '{id}' does not exist")))
    }

    /// All referenced emails must exist before any mutation happens.
    fn check_ids_exist(&self, message_ids: &[String]) -> Result<()> {
        for id in message_ids {
            self.get_email(id)?;
        }
        Ok(())
    }

    fn insert_email(&mut self, draft: EmailDraft, folder: &str, is_read: bool, at: DateTime<Utc>) -> Result<()> {
        validate_draft(&draft)?;
        let message_id = draft
            .message_id
            .clone()
            .ok_or_else(|| Error::validation("message_id missing after input preparation"))?;
        if self.emails.contains_key(&message_id) {
            return Err(Error::validation(format!("email '{message_id}' already exists")));
        }
        let email = Email {
            message_id: message_id.clone(),
            thread_id: draft.thread_id,
            from_address: draft.from_address,
            to_addresses: draft.to_addresses,
            cc_addresses: draft.cc_addresses,
            bcc_addresses: draft.bcc_addresses,
            subject: draft.subject,
            body_text: draft.body_text,
            body_html: draft.body_html,
            folder: folder.to_string(),
            labels: draft.labels.into_iter().collect(),
            is_read,
            is_starred: false,
            is_deleted: false,
            timestamp: at,
        };
        self.emails.insert(message_id, email);
        Ok(())
    }

    fn mutate_each(&mut self, message_ids: &[String], f: impl Fn(&mut Email)) -> Result<()> {
        validate_ids(message_ids)?;
        self.check_ids_exist(message_ids)?;
        for id in message_ids {
            f(self.emails.get_mut(id).expect("checked above"));
        }
        Ok(())
    }

    /// Capture full previous records, keyed by id, for a restore memento.
    fn capture_emails(&self, message_ids: &[String]) -> Map<String, Value> {
        let mut captured = Map::new();
        for id in message_ids {
            if let Some(email) = self.emails.get(id) {
                captured.insert(id.clone(), serde_json::to_value(email).expect("email serializes"));
            }
        }
        captured
    }

    fn folder_index(&self) -> BTreeMap<String, Vec<String>> {
        let mut folders: BTreeMap<String, Vec<String>> = STANDARD_FOLDERS
            .iter()
            .map(|f| (f.to_string(), Vec::new()))
            .collect();
        for email in self.emails.values() {
            folders
                .entry(email.folder.clone())
                .or_default()
                .push(email.message_id.clone());
        }
        folders
    }

    fn thread_index(&self) -> BTreeMap<String, Vec<String>> {
        let mut threads: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for email in self.emails.values() {
            if let Some(thread_id) = &email.thread_id {
                threads
                    .entry(thread_id.clone())
                    .or_default()
                    .push(email.message_id.clone());
            }
        }
        threads
    }

    fn label_index(&self) -> BTreeMap<String, Vec<String>> {
        let mut labels: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for email in self.emails.values() {
            for label in &email.labels {
                labels
                    .entry(label.clone())
                    .or_default()
                    .push(email.message_id.clone());
            }
        }
        labels
    }

    fn unread_count(&self) -> usize {
        self.emails
            .values()
            .filter(|e| !e.is_read && !e.is_deleted)
            .count()
    }
}

impl ModalityState for EmailState {
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
        let mut parsed: EmailInput = parse_input(input)?;
        match &mut parsed {
            EmailInput::Send(draft) | EmailInput::Receive(draft) => {
                validate_draft(draft)?;
                if draft.message_id.is_none() {
                    draft.message_id = Some(Uuid::new_v4().to_string());
                }
            }
            EmailInput::Move { message_ids, folder } => {
                validate_ids(message_ids)?;
                if folder.trim().is_empty() {
                    return Err(Error::validation("folder must not be empty"));
                }
            }
            EmailInput::Label { message_ids, labels } | EmailInput::Unlabel { message_ids, labels } => {
                validate_ids(message_ids)?;
                if labels.is_empty() {
                    return Err(Error::validation("labels must not be empty"));
                }
            }
            other => validate_ids(other.message_ids().expect("id-based operation"))?,
        }
        Ok(serde_json::to_value(parsed)?)
    }

    fn apply(&mut self, input: &Value, at: DateTime<Utc>) -> Result<()> {
        let input: EmailInput = parse_input(input)?;
        match input {
            EmailInput::Send(draft) => self.insert_email(draft, FOLDER_SENT, true, at)?,
            EmailInput::Receive(draft) => self.insert_email(draft, FOLDER_INBOX, false, at)?,
            EmailInput::Read { message_ids } => self.mutate_each(&message_ids, |e| e.is_read = true)?,
            EmailInput::Unread { message_ids } => self.mutate_each(&message_ids, |e| e.is_read = false)?,
            EmailInput::Star { message_ids } => self.mutate_each(&message_ids, |e| e.is_starred = true)?,
            EmailInput::Unstar { message_ids } => self.mutate_each(&message_ids, |e| e.is_starred = false)?,
            EmailInput::Archive { message_ids } => self.mutate_each(&message_ids, |e| {
                e.folder = FOLDER_ARCHIVE.to_string();
            })?,
            EmailInput::Delete { message_ids } => self.mutate_each(&message_ids, |e| {
                e.folder = FOLDER_TRASH.to_string();
                e.is_deleted = true;
            })?,
            EmailInput::Move { message_ids, folder } => {
                if folder.trim().is_empty() {
                    return Err(Error::validation("folder must not be empty"));
                }
                self.mutate_each(&message_ids, |e| e.folder = folder.clone())?;
            }
            EmailInput::Label { message_ids, labels } => {
                if labels.is_empty() {
                    return Err(Error::validation("labels must not be empty"));
                }
                self.mutate_each(&message_ids, |e| {
                    e.labels.extend(labels.iter().cloned());
                })?;
            }
            EmailInput::Unlabel { message_ids, labels } => {
                if labels.is_empty() {
                    return Err(Error::validation("labels must not be empty"));
                }
                self.mutate_each(&message_ids, |e| {
                    for label in &labels {
                        e.labels.remove(label);
                    }
                })?;
            }
        }
        self.meta.bump(at);
        Ok(())
    }

    fn create_undo_data(&self, input: &Value) -> Result<Value> {
        let input: EmailInput = parse_input(input)?;
        let mut undo = match &input {
            EmailInput::Send(draft) | EmailInput::Receive(draft) => {
                let id = draft
                    .message_id
                    .clone()
                    .ok_or_else(|| Error::validation("message_id missing after input preparation"))?;
                let mut undo = self.meta.undo_base(ACTION_REMOVE_EMAIL);
                undo.insert("message_id".into(), Value::String(id));
                undo
            }
            other => {
                let ids = other.message_ids().expect("id-based operation");
                let captured = self.capture_emails(ids);
                if captured.is_empty() {
                    self.meta.undo_base(ACTION_NOOP)
                } else {
                    let mut undo = self.meta.undo_base(ACTION_RESTORE_EMAILS);
                    undo.insert("emails".into(), Value::Object(captured));
                    undo
                }
            }
        };
        undo.insert("operation".into(), input_operation_tag(&input));
        Ok(Value::Object(undo))
    }

    fn apply_undo(&mut self, undo_data: &Value) -> Result<()> {
        let undo = undo_object(undo_data)?;
        match undo_action(undo)? {
            ACTION_REMOVE_EMAIL => {
                let id = undo_str(undo, "message_id")?;
                if self.emails.remove(id).is_none() {
                    return Err(Error::inconsistent(format!(
                        "cannot remove email '{id}': not present"
                    )));
                }
            }
            ACTION_RESTORE_EMAILS => {
                let previous: BTreeMap<String, Email> = undo_field(undo, "emails")?;
                for id in previous.keys() {
                    if !self.emails.contains_key(id) {
                        return Err(Error::inconsistent(format!(
                            "cannot restore email '{id}': not present"
                        )));
                    }
                }
                for (id, email) in previous {
                    self.emails.insert(id, email);
                }
            }
            ACTION_NOOP => {}
            action => return Err(unknown_undo_action(MODALITY, action)),
        }
        self.meta.restore(undo)
    }

    fn query(&self, params: &Value) -> Result<Value> {
        let q: EmailQuery = parse_query(params)?;
        let mut matches: Vec<&Email> = self
            .emails
            .values()
            .filter(|e| q.include_deleted || !e.is_deleted || q.folder.as_deref() == Some(FOLDER_TRASH))
            .filter(|e| q.folder.as_ref().map_or(true, |f| &e.folder == f))
            .filter(|e| q.is_read.map_or(true, |r| e.is_read == r))
            .filter(|e| q.is_starred.map_or(true, |s| e.is_starred == s))
            .filter(|e| q.from_address.as_ref().map_or(true, |a| &e.from_address == a))
            .filter(|e| q.label.as_ref().map_or(true, |l| e.labels.contains(l)))
            .filter(|e| q.thread_id.as_ref().map_or(true, |t| e.thread_id.as_ref() == Some(t)))
            .filter(|e| {
                q.search.as_ref().map_or(true, |s| {
                    let needle = s.to_lowercase();
                    e.subject.to_lowercase().contains(&needle)
                        || e.body_text.to_lowercase().contains(&needle)
                })
            })
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
            .map(|e| serde_json::to_value(e).expect("email serializes"))
            .collect();
        Ok(json!({
            "emails": page,
            "count": page.len(),
            "total_count": total_count,
        }))
    }

    fn snapshot(&self) -> Value {
        json!({
            "modality_type": MODALITY,
            "update_count": self.meta.update_count,
            "last_updated": self.meta.last_updated,
            "emails": self.emails,
            "folders": self.folder_index(),
            "threads": self.thread_index(),
            "labels": self.label_index(),
            "drafts": self.folder_index().remove(FOLDER_DRAFTS).unwrap_or_default(),
            "total_email_count": self.emails.len(),
            "unread_count": self.unread_count(),
        })
    }

    fn state_summary(&self) -> Value {
        json!({
            "total_email_count": self.emails.len(),
            "unread_count": self.unread_count(),
        })
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (key, email) in &self.emails {
            if key != &email.message_id {
                errors.push(format!(
                    "email key '{key}' does not match record id '{}'",
                    email.message_id
                ));
            }
            if email.folder.trim().is_empty() {
                errors.push(format!("email '{key}' has an empty folder"));
            }
            if email.to_addresses.is_empty() {
                errors.push(format!("email '{key}' has no recipients"));
            }
            if email.is_deleted && email.folder != FOLDER_TRASH {
                errors.push(format!(
                    "email '{key}' is deleted but lives in '{}'",
                    email.folder
                ));
            }
        }
        errors
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

fn input_operation_tag(input: &EmailInput) -> Value {
    let tag = match input {
        EmailInput::Send(_) => "send",
        EmailInput::Receive(_) => "receive",
        EmailInput::Read { .. } => "read",
        EmailInput::Unread { .. } => "unread",
        EmailInput::Star { .. } => "star",
        EmailInput::Unstar { .. } => "unstar",
        EmailInput::Archive { .. } => "archive",
        EmailInput::Delete { .. } => "delete",
        EmailInput::Move { .. } => "move",
        EmailInput::Label { .. } => "label",
        EmailInput::Unlabel { .. } => "unlabel",
    };
    Value::String(tag.to_string())
}
