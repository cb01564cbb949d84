use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fetched message, normalized from whatever backend supplied it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailMessage {
    pub message_id: String,
    /// Conversation id, when the backend exposes one.
    pub thread_id: Option<String>,
    /// Ids of the other messages in the same conversation.
    #[serde(default)]
    pub thread_messages: Vec<String>,
    pub subject: String,
    pub sender: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub received_at: DateTime<Utc>,
}

impl EmailMessage {
    pub fn new(
        message_id: impl Into<String>,
        subject: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            thread_id: None,
            thread_messages: Vec::new(),
            subject: subject.into(),
            sender: sender.into(),
            recipients: Vec::new(),
            received_at: Utc::now(),
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>, thread_messages: Vec<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self.thread_messages = thread_messages;
        self
    }

    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }
}

/// Contract for any unread-mail backend (IMAP, Gmail API, test fixture).
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Fetch the messages currently marked unread.
    async fn unread(&self) -> Result<Vec<EmailMessage>>;

    /// Flag a message read at the backend.
    async fn mark_read(&self, message_id: &str) -> Result<()>;

    /// Flag a message unread at the backend.
    async fn mark_unread(&self, message_id: &str) -> Result<()>;
}

/// What the pipeline should do with a message after handling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The message was dealt with; flag it read and record it.
    MarkRead,
    /// Leave the message for the human; keep it unread and unrecorded.
    LeaveUnread,
}

/// Contract for whatever decides an action for one message (a rules
/// engine, a classifier, an LLM agent).
#[async_trait]
pub trait EmailHandler: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    async fn handle(&self, email: &EmailMessage) -> Result<Disposition>;
}

/// Handler that accepts every message; useful for tests and offline smoke runs.
pub struct AcknowledgeHandler;

#[async_trait]
impl EmailHandler for AcknowledgeHandler {
    fn name(&self) -> &'static str {
        "ack"
    }

    async fn handle(&self, _email: &EmailMessage) -> Result<Disposition> {
        Ok(Disposition::MarkRead)
    }
}

/// Mail source serving a fixed set of messages and remembering status
/// changes, for tests and offline smoke runs.
#[derive(Debug, Default, Clone)]
pub struct StaticMailSource {
    inner: Arc<Mutex<StaticInner>>,
}

#[derive(Debug, Default)]
struct StaticInner {
    emails: Vec<EmailMessage>,
    read: Vec<String>,
    kept_unread: Vec<String>,
}

impl StaticMailSource {
    pub fn new(emails: Vec<EmailMessage>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StaticInner {
                emails,
                read: Vec::new(),
                kept_unread: Vec::new(),
            })),
        }
    }

    /// Ids flagged read so far.
    pub fn read_ids(&self) -> Vec<String> {
        self.inner.lock().map(|i| i.read.clone()).unwrap_or_default()
    }

    /// Ids explicitly kept unread so far.
    pub fn kept_unread_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|i| i.kept_unread.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MailSource for StaticMailSource {
    async fn unread(&self) -> Result<Vec<EmailMessage>> {
        let inner = self
            .inner
            .lock()
            .map_err(|err| anyhow::anyhow!("lock poisoned: {err}"))?;
        Ok(inner.emails.clone())
    }

    async fn mark_read(&self, message_id: &str) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|err| anyhow::anyhow!("lock poisoned: {err}"))?;
        inner.read.push(message_id.to_string());
        Ok(())
    }

    async fn mark_unread(&self, message_id: &str) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|err| anyhow::anyhow!("lock poisoned: {err}"))?;
        inner.kept_unread.push(message_id.to_string());
        Ok(())
    }
}
