use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted entry describing a processed email.
///
/// Only `message_id` and `timestamp` are required; everything else the
/// caller supplies rides along opaquely and comes back verbatim on read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Primary dedup key (the backend's message id).
    pub message_id: String,
    /// Creation time; drives retention.
    pub timestamp: DateTime<Utc>,
    /// Content fingerprint used for cross-record duplicate detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_hash: Option<String>,
    /// Conversation the message belongs to, when the backend exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Caller-supplied fields preserved opaquely (subject, sender, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Record {
    /// New record stamped with the current time.
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            timestamp: Utc::now(),
            message_hash: None,
            thread_id: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_message_hash(mut self, hash: impl Into<String>) -> Self {
        self.message_hash = Some(hash.into());
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// A record is storable only if it carries a usable message id.
    pub fn is_valid(&self) -> bool {
        !self.message_id.trim().is_empty()
    }
}
