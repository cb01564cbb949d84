//! Unread-mail triage over a [`ProcessedStore`]: dedup by message id, by
//! thread, and by content fingerprint, then handler dispatch and
//! mark-as-processed. Storage trouble on one message never stops the pass.

use anyhow::Result;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use mailsift_core::{
    mail::{Disposition, EmailHandler, EmailMessage, MailSource},
    record::Record,
    store::ProcessedStore,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

/// Outcome of one triage pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TriageReport {
    /// Messages handled this pass (recorded or deliberately kept unread).
    pub processed: usize,
    /// Messages that hit an error and were skipped for safety.
    pub errors: usize,
    /// One line per error, for the operator.
    pub messages: Vec<String>,
}

/// Drives one mail source through one handler, using the store for
/// idempotency. Generic over all three seams so tests can swap any of them.
pub struct TriagePipeline<M, H, S> {
    mail: M,
    handler: H,
    store: S,
}

impl<M: MailSource, H: EmailHandler, S: ProcessedStore> TriagePipeline<M, H, S> {
    pub fn new(mail: M, handler: H, store: S) -> Self {
        Self {
            mail,
            handler,
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Process every unread message once. A failure on a single message is
    /// logged and counted; the pass keeps going.
    #[instrument(skip_all)]
    pub async fn process_unread(&self) -> Result<TriageReport> {
        let mut report = TriageReport::default();
        let unread = self.mail.unread().await?;
        info!(count = unread.len(), "fetched unread messages");

        for email in unread {
            match self.triage_one(&email).await {
                Ok(true) => report.processed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(message_id = %email.message_id, "triage failed: {err}");
                    report.errors += 1;
                    report.messages.push(format!("{}: {err}", email.message_id));
                }
            }
        }

        info!(
            processed = report.processed,
            errors = report.errors,
            "triage pass complete"
        );
        Ok(report)
    }

    /// Returns `Ok(true)` when the message was handled this pass,
    /// `Ok(false)` when it was skipped as already processed or duplicate.
    async fn triage_one(&self, email: &EmailMessage) -> Result<bool> {
        if self.store.is_processed(&email.message_id)? {
            debug!(message_id = %email.message_id, "already processed, skipping");
            return Ok(false);
        }

        // A reply anywhere in the conversation counts as handled.
        for thread_msg in &email.thread_messages {
            if self.store.is_processed(thread_msg)? {
                info!(
                    message_id = %email.message_id,
                    thread_msg = %thread_msg,
                    "thread already has a processed message, skipping"
                );
                return Ok(false);
            }
        }

        let hash = content_hash(email);
        if self.is_duplicate(email, &hash)? {
            return Ok(false);
        }

        match self.handler.handle(email).await? {
            Disposition::MarkRead => {
                // Flag read at the backend first; only then record it, so a
                // record always means the backend state was updated.
                self.mail.mark_read(&email.message_id).await?;
                self.store.add_record(to_record(email, hash), false)?;
            }
            Disposition::LeaveUnread => {
                self.mail.mark_unread(&email.message_id).await?;
            }
        }
        Ok(true)
    }

    /// Scan the full collection for a record sharing this fingerprint, or
    /// an earlier response in the same thread.
    fn is_duplicate(&self, email: &EmailMessage, hash: &str) -> Result<bool> {
        for record in self.store.records()? {
            if record.message_hash.as_deref() == Some(hash) {
                info!(message_id = %email.message_id, "duplicate content fingerprint, skipping");
                return Ok(true);
            }
            if let (Some(thread), Some(recorded)) =
                (email.thread_id.as_deref(), record.thread_id.as_deref())
            {
                if thread == recorded {
                    info!(
                        message_id = %email.message_id,
                        thread_id = %thread,
                        "already responded in this thread, skipping"
                    );
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// Fingerprint for cross-record duplicate detection: subject, sender,
/// sorted recipients, and thread id hashed together. Recipients are sorted
/// so ordering differences between fetches do not change the hash.
pub fn content_hash(email: &EmailMessage) -> String {
    let mut recipients = email.recipients.clone();
    recipients.sort();

    let mut hasher = Sha256::new();
    hasher.update(email.subject.as_bytes());
    hasher.update(email.sender.as_bytes());
    hasher.update(recipients.join(",").as_bytes());
    hasher.update(email.thread_id.as_deref().unwrap_or_default().as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn to_record(email: &EmailMessage, hash: String) -> Record {
    let mut record = Record::new(&email.message_id)
        .with_message_hash(hash)
        .with_extra("subject", serde_json::json!(email.subject))
        .with_extra("sender", serde_json::json!(email.sender))
        .with_extra("received_at", serde_json::json!(email.received_at));
    if let Some(thread_id) = &email.thread_id {
        record = record.with_thread_id(thread_id);
    }
    record
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use mailsift_core::{
        error::StoreError,
        mail::{AcknowledgeHandler, StaticMailSource},
        store::InMemoryProcessedStore,
    };

    use super::*;

    fn email(id: &str, subject: &str) -> EmailMessage {
        EmailMessage::new(id, subject, "alice@example.com")
            .with_recipients(vec!["me@example.com".into()])
    }

    #[tokio::test]
    async fn records_and_marks_read_every_new_message() {
        let source = StaticMailSource::new(vec![email("m1", "One"), email("m2", "Two")]);
        let pipeline = TriagePipeline::new(
            source.clone(),
            AcknowledgeHandler,
            InMemoryProcessedStore::new(),
        );

        let report = pipeline.process_unread().await.expect("pass");

        assert_eq!(report.processed, 2);
        assert_eq!(report.errors, 0);
        assert_eq!(source.read_ids(), vec!["m1".to_string(), "m2".to_string()]);
        assert!(pipeline.store().is_processed("m1").expect("check"));
        assert!(pipeline.store().is_processed("m2").expect("check"));
    }

    #[tokio::test]
    async fn skips_already_processed_messages() {
        let store = InMemoryProcessedStore::new();
        store
            .add_record(Record::new("m1"), false)
            .expect("pre-seed record");

        let source = StaticMailSource::new(vec![email("m1", "One")]);
        let pipeline = TriagePipeline::new(source.clone(), AcknowledgeHandler, store);

        let report = pipeline.process_unread().await.expect("pass");

        assert_eq!(report.processed, 0);
        assert!(source.read_ids().is_empty());
    }

    #[tokio::test]
    async fn skips_when_another_thread_message_was_processed() {
        let store = InMemoryProcessedStore::new();
        store
            .add_record(Record::new("earlier"), false)
            .expect("pre-seed record");

        let incoming = email("m1", "Re: One").with_thread("t1", vec!["earlier".into()]);
        let source = StaticMailSource::new(vec![incoming]);
        let pipeline = TriagePipeline::new(source.clone(), AcknowledgeHandler, store);

        let report = pipeline.process_unread().await.expect("pass");

        assert_eq!(report.processed, 0);
        assert!(source.read_ids().is_empty());
    }

    #[tokio::test]
    async fn skips_duplicate_content_under_a_different_message_id() {
        // Same subject, sender, and recipients: identical fingerprint.
        let source = StaticMailSource::new(vec![email("m1", "Same"), email("m2", "Same")]);
        let pipeline = TriagePipeline::new(
            source.clone(),
            AcknowledgeHandler,
            InMemoryProcessedStore::new(),
        );

        let report = pipeline.process_unread().await.expect("pass");

        assert_eq!(report.processed, 1);
        assert_eq!(source.read_ids(), vec!["m1".to_string()]);
        assert!(!pipeline.store().is_processed("m2").expect("check"));
    }

    #[tokio::test]
    async fn skips_a_second_message_in_a_recorded_thread() {
        let source = StaticMailSource::new(vec![
            email("m1", "One").with_thread("t1", vec![]),
            email("m2", "Completely different").with_thread("t1", vec![]),
        ]);
        let pipeline = TriagePipeline::new(
            source.clone(),
            AcknowledgeHandler,
            InMemoryProcessedStore::new(),
        );

        let report = pipeline.process_unread().await.expect("pass");

        assert_eq!(report.processed, 1);
        assert_eq!(source.read_ids(), vec!["m1".to_string()]);
    }

    struct DeferHandler;

    #[async_trait]
    impl EmailHandler for DeferHandler {
        fn name(&self) -> &'static str {
            "defer"
        }

        async fn handle(&self, _email: &EmailMessage) -> Result<Disposition> {
            Ok(Disposition::LeaveUnread)
        }
    }

    #[tokio::test]
    async fn deferred_messages_stay_unread_and_unrecorded() {
        let source = StaticMailSource::new(vec![email("m1", "One")]);
        let pipeline =
            TriagePipeline::new(source.clone(), DeferHandler, InMemoryProcessedStore::new());

        let report = pipeline.process_unread().await.expect("pass");

        assert_eq!(report.processed, 1);
        assert_eq!(source.kept_unread_ids(), vec!["m1".to_string()]);
        assert!(!pipeline.store().is_processed("m1").expect("check"));
    }

    /// Store that fails every operation, simulating an unrecoverable
    /// corruption the pipeline must survive.
    struct BrokenStore;

    impl ProcessedStore for BrokenStore {
        fn add_record(&self, _record: Record, _force_cleanup: bool) -> Result<String, StoreError> {
            Err(StoreError::StorageCorrupted)
        }

        fn is_processed(&self, _message_id: &str) -> Result<bool, StoreError> {
            Err(StoreError::StorageCorrupted)
        }

        fn record_count(&self) -> Result<usize, StoreError> {
            Err(StoreError::StorageCorrupted)
        }

        fn rotate_key(&self) -> Result<(), StoreError> {
            Err(StoreError::StorageCorrupted)
        }

        fn records(&self) -> Result<Vec<Record>, StoreError> {
            Err(StoreError::StorageCorrupted)
        }
    }

    #[tokio::test]
    async fn storage_failures_are_counted_not_fatal() {
        let source = StaticMailSource::new(vec![email("m1", "One"), email("m2", "Two")]);
        let pipeline = TriagePipeline::new(source.clone(), AcknowledgeHandler, BrokenStore);

        let report = pipeline.process_unread().await.expect("pass still completes");

        assert_eq!(report.processed, 0);
        assert_eq!(report.errors, 2);
        assert_eq!(report.messages.len(), 2);
        // Nothing was flagged read: skip-for-safety on storage trouble.
        assert!(source.read_ids().is_empty());
    }

    #[test]
    fn content_hash_ignores_recipient_ordering() {
        let a = email("m1", "Same").with_recipients(vec!["x@e.com".into(), "y@e.com".into()]);
        let b = email("m2", "Same").with_recipients(vec!["y@e.com".into(), "x@e.com".into()]);
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn content_hash_differs_when_the_thread_differs() {
        let a = email("m1", "Same").with_thread("t1", vec![]);
        let b = email("m2", "Same").with_thread("t2", vec![]);
        assert_ne!(content_hash(&a), content_hash(&b));
    }
}
