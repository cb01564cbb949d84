use chrono::{DateTime, Duration, Utc};
use mailsift_core::record::Record;
use tracing::debug;

/// How long a record may live before a forced cleanup removes it.
///
/// Pruning happens only when the caller opts in on `add_record`; there is
/// no background scheduler.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    max_age: Duration,
}

impl RetentionPolicy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn days(days: i64) -> Self {
        Self::new(Duration::days(days))
    }

    /// Drop every record strictly older than the window, relative to `now`.
    pub fn prune(&self, records: Vec<Record>, now: DateTime<Utc>) -> Vec<Record> {
        let cutoff = now - self.max_age;
        let before = records.len();
        let kept: Vec<Record> = records
            .into_iter()
            .filter(|record| record.timestamp >= cutoff)
            .collect();
        if kept.len() < before {
            debug!(removed = before - kept.len(), "pruned expired records");
        }
        kept
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::days(30)
    }
}
