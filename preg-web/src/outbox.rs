//! Durable submission outbox
//!
//! Submissions are written to the local `outbox` table before the user is
//! told they succeeded. A background worker drains due entries into the
//! record store, retrying with exponential backoff. Entries that exhaust
//! their attempts are parked as `failed` until an operator retries them.

use chrono::Utc;
use preg_common::config::OutboxConfig;
use preg_common::RegisteredPerson;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::store::RecordStore;

/// Entries fetched per drain pass
const DRAIN_BATCH: i64 = 32;

/// Outbox errors
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Retry policy for queued submissions
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &OutboxConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before the next try after `attempts` failures: `base * 2^(attempts-1)`, capped
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// One queued submission
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: String,
    pub attempts: u32,
    pub payload: String,
}

/// What happened to an entry after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Rescheduled { attempts: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// Queue counts for the operator view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxSummary {
    pub pending: i64,
    pub failed: i64,
}

/// SQLite-backed queue of submissions awaiting storage
#[derive(Clone)]
pub struct Outbox {
    db: SqlitePool,
    policy: RetryPolicy,
    wake: Arc<Notify>,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl Outbox {
    pub fn new(db: SqlitePool, policy: RetryPolicy) -> Self {
        Self {
            db,
            policy,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Persist a record for later storage and wake the worker
    ///
    /// Returns the outbox entry id once the record is on disk.
    pub async fn enqueue(&self, person: &RegisteredPerson) -> Result<String, OutboxError> {
        let id = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(person)?;

        sqlx::query(
            "INSERT INTO outbox (id, payload, status, attempts, next_attempt_at) \
             VALUES (?, ?, 'pending', 0, ?)",
        )
        .bind(&id)
        .bind(&payload)
        .bind(now_millis())
        .execute(&self.db)
        .await?;

        debug!(outbox_id = %id, "Queued submission");
        self.wake.notify_one();

        Ok(id)
    }

    /// Pending entries whose next attempt time has passed, oldest first
    pub async fn due(&self, limit: i64) -> Result<Vec<OutboxEntry>, OutboxError> {
        let rows = sqlx::query(
            "SELECT id, attempts, payload FROM outbox \
             WHERE status = 'pending' AND next_attempt_at <= ? \
             ORDER BY next_attempt_at ASC, created_at ASC LIMIT ?",
        )
        .bind(now_millis())
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| -> Result<OutboxEntry, OutboxError> {
                Ok(OutboxEntry {
                    id: row.try_get("id")?,
                    attempts: row.try_get::<i64, _>("attempts")?.max(0) as u32,
                    payload: row.try_get("payload")?,
                })
            })
            .collect()
    }

    /// Remove an entry that reached the record store
    pub async fn mark_done(&self, id: &str) -> Result<(), OutboxError> {
        sqlx::query("DELETE FROM outbox WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Record a failed attempt and either reschedule or park the entry
    pub async fn mark_failed(
        &self,
        entry: &OutboxEntry,
        reason: &str,
    ) -> Result<FailureOutcome, OutboxError> {
        let attempts = entry.attempts.saturating_add(1);

        if attempts >= self.policy.max_attempts {
            sqlx::query(
                "UPDATE outbox SET status = 'failed', attempts = ?, last_error = ? WHERE id = ?",
            )
            .bind(attempts as i64)
            .bind(reason)
            .bind(&entry.id)
            .execute(&self.db)
            .await?;

            return Ok(FailureOutcome::Exhausted { attempts });
        }

        let delay = self.policy.backoff(attempts);
        let next_attempt_at = now_millis() + delay.as_millis() as i64;

        sqlx::query(
            "UPDATE outbox SET attempts = ?, next_attempt_at = ?, last_error = ? WHERE id = ?",
        )
        .bind(attempts as i64)
        .bind(next_attempt_at)
        .bind(reason)
        .bind(&entry.id)
        .execute(&self.db)
        .await?;

        Ok(FailureOutcome::Rescheduled { attempts, delay })
    }

    pub async fn summary(&self) -> Result<OutboxSummary, OutboxError> {
        let row = sqlx::query(
            "SELECT \
               COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending, \
               COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed \
             FROM outbox",
        )
        .fetch_one(&self.db)
        .await?;

        Ok(OutboxSummary {
            pending: row.try_get("pending")?,
            failed: row.try_get("failed")?,
        })
    }

    /// Return every parked entry to the queue with a fresh attempt budget
    pub async fn retry_failed(&self) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            "UPDATE outbox SET status = 'pending', attempts = 0, next_attempt_at = ? \
             WHERE status = 'failed'",
        )
        .bind(now_millis())
        .execute(&self.db)
        .await?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            info!(requeued, "Requeued failed submissions");
            self.wake.notify_one();
        }

        Ok(requeued)
    }

    async fn woken(&self) {
        self.wake.notified().await
    }
}

/// Counts from one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub stored: usize,
    pub rescheduled: usize,
    pub exhausted: usize,
}

/// Background task moving outbox entries into the record store
pub struct OutboxWorker {
    outbox: Outbox,
    store: Arc<dyn RecordStore>,
    create_timeout: Duration,
    poll_interval: Duration,
}

impl OutboxWorker {
    pub fn new(
        outbox: Outbox,
        store: Arc<dyn RecordStore>,
        create_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            outbox,
            store,
            create_timeout,
            poll_interval,
        }
    }

    pub fn from_config(outbox: Outbox, store: Arc<dyn RecordStore>, config: &OutboxConfig) -> Self {
        Self::new(
            outbox,
            store,
            Duration::from_secs(config.create_timeout_secs.max(1)),
            Duration::from_millis(config.poll_interval_ms.max(10)),
        )
    }

    /// Drain until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        info!("Outbox worker started");

        loop {
            if let Err(e) = self.drain_once().await {
                error!(error = %e, "Outbox drain failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.outbox.woken() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Outbox worker stopped");
    }

    /// Attempt every due entry once
    pub async fn drain_once(&self) -> Result<DrainReport, OutboxError> {
        let mut report = DrainReport::default();

        for entry in self.outbox.due(DRAIN_BATCH).await? {
            match self.store_entry(&entry).await {
                Ok(record_id) => {
                    self.outbox.mark_done(&entry.id).await?;
                    info!(outbox_id = %entry.id, record_id = %record_id, "Stored submission");
                    report.stored += 1;
                }
                Err(reason) => match self.outbox.mark_failed(&entry, &reason).await? {
                    FailureOutcome::Rescheduled { attempts, delay } => {
                        warn!(
                            outbox_id = %entry.id,
                            attempt = attempts,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %reason,
                            "Submission write failed, will retry"
                        );
                        report.rescheduled += 1;
                    }
                    FailureOutcome::Exhausted { attempts } => {
                        warn!(
                            outbox_id = %entry.id,
                            attempts,
                            error = %reason,
                            "Submission write failed permanently, parked for manual retry"
                        );
                        report.exhausted += 1;
                    }
                },
            }
        }

        Ok(report)
    }

    async fn store_entry(&self, entry: &OutboxEntry) -> Result<String, String> {
        let person: RegisteredPerson =
            serde_json::from_str(&entry.payload).map_err(|e| format!("Corrupt payload: {e}"))?;

        match tokio::time::timeout(self.create_timeout, self.store.create(&person)).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "Create timed out after {}s",
                self.create_timeout.as_secs()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Cursor, Page, StoreError};
    use async_trait::async_trait;
    use preg_common::db::init::init_database;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Store that fails the first `failures` creates, then records the rest
    #[derive(Default)]
    struct FlakyStore {
        failures: AtomicUsize,
        created: Mutex<Vec<RegisteredPerson>>,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn create(&self, person: &RegisteredPerson) -> Result<String, StoreError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("offline".into()));
            }
            let mut created = self.created.lock().unwrap();
            created.push(person.clone());
            Ok(format!("rec-{}", created.len()))
        }

        async fn page(&self, _after: Option<&Cursor>, _limit: usize) -> Result<Page, StoreError> {
            unimplemented!()
        }

        async fn all(&self) -> Result<Vec<RegisteredPerson>, StoreError> {
            Ok(self.created.lock().unwrap().clone())
        }
    }

    /// Store whose create never completes
    struct HangingStore;

    #[async_trait]
    impl RecordStore for HangingStore {
        async fn create(&self, _person: &RegisteredPerson) -> Result<String, StoreError> {
            std::future::pending().await
        }

        async fn page(&self, _after: Option<&Cursor>, _limit: usize) -> Result<Page, StoreError> {
            unimplemented!()
        }

        async fn all(&self) -> Result<Vec<RegisteredPerson>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn immediate_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    async fn setup(policy: RetryPolicy) -> (TempDir, Outbox) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("preg.db")).await.unwrap();
        (dir, Outbox::new(pool, policy))
    }

    fn person(name: &str) -> RegisteredPerson {
        RegisteredPerson {
            full_name: name.to_string(),
            phone: "0788000000".to_string(),
            district: "Gasabo".to_string(),
            sector: "Remera".to_string(),
            cell: "Rukiri I".to_string(),
            village: "Amahoro".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 8,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(3000),
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_millis(3000));
        assert_eq!(policy.backoff(60), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_enqueue_is_due_immediately() {
        let (_dir, outbox) = setup(immediate_policy(3)).await;
        let id = outbox.enqueue(&person("Keza")).await.unwrap();

        let due = outbox.due(10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
        assert_eq!(due[0].attempts, 0);
        assert_eq!(outbox.summary().await.unwrap(), OutboxSummary { pending: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_drain_stores_and_removes() {
        let (_dir, outbox) = setup(immediate_policy(3)).await;
        let store = Arc::new(FlakyStore::default());
        let worker = OutboxWorker::new(
            outbox.clone(),
            store.clone(),
            Duration::from_secs(5),
            Duration::from_millis(50),
        );

        outbox.enqueue(&person("Keza")).await.unwrap();
        outbox.enqueue(&person("Mugisha")).await.unwrap();

        let report = worker.drain_once().await.unwrap();
        assert_eq!(report.stored, 2);
        assert_eq!(store.created.lock().unwrap().len(), 2);
        assert_eq!(outbox.summary().await.unwrap(), OutboxSummary::default());
    }

    #[tokio::test]
    async fn test_failure_is_retried_until_stored() {
        let (_dir, outbox) = setup(immediate_policy(5)).await;
        let store = Arc::new(FlakyStore {
            failures: AtomicUsize::new(2),
            ..Default::default()
        });
        let worker = OutboxWorker::new(
            outbox.clone(),
            store.clone(),
            Duration::from_secs(5),
            Duration::from_millis(50),
        );

        outbox.enqueue(&person("Keza")).await.unwrap();

        assert_eq!(worker.drain_once().await.unwrap().rescheduled, 1);
        assert_eq!(worker.drain_once().await.unwrap().rescheduled, 1);
        assert_eq!(worker.drain_once().await.unwrap().stored, 1);

        let created = store.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].full_name, "Keza");
    }

    #[tokio::test]
    async fn test_backoff_delays_next_attempt() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(600),
        };
        let (_dir, outbox) = setup(policy).await;
        outbox.enqueue(&person("Keza")).await.unwrap();

        let entry = outbox.due(10).await.unwrap().remove(0);
        let outcome = outbox.mark_failed(&entry, "offline").await.unwrap();
        assert_eq!(
            outcome,
            FailureOutcome::Rescheduled {
                attempts: 1,
                delay: Duration::from_secs(60)
            }
        );

        assert!(outbox.due(10).await.unwrap().is_empty());
        assert_eq!(outbox.summary().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_exhausted_entries_park_and_can_be_retried() {
        let (_dir, outbox) = setup(immediate_policy(2)).await;
        let store = Arc::new(FlakyStore {
            failures: AtomicUsize::new(2),
            ..Default::default()
        });
        let worker = OutboxWorker::new(
            outbox.clone(),
            store.clone(),
            Duration::from_secs(5),
            Duration::from_millis(50),
        );

        outbox.enqueue(&person("Keza")).await.unwrap();
        assert_eq!(worker.drain_once().await.unwrap().rescheduled, 1);
        assert_eq!(worker.drain_once().await.unwrap().exhausted, 1);
        assert_eq!(outbox.summary().await.unwrap(), OutboxSummary { pending: 0, failed: 1 });

        // Parked entries are not picked up again
        assert_eq!(worker.drain_once().await.unwrap(), DrainReport::default());

        assert_eq!(outbox.retry_failed().await.unwrap(), 1);
        assert_eq!(outbox.summary().await.unwrap(), OutboxSummary { pending: 1, failed: 0 });
        assert_eq!(worker.drain_once().await.unwrap().stored, 1);
    }

    #[tokio::test]
    async fn test_hanging_create_times_out() {
        let (_dir, outbox) = setup(immediate_policy(3)).await;
        let worker = OutboxWorker::new(
            outbox.clone(),
            Arc::new(HangingStore),
            Duration::from_millis(20),
            Duration::from_millis(50),
        );

        outbox.enqueue(&person("Keza")).await.unwrap();
        let report = worker.drain_once().await.unwrap();
        assert_eq!(report.rescheduled, 1);
        assert_eq!(outbox.summary().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_not_stored() {
        let (_dir, outbox) = setup(immediate_policy(1)).await;
        sqlx::query(
            "INSERT INTO outbox (id, payload, status, attempts, next_attempt_at) \
             VALUES ('bad', 'not json', 'pending', 0, 0)",
        )
        .execute(&outbox.db)
        .await
        .unwrap();

        let store = Arc::new(FlakyStore::default());
        let worker = OutboxWorker::new(
            outbox.clone(),
            store.clone(),
            Duration::from_secs(5),
            Duration::from_millis(50),
        );

        assert_eq!(worker.drain_once().await.unwrap().exhausted, 1);
        assert!(store.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_wakes_on_enqueue_and_stops_on_cancel() {
        let (_dir, outbox) = setup(immediate_policy(3)).await;
        let store = Arc::new(FlakyStore::default());
        // Long poll interval: only the enqueue notification can wake it in time
        let worker = OutboxWorker::new(
            outbox.clone(),
            store.clone(),
            Duration::from_secs(5),
            Duration::from_secs(3600),
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker.run(cancel.clone()));

        outbox.enqueue(&person("Keza")).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.created.lock().unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "worker never stored the entry");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
