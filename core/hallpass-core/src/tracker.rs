//! The attendance state machine driver.
//!
//! `AttendanceTracker` is the single owner of the read-decide-write toggle
//! sequence. It is constructed once at process start with its store handle
//! and passed to whatever needs it; there is no module-level singleton.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{PassError, Result};
use crate::store::AttendanceStore;
use crate::transition::next_transition;
use crate::types::{AttendanceRecord, LogAction, StudentIdentity};

/// Bounded retries for a toggle that keeps losing its conditional write to
/// concurrent scans of the same identity.
const TOGGLE_RETRY_LIMIT: usize = 3;

/// What a toggle did, for the scanning station's feedback.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ToggleOutcome {
    pub action: LogAction,
    pub student_name: String,
    pub period: String,
    /// Populated on an In transition that closed a prior Out.
    pub duration_ms: Option<i64>,
    pub record: AttendanceRecord,
}

/// Owns toggle decisions against a persistence collaborator.
pub struct AttendanceTracker {
    store: Arc<dyn AttendanceStore>,
}

impl AttendanceTracker {
    pub fn new(store: Arc<dyn AttendanceStore>) -> Self {
        AttendanceTracker { store }
    }

    pub fn store(&self) -> &Arc<dyn AttendanceStore> {
        &self.store
    }

    /// Flips a student between In and Out and records the event.
    ///
    /// Each call is a full read-decide-write: the record is re-read on every
    /// attempt and written with a conditional swap against the value that was
    /// read, so two near-simultaneous scans of the same identity can never
    /// both apply the same transition. The record write is authoritative; a
    /// failed log append is reported but does not fail the toggle.
    pub async fn toggle(
        &self,
        identity: &StudentIdentity,
        now: DateTime<Utc>,
    ) -> Result<ToggleOutcome> {
        for attempt in 0..TOGGLE_RETRY_LIMIT {
            let current = self.store.get_record(&identity.unique_id).await?;
            let transition = next_transition(identity, current.as_ref(), now);

            let written = self
                .store
                .put_record_if(
                    &identity.unique_id,
                    current.as_ref(),
                    transition.record.clone(),
                )
                .await?;
            if !written {
                debug!(
                    unique_id = %identity.unique_id,
                    attempt,
                    "Concurrent toggle detected, re-reading record"
                );
                continue;
            }

            let entry = transition.entry;
            let outcome = ToggleOutcome {
                action: entry.action,
                student_name: identity.student_name.clone(),
                period: identity.period_name.clone(),
                duration_ms: entry.duration_ms,
                record: transition.record,
            };

            if let Err(err) = self.store.append_log(entry).await {
                // The record is the source of truth for the next toggle;
                // losing one audit entry must not fail the scan.
                warn!(
                    unique_id = %identity.unique_id,
                    error = %err,
                    "Log append failed after record write"
                );
            }

            return Ok(outcome);
        }

        Err(PassError::WriteConflict(identity.unique_id.clone()))
    }

    /// Administrative bulk clear of the audit log.
    pub async fn delete_all_logs(&self) -> Result<()> {
        self.store.delete_all_logs().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateStore;
    use crate::types::AttendanceStatus;
    use chrono::TimeZone;

    fn identity() -> StudentIdentity {
        StudentIdentity {
            unique_id: "red_regular_qr_01_P1".to_string(),
            student_name: "Student A1".to_string(),
            code: "qr_01".to_string(),
            period_name: "P1".to_string(),
            period_end_time: "09:13".to_string(),
            schedule_key: "red_regular".to_string(),
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 8, hour, minute, 0).unwrap()
    }

    fn tracker() -> AttendanceTracker {
        AttendanceTracker::new(Arc::new(StateStore::new_in_memory()))
    }

    #[tokio::test]
    async fn test_first_toggle_marks_out() {
        let tracker = tracker();
        let outcome = tracker.toggle(&identity(), at(8, 0)).await.unwrap();

        assert_eq!(outcome.action, LogAction::Out);
        assert_eq!(outcome.duration_ms, None);
        assert_eq!(outcome.record.status, AttendanceStatus::Out);

        let stored = tracker
            .store()
            .get_record("red_regular_qr_01_P1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AttendanceStatus::Out);
        assert_eq!(stored.out_timestamp, Some(at(8, 0)));

        let logs = tracker.store().logs(None, None).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, LogAction::Out);
        assert_eq!(logs[0].out_time, Some(at(8, 0)));
        assert_eq!(logs[0].duration_ms, None);
    }

    #[tokio::test]
    async fn test_toggle_pair_yields_out_then_in_with_duration() {
        let tracker = tracker();
        let first = tracker.toggle(&identity(), at(8, 0)).await.unwrap();
        let second = tracker.toggle(&identity(), at(8, 5)).await.unwrap();

        assert_eq!(first.action, LogAction::Out);
        assert_eq!(second.action, LogAction::In);
        assert_eq!(second.duration_ms, Some(300_000));

        let logs = tracker.store().logs(None, None).await.unwrap();
        assert_eq!(logs.len(), 2);
        let in_entry = &logs[1];
        assert_eq!(in_entry.action, LogAction::In);
        assert_eq!(in_entry.out_time, Some(at(8, 0)));
        assert_eq!(in_entry.in_time, Some(at(8, 5)));
        assert_eq!(in_entry.duration_ms, Some(300_000));
    }

    #[tokio::test]
    async fn test_invariant_holds_after_any_toggle_sequence() {
        let tracker = tracker();
        for minute in 0..7 {
            tracker.toggle(&identity(), at(8, minute)).await.unwrap();
            for record in tracker.store().all_records().await.unwrap().values() {
                assert!(record.invariant_holds());
            }
        }
    }

    #[tokio::test]
    async fn test_toggles_of_distinct_identities_are_independent() {
        let tracker = tracker();
        let mut other = identity();
        other.unique_id = "red_regular_qr_02_P1".to_string();
        other.code = "qr_02".to_string();
        other.student_name = "Student A2".to_string();

        tracker.toggle(&identity(), at(8, 0)).await.unwrap();
        tracker.toggle(&other, at(8, 1)).await.unwrap();
        tracker.toggle(&identity(), at(8, 2)).await.unwrap();

        let records = tracker.store().all_records().await.unwrap();
        assert_eq!(
            records.get("red_regular_qr_01_P1").unwrap().status,
            AttendanceStatus::In
        );
        assert_eq!(
            records.get("red_regular_qr_02_P1").unwrap().status,
            AttendanceStatus::Out
        );
    }

    #[tokio::test]
    async fn test_concurrent_toggles_of_same_identity_pair_up() {
        // Many racing toggles: the CAS loop must serialize them so every Out
        // is closed by exactly one In (an even count ends In).
        let tracker = Arc::new(tracker());
        let mut handles = Vec::new();
        for i in 0..8u32 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                tracker.toggle(&identity(), at(8, i)).await
            }));
        }

        let mut actions = Vec::new();
        for handle in handles {
            actions.push(handle.await.unwrap().unwrap().action);
        }

        let outs = actions.iter().filter(|a| **a == LogAction::Out).count();
        let ins = actions.iter().filter(|a| **a == LogAction::In).count();
        assert_eq!(outs, 4);
        assert_eq!(ins, 4);

        let record = tracker
            .store()
            .get_record("red_regular_qr_01_P1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, AttendanceStatus::In);
        assert!(record.invariant_holds());
    }

    use crate::store::{ConditionalWrite, StoreEvent};
    use crate::types::LogEntry;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    /// Wraps a real store to fail the first N conditional writes (as if a
    /// concurrent scanner won the race) and optionally every log append.
    struct ContendedStore {
        inner: StateStore,
        reject_puts: AtomicUsize,
        fail_log_appends: bool,
    }

    impl ContendedStore {
        fn new(reject_puts: usize, fail_log_appends: bool) -> Self {
            ContendedStore {
                inner: StateStore::new_in_memory(),
                reject_puts: AtomicUsize::new(reject_puts),
                fail_log_appends,
            }
        }
    }

    #[async_trait::async_trait]
    impl AttendanceStore for ContendedStore {
        async fn get_record(&self, unique_id: &str) -> Result<Option<AttendanceRecord>> {
            self.inner.get_record(unique_id).await
        }

        async fn put_record_if(
            &self,
            unique_id: &str,
            expected: Option<&AttendanceRecord>,
            record: AttendanceRecord,
        ) -> Result<bool> {
            let remaining = self.reject_puts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.reject_puts.store(remaining - 1, Ordering::SeqCst);
                return Ok(false);
            }
            self.inner.put_record_if(unique_id, expected, record).await
        }

        async fn append_log(&self, entry: LogEntry) -> Result<()> {
            if self.fail_log_appends {
                return Err(PassError::PersistenceUnavailable {
                    context: "append log".to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
                });
            }
            self.inner.append_log(entry).await
        }

        async fn batch_commit(
            &self,
            writes: Vec<ConditionalWrite>,
            logs: Vec<LogEntry>,
        ) -> Result<usize> {
            self.inner.batch_commit(writes, logs).await
        }

        async fn all_records(&self) -> Result<HashMap<String, AttendanceRecord>> {
            self.inner.all_records().await
        }

        async fn logs(&self, from: Option<&str>, to: Option<&str>) -> Result<Vec<LogEntry>> {
            self.inner.logs(from, to).await
        }

        async fn delete_all_logs(&self) -> Result<()> {
            self.inner.delete_all_logs().await
        }

        fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
            self.inner.subscribe()
        }
    }

    #[tokio::test]
    async fn test_toggle_retries_lost_conditional_writes() {
        let tracker = AttendanceTracker::new(Arc::new(ContendedStore::new(2, false)));
        let outcome = tracker.toggle(&identity(), at(8, 0)).await.unwrap();
        assert_eq!(outcome.action, LogAction::Out);
    }

    #[tokio::test]
    async fn test_toggle_gives_up_after_retry_limit() {
        let tracker = AttendanceTracker::new(Arc::new(ContendedStore::new(usize::MAX, false)));
        let err = tracker.toggle(&identity(), at(8, 0)).await.unwrap_err();
        assert!(matches!(err, PassError::WriteConflict(_)));
    }

    #[tokio::test]
    async fn test_log_append_failure_does_not_fail_the_toggle() {
        let store = Arc::new(ContendedStore::new(0, true));
        let tracker = AttendanceTracker::new(Arc::clone(&store) as Arc<dyn AttendanceStore>);

        let outcome = tracker.toggle(&identity(), at(8, 0)).await.unwrap();
        assert_eq!(outcome.action, LogAction::Out);

        // Record write stuck even though the audit entry was lost.
        let record = store
            .get_record("red_regular_qr_01_P1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, AttendanceStatus::Out);
        assert!(store.logs(None, None).await.unwrap().is_empty());

        // The next toggle still reads the authoritative record.
        let second = tracker.toggle(&identity(), at(8, 5)).await.unwrap();
        assert_eq!(second.action, LogAction::In);
        assert_eq!(second.duration_ms, Some(300_000));
    }

    #[tokio::test]
    async fn test_delete_all_logs_keeps_records() {
        let tracker = tracker();
        tracker.toggle(&identity(), at(8, 0)).await.unwrap();
        tracker.delete_all_logs().await.unwrap();

        assert!(tracker.store().logs(None, None).await.unwrap().is_empty());
        assert!(tracker
            .store()
            .get_record("red_regular_qr_01_P1")
            .await
            .unwrap()
            .is_some());
    }
}
