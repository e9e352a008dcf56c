//! Period-end auto-reset sweep.
//!
//! Students who walk out near the bell and never scan back in would stay
//! Out forever; the sweep forces them back to In once their period has
//! ended, with a log entry tagged as an automatic reset. Runs on a periodic
//! timer owned by the daemon; one failed pass is simply retried on the next
//! tick.

use chrono::{DateTime, NaiveTime, Utc};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::schedule::{is_period_ended, ScheduleConfig};
use crate::store::{AttendanceStore, ConditionalWrite};
use crate::transition::auto_reset_transition;
use crate::types::{parse_schedule_key, AttendanceStatus};

/// Forces every Out record whose owning period has ended back to In, as a
/// single conditional batch. Returns the number of records reset.
///
/// Each staged write carries the record value observed during the scan, so
/// a manual toggle racing the sweep aborts the whole batch; the next tick
/// re-reads and tries again. Records that are already In, records whose
/// period is still running, and records whose stored schedule or period no
/// longer resolves against the configuration are left untouched.
pub async fn sweep(
    store: &dyn AttendanceStore,
    config: &ScheduleConfig,
    time_of_day: NaiveTime,
    now: DateTime<Utc>,
) -> Result<usize> {
    let records = store.all_records().await?;

    let mut writes = Vec::new();
    let mut logs = Vec::new();

    for (unique_id, record) in records {
        if record.status != AttendanceStatus::Out {
            continue;
        }

        let Some((variant, start_type)) = parse_schedule_key(&record.schedule) else {
            warn!(
                unique_id = %unique_id,
                schedule = %record.schedule,
                "Skipping out record with unknown schedule key"
            );
            continue;
        };
        let Some(period) = config.find_period(variant, start_type, &record.period) else {
            warn!(
                unique_id = %unique_id,
                period = %record.period,
                "Skipping out record whose period is not in the schedule table"
            );
            continue;
        };

        if !is_period_ended(&period.end_time, time_of_day) {
            continue;
        }

        let transition = auto_reset_transition(&record, now);
        debug!(unique_id = %unique_id, period = %record.period, "Staging auto reset");
        writes.push(ConditionalWrite {
            unique_id,
            expected: Some(record),
            record: transition.record,
        });
        logs.push(transition.entry);
    }

    if writes.is_empty() {
        return Ok(0);
    }

    let count = store.batch_commit(writes, logs).await?;
    info!(count, "Auto-reset sweep committed");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{DaySchedule, PeriodDefinition};
    use crate::store::StateStore;
    use crate::types::{AttendanceRecord, LogAction};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn config() -> ScheduleConfig {
        ScheduleConfig {
            red: DaySchedule {
                regular: vec![
                    PeriodDefinition {
                        name: "P1".to_string(),
                        start_time: "07:45".to_string(),
                        end_time: "09:13".to_string(),
                        roster: HashMap::new(),
                    },
                    PeriodDefinition {
                        name: "P2".to_string(),
                        start_time: "09:18".to_string(),
                        end_time: "10:41".to_string(),
                        roster: HashMap::new(),
                    },
                ],
                late: vec![],
            },
            black: DaySchedule::default(),
        }
    }

    fn out_record(period: &str, out_at: DateTime<Utc>) -> AttendanceRecord {
        AttendanceRecord {
            name: "Student A1".to_string(),
            code: "qr_01".to_string(),
            period: period.to_string(),
            schedule: "red_regular".to_string(),
            status: AttendanceStatus::Out,
            status_changed_at: out_at,
            out_timestamp: Some(out_at),
        }
    }

    fn at_clock(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn at_utc(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 8, hour, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn test_sweep_resets_out_record_past_period_end() {
        let store = StateStore::new_in_memory();
        let out_at = at_utc(9, 0);
        store
            .put_record_if("red_regular_qr_01_P1", None, out_record("P1", out_at))
            .await
            .unwrap();

        // 09:20 is past P1's 09:13 end.
        let count = sweep(&store, &config(), at_clock(9, 20), at_utc(9, 20))
            .await
            .unwrap();
        assert_eq!(count, 1);

        let record = store
            .get_record("red_regular_qr_01_P1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, AttendanceStatus::In);
        assert_eq!(record.out_timestamp, None);
        assert!(record.invariant_holds());

        let logs = store.logs(None, None).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, LogAction::In);
        assert!(logs[0].auto_reset);
        assert_eq!(logs[0].duration_ms, Some(20 * 60 * 1000));
        assert_eq!(logs[0].out_time, Some(out_at));
    }

    #[tokio::test]
    async fn test_sweep_leaves_active_period_alone() {
        let store = StateStore::new_in_memory();
        store
            .put_record_if("red_regular_qr_01_P2", None, out_record("P2", at_utc(9, 30)))
            .await
            .unwrap();

        // 09:40 is inside P2.
        let count = sweep(&store, &config(), at_clock(9, 40), at_utc(9, 40))
            .await
            .unwrap();
        assert_eq!(count, 0);

        let record = store
            .get_record("red_regular_qr_01_P2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, AttendanceStatus::Out);
        assert!(store.logs(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_never_touches_in_records() {
        let store = StateStore::new_in_memory();
        let mut record = out_record("P1", at_utc(8, 0));
        record.status = AttendanceStatus::In;
        record.out_timestamp = None;
        store
            .put_record_if("red_regular_qr_01_P1", None, record.clone())
            .await
            .unwrap();

        let count = sweep(&store, &config(), at_clock(12, 0), at_utc(12, 0))
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(
            store
                .get_record("red_regular_qr_01_P1")
                .await
                .unwrap()
                .unwrap(),
            record
        );
    }

    #[tokio::test]
    async fn test_sweep_batches_multiple_resets() {
        let store = StateStore::new_in_memory();
        store
            .put_record_if("red_regular_qr_01_P1", None, out_record("P1", at_utc(9, 0)))
            .await
            .unwrap();
        let mut second = out_record("P1", at_utc(9, 5));
        second.code = "qr_02".to_string();
        store
            .put_record_if("red_regular_qr_02_P1", None, second)
            .await
            .unwrap();
        // Still inside P2 at 10:00, untouched.
        store
            .put_record_if("red_regular_qr_03_P2", None, out_record("P2", at_utc(9, 30)))
            .await
            .unwrap();

        let count = sweep(&store, &config(), at_clock(10, 0), at_utc(10, 0))
            .await
            .unwrap();
        assert_eq!(count, 2);

        let records = store.all_records().await.unwrap();
        assert_eq!(
            records.get("red_regular_qr_03_P2").unwrap().status,
            AttendanceStatus::Out
        );
        assert_eq!(store.logs(None, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_skips_records_that_no_longer_resolve() {
        let store = StateStore::new_in_memory();
        let mut unknown_schedule = out_record("P1", at_utc(8, 0));
        unknown_schedule.schedule = "green_regular".to_string();
        store
            .put_record_if("bad-schedule", None, unknown_schedule)
            .await
            .unwrap();

        let mut unknown_period = out_record("P9", at_utc(8, 0));
        unknown_period.period = "P9".to_string();
        store
            .put_record_if("bad-period", None, unknown_period)
            .await
            .unwrap();

        let count = sweep(&store, &config(), at_clock(12, 0), at_utc(12, 0))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_empty_store_sweeps_to_zero() {
        let store = StateStore::new_in_memory();
        let count = sweep(&store, &config(), at_clock(9, 20), at_utc(9, 20))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
