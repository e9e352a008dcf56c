//! Pure toggle decisions: given the persisted record (or none), produce the
//! next record and its audit log entry. No I/O; the tracker owns reads and
//! conditional writes.

use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::types::{
    AttendanceRecord, AttendanceStatus, LogAction, LogEntry, StudentIdentity,
};

/// The record overwrite and log append produced by one transition. Written
/// as a single logical unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub record: AttendanceRecord,
    pub entry: LogEntry,
}

/// Decides the next transition for a scan.
///
/// A missing record is an implicit In: a never-scanned student starts in the
/// room, so the first scan always marks them Out.
pub fn next_transition(
    identity: &StudentIdentity,
    current: Option<&AttendanceRecord>,
    now: DateTime<Utc>,
) -> Transition {
    match current {
        Some(record) if record.status == AttendanceStatus::Out => {
            mark_in(identity, record.out_timestamp, now)
        }
        _ => mark_out(identity, now),
    }
}

fn mark_out(identity: &StudentIdentity, now: DateTime<Utc>) -> Transition {
    Transition {
        record: AttendanceRecord {
            name: identity.student_name.clone(),
            code: identity.code.clone(),
            period: identity.period_name.clone(),
            schedule: identity.schedule_key.clone(),
            status: AttendanceStatus::Out,
            status_changed_at: now,
            out_timestamp: Some(now),
        },
        entry: LogEntry {
            id: new_log_id(),
            student_name: identity.student_name.clone(),
            code: identity.code.clone(),
            period: identity.period_name.clone(),
            schedule: identity.schedule_key.clone(),
            action: LogAction::Out,
            auto_reset: false,
            date: date_string(now),
            out_time: Some(now),
            in_time: None,
            duration_ms: None,
        },
    }
}

fn mark_in(
    identity: &StudentIdentity,
    prior_out: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Transition {
    Transition {
        record: AttendanceRecord {
            name: identity.student_name.clone(),
            code: identity.code.clone(),
            period: identity.period_name.clone(),
            schedule: identity.schedule_key.clone(),
            status: AttendanceStatus::In,
            status_changed_at: now,
            out_timestamp: None,
        },
        entry: LogEntry {
            id: new_log_id(),
            student_name: identity.student_name.clone(),
            code: identity.code.clone(),
            period: identity.period_name.clone(),
            schedule: identity.schedule_key.clone(),
            action: LogAction::In,
            auto_reset: false,
            date: date_string(now),
            out_time: prior_out,
            in_time: Some(now),
            duration_ms: duration_ms(prior_out, now),
        },
    }
}

/// Forces a still-Out record back to In after its period ended. Identity
/// fields come from the stored record; the log entry carries the auto-reset
/// tag so reports can tell it apart from a manual scan-in.
pub fn auto_reset_transition(record: &AttendanceRecord, now: DateTime<Utc>) -> Transition {
    let prior_out = record.out_timestamp;
    Transition {
        record: AttendanceRecord {
            status: AttendanceStatus::In,
            status_changed_at: now,
            out_timestamp: None,
            ..record.clone()
        },
        entry: LogEntry {
            id: new_log_id(),
            student_name: record.name.clone(),
            code: record.code.clone(),
            period: record.period.clone(),
            schedule: record.schedule.clone(),
            action: LogAction::In,
            auto_reset: true,
            date: date_string(now),
            out_time: prior_out,
            in_time: Some(now),
            duration_ms: duration_ms(prior_out, now),
        },
    }
}

fn duration_ms(prior_out: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    prior_out.map(|out| (now - out).num_milliseconds())
}

fn date_string(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

fn new_log_id() -> String {
    Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn test_missing_record_toggles_out() {
        let now = at(8, 0);
        let transition = next_transition(&identity(), None, now);

        assert_eq!(transition.record.status, AttendanceStatus::Out);
        assert_eq!(transition.record.out_timestamp, Some(now));
        assert!(transition.record.invariant_holds());

        assert_eq!(transition.entry.action, LogAction::Out);
        assert_eq!(transition.entry.out_time, Some(now));
        assert_eq!(transition.entry.in_time, None);
        assert_eq!(transition.entry.duration_ms, None);
        assert!(!transition.entry.auto_reset);
        assert_eq!(transition.entry.date, "2025-09-08");
    }

    #[test]
    fn test_in_record_toggles_out() {
        let out = next_transition(&identity(), None, at(8, 0));
        let back_in = next_transition(&identity(), Some(&out.record), at(8, 5));
        let out_again = next_transition(&identity(), Some(&back_in.record), at(8, 10));
        assert_eq!(out_again.record.status, AttendanceStatus::Out);
        assert_eq!(out_again.entry.action, LogAction::Out);
    }

    #[test]
    fn test_out_record_toggles_in_with_duration() {
        let out_at = at(8, 0);
        let in_at = at(8, 5);
        let out = next_transition(&identity(), None, out_at);
        let transition = next_transition(&identity(), Some(&out.record), in_at);

        assert_eq!(transition.record.status, AttendanceStatus::In);
        assert_eq!(transition.record.out_timestamp, None);
        assert!(transition.record.invariant_holds());

        assert_eq!(transition.entry.action, LogAction::In);
        assert_eq!(transition.entry.out_time, Some(out_at));
        assert_eq!(transition.entry.in_time, Some(in_at));
        assert_eq!(transition.entry.duration_ms, Some(300_000));
    }

    #[test]
    fn test_corrupt_out_record_yields_null_duration() {
        // An Out record missing its out_timestamp violates the invariant;
        // the transition still closes it, just without a duration.
        let mut record = next_transition(&identity(), None, at(8, 0)).record;
        record.out_timestamp = None;
        let transition = next_transition(&identity(), Some(&record), at(8, 5));

        assert_eq!(transition.record.status, AttendanceStatus::In);
        assert_eq!(transition.entry.duration_ms, None);
        assert_eq!(transition.entry.out_time, None);
    }

    #[test]
    fn test_auto_reset_tags_entry_and_keeps_duration() {
        let out = next_transition(&identity(), None, at(8, 0));
        let reset = auto_reset_transition(&out.record, at(9, 20));

        assert_eq!(reset.record.status, AttendanceStatus::In);
        assert_eq!(reset.record.out_timestamp, None);
        assert!(reset.record.invariant_holds());

        assert_eq!(reset.entry.action, LogAction::In);
        assert!(reset.entry.auto_reset);
        assert_eq!(reset.entry.duration_ms, Some(80 * 60 * 1000));
        assert_eq!(reset.entry.student_name, "Student A1");
    }

    #[test]
    fn test_log_ids_are_unique() {
        let a = next_transition(&identity(), None, at(8, 0));
        let b = next_transition(&identity(), None, at(8, 0));
        assert_ne!(a.entry.id, b.entry.id);
    }
}
