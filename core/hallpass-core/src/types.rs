//! Persisted and derived types for the attendance pipeline.
//!
//! `AttendanceRecord` is overwritten in place per student identity;
//! `LogEntry` is append-only. Current on-disk format is v1.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Day-type selecting which roster/period table is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleVariant {
    Red,
    Black,
}

impl ScheduleVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleVariant::Red => "red",
            ScheduleVariant::Black => "black",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "red" => Some(ScheduleVariant::Red),
            "black" => Some(ScheduleVariant::Black),
            _ => None,
        }
    }
}

/// Start-time sub-variant within a schedule variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartType {
    Regular,
    Late,
}

impl StartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartType::Regular => "regular",
            StartType::Late => "late",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "regular" => Some(StartType::Regular),
            "late" => Some(StartType::Late),
            _ => None,
        }
    }
}

/// Builds the `"<variant>_<start>"` key stored on records and log entries.
pub fn schedule_key(variant: ScheduleVariant, start_type: StartType) -> String {
    format!("{}_{}", variant.as_str(), start_type.as_str())
}

/// Splits a stored schedule key back into its variants.
pub fn parse_schedule_key(key: &str) -> Option<(ScheduleVariant, StartType)> {
    let (variant, start_type) = key.split_once('_')?;
    Some((
        ScheduleVariant::from_str(variant)?,
        StartType::from_str(start_type)?,
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    In,
    Out,
}

/// Current whereabouts for one student identity. Exactly one per unique id,
/// overwritten on every transition.
///
/// Invariant: `status == Out` iff `out_timestamp` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub code: String,
    pub period: String,
    /// Stored schedule key, `"<variant>_<start>"`.
    pub schedule: String,
    pub status: AttendanceStatus,
    pub status_changed_at: DateTime<Utc>,
    #[serde(default)]
    pub out_timestamp: Option<DateTime<Utc>>,
}

impl AttendanceRecord {
    /// Checks the out-status/out-timestamp pairing invariant.
    pub fn invariant_holds(&self) -> bool {
        (self.status == AttendanceStatus::Out) == self.out_timestamp.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogAction {
    In,
    Out,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::In => "in",
            LogAction::Out => "out",
        }
    }
}

/// One immutable audit entry per transition. Created once, never mutated,
/// removable only through the bulk clear operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub student_name: String,
    pub code: String,
    pub period: String,
    pub schedule: String,
    pub action: LogAction,
    /// Set when the entry was produced by the period-end sweep rather than
    /// a scan.
    #[serde(default)]
    pub auto_reset: bool,
    /// ISO date of the transition, "YYYY-MM-DD".
    pub date: String,
    #[serde(default)]
    pub out_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub in_time: Option<DateTime<Utc>>,
    /// Time spent out, populated only on an In entry that closes a prior Out.
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

/// Derived student identity for one scan. Never persisted on its own; the
/// `unique_id` is the persistence key.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentIdentity {
    pub unique_id: String,
    pub student_name: String,
    pub code: String,
    pub period_name: String,
    pub period_end_time: String,
    /// `"<variant>_<start>"`, stored on records and log entries.
    pub schedule_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_variant_string_round_trip() {
        for variant in [ScheduleVariant::Red, ScheduleVariant::Black] {
            assert_eq!(ScheduleVariant::from_str(variant.as_str()), Some(variant));
        }
        assert_eq!(ScheduleVariant::from_str("green"), None);
    }

    #[test]
    fn test_start_type_string_round_trip() {
        for start in [StartType::Regular, StartType::Late] {
            assert_eq!(StartType::from_str(start.as_str()), Some(start));
        }
        assert_eq!(StartType::from_str("early"), None);
    }

    #[test]
    fn test_schedule_key_round_trip() {
        let key = schedule_key(ScheduleVariant::Red, StartType::Late);
        assert_eq!(key, "red_late");
        assert_eq!(
            parse_schedule_key(&key),
            Some((ScheduleVariant::Red, StartType::Late))
        );
    }

    #[test]
    fn test_parse_schedule_key_rejects_unknown() {
        assert_eq!(parse_schedule_key("purple_regular"), None);
        assert_eq!(parse_schedule_key("red"), None);
        assert_eq!(parse_schedule_key(""), None);
    }

    #[test]
    fn test_record_invariant() {
        let now = Utc::now();
        let mut record = AttendanceRecord {
            name: "Student A1".to_string(),
            code: "qr_01".to_string(),
            period: "P1".to_string(),
            schedule: "red_regular".to_string(),
            status: AttendanceStatus::Out,
            status_changed_at: now,
            out_timestamp: Some(now),
        };
        assert!(record.invariant_holds());

        record.status = AttendanceStatus::In;
        assert!(!record.invariant_holds());

        record.out_timestamp = None;
        assert!(record.invariant_holds());
    }
}
