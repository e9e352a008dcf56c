//! Derives a canonical per-student-per-period identity from a scanned code.
//!
//! The unique id is a composite key of (variant, start type, code, period
//! name) with period-name whitespace normalized to underscores. Codes are
//! constrained to the `qr_NN` format before any lookup, which keeps the
//! underscore-joined key splittable back into its four components.

use chrono::NaiveTime;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{PassError, Result};
use crate::schedule::{resolve_current_period, ScheduleConfig};
use crate::types::{schedule_key, ScheduleVariant, StartType, StudentIdentity};

static CODE_FORMAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^qr_\d{2}$").expect("valid regex"));

/// True iff `code` matches the scannable code format (`qr_NN`).
pub fn is_valid_code(code: &str) -> bool {
    CODE_FORMAT.is_match(code)
}

/// Builds the persistence key for one (variant, start, code, period) tuple.
pub fn unique_id(
    variant: ScheduleVariant,
    start_type: StartType,
    code: &str,
    period_name: &str,
) -> String {
    let period = period_name.split_whitespace().collect::<Vec<_>>().join("_");
    format!(
        "{}_{}_{}_{}",
        variant.as_str(),
        start_type.as_str(),
        code,
        period
    )
}

/// Components recovered from a unique id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueIdParts {
    pub variant: ScheduleVariant,
    pub start_type: StartType,
    pub code: String,
    pub period_name: String,
}

/// Splits a unique id back into the four components it was built from.
///
/// Period-name underscores map back to spaces, the inverse of the whitespace
/// normalization applied when the key was built.
pub fn parse_unique_id(id: &str) -> Result<UniqueIdParts> {
    let parts: Vec<&str> = id.split('_').collect();
    if parts.len() < 5 {
        return Err(PassError::InvalidUniqueId(id.to_string()));
    }

    let variant = ScheduleVariant::from_str(parts[0])
        .ok_or_else(|| PassError::InvalidUniqueId(id.to_string()))?;
    let start_type =
        StartType::from_str(parts[1]).ok_or_else(|| PassError::InvalidUniqueId(id.to_string()))?;

    // Codes always have the two-segment qr_NN shape, so the code/period
    // boundary is fixed.
    let code = format!("{}_{}", parts[2], parts[3]);
    if !is_valid_code(&code) {
        return Err(PassError::InvalidUniqueId(id.to_string()));
    }

    Ok(UniqueIdParts {
        variant,
        start_type,
        code,
        period_name: parts[4..].join(" "),
    })
}

/// Resolves a scanned code against the currently active period.
///
/// Pure lookup, no side effects: schedule resolution failure and roster
/// misses short-circuit before any write is attempted by callers.
pub fn resolve_student(
    config: &ScheduleConfig,
    code: &str,
    variant: ScheduleVariant,
    start_type: StartType,
    time: NaiveTime,
) -> Result<StudentIdentity> {
    if !is_valid_code(code) {
        return Err(PassError::InvalidCode(code.to_string()));
    }

    let period = resolve_current_period(config, variant, start_type, time)
        .ok_or(PassError::NoActivePeriod)?;

    let student_name = period
        .roster
        .get(code)
        .ok_or_else(|| PassError::UnregisteredCode {
            period: period.name.clone(),
            code: code.to_string(),
        })?;

    Ok(StudentIdentity {
        unique_id: unique_id(variant, start_type, code, &period.name),
        student_name: student_name.clone(),
        code: code.to_string(),
        period_name: period.name.clone(),
        period_end_time: period.end_time.clone(),
        schedule_key: schedule_key(variant, start_type),
    })
}
