//! Resolves the active class period from a schedule table and a wall-clock
//! time-of-day.
//!
//! Schedule tables are static configuration injected at construction, not
//! logic: the resolver only compares minute-precision "HH:MM" strings against
//! each period's half-open `[start, end)` window. Zero-padded "HH:MM" strings
//! order lexicographically the same as the underlying times, so comparisons
//! stay on the configured string form.

use std::collections::HashMap;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::types::{ScheduleVariant, StartType};

/// A named time window with a roster of scannable codes to student names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodDefinition {
    pub name: String,
    /// "HH:MM", 24-hour, zero-padded.
    pub start_time: String,
    /// "HH:MM", exclusive.
    pub end_time: String,
    #[serde(default)]
    pub roster: HashMap<String, String>,
}

/// Period lists for one schedule variant, one per start type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaySchedule {
    #[serde(default)]
    pub regular: Vec<PeriodDefinition>,
    #[serde(default)]
    pub late: Vec<PeriodDefinition>,
}

impl DaySchedule {
    fn periods(&self, start_type: StartType) -> &[PeriodDefinition] {
        match start_type {
            StartType::Regular => &self.regular,
            StartType::Late => &self.late,
        }
    }
}

/// The full period/roster table driving all students.
///
/// Periods within one (variant, start-type) list are expected to be ordered
/// by time and non-overlapping; resolution takes the first match either way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub red: DaySchedule,
    #[serde(default)]
    pub black: DaySchedule,
}

impl ScheduleConfig {
    pub fn periods(&self, variant: ScheduleVariant, start_type: StartType) -> &[PeriodDefinition] {
        match variant {
            ScheduleVariant::Red => self.red.periods(start_type),
            ScheduleVariant::Black => self.black.periods(start_type),
        }
    }

    /// Looks up a period by name, used to re-derive the owning period of a
    /// persisted record.
    pub fn find_period(
        &self,
        variant: ScheduleVariant,
        start_type: StartType,
        name: &str,
    ) -> Option<&PeriodDefinition> {
        self.periods(variant, start_type)
            .iter()
            .find(|period| period.name == name)
    }
}

/// Formats a time-of-day for schedule comparison ("HH:MM").
pub fn format_time_of_day(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Returns the period active at `time`, or None before the first period, in
/// a gap, or after the last.
pub fn resolve_current_period(
    config: &ScheduleConfig,
    variant: ScheduleVariant,
    start_type: StartType,
    time: NaiveTime,
) -> Option<&PeriodDefinition> {
    let now = format_time_of_day(time);
    config
        .periods(variant, start_type)
        .iter()
        .find(|period| now.as_str() >= period.start_time.as_str() && now.as_str() < period.end_time.as_str())
}

/// True once the wall clock has reached or passed a period's end time.
pub fn is_period_ended(end_time: &str, time: NaiveTime) -> bool {
    format_time_of_day(time).as_str() >= end_time
}
