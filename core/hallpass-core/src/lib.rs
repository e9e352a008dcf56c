//! # hallpass-core
//!
//! Core library for the hall pass tracker: schedule resolution, student
//! identity derivation, the in/out toggle state machine, the attendance
//! store, and the period-end auto-reset sweep. The daemon and scan client
//! crates are thin shells over this.
//!
//! ## Design notes
//!
//! - **Pure decisions, effectful edges**: schedule lookup, identity
//!   derivation, and toggle transitions are pure functions over an injected
//!   clock; only the store touches disk.
//! - **Conditional writes**: every record overwrite states the value it read,
//!   so concurrent togglers and the sweep cannot silently clobber each other.
//! - **Graceful state loading**: a missing or corrupt state file starts
//!   empty rather than refusing to serve scans.

pub mod config;
pub mod error;
pub mod identity;
pub mod schedule;
pub mod store;
pub mod sweep;
pub mod tracker;
pub mod transition;
pub mod types;

pub use error::{PassError, Result};
pub use identity::{is_valid_code, parse_unique_id, resolve_student, unique_id, UniqueIdParts};
pub use schedule::{resolve_current_period, PeriodDefinition, ScheduleConfig};
pub use store::{AttendanceStore, ConditionalWrite, StateStore, StoreEvent};
pub use sweep::sweep;
pub use tracker::{AttendanceTracker, ToggleOutcome};
pub use transition::{auto_reset_transition, next_transition, Transition};
pub use types::{
    AttendanceRecord, AttendanceStatus, LogAction, LogEntry, ScheduleVariant, StartType,
    StudentIdentity,
};
