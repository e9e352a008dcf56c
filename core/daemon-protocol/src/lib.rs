//! IPC protocol types and validation for hallpass-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Scan,
    GetStatusBoard,
    GetLogs,
    DeleteLogs,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// One scan submitted by a station. The daemon re-derives the student and
/// period from the code; the station only says which schedule it is running.
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ScanEnvelope {
    pub scan_id: String,
    pub recorded_at: String,
    pub code: String,
    pub schedule: String,
    pub start_type: String,
    #[serde(default)]
    pub station: Option<String>,
}

impl ScanEnvelope {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.scan_id.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_scan_id", "scan_id is required"));
        }
        if self.scan_id.len() > 128 {
            return Err(ErrorInfo::new(
                "invalid_scan_id",
                "scan_id must be 128 characters or fewer",
            ));
        }

        if DateTime::parse_from_rfc3339(&self.recorded_at).is_err() {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "recorded_at must be RFC3339",
            ));
        }

        require_string(&self.code, "code")?;
        if self.code.len() > 64 {
            return Err(ErrorInfo::new(
                "invalid_code",
                "code must be 64 characters or fewer",
            ));
        }
        require_string(&self.schedule, "schedule")?;
        require_string(&self.start_type, "start_type")?;
        Ok(())
    }
}

pub fn parse_scan(params: Value) -> Result<ScanEnvelope, ErrorInfo> {
    let envelope: ScanEnvelope = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("scan payload is invalid JSON: {}", err),
        )
    })?;
    envelope.validate()?;
    Ok(envelope)
}

/// Optional date-range filter for log queries, inclusive on both ends.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogQuery {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

impl LogQuery {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        for (field, value) in [("from", &self.from), ("to", &self.to)] {
            if let Some(date) = value {
                if chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
                    return Err(ErrorInfo::new(
                        "invalid_date",
                        format!("{} must be YYYY-MM-DD", field),
                    ));
                }
            }
        }
        Ok(())
    }
}

pub fn parse_log_query(params: Option<Value>) -> Result<LogQuery, ErrorInfo> {
    let query: LogQuery = match params {
        Some(value) => serde_json::from_value(value).map_err(|err| {
            ErrorInfo::new(
                "invalid_params",
                format!("log query is invalid JSON: {}", err),
            )
        })?,
        None => LogQuery::default(),
    };
    query.validate()?;
    Ok(query)
}

fn require_string(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}
