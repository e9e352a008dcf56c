//! Client helper for talking to the hallpass daemon.
//!
//! The daemon is the only writer. Failures surface to the caller; the
//! station never falls back to mutating state files directly.

use hallpass_daemon_protocol::{
    Method, Request, Response, ScanEnvelope, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

const SOCKET_ENV: &str = "HALLPASS_SOCKET";
const READ_TIMEOUT_MS: u64 = 600;
const WRITE_TIMEOUT_MS: u64 = 600;

pub fn send_scan(scan: &ScanEnvelope) -> Result<Response, String> {
    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method: Method::Scan,
        id: Some(scan.scan_id.clone()),
        params: Some(
            serde_json::to_value(scan)
                .map_err(|err| format!("Failed to serialize scan: {}", err))?,
        ),
    };
    send_request(request)
}

pub fn get_status_board() -> Result<Response, String> {
    send_request(Request {
        protocol_version: PROTOCOL_VERSION,
        method: Method::GetStatusBoard,
        id: Some("status-board".to_string()),
        params: None,
    })
}

pub fn get_logs(from: Option<&str>, to: Option<&str>) -> Result<Response, String> {
    let mut params = serde_json::Map::new();
    if let Some(from) = from {
        params.insert("from".to_string(), Value::String(from.to_string()));
    }
    if let Some(to) = to {
        params.insert("to".to_string(), Value::String(to.to_string()));
    }
    let params = if params.is_empty() {
        None
    } else {
        Some(Value::Object(params))
    };

    send_request(Request {
        protocol_version: PROTOCOL_VERSION,
        method: Method::GetLogs,
        id: Some("logs".to_string()),
        params,
    })
}

pub fn delete_logs() -> Result<Response, String> {
    send_request(Request {
        protocol_version: PROTOCOL_VERSION,
        method: Method::DeleteLogs,
        id: Some("clear-logs".to_string()),
        params: None,
    })
}

pub fn daemon_health() -> Result<Response, String> {
    send_request(Request {
        protocol_version: PROTOCOL_VERSION,
        method: Method::GetHealth,
        id: Some("health-check".to_string()),
        params: None,
    })
}

fn socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    hallpass_core::config::socket_path().ok_or_else(|| "Home directory not found".to_string())
}

fn send_request(request: Request) -> Result<Response, String> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket)
        .map_err(|err| format!("Failed to connect to daemon socket: {}", err))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, &request)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err("Response exceeded maximum size".to_string());
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}
