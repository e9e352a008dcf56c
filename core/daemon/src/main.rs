//! Hallpass daemon entrypoint.
//!
//! A small, single-writer service that owns all attendance state. Stations
//! connect over a unix socket with one newline-framed JSON request per
//! connection; a background task sweeps expired periods so students left
//! marked Out come back automatically.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, Utc};
use fs_err as fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use hallpass_core::types::{ScheduleVariant, StartType};
use hallpass_core::{
    resolve_student, sweep, AttendanceStore, AttendanceTracker, PassError, ScheduleConfig,
    StateStore,
};
use hallpass_daemon_protocol::{
    parse_log_query, parse_scan, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};

mod debounce;
mod runtime;

use debounce::{ScanDecision, ScanGuard};
use runtime::RuntimeConfig;

const SOCKET_ENV: &str = "HALLPASS_SOCKET";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

struct DaemonContext {
    tracker: AttendanceTracker,
    store: Arc<dyn AttendanceStore>,
    schedules: ScheduleConfig,
    guard: ScanGuard,
}

#[tokio::main]
async fn main() {
    init_logging();

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let config = match runtime::load_runtime_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load runtime config; using safe defaults");
            RuntimeConfig::default()
        }
    };

    let store: Arc<StateStore> = match config.resolved_store_path() {
        Some(path) => match StateStore::load(&path) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                error!(error = %err, path = %path.display(), "Failed to load attendance state");
                std::process::exit(1);
            }
        },
        None => {
            warn!("No store path resolved; attendance state will not persist");
            Arc::new(StateStore::new_in_memory())
        }
    };

    let schedules = runtime::load_schedules(None);
    let store: Arc<dyn AttendanceStore> = store;
    let context = Arc::new(DaemonContext {
        tracker: AttendanceTracker::new(Arc::clone(&store)),
        store,
        schedules,
        guard: ScanGuard::new(
            Duration::from_millis(config.scan_debounce_ms),
            Duration::from_millis(config.student_cooldown_ms),
        ),
    });

    spawn_sweeper(Arc::clone(&context), config.sweep_interval_secs);

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "Hallpass daemon started");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let context = Arc::clone(&context);
                    tokio::spawn(async move {
                        handle_connection(stream, context).await;
                    });
                }
                Err(err) => {
                    warn!(error = %err, "Failed to accept daemon connection");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        warn!(error = %err, "Failed to remove socket during shutdown");
    }
}

fn spawn_sweeper(context: Arc<DaemonContext>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        // The first tick fires immediately; skip it so startup scans settle.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let time_of_day = Local::now().time();
            match sweep(
                context.store.as_ref(),
                &context.schedules,
                time_of_day,
                Utc::now(),
            )
            .await
            {
                Ok(0) => {}
                Ok(count) => info!(count, "Sweep auto-reset expired passes"),
                Err(err) => warn!(error = %err, "Sweep pass failed"),
            }
        }
    });
}

fn init_logging() {
    let debug_enabled = env::var("HALLPASS_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    hallpass_core::config::socket_path().ok_or_else(|| "Home directory not found".to_string())
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

async fn handle_connection(mut stream: UnixStream, context: Arc<DaemonContext>) {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response).await;
            return;
        }
    };

    debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, context).await;
    let _ = write_response(&mut stream, response).await;
}

async fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let read = tokio::time::timeout(
            Duration::from_secs(READ_TIMEOUT_SECS),
            stream.read(&mut chunk),
        )
        .await;
        match read {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Ok(Err(err)) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
            Err(_) => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => {
            if buffer.len() > index + 1 {
                let trailing = &buffer[index + 1..];
                if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!("Extra bytes detected after newline; ignoring trailing data");
                }
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

async fn handle_request(request: Request, context: Arc<DaemonContext>) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => Response::ok(
            request.id,
            serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
            }),
        ),
        Method::Scan => handle_scan(request, context).await,
        Method::GetStatusBoard => match context.store.all_records().await {
            Ok(records) => {
                let count = records.len();
                match serde_json::to_value(&records) {
                    Ok(value) => {
                        debug!(records = count, "Status board snapshot");
                        Response::ok(request.id, value)
                    }
                    Err(err) => Response::error(
                        request.id,
                        "serialization_error",
                        format!("Failed to serialize status board: {}", err),
                    ),
                }
            }
            Err(err) => Response::error(
                request.id,
                "store_error",
                format!("Failed to fetch status board: {}", err),
            ),
        },
        Method::GetLogs => {
            let query = match parse_log_query(request.params) {
                Ok(query) => query,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match context
                .store
                .logs(query.from.as_deref(), query.to.as_deref())
                .await
            {
                Ok(entries) => {
                    let count = entries.len();
                    match serde_json::to_value(&entries) {
                        Ok(value) => {
                            debug!(entries = count, "Log snapshot");
                            Response::ok(request.id, value)
                        }
                        Err(err) => Response::error(
                            request.id,
                            "serialization_error",
                            format!("Failed to serialize logs: {}", err),
                        ),
                    }
                }
                Err(err) => Response::error(
                    request.id,
                    "store_error",
                    format!("Failed to fetch logs: {}", err),
                ),
            }
        }
        Method::DeleteLogs => match context.tracker.delete_all_logs().await {
            Ok(()) => {
                info!("Pass logs cleared");
                Response::ok(request.id, serde_json::json!({ "deleted": true }))
            }
            Err(err) => Response::error(
                request.id,
                "store_error",
                format!("Failed to delete logs: {}", err),
            ),
        },
    }
}

async fn handle_scan(request: Request, context: Arc<DaemonContext>) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "scan payload is required"),
    };

    let scan = match parse_scan(params) {
        Ok(scan) => scan,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    let Some(variant) = ScheduleVariant::from_str(&scan.schedule) else {
        return Response::error(
            request.id,
            "invalid_schedule",
            format!("unknown schedule: {}", scan.schedule),
        );
    };
    let Some(start_type) = StartType::from_str(&scan.start_type) else {
        return Response::error(
            request.id,
            "invalid_start_type",
            format!("unknown start type: {}", scan.start_type),
        );
    };

    match context.guard.check(&scan.code, Instant::now()) {
        ScanDecision::Proceed => {}
        ScanDecision::Debounced => {
            debug!(code = %scan.code, "Scan debounced");
            return Response::ok(
                request.id,
                serde_json::json!({ "accepted": false, "reason": "debounced" }),
            );
        }
        ScanDecision::CoolingDown => {
            debug!(code = %scan.code, "Scan in cooldown");
            return Response::ok(
                request.id,
                serde_json::json!({ "accepted": false, "reason": "cooldown" }),
            );
        }
    }

    let identity = match resolve_student(
        &context.schedules,
        &scan.code,
        variant,
        start_type,
        Local::now().time(),
    ) {
        Ok(identity) => identity,
        Err(err) => return Response::error_with_info(request.id, scan_error(err)),
    };

    match context.tracker.toggle(&identity, Utc::now()).await {
        Ok(outcome) => {
            context.guard.mark_success(&scan.code, Instant::now());
            info!(
                student = %outcome.student_name,
                period = %outcome.period,
                action = ?outcome.action,
                station = ?scan.station,
                "Scan toggled attendance"
            );
            match serde_json::to_value(&outcome) {
                Ok(value) => Response::ok(request.id, value),
                Err(err) => Response::error(
                    request.id,
                    "serialization_error",
                    format!("Failed to serialize scan outcome: {}", err),
                ),
            }
        }
        Err(err) => Response::error_with_info(request.id, scan_error(err)),
    }
}

fn scan_error(err: PassError) -> ErrorInfo {
    let code = match &err {
        PassError::NoActivePeriod => "no_active_period",
        PassError::UnregisteredCode { .. } => "unregistered_code",
        PassError::InvalidCode(_) => "invalid_code",
        PassError::WriteConflict(_) => "scan_conflict",
        _ => "persistence_error",
    };
    ErrorInfo::new(code, err.to_string())
}

async fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    let mut payload = serde_json::to_vec(&response)?;
    payload.push(b'\n');
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}
