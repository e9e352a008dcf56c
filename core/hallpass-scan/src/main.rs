//! hallpass-scan: scan station CLI for the hallpass daemon.
//!
//! Wired to a QR scanner acting as a keyboard: the scanner loop invokes
//! `hallpass-scan scan <CODE>` per badge read. The station's schedule is
//! selected once with `select` and persisted, so scans carry no flags.
//!
//! ## Subcommands
//!
//! - `select`: Pick the schedule this station runs today
//! - `scan`: Submit one scanned code
//! - `status`: Show who is currently out
//! - `logs`: Show pass history, optionally date-filtered
//! - `clear-logs`: Delete all pass history
//! - `health`: Check the daemon is up

mod client;
mod logging;
mod station;

use clap::{Parser, Subcommand};
use hallpass_daemon_protocol::{Response, ScanEnvelope};
use station::StationSelection;

#[derive(Parser)]
#[command(name = "hallpass-scan")]
#[command(about = "Hall pass scan station")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select the schedule this station runs (persisted until changed)
    Select {
        /// Schedule variant (red or black)
        #[arg(value_name = "SCHEDULE")]
        schedule: String,

        /// Start type (regular or late)
        #[arg(value_name = "START_TYPE")]
        start_type: String,

        /// Optional station label included with scans
        #[arg(long)]
        station: Option<String>,
    },

    /// Submit one scanned code
    Scan {
        /// The scanned code (e.g. qr_01)
        #[arg(value_name = "CODE")]
        code: String,

        /// Override the selected schedule for this scan
        #[arg(long)]
        schedule: Option<String>,

        /// Override the selected start type for this scan
        #[arg(long)]
        start_type: Option<String>,
    },

    /// Show current in/out state for every tracked student
    Status,

    /// Show pass history
    Logs {
        /// Earliest date to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Latest date to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
    },

    /// Delete all pass history (attendance records are kept)
    ClearLogs,

    /// Check daemon health
    Health,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Select {
            schedule,
            start_type,
            station,
        } => run_select(schedule, start_type, station),
        Commands::Scan {
            code,
            schedule,
            start_type,
        } => run_scan(code, schedule, start_type),
        Commands::Status => run_status(),
        Commands::Logs { from, to } => run_logs(from, to),
        Commands::ClearLogs => run_clear_logs(),
        Commands::Health => run_health(),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "hallpass-scan command failed");
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn run_select(
    schedule: String,
    start_type: String,
    station: Option<String>,
) -> Result<(), String> {
    if !matches!(schedule.as_str(), "red" | "black") {
        return Err(format!("unknown schedule: {} (expected red or black)", schedule));
    }
    if !matches!(start_type.as_str(), "regular" | "late") {
        return Err(format!(
            "unknown start type: {} (expected regular or late)",
            start_type
        ));
    }

    let selection = StationSelection {
        schedule,
        start_type,
        station_name: station,
    };
    station::save(&selection, None)?;
    println!(
        "Station set to {} / {} start",
        selection.schedule, selection.start_type
    );
    Ok(())
}

fn run_scan(
    code: String,
    schedule: Option<String>,
    start_type: Option<String>,
) -> Result<(), String> {
    let saved = station::load(None)?;
    let (schedule, start_type, station_name) = match (schedule, start_type, saved) {
        (Some(schedule), Some(start_type), saved) => {
            (schedule, start_type, saved.and_then(|s| s.station_name))
        }
        (None, None, Some(saved)) => (saved.schedule, saved.start_type, saved.station_name),
        (Some(_), None, _) | (None, Some(_), _) => {
            return Err("--schedule and --start-type must be given together".to_string());
        }
        (None, None, None) => {
            return Err(
                "no schedule selected; run `hallpass-scan select <SCHEDULE> <START_TYPE>` first"
                    .to_string(),
            );
        }
    };

    let scan = ScanEnvelope {
        scan_id: ulid::Ulid::new().to_string(),
        recorded_at: chrono::Utc::now().to_rfc3339(),
        code,
        schedule,
        start_type,
        station: station_name,
    };

    let response = client::send_scan(&scan)?;
    print_scan_outcome(response);
    Ok(())
}

fn print_scan_outcome(response: Response) {
    if response.ok {
        let data = response.data.unwrap_or_default();
        if data.get("accepted").and_then(|v| v.as_bool()) == Some(false) {
            // Duplicate fire from the same badge presentation; stay quiet.
            tracing::debug!(reason = ?data.get("reason"), "Scan suppressed");
            return;
        }
        let student = data
            .get("student_name")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let action = data.get("action").and_then(|v| v.as_str()).unwrap_or("?");
        match action {
            "out" => println!("{} is OUT", student),
            "in" => {
                let duration = data
                    .get("duration_ms")
                    .and_then(|v| v.as_i64())
                    .map(format_duration);
                match duration {
                    Some(duration) => println!("{} is IN (gone {})", student, duration),
                    None => println!("{} is IN", student),
                }
            }
            other => println!("{}: {}", student, other),
        }
    } else if let Some(error) = response.error {
        match error.code.as_str() {
            "no_active_period" => println!("No class period is active right now"),
            "unregistered_code" | "invalid_code" => println!("Code not recognized: see teacher"),
            _ => {
                tracing::error!(code = %error.code, message = %error.message, "Scan failed");
                println!("Scan failed: {}", error.message);
            }
        }
    }
}

fn format_duration(ms: i64) -> String {
    let total_secs = ms / 1000;
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    format!("{}m {:02}s", minutes, seconds)
}

fn run_status() -> Result<(), String> {
    let response = client::get_status_board()?;
    let data = expect_data(response)?;
    let records = data
        .as_object()
        .ok_or_else(|| "unexpected status board shape".to_string())?;

    if records.is_empty() {
        println!("No scans recorded yet");
        return Ok(());
    }

    for record in records.values() {
        let name = record.get("name").and_then(|v| v.as_str()).unwrap_or("?");
        let period = record.get("period").and_then(|v| v.as_str()).unwrap_or("?");
        let status = record.get("status").and_then(|v| v.as_str()).unwrap_or("?");
        println!("{:<24} {:<12} {}", name, period, status.to_uppercase());
    }
    Ok(())
}

fn run_logs(from: Option<String>, to: Option<String>) -> Result<(), String> {
    let response = client::get_logs(from.as_deref(), to.as_deref())?;
    let data = expect_data(response)?;
    let entries = data
        .as_array()
        .ok_or_else(|| "unexpected log shape".to_string())?;

    if entries.is_empty() {
        println!("No pass history");
        return Ok(());
    }

    for entry in entries {
        let date = entry.get("date").and_then(|v| v.as_str()).unwrap_or("?");
        let name = entry
            .get("student_name")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let period = entry.get("period").and_then(|v| v.as_str()).unwrap_or("?");
        let action = entry.get("action").and_then(|v| v.as_str()).unwrap_or("?");
        let tag = if entry.get("auto_reset").and_then(|v| v.as_bool()) == Some(true) {
            " (auto)"
        } else {
            ""
        };
        let duration = entry
            .get("duration_ms")
            .and_then(|v| v.as_i64())
            .map(|ms| format!(" {}", format_duration(ms)))
            .unwrap_or_default();
        println!(
            "{} {:<24} {:<12} {}{}{}",
            date,
            name,
            period,
            action.to_uppercase(),
            tag,
            duration
        );
    }
    Ok(())
}

fn run_clear_logs() -> Result<(), String> {
    let response = client::delete_logs()?;
    expect_data(response)?;
    println!("Pass history cleared");
    Ok(())
}

fn run_health() -> Result<(), String> {
    let response = client::daemon_health()?;
    let data = expect_data(response)?;
    let status = data.get("status").and_then(|v| v.as_str()).unwrap_or("?");
    let pid = data.get("pid").and_then(|v| v.as_u64()).unwrap_or(0);
    println!("daemon {} (pid {})", status, pid);
    Ok(())
}

fn expect_data(response: Response) -> Result<serde_json::Value, String> {
    if response.ok {
        Ok(response.data.unwrap_or_default())
    } else {
        let message = response
            .error
            .map(|err| format!("{}: {}", err.code, err.message))
            .unwrap_or_else(|| "Unknown daemon error".to_string());
        Err(message)
    }
}
