use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{compute_statistics, partition, AttendanceStat, StatisticsReport};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    fn enroll(
        &self,
        usn: &str,
        name: &str,
        semester: &str,
        section: &str,
        photo_paths: &[String],
    ) -> zbus::Result<String>;

    fn take_attendance(
        &self,
        subject: &str,
        semester: &str,
        section: &str,
        photo_paths: &[String],
    ) -> zbus::Result<String>;

    fn list_sessions(&self, semester: &str, section: &str, subject: &str) -> zbus::Result<String>;

    fn generate_statistics(&self, record_id: i64) -> zbus::Result<String>;

    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall classroom attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll or re-enroll a student from face photos
    Enroll {
        /// Student id (USN)
        #[arg(long)]
        usn: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        section: String,
        /// Photos showing only the student
        #[arg(required = true)]
        photos: Vec<PathBuf>,
    },
    /// Take attendance from classroom photos
    Attend {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        section: String,
        #[arg(required = true)]
        photos: Vec<PathBuf>,
    },
    /// List recorded sessions of a class and subject
    Sessions {
        #[arg(long)]
        semester: String,
        #[arg(long)]
        section: String,
        #[arg(long)]
        subject: String,
    },
    /// Attendance percentages for a recorded session's class and subject
    Stats {
        /// Session record id (see `rollcall sessions`)
        #[arg(required_unless_present = "log")]
        record_id: Option<i64>,
        /// Compute from a session log file without the daemon
        #[arg(long, conflicts_with = "record_id")]
        log: Option<PathBuf>,
    },
    /// Show daemon status
    Status,
}

/// The daemon runs elsewhere, so photo paths go over the bus absolute.
fn absolute_paths(photos: &[PathBuf]) -> Result<Vec<String>> {
    photos
        .iter()
        .map(|p| {
            std::fs::canonicalize(p)
                .with_context(|| format!("photo {}", p.display()))
                .map(|p| p.to_string_lossy().into_owned())
        })
        .collect()
}

fn stat_lines(stats: &[AttendanceStat]) -> Vec<String> {
    if stats.is_empty() {
        return vec!["  (none)".to_string()];
    }
    stats
        .iter()
        .map(|s| format!("  {}: {:.2}%", s.student, s.percentage))
        .collect()
}

fn report_lines(report: &StatisticsReport) -> Vec<String> {
    let mut lines = vec!["Above 75% attendance:".to_string()];
    lines.extend(stat_lines(&report.above_75));
    lines.push("Below 75% attendance:".to_string());
    lines.extend(stat_lines(&report.below_75));
    lines
}

fn string_list(value: &Value) -> Vec<&str> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Human-readable rendering of a service outcome.
fn outcome_lines(command: &str, outcome: &Value) -> Vec<String> {
    let message = outcome["message"].as_str().unwrap_or_default();
    let mut lines = Vec::new();

    if outcome["success"].as_bool() != Some(true) {
        let kind = outcome["kind"].as_str().unwrap_or("Error");
        lines.push(format!("error ({kind}): {message}"));
        return lines;
    }
    lines.push(message.to_string());

    match command {
        "attend" => {
            let present = string_list(&outcome["present_students"]);
            let absent = string_list(&outcome["absent_students"]);
            lines.push(format!("Present ({}): {}", present.len(), present.join(", ")));
            lines.push(format!("Absent ({}): {}", absent.len(), absent.join(", ")));
            lines.push(format!("Record: {}", outcome["record_id"]));
            if let Some(url) = outcome["sheet_url"].as_str() {
                lines.push(format!("Sheet: {url}"));
            }
        }
        "sessions" => {
            for session in outcome["sessions"].as_array().into_iter().flatten() {
                lines.push(format!(
                    "  {}  {}",
                    session["id"],
                    session["name"].as_str().unwrap_or_default()
                ));
            }
        }
        "stats" => {
            let report = StatisticsReport {
                above_75: serde_json::from_value(outcome["above_75"].clone()).unwrap_or_default(),
                below_75: serde_json::from_value(outcome["below_75"].clone()).unwrap_or_default(),
            };
            lines.extend(report_lines(&report));
            if let Some(path) = outcome["report_path"].as_str() {
                lines.push(format!("Report: {path}"));
            }
        }
        "status" => {
            lines.push(format!("version: {}", outcome["version"]));
            lines.push(format!("models loaded: {}", outcome["models_loaded"]));
            lines.push(format!("students enrolled: {}", outcome["students"]));
        }
        _ => {}
    }
    lines
}

fn print_outcome(command: &str, json: &str) -> Result<()> {
    let outcome: Value = serde_json::from_str(json).context("daemon returned malformed outcome")?;
    let lines = outcome_lines(command, &outcome);
    if outcome["success"].as_bool() == Some(true) {
        for line in lines {
            println!("{line}");
        }
        Ok(())
    } else {
        for line in &lines {
            eprintln!("{line}");
        }
        bail!("{command} failed")
    }
}

/// Statistics computed straight from a session log, without the daemon.
fn offline_report(path: &Path) -> Result<Vec<String>> {
    tracing::debug!(path = %path.display(), "computing statistics offline");
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let report = partition(&compute_statistics(&text));
    tracing::debug!(
        above_75 = report.above_75.len(),
        below_75 = report.below_75.len(),
        "offline statistics computed"
    );
    if report.is_empty() {
        bail!("no attendance sessions could be parsed from {}", path.display());
    }
    Ok(report_lines(&report))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Stats {
        log: Some(path), ..
    } = &cli.command
    {
        for line in offline_report(path)? {
            println!("{line}");
        }
        return Ok(());
    }

    tracing::debug!(system = cli.system, "connecting to D-Bus");
    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = RollcallProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;
    tracing::debug!(destination = %proxy.inner().destination(), "rollcalld proxy ready");

    match cli.command {
        Commands::Enroll {
            usn,
            name,
            semester,
            section,
            photos,
        } => {
            let photos = absolute_paths(&photos)?;
            let json = proxy.enroll(&usn, &name, &semester, &section, &photos).await?;
            print_outcome("enroll", &json)
        }
        Commands::Attend {
            subject,
            semester,
            section,
            photos,
        } => {
            let photos = absolute_paths(&photos)?;
            let json = proxy
                .take_attendance(&subject, &semester, &section, &photos)
                .await?;
            print_outcome("attend", &json)
        }
        Commands::Sessions {
            semester,
            section,
            subject,
        } => {
            let json = proxy.list_sessions(&semester, &section, &subject).await?;
            print_outcome("sessions", &json)
        }
        Commands::Stats { record_id, .. } => {
            let record_id = record_id.context("a record id is required")?;
            let json = proxy.generate_statistics(record_id).await?;
            print_outcome("stats", &json)
        }
        Commands::Status => {
            let json = proxy.status().await?;
            print_outcome("status", &json)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_stats_needs_record_or_log() {
        assert!(Cli::try_parse_from(["rollcall", "stats"]).is_err());
        assert!(Cli::try_parse_from(["rollcall", "stats", "3"]).is_ok());
        assert!(Cli::try_parse_from(["rollcall", "stats", "--log", "a.txt"]).is_ok());
        assert!(Cli::try_parse_from(["rollcall", "stats", "3", "--log", "a.txt"]).is_err());
    }

    #[test]
    fn test_enroll_requires_photos() {
        let base = ["rollcall", "enroll", "--usn", "1", "--name", "Asha", "--semester", "5", "--section", "A"];
        assert!(Cli::try_parse_from(base).is_err());
        let with_photo: Vec<&str> = base.iter().copied().chain(["me.jpg"]).collect();
        assert!(Cli::try_parse_from(with_photo).is_ok());
    }

    #[test]
    fn test_attend_outcome_lines() {
        let outcome = serde_json::json!({
            "success": true,
            "message": "Attendance recorded successfully",
            "present_students": ["Asha (1)"],
            "absent_students": ["Ben (2)", "Cara (3)"],
            "record_id": 4,
            "sheet_url": null,
        });
        assert_eq!(
            outcome_lines("attend", &outcome),
            vec![
                "Attendance recorded successfully",
                "Present (1): Asha (1)",
                "Absent (2): Ben (2), Cara (3)",
                "Record: 4",
            ]
        );
    }

    #[test]
    fn test_failure_outcome_lines() {
        let outcome = serde_json::json!({
            "success": false,
            "kind": "DuplicateIdentity",
            "message": "face matches existing student Asha (1)",
        });
        assert_eq!(
            outcome_lines("enroll", &outcome),
            vec!["error (DuplicateIdentity): face matches existing student Asha (1)"]
        );
    }

    #[test]
    fn test_stats_outcome_lines() {
        let outcome = serde_json::json!({
            "success": true,
            "message": "Statistics generated",
            "above_75": [{"student": "Asha (1)", "percentage": 80.0}],
            "below_75": [],
        });
        assert_eq!(
            outcome_lines("stats", &outcome),
            vec![
                "Statistics generated",
                "Above 75% attendance:",
                "  Asha (1): 80.00%",
                "Below 75% attendance:",
                "  (none)",
            ]
        );
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_offline_report_logs_its_source() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let missing = Path::new("/nonexistent/attendance_5_maths_A.txt");
        let result = tracing::subscriber::with_default(subscriber, || offline_report(missing));
        assert!(result.is_err());

        let log = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(log.contains("computing statistics offline"));
        assert!(log.contains("attendance_5_maths_A.txt"));
    }
}
