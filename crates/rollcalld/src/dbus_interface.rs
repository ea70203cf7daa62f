use crate::engine::{AttendanceInput, EngineHandle, EnrollInput};
use crate::outcome::Outcome;
use chrono::NaiveDateTime;
use rollcall_core::session_log::TIMESTAMP_FORMAT;
use std::path::PathBuf;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Rollcall1";
pub const OBJECT_PATH: &str = "/org/rollcall/Rollcall1";

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
///
/// Every method returns an [`Outcome`] JSON string; failures are reported in
/// the envelope rather than as D-Bus errors.
pub struct RollcallService {
    engine: EngineHandle,
}

impl RollcallService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn paths(photo_paths: Vec<String>) -> Vec<PathBuf> {
    photo_paths.into_iter().map(PathBuf::from).collect()
}

fn timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Enroll (or re-enroll) a student from one or more photos on disk.
    async fn enroll(
        &self,
        usn: String,
        name: String,
        semester: String,
        section: String,
        photo_paths: Vec<String>,
    ) -> String {
        tracing::info!(usn = %usn, semester = %semester, section = %section, photos = photo_paths.len(), "enroll requested");
        let input = EnrollInput {
            id: usn,
            name,
            semester,
            section,
            photos: paths(photo_paths),
        };
        let outcome = match self.engine.enroll(input).await {
            Ok(status) => Outcome::ok(status.message()).with("status", status),
            Err(e) => {
                tracing::warn!(error = %e, "enroll failed");
                Outcome::from_error(&e)
            }
        };
        outcome.to_json()
    }

    /// Recognize a class in classroom photos and record the session.
    async fn take_attendance(
        &self,
        subject: String,
        semester: String,
        section: String,
        photo_paths: Vec<String>,
    ) -> String {
        tracing::info!(subject = %subject, semester = %semester, section = %section, photos = photo_paths.len(), "take_attendance requested");
        let input = AttendanceInput {
            subject,
            semester,
            section,
            photos: paths(photo_paths),
        };
        let outcome = match self.engine.take_attendance(input).await {
            Ok(summary) => Outcome::ok("Attendance recorded successfully")
                .with("record_id", summary.record_id)
                .with("timestamp", timestamp(&summary.timestamp))
                .with("present_students", summary.outcome.present_entries())
                .with("absent_students", summary.outcome.absent_entries())
                .with("log_path", summary.log_path)
                .with("sheet_url", summary.sheet_url),
            Err(e) => {
                tracing::warn!(error = %e, "take_attendance failed");
                Outcome::from_error(&e)
            }
        };
        outcome.to_json()
    }

    /// Recorded sessions of a class and subject, newest first.
    async fn list_sessions(&self, semester: String, section: String, subject: String) -> String {
        let outcome = match self.engine.list_sessions(semester, section, subject).await {
            Ok(sessions) => {
                let message = format!("{} session(s)", sessions.len());
                Outcome::ok(message).with("sessions", sessions)
            }
            Err(e) => Outcome::from_error(&e),
        };
        outcome.to_json()
    }

    /// Attendance percentages for the class and subject of `record_id`.
    async fn generate_statistics(&self, record_id: i64) -> String {
        tracing::info!(record_id, "generate_statistics requested");
        let outcome = match self.engine.generate_statistics(record_id).await {
            Ok(summary) if summary.report.is_empty() => {
                Outcome::failed("ParseFailure", "failed to parse attendance log")
                    .with("above_75", &summary.report.above_75)
                    .with("below_75", &summary.report.below_75)
            }
            Ok(summary) => Outcome::ok("Statistics generated")
                .with("record", &summary.record)
                .with("above_75", &summary.report.above_75)
                .with("below_75", &summary.report.below_75)
                .with("report_path", summary.report_path),
            Err(e) => {
                tracing::warn!(error = %e, "generate_statistics failed");
                Outcome::from_error(&e)
            }
        };
        outcome.to_json()
    }

    /// Return daemon status information.
    async fn status(&self) -> String {
        let outcome = match self.engine.status().await {
            Ok(status) => Outcome::ok("running")
                .with("version", env!("CARGO_PKG_VERSION"))
                .with("models_loaded", status.models_loaded)
                .with("students", status.students),
            Err(e) => Outcome::from_error(&e),
        };
        outcome.to_json()
    }
}
