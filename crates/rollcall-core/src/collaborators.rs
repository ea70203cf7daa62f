//! Persistence and export seams used around an attendance session.

use crate::error::AttendError;
use crate::session_log::LoggedSession;
use crate::statistics::StatisticsReport;
use crate::types::SessionRecord;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One row of the attendance-records table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub date: NaiveDate,
    pub semester: String,
    pub section: String,
    pub subject: String,
    pub sheet_id: Option<String>,
    pub log_path: Option<String>,
}

/// Relational side: session rows and per-student present/absent details.
pub trait RecordStore: Send + Sync {
    fn create_session_record(
        &self,
        subject: &str,
        semester: &str,
        section: &str,
        date: NaiveDate,
        sheet_id: Option<&str>,
        log_path: Option<&str>,
    ) -> Result<i64, AttendError>;

    /// Insert `(student_id, present)` rows for one session in one transaction.
    /// Ids with no student row are skipped; returns the number written.
    fn create_attendance_details(&self, record_id: i64, details: &[(String, bool)]) -> Result<usize, AttendError>;

    /// Records of one class and subject, newest first.
    fn list_records(&self, semester: &str, section: &str, subject: &str) -> Result<Vec<AttendanceRecord>, AttendError>;

    fn get_record(&self, id: i64) -> Result<AttendanceRecord, AttendError>;
}

/// Append-only text log, one per (semester, subject, section).
pub trait SessionLogStore: Send + Sync {
    fn log_path(&self, subject: &str, semester: &str, section: &str) -> PathBuf;

    /// Append one block; returns the log file it went to.
    fn append_session(&self, record: &SessionRecord) -> Result<PathBuf, AttendError>;

    fn exists(&self, subject: &str, semester: &str, section: &str) -> bool {
        self.log_path(subject, semester, section).exists()
    }

    /// Raw text of the log at `path`. A missing log is `RecordNotFound`.
    fn read_log_file(&self, path: &Path) -> Result<String, AttendError>;

    /// Raw text of the class log under the current layout.
    fn read_log(&self, subject: &str, semester: &str, section: &str) -> Result<String, AttendError> {
        self.read_log_file(&self.log_path(subject, semester, section))
    }

    /// Every session of the log, oldest first.
    fn read_sessions(&self, subject: &str, semester: &str, section: &str) -> Result<Vec<LoggedSession>, AttendError> {
        crate::session_log::parse_session_log(&self.read_log(subject, semester, section)?)
    }
}

/// Spreadsheet with `Present` and `Absent` tabs per class and subject.
pub trait SheetExporter: Send + Sync {
    /// Existing sheet id for the class and subject, creating the sheet when
    /// there is none.
    fn ensure_sheet(&self, subject: &str, section: &str, semester: &str) -> Result<String, AttendError>;

    /// Append rows below whatever `range` (e.g. `Present!A1`) already holds.
    /// Every call appends; callers call once per session.
    fn append_rows(&self, sheet_id: &str, range: &str, rows: &[Vec<String>]) -> Result<(), AttendError>;

    /// Link shown to the instructor.
    fn sheet_url(&self, sheet_id: &str) -> String;
}

/// Renders a statistics report into a document.
pub trait ReportRenderer: Send + Sync {
    /// File extension of rendered documents, without the dot.
    fn extension(&self) -> &'static str;

    fn render(&self, title: &str, report: &StatisticsReport) -> Vec<u8>;
}
