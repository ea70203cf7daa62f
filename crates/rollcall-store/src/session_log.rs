use rollcall_core::session_log::format_session;
use rollcall_core::{AttendError, SessionLogStore, SessionRecord};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Session logs as text files under one directory.
pub struct FileSessionLog {
    dir: PathBuf,
}

impl FileSessionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn append(&self, path: &Path, block: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        // One write per block so concurrent appenders never interleave lines.
        file.write_all(block.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }
}

impl SessionLogStore for FileSessionLog {
    fn log_path(&self, subject: &str, semester: &str, section: &str) -> PathBuf {
        self.dir
            .join(format!("attendance_{semester}_{subject}_{section}.txt"))
    }

    fn append_session(&self, record: &SessionRecord) -> Result<PathBuf, AttendError> {
        let path = self.log_path(&record.subject, &record.semester, &record.section);
        self.append(&path, &format_session(record))?;
        tracing::debug!(path = %path.display(), "session log appended");
        Ok(path)
    }

    fn read_log_file(&self, path: &Path) -> Result<String, AttendError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AttendError::RecordNotFound(format!(
                "session log {}",
                path.display()
            ))),
            Err(e) => Err(StoreError::from(e).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn record(ts: &str, present: &[&str], absent: &[&str]) -> SessionRecord {
        SessionRecord {
            timestamp: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").unwrap(),
            subject: "Maths".into(),
            semester: "5".into(),
            section: "A".into(),
            present: present.iter().map(|s| s.to_string()).collect(),
            absent: absent.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_append_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileSessionLog::new(dir.path().join("sessions"));

        let first = record("2024-03-01 09:00:00", &["Asha (1)"], &["Ben (2)"]);
        let second = record("2024-03-02 09:00:00", &["Asha (1)", "Ben (2)"], &[]);
        let path = log.append_session(&first).unwrap();
        assert_eq!(log.append_session(&second).unwrap(), path);
        assert!(path.ends_with("attendance_5_Maths_A.txt"));

        let sessions = log.read_sessions("Maths", "5", "A").unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].present, first.present);
        assert_eq!(sessions[0].absent, first.absent);
        assert_eq!(sessions[1].present, second.present);
        assert!(sessions[1].absent.is_empty());
    }

    #[test]
    fn test_read_log_file_outside_layout() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileSessionLog::new(dir.path().join("sessions"));
        let moved = dir.path().join("archive.txt");
        fs::write(&moved, format_session(&record("2024-03-01 09:00:00", &["Asha (1)"], &[]))).unwrap();

        let text = log.read_log_file(&moved).unwrap();
        assert!(text.contains("Present Students: Asha (1)"));
        assert!(matches!(
            log.read_log_file(&dir.path().join("gone.txt")),
            Err(AttendError::RecordNotFound(_))
        ));
    }

    #[test]
    fn test_missing_log_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileSessionLog::new(dir.path());
        assert!(!log.exists("Maths", "5", "A"));
        assert!(matches!(
            log.read_log("Maths", "5", "A"),
            Err(AttendError::RecordNotFound(_))
        ));
    }
}
