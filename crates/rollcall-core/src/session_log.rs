//! Plain-text session log format.
//!
//! ```text
//! --- Attendance Session: 2024-03-04 09:15:00 ---
//! Present Students: Asha (1AM22CI001), Ben (1AM22CI002)
//! Absent Students: Chen (1AM22CI003)
//! ```
//!
//! Blocks are only ever appended. Lines outside a block are ignored.

use crate::error::AttendError;
use crate::types::SessionRecord;
use chrono::NaiveDate;

pub const SESSION_HEADER: &str = "--- Attendance Session:";
pub const PRESENT_PREFIX: &str = "Present Students:";
pub const ABSENT_PREFIX: &str = "Absent Students:";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// One session read back from a log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedSession {
    pub date: NaiveDate,
    pub present: Vec<String>,
    pub absent: Vec<String>,
}

/// Render one record as a log block, leading blank line included.
pub fn format_session(record: &SessionRecord) -> String {
    format!(
        "\n{SESSION_HEADER} {} ---\n{PRESENT_PREFIX} {}\n{ABSENT_PREFIX} {}\n",
        record.timestamp.format(TIMESTAMP_FORMAT),
        record.present.join(", "),
        record.absent.join(", "),
    )
}

fn split_entries(rest: &str) -> Vec<String> {
    rest.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a whole log into sessions, oldest first.
///
/// A header opens a session that runs until the next header or end of input,
/// so a final block without a trailing newline is still returned. A header
/// whose date cannot be read fails the parse.
pub fn parse_session_log(text: &str) -> Result<Vec<LoggedSession>, AttendError> {
    let mut sessions = Vec::new();
    let mut current: Option<LoggedSession> = None;

    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim_end();
        if let Some(rest) = line.strip_prefix(SESSION_HEADER) {
            sessions.extend(current.take());
            let date_str = rest.split_whitespace().next().unwrap_or_default();
            let date = NaiveDate::parse_from_str(date_str, DATE_FORMAT).map_err(|e| {
                AttendError::ParseFailure {
                    line: i + 1,
                    reason: format!("bad session date {date_str:?}: {e}"),
                }
            })?;
            current = Some(LoggedSession {
                date,
                present: Vec::new(),
                absent: Vec::new(),
            });
        } else if let Some(rest) = line.strip_prefix(PRESENT_PREFIX) {
            if let Some(session) = current.as_mut() {
                session.present = split_entries(rest);
            }
        } else if let Some(rest) = line.strip_prefix(ABSENT_PREFIX) {
            if let Some(session) = current.as_mut() {
                session.absent = split_entries(rest);
            }
        }
    }

    sessions.extend(current);
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn record(ts: &str, present: &[&str], absent: &[&str]) -> SessionRecord {
        SessionRecord {
            timestamp: NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).unwrap(),
            subject: "Maths".into(),
            semester: "5".into(),
            section: "A".into(),
            present: present.iter().map(|s| s.to_string()).collect(),
            absent: absent.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_format_session() {
        let text = format_session(&record(
            "2024-03-04 09:15:00",
            &["Asha (1)", "Ben (2)"],
            &["Chen (3)"],
        ));
        assert_eq!(
            text,
            "\n--- Attendance Session: 2024-03-04 09:15:00 ---\n\
             Present Students: Asha (1), Ben (2)\n\
             Absent Students: Chen (3)\n"
        );
    }

    #[test]
    fn test_written_sessions_read_back() {
        let records = [
            record("2024-03-04 09:15:00", &["Asha (1)", "Ben (2)"], &["Chen (3)"]),
            record("2024-03-05 09:15:00", &[], &["Asha (1)", "Ben (2)", "Chen (3)"]),
        ];
        let log: String = records.iter().map(format_session).collect();

        let sessions = parse_session_log(&log).unwrap();
        assert_eq!(sessions.len(), 2);
        for (session, rec) in sessions.iter().zip(&records) {
            assert_eq!(session.date, rec.timestamp.date());
            assert_eq!(session.present, rec.present);
            assert_eq!(session.absent, rec.absent);
        }
    }

    #[test]
    fn test_unterminated_final_session() {
        let log = "--- Attendance Session: 2024-01-02 10:00:00 ---\nPresent Students: Asha";
        let sessions = parse_session_log(log).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].present, vec!["Asha".to_string()]);
        assert!(sessions[0].absent.is_empty());
    }

    #[test]
    fn test_empty_entries_dropped_and_crlf() {
        let log = "--- Attendance Session: 2024-01-02 10:00:00 ---\r\n\
                   Present Students:  Asha , ,Ben,\r\n\
                   Absent Students: \r\n";
        let sessions = parse_session_log(log).unwrap();
        assert_eq!(sessions[0].present, vec!["Asha".to_string(), "Ben".to_string()]);
        assert!(sessions[0].absent.is_empty());
    }

    #[test]
    fn test_lines_before_first_header_ignored() {
        let log = "Present Students: Ghost\n\n--- Attendance Session: 2024-01-02 10:00:00 ---\n";
        let sessions = parse_session_log(log).unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].present.is_empty());
    }

    #[test]
    fn test_bad_header_date() {
        let log = "\n--- Attendance Session: yesterday ---\n";
        let err = parse_session_log(log).unwrap_err();
        assert!(matches!(err, AttendError::ParseFailure { line: 2, .. }));
    }

    #[test]
    fn test_empty_log() {
        assert!(parse_session_log("").unwrap().is_empty());
    }
}
