//! Attendance percentages replayed from session logs.

use crate::session_log::{parse_session_log, LoggedSession};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Percentage at or above which a student is in good standing.
pub const ATTENDANCE_CUTOFF: f64 = 75.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceStat {
    pub student: String,
    pub percentage: f64,
}

/// Students split at [`ATTENDANCE_CUTOFF`], each side sorted by percentage
/// descending (ties by name).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub above_75: Vec<AttendanceStat>,
    pub below_75: Vec<AttendanceStat>,
}

impl StatisticsReport {
    pub fn is_empty(&self) -> bool {
        self.above_75.is_empty() && self.below_75.is_empty()
    }
}

/// Percentage of sessions each student was present in.
///
/// Every name seen in any present or absent list gets an entry. A name listed
/// twice in one session's present list still counts once for that session.
pub fn percentages(sessions: &[LoggedSession]) -> BTreeMap<String, f64> {
    let total = sessions.len();
    if total == 0 {
        return BTreeMap::new();
    }

    let mut present_counts: BTreeMap<String, usize> = BTreeMap::new();
    for session in sessions {
        let here: BTreeSet<&String> = session.present.iter().collect();
        for name in here {
            *present_counts.entry(name.clone()).or_default() += 1;
        }
        for name in &session.absent {
            present_counts.entry(name.clone()).or_default();
        }
    }

    present_counts
        .into_iter()
        .map(|(name, count)| (name, count as f64 / total as f64 * 100.0))
        .collect()
}

/// Parse a session log and compute percentages. A malformed log yields an
/// empty mapping.
pub fn compute_statistics(log: &str) -> BTreeMap<String, f64> {
    match parse_session_log(log) {
        Ok(sessions) => percentages(&sessions),
        Err(e) => {
            tracing::warn!(error = %e, "statistics: session log could not be parsed");
            BTreeMap::new()
        }
    }
}

pub fn partition(stats: &BTreeMap<String, f64>) -> StatisticsReport {
    let mut report = StatisticsReport::default();
    for (student, &percentage) in stats {
        let stat = AttendanceStat {
            student: student.clone(),
            percentage,
        };
        if percentage >= ATTENDANCE_CUTOFF {
            report.above_75.push(stat);
        } else {
            report.below_75.push(stat);
        }
    }

    let by_percentage_desc = |a: &AttendanceStat, b: &AttendanceStat| {
        b.percentage
            .total_cmp(&a.percentage)
            .then_with(|| a.student.cmp(&b.student))
    };
    report.above_75.sort_by(by_percentage_desc);
    report.below_75.sort_by(by_percentage_desc);
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(present: &[&str], absent: &[&str]) -> String {
        format!(
            "\n--- Attendance Session: 2024-01-01 09:00:00 ---\nPresent Students: {}\nAbsent Students: {}\n",
            present.join(", "),
            absent.join(", ")
        )
    }

    #[test]
    fn test_no_sessions_no_stats() {
        assert!(compute_statistics("").is_empty());
        assert!(partition(&compute_statistics("")).is_empty());
    }

    #[test]
    fn test_three_of_four_is_in_good_standing() {
        let log = [
            session(&["Asha", "Ben"], &[]),
            session(&["Asha"], &["Ben"]),
            session(&["Asha"], &["Ben"]),
            session(&[], &["Asha", "Ben"]),
        ]
        .concat();

        let stats = compute_statistics(&log);
        assert_eq!(stats["Asha"], 75.0);
        assert_eq!(stats["Ben"], 25.0);

        let report = partition(&stats);
        assert_eq!(report.above_75.len(), 1);
        assert_eq!(report.above_75[0].student, "Asha");
        assert_eq!(report.below_75[0].student, "Ben");
    }

    #[test]
    fn test_absent_only_student_gets_zero() {
        let log = session(&["Asha"], &["Ben"]);
        let stats = compute_statistics(&log);
        assert_eq!(stats["Ben"], 0.0);
        assert_eq!(stats["Asha"], 100.0);
    }

    #[test]
    fn test_duplicate_present_entry_counts_once() {
        let log = [session(&["Asha", "Asha"], &[]), session(&[], &["Asha"])].concat();
        assert_eq!(compute_statistics(&log)["Asha"], 50.0);
    }

    #[test]
    fn test_malformed_log_yields_empty() {
        let log = "--- Attendance Session: not-a-date ---\nPresent Students: Asha\n";
        assert!(compute_statistics(log).is_empty());
    }

    #[test]
    fn test_partition_sorted_descending() {
        let stats: BTreeMap<String, f64> = [
            ("A".to_string(), 80.0),
            ("B".to_string(), 100.0),
            ("C".to_string(), 10.0),
            ("D".to_string(), 74.99),
            ("E".to_string(), 80.0),
        ]
        .into();
        let report = partition(&stats);
        let names = |v: &[AttendanceStat]| v.iter().map(|s| s.student.clone()).collect::<Vec<_>>();
        assert_eq!(names(&report.above_75), vec!["B", "A", "E"]);
        assert_eq!(names(&report.below_75), vec!["D", "C"]);
    }
}
