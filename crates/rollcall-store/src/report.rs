use rollcall_core::statistics::{AttendanceStat, ATTENDANCE_CUTOFF};
use rollcall_core::{ReportRenderer, StatisticsReport};
use std::fmt::Write;

/// Plain-text attendance report: one section per side of the cutoff.
pub struct TextReport;

fn write_section(out: &mut String, heading: &str, stats: &[AttendanceStat]) {
    let _ = writeln!(out, "{heading}");
    if stats.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for stat in stats {
        let _ = writeln!(out, "  {}: {:.2}%", stat.student, stat.percentage);
    }
}

impl ReportRenderer for TextReport {
    fn extension(&self) -> &'static str {
        "txt"
    }

    fn render(&self, title: &str, report: &StatisticsReport) -> Vec<u8> {
        let mut out = String::new();
        let _ = writeln!(out, "Attendance Statistics: {title}\n");
        write_section(
            &mut out,
            &format!("Above {ATTENDANCE_CUTOFF}% Attendance"),
            &report.above_75,
        );
        out.push('\n');
        write_section(
            &mut out,
            &format!("Below {ATTENDANCE_CUTOFF}% Attendance"),
            &report.below_75,
        );
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_sections() {
        let report = StatisticsReport {
            above_75: vec![AttendanceStat {
                student: "Asha (1)".into(),
                percentage: 87.5,
            }],
            below_75: vec![],
        };
        let text = String::from_utf8(TextReport.render("5 Maths A", &report)).unwrap();
        assert_eq!(
            text,
            "Attendance Statistics: 5 Maths A\n\n\
             Above 75% Attendance\n  Asha (1): 87.50%\n\n\
             Below 75% Attendance\n  (none)\n"
        );
    }
}
