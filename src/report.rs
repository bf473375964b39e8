use std::fmt::Write;

use crate::models::{Cohort, StudentStat};

#[derive(Debug, Clone, PartialEq)]
pub struct CohortSummary {
    pub students: usize,
    pub mean_attendance: f64,
    pub below_threshold: usize,
}

pub fn summarize(stats: &[StudentStat], below_pct: f64) -> CohortSummary {
    let students = stats.len();
    let mean_attendance = if students == 0 {
        0.0
    } else {
        stats.iter().map(|s| s.overall_attendance_pct).sum::<f64>() / students as f64
    };
    CohortSummary {
        students,
        mean_attendance,
        below_threshold: stats
            .iter()
            .filter(|s| s.overall_attendance_pct < below_pct)
            .count(),
    }
}

pub fn build_report(cohort: &Cohort, below_pct: f64, stats: &[StudentStat]) -> String {
    let summary = summarize(stats, below_pct);
    let mut sorted = stats.to_vec();
    sorted.sort_by(|a, b| {
        a.overall_attendance_pct
            .partial_cmp(&b.overall_attendance_pct)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.identity.cmp(&b.identity))
    });

    let mut output = String::new();
    let _ = writeln!(output, "# Attendance Report: {}", cohort.label());
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");

    if sorted.is_empty() {
        let _ = writeln!(output, "No attendance recorded for this cohort yet.");
        return output;
    }

    let _ = writeln!(output, "- Students tracked: {}", summary.students);
    let _ = writeln!(output, "- Mean attendance: {:.2}%", summary.mean_attendance);
    let _ = writeln!(
        output,
        "- Below {:.0}%: {}",
        below_pct, summary.below_threshold
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Below {below_pct:.0}%");
    let flagged: Vec<&StudentStat> = sorted
        .iter()
        .filter(|s| s.overall_attendance_pct < below_pct)
        .collect();
    if flagged.is_empty() {
        let _ = writeln!(output, "Everyone is at or above the threshold.");
    } else {
        for stat in flagged {
            let _ = writeln!(
                output,
                "- {} ({}) {:.2}% across {} classes",
                stat.name, stat.identity, stat.overall_attendance_pct, stat.total_classes
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Roster");
    let _ = writeln!(output, "| Enrollment ID | Name | Present | Total | Attendance |");
    let _ = writeln!(output, "|---|---|---|---|---|");
    for stat in &sorted {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {:.2}% |",
            stat.identity,
            stat.name,
            stat.present_classes,
            stat.total_classes,
            stat.overall_attendance_pct
        );
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StudentIdentity;
    use crate::models::attendance_pct;

    fn stat(id: &str, name: &str, present: i32, total: i32) -> StudentStat {
        StudentStat {
            identity: StudentIdentity::parse(id).unwrap(),
            name: name.to_string(),
            cohort_type: "Basic".to_string(),
            cohort_number: "3".to_string(),
            total_classes: total,
            present_classes: present,
            overall_attendance_pct: attendance_pct(present, total),
        }
    }

    #[test]
    fn summary_counts_students_below_threshold() {
        let stats = vec![
            stat("25MBY3001", "Priya", 4, 4),
            stat("25MBY3002", "Ravi", 1, 4),
        ];
        let summary = summarize(&stats, 75.0);
        assert_eq!(summary.students, 2);
        assert_eq!(summary.below_threshold, 1);
        assert!((summary.mean_attendance - 62.5).abs() < 0.001);
    }

    #[test]
    fn report_lists_lowest_attendance_first() {
        let stats = vec![
            stat("25MBY3001", "Priya", 4, 4),
            stat("25MBY3002", "Ravi", 1, 4),
        ];
        let report = build_report(&Cohort::new("Basic", "3"), 75.0, &stats);
        assert!(report.starts_with("# Attendance Report: Basic 3"));
        assert!(report.contains("- Ravi (25MBY3002) 25.00% across 4 classes"));
        let ravi = report.find("| 25MBY3002").unwrap();
        let priya = report.find("| 25MBY3001").unwrap();
        assert!(ravi < priya);
    }

    #[test]
    fn empty_cohort_report() {
        let report = build_report(&Cohort::new("Basic", "9"), 75.0, &[]);
        assert!(report.contains("No attendance recorded"));
    }
}
