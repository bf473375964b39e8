use chrono::NaiveDate;
use serde::Serialize;

use crate::identity::StudentIdentity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingHeader {
    pub title: Option<String>,
    pub duration_minutes: u32,
    /// False when the export had no duration line and the fallback was used.
    pub from_export: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawParticipantRow {
    /// 1-based line number in the decoded export.
    pub line: usize,
    pub display_name: String,
    pub roll_number: Option<String>,
    pub segment_duration_raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParticipant {
    pub identity: StudentIdentity,
    pub display_name: String,
    pub total_duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cohort {
    pub cohort_type: String,
    pub cohort_number: String,
}

impl Cohort {
    pub fn new(cohort_type: impl Into<String>, cohort_number: impl Into<String>) -> Self {
        Self {
            cohort_type: cohort_type.into(),
            cohort_number: cohort_number.into(),
        }
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.cohort_type, self.cohort_number)
    }
}

/// Caller-supplied context for one uploaded export.
#[derive(Debug, Clone)]
pub struct ClassSession {
    pub cohort: Cohort,
    pub subject: String,
    pub class_date: NaiveDate,
    pub teacher_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub log_id: i64,
    pub identity: StudentIdentity,
    pub cohort_type: String,
    pub cohort_number: String,
    pub subject: String,
    pub class_date: NaiveDate,
    pub teacher_name: String,
    pub present: bool,
}

#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub identity: StudentIdentity,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentStat {
    pub identity: StudentIdentity,
    pub name: String,
    pub cohort_type: String,
    pub cohort_number: String,
    pub total_classes: i32,
    pub present_classes: i32,
    pub overall_attendance_pct: f64,
}

impl StudentStat {
    pub fn first_class(entry: &RosterEntry, cohort: &Cohort, present: bool) -> Self {
        let present_classes = i32::from(present);
        Self {
            identity: entry.identity.clone(),
            name: entry.display_name.clone(),
            cohort_type: cohort.cohort_type.clone(),
            cohort_number: cohort.cohort_number.clone(),
            total_classes: 1,
            present_classes,
            overall_attendance_pct: attendance_pct(present_classes, 1),
        }
    }

    pub fn record_class(&mut self, present: bool) {
        self.total_classes += 1;
        if present {
            self.present_classes += 1;
        }
        self.overall_attendance_pct = attendance_pct(self.present_classes, self.total_classes);
    }
}

pub fn attendance_pct(present: i32, total: i32) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let pct = f64::from(present) / f64::from(total) * 100.0;
    (pct * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> RosterEntry {
        RosterEntry {
            identity: StudentIdentity::parse("25MBY3001").unwrap(),
            display_name: "Priya Shah".to_string(),
        }
    }

    #[test]
    fn pct_rounds_to_two_places() {
        assert_eq!(attendance_pct(2, 3), 66.67);
        assert_eq!(attendance_pct(1, 3), 33.33);
        assert_eq!(attendance_pct(0, 0), 0.0);
    }

    #[test]
    fn first_class_sets_counters() {
        let cohort = Cohort::new("Basic", "3");
        let stat = StudentStat::first_class(&entry(), &cohort, false);
        assert_eq!(stat.total_classes, 1);
        assert_eq!(stat.present_classes, 0);
        assert_eq!(stat.overall_attendance_pct, 0.0);
    }

    #[test]
    fn record_class_keeps_pct_in_sync() {
        let cohort = Cohort::new("Basic", "3");
        let mut stat = StudentStat::first_class(&entry(), &cohort, true);
        stat.record_class(false);
        stat.record_class(true);
        assert_eq!(stat.total_classes, 3);
        assert_eq!(stat.present_classes, 2);
        assert_eq!(stat.overall_attendance_pct, 66.67);
        assert!(stat.present_classes <= stat.total_classes);
    }
}
