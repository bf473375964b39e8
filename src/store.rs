//! The narrow read/write contract the pipeline needs from persistent storage.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{AttendanceRecord, Cohort, RosterEntry, StudentStat};

pub const GLOBAL_LOG_TABLE: &str = "attendance_logs";

/// Per-cohort log table name, e.g. ("Basic", "3.0") -> `basic3_logs`.
pub fn cohort_log_table(cohort: &Cohort) -> String {
    let kind: String = cohort
        .cohort_type
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    let number: String = cohort
        .cohort_number
        .split('.')
        .next()
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    format!("{kind}{number}_logs")
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn fetch_roster(&self, cohort: &Cohort) -> Result<Vec<RosterEntry>>;

    /// Creates the log table when it does not exist yet.
    async fn ensure_log_table(&self, table: &str) -> Result<()>;

    /// Highest `log_id` in `table`, or 0 when empty.
    async fn last_log_id(&self, table: &str) -> Result<i64>;

    async fn append_log(&self, table: &str, record: &AttendanceRecord) -> Result<()>;

    /// Counts one class for a roster student and claims the student/cohort/date
    /// in the reconciliation ledger, both or neither.
    ///
    /// Returns the updated counters, or `None` when an earlier run already
    /// counted this class for the student.
    async fn record_class(
        &self,
        entry: &RosterEntry,
        cohort: &Cohort,
        class_date: NaiveDate,
        present: bool,
        run_id: Uuid,
    ) -> Result<Option<StudentStat>>;

    async fn ping(&self) -> Result<()>;
}
