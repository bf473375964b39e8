//! Folds one class's attendance into the cumulative per-student counters.
//!
//! Every enrolled student gets a class counted, whether or not they show up
//! in the export. Each student is counted at most once per cohort/date: the
//! ledger row is written together with the counters, so a student whose write
//! failed stays unclaimed and a later run picks them up.

use std::collections::HashMap;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::Result;
use crate::identity::StudentIdentity;
use crate::models::{AttendanceRecord, Cohort};
use crate::store::AttendanceStore;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub updated: usize,
    /// Students an earlier run already counted for this class.
    pub already_counted: usize,
    pub errors: Vec<String>,
}

pub async fn reconcile_stats(
    store: &dyn AttendanceStore,
    cohort: &Cohort,
    class_date: NaiveDate,
    records: &[AttendanceRecord],
    run_id: Uuid,
) -> Result<ReconcileOutcome> {
    let roster = store.fetch_roster(cohort).await?;
    if roster.is_empty() {
        let warning = format!("No students found in enrollment roster for {}", cohort.label());
        tracing::warn!("{warning}");
        return Ok(ReconcileOutcome {
            errors: vec![warning],
            ..ReconcileOutcome::default()
        });
    }

    let presence: HashMap<&StudentIdentity, bool> = records
        .iter()
        .filter(|r| {
            r.class_date == class_date
                && r.cohort_type == cohort.cohort_type
                && r.cohort_number == cohort.cohort_number
        })
        .map(|r| (&r.identity, r.present))
        .collect();

    let mut outcome = ReconcileOutcome::default();
    for entry in &roster {
        let present = presence.get(&entry.identity).copied().unwrap_or(false);
        match store
            .record_class(entry, cohort, class_date, present, run_id)
            .await
        {
            Ok(Some(_)) => outcome.updated += 1,
            Ok(None) => outcome.already_counted += 1,
            Err(err) => {
                let message = format!("Error updating {}: {err}", entry.identity);
                tracing::warn!("{message}");
                outcome.errors.push(message);
            }
        }
    }

    if outcome.already_counted > 0 {
        let warning = format!(
            "Stats for {} on {class_date} were already reconciled for {} students; skipped them",
            cohort.label(),
            outcome.already_counted
        );
        tracing::warn!("{warning}");
        outcome.errors.push(warning);
    }

    tracing::info!(
        "updated {} student stats for {} ({} errors)",
        outcome.updated,
        cohort.label(),
        outcome.errors.len()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn record(cohort: &Cohort, id: &str, present: bool) -> AttendanceRecord {
        AttendanceRecord {
            log_id: 1,
            identity: StudentIdentity::parse(id).unwrap(),
            cohort_type: cohort.cohort_type.clone(),
            cohort_number: cohort.cohort_number.clone(),
            subject: "DSA".to_string(),
            class_date: date(),
            teacher_name: "Ms. Rao".to_string(),
            present,
        }
    }

    fn three_student_store(cohort: &Cohort) -> MemoryStore {
        MemoryStore::with_roster(
            cohort,
            &[
                ("25MBY3001", "Priya Shah"),
                ("25MBY3002", "Ravi Kumar"),
                ("25MBY3003", "Meera Iyer"),
            ],
        )
    }

    #[tokio::test]
    async fn absent_by_default_for_the_whole_roster() {
        let cohort = Cohort::new("Basic", "3");
        let store = three_student_store(&cohort);
        let records = vec![
            record(&cohort, "25MBY3001", true),
            record(&cohort, "25MBY3002", true),
        ];

        let outcome = reconcile_stats(&store, &cohort, date(), &records, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(outcome.updated, 3);
        assert!(outcome.errors.is_empty());
        let missing = store.stat("25MBY3003").unwrap();
        assert_eq!((missing.total_classes, missing.present_classes), (1, 0));
        assert_eq!(missing.overall_attendance_pct, 0.0);
        assert_eq!(missing.name, "Meera Iyer");
        for id in ["25MBY3001", "25MBY3002"] {
            let stat = store.stat(id).unwrap();
            assert_eq!((stat.total_classes, stat.present_classes), (1, 1));
            assert_eq!(stat.overall_attendance_pct, 100.0);
        }
    }

    #[tokio::test]
    async fn existing_stats_are_incremented() {
        let cohort = Cohort::new("Basic", "3");
        let store = three_student_store(&cohort);
        let first = vec![record(&cohort, "25MBY3001", true)];
        reconcile_stats(&store, &cohort, date(), &first, Uuid::new_v4())
            .await
            .unwrap();

        let next_day = date().succ_opt().unwrap();
        let mut second = record(&cohort, "25MBY3001", false);
        second.class_date = next_day;
        reconcile_stats(&store, &cohort, next_day, &[second], Uuid::new_v4())
            .await
            .unwrap();

        let stat = store.stat("25MBY3001").unwrap();
        assert_eq!((stat.total_classes, stat.present_classes), (2, 1));
        assert_eq!(stat.overall_attendance_pct, 50.0);
    }

    #[tokio::test]
    async fn rerunning_the_same_class_does_not_double_count() {
        let cohort = Cohort::new("Basic", "3");
        let store = three_student_store(&cohort);
        let records = vec![record(&cohort, "25MBY3001", true)];

        reconcile_stats(&store, &cohort, date(), &records, Uuid::new_v4())
            .await
            .unwrap();
        let again = reconcile_stats(&store, &cohort, date(), &records, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(again.updated, 0);
        assert_eq!(again.already_counted, 3);
        assert_eq!(again.errors.len(), 1);
        assert!(again.errors[0].contains("already reconciled"));
        for id in ["25MBY3001", "25MBY3002", "25MBY3003"] {
            assert_eq!(store.stat(id).unwrap().total_classes, 1);
        }
    }

    #[tokio::test]
    async fn empty_roster_is_a_single_warning() {
        let cohort = Cohort::new("Advanced", "1");
        let store = MemoryStore::default();
        let outcome = reconcile_stats(&store, &cohort, date(), &[], Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(outcome.updated, 0);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("Advanced 1"));
    }

    #[tokio::test]
    async fn per_student_failures_are_collected() {
        let cohort = Cohort::new("Basic", "3");
        let store = three_student_store(&cohort);
        store.fail_writes_for("25MBY3002");

        let outcome = reconcile_stats(&store, &cohort, date(), &[], Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(outcome.updated, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("Error updating 25MBY3002"));
        assert!(store.stat("25MBY3002").is_none());
    }

    #[tokio::test]
    async fn failed_students_are_picked_up_on_the_next_run() {
        let cohort = Cohort::new("Basic", "3");
        let store = three_student_store(&cohort);
        let records = vec![
            record(&cohort, "25MBY3001", true),
            record(&cohort, "25MBY3002", true),
        ];
        store.fail_writes_for("25MBY3002");

        let first = reconcile_stats(&store, &cohort, date(), &records, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(first.updated, 2);
        assert!(store.stat("25MBY3002").is_none());

        store.clear_failures();
        let retry = reconcile_stats(&store, &cohort, date(), &records, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(retry.updated, 1);
        assert_eq!(retry.already_counted, 2);
        let ravi = store.stat("25MBY3002").unwrap();
        assert_eq!((ravi.total_classes, ravi.present_classes), (1, 1));
        for id in ["25MBY3001", "25MBY3003"] {
            assert_eq!(store.stat(id).unwrap().total_classes, 1);
        }
    }
}
