//! One upload, start to finish: decode, parse, resolve, classify, log,
//! reconcile.

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::classify;
use crate::config::{LogTableMode, Settings};
use crate::decode;
use crate::duration;
use crate::error::{ProcessError, Result};
use crate::export::{self, ExportRules};
use crate::models::{AttendanceRecord, ClassSession, Cohort};
use crate::reconcile;
use crate::store::{self, AttendanceStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    pub success: bool,
    pub message: String,
    pub run_id: Uuid,
    pub subject: String,
    pub batch: String,
    pub class_date: NaiveDate,
    pub log_table: String,
    pub meeting_minutes: u32,
    pub processed: usize,
    pub present: usize,
    pub absent: usize,
    pub unresolved: usize,
    pub rejected_rows: usize,
    pub stats_updated: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessFailure {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProcessOutcome {
    Success(ProcessSummary),
    Failure(ProcessFailure),
}

impl ProcessOutcome {
    pub fn failure(error: impl ToString) -> Self {
        ProcessOutcome::Failure(ProcessFailure {
            success: false,
            error: error.to_string(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Success(_))
    }
}

pub fn parse_class_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ProcessError::InvalidDate(value.to_string()))
}

pub fn log_table_for(mode: LogTableMode, cohort: &Cohort) -> String {
    match mode {
        LogTableMode::Global => store::GLOBAL_LOG_TABLE.to_string(),
        LogTableMode::Cohort => store::cohort_log_table(cohort),
    }
}

/// Runs the pipeline; every failure is folded into the returned outcome.
pub async fn process_export(
    store: &dyn AttendanceStore,
    settings: &Settings,
    bytes: &[u8],
    session: &ClassSession,
) -> ProcessOutcome {
    match run(store, settings, bytes, session).await {
        Ok(summary) => ProcessOutcome::Success(summary),
        Err(err) => {
            tracing::error!("error processing attendance export: {err}");
            ProcessOutcome::failure(err)
        }
    }
}

async fn run(
    store: &dyn AttendanceStore,
    settings: &Settings,
    bytes: &[u8],
    session: &ClassSession,
) -> Result<ProcessSummary> {
    let run_id = Uuid::new_v4();
    let cohort = &session.cohort;
    tracing::info!(
        %run_id,
        "processing {} / {} on {} ({})",
        cohort.label(),
        session.subject,
        session.class_date,
        session.teacher_name
    );

    let (text, _) = decode::decode_export(bytes, &settings.encodings)?;
    let rules = ExportRules {
        min_row_fields: settings.min_row_fields,
        default_meeting_minutes: settings.default_meeting_minutes,
    };
    let parsed = export::parse_export(&text, &rules)?;
    let aggregation = duration::aggregate(&parsed.rows);
    if aggregation.participants.is_empty() {
        return Err(ProcessError::NoParticipants);
    }

    if let Some(title) = &parsed.header.title {
        tracing::info!("meeting title: {title}");
    }
    if !parsed.header.from_export {
        tracing::warn!(
            "export has no meeting duration; using {}m",
            rules.default_meeting_minutes
        );
    }
    let meeting_minutes = parsed.header.duration_minutes;
    let fraction = settings.presence_threshold_fraction;
    tracing::info!(
        "meeting duration {meeting_minutes}m, presence threshold {}m",
        classify::threshold_minutes(meeting_minutes, fraction)
    );

    let log_table = log_table_for(settings.log_table, cohort);
    store.ensure_log_table(&log_table).await?;
    let mut next_log_id = store.last_log_id(&log_table).await? + 1;

    let mut records = Vec::with_capacity(aggregation.participants.len());
    let mut errors = Vec::new();
    let (mut processed, mut present, mut absent) = (0, 0, 0);

    for participant in &aggregation.participants {
        let is_present = classify::is_present(participant, meeting_minutes, fraction);
        let record = AttendanceRecord {
            log_id: next_log_id,
            identity: participant.identity.clone(),
            cohort_type: cohort.cohort_type.clone(),
            cohort_number: cohort.cohort_number.clone(),
            subject: session.subject.clone(),
            class_date: session.class_date,
            teacher_name: session.teacher_name.clone(),
            present: is_present,
        };

        match store.append_log(&log_table, &record).await {
            Ok(()) => {
                next_log_id += 1;
                processed += 1;
                if is_present {
                    present += 1;
                } else {
                    absent += 1;
                }
            }
            Err(err) => {
                let message = format!("Error logging {}: {err}", participant.identity);
                tracing::warn!("{message}");
                errors.push(message);
            }
        }
        records.push(record);
    }
    tracing::info!("logged {processed} attendance records to {log_table}");

    let stats =
        reconcile::reconcile_stats(store, cohort, session.class_date, &records, run_id).await?;
    errors.extend(stats.errors);

    Ok(ProcessSummary {
        success: true,
        message: "Attendance processed successfully".to_string(),
        run_id,
        subject: session.subject.clone(),
        batch: cohort.label(),
        class_date: session.class_date,
        log_table,
        meeting_minutes,
        processed,
        present,
        absent,
        unresolved: aggregation.unresolved.len(),
        rejected_rows: parsed.rejected.len(),
        stats_updated: stats.updated,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn session() -> ClassSession {
        ClassSession {
            cohort: Cohort::new("Basic", "3"),
            subject: "DSA".to_string(),
            class_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            teacher_name: "Ms. Rao".to_string(),
        }
    }

    fn roster_store() -> MemoryStore {
        MemoryStore::with_roster(
            &session().cohort,
            &[
                ("25MBY3001", "Priya Shah"),
                ("25MBY3002", "Ravi Kumar"),
                ("25MBY3003", "Meera Iyer"),
            ],
        )
    }

    fn export_text() -> String {
        [
            "Meeting duration\t1h 30m",
            "Name\tFirst Join\tLast Leave\tIn-Meeting Duration\tEmail",
            "25MBY3001 - Priya Shah\ta\tb\t40m 10s\tp@x",
            "Ravi Kumar (Unverified)\ta\tb\t5m\tr@x\t\t\t\t\t\t\t\t25MBY3002",
            "Ravi Kumar\ta\tb\t4m 30s\tr@x\t\t\t\t\t\t\t\t25MBY3002",
            "Guest Mentor\ta\tb\t80m\tg@x",
            "25MBY3001 - Priya Shah\ta\tb\t2m\tp@x",
            "",
            "In-Meeting Activities",
        ]
        .join("\n")
    }

    #[tokio::test]
    async fn end_to_end_run_logs_and_reconciles() {
        let store = roster_store();
        let outcome =
            process_export(&store, &Settings::default(), export_text().as_bytes(), &session()).await;

        let summary = match outcome {
            ProcessOutcome::Success(summary) => summary,
            other => panic!("expected success, got {other:?}"),
        };
        assert_eq!(summary.meeting_minutes, 90);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.present, 2);
        assert_eq!(summary.absent, 0);
        assert_eq!(summary.unresolved, 1);
        assert_eq!(summary.stats_updated, 3);
        assert!(summary.errors.is_empty());
        assert_eq!(summary.log_table, "attendance_logs");

        let logs = store.logs("attendance_logs");
        let ids: Vec<i64> = logs.iter().map(|r| r.log_id).collect();
        assert_eq!(ids, vec![1, 2]);

        let meera = store.stat("25MBY3003").unwrap();
        assert_eq!((meera.total_classes, meera.present_classes), (1, 0));
        let ravi = store.stat("25MBY3002").unwrap();
        assert_eq!((ravi.total_classes, ravi.present_classes), (1, 1));
    }

    #[tokio::test]
    async fn log_ids_continue_from_the_existing_maximum() {
        let store = roster_store();
        let mut settings = Settings::default();
        settings.log_table = LogTableMode::Cohort;

        process_export(&store, &settings, export_text().as_bytes(), &session()).await;
        let mut next = session();
        next.class_date = next.class_date.succ_opt().unwrap();
        process_export(&store, &settings, export_text().as_bytes(), &next).await;

        let ids: Vec<i64> = store.logs("basic3_logs").iter().map(|r| r.log_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(store.stat("25MBY3001").unwrap().total_classes, 2);
    }

    #[tokio::test]
    async fn log_append_failures_are_collected() {
        let store = roster_store();
        store.fail_writes_for("25MBY3001");
        let outcome =
            process_export(&store, &Settings::default(), export_text().as_bytes(), &session()).await;

        let ProcessOutcome::Success(summary) = outcome else {
            panic!("expected partial success");
        };
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.stats_updated, 2);
        assert_eq!(summary.errors.len(), 2);
        assert!(summary.errors[0].starts_with("Error logging 25MBY3001"));
        assert_eq!(store.logs("attendance_logs")[0].log_id, 1);
    }

    #[tokio::test]
    async fn short_attendance_is_absent() {
        let store = roster_store();
        let text = "Meeting duration\t1h 30m\n\
                    Name\tFirst Join\tLast Leave\tIn-Meeting Duration\n\
                    25MBY3001\ta\tb\t8m\n\
                    25MBY3002\ta\tb\t9m";
        let outcome = process_export(&store, &Settings::default(), text.as_bytes(), &session()).await;
        let ProcessOutcome::Success(summary) = outcome else {
            panic!("expected success");
        };
        assert_eq!((summary.present, summary.absent), (1, 1));
        assert_eq!(store.stat("25MBY3001").unwrap().present_classes, 0);
        assert_eq!(store.stat("25MBY3002").unwrap().present_classes, 1);
    }

    #[tokio::test]
    async fn unrecognized_export_fails_the_whole_run() {
        let store = roster_store();
        let outcome =
            process_export(&store, &Settings::default(), b"just some text", &session()).await;
        assert_eq!(
            outcome,
            ProcessOutcome::failure("Could not find participants section in export")
        );
        assert!(store.stat("25MBY3001").is_none());
    }

    #[tokio::test]
    async fn export_without_identities_fails() {
        let store = roster_store();
        let text = "Name\tFirst Join\tLast Leave\tIn-Meeting Duration\nGuest\ta\tb\t50m";
        let outcome = process_export(&store, &Settings::default(), text.as_bytes(), &session()).await;
        assert!(!outcome.is_success());
        assert!(store.logs("attendance_logs").is_empty());
    }

    #[test]
    fn result_contract_serializes_camel_case() {
        let failure = serde_json::to_value(ProcessOutcome::failure("boom")).unwrap();
        assert_eq!(failure, serde_json::json!({"success": false, "error": "boom"}));
    }

    #[test]
    fn class_dates_must_be_iso() {
        assert!(parse_class_date("2026-03-02").is_ok());
        assert!(matches!(
            parse_class_date("02/03/2026"),
            Err(ProcessError::InvalidDate(_))
        ));
    }
}
