use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::config::StoreSettings;
use crate::error::Result;
use crate::identity::StudentIdentity;
use crate::models::{AttendanceRecord, Cohort, RosterEntry, StudentStat};
use crate::store::{AttendanceStore, GLOBAL_LOG_TABLE};

const INITIAL_BACKOFF_MS: u64 = 250;

/// One row per (student, cohort, class date) already folded into `student_stats`.
const LEDGER_TABLE: &str = "reconciled_attendance";

/// Postgres-backed store. All tables live in the configured schema.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    schema: String,
}

impl PgStore {
    pub async fn connect(database_url: &str, settings: &StoreSettings) -> anyhow::Result<Self> {
        let mut attempt = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        let pool = loop {
            let result = PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .acquire_timeout(Duration::from_millis(settings.timeout_ms))
                .connect(database_url)
                .await;

            match result {
                Ok(pool) => break pool,
                Err(err) if attempt < settings.retry_count => {
                    attempt += 1;
                    tracing::warn!(retry = attempt, backoff_ms, "connect failed: {err}");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
                Err(err) => return Err(err).context("failed to connect to Postgres"),
            }
        };

        Ok(Self {
            pool,
            schema: settings.schema.clone(),
        })
    }

    fn table(&self, name: &str) -> String {
        format!(r#""{}"."{}""#, self.schema, name)
    }

    pub async fn init_db(&self) -> anyhow::Result<()> {
        let statements = [
            format!(r#"CREATE SCHEMA IF NOT EXISTS "{}""#, self.schema),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    enrollment_id TEXT PRIMARY KEY,
                    full_name TEXT NOT NULL,
                    cohort_type TEXT NOT NULL,
                    cohort_number TEXT NOT NULL
                )
                "#,
                self.table("roster")
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    enrollment_id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    cohort_type TEXT NOT NULL,
                    cohort_number TEXT NOT NULL,
                    total_classes INTEGER NOT NULL DEFAULT 0,
                    present_classes INTEGER NOT NULL DEFAULT 0,
                    overall_attendance DOUBLE PRECISION NOT NULL DEFAULT 0,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    CHECK (present_classes <= total_classes)
                )
                "#,
                self.table("student_stats")
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    enrollment_id TEXT NOT NULL,
                    cohort_type TEXT NOT NULL,
                    cohort_number TEXT NOT NULL,
                    class_date DATE NOT NULL,
                    run_id UUID NOT NULL,
                    reconciled_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    PRIMARY KEY (enrollment_id, cohort_type, cohort_number, class_date)
                )
                "#,
                self.table(LEDGER_TABLE)
            ),
        ];

        for statement in statements {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        self.ensure_log_table(GLOBAL_LOG_TABLE).await?;
        Ok(())
    }

    pub async fn import_roster(&self, csv_path: &std::path::Path) -> anyhow::Result<(usize, usize)> {
        #[derive(serde::Deserialize)]
        struct CsvRow {
            enrollment_id: String,
            full_name: String,
            cohort_type: String,
            cohort_number: String,
        }

        let mut reader = csv::Reader::from_path(csv_path)
            .with_context(|| format!("failed to open {}", csv_path.display()))?;
        let mut inserted = 0usize;
        let mut skipped = 0usize;

        for result in reader.deserialize::<CsvRow>() {
            let row = result?;
            let Some(identity) = StudentIdentity::parse(&row.enrollment_id) else {
                tracing::warn!("skipping roster row with invalid id '{}'", row.enrollment_id);
                skipped += 1;
                continue;
            };

            sqlx::query(&format!(
                r#"
                INSERT INTO {} (enrollment_id, full_name, cohort_type, cohort_number)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (enrollment_id) DO UPDATE
                SET full_name = EXCLUDED.full_name,
                    cohort_type = EXCLUDED.cohort_type,
                    cohort_number = EXCLUDED.cohort_number
                "#,
                self.table("roster")
            ))
            .bind(identity.as_str())
            .bind(row.full_name.trim())
            .bind(row.cohort_type.trim())
            .bind(row.cohort_number.trim())
            .execute(&self.pool)
            .await?;
            inserted += 1;
        }

        Ok((inserted, skipped))
    }

    pub async fn fetch_cohort_stats(&self, cohort: &Cohort) -> anyhow::Result<Vec<StudentStat>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} WHERE cohort_type = $1 AND cohort_number = $2 \
             ORDER BY overall_attendance ASC, enrollment_id ASC",
            self.table("student_stats")
        ))
        .bind(&cohort.cohort_type)
        .bind(&cohort.cohort_number)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = Vec::new();
        for row in rows {
            let id: String = row.get("enrollment_id");
            match StudentIdentity::parse(&id) {
                Some(identity) => stats.push(stat_from_row(identity, &row)),
                None => tracing::warn!("ignoring stats row with invalid id '{id}'"),
            }
        }
        Ok(stats)
    }
}

fn stat_from_row(identity: StudentIdentity, row: &sqlx::postgres::PgRow) -> StudentStat {
    StudentStat {
        identity,
        name: row.get("name"),
        cohort_type: row.get("cohort_type"),
        cohort_number: row.get("cohort_number"),
        total_classes: row.get("total_classes"),
        present_classes: row.get("present_classes"),
        overall_attendance_pct: row.get("overall_attendance"),
    }
}

#[async_trait]
impl AttendanceStore for PgStore {
    async fn fetch_roster(&self, cohort: &Cohort) -> Result<Vec<RosterEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT enrollment_id, full_name FROM {} \
             WHERE cohort_type = $1 AND cohort_number = $2 ORDER BY enrollment_id",
            self.table("roster")
        ))
        .bind(&cohort.cohort_type)
        .bind(&cohort.cohort_number)
        .fetch_all(&self.pool)
        .await?;

        let mut roster = Vec::new();
        for row in rows {
            let id: String = row.get("enrollment_id");
            match StudentIdentity::parse(&id) {
                Some(identity) => roster.push(RosterEntry {
                    identity,
                    display_name: row.get("full_name"),
                }),
                None => tracing::warn!("ignoring roster row with invalid id '{id}'"),
            }
        }
        Ok(roster)
    }

    async fn ensure_log_table(&self, table: &str) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                log_id BIGINT PRIMARY KEY,
                enrollment_id TEXT NOT NULL,
                cohort_type TEXT NOT NULL,
                cohort_number TEXT NOT NULL,
                subject TEXT NOT NULL,
                class_date DATE NOT NULL,
                teacher_name TEXT NOT NULL,
                attendance BOOLEAN NOT NULL,
                logged_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            self.table(table)
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_log_id(&self, table: &str) -> Result<i64> {
        let row = sqlx::query(&format!(
            "SELECT COALESCE(MAX(log_id), 0) AS last_id FROM {}",
            self.table(table)
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("last_id"))
    }

    async fn append_log(&self, table: &str, record: &AttendanceRecord) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {}
            (log_id, enrollment_id, cohort_type, cohort_number, subject, class_date, teacher_name, attendance)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
            self.table(table)
        ))
        .bind(record.log_id)
        .bind(record.identity.as_str())
        .bind(&record.cohort_type)
        .bind(&record.cohort_number)
        .bind(&record.subject)
        .bind(record.class_date)
        .bind(&record.teacher_name)
        .bind(record.present)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_class(
        &self,
        entry: &RosterEntry,
        cohort: &Cohort,
        class_date: NaiveDate,
        present: bool,
        run_id: Uuid,
    ) -> Result<Option<StudentStat>> {
        let mut tx = self.pool.begin().await?;

        let claim = sqlx::query(&format!(
            r#"
            INSERT INTO {} (enrollment_id, cohort_type, cohort_number, class_date, run_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (enrollment_id, cohort_type, cohort_number, class_date) DO NOTHING
            "#,
            self.table(LEDGER_TABLE)
        ))
        .bind(entry.identity.as_str())
        .bind(&cohort.cohort_type)
        .bind(&cohort.cohort_number)
        .bind(class_date)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;
        if claim.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let existing = sqlx::query(&format!(
            "SELECT * FROM {} WHERE enrollment_id = $1 FOR UPDATE",
            self.table("student_stats")
        ))
        .bind(entry.identity.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let stat = match existing {
            Some(row) => {
                let mut stat = stat_from_row(entry.identity.clone(), &row);
                stat.record_class(present);
                sqlx::query(&format!(
                    r#"
                    UPDATE {}
                    SET total_classes = $2, present_classes = $3, overall_attendance = $4, updated_at = now()
                    WHERE enrollment_id = $1
                    "#,
                    self.table("student_stats")
                ))
                .bind(stat.identity.as_str())
                .bind(stat.total_classes)
                .bind(stat.present_classes)
                .bind(stat.overall_attendance_pct)
                .execute(&mut *tx)
                .await?;
                stat
            }
            None => {
                let stat = StudentStat::first_class(entry, cohort, present);
                sqlx::query(&format!(
                    r#"
                    INSERT INTO {}
                    (enrollment_id, name, cohort_type, cohort_number, total_classes, present_classes, overall_attendance)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                    self.table("student_stats")
                ))
                .bind(stat.identity.as_str())
                .bind(&stat.name)
                .bind(&stat.cohort_type)
                .bind(&stat.cohort_number)
                .bind(stat.total_classes)
                .bind(stat.present_classes)
                .bind(stat.overall_attendance_pct)
                .execute(&mut *tx)
                .await?;
                stat
            }
        };

        tx.commit().await?;
        Ok(Some(stat))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
