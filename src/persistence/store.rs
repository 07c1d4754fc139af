//! SQLite-based history store

use crate::core::state::OutcomeKind;
use crate::persistence::{HistoryBackend, ReconcileRecord};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

const SELECT_COLUMNS: &str = "SELECT id, run_id, pass, application, namespace, outcome, step, message, \
     started_at, finished_at, completed_steps, total_steps FROM reconcile_history";

/// SQLite reconcile history store
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("chartflow");
        std::fs::create_dir_all(&db_dir)?;

        Self::new(db_dir.join("history.db")).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reconcile_history (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                pass INTEGER NOT NULL,
                application TEXT NOT NULL,
                namespace TEXT NOT NULL,
                outcome TEXT NOT NULL,
                step TEXT,
                message TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                completed_steps INTEGER NOT NULL DEFAULT 0,
                total_steps INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_history_application ON reconcile_history(namespace, application);
            CREATE INDEX IF NOT EXISTS idx_history_run ON reconcile_history(run_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn from_row(row: &SqliteRow) -> Result<ReconcileRecord> {
        let outcome: String = row.get("outcome");
        Ok(ReconcileRecord {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            run_id: Uuid::parse_str(&row.get::<String, _>("run_id"))?,
            pass: row.get::<i64, _>("pass") as u32,
            application: row.get("application"),
            namespace: row.get("namespace"),
            outcome: OutcomeKind::parse(&outcome)
                .ok_or_else(|| anyhow!("Unknown outcome {:?} in history", outcome))?,
            step: row.get("step"),
            message: row.get("message"),
            started_at: Self::from_naive(row.get("started_at")),
            finished_at: Self::from_naive(row.get("finished_at")),
            completed_steps: row.get::<i64, _>("completed_steps") as usize,
            total_steps: row.get::<i64, _>("total_steps") as usize,
        })
    }
}

#[async_trait::async_trait]
impl HistoryBackend for SqliteHistoryStore {
    async fn save_record(&self, record: &ReconcileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO reconcile_history
            (id, run_id, pass, application, namespace, outcome, step, message,
             started_at, finished_at, completed_steps, total_steps)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.run_id.to_string())
        .bind(record.pass as i64)
        .bind(&record.application)
        .bind(&record.namespace)
        .bind(record.outcome.as_str())
        .bind(&record.step)
        .bind(&record.message)
        .bind(Self::to_naive(record.started_at))
        .bind(Self::to_naive(record.finished_at))
        .bind(record.completed_steps as i64)
        .bind(record.total_steps as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save reconcile record")?;

        Ok(())
    }

    async fn list_records(&self, namespace: &str, application: &str) -> Result<Vec<ReconcileRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE namespace = ?1 AND application = ?2 ORDER BY started_at DESC, pass DESC",
            SELECT_COLUMNS
        ))
        .bind(namespace)
        .bind(application)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list reconcile records")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_run(&self, run_id: Uuid) -> Result<Vec<ReconcileRecord>> {
        let rows = sqlx::query(&format!("{} WHERE run_id = ?1 ORDER BY pass ASC", SELECT_COLUMNS))
            .bind(run_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to load reconcile run")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_applications(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT namespace, application
            FROM reconcile_history
            ORDER BY namespace ASC, application ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list applications")?;

        Ok(rows
            .iter()
            .map(|row| (row.get("namespace"), row.get("application")))
            .collect())
    }
}
