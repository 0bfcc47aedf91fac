//! SQLite-based run store

use crate::core::{
    ApprovalDecision, ApprovalRecord, Run, RunStatus, StageRecord, StageStatus, StageTransition,
    TriggerEvent,
};
use crate::persistence::{RunStore, StoreError};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// SQLite run store
///
/// The pool holds a single connection, so every compare-and-set runs
/// inside a transaction no other writer can interleave with.
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (or create) a store at `db_path`; `:memory:` gives a private in-memory database
    pub async fn new(db_path: &str) -> Result<Self, StoreError> {
        let options = if db_path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))?.create_if_missing(true)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Open the store at `path`, creating parent directories
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(&path.to_string_lossy()).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                pipeline_version TEXT,
                trigger_event TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT
            );

            CREATE TABLE IF NOT EXISTS run_stages (
                run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                stage_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                message TEXT,
                log TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (run_id, stage_id)
            );

            CREATE TABLE IF NOT EXISTS approvals (
                run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                stage_id TEXT NOT NULL,
                actor TEXT NOT NULL,
                decision TEXT NOT NULL,
                decided_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON runs(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_runs_finished ON runs(finished_at);
            CREATE INDEX IF NOT EXISTS idx_runs_created ON runs(created_at);
            CREATE INDEX IF NOT EXISTS idx_approvals_run ON approvals(run_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    async fn load_run(conn: &mut SqliteConnection, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, pipeline_name, pipeline_version, trigger_event, status, created_at, started_at, finished_at
            FROM runs
            WHERE id = ?1
            "#,
        )
        .bind(run_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let trigger: TriggerEvent = serde_json::from_str(&row.get::<String, _>("trigger_event"))?;

        let stage_rows = sqlx::query(
            r#"
            SELECT stage_id, status, started_at, finished_at, attempts, message, log
            FROM run_stages
            WHERE run_id = ?1
            ORDER BY position ASC
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

        let stages = stage_rows
            .iter()
            .map(|row| {
                Ok(StageRecord {
                    stage_id: row.get("stage_id"),
                    status: parse_stage_status(&row.get::<String, _>("status"))?,
                    started_at: row.get::<Option<NaiveDateTime>, _>("started_at").map(Self::from_naive),
                    finished_at: row.get::<Option<NaiveDateTime>, _>("finished_at").map(Self::from_naive),
                    attempts: row.get::<i64, _>("attempts") as u32,
                    message: row.get("message"),
                    log: row.get("log"),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let approval_rows = sqlx::query(
            r#"
            SELECT stage_id, actor, decision, decided_at
            FROM approvals
            WHERE run_id = ?1
            ORDER BY rowid ASC
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

        let approvals = approval_rows
            .iter()
            .map(|row| {
                let decision = match row.get::<String, _>("decision").as_str() {
                    "APPROVED" => ApprovalDecision::Approved,
                    "REJECTED" => ApprovalDecision::Rejected,
                    other => return Err(StoreError::Corrupt(format!("unknown decision {}", other))),
                };
                Ok(ApprovalRecord {
                    stage_id: row.get("stage_id"),
                    actor: row.get("actor"),
                    decision,
                    decided_at: Self::from_naive(row.get("decided_at")),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Some(Run {
            id: run_id,
            pipeline_name: row.get("pipeline_name"),
            pipeline_version: row.get("pipeline_version"),
            trigger,
            status: row
                .get::<String, _>("status")
                .parse::<RunStatus>()
                .map_err(StoreError::Corrupt)?,
            created_at: Self::from_naive(row.get("created_at")),
            started_at: row.get::<Option<NaiveDateTime>, _>("started_at").map(Self::from_naive),
            finished_at: row.get::<Option<NaiveDateTime>, _>("finished_at").map(Self::from_naive),
            stages,
            approvals,
        }))
    }

    async fn load_many(&self, ids: Vec<String>) -> Result<Vec<Run>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let mut runs = Vec::with_capacity(ids.len());
        for id in ids {
            let run_id = Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(e.to_string()))?;
            if let Some(run) = Self::load_run(&mut conn, run_id).await? {
                runs.push(run);
            }
        }
        Ok(runs)
    }
}

fn parse_stage_status(s: &str) -> Result<StageStatus, StoreError> {
    s.parse::<StageStatus>().map_err(StoreError::Corrupt)
}

#[async_trait::async_trait]
impl RunStore for SqliteRunStore {
    async fn create(&self, run: &Run) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM runs WHERE id = ?1")
            .bind(run.id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_some() {
            return Err(StoreError::AlreadyExists(run.id));
        }

        sqlx::query(
            r#"
            INSERT INTO runs
            (id, pipeline_name, pipeline_version, trigger_event, status, created_at, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(run.id.to_string())
        .bind(&run.pipeline_name)
        .bind(&run.pipeline_version)
        .bind(serde_json::to_string(&run.trigger)?)
        .bind(run.status.as_str())
        .bind(Self::to_naive(run.created_at))
        .bind(run.started_at.map(Self::to_naive))
        .bind(run.finished_at.map(Self::to_naive))
        .execute(&mut *tx)
        .await?;

        for (position, stage) in run.stages.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO run_stages
                (run_id, stage_id, position, status, started_at, finished_at, attempts, message, log)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(run.id.to_string())
            .bind(&stage.stage_id)
            .bind(position as i64)
            .bind(stage.status.as_str())
            .bind(stage.started_at.map(Self::to_naive))
            .bind(stage.finished_at.map(Self::to_naive))
            .bind(stage.attempts as i64)
            .bind(&stage.message)
            .bind(&stage.log)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::load_run(&mut conn, run_id).await
    }

    async fn compare_and_set_stage(
        &self,
        run_id: Uuid,
        stage_id: &str,
        expected: &[StageStatus],
        transition: &StageTransition,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT status, started_at, finished_at, attempts, message, log
            FROM run_stages
            WHERE run_id = ?1 AND stage_id = ?2
            "#,
        )
        .bind(run_id.to_string())
        .bind(stage_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let run_exists = sqlx::query("SELECT 1 FROM runs WHERE id = ?1")
                .bind(run_id.to_string())
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            return Err(if run_exists {
                StoreError::StageNotFound {
                    run_id,
                    stage_id: stage_id.to_string(),
                }
            } else {
                StoreError::RunNotFound(run_id)
            });
        };

        let mut record = StageRecord {
            stage_id: stage_id.to_string(),
            status: parse_stage_status(&row.get::<String, _>("status"))?,
            started_at: row.get::<Option<NaiveDateTime>, _>("started_at").map(Self::from_naive),
            finished_at: row.get::<Option<NaiveDateTime>, _>("finished_at").map(Self::from_naive),
            attempts: row.get::<i64, _>("attempts") as u32,
            message: row.get("message"),
            log: row.get("log"),
        };

        if !expected.contains(&record.status) {
            tx.rollback().await?;
            return Ok(false);
        }

        record.apply(transition, Utc::now());

        sqlx::query(
            r#"
            UPDATE run_stages
            SET status = ?1, started_at = ?2, finished_at = ?3, attempts = ?4, message = ?5, log = ?6
            WHERE run_id = ?7 AND stage_id = ?8
            "#,
        )
        .bind(record.status.as_str())
        .bind(record.started_at.map(Self::to_naive))
        .bind(record.finished_at.map(Self::to_naive))
        .bind(record.attempts as i64)
        .bind(&record.message)
        .bind(&record.log)
        .bind(run_id.to_string())
        .bind(stage_id)
        .execute(&mut *tx)
        .await?;

        if let Some(approval) = &transition.approval {
            sqlx::query(
                r#"
                INSERT INTO approvals (run_id, stage_id, actor, decision, decided_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(run_id.to_string())
            .bind(&approval.stage_id)
            .bind(&approval.actor)
            .bind(approval.decision.as_str())
            .bind(Self::to_naive(approval.decided_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn record_approval(&self, run_id: Uuid, approval: &ApprovalRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO approvals (run_id, stage_id, actor, decision, decided_at)
            SELECT ?1, ?2, ?3, ?4, ?5
            WHERE EXISTS (SELECT 1 FROM runs WHERE id = ?1)
            "#,
        )
        .bind(run_id.to_string())
        .bind(&approval.stage_id)
        .bind(&approval.actor)
        .bind(approval.decision.as_str())
        .bind(Self::to_naive(approval.decided_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    async fn refresh_status(&self, run_id: Uuid) -> Result<Run, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut run = Self::load_run(&mut tx, run_id)
            .await?
            .ok_or(StoreError::RunNotFound(run_id))?;

        if run.refresh(Utc::now()) {
            sqlx::query(
                r#"
                UPDATE runs SET status = ?1, started_at = ?2, finished_at = ?3
                WHERE id = ?4
                "#,
            )
            .bind(run.status.as_str())
            .bind(run.started_at.map(Self::to_naive))
            .bind(run.finished_at.map(Self::to_naive))
            .bind(run_id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(run)
    }

    async fn list_active(&self) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT r.id, r.created_at
            FROM runs r
            JOIN run_stages s ON s.run_id = r.id
            WHERE s.status IN ('PENDING', 'BLOCKED', 'RUNNING', 'AWAITING_APPROVAL')
            ORDER BY r.created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        self.load_many(rows.iter().map(|row| row.get("id")).collect()).await
    }

    async fn list_runs(&self, pipeline_name: Option<&str>, limit: usize) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM runs
            WHERE ?1 IS NULL OR pipeline_name = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(pipeline_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        self.load_many(rows.iter().map(|row| row.get("id")).collect()).await
    }
}
