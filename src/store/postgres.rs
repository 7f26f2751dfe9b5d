use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::model::{Id, StepRecord, WorkflowError, WorkflowSession, WorkflowStatus};
use crate::store::traits::WorkflowStore;

const CREATE_WORKFLOW_SESSIONS: &str = r#"
    CREATE TABLE IF NOT EXISTS workflow_sessions (
        uuid TEXT PRIMARY KEY,
        workflow_name TEXT NOT NULL,
        status TEXT NOT NULL,
        revision BIGINT NOT NULL,
        history BYTEA NOT NULL,
        history_hash TEXT NOT NULL,
        step_count INTEGER NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
"#;

const CREATE_UPDATED_AT_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS workflow_sessions_updated_at_idx
    ON workflow_sessions (updated_at)
"#;

/// Gzip'd JSON step history plus the SHA-256 of the uncompressed bytes
#[derive(Debug, Clone)]
pub struct HistorySnapshot {
    pub data: Vec<u8>,
    pub hash: String,
}

impl HistorySnapshot {
    pub fn encode(history: &[StepRecord]) -> Result<Self> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let json = serde_json::to_vec(history).context("Failed to serialize step history")?;

        let mut hasher = Sha256::new();
        hasher.update(&json);
        let hash = hex::encode(hasher.finalize());

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json).context("Failed to compress step history")?;
        let data = encoder.finish().context("Failed to compress step history")?;

        Ok(Self { data, hash })
    }

    pub fn decode(data: &[u8]) -> Result<Vec<StepRecord>> {
        use flate2::read::GzDecoder;
        use std::io::Read;

        // Accept plain JSON as well as gzip (magic bytes 1f 8b)
        let json = if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
            let mut decoder = GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .context("Failed to decompress step history")?;
            decompressed
        } else {
            data.to_vec()
        };

        serde_json::from_slice(&json).context("Failed to deserialize step history")
    }
}

/// Workflow sessions persisted in PostgreSQL
#[derive(Debug, Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Create a new store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Create the session table if it does not exist yet
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_WORKFLOW_SESSIONS)
            .execute(&self.pool)
            .await
            .context("Failed to create workflow_sessions table")?;
        sqlx::query(CREATE_UPDATED_AT_INDEX)
            .execute(&self.pool)
            .await
            .context("Failed to create workflow_sessions index")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn revision_of(&self, uuid: &Id) -> Result<Option<u64>> {
        let row = sqlx::query("SELECT revision FROM workflow_sessions WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch workflow session revision")?;

        Ok(row.map(|row| row.get::<i64, _>("revision") as u64))
    }
}

fn parse_status(status: &str) -> Result<WorkflowStatus> {
    match status {
        "active" => Ok(WorkflowStatus::Active),
        "completed" => Ok(WorkflowStatus::Completed),
        other => Err(anyhow::anyhow!("Unknown workflow status '{}'", other)),
    }
}

#[async_trait::async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    async fn create(&self, workflow_name: &str) -> Result<WorkflowSession> {
        let session = WorkflowSession::new(workflow_name);
        let snapshot = HistorySnapshot::encode(&session.history)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_sessions
                (uuid, workflow_name, status, revision, history, history_hash, step_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&session.uuid)
        .bind(&session.workflow_name)
        .bind(session.status.as_str())
        .bind(session.revision as i64)
        .bind(&snapshot.data)
        .bind(&snapshot.hash)
        .bind(0_i32)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to create workflow session")?;

        Ok(session)
    }

    async fn load(&self, workflow_name: &str, uuid: &Id) -> Result<Option<WorkflowSession>> {
        let row = sqlx::query(
            r#"
            SELECT uuid, workflow_name, status, revision, history, created_at, updated_at
            FROM workflow_sessions
            WHERE uuid = $1 AND workflow_name = $2
            "#,
        )
        .bind(uuid)
        .bind(workflow_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch workflow session")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.get("status");
        let history: Vec<u8> = row.get("history");

        Ok(Some(WorkflowSession {
            uuid: row.get("uuid"),
            workflow_name: row.get("workflow_name"),
            status: parse_status(&status)?,
            revision: row.get::<i64, _>("revision") as u64,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            history: HistorySnapshot::decode(&history)?,
        }))
    }

    async fn save(&self, session: &mut WorkflowSession) -> Result<()> {
        let snapshot = HistorySnapshot::encode(&session.history)?;

        let result = sqlx::query(
            r#"
            UPDATE workflow_sessions SET
                status = $3,
                revision = revision + 1,
                history = $4,
                history_hash = $5,
                step_count = $6,
                updated_at = $7
            WHERE uuid = $1 AND revision = $2
            "#,
        )
        .bind(&session.uuid)
        .bind(session.revision as i64)
        .bind(session.status.as_str())
        .bind(&snapshot.data)
        .bind(&snapshot.hash)
        .bind(session.history.len() as i32)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update workflow session")?;

        if result.rows_affected() == 0 {
            return match self.revision_of(&session.uuid).await? {
                Some(found) => Err(WorkflowError::Conflict {
                    uuid: session.uuid.clone(),
                    expected: session.revision,
                    found,
                }
                .into()),
                None => Err(WorkflowError::NotFound {
                    workflow: session.workflow_name.clone(),
                    uuid: session.uuid.clone(),
                }
                .into()),
            };
        }

        session.revision += 1;
        Ok(())
    }

    async fn purge_expired(&self, ttl: chrono::Duration) -> Result<usize> {
        let cutoff = chrono::Utc::now() - ttl;
        let result = sqlx::query("DELETE FROM workflow_sessions WHERE updated_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("Failed to purge expired workflow sessions")?;

        Ok(result.rows_affected() as usize)
    }
}
