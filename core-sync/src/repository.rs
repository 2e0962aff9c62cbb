//! # Sync State Repository
//!
//! Persists the last-success timestamp per scope, which feeds the minimum
//! resync interval guard, and keeps a history of finished runs.

use crate::run::{SyncJobId, SyncPhase, SyncRun};
use crate::types::{DataType, SyncScope};
use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_auth::AccountId;
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

// ============================================================================
// Repository Trait
// ============================================================================

#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    async fn last_success(&self, scope: &SyncScope) -> Result<Option<DateTime<Utc>>>;

    /// Called once all pages of a run are committed.
    async fn set_last_success(&self, scope: &SyncScope, at: DateTime<Utc>) -> Result<()>;

    /// Store a finished run. Re-recording the same id overwrites it.
    async fn record_run(&self, run: &SyncRun) -> Result<()>;

    /// Most recent runs for `scope`, newest first.
    async fn history(&self, scope: &SyncScope, limit: u32) -> Result<Vec<SyncRun>>;
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| SyncError::Storage(format!("Timestamp {} out of range", millis)))
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteSyncStateRepository {
    pool: SqlitePool,
}

impl SqliteSyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SyncRunRow {
    id: String,
    provider: String,
    data_type: String,
    account_id: i64,
    phase: String,
    pages_committed: i64,
    items_changed: i64,
    error_kind: Option<String>,
    error_message: Option<String>,
    started_at: i64,
    finished_at: Option<i64>,
}

impl TryFrom<SyncRunRow> for SyncRun {
    type Error = SyncError;

    fn try_from(row: SyncRunRow) -> Result<Self> {
        let data_type: DataType = row.data_type.parse()?;
        let phase: SyncPhase = row.phase.parse()?;

        Ok(SyncRun {
            id: SyncJobId::from_string(&row.id)?,
            scope: SyncScope {
                provider: row.provider,
                data_type,
                account_id: AccountId::new(row.account_id),
            },
            phase,
            pages_committed: row.pages_committed as u32,
            items_changed: row.items_changed as u64,
            error_kind: row.error_kind.map(|kind| kind.parse()).transpose()?,
            error_message: row.error_message,
            started_at: from_millis(row.started_at)?,
            finished_at: row.finished_at.map(from_millis).transpose()?,
        })
    }
}

#[async_trait]
impl SyncStateRepository for SqliteSyncStateRepository {
    async fn last_success(&self, scope: &SyncScope) -> Result<Option<DateTime<Utc>>> {
        let millis: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT last_success_at FROM sync_state
            WHERE provider = ? AND data_type = ? AND account_id = ?
            "#,
        )
        .bind(&scope.provider)
        .bind(scope.data_type.as_str())
        .bind(scope.account_id.get())
        .fetch_optional(&self.pool)
        .await?;

        millis.map(from_millis).transpose()
    }

    async fn set_last_success(&self, scope: &SyncScope, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (provider, data_type, account_id, last_success_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (provider, data_type, account_id)
            DO UPDATE SET last_success_at = excluded.last_success_at
            "#,
        )
        .bind(&scope.provider)
        .bind(scope.data_type.as_str())
        .bind(scope.account_id.get())
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_run(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO sync_runs (
                id, provider, data_type, account_id, phase,
                pages_committed, items_changed, error_kind, error_message,
                started_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.as_str())
        .bind(&run.scope.provider)
        .bind(run.scope.data_type.as_str())
        .bind(run.scope.account_id.get())
        .bind(run.phase.as_str())
        .bind(run.pages_committed as i64)
        .bind(run.items_changed as i64)
        .bind(run.error_kind.map(|kind| kind.as_str()))
        .bind(&run.error_message)
        .bind(run.started_at.timestamp_millis())
        .bind(run.finished_at.map(|at| at.timestamp_millis()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn history(&self, scope: &SyncScope, limit: u32) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query_as::<_, SyncRunRow>(
            r#"
            SELECT id, provider, data_type, account_id, phase,
                   pages_committed, items_changed, error_kind, error_message,
                   started_at, finished_at
            FROM sync_runs
            WHERE provider = ? AND data_type = ? AND account_id = ?
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(&scope.provider)
        .bind(scope.data_type.as_str())
        .bind(scope.account_id.get())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(SyncRun::try_from)
            .collect::<Result<Vec<_>>>()
    }
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemorySyncStateRepository {
    last_success: Arc<Mutex<HashMap<SyncScope, DateTime<Utc>>>>,
    runs: Arc<Mutex<Vec<SyncRun>>>,
}

impl InMemorySyncStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncStateRepository for InMemorySyncStateRepository {
    async fn last_success(&self, scope: &SyncScope) -> Result<Option<DateTime<Utc>>> {
        Ok(self.last_success.lock().await.get(scope).copied())
    }

    async fn set_last_success(&self, scope: &SyncScope, at: DateTime<Utc>) -> Result<()> {
        self.last_success.lock().await.insert(scope.clone(), at);
        Ok(())
    }

    async fn record_run(&self, run: &SyncRun) -> Result<()> {
        let mut runs = self.runs.lock().await;
        runs.retain(|existing| existing.id != run.id);
        runs.push(run.clone());
        Ok(())
    }

    async fn history(&self, scope: &SyncScope, limit: u32) -> Result<Vec<SyncRun>> {
        let runs = self.runs.lock().await;
        let mut matching: Vec<SyncRun> = runs
            .iter()
            .filter(|run| &run.scope == scope)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}
