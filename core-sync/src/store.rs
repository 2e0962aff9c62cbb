//! # Local Storage Seam
//!
//! Sync runs write provider records through [`LocalStore`], one
//! [`PageTransaction`] per page. A page is either fully applied or not at
//! all: the adaptor rolls the transaction back on any apply error or
//! cancellation.
//!
//! Committing a page returns a [`PageReceipt`] with the inverse of every
//! change it made. Replaying the inverses of all committed pages in reverse
//! order restores the scope to its pre-run state, which is how a cancelled
//! run leaves storage untouched.
//!
//! Two implementations ship here: [`InMemoryStore`] for hosts without a
//! database and for tests, and [`SqliteLocalStore`] backed by the
//! `local_records` table.

use crate::source::{Record, RecordChange};
use crate::types::SyncScope;
use crate::{Result, SyncError};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// What a committed page changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageReceipt {
    /// Records whose stored state actually changed.
    pub changed: u64,
    /// Changes that undo this page, in application order.
    pub inverse: Vec<Record>,
}

#[async_trait]
pub trait PageTransaction: Send {
    async fn apply(&mut self, record: &Record) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<PageReceipt>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn begin(&self, scope: &SyncScope) -> Result<Box<dyn PageTransaction>>;

    async fn get(&self, scope: &SyncScope, remote_id: &str) -> Result<Option<Value>>;

    /// All records in `scope`, ordered by remote id.
    async fn snapshot(&self, scope: &SyncScope) -> Result<BTreeMap<String, Value>>;
}

/// Inverse of applying `change` over `previous`, or `None` when the change
/// is a no-op.
fn inverse_of(remote_id: &str, previous: Option<Value>, change: &RecordChange) -> Option<Record> {
    match (previous, change) {
        (Some(prev), RecordChange::Upsert(next)) if &prev == next => None,
        (None, RecordChange::Delete) => None,
        (Some(prev), _) => Some(Record::upsert(remote_id, prev)),
        (None, RecordChange::Upsert(_)) => Some(Record::delete(remote_id)),
    }
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

type ScopeRecords = HashMap<SyncScope, BTreeMap<String, Value>>;

#[derive(Clone, Default)]
pub struct InMemoryStore {
    records: Arc<Mutex<ScopeRecords>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct InMemoryTransaction {
    records: Arc<Mutex<ScopeRecords>>,
    scope: SyncScope,
    staged: Vec<Record>,
}

#[async_trait]
impl PageTransaction for InMemoryTransaction {
    async fn apply(&mut self, record: &Record) -> Result<()> {
        self.staged.push(record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<PageReceipt> {
        let InMemoryTransaction {
            records,
            scope,
            staged,
        } = *self;
        let mut all = records.lock().await;
        let records = all.entry(scope).or_default();
        let mut receipt = PageReceipt::default();

        for record in staged {
            let previous = match &record.change {
                RecordChange::Upsert(payload) => {
                    records.insert(record.remote_id.clone(), payload.clone())
                }
                RecordChange::Delete => records.remove(&record.remote_id),
            };
            if let Some(inverse) = inverse_of(&record.remote_id, previous, &record.change) {
                receipt.changed += 1;
                receipt.inverse.push(inverse);
            }
        }

        Ok(receipt)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!(scope = %self.scope, staged = self.staged.len(), "Discarding staged page");
        Ok(())
    }
}

#[async_trait]
impl LocalStore for InMemoryStore {
    async fn begin(&self, scope: &SyncScope) -> Result<Box<dyn PageTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            records: self.records.clone(),
            scope: scope.clone(),
            staged: Vec::new(),
        }))
    }

    async fn get(&self, scope: &SyncScope, remote_id: &str) -> Result<Option<Value>> {
        Ok(self
            .records
            .lock()
            .await
            .get(scope)
            .and_then(|records| records.get(remote_id).cloned()))
    }

    async fn snapshot(&self, scope: &SyncScope) -> Result<BTreeMap<String, Value>> {
        Ok(self
            .records
            .lock()
            .await
            .get(scope)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// [`LocalStore`] over the `local_records` table. Each page runs in its own
/// SQLite transaction.
#[derive(Clone)]
pub struct SqliteLocalStore {
    pool: SqlitePool,
}

impl SqliteLocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

struct SqlitePageTransaction {
    tx: Transaction<'static, Sqlite>,
    scope: SyncScope,
    receipt: PageReceipt,
}

fn decode_payload(raw: &str) -> Result<Value> {
    serde_json::from_str(raw)
        .map_err(|e| SyncError::Storage(format!("Corrupted record payload: {}", e)))
}

#[async_trait]
impl PageTransaction for SqlitePageTransaction {
    async fn apply(&mut self, record: &Record) -> Result<()> {
        let previous: Option<String> = sqlx::query_scalar(
            r#"
            SELECT payload FROM local_records
            WHERE provider = ? AND data_type = ? AND account_id = ? AND remote_id = ?
            "#,
        )
        .bind(&self.scope.provider)
        .bind(self.scope.data_type.as_str())
        .bind(self.scope.account_id.get())
        .bind(&record.remote_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        let previous = previous.as_deref().map(decode_payload).transpose()?;
        let Some(inverse) = inverse_of(&record.remote_id, previous, &record.change) else {
            return Ok(());
        };

        match &record.change {
            RecordChange::Upsert(payload) => {
                sqlx::query(
                    r#"
                    INSERT INTO local_records (provider, data_type, account_id, remote_id, payload, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT (provider, data_type, account_id, remote_id)
                    DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at
                    "#,
                )
                .bind(&self.scope.provider)
                .bind(self.scope.data_type.as_str())
                .bind(self.scope.account_id.get())
                .bind(&record.remote_id)
                .bind(payload.to_string())
                .bind(chrono::Utc::now().timestamp_millis())
                .execute(&mut *self.tx)
                .await?;
            }
            RecordChange::Delete => {
                sqlx::query(
                    r#"
                    DELETE FROM local_records
                    WHERE provider = ? AND data_type = ? AND account_id = ? AND remote_id = ?
                    "#,
                )
                .bind(&self.scope.provider)
                .bind(self.scope.data_type.as_str())
                .bind(self.scope.account_id.get())
                .bind(&record.remote_id)
                .execute(&mut *self.tx)
                .await?;
            }
        }

        self.receipt.changed += 1;
        self.receipt.inverse.push(inverse);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<PageReceipt> {
        let SqlitePageTransaction { tx, receipt, .. } = *self;
        tx.commit().await?;
        Ok(receipt)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn begin(&self, scope: &SyncScope) -> Result<Box<dyn PageTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqlitePageTransaction {
            tx,
            scope: scope.clone(),
            receipt: PageReceipt::default(),
        }))
    }

    async fn get(&self, scope: &SyncScope, remote_id: &str) -> Result<Option<Value>> {
        let raw: Option<String> = sqlx::query_scalar(
            r#"
            SELECT payload FROM local_records
            WHERE provider = ? AND data_type = ? AND account_id = ? AND remote_id = ?
            "#,
        )
        .bind(&scope.provider)
        .bind(scope.data_type.as_str())
        .bind(scope.account_id.get())
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        raw.as_deref().map(decode_payload).transpose()
    }

    async fn snapshot(&self, scope: &SyncScope) -> Result<BTreeMap<String, Value>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT remote_id, payload FROM local_records
            WHERE provider = ? AND data_type = ? AND account_id = ?
            ORDER BY remote_id
            "#,
        )
        .bind(&scope.provider)
        .bind(scope.data_type.as_str())
        .bind(scope.account_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, raw)| decode_payload(&raw).map(|payload| (id, payload)))
            .collect()
    }
}
