//! Provider-facing side of a sync run.
//!
//! A [`PageSource`] turns one authenticated request into one [`Page`] of
//! provider records already mapped into the local wire shape. The adaptor
//! owns retries, cancellation and storage; sources only speak HTTP and
//! classify what comes back (see [`crate::retry::check_status`]).

use crate::types::DataType;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_auth::AccessToken;
use serde::{Deserialize, Serialize};

/// Change to one local record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "lowercase")]
pub enum RecordChange {
    Upsert(serde_json::Value),
    Delete,
}

/// One provider record keyed by its remote identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub remote_id: String,
    pub change: RecordChange,
}

impl Record {
    pub fn upsert(remote_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            remote_id: remote_id.into(),
            change: RecordChange::Upsert(payload),
        }
    }

    pub fn delete(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            change: RecordChange::Delete,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub records: Vec<Record>,
    /// Opaque continuation handed back on the next call. `None` ends the run.
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn last(records: Vec<Record>) -> Self {
        Self {
            records,
            next_cursor: None,
        }
    }

    pub fn with_cursor(records: Vec<Record>, cursor: impl Into<String>) -> Self {
        Self {
            records,
            next_cursor: Some(cursor.into()),
        }
    }
}

/// Everything a source needs to fetch one page.
#[derive(Debug, Clone)]
pub struct PageRequest<'a> {
    pub token: &'a AccessToken,
    /// `None` for the first page.
    pub cursor: Option<&'a str>,
    pub page_size: u32,
    /// Last successful sync, for providers with incremental endpoints.
    pub since: Option<DateTime<Utc>>,
    /// Zero-based page index within the run, for diagnostics.
    pub page_index: u32,
}

#[async_trait]
pub trait PageSource: Send + Sync {
    /// Provider name as used in credentials and storage keys, e.g. `"vk"`.
    fn provider(&self) -> &str;

    fn data_type(&self) -> DataType;

    /// Fetch one page.
    ///
    /// # Errors
    ///
    /// Must classify failures: [`SyncError::Credential`] for 401/403,
    /// [`SyncError::RateLimited`] for throttling,
    /// [`SyncError::TransientNetwork`] for timeouts and 5xx, and
    /// [`SyncError::MalformedResponse`] when the payload cannot be parsed.
    ///
    /// [`SyncError::Credential`]: crate::SyncError::Credential
    /// [`SyncError::RateLimited`]: crate::SyncError::RateLimited
    /// [`SyncError::TransientNetwork`]: crate::SyncError::TransientNetwork
    /// [`SyncError::MalformedResponse`]: crate::SyncError::MalformedResponse
    async fn fetch_page(&self, request: PageRequest<'_>) -> Result<Page>;
}
