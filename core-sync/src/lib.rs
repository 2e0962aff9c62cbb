//! # Sync Adaptor Core
//!
//! Provider-agnostic engine that moves one data type for one account from a
//! remote provider into local storage.
//!
//! ## Overview
//!
//! A host hands the core a [`SyncRequest`] and gets back a [`SyncHandle`].
//! The run validates the credential and the minimum resync interval,
//! fetches provider pages with bounded retry, applies each page atomically
//! and finally records the last successful sync. Exactly one
//! [`SyncOutcome`] is produced per request.
//!
//! ## Components
//!
//! - **Run State Machine** (`run`): `Idle → Validating → Running → Finalizing → Done`
//!   with validated transitions to `Failed` and `Cancelled`
//! - **Retry** (`retry`): exponential backoff, `Retry-After` handling and HTTP status classification
//! - **Page Source** (`source`): provider trait returning one page of mapped records per call
//! - **Local Store** (`store`): transactional per-page writes with inverse receipts
//! - **Commit Hook** (`hook`): per-page follow-up work owned by the run
//! - **State Repository** (`repository`): last-success timestamps and run history
//! - **Adaptor** (`adaptor`): ties the above together behind `start_sync` / `cancel`

pub mod adaptor;
pub mod db;
pub mod error;
pub mod hook;
pub mod repository;
pub mod retry;
pub mod run;
pub mod source;
pub mod store;
pub mod types;

pub use adaptor::{SyncAdaptorCore, SyncHandle};
pub use error::{Result, SyncError};
pub use hook::{CommitHook, FollowUp};
pub use repository::{InMemorySyncStateRepository, SqliteSyncStateRepository, SyncStateRepository};
pub use retry::{check_status, retry_with_backoff, RetryPolicy};
pub use run::{SyncJobId, SyncPhase, SyncRun};
pub use source::{Page, PageRequest, PageSource, Record, RecordChange};
pub use store::{InMemoryStore, LocalStore, PageReceipt, PageTransaction, SqliteLocalStore};
pub use types::{
    DataType, ErrorKind, OutcomeError, OutcomeStatus, SyncOutcome, SyncRequest, SyncScope,
};
