//! # Sync Request and Outcome Types
//!
//! A [`SyncRequest`] is handed to the core by the host scheduler and is
//! immutable afterwards. Every request produces exactly one
//! [`SyncOutcome`].

use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use core_auth::AccountId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Data Types
// ============================================================================

/// Kind of data a sync run moves between provider and local storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Calendars,
    Contacts,
    Notifications,
    Images,
    BackupRestore,
    Posts,
    Signon,
}

impl DataType {
    pub const ALL: [DataType; 7] = [
        DataType::Calendars,
        DataType::Contacts,
        DataType::Notifications,
        DataType::Images,
        DataType::BackupRestore,
        DataType::Posts,
        DataType::Signon,
    ];

    /// Lowercase tag used in storage keys, events and the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Calendars => "calendars",
            DataType::Contacts => "contacts",
            DataType::Notifications => "notifications",
            DataType::Images => "images",
            DataType::BackupRestore => "backuprestore",
            DataType::Posts => "posts",
            DataType::Signon => "signon",
        }
    }

    /// Capitalized name, as used in cache paths (`vk/Contacts/42`).
    pub fn display_name(&self) -> &'static str {
        match self {
            DataType::Calendars => "Calendars",
            DataType::Contacts => "Contacts",
            DataType::Notifications => "Notifications",
            DataType::Images => "Images",
            DataType::BackupRestore => "BackupRestore",
            DataType::Posts => "Posts",
            DataType::Signon => "Signon",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for DataType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        DataType::ALL
            .into_iter()
            .find(|dt| dt.as_str() == lowered)
            .ok_or_else(|| SyncError::InvalidDataType(s.to_string()))
    }
}

// ============================================================================
// Requests
// ============================================================================

/// One sync attempt for `(provider, data_type, account)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub provider: String,
    pub data_type: DataType,
    pub account_id: AccountId,
    /// Last successful sync as known by the host. When `None` the core
    /// falls back to its own state repository.
    pub last_success: Option<DateTime<Utc>>,
}

impl SyncRequest {
    pub fn new(provider: impl Into<String>, data_type: DataType, account_id: AccountId) -> Self {
        Self {
            provider: provider.into(),
            data_type,
            account_id,
            last_success: None,
        }
    }

    pub fn with_last_success(mut self, at: DateTime<Utc>) -> Self {
        self.last_success = Some(at);
        self
    }

    pub fn scope(&self) -> SyncScope {
        SyncScope {
            provider: self.provider.clone(),
            data_type: self.data_type,
            account_id: self.account_id,
        }
    }
}

/// The `(provider, data_type, account)` triple local state is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncScope {
    pub provider: String,
    pub data_type: DataType,
    pub account_id: AccountId,
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.provider,
            self.data_type.as_str(),
            self.account_id
        )
    }
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
    /// Not a failure: the host asked the run to stop.
    Cancelled,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Cancelled => "cancelled",
        }
    }
}

/// Classification of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The host should re-authenticate the account.
    Credential,
    TransientNetwork,
    RateLimited,
    MalformedResponse,
    /// Rejected by the minimum resync interval.
    TooSoon,
    /// Another run for the same scope is active.
    AlreadyRunning,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Credential => "credential",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::TooSoon => "too_soon",
            ErrorKind::AlreadyRunning => "already_running",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }
}

impl FromStr for ErrorKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "credential" => Ok(ErrorKind::Credential),
            "transient_network" => Ok(ErrorKind::TransientNetwork),
            "rate_limited" => Ok(ErrorKind::RateLimited),
            "malformed_response" => Ok(ErrorKind::MalformedResponse),
            "too_soon" => Ok(ErrorKind::TooSoon),
            "already_running" => Ok(ErrorKind::AlreadyRunning),
            "storage" => Ok(ErrorKind::Storage),
            "internal" => Ok(ErrorKind::Internal),
            other => Err(SyncError::Storage(format!("Unknown error kind: {}", other))),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeError {
    pub kind: ErrorKind,
    /// Opaque detail string for the host UI.
    pub detail: String,
}

/// Result of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub status: OutcomeStatus,
    pub error: Option<OutcomeError>,
    pub items_changed: u64,
}

impl SyncOutcome {
    pub fn success(items_changed: u64) -> Self {
        Self {
            status: OutcomeStatus::Success,
            error: None,
            items_changed,
        }
    }

    pub fn failed(error: &SyncError, items_changed: u64) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            error: Some(OutcomeError {
                kind: error.kind(),
                detail: error.to_string(),
            }),
            items_changed,
        }
    }

    /// Cancelled runs revert their pages, so nothing changed.
    pub fn cancelled() -> Self {
        Self {
            status: OutcomeStatus::Cancelled,
            error: None,
            items_changed: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
