//! # Sync Run State Machine
//!
//! Tracks one run through its phases with validated transitions.
//!
//! ## State Machine
//!
//! ```text
//! Idle → Validating → Running → Finalizing → Done
//!            ↓           ↓           ↓
//!            └─────────→ Failed ←────┘
//!            └─────────→ Cancelled
//! ```
//!
//! Transitions consume the run and return it in the new phase, so a run
//! that hit a terminal phase cannot be advanced by accident.
//!
//! ## Usage
//!
//! ```rust
//! use core_sync::{DataType, SyncPhase, SyncRequest, SyncRun};
//! use core_auth::AccountId;
//!
//! let request = SyncRequest::new("vk", DataType::Contacts, AccountId::new(42));
//! let mut run = SyncRun::new(&request).validate()?.start()?;
//! run.record_page(10)?;
//! let run = run.finalize()?.complete()?;
//!
//! assert_eq!(run.phase, SyncPhase::Done);
//! assert_eq!(run.items_changed, 10);
//! # Ok::<(), core_sync::SyncError>(())
//! ```

use crate::types::{ErrorKind, SyncScope};
use crate::{Result, SyncError, SyncRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncJobId(Uuid);

impl SyncJobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a job ID from its string form
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidJobId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    /// Credentials and the minimum resync interval are checked.
    Validating,
    /// Pages are being fetched and applied.
    Running,
    /// All pages committed; the last-success timestamp is being persisted.
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

impl SyncPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncPhase::Done | SyncPhase::Failed | SyncPhase::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Validating => "validating",
            SyncPhase::Running => "running",
            SyncPhase::Finalizing => "finalizing",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
            SyncPhase::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SyncPhase {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(SyncPhase::Idle),
            "validating" => Ok(SyncPhase::Validating),
            "running" => Ok(SyncPhase::Running),
            "finalizing" => Ok(SyncPhase::Finalizing),
            "done" => Ok(SyncPhase::Done),
            "failed" => Ok(SyncPhase::Failed),
            "cancelled" => Ok(SyncPhase::Cancelled),
            _ => Err(SyncError::InvalidPhase(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Sync Run
// ============================================================================

/// Bookkeeping for one run. Persisted as history by the state repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: SyncJobId,
    pub scope: SyncScope,
    pub phase: SyncPhase,
    pub pages_committed: u32,
    pub items_changed: u64,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncRun {
    pub fn new(request: &SyncRequest) -> Self {
        Self::with_id(SyncJobId::new(), request)
    }

    pub fn with_id(id: SyncJobId, request: &SyncRequest) -> Self {
        Self {
            id,
            scope: request.scope(),
            phase: SyncPhase::Idle,
            pages_committed: 0,
            items_changed: 0,
            error_kind: None,
            error_message: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn validate(self) -> Result<Self> {
        self.transition(SyncPhase::Validating)
    }

    pub fn start(self) -> Result<Self> {
        self.transition(SyncPhase::Running)
    }

    /// Count a committed page.
    ///
    /// # Errors
    ///
    /// Returns an error if the run is not `Running`
    pub fn record_page(&mut self, items: u64) -> Result<()> {
        if self.phase != SyncPhase::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.phase.as_str().to_string(),
                to: "record_page".to_string(),
                reason: "Run must be running to commit pages".to_string(),
            });
        }
        self.pages_committed += 1;
        self.items_changed += items;
        Ok(())
    }

    pub fn finalize(self) -> Result<Self> {
        self.transition(SyncPhase::Finalizing)
    }

    pub fn complete(self) -> Result<Self> {
        let mut run = self.transition(SyncPhase::Done)?;
        run.finished_at = Some(Utc::now());
        Ok(run)
    }

    pub fn fail(self, error: &SyncError) -> Result<Self> {
        let mut run = self.transition(SyncPhase::Failed)?;
        run.error_kind = Some(error.kind());
        run.error_message = Some(error.to_string());
        run.finished_at = Some(Utc::now());
        Ok(run)
    }

    /// Committed pages have been reverted by the time this is called, so
    /// `items_changed` drops to zero.
    pub fn cancel(self) -> Result<Self> {
        let mut run = self.transition(SyncPhase::Cancelled)?;
        run.items_changed = 0;
        run.finished_at = Some(Utc::now());
        Ok(run)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }

    fn transition(mut self, to: SyncPhase) -> Result<Self> {
        self.validate_transition(to)?;
        self.phase = to;
        Ok(self)
    }

    fn validate_transition(&self, to: SyncPhase) -> Result<()> {
        let valid = match (self.phase, to) {
            (SyncPhase::Idle, SyncPhase::Validating) => true,

            (SyncPhase::Validating, SyncPhase::Running) => true,
            (SyncPhase::Validating, SyncPhase::Failed) => true,
            (SyncPhase::Validating, SyncPhase::Cancelled) => true,

            (SyncPhase::Running, SyncPhase::Finalizing) => true,
            (SyncPhase::Running, SyncPhase::Failed) => true,
            (SyncPhase::Running, SyncPhase::Cancelled) => true,

            // Past this point pages are committed for good; cancelling
            // is no longer possible.
            (SyncPhase::Finalizing, SyncPhase::Done) => true,
            (SyncPhase::Finalizing, SyncPhase::Failed) => true,

            (SyncPhase::Done, _) => false,
            (SyncPhase::Failed, _) => false,
            (SyncPhase::Cancelled, _) => false,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.phase.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.phase.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}
