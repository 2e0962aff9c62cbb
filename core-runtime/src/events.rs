//! # Event Bus System
//!
//! Typed notifications from sync runs, the image cache and credential checks,
//! fanned out over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`CoreEvent`] wraps one enum per domain
//! - **EventBus**: cloneable publisher handle
//! - **EventStream**: receiver wrapper with an optional predicate
//!
//! Publishing never blocks and never fails a caller: producers emit with
//! `.ok()` and a bus with no subscribers simply drops the event.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut stream = EventStream::new(bus.subscribe())
//!     .filter(|event| matches!(event, CoreEvent::Sync(_)));
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::Started {
//!     job_id: "job-1".to_string(),
//!     provider: "vk".to_string(),
//!     data_type: "contacts".to_string(),
//!     account_id: 42,
//! }))
//! .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "Sync started");
//! # }
//! ```
//!
//! ## Lagging subscribers
//!
//! A subscriber that falls more than `capacity` events behind receives
//! `RecvError::Lagged(n)` once and then resumes with the oldest retained
//! event.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default per-subscriber buffer.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Auth(AuthEvent),
    Sync(SyncEvent),
    Image(ImageEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Image(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::CredentialRejected { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Image(ImageEvent::Failed { sticky: true, .. }) => EventSeverity::Warning,
            CoreEvent::Image(ImageEvent::Failed { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Skipped { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Cancelled { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Credential problems surfaced while syncing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A provider answered 401/403, or no usable credential was stored.
    /// The host should re-run its sign-on flow for the account.
    CredentialRejected {
        provider: String,
        account_id: i64,
        /// HTTP status when the rejection came from the provider.
        status: Option<u16>,
    },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::CredentialRejected { .. } => "Credential rejected",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Lifecycle of a single sync run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    Started {
        job_id: String,
        provider: String,
        /// Data type tag, e.g. `"contacts"`.
        data_type: String,
        account_id: i64,
    },
    /// A page was applied and committed to local storage.
    PageCommitted {
        job_id: String,
        /// Zero-based page index.
        page: u32,
        /// Records written by this page.
        records: u64,
        /// Records written by the run so far.
        total_records: u64,
    },
    Completed {
        job_id: String,
        items_changed: u64,
        pages: u32,
        duration_ms: u64,
    },
    Failed {
        job_id: String,
        /// Error kind tag, e.g. `"credential"`.
        kind: String,
        message: String,
        /// Records committed before the failure. They stay committed.
        items_changed: u64,
    },
    Cancelled {
        job_id: String,
        items_changed: u64,
    },
    /// Rejected by the minimum resync interval without any network call.
    Skipped {
        job_id: String,
        /// Seconds until the next run would be accepted.
        retry_in_secs: u64,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::PageCommitted { .. } => "Sync page committed",
            SyncEvent::Completed { .. } => "Sync completed successfully",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
            SyncEvent::Skipped { .. } => "Sync skipped: too soon after last success",
        }
    }
}

// ============================================================================
// Image Events
// ============================================================================

/// Outcomes of image cache fetches. Cache hits and attached waiters do not
/// produce events; only the fetch itself does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ImageEvent {
    Downloaded {
        provider: String,
        identifier: String,
        bytes: u64,
    },
    Failed {
        provider: String,
        identifier: String,
        status: Option<u16>,
        /// Sticky failures are not re-fetched until the cache is cleared.
        sticky: bool,
    },
}

impl ImageEvent {
    fn description(&self) -> &str {
        match self {
            ImageEvent::Downloaded { .. } => "Image downloaded",
            ImageEvent::Failed { .. } => "Image download failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Cloneable broadcast publisher.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer before lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns the number of subscribers that received the event, or an
    /// error when there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Subscribe to future events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// `broadcast::Receiver` with an optional predicate.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Next event passing the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when drained.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn started(job: &str) -> CoreEvent {
        CoreEvent::Sync(SyncEvent::Started {
            job_id: job.to_string(),
            provider: "vk".to_string(),
            data_type: "contacts".to_string(),
            account_id: 42,
        })
    }

    fn downloaded(identifier: &str) -> CoreEvent {
        CoreEvent::Image(ImageEvent::Downloaded {
            provider: "vk".to_string(),
            identifier: identifier.to_string(),
            bytes: 2048,
        })
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_error() {
        let bus = EventBus::new(10);
        assert!(bus.emit(started("job-1")).is_err());
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_event() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.emit(started("job-1")).unwrap(), 2);
        assert_eq!(first.recv().await.unwrap(), started("job-1"));
        assert_eq!(second.recv().await.unwrap(), started("job-1"));
    }

    #[tokio::test]
    async fn test_stream_filter_skips_other_domains() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Image(_)));

        bus.emit(started("job-1")).ok();
        bus.emit(downloaded("42")).ok();

        assert_eq!(stream.recv().await.unwrap(), downloaded("42"));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(started(&format!("job-{}", i))).ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let rejected = CoreEvent::Auth(AuthEvent::CredentialRejected {
            provider: "vk".to_string(),
            account_id: 42,
            status: Some(401),
        });
        assert_eq!(rejected.severity(), EventSeverity::Error);

        let skipped = CoreEvent::Sync(SyncEvent::Skipped {
            job_id: "job-1".to_string(),
            retry_in_secs: 120,
        });
        assert_eq!(skipped.severity(), EventSeverity::Info);

        assert_eq!(downloaded("42").severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_event_serialization_shape() {
        let json = serde_json::to_value(started("job-9")).unwrap();
        assert_eq!(json["type"], "Sync");
        assert_eq!(json["payload"]["event"], "Started");
        assert_eq!(json["payload"]["account_id"], 42);

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, started("job-9"));
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();

        let handles: Vec<_> = (0..2)
            .map(|publisher| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    for i in 0..10 {
                        bus.emit(started(&format!("job-{}-{}", publisher, i))).ok();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        let mut received = 0;
        while let Ok(event) = sub.try_recv() {
            assert!(matches!(event, CoreEvent::Sync(SyncEvent::Started { .. })));
            received += 1;
        }
        assert_eq!(received, 20);
    }
}
