//! # Host Bridge Traits
//!
//! Capabilities the sync core needs from its host, expressed as traits so
//! that desktop, mobile and test hosts can each provide their own adapters.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Single-shot HTTP execution; retry policy lives in the callers
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Cache directory and file writes for downloaded images
//! - [`SecureStore`](storage::SecureStore) - Account credential persistence
//! - [`Clock`](time::Clock) - Time source for the minimum resync interval
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Transport
//! failures that are worth retrying are reported as `Timeout` or
//! `Connection`; everything else is treated as permanent by the core.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so that one adapter instance can
//! be shared across sync runs and image fetch tasks.

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use storage::{FileSystemAccess, SecureStore};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
