//! # Core Runtime Module
//!
//! Shared runtime infrastructure for the sync core:
//! - Logging and tracing setup with host sink forwarding
//! - Configuration (`CoreConfig`, `SyncSettings`)
//! - Event bus for sync, image and credential notifications
//!
//! Every other workspace crate depends on this one for its logging
//! conventions and event types.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
