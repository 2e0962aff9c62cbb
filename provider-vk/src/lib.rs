//! # VK Provider
//!
//! Contacts sync for VK.
//!
//! ## Overview
//!
//! This module provides:
//! - A [`PageSource`](core_sync::PageSource) over `friends.get` with offset pagination
//! - Mapping of VK API error codes onto sync error kinds
//! - Avatar downloads through the shared image cache

pub mod contacts;
pub mod error;
pub mod images;
pub mod types;

pub use contacts::VkContactsSource;
pub use error::{Result, VkError};
pub use images::{AvatarDownload, VkContactImageDownloader};
pub use types::ContactRecord;

/// Provider name used in credentials, storage scopes and image keys
pub const PROVIDER: &str = "vk";

/// VK API base URL
pub const API_BASE: &str = "https://api.vk.com/method";

/// API version sent with every call
pub const API_VERSION: &str = "5.131";
