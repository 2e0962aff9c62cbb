//! Error types for the VK provider

use core_sync::SyncError;
use thiserror::Error;

use crate::PROVIDER;

/// VK API error codes with dedicated handling.
///
/// See: https://dev.vk.com/reference/errors
pub mod codes {
    pub const UNKNOWN: i64 = 1;
    pub const AUTHORIZATION_FAILED: i64 = 5;
    pub const TOO_MANY_REQUESTS: i64 = 6;
    pub const FLOOD_CONTROL: i64 = 9;
    pub const INTERNAL_SERVER: i64 = 10;
    pub const RATE_LIMIT_REACHED: i64 = 29;
}

/// VK provider errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VkError {
    /// `{"error": {...}}` envelope returned with HTTP 200
    #[error("VK API error {code}: {message}")]
    Api { code: i64, message: String },

    /// Failed to parse API response
    #[error("Failed to parse VK response: {0}")]
    Parse(String),

    /// Cursor handed back by the engine is not an offset
    #[error("Invalid pagination cursor: {0}")]
    InvalidCursor(String),
}

pub type Result<T> = std::result::Result<T, VkError>;

impl From<VkError> for SyncError {
    fn from(error: VkError) -> Self {
        match error {
            VkError::Api { code, message } => match code {
                codes::AUTHORIZATION_FAILED => SyncError::Credential {
                    provider: PROVIDER.to_string(),
                    status: None,
                    message,
                },
                codes::TOO_MANY_REQUESTS | codes::FLOOD_CONTROL | codes::RATE_LIMIT_REACHED => {
                    SyncError::RateLimited { retry_after: None }
                }
                codes::INTERNAL_SERVER => {
                    SyncError::TransientNetwork(format!("VK internal error: {}", message))
                }
                _ => SyncError::MalformedResponse {
                    provider: PROVIDER.to_string(),
                    message: format!("API error {}: {}", code, message),
                },
            },
            VkError::Parse(message) | VkError::InvalidCursor(message) => {
                SyncError::MalformedResponse {
                    provider: PROVIDER.to_string(),
                    message,
                }
            }
        }
    }
}
