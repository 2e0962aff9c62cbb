//! VK API response types
//!
//! Data structures for deserializing VK API responses and the local record
//! shape contacts are stored in.

use serde::{Deserialize, Serialize};

/// Every VK method answers with either `response` or `error`.
///
/// See: https://dev.vk.com/reference/json-schema
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub response: Option<T>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub error_code: i64,
    pub error_msg: String,
}

/// `friends.get` with `fields` set
///
/// See: https://dev.vk.com/method/friends.get
#[derive(Debug, Deserialize)]
pub struct FriendsResponse {
    /// Total number of friends, not the size of this page
    pub count: u64,
    pub items: Vec<Friend>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Friend {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Largest available square avatar
    pub photo_max: Option<String>,
    /// `"deleted"` or `"banned"` for deactivated profiles
    pub deactivated: Option<String>,
}

/// Placeholder avatars VK serves for users without a photo.
const PLACEHOLDER_AVATAR_PREFIX: &str = "https://vk.com/images/";

/// Stored payload of one VK contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub remote_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub deleted: bool,
}

impl From<Friend> for ContactRecord {
    fn from(friend: Friend) -> Self {
        let display_name = format!("{} {}", friend.first_name, friend.last_name)
            .trim()
            .to_string();
        let avatar_url = friend
            .photo_max
            .filter(|url| !url.is_empty() && !url.starts_with(PLACEHOLDER_AVATAR_PREFIX));

        Self {
            remote_id: friend.id.to_string(),
            display_name,
            avatar_url,
            deleted: friend.deactivated.is_some(),
        }
    }
}
