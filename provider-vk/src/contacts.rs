//! VK contacts source
//!
//! Pages through `friends.get` with offset pagination and maps every friend
//! into a [`ContactRecord`].

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpRequest};
use core_sync::{check_status, DataType, Page, PageRequest, PageSource, Record, SyncError};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::VkError;
use crate::types::{ContactRecord, Envelope, FriendsResponse};
use crate::{API_BASE, API_VERSION, PROVIDER};

/// Profile fields requested for every friend
const FRIEND_FIELDS: &str = "photo_max,first_name,last_name";

/// Maximum `count` accepted by `friends.get`
pub const MAX_PAGE_SIZE: u32 = 5000;

/// Contacts page source for VK.
///
/// # Example
///
/// ```ignore
/// use provider_vk::VkContactsSource;
///
/// let source = Arc::new(VkContactsSource::new(http_client));
/// let core = SyncAdaptorCore::new(source, store, credentials, state, settings, events, clock);
/// ```
pub struct VkContactsSource {
    http_client: Arc<dyn HttpClient>,
    api_base: String,
}

impl VkContactsSource {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            api_base: API_BASE.to_string(),
        }
    }

    /// Point the source at another API host, e.g. a local fixture server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn parse_offset(cursor: Option<&str>) -> Result<u64, VkError> {
        match cursor {
            None => Ok(0),
            Some(raw) => raw
                .parse()
                .map_err(|_| VkError::InvalidCursor(raw.to_string())),
        }
    }

    fn parse_page(body: &[u8]) -> Result<FriendsResponse, VkError> {
        let envelope: Envelope<FriendsResponse> =
            serde_json::from_slice(body).map_err(|e| VkError::Parse(e.to_string()))?;

        if let Some(error) = envelope.error {
            return Err(VkError::Api {
                code: error.error_code,
                message: error.error_msg,
            });
        }

        envelope
            .response
            .ok_or_else(|| VkError::Parse("neither response nor error present".to_string()))
    }

    fn to_record(contact: ContactRecord) -> Result<Record, VkError> {
        let remote_id = contact.remote_id.clone();
        let payload = serde_json::to_value(contact).map_err(|e| VkError::Parse(e.to_string()))?;
        Ok(Record::upsert(remote_id, payload))
    }
}

#[async_trait]
impl PageSource for VkContactsSource {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn data_type(&self) -> DataType {
        DataType::Contacts
    }

    #[instrument(skip(self, request), fields(page = request.page_index, cursor = ?request.cursor))]
    async fn fetch_page(&self, request: PageRequest<'_>) -> core_sync::Result<Page> {
        let offset = Self::parse_offset(request.cursor)?;
        let count = request.page_size.clamp(1, MAX_PAGE_SIZE);

        let http_request = HttpRequest::get(format!("{}/friends.get", self.api_base))
            .bearer_token(request.token.secret())
            .query("offset", offset.to_string())
            .query("count", count.to_string())
            .query("fields", FRIEND_FIELDS)
            .query("v", API_VERSION);

        let response = check_status(PROVIDER, self.http_client.execute(http_request).await?)?;

        let friends = Self::parse_page(&response.body).map_err(|e| {
            if matches!(e, VkError::Parse(_)) {
                warn!(
                    provider = PROVIDER,
                    page = request.page_index,
                    offset,
                    error = %e,
                    "Malformed friends.get response"
                );
            }
            SyncError::from(e)
        })?;

        let fetched = friends.items.len() as u64;
        let records = friends
            .items
            .into_iter()
            .map(|friend| Self::to_record(ContactRecord::from(friend)))
            .collect::<Result<Vec<_>, _>>()?;

        let next_offset = offset + fetched;
        debug!(fetched, next_offset, total = friends.count, "Fetched friends page");

        if fetched == 0 || next_offset >= friends.count {
            Ok(Page::last(records))
        } else {
            Ok(Page::with_cursor(records, next_offset.to_string()))
        }
    }
}
