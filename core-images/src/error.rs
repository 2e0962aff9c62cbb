use thiserror::Error;

/// Failure of a single image fetch.
///
/// Cloneable because one fetch result is handed to every attached waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageCacheError {
    /// The remote resource is gone. Sticky until the entry is evicted.
    #[error("Image not found (HTTP {status})")]
    NotFound { status: u16 },

    #[error("Image request failed with HTTP {status}")]
    Http { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Every waiter went away or the cache was cleared before the fetch
    /// finished.
    #[error("Image fetch aborted")]
    Aborted,
}

impl ImageCacheError {
    /// Map a non-2xx status to an error. 404 and 410 are permanent.
    pub fn from_status(status: u16) -> Self {
        match status {
            404 | 410 => ImageCacheError::NotFound { status },
            _ => ImageCacheError::Http { status },
        }
    }

    /// Sticky failures are returned from the cache without re-fetching.
    pub fn is_sticky(&self) -> bool {
        matches!(self, ImageCacheError::NotFound { .. })
    }

    /// HTTP status captured when the fetch failed, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ImageCacheError::NotFound { status } | ImageCacheError::Http { status } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ImageCacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ImageCacheError::from_status(404).is_sticky());
        assert!(ImageCacheError::from_status(410).is_sticky());
        assert!(!ImageCacheError::from_status(500).is_sticky());
        assert!(!ImageCacheError::from_status(403).is_sticky());
        assert!(!ImageCacheError::Network("timeout".into()).is_sticky());
    }

    #[test]
    fn test_status_accessor() {
        assert_eq!(ImageCacheError::from_status(503).status(), Some(503));
        assert_eq!(ImageCacheError::Aborted.status(), None);
    }
}
