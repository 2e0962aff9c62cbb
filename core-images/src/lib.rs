//! # Image Download Cache
//!
//! Shared cache that turns provider image URLs into local files.
//!
//! Many sync adaptors may ask for the same avatar at once; the cache keeps
//! exactly one download per [`ImageFetchKey`] and hands the resulting path
//! to every caller. Completed images are stored at a path derived from the
//! provider, data type and identifier only, so a changed URL overwrites the
//! previous file.

pub mod cache;
pub mod error;
pub mod key;

pub use cache::{
    CacheEntry, FetchState, ImageDownloadCache, DEFAULT_MAX_CONCURRENT_FETCHES,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use error::{ImageCacheError, Result};
pub use key::ImageFetchKey;
