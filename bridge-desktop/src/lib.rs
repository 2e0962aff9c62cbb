//! # Desktop Bridge Implementations
//!
//! Default implementations of the host bridge traits for macOS, Windows and
//! Linux:
//! - `HttpClient` using `reqwest` (rustls)
//! - `FileSystemAccess` using `tokio::fs` rooted at the `dirs` cache/data directories
//! - `SecureStore` using the `keyring` crate
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TokioFileSystem};
//!
//! let http_client = ReqwestHttpClient::new()?;
//! let fs = TokioFileSystem::new();
//! ```

mod filesystem;
mod http;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
