//! # Credential Module
//!
//! Account credentials for sync runs. Sign-on flows are owned by the host;
//! this crate only stores the resulting bearer tokens and hands them to
//! the sync core.
//!
//! - [`TokenStore`] persists tokens in the host `SecureStore`
//! - [`CredentialProvider`] is the seam sync runs depend on
//! - [`StoredCredentialProvider`] implements it on top of `TokenStore`,
//!   rejecting tokens that are about to expire

pub mod error;
pub mod provider;
pub mod token_store;
pub mod types;

pub use error::{AuthError, Result};
pub use provider::{CredentialProvider, StoredCredentialProvider};
pub use token_store::TokenStore;
pub use types::{AccessToken, AccountId};
