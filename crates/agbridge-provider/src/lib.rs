//! OAuth credential lifecycle and encrypted-at-rest credential storage.
//!
//! Includes the key source (platform secret store with a derived fallback),
//! the per-account credential store, and the PKCE authorization flow.

mod credential_store;
mod key_source;
mod oauth;
mod types;

pub use credential_store::*;
pub use key_source::*;
pub use oauth::*;
pub use types::*;
