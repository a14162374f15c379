//! Sync state and credential storage.
//!
//! This module provides the storage layer for classcal:
//!
//! - [`SyncStore`]: JSON snapshot of processed messages, replaced atomically
//! - [`KeychainAccess`]: OS keychain integration for OAuth credentials

mod keychain;
mod sync_store;

pub use keychain::{GoogleCredentials, KeychainAccess, KeychainError};
pub use sync_store::{Result, StoreError, SyncStore};
