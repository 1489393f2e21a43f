//! The social directory seam.
//!
//! Donation targets are named by platform-specific external references
//! (a YouTube channel ID, a Twitter handle, a GitHub login). The directory
//! turns such a reference into display metadata; the engine caches the
//! result in the ledger and refetches once it goes stale.

use async_trait::async_trait;

use zapfund_core::{AccountMetadata, SocialPlatform};

/// Errors from the social directory.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The external reference names no account on the platform.
    #[error("{platform} account not found: {external_ref}")]
    NotFound {
        /// The platform queried.
        platform: SocialPlatform,
        /// The reference that resolved to nothing.
        external_ref: String,
    },

    /// The platform API was unreachable or returned garbage.
    #[error("directory fetch failed: {0}")]
    Fetch(String),
}

/// Read-only lookup of social account metadata from the external platform.
#[async_trait]
pub trait SocialDirectory: Send + Sync {
    /// Fetch metadata for the account named by `external_ref`.
    async fn fetch(
        &self,
        platform: SocialPlatform,
        external_ref: &str,
    ) -> Result<AccountMetadata, DirectoryError>;
}
