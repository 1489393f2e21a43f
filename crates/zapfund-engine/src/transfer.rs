//! The transfer engine: linking social accounts and claiming their
//! donations onto a donator balance.

use std::sync::Arc;

use zapfund_core::{Donator, DonatorId, Satoshi, SocialAccountId, SocialPlatform};
use zapfund_store::Ledger;

use crate::error::{EngineError, Result};

/// Orchestrates account linking and balance claims.
pub struct TransferEngine {
    ledger: Arc<dyn Ledger>,
}

impl TransferEngine {
    /// Create an engine over the ledger.
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Link a social account to `donator`, creating the donator row if it
    /// does not exist yet.
    ///
    /// An OAuth link proves ownership, so it immediately claims whatever
    /// the account has accumulated. Returns the amount claimed.
    ///
    /// # Errors
    ///
    /// Propagates the store's conflict when the account already has a
    /// different OAuth owner.
    pub async fn link_account(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
        donator: &Donator,
        via_oauth: bool,
    ) -> Result<Satoshi> {
        let changed = self
            .ledger
            .link_social_account(platform, account_id, donator, via_oauth)
            .await?;
        if changed {
            tracing::info!(%platform, %account_id, donator_id = %donator.id, via_oauth, "account linked");
        }
        if !via_oauth {
            return Ok(0);
        }
        Ok(self
            .ledger
            .transfer_donations(platform, account_id, donator.id)
            .await?)
    }

    /// Remove a link between a social account and a donator.
    ///
    /// # Errors
    ///
    /// Propagates the store's validation error when the unlink would leave
    /// a positive balance with no way to withdraw it.
    pub async fn unlink_account(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
        donator_id: DonatorId,
    ) -> Result<()> {
        self.ledger
            .unlink_social_account(platform, account_id, donator_id)
            .await?;
        tracing::info!(%platform, %account_id, %donator_id, "account unlinked");
        Ok(())
    }

    /// Claim the account's entire claimable balance for `donator_id`.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the requester is not the account's
    /// OAuth-verified owner, or has no auth method to ever withdraw the
    /// claimed funds.
    pub async fn claim_donations(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
        donator_id: DonatorId,
    ) -> Result<Satoshi> {
        let account = self
            .ledger
            .query_social_account(platform, account_id)
            .await?
            .ok_or_else(|| {
                EngineError::Validation(format!("unknown {platform} account {account_id}"))
            })?;
        if account.owner_id != Some(donator_id) || !account.via_oauth {
            return Err(EngineError::Validation(
                "only the verified owner may claim an account's donations".to_string(),
            ));
        }
        if !self.ledger.is_connected(donator_id).await? {
            return Err(EngineError::Validation(
                "connect an auth method before claiming donations".to_string(),
            ));
        }
        Ok(self
            .ledger
            .transfer_donations(platform, account_id, donator_id)
            .await?)
    }
}
