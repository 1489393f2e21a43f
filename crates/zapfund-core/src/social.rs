//! Social account types and the platform registry.
//!
//! The three supported platforms share one account shape and one set of
//! ledger semantics; they differ only in where their rows live and which
//! external key identifies them. Instead of runtime reflection, the
//! platform enum is an explicit registry mapping each platform to its
//! table and column names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DonatorId, SocialAccountId};
use crate::payment::Satoshi;

/// The social platforms that can be donation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialPlatform {
    /// A YouTube channel.
    Youtube,
    /// A Twitter author.
    Twitter,
    /// A GitHub user.
    Github,
}

impl SocialPlatform {
    /// All platforms, for iteration.
    pub const ALL: [Self; 3] = [Self::Youtube, Self::Twitter, Self::Github];

    /// Short name used in notification topics and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Twitter => "twitter",
            Self::Github => "github",
        }
    }

    /// Table holding the account rows.
    #[must_use]
    pub const fn account_table(self) -> &'static str {
        match self {
            Self::Youtube => "youtube_channel",
            Self::Twitter => "twitter_author",
            Self::Github => "github_user",
        }
    }

    /// Table holding donator links for this platform.
    #[must_use]
    pub const fn link_table(self) -> &'static str {
        match self {
            Self::Youtube => "youtube_channel_link",
            Self::Twitter => "twitter_author_link",
            Self::Github => "github_user_link",
        }
    }

    /// Foreign-key column referencing the account, used in the donation,
    /// transfer and link tables alike.
    #[must_use]
    pub const fn account_column(self) -> &'static str {
        match self {
            Self::Youtube => "youtube_channel_id",
            Self::Twitter => "twitter_author_id",
            Self::Github => "github_user_id",
        }
    }

    /// Column holding the platform-specific external identifier.
    #[must_use]
    pub const fn external_id_column(self) -> &'static str {
        match self {
            Self::Youtube => "channel_id",
            Self::Twitter => "handle",
            Self::Github => "login",
        }
    }
}

impl std::fmt::Display for SocialPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A social account tracked as a donation target.
///
/// `owner_id`/`via_oauth` describe the verified owner link, when one exists;
/// they come from a join and are not columns of the account row itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialAccount {
    /// The account ID.
    pub id: SocialAccountId,

    /// Which platform the account belongs to.
    pub platform: SocialPlatform,

    /// Platform-specific external identifier (channel id, handle, login).
    pub external_id: String,

    /// Display title.
    pub title: Option<String>,

    /// Thumbnail URL.
    pub thumbnail_url: Option<String>,

    /// Unclaimed balance in satoshis. Never negative.
    pub balance: Satoshi,

    /// Lifetime donated amount in satoshis.
    pub total_donated: Satoshi,

    /// When external metadata was last fetched; `None` if never.
    pub last_fetched_at: Option<DateTime<Utc>>,

    /// The OAuth-verified owner, if one is linked.
    pub owner_id: Option<DonatorId>,

    /// Whether the owner link was established via OAuth.
    pub via_oauth: bool,
}

impl SocialAccount {
    /// Whether the account has an OAuth-verified owner.
    #[must_use]
    pub fn has_verified_owner(&self) -> bool {
        self.owner_id.is_some() && self.via_oauth
    }
}

/// Display metadata fetched from the external platform directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMetadata {
    /// Platform-specific external identifier.
    pub external_id: String,

    /// Display title or handle.
    pub title: String,

    /// Thumbnail URL, if the platform provides one.
    pub thumbnail_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_consistent() {
        for platform in SocialPlatform::ALL {
            assert!(platform.link_table().starts_with(platform.account_table()));
            assert!(platform.account_column().ends_with("_id"));
        }
    }

    #[test]
    fn verified_owner_requires_oauth() {
        let mut account = SocialAccount {
            id: SocialAccountId::generate(),
            platform: SocialPlatform::Youtube,
            external_id: "UC123".into(),
            title: None,
            thumbnail_url: None,
            balance: 0,
            total_donated: 0,
            last_fetched_at: None,
            owner_id: Some(DonatorId::generate()),
            via_oauth: false,
        };
        assert!(!account.has_verified_owner());
        account.via_oauth = true;
        assert!(account.has_verified_owner());
    }
}
