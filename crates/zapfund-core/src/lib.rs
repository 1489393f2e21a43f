//! Core types for the zapfund donation ledger.
//!
//! This crate provides the foundational types used throughout the zapfund
//! platform:
//!
//! - **Identifiers**: `DonatorId`, `DonationId`, `SocialAccountId`, ...
//! - **Accounts**: `Donator`, `SocialAccount`, `SocialPlatform`
//! - **Donations**: `Donation`, `DonationTarget`, `BalanceDirection`
//! - **Claims**: `Transfer`, `Withdrawal`
//! - **Payments**: `PaymentRequest`, `RequestHash`, `Satoshi`
//!
//! # Units
//!
//! All balances and donation amounts are integer **satoshis** (`i64`).
//! Routing fees are reported by the payment backend in **millisatoshis**
//! and rounded up to whole sats when they touch a balance, so the ledger
//! never under-charges.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod donation;
pub mod donator;
pub mod error;
pub mod ids;
pub mod payment;
pub mod social;
pub mod transfer;
pub mod withdrawal;

pub use donation::{BalanceDirection, Donation, DonationTarget};
pub use donator::Donator;
pub use error::{CoreError, Result};
pub use ids::{DonationId, DonatorId, IdError, SocialAccountId, TransferId, VideoId, WithdrawalId};
pub use payment::{msat_to_sat_ceil, MilliSatoshi, PaymentRequest, RequestHash, Satoshi};
pub use social::{AccountMetadata, SocialAccount, SocialPlatform};
pub use transfer::Transfer;
pub use withdrawal::Withdrawal;
