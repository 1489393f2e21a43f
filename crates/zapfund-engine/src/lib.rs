//! Donation, transfer and withdrawal engines for the zapfund ledger.
//!
//! This crate ties the ledger ([`zapfund_store`]), the Lightning payment
//! backend ([`zapfund_lnd`]) and the social directory together into the
//! operations the platform exposes: initiating and settling donations,
//! claiming social-account balances onto donator balances, and paying out
//! withdrawals.
//!
//! Dependencies are injected as trait objects, so every engine runs
//! unchanged over the in-memory ledger and a scripted payment backend in
//! tests.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use zapfund_engine::{
//!     DonateTarget, DonationEngine, EngineConfig, LndBackend, SocialDirectory,
//! };
//! use zapfund_lnd::LndConfig;
//! use zapfund_store::MemoryLedger;
//!
//! # async fn example(directory: Arc<dyn SocialDirectory>) -> zapfund_engine::Result<()> {
//! let ledger = Arc::new(MemoryLedger::new());
//! let backend = Arc::new(LndBackend::new(
//!     LndConfig::new().with_url("https://localhost:8080"),
//! )?);
//! let engine = DonationEngine::new(ledger, backend, directory, EngineConfig::new());
//!
//! let donator = zapfund_core::Donator::anonymous();
//! let outcome = engine
//!     .donate(
//!         &donator,
//!         DonateTarget::Social {
//!             platform: zapfund_core::SocialPlatform::Youtube,
//!             external_id: "UC1234".to_string(),
//!         },
//!         1000,
//!         None,
//!     )
//!     .await?;
//! println!("pay {:?}", outcome.payment_request);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod backend;
pub mod config;
pub mod directory;
pub mod donation;
pub mod error;
pub mod listener;
pub mod transfer;
pub mod withdraw;

pub use backend::{
    BackendError, InvoiceStatus, IssuedInvoice, LndBackend, PaymentBackend, PaymentResult,
    Settlement,
};
pub use config::EngineConfig;
pub use directory::{DirectoryError, SocialDirectory};
pub use donation::{DonateOutcome, DonateTarget, DonationEngine};
pub use error::{EngineError, Result};
pub use listener::SettlementListener;
pub use transfer::TransferEngine;
pub use withdraw::WithdrawEngine;
