//! LND REST and LNURL-pay client for zapfund.
//!
//! This crate talks to an external LND node over its REST gateway: issuing
//! and looking up invoices, paying payment requests through the router,
//! decoding payment requests, and streaming invoice settlement events. It
//! also implements the LNURL-pay flow for resolving lightning addresses
//! into payment requests.
//!
//! # Example
//!
//! ```no_run
//! use zapfund_lnd::{LndClient, LndConfig};
//!
//! # async fn example() -> Result<(), zapfund_lnd::LndError> {
//! let client = LndClient::new(
//!     LndConfig::new()
//!         .with_url("https://localhost:8080")
//!         .with_macaroon_hex("0201036c6e64..."),
//! )?;
//!
//! let invoice = client.create_invoice("Tip for alice", 1000, None).await?;
//! println!("pay this: {}", invoice.payment_request);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod config;
mod error;
mod lnurl;
mod types;

pub use client::LndClient;
pub use config::LndConfig;
pub use error::LndError;
pub use lnurl::{lightning_address_to_lnurlp, LnurlpClient, LnurlpMetadata};
pub use types::{DecodedPaymentRequest, Invoice, InvoiceState, Payment, PaymentStatus};
