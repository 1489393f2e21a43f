//! Shared test harness: an in-memory ledger wired to a scripted payment
//! backend and a static directory.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;

use zapfund_core::{
    AccountMetadata, Donator, PaymentRequest, RequestHash, Satoshi, SocialPlatform,
};
use zapfund_engine::{
    BackendError, DirectoryError, DonateTarget, DonationEngine, EngineConfig, InvoiceStatus,
    IssuedInvoice, PaymentBackend, PaymentResult, Settlement, SocialDirectory, TransferEngine,
    WithdrawEngine,
};
use zapfund_store::MemoryLedger;

/// A payment backend scripted entirely from the test.
#[derive(Default)]
pub struct ScriptedBackend {
    counter: AtomicI64,
    /// Routing fee reported for every successful payment.
    pub fee_msat: AtomicI64,
    /// Make every `pay_invoice` call fail.
    pub fail_payments: AtomicBool,
    /// Offset applied to the amount of lightning-address invoices, for
    /// provoking amount mismatches.
    pub address_amount_offset: AtomicI64,
    /// Every invoice issued through `create_invoice`.
    pub issued: Mutex<Vec<IssuedInvoice>>,
    /// Every payment request paid through `pay_invoice`.
    pub paid: Mutex<Vec<PaymentRequest>>,
    /// Every hash passed to `cancel_invoice`.
    pub cancelled: Mutex<Vec<RequestHash>>,
    decode: Mutex<HashMap<String, (RequestHash, Satoshi)>>,
    settlements: Mutex<Vec<Result<Settlement, BackendError>>>,
    lookups: Mutex<HashMap<RequestHash, InvoiceStatus>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The preimage the backend uses for a lightning-address invoice, so
    /// tests can prove remote payments.
    pub fn lnurl_preimage(address: &str, amount: Satoshi) -> Vec<u8> {
        format!("lnurl:{address}:{amount}").into_bytes()
    }

    /// Register a decodable invoice, as a donator's wallet would supply for
    /// a withdrawal.
    pub fn script_invoice(&self, amount: Satoshi) -> (PaymentRequest, RequestHash) {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let pay_req = PaymentRequest::parse(format!("lnbcrt{n}scripted")).unwrap();
        let r_hash = RequestHash::from_preimage(format!("scripted:{n}").as_bytes());
        self.decode
            .lock()
            .unwrap()
            .insert(pay_req.as_str().to_string(), (r_hash, amount));
        (pay_req, r_hash)
    }

    /// Queue a settlement event for the next `settlements()` stream.
    pub fn script_settlement(&self, event: Result<Settlement, BackendError>) {
        self.settlements.lock().unwrap().push(event);
    }

    /// Set what `lookup_invoice` reports for a hash.
    pub fn script_lookup(&self, r_hash: RequestHash, status: InvoiceStatus) {
        self.lookups.lock().unwrap().insert(r_hash, status);
    }
}

#[async_trait]
impl PaymentBackend for ScriptedBackend {
    async fn create_invoice(
        &self,
        _memo: &str,
        amount: Satoshi,
        _expiry: Option<i64>,
    ) -> Result<IssuedInvoice, BackendError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let r_hash = RequestHash::from_preimage(format!("invoice:{n}").as_bytes());
        let payment_request = PaymentRequest::parse(format!("lnbcrt{n}invoice")).unwrap();
        self.decode
            .lock()
            .unwrap()
            .insert(payment_request.as_str().to_string(), (r_hash, amount));
        let invoice = IssuedInvoice {
            r_hash,
            payment_request,
        };
        self.issued.lock().unwrap().push(invoice.clone());
        Ok(invoice)
    }

    async fn decode_payment_request(
        &self,
        payment_request: &PaymentRequest,
    ) -> Result<(RequestHash, Satoshi), BackendError> {
        self.decode
            .lock()
            .unwrap()
            .get(payment_request.as_str())
            .copied()
            .ok_or_else(|| {
                BackendError::InvalidPaymentRequest(payment_request.as_str().to_string())
            })
    }

    async fn resolve_lightning_address(
        &self,
        address: &str,
        amount: Satoshi,
        _comment: &str,
    ) -> Result<PaymentRequest, BackendError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let payment_request = PaymentRequest::parse(format!("lnbcrt{n}lnurl")).unwrap();
        let r_hash = RequestHash::from_preimage(&Self::lnurl_preimage(address, amount));
        let invoice_amount = amount + self.address_amount_offset.load(Ordering::Relaxed);
        self.decode
            .lock()
            .unwrap()
            .insert(payment_request.as_str().to_string(), (r_hash, invoice_amount));
        Ok(payment_request)
    }

    async fn pay_invoice(
        &self,
        payment_request: &PaymentRequest,
    ) -> Result<PaymentResult, BackendError> {
        if self.fail_payments.load(Ordering::Relaxed) {
            return Err(BackendError::PaymentFailed("no route".to_string()));
        }
        let (_, amount) = self.decode_payment_request(payment_request).await?;
        self.paid.lock().unwrap().push(payment_request.clone());
        Ok(PaymentResult {
            amount,
            fee_msat: self.fee_msat.load(Ordering::Relaxed),
            paid_at: Utc::now(),
        })
    }

    async fn cancel_invoice(&self, r_hash: RequestHash) -> Result<(), BackendError> {
        self.cancelled.lock().unwrap().push(r_hash);
        Ok(())
    }

    async fn lookup_invoice(&self, r_hash: RequestHash) -> Result<InvoiceStatus, BackendError> {
        Ok(self
            .lookups
            .lock()
            .unwrap()
            .get(&r_hash)
            .cloned()
            .unwrap_or(InvoiceStatus::Open))
    }

    async fn settlements(
        &self,
    ) -> Result<BoxStream<'static, Result<Settlement, BackendError>>, BackendError> {
        let events: Vec<_> = self.settlements.lock().unwrap().drain(..).collect();
        Ok(futures::stream::iter(events).boxed())
    }
}

/// A directory serving metadata from a fixed table, counting fetches.
#[derive(Default)]
pub struct StaticDirectory {
    accounts: Mutex<HashMap<(SocialPlatform, String), AccountMetadata>>,
    pub fetches: AtomicUsize,
}

impl StaticDirectory {
    pub fn insert(&self, platform: SocialPlatform, metadata: AccountMetadata) {
        self.accounts
            .lock()
            .unwrap()
            .insert((platform, metadata.external_id.clone()), metadata);
    }
}

#[async_trait]
impl SocialDirectory for StaticDirectory {
    async fn fetch(
        &self,
        platform: SocialPlatform,
        external_ref: &str,
    ) -> Result<AccountMetadata, DirectoryError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.accounts
            .lock()
            .unwrap()
            .get(&(platform, external_ref.to_string()))
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound {
                platform,
                external_ref: external_ref.to_string(),
            })
    }
}

/// Everything a scenario needs, wired together.
pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub backend: Arc<ScriptedBackend>,
    pub directory: Arc<StaticDirectory>,
    pub donations: Arc<DonationEngine>,
    pub transfers: TransferEngine,
    pub withdraws: WithdrawEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::new())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        let backend = Arc::new(ScriptedBackend::new());
        let directory = Arc::new(StaticDirectory::default());
        let donations = Arc::new(DonationEngine::new(
            ledger.clone(),
            backend.clone(),
            directory.clone(),
            config.clone(),
        ));
        let transfers = TransferEngine::new(ledger.clone());
        let withdraws = WithdrawEngine::new(ledger.clone(), backend.clone(), config);
        Self {
            ledger,
            backend,
            directory,
            donations,
            transfers,
            withdraws,
        }
    }

    /// Register a YouTube channel in the directory.
    pub fn channel(&self, external_id: &str, title: &str) {
        self.directory.insert(
            SocialPlatform::Youtube,
            AccountMetadata {
                external_id: external_id.to_string(),
                title: title.to_string(),
                thumbnail_url: None,
            },
        );
    }

    /// Fund a donator's balance through the self-donation flow: issue an
    /// invoice to oneself and settle it.
    pub async fn fund(&self, donator: &Donator, amount: Satoshi) {
        let outcome = self
            .donations
            .donate(donator, DonateTarget::Donator(donator.id), amount, None)
            .await
            .unwrap();
        assert!(outcome.payment_request.is_some(), "funding must go through an invoice");
        let r_hash = outcome.donation.r_hash.unwrap();
        self.donations
            .finish_donation(r_hash.into(), amount, Utc::now(), None, None)
            .await
            .unwrap();
    }
}
