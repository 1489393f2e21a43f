//! PostgreSQL integration tests.
//!
//! These run against a live database and are ignored by default:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/zapfund_test cargo test -p zapfund-store -- --ignored
//! ```

use chrono::Utc;

use zapfund_core::{Donation, DonationTarget, Donator, RequestHash, SocialPlatform};
use zapfund_store::{DonationFilter, Ledger, PgLedger, SettleOutcome, StoreError};

async fn ledger() -> PgLedger {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a test database");
    let ledger = PgLedger::connect(&url).await.expect("connect");
    ledger.migrate().await.expect("migrate");
    ledger
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn donator_roundtrip_preserves_balance() {
    let ledger = ledger().await;
    let mut donator = Donator::anonymous();
    donator.name = Some("integration".to_string());
    ledger.save_donator(&donator).await.unwrap();

    // save_donator overwrites profile fields but never the ledger-owned
    // balance.
    donator.name = Some("renamed".to_string());
    donator.balance = 999_999;
    ledger.save_donator(&donator).await.unwrap();

    let stored = ledger.query_donator(donator.id).await.unwrap().unwrap();
    assert_eq!(stored.name.as_deref(), Some("renamed"));
    assert_eq!(stored.balance, 0);
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn inbound_settlement_is_transactional_and_idempotent() {
    let ledger = ledger().await;
    let donator = Donator::anonymous();
    ledger.ensure_donator(&donator).await.unwrap();
    let receiver = Donator::anonymous();
    ledger.ensure_donator(&receiver).await.unwrap();

    let mut donation = Donation::new(
        Some(donator.id),
        DonationTarget::Donator(receiver.id),
        250,
    )
    .unwrap();
    donation.r_hash = Some(RequestHash::from_preimage(donation.id.to_string().as_bytes()));
    ledger.create_donation(&donation).await.unwrap();

    let outcome = ledger
        .donation_paid(donation.id.into(), 250, Utc::now(), None, None)
        .await
        .unwrap();
    assert!(matches!(outcome, SettleOutcome::Settled(_)));
    let outcome = ledger
        .donation_paid(donation.id.into(), 250, Utc::now(), None, None)
        .await
        .unwrap();
    assert_eq!(outcome, SettleOutcome::AlreadySettled);

    let stored = ledger.query_donator(receiver.id).await.unwrap().unwrap();
    assert_eq!(stored.balance, 250);
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn overdraft_rolls_back_the_whole_settlement() {
    let ledger = ledger().await;
    let donator = Donator::anonymous();
    ledger.ensure_donator(&donator).await.unwrap();
    let receiver = Donator::anonymous();
    ledger.ensure_donator(&receiver).await.unwrap();

    // Internal donation with a zero-balance donator: the donator debit
    // fails, and the receiver credit must be rolled back with it.
    let donation = Donation::new(
        Some(donator.id),
        DonationTarget::Donator(receiver.id),
        100,
    )
    .unwrap();
    ledger.create_donation(&donation).await.unwrap();

    let err = ledger
        .donation_paid(donation.id.into(), 100, Utc::now(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotEnoughBalance { .. }));

    let stored = ledger.query_donator(receiver.id).await.unwrap().unwrap();
    assert_eq!(stored.balance, 0);
    let stored = ledger
        .query_donation(donation.id.into())
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.is_paid());
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn duplicate_r_hash_is_a_conflict() {
    let ledger = ledger().await;
    let receiver = Donator::anonymous();
    ledger.ensure_donator(&receiver).await.unwrap();

    let r_hash = RequestHash::from_preimage(uuid::Uuid::new_v4().as_bytes());
    let mut first = Donation::new(None, DonationTarget::Donator(receiver.id), 10).unwrap();
    first.r_hash = Some(r_hash);
    ledger.create_donation(&first).await.unwrap();

    let mut second = Donation::new(None, DonationTarget::Donator(receiver.id), 10).unwrap();
    second.r_hash = Some(r_hash);
    let err = ledger.create_donation(&second).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn notifications_arrive_through_listen_notify() {
    let ledger = ledger().await;
    let receiver = Donator::anonymous();
    ledger.ensure_donator(&receiver).await.unwrap();

    let mut sub = ledger.subscribe(&format!("donator:{}", receiver.id));
    // Give the listener connection a moment to register the channel.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let mut donation =
        Donation::new(None, DonationTarget::Donator(receiver.id), 42).unwrap();
    donation.r_hash = Some(RequestHash::from_preimage(donation.id.to_string().as_bytes()));
    ledger.create_donation(&donation).await.unwrap();
    ledger
        .donation_paid(donation.id.into(), 42, Utc::now(), None, None)
        .await
        .unwrap();

    let notification = tokio::time::timeout(std::time::Duration::from_secs(5), sub.recv())
        .await
        .expect("notification within deadline")
        .expect("subscription open");
    assert_eq!(notification.id, receiver.id.into_uuid());
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn donation_listing_orders_by_activity() {
    let ledger = ledger().await;
    let receiver = Donator::anonymous();
    ledger.ensure_donator(&receiver).await.unwrap();

    let mut ids = Vec::new();
    for amount in [10, 20, 30] {
        let mut donation =
            Donation::new(None, DonationTarget::Donator(receiver.id), amount).unwrap();
        donation.r_hash =
            Some(RequestHash::from_preimage(donation.id.to_string().as_bytes()));
        ledger.create_donation(&donation).await.unwrap();
        ledger
            .donation_paid(donation.id.into(), amount, Utc::now(), None, None)
            .await
            .unwrap();
        ids.push(donation.id);
    }

    let filter = DonationFilter {
        receiver_id: Some(receiver.id),
        only_paid: true,
        ..DonationFilter::default()
    };
    let listed = ledger.query_donations(&filter, 10, 0).await.unwrap();
    let listed_ids: Vec<_> = listed.iter().map(|d| d.id).collect();
    ids.reverse();
    assert_eq!(listed_ids, ids);
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn oauth_link_conflicts_with_an_existing_owner() {
    let ledger = ledger().await;
    let metadata = zapfund_core::AccountMetadata {
        external_id: format!("UC-{}", uuid::Uuid::new_v4()),
        title: "channel".to_string(),
        thumbnail_url: None,
    };
    let account = ledger
        .save_social_account(SocialPlatform::Youtube, &metadata)
        .await
        .unwrap();

    let owner = Donator::anonymous();
    let changed = ledger
        .link_social_account(SocialPlatform::Youtube, account.id, &owner, true)
        .await
        .unwrap();
    assert!(changed);

    let rival = Donator::anonymous();
    let err = ledger
        .link_social_account(SocialPlatform::Youtube, account.id, &rival, true)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}
