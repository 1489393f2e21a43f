//! Property tests for the ledger invariants the engines rely on.

mod common;

use chrono::Utc;
use proptest::prelude::*;

use common::Harness;
use zapfund_core::{Donator, SocialPlatform};
use zapfund_engine::DonateTarget;
use zapfund_store::Ledger;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

fn channel_target() -> DonateTarget {
    DonateTarget::Social {
        platform: SocialPlatform::Youtube,
        external_id: "UC1".to_string(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: settling the same invoice any number of times credits the
    /// target exactly once.
    #[test]
    fn settlement_is_idempotent(amount in 1i64..100_000, replays in 1usize..4) {
        let result: Result<(), TestCaseError> = block_on(async {
            let h = Harness::new();
            h.channel("UC1", "alice");
            let donator = Donator::anonymous();
            let outcome = h
                .donations
                .donate(&donator, channel_target(), amount, None)
                .await
                .unwrap();
            let r_hash = outcome.donation.r_hash.unwrap();
            for _ in 0..replays {
                h.donations
                    .finish_donation(r_hash.into(), amount, Utc::now(), None, None)
                    .await
                    .unwrap();
            }
            let account = h
                .ledger
                .query_social_account_by_external_id(SocialPlatform::Youtube, "UC1")
                .await
                .unwrap()
                .unwrap();
            prop_assert_eq!(account.balance, amount);
            prop_assert_eq!(account.total_donated, amount);
            Ok(())
        });
        result?;
    }

    /// Property: a donation settles from balance exactly when the balance
    /// covers it, and the balance never goes negative.
    #[test]
    fn balance_is_never_overspent(
        fund in 1i64..2_000,
        spends in prop::collection::vec(1i64..800, 1..8),
    ) {
        let result: Result<(), TestCaseError> = block_on(async {
            let h = Harness::new();
            h.channel("UC1", "alice");
            let donator = Donator::anonymous();
            h.fund(&donator, fund).await;

            let mut remaining = fund;
            for amount in spends {
                let outcome = h
                    .donations
                    .donate(&donator, channel_target(), amount, None)
                    .await
                    .unwrap();
                if amount <= remaining {
                    prop_assert!(outcome.payment_request.is_none());
                    remaining -= amount;
                } else {
                    // Not enough balance: the engine falls back to an invoice.
                    prop_assert!(outcome.payment_request.is_some());
                }
                let balance = h
                    .ledger
                    .query_donator(donator.id)
                    .await
                    .unwrap()
                    .unwrap()
                    .balance;
                prop_assert!(balance >= 0);
                prop_assert_eq!(balance, remaining);
            }
            Ok(())
        });
        result?;
    }

    /// Property: value is conserved through a claim. After settling a batch
    /// of donations and claiming them, the owner holds exactly their sum,
    /// the account balance is zero and the lifetime tally is unchanged.
    #[test]
    fn claims_conserve_value(amounts in prop::collection::vec(1i64..10_000, 1..10)) {
        let result: Result<(), TestCaseError> = block_on(async {
            let h = Harness::new();
            h.channel("UC1", "alice");
            let donator = Donator::anonymous();
            let total: i64 = amounts.iter().sum();

            for amount in &amounts {
                let outcome = h
                    .donations
                    .donate(&donator, channel_target(), *amount, None)
                    .await
                    .unwrap();
                h.donations
                    .finish_donation(
                        outcome.donation.r_hash.unwrap().into(),
                        *amount,
                        Utc::now(),
                        None,
                        None,
                    )
                    .await
                    .unwrap();
            }

            let account = h
                .donations
                .resolve_social_account(SocialPlatform::Youtube, "UC1")
                .await
                .unwrap();
            prop_assert_eq!(account.balance, total);

            let owner = Donator::anonymous();
            let claimed = h
                .transfers
                .link_account(SocialPlatform::Youtube, account.id, &owner, true)
                .await
                .unwrap();
            prop_assert_eq!(claimed, total);

            let account = h
                .ledger
                .query_social_account(SocialPlatform::Youtube, account.id)
                .await
                .unwrap()
                .unwrap();
            prop_assert_eq!(account.balance, 0);
            prop_assert_eq!(account.total_donated, total);
            prop_assert_eq!(
                h.ledger.query_donator(owner.id).await.unwrap().unwrap().balance,
                total
            );
            Ok(())
        });
        result?;
    }
}
