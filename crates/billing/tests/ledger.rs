//! Integration tests for the credit ledger under concurrency

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use blogify_billing::{BillingError, Settlement};
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_consumption_never_overdraws() {
    let h = Harness::new();
    let account = h.account("jane@example.com", 10).await;
    let ledger = Arc::new(h.billing.ledger.clone());

    let mut tasks = Vec::new();
    for _ in 0..25 {
        let ledger = ledger.clone();
        let id = account.id.clone();
        tasks.push(tokio::spawn(async move { ledger.try_consume(&id, 1).await }));
    }

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(balance) => {
                assert!(balance >= 0);
                succeeded += 1;
            }
            Err(BillingError::InsufficientCredits { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(h.billing.ledger.get_balance(&account.id).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn interleaved_grants_and_spends_balance_out() {
    let h = Harness::new();
    let account = h.account("jane@example.com", 5).await;
    let ledger = Arc::new(h.billing.ledger.clone());
    let spent = Arc::new(AtomicI64::new(0));

    let mut tasks = Vec::new();
    for i in 0..40 {
        let ledger = ledger.clone();
        let spent = spent.clone();
        let id = account.id.clone();
        tasks.push(tokio::spawn(async move {
            if i % 4 == 0 {
                ledger.grant(&id, 3).await.unwrap();
            } else if ledger.try_consume(&id, 2).await.is_ok() {
                spent.fetch_add(2, Ordering::SeqCst);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let granted = 10 * 3;
    let spent = spent.load(Ordering::SeqCst);
    let balance = h.billing.ledger.get_balance(&account.id).await.unwrap();
    assert!(spent <= 5 + granted);
    assert_eq!(balance, 5 + granted - spent);
    assert!(balance >= 0);
}

#[tokio::test]
async fn degraded_quote_charges_base_cost_only() {
    let h = Harness::new();
    let account = h.account("jane@example.com", 2).await;
    let ledger = &h.billing.ledger;

    let quote = ledger.quote_article(&account.id, true).await.unwrap();
    assert_eq!(quote.cost, 1);
    assert!(!quote.with_image);
    assert!(quote.warning.is_some());

    let settlement = ledger.settle(&account.id, quote.cost).await.unwrap();
    assert_eq!(settlement, Settlement::Charged { balance: 1 });
}

#[tokio::test]
async fn empty_balance_is_refused_before_any_work() {
    let h = Harness::new();
    let account = h.account("jane@example.com", 0).await;

    let refused = h.billing.ledger.quote_article(&account.id, false).await;
    assert!(matches!(
        refused,
        Err(BillingError::InsufficientCredits {
            balance: 0,
            required: 1
        })
    ));
}

#[tokio::test]
async fn store_outage_surfaces_as_upstream_error() {
    let h = Harness::new();
    let account = h.account("jane@example.com", 4).await;
    h.store.set_unavailable(h.accounts.table(), true);

    let err = h.billing.ledger.try_consume(&account.id, 1).await.unwrap_err();
    assert!(err.is_upstream());

    h.store.set_unavailable(h.accounts.table(), false);
    assert_eq!(h.billing.ledger.get_balance(&account.id).await.unwrap(), 4);
}
