//! Integration tests for payment event reconciliation
//!
//! Run against the in-memory record store and the fake gateway; no Stripe
//! account is needed.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use blogify_billing::gateway::SubscriptionDetails;
use blogify_billing::WebhookOutcome;
use blogify_shared::{AccountStatus, PlanName, RecordStore};
use common::*;
use serde_json::json;

#[tokio::test]
async fn checkout_completion_grants_plan_and_links_ids() {
    let h = Harness::new();
    let account = h.account("jane@example.com", 3).await;

    let outcome = h
        .deliver(
            "evt_checkout_1",
            "checkout.session.completed",
            checkout_completed(&account, "medium", "cus_1", "sub_1"),
        )
        .await;
    assert_eq!(outcome, WebhookOutcome::Applied);

    let account = h.reload(&account).await;
    assert_eq!(account.credits, 33);
    assert_eq!(account.plan_name, PlanName::Medium);
    assert_eq!(account.status, AccountStatus::Paying);
    assert_eq!(account.stripe_customer_id.as_deref(), Some("cus_1"));
    assert_eq!(account.stripe_subscription_id.as_deref(), Some("sub_1"));

    let mirrored = h.mirror.accounts.lock().unwrap();
    assert_eq!(mirrored.last().map(|a| a.credits), Some(33));
}

#[tokio::test]
async fn same_event_delivered_many_times_applies_once() {
    let h = Harness::new();
    let account = h.account("jane@example.com", 0).await;
    let object = checkout_completed(&account, "premium", "cus_1", "sub_1");

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(
            h.deliver("evt_dup", "checkout.session.completed", object.clone())
                .await,
        );
    }

    assert_eq!(outcomes[0], WebhookOutcome::Applied);
    assert!(outcomes[1..]
        .iter()
        .all(|o| *o == WebhookOutcome::AlreadyProcessed));
    assert_eq!(h.reload(&account).await.credits, 100);
    assert_eq!(h.processed_event_count().await, 1);
}

#[tokio::test]
async fn first_invoice_of_a_subscription_does_not_double_credit() {
    let h = Harness::new();
    let account = h.account("jane@example.com", 0).await;
    h.gateway.insert_subscription(SubscriptionDetails {
        id: "sub_1".into(),
        customer_id: Some("cus_1".into()),
        price_id: Some(MEDIUM_PRICE.into()),
        ..Default::default()
    });

    h.deliver(
        "evt_checkout",
        "checkout.session.completed",
        checkout_completed(&account, "medium", "cus_1", "sub_1"),
    )
    .await;
    let outcome = h
        .deliver(
            "evt_invoice",
            "invoice.payment_succeeded",
            invoice_paid("cus_1", "sub_1", MEDIUM_PRICE, "subscription_create"),
        )
        .await;

    assert_eq!(outcome, WebhookOutcome::Applied);
    assert_eq!(h.reload(&account).await.credits, 30);
    assert_eq!(h.processed_event_count().await, 2);
}

#[tokio::test]
async fn duplicate_checkout_for_same_subscription_is_not_credited_twice() {
    let h = Harness::new();
    let account = h.account("jane@example.com", 0).await;
    let object = checkout_completed(&account, "medium", "cus_1", "sub_1");

    h.deliver("evt_a", "checkout.session.completed", object.clone())
        .await;
    let outcome = h
        .deliver("evt_b", "checkout.session.completed", object)
        .await;

    assert_eq!(outcome, WebhookOutcome::Applied);
    assert_eq!(h.reload(&account).await.credits, 30);
}

#[tokio::test]
async fn resubscribing_with_new_subscription_is_credited() {
    let h = Harness::new();
    let account = h.account("jane@example.com", 0).await;

    h.deliver(
        "evt_a",
        "checkout.session.completed",
        checkout_completed(&account, "medium", "cus_1", "sub_1"),
    )
    .await;
    h.deliver(
        "evt_b",
        "customer.subscription.deleted",
        subscription_deleted("sub_1", "cus_1"),
    )
    .await;
    h.deliver(
        "evt_c",
        "checkout.session.completed",
        checkout_completed(&account, "medium", "cus_1", "sub_2"),
    )
    .await;

    let account = h.reload(&account).await;
    assert_eq!(account.credits, 60);
    assert_eq!(account.status, AccountStatus::Paying);
    assert_eq!(account.stripe_subscription_id.as_deref(), Some("sub_2"));
}

#[tokio::test]
async fn renewal_invoice_grants_by_subscription_price() {
    let h = Harness::new();
    let account = h.account_with_customer("jane@example.com", 5, "cus_1").await;
    h.gateway.insert_subscription(SubscriptionDetails {
        id: "sub_1".into(),
        customer_id: Some("cus_1".into()),
        price_id: Some(PREMIUM_PRICE.into()),
        ..Default::default()
    });

    // Line price is stale; the subscription's current price wins
    let outcome = h
        .deliver(
            "evt_renewal",
            "invoice.payment_succeeded",
            invoice_paid("cus_1", "sub_1", MEDIUM_PRICE, "subscription_cycle"),
        )
        .await;

    assert_eq!(outcome, WebhookOutcome::Applied);
    assert_eq!(h.reload(&account).await.credits, 105);
}

#[tokio::test]
async fn renewal_invoice_falls_back_to_line_price_when_stripe_is_down() {
    let h = Harness::new();
    let account = h.account_with_customer("jane@example.com", 0, "cus_1").await;
    h.gateway.set_unavailable(true);

    let outcome = h
        .deliver(
            "evt_renewal",
            "invoice.payment_succeeded",
            invoice_paid("cus_1", "sub_1", MEDIUM_PRICE, "subscription_cycle"),
        )
        .await;

    assert_eq!(outcome, WebhookOutcome::Applied);
    assert_eq!(h.reload(&account).await.credits, 30);
}

#[tokio::test]
async fn grants_from_checkout_and_renewal_commute() {
    let h = Harness::new();
    let first = h.account_with_customer("a@example.com", 2, "cus_a").await;
    let second = h.account_with_customer("b@example.com", 2, "cus_b").await;

    // checkout, then renewal
    h.deliver(
        "evt_a1",
        "checkout.session.completed",
        checkout_completed(&first, "medium", "cus_a", "sub_a"),
    )
    .await;
    h.deliver(
        "evt_a2",
        "invoice.payment_succeeded",
        invoice_paid("cus_a", "sub_a", PREMIUM_PRICE, "subscription_cycle"),
    )
    .await;

    // renewal, then checkout
    h.deliver(
        "evt_b1",
        "invoice.payment_succeeded",
        invoice_paid("cus_b", "sub_b", PREMIUM_PRICE, "subscription_cycle"),
    )
    .await;
    h.deliver(
        "evt_b2",
        "checkout.session.completed",
        checkout_completed(&second, "medium", "cus_b", "sub_b"),
    )
    .await;

    let first = h.reload(&first).await;
    let second = h.reload(&second).await;
    assert_eq!(first.credits, 132);
    assert_eq!(first.credits, second.credits);
}

#[tokio::test]
async fn subscription_deletion_keeps_credits() {
    let h = Harness::new();
    let account = h.account("jane@example.com", 0).await;
    h.deliver(
        "evt_checkout",
        "checkout.session.completed",
        checkout_completed(&account, "premium", "cus_1", "sub_1"),
    )
    .await;
    let before = h.reload(&account).await;

    let outcome = h
        .deliver(
            "evt_deleted",
            "customer.subscription.deleted",
            subscription_deleted("sub_1", "cus_1"),
        )
        .await;

    assert_eq!(outcome, WebhookOutcome::Applied);
    let after = h.reload(&account).await;
    assert_eq!(after.credits, before.credits);
    assert_eq!(after.plan_name, PlanName::Free);
    assert_eq!(after.status, AccountStatus::Cancelled);

    let raw = h
        .store
        .all(h.accounts.table(), None)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.id == account.id.as_str())
        .unwrap();
    assert_eq!(raw.fields.get("credits"), Some(&json!(100)));
}

#[tokio::test]
async fn unrecognized_events_are_acknowledged_and_recorded() {
    let h = Harness::new();
    let outcome = h
        .deliver("evt_other", "customer.updated", json!({ "id": "cus_1" }))
        .await;
    assert_eq!(outcome, WebhookOutcome::Applied);
    assert_eq!(h.processed_event_count().await, 1);
}

#[tokio::test]
async fn failed_dispatch_is_still_marked_processed() {
    let h = Harness::new();
    let object = json!({
        "id": "cs_orphan",
        "customer": "cus_9",
        "subscription": "sub_9",
        "metadata": { "user_id": "recZZZZZZZZZZZZZZ", "plan": "medium" }
    });

    let first = h
        .deliver("evt_orphan", "checkout.session.completed", object.clone())
        .await;
    let second = h
        .deliver("evt_orphan", "checkout.session.completed", object)
        .await;

    assert_eq!(first, WebhookOutcome::Failed);
    assert_eq!(second, WebhookOutcome::AlreadyProcessed);
}

#[tokio::test]
async fn checkout_without_metadata_uses_subscription_metadata() {
    let h = Harness::new();
    let account = h.account("jane@example.com", 0).await;
    h.gateway.insert_subscription(SubscriptionDetails {
        id: "sub_1".into(),
        customer_id: Some("cus_1".into()),
        price_id: Some(PREMIUM_PRICE.into()),
        metadata: [
            ("user_id".to_string(), account.id.to_string()),
            ("plan".to_string(), "premium".to_string()),
        ]
        .into_iter()
        .collect(),
    });

    let outcome = h
        .deliver(
            "evt_checkout",
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": {}
            }),
        )
        .await;

    assert_eq!(outcome, WebhookOutcome::Applied);
    assert_eq!(h.reload(&account).await.credits, 100);
}

#[tokio::test]
async fn checkout_resolves_account_by_email() {
    let h = Harness::new();
    let account = h.account("jane@example.com", 0).await;

    let outcome = h
        .deliver(
            "evt_checkout",
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "user_id": "Jane@Example.com", "plan": "medium" }
            }),
        )
        .await;

    assert_eq!(outcome, WebhookOutcome::Applied);
    assert_eq!(h.reload(&account).await.credits, 30);
}

#[tokio::test]
async fn file_witness_takes_over_when_event_table_is_down() {
    let h = Harness::new();
    let account = h.account("jane@example.com", 0).await;
    let object = checkout_completed(&account, "medium", "cus_1", "sub_1");
    h.store
        .set_unavailable(blogify_billing::DEFAULT_PROCESSED_EVENTS_TABLE, true);

    let first = h
        .deliver("evt_1", "checkout.session.completed", object.clone())
        .await;
    let second = h
        .deliver("evt_1", "checkout.session.completed", object)
        .await;

    assert_eq!(first, WebhookOutcome::Applied);
    assert_eq!(second, WebhookOutcome::AlreadyProcessed);
    assert_eq!(h.reload(&account).await.credits, 30);

    let witness = std::fs::read_to_string(h.dir.path().join("processed_events.log")).unwrap();
    assert_eq!(witness, "evt_1\n");
}

#[tokio::test]
async fn tampered_payload_fails_verification() {
    let h = Harness::new();
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    let payload = r#"{"id":"evt_1","type":"customer.updated","data":{"object":{}}}"#;
    let header =
        blogify_billing::webhooks::signature_header(WEBHOOK_SECRET, now, payload).unwrap();

    let tampered = payload.replace("evt_1", "evt_2");
    assert!(matches!(
        h.billing.webhooks.verify_event(&tampered, &header),
        Err(blogify_billing::BillingError::WebhookSignatureInvalid)
    ));
}
