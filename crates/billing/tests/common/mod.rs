//! Shared harness for billing integration tests
//!
//! Wires the billing service to the in-memory record store and the fake
//! payment gateway. The fallback witness file lives in a temp directory.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use blogify_billing::testing::FakeGateway;
use blogify_billing::webhooks::signature_header;
use blogify_billing::{
    BillingService, CreditLedger, PriceIds, SessionMirror, StripeConfig, UserLocks,
    WebhookOutcome, DEFAULT_PROCESSED_EVENTS_TABLE,
};
use blogify_shared::store::MemoryStore;
use blogify_shared::{Account, AccountRepository, AccountUpdate, NewAccount};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const WEBHOOK_SECRET: &str = "whsec_integration_secret";
pub const MEDIUM_PRICE: &str = "price_medium";
pub const PREMIUM_PRICE: &str = "price_premium";

/// Captures what the reconciler mirrors into sessions
#[derive(Default)]
pub struct RecordingMirror {
    pub accounts: Mutex<Vec<Account>>,
}

impl SessionMirror for RecordingMirror {
    fn mirror_account(&self, account: &Account) -> usize {
        self.accounts.lock().unwrap().push(account.clone());
        1
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub accounts: AccountRepository,
    pub mirror: Arc<RecordingMirror>,
    pub billing: BillingService,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let accounts = AccountRepository::new(store.clone());
        let ledger = CreditLedger::new(accounts.clone(), Arc::new(UserLocks::new()));
        let mirror = Arc::new(RecordingMirror::default());

        let config = StripeConfig {
            secret_key: "sk_test_integration".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            price_ids: PriceIds {
                medium: MEDIUM_PRICE.to_string(),
                premium: PREMIUM_PRICE.to_string(),
            },
            app_base_url: "http://localhost:3000".to_string(),
            processed_events_file: dir.path().join("processed_events.log"),
        };

        let billing = BillingService::with_gateway(
            config,
            gateway.clone(),
            ledger,
            store.clone(),
            DEFAULT_PROCESSED_EVENTS_TABLE,
        )
        .with_session_mirror(mirror.clone());

        Self {
            store,
            gateway,
            accounts,
            mirror,
            billing,
            dir,
        }
    }

    pub async fn account(&self, email: &str, credits: i64) -> Account {
        self.accounts
            .create(NewAccount {
                email: email.to_string(),
                password_hash: "hash".to_string(),
                confirmation_code: "123456".to_string(),
                credits,
            })
            .await
            .unwrap()
    }

    pub async fn account_with_customer(&self, email: &str, credits: i64, customer_id: &str) -> Account {
        let account = self.account(email, credits).await;
        self.accounts
            .update(&account.id, AccountUpdate::new().stripe_customer_id(customer_id))
            .await
            .unwrap()
    }

    pub async fn reload(&self, account: &Account) -> Account {
        self.accounts.get(&account.id).await.unwrap()
    }

    pub async fn processed_event_count(&self) -> usize {
        self.store.count(DEFAULT_PROCESSED_EVENTS_TABLE).await
    }

    /// Sign, verify and handle an event the way the webhook endpoint does
    pub async fn deliver(&self, event_id: &str, event_type: &str, object: Value) -> WebhookOutcome {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let payload = json!({
            "id": event_id,
            "object": "event",
            "type": event_type,
            "created": now,
            "data": { "object": object }
        })
        .to_string();
        let header = signature_header(WEBHOOK_SECRET, now, &payload).unwrap();
        let event = self.billing.webhooks.verify_event(&payload, &header).unwrap();
        self.billing.webhooks.handle_event(event).await
    }
}

pub fn checkout_completed(account: &Account, plan: &str, customer: &str, subscription: &str) -> Value {
    json!({
        "id": format!("cs_{}", subscription),
        "object": "checkout.session",
        "customer": customer,
        "subscription": subscription,
        "mode": "subscription",
        "metadata": { "user_id": account.id.as_str(), "plan": plan }
    })
}

pub fn invoice_paid(customer: &str, subscription: &str, price: &str, billing_reason: &str) -> Value {
    json!({
        "id": format!("in_{}_{}", subscription, billing_reason),
        "object": "invoice",
        "customer": customer,
        "subscription": subscription,
        "billing_reason": billing_reason,
        "lines": { "data": [ { "price": { "id": price } } ] }
    })
}

pub fn subscription_deleted(subscription: &str, customer: &str) -> Value {
    json!({
        "id": subscription,
        "object": "subscription",
        "customer": customer,
        "status": "canceled",
        "metadata": {}
    })
}
