//! Blogify Billing
//!
//! Credits, plans and Stripe reconciliation:
//! - Plan catalog mapping Stripe prices to credit grants
//! - Credit ledger with per-account locking
//! - Webhook verification and idempotent event reconciliation
//! - Checkout and upgrade flow

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod checkout;
pub mod client;
pub mod error;
pub mod events;
pub mod gateway;
pub mod idempotency;
pub mod ledger;
pub mod locks;
pub mod plans;
pub mod testing;
pub mod webhooks;

use std::sync::Arc;

use blogify_shared::RecordStore;

pub use checkout::{correlation_id, CheckoutService};
pub use client::{PriceIds, StripeClient, StripeConfig};
pub use error::{BillingError, BillingResult};
pub use events::{PaymentEvent, PaymentEventKind};
pub use gateway::{CheckoutResponse, PaymentGateway, StripeGateway};
pub use idempotency::{
    FileEventStore, IdempotencyGuard, ProcessedEventStore, RecordEventStore,
    DEFAULT_PROCESSED_EVENTS_TABLE,
};
pub use ledger::{CreditLedger, PurchaseOutcome, Settlement, SpendQuote};
pub use locks::UserLocks;
pub use plans::{PlanCatalog, PlanSpec, FREE_SIGNUP_CREDITS};
pub use webhooks::{SessionMirror, WebhookHandler, WebhookOutcome};

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub catalog: Arc<PlanCatalog>,
    pub ledger: CreditLedger,
    pub checkout: CheckoutService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service talking to Stripe
    ///
    /// `ledger` must be the same instance the rest of the process spends
    /// credits through, so that all balance changes share one lock registry.
    pub fn new(
        config: StripeConfig,
        ledger: CreditLedger,
        store: Arc<dyn RecordStore>,
        processed_events_table: &str,
    ) -> Self {
        let stripe = StripeClient::new(config.clone());
        Self::with_gateway(
            config,
            Arc::new(StripeGateway::new(stripe)),
            ledger,
            store,
            processed_events_table,
        )
    }

    /// Create a billing service over an explicit gateway
    pub fn with_gateway(
        config: StripeConfig,
        gateway: Arc<dyn PaymentGateway>,
        ledger: CreditLedger,
        store: Arc<dyn RecordStore>,
        processed_events_table: &str,
    ) -> Self {
        let catalog = Arc::new(PlanCatalog::from_config(&config));
        let idempotency = IdempotencyGuard::new(
            Arc::new(RecordEventStore::new(store, processed_events_table)),
            Arc::new(FileEventStore::new(config.processed_events_file.clone())),
        );

        Self {
            checkout: CheckoutService::new(
                gateway.clone(),
                ledger.clone(),
                catalog.clone(),
                config.app_base_url.clone(),
            ),
            webhooks: WebhookHandler::new(
                config.webhook_secret.clone(),
                ledger.clone(),
                catalog.clone(),
                gateway,
                idempotency,
            ),
            catalog,
            ledger,
        }
    }

    /// Mirror reconciled account changes into live sessions
    pub fn with_session_mirror(mut self, mirror: Arc<dyn SessionMirror>) -> Self {
        self.webhooks = self.webhooks.with_mirror(mirror);
        self
    }
}
