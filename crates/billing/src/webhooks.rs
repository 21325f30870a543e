//! Stripe webhook handling
//!
//! Verifies inbound events and reconciles them against the credit ledger.
//! Every verified event is acknowledged once it has been checked against the
//! processed-event witnesses and dispatched; dispatch failures are logged for
//! manual follow-up instead of being surfaced to Stripe.

use std::sync::Arc;

use blogify_shared::{Account, AccountRepository};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use crate::error::{BillingError, BillingResult};
use crate::events::{
    CheckoutSessionObject, InvoiceObject, PaymentEvent, PaymentEventKind, SubscriptionObject,
    METADATA_PLAN, METADATA_USER_ID,
};
use crate::gateway::{PaymentGateway, SubscriptionDetails};
use crate::idempotency::{IdempotencyGuard, InFlightEvents};
use crate::ledger::{CreditLedger, PurchaseOutcome};
use crate::plans::{PlanCatalog, PlanSpec};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age (either direction) of a signed webhook timestamp
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Receives account changes made by the reconciler, e.g. to refresh live sessions
pub trait SessionMirror: Send + Sync {
    /// Returns how many sessions were updated
    fn mirror_account(&self, account: &Account) -> usize;
}

/// Hex HMAC-SHA256 of `"<timestamp>.<payload>"` keyed by the endpoint secret
pub fn sign_payload(secret: &str, timestamp: i64, payload: &str) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| {
        error!("Invalid webhook secret key");
        BillingError::WebhookSignatureInvalid
    })?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a `Stripe-Signature` header value for a payload
pub fn signature_header(secret: &str, timestamp: i64, payload: &str) -> BillingResult<String> {
    Ok(format!(
        "t={},v1={}",
        timestamp,
        sign_payload(secret, timestamp, payload)?
    ))
}

/// Check a `Stripe-Signature` header (`t=<ts>,v1=<hex>[,v1=...]`) against a payload
pub fn verify_signature(payload: &str, header: &str, secret: &str, now: i64) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => signatures.push(value),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        warn!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;
    if signatures.is_empty() {
        warn!("Missing v1 signature in signature header");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        warn!(
            timestamp = timestamp,
            now = now,
            diff = (now - timestamp).abs(),
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let expected = sign_payload(secret, timestamp, payload)?;
    let matched = signatures
        .iter()
        .any(|candidate| bool::from(candidate.as_bytes().ct_eq(expected.as_bytes())));
    if !matched {
        warn!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }
    Ok(())
}

/// How a verified event was handled. All variants are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    /// Dispatch failed; the event was logged and still marked processed
    Failed,
    AlreadyProcessed,
    /// Another delivery of the same event is being applied right now
    InFlight,
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    webhook_secret: String,
    ledger: CreditLedger,
    catalog: Arc<PlanCatalog>,
    gateway: Arc<dyn PaymentGateway>,
    idempotency: IdempotencyGuard,
    in_flight: Arc<InFlightEvents>,
    mirror: Option<Arc<dyn SessionMirror>>,
}

impl WebhookHandler {
    pub fn new(
        webhook_secret: impl Into<String>,
        ledger: CreditLedger,
        catalog: Arc<PlanCatalog>,
        gateway: Arc<dyn PaymentGateway>,
        idempotency: IdempotencyGuard,
    ) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            ledger,
            catalog,
            gateway,
            idempotency,
            in_flight: Arc::new(InFlightEvents::new()),
            mirror: None,
        }
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn SessionMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    fn accounts(&self) -> &AccountRepository {
        self.ledger.accounts()
    }

    /// Verify and parse a Stripe webhook event
    ///
    /// Uses manual signature verification so that the handler does not depend
    /// on the event schema of a particular Stripe API version.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<PaymentEvent> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(payload, signature, &self.webhook_secret, now)?;
        PaymentEvent::from_payload(payload)
    }

    /// Handle a verified webhook event
    ///
    /// Never fails: the outcome tells the caller what happened, and the event
    /// is recorded as processed whether or not dispatch succeeded.
    pub async fn handle_event(&self, event: PaymentEvent) -> WebhookOutcome {
        let Some(_claim) = self.in_flight.claim(&event.id) else {
            info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Duplicate delivery while event is being applied, skipping"
            );
            return WebhookOutcome::InFlight;
        };

        if let Some(witness) = self.idempotency.processed_by(&event.id).await {
            info!(
                event_id = %event.id,
                event_type = %event.event_type,
                witness = ?witness,
                "Webhook event already processed, skipping"
            );
            return WebhookOutcome::AlreadyProcessed;
        }

        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Processing Stripe webhook event"
        );

        let outcome = match self.process_event_internal(&event).await {
            Ok(()) => WebhookOutcome::Applied,
            Err(e) => {
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "RECONCILIATION NEEDED: webhook dispatch failed"
                );
                WebhookOutcome::Failed
            }
        };

        if let Err(e) = self.idempotency.mark(&event.id, &event.event_type).await {
            error!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "RECONCILIATION NEEDED: could not record processed event in any witness"
            );
        }

        outcome
    }

    async fn process_event_internal(&self, event: &PaymentEvent) -> BillingResult<()> {
        match event.kind()? {
            PaymentEventKind::CheckoutSessionCompleted(session) => {
                self.handle_checkout_completed(session).await
            }
            PaymentEventKind::InvoicePaymentSucceeded(invoice) => {
                self.handle_invoice_paid(invoice).await
            }
            PaymentEventKind::SubscriptionDeleted(subscription) => {
                self.handle_subscription_deleted(subscription).await
            }
            PaymentEventKind::Unrecognized => {
                info!(event_type = %event.event_type, "Unhandled webhook event type");
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(&self, session: CheckoutSessionObject) -> BillingResult<()> {
        let mut user_ref = session.metadata_value(METADATA_USER_ID).map(str::to_string);
        let mut plan_ref = session.metadata_value(METADATA_PLAN).map(str::to_string);

        // Sessions created elsewhere may carry the references on the subscription only
        let mut subscription: Option<SubscriptionDetails> = None;
        if user_ref.is_none() || plan_ref.is_none() {
            if let Some(subscription_id) = session.subscription_id() {
                let details = self.gateway.retrieve_subscription(subscription_id).await?;
                user_ref = user_ref.or_else(|| non_empty(details.metadata.get(METADATA_USER_ID)));
                plan_ref = plan_ref.or_else(|| non_empty(details.metadata.get(METADATA_PLAN)));
                subscription = Some(details);
            }
        }

        let identifier = user_ref
            .or_else(|| session.email().map(str::to_string))
            .ok_or_else(|| {
                BillingError::NotFound(format!("no user reference on checkout session {}", session.id))
            })?;
        let account = self
            .accounts()
            .resolve(&identifier)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("account {}", identifier)))?;

        let plan = self.plan_for_checkout(plan_ref.as_deref(), subscription.as_ref())?;

        let outcome = self
            .ledger
            .apply_subscription_purchase(
                &account.id,
                plan.name,
                plan.credits,
                session.customer_id(),
                session.subscription_id(),
            )
            .await?;

        if let PurchaseOutcome::Applied(account) = &outcome {
            info!(
                account_id = %account.id,
                checkout_session_id = %session.id,
                plan = %plan.name,
                credits = plan.credits,
                "Checkout completed, subscription credits granted"
            );
        }
        self.mirror(outcome.account());
        Ok(())
    }

    fn plan_for_checkout(
        &self,
        plan_ref: Option<&str>,
        subscription: Option<&SubscriptionDetails>,
    ) -> BillingResult<&PlanSpec> {
        if let Some(plan) = plan_ref {
            return self.catalog.purchasable(plan);
        }
        subscription
            .and_then(|s| s.price_id.as_deref())
            .and_then(|price_id| self.catalog.by_price_id(price_id))
            .ok_or_else(|| BillingError::InvalidPlan("checkout session names no plan".to_string()))
    }

    async fn handle_invoice_paid(&self, invoice: InvoiceObject) -> BillingResult<()> {
        if invoice.is_subscription_create() {
            debug!(
                invoice_id = %invoice.id,
                "First invoice of a new subscription, credits come from checkout completion"
            );
            return Ok(());
        }

        let subscription = match invoice.subscription_id() {
            Some(subscription_id) => match self.gateway.retrieve_subscription(subscription_id).await
            {
                Ok(details) => Some(details),
                Err(e) => {
                    warn!(
                        invoice_id = %invoice.id,
                        subscription_id = %subscription_id,
                        error = %e,
                        "Could not retrieve subscription, using invoice line price"
                    );
                    None
                }
            },
            None => None,
        };

        let price_id = subscription
            .as_ref()
            .and_then(|s| s.price_id.as_deref())
            .or_else(|| invoice.line_price_id())
            .ok_or_else(|| {
                BillingError::InvalidPlan(format!("no price on invoice {}", invoice.id))
            })?;
        let plan = self.catalog.by_price_id(price_id).ok_or_else(|| {
            BillingError::InvalidPlan(format!("price {} is not in the catalog", price_id))
        })?;

        let customer_id = invoice
            .customer_id()
            .map(str::to_string)
            .or_else(|| subscription.as_ref().and_then(|s| s.customer_id.clone()))
            .ok_or_else(|| BillingError::NotFound(format!("customer of invoice {}", invoice.id)))?;
        let account = self
            .accounts()
            .find_by_customer_id(&customer_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("account for customer {}", customer_id)))?;

        let balance = self.ledger.grant(&account.id, plan.credits).await?;
        info!(
            account_id = %account.id,
            invoice_id = %invoice.id,
            plan = %plan.name,
            credits = plan.credits,
            balance,
            "Renewal invoice paid, credits granted"
        );

        match self.accounts().get(&account.id).await {
            Ok(account) => self.mirror(&account),
            Err(e) => warn!(account_id = %account.id, error = %e, "Could not reload account for session mirroring"),
        }
        Ok(())
    }

    async fn handle_subscription_deleted(&self, subscription: SubscriptionObject) -> BillingResult<()> {
        let account = self
            .accounts()
            .find_by_subscription_id(&subscription.id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!("account for subscription {}", subscription.id))
            })?;

        let account = self.ledger.end_subscription(&account.id).await?;
        info!(
            account_id = %account.id,
            subscription_id = %subscription.id,
            "Subscription deleted, account moved to free plan"
        );
        self.mirror(&account);
        Ok(())
    }

    fn mirror(&self, account: &Account) {
        if let Some(mirror) = &self.mirror {
            let sessions = mirror.mirror_account(account);
            debug!(account_id = %account.id, sessions, "Mirrored account into live sessions");
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const PAYLOAD: &str = r#"{"id":"evt_1","type":"ping","data":{"object":{}}}"#;

    #[test]
    fn test_valid_signature_accepted() {
        let header = signature_header(SECRET, 1_700_000_000, PAYLOAD).unwrap();
        assert!(verify_signature(PAYLOAD, &header, SECRET, 1_700_000_100).is_ok());
    }

    #[test]
    fn test_any_v1_may_match() {
        let good = sign_payload(SECRET, 1_700_000_000, PAYLOAD).unwrap();
        let header = format!("t=1700000000,v1={},v1={}", "00".repeat(32), good);
        assert!(verify_signature(PAYLOAD, &header, SECRET, 1_700_000_000).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let header = signature_header(SECRET, 1_700_000_000, PAYLOAD).unwrap();
        let tampered = PAYLOAD.replace("evt_1", "evt_2");
        assert!(matches!(
            verify_signature(&tampered, &header, SECRET, 1_700_000_000),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let header = signature_header("whsec_other", 1_700_000_000, PAYLOAD).unwrap();
        assert!(verify_signature(PAYLOAD, &header, SECRET, 1_700_000_000).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let header = signature_header(SECRET, 1_700_000_000, PAYLOAD).unwrap();
        assert!(verify_signature(PAYLOAD, &header, SECRET, 1_700_000_301).is_err());
        assert!(verify_signature(PAYLOAD, &header, SECRET, 1_699_999_699).is_err());
    }

    #[test]
    fn test_malformed_headers_rejected() {
        for header in ["", "v1=abc", "t=1700000000", "t=abc,v1=abc", "garbage"] {
            assert!(
                verify_signature(PAYLOAD, header, SECRET, 1_700_000_000).is_err(),
                "header {:?} should be rejected",
                header
            );
        }
    }
}
