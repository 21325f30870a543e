//! Payment provider events
//!
//! Decodes only the parts of a Stripe event the reconciler acts on, so the
//! handler keeps working across Stripe API versions. Recognized types:
//!
//! - `checkout.session.completed`
//! - `invoice.payment_succeeded`
//! - `customer.subscription.deleted`
//!
//! Everything else decodes to [`PaymentEventKind::Unrecognized`].

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{BillingError, BillingResult};

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const INVOICE_PAYMENT_SUCCEEDED: &str = "invoice.payment_succeeded";
pub const CUSTOMER_SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

/// `billing_reason` of the invoice paid together with a new subscription
pub const BILLING_REASON_SUBSCRIPTION_CREATE: &str = "subscription_create";

/// Metadata keys written at checkout and read back by the reconciler
pub const METADATA_USER_ID: &str = "user_id";
pub const METADATA_PLAN: &str = "plan";

/// A verified event envelope
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

/// Event payload, keyed by event type
#[derive(Debug, Clone)]
pub enum PaymentEventKind {
    CheckoutSessionCompleted(CheckoutSessionObject),
    InvoicePaymentSucceeded(InvoiceObject),
    SubscriptionDeleted(SubscriptionObject),
    Unrecognized,
}

impl PaymentEvent {
    /// Decode an event envelope from a raw payload
    pub fn from_payload(payload: &str) -> BillingResult<Self> {
        serde_json::from_str(payload).map_err(|e| BillingError::WebhookPayload(e.to_string()))
    }

    /// Decode the event object for the event's type
    pub fn kind(&self) -> BillingResult<PaymentEventKind> {
        let object = self.data.object.clone();
        let kind = match self.event_type.as_str() {
            CHECKOUT_SESSION_COMPLETED => {
                PaymentEventKind::CheckoutSessionCompleted(decode(object, &self.id)?)
            }
            INVOICE_PAYMENT_SUCCEEDED => {
                PaymentEventKind::InvoicePaymentSucceeded(decode(object, &self.id)?)
            }
            CUSTOMER_SUBSCRIPTION_DELETED => {
                PaymentEventKind::SubscriptionDeleted(decode(object, &self.id)?)
            }
            _ => PaymentEventKind::Unrecognized,
        };
        Ok(kind)
    }
}

fn decode<T: serde::de::DeserializeOwned>(object: Value, event_id: &str) -> BillingResult<T> {
    serde_json::from_value(object)
        .map_err(|e| BillingError::WebhookPayload(format!("event {}: {}", event_id, e)))
}

/// A reference that Stripe sends either as a bare id or as an expanded object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExpandableId {
    Id(String),
    Object { id: String },
}

impl ExpandableId {
    pub fn id(&self) -> &str {
        match self {
            ExpandableId::Id(id) | ExpandableId::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub customer: Option<ExpandableId>,
    pub subscription: Option<ExpandableId>,
    pub customer_email: Option<String>,
    pub customer_details: Option<CustomerDetails>,
    pub metadata: Option<HashMap<String, String>>,
}

impl CheckoutSessionObject {
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn customer_id(&self) -> Option<&str> {
        self.customer.as_ref().map(ExpandableId::id)
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription.as_ref().map(ExpandableId::id)
    }

    /// Email the payer entered, if any
    pub fn email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.as_deref())
            .or(self.customer_email.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceLine {
    pub price: Option<PriceRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceLines {
    #[serde(default)]
    pub data: Vec<InvoiceLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionDetails {
    pub subscription: Option<ExpandableId>,
}

/// Newer API versions move the subscription under `parent`
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceParent {
    pub subscription_details: Option<SubscriptionDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    pub customer: Option<ExpandableId>,
    pub subscription: Option<ExpandableId>,
    pub parent: Option<InvoiceParent>,
    pub billing_reason: Option<String>,
    pub lines: Option<InvoiceLines>,
}

impl InvoiceObject {
    pub fn customer_id(&self) -> Option<&str> {
        self.customer.as_ref().map(ExpandableId::id)
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription
            .as_ref()
            .or_else(|| {
                self.parent
                    .as_ref()
                    .and_then(|p| p.subscription_details.as_ref())
                    .and_then(|d| d.subscription.as_ref())
            })
            .map(ExpandableId::id)
    }

    pub fn is_subscription_create(&self) -> bool {
        self.billing_reason.as_deref() == Some(BILLING_REASON_SUBSCRIPTION_CREATE)
    }

    /// Price of the first invoice line
    pub fn line_price_id(&self) -> Option<&str> {
        self.lines
            .as_ref()
            .and_then(|l| l.data.iter().find_map(|line| line.price.as_ref()))
            .map(|p| p.id.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: Option<ExpandableId>,
    pub metadata: Option<HashMap<String, String>>,
}
