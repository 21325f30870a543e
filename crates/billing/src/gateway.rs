//! Payment provider seam
//!
//! The reconciler and the checkout orchestrator talk to Stripe only through
//! [`PaymentGateway`], so they can run against a fake in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use stripe::{
    CancelSubscription, CheckoutSession, CheckoutSessionId, CheckoutSessionMode,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCheckoutSessionSubscriptionData,
    CustomerId, Expandable, Subscription, SubscriptionId, UpdateSubscription,
};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Parameters of a hosted subscription checkout
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub price_id: String,
    /// Existing Stripe customer to attach the subscription to
    pub customer_id: Option<String>,
    /// Prefilled email when there is no customer yet
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    /// Copied onto both the session and the subscription it creates
    pub metadata: HashMap<String, String>,
}

/// A created checkout session
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

impl From<CheckoutSession> for CheckoutResponse {
    fn from(session: CheckoutSession) -> Self {
        Self {
            session_id: session.id.to_string(),
            url: session.url,
        }
    }
}

/// What the orchestrator needs from a retrieved checkout session
#[derive(Debug, Clone, Default)]
pub struct CheckoutSessionDetails {
    pub session_id: String,
    pub metadata: HashMap<String, String>,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub subscription_id: Option<String>,
    /// Metadata of the expanded subscription, empty when not expanded
    pub subscription_metadata: HashMap<String, String>,
}

/// What the reconciler needs from a subscription
#[derive(Debug, Clone, Default)]
pub struct SubscriptionDetails {
    pub id: String,
    pub customer_id: Option<String>,
    /// Price of the first subscription item
    pub price_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<CheckoutResponse>;

    /// Retrieve a session with its subscription and customer expanded
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> BillingResult<CheckoutSessionDetails>;

    async fn retrieve_subscription(&self, subscription_id: &str)
        -> BillingResult<SubscriptionDetails>;

    /// Cancel immediately
    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()>;

    /// Let the current period run out, then cancel
    async fn cancel_at_period_end(&self, subscription_id: &str) -> BillingResult<()>;
}

/// [`PaymentGateway`] backed by the Stripe API
#[derive(Clone)]
pub struct StripeGateway {
    stripe: StripeClient,
}

impl StripeGateway {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }
}

fn parse_subscription_id(subscription_id: &str) -> BillingResult<SubscriptionId> {
    subscription_id
        .parse::<SubscriptionId>()
        .map_err(|e| BillingError::InvalidInput(format!("Invalid subscription ID: {}", e)))
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<CheckoutResponse> {
        let customer = request
            .customer_id
            .as_deref()
            .map(|id| id.parse::<CustomerId>())
            .transpose()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid customer ID: {}", e)))?;
        let customer_email = match customer {
            Some(_) => None,
            None => request.customer_email.as_deref(),
        };

        let params = CreateCheckoutSession {
            customer,
            customer_email,
            mode: Some(CheckoutSessionMode::Subscription),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(request.price_id.clone()),
                quantity: Some(1),
                ..Default::default()
            }]),
            success_url: Some(&request.success_url),
            cancel_url: Some(&request.cancel_url),
            metadata: Some(request.metadata.clone()),
            subscription_data: Some(CreateCheckoutSessionSubscriptionData {
                metadata: Some(request.metadata.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;
        Ok(session.into())
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> BillingResult<CheckoutSessionDetails> {
        let id = session_id
            .parse::<CheckoutSessionId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid session ID: {}", e)))?;

        let session =
            CheckoutSession::retrieve(self.stripe.inner(), &id, &["subscription", "customer"])
                .await?;

        let customer_id = session.customer.as_ref().map(|customer| match customer {
            Expandable::Id(id) => id.to_string(),
            Expandable::Object(customer) => customer.id.to_string(),
        });
        let (subscription_id, subscription_metadata) = match &session.subscription {
            Some(Expandable::Id(id)) => (Some(id.to_string()), HashMap::new()),
            Some(Expandable::Object(subscription)) => (
                Some(subscription.id.to_string()),
                subscription.metadata.clone(),
            ),
            None => (None, HashMap::new()),
        };
        let customer_email = session
            .customer_details
            .as_ref()
            .and_then(|d| d.email.clone())
            .or_else(|| session.customer_email.clone());

        Ok(CheckoutSessionDetails {
            session_id: session.id.to_string(),
            metadata: session.metadata.clone().unwrap_or_default(),
            customer_id,
            customer_email,
            subscription_id,
            subscription_metadata,
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionDetails> {
        let id = parse_subscription_id(subscription_id)?;
        let subscription = Subscription::retrieve(self.stripe.inner(), &id, &[]).await?;

        let customer_id = match &subscription.customer {
            Expandable::Id(id) => id.to_string(),
            Expandable::Object(customer) => customer.id.to_string(),
        };
        let price_id = subscription
            .items
            .data
            .iter()
            .find_map(|item| item.price.as_ref())
            .map(|price| price.id.to_string());

        Ok(SubscriptionDetails {
            id: subscription.id.to_string(),
            customer_id: Some(customer_id),
            price_id,
            metadata: subscription.metadata.clone(),
        })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()> {
        let id = parse_subscription_id(subscription_id)?;
        Subscription::cancel(self.stripe.inner(), &id, CancelSubscription::default()).await?;
        tracing::info!(subscription_id = %subscription_id, "Canceled subscription immediately");
        Ok(())
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> BillingResult<()> {
        let id = parse_subscription_id(subscription_id)?;
        let mut params = UpdateSubscription::new();
        params.cancel_at_period_end = Some(true);
        Subscription::update(self.stripe.inner(), &id, params).await?;
        tracing::info!(subscription_id = %subscription_id, "Scheduled cancellation at period end");
        Ok(())
    }
}
