//! In-memory payment gateway for tests and local development

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    CheckoutRequest, CheckoutResponse, CheckoutSessionDetails, PaymentGateway,
    SubscriptionDetails,
};

#[derive(Debug, Default)]
struct FakeState {
    sessions: HashMap<String, CheckoutSessionDetails>,
    subscriptions: HashMap<String, SubscriptionDetails>,
    checkouts: Vec<CheckoutRequest>,
    canceled: Vec<String>,
    scheduled_cancellations: Vec<String>,
    fail_cancellations: bool,
    unavailable: bool,
}

/// Records every call and answers from canned sessions and subscriptions
#[derive(Debug, Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_session(&self, session: CheckoutSessionDetails) {
        self.state()
            .sessions
            .insert(session.session_id.clone(), session);
    }

    pub fn insert_subscription(&self, subscription: SubscriptionDetails) {
        self.state()
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    /// Make immediate cancellations fail
    pub fn set_fail_cancellations(&self, fail: bool) {
        self.state().fail_cancellations = fail;
    }

    /// Make every call fail as if Stripe were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.state().checkouts.clone()
    }

    pub fn canceled(&self) -> Vec<String> {
        self.state().canceled.clone()
    }

    pub fn scheduled_cancellations(&self) -> Vec<String> {
        self.state().scheduled_cancellations.clone()
    }

    fn check_available(&self) -> BillingResult<()> {
        if self.state().unavailable {
            return Err(BillingError::StripeApi("fake gateway unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<CheckoutResponse> {
        self.check_available()?;
        let mut state = self.state();
        let session_id = format!("cs_test_{:04}", state.checkouts.len() + 1);
        state.sessions.insert(
            session_id.clone(),
            CheckoutSessionDetails {
                session_id: session_id.clone(),
                metadata: request.metadata.clone(),
                customer_id: request.customer_id.clone(),
                customer_email: request.customer_email.clone(),
                ..Default::default()
            },
        );
        state.checkouts.push(request);
        Ok(CheckoutResponse {
            url: Some(format!("https://checkout.stripe.test/{}", session_id)),
            session_id,
        })
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> BillingResult<CheckoutSessionDetails> {
        self.check_available()?;
        self.state()
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("checkout session {}", session_id)))
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionDetails> {
        self.check_available()?;
        self.state()
            .subscriptions
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("subscription {}", subscription_id)))
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()> {
        self.check_available()?;
        let mut state = self.state();
        if state.fail_cancellations {
            return Err(BillingError::StripeApi("cancellation refused".to_string()));
        }
        state.canceled.push(subscription_id.to_string());
        Ok(())
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> BillingResult<()> {
        self.check_available()?;
        self.state()
            .scheduled_cancellations
            .push(subscription_id.to_string());
        Ok(())
    }
}
