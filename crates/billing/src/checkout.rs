//! Stripe Checkout sessions and the upgrade flow
//!
//! Starting a checkout and handling the browser's return never move credits;
//! only the webhook reconciler does.

use std::collections::HashMap;
use std::sync::Arc;

use blogify_shared::{Account, AccountRepository};
use tracing::{info, warn};

use crate::error::{BillingError, BillingResult};
use crate::events::{METADATA_PLAN, METADATA_USER_ID};
use crate::gateway::{CheckoutRequest, CheckoutResponse, CheckoutSessionDetails, PaymentGateway};
use crate::ledger::CreditLedger;
use crate::plans::PlanCatalog;

/// Characters of a session id shown to users when the return cannot be linked
pub const CORRELATION_ID_LEN: usize = 8;

/// Short, user-visible reference to a checkout session
pub fn correlation_id(session_id: &str) -> String {
    session_id.chars().take(CORRELATION_ID_LEN).collect()
}

/// Checkout service for creating Stripe checkout sessions
pub struct CheckoutService {
    gateway: Arc<dyn PaymentGateway>,
    ledger: CreditLedger,
    catalog: Arc<PlanCatalog>,
    app_base_url: String,
}

impl CheckoutService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        ledger: CreditLedger,
        catalog: Arc<PlanCatalog>,
        app_base_url: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            ledger,
            catalog,
            app_base_url: app_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn accounts(&self) -> &AccountRepository {
        self.ledger.accounts()
    }

    /// Start a hosted subscription checkout for `plan`.
    ///
    /// An existing subscription is canceled first, best effort.
    pub async fn start_checkout(
        &self,
        account: &Account,
        plan: &str,
    ) -> BillingResult<CheckoutResponse> {
        let plan = self.catalog.purchasable(plan)?;
        let price_id = plan
            .price_id
            .clone()
            .ok_or_else(|| BillingError::InvalidPlan(plan.name.to_string()))?;

        if let Some(subscription_id) = &account.stripe_subscription_id {
            if let Err(e) = self.gateway.cancel_subscription(subscription_id).await {
                warn!(
                    account_id = %account.id,
                    subscription_id = %subscription_id,
                    error = %e,
                    "Could not cancel previous subscription before checkout"
                );
            }
        }

        let mut metadata = HashMap::new();
        metadata.insert(METADATA_USER_ID.to_string(), account.id.to_string());
        metadata.insert(METADATA_PLAN.to_string(), plan.name.to_string());

        let request = CheckoutRequest {
            price_id,
            customer_id: account.stripe_customer_id.clone(),
            customer_email: Some(account.email.clone()),
            success_url: format!(
                "{}/upgrade/success?session_id={{CHECKOUT_SESSION_ID}}",
                self.app_base_url
            ),
            cancel_url: format!("{}/account?checkout=cancelled", self.app_base_url),
            metadata,
        };

        let response = self.gateway.create_checkout_session(request).await?;
        info!(
            account_id = %account.id,
            session_id = %response.session_id,
            plan = %plan.name,
            "Created checkout session"
        );
        Ok(response)
    }

    /// Reflect a completed checkout on the account when the browser returns.
    ///
    /// Backfills missing Stripe ids and returns the current account. Any
    /// failure is reported as [`BillingError::CheckoutUnresolved`] carrying a
    /// short correlation id.
    pub async fn finalize_checkout_return(&self, session_id: &str) -> BillingResult<Account> {
        let unresolved = |reason: String| BillingError::CheckoutUnresolved {
            correlation_id: correlation_id(session_id),
            reason,
        };

        let session = self
            .gateway
            .retrieve_checkout_session(session_id)
            .await
            .map_err(|e| unresolved(e.to_string()))?;

        let account = self
            .resolve_session_account(&session)
            .await
            .map_err(|e| unresolved(e.to_string()))?
            .ok_or_else(|| unresolved("no account matches the session".to_string()))?;

        let account = self
            .ledger
            .link_provider_ids(
                &account.id,
                session.customer_id.as_deref(),
                session.subscription_id.as_deref(),
            )
            .await
            .map_err(|e| unresolved(e.to_string()))?;

        info!(
            account_id = %account.id,
            session_id = %session.session_id,
            "Checkout return linked to account"
        );
        Ok(account)
    }

    async fn resolve_session_account(
        &self,
        session: &CheckoutSessionDetails,
    ) -> BillingResult<Option<Account>> {
        let from_metadata = |key: &str| {
            session
                .metadata
                .get(key)
                .or_else(|| session.subscription_metadata.get(key))
                .filter(|v| !v.trim().is_empty())
                .cloned()
        };

        let identifier = from_metadata(METADATA_USER_ID).or_else(|| session.customer_email.clone());
        match identifier {
            Some(identifier) => Ok(self.accounts().resolve(&identifier).await?),
            None => Ok(None),
        }
    }

    /// Schedule the account's subscription to end with the current period
    pub async fn cancel_at_period_end(&self, account: &Account) -> BillingResult<()> {
        let subscription_id = account
            .stripe_subscription_id
            .as_deref()
            .ok_or(BillingError::NoSubscription)?;

        self.gateway.cancel_at_period_end(subscription_id).await?;
        info!(
            account_id = %account.id,
            subscription_id = %subscription_id,
            "Subscription will cancel at period end"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_is_truncated() {
        assert_eq!(correlation_id("cs_test_a1B2c3D4e5"), "cs_test_");
        assert_eq!(correlation_id("cs_1"), "cs_1");
    }
}
