//! Stripe client configuration

use std::path::PathBuf;

use blogify_shared::PlanName;
use stripe::Client;

use crate::error::{BillingError, BillingResult};

/// Default path of the local processed-events log
pub const DEFAULT_PROCESSED_EVENTS_FILE: &str = "processed_events.log";

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret
    pub webhook_secret: String,
    /// Price IDs for each paid plan
    pub price_ids: PriceIds,
    /// Base URL for success/cancel redirects
    pub app_base_url: String,
    /// Local fallback witness for processed webhook events
    pub processed_events_file: PathBuf,
}

/// Stripe price IDs for the paid plans (monthly)
#[derive(Debug, Clone)]
pub struct PriceIds {
    pub medium: String,
    pub premium: String,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            price_ids: PriceIds {
                medium: std::env::var("STRIPE_PRICE_MEDIUM")
                    .map_err(|_| BillingError::Config("STRIPE_PRICE_MEDIUM not set".to_string()))?,
                premium: std::env::var("STRIPE_PRICE_PREMIUM").map_err(|_| {
                    BillingError::Config("STRIPE_PRICE_PREMIUM not set".to_string())
                })?,
            },
            app_base_url: std::env::var("PUBLIC_URL")
                .or_else(|_| std::env::var("APP_BASE_URL"))
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            processed_events_file: std::env::var("PROCESSED_EVENTS_FILE")
                .unwrap_or_else(|_| DEFAULT_PROCESSED_EVENTS_FILE.to_string())
                .into(),
        })
    }

    /// Get price ID for a paid plan
    pub fn price_id_for_plan(&self, plan: PlanName) -> Option<&str> {
        match plan {
            PlanName::Medium => Some(&self.price_ids.medium),
            PlanName::Premium => Some(&self.price_ids.premium),
            PlanName::Free => None,
        }
    }

    /// Get plan from price ID
    pub fn plan_for_price_id(&self, price_id: &str) -> Option<PlanName> {
        if price_id == self.price_ids.medium {
            Some(PlanName::Medium)
        } else if price_id == self.price_ids.premium {
            Some(PlanName::Premium)
        } else {
            None
        }
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
