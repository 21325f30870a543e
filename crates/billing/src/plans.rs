//! Plan catalog
//!
//! Each paid plan maps one Stripe price to a credit grant. The free plan
//! grants nothing on its own; new accounts get a one-off signup allowance.

use blogify_shared::PlanName;
use serde::Serialize;

use crate::client::StripeConfig;
use crate::error::{BillingError, BillingResult};

/// Credits granted once when an account is created
pub const FREE_SIGNUP_CREDITS: i64 = 3;

/// Credits granted per paid subscription purchase
pub const MEDIUM_PLAN_CREDITS: i64 = 30;
pub const PREMIUM_PLAN_CREDITS: i64 = 100;

/// One purchasable (or default) plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSpec {
    pub name: PlanName,
    pub credits: i64,
    /// Monthly price in euro cents, for display
    pub price_cents: i64,
    #[serde(skip_serializing)]
    pub price_id: Option<String>,
}

/// Catalog of the plans on offer
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<PlanSpec>,
}

impl PlanCatalog {
    /// Build the catalog from explicit medium/premium price ids
    pub fn new(medium_price_id: impl Into<String>, premium_price_id: impl Into<String>) -> Self {
        Self {
            plans: vec![
                PlanSpec {
                    name: PlanName::Free,
                    credits: 0,
                    price_cents: 0,
                    price_id: None,
                },
                PlanSpec {
                    name: PlanName::Medium,
                    credits: MEDIUM_PLAN_CREDITS,
                    price_cents: 990,
                    price_id: Some(medium_price_id.into()),
                },
                PlanSpec {
                    name: PlanName::Premium,
                    credits: PREMIUM_PLAN_CREDITS,
                    price_cents: 2490,
                    price_id: Some(premium_price_id.into()),
                },
            ],
        }
    }

    pub fn from_config(config: &StripeConfig) -> Self {
        Self::new(
            config.price_ids.medium.clone(),
            config.price_ids.premium.clone(),
        )
    }

    pub fn plans(&self) -> &[PlanSpec] {
        &self.plans
    }

    pub fn get(&self, name: PlanName) -> Option<&PlanSpec> {
        self.plans.iter().find(|p| p.name == name)
    }

    /// Look up a plan that can be bought through checkout
    pub fn purchasable(&self, name: &str) -> BillingResult<&PlanSpec> {
        let name: PlanName = name
            .parse()
            .map_err(|_| BillingError::InvalidPlan(name.trim().to_string()))?;
        self.get(name)
            .filter(|p| p.price_id.is_some())
            .ok_or_else(|| BillingError::InvalidPlan(name.to_string()))
    }

    /// Reverse lookup by Stripe price
    pub fn by_price_id(&self, price_id: &str) -> Option<&PlanSpec> {
        self.plans
            .iter()
            .find(|p| p.price_id.as_deref() == Some(price_id))
    }
}
