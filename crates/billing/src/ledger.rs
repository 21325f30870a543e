//! Credit ledger
//!
//! The only component allowed to move an account's credit balance. All
//! balance changes run under the account's lock and are written with a
//! conditional update on the balance that was read, so a writer outside this
//! process can at worst force a retry, never a lost update.

use std::sync::Arc;

use blogify_shared::{Account, AccountId, AccountRepository, AccountStatus, AccountUpdate, PlanName};
use tracing::{debug, info, warn};

use crate::error::{BillingError, BillingResult};
use crate::locks::UserLocks;

/// Cost of generating one article
pub const ARTICLE_COST: i64 = 1;

/// Extra cost of illustrating an article
pub const IMAGE_ADDON_COST: i64 = 2;

/// Conditional writes attempted before giving up on a contended balance
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Warning surfaced when the illustration is dropped for lack of credits
pub const IMAGE_DROPPED_WARNING: &str =
    "Not enough credits for an illustration: the article was generated without an image.";

/// Warning surfaced when the balance fell below the cost during generation
pub const SETTLEMENT_SKIPPED_WARNING: &str =
    "Your balance changed during generation and was too low to be charged for this article.";

/// What an article generation will cost, decided before any paid work runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendQuote {
    pub cost: i64,
    pub with_image: bool,
    /// Balance observed when the quote was made
    pub balance: i64,
    pub warning: Option<String>,
}

/// Price an article generation against a balance.
///
/// Drops the illustration rather than refusing when only the base cost is
/// covered; refuses when even the base cost is not.
pub fn quote_article(balance: i64, want_image: bool) -> BillingResult<SpendQuote> {
    if balance < ARTICLE_COST {
        return Err(BillingError::InsufficientCredits {
            balance,
            required: ARTICLE_COST,
        });
    }

    let full_cost = ARTICLE_COST + IMAGE_ADDON_COST;
    if want_image && balance < full_cost {
        return Ok(SpendQuote {
            cost: ARTICLE_COST,
            with_image: false,
            balance,
            warning: Some(IMAGE_DROPPED_WARNING.to_string()),
        });
    }

    Ok(SpendQuote {
        cost: if want_image { full_cost } else { ARTICLE_COST },
        with_image: want_image,
        balance,
        warning: None,
    })
}

/// Outcome of charging for work that was already delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Charged { balance: i64 },
    /// Balance no longer covered the cost; nothing was deducted
    Skipped { balance: i64 },
}

/// Outcome of applying a subscription purchase
#[derive(Debug, Clone)]
pub enum PurchaseOutcome {
    Applied(Account),
    /// This subscription was already credited
    AlreadyApplied(Account),
}

impl PurchaseOutcome {
    pub fn account(&self) -> &Account {
        match self {
            PurchaseOutcome::Applied(account) | PurchaseOutcome::AlreadyApplied(account) => account,
        }
    }
}

/// Credit ledger over the users table
#[derive(Clone)]
pub struct CreditLedger {
    accounts: AccountRepository,
    locks: Arc<UserLocks>,
}

impl CreditLedger {
    pub fn new(accounts: AccountRepository, locks: Arc<UserLocks>) -> Self {
        Self { accounts, locks }
    }

    pub fn accounts(&self) -> &AccountRepository {
        &self.accounts
    }

    pub fn locks(&self) -> &Arc<UserLocks> {
        &self.locks
    }

    /// Current balance; `NotFound` when the account does not exist
    pub async fn get_balance(&self, account_id: &AccountId) -> BillingResult<i64> {
        Ok(self.accounts.get(account_id).await?.credits)
    }

    /// Spend `amount` credits, refusing if the balance does not cover it
    pub async fn try_consume(&self, account_id: &AccountId, amount: i64) -> BillingResult<i64> {
        if amount <= 0 {
            return Err(BillingError::InvalidInput(format!(
                "consume amount must be positive, got {}",
                amount
            )));
        }

        let _guard = self.locks.acquire(account_id).await;
        let (_, balance) = self
            .write_credits(account_id, |account| {
                if account.credits < amount {
                    return Err(BillingError::InsufficientCredits {
                        balance: account.credits,
                        required: amount,
                    });
                }
                Ok(Some((account.credits - amount, AccountUpdate::new())))
            })
            .await?;
        let balance = balance.unwrap_or_default();

        debug!(account_id = %account_id, amount, balance, "Credits consumed");
        Ok(balance)
    }

    /// Add `amount` credits
    pub async fn grant(&self, account_id: &AccountId, amount: i64) -> BillingResult<i64> {
        if amount < 0 {
            return Err(BillingError::InvalidInput(format!(
                "grant amount must not be negative, got {}",
                amount
            )));
        }

        let _guard = self.locks.acquire(account_id).await;
        let (before, balance) = self
            .write_credits(account_id, |account| {
                Ok(Some((account.credits + amount, AccountUpdate::new())))
            })
            .await?;
        let balance = balance.unwrap_or(before.credits);

        info!(account_id = %account_id, amount, balance, "Credits granted");
        Ok(balance)
    }

    /// Change plan and status without touching credits
    pub async fn set_plan(
        &self,
        account_id: &AccountId,
        plan: PlanName,
        status: AccountStatus,
    ) -> BillingResult<Account> {
        let _guard = self.locks.acquire(account_id).await;
        let account = self
            .accounts
            .update(account_id, AccountUpdate::new().plan(plan).status(status))
            .await?;

        info!(account_id = %account_id, plan = %plan, status = %status, "Plan updated");
        Ok(account)
    }

    /// Price an article generation against the current balance
    pub async fn quote_article(
        &self,
        account_id: &AccountId,
        want_image: bool,
    ) -> BillingResult<SpendQuote> {
        let _guard = self.locks.acquire(account_id).await;
        let balance = self.accounts.get(account_id).await?.credits;
        quote_article(balance, want_image)
    }

    /// Charge for work that has already been delivered.
    ///
    /// Re-checks the balance under the lock. If it no longer covers `amount`
    /// the charge is skipped rather than driving the balance negative.
    pub async fn settle(&self, account_id: &AccountId, amount: i64) -> BillingResult<Settlement> {
        match self.try_consume(account_id, amount).await {
            Ok(balance) => Ok(Settlement::Charged { balance }),
            Err(BillingError::InsufficientCredits { balance, required }) => {
                warn!(
                    account_id = %account_id,
                    balance,
                    required,
                    "Balance too low at settlement, charge skipped"
                );
                Ok(Settlement::Skipped { balance })
            }
            Err(e) => Err(e),
        }
    }

    /// Grant a subscription's credits and switch the account to the paid plan.
    ///
    /// A purchase for the subscription that was last credited is reported as
    /// already applied and grants nothing. Ids backfilled by the checkout
    /// return path do not count as credited.
    pub async fn apply_subscription_purchase(
        &self,
        account_id: &AccountId,
        plan: PlanName,
        credits: i64,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
    ) -> BillingResult<PurchaseOutcome> {
        let _guard = self.locks.acquire(account_id).await;
        let (before, balance) = self
            .write_credits(account_id, |account| {
                if subscription_id.is_some()
                    && account.credited_subscription_id.as_deref() == subscription_id
                {
                    return Ok(None);
                }

                let mut update = AccountUpdate::new().plan(plan).status(AccountStatus::Paying);
                if let Some(customer_id) = customer_id {
                    update = update.stripe_customer_id(customer_id);
                }
                if let Some(subscription_id) = subscription_id {
                    update = update
                        .stripe_subscription_id(subscription_id)
                        .credited_subscription_id(subscription_id);
                }
                Ok(Some((account.credits + credits, update)))
            })
            .await?;

        match balance {
            None => {
                info!(
                    account_id = %account_id,
                    subscription_id = ?subscription_id,
                    "Subscription already applied, no credits granted"
                );
                Ok(PurchaseOutcome::AlreadyApplied(before))
            }
            Some(balance) => {
                info!(
                    account_id = %account_id,
                    plan = %plan,
                    credits,
                    balance,
                    "Subscription purchase applied"
                );
                Ok(PurchaseOutcome::Applied(self.accounts.get(account_id).await?))
            }
        }
    }

    /// Mark the subscription ended: free plan, cancelled status, credits kept
    pub async fn end_subscription(&self, account_id: &AccountId) -> BillingResult<Account> {
        self.set_plan(account_id, PlanName::Free, AccountStatus::Cancelled)
            .await
    }

    /// Store provider ids the account is missing. Existing ids are kept.
    pub async fn link_provider_ids(
        &self,
        account_id: &AccountId,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
    ) -> BillingResult<Account> {
        let _guard = self.locks.acquire(account_id).await;
        let account = self.accounts.get(account_id).await?;

        let mut update = AccountUpdate::new();
        if let (None, Some(customer_id)) = (&account.stripe_customer_id, customer_id) {
            update = update.stripe_customer_id(customer_id);
        }
        if let (None, Some(subscription_id)) = (&account.stripe_subscription_id, subscription_id) {
            update = update.stripe_subscription_id(subscription_id);
        }
        if update.is_empty() {
            return Ok(account);
        }

        let account = self.accounts.update(account_id, update).await?;
        info!(account_id = %account_id, "Backfilled payment provider ids");
        Ok(account)
    }

    /// Read-compute-write loop for a balance change. Caller holds the lock.
    ///
    /// `compute` returns the new balance and any other fields to write, or
    /// `None` to leave the account untouched. Returns the account as read and
    /// the balance written.
    async fn write_credits<F>(
        &self,
        account_id: &AccountId,
        mut compute: F,
    ) -> BillingResult<(Account, Option<i64>)>
    where
        F: FnMut(&Account) -> BillingResult<Option<(i64, AccountUpdate)>>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let account = self.accounts.get(account_id).await?;
            let Some((balance, update)) = compute(&account)? else {
                return Ok((account, None));
            };
            if balance < 0 {
                return Err(BillingError::Internal(format!(
                    "refusing to write negative balance {} for {}",
                    balance, account_id
                )));
            }

            if self
                .accounts
                .update_if_credits(account_id, account.credits, update.credits(balance))
                .await?
            {
                return Ok((account, Some(balance)));
            }
            warn!(
                account_id = %account_id,
                attempt,
                "Balance changed by another writer, retrying"
            );
        }

        Err(BillingError::ConcurrentModification(format!(
            "balance of {} kept changing",
            account_id
        )))
    }
}
