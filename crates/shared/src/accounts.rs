//! Typed access to the users table
//!
//! Translates between [`Account`] and raw records so that untyped field maps
//! never leave this module.

use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{StoreError, StoreResult};
use crate::store::{Fields, Formula, RecordStore};
use crate::types::{
    account_fields as f, looks_like_record_key, Account, AccountId, AccountStatus, PlanName,
};

/// Default name of the users table
pub const DEFAULT_USERS_TABLE: &str = "users";

/// Fields of a freshly signed-up account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password_hash: String,
    pub confirmation_code: String,
    pub credits: i64,
}

/// Builder for a partial account update
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    fields: Fields,
}

impl AccountUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credits(mut self, credits: i64) -> Self {
        self.fields.insert(f::CREDITS.into(), Value::from(credits));
        self
    }

    pub fn plan(mut self, plan: PlanName) -> Self {
        self.fields.insert(f::PLAN_NAME.into(), Value::from(plan.as_str()));
        self
    }

    pub fn status(mut self, status: AccountStatus) -> Self {
        self.fields.insert(f::STATUS.into(), Value::from(status.as_str()));
        self
    }

    pub fn stripe_customer_id(mut self, customer_id: impl Into<String>) -> Self {
        self.fields
            .insert(f::STRIPE_CUSTOMER_ID.into(), Value::from(customer_id.into()));
        self
    }

    pub fn stripe_subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.fields.insert(
            f::STRIPE_SUBSCRIPTION_ID.into(),
            Value::from(subscription_id.into()),
        );
        self
    }

    /// Record that `subscription_id`'s allotment has been granted
    pub fn credited_subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.fields.insert(
            f::CREDITED_SUBSCRIPTION_ID.into(),
            Value::from(subscription_id.into()),
        );
        self
    }

    /// Mark the account confirmed and burn its confirmation code
    pub fn confirmed(mut self) -> Self {
        self.fields.insert(f::IS_CONFIRMED.into(), Value::Bool(true));
        self.fields.insert(f::CONFIRMATION_CODE.into(), Value::Null);
        self.fields.insert(f::CONFIRMATION_ATTEMPTS.into(), Value::from(0));
        self
    }

    pub fn confirmation_attempts(mut self, attempts: i64) -> Self {
        self.fields
            .insert(f::CONFIRMATION_ATTEMPTS.into(), Value::from(attempts));
        self
    }

    /// Replace the confirmation code and reset its failed attempts
    pub fn confirmation_code(mut self, code: impl Into<String>) -> Self {
        self.fields
            .insert(f::CONFIRMATION_CODE.into(), Value::from(code.into()));
        self.fields.insert(f::CONFIRMATION_ATTEMPTS.into(), Value::from(0));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }
}

/// Repository over the users table
#[derive(Clone)]
pub struct AccountRepository {
    store: Arc<dyn RecordStore>,
    table: String,
}

impl AccountRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_table(store, DEFAULT_USERS_TABLE)
    }

    pub fn with_table(store: Arc<dyn RecordStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Load an account by key; `StoreError::NotFound` when absent
    pub async fn get(&self, id: &AccountId) -> StoreResult<Account> {
        let record = self.store.get(&self.table, id.as_str()).await?;
        Account::from_record(&record)
    }

    /// Case-insensitive lookup by email
    pub async fn find_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        self.find_one(Formula::eq_ignore_case(f::EMAIL, email.trim()))
            .await
    }

    pub async fn find_by_customer_id(&self, customer_id: &str) -> StoreResult<Option<Account>> {
        self.find_one(Formula::eq(f::STRIPE_CUSTOMER_ID, customer_id))
            .await
    }

    pub async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> StoreResult<Option<Account>> {
        self.find_one(Formula::eq(f::STRIPE_SUBSCRIPTION_ID, subscription_id))
            .await
    }

    /// Resolve an identifier that is either a record key or an email
    pub async fn resolve(&self, identifier: &str) -> StoreResult<Option<Account>> {
        let identifier = identifier.trim();
        if looks_like_record_key(identifier) {
            match self.get(&AccountId::from(identifier)).await {
                Ok(account) => Ok(Some(account)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            }
        } else {
            self.find_by_email(identifier).await
        }
    }

    /// Create an unconfirmed account on the free plan
    pub async fn create(&self, new: NewAccount) -> StoreResult<Account> {
        let now = OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        let mut fields = Fields::new();
        fields.insert(f::EMAIL.into(), Value::from(new.email.trim().to_lowercase()));
        fields.insert(f::PASSWORD_HASH.into(), Value::from(new.password_hash));
        fields.insert(f::IS_CONFIRMED.into(), Value::Bool(false));
        fields.insert(f::CONFIRMATION_CODE.into(), Value::from(new.confirmation_code));
        fields.insert(f::CONFIRMATION_ATTEMPTS.into(), Value::from(0));
        fields.insert(f::CREDITS.into(), Value::from(new.credits));
        fields.insert(f::PLAN_NAME.into(), Value::from(PlanName::Free.as_str()));
        fields.insert(f::STATUS.into(), Value::from(AccountStatus::Free.as_str()));
        fields.insert(f::CREATION_DATE.into(), Value::from(now));

        let record = self.store.create(&self.table, fields).await?;
        Account::from_record(&record)
    }

    /// Apply a partial update and return the new account state
    pub async fn update(&self, id: &AccountId, update: AccountUpdate) -> StoreResult<Account> {
        let record = self
            .store
            .update(&self.table, id.as_str(), update.into_fields())
            .await?;
        Account::from_record(&record)
    }

    /// Apply `update` only if the stored balance still equals `expected_credits`
    pub async fn update_if_credits(
        &self,
        id: &AccountId,
        expected_credits: i64,
        update: AccountUpdate,
    ) -> StoreResult<bool> {
        self.store
            .compare_and_update(
                &self.table,
                id.as_str(),
                f::CREDITS,
                &Value::from(expected_credits),
                update.into_fields(),
            )
            .await
    }

    /// Count one confirmation attempt if the counter still reads `seen`.
    ///
    /// Returns `Ok(false)` when a concurrent attempt got there first.
    pub async fn record_confirmation_attempt(&self, id: &AccountId, seen: i64) -> StoreResult<bool> {
        let next = || AccountUpdate::new().confirmation_attempts(seen + 1).into_fields();
        let counted = self
            .store
            .compare_and_update(
                &self.table,
                id.as_str(),
                f::CONFIRMATION_ATTEMPTS,
                &Value::from(seen),
                next(),
            )
            .await?;
        if counted || seen != 0 {
            return Ok(counted);
        }

        // Accounts created before the counter existed have no field at all
        self.store
            .compare_and_update(
                &self.table,
                id.as_str(),
                f::CONFIRMATION_ATTEMPTS,
                &Value::Null,
                next(),
            )
            .await
    }

    async fn find_one(&self, formula: Formula) -> StoreResult<Option<Account>> {
        match self.store.first(&self.table, &formula).await? {
            Some(record) => Ok(Some(Account::from_record(&record)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn repo() -> AccountRepository {
        AccountRepository::new(Arc::new(MemoryStore::new()))
    }

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            confirmation_code: "123456".to_string(),
            credits: 3,
        }
    }

    #[tokio::test]
    async fn test_create_normalizes_email() {
        let repo = repo();
        let account = repo.create(new_account("  Jane@Example.COM ")).await.unwrap();
        assert_eq!(account.email, "jane@example.com");
        assert_eq!(account.credits, 3);
        assert_eq!(account.plan_name, PlanName::Free);
        assert_eq!(account.status, AccountStatus::Free);
        assert!(!account.is_confirmed);
        assert!(account.creation_date.is_some());
    }

    #[tokio::test]
    async fn test_resolve_by_key_or_email() {
        let repo = repo();
        let account = repo.create(new_account("jane@example.com")).await.unwrap();

        let by_key = repo.resolve(account.id.as_str()).await.unwrap();
        assert_eq!(by_key.map(|a| a.id), Some(account.id.clone()));

        let by_email = repo.resolve("JANE@example.com").await.unwrap();
        assert_eq!(by_email.map(|a| a.id), Some(account.id.clone()));

        assert!(repo.resolve("recZZZZZZZZZZZZZZ").await.unwrap().is_none());
        assert!(repo.resolve("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirmed_clears_code() {
        let repo = repo();
        let account = repo.create(new_account("jane@example.com")).await.unwrap();
        let account = repo
            .update(&account.id, AccountUpdate::new().confirmed())
            .await
            .unwrap();
        assert!(account.is_confirmed);
        assert!(account.confirmation_code.is_none());
    }

    #[tokio::test]
    async fn test_lookup_by_stripe_ids() {
        let repo = repo();
        let account = repo.create(new_account("jane@example.com")).await.unwrap();
        repo.update(
            &account.id,
            AccountUpdate::new()
                .stripe_customer_id("cus_1")
                .stripe_subscription_id("sub_1"),
        )
        .await
        .unwrap();

        assert!(repo.find_by_customer_id("cus_1").await.unwrap().is_some());
        assert!(repo.find_by_subscription_id("sub_1").await.unwrap().is_some());
        assert!(repo.find_by_subscription_id("sub_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirmation_attempts_are_counted_once_per_read() {
        let repo = repo();
        let account = repo.create(new_account("jane@example.com")).await.unwrap();
        assert_eq!(account.confirmation_attempts, 0);

        assert!(repo.record_confirmation_attempt(&account.id, 0).await.unwrap());
        // A second writer that read the same counter loses
        assert!(!repo.record_confirmation_attempt(&account.id, 0).await.unwrap());
        assert_eq!(repo.get(&account.id).await.unwrap().confirmation_attempts, 1);

        let account = repo
            .update(&account.id, AccountUpdate::new().confirmation_code("654321"))
            .await
            .unwrap();
        assert_eq!(account.confirmation_attempts, 0);
        assert_eq!(account.confirmation_code.as_deref(), Some("654321"));
    }
}
