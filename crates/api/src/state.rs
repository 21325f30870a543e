//! Shared application state

use std::sync::Arc;
use std::time::Duration;

use blogify_billing::{BillingService, CreditLedger, UserLocks};
use blogify_shared::{AccountRepository, ArticleRepository, RecordStore};

use crate::auth::JwtManager;
use crate::config::Config;
use crate::content::ContentPipeline;
use crate::email::AccountEmailService;
use crate::session::SessionRegistry;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn RecordStore>,
    pub accounts: AccountRepository,
    pub articles: ArticleRepository,
    /// The one ledger of the process; billing spends through the same instance
    pub ledger: CreditLedger,
    pub billing: Option<Arc<BillingService>>,
    pub sessions: Arc<SessionRegistry>,
    pub jwt: Arc<JwtManager>,
    pub email: AccountEmailService,
    pub content: ContentPipeline,
}

impl AppState {
    /// Wire up state over a record store.
    ///
    /// Billing is attached separately with [`AppState::with_billing`] because
    /// it needs the ledger built here.
    pub fn new(
        config: Config,
        store: Arc<dyn RecordStore>,
        content: ContentPipeline,
        email: AccountEmailService,
    ) -> Self {
        let accounts = AccountRepository::with_table(store.clone(), config.users_table.clone());
        let articles = ArticleRepository::with_table(store.clone(), config.articles_table.clone());
        let ledger = CreditLedger::new(accounts.clone(), Arc::new(UserLocks::new()));
        let sessions = Arc::new(SessionRegistry::new(
            Duration::from_secs(config.session_ttl_secs),
            Duration::from_secs(
                u64::try_from(config.session_expiry_hours)
                    .unwrap_or(0)
                    .saturating_mul(3600),
            ),
        ));
        let jwt = Arc::new(JwtManager::new(&config.jwt_secret, config.session_expiry_hours));

        Self {
            config: Arc::new(config),
            store,
            accounts,
            articles,
            ledger,
            billing: None,
            sessions,
            jwt,
            email,
            content,
        }
    }

    /// Drop expired sessions and idle account locks.
    ///
    /// Returns how many of each were removed.
    pub fn purge_idle(&self) -> (usize, usize) {
        (self.sessions.purge_expired(), self.ledger.locks().prune())
    }

    /// Attach billing and let it mirror reconciled accounts into live sessions
    pub fn with_billing(mut self, billing: BillingService) -> Self {
        let billing = billing.with_session_mirror(self.sessions.clone());
        self.billing = Some(Arc::new(billing));
        self
    }
}
