//! Server-side sessions
//!
//! Each session holds a snapshot of the account it belongs to. Snapshots go
//! stale because webhooks change balances out of band, so the session
//! middleware refreshes them when they are older than the TTL or when the
//! request hits a money-sensitive path.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use blogify_billing::SessionMirror;
use blogify_shared::{Account, AccountId, AccountStatus, PlanName};
use serde::Serialize;
use uuid::Uuid;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30);

/// Paths that always refresh the snapshot before the handler runs
pub const CRITICAL_REFRESH_PATHS: [&str; 5] = [
    "/account",
    "/blogify",
    "/create-checkout-session",
    "/upgrade",
    "/cancel-subscription",
];

/// Whether `path` is, or is nested under, a critical-refresh path
pub fn is_critical_path(path: &str) -> bool {
    CRITICAL_REFRESH_PATHS.iter().any(|critical| {
        path == *critical
            || path
                .strip_prefix(critical)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// What a session knows about its account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub account_id: AccountId,
    pub email: String,
    pub credits: i64,
    pub plan_name: PlanName,
    pub status: AccountStatus,
    pub has_subscription: bool,
}

impl From<&Account> for SessionSnapshot {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id.clone(),
            email: account.email.clone(),
            credits: account.credits,
            plan_name: account.plan_name,
            status: account.status,
            has_subscription: account.stripe_subscription_id.is_some(),
        }
    }
}

/// One-shot UI notices, cleared when read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionFlag {
    CancellationScheduled,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub snapshot: SessionSnapshot,
    /// When the snapshot was last loaded from the record store
    pub credits_updated_at: Instant,
    pub expires_at: Instant,
    flags: HashSet<SessionFlag>,
}

impl Session {
    fn new(account: &Account, lifetime: Duration) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().simple().to_string(),
            snapshot: SessionSnapshot::from(account),
            credits_updated_at: now,
            expires_at: now + lifetime,
            flags: HashSet::new(),
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.credits_updated_at)
    }

    /// Whether the snapshot must be reloaded before serving `path`
    pub fn needs_refresh(&self, path: &str, ttl: Duration, now: Instant) -> bool {
        is_critical_path(path) || self.age(now) >= ttl
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn has_flag(&self, flag: SessionFlag) -> bool {
        self.flags.contains(&flag)
    }

    fn replace_snapshot(&mut self, account: &Account) {
        self.snapshot = SessionSnapshot::from(account);
        self.credits_updated_at = Instant::now();
    }
}

/// In-process registry of live sessions
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
    lifetime: Duration,
}

impl SessionRegistry {
    /// `ttl` bounds snapshot age, `lifetime` bounds the session itself
    pub fn new(ttl: Duration, lifetime: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            lifetime,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Open a session with a fresh snapshot of `account`
    pub fn create(&self, account: &Account) -> Session {
        let session = Session::new(account, self.lifetime);
        self.write().insert(session.id.clone(), session.clone());
        tracing::debug!(account_id = %account.id, "Session created");
        session
    }

    /// Live session by id; expired sessions are treated as absent
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.read()
            .get(session_id)
            .filter(|s| !s.is_expired(Instant::now()))
            .cloned()
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.write().remove(session_id).is_some()
    }

    /// Overwrite a session's snapshot with the current account state
    pub fn refresh(&self, session_id: &str, account: &Account) -> Option<Session> {
        let mut sessions = self.write();
        let session = sessions.get_mut(session_id)?;
        session.replace_snapshot(account);
        Some(session.clone())
    }

    pub fn set_flag(&self, session_id: &str, flag: SessionFlag) -> bool {
        match self.write().get_mut(session_id) {
            Some(session) => {
                session.flags.insert(flag);
                true
            }
            None => false,
        }
    }

    /// Read and clear a one-shot flag
    pub fn take_flag(&self, session_id: &str, flag: SessionFlag) -> bool {
        self.write()
            .get_mut(session_id)
            .is_some_and(|session| session.flags.remove(&flag))
    }

    /// Drop expired sessions, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl SessionMirror for SessionRegistry {
    fn mirror_account(&self, account: &Account) -> usize {
        let mut sessions = self.write();
        let mut updated = 0;
        for session in sessions
            .values_mut()
            .filter(|s| s.snapshot.account_id == account.id)
        {
            session.replace_snapshot(account);
            updated += 1;
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, credits: i64) -> Account {
        Account {
            id: AccountId::from(id),
            email: format!("{}@example.com", id.to_lowercase()),
            password_hash: String::new(),
            is_confirmed: true,
            confirmation_code: None,
            confirmation_attempts: 0,
            credits,
            plan_name: PlanName::Free,
            status: AccountStatus::Free,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            credited_subscription_id: None,
            creation_date: None,
        }
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(DEFAULT_SESSION_TTL, Duration::from_secs(3600))
    }

    #[test]
    fn test_critical_paths() {
        assert!(is_critical_path("/account"));
        assert!(is_critical_path("/blogify"));
        assert!(is_critical_path("/create-checkout-session/medium"));
        assert!(is_critical_path("/upgrade/success"));
        assert!(is_critical_path("/cancel-subscription"));
        assert!(!is_critical_path("/articles"));
        assert!(!is_critical_path("/accounts"));
        assert!(!is_critical_path("/"));
    }

    #[test]
    fn test_fresh_snapshot_is_kept_on_ordinary_paths() {
        let registry = registry();
        let session = registry.create(&account("recAAAAAAAAAAAAAA", 3));
        let now = session.credits_updated_at + Duration::from_secs(1);
        assert!(!session.needs_refresh("/articles", registry.ttl(), now));
    }

    #[test]
    fn test_old_snapshot_needs_refresh_everywhere() {
        let registry = registry();
        let session = registry.create(&account("recAAAAAAAAAAAAAA", 3));
        let now = session.credits_updated_at + Duration::from_secs(31);
        assert!(session.needs_refresh("/articles", registry.ttl(), now));
    }

    #[test]
    fn test_critical_path_forces_refresh_when_fresh() {
        let registry = registry();
        let session = registry.create(&account("recAAAAAAAAAAAAAA", 3));
        let now = session.credits_updated_at + Duration::from_secs(1);
        assert!(session.needs_refresh("/account", registry.ttl(), now));
    }

    #[test]
    fn test_refresh_overwrites_snapshot() {
        let registry = registry();
        let session = registry.create(&account("recAAAAAAAAAAAAAA", 3));
        let refreshed = registry
            .refresh(&session.id, &account("recAAAAAAAAAAAAAA", 33))
            .unwrap();
        assert_eq!(refreshed.snapshot.credits, 33);
        assert!(refreshed.credits_updated_at >= session.credits_updated_at);
        assert_eq!(registry.get(&session.id).unwrap().snapshot.credits, 33);
    }

    #[test]
    fn test_flags_are_one_shot() {
        let registry = registry();
        let session = registry.create(&account("recAAAAAAAAAAAAAA", 3));
        assert!(registry.set_flag(&session.id, SessionFlag::CancellationScheduled));
        assert!(registry.take_flag(&session.id, SessionFlag::CancellationScheduled));
        assert!(!registry.take_flag(&session.id, SessionFlag::CancellationScheduled));
        assert!(!registry.set_flag("missing", SessionFlag::CancellationScheduled));
    }

    #[test]
    fn test_mirror_updates_every_session_of_the_account() {
        let registry = registry();
        let a = registry.create(&account("recAAAAAAAAAAAAAA", 3));
        let b = registry.create(&account("recAAAAAAAAAAAAAA", 3));
        let other = registry.create(&account("recBBBBBBBBBBBBBB", 3));

        let updated = registry.mirror_account(&account("recAAAAAAAAAAAAAA", 30));
        assert_eq!(updated, 2);
        assert_eq!(registry.get(&a.id).unwrap().snapshot.credits, 30);
        assert_eq!(registry.get(&b.id).unwrap().snapshot.credits, 30);
        assert_eq!(registry.get(&other.id).unwrap().snapshot.credits, 3);
    }

    #[test]
    fn test_expired_sessions_are_hidden_and_purged() {
        let registry = SessionRegistry::new(DEFAULT_SESSION_TTL, Duration::ZERO);
        let session = registry.create(&account("recAAAAAAAAAAAAAA", 3));
        assert!(registry.get(&session.id).is_none());
        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove() {
        let registry = registry();
        let session = registry.create(&account("recAAAAAAAAAAAAAA", 3));
        assert!(registry.remove(&session.id));
        assert!(!registry.remove(&session.id));
        assert!(registry.get(&session.id).is_none());
    }
}
