//! Application configuration

use std::env;
use std::str::FromStr;

use blogify_billing::DEFAULT_PROCESSED_EVENTS_TABLE;
use blogify_shared::accounts::DEFAULT_USERS_TABLE;
use blogify_shared::articles::DEFAULT_ARTICLES_TABLE;

/// Upper bound on session lifetime (one year)
pub const MAX_SESSION_EXPIRY_HOURS: i64 = 24 * 365;

/// Which record store backend to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStoreKind {
    Postgres,
    Airtable,
    Memory,
}

impl FromStr for RecordStoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(RecordStoreKind::Postgres),
            "airtable" => Ok(RecordStoreKind::Airtable),
            "memory" => Ok(RecordStoreKind::Memory),
            _ => Err(ConfigError::Invalid(
                "RECORD_STORE must be one of postgres, airtable, memory",
            )),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,

    // Record store
    pub record_store: RecordStoreKind,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub users_table: String,
    pub articles_table: String,
    pub processed_events_table: String,

    // Sessions
    pub jwt_secret: String,
    pub session_ttl_secs: u64,
    pub session_expiry_hours: i64,

    // Content providers
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub article_model: String,
    pub image_model: String,
    pub transcript_api_url: String,

    // Feature flags
    pub enable_billing: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let record_store: RecordStoreKind = env::var("RECORD_STORE")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;

        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        if record_store == RecordStoreKind::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            // Record store
            record_store,
            database_url,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),
            users_table: env::var("USERS_TABLE").unwrap_or_else(|_| DEFAULT_USERS_TABLE.to_string()),
            articles_table: env::var("ARTICLES_TABLE")
                .unwrap_or_else(|_| DEFAULT_ARTICLES_TABLE.to_string()),
            processed_events_table: env::var("PROCESSED_EVENTS_TABLE")
                .unwrap_or_else(|_| DEFAULT_PROCESSED_EVENTS_TABLE.to_string()),

            // Sessions
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            session_ttl_secs: env::var("SESSION_TTL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            session_expiry_hours: {
                let hours = env::var("SESSION_EXPIRY_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .unwrap_or(24);
                if !(1..=MAX_SESSION_EXPIRY_HOURS).contains(&hours) {
                    return Err(ConfigError::Invalid(
                        "SESSION_EXPIRY_HOURS must be between 1 and 8760",
                    ));
                }
                hours
            },

            // Content providers
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            article_model: env::var("ARTICLE_MODEL").unwrap_or_else(|_| "gpt-5.1".to_string()),
            image_model: env::var("IMAGE_MODEL").unwrap_or_else(|_| "gpt-image-1".to_string()),
            transcript_api_url: env::var("TRANSCRIPT_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),

            // Feature flags
            enable_billing: env::var("ENABLE_BILLING")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure config tests run serially (they modify shared env vars)
    static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

    const SECRET: &str = "test-jwt-secret-must-be-at-least-32-characters-long";

    fn cleanup_config() {
        for var in [
            "RECORD_STORE",
            "DATABASE_URL",
            "JWT_SECRET",
            "SESSION_TTL_SECS",
            "SESSION_EXPIRY_HOURS",
            "USERS_TABLE",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_jwt_secret_validation() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        cleanup_config();
        env::set_var("RECORD_STORE", "memory");

        match Config::from_env() {
            Err(ConfigError::Missing("JWT_SECRET")) => {}
            other => panic!("Expected Missing error for JWT_SECRET, got: {:?}", other),
        }

        env::set_var("JWT_SECRET", "too-short");
        assert!(matches!(Config::from_env(), Err(ConfigError::WeakSecret(_))));

        env::set_var("JWT_SECRET", SECRET);
        assert!(Config::from_env().is_ok());

        cleanup_config();
    }

    #[test]
    fn test_record_store_selection() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        cleanup_config();
        env::set_var("JWT_SECRET", SECRET);

        // postgres is the default and needs a database
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));

        env::set_var("DATABASE_URL", "postgres://test");
        let config = Config::from_env().unwrap();
        assert_eq!(config.record_store, RecordStoreKind::Postgres);

        env::set_var("RECORD_STORE", "redis");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));

        env::set_var("RECORD_STORE", "Memory");
        let config = Config::from_env().unwrap();
        assert_eq!(config.record_store, RecordStoreKind::Memory);

        cleanup_config();
    }

    #[test]
    fn test_session_expiry_bounds() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        cleanup_config();
        env::set_var("RECORD_STORE", "memory");
        env::set_var("JWT_SECRET", SECRET);

        for hours in ["0", "-5", "9223372036854775807"] {
            env::set_var("SESSION_EXPIRY_HOURS", hours);
            assert!(
                matches!(Config::from_env(), Err(ConfigError::Invalid(_))),
                "{} hours should be rejected",
                hours
            );
        }

        env::set_var("SESSION_EXPIRY_HOURS", "8760");
        assert_eq!(Config::from_env().unwrap().session_expiry_hours, 8760);

        cleanup_config();
    }

    #[test]
    fn test_defaults() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        cleanup_config();
        env::set_var("RECORD_STORE", "memory");
        env::set_var("JWT_SECRET", SECRET);
        env::set_var("SESSION_TTL_SECS", "not-a-number");
        env::set_var("USERS_TABLE", "Utilisateurs");

        let config = Config::from_env().unwrap();
        assert_eq!(config.session_ttl_secs, 30);
        assert_eq!(config.session_expiry_hours, 24);
        assert_eq!(config.users_table, "Utilisateurs");
        assert_eq!(config.articles_table, "articles");
        assert_eq!(config.processed_events_table, "processed_events");
        assert_eq!(config.article_model, "gpt-5.1");

        cleanup_config();
    }
}
