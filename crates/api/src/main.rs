//! Blogify API server

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use blogify_api::{
    config::RecordStoreKind,
    content::{ContentPipeline, HttpTranscriptProvider, OpenAiArticleGenerator, OpenAiImageGenerator},
    email::AccountEmailService,
    routes::create_router,
    AppState, Config,
};
use blogify_billing::{BillingService, StripeConfig};
use blogify_shared::{
    db,
    store::{AirtableConfig, AirtableStore, MemoryStore, PgRecordStore},
    RecordStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(
        bind_address = %config.bind_address,
        record_store = ?config.record_store,
        "Starting Blogify API"
    );

    let store = open_record_store(&config).await?;
    let content = content_pipeline(&config)?;
    let email = AccountEmailService::from_env();
    if !email.is_enabled() {
        tracing::warn!("RESEND_API_KEY not set, confirmation codes will not be emailed");
    }

    let mut state = AppState::new(config.clone(), store.clone(), content, email);

    if config.enable_billing {
        match StripeConfig::from_env() {
            Ok(stripe) => {
                let billing = BillingService::new(
                    stripe,
                    state.ledger.clone(),
                    store.clone(),
                    &config.processed_events_table,
                );
                state = state.with_billing(billing);
                tracing::info!("Billing enabled");
            }
            Err(e) => tracing::warn!(error = %e, "Stripe not configured, billing disabled"),
        }
    }

    let maintenance = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let (sessions, locks) = maintenance.purge_idle();
            if sessions + locks > 0 {
                tracing::debug!(sessions, locks, "Purged expired sessions and idle locks");
            }
        }
    });

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Shut down");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "blogify_api=info,blogify_billing=info,tower_http=info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn open_record_store(config: &Config) -> anyhow::Result<Arc<dyn RecordStore>> {
    let store: Arc<dyn RecordStore> = match config.record_store {
        RecordStoreKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres record store")?;
            let pool = db::create_pool_with(url, config.database_max_connections)
                .await
                .context("failed to connect to the database")?;
            db::run_migrations(&pool)
                .await
                .context("failed to run migrations")?;
            Arc::new(PgRecordStore::new(pool))
        }
        RecordStoreKind::Airtable => {
            let airtable = AirtableConfig::from_env()?;
            Arc::new(AirtableStore::new(airtable)?)
        }
        RecordStoreKind::Memory => {
            tracing::warn!("Using the in-memory record store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

fn content_pipeline(config: &Config) -> anyhow::Result<ContentPipeline> {
    if config.openai_api_key.is_empty() {
        tracing::warn!("OPENAI_API_KEY not set, article generation will fail");
    }

    let transcripts = HttpTranscriptProvider::new(&config.transcript_api_url)?;
    let articles = OpenAiArticleGenerator::new(
        &config.openai_base_url,
        &config.openai_api_key,
        &config.article_model,
    )?;
    let images = OpenAiImageGenerator::new(
        &config.openai_base_url,
        &config.openai_api_key,
        &config.image_model,
    )?;

    Ok(ContentPipeline::new(
        Arc::new(transcripts),
        Arc::new(articles),
        Arc::new(images),
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
