//! API routes

pub mod account;
pub mod articles;
pub mod auth;
pub mod billing;
pub mod blogify;
pub mod health;


use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_session, state::AppState};

/// Request bodies are small JSON documents or Stripe events
const MAX_BODY_BYTES: usize = 1024 * 1024;

fn cors_layer(public_url: &str) -> CorsLayer {
    match HeaderValue::from_str(public_url.trim_end_matches('/')) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        Err(_) => {
            tracing::warn!(public_url = %public_url, "PUBLIC_URL is not a valid origin, CORS disabled");
            CorsLayer::new()
        }
    }
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Public routes (no session required)
    let mut public_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/confirm", post(auth::confirm))
        .route("/login", post(auth::login))
        .route("/plans", get(account::list_plans));

    // Session routes
    let mut protected_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/account", get(account::get_account))
        .route("/blogify", post(blogify::blogify))
        .route("/articles", get(articles::list_articles));

    if state.billing.is_some() {
        // Stripe webhook (public, uses signature verification)
        public_routes = public_routes.route("/webhook", post(billing::webhook));

        protected_routes = protected_routes
            .route("/create-checkout-session/:plan", post(billing::create_checkout_session))
            .route("/upgrade/success", get(billing::upgrade_success))
            .route("/cancel-subscription", post(billing::cancel_subscription));
    }

    // Resolve the session and apply the staleness policy before every handler
    let protected_routes = protected_routes.route_layer(middleware::from_fn_with_state(
        state.clone(),
        require_session,
    ));

    Router::new()
        .merge(health_routes)
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(&state.config.public_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
