//! Blogify API Library
//!
//! HTTP server for Blogify: accounts and sessions, the YouTube-to-article
//! pipeline, and the billing endpoints.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod auth;
pub mod config;
pub mod content;
pub mod email;
pub mod error;
pub mod routes;
pub mod session;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use session::SessionRegistry;
pub use state::AppState;
