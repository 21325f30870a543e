//! Blogify Shared Types and Utilities
//!
//! This crate contains the typed domain model, the record store adapter and
//! the repositories shared across the Blogify platform.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod accounts;
pub mod articles;
pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use accounts::{AccountRepository, AccountUpdate, NewAccount};
pub use articles::{ArticleRepository, NewArticle};
pub use error::{StoreError, StoreResult};
pub use store::{Fields, Formula, Record, RecordStore};
pub use types::*;
