#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ocrgate shared types
//!
//! Identity types and database helpers used by both the billing and API crates.

pub mod db;
pub mod principal;

pub use db::{create_pool, run_migrations, DbError};
pub use principal::{Principal, PrincipalKey, PrincipalKind};
