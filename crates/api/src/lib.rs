// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! ocrgate API Library
//!
//! HTTP gateway in front of the token ledger: identity resolution, metered
//! OCR, checkout and webhook settlement.

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod ocr;
pub mod routes;
pub mod state;


pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
