//! Admin routes, guarded by the internal key

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use ocrgate_billing::{InvariantChecker, InvariantViolation};
use serde::{Deserialize, Serialize};

use super::header_str;
use crate::auth::AuthError;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InvariantQuery {
    /// Run a single named check instead of all of them
    pub check: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum InvariantReport {
    Summary(ocrgate_billing::InvariantCheckSummary),
    Single {
        check: String,
        healthy: bool,
        violations: Vec<InvariantViolation>,
    },
}

/// GET /api/v1/admin/invariants
pub async fn invariants(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<InvariantQuery>,
) -> ApiResult<Json<InvariantReport>> {
    if !state.is_internal(header_str(&headers, "x-internal-key")) {
        return Err(AuthError::InvalidInternalKey.into());
    }

    let checker = state
        .invariants
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("Invariant checks unavailable".to_string()))?;

    let report = match query.check {
        Some(name) => {
            if !InvariantChecker::available_checks().contains(&name.as_str()) {
                return Err(ApiError::BadRequest(format!("Unknown check: {}", name)));
            }
            let violations = checker.run_check(&name).await?;
            InvariantReport::Single {
                check: name,
                healthy: violations.is_empty(),
                violations,
            }
        }
        None => InvariantReport::Summary(checker.run_all_checks().await?),
    };

    Ok(Json(report))
}
