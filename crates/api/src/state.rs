//! Application state

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use ocrgate_billing::{BillingError, BillingService, InvariantChecker, MeteringConfig};
use sqlx::PgPool;

use crate::{
    auth::{HttpIdentityVerifier, IdentityResolver},
    config::Config,
    ocr::{LlmOcrEngine, OcrEngine, OcrError},
};

/// Errors raised while wiring the application together
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Billing setup failed: {0}")]
    Billing(#[from] BillingError),
    #[error("Identity client setup failed: {0}")]
    Identity(#[from] reqwest::Error),
    #[error("OCR client setup failed: {0}")]
    Ocr(#[from] OcrError),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub billing: Arc<BillingService>,
    pub identity: IdentityResolver,
    pub ocr: Arc<dyn OcrEngine>,
    /// Ledger checks; absent when running without PostgreSQL
    pub invariants: Option<InvariantChecker>,
    /// Prometheus renderer; `/metrics` is only served when present
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Result<Self, StateError> {
        let metering = MeteringConfig {
            free_uses_per_principal: config.free_uses_per_device,
        };
        if config.creem.api_key.is_empty() {
            tracing::warn!("CREEM_API_KEY not set, checkout sessions will be rejected by Creem");
        }
        if config.creem.webhook_secret.is_empty() {
            tracing::warn!("CREEM_WEBHOOK_SECRET not set, all payment webhooks will be rejected");
        }
        let billing = BillingService::postgres(pool.clone(), config.creem.clone(), metering)?;
        tracing::info!(
            free_uses = metering.free_uses_per_principal,
            "Billing service initialized"
        );

        let verifier = HttpIdentityVerifier::new(&config.auth_base_url, config.auth_timeout)?;
        let ocr = LlmOcrEngine::new(config.ocr.clone())?;

        if config.internal_test_key.is_none() {
            tracing::info!("INTERNAL_TEST_KEY not set, internal bypass disabled");
        }

        Ok(Self::from_parts(
            config,
            billing,
            IdentityResolver::new(Arc::new(verifier)),
            Arc::new(ocr),
            Some(InvariantChecker::new(pool)),
        ))
    }

    /// Assemble state from already-built collaborators
    pub fn from_parts(
        config: Config,
        billing: BillingService,
        identity: IdentityResolver,
        ocr: Arc<dyn OcrEngine>,
        invariants: Option<InvariantChecker>,
    ) -> Self {
        Self {
            config,
            billing: Arc::new(billing),
            identity,
            ocr,
            invariants,
            metrics: None,
        }
    }

    /// Serve the given Prometheus handle on `/metrics`
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Whether the request carries the internal bypass key
    pub fn is_internal(&self, presented: Option<&str>) -> bool {
        crate::auth::internal_key_matches(self.config.internal_test_key.as_deref(), presented)
    }
}
