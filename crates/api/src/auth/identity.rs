//! Identity resolution
//!
//! Turns the request's device id and optional bearer credential into the
//! principal whose balance is charged. A verified account always wins over
//! the device id; an invalid credential never falls back to the device.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ocrgate_shared::Principal;
use serde::Deserialize;

use super::AuthError;

/// Account details returned by the identity service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub id: String,
    pub phone: Option<String>,
}

/// Outcome of verifying a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Valid(AccountInfo),
    /// The identity service rejected the credential
    Invalid,
    /// The identity service could not be reached in time
    Unavailable,
}

/// Credential verification collaborator
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Verification;
}

/// Response from the `/api/auth/profile` endpoint
#[derive(Debug, Deserialize)]
struct ProfileResponse {
    id: serde_json::Value,
    #[serde(default)]
    phone: Option<String>,
}

/// Identifiers come back as strings or numbers depending on the account
fn id_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl ProfileResponse {
    fn into_account(self) -> Option<AccountInfo> {
        Some(AccountInfo {
            id: id_to_string(&self.id)?,
            phone: self.phone.filter(|p| !p.is_empty()),
        })
    }
}

/// Verifies bearer tokens against the identity service over HTTP
#[derive(Clone)]
pub struct HttpIdentityVerifier {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityVerifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, token: &str) -> Verification {
        let url = format!("{}/api/auth/profile", self.base_url.trim_end_matches('/'));

        let response = match self
            .http_client
            .get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, timeout = e.is_timeout(), "Identity service unreachable");
                return Verification::Unavailable;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                status = status.as_u16(),
                "Identity service rejected credential"
            );
            return Verification::Invalid;
        }

        match response.json::<ProfileResponse>().await {
            Ok(profile) => match profile.into_account() {
                Some(account) => Verification::Valid(account),
                None => {
                    tracing::warn!("Identity profile without account id");
                    Verification::Invalid
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable identity profile");
                Verification::Invalid
            }
        }
    }
}

/// Resolves the principal a request is billed to
#[derive(Clone)]
pub struct IdentityResolver {
    verifier: Arc<dyn IdentityVerifier>,
}

impl IdentityResolver {
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { verifier }
    }

    /// Resolve from the `X-Device-Id` value and the raw `Authorization` value.
    ///
    /// A credential that is not a `Bearer` token is treated as absent.
    pub async fn resolve(
        &self,
        device_id: Option<&str>,
        authorization: Option<&str>,
    ) -> Result<Principal, AuthError> {
        if let Some(token) = authorization.and_then(extract_bearer_token) {
            if token.is_empty() {
                return Err(AuthError::InvalidToken);
            }
            match self.verifier.verify(token).await {
                Verification::Valid(account) => {
                    tracing::debug!(account_id = %account.id, "Resolved account principal");
                    return Ok(Principal::account(account.id, account.phone));
                }
                Verification::Invalid => return Err(AuthError::InvalidToken),
                Verification::Unavailable => {
                    tracing::warn!(
                        device_id = ?device_id,
                        "Identity service unavailable, continuing in guest mode"
                    );
                }
            }
        }

        device_principal(device_id)
    }
}

fn extract_bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim)
}

fn device_principal(device_id: Option<&str>) -> Result<Principal, AuthError> {
    match device_id.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(Principal::device(id)),
        _ => Err(AuthError::MissingDeviceId),
    }
}
