//! Proof-of-human challenge verification for the login form.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::AuthError;

const TURNSTILE_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait ChallengeVerifier: Send + Sync {
    /// `Ok(false)` means the provider rejected the token.
    async fn verify(&self, token: &str) -> Result<bool, AuthError>;
}

/// Accepts any non-empty token; used when no provider secret is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct PresenceChallenge;

#[async_trait]
impl ChallengeVerifier for PresenceChallenge {
    async fn verify(&self, token: &str) -> Result<bool, AuthError> {
        Ok(!token.trim().is_empty())
    }
}

#[derive(Debug, Serialize)]
struct SiteVerifyRequest<'a> {
    secret: &'a str,
    response: &'a str,
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Cloudflare Turnstile server-side verification.
pub struct TurnstileChallenge {
    client: reqwest::Client,
    secret: String,
    endpoint: String,
}

impl TurnstileChallenge {
    pub fn new(secret: impl Into<String>) -> Self {
        Self::with_endpoint(secret, TURNSTILE_VERIFY_URL)
    }

    pub fn with_endpoint(secret: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(VERIFY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            secret: secret.into(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ChallengeVerifier for TurnstileChallenge {
    async fn verify(&self, token: &str) -> Result<bool, AuthError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SiteVerifyRequest {
                secret: &self.secret,
                response: token,
            })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "challenge verification request failed");
                AuthError::ChallengeUnavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "challenge provider returned error");
            return Err(AuthError::ChallengeUnavailable(format!(
                "provider returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: SiteVerifyResponse = response
            .json()
            .await
            .map_err(|e| AuthError::ChallengeUnavailable(e.to_string()))?;

        if !body.success {
            tracing::warn!(codes = ?body.error_codes, "challenge token rejected");
        }
        Ok(body.success)
    }
}
