/*!
 * Authentication Gate
 * Single-operator login with a time-limited session kept in persisted storage
 */
pub mod challenge;
pub mod clock;
pub mod storage;
pub mod users;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::AdminCredential;
use challenge::ChallengeVerifier;
use clock::{Clock, SystemClock};
use storage::{KeyValueStore, StorageError};

// ============================================================================
// Storage keys
// ============================================================================

pub const TOKEN_KEY: &str = "deviem_admin_token";
pub const SESSION_KEY: &str = "deviem_admin_session";
pub const SUPABASE_SESSION_KEY: &str = "supabase_admin_session";
pub const USERS_KEY: &str = "deviem_users";

/// Value written under [`TOKEN_KEY`] while logged in.
pub const TOKEN_VALUE: &str = "authenticated";

/// Session lifetime in hours
pub const SESSION_TTL_HOURS: i64 = 24;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Human verification is required")]
    ChallengeMissing,
    #[error("Human verification failed")]
    ChallengeFailed,
    #[error("Human verification unavailable: {0}")]
    ChallengeUnavailable(String),
    #[error("Not authenticated. Please log in as admin.")]
    Unauthenticated,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub username: String,
    pub role: String,
}

/// JSON stored under [`SUPABASE_SESSION_KEY`]. Only the token hash is kept.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    token_hash: String,
    user: SessionUser,
}

/// Issued on successful login. `token` is shown once and never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSession {
    pub token: String,
    pub user: SessionUser,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Current session state as seen by a validity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Credential check
// ============================================================================

/// Username compared exactly, password checked against a bcrypt hash.
#[derive(Debug, Clone)]
pub struct CredentialVerifier {
    username: String,
    password_hash: String,
}

impl CredentialVerifier {
    pub fn new(credential: &AdminCredential) -> Self {
        Self {
            username: credential.username.clone(),
            password_hash: credential.password_hash.clone(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        username == self.username && bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_token() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 64)
}

// ============================================================================
// Gate
// ============================================================================

pub struct AuthGate {
    storage: Arc<dyn KeyValueStore>,
    credentials: CredentialVerifier,
    challenge: Arc<dyn ChallengeVerifier>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl AuthGate {
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        credentials: CredentialVerifier,
        challenge: Arc<dyn ChallengeVerifier>,
    ) -> Self {
        Self {
            storage,
            credentials,
            challenge,
            clock: Arc::new(SystemClock),
            ttl: Duration::hours(SESSION_TTL_HOURS),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn storage(&self) -> Arc<dyn KeyValueStore> {
        self.storage.clone()
    }

    /// Checks the challenge, then the credential, then opens a session.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        challenge_token: &str,
    ) -> Result<AdminSession, AuthError> {
        if challenge_token.trim().is_empty() {
            return Err(AuthError::ChallengeMissing);
        }
        if !self.challenge.verify(challenge_token).await? {
            tracing::warn!(username = %username, "login rejected: challenge failed");
            return Err(AuthError::ChallengeFailed);
        }

        // bcrypt is CPU-bound; keep the async executor free.
        let verifier = self.credentials.clone();
        let (user, pwd) = (username.to_string(), password.to_string());
        let matches = tokio::task::spawn_blocking(move || verifier.verify(&user, &pwd))
            .await
            .unwrap_or(false);
        if !matches {
            tracing::warn!(username = %username, "login rejected: invalid credentials");
            return Err(AuthError::InvalidCredentials);
        }

        let token = generate_token();
        let created_at = self.clock.now();
        let user = SessionUser {
            id: "admin".to_string(),
            username: self.credentials.username().to_string(),
            role: "admin".to_string(),
        };
        let stored = serde_json::to_string(&StoredSession {
            token_hash: hash_token(&token),
            user: user.clone(),
        })
        .map_err(StorageError::from)?;

        self.storage.set(TOKEN_KEY, TOKEN_VALUE)?;
        self.storage
            .set(SESSION_KEY, &created_at.timestamp_millis().to_string())?;
        self.storage.set(SUPABASE_SESSION_KEY, &stored)?;

        tracing::info!(username = %user.username, "admin session opened");

        Ok(AdminSession {
            token,
            user,
            created_at,
            expires_at: created_at + self.ttl,
        })
    }

    /// Recomputes validity; an expired session is cleared on the spot.
    pub fn status(&self) -> SessionStatus {
        let unauthenticated = SessionStatus {
            authenticated: false,
            user: None,
            expires_at: None,
        };

        match self.session_start() {
            Some(created_at) if self.clock.now() - created_at < self.ttl => SessionStatus {
                authenticated: true,
                user: self.stored_session().map(|s| s.user),
                expires_at: Some(created_at + self.ttl),
            },
            Some(_) => {
                tracing::info!("admin session expired");
                self.clear_quietly();
                unauthenticated
            }
            None => {
                if self.storage.get(TOKEN_KEY).is_some() || self.storage.get(SESSION_KEY).is_some() {
                    self.clear_quietly();
                }
                unauthenticated
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status().authenticated
    }

    /// The check every mutating call runs right before touching the remote store.
    pub fn require_session(&self) -> Result<(), AuthError> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(AuthError::Unauthenticated)
        }
    }

    /// Valid session and the bearer token it was issued with.
    pub fn verify_token(&self, token: &str) -> bool {
        if !self.is_authenticated() {
            return false;
        }
        self.stored_session()
            .map(|s| s.token_hash == hash_token(token))
            .unwrap_or(false)
    }

    /// Clears every session key.
    pub fn logout(&self) -> Result<(), AuthError> {
        self.storage.remove(TOKEN_KEY)?;
        self.storage.remove(SESSION_KEY)?;
        self.storage.remove(SUPABASE_SESSION_KEY)?;
        tracing::info!("admin session closed");
        Ok(())
    }

    fn session_start(&self) -> Option<DateTime<Utc>> {
        if self.storage.get(TOKEN_KEY).as_deref() != Some(TOKEN_VALUE) {
            return None;
        }
        let millis: i64 = self.storage.get(SESSION_KEY)?.trim().parse().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    fn stored_session(&self) -> Option<StoredSession> {
        let raw = self.storage.get(SUPABASE_SESSION_KEY)?;
        serde_json::from_str(&raw).ok()
    }

    fn clear_quietly(&self) {
        if let Err(e) = self.logout() {
            tracing::error!("Failed to clear admin session: {}", e);
        }
    }
}
