//! Application configuration loaded from the environment.
//!
//! Everything is read once at start-up. A `.env` file is honoured for local
//! development but skipped under `cfg(test)` so tests stay hermetic.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Values shipped in the sample `.env` that mean "not filled in yet".
const PLACEHOLDERS: &[&str] = &[
    "your-project-url",
    "https://your-project.supabase.co",
    "your-anon-key",
    "your_supabase_url",
    "your_supabase_anon_key",
];

pub const DEFAULT_ADMIN_USERNAME: &str = "deviem_admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "DevIem2024@Secure!";
const DEFAULT_BUCKET: &str = "portfolio-images";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error("Failed to hash the admin password: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),
}

/// Connection details for the hosted table store and blob storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    pub bucket: String,
}

impl SupabaseConfig {
    /// Builds the config only when both values are present and not placeholders.
    pub fn from_parts(url: Option<String>, anon_key: Option<String>, bucket: String) -> Option<Self> {
        let url = url.map(|s| s.trim().trim_end_matches('/').to_string())?;
        let anon_key = anon_key.map(|s| s.trim().to_string())?;
        if is_placeholder(&url) || is_placeholder(&anon_key) {
            return None;
        }
        Some(Self {
            url,
            anon_key,
            bucket,
        })
    }
}

fn is_placeholder(value: &str) -> bool {
    value.is_empty() || PLACEHOLDERS.contains(&value)
}

/// Credential for the single site operator.
#[derive(Debug, Clone)]
pub struct AdminCredential {
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub environment: String,
    pub supabase: Option<SupabaseConfig>,
    pub admin: AdminCredential,
    pub turnstile_secret: Option<String>,
    pub storage_path: PathBuf,
    pub health_timeout: Duration,
    pub health_poll_interval: Duration,
    pub auto_refresh_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("PORT").unwrap_or_else(|_| "3001".to_string());
        let bind_address = format!("{}:{}", host, port)
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("HOST/PORT".to_string(), e.to_string()))?;

        let environment =
            std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let bucket = std::env::var("STORAGE_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.to_string());
        let supabase = SupabaseConfig::from_parts(
            env_any(&["SUPABASE_URL", "VITE_SUPABASE_URL"]),
            env_any(&["SUPABASE_ANON_KEY", "VITE_SUPABASE_ANON_KEY"]),
            bucket,
        );

        let username =
            std::env::var("ADMIN_USERNAME").unwrap_or_else(|_| DEFAULT_ADMIN_USERNAME.to_string());
        let password_hash = match std::env::var("ADMIN_PASSWORD_HASH") {
            Ok(hash) => hash,
            Err(_) => {
                let plain = std::env::var("ADMIN_PASSWORD")
                    .unwrap_or_else(|_| DEFAULT_ADMIN_PASSWORD.to_string());
                bcrypt::hash(plain, bcrypt::DEFAULT_COST)?
            }
        };

        let turnstile_secret = std::env::var("TURNSTILE_SECRET_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let storage_path = std::env::var("STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/storage.json"));

        Ok(Self {
            bind_address,
            environment,
            supabase,
            admin: AdminCredential {
                username,
                password_hash,
            },
            turnstile_secret,
            storage_path,
            health_timeout: env_secs("HEALTH_TIMEOUT_SECS", 5)?,
            health_poll_interval: env_secs("HEALTH_POLL_SECS", 30)?,
            auto_refresh_interval: env_secs("AUTO_REFRESH_SECS", 30)?,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn env_any(names: &[&str]) -> Option<String> {
    first_non_blank(names, |name| std::env::var(name).ok())
}

/// First name whose value is set and not blank; an empty `SUPABASE_URL`
/// must not hide `VITE_SUPABASE_URL`.
fn first_non_blank(names: &[&str], lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    names
        .iter()
        .filter_map(|name| lookup(*name))
        .find(|value| !value.trim().is_empty())
}

fn env_secs(name: &str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}
