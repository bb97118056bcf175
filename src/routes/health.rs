/**
 * Health Routes
 * Endpoints for checking backend and Supabase health status
 */
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::monitor::{ConnectionState, ConnectionStatus};
use crate::sync::{Source, Store};
use crate::AppState;

// Track server start time for uptime calculation
lazy_static::lazy_static! {
    static ref SERVER_START: Instant = Instant::now();
}

/// Initialize the server start time
pub fn init_start_time() {
    lazy_static::initialize(&SERVER_START);
}

/// Single service check result
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCheck {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceCheck {
    fn from_store<S: Source>(store: &Arc<Store<S>>) -> Self {
        let state = store.snapshot();
        let status = match (&state.error, state.loading) {
            (Some(_), _) => "degraded",
            (None, true) => "loading",
            (None, false) => "healthy",
        };
        Self {
            status: status.to_string(),
            response_time: None,
            error: state.error,
        }
    }
}

impl From<&ConnectionStatus> for ServiceCheck {
    fn from(status: &ConnectionStatus) -> Self {
        Self {
            status: if status.is_connected() {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            response_time: status.response_time,
            error: (!status.is_connected()).then(|| status.message.clone()),
        }
    }
}

/// Detailed health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedHealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    pub checks: HealthChecks,
}

/// Health checks for the remote store and each content store
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub supabase: ServiceCheck,
    pub projects: ServiceCheck,
    pub testimonials: ServiceCheck,
    pub talks: ServiceCheck,
    pub settings: ServiceCheck,
}

/// Ready check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supabase: Option<ConnectionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Simple health response
#[derive(Debug, Serialize, Deserialize)]
pub struct SimpleHealthResponse {
    pub status: String,
}

/// GET /health - Simple health ping
pub async fn health_ping() -> impl IntoResponse {
    Json(SimpleHealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /health/detailed - Detailed health with all checks
pub async fn health_detailed(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = SERVER_START.elapsed().as_secs();
    let connection = state.monitor.current();

    // Overall status stays "ok" while the backend runs; content degrades to fallbacks
    let response = DetailedHealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        uptime: Some(uptime),
        checks: HealthChecks {
            supabase: ServiceCheck::from(&connection),
            projects: ServiceCheck::from_store(&state.stores.projects),
            testimonials: ServiceCheck::from_store(&state.stores.testimonials),
            talks: ServiceCheck::from_store(&state.stores.talks),
            settings: ServiceCheck::from_store(&state.stores.settings),
        },
    };

    (StatusCode::OK, Json(response))
}

/// GET /health/supabase - Re-check the connection now
pub async fn health_supabase(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.monitor.check().await;
    (StatusCode::OK, Json(status))
}

/// GET /health/ready - Readiness check
pub async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = SERVER_START.elapsed().as_secs();
    let connection = state.monitor.current();

    // Ready once the first connection check or settings fetch has landed
    let is_ready = connection.state != ConnectionState::Checking
        || !state.stores.settings.snapshot().loading;

    let response = ReadyResponse {
        status: if is_ready {
            "ready".to_string()
        } else {
            "not ready".to_string()
        },
        timestamp: Utc::now(),
        uptime: Some(uptime),
        supabase: Some(connection.state),
        reason: if !is_ready {
            Some("Initial content load still in progress".to_string())
        } else {
            None
        },
    };

    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}
