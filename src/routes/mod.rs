/**
 * Routes Module
 * API route handlers
 */

pub mod admin;
pub mod content;
pub mod health;
pub mod upload;

use axum::{http::HeaderMap, http::StatusCode, Json};
use serde::Serialize;

use crate::admin::AdminError;
use crate::auth::users::UserError;
use crate::auth::AuthError;
use crate::gateway::GatewayError;
use crate::AppState;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Success response (for delete)
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn error_response(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            message: None,
        }),
    )
}

pub fn gateway_error(e: GatewayError) -> ApiError {
    let status = match &e {
        GatewayError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
        GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
        GatewayError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
        GatewayError::Remote { .. } | GatewayError::Transport(_) | GatewayError::Decode(_) => {
            StatusCode::BAD_GATEWAY
        }
    };
    error_response(status, e.to_string())
}

pub fn auth_error(e: AuthError) -> ApiError {
    let status = match &e {
        AuthError::InvalidCredentials | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
        AuthError::ChallengeMissing => StatusCode::BAD_REQUEST,
        AuthError::ChallengeFailed => StatusCode::FORBIDDEN,
        AuthError::ChallengeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::Storage(_) | AuthError::Hash(_) => {
            tracing::error!("Session storage failure: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, e.to_string())
}

pub fn user_error(e: UserError) -> ApiError {
    let status = match &e {
        UserError::InvalidUsername | UserError::WeakPassword | UserError::LastAdmin => {
            StatusCode::BAD_REQUEST
        }
        UserError::DuplicateUsername(_) => StatusCode::CONFLICT,
        UserError::NotFound(_) => StatusCode::NOT_FOUND,
        UserError::Storage(_) | UserError::Hash(_) | UserError::HashTask(_) => {
            tracing::error!("User directory failure: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, e.to_string())
}

pub fn admin_error(e: AdminError) -> ApiError {
    match e {
        AdminError::Invalid(msg) => error_response(StatusCode::BAD_REQUEST, msg),
        AdminError::Gateway(e) => gateway_error(e),
        AdminError::Auth(e) => auth_error(e),
        AdminError::Users(e) => user_error(e),
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Rejects requests without the bearer token of the live admin session.
pub fn verify_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    match bearer_token(headers) {
        Some(token) if state.gate.verify_token(token) => Ok(()),
        Some(_) => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Invalid or expired token",
        )),
        None => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Authorization required",
        )),
    }
}
