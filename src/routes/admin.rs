/**
 * Admin Routes
 * Login, session, panel state and content mutations for the site operator
 */
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    admin_error, auth_error, error_response, user_error, verify_auth, SuccessResponse,
};
use crate::admin::{
    AdminTab, ContentKind, Dashboard, EditTarget, PanelView, ProjectForm, SettingsForm, SiteView,
    TalkForm, TestimonialForm,
};
use crate::auth::users::{Role, UserChanges};
use crate::auth::{SessionStatus, SessionUser};
use crate::trigger::TriggerAction;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub challenge_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: SessionUser,
    pub expires_at: DateTime<Utc>,
    pub view: SiteView,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub view: SiteView,
}

#[derive(Debug, Serialize)]
pub struct PanelResponse {
    pub view: PanelView,
    pub dashboard: Dashboard,
}

#[derive(Debug, Deserialize)]
pub struct EditingRequest {
    pub kind: ContentKind,
    /// `None` cancels editing for `kind`.
    pub target: Option<EditTarget>,
}

#[derive(Debug, Deserialize)]
pub struct PanelUpdate {
    pub tab: Option<AdminTab>,
    pub editing: Option<EditingRequest>,
}

#[derive(Debug, Deserialize)]
pub struct KeyPress {
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct KeyPressResponse {
    pub action: TriggerAction,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role: Role,
}

// ============================================================================
// Session
// ============================================================================

/// Header naming the browser tab a keystroke comes from.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

const MAX_CLIENT_ID_LEN: usize = 64;

fn client_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_CLIENT_ID_LEN)
}

/// POST /api/trigger - feed one keystroke to the caller's keyword listener
pub async fn press_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<KeyPress>,
) -> Response {
    let Some(client) = client_id(&headers) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing or invalid X-Client-Id header")
            .into_response();
    };
    let authenticated = verify_auth(&state, &headers).is_ok();

    let action = state
        .triggers
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .press(client, &req.key, authenticated);
    Json(KeyPressResponse { action }).into_response()
}

/// POST /api/admin/login
pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    match state
        .gate
        .login(&req.username, &req.password, &req.challenge_token)
        .await
    {
        Ok(session) => {
            if let Err(e) = state.panel.users().record_login(&session.user.username) {
                tracing::warn!("Could not record login time: {}", e);
            }
            (
                StatusCode::OK,
                Json(LoginResponse {
                    token: session.token,
                    user: session.user,
                    expires_at: session.expires_at,
                    view: SiteView::Admin,
                }),
            )
                .into_response()
        }
        Err(e) => auth_error(e).into_response(),
    }
}

/// POST /api/admin/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    match state.panel.logout() {
        Ok(view) => (StatusCode::OK, Json(LogoutResponse { view })).into_response(),
        Err(e) => admin_error(e).into_response(),
    }
}

/// GET /api/admin/session
pub async fn session(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if verify_auth(&state, &headers).is_ok() {
        Json(state.gate.status())
    } else {
        Json(SessionStatus {
            authenticated: false,
            user: None,
            expires_at: None,
        })
    }
}

// ============================================================================
// Panel
// ============================================================================

/// GET /api/admin/panel
pub async fn get_panel(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    Json(PanelResponse {
        view: state.panel.view(),
        dashboard: state.panel.dashboard(),
    })
    .into_response()
}

/// PUT /api/admin/panel - switch tab and/or edit target
pub async fn update_panel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PanelUpdate>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    if let Some(tab) = req.tab {
        state.panel.select_tab(tab);
    }
    if let Some(editing) = req.editing {
        match editing.target {
            Some(target) => state.panel.start_editing(editing.kind, target),
            None => state.panel.cancel_editing(editing.kind),
        };
    }
    Json(PanelResponse {
        view: state.panel.view(),
        dashboard: state.panel.dashboard(),
    })
    .into_response()
}

// ============================================================================
// Content
// ============================================================================

fn deleted(result: Result<bool, crate::admin::AdminError>) -> Response {
    match result {
        Ok(success) => (StatusCode::OK, Json(SuccessResponse { success })).into_response(),
        Err(e) => admin_error(e).into_response(),
    }
}

/// POST /api/admin/projects
pub async fn create_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(form): Json<ProjectForm>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    match state.panel.save_project(EditTarget::New, &form).await {
        Ok(project) => (StatusCode::CREATED, Json(project)).into_response(),
        Err(e) => admin_error(e).into_response(),
    }
}

/// PUT /api/admin/projects/{id}
pub async fn update_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(form): Json<ProjectForm>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    match state.panel.save_project(EditTarget::Existing(id), &form).await {
        Ok(project) => (StatusCode::OK, Json(project)).into_response(),
        Err(e) => admin_error(e).into_response(),
    }
}

/// DELETE /api/admin/projects/{id}
pub async fn delete_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    deleted(state.panel.delete_project(id).await)
}

/// POST /api/admin/testimonials
pub async fn create_testimonial(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(form): Json<TestimonialForm>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    match state.panel.save_testimonial(EditTarget::New, &form).await {
        Ok(testimonial) => (StatusCode::CREATED, Json(testimonial)).into_response(),
        Err(e) => admin_error(e).into_response(),
    }
}

/// PUT /api/admin/testimonials/{id}
pub async fn update_testimonial(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(form): Json<TestimonialForm>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    match state
        .panel
        .save_testimonial(EditTarget::Existing(id), &form)
        .await
    {
        Ok(testimonial) => (StatusCode::OK, Json(testimonial)).into_response(),
        Err(e) => admin_error(e).into_response(),
    }
}

/// DELETE /api/admin/testimonials/{id}
pub async fn delete_testimonial(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    deleted(state.panel.delete_testimonial(id).await)
}

/// POST /api/admin/talks
pub async fn create_talk(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(form): Json<TalkForm>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    match state.panel.save_talk(EditTarget::New, &form).await {
        Ok(talk) => (StatusCode::CREATED, Json(talk)).into_response(),
        Err(e) => admin_error(e).into_response(),
    }
}

/// PUT /api/admin/talks/{id}
pub async fn update_talk(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(form): Json<TalkForm>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    match state.panel.save_talk(EditTarget::Existing(id), &form).await {
        Ok(talk) => (StatusCode::OK, Json(talk)).into_response(),
        Err(e) => admin_error(e).into_response(),
    }
}

/// DELETE /api/admin/talks/{id}
pub async fn delete_talk(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    deleted(state.panel.delete_talk(id).await)
}

/// PATCH /api/admin/settings
pub async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(form): Json<SettingsForm>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    match state.panel.save_settings(&form).await {
        Ok(settings) => (StatusCode::OK, Json(settings)).into_response(),
        Err(e) => admin_error(e).into_response(),
    }
}

// ============================================================================
// Users
// ============================================================================

/// GET /api/admin/users
pub async fn list_users(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    match state.panel.users().list() {
        Ok(users) => (StatusCode::OK, Json(users)).into_response(),
        Err(e) => user_error(e).into_response(),
    }
}

/// POST /api/admin/users
pub async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateUserRequest>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    match state
        .panel
        .users()
        .create(&req.username, &req.password, req.role)
        .await
    {
        Ok(user) => (StatusCode::CREATED, Json(user)).into_response(),
        Err(e) => user_error(e).into_response(),
    }
}

/// PATCH /api/admin/users/{id}
pub async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(changes): Json<UserChanges>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    match state.panel.users().update(&id, changes).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(e) => user_error(e).into_response(),
    }
}

/// DELETE /api/admin/users/{id}
pub async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }
    match state.panel.users().delete(&id) {
        Ok(()) => (StatusCode::OK, Json(SuccessResponse { success: true })).into_response(),
        Err(e) => user_error(e).into_response(),
    }
}
