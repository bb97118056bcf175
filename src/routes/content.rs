/**
 * Content Routes
 * Public read endpoints served from the synchronized stores
 */
use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

use crate::gateway::models::{Project, SiteSettings, Talk, Testimonial};
use crate::sync::ResourceState;
use crate::AppState;

/// Everything the public page needs in one response.
#[derive(Debug, Serialize)]
pub struct SiteResponse {
    pub settings: ResourceState<SiteSettings>,
    pub projects: ResourceState<Vec<Project>>,
    pub testimonials: ResourceState<Vec<Testimonial>>,
    pub talks: ResourceState<Vec<Talk>>,
}

/// GET /api/site
pub async fn get_site(State(state): State<AppState>) -> impl IntoResponse {
    Json(SiteResponse {
        settings: state.stores.settings.snapshot(),
        projects: state.stores.projects.snapshot(),
        testimonials: state.stores.testimonials.snapshot(),
        talks: state.stores.talks.snapshot(),
    })
}

/// GET /api/projects
pub async fn get_projects(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stores.projects.snapshot())
}

/// GET /api/testimonials
pub async fn get_testimonials(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stores.testimonials.snapshot())
}

/// GET /api/talks
pub async fn get_talks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stores.talks.snapshot())
}

/// GET /api/settings
pub async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stores.settings.snapshot())
}
