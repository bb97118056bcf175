//! deviem site backend - library for app logic and testing

pub mod admin;
pub mod auth;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod monitor;
pub mod routes;
pub mod sync;
pub mod trigger;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
};

use admin::{AdminPanel, ContentStores};
use auth::challenge::{ChallengeVerifier, PresenceChallenge, TurnstileChallenge};
use auth::storage::{FileStorage, KeyValueStore};
use auth::users::UserDirectory;
use auth::{AuthGate, CredentialVerifier};
use config::{Config, DEFAULT_ADMIN_PASSWORD};
use gateway::postgrest::PostgrestClient;
use gateway::storage::{BlobStore, ImageStorage, SupabaseStorage};
use gateway::{Remote, TableStore};
use monitor::ConnectionMonitor;
use sync::SyncBus;
use trigger::TriggerRegistry;

/// Shared handles every route works with.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthGate>,
    pub stores: ContentStores,
    pub panel: Arc<AdminPanel>,
    pub monitor: Arc<ConnectionMonitor>,
    pub triggers: Arc<Mutex<TriggerRegistry>>,
}

impl AppState {
    /// Wires stores, panel and monitor around one gate and one sync bus.
    /// Stores are created unmounted.
    pub fn new(
        remote: Remote,
        blobs: Option<Arc<dyn BlobStore>>,
        users: UserDirectory,
        health_timeout: Duration,
    ) -> Self {
        let gate = remote.gate().clone();
        let stores = ContentStores::new(remote.clone(), SyncBus::new());
        let images = ImageStorage::new(blobs, gate.clone());
        let panel = Arc::new(AdminPanel::new(
            gate.clone(),
            stores.clone(),
            Arc::new(users),
            images,
        ));
        let monitor = Arc::new(ConnectionMonitor::new(remote.table_store(), health_timeout));

        Self {
            gate,
            stores,
            panel,
            monitor,
            triggers: Arc::new(Mutex::new(TriggerRegistry::default())),
        }
    }
}

/// Configure CORS from environment variables.
/// Uses ALLOWED_ORIGINS (comma-separated) or FRONTEND_ORIGIN.
/// Falls back to the local Vite dev server.
pub fn configure_cors() -> CorsLayer {
    let allowed_origins = std::env::var("ALLOWED_ORIGINS")
        .ok()
        .and_then(|s| {
            let origins: Vec<HeaderValue> = s
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                None
            } else {
                Some(origins)
            }
        })
        .or_else(|| {
            std::env::var("FRONTEND_ORIGIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(|origin| vec![origin])
        })
        .unwrap_or_else(|| {
            vec![
                HeaderValue::from_static("http://localhost:5173"),
                HeaderValue::from_static("http://127.0.0.1:5173"),
            ]
        });

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::HeaderName::from_static(routes::admin::CLIENT_ID_HEADER),
        ])
        .allow_credentials(true)
}

/// Create and configure the application router.
pub fn create_app(state: AppState) -> Router {
    let cors = configure_cors();
    tracing::info!("CORS configured");

    Router::new()
        .route("/api/site", get(routes::content::get_site))
        .route("/api/projects", get(routes::content::get_projects))
        .route("/api/testimonials", get(routes::content::get_testimonials))
        .route("/api/talks", get(routes::content::get_talks))
        .route("/api/settings", get(routes::content::get_settings))
        .route("/api/trigger", post(routes::admin::press_key))
        .route("/api/admin/login", post(routes::admin::login))
        .route("/api/admin/logout", post(routes::admin::logout))
        .route("/api/admin/session", get(routes::admin::session))
        .route(
            "/api/admin/panel",
            get(routes::admin::get_panel).put(routes::admin::update_panel),
        )
        .route("/api/admin/projects", post(routes::admin::create_project))
        .route(
            "/api/admin/projects/{id}",
            axum::routing::put(routes::admin::update_project).delete(routes::admin::delete_project),
        )
        .route(
            "/api/admin/testimonials",
            post(routes::admin::create_testimonial),
        )
        .route(
            "/api/admin/testimonials/{id}",
            axum::routing::put(routes::admin::update_testimonial)
                .delete(routes::admin::delete_testimonial),
        )
        .route("/api/admin/talks", post(routes::admin::create_talk))
        .route(
            "/api/admin/talks/{id}",
            axum::routing::put(routes::admin::update_talk).delete(routes::admin::delete_talk),
        )
        .route("/api/admin/settings", patch(routes::admin::update_settings))
        .route(
            "/api/admin/users",
            get(routes::admin::list_users).post(routes::admin::create_user),
        )
        .route(
            "/api/admin/users/{id}",
            patch(routes::admin::update_user).delete(routes::admin::delete_user),
        )
        .route(
            "/api/admin/upload",
            post(routes::upload::upload_image)
                .delete(routes::upload::delete_image)
                .layer(DefaultBodyLimit::max(routes::upload::UPLOAD_BODY_LIMIT)),
        )
        .route("/health", get(routes::health::health_ping))
        .route("/health/detailed", get(routes::health::health_detailed))
        .route("/health/ready", get(routes::health::health_ready))
        .route("/health/supabase", get(routes::health::health_supabase))
        .with_state(state)
        .layer(logging::middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(logging::middleware::log_request))
        .layer(logging::middleware::request_id_layer())
        .layer(TraceLayer::new_for_http())
        // Compress responses with gzip/br automatically
        .layer(CompressionLayer::new())
        // Global cap sized for the largest image upload
        .layer(RequestBodyLimitLayer::new(routes::upload::UPLOAD_BODY_LIMIT))
        .layer(cors)
}

/// Run the server (used by main).
pub async fn run() {
    let config = Config::from_env().expect("Invalid configuration");

    // Guards MUST be held for the programme's lifetime; dropping them early
    // shuts down background log-writer threads and loses buffered log lines.
    let _log_guards = logging::init(&config.environment);

    routes::health::init_start_time();

    if config.is_production() {
        let password_from_env =
            std::env::var("ADMIN_PASSWORD_HASH").is_ok() || std::env::var("ADMIN_PASSWORD").is_ok();
        if !password_from_env {
            tracing::warn!(
                "SECURITY: Neither ADMIN_PASSWORD_HASH nor ADMIN_PASSWORD is set. \
                 The built-in default password is in use. \
                 Set ADMIN_PASSWORD_HASH to a bcrypt hash of a strong password."
            );
        } else if std::env::var("ADMIN_PASSWORD").as_deref() == Ok(DEFAULT_ADMIN_PASSWORD) {
            tracing::warn!("SECURITY: ADMIN_PASSWORD is set to the built-in default.");
        }
        if config.turnstile_secret.is_none() {
            tracing::warn!(
                "SECURITY: TURNSTILE_SECRET_KEY is not set. \
                 Login only checks that a challenge token is present."
            );
        }
    }

    let storage: Arc<dyn KeyValueStore> = Arc::new(
        FileStorage::open(&config.storage_path).expect("Failed to open session storage"),
    );

    let challenge: Arc<dyn ChallengeVerifier> = match &config.turnstile_secret {
        Some(secret) => Arc::new(TurnstileChallenge::new(secret.clone())),
        None => Arc::new(PresenceChallenge),
    };
    let gate = Arc::new(AuthGate::new(
        storage.clone(),
        CredentialVerifier::new(&config.admin),
        challenge,
    ));

    let (table_store, blobs) = match &config.supabase {
        Some(supabase) => {
            tracing::info!("Supabase configured at {}", supabase.url);
            let table_store: Arc<dyn TableStore> = Arc::new(PostgrestClient::new(supabase));
            let blobs: Arc<dyn BlobStore> = Arc::new(SupabaseStorage::new(supabase));
            (Some(table_store), Some(blobs))
        }
        None => {
            tracing::warn!(
                "SUPABASE_URL / SUPABASE_ANON_KEY not set. Serving built-in fallback content."
            );
            (None, None)
        }
    };

    let users = UserDirectory::new(storage, config.admin.clone());
    let state = AppState::new(
        Remote::new(table_store, gate),
        blobs,
        users,
        config.health_timeout,
    );

    state.stores.mount_all().await;
    state.stores.spawn_auto_refresh(config.auto_refresh_interval);
    state.monitor.spawn_polling(config.health_poll_interval);

    let app = create_app(state);

    let addr = config.bind_address;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app).await.expect("Server error");
}
