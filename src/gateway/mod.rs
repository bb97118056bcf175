/*!
 * Remote Data Gateway
 * Resource-typed CRUD over the hosted table store, plus blob storage
 */
pub mod memory;
pub mod models;
pub mod postgrest;
pub mod storage;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::auth::AuthGate;
use models::{Resource, SiteSettings, SiteSettingsPatch, SETTINGS_ID, SETTINGS_TABLE};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Supabase is not configured. Set SUPABASE_URL and SUPABASE_ANON_KEY.")]
    NotConfigured,
    #[error("Not authenticated. Please log in as admin.")]
    Unauthenticated,
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: i64 },
    #[error("Remote store rejected the request (HTTP {status}): {message}")]
    Remote { status: u16, message: String },
    #[error("Request to remote store failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Unexpected data from remote store: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{0}")]
    InvalidUpload(String),
}

/// One connection pool shared by the table and blob clients.
pub(crate) static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

// ============================================================================
// Table store seam
// ============================================================================

/// Row-level operations on a hosted table. Rows travel as JSON objects.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// All rows, newest `created_at` first.
    async fn select_all(&self, table: &str) -> Result<Vec<Value>, GatewayError>;

    async fn select_by_id(&self, table: &str, id: i64) -> Result<Option<Value>, GatewayError>;

    /// Returns the stored row with its generated id and timestamps.
    async fn insert(&self, table: &str, row: Map<String, Value>) -> Result<Value, GatewayError>;

    /// `None` when no row has that id.
    async fn update(
        &self,
        table: &str,
        id: i64,
        patch: Map<String, Value>,
    ) -> Result<Option<Value>, GatewayError>;

    /// `true` when a row was removed.
    async fn delete(&self, table: &str, id: i64) -> Result<bool, GatewayError>;

    /// Cheapest possible round-trip, used by the connection monitor.
    async fn ping(&self) -> Result<(), GatewayError>;
}

fn to_fields<T: Serialize>(value: &T) -> Result<Map<String, Value>, GatewayError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, GatewayError> {
    Ok(serde_json::from_value(value)?)
}

fn stamp_updated_at(fields: &mut Map<String, Value>) {
    fields.insert("updated_at".to_string(), Value::String(Utc::now().to_rfc3339()));
}

/// Configured store plus the gate every mutation re-checks.
#[derive(Clone)]
pub struct Remote {
    store: Option<Arc<dyn TableStore>>,
    gate: Arc<AuthGate>,
}

impl Remote {
    /// `store` is `None` when the environment is not configured.
    pub fn new(store: Option<Arc<dyn TableStore>>, gate: Arc<AuthGate>) -> Self {
        Self { store, gate }
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    pub fn table_store(&self) -> Option<Arc<dyn TableStore>> {
        self.store.clone()
    }

    pub fn gate(&self) -> &Arc<AuthGate> {
        &self.gate
    }

    fn store(&self) -> Result<&Arc<dyn TableStore>, GatewayError> {
        self.store.as_ref().ok_or(GatewayError::NotConfigured)
    }

    /// Configuration first, then the session; nothing is sent when either fails.
    fn writable_store(&self) -> Result<&Arc<dyn TableStore>, GatewayError> {
        let store = self.store()?;
        self.gate
            .require_session()
            .map_err(|_| GatewayError::Unauthenticated)?;
        Ok(store)
    }
}

// ============================================================================
// Collections
// ============================================================================

pub struct ResourceGateway<R: Resource> {
    remote: Remote,
    _resource: PhantomData<fn() -> R>,
}

impl<R: Resource> Clone for ResourceGateway<R> {
    fn clone(&self) -> Self {
        Self {
            remote: self.remote.clone(),
            _resource: PhantomData,
        }
    }
}

impl<R: Resource> ResourceGateway<R> {
    pub fn new(remote: Remote) -> Self {
        Self {
            remote,
            _resource: PhantomData,
        }
    }

    pub async fn get_all(&self) -> Result<Vec<R>, GatewayError> {
        let store = self.remote.store().inspect_err(|e| {
            tracing::warn!("Cannot fetch {}: {}", R::TABLE, e);
        })?;
        tracing::debug!("Fetching {}...", R::TABLE);

        let rows = store.select_all(R::TABLE).await.inspect_err(|e| {
            tracing::error!("Error fetching {}: {}", R::TABLE, e);
        })?;
        let items = rows
            .into_iter()
            .map(decode::<R>)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!("Fetched {} {}", items.len(), R::TABLE);
        Ok(items)
    }

    pub async fn create(&self, new: &R::New) -> Result<R, GatewayError> {
        let store = self.remote.writable_store().inspect_err(|e| {
            tracing::warn!("Refusing to create {}: {}", R::LABEL, e);
        })?;
        tracing::info!("Creating {}...", R::LABEL);

        let row = store
            .insert(R::TABLE, to_fields(new)?)
            .await
            .inspect_err(|e| tracing::error!("Error creating {}: {}", R::LABEL, e))?;
        let created: R = decode(row)?;

        tracing::info!("Created {} {}", R::LABEL, created.id());
        Ok(created)
    }

    /// Sends only the fields set in `patch`; an empty patch reads the row back.
    pub async fn update(&self, id: i64, patch: &R::Patch) -> Result<R, GatewayError> {
        let store = self.remote.writable_store().inspect_err(|e| {
            tracing::warn!("Refusing to update {} {}: {}", R::LABEL, id, e);
        })?;
        let mut fields = to_fields(patch)?;

        let row = if fields.is_empty() {
            tracing::debug!("Empty patch for {} {}, reading current row", R::LABEL, id);
            store.select_by_id(R::TABLE, id).await?
        } else {
            tracing::info!("Updating {} {} ({} fields)...", R::LABEL, id, fields.len());
            stamp_updated_at(&mut fields);
            store.update(R::TABLE, id, fields).await?
        };

        let row = row.ok_or(GatewayError::NotFound {
            resource: R::LABEL,
            id,
        })?;
        decode(row)
    }

    pub async fn delete(&self, id: i64) -> Result<bool, GatewayError> {
        let store = self.remote.writable_store().inspect_err(|e| {
            tracing::warn!("Refusing to delete {} {}: {}", R::LABEL, id, e);
        })?;
        tracing::info!("Deleting {} {}...", R::LABEL, id);

        let removed = store
            .delete(R::TABLE, id)
            .await
            .inspect_err(|e| tracing::error!("Error deleting {} {}: {}", R::LABEL, id, e))?;
        if !removed {
            tracing::warn!("Delete matched no {} with id {}", R::LABEL, id);
        }
        Ok(removed)
    }
}

// ============================================================================
// Settings singleton
// ============================================================================

#[derive(Clone)]
pub struct SettingsGateway {
    remote: Remote,
}

impl SettingsGateway {
    pub fn new(remote: Remote) -> Self {
        Self { remote }
    }

    pub async fn get(&self) -> Result<SiteSettings, GatewayError> {
        let store = self.remote.store()?;
        tracing::debug!("Fetching site settings...");
        let row = store
            .select_by_id(SETTINGS_TABLE, SETTINGS_ID)
            .await
            .inspect_err(|e| tracing::error!("Error fetching site settings: {}", e))?
            .ok_or(GatewayError::NotFound {
                resource: "site settings",
                id: SETTINGS_ID,
            })?;
        decode(row)
    }

    pub async fn update(&self, patch: &SiteSettingsPatch) -> Result<SiteSettings, GatewayError> {
        let store = self.remote.writable_store().inspect_err(|e| {
            tracing::warn!("Refusing to update site settings: {}", e);
        })?;
        let mut fields = to_fields(patch)?;

        let row = if fields.is_empty() {
            store.select_by_id(SETTINGS_TABLE, SETTINGS_ID).await?
        } else {
            tracing::info!("Updating site settings ({} fields)...", fields.len());
            stamp_updated_at(&mut fields);
            store.update(SETTINGS_TABLE, SETTINGS_ID, fields).await?
        };

        let row = row.ok_or(GatewayError::NotFound {
            resource: "site settings",
            id: SETTINGS_ID,
        })?;
        decode(row)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::memory::MemoryTableStore;
    use super::models::{NewProject, Project, ProjectPatch};
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::tests::{test_gate, PASSWORD, USERNAME};

    pub(crate) async fn logged_in_remote() -> (Remote, Arc<MemoryTableStore>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (gate, _) = test_gate(clock);
        gate.login(USERNAME, PASSWORD, "ok").await.unwrap();
        let store = Arc::new(MemoryTableStore::new());
        (Remote::new(Some(store.clone()), Arc::new(gate)), store)
    }

    fn new_project(title: &str) -> NewProject {
        NewProject {
            title: title.to_string(),
            description: "desc".to_string(),
            tech: vec!["Rust".to_string()],
            image_url: None,
        }
    }

    #[tokio::test]
    async fn test_unconfigured_calls_fail_before_any_request() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (gate, _) = test_gate(clock);
        let gateway = ResourceGateway::<Project>::new(Remote::new(None, Arc::new(gate)));

        assert!(matches!(gateway.get_all().await, Err(GatewayError::NotConfigured)));
        assert!(matches!(
            gateway.create(&new_project("X")).await,
            Err(GatewayError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_unauthenticated_mutation_never_reaches_store() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (gate, _) = test_gate(clock);
        let store = Arc::new(MemoryTableStore::new());
        let gateway =
            ResourceGateway::<Project>::new(Remote::new(Some(store.clone()), Arc::new(gate)));

        let created = gateway.create(&new_project("X")).await;
        let updated = gateway.update(1, &ProjectPatch::default()).await;
        let deleted = gateway.delete(1).await;

        assert!(matches!(created, Err(GatewayError::Unauthenticated)));
        assert!(matches!(updated, Err(GatewayError::Unauthenticated)));
        assert!(matches!(deleted, Err(GatewayError::Unauthenticated)));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_create_then_get_all_includes_row() {
        let (remote, _) = logged_in_remote().await;
        let gateway = ResourceGateway::<Project>::new(remote);

        let created = gateway.create(&new_project("X")).await.unwrap();
        assert!(created.id > 0);

        let all = gateway.get_all().await.unwrap();
        assert!(all.iter().any(|p| p.title == "X" && p.id == created.id));
    }

    #[tokio::test]
    async fn test_get_all_orders_newest_first() {
        let (remote, _) = logged_in_remote().await;
        let gateway = ResourceGateway::<Project>::new(remote);
        gateway.create(&new_project("first")).await.unwrap();
        gateway.create(&new_project("second")).await.unwrap();

        let titles: Vec<String> = gateway
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(titles, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_empty_patch_leaves_row_unchanged() {
        let (remote, store) = logged_in_remote().await;
        let gateway = ResourceGateway::<Project>::new(remote);
        let created = gateway.create(&new_project("X")).await.unwrap();
        let writes = store.writes();

        let same = gateway.update(created.id, &ProjectPatch::default()).await.unwrap();

        assert_eq!(same, created);
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn test_sparse_patch_changes_only_given_fields() {
        let (remote, _) = logged_in_remote().await;
        let gateway = ResourceGateway::<Project>::new(remote);
        let created = gateway.create(&new_project("X")).await.unwrap();

        let patch = ProjectPatch {
            description: Some("updated".to_string()),
            ..Default::default()
        };
        let updated = gateway.update(created.id, &patch).await.unwrap();

        assert_eq!(updated.title, "X");
        assert_eq!(updated.description, "updated");
        assert_eq!(updated.tech, created.tech);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_not_found() {
        let (remote, _) = logged_in_remote().await;
        let gateway = ResourceGateway::<Project>::new(remote);
        let patch = ProjectPatch {
            title: Some("Y".to_string()),
            ..Default::default()
        };
        let result = gateway.update(404, &patch).await;
        assert!(matches!(
            result,
            Err(GatewayError::NotFound { resource: "project", id: 404 })
        ));
    }

    #[tokio::test]
    async fn test_delete_reports_removal() {
        let (remote, _) = logged_in_remote().await;
        let gateway = ResourceGateway::<Project>::new(remote);
        let created = gateway.create(&new_project("X")).await.unwrap();

        assert!(gateway.delete(created.id).await.unwrap());
        assert!(!gateway.delete(created.id).await.unwrap());
        assert!(gateway.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settings_get_and_update() {
        let (remote, store) = logged_in_remote().await;
        store.seed_row(
            SETTINGS_TABLE,
            serde_json::to_value(SiteSettings::default()).unwrap(),
        );
        let gateway = SettingsGateway::new(remote);

        let settings = gateway.get().await.unwrap();
        assert_eq!(settings.id, SETTINGS_ID);

        let patch = SiteSettingsPatch {
            hero_title: Some("Hello".to_string()),
            ..Default::default()
        };
        let updated = gateway.update(&patch).await.unwrap();
        assert_eq!(updated.hero_title, "Hello");
        assert_eq!(updated.site_title, settings.site_title);

        let unchanged = gateway.update(&SiteSettingsPatch::default()).await.unwrap();
        assert_eq!(unchanged.hero_title, "Hello");
    }

    #[tokio::test]
    async fn test_settings_missing_row_is_not_found() {
        let (remote, _) = logged_in_remote().await;
        let gateway = SettingsGateway::new(remote);
        assert!(matches!(
            gateway.get().await,
            Err(GatewayError::NotFound { id: SETTINGS_ID, .. })
        ));
    }
}
