//! Generic fetch-on-mount store, one instance per resource.
//!
//! A [`Store`] keeps `{ data, loading, error }` for one [`Source`], re-fetches
//! whenever the shared [`SyncBus`] fires, and wraps the gateway mutations so
//! that a successful write refreshes this store and then notifies every other.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{Subscription, SyncBus};
use crate::gateway::models::{Resource, SiteSettings, SiteSettingsPatch};
use crate::gateway::{GatewayError, ResourceGateway, SettingsGateway};

#[async_trait]
pub trait Source: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    async fn load(&self) -> Result<Self::Output, GatewayError>;

    /// Shown while the real data is unavailable.
    fn fallback(&self) -> Self::Output;
}

#[async_trait]
impl<R: Resource> Source for ResourceGateway<R> {
    type Output = Vec<R>;

    fn name(&self) -> &'static str {
        R::TABLE
    }

    async fn load(&self) -> Result<Vec<R>, GatewayError> {
        self.get_all().await
    }

    fn fallback(&self) -> Vec<R> {
        R::fallback()
    }
}

#[async_trait]
impl Source for SettingsGateway {
    type Output = SiteSettings;

    fn name(&self) -> &'static str {
        "site_settings"
    }

    async fn load(&self) -> Result<SiteSettings, GatewayError> {
        self.get().await
    }

    fn fallback(&self) -> SiteSettings {
        SiteSettings::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceState<T> {
    pub data: T,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct Store<S: Source> {
    source: S,
    bus: SyncBus,
    state: RwLock<ResourceState<S::Output>>,
    // Stamp of the newest fetch; older responses are dropped.
    generation: AtomicU64,
    applied: watch::Sender<u64>,
    subscription: Mutex<Option<Subscription>>,
}

impl<S: Source> Store<S> {
    pub fn new(source: S, bus: SyncBus) -> Arc<Self> {
        let data = source.fallback();
        let (applied, _) = watch::channel(0);
        Arc::new(Self {
            source,
            bus,
            state: RwLock::new(ResourceState {
                data,
                loading: true,
                error: None,
            }),
            generation: AtomicU64::new(0),
            applied,
            subscription: Mutex::new(None),
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn bus(&self) -> &SyncBus {
        &self.bus
    }

    /// Subscribes to the bus, then performs the initial fetch.
    pub async fn mount(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = tokio::runtime::Handle::current();
        let subscription = self.bus.subscribe(move || {
            if let Some(store) = weak.upgrade() {
                handle.spawn(async move {
                    store.refresh().await;
                });
            }
        });
        *self.subscription.lock().unwrap_or_else(|e| e.into_inner()) = Some(subscription);

        self.refresh().await;
    }

    /// Stops reacting to bus notifications.
    pub fn unmount(&self) {
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Fetches from the source. Failures leave the fallback plus an error.
    pub async fn refresh(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .loading = true;

        let result = self.source.load().await;

        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if self.generation.load(Ordering::SeqCst) != generation {
                tracing::debug!(
                    source = self.source.name(),
                    generation,
                    "discarding superseded fetch"
                );
                return;
            }
            match result {
                Ok(data) => {
                    state.data = data;
                    state.error = None;
                }
                Err(e) => {
                    tracing::warn!(source = self.source.name(), error = %e, "fetch failed, using fallback");
                    state.data = self.source.fallback();
                    state.error = Some(e.to_string());
                }
            }
            state.loading = false;
        }
        self.applied.send_modify(|count| *count += 1);
    }

    pub fn snapshot(&self) -> ResourceState<S::Output> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn data(&self) -> S::Output {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .data
            .clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .error
            .clone()
    }

    /// Bumped after every applied fetch.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.applied.subscribe()
    }

    /// Periodic re-fetch; stops once the store is dropped.
    pub fn spawn_auto_refresh(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(store) => store.refresh().await,
                    None => break,
                }
            }
        })
    }

    async fn after_mutation(&self) {
        self.refresh().await;
        self.bus.notify();
    }
}

impl<R: Resource> Store<ResourceGateway<R>> {
    pub async fn add(&self, new: &R::New) -> Result<R, GatewayError> {
        let created = self.source.create(new).await?;
        self.after_mutation().await;
        Ok(created)
    }

    pub async fn update(&self, id: i64, patch: &R::Patch) -> Result<R, GatewayError> {
        let updated = self.source.update(id, patch).await?;
        self.after_mutation().await;
        Ok(updated)
    }

    pub async fn remove(&self, id: i64) -> Result<bool, GatewayError> {
        let removed = self.source.delete(id).await?;
        self.after_mutation().await;
        Ok(removed)
    }
}

impl Store<SettingsGateway> {
    pub async fn update(&self, patch: &SiteSettingsPatch) -> Result<SiteSettings, GatewayError> {
        let updated = self.source.update(patch).await?;
        self.after_mutation().await;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::tests::test_gate;
    use crate::gateway::memory::MemoryTableStore;
    use crate::gateway::models::{NewProject, NewTalk, Project, ProjectPatch, Talk};
    use crate::gateway::tests::logged_in_remote;
    use crate::gateway::Remote;
    use std::collections::VecDeque;

    /// Source replaying scripted `(delay, result)` pairs.
    struct Scripted {
        script: Mutex<VecDeque<(Duration, Result<String, u16>)>>,
    }

    impl Scripted {
        fn new(steps: Vec<(u64, Result<&str, u16>)>) -> Self {
            Self {
                script: Mutex::new(
                    steps
                        .into_iter()
                        .map(|(ms, r)| (Duration::from_millis(ms), r.map(str::to_string)))
                        .collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl Source for Scripted {
        type Output = String;

        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn load(&self) -> Result<String, GatewayError> {
            let step = self.script.lock().unwrap().pop_front();
            let (delay, result) = step.unwrap_or((Duration::ZERO, Ok("exhausted".to_string())));
            tokio::time::sleep(delay).await;
            result.map_err(|status| GatewayError::Remote {
                status,
                message: "scripted failure".to_string(),
            })
        }

        fn fallback(&self) -> String {
            "fallback".to_string()
        }
    }

    fn new_project(title: &str) -> NewProject {
        NewProject {
            title: title.to_string(),
            description: "d".to_string(),
            tech: vec![],
            image_url: None,
        }
    }

    async fn wait_for_fetch(rx: &mut watch::Receiver<u64>) {
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("store did not re-fetch in time")
            .unwrap();
    }

    #[tokio::test]
    async fn test_unconfigured_fetch_serves_fallback_with_error() {
        let (gate, _) = test_gate(Arc::new(ManualClock::new(chrono::Utc::now())));
        let remote = Remote::new(None, Arc::new(gate));
        let bus = SyncBus::new();
        let projects = Store::new(ResourceGateway::<Project>::new(remote.clone()), bus.clone());
        let settings = Store::new(SettingsGateway::new(remote), bus);

        projects.mount().await;
        settings.mount().await;

        let state = projects.snapshot();
        assert!(state.data.is_empty());
        assert!(!state.loading);
        assert!(state.error.unwrap().contains("not configured"));
        assert_eq!(settings.data(), SiteSettings::default());
        assert!(settings.error().is_some());
    }

    #[tokio::test]
    async fn test_failed_fetch_replaces_data_with_fallback() {
        let store = Store::new(
            Scripted::new(vec![(0, Ok("live")), (0, Err(503))]),
            SyncBus::new(),
        );
        store.refresh().await;
        assert_eq!(store.data(), "live");

        store.refresh().await;
        let state = store.snapshot();
        assert_eq!(state.data, "fallback");
        assert!(!state.loading);
        assert!(state.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_superseded_fetch_cannot_overwrite_newer_state() {
        let store = Store::new(
            Scripted::new(vec![(200, Ok("stale")), (10, Ok("fresh"))]),
            SyncBus::new(),
        );

        let slow = store.clone();
        let fast = store.clone();
        tokio::join!(
            async move { slow.refresh().await },
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                fast.refresh().await;
            }
        );

        let state = store.snapshot();
        assert_eq!(state.data, "fresh");
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_create_notifies_once_and_every_store_refetches() {
        let (remote, _) = logged_in_remote().await;
        let bus = SyncBus::new();
        let projects = Store::new(ResourceGateway::<Project>::new(remote.clone()), bus.clone());
        let talks = Store::new(ResourceGateway::<Talk>::new(remote.clone()), bus.clone());
        projects.mount().await;
        talks.mount().await;

        // Talk row written behind the stores' back; only a re-fetch reveals it.
        ResourceGateway::<Talk>::new(remote)
            .create(&NewTalk {
                title: "RustConf".to_string(),
                description: "talk".to_string(),
                tags: vec!["rust".to_string()],
                image_url: None,
            })
            .await
            .unwrap();
        assert!(talks.data().is_empty());

        let mut talks_rx = talks.watch();
        talks_rx.borrow_and_update();
        projects.add(&new_project("X")).await.unwrap();

        assert_eq!(bus.notifications(), 1);
        assert!(projects.data().iter().any(|p| p.title == "X"));
        wait_for_fetch(&mut talks_rx).await;
        assert_eq!(talks.data().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_state_and_skips_notify() {
        let (remote, store) = logged_in_remote().await;
        let bus = SyncBus::new();
        // Unmounted, so no background re-fetch can race the assertions.
        let projects = Store::new(ResourceGateway::<Project>::new(remote), bus.clone());
        projects.add(&new_project("kept")).await.unwrap();
        let before = projects.snapshot();

        store.set_offline(true);
        let result = projects
            .update(
                before.data[0].id,
                &ProjectPatch {
                    title: Some("lost".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(GatewayError::Remote { status: 503, .. })));
        assert_eq!(projects.snapshot(), before);
        assert_eq!(bus.notifications(), 1);
    }

    #[tokio::test]
    async fn test_unmounted_store_ignores_notifications() {
        let (remote, _) = logged_in_remote().await;
        let bus = SyncBus::new();
        let projects = Store::new(ResourceGateway::<Project>::new(remote), bus.clone());
        projects.mount().await;
        assert!(projects.is_mounted());
        assert_eq!(bus.subscriber_count(), 1);

        projects.unmount();
        assert!(!projects.is_mounted());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_store_releases_subscription() {
        let store = Arc::new(MemoryTableStore::new());
        let (gate, _) = test_gate(Arc::new(ManualClock::new(chrono::Utc::now())));
        let remote = Remote::new(Some(store), Arc::new(gate));
        let bus = SyncBus::new();
        {
            let projects = Store::new(ResourceGateway::<Project>::new(remote), bus.clone());
            projects.mount().await;
        }
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.notify(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_ticks() {
        let store = Store::new(
            Scripted::new(vec![(0, Ok("one")), (0, Ok("two"))]),
            SyncBus::new(),
        );
        store.refresh().await;
        let mut rx = store.watch();
        rx.borrow_and_update();

        let task = store.spawn_auto_refresh(Duration::from_secs(30));
        tokio::time::advance(Duration::from_secs(31)).await;
        rx.changed().await.unwrap();
        assert_eq!(store.data(), "two");
        task.abort();
    }
}
