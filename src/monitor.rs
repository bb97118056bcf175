/*!
 * Connection Monitor
 * Polls the hosted table store and keeps a user-facing status
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::gateway::{GatewayError, TableStore};

/// Walkthrough linked from the status banner when the store is unreachable.
pub const HELP_URL: &str = "https://supabase.com/docs/guides/getting-started/quickstarts/reactjs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Checking,
    Connected,
    Disconnected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    fn checking() -> Self {
        Self {
            state: ConnectionState::Checking,
            message: "Checking connection to Supabase...".to_string(),
            help_url: None,
            response_time: None,
            checked_at: None,
        }
    }

    fn failed(state: ConnectionState, message: String) -> Self {
        Self {
            state,
            message,
            help_url: Some(HELP_URL.to_string()),
            response_time: None,
            checked_at: Some(Utc::now()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

pub struct ConnectionMonitor {
    store: Option<Arc<dyn TableStore>>,
    timeout: Duration,
    status: watch::Sender<ConnectionStatus>,
}

impl ConnectionMonitor {
    pub fn new(store: Option<Arc<dyn TableStore>>, timeout: Duration) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::checking());
        Self {
            store,
            timeout,
            status,
        }
    }

    /// Last published status.
    pub fn current(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Probes the store once and publishes the outcome.
    pub async fn check(&self) -> ConnectionStatus {
        let Some(store) = &self.store else {
            let status = ConnectionStatus::failed(
                ConnectionState::Disconnected,
                GatewayError::NotConfigured.to_string(),
            );
            self.status.send_replace(status.clone());
            return status;
        };

        self.status.send_modify(|s| s.state = ConnectionState::Checking);
        let start = Instant::now();
        let status = match tokio::time::timeout(self.timeout, store.ping()).await {
            Ok(Ok(())) => ConnectionStatus {
                state: ConnectionState::Connected,
                message: "Connected to Supabase".to_string(),
                help_url: None,
                response_time: Some(start.elapsed().as_millis() as u64),
                checked_at: Some(Utc::now()),
            },
            Ok(Err(GatewayError::Transport(e))) => ConnectionStatus::failed(
                ConnectionState::Disconnected,
                format!("Cannot reach Supabase: {}", e),
            ),
            Ok(Err(e)) => ConnectionStatus::failed(ConnectionState::Error, e.to_string()),
            Err(_) => ConnectionStatus::failed(
                ConnectionState::Disconnected,
                format!("Supabase did not answer within {}s", self.timeout.as_secs()),
            ),
        };

        match status.state {
            ConnectionState::Connected => tracing::debug!("Supabase connection ok"),
            _ => tracing::warn!("Supabase connection check failed: {}", status.message),
        }
        self.status.send_replace(status.clone());
        status
    }

    pub fn spawn_polling(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let monitor = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match monitor.upgrade() {
                    Some(monitor) => {
                        monitor.check().await;
                    }
                    None => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryTableStore;
    use async_trait::async_trait;
    use serde_json::{Map, Value};

    /// Store whose ping never completes in time.
    struct Stalled;

    #[async_trait]
    impl TableStore for Stalled {
        async fn select_all(&self, _: &str) -> Result<Vec<Value>, GatewayError> {
            Ok(vec![])
        }
        async fn select_by_id(&self, _: &str, _: i64) -> Result<Option<Value>, GatewayError> {
            Ok(None)
        }
        async fn insert(&self, _: &str, row: Map<String, Value>) -> Result<Value, GatewayError> {
            Ok(Value::Object(row))
        }
        async fn update(
            &self,
            _: &str,
            _: i64,
            _: Map<String, Value>,
        ) -> Result<Option<Value>, GatewayError> {
            Ok(None)
        }
        async fn delete(&self, _: &str, _: i64) -> Result<bool, GatewayError> {
            Ok(false)
        }
        async fn ping(&self) -> Result<(), GatewayError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[test]
    fn test_initial_status_is_checking() {
        let monitor = ConnectionMonitor::new(None, Duration::from_secs(5));
        assert_eq!(monitor.current().state, ConnectionState::Checking);
    }

    #[tokio::test]
    async fn test_unconfigured_is_disconnected_with_help() {
        let monitor = ConnectionMonitor::new(None, Duration::from_secs(5));
        let status = monitor.check().await;
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.help_url.as_deref(), Some(HELP_URL));
        assert_eq!(monitor.current(), status);
    }

    #[tokio::test]
    async fn test_reachable_store_is_connected() {
        let monitor = ConnectionMonitor::new(
            Some(Arc::new(MemoryTableStore::new())),
            Duration::from_secs(5),
        );
        let status = monitor.check().await;
        assert!(status.is_connected());
        assert!(status.help_url.is_none());
        assert!(status.response_time.is_some());
    }

    #[tokio::test]
    async fn test_remote_rejection_is_error() {
        let store = Arc::new(MemoryTableStore::new());
        store.set_offline(true);
        let monitor = ConnectionMonitor::new(Some(store), Duration::from_secs(5));
        let status = monitor.check().await;
        assert_eq!(status.state, ConnectionState::Error);
        assert!(status.message.contains("503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out() {
        let monitor = ConnectionMonitor::new(Some(Arc::new(Stalled)), Duration::from_secs(5));
        let status = monitor.check().await;
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.message.contains("5s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_publishes_updates() {
        let store = Arc::new(MemoryTableStore::new());
        let monitor = Arc::new(ConnectionMonitor::new(
            Some(store.clone()),
            Duration::from_secs(5),
        ));
        let mut rx = monitor.subscribe();
        let task = monitor.spawn_polling(Duration::from_secs(30));

        rx.wait_for(|s| s.is_connected()).await.unwrap();
        store.set_offline(true);
        rx.wait_for(|s| s.state == ConnectionState::Error).await.unwrap();
        assert!(store.calls() >= 2);
        task.abort();
    }
}
