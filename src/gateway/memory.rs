//! In-process table store with generated ids and timestamps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{GatewayError, TableStore};

#[derive(Default)]
struct Table {
    next_id: i64,
    rows: Vec<Map<String, Value>>,
}

#[derive(Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<String, Table>>,
    calls: AtomicUsize,
    writes: AtomicUsize,
    offline: AtomicBool,
}

fn row_id(row: &Map<String, Value>) -> Option<i64> {
    row.get("id").and_then(Value::as_i64)
}

fn created_at(row: &Map<String, Value>) -> Option<DateTime<Utc>> {
    row.get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a row as-is (keeping its id), bypassing call counters.
    pub fn seed_row(&self, table: &str, row: Value) {
        if let Value::Object(row) = row {
            let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
            let table = tables.entry(table.to_string()).or_default();
            if let Some(id) = row_id(&row) {
                table.next_id = table.next_id.max(id);
            }
            table.rows.push(row);
        }
    }

    /// Every operation, reads included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// While offline every operation fails with HTTP 503.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn enter(&self, write: bool) -> Result<(), GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::Remote {
                status: 503,
                message: "table store offline".to_string(),
            });
        }
        if write {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn select_all(&self, table: &str) -> Result<Vec<Value>, GatewayError> {
        self.enter(false)?;
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<Map<String, Value>> = tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default();
        rows.sort_by(|a, b| {
            created_at(b)
                .cmp(&created_at(a))
                .then_with(|| row_id(b).cmp(&row_id(a)))
        });
        Ok(rows.into_iter().map(Value::Object).collect())
    }

    async fn select_by_id(&self, table: &str, id: i64) -> Result<Option<Value>, GatewayError> {
        self.enter(false)?;
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .get(table)
            .and_then(|t| t.rows.iter().find(|r| row_id(r) == Some(id)))
            .cloned()
            .map(Value::Object))
    }

    async fn insert(&self, table: &str, mut row: Map<String, Value>) -> Result<Value, GatewayError> {
        self.enter(true)?;
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let table = tables.entry(table.to_string()).or_default();

        table.next_id += 1;
        let now = Value::String(Utc::now().to_rfc3339());
        row.insert("id".to_string(), Value::from(table.next_id));
        row.entry("created_at").or_insert_with(|| now.clone());
        row.entry("updated_at").or_insert(now);

        table.rows.push(row.clone());
        Ok(Value::Object(row))
    }

    async fn update(
        &self,
        table: &str,
        id: i64,
        patch: Map<String, Value>,
    ) -> Result<Option<Value>, GatewayError> {
        self.enter(true)?;
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let Some(row) = tables
            .get_mut(table)
            .and_then(|t| t.rows.iter_mut().find(|r| row_id(r) == Some(id)))
        else {
            return Ok(None);
        };
        for (key, value) in patch {
            if key != "id" {
                row.insert(key, value);
            }
        }
        Ok(Some(Value::Object(row.clone())))
    }

    async fn delete(&self, table: &str, id: i64) -> Result<bool, GatewayError> {
        self.enter(true)?;
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let Some(table) = tables.get_mut(table) else {
            return Ok(false);
        };
        let before = table.rows.len();
        table.rows.retain(|r| row_id(r) != Some(id));
        Ok(table.rows.len() < before)
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        self.enter(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_insert_generates_ids_and_timestamps() {
        let store = MemoryTableStore::new();
        let a = store.insert("talks", obj(json!({ "title": "a" }))).await.unwrap();
        let b = store.insert("talks", obj(json!({ "title": "b" }))).await.unwrap();
        assert_eq!(a["id"], 1);
        assert_eq!(b["id"], 2);
        assert!(a["created_at"].is_string());
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test]
    async fn test_seed_row_keeps_id_and_advances_counter() {
        let store = MemoryTableStore::new();
        store.seed_row("projects", json!({ "id": 10, "title": "seeded" }));
        let next = store.insert("projects", obj(json!({ "title": "n" }))).await.unwrap();
        assert_eq!(next["id"], 11);
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn test_update_never_rewrites_id() {
        let store = MemoryTableStore::new();
        store.insert("projects", obj(json!({ "title": "t" }))).await.unwrap();
        let row = store
            .update("projects", 1, obj(json!({ "id": 99, "title": "u" })))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["id"], 1);
        assert_eq!(row["title"], "u");
    }

    #[tokio::test]
    async fn test_offline_store_fails_every_call() {
        let store = MemoryTableStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.select_all("projects").await,
            Err(GatewayError::Remote { status: 503, .. })
        ));
        assert!(store.ping().await.is_err());
        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }
}
