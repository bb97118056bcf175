//! PostgREST client for the hosted tables (`{url}/rest/v1/{table}`).

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde_json::{Map, Value};

use super::{GatewayError, TableStore};
use crate::config::SupabaseConfig;

pub struct PostgrestClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PostgrestClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self::with_client(super::HTTP_CLIENT.clone(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &SupabaseConfig) -> Self {
        Self {
            client,
            base_url: config.url.clone(),
            api_key: config.anon_key.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        // The public key doubles as the bearer token.
        self.client
            .request(method, format!("{}/rest/v1/{}", self.base_url, path))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
    }

    async fn rows(&self, builder: RequestBuilder) -> Result<Vec<Value>, GatewayError> {
        let response = check(builder.send().await?).await?;
        Ok(response.json::<Vec<Value>>().await?)
    }
}

/// Turns a non-2xx response into `GatewayError::Remote`, keeping the remote message.
async fn check(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                body
            }
        });

    tracing::warn!(status = %status, message = %message, "table store returned error");
    Err(GatewayError::Remote {
        status: status.as_u16(),
        message,
    })
}

fn id_filter(id: i64) -> String {
    format!("eq.{}", id)
}

#[async_trait]
impl TableStore for PostgrestClient {
    async fn select_all(&self, table: &str) -> Result<Vec<Value>, GatewayError> {
        self.rows(
            self.request(Method::GET, table)
                .query(&[("select", "*"), ("order", "created_at.desc")]),
        )
        .await
    }

    async fn select_by_id(&self, table: &str, id: i64) -> Result<Option<Value>, GatewayError> {
        let rows = self
            .rows(
                self.request(Method::GET, table)
                    .query(&[("select", "*".to_string()), ("id", id_filter(id))]),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, table: &str, row: Map<String, Value>) -> Result<Value, GatewayError> {
        let rows = self
            .rows(
                self.request(Method::POST, table)
                    .header("Prefer", "return=representation")
                    .json(&row),
            )
            .await?;
        rows.into_iter().next().ok_or_else(|| GatewayError::Remote {
            status: 200,
            message: format!("insert into {} returned no row", table),
        })
    }

    async fn update(
        &self,
        table: &str,
        id: i64,
        patch: Map<String, Value>,
    ) -> Result<Option<Value>, GatewayError> {
        let rows = self
            .rows(
                self.request(Method::PATCH, table)
                    .query(&[("id", id_filter(id))])
                    .header("Prefer", "return=representation")
                    .json(&patch),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn delete(&self, table: &str, id: i64) -> Result<bool, GatewayError> {
        let rows = self
            .rows(
                self.request(Method::DELETE, table)
                    .query(&[("id", id_filter(id))])
                    .header("Prefer", "return=representation"),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        check(self.request(Method::GET, "").send().await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, Query},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::get,
        Json, Router,
    };
    use serde_json::json;
    use std::collections::HashMap;

    const KEY: &str = "anon-key";

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("apikey").and_then(|v| v.to_str().ok()) == Some(KEY)
            && headers.get("authorization").and_then(|v| v.to_str().ok())
                == Some("Bearer anon-key")
    }

    async fn list(
        Path(table): Path<String>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Invalid API key" })));
        }
        if table != "projects" {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "message": format!("relation {} does not exist", table) })),
            );
        }
        match query.get("id").map(String::as_str) {
            Some("eq.1") => (StatusCode::OK, Json(json!([{ "id": 1, "title": "one" }]))),
            Some(_) => (StatusCode::OK, Json(json!([]))),
            None => {
                assert_eq!(query.get("order").map(String::as_str), Some("created_at.desc"));
                (
                    StatusCode::OK,
                    Json(json!([{ "id": 2, "title": "two" }, { "id": 1, "title": "one" }])),
                )
            }
        }
    }

    async fn insert(
        Path(_table): Path<String>,
        headers: HeaderMap,
        Json(mut row): Json<Map<String, Value>>,
    ) -> impl IntoResponse {
        assert_eq!(
            headers.get("prefer").and_then(|v| v.to_str().ok()),
            Some("return=representation")
        );
        row.insert("id".to_string(), json!(3));
        (StatusCode::CREATED, Json(json!([row])))
    }

    async fn patch(Query(query): Query<HashMap<String, String>>) -> impl IntoResponse {
        if query.get("id").map(String::as_str) == Some("eq.1") {
            Json(json!([{ "id": 1, "title": "patched" }]))
        } else {
            Json(json!([]))
        }
    }

    async fn remove(Query(query): Query<HashMap<String, String>>) -> impl IntoResponse {
        if query.get("id").map(String::as_str) == Some("eq.1") {
            Json(json!([{ "id": 1 }]))
        } else {
            Json(json!([]))
        }
    }

    async fn spawn_postgrest() -> String {
        let app = Router::new()
            .route("/rest/v1/", get(|| async { "{}" }))
            .route(
                "/rest/v1/{table}",
                get(list).post(insert).patch(patch).delete(remove),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(url: String, key: &str) -> PostgrestClient {
        PostgrestClient::new(&SupabaseConfig {
            url,
            anon_key: key.to_string(),
            bucket: "images".to_string(),
        })
    }

    #[tokio::test]
    async fn test_select_all_sends_key_headers_and_order() {
        let client = client(spawn_postgrest().await, KEY);
        let rows = client.select_all("projects").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], 2);
    }

    #[tokio::test]
    async fn test_select_by_id_filters_with_eq() {
        let client = client(spawn_postgrest().await, KEY);
        assert_eq!(client.select_by_id("projects", 1).await.unwrap().unwrap()["title"], "one");
        assert!(client.select_by_id("projects", 5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_returns_representation() {
        let client = client(spawn_postgrest().await, KEY);
        let mut row = Map::new();
        row.insert("title".to_string(), json!("X"));
        let created = client.insert("projects", row).await.unwrap();
        assert_eq!(created["id"], 3);
        assert_eq!(created["title"], "X");
    }

    #[tokio::test]
    async fn test_update_and_delete_report_missing_rows() {
        let client = client(spawn_postgrest().await, KEY);
        let mut patch = Map::new();
        patch.insert("title".to_string(), json!("patched"));
        assert!(client.update("projects", 1, patch.clone()).await.unwrap().is_some());
        assert!(client.update("projects", 9, patch).await.unwrap().is_none());
        assert!(client.delete("projects", 1).await.unwrap());
        assert!(!client.delete("projects", 9).await.unwrap());
    }

    #[tokio::test]
    async fn test_remote_error_keeps_message() {
        let client = client(spawn_postgrest().await, "wrong-key");
        match client.select_all("projects").await {
            Err(GatewayError::Remote { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid API key");
            }
            other => panic!("unexpected result: {:?}", other.map(|r| r.len())),
        }
    }

    #[tokio::test]
    async fn test_ping_and_unreachable_host() {
        let client_ok = client(spawn_postgrest().await, KEY);
        assert!(client_ok.ping().await.is_ok());

        let unreachable = client("http://127.0.0.1:9".to_string(), KEY);
        assert!(matches!(unreachable.ping().await, Err(GatewayError::Transport(_))));
    }
}
