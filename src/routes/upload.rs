use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use super::{error_response, gateway_error, verify_auth, SuccessResponse};
use crate::AppState;

/// Leaves room for multipart framing around a maximum-size image.
pub const UPLOAD_BODY_LIMIT: usize = crate::gateway::storage::MAX_FILE_SIZE + 1024 * 1024;

const DEFAULT_FOLDER: &str = "uploads";

#[derive(Debug, Deserialize)]
pub struct DeleteImageRequest {
    pub url: String,
}

/// POST /api/admin/upload - multipart with a `file` part and an optional `folder` field
pub async fn upload_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }

    let mut folder = DEFAULT_FOLDER.to_string();
    let mut file: Option<(String, Vec<u8>)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Multipart error: {}", e);
                return error_response(StatusCode::BAD_REQUEST, "Invalid multipart data")
                    .into_response();
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "folder" => match field.text().await {
                Ok(text) if !text.trim().is_empty() => folder = text.trim().to_string(),
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Failed to read folder field: {}", e);
                    return error_response(StatusCode::BAD_REQUEST, "Invalid multipart data")
                        .into_response();
                }
            },
            "file" => {
                let original_name = field.file_name().unwrap_or("unknown").to_string();
                match field.bytes().await {
                    Ok(bytes) => file = Some((original_name, bytes.to_vec())),
                    Err(e) => {
                        tracing::error!("Failed to read upload bytes: {}", e);
                        return error_response(StatusCode::BAD_REQUEST, "Failed to read file data")
                            .into_response();
                    }
                }
            }
            _ => {}
        }
    }

    let Some((original_name, bytes)) = file else {
        return error_response(StatusCode::BAD_REQUEST, "No file provided").into_response();
    };

    match state
        .panel
        .images()
        .upload(&folder, &original_name, bytes)
        .await
    {
        Ok(image) => (StatusCode::CREATED, Json(image)).into_response(),
        Err(e) => gateway_error(e).into_response(),
    }
}

/// DELETE /api/admin/upload - body `{ "url": "<public url>" }`
pub async fn delete_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeleteImageRequest>,
) -> Response {
    if let Err(err_response) = verify_auth(&state, &headers) {
        return err_response.into_response();
    }

    match state.panel.images().delete(&req.url).await {
        Ok(()) => (StatusCode::OK, Json(SuccessResponse { success: true })).into_response(),
        Err(e) => gateway_error(e).into_response(),
    }
}
