//! Image uploads to the storage bucket.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::GatewayError;
use crate::auth::AuthGate;
use crate::config::SupabaseConfig;

pub const MAX_FILE_SIZE: usize = 5 * 1024 * 1024; // 5MB
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), GatewayError>;
    async fn remove(&self, path: &str) -> Result<(), GatewayError>;
    fn public_url(&self, path: &str) -> String;
}

// ============================================================================
// Supabase storage
// ============================================================================

pub struct SupabaseStorage {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: String,
}

impl SupabaseStorage {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            client: super::HTTP_CLIENT.clone(),
            base_url: config.url.clone(),
            api_key: config.anon_key.clone(),
            bucket: config.bucket.clone(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<(), GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        tracing::warn!(status = %status, "storage returned error");
        Err(GatewayError::Remote {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl BlobStore for SupabaseStorage {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), GatewayError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path);
        let response = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", content_type)
            .header("Cache-Control", "3600")
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn remove(&self, path: &str) -> Result<(), GatewayError> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, self.bucket);
        let response = self
            .client
            .delete(url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({ "prefixes": [path] }))
            .send()
            .await?;
        Self::check(response).await
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }
}

// ============================================================================
// In-memory bucket
// ============================================================================

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(path)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), GatewayError> {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), GatewayError> {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.remove(path);
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("http://storage.local/public/{}", path)
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_image_magic_bytes(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() < 4 {
        return None;
    }
    match bytes {
        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        // GIF: 47 49 46 38
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        // WebP: RIFF .... WEBP
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        _ => None,
    }
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.contains("..")
        && !segment.contains('/')
        && !segment.contains('\\')
        && !segment.contains('\0')
}

/// `folder/filename` from the last two `/`-separated segments of a public URL.
pub fn storage_path_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let mut segments = path.rsplit('/').filter(|s| !s.is_empty());
    let filename = segments.next()?;
    let folder = segments.next()?;
    if folder.ends_with(':') {
        return None;
    }
    Some(format!("{}/{}", folder, filename))
}

// ============================================================================
// Image storage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub url: String,
    pub path: String,
    pub size: usize,
    pub mime_type: String,
}

#[derive(Clone)]
pub struct ImageStorage {
    blobs: Option<Arc<dyn BlobStore>>,
    gate: Arc<AuthGate>,
}

impl ImageStorage {
    pub fn new(blobs: Option<Arc<dyn BlobStore>>, gate: Arc<AuthGate>) -> Self {
        Self { blobs, gate }
    }

    fn writable(&self) -> Result<&Arc<dyn BlobStore>, GatewayError> {
        let blobs = self.blobs.as_ref().ok_or(GatewayError::NotConfigured)?;
        self.gate
            .require_session()
            .map_err(|_| GatewayError::Unauthenticated)?;
        Ok(blobs)
    }

    pub async fn upload(
        &self,
        folder: &str,
        original_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedImage, GatewayError> {
        let blobs = self.writable()?;

        if !is_safe_segment(folder) {
            return Err(GatewayError::InvalidUpload("Invalid folder name".to_string()));
        }
        let original_ext = original_name.rsplit('.').next().unwrap_or("").to_lowercase();
        if !ALLOWED_EXTENSIONS.contains(&original_ext.as_str()) {
            return Err(GatewayError::InvalidUpload(
                "Unsupported file type. Allowed: JPEG, PNG, WebP, GIF.".to_string(),
            ));
        }
        if bytes.is_empty() {
            return Err(GatewayError::InvalidUpload("Empty file".to_string()));
        }
        if bytes.len() > MAX_FILE_SIZE {
            return Err(GatewayError::InvalidUpload(
                "File too large. Maximum size is 5MB.".to_string(),
            ));
        }
        let mime_type = validate_image_magic_bytes(&bytes).ok_or_else(|| {
            GatewayError::InvalidUpload(
                "File content does not match an allowed image type.".to_string(),
            )
        })?;

        let path = format!(
            "{}/{}.{}",
            folder,
            uuid::Uuid::new_v4(),
            extension_for_mime(mime_type)
        );
        let size = bytes.len();
        blobs.put(&path, bytes, mime_type).await.inspect_err(|e| {
            tracing::error!("Failed to upload image {}: {}", path, e);
        })?;

        tracing::info!("Image uploaded: {} ({} bytes)", path, size);
        Ok(UploadedImage {
            url: blobs.public_url(&path),
            path,
            size,
            mime_type: mime_type.to_string(),
        })
    }

    pub async fn delete(&self, url: &str) -> Result<(), GatewayError> {
        let blobs = self.writable()?;
        let path = storage_path_from_url(url)
            .filter(|p| p.split('/').all(is_safe_segment))
            .ok_or_else(|| GatewayError::InvalidUpload("Invalid image URL".to_string()))?;

        blobs.remove(&path).await.inspect_err(|e| {
            tracing::error!("Failed to delete image {}: {}", path, e);
        })?;
        tracing::info!("Image deleted: {}", path);
        Ok(())
    }
}
