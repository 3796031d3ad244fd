// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Media hosting client for avatar and cover images.
//!
//! Uploads go to Cloudinary as signed multipart requests. The service never
//! retries and never interprets remote errors: callers get a URL or `None`.

use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Cloudinary account credentials.
#[derive(Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for CloudinaryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryConfig")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// A file received from a client, held in memory until uploaded.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Deserialize)]
struct CloudinaryUploadResponse {
    secure_url: String,
}

#[derive(Clone)]
enum Backend {
    Cloudinary {
        http: reqwest::Client,
        config: CloudinaryConfig,
    },
    /// Accepts everything and returns `mock://` URLs.
    Mock,
    /// No credentials configured; every upload fails.
    Disabled,
}

/// Media upload service.
#[derive(Clone)]
pub struct MediaService {
    backend: Backend,
}

impl MediaService {
    /// Create the service; without credentials uploads are disabled.
    pub fn new(config: Option<CloudinaryConfig>) -> Self {
        let backend = match config {
            Some(config) => Backend::Cloudinary {
                http: reqwest::Client::new(),
                config,
            },
            None => {
                tracing::warn!("Media hosting not configured, uploads will be rejected");
                Backend::Disabled
            }
        };
        Self { backend }
    }

    /// Create a mock media service for testing (offline mode).
    pub fn new_mock() -> Self {
        Self {
            backend: Backend::Mock,
        }
    }

    /// Upload `file` into `folder` and return its public URL.
    pub async fn upload(&self, folder: &str, file: UploadFile) -> Option<String> {
        if file.bytes.is_empty() {
            tracing::warn!(folder, file_name = %file.file_name, "Refusing empty upload");
            return None;
        }

        match &self.backend {
            Backend::Cloudinary { http, config } => {
                match upload_to_cloudinary(http, config, folder, file).await {
                    Ok(url) => Some(url),
                    Err(e) => {
                        tracing::error!(folder, error = %e, "Media upload failed");
                        None
                    }
                }
            }
            Backend::Mock => Some(format!(
                "mock://{}/{}-{}",
                folder,
                uuid::Uuid::new_v4(),
                file.file_name
            )),
            Backend::Disabled => {
                tracing::error!(folder, "Media upload attempted without media hosting");
                None
            }
        }
    }
}

async fn upload_to_cloudinary(
    http: &reqwest::Client,
    config: &CloudinaryConfig,
    folder: &str,
    file: UploadFile,
) -> anyhow::Result<String> {
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signature = sign_params(&[("folder", folder), ("timestamp", &timestamp)], &config.api_secret);

    let mut part = reqwest::multipart::Part::bytes(file.bytes).file_name(file.file_name);
    if let Some(content_type) = file.content_type.as_deref() {
        part = part.mime_str(content_type)?;
    }

    let form = reqwest::multipart::Form::new()
        .part("file", part)
        .text("api_key", config.api_key.clone())
        .text("folder", folder.to_string())
        .text("timestamp", timestamp)
        .text("signature_algorithm", "sha256")
        .text("signature", signature);

    let url = format!(
        "https://api.cloudinary.com/v1_1/{}/auto/upload",
        config.cloud_name
    );

    let response = http.post(&url).multipart(form).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Cloudinary returned {}: {}", status, body);
    }

    let uploaded: CloudinaryUploadResponse = response.json().await?;
    Ok(uploaded.secure_url)
}

/// Cloudinary request signature: the sorted `key=value` pairs joined with
/// `&`, followed by the API secret, hashed with SHA-256.
fn sign_params(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}
