//! Object storage for datasets, channels and rendered pages.
//!
//! Keys are `/`-separated and relative. A local store maps keys onto a
//! directory tree; an HTTP store issues GET/PUT against an S3-compatible base
//! URL (public or presigned bucket endpoints, optional bearer token).

use crate::deepar::DeepArInstance;
use crate::error::ForecastError;
use crate::retry::{retry_operation, status_error};
use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

const MIN_STORE_NAME_LEN: usize = 3;
const MAX_STORE_NAME_LEN: usize = 63;

pub fn dataset_key(dataset: &str, ticker: &str) -> String {
    format!("{}/{}.json", dataset.trim_matches('/'), ticker)
}

pub fn channel_key(path: &str, interval: &str, channel: &str) -> String {
    format!(
        "{}/{}/{}/{}.json",
        path.trim_matches('/'),
        interval,
        channel,
        channel
    )
}

/// A store name made of `prefix` followed by a random UUID.
pub fn unique_store_name(prefix: &str) -> Result<String> {
    let name = format!("{}{}", prefix.trim(), uuid::Uuid::new_v4());
    if name.len() < MIN_STORE_NAME_LEN || name.len() > MAX_STORE_NAME_LEN {
        return Err(anyhow!(
            "Store name {} must be between {} and {} characters long",
            name,
            MIN_STORE_NAME_LEN,
            MAX_STORE_NAME_LEN
        ));
    }
    Ok(name)
}

#[derive(Clone)]
pub enum ObjectStore {
    Local {
        root: PathBuf,
    },
    Http {
        client: Client,
        base_url: String,
        token: Option<String>,
    },
}

impl ObjectStore {
    /// `http://` and `https://` locations become HTTP stores; anything else is a directory.
    pub fn from_location(location: &str, token: Option<String>, client: Client) -> Self {
        let trimmed = location.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            ObjectStore::Http {
                client,
                base_url: trimmed.trim_end_matches('/').to_string(),
                token: token.filter(|value| !value.trim().is_empty()),
            }
        } else {
            ObjectStore::Local {
                root: PathBuf::from(trimmed),
            }
        }
    }

    pub fn local<P: AsRef<Path>>(root: P) -> Self {
        ObjectStore::Local {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn uri(&self, key: &str) -> String {
        match self {
            ObjectStore::Local { root } => root.join(key).display().to_string(),
            ObjectStore::Http { base_url, .. } => format!("{}/{}", base_url, key),
        }
    }

    pub fn channel_uri(&self, path: &str, interval: &str, channel: &str) -> String {
        self.uri(&format!(
            "{}/{}/{}/",
            path.trim_matches('/'),
            interval,
            channel
        ))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        match self {
            ObjectStore::Local { root } => {
                let path = root.join(key);
                match fs::read(&path).await {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(err) => {
                        Err(err).with_context(|| format!("Failed to read {}", path.display()))
                    }
                }
            }
            ObjectStore::Http {
                client,
                base_url,
                token,
            } => {
                let url = format!("{}/{}", base_url, key);
                retry_operation!(format!("GET {}", url), async {
                    let mut request = client.get(&url);
                    if let Some(token) = token {
                        request = request.bearer_auth(token);
                    }
                    let response = request
                        .send()
                        .await
                        .with_context(|| format!("GET {} failed", url))?;
                    if response.status() == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    let status = response.status();
                    if !status.is_success() {
                        return Err(status_error(status, format!("GET {} returned {}", url, status)));
                    }
                    let bytes = response
                        .bytes()
                        .await
                        .with_context(|| format!("Failed to read body of {}", url))?;
                    Ok::<_, anyhow::Error>(Some(bytes.to_vec()))
                })
            }
        }
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        match self {
            ObjectStore::Local { root } => {
                let path = root.join(key);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await.with_context(|| {
                        format!("Failed to create directory {}", parent.display())
                    })?;
                }
                fs::write(&path, bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            ObjectStore::Http {
                client,
                base_url,
                token,
            } => {
                let url = format!("{}/{}", base_url, key);
                retry_operation!(format!("PUT {}", url), async {
                    let mut request = client
                        .put(&url)
                        .header(reqwest::header::CONTENT_TYPE, content_type_for(key))
                        .body(bytes.clone());
                    if let Some(token) = token {
                        request = request.bearer_auth(token);
                    }
                    let status = request
                        .send()
                        .await
                        .with_context(|| format!("PUT {} failed", url))?
                        .status();
                    if !status.is_success() {
                        return Err(status_error(status, format!("PUT {} returned {}", url, status)));
                    }
                    Ok::<_, anyhow::Error>(())
                })?;
            }
        }
        debug!("Stored {}", self.uri(key));
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        match self {
            ObjectStore::Local { root } => Ok(fs::metadata(root.join(key)).await.is_ok()),
            ObjectStore::Http { .. } => Ok(self.get(key).await?.is_some()),
        }
    }

    /// Copies one object, possibly into another store.
    pub async fn copy(&self, src_key: &str, dst: &ObjectStore, dst_key: &str) -> Result<()> {
        let bytes = self
            .get(src_key)
            .await?
            .ok_or_else(|| anyhow!("Object {} not found", self.uri(src_key)))?;
        dst.put(dst_key, bytes).await?;
        info!("Copied {} to {}", self.uri(src_key), dst.uri(dst_key));
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.get(key).await? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid JSON in {}", self.uri(key)))?;
        Ok(Some(value))
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).context("Failed to encode JSON object")?;
        self.put(key, bytes).await
    }

    /// Loads the stored series for a ticker within a dataset prefix (`train`, `valid`, ...).
    pub async fn load_dataset(
        &self,
        dataset: &str,
        ticker: &str,
    ) -> Result<DeepArInstance, ForecastError> {
        let key = dataset_key(dataset, ticker);
        self.get_json::<DeepArInstance>(&key)
            .await?
            .ok_or(ForecastError::DatasetNotFound { key })
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(anyhow!("Object key must not be empty"));
    }
    let path = Path::new(key);
    let escapes = path
        .components()
        .any(|component| !matches!(component, Component::Normal(_)));
    if escapes {
        return Err(anyhow!("Object key {} must be a plain relative path", key));
    }
    Ok(())
}

fn content_type_for(key: &str) -> &'static str {
    if key.ends_with(".json") {
        "application/json"
    } else if key.ends_with(".html") {
        "text/html; charset=utf-8"
    } else if key.ends_with(".svg") {
        "image/svg+xml"
    } else {
        "application/octet-stream"
    }
}
