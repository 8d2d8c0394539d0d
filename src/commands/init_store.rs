use crate::storage::unique_store_name;
use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};

pub const DEFAULT_STORE_PREFIX: &str = "stock-prediction-data-";

/// Creates a uniquely named store directory under `parent`.
pub async fn run(parent: &Path, prefix: &str) -> Result<PathBuf> {
    let name = unique_store_name(prefix)?;
    let path = parent.join(&name);
    tokio::fs::create_dir_all(&path)
        .await
        .with_context(|| format!("Failed to create store directory {}", path.display()))?;
    info!("Created store {}", path.display());
    println!("DATA_STORE={}", path.display());
    Ok(path)
}
