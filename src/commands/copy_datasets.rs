use super::{BENCHMARK_DATASET, TEST_DATASET, VALID_DATASET};
use crate::context::AppContext;
use crate::storage::dataset_key;
use anyhow::{anyhow, Result};
use log::info;

pub const DEFAULT_SOURCE_PREFIX: &str = "stock_deepar/json";

pub fn default_datasets() -> Vec<String> {
    [TEST_DATASET, VALID_DATASET, BENCHMARK_DATASET]
        .iter()
        .map(|dataset| dataset.to_string())
        .collect()
}

pub struct CopyOptions {
    /// Source store location (directory or http(s) base URL).
    pub source: String,
    /// Prefix in the source store that holds one directory per dataset.
    pub source_prefix: String,
    pub datasets: Vec<String>,
}

/// Copies `{source_prefix}/{dataset}/{TICKER}.json` into `{dataset}/{TICKER}.json`
/// of the configured store for every configured ticker.
pub async fn run(app: &AppContext, options: &CopyOptions) -> Result<usize> {
    if options.datasets.is_empty() {
        return Err(anyhow!("No datasets to copy"));
    }
    let source = app.store_at(&options.source);
    let destination = app.store();
    let prefix = options.source_prefix.trim_matches('/');

    let mut copied = 0;
    for dataset in &options.datasets {
        let source_dataset = if prefix.is_empty() {
            dataset.clone()
        } else {
            format!("{}/{}", prefix, dataset)
        };
        for ticker in app.settings().tickers.tickers() {
            source
                .copy(
                    &dataset_key(&source_dataset, ticker),
                    &destination,
                    &dataset_key(dataset, ticker),
                )
                .await?;
            copied += 1;
        }
    }
    info!(
        "Copied {} dataset object(s) from {} into {}",
        copied,
        options.source,
        app.settings().data_store
    );
    Ok(copied)
}
