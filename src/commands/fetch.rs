use crate::context::AppContext;
use crate::price_data::PriceHistory;
use crate::providers::{fetch_price_history, ProviderKind};
use crate::tickers::TickerUniverse;
use anyhow::Result;
use chrono::NaiveDate;
use log::info;
use std::path::PathBuf;

pub struct FetchOptions {
    pub provider: ProviderKind,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Explicit tickers; the configured universe when empty.
    pub tickers: Vec<String>,
    pub output: PathBuf,
    pub csv: Option<PathBuf>,
}

pub async fn run(app: &AppContext, options: &FetchOptions) -> Result<PriceHistory> {
    let universe = if options.tickers.is_empty() {
        app.settings().tickers.clone()
    } else {
        TickerUniverse::new(&options.tickers)
    };
    let provider = app.provider(options.provider)?;
    let history =
        fetch_price_history(&provider, universe.tickers(), options.start, options.end).await?;

    history.save_to_file(&options.output)?;
    info!(
        "Price history snapshot for {} ticker(s) written to {}",
        history.tickers().len(),
        options.output.display()
    );
    if let Some(csv_path) = options.csv.as_ref() {
        history.write_csv(csv_path)?;
        info!("Raw bars written to {}", csv_path.display());
    }
    Ok(history)
}
