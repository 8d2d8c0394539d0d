pub mod alpha_vantage;
pub mod yahoo;

use crate::config::Settings;
use crate::models::PriceBar;
use crate::price_data::PriceHistory;
use alpha_vantage::AlphaVantageClient;
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::ValueEnum;
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use reqwest::Client;
use std::time::Duration;
use yahoo::YahooClient;

pub(crate) const REQUEST_DELAY: Duration = Duration::from_millis(350);
const MAX_CONCURRENT_REQUESTS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    Yahoo,
    AlphaVantage,
}

impl ProviderKind {
    pub fn label(self) -> &'static str {
        match self {
            ProviderKind::Yahoo => "Yahoo Finance",
            ProviderKind::AlphaVantage => "Alpha Vantage",
        }
    }
}

pub enum PriceProvider<'a> {
    Yahoo(YahooClient<'a>),
    AlphaVantage(AlphaVantageClient<'a>),
}

impl<'a> PriceProvider<'a> {
    pub fn new(kind: ProviderKind, http: &'a Client, settings: &Settings) -> Result<Self> {
        let base_url = settings.provider_base_url.as_deref();
        Ok(match kind {
            ProviderKind::Yahoo => {
                let client = YahooClient::new(http);
                PriceProvider::Yahoo(match base_url {
                    Some(url) => client.with_base_url(url),
                    None => client,
                })
            }
            ProviderKind::AlphaVantage => {
                let client =
                    AlphaVantageClient::new(http, settings.alpha_vantage_api_key.as_deref())?;
                PriceProvider::AlphaVantage(match base_url {
                    Some(url) => client.with_base_url(url),
                    None => client,
                })
            }
        })
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            PriceProvider::Yahoo(_) => ProviderKind::Yahoo,
            PriceProvider::AlphaVantage(_) => ProviderKind::AlphaVantage,
        }
    }

    pub async fn fetch_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        let mut bars = match self {
            PriceProvider::Yahoo(client) => client.fetch_history(ticker, start, end).await?,
            PriceProvider::AlphaVantage(client) => client.fetch_history(ticker, start, end).await?,
        };
        bars.sort_by_key(|bar| bar.date);
        Ok(bars)
    }
}

/// Fetches every ticker with a bounded number of requests in flight.
/// The first failing ticker aborts the whole fetch.
pub async fn fetch_price_history(
    provider: &PriceProvider<'_>,
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<PriceHistory> {
    if tickers.is_empty() {
        return Err(anyhow!("No tickers to fetch"));
    }
    if start > end {
        return Err(anyhow!(
            "Start date {} must not be after end date {}",
            start,
            end
        ));
    }
    info!(
        "Fetching {} ticker(s) from {} between {} and {}",
        tickers.len(),
        provider.kind().label(),
        start,
        end
    );

    let pb = ProgressBar::new(tickers.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut pending = tickers.iter();
    let mut in_flight = FuturesUnordered::new();
    for ticker in pending.by_ref().take(MAX_CONCURRENT_REQUESTS) {
        in_flight.push(fetch_one(provider, ticker, start, end));
    }

    let mut bars = Vec::new();
    while let Some(result) = in_flight.next().await {
        let (ticker, ticker_bars) = match result {
            Ok(value) => value,
            Err(err) => {
                pb.abandon_with_message("failed");
                return Err(err);
            }
        };
        info!("Fetched {} bars for {}", ticker_bars.len(), ticker);
        pb.set_message(ticker.to_string());
        pb.inc(1);
        bars.extend(ticker_bars);
        if let Some(next) = pending.next() {
            in_flight.push(fetch_one(provider, next, start, end));
        }
    }
    pb.finish_with_message("done");

    PriceHistory::from_bars(bars)
}

async fn fetch_one<'t>(
    provider: &PriceProvider<'_>,
    ticker: &'t str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(&'t str, Vec<PriceBar>)> {
    let bars = provider
        .fetch_history(ticker, start, end)
        .await
        .with_context(|| format!("Failed to fetch price history for {}", ticker))?;
    Ok((ticker, bars))
}
