use super::REQUEST_DELAY;
use crate::models::PriceBar;
use crate::retry::{retry_operation, status_error};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate};
use log::debug;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::sleep;

const YAHOO_BASE_URL: &str = "https://query2.finance.yahoo.com";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Daily bars from the Yahoo Finance v8 chart API.
pub struct YahooClient<'a> {
    http: &'a Client,
    base_url: String,
}

impl<'a> YahooClient<'a> {
    pub fn new(http: &'a Client) -> Self {
        Self {
            http,
            base_url: YAHOO_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub async fn fetch_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        let url = format!(
            "{}/v8/finance/chart/{}",
            self.base_url,
            yahoo_symbol(ticker)
        );
        let period1 = start
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("invalid start date {}", start))?
            .and_utc()
            .timestamp()
            .to_string();
        let period2 = end
            .and_hms_opt(23, 59, 59)
            .ok_or_else(|| anyhow!("invalid end date {}", end))?
            .and_utc()
            .timestamp()
            .to_string();
        let query = [
            ("period1", period1.as_str()),
            ("period2", period2.as_str()),
            ("interval", "1d"),
            ("includeAdjustedClose", "true"),
        ];

        let body = retry_operation!(format!("Yahoo chart {}", ticker), async {
            sleep(REQUEST_DELAY).await;
            debug!("GET {} for {}", url, ticker);
            let response = self
                .http
                .get(&url)
                .query(&query)
                .send()
                .await
                .with_context(|| format!("GET {} failed", url))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .with_context(|| format!("Failed to read body of {}", url))?;
            if !status.is_success() {
                return Err(status_error(status, describe_failure(ticker, status, &body)));
            }
            Ok(body)
        })?;

        let response: ChartResponse =
            serde_json::from_str(&body).context("failed to parse Yahoo chart response")?;
        parse_chart(ticker, response)
    }
}

/// Yahoo reports unknown symbols as a 404 whose body still carries `chart.error`.
fn describe_failure(ticker: &str, status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ChartResponse>(body) {
        Ok(ChartResponse {
            chart: ChartResult {
                error: Some(err), ..
            },
        }) => format!(
            "Yahoo returned {} for {}: {} ({})",
            status, ticker, err.description, err.code
        ),
        _ => format!("Yahoo returned {} for {}", status, ticker),
    }
}

/// Yahoo uses hyphens instead of dots for share classes (BRK-B, not BRK.B).
fn yahoo_symbol(ticker: &str) -> String {
    ticker.trim().to_uppercase().replace('.', "-")
}

fn parse_chart(ticker: &str, response: ChartResponse) -> Result<Vec<PriceBar>> {
    let result = match (response.chart.result, response.chart.error) {
        (_, Some(err)) => {
            return Err(anyhow!(
                "Yahoo returned {} for {}: {}",
                err.code,
                ticker,
                err.description
            ))
        }
        (Some(result), None) => result,
        (None, None) => return Err(anyhow!("Yahoo returned no chart data for {}", ticker)),
    };

    let data = result
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Yahoo chart result for {} is empty", ticker))?;
    let timestamps = data.timestamp.unwrap_or_default();
    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Yahoo chart for {} has no quote data", ticker))?;
    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|entries| entries.into_iter().next())
        .map(|entry| entry.adjclose);

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let date = DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.naive_utc().date())
            .ok_or_else(|| anyhow!("invalid Yahoo timestamp {} for {}", ts, ticker))?;

        let open = quote.open.get(i).copied().flatten();
        let high = quote.high.get(i).copied().flatten();
        let low = quote.low.get(i).copied().flatten();
        let close = quote.close.get(i).copied().flatten();
        let volume = quote.volume.get(i).copied().flatten();
        if open.is_none() && high.is_none() && low.is_none() && close.is_none() && volume.is_none()
        {
            continue;
        }
        let adj_close = adj_closes
            .as_ref()
            .and_then(|values| values.get(i).copied().flatten())
            .or(close);

        bars.push(PriceBar {
            ticker: ticker.to_string(),
            date,
            open: open.unwrap_or(f64::NAN),
            high: high.unwrap_or(f64::NAN),
            low: low.unwrap_or(f64::NAN),
            close: close.unwrap_or(f64::NAN),
            adj_close: adj_close.unwrap_or(f64::NAN),
            volume: volume.unwrap_or(0) as i64,
        });
    }

    if bars.is_empty() {
        return Err(anyhow!("Yahoo returned no usable bars for {}", ticker));
    }
    Ok(bars)
}
