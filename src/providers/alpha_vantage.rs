use super::REQUEST_DELAY;
use crate::models::PriceBar;
use crate::retry::{retry_operation, status_error};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use reqwest::Client;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use tokio::time::sleep;

const ALPHA_VANTAGE_BASE_URL: &str = "https://www.alphavantage.co";

#[derive(Debug, Deserialize)]
struct DailyAdjustedResponse {
    #[serde(rename = "Time Series (Daily)", default)]
    series: Option<BTreeMap<String, DailyAdjustedEntry>>,
    #[serde(rename = "Error Message", default)]
    error_message: Option<String>,
    #[serde(rename = "Note", default)]
    note: Option<String>,
    #[serde(rename = "Information", default)]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyAdjustedEntry {
    #[serde(rename = "1. open", default, deserialize_with = "deserialize_f64_opt")]
    open: Option<f64>,
    #[serde(rename = "2. high", default, deserialize_with = "deserialize_f64_opt")]
    high: Option<f64>,
    #[serde(rename = "3. low", default, deserialize_with = "deserialize_f64_opt")]
    low: Option<f64>,
    #[serde(rename = "4. close", default, deserialize_with = "deserialize_f64_opt")]
    close: Option<f64>,
    #[serde(
        rename = "5. adjusted close",
        default,
        deserialize_with = "deserialize_f64_opt"
    )]
    adjusted_close: Option<f64>,
    #[serde(rename = "6. volume", default, deserialize_with = "deserialize_f64_opt")]
    volume: Option<f64>,
}

/// Daily adjusted bars from Alpha Vantage.
pub struct AlphaVantageClient<'a> {
    http: &'a Client,
    base_url: String,
    api_key: String,
}

impl<'a> AlphaVantageClient<'a> {
    pub fn new(http: &'a Client, api_key: Option<&str>) -> Result<Self> {
        let api_key = api_key
            .map(|key| key.trim())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| anyhow!("Missing required setting ALPHAVANTAGE_API_KEY"))?;
        Ok(Self {
            http,
            base_url: ALPHA_VANTAGE_BASE_URL.to_string(),
            api_key: api_key.to_string(),
        })
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
        let url = format!("{}/query", self.base_url);
        let query = [
            ("function", "TIME_SERIES_DAILY_ADJUSTED"),
            ("symbol", ticker),
            ("outputsize", "full"),
            ("apikey", self.api_key.as_str()),
        ];

        let response: DailyAdjustedResponse =
            retry_operation!(format!("Alpha Vantage daily {}", ticker), async {
                sleep(REQUEST_DELAY).await;
                let response = self
                    .http
                    .get(&url)
                    .query(&query)
                    .send()
                    .await
                    .with_context(|| format!("GET {} failed", url))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(status_error(
                        status,
                        format!("Alpha Vantage returned {} for {}", status, ticker),
                    ));
                }
                response
                    .json::<DailyAdjustedResponse>()
                    .await
                    .context("failed to parse Alpha Vantage response")
            })?;

        parse_daily_adjusted(ticker, response, start, end)
    }
}

fn parse_daily_adjusted(
    ticker: &str,
    response: DailyAdjustedResponse,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PriceBar>> {
    if let Some(message) = response
        .error_message
        .or(response.note)
        .or(response.information)
    {
        return Err(anyhow!("Alpha Vantage rejected {}: {}", ticker, message));
    }
    let series = response
        .series
        .ok_or_else(|| anyhow!("Alpha Vantage returned no daily series for {}", ticker))?;

    let mut bars = Vec::new();
    for (raw_date, entry) in series {
        let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
            .with_context(|| format!("invalid Alpha Vantage date {}", raw_date))?;
        if date < start || date > end {
            continue;
        }
        let close = entry.close.unwrap_or(f64::NAN);
        bars.push(PriceBar {
            ticker: ticker.to_string(),
            date,
            open: entry.open.unwrap_or(f64::NAN),
            high: entry.high.unwrap_or(f64::NAN),
            low: entry.low.unwrap_or(f64::NAN),
            close,
            adj_close: entry.adjusted_close.unwrap_or(close),
            volume: entry.volume.unwrap_or(0.0).round() as i64,
        });
    }

    if bars.is_empty() {
        return Err(anyhow!(
            "Alpha Vantage returned no bars for {} between {} and {}",
            ticker,
            start,
            end
        ));
    }
    Ok(bars)
}

fn deserialize_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct F64OptVisitor;

    impl<'de> Visitor<'de> for F64OptVisitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number or string")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.trim().parse::<f64>().ok())
        }
    }

    deserializer.deserialize_any(F64OptVisitor)
}
