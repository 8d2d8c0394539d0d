use crate::deepar::PredictionConfig;
use crate::endpoint::EndpointAuth;
use crate::models::{Frequency, PriceField};
use crate::tickers::TickerUniverse;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

const SETTING_PREFIXES: [&str; 7] = [
    "FORECAST_",
    "PRICE_PROVIDER_",
    "DATA_STORE",
    "SUPPORTED_TICKERS",
    "PREDICTION_",
    "BENCHMARK_",
    "ALPHAVANTAGE_",
];

const DEFAULT_DATA_STORE: &str = "data/store";
const DEFAULT_PREDICTION_LENGTH: usize = 30;
const DEFAULT_BENCHMARK_WINDOW: usize = 20;
const DEFAULT_ENDPOINT_TIMEOUT_SECS: u64 = 60;

/// Runtime settings for every command, read from the process environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoint_url: Option<String>,
    pub endpoint_api_key: Option<String>,
    pub endpoint_auth: EndpointAuth,
    pub endpoint_timeout: Duration,
    pub data_store: String,
    pub data_store_token: Option<String>,
    pub tickers: TickerUniverse,
    pub prediction_length: usize,
    pub frequency: Frequency,
    pub target_field: PriceField,
    pub prediction: PredictionConfig,
    pub benchmark_window: usize,
    pub alpha_vantage_api_key: Option<String>,
    /// Overrides the price provider's public base URL (mirrors, proxies).
    pub provider_base_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            endpoint_api_key: None,
            endpoint_auth: EndpointAuth::default(),
            endpoint_timeout: Duration::from_secs(DEFAULT_ENDPOINT_TIMEOUT_SECS),
            data_store: DEFAULT_DATA_STORE.to_string(),
            data_store_token: None,
            tickers: TickerUniverse::default(),
            prediction_length: DEFAULT_PREDICTION_LENGTH,
            frequency: Frequency::Daily,
            target_field: PriceField::AdjClose,
            prediction: PredictionConfig::default(),
            benchmark_window: DEFAULT_BENCHMARK_WINDOW,
            alpha_vantage_api_key: None,
            provider_base_url: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = env::vars()
            .filter(|(key, _)| SETTING_PREFIXES.iter().any(|prefix| key.starts_with(prefix)))
            .collect();
        Self::from_settings_map(&settings)
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let endpoint_timeout_secs = optional_setting_usize(
            settings,
            "FORECAST_ENDPOINT_TIMEOUT_SECS",
            DEFAULT_ENDPOINT_TIMEOUT_SECS as usize,
            1,
        )?;
        let endpoint_auth = match optional_setting(settings, "FORECAST_ENDPOINT_AUTH") {
            Some(raw) => EndpointAuth::parse(raw)?,
            None => defaults.endpoint_auth,
        };
        let tickers = match optional_setting(settings, "SUPPORTED_TICKERS") {
            Some(raw) => TickerUniverse::parse_list(raw),
            None => defaults.tickers,
        };
        if tickers.is_empty() {
            return Err(anyhow!("Setting SUPPORTED_TICKERS must list at least one ticker"));
        }
        let prediction_length = optional_setting_usize(
            settings,
            "PREDICTION_LENGTH",
            DEFAULT_PREDICTION_LENGTH,
            1,
        )?;
        let frequency = match optional_setting(settings, "PREDICTION_FREQUENCY") {
            Some(raw) => Frequency::parse(raw)?,
            None => defaults.frequency,
        };
        let target_field = match optional_setting(settings, "PREDICTION_TARGET_FIELD") {
            Some(raw) => PriceField::parse(raw)?,
            None => defaults.target_field,
        };
        let num_samples = optional_setting_usize(settings, "PREDICTION_NUM_SAMPLES", 100, 1)?;
        let quantiles = match optional_setting(settings, "PREDICTION_QUANTILES") {
            Some(_) => require_setting_f64_list(settings, "PREDICTION_QUANTILES")?,
            None => vec![0.1, 0.5, 0.9],
        };
        if let Some(invalid) = quantiles.iter().find(|q| **q <= 0.0 || **q >= 1.0) {
            return Err(anyhow!(
                "Setting PREDICTION_QUANTILES must contain values strictly between 0 and 1 (value: {})",
                invalid
            ));
        }
        let num_samples = u32::try_from(num_samples).map_err(|_| {
            anyhow!(
                "Setting PREDICTION_NUM_SAMPLES must be <= {} (value: {})",
                u32::MAX,
                num_samples
            )
        })?;
        let mut prediction = PredictionConfig::new(num_samples, &quantiles);
        if let Some(raw) = optional_setting(settings, "PREDICTION_CONFIDENCE") {
            if optional_setting(settings, "PREDICTION_QUANTILES").is_some() {
                return Err(anyhow!(
                    "Settings PREDICTION_CONFIDENCE and PREDICTION_QUANTILES are mutually exclusive"
                ));
            }
            let confidence = raw.parse::<f64>().map_err(|_| {
                anyhow!("Setting PREDICTION_CONFIDENCE must be a number (value: {})", raw)
            })?;
            prediction = prediction.with_confidence(confidence)?;
        }
        if optional_setting_bool(settings, "PREDICTION_RETURN_SAMPLES", false)? {
            prediction = prediction.with_samples();
        }
        let benchmark_window =
            optional_setting_usize(settings, "BENCHMARK_WINDOW", DEFAULT_BENCHMARK_WINDOW, 1)?;

        Ok(Self {
            endpoint_url: optional_setting(settings, "FORECAST_ENDPOINT_URL")
                .map(|value| value.to_string()),
            endpoint_api_key: optional_setting(settings, "FORECAST_ENDPOINT_API_KEY")
                .map(|value| value.to_string()),
            endpoint_auth,
            endpoint_timeout: Duration::from_secs(endpoint_timeout_secs as u64),
            data_store: optional_setting(settings, "DATA_STORE")
                .unwrap_or(DEFAULT_DATA_STORE)
                .to_string(),
            data_store_token: optional_setting(settings, "DATA_STORE_TOKEN")
                .map(|value| value.to_string()),
            tickers,
            prediction_length,
            frequency,
            target_field,
            prediction,
            benchmark_window,
            alpha_vantage_api_key: optional_setting(settings, "ALPHAVANTAGE_API_KEY")
                .map(|value| value.to_string()),
            provider_base_url: optional_setting(settings, "PRICE_PROVIDER_BASE_URL")
                .map(|value| value.to_string()),
        })
    }

    pub fn require_endpoint_url(&self) -> Result<&str> {
        self.endpoint_url
            .as_deref()
            .ok_or_else(|| anyhow!("Missing required setting FORECAST_ENDPOINT_URL"))
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    optional_setting(settings, key).ok_or_else(|| anyhow!("Missing required setting {}", key))
}

fn optional_setting_bool(
    settings: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!(
            "Setting {} must be true or false (value: {})",
            key,
            raw
        )),
    }
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    if optional_setting(settings, key).is_none() {
        return Ok(default);
    }
    require_setting_usize(settings, key, min)
}

fn require_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<usize> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

fn require_setting_f64_list(settings: &HashMap<String, String>, key: &str) -> Result<Vec<f64>> {
    let raw = require_setting(settings, key)?;
    let trimmed = raw.trim().trim_matches(|c| c == '[' || c == ']');
    let mut values = Vec::new();

    for part in trimmed.split(|c: char| c == ',' || c.is_whitespace()) {
        let entry = part.trim().trim_matches('"');
        if entry.is_empty() {
            continue;
        }
        let value = entry
            .parse::<f64>()
            .map_err(|_| anyhow!("Setting {} must be a list of numbers (value: {})", key, raw))?;
        if !value.is_finite() {
            return Err(anyhow!(
                "Setting {} must contain only finite numbers (value: {})",
                key,
                raw
            ));
        }
        values.push(value);
    }

    if values.is_empty() {
        return Err(anyhow!(
            "Setting {} must contain at least one number (value: {})",
            key,
            raw
        ));
    }

    Ok(values)
}
