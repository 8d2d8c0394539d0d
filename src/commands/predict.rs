use super::PREDICTIONS_PREFIX;
use crate::context::AppContext;
use crate::deepar::{DeepArInstance, PredictionResponse, QuantileForecast};
use crate::handler::{ForecastOutcome, ForecastRequest};
use crate::models::{parse_timestamp, Frequency, TIMESTAMP_FORMAT};
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A forecast as kept in the store for later rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub ticker: Option<String>,
    pub instance: DeepArInstance,
    pub forecast_start: String,
    pub frequency: Frequency,
    pub response: PredictionResponse,
}

impl PredictionRecord {
    pub fn from_outcome(outcome: &ForecastOutcome, frequency: Frequency) -> Self {
        Self {
            ticker: outcome.ticker.clone(),
            instance: outcome.instance.clone(),
            forecast_start: outcome.forecast_start.format(TIMESTAMP_FORMAT).to_string(),
            frequency,
            response: outcome.endpoint.response.clone(),
        }
    }

    /// Store key: one record per ticker, or per start date when no ticker was given.
    pub fn key(&self) -> String {
        let name = match self.ticker.as_deref() {
            Some(ticker) => ticker.to_string(),
            None => format!(
                "start-{}",
                self.forecast_start.split(' ').next().unwrap_or_default()
            ),
        };
        record_key(&name)
    }

    pub fn forecast(&self) -> Result<QuantileForecast> {
        let start = parse_timestamp(&self.forecast_start)?;
        QuantileForecast::from_prediction(self.response.first()?, start, self.frequency)
    }
}

pub fn record_key(name: &str) -> String {
    format!("{}/{}.json", PREDICTIONS_PREFIX, name)
}

pub struct PredictOptions {
    pub ticker: Option<String>,
    pub start_date: Option<String>,
    /// Raw endpoint response destination.
    pub output: Option<PathBuf>,
}

pub async fn run(app: &AppContext, options: &PredictOptions) -> Result<PredictionRecord> {
    let handler = app.handler()?;
    let request = ForecastRequest::new(options.ticker.as_deref(), options.start_date.as_deref());
    let outcome = handler.forecast(&request).await?;

    let record = PredictionRecord::from_outcome(&outcome, app.settings().frequency);
    let store = app.store();
    let key = record.key();
    store.put_json(&key, &record).await?;
    info!("Forecast record stored at {}", store.uri(&key));

    match options.output.as_ref() {
        Some(path) => {
            tokio::fs::write(path, outcome.endpoint.body.as_bytes())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Raw endpoint response written to {}", path.display());
        }
        None => println!("{}", outcome.endpoint.body),
    }
    Ok(record)
}
