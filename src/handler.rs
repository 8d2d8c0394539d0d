//! Request glue between callers, stored datasets and the forecasting endpoint.
//!
//! A request names a ticker, a start date, or both:
//! * ticker + start date: the `valid` dataset, re-anchored at the start date;
//! * ticker only: the `train` dataset as stored;
//! * start date only: an empty target starting at that date.

use crate::config::Settings;
use crate::deepar::{DeepArInstance, PredictionConfig, PredictionRequest};
use crate::endpoint::{EndpointClient, EndpointResponse};
use crate::error::ForecastError;
use crate::models::{parse_timestamp, Frequency, TIMESTAMP_FORMAT};
use crate::storage::ObjectStore;
use crate::tickers::TickerUniverse;
use chrono::NaiveDateTime;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

pub const VALID_DATASET: &str = "valid";
pub const TRAIN_DATASET: &str = "train";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastRequest {
    #[serde(default)]
    pub ticker_name: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
}

impl ForecastRequest {
    pub fn new(ticker_name: Option<&str>, start_date: Option<&str>) -> Self {
        Self {
            ticker_name: ticker_name.map(str::to_string),
            start_date: start_date.map(str::to_string),
        }
    }

    pub fn parse(body: &str) -> Result<Self, ForecastError> {
        if body.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(body)
            .map_err(|err| ForecastError::InvalidRequest(format!("malformed request body: {}", err)))
    }

    fn ticker(&self) -> Option<&str> {
        non_empty(self.ticker_name.as_deref())
    }

    fn start(&self) -> Result<Option<NaiveDateTime>, ForecastError> {
        non_empty(self.start_date.as_deref())
            .map(|raw| {
                parse_timestamp(raw).map_err(|err| ForecastError::InvalidRequest(err.to_string()))
            })
            .transpose()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HandlerResponse {
    fn new(status_code: u16, body: String) -> Self {
        let headers = BTreeMap::from([
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Access-Control-Allow-Origin".to_string(), "*".to_string()),
        ]);
        Self {
            status_code,
            headers,
            body,
        }
    }

    pub fn ok(body: String) -> Self {
        Self::new(200, body)
    }

    pub fn error(err: &ForecastError) -> Self {
        Self::new(
            err.status_code(),
            json!({ "error": err.to_string() }).to_string(),
        )
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Everything a caller needs to render a forecast.
#[derive(Debug, Clone)]
pub struct ForecastOutcome {
    pub ticker: Option<String>,
    pub instance: DeepArInstance,
    /// First timestamp covered by the forecast.
    pub forecast_start: NaiveDateTime,
    pub endpoint: EndpointResponse,
}

pub struct ForecastHandler {
    store: ObjectStore,
    endpoint: EndpointClient,
    tickers: TickerUniverse,
    prediction: PredictionConfig,
    frequency: Frequency,
}

impl ForecastHandler {
    pub fn new(store: ObjectStore, endpoint: EndpointClient, settings: &Settings) -> Self {
        Self {
            store,
            endpoint,
            tickers: settings.tickers.clone(),
            prediction: settings.prediction.clone(),
            frequency: settings.frequency,
        }
    }

    /// Handles a raw JSON request body and never fails; errors become status codes.
    pub async fn handle(&self, body: &str) -> HandlerResponse {
        let result = match ForecastRequest::parse(body) {
            Ok(request) => self.forecast(&request).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(outcome) => HandlerResponse::ok(outcome.endpoint.body),
            Err(err) => {
                warn!("Forecast request failed: {}", err);
                HandlerResponse::error(&err)
            }
        }
    }

    pub async fn forecast(
        &self,
        request: &ForecastRequest,
    ) -> Result<ForecastOutcome, ForecastError> {
        let (ticker, prediction_request) = self.build_request(request).await?;
        let instance = prediction_request
            .instances
            .first()
            .cloned()
            .ok_or_else(|| ForecastError::InvalidRequest("request has no instance".to_string()))?;
        let forecast_start = instance.to_series(self.frequency)?.next_timestamp();

        let endpoint = self
            .endpoint
            .invoke(&prediction_request)
            .await
            .map_err(|err| ForecastError::Endpoint(format!("{:#}", err)))?;
        info!(
            "Forecast for {} starting {} received ({} bytes)",
            ticker.as_deref().unwrap_or("<no ticker>"),
            forecast_start.format(TIMESTAMP_FORMAT),
            endpoint.body.len()
        );

        Ok(ForecastOutcome {
            ticker,
            instance,
            forecast_start,
            endpoint,
        })
    }

    /// Resolves the request into the payload sent to the endpoint.
    pub async fn build_request(
        &self,
        request: &ForecastRequest,
    ) -> Result<(Option<String>, PredictionRequest), ForecastError> {
        let start = request.start()?;
        let ticker = request
            .ticker()
            .map(|raw| self.tickers.resolve(raw))
            .transpose()?;

        let instance = match (ticker.as_deref(), start) {
            (Some(ticker), Some(start)) => self
                .store
                .load_dataset(VALID_DATASET, ticker)
                .await?
                .with_start(start),
            (Some(ticker), None) => self.store.load_dataset(TRAIN_DATASET, ticker).await?,
            (None, Some(start)) => DeepArInstance {
                start: start.format(TIMESTAMP_FORMAT).to_string(),
                target: Vec::new(),
                cat: None,
                dynamic_feat: None,
            },
            (None, None) => {
                return Err(ForecastError::InvalidRequest(
                    "request needs ticker_name, start_date or both".to_string(),
                ))
            }
        };

        Ok((
            ticker,
            PredictionRequest::new(vec![instance], self.prediction.clone()),
        ))
    }
}
