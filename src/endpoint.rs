use crate::config::Settings;
use crate::deepar::{PredictionRequest, PredictionResponse};
use crate::retry::{retry_operation, status_error};
use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use std::time::Duration;

const JSON_CONTENT_TYPE: &str = "application/json";
const API_KEY_HEADER: &str = "x-api-key";
const MAX_ERROR_BODY_CHARS: usize = 2048;

/// HTTP client shared by providers, stores and the endpoint.
pub fn build_async_client(timeout: Option<Duration>) -> Result<Client> {
    let mut builder = Client::builder().user_agent(concat!("stockcast/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("failed to build HTTP client")
}

/// How requests to the endpoint authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointAuth {
    /// `Authorization: Bearer <key>`.
    #[default]
    Bearer,
    /// API gateway style `x-api-key: <key>`.
    ApiKeyHeader,
}

impl EndpointAuth {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bearer" => Ok(Self::Bearer),
            "api-key" | "api_key" | "x-api-key" => Ok(Self::ApiKeyHeader),
            other => Err(anyhow!(
                "Unknown endpoint auth scheme {} (expected bearer or api-key)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndpointResponse {
    /// Body exactly as the endpoint returned it.
    pub body: String,
    pub response: PredictionResponse,
}

/// Client for a hosted forecasting endpoint that accepts DeepAR JSON requests.
pub struct EndpointClient {
    http: Client,
    url: String,
    api_key: Option<String>,
    auth: EndpointAuth,
}

impl EndpointClient {
    pub fn new(http: Client, url: &str, api_key: Option<String>) -> Result<Self> {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!(
                "Forecast endpoint URL must start with http:// or https:// (value: {})",
                url
            ));
        }
        Ok(Self {
            http,
            url: url.to_string(),
            api_key: api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            auth: EndpointAuth::default(),
        })
    }

    pub fn with_auth(mut self, auth: EndpointAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn from_settings(http: Client, settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            http,
            settings.require_endpoint_url()?,
            settings.endpoint_api_key.clone(),
        )?
        .with_auth(settings.endpoint_auth))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn invoke(&self, request: &PredictionRequest) -> Result<EndpointResponse> {
        let payload = request.to_bytes()?;
        info!(
            "Invoking forecast endpoint {} with {} instance(s)",
            self.url,
            request.instances.len()
        );

        let body = retry_operation!(format!("POST {}", self.url), async {
            let response = self
                .post(payload.clone())
                .send()
                .await
                .with_context(|| format!("POST {} failed", self.url))?;
            let status = response.status();
            let text = response
                .text()
                .await
                .with_context(|| format!("Failed to read response from {}", self.url))?;
            if !status.is_success() {
                return Err(status_error(
                    status,
                    format!(
                        "Forecast endpoint returned {}: {}",
                        status,
                        truncate_chars(&text, MAX_ERROR_BODY_CHARS)
                    ),
                ));
            }
            Ok(text)
        })?;

        debug!("Forecast endpoint response: {}", body);
        let response = PredictionResponse::parse(&body)?;
        Ok(EndpointResponse { body, response })
    }

    fn post(&self, payload: Vec<u8>) -> RequestBuilder {
        let builder = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(ACCEPT, JSON_CONTENT_TYPE)
            .body(payload);
        match (self.api_key.as_deref(), self.auth) {
            (None, _) => builder,
            (Some(key), EndpointAuth::Bearer) => builder.bearer_auth(key),
            (Some(key), EndpointAuth::ApiKeyHeader) => builder.header(API_KEY_HEADER, key),
        }
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
