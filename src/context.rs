use crate::config::Settings;
use crate::endpoint::{build_async_client, EndpointClient};
use crate::handler::ForecastHandler;
use crate::providers::{PriceProvider, ProviderKind};
use crate::storage::ObjectStore;
use anyhow::Result;
use log::debug;
use reqwest::Client;

/// Settings plus the shared HTTP client every command works from.
#[derive(Clone)]
pub struct AppContext {
    settings: Settings,
    http: Client,
}

impl AppContext {
    pub fn initialize(settings: Settings) -> Result<Self> {
        let http = build_async_client(Some(settings.endpoint_timeout))?;
        debug!(
            "Initialized context: store {}, {} ticker(s), prediction length {}",
            settings.data_store,
            settings.tickers.tickers().len(),
            settings.prediction_length
        );
        Ok(Self { settings, http })
    }

    pub fn from_env() -> Result<Self> {
        Self::initialize(Settings::from_env()?)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// The configured data store.
    pub fn store(&self) -> ObjectStore {
        self.store_at(&self.settings.data_store)
    }

    /// Another store reachable with the same credentials.
    pub fn store_at(&self, location: &str) -> ObjectStore {
        ObjectStore::from_location(
            location,
            self.settings.data_store_token.clone(),
            self.http.clone(),
        )
    }

    pub fn endpoint_client(&self) -> Result<EndpointClient> {
        EndpointClient::from_settings(self.http.clone(), &self.settings)
    }

    pub fn handler(&self) -> Result<ForecastHandler> {
        Ok(ForecastHandler::new(
            self.store(),
            self.endpoint_client()?,
            &self.settings,
        ))
    }

    pub fn provider(&self, kind: ProviderKind) -> Result<PriceProvider<'_>> {
        PriceProvider::new(kind, &self.http, &self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn endpoint_requires_url() {
        let ctx = AppContext::initialize(Settings::default()).unwrap();
        assert!(ctx.endpoint_client().is_err());
        assert!(ctx.handler().is_err());

        let settings = Settings::from_settings_map(&HashMap::from([(
            "FORECAST_ENDPOINT_URL".to_string(),
            "http://localhost:8080/invocations".to_string(),
        )]))
        .unwrap();
        let ctx = AppContext::initialize(settings).unwrap();
        assert_eq!(
            ctx.endpoint_client().unwrap().url(),
            "http://localhost:8080/invocations"
        );
        assert_eq!(ctx.store().uri("train/IBM.json"), "data/store/train/IBM.json");
    }
}
