use thiserror::Error;

/// Failures the request handler reports back to callers with a status code.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unsupported ticker {ticker} (supported: {supported})")]
    UnknownTicker { ticker: String, supported: String },
    #[error("dataset {key} not found")]
    DatasetNotFound { key: String },
    #[error("forecasting endpoint failed: {0}")]
    Endpoint(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ForecastError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) | Self::UnknownTicker { .. } => 400,
            Self::DatasetNotFound { .. } => 404,
            Self::Endpoint(_) => 502,
            Self::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ForecastError;

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(ForecastError::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(
            ForecastError::DatasetNotFound {
                key: "valid/IBM.json".into()
            }
            .status_code(),
            404
        );
        assert_eq!(ForecastError::Endpoint("down".into()).status_code(), 502);
        let internal: ForecastError = anyhow::anyhow!("boom").into();
        assert_eq!(internal.status_code(), 500);
    }
}
