use crate::error::ForecastError;
use crate::models::normalize_ticker_symbol;

pub const DEFAULT_TICKERS: [&str; 4] = ["IBM", "AAPL", "AMZN", "GOOGL"];

/// Allow-list of tickers that have stored datasets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerUniverse {
    tickers: Vec<String>,
}

impl Default for TickerUniverse {
    fn default() -> Self {
        Self {
            tickers: DEFAULT_TICKERS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl TickerUniverse {
    /// Builds a universe from raw symbols, dropping blanks and duplicates.
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tickers: Vec<String> = Vec::new();
        for symbol in symbols {
            if let Some(normalized) = normalize_ticker_symbol(symbol.as_ref()) {
                if !tickers.contains(&normalized) {
                    tickers.push(normalized);
                }
            }
        }
        Self { tickers }
    }

    pub fn parse_list(raw: &str) -> Self {
        Self::new(raw.split(|c: char| c == ',' || c.is_whitespace()))
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    pub fn contains(&self, raw: &str) -> bool {
        normalize_ticker_symbol(raw)
            .map(|ticker| self.tickers.contains(&ticker))
            .unwrap_or(false)
    }

    pub fn resolve(&self, raw: &str) -> Result<String, ForecastError> {
        let Some(ticker) = normalize_ticker_symbol(raw) else {
            return Err(ForecastError::InvalidRequest(
                "ticker_name must not be empty".to_string(),
            ));
        };
        if self.tickers.contains(&ticker) {
            Ok(ticker)
        } else {
            Err(ForecastError::UnknownTicker {
                ticker,
                supported: self.tickers.join(", "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TickerUniverse;
    use crate::error::ForecastError;

    #[test]
    fn resolve_normalizes_case() {
        let universe = TickerUniverse::default();
        assert_eq!(universe.resolve(" ibm ").unwrap(), "IBM");
        assert_eq!(universe.resolve("googl").unwrap(), "GOOGL");
    }

    #[test]
    fn resolve_rejects_unknown_and_blank() {
        let universe = TickerUniverse::parse_list("aapl, msft msft");
        assert_eq!(universe.tickers(), &["AAPL".to_string(), "MSFT".to_string()]);
        assert!(matches!(
            universe.resolve("IBM"),
            Err(ForecastError::UnknownTicker { .. })
        ));
        assert!(matches!(
            universe.resolve("   "),
            Err(ForecastError::InvalidRequest(_))
        ));
    }
}
