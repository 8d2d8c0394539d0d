use anyhow::{anyhow, Result};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Timestamp layout used by the forecasting service for series starts.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
    pub volume: i64,
}

impl PriceBar {
    pub fn value(&self, field: PriceField) -> f64 {
        match field {
            PriceField::Open => self.open,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Close => self.close,
            PriceField::AdjClose => self.adj_close,
            PriceField::Volume => self.volume as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
    #[default]
    AdjClose,
    Volume,
}

impl PriceField {
    pub const ALL: [PriceField; 6] = [
        PriceField::Open,
        PriceField::High,
        PriceField::Low,
        PriceField::Close,
        PriceField::AdjClose,
        PriceField::Volume,
    ];

    pub fn parse(raw: &str) -> Result<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "open" => Ok(Self::Open),
            "high" => Ok(Self::High),
            "low" => Ok(Self::Low),
            "close" => Ok(Self::Close),
            "adjclose" | "adjustedclose" => Ok(Self::AdjClose),
            "volume" => Ok(Self::Volume),
            _ => Err(anyhow!(
                "Unknown price field {} (expected open, high, low, close, adj_close or volume)",
                raw.trim()
            )),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::High => "High",
            Self::Low => "Low",
            Self::Close => "Close",
            Self::AdjClose => "Adj Close",
            Self::Volume => "Volume",
        }
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Frequency {
    #[default]
    Daily,
    BusinessDaily,
    Weekly,
    Hourly,
}

impl Frequency {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "D" | "1D" | "DAILY" => Ok(Self::Daily),
            "B" | "BUSINESS" | "BUSINESSDAILY" => Ok(Self::BusinessDaily),
            "W" | "1W" | "WEEKLY" => Ok(Self::Weekly),
            "H" | "1H" | "HOURLY" => Ok(Self::Hourly),
            other => Err(anyhow!("Unsupported frequency {} (expected D, B, W or H)", other)),
        }
    }

    /// Pandas-style frequency code.
    pub fn code(self) -> &'static str {
        match self {
            Self::Daily => "D",
            Self::BusinessDaily => "B",
            Self::Weekly => "W",
            Self::Hourly => "H",
        }
    }

    pub fn next(self, timestamp: NaiveDateTime) -> NaiveDateTime {
        match self {
            Self::Daily => timestamp + Duration::days(1),
            Self::Weekly => timestamp + Duration::days(7),
            Self::Hourly => timestamp + Duration::hours(1),
            Self::BusinessDaily => {
                let mut next = timestamp + Duration::days(1);
                while is_weekend(next.date()) {
                    next += Duration::days(1);
                }
                next
            }
        }
    }

    pub fn advance(self, timestamp: NaiveDateTime, steps: usize) -> NaiveDateTime {
        match self {
            Self::Daily => timestamp + Duration::days(steps as i64),
            Self::Weekly => timestamp + Duration::days(7 * steps as i64),
            Self::Hourly => timestamp + Duration::hours(steps as i64),
            Self::BusinessDaily => {
                if steps == 0 {
                    return timestamp;
                }
                // A weekend start spends its first step reaching Monday.
                let (mut current, steps) = if is_weekend(timestamp.date()) {
                    (self.next(timestamp), steps - 1)
                } else {
                    (timestamp, steps)
                };
                current += Duration::days(7 * (steps / 5) as i64);
                for _ in 0..steps % 5 {
                    current = self.next(current);
                }
                current
            }
        }
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// A regularly spaced series of values starting at `start`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub start: NaiveDateTime,
    pub frequency: Frequency,
    pub values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(start: NaiveDateTime, frequency: Frequency, values: Vec<f64>) -> Self {
        Self {
            start,
            frequency,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn timestamp_at(&self, index: usize) -> NaiveDateTime {
        self.frequency.advance(self.start, index)
    }

    /// Timestamp of the last value, if any.
    pub fn end(&self) -> Option<NaiveDateTime> {
        self.len().checked_sub(1).map(|last| self.timestamp_at(last))
    }

    /// First timestamp after the series.
    pub fn next_timestamp(&self) -> NaiveDateTime {
        self.timestamp_at(self.len())
    }

    /// Index of the value stamped exactly at `timestamp`.
    pub fn position_of(&self, timestamp: NaiveDateTime) -> Option<usize> {
        let mut current = self.start;
        for idx in 0..self.len() {
            if current == timestamp {
                return Some(idx);
            }
            if current > timestamp {
                return None;
            }
            current = self.frequency.next(current);
        }
        None
    }

    pub fn slice(&self, range: Range<usize>) -> Result<TimeSeries> {
        if range.start > range.end || range.end > self.len() {
            return Err(anyhow!(
                "Slice {}..{} out of bounds for series of length {}",
                range.start,
                range.end,
                self.len()
            ));
        }
        Ok(TimeSeries {
            start: self.timestamp_at(range.start),
            frequency: self.frequency,
            values: self.values[range].to_vec(),
        })
    }

    pub fn format_start(&self) -> String {
        self.start.format(TIMESTAMP_FORMAT).to_string()
    }
}

pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let trimmed = raw.trim();
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT) {
        return Ok(parsed);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Ok(parsed);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| {
            anyhow!(
                "Timestamp must be YYYY-MM-DD or YYYY-MM-DD HH:MM:SS (value: {})",
                trimmed
            )
        })
}

/// Normalizes a ticker string by trimming whitespace and uppercasing.
pub fn normalize_ticker_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .expect("valid date")
    }

    #[test]
    fn price_field_accepts_provider_labels() {
        assert_eq!(PriceField::parse("Adj Close").unwrap(), PriceField::AdjClose);
        assert_eq!(PriceField::parse("adj_close").unwrap(), PriceField::AdjClose);
        assert_eq!(PriceField::parse(" VOLUME ").unwrap(), PriceField::Volume);
        assert!(PriceField::parse("vwap").is_err());
    }

    #[test]
    fn business_days_skip_weekends() {
        // 2021-01-08 is a Friday.
        let friday = at(2021, 1, 8);
        assert_eq!(Frequency::BusinessDaily.next(friday), at(2021, 1, 11));
        assert_eq!(Frequency::BusinessDaily.advance(friday, 5), at(2021, 1, 15));
        assert_eq!(Frequency::BusinessDaily.advance(friday, 6), at(2021, 1, 18));
    }

    #[test]
    fn business_days_from_a_weekend_start() {
        // 2021-01-09 is a Saturday.
        let saturday = at(2021, 1, 9);
        assert_eq!(Frequency::BusinessDaily.advance(saturday, 0), saturday);
        assert_eq!(Frequency::BusinessDaily.advance(saturday, 1), at(2021, 1, 11));
        assert_eq!(Frequency::BusinessDaily.advance(saturday, 5), at(2021, 1, 15));
        assert_eq!(Frequency::BusinessDaily.advance(saturday, 6), at(2021, 1, 18));
        for steps in 0..12 {
            let stepped = (0..steps).fold(saturday, |ts, _| Frequency::BusinessDaily.next(ts));
            assert_eq!(Frequency::BusinessDaily.advance(saturday, steps), stepped);
        }
    }

    #[test]
    fn position_of_finds_aligned_timestamps() {
        let ts = TimeSeries::new(at(2021, 1, 8), Frequency::BusinessDaily, vec![1.0; 4]);
        assert_eq!(ts.position_of(at(2021, 1, 8)), Some(0));
        assert_eq!(ts.position_of(at(2021, 1, 12)), Some(2));
        assert_eq!(ts.position_of(at(2021, 1, 9)), None);
        assert_eq!(ts.position_of(at(2021, 1, 14)), None);
        assert_eq!(ts.position_of(at(2021, 1, 1)), None);
    }

    #[test]
    fn series_slice_moves_start() {
        let ts = TimeSeries::new(at(2020, 1, 1), Frequency::Daily, vec![1.0, 2.0, 3.0, 4.0]);
        let tail = ts.slice(2..4).unwrap();
        assert_eq!(tail.start, at(2020, 1, 3));
        assert_eq!(tail.values, vec![3.0, 4.0]);
        assert_eq!(ts.next_timestamp(), at(2020, 1, 5));
        assert!(ts.slice(3..5).is_err());
    }

    #[test]
    fn parse_timestamp_accepts_dates() {
        assert_eq!(parse_timestamp("2020-02-03").unwrap(), at(2020, 2, 3));
        assert_eq!(
            parse_timestamp("2020-02-03 00:00:00").unwrap(),
            at(2020, 2, 3)
        );
        assert!(parse_timestamp("03/02/2020").is_err());
    }
}
