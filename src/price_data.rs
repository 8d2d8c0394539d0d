use crate::models::{is_weekend, Frequency, PriceBar, PriceField, TimeSeries};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const PRICE_HISTORY_SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PriceHistorySnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    tickers: Vec<String>,
    bars: Vec<PriceBar>,
}

/// Daily bars for a set of tickers, grouped by ticker and sorted by date.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceHistory {
    tickers: Vec<String>,
    bars_by_ticker: BTreeMap<String, Vec<PriceBar>>,
}

impl PriceHistory {
    /// Groups bars by ticker. A later bar for the same ticker and date replaces an earlier one.
    pub fn from_bars(bars: Vec<PriceBar>) -> Result<Self> {
        let mut by_date: BTreeMap<String, BTreeMap<NaiveDate, PriceBar>> = BTreeMap::new();
        for bar in bars {
            by_date
                .entry(bar.ticker.clone())
                .or_default()
                .insert(bar.date, bar);
        }
        let bars_by_ticker: BTreeMap<String, Vec<PriceBar>> = by_date
            .into_iter()
            .map(|(ticker, dated)| (ticker, dated.into_values().collect::<Vec<_>>()))
            .filter(|(_, bars)| !bars.is_empty())
            .collect();
        if bars_by_ticker.is_empty() {
            return Err(anyhow!("Price history has no usable bars"));
        }
        Ok(Self {
            tickers: bars_by_ticker.keys().cloned().collect(),
            bars_by_ticker,
        })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn bars(&self, ticker: &str) -> Option<&[PriceBar]> {
        self.bars_by_ticker.get(ticker).map(Vec::as_slice)
    }

    pub fn all_bars(&self) -> impl Iterator<Item = &PriceBar> {
        self.bars_by_ticker.values().flatten()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.all_bars().map(|bar| bar.date).min()?;
        let last = self.all_bars().map(|bar| bar.date).max()?;
        Some((first, last))
    }

    pub fn restrict_to_date_range(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Self> {
        let bars = self
            .all_bars()
            .filter(|bar| start.map_or(true, |s| bar.date >= s))
            .filter(|bar| end.map_or(true, |e| bar.date <= e))
            .cloned()
            .collect();
        Self::from_bars(bars).with_context(|| {
            format!(
                "No bars left after restricting to {} - {}",
                start.map(|d| d.to_string()).unwrap_or_else(|| "start".into()),
                end.map(|d| d.to_string()).unwrap_or_else(|| "end".into())
            )
        })
    }

    pub fn restrict_to_tickers(&self, tickers: &[String]) -> Result<Self> {
        let bars = self
            .all_bars()
            .filter(|bar| tickers.contains(&bar.ticker))
            .cloned()
            .collect();
        Self::from_bars(bars)
    }

    /// Reshapes one ticker's field into a regularly spaced series.
    ///
    /// Bars are averaged into frequency buckets. Empty buckets take the next
    /// observation when it is exactly one step away, otherwise the previous one.
    /// Business-daily series drop weekend bars first.
    pub fn series_for(
        &self,
        ticker: &str,
        field: PriceField,
        frequency: Frequency,
    ) -> Result<TimeSeries> {
        let bars = self
            .bars(ticker)
            .ok_or_else(|| anyhow!("No price history for ticker {}", ticker))?;
        if matches!(frequency, Frequency::Hourly) {
            return Err(anyhow!(
                "Hourly series cannot be built from daily bars for {}",
                ticker
            ));
        }

        let mut buckets: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
        for bar in bars {
            if matches!(frequency, Frequency::BusinessDaily) && is_weekend(bar.date) {
                continue;
            }
            let value = bar.value(field);
            let slot = buckets.entry(bucket_date(bar.date, frequency)).or_insert((0.0, 0));
            if value.is_finite() {
                slot.0 += value;
                slot.1 += 1;
            }
        }

        let (Some(first), Some(last)) = (
            buckets.keys().next().copied(),
            buckets.keys().next_back().copied(),
        ) else {
            return Err(anyhow!("No {} bars for ticker {}", frequency.code(), ticker));
        };

        let mut slots: Vec<Option<f64>> = Vec::new();
        let mut current = first;
        while current <= last {
            let observed = buckets
                .get(&current)
                .filter(|(_, count)| *count > 0)
                .map(|(sum, count)| sum / *count as f64);
            slots.push(observed);
            current = step_date(current, frequency);
        }

        let start = first
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("Invalid start date {}", first))?;
        Ok(TimeSeries::new(start, frequency, fill_gaps(&slots)))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| {
            format!("Failed to open price history snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: PriceHistorySnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != PRICE_HISTORY_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Price history snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                PRICE_HISTORY_SNAPSHOT_VERSION
            ));
        }
        info!(
            "Loaded price history snapshot generated at {} ({} tickers, {} bars)",
            snapshot.generated_at,
            snapshot.tickers.len(),
            snapshot.bars.len()
        );
        Self::from_bars(snapshot.bars)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;
        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create price history snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = PriceHistorySnapshot {
            version: PRICE_HISTORY_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            tickers: self.tickers.clone(),
            bars: self.all_bars().cloned().collect(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize price history snapshot")?;
        writer
            .flush()
            .context("Failed to flush price history snapshot to disk")?;
        Ok(())
    }

    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open price CSV at {}", path.display()))?;
        let bars = reader
            .deserialize::<PriceBar>()
            .enumerate()
            .map(|(idx, row)| row.with_context(|| format!("Invalid price row {}", idx + 1)))
            .collect::<Result<Vec<_>>>()?;
        Self::from_bars(bars)
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Unable to create price CSV at {}", path.display()))?;
        for bar in self.all_bars() {
            writer.serialize(bar)?;
        }
        writer.flush().context("Failed to flush price CSV")?;
        Ok(())
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

fn bucket_date(date: NaiveDate, frequency: Frequency) -> NaiveDate {
    match frequency {
        // Weekly buckets end on Sunday.
        Frequency::Weekly => {
            date + Duration::days(6 - date.weekday().num_days_from_monday() as i64)
        }
        _ => date,
    }
}

fn step_date(date: NaiveDate, frequency: Frequency) -> NaiveDate {
    match frequency {
        Frequency::Weekly => date + Duration::days(7),
        Frequency::BusinessDaily => {
            let mut next = date + Duration::days(1);
            while is_weekend(next) {
                next += Duration::days(1);
            }
            next
        }
        Frequency::Daily | Frequency::Hourly => date + Duration::days(1),
    }
}

/// Back-fill with limit 1, forward-fill the rest, zero anything still empty.
fn fill_gaps(slots: &[Option<f64>]) -> Vec<f64> {
    let mut filled: Vec<Option<f64>> = slots.to_vec();
    for idx in 0..slots.len().saturating_sub(1) {
        if slots[idx].is_none() {
            filled[idx] = slots[idx + 1];
        }
    }
    let mut last = None;
    filled
        .into_iter()
        .map(|slot| {
            if slot.is_some() {
                last = slot;
            }
            last.unwrap_or(0.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ticker: &str, date: &str, close: f64) -> PriceBar {
        PriceBar {
            ticker: ticker.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("valid date"),
            open: close,
            high: close,
            low: close,
            close,
            adj_close: close,
            volume: 1_000,
        }
    }

    #[test]
    fn from_bars_groups_sorts_and_dedups() {
        let history = PriceHistory::from_bars(vec![
            bar("BBB", "2021-01-05", 3.0),
            bar("AAA", "2021-01-05", 2.0),
            bar("AAA", "2021-01-04", 1.0),
            bar("AAA", "2021-01-05", 2.5),
        ])
        .unwrap();
        assert_eq!(history.tickers(), &["AAA".to_string(), "BBB".to_string()]);
        let aaa = history.bars("AAA").unwrap();
        assert_eq!(aaa.len(), 2);
        assert_eq!(aaa[0].close, 1.0);
        assert_eq!(aaa[1].close, 2.5);
        assert!(PriceHistory::from_bars(Vec::new()).is_err());
    }

    #[test]
    fn daily_series_fills_weekend_gaps() {
        // Friday, then Monday and Tuesday.
        let history = PriceHistory::from_bars(vec![
            bar("AAA", "2021-01-08", 10.0),
            bar("AAA", "2021-01-11", 13.0),
            bar("AAA", "2021-01-12", 14.0),
        ])
        .unwrap();
        let ts = history
            .series_for("AAA", PriceField::AdjClose, Frequency::Daily)
            .unwrap();
        // Saturday forward-fills, Sunday back-fills from Monday.
        assert_eq!(ts.values, vec![10.0, 10.0, 13.0, 13.0, 14.0]);
        assert_eq!(ts.format_start(), "2021-01-08 00:00:00");
    }

    #[test]
    fn business_series_drops_weekends() {
        let history = PriceHistory::from_bars(vec![
            bar("AAA", "2021-01-08", 10.0),
            bar("AAA", "2021-01-09", 99.0),
            bar("AAA", "2021-01-11", 13.0),
            bar("AAA", "2021-01-13", 15.0),
        ])
        .unwrap();
        let ts = history
            .series_for("AAA", PriceField::Close, Frequency::BusinessDaily)
            .unwrap();
        assert_eq!(ts.values, vec![10.0, 13.0, 15.0, 15.0]);
    }

    #[test]
    fn weekly_series_averages_buckets() {
        let history = PriceHistory::from_bars(vec![
            bar("AAA", "2021-01-04", 10.0),
            bar("AAA", "2021-01-05", 20.0),
            bar("AAA", "2021-01-12", 40.0),
        ])
        .unwrap();
        let ts = history
            .series_for("AAA", PriceField::Close, Frequency::Weekly)
            .unwrap();
        assert_eq!(ts.values, vec![15.0, 40.0]);
        assert_eq!(ts.format_start(), "2021-01-10 00:00:00");
    }

    #[test]
    fn missing_ticker_and_hourly_are_errors() {
        let history = PriceHistory::from_bars(vec![bar("AAA", "2021-01-04", 10.0)]).unwrap();
        assert!(history
            .series_for("ZZZ", PriceField::Close, Frequency::Daily)
            .is_err());
        assert!(history
            .series_for("AAA", PriceField::Close, Frequency::Hourly)
            .is_err());
    }

    #[test]
    fn date_range_restriction() {
        let history = PriceHistory::from_bars(vec![
            bar("AAA", "2021-01-04", 1.0),
            bar("AAA", "2021-01-05", 2.0),
            bar("AAA", "2021-01-06", 3.0),
        ])
        .unwrap();
        let start = NaiveDate::from_ymd_opt(2021, 1, 5);
        let restricted = history.restrict_to_date_range(start, None).unwrap();
        assert_eq!(restricted.bars("AAA").unwrap().len(), 2);
        let far = NaiveDate::from_ymd_opt(2022, 1, 1);
        assert!(history.restrict_to_date_range(far, None).is_err());
    }

    #[test]
    fn fill_gaps_zeroes_unfillable_leading_slots() {
        assert_eq!(
            fill_gaps(&[None, None, Some(2.0), None, None, Some(5.0)]),
            vec![0.0, 2.0, 2.0, 2.0, 5.0, 5.0]
        );
    }
}
