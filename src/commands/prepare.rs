use super::{TEST_DATASET, TRAIN_DATASET, VALID_DATASET};
use crate::context::AppContext;
use crate::deepar::{encode_json_lines, instance_for_ticker};
use crate::models::PriceField;
use crate::price_data::PriceHistory;
use crate::split::{train_test_valid_split, train_test_windows};
use crate::storage::{channel_key, dataset_key};
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use log::{info, warn};
use std::ops::Range;
use std::path::{Path, PathBuf};

pub const DEFAULT_CHANNEL_PATH: &str = "stock_deepar";
pub const DEFAULT_TRAIN_PART: f64 = 0.9;
pub const DEFAULT_TEST_WINDOWS: usize = 4;

pub struct PrepareOptions {
    pub data_file: PathBuf,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Extra fields written as `dynamic_feat` in the datasets and channels.
    pub features: Vec<PriceField>,
    pub channel_path: String,
    pub train_part: f64,
    pub num_test_windows: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrepareSummary {
    pub tickers: Vec<String>,
    pub train_channel: String,
    pub test_channel: String,
}

pub async fn run(app: &AppContext, options: &PrepareOptions) -> Result<PrepareSummary> {
    let settings = app.settings();
    let mut history = load_history(&options.data_file)?;
    if let Some((first, last)) = history.date_range() {
        info!(
            "Loaded {} ticker(s) from {} covering {} to {}",
            history.tickers().len(),
            options.data_file.display(),
            first,
            last
        );
    }
    if options.start.is_some() || options.end.is_some() {
        history = history.restrict_to_date_range(options.start, options.end)?;
    }
    let history = history.restrict_to_tickers(settings.tickers.tickers())?;
    for missing in settings
        .tickers
        .tickers()
        .iter()
        .filter(|ticker| !history.tickers().contains(*ticker))
    {
        warn!("{} has no bars in {}", missing, options.data_file.display());
    }

    let tickers = history.tickers().to_vec();
    if tickers.is_empty() {
        return Err(anyhow!("No configured tickers found in {}", options.data_file.display()));
    }

    let store = app.store();
    let interval = settings.frequency.code();
    let pl = settings.prediction_length;
    let mut train_instances = Vec::with_capacity(tickers.len());
    let mut test_instances = Vec::new();
    for ticker in &tickers {
        let instance = |range: Range<usize>, horizon: usize| {
            instance_for_ticker(
                &history,
                ticker,
                settings.target_field,
                &options.features,
                settings.frequency,
                range,
                horizon,
            )
        };

        let target = history.series_for(ticker, settings.target_field, settings.frequency)?;
        let windows = train_test_valid_split(&target, pl)?;
        let len = target.len();
        for (dataset, range) in [
            (TRAIN_DATASET, 0..windows.train.len()),
            (TEST_DATASET, 0..windows.test.len()),
            (VALID_DATASET, len - windows.valid.len()..len),
        ] {
            store
                .put_json(&dataset_key(dataset, ticker), &instance(range, pl)?)
                .await?;
        }
        info!(
            "{}: {} points, train={} test={} valid={}",
            ticker,
            len,
            windows.train.len(),
            windows.test.len(),
            windows.valid.len()
        );

        let channels = train_test_windows(len, options.train_part, options.num_test_windows)?;
        train_instances.push(instance(channels.train.clone(), 0)?);
        for range in &channels.tests {
            test_instances.push(instance(range.clone(), 0)?);
        }
    }

    store
        .put(
            &channel_key(&options.channel_path, interval, "train"),
            encode_json_lines(&train_instances)?,
        )
        .await?;
    store
        .put(
            &channel_key(&options.channel_path, interval, "test"),
            encode_json_lines(&test_instances)?,
        )
        .await?;

    let summary = PrepareSummary {
        tickers,
        train_channel: store.channel_uri(&options.channel_path, interval, "train"),
        test_channel: store.channel_uri(&options.channel_path, interval, "test"),
    };
    info!(
        "Wrote {} training and {} test instance(s) to {} and {}",
        train_instances.len(),
        test_instances.len(),
        summary.train_channel,
        summary.test_channel
    );
    Ok(summary)
}

/// Reads a bincode snapshot, or raw bars when the file ends in `.csv`.
fn load_history(path: &Path) -> Result<PriceHistory> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        PriceHistory::read_csv(path)
    } else {
        PriceHistory::load_from_file(path)
    }
}
