use super::{BENCHMARK_DATASET, TEST_DATASET, TRAIN_DATASET};
use crate::context::AppContext;
use crate::deepar::DeepArInstance;
use crate::indicators::moving_average;
use crate::models::{Frequency, TIMESTAMP_FORMAT};
use crate::storage::dataset_key;
use anyhow::{anyhow, Result};
use log::info;

/// SMA benchmark over the test horizon.
///
/// `test` extends `train` by one prediction length, which is the horizon a
/// ticker-only forecast covers. The moving average at the last training
/// point is held flat across that horizon, so the benchmark never sees the
/// prices it is compared against.
pub fn sma_benchmark(
    train: &DeepArInstance,
    test: &DeepArInstance,
    frequency: Frequency,
    window: usize,
) -> Result<DeepArInstance> {
    if train.start_timestamp()? != test.start_timestamp()? {
        return Err(anyhow!(
            "Train starts at {} but test starts at {}",
            train.start,
            test.start
        ));
    }
    if test.target.len() <= train.target.len() {
        return Err(anyhow!(
            "Test window ({} points) does not extend the training window ({} points)",
            test.target.len(),
            train.target.len()
        ));
    }
    let horizon = test.target.len() - train.target.len();
    let sma = moving_average(&test.target, window, horizon + 1);
    let benchmark = sma[train.target.len()..].to_vec();
    if benchmark.iter().any(|value| !value.is_finite()) {
        return Err(anyhow!(
            "{} training points are not enough for a {}-point moving average",
            train.target.len(),
            window
        ));
    }
    let series = train.to_series(frequency)?;
    Ok(DeepArInstance {
        start: series.next_timestamp().format(TIMESTAMP_FORMAT).to_string(),
        target: benchmark,
        cat: None,
        dynamic_feat: None,
    })
}

pub async fn run(app: &AppContext, window: Option<usize>) -> Result<Vec<String>> {
    let settings = app.settings();
    let window = window.unwrap_or(settings.benchmark_window);
    let store = app.store();

    let mut written = Vec::new();
    for ticker in settings.tickers.tickers() {
        let train = store.load_dataset(TRAIN_DATASET, ticker).await?;
        let test = store.load_dataset(TEST_DATASET, ticker).await?;
        let benchmark = sma_benchmark(&train, &test, settings.frequency, window)?;
        let key = dataset_key(BENCHMARK_DATASET, ticker);
        store.put_json(&key, &benchmark).await?;
        info!(
            "{}: {}-point SMA benchmark of {} value(s) at {}",
            ticker,
            window,
            benchmark.target.len(),
            store.uri(&key)
        );
        written.push(key);
    }
    Ok(written)
}
