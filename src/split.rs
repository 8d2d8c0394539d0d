use crate::models::TimeSeries;
use anyhow::{anyhow, Result};
use log::debug;
use std::ops::Range;

/// Train, test and validation slices of one series.
///
/// Train stops `2 * prediction_length` points before the end, test stops
/// `prediction_length` points before the end (so it contains train), and
/// validation holds the final `prediction_length` points.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitWindows {
    pub train: TimeSeries,
    pub test: TimeSeries,
    pub valid: TimeSeries,
}

pub fn train_test_valid_split(ts: &TimeSeries, prediction_length: usize) -> Result<SplitWindows> {
    if prediction_length == 0 {
        return Err(anyhow!("prediction_length must be positive"));
    }
    let reserved = prediction_length
        .checked_mul(2)
        .ok_or_else(|| anyhow!("prediction_length {} is too large", prediction_length))?;
    if ts.len() <= reserved {
        return Err(anyhow!(
            "Series of length {} is too short for prediction_length {} (needs more than {})",
            ts.len(),
            prediction_length,
            reserved
        ));
    }
    let train_size = ts.len() - reserved;
    let test_size = ts.len() - prediction_length;
    debug!(
        "Splitting {} points into train={}, test={}, valid={}",
        ts.len(),
        train_size,
        test_size,
        prediction_length
    );
    Ok(SplitWindows {
        train: ts.slice(0..train_size)?,
        test: ts.slice(0..test_size)?,
        valid: ts.slice(test_size..ts.len())?,
    })
}

/// Index ranges for one training window followed by expanding test windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestWindows {
    pub train: Range<usize>,
    pub tests: Vec<Range<usize>>,
}

/// Train covers the first `floor(train_part * len)` points. Each test window
/// starts at 0 and extends `i * window` points past the training end, where
/// `window = floor((len - train) / num_test_windows)`.
pub fn train_test_windows(
    len: usize,
    train_part: f64,
    num_test_windows: usize,
) -> Result<TrainTestWindows> {
    if !(train_part > 0.0 && train_part <= 1.0) {
        return Err(anyhow!(
            "train_part must be in (0, 1] (value: {})",
            train_part
        ));
    }
    if num_test_windows == 0 {
        return Err(anyhow!("num_test_windows must be positive"));
    }
    let num_train = (train_part * len as f64).floor() as usize;
    if num_train == 0 {
        return Err(anyhow!(
            "Training window is empty for {} samples and train_part {}",
            len,
            train_part
        ));
    }
    let window = (len - num_train) / num_test_windows;
    if window == 0 {
        return Err(anyhow!(
            "{} samples leave no room for {} test windows after {} training samples",
            len,
            num_test_windows,
            num_train
        ));
    }
    debug!(
        "Sample size = {}, training set: {}, test set: {} * {}",
        len, num_train, num_test_windows, window
    );
    let tests = (1..=num_test_windows)
        .map(|idx| 0..num_train + idx * window)
        .collect();
    Ok(TrainTestWindows {
        train: 0..num_train,
        tests,
    })
}

impl TrainTestWindows {
    pub fn apply(&self, ts: &TimeSeries) -> Result<(TimeSeries, Vec<TimeSeries>)> {
        let train = ts.slice(self.train.clone())?;
        let tests = self
            .tests
            .iter()
            .map(|range| ts.slice(range.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok((train, tests))
    }
}
