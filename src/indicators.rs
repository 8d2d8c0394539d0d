use statrs::statistics::Statistics;

/// Rolling mean over `window` points, NaN until the window is full.
///
/// When `fwd_fill_to_end` is positive the last `fwd_fill_to_end` points are
/// replaced by the average at that position, so a benchmark line can be
/// held flat across a forecast horizon.
pub fn moving_average(prices: &[f64], window: usize, fwd_fill_to_end: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    if window == 0 || prices.len() < window {
        return vec![f64::NAN; prices.len()];
    }

    let mut sma_values = Vec::with_capacity(prices.len());
    for _ in 0..window - 1 {
        sma_values.push(f64::NAN);
    }

    let mut window_sum: f64 = prices[..window].iter().sum();
    sma_values.push(window_sum / window as f64);
    for i in window..prices.len() {
        window_sum += prices[i] - prices[i - window];
        sma_values.push(window_sum / window as f64);
    }

    if fwd_fill_to_end > 0 && fwd_fill_to_end <= sma_values.len() {
        let anchor_idx = sma_values.len() - fwd_fill_to_end;
        let anchor = sma_values[anchor_idx];
        for value in &mut sma_values[anchor_idx..] {
            *value = anchor;
        }
    }

    sma_values
}

/// Rolling sample standard deviation, NaN until the window is full.
pub fn rolling_std(prices: &[f64], window: usize) -> Vec<f64> {
    if window < 2 || prices.len() < window {
        return vec![f64::NAN; prices.len()];
    }
    let mut values = vec![f64::NAN; window - 1];
    values.extend(
        prices
            .windows(window)
            .map(|slice| slice.iter().std_dev()),
    );
    values
}

/// Sum of squared rolling deviations over the defined region, divided by the full length.
pub fn volatility(prices: &[f64], window: usize) -> f64 {
    if prices.is_empty() {
        return 0.0;
    }
    let squared: f64 = rolling_std(prices, window)
        .iter()
        .filter(|value| value.is_finite())
        .map(|value| value * value)
        .sum();
    squared / prices.len() as f64
}

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub middle: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger_bands(prices: &[f64], window: usize, num_std: f64) -> BollingerBands {
    let middle = moving_average(prices, window, 0);
    let std = rolling_std(prices, window);
    let upper = middle
        .iter()
        .zip(&std)
        .map(|(mean, dev)| mean + dev * num_std)
        .collect();
    let lower = middle
        .iter()
        .zip(&std)
        .map(|(mean, dev)| mean - dev * num_std)
        .collect();
    BollingerBands {
        middle,
        upper,
        lower,
    }
}
