use super::predict::{record_key, PredictionRecord};
use super::{BENCHMARK_DATASET, TEST_DATASET};
use crate::context::AppContext;
use crate::deepar::DeepArInstance;
use crate::models::TimeSeries;
use crate::plot::{render_page, PageSection, QuantileChart};
use crate::storage::{dataset_key, ObjectStore};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use std::path::PathBuf;

pub const DEFAULT_PAGE_TITLE: &str = "Stock price forecasts";
const BENCHMARK_LABEL: &str = "SMA";

pub struct RenderOptions {
    /// Record names under `predictions/`; every configured ticker when empty.
    pub records: Vec<String>,
    /// Observed points shown before the forecast starts.
    pub history: usize,
    pub show_samples: bool,
    pub title: String,
    pub width: f64,
    pub height: f64,
    pub output: PathBuf,
    /// Also store the page under this key.
    pub publish_key: Option<String>,
}

pub async fn run(app: &AppContext, options: &RenderOptions) -> Result<String> {
    let store = app.store();
    let names: Vec<String> = if options.records.is_empty() {
        app.settings().tickers.tickers().to_vec()
    } else {
        options.records.clone()
    };

    let mut sections = Vec::new();
    for name in &names {
        let key = record_key(name);
        let Some(record) = store.get_json::<PredictionRecord>(&key).await? else {
            warn!("No forecast record at {}, skipping", store.uri(&key));
            continue;
        };
        sections.push(render_record(&store, name, &record, options).await?);
    }
    if sections.is_empty() {
        return Err(anyhow!(
            "No forecast records found for {}; run predict first",
            names.join(", ")
        ));
    }

    let page = render_page(&options.title, &sections);
    if let Some(parent) = options.output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    tokio::fs::write(&options.output, page.as_bytes())
        .await
        .with_context(|| format!("Failed to write {}", options.output.display()))?;
    info!(
        "Rendered {} forecast chart(s) to {}",
        sections.len(),
        options.output.display()
    );
    if let Some(key) = options.publish_key.as_deref() {
        store.put(key, page.clone().into_bytes()).await?;
        info!("Published page to {}", store.uri(key));
    }
    Ok(page)
}

async fn render_record(
    store: &ObjectStore,
    name: &str,
    record: &PredictionRecord,
    options: &RenderOptions,
) -> Result<PageSection> {
    let forecast = record.forecast()?;
    let mut chart = QuantileChart::new(name, &forecast)
        .with_samples(options.show_samples)
        .with_size(options.width, options.height);

    let mut actual = None;
    if let Some(ticker) = record.ticker.as_deref() {
        let key = dataset_key(TEST_DATASET, ticker);
        if let Some(test) = store.get_json::<DeepArInstance>(&key).await? {
            actual = actual_around(
                &test.to_series(record.frequency)?,
                forecast.start,
                forecast.len(),
                options.history,
            )?;
        }
    }
    let observed = match actual {
        Some(actual) => Some(actual),
        None => {
            let given = record.instance.to_series(record.frequency)?;
            let from = given.len().saturating_sub(options.history);
            Some(given.slice(from..given.len())?)
        }
    };
    if let Some(observed) = observed.filter(|series| !series.is_empty()) {
        chart = chart.with_observed(observed);
    }

    if let Some(ticker) = record.ticker.as_deref() {
        let key = dataset_key(BENCHMARK_DATASET, ticker);
        if let Some(benchmark) = store.get_json::<DeepArInstance>(&key).await? {
            let series: TimeSeries = benchmark.to_series(record.frequency)?;
            if series.start == forecast.start {
                chart = chart.with_benchmark(BENCHMARK_LABEL, series);
            } else {
                debug!(
                    "{}: benchmark starts {} but the forecast starts {}, not drawn",
                    name, series.start, forecast.start
                );
            }
        }
    }

    let svg = chart
        .render()
        .with_context(|| format!("Failed to render forecast {}", name))?;
    Ok(PageSection {
        heading: name.to_string(),
        svg,
        caption: Some(format!(
            "{} step(s) from {} ({} quantiles)",
            forecast.len(),
            record.forecast_start,
            forecast.levels().len()
        )),
    })
}

/// Stored values from `history` points before `forecast_start` through the end
/// of the forecast horizon, when the series covers the forecast start.
fn actual_around(
    stored: &TimeSeries,
    forecast_start: NaiveDateTime,
    horizon: usize,
    history: usize,
) -> Result<Option<TimeSeries>> {
    let Some(position) = stored.position_of(forecast_start) else {
        return Ok(None);
    };
    let from = position.saturating_sub(history);
    let to = position.saturating_add(horizon).min(stored.len());
    stored.slice(from..to).map(Some)
}
