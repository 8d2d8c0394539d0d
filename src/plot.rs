//! Quantile forecast charts rendered as standalone SVG, plus the HTML page
//! that embeds them.

use crate::deepar::QuantileForecast;
use crate::models::TimeSeries;
use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use std::fmt::Write as _;

pub const DEFAULT_WIDTH: f64 = 960.0;
pub const DEFAULT_HEIGHT: f64 = 480.0;
const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 50.0;
const Y_TICKS: usize = 5;
const X_TICKS: usize = 6;

const OBSERVED_COLOR: &str = "#000000";
const MEDIAN_COLOR: &str = "#1f77b4";
const BAND_COLOR: &str = "#f2d338";
const BENCHMARK_COLOR: &str = "#d62728";
const SAMPLE_COLOR: &str = "#87cefa";

pub struct QuantileChart<'a> {
    title: String,
    forecast: &'a QuantileForecast,
    observed: Option<TimeSeries>,
    benchmark: Option<(String, TimeSeries)>,
    show_samples: bool,
    width: f64,
    height: f64,
}

impl<'a> QuantileChart<'a> {
    pub fn new(title: &str, forecast: &'a QuantileForecast) -> Self {
        Self {
            title: title.to_string(),
            forecast,
            observed: None,
            benchmark: None,
            show_samples: false,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }

    pub fn with_observed(mut self, observed: TimeSeries) -> Self {
        self.observed = Some(observed);
        self
    }

    pub fn with_benchmark(mut self, name: &str, benchmark: TimeSeries) -> Self {
        self.benchmark = Some((name.to_string(), benchmark));
        self
    }

    pub fn with_samples(mut self, show: bool) -> Self {
        self.show_samples = show;
        self
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = width.max(MARGIN_LEFT + MARGIN_RIGHT + 10.0);
        self.height = height.max(MARGIN_TOP + MARGIN_BOTTOM + 10.0);
        self
    }

    pub fn render(&self) -> Result<String> {
        let median = self
            .forecast
            .median()
            .ok_or_else(|| anyhow!("Forecast has no 0.5 quantile to plot"))?;
        let (low_level, high_level) = band_levels(&self.forecast.levels())
            .ok_or_else(|| anyhow!("Forecast needs one quantile below and one above 0.5"))?;
        let low = self
            .forecast
            .quantile(low_level)
            .ok_or_else(|| anyhow!("Missing quantile {}", low_level))?;
        let high = self
            .forecast
            .quantile(high_level)
            .ok_or_else(|| anyhow!("Missing quantile {}", high_level))?;

        let samples: Vec<TimeSeries> = if self.show_samples {
            self.forecast
                .samples
                .iter()
                .map(|values| TimeSeries::new(self.forecast.start, self.forecast.frequency, values.clone()))
                .collect()
        } else {
            Vec::new()
        };

        let mut all: Vec<&TimeSeries> = vec![&median, &low, &high];
        all.extend(self.observed.iter());
        all.extend(self.benchmark.iter().map(|(_, series)| series));
        all.extend(samples.iter());
        let frame = Frame::fit(&all, self.width, self.height)?;

        let mut svg = String::new();
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif" font-size="12">"#,
            w = self.width,
            h = self.height
        );
        let _ = writeln!(
            svg,
            r#"<rect x="0" y="0" width="{}" height="{}" fill="white"/>"#,
            self.width, self.height
        );
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-size="16">{}</text>"#,
            self.width / 2.0,
            MARGIN_TOP / 2.0 + 6.0,
            escape(&self.title)
        );
        frame.write_axes(&mut svg);

        for sample in &samples {
            frame.write_line(&mut svg, sample, SAMPLE_COLOR, 0.2, 1.0);
        }
        frame.write_band(&mut svg, &low, &high);
        if let Some(observed) = self.observed.as_ref() {
            frame.write_line(&mut svg, observed, OBSERVED_COLOR, 1.0, 1.5);
        }
        frame.write_line(&mut svg, &median, MEDIAN_COLOR, 1.0, 2.0);
        if let Some((_, benchmark)) = self.benchmark.as_ref() {
            frame.write_line(&mut svg, benchmark, BENCHMARK_COLOR, 1.0, 1.5);
        }

        let mut legend = Vec::new();
        if self.observed.is_some() {
            legend.push((OBSERVED_COLOR.to_string(), "target".to_string()));
        }
        legend.push((
            BAND_COLOR.to_string(),
            format!(
                "{}% confidence interval",
                format_number((high_level - low_level) * 100.0)
            ),
        ));
        legend.push((MEDIAN_COLOR.to_string(), "prediction median".to_string()));
        if let Some((name, _)) = self.benchmark.as_ref() {
            legend.push((BENCHMARK_COLOR.to_string(), name.clone()));
        }
        frame.write_legend(&mut svg, &legend);

        svg.push_str("</svg>\n");
        Ok(svg)
    }
}

/// Widest band: the lowest level below the median and the highest above it.
fn band_levels(levels: &[f64]) -> Option<(f64, f64)> {
    let low = levels.iter().copied().find(|level| *level < 0.5)?;
    let high = levels.iter().copied().rev().find(|level| *level > 0.5)?;
    Some((low, high))
}

struct Frame {
    x_min: i64,
    x_max: i64,
    y_min: f64,
    y_max: f64,
    width: f64,
    height: f64,
}

impl Frame {
    fn fit(series: &[&TimeSeries], width: f64, height: f64) -> Result<Self> {
        let mut x_min = i64::MAX;
        let mut x_max = i64::MIN;
        let mut y_min = f64::INFINITY;
        let mut y_max = f64::NEG_INFINITY;
        for ts in series {
            for (idx, value) in ts.values.iter().enumerate() {
                if !value.is_finite() {
                    continue;
                }
                let x = seconds(ts.timestamp_at(idx));
                x_min = x_min.min(x);
                x_max = x_max.max(x);
                y_min = y_min.min(*value);
                y_max = y_max.max(*value);
            }
        }
        if x_min > x_max {
            return Err(anyhow!("Nothing to plot: every series is empty or non-finite"));
        }
        if x_min == x_max {
            x_max = x_min + 86_400;
        }
        if y_max - y_min < f64::EPSILON {
            y_min -= 1.0;
            y_max += 1.0;
        } else {
            let pad = (y_max - y_min) * 0.05;
            y_min -= pad;
            y_max += pad;
        }
        Ok(Self {
            x_min,
            x_max,
            y_min,
            y_max,
            width,
            height,
        })
    }

    fn plot_width(&self) -> f64 {
        self.width - MARGIN_LEFT - MARGIN_RIGHT
    }

    fn plot_height(&self) -> f64 {
        self.height - MARGIN_TOP - MARGIN_BOTTOM
    }

    fn x(&self, timestamp: NaiveDateTime) -> f64 {
        let span = (self.x_max - self.x_min) as f64;
        MARGIN_LEFT + (seconds(timestamp) - self.x_min) as f64 / span * self.plot_width()
    }

    fn y(&self, value: f64) -> f64 {
        MARGIN_TOP + (self.y_max - value) / (self.y_max - self.y_min) * self.plot_height()
    }

    fn write_axes(&self, svg: &mut String) {
        let bottom = MARGIN_TOP + self.plot_height();
        let right = MARGIN_LEFT + self.plot_width();
        let _ = writeln!(
            svg,
            r##"<g stroke="#444" stroke-width="1"><line x1="{l}" y1="{b}" x2="{r}" y2="{b}"/><line x1="{l}" y1="{t}" x2="{l}" y2="{b}"/></g>"##,
            l = MARGIN_LEFT,
            r = right,
            t = MARGIN_TOP,
            b = bottom
        );

        for i in 0..=Y_TICKS {
            let value = self.y_min + (self.y_max - self.y_min) * i as f64 / Y_TICKS as f64;
            let y = self.y(value);
            let _ = writeln!(
                svg,
                r##"<line x1="{x1:.1}" y1="{y:.1}" x2="{x2:.1}" y2="{y:.1}" stroke="#ddd"/><text x="{tx:.1}" y="{ty:.1}" text-anchor="end">{label}</text>"##,
                x1 = MARGIN_LEFT,
                x2 = right,
                y = y,
                tx = MARGIN_LEFT - 6.0,
                ty = y + 4.0,
                label = format_number(value)
            );
        }

        for i in 0..=X_TICKS {
            let secs = self.x_min + (self.x_max - self.x_min) * i as i64 / X_TICKS as i64;
            let Some(timestamp) = chrono::DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc())
            else {
                continue;
            };
            let x = self.x(timestamp);
            let _ = writeln!(
                svg,
                r##"<line x1="{x:.1}" y1="{b:.1}" x2="{x:.1}" y2="{b6:.1}" stroke="#444"/><text x="{x:.1}" y="{ty:.1}" text-anchor="middle">{label}</text>"##,
                x = x,
                b = bottom,
                b6 = bottom + 6.0,
                ty = bottom + 20.0,
                label = timestamp.format("%Y-%m-%d")
            );
        }
    }

    fn write_line(&self, svg: &mut String, ts: &TimeSeries, color: &str, opacity: f64, width: f64) {
        // Non-finite values break the line into separate segments.
        let mut segment: Vec<String> = Vec::new();
        let mut segments: Vec<Vec<String>> = Vec::new();
        for (idx, value) in ts.values.iter().enumerate() {
            if value.is_finite() {
                segment.push(format!(
                    "{:.1},{:.1}",
                    self.x(ts.timestamp_at(idx)),
                    self.y(*value)
                ));
            } else if !segment.is_empty() {
                segments.push(std::mem::take(&mut segment));
            }
        }
        if !segment.is_empty() {
            segments.push(segment);
        }
        for points in segments {
            let _ = writeln!(
                svg,
                r#"<polyline fill="none" stroke="{}" stroke-opacity="{}" stroke-width="{}" points="{}"/>"#,
                color,
                opacity,
                width,
                points.join(" ")
            );
        }
    }

    fn write_band(&self, svg: &mut String, low: &TimeSeries, high: &TimeSeries) {
        let indices: Vec<usize> = (0..low.len().min(high.len()))
            .filter(|idx| low.values[*idx].is_finite() && high.values[*idx].is_finite())
            .collect();
        if indices.is_empty() {
            return;
        }
        let upper = indices
            .iter()
            .map(|idx| format!("{:.1},{:.1}", self.x(high.timestamp_at(*idx)), self.y(high.values[*idx])));
        let lower = indices
            .iter()
            .rev()
            .map(|idx| format!("{:.1},{:.1}", self.x(low.timestamp_at(*idx)), self.y(low.values[*idx])));
        let points: Vec<String> = upper.chain(lower).collect();
        let _ = writeln!(
            svg,
            r#"<polygon fill="{}" fill-opacity="0.5" stroke="none" points="{}"/>"#,
            BAND_COLOR,
            points.join(" ")
        );
    }

    fn write_legend(&self, svg: &mut String, entries: &[(String, String)]) {
        let x = MARGIN_LEFT + 10.0;
        for (i, (color, label)) in entries.iter().enumerate() {
            let y = MARGIN_TOP + 12.0 + i as f64 * 18.0;
            let _ = writeln!(
                svg,
                r#"<rect x="{:.1}" y="{:.1}" width="14" height="4" fill="{}"/><text x="{:.1}" y="{:.1}">{}</text>"#,
                x,
                y - 4.0,
                color,
                x + 20.0,
                y,
                escape(label)
            );
        }
    }
}

fn seconds(timestamp: NaiveDateTime) -> i64 {
    timestamp.and_utc().timestamp()
}

fn format_number(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{}", value.round() as i64)
    } else if value.abs() >= 100.0 {
        format!("{:.1}", value)
    } else {
        format!("{:.2}", value)
    }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub struct PageSection {
    pub heading: String,
    pub svg: String,
    pub caption: Option<String>,
}

/// A self-contained HTML page with one chart per section.
pub fn render_page(title: &str, sections: &[PageSection]) -> String {
    let mut output = String::new();
    output.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    output.push_str("<meta charset=\"UTF-8\">\n");
    output.push_str(&format!("<title>{}</title>\n", escape(title)));
    output.push_str("<style>\n");
    output.push_str("body { font-family: Arial, sans-serif; max-width: 1000px; margin: 0 auto; padding: 20px; }\n");
    output.push_str("h1 { color: #333; border-bottom: 2px solid #1f77b4; padding-bottom: 10px; }\n");
    output.push_str("h2 { color: #555; margin-top: 30px; }\n");
    output.push_str("figure { margin: 0; }\n");
    output.push_str("figcaption { color: #777; font-size: 0.9em; }\n");
    output.push_str("</style>\n</head>\n<body>\n");
    output.push_str(&format!("<h1>{}</h1>\n", escape(title)));

    if sections.is_empty() {
        output.push_str("<p>No forecasts to display.</p>\n");
    }
    for section in sections {
        output.push_str(&format!("<h2>{}</h2>\n<figure>\n", escape(&section.heading)));
        output.push_str(&section.svg);
        if let Some(caption) = section.caption.as_ref() {
            output.push_str(&format!("<figcaption>{}</figcaption>\n", escape(caption)));
        }
        output.push_str("</figure>\n");
    }

    output.push_str("</body>\n</html>\n");
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deepar::Prediction;
    use crate::models::Frequency;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 3, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
    }

    fn forecast(keys: &[&str]) -> QuantileForecast {
        let quantiles: BTreeMap<String, Vec<f64>> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| (key.to_string(), vec![10.0 + i as f64, 11.0 + i as f64, 12.0 + i as f64]))
            .collect();
        let prediction = Prediction {
            quantiles,
            samples: Some(vec![vec![10.5, 11.5, 12.5]]),
            mean: None,
        };
        QuantileForecast::from_prediction(&prediction, start(), Frequency::Daily).unwrap()
    }

    #[test]
    fn renders_band_median_and_legend() {
        let forecast = forecast(&["0.1", "0.5", "0.9"]);
        let observed = TimeSeries::new(start(), Frequency::Daily, vec![9.0, f64::NAN, 11.0, 12.0]);
        let benchmark = TimeSeries::new(start(), Frequency::Daily, vec![10.0, 10.5, 11.0]);
        let svg = QuantileChart::new("IBM <forecast>", &forecast)
            .with_observed(observed)
            .with_benchmark("SMA", benchmark)
            .with_samples(true)
            .render()
            .unwrap();

        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("<polygon"));
        assert!(svg.contains("80% confidence interval"));
        assert!(svg.contains("prediction median"));
        assert!(svg.contains(">SMA<"));
        assert!(svg.contains("IBM &lt;forecast&gt;"));
        assert!(svg.contains("2021-03-01"));
        // Observed line is split around the NaN, plus median, benchmark and one sample.
        assert_eq!(svg.matches("<polyline").count(), 5);
    }

    #[test]
    fn requires_median_and_band() {
        let no_median = forecast(&["0.1", "0.9"]);
        assert!(QuantileChart::new("x", &no_median).render().is_err());
        let no_band = forecast(&["0.5", "0.9"]);
        assert!(QuantileChart::new("x", &no_band).render().is_err());
    }

    #[test]
    fn band_uses_widest_levels() {
        assert_eq!(band_levels(&[0.05, 0.1, 0.5, 0.9, 0.95]), Some((0.05, 0.95)));
        assert_eq!(band_levels(&[0.5]), None);
    }

    #[test]
    fn page_embeds_sections() {
        let page = render_page(
            "Forecasts",
            &[PageSection {
                heading: "IBM".to_string(),
                svg: "<svg></svg>\n".to_string(),
                caption: Some("valid dataset".to_string()),
            }],
        );
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("<h2>IBM</h2>"));
        assert!(page.contains("<svg></svg>"));
        assert!(page.contains("<figcaption>valid dataset</figcaption>"));
        assert!(render_page("Empty", &[]).contains("No forecasts"));
    }
}
