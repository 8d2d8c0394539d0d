//! JSON wire format spoken by the DeepAR forecasting service.
//!
//! Training channels hold one [`DeepArInstance`] per line. Inference requests
//! wrap instances in a [`PredictionRequest`] and come back as a
//! [`PredictionResponse`] holding one prediction per instance.

use crate::models::{parse_timestamp, Frequency, PriceField, TimeSeries};
use crate::price_data::PriceHistory;
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

const QUANTILE_KEY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepArInstance {
    pub start: String,
    #[serde(
        serialize_with = "serialize_target",
        deserialize_with = "deserialize_target"
    )]
    pub target: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cat: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_feat: Option<Vec<Vec<f64>>>,
}

impl DeepArInstance {
    pub fn start_timestamp(&self) -> Result<NaiveDateTime> {
        parse_timestamp(&self.start)
    }

    pub fn to_series(&self, frequency: Frequency) -> Result<TimeSeries> {
        Ok(TimeSeries::new(
            self.start_timestamp()?,
            frequency,
            self.target.clone(),
        ))
    }

    /// Same target, new start. Used for forecasts anchored at a requested date.
    pub fn with_start(mut self, start: NaiveDateTime) -> Self {
        self.start = start.format(crate::models::TIMESTAMP_FORMAT).to_string();
        self
    }
}

pub fn series_to_instance(
    ts: &TimeSeries,
    cat: Option<Vec<u32>>,
    dynamic_feat: Option<Vec<Vec<f64>>>,
) -> Result<DeepArInstance> {
    if let Some(features) = dynamic_feat.as_ref() {
        if let Some(bad) = features.iter().find(|feat| feat.len() < ts.len()) {
            return Err(anyhow!(
                "Dynamic feature has {} values but the target has {}",
                bad.len(),
                ts.len()
            ));
        }
    }
    Ok(DeepArInstance {
        start: ts.format_start(),
        target: ts.values.clone(),
        cat,
        dynamic_feat: dynamic_feat.filter(|features| !features.is_empty()),
    })
}

/// Builds the instance for one ticker over `range` of its resampled series.
///
/// Each dynamic feature covers the target plus `horizon` further points, the
/// layout an inference request needs. Feature points past the end of the
/// history repeat the last known value.
pub fn instance_for_ticker(
    history: &PriceHistory,
    ticker: &str,
    target: PriceField,
    features: &[PriceField],
    frequency: Frequency,
    range: Range<usize>,
    horizon: usize,
) -> Result<DeepArInstance> {
    let ts = history.series_for(ticker, target, frequency)?.slice(range.clone())?;
    let feature_end = range.end.saturating_add(horizon);
    let dynamic_feat = features
        .iter()
        .map(|field| {
            let series = history.series_for(ticker, *field, frequency)?;
            let last = series
                .values
                .last()
                .copied()
                .ok_or_else(|| anyhow!("{} has no {} values", ticker, field))?;
            let available = feature_end.min(series.len());
            let mut values = series.values[range.start.min(available)..available].to_vec();
            values.resize(feature_end - range.start, last);
            Ok(values)
        })
        .collect::<Result<Vec<_>>>()?;
    series_to_instance(&ts, None, Some(dynamic_feat))
}

pub fn encode_json_lines(instances: &[DeepArInstance]) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    for instance in instances {
        serde_json::to_writer(&mut buffer, instance).context("Failed to encode instance")?;
        buffer.push(b'\n');
    }
    Ok(buffer)
}

pub fn decode_json_lines(bytes: &[u8]) -> Result<Vec<DeepArInstance>> {
    let text = std::str::from_utf8(bytes).context("JSON lines payload is not UTF-8")?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid instance on line {}", idx + 1))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionConfig {
    pub num_samples: u32,
    pub output_types: Vec<String>,
    pub quantiles: Vec<String>,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self::new(100, &[0.1, 0.5, 0.9])
    }
}

impl PredictionConfig {
    pub fn new(num_samples: u32, quantiles: &[f64]) -> Self {
        Self {
            num_samples,
            output_types: vec!["quantiles".to_string()],
            quantiles: quantiles.iter().map(|q| q.to_string()).collect(),
        }
    }

    pub fn with_samples(mut self) -> Self {
        if !self.output_types.iter().any(|t| t == "samples") {
            self.output_types.push("samples".to_string());
        }
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Result<Self> {
        self.quantiles = quantiles_for_confidence(confidence)?;
        Ok(self)
    }
}

/// Quantiles bounding a central interval of `confidence` percent, plus the median.
pub fn quantiles_for_confidence(confidence: f64) -> Result<Vec<String>> {
    if !(confidence > 50.0 && confidence < 100.0) {
        return Err(anyhow!(
            "Confidence must be strictly between 50 and 100 (value: {})",
            confidence
        ));
    }
    let low = (100.0 - confidence) / 200.0;
    let high = (100.0 + confidence) / 200.0;
    Ok(vec![low.to_string(), "0.5".to_string(), high.to_string()])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub instances: Vec<DeepArInstance>,
    pub configuration: PredictionConfig,
}

impl PredictionRequest {
    pub fn new(instances: Vec<DeepArInstance>, configuration: PredictionConfig) -> Self {
        Self {
            instances,
            configuration,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to encode prediction request")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predictions: Vec<Prediction>,
}

impl PredictionResponse {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body).context("Failed to parse prediction response")
    }

    /// The first prediction; requests carry a single instance.
    pub fn first(&self) -> Result<&Prediction> {
        self.predictions
            .first()
            .ok_or_else(|| anyhow!("Prediction response contains no predictions"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub quantiles: BTreeMap<String, Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<Vec<f64>>,
}

/// Quantile curves indexed from the first forecast timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileForecast {
    pub start: NaiveDateTime,
    pub frequency: Frequency,
    pub quantiles: BTreeMap<String, Vec<f64>>,
    pub samples: Vec<Vec<f64>>,
}

impl QuantileForecast {
    pub fn from_prediction(
        prediction: &Prediction,
        start: NaiveDateTime,
        frequency: Frequency,
    ) -> Result<Self> {
        let mut lengths = prediction.quantiles.values().map(Vec::len);
        let Some(expected) = lengths.next() else {
            return Err(anyhow!("Prediction contains no quantiles"));
        };
        if lengths.any(|len| len != expected) {
            return Err(anyhow!("Quantile curves have different lengths"));
        }
        if expected == 0 {
            return Err(anyhow!("Quantile curves are empty"));
        }
        Ok(Self {
            start,
            frequency,
            quantiles: prediction.quantiles.clone(),
            samples: prediction.samples.clone().unwrap_or_default(),
        })
    }

    pub fn len(&self) -> usize {
        self.quantiles.values().next().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn levels(&self) -> Vec<f64> {
        let mut levels: Vec<f64> = self
            .quantiles
            .keys()
            .filter_map(|key| key.trim().parse::<f64>().ok())
            .collect();
        levels.sort_by(|a, b| a.total_cmp(b));
        levels
    }

    pub fn quantile(&self, level: f64) -> Option<TimeSeries> {
        self.quantiles
            .iter()
            .find(|(key, _)| {
                key.trim()
                    .parse::<f64>()
                    .map(|parsed| (parsed - level).abs() < QUANTILE_KEY_TOLERANCE)
                    .unwrap_or(false)
            })
            .map(|(_, values)| TimeSeries::new(self.start, self.frequency, values.clone()))
    }

    pub fn median(&self) -> Option<TimeSeries> {
        self.quantile(0.5)
    }
}

fn serialize_target<S>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut seq = serializer.serialize_seq(Some(values.len()))?;
    for value in values {
        if value.is_finite() {
            seq.serialize_element(value)?;
        } else {
            seq.serialize_element("NaN")?;
        }
    }
    seq.end()
}

fn deserialize_target<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TargetValue {
        Number(f64),
        Text(String),
        Missing(()),
    }

    struct TargetVisitor;

    impl<'de> Visitor<'de> for TargetVisitor {
        type Value = Vec<f64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a list of numbers or \"NaN\" strings")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(entry) = seq.next_element::<TargetValue>()? {
                let value = match entry {
                    TargetValue::Number(number) => number,
                    TargetValue::Missing(()) => f64::NAN,
                    TargetValue::Text(text) => {
                        let trimmed = text.trim();
                        if trimmed.eq_ignore_ascii_case("nan") {
                            f64::NAN
                        } else {
                            trimmed.parse::<f64>().map_err(|_| {
                                de::Error::custom(format!("invalid target value {}", trimmed))
                            })?
                        }
                    }
                };
                values.push(value);
            }
            Ok(values)
        }
    }

    deserializer.deserialize_seq(TargetVisitor)
}
