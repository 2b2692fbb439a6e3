//! Forecast report generation.
//!
//! Turns the OpenWeatherMap time series into a short multi-day report with
//! alerts, plus a log entry describing the last sampled day. Failures never
//! escape `produce`: they become a one-line error report and no log entry.

use std::fmt;

use chrono::{NaiveDate, Utc};

use crate::config::AppConfig;
use crate::errors::ProviderError;
use crate::services::alerts::{Alert, AlertThresholds};
use crate::services::delivery_log::DeliveryLogEntry;
use crate::services::owm::{extract_forecast_items, parse_forecast_item, ForecastEntry, OwmClient};

/// Report text when a required setting is missing.
pub const CONFIG_ERROR_MESSAGE: &str = "❌ Missing configuration. Check your .env file.";

/// Report text when the forecast cannot be fetched or read.
pub const FETCH_ERROR_MESSAGE: &str = "❌ Failed to fetch weather data.";

/// Entries per day in the 3-hour forecast series.
const SAMPLE_STRIDE: usize = 8;

/// Number of days in a report.
const SAMPLE_DAYS: usize = 4;

/// One day's representative reading.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastSample {
    pub date: NaiveDate,
    pub temperature_c: f64,
    pub humidity_pct: Option<u8>,
    pub condition: String,
    pub uv_index: Option<f64>,
    pub air_quality_index: Option<u32>,
}

/// A finished, human-readable report.
#[derive(Debug, Clone, PartialEq)]
pub struct Report(String);

impl Report {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pick one item per day (indices 0, 8, 16, 24) and parse only those.
///
/// Items between the sampled indices are never read, so a malformed one
/// there does not fail the report.
pub fn sample_entries(items: &[serde_json::Value]) -> Result<Vec<ForecastEntry>, ProviderError> {
    items
        .iter()
        .step_by(SAMPLE_STRIDE)
        .take(SAMPLE_DAYS)
        .map(parse_forecast_item)
        .collect()
}

/// Attach the enrichment values to each sampled day.
///
/// They are current conditions, so every sample carries the same UV index
/// and AQI.
pub fn with_enrichment(
    entries: Vec<ForecastEntry>,
    uv_index: Option<f64>,
    air_quality_index: Option<u32>,
) -> Vec<ForecastSample> {
    entries
        .into_iter()
        .map(|entry| ForecastSample {
            date: entry.date,
            temperature_c: entry.temperature_c,
            humidity_pct: entry.humidity_pct,
            condition: entry.condition,
            uv_index,
            air_quality_index,
        })
        .collect()
}

/// Whole degrees keep one decimal (`21.0`); anything else is printed as is.
fn format_temperature(celsius: f64) -> String {
    if celsius.fract() == 0.0 {
        format!("{:.1}", celsius)
    } else {
        celsius.to_string()
    }
}

/// Render the report body for the sampled days.
pub fn render_report(
    samples: &[(ForecastSample, Vec<Alert>)],
    latitude: f64,
    longitude: f64,
) -> Report {
    let mut report = String::from("🌦️ 4-Day Weather Forecast:\n\n");

    for (sample, alerts) in samples {
        report.push_str(&format!("📅 {}\n", sample.date));
        report.push_str(&format!("Temp: {}°C | ", format_temperature(sample.temperature_c)));
        if let Some(humidity) = sample.humidity_pct {
            report.push_str(&format!("Humidity: {}% | ", humidity));
        }
        report.push_str(&format!("Condition: {}\n", sample.condition));

        if !alerts.is_empty() {
            let labels: Vec<&str> = alerts.iter().map(|a| a.label()).collect();
            report.push_str(&format!("🚨 Alerts: {}\n", labels.join(", ")));
        }
        report.push('\n');
    }

    report.push_str(&format!(
        "📍 Location: https://www.google.com/maps?q={},{}",
        latitude, longitude
    ));

    Report(report)
}

/// Build the log entry for a sample and its alerts.
fn log_entry(sample: &ForecastSample, alerts: &[Alert]) -> DeliveryLogEntry {
    DeliveryLogEntry {
        timestamp: Utc::now(),
        temperature: sample.temperature_c,
        humidity: sample.humidity_pct,
        uv_index: sample.uv_index.unwrap_or(0.0),
        air_quality_index: sample.air_quality_index.unwrap_or(0),
        alerts: alerts.iter().map(|a| a.label().to_string()).collect(),
        condition: sample.condition.clone(),
    }
}

/// Produces forecast reports for the configured location.
#[derive(Debug, Clone)]
pub struct ForecastReporter {
    config: AppConfig,
    thresholds: AlertThresholds,
}

impl ForecastReporter {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            thresholds: AlertThresholds::default(),
        }
    }

    #[cfg(test)]
    pub fn with_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Fetch, sample, evaluate and render one report.
    ///
    /// The log entry describes only the last sampled day.
    pub async fn produce(&self) -> (Report, Option<DeliveryLogEntry>) {
        let required = match self.config.required() {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Cannot build forecast report: {}", e);
                return (Report::new(CONFIG_ERROR_MESSAGE), None);
            }
        };
        let (lat, lon) = (required.latitude, required.longitude);
        tracing::debug!(
            "Building report for {},{} (recipient {})",
            lat,
            lon,
            required.phone_number
        );
        let client = OwmClient::new(&self.config.owm_base_url, &required.api_key);

        let entries = match fetch_sampled_entries(&client, lat, lon).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Forecast fetch failed: {}", e);
                return (Report::new(FETCH_ERROR_MESSAGE), None);
            }
        };

        let (air_quality, uv_index) = futures::join!(
            client.fetch_air_quality(lat, lon),
            client.fetch_uv_index(lat, lon),
        );
        let air_quality = air_quality
            .map_err(|e| tracing::warn!("Air quality unavailable, using 0: {}", e))
            .ok();
        let uv_index = uv_index
            .map_err(|e| tracing::warn!("UV index unavailable, using 0: {}", e))
            .ok();

        let evaluated: Vec<(ForecastSample, Vec<Alert>)> =
            with_enrichment(entries, uv_index, air_quality)
                .into_iter()
                .map(|sample| {
                    let alerts = self.thresholds.evaluate(&sample);
                    (sample, alerts)
                })
                .collect();

        tracing::info!(
            "Forecast: {} days sampled, {} alerts",
            evaluated.len(),
            evaluated.iter().map(|(_, a)| a.len()).sum::<usize>()
        );

        let report = render_report(&evaluated, lat, lon);
        let entry = evaluated
            .last()
            .map(|(sample, alerts)| log_entry(sample, alerts));

        (report, entry)
    }
}

async fn fetch_sampled_entries(
    client: &OwmClient,
    lat: f64,
    lon: f64,
) -> Result<Vec<ForecastEntry>, ProviderError> {
    let raw = client.fetch_forecast(lat, lon).await?;
    let items = extract_forecast_items(&raw)?;
    tracing::debug!("Forecast series has {} entries", items.len());
    sample_entries(&items)
}
