//! OpenWeatherMap client.
//!
//! Fetches the 5-day / 3-hour forecast plus the two best-effort enrichment
//! values (air quality, UV index).
//! See: https://openweathermap.org/forecast5

use std::time::Duration;

use chrono::{DateTime, NaiveDate};
use serde::Deserialize;

use crate::errors::ProviderError;

const FORECAST_PATH: &str = "/data/2.5/forecast";
const AIR_POLLUTION_PATH: &str = "/data/2.5/air_pollution";
const ONE_CALL_PATH: &str = "/data/3.0/onecall";

/// Upper bound for any single OpenWeatherMap request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the OpenWeatherMap REST API.
#[derive(Debug, Clone)]
pub struct OwmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

/// One parsed entry of the forecast time series.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastEntry {
    pub date: NaiveDate,
    pub temperature_c: f64,
    pub humidity_pct: Option<u8>,
    pub condition: String,
}

// --- OpenWeatherMap JSON response types ---

#[derive(Debug, Deserialize)]
struct OwmForecastResponse {
    cod: serde_json::Value,
    #[serde(default)]
    message: serde_json::Value,
    #[serde(default)]
    list: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OwmForecastItem {
    dt: i64,
    dt_txt: Option<String>,
    main: OwmMain,
    #[serde(default)]
    weather: Vec<OwmCondition>,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
    humidity: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct OwmCondition {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwmAirPollution {
    list: Vec<OwmAirPollutionItem>,
}

#[derive(Debug, Deserialize)]
struct OwmAirPollutionItem {
    main: OwmAqi,
}

#[derive(Debug, Deserialize)]
struct OwmAqi {
    aqi: u32,
}

#[derive(Debug, Deserialize)]
struct OwmOneCall {
    current: OwmCurrent,
}

#[derive(Debug, Deserialize)]
struct OwmCurrent {
    uvi: f64,
}

impl OwmClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self::with_timeout(base_url, api_key, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Could not configure HTTP client, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Fetch the raw multi-day forecast for a location (metric units).
    ///
    /// Returns the body as JSON; use [`extract_forecast_items`] to read it.
    pub async fn fetch_forecast(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<serde_json::Value, ProviderError> {
        self.get_json(FORECAST_PATH, lat, lon, &[("units", "metric")])
            .await
    }

    /// Current air-quality index at a location.
    pub async fn fetch_air_quality(&self, lat: f64, lon: f64) -> Result<u32, ProviderError> {
        let raw = self.get_json(AIR_POLLUTION_PATH, lat, lon, &[]).await?;
        let parsed: OwmAirPollution = serde_json::from_value(raw)
            .map_err(|e| ProviderError::Parse(format!("air pollution: {}", e)))?;
        parsed
            .list
            .first()
            .map(|item| item.main.aqi)
            .ok_or_else(|| ProviderError::Parse("air pollution list is empty".to_string()))
    }

    /// Current UV index at a location.
    pub async fn fetch_uv_index(&self, lat: f64, lon: f64) -> Result<f64, ProviderError> {
        let raw = self
            .get_json(
                ONE_CALL_PATH,
                lat,
                lon,
                &[("exclude", "minutely,hourly,daily,alerts")],
            )
            .await?;
        let parsed: OwmOneCall = serde_json::from_value(raw)
            .map_err(|e| ProviderError::Parse(format!("one call: {}", e)))?;
        Ok(parsed.current.uvi)
    }

    async fn get_json(
        &self,
        path: &str,
        lat: f64,
        lon: f64,
        extra: &[(&str, &str)],
    ) -> Result<serde_json::Value, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let lat_str = lat.to_string();
        let lon_str = lon.to_string();

        let mut query: Vec<(&str, &str)> = vec![
            ("lat", lat_str.as_str()),
            ("lon", lon_str.as_str()),
            ("appid", self.api_key.as_str()),
        ];
        query.extend_from_slice(extra);

        let response = self.client.get(&url).query(&query).send().await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status()));
        }

        Ok(response.json().await?)
    }
}

/// Read the raw forecast time series out of a forecast response.
///
/// The response carries its own status in `cod`; anything but `"200"` is
/// treated as a provider failure even when the HTTP status was 200. Items are
/// returned unparsed so callers only pay for (and fail on) the ones they use.
pub fn extract_forecast_items(
    raw_json: &serde_json::Value,
) -> Result<Vec<serde_json::Value>, ProviderError> {
    let response: OwmForecastResponse = serde_json::from_value(raw_json.clone())
        .map_err(|e| ProviderError::Parse(e.to_string()))?;

    let code = match &response.cod {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if code != "200" {
        return Err(ProviderError::Api {
            code,
            message: match response.message {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            },
        });
    }

    Ok(response.list)
}

/// Parse a single forecast item into a `ForecastEntry`.
pub fn parse_forecast_item(raw_item: &serde_json::Value) -> Result<ForecastEntry, ProviderError> {
    let item: OwmForecastItem = serde_json::from_value(raw_item.clone())
        .map_err(|e| ProviderError::Parse(format!("forecast item: {}", e)))?;

    // dt_txt is "YYYY-MM-DD HH:MM:SS"; the date part is what the report shows
    let date = item
        .dt_txt
        .as_deref()
        .and_then(|txt| txt.split(' ').next())
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .or_else(|| DateTime::from_timestamp(item.dt, 0).map(|dt| dt.date_naive()))
        .ok_or_else(|| ProviderError::Parse(format!("invalid forecast timestamp {}", item.dt)))?;

    let condition = item
        .weather
        .first()
        .and_then(|w| w.description.clone())
        .unwrap_or_else(|| "unknown".to_string());

    Ok(ForecastEntry {
        date,
        temperature_c: item.main.temp,
        humidity_pct: item.main.humidity,
        condition,
    })
}

#[cfg(test)]
pub(crate) fn forecast_item_json(
    dt_txt: &str,
    temp: f64,
    humidity: u8,
    description: &str,
) -> serde_json::Value {
    serde_json::json!({
        "dt": 1_700_000_000,
        "dt_txt": dt_txt,
        "main": { "temp": temp, "humidity": humidity },
        "weather": [{ "description": description }]
    })
}
