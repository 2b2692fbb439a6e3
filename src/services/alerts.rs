//! Threshold-based weather alerts.
//!
//! Every rule is evaluated on its own; a sample can trigger any subset and
//! the resulting list keeps evaluation order.

use std::fmt;

use crate::services::report::ForecastSample;

/// A labelled warning derived from one forecast sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    RainStorm,
    Heat,
    Cold,
    HighHumidity,
    HighUv,
    PoorAirQuality,
}

impl Alert {
    pub fn label(self) -> &'static str {
        match self {
            Alert::RainStorm => "⚠️ Rain/Storm Alert",
            Alert::Heat => "🔥 Heat Alert",
            Alert::Cold => "❄️ Cold Alert",
            Alert::HighHumidity => "💧 High Humidity Alert",
            Alert::HighUv => "☀️ High UV Alert",
            Alert::PoorAirQuality => "🌫️ Poor Air Quality Alert",
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Alert cut-offs. Heat/cold/humidity are inclusive, UV/AQI exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertThresholds {
    pub heat_c: f64,
    pub cold_c: f64,
    pub humidity_pct: u8,
    pub uv_index: f64,
    pub air_quality_index: u32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            heat_c: 35.0,
            cold_c: 5.0,
            humidity_pct: 80,
            uv_index: 6.0,
            air_quality_index: 100,
        }
    }
}

impl AlertThresholds {
    pub fn evaluate(&self, sample: &ForecastSample) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let condition = sample.condition.to_lowercase();
        if condition.contains("storm") || condition.contains("rain") {
            alerts.push(Alert::RainStorm);
        }
        if sample.temperature_c >= self.heat_c {
            alerts.push(Alert::Heat);
        }
        if sample.temperature_c <= self.cold_c {
            alerts.push(Alert::Cold);
        }
        if sample.humidity_pct.is_some_and(|h| h >= self.humidity_pct) {
            alerts.push(Alert::HighHumidity);
        }
        if sample.uv_index.is_some_and(|uv| uv > self.uv_index) {
            alerts.push(Alert::HighUv);
        }
        if sample
            .air_quality_index
            .is_some_and(|aqi| aqi > self.air_quality_index)
        {
            alerts.push(Alert::PoorAirQuality);
        }

        alerts
    }
}
