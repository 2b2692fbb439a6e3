use crate::errors::ConfigError;

const DEFAULT_OWM_BASE_URL: &str = "https://api.openweathermap.org";
const DEFAULT_WHATSAPP_SEND_URL: &str = "https://web.whatsapp.com/send";
const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

/// Application configuration, parsed from environment variables.
///
/// The four values the pipeline cannot run without are kept as `Option`s so
/// a missing one degrades into an error report instead of a crash; use
/// [`AppConfig::required`] to get them validated.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub owm_api_key: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub phone_number: Option<String>,
    /// Chrome profile reused by the fresh-session strategy.
    pub chrome_profile_path: Option<String>,
    pub owm_base_url: String,
    pub whatsapp_send_url: String,
    /// chromedriver endpoint. Empty disables the browser strategies.
    pub webdriver_url: String,
    /// Remote debugging port probed by the attach strategy.
    pub debug_port: u16,
    /// External instant-send helper. `None` disables the helper strategies.
    pub instant_send_command: Option<String>,
    pub log_file: String,
    pub report_interval_minutes: u64,
    pub port: u16,
}

/// The validated subset of [`AppConfig`] every pipeline run depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredConfig {
    pub api_key: String,
    pub latitude: f64,
    pub longitude: f64,
    pub phone_number: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            owm_api_key: non_empty_var("OWM_API_KEY"),
            latitude: parsed_var("LATITUDE"),
            longitude: parsed_var("LONGITUDE"),
            phone_number: non_empty_var("PHONE_NUMBER"),
            chrome_profile_path: non_empty_var("CHROME_PROFILE_PATH"),
            owm_base_url: non_empty_var("OWM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OWM_BASE_URL.to_string()),
            whatsapp_send_url: non_empty_var("WHATSAPP_SEND_URL")
                .unwrap_or_else(|| DEFAULT_WHATSAPP_SEND_URL.to_string()),
            webdriver_url: std::env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| DEFAULT_WEBDRIVER_URL.to_string()),
            debug_port: parsed_var("DEBUG_PORT").unwrap_or(9222),
            instant_send_command: non_empty_var("INSTANT_SEND_COMMAND"),
            log_file: non_empty_var("LOG_FILE").unwrap_or_else(|| "logs.json".to_string()),
            report_interval_minutes: parsed_var::<u64>("REPORT_INTERVAL_MINUTES")
                .filter(|m| *m > 0)
                .unwrap_or(60),
            port: parsed_var("PORT").unwrap_or(8080),
        }
    }

    /// Validate the values every run needs, naming all that are missing.
    pub fn required(&self) -> Result<RequiredConfig, ConfigError> {
        let mut missing = Vec::new();
        if self.owm_api_key.is_none() {
            missing.push("OWM_API_KEY");
        }
        if self.latitude.is_none() {
            missing.push("LATITUDE");
        }
        if self.longitude.is_none() {
            missing.push("LONGITUDE");
        }
        if self.phone_number.is_none() {
            missing.push("PHONE_NUMBER");
        }

        match (
            &self.owm_api_key,
            self.latitude,
            self.longitude,
            &self.phone_number,
        ) {
            (Some(api_key), Some(latitude), Some(longitude), Some(phone_number)) => {
                Ok(RequiredConfig {
                    api_key: api_key.clone(),
                    latitude,
                    longitude,
                    phone_number: phone_number.clone(),
                })
            }
            _ => Err(ConfigError::Missing(missing)),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = non_empty_var(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {}: '{}' is not a valid value", name, raw);
            None
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        owm_api_key: Some("test-key".to_string()),
        latitude: Some(12.97),
        longitude: Some(77.59),
        phone_number: Some("+91 98765 43210".to_string()),
        chrome_profile_path: None,
        owm_base_url: DEFAULT_OWM_BASE_URL.to_string(),
        whatsapp_send_url: DEFAULT_WHATSAPP_SEND_URL.to_string(),
        webdriver_url: String::new(),
        debug_port: 9222,
        instant_send_command: None,
        log_file: "logs.json".to_string(),
        report_interval_minutes: 60,
        port: 8080,
    }
}
