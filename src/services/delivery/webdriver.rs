//! Minimal W3C WebDriver client.
//!
//! Speaks the JSON wire protocol to a chromedriver instance over HTTP.
//! Only the handful of commands the browser strategies need are covered.
//! See: https://www.w3.org/TR/webdriver2/

use std::time::Duration;

use serde_json::{json, Value};

use crate::errors::DeliveryError;

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// The Enter key in the WebDriver key code range.
pub const ENTER_KEY: &str = "\u{E007}";

/// How to find an element on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    XPath(&'static str),
    Css(&'static str),
}

impl Locator {
    fn strategy(self) -> (&'static str, &'static str) {
        match self {
            Locator::XPath(value) => ("xpath", value),
            Locator::Css(value) => ("css selector", value),
        }
    }
}

/// Candidate selectors for the WhatsApp Web message box, most specific first.
pub const MESSAGE_BOX_LOCATORS: [Locator; 3] = [
    Locator::XPath("//div[@contenteditable='true' and @data-tab]"),
    Locator::Css("div[title='Type a message']"),
    Locator::Css("div.lexical-rich-text-input div[contenteditable='true']"),
];

enum CommandError {
    Transport(reqwest::Error),
    Remote { error: String, message: String },
}

impl From<CommandError> for DeliveryError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Transport(e) => {
                DeliveryError::Unreachable(format!("WebDriver request failed: {}", e))
            }
            CommandError::Remote { error, message } => {
                DeliveryError::WebDriver(format!("{}: {}", error, message))
            }
        }
    }
}

/// Upper bound for one WebDriver command; starting Chrome is the slowest.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(90);

/// Handle to a WebDriver server.
#[derive(Debug, Clone)]
pub struct WebDriver {
    client: reqwest::Client,
    base_url: String,
}

/// An open browser session.
pub struct Session<'a> {
    driver: &'a WebDriver,
    id: String,
}

impl WebDriver {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(COMMAND_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Could not configure WebDriver client, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Start a session with the given `alwaysMatch` capabilities.
    pub async fn new_session(&self, capabilities: Value) -> Result<Session<'_>, DeliveryError> {
        let body = json!({ "capabilities": { "alwaysMatch": capabilities } });
        let value = self
            .command(reqwest::Method::POST, "/session", Some(body))
            .await?;

        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DeliveryError::WebDriver("new session response has no sessionId".into())
            })?
            .to_string();

        tracing::debug!("WebDriver session {} started", id);
        Ok(Session { driver: self, id })
    }

    async fn command(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, CommandError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(CommandError::Transport)?;
        let status = response.status();
        let payload: Value = response.json().await.map_err(CommandError::Transport)?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        if !status.is_success() {
            let field = |name: &str| {
                value
                    .get(name)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            let error = field("error");
            return Err(CommandError::Remote {
                error: if error.is_empty() {
                    format!("HTTP {}", status)
                } else {
                    error
                },
                message: field("message"),
            });
        }

        Ok(value)
    }
}

impl Session<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn navigate(&self, url: &str) -> Result<(), DeliveryError> {
        self.command(reqwest::Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    /// Look up one element. `Ok(None)` when the page has no match yet.
    pub async fn find_element(&self, locator: Locator) -> Result<Option<String>, DeliveryError> {
        let (using, value) = locator.strategy();
        let result = self
            .command(
                reqwest::Method::POST,
                "/element",
                Some(json!({ "using": using, "value": value })),
            )
            .await;

        match result {
            Ok(found) => found
                .get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(|id| Some(id.to_string()))
                .ok_or_else(|| {
                    DeliveryError::WebDriver("element response has no reference".into())
                }),
            Err(CommandError::Remote { error, .. }) if error == "no such element" => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Poll the locators in order until one matches or `timeout` elapses.
    pub async fn wait_for_any(
        &self,
        locators: &[Locator],
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<String, DeliveryError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for locator in locators {
                if let Some(id) = self.find_element(*locator).await? {
                    tracing::debug!("Found message box via {:?}", locator);
                    return Ok(id);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DeliveryError::ElementNotFound(format!(
                    "no message box after {}s; scan the QR code if WhatsApp Web is logged out",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub async fn send_keys(&self, element_id: &str, text: &str) -> Result<(), DeliveryError> {
        let path = format!("/element/{}/value", element_id);
        self.command(reqwest::Method::POST, &path, Some(json!({ "text": text })))
            .await?;
        Ok(())
    }

    /// End the session, closing the browser it launched.
    pub async fn quit(self) -> Result<(), DeliveryError> {
        self.command(reqwest::Method::DELETE, "", None).await?;
        tracing::debug!("WebDriver session {} ended", self.id);
        Ok(())
    }

    async fn command(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, CommandError> {
        let full = format!("/session/{}{}", self.id, path);
        self.driver.command(method, &full, body).await
    }
}
