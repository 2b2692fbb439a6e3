//! Browser-driven delivery strategies.
//!
//! Both strategies open the compose URL in Chrome through chromedriver, wait
//! for the message box and press Enter. They differ in where the browser
//! comes from: an already-running debuggable Chrome, or a fresh one.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::TcpStream;

use super::webdriver::{Session, WebDriver, ENTER_KEY, MESSAGE_BOX_LOCATORS};
use super::{ComposeMessage, DeliveryStrategy};
use crate::errors::DeliveryError;

/// Loopback aliases probed for a debuggable browser, in order.
const DEBUG_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// Profile directory names Chrome keeps inside a shared user-data dir.
const NAMED_PROFILES: [&str; 3] = ["default", "profile 1", "profile 2"];

/// Arguments for a fresh automated Chrome.
const CHROME_ARGS: [&str; 9] = [
    "--disable-infobars",
    "--window-size=1200,900",
    "--disable-notifications",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-extensions",
    "--remote-allow-origins=*",
    "--blink-settings=imagesEnabled=false",
];

/// Waits and pauses used by the browser strategies.
#[derive(Debug, Clone)]
pub struct BrowserTimings {
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    pub attach_wait: Duration,
    pub attach_settle: Duration,
    pub attach_after_send: Duration,
    pub fresh_wait: Duration,
    pub fresh_settle: Duration,
    pub fresh_after_send: Duration,
    /// Extra time on top of the element wait before an attempt is abandoned.
    /// Also bounds session start-up and teardown on their own.
    pub attempt_grace: Duration,
}

impl Default for BrowserTimings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
            attach_wait: Duration::from_secs(45),
            attach_settle: Duration::from_secs(3),
            attach_after_send: Duration::from_secs(3),
            fresh_wait: Duration::from_secs(60),
            fresh_settle: Duration::from_secs(5),
            fresh_after_send: Duration::from_secs(7),
            attempt_grace: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
impl BrowserTimings {
    pub(crate) fn instant() -> Self {
        Self {
            probe_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
            attach_wait: Duration::from_millis(100),
            attach_settle: Duration::ZERO,
            attach_after_send: Duration::ZERO,
            fresh_wait: Duration::from_millis(100),
            fresh_settle: Duration::ZERO,
            fresh_after_send: Duration::ZERO,
            attempt_grace: Duration::from_millis(200),
        }
    }
}

/// Wait for the message box, then submit the pre-filled text.
async fn submit_message(
    session: &Session<'_>,
    url: &str,
    wait: Duration,
    poll_interval: Duration,
    settle: Duration,
    after_send: Duration,
) -> Result<(), DeliveryError> {
    session.navigate(url).await?;
    tracing::info!("Waiting for WhatsApp Web interface (session {})...", session.id());
    let element = session
        .wait_for_any(&MESSAGE_BOX_LOCATORS, wait, poll_interval)
        .await?;

    tokio::time::sleep(settle).await;
    session.send_keys(&element, ENTER_KEY).await?;
    tracing::info!("Send command executed");
    tokio::time::sleep(after_send).await;
    Ok(())
}

/// Run one step under a deadline.
async fn bounded<T, F>(budget: Duration, step: F) -> Result<T, DeliveryError>
where
    F: std::future::Future<Output = Result<T, DeliveryError>>,
{
    tokio::time::timeout(budget, step)
        .await
        .unwrap_or(Err(DeliveryError::Timeout(budget.as_secs())))
}

// ---------------------------------------------------------------------------
// Attach to a running browser
// ---------------------------------------------------------------------------

/// Reuses a Chrome started with `--remote-debugging-port`.
pub struct AttachStrategy {
    driver: Option<WebDriver>,
    hosts: Vec<String>,
    port: u16,
    timings: BrowserTimings,
}

impl AttachStrategy {
    pub fn new(driver: Option<WebDriver>, port: u16, timings: BrowserTimings) -> Self {
        Self {
            driver,
            hosts: DEBUG_HOSTS.iter().map(|h| h.to_string()).collect(),
            port,
            timings,
        }
    }

    #[cfg(test)]
    fn with_hosts(mut self, hosts: &[&str]) -> Self {
        self.hosts = hosts.iter().map(|h| h.to_string()).collect();
        self
    }

    /// First host with something listening on the debug port.
    async fn find_debug_host(&self) -> Option<&str> {
        tracing::info!("Checking for open debug port {}...", self.port);
        for host in &self.hosts {
            let probe = TcpStream::connect((host.as_str(), self.port));
            match tokio::time::timeout(self.timings.probe_timeout, probe).await {
                Ok(Ok(_)) => {
                    tracing::info!("Detected browser on {}:{}, attaching", host, self.port);
                    return Some(host.as_str());
                }
                _ => tracing::debug!("No browser found on {}:{}", host, self.port),
            }
        }
        None
    }
}

/// `host:port`, bracketing IPv6 literals.
fn debugger_address(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[async_trait]
impl DeliveryStrategy for AttachStrategy {
    fn name(&self) -> &'static str {
        "attach"
    }

    async fn send(&self, message: &ComposeMessage) -> Result<(), DeliveryError> {
        let driver = self
            .driver
            .as_ref()
            .ok_or_else(|| DeliveryError::NotConfigured("WEBDRIVER_URL is empty".into()))?;

        let host = self.find_debug_host().await.ok_or_else(|| {
            DeliveryError::Unreachable(format!("no browser listening on debug port {}", self.port))
        })?;

        let capabilities = json!({
            "browserName": "chrome",
            "goog:chromeOptions": { "debuggerAddress": debugger_address(host, self.port) }
        });

        let t = &self.timings;
        bounded(t.attach_wait + t.attempt_grace, async {
            let session = driver.new_session(capabilities).await?;
            // The attached browser belongs to the operator; the session is left open
            submit_message(
                &session,
                &message.url,
                t.attach_wait,
                t.poll_interval,
                t.attach_settle,
                t.attach_after_send,
            )
            .await
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Fresh automated browser
// ---------------------------------------------------------------------------

/// Chrome flags selecting a persistent profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileArgs {
    pub user_data_dir: String,
    pub profile_directory: Option<String>,
}

impl ProfileArgs {
    /// A path ending in a named profile (`Default`, `Profile 1`, ...) selects
    /// that profile inside its parent; any other path is the user-data dir.
    pub fn from_path(profile_path: &str) -> Self {
        let path = Path::new(profile_path.trim_end_matches(['/', '\\']));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty());

        match parent {
            Some(parent) if NAMED_PROFILES.contains(&name.to_lowercase().as_str()) => Self {
                user_data_dir: parent.to_string_lossy().to_string(),
                profile_directory: Some(name),
            },
            _ => Self {
                user_data_dir: path.to_string_lossy().to_string(),
                profile_directory: None,
            },
        }
    }

    fn chrome_args(&self) -> Vec<String> {
        let mut args = vec![format!("--user-data-dir={}", self.user_data_dir)];
        if let Some(dir) = &self.profile_directory {
            args.push(format!("--profile-directory={}", dir));
        }
        args
    }
}

/// Launches a new Chrome through chromedriver, optionally with a profile.
pub struct FreshSessionStrategy {
    driver: Option<WebDriver>,
    profile: Option<ProfileArgs>,
    timings: BrowserTimings,
}

impl FreshSessionStrategy {
    pub fn new(
        driver: Option<WebDriver>,
        profile_path: Option<&str>,
        timings: BrowserTimings,
    ) -> Self {
        Self {
            driver,
            profile: profile_path.map(ProfileArgs::from_path),
            timings,
        }
    }

    fn capabilities(&self) -> Value {
        let mut args: Vec<String> = CHROME_ARGS.iter().map(|a| a.to_string()).collect();
        if let Some(profile) = &self.profile {
            args.extend(profile.chrome_args());
        }
        json!({
            "browserName": "chrome",
            "goog:chromeOptions": {
                "args": args,
                "excludeSwitches": ["enable-automation"],
                "useAutomationExtension": false
            }
        })
    }

    /// Re-label failures caused by a profile another Chrome already holds.
    fn classify(&self, err: DeliveryError) -> DeliveryError {
        let text = err.to_string().to_lowercase();
        if let Some(profile) = &self.profile {
            if text.contains("locked") || text.contains("already in use") {
                return DeliveryError::ProfileLocked {
                    user_data_dir: profile.user_data_dir.clone(),
                    message: err.to_string(),
                };
            }
        }
        if text.contains("exited") {
            tracing::warn!(
                "Chrome exited during startup; check that chromedriver matches the \
                 installed Chrome version"
            );
        }
        err
    }
}

#[async_trait]
impl DeliveryStrategy for FreshSessionStrategy {
    fn name(&self) -> &'static str {
        "fresh-session"
    }

    async fn send(&self, message: &ComposeMessage) -> Result<(), DeliveryError> {
        let driver = self
            .driver
            .as_ref()
            .ok_or_else(|| DeliveryError::NotConfigured("WEBDRIVER_URL is empty".into()))?;

        tracing::info!(
            "Launching browser {}",
            if self.profile.is_some() {
                "(with profile)"
            } else {
                "(guest)"
            }
        );

        let t = &self.timings;
        let session = bounded(t.attempt_grace, driver.new_session(self.capabilities()))
            .await
            .map_err(|e| self.classify(e))?;

        let sent = bounded(
            t.fresh_wait + t.attempt_grace,
            submit_message(
                &session,
                &message.url,
                t.fresh_wait,
                t.poll_interval,
                t.fresh_settle,
                t.fresh_after_send,
            ),
        )
        .await;

        // Runs even when the attempt timed out, so no Chrome is left behind
        if let Err(e) = bounded(t.attempt_grace, session.quit()).await {
            tracing::debug!("Could not end browser session: {}", e);
        }

        sent.map_err(|e| self.classify(e))
    }
}
