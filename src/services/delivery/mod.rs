//! Report delivery over WhatsApp Web.
//!
//! Delivery is an ordered fallback chain: attach to a running debuggable
//! Chrome, launch a fresh Chrome, hand off to the instant-send helper, and
//! finally ask the helper to send a couple of minutes later. The first
//! strategy that succeeds ends the chain; every failure is logged and the
//! next strategy tried. Nothing here returns an error to the caller.

pub mod browser;
pub mod helper;
pub mod webdriver;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::errors::DeliveryError;
use crate::services::report::Report;
use browser::{AttachStrategy, BrowserTimings, FreshSessionStrategy};
use helper::{InstantHelperStrategy, ScheduledHelperStrategy};
use webdriver::WebDriver;

/// The message every strategy sends, addressed and encoded once.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeMessage {
    /// Recipient as configured (e.g. "+91 98765 43210").
    pub phone: String,
    /// Pre-filled WhatsApp Web compose URL.
    pub url: String,
}

impl ComposeMessage {
    pub fn new(compose_base: &str, phone: &str, text: &str) -> Self {
        Self {
            phone: phone.trim().to_string(),
            url: compose_url(compose_base, phone, text),
        }
    }
}

/// `{base}?phone=<digits>&text=<percent-encoded text>`.
///
/// Spaces become `%20`; a literal `+` in the text is already `%2B` by then.
pub fn compose_url(compose_base: &str, phone: &str, text: &str) -> String {
    let digits: String = phone
        .chars()
        .filter(|c| *c != '+' && !c.is_whitespace())
        .collect();
    let encoded = url::form_urlencoded::byte_serialize(text.as_bytes())
        .collect::<String>()
        .replace('+', "%20");
    format!("{}?phone={}&text={}", compose_base, digits, encoded)
}

/// One way of getting the message to the recipient.
#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, message: &ComposeMessage) -> Result<(), DeliveryError>;
}

/// What happened during one `deliver` call.
#[derive(Debug, Default)]
pub struct DeliveryOutcome {
    /// Name of the strategy that sent the message.
    pub delivered_by: Option<&'static str>,
    /// Failed attempts in order.
    pub failures: Vec<(&'static str, DeliveryError)>,
}

impl DeliveryOutcome {
    pub fn delivered(&self) -> bool {
        self.delivered_by.is_some()
    }
}

/// Sends reports to the single configured recipient.
pub struct DeliveryDispatcher {
    recipient: Option<String>,
    compose_base: String,
    debug_port: u16,
    strategies: Vec<Box<dyn DeliveryStrategy>>,
}

impl DeliveryDispatcher {
    pub fn new(
        recipient: Option<String>,
        compose_base: &str,
        debug_port: u16,
        strategies: Vec<Box<dyn DeliveryStrategy>>,
    ) -> Self {
        Self {
            recipient,
            compose_base: compose_base.to_string(),
            debug_port,
            strategies,
        }
    }

    /// The standard chain: attach, fresh session, instant helper, scheduled helper.
    pub fn from_config(config: &AppConfig) -> Self {
        let driver = Some(config.webdriver_url.trim())
            .filter(|u| !u.is_empty())
            .map(WebDriver::new);
        let timings = BrowserTimings::default();

        let strategies: Vec<Box<dyn DeliveryStrategy>> = vec![
            Box::new(AttachStrategy::new(
                driver.clone(),
                config.debug_port,
                timings.clone(),
            )),
            Box::new(FreshSessionStrategy::new(
                driver,
                config.chrome_profile_path.as_deref(),
                timings,
            )),
            Box::new(InstantHelperStrategy::new(config.instant_send_command.clone())),
            Box::new(ScheduledHelperStrategy::new(config.instant_send_command.clone())),
        ];

        Self::new(
            config.phone_number.clone(),
            &config.whatsapp_send_url,
            config.debug_port,
            strategies,
        )
    }

    /// Send the report through the chain. [`DeliveryOutcome::delivered`] is
    /// `true` once any strategy confirms it went out.
    pub async fn deliver_with_outcome(&self, report: &Report) -> DeliveryOutcome {
        let mut outcome = DeliveryOutcome::default();

        let Some(phone) = self.recipient.as_deref() else {
            tracing::error!("PHONE_NUMBER is not configured; nothing to deliver to");
            return outcome;
        };

        tracing::info!("Preparing message for {}", phone);
        let message = ComposeMessage::new(&self.compose_base, phone, report.as_str());

        for strategy in &self.strategies {
            let name = strategy.name();
            tracing::info!("Trying delivery via {}", name);
            match strategy.send(&message).await {
                Ok(()) => {
                    tracing::info!("Delivered via {}", name);
                    outcome.delivered_by = Some(name);
                    return outcome;
                }
                Err(e) => {
                    self.log_failure(name, &e);
                    outcome.failures.push((name, e));
                }
            }
        }

        tracing::error!(
            "All {} delivery strategies failed; message not sent",
            self.strategies.len()
        );
        outcome
    }

    fn log_failure(&self, name: &str, err: &DeliveryError) {
        match err {
            DeliveryError::ProfileLocked { user_data_dir, .. } => {
                tracing::warn!(
                    "Delivery via {} failed: the Chrome profile is locked because Chrome is \
                     already running with it. Close all Chrome windows, or start Chrome in \
                     debug mode first so it can be attached to: \
                     chrome --remote-debugging-port={} --user-data-dir=\"{}\"",
                    name,
                    self.debug_port,
                    user_data_dir
                );
            }
            DeliveryError::NotConfigured(reason) => {
                tracing::debug!("Skipping {}: {}", name, reason);
            }
            other => tracing::warn!("Delivery via {} failed: {}", name, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    type Script = fn() -> Result<(), DeliveryError>;

    struct ScriptedStrategy {
        name: &'static str,
        script: Script,
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<ComposeMessage>>>,
    }

    #[async_trait]
    impl DeliveryStrategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn send(&self, message: &ComposeMessage) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(message.clone());
            (self.script)()
        }
    }

    struct Chain {
        dispatcher: DeliveryDispatcher,
        calls: Vec<Arc<AtomicUsize>>,
        seen: Arc<Mutex<Vec<ComposeMessage>>>,
    }

    fn chain(recipient: Option<&str>, scripts: &[(&'static str, Script)]) -> Chain {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut calls = Vec::new();
        let mut strategies: Vec<Box<dyn DeliveryStrategy>> = Vec::new();
        for (name, script) in scripts {
            let counter = Arc::new(AtomicUsize::new(0));
            calls.push(counter.clone());
            strategies.push(Box::new(ScriptedStrategy {
                name: *name,
                script: *script,
                calls: counter,
                seen: seen.clone(),
            }));
        }
        Chain {
            dispatcher: DeliveryDispatcher::new(
                recipient.map(str::to_string),
                "https://web.whatsapp.com/send",
                9222,
                strategies,
            ),
            calls,
            seen,
        }
    }

    fn unreachable() -> Result<(), DeliveryError> {
        Err(DeliveryError::Unreachable("no browser on 9222".into()))
    }

    fn locked() -> Result<(), DeliveryError> {
        Err(DeliveryError::ProfileLocked {
            user_data_dir: "/home/me/chrome".into(),
            message: "user data directory is already in use".into(),
        })
    }

    fn helper_failed() -> Result<(), DeliveryError> {
        Err(DeliveryError::Helper("exit status: 1".into()))
    }

    fn sent() -> Result<(), DeliveryError> {
        Ok(())
    }

    fn report() -> Report {
        Report::new("🌦️ 4-Day Weather Forecast:\n\nRain & wind")
    }

    /// In-memory sink for formatted log lines.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Run one delivery with log output captured.
    fn deliver_logged(chain: &Chain) -> (DeliveryOutcome, String) {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let outcome = tracing::subscriber::with_default(subscriber, || {
            tokio_test::block_on(chain.dispatcher.deliver_with_outcome(&report()))
        });
        (outcome, logs.text())
    }

    #[test]
    fn test_compose_url_encoding() {
        let url = compose_url(
            "https://web.whatsapp.com/send",
            "+91 98765 43210",
            "Hi there & 🌦️\nok",
        );
        assert_eq!(
            url,
            "https://web.whatsapp.com/send?phone=919876543210\
             &text=Hi%20there%20%26%20%F0%9F%8C%A6%EF%B8%8F%0Aok"
        );
    }

    #[test]
    fn test_compose_url_keeps_plus_distinct_from_space() {
        let url = compose_url("https://web.whatsapp.com/send", "+15550100", "1 + 1 = 2");
        assert!(url.ends_with("&text=1%20%2B%201%20%3D%202"));
    }

    #[tokio::test]
    async fn test_locked_profile_then_instant_helper_succeeds() {
        let chain = chain(
            Some("+91 98765 43210"),
            &[
                ("attach", unreachable),
                ("fresh-session", locked),
                ("instant-helper", sent),
                ("scheduled-helper", sent),
            ],
        );

        let outcome = chain.dispatcher.deliver_with_outcome(&report()).await;

        assert!(outcome.delivered());
        assert_eq!(outcome.delivered_by, Some("instant-helper"));
        let locked_count = outcome
            .failures
            .iter()
            .filter(|(_, e)| matches!(e, DeliveryError::ProfileLocked { .. }))
            .count();
        assert_eq!(locked_count, 1);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(chain.calls[3].load(Ordering::SeqCst), 0, "chain stops at first success");
    }

    #[test]
    fn test_locked_profile_logs_guidance_once() {
        let chain = chain(
            Some("+91 98765 43210"),
            &[
                ("attach", unreachable),
                ("fresh-session", locked),
                ("instant-helper", sent),
                ("scheduled-helper", sent),
            ],
        );

        let (outcome, logs) = deliver_logged(&chain);

        assert!(outcome.delivered());
        assert_eq!(logs.matches("profile is locked").count(), 1);
        assert!(logs.contains(
            "chrome --remote-debugging-port=9222 --user-data-dir=\"/home/me/chrome\""
        ));
        assert!(logs.contains("Delivered via instant-helper"));
        assert!(!logs.contains("delivery strategies failed"));
    }

    #[test]
    fn test_exhausted_chain_logs_final_error() {
        let chain = chain(
            Some("+15550100"),
            &[("attach", unreachable), ("instant-helper", helper_failed)],
        );

        let (outcome, logs) = deliver_logged(&chain);

        assert!(!outcome.delivered());
        assert!(logs.contains("All 2 delivery strategies failed; message not sent"));
        assert!(!logs.contains("profile is locked"));
    }

    #[tokio::test]
    async fn test_all_strategies_fail() {
        let chain = chain(
            Some("+15550100"),
            &[
                ("attach", unreachable),
                ("fresh-session", locked),
                ("instant-helper", helper_failed),
                ("scheduled-helper", helper_failed),
            ],
        );

        let outcome = chain.dispatcher.deliver_with_outcome(&report()).await;
        assert!(!outcome.delivered());
        assert_eq!(outcome.failures.len(), 4);
        for counter in &chain.calls {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_first_strategy_success_skips_rest() {
        let chain = chain(
            Some("+15550100"),
            &[("attach", sent), ("fresh-session", sent)],
        );

        let outcome = chain.dispatcher.deliver_with_outcome(&report()).await;
        assert_eq!(outcome.delivered_by, Some("attach"));
        assert!(outcome.failures.is_empty());
        assert_eq!(chain.calls[1].load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_recipient_tries_nothing() {
        let chain = chain(None, &[("attach", sent)]);

        assert!(!chain.dispatcher.deliver_with_outcome(&report()).await.delivered());
        assert_eq!(chain.calls[0].load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_every_strategy_gets_the_same_message() {
        let chain = chain(
            Some("+15550100"),
            &[
                ("attach", unreachable),
                ("fresh-session", helper_failed),
                ("instant-helper", sent),
            ],
        );

        chain.dispatcher.deliver_with_outcome(&report()).await;

        let seen = chain.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|m| *m == seen[0]));
        assert!(seen[0].url.contains("phone=15550100&text="));
        assert!(seen[0].url.contains("Rain%20%26%20wind"));
    }

    #[tokio::test]
    async fn test_from_config_without_any_transport_fails_softly() {
        let mut config = crate::config::test_config();
        config.webdriver_url = String::new();
        config.instant_send_command = None;

        let dispatcher = DeliveryDispatcher::from_config(&config);
        let outcome = dispatcher.deliver_with_outcome(&report()).await;

        assert!(!outcome.delivered());
        let names: Vec<&str> = outcome.failures.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec!["attach", "fresh-session", "instant-helper", "scheduled-helper"]
        );
        assert!(outcome
            .failures
            .iter()
            .all(|(_, e)| matches!(e, DeliveryError::NotConfigured(_))));
    }
}
