//! Last-resort delivery through an external instant-send helper.
//!
//! The helper is any program accepting:
//!
//! ```text
//! <cmd> send     --phone <phone> --url <compose-url> --wait <secs> --close-after <secs>
//! <cmd> schedule --phone <phone> --url <compose-url> --at <HH:MM> --wait <secs>
//! ```
//!
//! and exiting 0 once the message went out.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, Timelike};

use super::{ComposeMessage, DeliveryStrategy};
use crate::errors::DeliveryError;

/// Seconds the helper gives the page to load before sending.
const INSTANT_WAIT_SECS: u64 = 15;

/// Seconds the helper keeps the tab open after sending.
const INSTANT_CLOSE_SECS: u64 = 3;

/// Load wait for the scheduled send.
const SCHEDULED_WAIT_SECS: u64 = 20;

/// The helper refuses send times closer than this.
const SCHEDULE_LEAD_SECS: i64 = 90;

/// Slack on top of the helper's own waits before it is killed.
const HELPER_GRACE_SECS: u64 = 30;

/// Run the helper to completion within `timeout`.
async fn run_helper(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<(), DeliveryError> {
    let child = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| DeliveryError::Timeout(timeout.as_secs()))?
        .map_err(|e| DeliveryError::Helper(format!("could not start {}: {}", program, e)))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(DeliveryError::Helper(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

fn helper_program(command: &Option<String>) -> Result<&str, DeliveryError> {
    command
        .as_deref()
        .ok_or_else(|| DeliveryError::NotConfigured("INSTANT_SEND_COMMAND is not set".into()))
}

/// Opens the compose surface and sends after a short wait.
pub struct InstantHelperStrategy {
    command: Option<String>,
}

impl InstantHelperStrategy {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl DeliveryStrategy for InstantHelperStrategy {
    fn name(&self) -> &'static str {
        "instant-helper"
    }

    async fn send(&self, message: &ComposeMessage) -> Result<(), DeliveryError> {
        let program = helper_program(&self.command)?;
        let args = vec![
            "send".to_string(),
            "--phone".to_string(),
            message.phone.clone(),
            "--url".to_string(),
            message.url.clone(),
            "--wait".to_string(),
            INSTANT_WAIT_SECS.to_string(),
            "--close-after".to_string(),
            INSTANT_CLOSE_SECS.to_string(),
        ];
        let budget = Duration::from_secs(INSTANT_WAIT_SECS + INSTANT_CLOSE_SECS + HELPER_GRACE_SECS);
        run_helper(program, &args, budget).await
    }
}

/// Earliest whole minute at least [`SCHEDULE_LEAD_SECS`] after `now`.
pub fn scheduled_send_time(now: NaiveDateTime) -> NaiveDateTime {
    let target = now + chrono::Duration::seconds(SCHEDULE_LEAD_SECS);
    let floored = target
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(target);
    if floored == target {
        target
    } else {
        floored + chrono::Duration::minutes(1)
    }
}

/// Asks the helper to send at a fixed minute in the near future.
pub struct ScheduledHelperStrategy {
    command: Option<String>,
}

impl ScheduledHelperStrategy {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl DeliveryStrategy for ScheduledHelperStrategy {
    fn name(&self) -> &'static str {
        "scheduled-helper"
    }

    async fn send(&self, message: &ComposeMessage) -> Result<(), DeliveryError> {
        let program = helper_program(&self.command)?;
        let now = Local::now().naive_local();
        let at = scheduled_send_time(now);
        tracing::info!("Final fallback: scheduling send for {}", at.format("%H:%M"));

        let args = vec![
            "schedule".to_string(),
            "--phone".to_string(),
            message.phone.clone(),
            "--url".to_string(),
            message.url.clone(),
            "--at".to_string(),
            at.format("%H:%M").to_string(),
            "--wait".to_string(),
            SCHEDULED_WAIT_SECS.to_string(),
        ];
        let until_send = (at - now).num_seconds().max(0) as u64;
        let budget = Duration::from_secs(until_send + SCHEDULED_WAIT_SECS + HELPER_GRACE_SECS);
        run_helper(program, &args, budget).await
    }
}
