//! Background scheduler for periodic weather reports.
//!
//! Runs the report pipeline on a fixed interval: produce the report, print it,
//! deliver it, append the log entry. Cycles are strictly serial. The first
//! cycle runs one interval after startup.
//!
//! State is in-memory (`Arc<RwLock<SchedulerState>>`) and exposed through
//! the status endpoint; it resets on restart. The delivery log on disk is the
//! durable record.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::services::delivery::DeliveryDispatcher;
use crate::services::delivery_log::DeliveryLog;
use crate::services::report::{ForecastReporter, Report};

// ---------------------------------------------------------------------------
// Scheduler state (in-memory, shared via Arc<RwLock<>>)
// ---------------------------------------------------------------------------

/// Global scheduler state, exposed via the status endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchedulerState {
    pub active: bool,
    pub interval_minutes: u64,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_completed_at: Option<DateTime<Utc>>,
    pub last_run_duration_ms: Option<u64>,
    pub total_runs: u64,
    /// Cycles whose report reached the recipient
    pub total_delivered: u64,
    /// Strategy that delivered the last report ("attach", "fresh-session", ...)
    pub last_delivered_by: Option<String>,
    /// Failed delivery attempts of the last cycle, as "strategy: error"
    pub last_failures: Vec<String>,
    /// Error that aborted the last cycle (log write failure)
    pub last_error: Option<String>,
}

impl SchedulerState {
    pub fn new(interval_minutes: u64) -> Self {
        Self {
            active: true,
            interval_minutes,
            next_run_at: None,
            last_run_completed_at: None,
            last_run_duration_ms: None,
            total_runs: 0,
            total_delivered: 0,
            last_delivered_by: None,
            last_failures: Vec::new(),
            last_error: None,
        }
    }
}

/// Shared scheduler state handle.
pub type SharedSchedulerState = Arc<RwLock<SchedulerState>>;

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Result of one pipeline run.
#[derive(Debug)]
pub struct CycleSummary {
    pub report: Report,
    pub delivered_by: Option<&'static str>,
    pub failures: Vec<String>,
    /// Log length after appending, `None` when no entry was produced.
    pub log_len: Option<usize>,
}

impl CycleSummary {
    pub fn delivered(&self) -> bool {
        self.delivered_by.is_some()
    }
}

/// Reporter, dispatcher and log wired together.
pub struct Pipeline {
    reporter: ForecastReporter,
    dispatcher: DeliveryDispatcher,
    log: DeliveryLog,
}

impl Pipeline {
    pub fn new(
        reporter: ForecastReporter,
        dispatcher: DeliveryDispatcher,
        log: DeliveryLog,
    ) -> Self {
        Self {
            reporter,
            dispatcher,
            log,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            ForecastReporter::new(config.clone()),
            DeliveryDispatcher::from_config(config),
            DeliveryLog::new(&config.log_file),
        )
    }

    pub fn log(&self) -> &DeliveryLog {
        &self.log
    }

    /// Produce, print, deliver and log one report.
    ///
    /// Delivery failure is not an error: the entry is logged either way.
    /// Only a failed log write is returned.
    pub async fn run_cycle(&self) -> Result<CycleSummary, AppError> {
        let (report, entry) = self.reporter.produce().await;
        tracing::info!("Report:\n{}", report);

        let outcome = self.dispatcher.deliver_with_outcome(&report).await;
        let failures = outcome
            .failures
            .iter()
            .map(|(name, err)| format!("{}: {}", name, err))
            .collect();

        let log_len = match entry {
            Some(entry) => Some(self.log.append(entry).await?),
            None => None,
        };

        Ok(CycleSummary {
            report,
            delivered_by: outcome.delivered_by,
            failures,
            log_len,
        })
    }
}

// ---------------------------------------------------------------------------
// Main scheduler loop
// ---------------------------------------------------------------------------

/// Run the scheduler. This function never returns (runs until process exit).
///
/// Should be spawned via `tokio::spawn(run_scheduler(...))`.
pub async fn run_scheduler(pipeline: Pipeline, state: SharedSchedulerState) {
    let interval_minutes = state.read().await.interval_minutes;
    tracing::info!(
        "Scheduler started, reporting every {} minutes",
        interval_minutes
    );

    loop {
        {
            let mut s = state.write().await;
            s.next_run_at = Some(Utc::now() + Duration::minutes(interval_minutes as i64));
        }
        sleep_minutes(interval_minutes).await;

        let cycle_start = Utc::now();
        let result = pipeline.run_cycle().await;
        record_cycle(&state, &result, cycle_start).await;
    }
}

/// Fold one cycle's result into the shared state and log a summary.
async fn record_cycle(
    state: &SharedSchedulerState,
    result: &Result<CycleSummary, AppError>,
    cycle_start: DateTime<Utc>,
) {
    let duration_ms = (Utc::now() - cycle_start).num_milliseconds().max(0) as u64;

    let mut s = state.write().await;
    s.total_runs += 1;
    s.last_run_completed_at = Some(Utc::now());
    s.last_run_duration_ms = Some(duration_ms);

    match result {
        Ok(summary) => {
            if summary.delivered() {
                s.total_delivered += 1;
            }
            s.last_delivered_by = summary.delivered_by.map(str::to_string);
            s.last_failures = summary.failures.clone();
            s.last_error = None;
            tracing::info!(
                "Scheduler: cycle {} complete in {}ms (delivered: {}, log entries: {})",
                s.total_runs,
                duration_ms,
                summary.delivered_by.unwrap_or("no"),
                summary
                    .log_len
                    .map_or_else(|| "unchanged".to_string(), |n| n.to_string()),
            );
        }
        Err(e) => {
            tracing::error!("Scheduler: cycle {} failed: {}", s.total_runs, e);
            s.last_delivered_by = None;
            s.last_failures.clear();
            s.last_error = Some(e.to_string());
        }
    }
}

async fn sleep_minutes(minutes: u64) {
    tokio::time::sleep(std::time::Duration::from_secs(minutes * 60)).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::errors::{DeliveryError, LogError};
    use crate::services::delivery::{ComposeMessage, DeliveryStrategy};
    use crate::services::owm::forecast_item_json;
    use crate::services::report::CONFIG_ERROR_MESSAGE;
    use async_trait::async_trait;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedStrategy {
        name: &'static str,
        succeed: bool,
    }

    #[async_trait]
    impl DeliveryStrategy for FixedStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn send(&self, _message: &ComposeMessage) -> Result<(), DeliveryError> {
            if self.succeed {
                Ok(())
            } else {
                Err(DeliveryError::Unreachable("nothing listening".into()))
            }
        }
    }

    async fn mount_owm(server: &MockServer) {
        let list: Vec<serde_json::Value> = (0..16)
            .map(|i| {
                let dt_txt = format!("2026-07-{:02} {:02}:00:00", 1 + i / 8, (i % 8) * 3);
                forecast_item_json(&dt_txt, 24.0, 50, "scattered clouds")
            })
            .collect();
        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cod": "200",
                "list": list
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/air_pollution"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "list": [{ "main": { "aqi": 2 } }]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/3.0/onecall"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "current": { "uvi": 3.5 }
            })))
            .mount(server)
            .await;
    }

    fn pipeline(config: AppConfig, log: DeliveryLog, delivers: bool) -> Pipeline {
        let dispatcher = DeliveryDispatcher::new(
            config.phone_number.clone(),
            &config.whatsapp_send_url,
            config.debug_port,
            vec![
                Box::new(FixedStrategy {
                    name: "attach",
                    succeed: false,
                }),
                Box::new(FixedStrategy {
                    name: "instant-helper",
                    succeed: delivers,
                }),
            ],
        );
        Pipeline::new(ForecastReporter::new(config), dispatcher, log)
    }

    #[test]
    fn test_scheduler_state_new() {
        let state = SchedulerState::new(60);
        assert!(state.active);
        assert_eq!(state.interval_minutes, 60);
        assert_eq!(state.total_runs, 0);
        assert!(state.next_run_at.is_none());
        assert!(state.last_failures.is_empty());
    }

    #[tokio::test]
    async fn test_each_cycle_appends_one_entry() {
        let server = MockServer::start().await;
        mount_owm(&server).await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.owm_base_url = server.uri();
        let log = DeliveryLog::new(dir.path().join("logs.json"));
        let pipeline = pipeline(config, log, true);

        for n in 1..=3 {
            let summary = tokio_test::assert_ok!(pipeline.run_cycle().await);
            assert_eq!(summary.log_len, Some(n));
            assert_eq!(summary.delivered_by, Some("instant-helper"));
            assert_eq!(summary.failures.len(), 1);
            assert!(summary.failures[0].starts_with("attach: "));
        }
        assert_eq!(pipeline.log().read_all().await.len(), 3);
    }

    #[tokio::test]
    async fn test_undelivered_report_is_still_logged() {
        let server = MockServer::start().await;
        mount_owm(&server).await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.owm_base_url = server.uri();
        let pipeline = pipeline(config, DeliveryLog::new(dir.path().join("logs.json")), false);

        let summary = pipeline.run_cycle().await.unwrap();
        assert!(!summary.delivered());
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(summary.log_len, Some(1));

        let entries = pipeline.log().read_all().await;
        assert_eq!(entries[0].temperature, 24.0);
        assert_eq!(entries[0].uv_index, 3.5);
        assert_eq!(entries[0].air_quality_index, 2);
    }

    #[tokio::test]
    async fn test_missing_config_logs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.phone_number = None;
        let pipeline = pipeline(config, DeliveryLog::new(dir.path().join("logs.json")), true);

        let summary = pipeline.run_cycle().await.unwrap();
        assert_eq!(summary.report.as_str(), CONFIG_ERROR_MESSAGE);
        assert!(!summary.delivered(), "no recipient, nothing to deliver to");
        assert_eq!(summary.log_len, None);
        assert!(!dir.path().join("logs.json").exists());
    }

    #[tokio::test]
    async fn test_log_write_failure_is_an_error() {
        let server = MockServer::start().await;
        mount_owm(&server).await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.owm_base_url = server.uri();
        // A directory cannot be written as a file
        let pipeline = pipeline(config, DeliveryLog::new(dir.path()), true);

        let result = pipeline.run_cycle().await;
        assert!(matches!(result, Err(AppError::Log(LogError::Io(_)))));
    }

    #[tokio::test]
    async fn test_record_cycle_updates_totals() {
        let state: SharedSchedulerState = Arc::new(RwLock::new(SchedulerState::new(30)));
        let delivered = Ok(CycleSummary {
            report: Report::new("ok"),
            delivered_by: Some("fresh-session"),
            failures: vec!["attach: unreachable".to_string()],
            log_len: Some(4),
        });
        record_cycle(&state, &delivered, Utc::now()).await;

        let failed: Result<CycleSummary, AppError> = Err(AppError::Log(LogError::Io(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        )));
        record_cycle(&state, &failed, Utc::now()).await;

        let s = state.read().await;
        assert_eq!(s.total_runs, 2);
        assert_eq!(s.total_delivered, 1);
        assert!(s.last_delivered_by.is_none());
        assert!(s.last_failures.is_empty());
        assert!(s.last_error.as_deref().unwrap().contains("denied"));
        assert!(s.last_run_completed_at.is_some());
    }

    #[tokio::test]
    async fn test_record_cycle_keeps_delivery_details() {
        let state: SharedSchedulerState = Arc::new(RwLock::new(SchedulerState::new(30)));
        let summary = Ok(CycleSummary {
            report: Report::new("ok"),
            delivered_by: Some("scheduled-helper"),
            failures: vec!["attach: a".to_string(), "fresh-session: b".to_string()],
            log_len: None,
        });
        record_cycle(&state, &summary, Utc::now()).await;

        let s = state.read().await;
        assert_eq!(s.last_delivered_by.as_deref(), Some("scheduled-helper"));
        assert_eq!(s.last_failures.len(), 2);
        assert!(s.last_error.is_none());
    }
}
