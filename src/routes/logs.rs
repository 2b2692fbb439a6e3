use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::errors::{AppError, ErrorResponse};
use crate::services::delivery_log::{DeliveryLog, DeliveryLogEntry};

#[derive(Debug, Deserialize, IntoParams)]
pub struct LogQuery {
    /// Return only the most recent N entries (all when omitted)
    pub limit: Option<usize>,
}

/// List delivery log entries, oldest first.
///
/// An unreadable or corrupt log file reads as empty, matching what the next
/// append will do with it.
#[utoipa::path(
    get,
    path = "/api/v1/logs",
    tag = "Logs",
    params(LogQuery),
    responses(
        (status = 200, description = "Delivery log entries", body = Vec<DeliveryLogEntry>),
        (status = 400, description = "Invalid limit", body = ErrorResponse),
    )
)]
pub async fn list_logs(
    State(log): State<DeliveryLog>,
    Query(params): Query<LogQuery>,
) -> Result<Json<Vec<DeliveryLogEntry>>, AppError> {
    if params.limit == Some(0) {
        return Err(AppError::BadRequest(
            "limit must be a positive integer".to_string(),
        ));
    }

    let entries = log.read_all().await;
    let skip = params
        .limit
        .map_or(0, |limit| entries.len().saturating_sub(limit));

    Ok(Json(entries.into_iter().skip(skip).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::delivery_log::sample_entry;

    async fn log_with(n: usize) -> (tempfile::TempDir, DeliveryLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = DeliveryLog::new(dir.path().join("logs.json"));
        for i in 0..n {
            log.append(sample_entry(i as f64)).await.unwrap();
        }
        (dir, log)
    }

    #[tokio::test]
    async fn test_list_all_entries() {
        let (_dir, log) = log_with(3).await;
        let Json(entries) = list_logs(State(log), Query(LogQuery { limit: None }))
            .await
            .unwrap();
        let temps: Vec<f64> = entries.iter().map(|e| e.temperature).collect();
        assert_eq!(temps, vec![0.0, 1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_limit_keeps_most_recent() {
        let (_dir, log) = log_with(5).await;
        let Json(entries) = list_logs(State(log), Query(LogQuery { limit: Some(2) }))
            .await
            .unwrap();
        let temps: Vec<f64> = entries.iter().map(|e| e.temperature).collect();
        assert_eq!(temps, vec![3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_limit_larger_than_log() {
        let (_dir, log) = log_with(2).await;
        let Json(entries) = list_logs(State(log), Query(LogQuery { limit: Some(50) }))
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let (_dir, log) = log_with(1).await;
        let result = list_logs(State(log), Query(LogQuery { limit: Some(0) })).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_missing_log_is_empty() {
        let (_dir, log) = log_with(0).await;
        let Json(entries) = list_logs(State(log), Query(LogQuery { limit: None }))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }
}
