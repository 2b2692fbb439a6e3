//! Append-only delivery log.
//!
//! The log is one JSON document holding an array of entries. Every append
//! reads the whole document, pushes the entry and rewrites the file. A
//! missing or unreadable file counts as an empty log.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::LogError;

/// Summary of one generated report, taken from its last sampled day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeliveryLogEntry {
    pub timestamp: DateTime<Utc>,
    /// Temperature in Celsius
    pub temperature: f64,
    /// Relative humidity in percent, when the forecast carried it
    pub humidity: Option<u8>,
    /// UV index (0 when the enrichment call failed)
    pub uv_index: f64,
    /// Air-quality index (0 when the enrichment call failed)
    pub air_quality_index: u32,
    pub alerts: Vec<String>,
    pub condition: String,
}

/// File-backed delivery log. Single writer, no locking.
#[derive(Debug, Clone)]
pub struct DeliveryLog {
    path: PathBuf,
}

impl DeliveryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry, oldest first.
    pub async fn read_all(&self) -> Vec<DeliveryLogEntry> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(
                    "Delivery log {} unreadable ({}), treating as empty",
                    self.path.display(),
                    e
                );
                return Vec::new();
            }
        };

        serde_json::from_str(&contents).unwrap_or_else(|e| {
            tracing::warn!(
                "Delivery log {} is not a valid entry list ({}), treating as empty",
                self.path.display(),
                e
            );
            Vec::new()
        })
    }

    /// Append one entry and rewrite the document. Returns the new length.
    pub async fn append(&self, entry: DeliveryLogEntry) -> Result<usize, LogError> {
        let mut entries = self.read_all().await;
        entries.push(entry);

        let json = serde_json::to_string_pretty(&entries)?;
        tokio::fs::write(&self.path, json).await?;

        tracing::debug!(
            "Delivery log {} now holds {} entries",
            self.path.display(),
            entries.len()
        );
        Ok(entries.len())
    }
}

#[cfg(test)]
pub(crate) fn sample_entry(temperature: f64) -> DeliveryLogEntry {
    DeliveryLogEntry {
        timestamp: "2026-07-01T09:00:00Z".parse().unwrap(),
        temperature,
        humidity: Some(71),
        uv_index: 4.2,
        air_quality_index: 2,
        alerts: vec!["⚠️ Rain/Storm Alert".to_string()],
        condition: "light rain".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = DeliveryLog::new(dir.path().join("logs.json"));
        assert!(log.read_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_append_grows_by_one_each_time() {
        let dir = tempfile::tempdir().unwrap();
        let log = DeliveryLog::new(dir.path().join("logs.json"));

        for i in 0..3 {
            let len = log.append(sample_entry(20.0 + i as f64)).await.unwrap();
            assert_eq!(len, i + 1);
        }

        let entries = log.read_all().await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].temperature, 20.0);
        assert_eq!(entries[2].temperature, 22.0);
    }

    #[tokio::test]
    async fn test_corrupt_file_restarts_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.json");
        std::fs::write(&path, "{ not json").unwrap();

        let log = DeliveryLog::new(&path);
        assert!(log.read_all().await.is_empty());
        assert_eq!(log.append(sample_entry(18.5)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_document_is_pretty_printed_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.json");
        let log = DeliveryLog::new(&path);
        log.append(sample_entry(30.0)).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("[\n  {"));
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value[0]["temperature"], 30.0);
        assert_eq!(value[0]["condition"], "light rain");
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // The log path is a directory, so the rewrite must fail
        let log = DeliveryLog::new(dir.path());
        assert!(matches!(
            log.append(sample_entry(10.0)).await,
            Err(LogError::Io(_))
        ));
    }
}
