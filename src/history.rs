//! Append-mostly history of completed analyses, persisted as a JSON array.
//! Retention is capped at the most recent 100 records, oldest dropped
//! first, most-recent-last on disk. All writes go through one lock so
//! concurrent appends cannot lose the retention invariant.

use crate::features::FeatureVector;
use crate::model::Verdict;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const RETENTION_LIMIT: usize = 100;
pub const RECENT_WINDOW: usize = 20;

/// One completed analysis. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub url: String,
    pub prediction: Verdict,
    pub safe_probability: f64,
    pub phishing_probability: f64,
    pub features: FeatureVector,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistorySummary {
    pub total_checks: usize,
    pub safe_count: usize,
    pub phishing_count: usize,
    pub safe_percentage: f64,
    pub phishing_percentage: f64,
    /// Newest first.
    pub recent: Vec<HistoryRecord>,
}

pub struct HistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        HistoryStore {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn load(&self) -> Result<Vec<HistoryRecord>> {
        if !Path::new(&self.path).exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read history file: {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse history file: {}", self.path.display()))
    }

    /// Append one record, truncating to the retention limit. Read-modify-
    /// write runs under the store lock end to end.
    pub fn append(&self, record: &HistoryRecord) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut records = self.load().unwrap_or_else(|e| {
            log::warn!("History file unreadable, starting fresh: {e}");
            Vec::new()
        });
        records.push(record.clone());
        if records.len() > RETENTION_LIMIT {
            let excess = records.len() - RETENTION_LIMIT;
            records.drain(..excess);
        }

        let content =
            serde_json::to_string_pretty(&records).context("Failed to serialize history")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write history file: {}", self.path.display()))?;
        Ok(())
    }

    pub fn summary(&self) -> Result<HistorySummary> {
        let records = self.load()?;
        let total_checks = records.len();
        let safe_count = records
            .iter()
            .filter(|r| r.prediction == Verdict::Safe)
            .count();
        let phishing_count = total_checks - safe_count;

        let percentage = |count: usize| {
            if total_checks == 0 {
                0.0
            } else {
                (count as f64 / total_checks as f64 * 10_000.0).round() / 100.0
            }
        };

        let recent = records
            .into_iter()
            .rev()
            .take(RECENT_WINDOW)
            .collect::<Vec<_>>();

        Ok(HistorySummary {
            total_checks,
            safe_count,
            phishing_count,
            safe_percentage: percentage(safe_count),
            phishing_percentage: percentage(phishing_count),
            recent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Ternary, FeatureVector, SCHEMA};
    use tempfile::tempdir;

    fn record(url: &str, prediction: Verdict) -> HistoryRecord {
        HistoryRecord {
            url: url.to_string(),
            prediction,
            safe_probability: 0.9,
            phishing_probability: 0.1,
            features: FeatureVector::from_values(vec![Ternary::Legit; SCHEMA.len()]).unwrap(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_append_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));

        store.append(&record("http://a.com", Verdict::Safe)).unwrap();
        store.append(&record("http://b.com", Verdict::Phishing)).unwrap();

        let records = store.load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url, "http://a.com");
        assert_eq!(records[1].url, "http://b.com");
        assert_eq!(records[1].features.values().len(), 30);
    }

    #[test]
    fn test_retention_keeps_last_hundred_in_order() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));

        for i in 0..150 {
            store
                .append(&record(&format!("http://site{i}.com"), Verdict::Safe))
                .unwrap();
        }

        let records = store.load().unwrap();
        assert_eq!(records.len(), RETENTION_LIMIT);
        assert_eq!(records[0].url, "http://site50.com");
        assert_eq!(records[99].url, "http://site149.com");
    }

    #[test]
    fn test_summary_counts_and_order() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));

        store.append(&record("http://a.com", Verdict::Safe)).unwrap();
        store.append(&record("http://b.com", Verdict::Safe)).unwrap();
        store.append(&record("http://c.com", Verdict::Phishing)).unwrap();
        store.append(&record("http://d.com", Verdict::Safe)).unwrap();

        let summary = store.summary().unwrap();
        assert_eq!(summary.total_checks, 4);
        assert_eq!(summary.safe_count, 3);
        assert_eq!(summary.phishing_count, 1);
        assert_eq!(summary.safe_percentage, 75.0);
        assert_eq!(summary.phishing_percentage, 25.0);
        // Newest first.
        assert_eq!(summary.recent[0].url, "http://d.com");
        assert_eq!(summary.recent[3].url, "http://a.com");
    }

    #[test]
    fn test_summary_empty_store() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));
        let summary = store.summary().unwrap();
        assert_eq!(summary.total_checks, 0);
        assert_eq!(summary.safe_percentage, 0.0);
        assert!(summary.recent.is_empty());
    }
}
