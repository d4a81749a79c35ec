//! Ties the pipeline together: validate, extract, classify, persist,
//! return. Also owns the batch worker pool and the readiness surface.

use crate::config::Config;
use crate::errors::AnalysisError;
use crate::features::ExtractionEngine;
use crate::history::{HistoryRecord, HistoryStore, HistorySummary};
use crate::model::{display_probability, ScoringModel};
use crate::url_input;
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub model_loaded: bool,
}

/// Per-URL outcome of a batch request. One bad URL never fails its
/// siblings.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchOutcome {
    Success(HistoryRecord),
    Failure { url: String, error: String },
}

pub struct UrlAnalyzer {
    engine: ExtractionEngine,
    model: Option<Arc<ScoringModel>>,
    history: HistoryStore,
    batch_limit: usize,
    batch_workers: usize,
}

impl UrlAnalyzer {
    /// Build the analyzer, loading the scoring model once. A missing model
    /// does not abort startup; it degrades every classification into
    /// `ModelUnavailable` until the process is restarted with a model.
    pub fn new(config: &Config) -> Result<Self> {
        let model = match ScoringModel::load(&config.model_path) {
            Ok(model) => {
                log::info!("Model loaded from {}", config.model_path);
                Some(Arc::new(model))
            }
            Err(e) => {
                log::error!("Error loading model: {e:#}");
                None
            }
        };
        Self::with_model(config, model)
    }

    pub fn with_model(config: &Config, model: Option<Arc<ScoringModel>>) -> Result<Self> {
        Ok(UrlAnalyzer {
            engine: ExtractionEngine::new(config)?,
            model,
            history: HistoryStore::new(config.history_path.clone()),
            batch_limit: config.batch_limit,
            batch_workers: config.batch_workers,
        })
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: if self.model.is_some() {
                "healthy"
            } else {
                "degraded"
            },
            model_loaded: self.model.is_some(),
        }
    }

    /// Analyze one URL end to end. The caller gets either a complete
    /// record or one specific error; never a partial result.
    pub async fn check(&self, raw: &str) -> Result<HistoryRecord, AnalysisError> {
        let url = url_input::check(raw)?;

        // Fail before any lookups when no model is loaded; extraction
        // work would be wasted.
        let model = self
            .model
            .as_ref()
            .ok_or(AnalysisError::ModelUnavailable)?;

        log::info!("Analyzing URL: {}", url.as_str());
        let vector = self.engine.extract(&url).await?;
        let classification = model.classify(&vector);
        log::info!(
            "Prediction for {}: {} (safe: {:.2}, phishing: {:.2})",
            url.as_str(),
            classification.label,
            classification.safe_probability,
            classification.phishing_probability
        );

        let record = HistoryRecord {
            url: url.as_str().to_string(),
            prediction: classification.label,
            safe_probability: display_probability(classification.safe_probability),
            phishing_probability: display_probability(classification.phishing_probability),
            features: vector,
            timestamp: Utc::now(),
        };

        // A failed history write is logged, not surfaced; the verdict is
        // still valid without the audit trail.
        if let Err(e) = self.history.append(&record) {
            log::error!("Error saving history: {e:#}");
        }

        Ok(record)
    }

    /// Analyze up to `batch_limit` URLs with a bounded worker pool,
    /// preserving input order in the output.
    pub async fn check_batch(
        self: Arc<Self>,
        urls: &[String],
    ) -> Result<Vec<BatchOutcome>, AnalysisError> {
        if urls.len() > self.batch_limit {
            return Err(AnalysisError::BatchTooLarge {
                max: self.batch_limit,
                got: urls.len(),
            });
        }
        if self.model.is_none() {
            return Err(AnalysisError::ModelUnavailable);
        }

        let semaphore = Arc::new(Semaphore::new(self.batch_workers));
        let mut tasks = JoinSet::new();

        for (index, raw) in urls.iter().enumerate() {
            let analyzer = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let raw = raw.clone();
            tasks.spawn(async move {
                // Closed only if the set is aborted, which never happens here.
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let outcome = match analyzer.check(&raw).await {
                    Ok(record) => BatchOutcome::Success(record),
                    Err(e) => BatchOutcome::Failure {
                        url: raw,
                        error: e.to_string(),
                    },
                };
                (index, outcome)
            });
        }

        let mut results: Vec<Option<BatchOutcome>> = vec![None; urls.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => results[index] = Some(outcome),
                // A crashed worker loses its index; its slot stays empty
                // and is reported per-item below.
                Err(e) => log::error!("Batch worker crashed: {e}"),
            }
        }

        Ok(collect_outcomes(results, urls))
    }

    pub fn history_summary(&self) -> Result<HistorySummary> {
        self.history.summary()
    }
}

/// Turn the indexed result slots into the final outcome list. A slot left
/// empty by a crashed worker becomes a failure entry for that URL, so one
/// crash never takes down its siblings.
fn collect_outcomes(results: Vec<Option<BatchOutcome>>, urls: &[String]) -> Vec<BatchOutcome> {
    results
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| BatchOutcome::Failure {
                url: urls[index].clone(),
                error: "analysis task failed unexpectedly".to_string(),
            })
        })
        .collect()
}
