pub mod analyzer;
pub mod config;
pub mod errors;
pub mod features;
pub mod history;
pub mod model;
pub mod url_input;

pub use analyzer::{BatchOutcome, HealthStatus, UrlAnalyzer};
pub use config::Config;
pub use errors::{AnalysisError, ValidationError};
pub use features::{FeatureVector, SignalId, Ternary};
pub use history::{HistoryRecord, HistoryStore};
pub use model::{Classification, ScoringModel, Verdict};
