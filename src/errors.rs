use thiserror::Error;

/// Rejection reasons from the pre-network URL gate. Each variant carries a
/// message specific enough for an end user to fix their input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter a URL")]
    EmptyInput,

    #[error("Invalid URL format. Missing scheme or domain.")]
    MissingSchemeOrHost,

    #[error("This type of URL does not exist. Please enter a valid URL with a proper domain name (e.g., example.com).")]
    HostTooShort,

    #[error("Domain name is too long. Please enter a valid URL.")]
    HostTooLong,

    #[error("Invalid characters in domain name. Please enter a valid URL.")]
    InvalidDomainLabel,

    #[error("This type of URL does not exist. Please enter a valid URL with a proper domain name (e.g., example.com).")]
    MissingTld,

    #[error("Invalid top-level domain. Please enter a valid URL.")]
    InvalidTld,
}

/// Request-level failures. Individual lookup failures inside extraction are
/// absorbed by per-signal fallback values and never reach this enum.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The engine could not assign even a fallback value to every schema
    /// slot. A short vector must never reach the classifier.
    #[error("Feature extraction failed: expected 30 features, got {got}")]
    ExtractionFailed { got: usize },

    #[error("Model not loaded. Please check the model file.")]
    ModelUnavailable,

    #[error("Maximum {max} URLs allowed per batch, got {got}")]
    BatchTooLarge { max: usize, got: usize },
}
