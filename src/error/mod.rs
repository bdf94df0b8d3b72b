//! Error types for Roci streaming.

use thiserror::Error;

/// Primary error type for all streaming operations.
///
/// Errors are `Clone` so a single run failure can be delivered to every
/// live subscription of that run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RociError {
    #[error("Provider error: {0}")]
    Provider(serde_json::Value),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("No output generated: the run ended before any step completed")]
    NoOutputGenerated,

    #[error("Message conversion error: {0}")]
    MessageConversion(String),

    #[error("Model error: {provider}: {message}")]
    Model { provider: String, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Broad error category for routing handling logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Provider,
    Cancellation,
    NoOutput,
    Conversion,
    Timeout,
    Configuration,
    Serialization,
    Internal,
}

impl RociError {
    /// Create a model error for a named provider.
    pub fn model(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Model {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Provider(_) | Self::Model { .. } => ErrorCategory::Provider,
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::NoOutputGenerated => ErrorCategory::NoOutput,
            Self::MessageConversion(_) => ErrorCategory::Conversion,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Stream(_) | Self::InvalidState(_) => ErrorCategory::Internal,
        }
    }

    /// Whether this error represents a cancelled run rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for RociError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for RociError {
    fn from(error: toml::de::Error) -> Self {
        Self::Configuration(error.to_string())
    }
}

impl From<std::io::Error> for RociError {
    fn from(error: std::io::Error) -> Self {
        Self::Configuration(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RociError>;
