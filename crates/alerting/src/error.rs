/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Error types for the alerting engine

use expression::ExpressionError;
use store::StoreError;

/// Result type for alerting operations
pub type Result<T> = std::result::Result<T, AlertingError>;

/// Alerting engine errors
#[derive(Debug, thiserror::Error)]
pub enum AlertingError {
    /// Trigger expression could not be evaluated
    #[error("Evaluation error: {0}")]
    Evaluation(ExpressionError),

    /// History needed by an evaluation could not be retrieved
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// Notification failed after every retry attempt
    #[error("Notification dispatch failed on channel {channel} after {attempts} attempts: {message}")]
    NotificationDispatch {
        channel: String,
        attempts: u32,
        message: String,
    },

    /// Snapshot is missing an object a pass depends on
    #[error("Snapshot inconsistency: {0}")]
    SnapshotInconsistency(String),

    /// Event older than the newest event of its trigger
    #[error("Event order violation: {0}")]
    EventOrder(String),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration store rejected an operation
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Channel error
    #[error("Channel error: {0}")]
    Channel(String),

    /// Template error
    #[error("Template error: {0}")]
    Template(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit error
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Service unavailable error
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl AlertingError {
    /// Create a new configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new channel error
    pub fn channel<T: Into<String>>(msg: T) -> Self {
        Self::Channel(msg.into())
    }

    /// Create a new template error
    pub fn template<T: Into<String>>(msg: T) -> Self {
        Self::Template(msg.into())
    }

    /// Create a new network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        Self::Network(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new invalid state error
    pub fn invalid_state<T: Into<String>>(msg: T) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a new event order error
    pub fn event_order<T: Into<String>>(msg: T) -> Self {
        Self::EventOrder(msg.into())
    }

    /// Create a new snapshot inconsistency error
    pub fn inconsistent<T: Into<String>>(msg: T) -> Self {
        Self::SnapshotInconsistency(msg.into())
    }

    /// Create a new service unavailable error
    pub fn service_unavailable<T: Into<String>>(msg: T) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::ServiceUnavailable(_) | Self::Timeout(_) | Self::RateLimit(_) => true,
            Self::Http(e) => e
                .status()
                .map_or(true, |status| status.is_server_error() || status == 429),
            _ => false,
        }
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            Self::Evaluation(_) => "evaluation",
            Self::DataUnavailable(_) => "data_unavailable",
            Self::NotificationDispatch { .. } => "dispatch",
            Self::SnapshotInconsistency(_) => "inconsistency",
            Self::EventOrder(_) => "event_order",
            Self::InvalidState(_) => "invalid_state",
            Self::Store(_) => "store",
            Self::Config(_) => "config",
            Self::Channel(_) => "channel",
            Self::Template(_) => "template",
            Self::Network(_) => "network",
            Self::RateLimit(_) => "rate_limit",
            Self::NotFound(_) => "not_found",
            Self::ServiceUnavailable(_) => "service",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Http(_) => "http",
            Self::Toml(_) => "toml",
        }
    }
}

impl From<ExpressionError> for AlertingError {
    fn from(err: ExpressionError) -> Self {
        match err {
            ExpressionError::History(msg) => Self::DataUnavailable(msg),
            other => Self::Evaluation(other),
        }
    }
}

impl From<StoreError> for AlertingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Inconsistent(msg) => Self::SnapshotInconsistency(msg),
            StoreError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Store(other),
        }
    }
}

impl From<String> for AlertingError {
    fn from(msg: String) -> Self {
        Self::Internal(msg)
    }
}

impl From<&str> for AlertingError {
    fn from(msg: &str) -> Self {
        Self::Internal(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = AlertingError::config("test config error");
        assert!(matches!(err, AlertingError::Config(_)));
        assert_eq!(err.to_string(), "Configuration error: test config error");
    }

    #[test]
    fn test_error_retryable() {
        assert!(AlertingError::network("test").is_retryable());
        assert!(AlertingError::timeout("test").is_retryable());
        assert!(AlertingError::service_unavailable("test").is_retryable());
        assert!(!AlertingError::config("test").is_retryable());
        assert!(!AlertingError::channel("exit status 1").is_retryable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(AlertingError::config("test").category(), "config");
        assert_eq!(AlertingError::event_order("test").category(), "event_order");
        assert_eq!(
            AlertingError::Evaluation(ExpressionError::DivisionByZero).category(),
            "evaluation"
        );
    }

    #[test]
    fn test_expression_error_mapping() {
        let err: AlertingError = ExpressionError::history("backend offline").into();
        assert!(matches!(err, AlertingError::DataUnavailable(_)));

        let err: AlertingError = ExpressionError::NotFinite.into();
        assert!(matches!(err, AlertingError::Evaluation(_)));
    }

    #[test]
    fn test_store_error_mapping() {
        let err: AlertingError = StoreError::inconsistent("trigger 7 missing").into();
        assert!(matches!(err, AlertingError::SnapshotInconsistency(_)));

        let err: AlertingError = StoreError::validation("bad").into();
        assert!(matches!(err, AlertingError::Store(_)));
    }

    #[test]
    fn test_error_from_string() {
        let err: AlertingError = "test error".into();
        assert!(matches!(err, AlertingError::Internal(_)));
    }
}
