/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Error types for the configuration store

use expression::ExpressionError;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Configuration store errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Draft configuration rejected
    #[error("Validation error: {0}")]
    Validation(String),

    /// Object missing from the snapshot
    #[error("Not found: {0}")]
    NotFound(String),

    /// Snapshot read that does not hold together
    #[error("Inconsistent snapshot: {0}")]
    Inconsistent(String),

    /// Received value does not match the item value type
    #[error("Invalid value \"{value}\" for item {item}")]
    InvalidValue { item: String, value: String },

    /// Trigger expression error
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),
}

impl StoreError {
    /// Create a new validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new inconsistency error
    pub fn inconsistent<T: Into<String>>(msg: T) -> Self {
        Self::Inconsistent(msg.into())
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Inconsistent(_) => "inconsistent",
            Self::InvalidValue { .. } => "invalid_value",
            Self::Expression(_) => "expression",
        }
    }
}
