/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Error types for expression parsing and evaluation

/// Result type for expression operations
pub type Result<T> = std::result::Result<T, ExpressionError>;

/// Expression errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    /// Malformed expression text
    #[error("Syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    /// Function name not supported
    #[error("Unknown function \"{0}\"")]
    UnknownFunction(String),

    /// Wrong number or format of function parameters
    #[error("Invalid parameters for {function}(): {message}")]
    InvalidParameters { function: String, message: String },

    /// Item reference that does not exist in the configuration
    #[error("Unknown item reference {0}")]
    UnknownItem(String),

    /// Item reference that was never resolved to an item identifier
    #[error("Unresolved item reference {0}")]
    UnresolvedItem(String),

    /// Division by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// Arithmetic produced NaN or infinity
    #[error("Calculation resulted in NaN or Infinity")]
    NotFinite,

    /// Operand cannot be used as a number
    #[error("Value \"{value}\" is not numeric for operator \"{operator}\"")]
    NotNumeric { value: String, operator: String },

    /// Aggregate function applied to text values
    #[error("Function {function}() requires numeric values of item {item}")]
    NonNumericHistory { function: String, item: String },

    /// History retrieval failed
    #[error("History error: {0}")]
    History(String),
}

impl ExpressionError {
    /// Create a new syntax error
    pub fn syntax<T: Into<String>>(position: usize, message: T) -> Self {
        Self::Syntax {
            position,
            message: message.into(),
        }
    }

    /// Create a new invalid parameters error
    pub fn invalid_parameters<F: Into<String>, T: Into<String>>(function: F, message: T) -> Self {
        Self::InvalidParameters {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Create a new history error
    pub fn history<T: Into<String>>(message: T) -> Self {
        Self::History(message.into())
    }

    /// Whether the error was raised while evaluating rather than parsing
    pub fn is_evaluation(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedItem(_)
                | Self::DivisionByZero
                | Self::NotFinite
                | Self::NotNumeric { .. }
                | Self::NonNumericHistory { .. }
                | Self::History(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExpressionError::syntax(4, "expected ')'");
        assert_eq!(err.to_string(), "Syntax error at position 4: expected ')'");
        assert!(!err.is_evaluation());
        assert!(ExpressionError::DivisionByZero.is_evaluation());
    }
}
