/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Evaluation values and three-valued logic

use crate::history::SampleValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of evaluating a trigger expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tristate {
    True,
    False,
    Unknown,
}

impl Tristate {
    /// Kleene conjunction: false wins over unknown
    pub fn and(self, other: Tristate) -> Tristate {
        match (self, other) {
            (Self::False, _) | (_, Self::False) => Self::False,
            (Self::Unknown, _) | (_, Self::Unknown) => Self::Unknown,
            _ => Self::True,
        }
    }

    /// Kleene disjunction: true wins over unknown
    pub fn or(self, other: Tristate) -> Tristate {
        match (self, other) {
            (Self::True, _) | (_, Self::True) => Self::True,
            (Self::Unknown, _) | (_, Self::Unknown) => Self::Unknown,
            _ => Self::False,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl std::ops::Not for Tristate {
    type Output = Tristate;

    fn not(self) -> Tristate {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Unknown => Self::Unknown,
        }
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

impl fmt::Display for Tristate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Intermediate evaluation value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Unknown,
}

impl Value {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Numeric view of the value, parsing text when possible
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(text) => text.trim().parse().ok(),
            Self::Unknown => None,
        }
    }
}

impl From<Tristate> for Value {
    fn from(value: Tristate) -> Self {
        match value {
            Tristate::True => Self::Number(1.0),
            Tristate::False => Self::Number(0.0),
            Tristate::Unknown => Self::Unknown,
        }
    }
}

impl From<&SampleValue> for Value {
    fn from(value: &SampleValue) -> Self {
        match value {
            SampleValue::Numeric(number) => Self::Number(*number),
            SampleValue::Text(text) => Self::Text(text.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{}", format_number(*value)),
            Self::Text(text) => write!(f, "{}", text),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Canonical text form of a number: integers without a fraction
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Numeric equality under an epsilon tolerance
pub fn approx_eq(left: f64, right: f64, epsilon: f64) -> bool {
    (left - right).abs() <= epsilon
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tristate_and() {
        assert_eq!(Tristate::Unknown.and(Tristate::False), Tristate::False);
        assert_eq!(Tristate::False.and(Tristate::Unknown), Tristate::False);
        assert_eq!(Tristate::Unknown.and(Tristate::True), Tristate::Unknown);
        assert_eq!(Tristate::True.and(Tristate::True), Tristate::True);
    }

    #[test]
    fn test_tristate_or() {
        assert_eq!(Tristate::Unknown.or(Tristate::True), Tristate::True);
        assert_eq!(Tristate::Unknown.or(Tristate::False), Tristate::Unknown);
        assert_eq!(Tristate::False.or(Tristate::False), Tristate::False);
    }

    #[test]
    fn test_tristate_not() {
        assert_eq!(!Tristate::Unknown, Tristate::Unknown);
        assert_eq!(!Tristate::True, Tristate::False);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(-2.5), "-2.5");
    }
}
