/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Tri-state expression evaluation
//!
//! Evaluation is synchronous and free of side effects: it only reads the
//! [`HistoryData`] fetched beforehand, so the same data always produces the
//! same result.

use crate::ast::{BinaryOp, Expr, Expression, UnaryOp};
use crate::error::{ExpressionError, Result};
use crate::functions;
use crate::history::HistoryData;
use crate::value::{Tristate, Value, approx_eq, format_number};

/// Default tolerance for numeric equality
pub const DEFAULT_EPSILON: f64 = 0.000001;

/// Expression evaluator
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    epsilon: f64,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(DEFAULT_EPSILON)
    }
}

impl Evaluator {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon: epsilon.abs(),
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Evaluate an expression to true, false or unknown
    pub fn evaluate(&self, expression: &Expression, data: &HistoryData) -> Result<Tristate> {
        let value = self.eval(expression.root(), data)?;
        self.truth(&value, "result")
    }

    /// Evaluate an expression to its raw value
    pub fn evaluate_value(&self, expression: &Expression, data: &HistoryData) -> Result<Value> {
        self.eval(expression.root(), data)
    }

    fn eval(&self, expr: &Expr, data: &HistoryData) -> Result<Value> {
        match expr {
            Expr::Number(value) => Ok(Value::Number(*value)),
            Expr::Text(text) => Ok(Value::Text(text.clone())),
            Expr::Function(call) => {
                let request = call
                    .request()
                    .ok_or_else(|| ExpressionError::UnresolvedItem(call.item.to_string()))?;
                functions::evaluate(call, data.get(&request), self.epsilon)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, data)?;
                match op {
                    UnaryOp::Not => Ok(Value::from(!self.truth(&value, "not")?)),
                    UnaryOp::Negate => match value {
                        Value::Unknown => Ok(Value::Unknown),
                        value => Ok(Value::Number(-self.number(&value, "-")?)),
                    },
                }
            }
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let left = self.truth(&self.eval(left, data)?, "and")?;
                    if left == Tristate::False {
                        return Ok(Value::from(Tristate::False));
                    }
                    let right = self.truth(&self.eval(right, data)?, "and")?;
                    Ok(Value::from(left.and(right)))
                }
                BinaryOp::Or => {
                    let left = self.truth(&self.eval(left, data)?, "or")?;
                    if left == Tristate::True {
                        return Ok(Value::from(Tristate::True));
                    }
                    let right = self.truth(&self.eval(right, data)?, "or")?;
                    Ok(Value::from(left.or(right)))
                }
                op => {
                    let left = self.eval(left, data)?;
                    let right = self.eval(right, data)?;
                    self.binary(*op, left, right)
                }
            },
        }
    }

    fn binary(&self, op: BinaryOp, left: Value, right: Value) -> Result<Value> {
        if left.is_unknown() || right.is_unknown() {
            return Ok(Value::Unknown);
        }

        match op {
            BinaryOp::Equal => Ok(Value::from(Tristate::from(self.equals(&left, &right)))),
            BinaryOp::NotEqual => Ok(Value::from(Tristate::from(!self.equals(&left, &right)))),
            BinaryOp::Less | BinaryOp::LessOrEqual | BinaryOp::Greater | BinaryOp::GreaterOrEqual => {
                let l = self.number(&left, op.symbol())?;
                let r = self.number(&right, op.symbol())?;
                let equal = approx_eq(l, r, self.epsilon);
                let result = match op {
                    BinaryOp::Less => l < r && !equal,
                    BinaryOp::LessOrEqual => l < r || equal,
                    BinaryOp::Greater => l > r && !equal,
                    _ => l > r || equal,
                };
                Ok(Value::from(Tristate::from(result)))
            }
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide => {
                let l = self.number(&left, op.symbol())?;
                let r = self.number(&right, op.symbol())?;
                let result = match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Subtract => l - r,
                    BinaryOp::Multiply => l * r,
                    _ => {
                        if approx_eq(r, 0.0, self.epsilon) {
                            return Err(ExpressionError::DivisionByZero);
                        }
                        l / r
                    }
                };
                if !result.is_finite() {
                    return Err(ExpressionError::NotFinite);
                }
                Ok(Value::Number(result))
            }
            BinaryOp::And => Ok(Value::from(self.truth(&left, "and")?.and(self.truth(&right, "and")?))),
            BinaryOp::Or => Ok(Value::from(self.truth(&left, "or")?.or(self.truth(&right, "or")?))),
        }
    }

    fn equals(&self, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Number(l), Value::Number(r)) => approx_eq(*l, *r, self.epsilon),
            (Value::Text(l), Value::Text(r)) => l == r,
            (Value::Text(text), Value::Number(number)) | (Value::Number(number), Value::Text(text)) => {
                *text == format_number(*number)
            }
            _ => false,
        }
    }

    fn number(&self, value: &Value, operator: &str) -> Result<f64> {
        match value {
            Value::Number(number) => Ok(*number),
            other => Err(ExpressionError::NotNumeric {
                value: other.to_string(),
                operator: operator.to_string(),
            }),
        }
    }

    fn truth(&self, value: &Value, operator: &str) -> Result<Tristate> {
        match value {
            Value::Unknown => Ok(Tristate::Unknown),
            value => Ok(Tristate::from(!approx_eq(self.number(value, operator)?, 0.0, self.epsilon))),
        }
    }
}
