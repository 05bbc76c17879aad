/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! # Trigger Expressions
//!
//! Parser and evaluator for trigger expressions such as
//!
//! ```text
//! avg(/web01/system.cpu.load[all,avg1],5m) > 2 and nodata(/web01/agent.ping,3m) = 0
//! ```
//!
//! - Expressions are parsed and their item references resolved once, when
//!   the configuration is saved
//! - The history an expression needs is described by [`HistoryRequest`]s
//!   and fetched asynchronously from a [`HistorySource`]
//! - Evaluation over the fetched [`HistoryData`] is synchronous, deterministic
//!   and produces a [`Tristate`]: missing data yields unknown, which is
//!   propagated with Kleene logic

pub mod ast;
pub mod error;
pub mod eval;
pub mod functions;
pub mod history;
pub mod parser;
pub mod value;

pub use ast::{BinaryOp, CountFilter, CountOperator, Expr, Expression, Function, FunctionCall, ItemRef, UnaryOp};
pub use error::{ExpressionError, Result};
pub use eval::{DEFAULT_EPSILON, Evaluator};
pub use history::{HistoryData, HistoryRequest, HistorySource, ItemId, Sample, SampleValue, Window};
pub use parser::{MAX_SPAN_SECONDS, parse_seconds, parse_window};
pub use value::{Tristate, Value};

use chrono::{DateTime, Utc};

/// Fetch the history an expression needs and evaluate it
pub async fn evaluate<S>(
    evaluator: &Evaluator,
    expression: &Expression,
    source: &S,
    now: DateTime<Utc>,
) -> Result<Tristate>
where
    S: HistorySource + ?Sized,
{
    let data = HistoryData::fetch(source, &expression.requests(), now).await?;
    evaluator.evaluate(expression, &data)
}
