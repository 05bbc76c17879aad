/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! History functions

use crate::ast::{CountFilter, CountOperator, Function, FunctionCall};
use crate::error::{ExpressionError, Result};
use crate::history::{Sample, SampleValue};
use crate::value::{Value, approx_eq, format_number};

/// Evaluate a function call over the samples fetched for its window
///
/// Samples are ordered newest first. An empty window yields
/// [`Value::Unknown`] except for `count()` and `nodata()`, which are defined
/// on the absence of data.
pub fn evaluate(call: &FunctionCall, samples: &[Sample], epsilon: f64) -> Result<Value> {
    match &call.function {
        Function::Last { nth } => Ok((*nth as usize)
            .checked_sub(1)
            .and_then(|index| samples.get(index))
            .map(|sample| Value::from(&sample.value))
            .unwrap_or(Value::Unknown)),
        Function::Avg(_) => aggregate(call, samples, |values| {
            values.iter().sum::<f64>() / values.len() as f64
        }),
        Function::Min(_) => aggregate(call, samples, |values| {
            values.iter().copied().fold(f64::INFINITY, f64::min)
        }),
        Function::Max(_) => aggregate(call, samples, |values| {
            values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        }),
        Function::Sum(_) => aggregate(call, samples, |values| values.iter().sum()),
        Function::Count { filter, .. } => {
            let count = match filter {
                Some(filter) => samples
                    .iter()
                    .filter(|sample| matches_filter(filter, &sample.value, epsilon))
                    .count(),
                None => samples.len(),
            };
            Ok(Value::Number(count as f64))
        }
        Function::Change => change(samples),
        Function::NoData { .. } => Ok(Value::Number(if samples.is_empty() { 1.0 } else { 0.0 })),
    }
}

fn aggregate<F>(call: &FunctionCall, samples: &[Sample], reduce: F) -> Result<Value>
where
    F: FnOnce(&[f64]) -> f64,
{
    if samples.is_empty() {
        return Ok(Value::Unknown);
    }

    let values = samples
        .iter()
        .map(|sample| match sample.value {
            SampleValue::Numeric(value) => Ok(value),
            SampleValue::Text(_) => Err(ExpressionError::NonNumericHistory {
                function: call.function.name().to_string(),
                item: call.item.to_string(),
            }),
        })
        .collect::<Result<Vec<f64>>>()?;

    Ok(Value::Number(reduce(&values)))
}

fn change(samples: &[Sample]) -> Result<Value> {
    let (Some(last), Some(previous)) = (samples.first(), samples.get(1)) else {
        return Ok(Value::Unknown);
    };

    match (&last.value, &previous.value) {
        (SampleValue::Numeric(last), SampleValue::Numeric(previous)) => Ok(Value::Number(last - previous)),
        // Text values only report whether they changed
        (last, previous) => Ok(Value::Number(if last.to_string() == previous.to_string() {
            0.0
        } else {
            1.0
        })),
    }
}

fn matches_filter(filter: &CountFilter, value: &SampleValue, epsilon: f64) -> bool {
    let numeric = filter.number.zip(value.as_f64());
    match filter.operator {
        CountOperator::Eq => match numeric {
            Some((pattern, value)) => approx_eq(value, pattern, epsilon),
            None => text_of(value) == filter.pattern,
        },
        CountOperator::Ne => match numeric {
            Some((pattern, value)) => !approx_eq(value, pattern, epsilon),
            None => text_of(value) != filter.pattern,
        },
        CountOperator::Gt => numeric.is_some_and(|(pattern, value)| value > pattern && !approx_eq(value, pattern, epsilon)),
        CountOperator::Ge => numeric.is_some_and(|(pattern, value)| value > pattern || approx_eq(value, pattern, epsilon)),
        CountOperator::Lt => numeric.is_some_and(|(pattern, value)| value < pattern && !approx_eq(value, pattern, epsilon)),
        CountOperator::Le => numeric.is_some_and(|(pattern, value)| value < pattern || approx_eq(value, pattern, epsilon)),
        CountOperator::Like => text_of(value).contains(&filter.pattern),
    }
}

fn text_of(value: &SampleValue) -> String {
    match value {
        SampleValue::Numeric(number) => format_number(*number),
        SampleValue::Text(text) => text.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ItemRef;
    use crate::history::{ItemId, Window};
    use chrono::{TimeZone, Utc};

    fn call(function: Function) -> FunctionCall {
        FunctionCall {
            function,
            item: ItemRef::new("host", "key"),
            item_id: Some(ItemId(1)),
        }
    }

    fn numeric(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| Sample::numeric(Utc.timestamp_opt(1000 - i as i64, 0).unwrap(), *value))
            .collect()
    }

    #[test]
    fn test_last() {
        let samples = numeric(&[3.0, 2.0, 1.0]);
        assert_eq!(evaluate(&call(Function::Last { nth: 1 }), &samples, 0.0).unwrap(), Value::Number(3.0));
        assert_eq!(evaluate(&call(Function::Last { nth: 3 }), &samples, 0.0).unwrap(), Value::Number(1.0));
        assert_eq!(evaluate(&call(Function::Last { nth: 4 }), &samples, 0.0).unwrap(), Value::Unknown);
    }

    #[test]
    fn test_aggregates() {
        let samples = numeric(&[4.0, 2.0, 6.0]);
        let window = Window::Span(60);
        assert_eq!(evaluate(&call(Function::Avg(window)), &samples, 0.0).unwrap(), Value::Number(4.0));
        assert_eq!(evaluate(&call(Function::Min(window)), &samples, 0.0).unwrap(), Value::Number(2.0));
        assert_eq!(evaluate(&call(Function::Max(window)), &samples, 0.0).unwrap(), Value::Number(6.0));
        assert_eq!(evaluate(&call(Function::Sum(window)), &samples, 0.0).unwrap(), Value::Number(12.0));
        assert_eq!(evaluate(&call(Function::Avg(window)), &[], 0.0).unwrap(), Value::Unknown);
    }

    #[test]
    fn test_aggregate_over_text_fails() {
        let samples = vec![Sample::text(Utc.timestamp_opt(10, 0).unwrap(), "up")];
        let err = evaluate(&call(Function::Avg(Window::Count(1))), &samples, 0.0).unwrap_err();
        assert!(matches!(err, ExpressionError::NonNumericHistory { .. }));
    }

    #[test]
    fn test_count_with_filter() {
        let samples = numeric(&[1.0, 5.0, 10.0, 5.0000001]);
        let count = |operator, pattern: &str| {
            let function = Function::Count {
                window: Window::Span(60),
                filter: Some(CountFilter {
                    operator,
                    pattern: pattern.to_string(),
                    number: pattern.parse().ok(),
                }),
            };
            evaluate(&call(function), &samples, 0.000001).unwrap()
        };

        assert_eq!(count(CountOperator::Eq, "5"), Value::Number(2.0));
        assert_eq!(count(CountOperator::Gt, "5"), Value::Number(1.0));
        assert_eq!(count(CountOperator::Ge, "5"), Value::Number(3.0));
        assert_eq!(count(CountOperator::Lt, "5"), Value::Number(1.0));
        assert_eq!(count(CountOperator::Like, "1"), Value::Number(3.0));

        let empty = Function::Count {
            window: Window::Span(60),
            filter: None,
        };
        assert_eq!(evaluate(&call(empty), &[], 0.0).unwrap(), Value::Number(0.0));
    }

    #[test]
    fn test_change_and_nodata() {
        let samples = numeric(&[7.0, 10.0]);
        assert_eq!(evaluate(&call(Function::Change), &samples, 0.0).unwrap(), Value::Number(-3.0));
        assert_eq!(evaluate(&call(Function::Change), &samples[..1], 0.0).unwrap(), Value::Unknown);

        let nodata = Function::NoData { seconds: 60 };
        assert_eq!(evaluate(&call(nodata.clone()), &[], 0.0).unwrap(), Value::Number(1.0));
        assert_eq!(evaluate(&call(nodata), &samples, 0.0).unwrap(), Value::Number(0.0));
    }
}
