/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Item history as seen by the evaluator
//!
//! Evaluation never reads history directly. An expression lists the
//! [`HistoryRequest`]s it needs, those are fetched from a [`HistorySource`]
//! into a [`HistoryData`] and the evaluator then works on that data only.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Item identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single received item value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Numeric(f64),
    Text(String),
}

impl SampleValue {
    /// Numeric view of the value, parsing text when possible
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(value) => Some(*value),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(value) => write!(f, "{}", crate::value::format_number(*value)),
            Self::Text(text) => write!(f, "{}", text),
        }
    }
}

/// Timestamped item value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub clock: DateTime<Utc>,
    pub value: SampleValue,
}

impl Sample {
    pub fn new(clock: DateTime<Utc>, value: SampleValue) -> Self {
        Self { clock, value }
    }

    pub fn numeric(clock: DateTime<Utc>, value: f64) -> Self {
        Self::new(clock, SampleValue::Numeric(value))
    }

    pub fn text<T: Into<String>>(clock: DateTime<Utc>, value: T) -> Self {
        Self::new(clock, SampleValue::Text(value.into()))
    }
}

/// Range of history a function looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    /// The newest `n` values
    Count(u32),
    /// Values received within the last `n` seconds
    Span(u64),
}

impl Window {
    /// Whether the window depends on the clock rather than on new values
    pub fn is_time_based(&self) -> bool {
        matches!(self, Self::Span(_))
    }

    /// Apply the window to samples ordered newest first
    pub fn select<'a>(&self, samples: impl Iterator<Item = &'a Sample>, now: DateTime<Utc>) -> Vec<Sample> {
        let mut samples = samples.filter(|sample| sample.clock <= now);
        match *self {
            Self::Count(count) => samples.take(count as usize).cloned().collect(),
            Self::Span(seconds) => {
                // A span reaching past the representable range covers everything
                let since = i64::try_from(seconds)
                    .ok()
                    .and_then(chrono::TimeDelta::try_seconds)
                    .and_then(|span| now.checked_sub_signed(span));
                match since {
                    Some(since) => samples.take_while(|sample| sample.clock > since).cloned().collect(),
                    None => samples.cloned().collect(),
                }
            }
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(count) => write!(f, "#{}", count),
            Self::Span(seconds) => write!(f, "{}s", seconds),
        }
    }
}

/// One (item, window) pair needed by an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistoryRequest {
    pub item_id: ItemId,
    pub window: Window,
}

/// Source of item history
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch the samples of `item_id` inside `window`, newest first
    async fn fetch(&self, item_id: ItemId, window: Window, now: DateTime<Utc>) -> Result<Vec<Sample>>;
}

/// History fetched for one evaluation
#[derive(Debug, Clone, Default)]
pub struct HistoryData {
    samples: HashMap<HistoryRequest, Vec<Sample>>,
}

impl HistoryData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store samples for a request, newest first
    pub fn insert(&mut self, request: HistoryRequest, samples: Vec<Sample>) {
        self.samples.insert(request, samples);
    }

    /// Samples for a request; empty when nothing was fetched
    pub fn get(&self, request: &HistoryRequest) -> &[Sample] {
        self.samples
            .get(request)
            .map(|samples| samples.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Fetch every request concurrently from `source`
    pub async fn fetch<S>(source: &S, requests: &[HistoryRequest], now: DateTime<Utc>) -> Result<Self>
    where
        S: HistorySource + ?Sized,
    {
        let fetched = futures::future::try_join_all(requests.iter().map(|request| async move {
            let samples = source.fetch(request.item_id, request.window, now).await?;
            Ok::<_, crate::error::ExpressionError>((*request, samples))
        }))
        .await?;

        tracing::trace!(requests = requests.len(), "Fetched history for evaluation");

        Ok(Self {
            samples: fetched.into_iter().collect(),
        })
    }
}
