/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Sender protocol messages

use alerting::{IngestSummary, ItemValue};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request carrying item values
pub const SENDER_DATA: &str = "sender data";

/// Request sent by a sender or an active agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderRequest {
    pub request: String,
    #[serde(default)]
    pub data: Vec<SenderValue>,
    /// Sender clock, seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<i64>,
    /// Sender clock, nanoseconds part
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns: Option<u32>,
}

/// One value of a sender request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderValue {
    pub host: String,
    pub key: String,
    /// Text or number
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns: Option<u32>,
}

impl SenderValue {
    /// Value timestamp, `None` when the sender did not provide a valid one
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.clock
            .and_then(|clock| Utc.timestamp_opt(clock, self.ns.unwrap_or(0)).single())
    }

    pub fn to_item_value(&self) -> ItemValue {
        let value = match &self.value {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        ItemValue {
            host: self.host.clone(),
            key: self.key.clone(),
            value,
            clock: self.timestamp(),
        }
    }
}

/// Reply to a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderResponse {
    /// `success` or `failed`
    pub response: String,
    pub info: String,
}

impl SenderResponse {
    pub fn success(summary: IngestSummary, elapsed: Duration) -> Self {
        Self {
            response: "success".to_string(),
            info: format!(
                "processed: {}; failed: {}; total: {}; seconds spent: {:.6}",
                summary.processed,
                summary.failed,
                summary.total(),
                elapsed.as_secs_f64()
            ),
        }
    }

    pub fn failed<T: Into<String>>(info: T) -> Self {
        Self {
            response: "failed".to_string(),
            info: info.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.response == "success"
    }
}
