/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Cross-crate scenarios: expression evaluation, event generation,
//! escalation and ingestion working together.

pub mod current_problem;
pub mod escalation;
pub mod pipeline;
pub mod tristate;

use alerting::channels::{DeliveryResult, Notification, NotificationChannel};
use alerting::{AlertingError, ChannelType};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use store::{Configuration, SnapshotStore};

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

pub fn store(configuration: &str) -> Arc<SnapshotStore> {
    let configuration: Configuration = toml::from_str(configuration).unwrap();
    Arc::new(SnapshotStore::with_configuration(configuration).unwrap())
}

/// Channel recording every attempt, failing while `failing` is set
#[derive(Debug)]
pub struct RecordingChannel {
    name: String,
    pub failing: AtomicBool,
    pub attempts: Mutex<Vec<Notification>>,
}

impl RecordingChannel {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failing: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Log
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> alerting::Result<DeliveryResult> {
        self.attempts.lock().push(notification.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(AlertingError::network("connection refused"));
        }
        Ok(DeliveryResult {
            channel_type: ChannelType::Log,
            success: true,
            timestamp: Utc::now(),
            duration_ms: 0,
            error: None,
            metadata: HashMap::new(),
        })
    }
}
