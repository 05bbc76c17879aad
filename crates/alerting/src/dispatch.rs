/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Notification dispatch with timeouts and bounded retries

use crate::channels::{DeliveryResult, Notification, NotificationChannel, create_channel};
use crate::config::{ChannelConfig, ChannelType, RetryConfig};
use crate::error::{AlertingError, Result};
use crate::metrics::MetricsRecorder;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of a dispatch, once every attempt has been made
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Result of the last attempt
    pub result: DeliveryResult,
    /// Number of attempts made
    pub attempts: u32,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.success
    }

    /// Dispatch error of a failed outcome
    pub fn error(&self, channel: &str) -> Option<AlertingError> {
        self.result.error.as_ref().map(|message| AlertingError::NotificationDispatch {
            channel: channel.to_string(),
            attempts: self.attempts,
            message: message.clone(),
        })
    }
}

/// Routes notifications to channels by name
#[derive(Debug)]
pub struct Dispatcher {
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
    retry: RetryConfig,
    timeout: Duration,
    metrics: Arc<MetricsRecorder>,
}

impl Dispatcher {
    pub fn new(retry: RetryConfig, timeout: Duration, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            channels: HashMap::new(),
            retry,
            timeout,
            metrics,
        }
    }

    /// Build the enabled channels of a configuration
    pub fn from_config(
        channels: &[ChannelConfig],
        retry: RetryConfig,
        timeout: Duration,
        metrics: Arc<MetricsRecorder>,
    ) -> Result<Self> {
        let mut dispatcher = Self::new(retry, timeout, metrics);
        for config in channels.iter().filter(|config| config.enabled) {
            dispatcher.register(create_channel(config)?);
        }
        Ok(dispatcher)
    }

    /// Add or replace a channel
    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub fn channel(&self, name: &str) -> Option<&Arc<dyn NotificationChannel>> {
        self.channels.get(name)
    }

    /// Deliver a notification, retrying transient failures
    ///
    /// Each attempt is bounded by the dispatch timeout. Retryable failures
    /// are retried with exponential backoff until `max_attempts` is reached;
    /// permanent failures stop immediately.
    pub async fn dispatch(&self, notification: &Notification) -> DispatchOutcome {
        let Some(channel) = self.channels.get(&notification.channel) else {
            warn!(channel = %notification.channel, "Notification for unknown channel");
            return self.failed(
                &notification.channel,
                ChannelType::Log,
                1,
                format!("channel {} is not configured", notification.channel),
            );
        };

        let started = Instant::now();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match tokio::time::timeout(self.timeout, channel.send(notification)).await {
                Ok(Ok(result)) => {
                    debug!(
                        channel = %notification.channel,
                        notification_id = %notification.id,
                        attempt,
                        "Notification delivered"
                    );
                    self.metrics.record_delivery(
                        channel.name(),
                        channel.channel_type(),
                        true,
                        attempt,
                        result.duration_ms,
                    );
                    return DispatchOutcome {
                        result,
                        attempts: attempt,
                    };
                }
                Ok(Err(err)) => err,
                Err(_) => AlertingError::timeout(format!("no response within {:?}", self.timeout)),
            };

            if attempt >= max_attempts || !error.is_retryable() {
                warn!(
                    channel = %notification.channel,
                    notification_id = %notification.id,
                    attempts = attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %error,
                    "Notification dispatch failed"
                );
                return self.failed(channel.name(), channel.channel_type(), attempt, error.to_string());
            }

            let delay = self.retry.delay(attempt);
            debug!(
                channel = %notification.channel,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying notification"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn failed(&self, channel: &str, channel_type: ChannelType, attempts: u32, error: String) -> DispatchOutcome {
        self.metrics.record_delivery(channel, channel_type, false, attempts, 0);
        DispatchOutcome {
            result: DeliveryResult {
                channel_type,
                success: false,
                timestamp: Utc::now(),
                duration_ms: 0,
                error: Some(error),
                metadata: HashMap::new(),
            },
            attempts,
        }
    }
}
