/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Metrics collection for the alerting engine
//!
//! Counters are kept in an [`AlertingMetrics`] snapshot returned by the
//! service API and mirrored to the `metrics` facade for exporters.

use crate::config::ChannelType;
use crate::event::{Event, EventValue};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Alerting counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertingMetrics {
    /// Events generated
    pub events_total: u64,
    /// Problem events generated
    pub problems_total: u64,
    /// OK events generated
    pub recoveries_total: u64,
    /// Trigger evaluations
    pub evaluations_total: u64,
    /// Trigger evaluations that failed
    pub evaluation_errors_total: u64,
    /// Trigger evaluations with an unknown result
    pub unknown_results_total: u64,
    /// Host passes aborted on an inconsistent snapshot
    pub aborted_passes_total: u64,
    /// Item values accepted
    pub values_received_total: u64,
    /// Item values rejected
    pub values_rejected_total: u64,
    /// Notifications delivered
    pub notifications_sent_total: u64,
    /// Notifications that failed after every attempt
    pub notifications_failed_total: u64,
    /// Deliveries by channel name
    pub deliveries_by_channel: HashMap<String, ChannelDeliveryMetrics>,
    /// Escalations created
    pub escalations_created_total: u64,
    /// Escalations resolved
    pub escalations_resolved_total: u64,
    /// Escalations cancelled
    pub escalations_cancelled_total: u64,
    /// Escalation steps executed
    pub escalation_steps_total: u64,
    /// Errors by category
    pub errors_by_category: HashMap<String, u64>,
}

/// Channel-specific delivery metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelDeliveryMetrics {
    /// Successful deliveries
    pub successful: u64,
    /// Failed deliveries
    pub failed: u64,
    /// Total attempts, retries included
    pub attempts: u64,
    /// Total delivery time of successful deliveries in milliseconds
    pub delivery_time_ms: u64,
}

/// Shared metrics recorder
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    metrics: RwLock<AlertingMetrics>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current counters
    pub fn snapshot(&self) -> AlertingMetrics {
        self.metrics.read().clone()
    }

    /// Record a generated event
    pub fn record_event(&self, event: &Event) {
        let mut metrics = self.metrics.write();
        metrics.events_total += 1;
        match event.value {
            EventValue::Problem => metrics.problems_total += 1,
            EventValue::Ok => metrics.recoveries_total += 1,
        }
        metrics::counter!("monitord_events_total", "value" => event.value.to_string()).increment(1);
    }

    /// Record a trigger evaluation
    pub fn record_evaluation(&self, unknown: bool) {
        let mut metrics = self.metrics.write();
        metrics.evaluations_total += 1;
        if unknown {
            metrics.unknown_results_total += 1;
            metrics::counter!("monitord_unknown_results_total").increment(1);
        }
        metrics::counter!("monitord_evaluations_total").increment(1);
    }

    /// Record an error by category
    pub fn record_error(&self, category: &'static str) {
        let mut metrics = self.metrics.write();
        match category {
            "evaluation" | "data_unavailable" => metrics.evaluation_errors_total += 1,
            "inconsistency" => metrics.aborted_passes_total += 1,
            _ => {}
        }
        *metrics.errors_by_category.entry(category.to_string()).or_insert(0) += 1;
        metrics::counter!("monitord_errors_total", "category" => category).increment(1);
    }

    /// Record received item values
    pub fn record_values(&self, accepted: u64, rejected: u64) {
        let mut metrics = self.metrics.write();
        metrics.values_received_total += accepted;
        metrics.values_rejected_total += rejected;
        metrics::counter!("monitord_values_received_total").increment(accepted);
        metrics::counter!("monitord_values_rejected_total").increment(rejected);
    }

    /// Record the outcome of a notification dispatch
    pub fn record_delivery(
        &self,
        channel: &str,
        channel_type: ChannelType,
        success: bool,
        attempts: u32,
        duration_ms: u64,
    ) {
        let mut metrics = self.metrics.write();
        if success {
            metrics.notifications_sent_total += 1;
        } else {
            metrics.notifications_failed_total += 1;
        }

        let entry = metrics.deliveries_by_channel.entry(channel.to_string()).or_default();
        entry.attempts += attempts as u64;
        if success {
            entry.successful += 1;
            entry.delivery_time_ms += duration_ms;
        } else {
            entry.failed += 1;
        }

        metrics::counter!(
            "monitord_notifications_total",
            "channel_type" => channel_type.to_string(),
            "success" => success.to_string()
        )
        .increment(1);
    }

    pub fn record_escalation_created(&self) {
        self.metrics.write().escalations_created_total += 1;
        metrics::counter!("monitord_escalations_total", "status" => "created").increment(1);
    }

    pub fn record_escalation_resolved(&self) {
        self.metrics.write().escalations_resolved_total += 1;
        metrics::counter!("monitord_escalations_total", "status" => "resolved").increment(1);
    }

    pub fn record_escalation_cancelled(&self) {
        self.metrics.write().escalations_cancelled_total += 1;
        metrics::counter!("monitord_escalations_total", "status" => "cancelled").increment(1);
    }

    pub fn record_escalation_step(&self) {
        self.metrics.write().escalation_steps_total += 1;
        metrics::counter!("monitord_escalation_steps_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_metrics() {
        let recorder = MetricsRecorder::new();
        recorder.record_delivery("oncall", ChannelType::Webhook, true, 1, 40);
        recorder.record_delivery("oncall", ChannelType::Webhook, false, 3, 0);

        let metrics = recorder.snapshot();
        assert_eq!(metrics.notifications_sent_total, 1);
        assert_eq!(metrics.notifications_failed_total, 1);
        let channel = &metrics.deliveries_by_channel["oncall"];
        assert_eq!(channel.attempts, 4);
        assert_eq!(channel.failed, 1);
    }

    #[test]
    fn test_error_categories() {
        let recorder = MetricsRecorder::new();
        recorder.record_error("evaluation");
        recorder.record_error("inconsistency");
        recorder.record_error("evaluation");

        let metrics = recorder.snapshot();
        assert_eq!(metrics.evaluation_errors_total, 2);
        assert_eq!(metrics.aborted_passes_total, 1);
        assert_eq!(metrics.errors_by_category["evaluation"], 2);
    }
}
