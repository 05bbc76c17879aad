/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Configuration structures for the alerting engine

use crate::error::{AlertingError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Main alerting configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Trigger evaluation settings
    pub evaluation: EvaluationConfig,

    /// Escalation scheduler settings
    pub escalation: EscalationConfig,

    /// Notification channels
    pub channels: Vec<ChannelConfig>,

    /// Default message templates
    pub templates: TemplateConfig,
}

/// Trigger evaluation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Number of evaluation workers, hosts are partitioned among them
    pub workers: usize,

    /// Interval of the periodic pass over every host
    pub interval_seconds: u64,

    /// Tolerance of numeric equality comparisons
    pub epsilon: f64,

    /// Values kept per item
    pub history_max_values: usize,

    /// Age of the oldest value kept per item
    pub history_max_age_seconds: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            interval_seconds: 30,
            epsilon: expression::DEFAULT_EPSILON,
            history_max_values: store::history::DEFAULT_MAX_VALUES,
            history_max_age_seconds: store::history::DEFAULT_MAX_AGE_SECONDS,
        }
    }
}

impl EvaluationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Escalation scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Scheduler tick interval
    pub tick_interval_ms: u64,

    /// Timeout of one dispatch attempt
    pub dispatch_timeout_seconds: u64,

    /// Retry policy of failed dispatches
    pub retry: RetryConfig,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            dispatch_timeout_seconds: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl EscalationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_seconds)
    }
}

/// Retry configuration for notification dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay_ms: u64,
    /// Upper bound of the delay between attempts
    pub max_delay_ms: u64,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay after the failed attempt number `attempt`, starting at 1
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}

/// Notification channel types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// JSON POST to an HTTP endpoint
    Webhook,
    /// Entry in the service log
    Log,
    /// External program
    Command,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Webhook => write!(f, "webhook"),
            Self::Log => write!(f, "log"),
            Self::Command => write!(f, "command"),
        }
    }
}

/// Channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name, referenced by escalation operations
    pub name: String,
    /// Channel type
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    /// Whether channel is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Channel specific parameters
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

/// Default message templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub problem_subject: String,
    pub problem_message: String,
    pub recovery_subject: String,
    pub recovery_message: String,
    pub update_subject: String,
    pub update_message: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            problem_subject: "Problem: {{trigger.name}}".to_string(),
            problem_message: concat!(
                "Problem started at {{event.clock}} on {{host.name}}\n",
                "Problem name: {{trigger.name}}\n",
                "Severity: {{trigger.severity}}\n",
                "Original problem ID: {{event.id}}\n",
                "Escalation step: {{escalation.step}}"
            )
            .to_string(),
            recovery_subject: "Resolved: {{trigger.name}}".to_string(),
            recovery_message: concat!(
                "Problem has been resolved at {{event.clock}} on {{host.name}}\n",
                "Problem name: {{trigger.name}}\n",
                "Severity: {{trigger.severity}}"
            )
            .to_string(),
            update_subject: "Updated problem: {{trigger.name}}".to_string(),
            update_message: concat!(
                "{{ack.user}} {{ack.action}} problem at {{ack.clock}}\n",
                "{{ack.message}}\n",
                "Problem name: {{trigger.name}} on {{host.name}}\n",
                "Severity: {{trigger.severity}}"
            )
            .to_string(),
        }
    }
}

impl AlertingConfig {
    /// Parse a TOML document
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.evaluation.workers == 0 {
            return Err(AlertingError::config("evaluation.workers must be at least 1"));
        }
        if self.evaluation.interval_seconds == 0 {
            return Err(AlertingError::config("evaluation.interval_seconds must be positive"));
        }
        if !self.evaluation.epsilon.is_finite() || self.evaluation.epsilon < 0.0 {
            return Err(AlertingError::config("evaluation.epsilon must be a non-negative number"));
        }
        if self.escalation.tick_interval_ms == 0 {
            return Err(AlertingError::config("escalation.tick_interval_ms must be positive"));
        }
        if self.escalation.dispatch_timeout_seconds == 0 {
            return Err(AlertingError::config("escalation.dispatch_timeout_seconds must be positive"));
        }

        let retry = &self.escalation.retry;
        if retry.max_attempts == 0 {
            return Err(AlertingError::config("escalation.retry.max_attempts must be at least 1"));
        }
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return Err(AlertingError::config("escalation.retry.backoff_multiplier must be at least 1"));
        }

        for (pos, channel) in self.channels.iter().enumerate() {
            if channel.name.is_empty() {
                return Err(AlertingError::config("channel name cannot be empty"));
            }
            if self.channels[..pos].iter().any(|other| other.name == channel.name) {
                return Err(AlertingError::config(format!("duplicate channel {}", channel.name)));
            }
        }

        Ok(())
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AlertingConfig::default();
        assert_eq!(config.evaluation.workers, 4);
        assert_eq!(config.escalation.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = AlertingConfig::from_toml(
            r#"
            [evaluation]
            workers = 2

            [escalation.retry]
            max_attempts = 5

            [[channels]]
            name = "oncall"
            type = "webhook"
            settings = { url = "http://localhost:8080/hook", header_Authorization = "Bearer x" }
            "#,
        )
        .unwrap();

        assert_eq!(config.evaluation.workers, 2);
        assert_eq!(config.evaluation.interval_seconds, 30);
        assert_eq!(config.escalation.retry.max_attempts, 5);
        assert_eq!(config.escalation.retry.initial_delay_ms, 1000);
        assert_eq!(config.channels[0].channel_type, ChannelType::Webhook);
        assert!(config.channels[0].enabled);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = AlertingConfig::default();
        config.evaluation.workers = 0;
        assert!(config.validate().is_err());

        let mut config = AlertingConfig::default();
        for _ in 0..2 {
            config.channels.push(ChannelConfig {
                name: "log".to_string(),
                channel_type: ChannelType::Log,
                enabled: true,
                settings: HashMap::new(),
            });
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_delay() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 350,
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.delay(1), Duration::from_millis(100));
        assert_eq!(retry.delay(2), Duration::from_millis(200));
        assert_eq!(retry.delay(3), Duration::from_millis(350));
    }
}
