/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Notification channels for escalation operations

use crate::config::{ChannelConfig, ChannelType};
use crate::error::{AlertingError, Result};
use crate::event::EventId;
use crate::templates::NotificationKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::{Recipient, Severity, TriggerId};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Command run by a command channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    pub args: Vec<String>,
}

/// Rendered notification handed to a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Notification identifier
    pub id: Uuid,
    /// Problem or recovery notification
    pub kind: NotificationKind,
    /// Channel name
    pub channel: String,
    /// Recipients of a message
    pub recipients: Vec<Recipient>,
    /// Rendered subject
    pub subject: String,
    /// Rendered message
    pub message: String,
    /// Command to run, for command operations
    pub command: Option<CommandSpec>,
    /// Problem event
    pub event_id: EventId,
    /// Trigger of the problem
    pub trigger_id: TriggerId,
    /// Trigger severity
    pub severity: Severity,
    /// Owner host name of the trigger
    pub host: String,
    /// Escalation that produced the notification
    pub escalation_id: Option<u64>,
    /// 0-based escalation step
    pub step: Option<u32>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Delivery result for notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Channel type that delivered the notification
    pub channel_type: ChannelType,
    /// Whether delivery was successful
    pub success: bool,
    /// Delivery timestamp
    pub timestamp: DateTime<Utc>,
    /// Delivery duration in milliseconds
    pub duration_ms: u64,
    /// Error message if delivery failed
    pub error: Option<String>,
    /// Delivery metadata
    pub metadata: HashMap<String, String>,
}

impl DeliveryResult {
    fn success(channel_type: ChannelType, started: Instant) -> Self {
        Self {
            channel_type,
            success: true,
            timestamp: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            error: None,
            metadata: HashMap::new(),
        }
    }
}

/// Notification channel trait
#[async_trait]
pub trait NotificationChannel: Send + Sync + fmt::Debug {
    /// Get channel type
    fn channel_type(&self) -> ChannelType;

    /// Get channel name
    fn name(&self) -> &str;

    /// Deliver a notification
    ///
    /// Failures are returned as errors; [`AlertingError::is_retryable`]
    /// tells the dispatcher whether another attempt may succeed.
    async fn send(&self, notification: &Notification) -> Result<DeliveryResult>;
}

/// Create a notification channel from configuration
pub fn create_channel(config: &ChannelConfig) -> Result<Arc<dyn NotificationChannel>> {
    info!(channel = %config.name, channel_type = %config.channel_type, "Creating notification channel");

    Ok(match config.channel_type {
        ChannelType::Webhook => Arc::new(WebhookChannel::new(config)?),
        ChannelType::Log => Arc::new(LogChannel::new(config)),
        ChannelType::Command => Arc::new(CommandChannel::new(config)),
    })
}

/// Webhook notification channel
#[derive(Debug)]
pub struct WebhookChannel {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: &ChannelConfig) -> Result<Self> {
        let url = config
            .settings
            .get("url")
            .ok_or_else(|| AlertingError::config(format!("Webhook URL not configured for channel {}", config.name)))?
            .clone();

        let timeout_seconds = config
            .settings
            .get("timeout")
            .and_then(|t| t.parse().ok())
            .unwrap_or(30);

        let headers = config
            .settings
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix("header_")
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| AlertingError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: config.name.clone(),
            url,
            headers,
            client,
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Webhook
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> Result<DeliveryResult> {
        let started = Instant::now();

        debug!(channel = %self.name, notification_id = %notification.id, "Sending webhook notification");

        let payload = serde_json::json!({
            "id": notification.id,
            "kind": notification.kind,
            "subject": notification.subject,
            "message": notification.message,
            "recipients": notification.recipients.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
            "command": notification.command,
            "event_id": notification.event_id,
            "trigger_id": notification.trigger_id,
            "severity": notification.severity,
            "host": notification.host,
            "escalation_id": notification.escalation_id,
            "step": notification.step,
            "created_at": notification.created_at,
        });

        let mut request = self.client.post(&self.url).json(&payload);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            error!(channel = %self.name, error = %e, "Webhook notification failed");
            AlertingError::network(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            info!(channel = %self.name, notification_id = %notification.id, "Webhook notification sent");
            let mut result = DeliveryResult::success(ChannelType::Webhook, started);
            result.metadata.insert("status".to_string(), status.as_u16().to_string());
            Ok(result)
        } else if status.is_server_error() || status.as_u16() == 429 {
            error!(channel = %self.name, status = %status, "Webhook notification failed");
            Err(AlertingError::service_unavailable(format!("HTTP {}", status)))
        } else {
            error!(channel = %self.name, status = %status, "Webhook notification rejected");
            Err(AlertingError::channel(format!("HTTP {}", status)))
        }
    }
}

/// Channel writing notifications to the service log
#[derive(Debug)]
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            name: config.name.clone(),
        }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Log
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> Result<DeliveryResult> {
        let started = Instant::now();
        let recipients = notification
            .recipients
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(",");

        info!(
            channel = %self.name,
            event_id = %notification.event_id,
            trigger_id = %notification.trigger_id,
            severity = %notification.severity,
            recipients,
            subject = %notification.subject,
            message = %notification.message,
            "Notification"
        );
        Ok(DeliveryResult::success(ChannelType::Log, started))
    }
}

/// Channel running an external program
///
/// Notification fields are exposed to the program as `MONITORD_*`
/// environment variables. A non-zero exit status is a permanent failure.
#[derive(Debug)]
pub struct CommandChannel {
    name: String,
    working_dir: Option<String>,
}

impl CommandChannel {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            name: config.name.clone(),
            working_dir: config.settings.get("working_dir").cloned(),
        }
    }
}

#[async_trait]
impl NotificationChannel for CommandChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Command
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> Result<DeliveryResult> {
        let started = Instant::now();
        let spec = notification
            .command
            .as_ref()
            .ok_or_else(|| AlertingError::channel(format!("channel {} requires a command operation", self.name)))?;

        let mut command = tokio::process::Command::new(&spec.command);
        command
            .args(&spec.args)
            .env("MONITORD_EVENT_ID", notification.event_id.to_string())
            .env("MONITORD_TRIGGER_ID", notification.trigger_id.to_string())
            .env("MONITORD_SEVERITY", notification.severity.to_string())
            .env("MONITORD_HOST", &notification.host)
            .env("MONITORD_SUBJECT", &notification.subject)
            .env("MONITORD_MESSAGE", &notification.message)
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(channel = %self.name, command = %spec.command, "Running notification command");
        let output = command.output().await?;

        if output.status.success() {
            let mut result = DeliveryResult::success(ChannelType::Command, started);
            result
                .metadata
                .insert("stdout".to_string(), String::from_utf8_lossy(&output.stdout).trim().to_string());
            Ok(result)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(channel = %self.name, status = %output.status, stderr = %stderr.trim(), "Notification command failed");
            Err(AlertingError::channel(format!("{} exited with {}", spec.command, output.status)))
        }
    }
}
