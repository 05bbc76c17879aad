/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Template engine for notification subjects and messages

use crate::config::TemplateConfig;
use crate::error::{AlertingError, Result};
use crate::event::{AckAction, Acknowledgement, Event};
use handlebars::{Handlebars, Template};
use serde::{Deserialize, Serialize};
use store::{Host, Trigger};
use tracing::warn;

/// Kind of notification being rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Problem,
    Recovery,
    /// Problem acknowledged
    Update,
}

/// Variables available to templates
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    pub trigger: TriggerVars,
    pub host: HostVars,
    pub event: EventVars,
    pub escalation: EscalationVars,
    pub ack: AckVars,
    /// `PROBLEM`, `RESOLVED` or `UPDATED`
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerVars {
    pub id: u64,
    pub name: String,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostVars {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventVars {
    pub id: u64,
    pub clock: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EscalationVars {
    pub id: u64,
    /// 1-based step, as shown to recipients
    pub step: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AckVars {
    pub user: String,
    pub message: String,
    pub clock: String,
    pub action: String,
}

impl TemplateContext {
    pub fn new(kind: NotificationKind, trigger: &Trigger, host: Option<&Host>, event: &Event) -> Self {
        Self {
            trigger: TriggerVars {
                id: trigger.id.0,
                name: trigger.description.clone(),
                severity: trigger.severity.to_string(),
            },
            host: HostVars {
                name: host.map(|host| host.name.clone()).unwrap_or_default(),
            },
            event: EventVars {
                id: event.id.0,
                clock: event.clock.format("%Y-%m-%d %H:%M:%S").to_string(),
                value: event.value.to_string(),
            },
            escalation: EscalationVars::default(),
            ack: AckVars::default(),
            status: match kind {
                NotificationKind::Problem => "PROBLEM".to_string(),
                NotificationKind::Recovery => "RESOLVED".to_string(),
                NotificationKind::Update => "UPDATED".to_string(),
            },
        }
    }

    pub fn with_escalation(mut self, id: u64, step: u32) -> Self {
        self.escalation = EscalationVars { id, step: step + 1 };
        self
    }

    pub fn with_acknowledgement(mut self, ack: &Acknowledgement) -> Self {
        self.ack = AckVars {
            user: ack.user.clone(),
            message: ack.message.clone().unwrap_or_default(),
            clock: ack.clock.format("%Y-%m-%d %H:%M:%S").to_string(),
            action: match ack.action {
                AckAction::Acknowledge => "acknowledged",
                AckAction::Unacknowledge => "unacknowledged",
                AckAction::Close => "closed",
                AckAction::FalsePositive => "marked false positive",
            }
            .to_string(),
        };
        self
    }
}

/// Template engine for formatting notifications
#[derive(Debug)]
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
    defaults: TemplateConfig,
}

impl TemplateEngine {
    /// Create a new template engine
    pub fn new(defaults: TemplateConfig) -> Result<Self> {
        for template in [
            &defaults.problem_subject,
            &defaults.problem_message,
            &defaults.recovery_subject,
            &defaults.recovery_message,
            &defaults.update_subject,
            &defaults.update_message,
        ] {
            Self::validate(template)?;
        }

        let mut handlebars = Handlebars::new();
        // Notifications are plain text
        handlebars.register_escape_fn(handlebars::no_escape);

        Ok(Self { handlebars, defaults })
    }

    /// Check that a template compiles
    pub fn validate(template: &str) -> Result<()> {
        Template::compile(template)
            .map(|_| ())
            .map_err(|err| AlertingError::template(err.to_string()))
    }

    /// Render a template, falling back to the raw text when rendering fails
    pub fn render(&self, template: &str, context: &TemplateContext) -> String {
        match self.handlebars.render_template(template, context) {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!(error = %err, template, "Failed to render template");
                template.to_string()
            }
        }
    }

    /// Render a subject, using the default of `kind` when `template` is absent
    pub fn render_subject(&self, kind: NotificationKind, template: Option<&str>, context: &TemplateContext) -> String {
        let template = template.unwrap_or(match kind {
            NotificationKind::Problem => self.defaults.problem_subject.as_str(),
            NotificationKind::Recovery => self.defaults.recovery_subject.as_str(),
            NotificationKind::Update => self.defaults.update_subject.as_str(),
        });
        self.render(template, context)
    }

    /// Render a message, using the default of `kind` when `template` is absent
    pub fn render_message(&self, kind: NotificationKind, template: Option<&str>, context: &TemplateContext) -> String {
        let template = template.unwrap_or(match kind {
            NotificationKind::Problem => self.defaults.problem_message.as_str(),
            NotificationKind::Recovery => self.defaults.recovery_message.as_str(),
            NotificationKind::Update => self.defaults.update_message.as_str(),
        });
        self.render(template, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventId, EventSource, EventValue};
    use chrono::{TimeZone, Utc};
    use store::{HostId, RecoveryMode, Severity, TriggerId};

    fn context() -> TemplateContext {
        let trigger = Trigger {
            id: TriggerId(7),
            description: "Disk <full> on /var".to_string(),
            expression: "last(/web01/vfs.fs.pused) > 90".parse().unwrap(),
            recovery: RecoveryMode::Expression,
            severity: Severity::Average,
            enabled: true,
            manual_close: false,
            dependencies: Vec::new(),
        };
        let host = Host {
            id: HostId(1),
            name: "web01".to_string(),
            enabled: true,
        };
        let event = Event {
            id: EventId(42),
            trigger_id: TriggerId(7),
            clock: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
            value: EventValue::Problem,
            source: EventSource::Trigger,
            acknowledged: false,
            false_positive: false,
            acknowledgements: Vec::new(),
        };
        TemplateContext::new(NotificationKind::Problem, &trigger, Some(&host), &event).with_escalation(3, 0)
    }

    #[test]
    fn test_default_templates() {
        let engine = TemplateEngine::new(TemplateConfig::default()).unwrap();
        let context = context();

        assert_eq!(
            engine.render_subject(NotificationKind::Problem, None, &context),
            "Problem: Disk <full> on /var"
        );
        assert_eq!(
            engine.render_subject(NotificationKind::Recovery, None, &context),
            "Resolved: Disk <full> on /var"
        );

        let message = engine.render_message(NotificationKind::Problem, None, &context);
        assert!(message.contains("2024-03-01 12:30:00 on web01"));
        assert!(message.contains("Severity: Average"));
        assert!(message.contains("Escalation step: 1"));
    }

    #[test]
    fn test_update_templates() {
        let engine = TemplateEngine::new(TemplateConfig::default()).unwrap();
        let ack = Acknowledgement {
            user: "alice".to_string(),
            message: Some("looking into it".to_string()),
            clock: Utc.with_ymd_and_hms(2024, 3, 1, 12, 45, 0).unwrap(),
            action: AckAction::Acknowledge,
        };
        let context = context().with_acknowledgement(&ack);

        assert_eq!(
            engine.render_subject(NotificationKind::Update, None, &context),
            "Updated problem: Disk <full> on /var"
        );
        let message = engine.render_message(NotificationKind::Update, None, &context);
        assert!(message.starts_with("alice acknowledged problem at 2024-03-01 12:45:00\nlooking into it\n"));
    }

    #[test]
    fn test_custom_template() {
        let engine = TemplateEngine::new(TemplateConfig::default()).unwrap();
        let rendered = engine.render(
            "[{{status}}] {{host.name}} #{{event.id}} {{event.value}}",
            &context(),
        );
        assert_eq!(rendered, "[PROBLEM] web01 #42 PROBLEM");
    }

    #[test]
    fn test_invalid_template_falls_back() {
        let engine = TemplateEngine::new(TemplateConfig::default()).unwrap();
        assert_eq!(engine.render("{{#if}}broken", &context()), "{{#if}}broken");
        assert!(TemplateEngine::validate("{{#if}}broken").is_err());
    }

    #[test]
    fn test_invalid_default_rejected() {
        let config = TemplateConfig {
            problem_subject: "{{#each}}".to_string(),
            ..Default::default()
        };
        assert!(TemplateEngine::new(config).is_err());
    }
}
