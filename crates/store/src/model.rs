/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Configuration objects: hosts, items, triggers and actions

use crate::error::{Result, StoreError};
use expression::{Expression, ItemId, SampleValue};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Host identifier
    HostId
);
id_type!(
    /// Trigger identifier
    TriggerId
);
id_type!(
    /// Action identifier
    ActionId
);

/// Monitored host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Host identifier
    pub id: HostId,
    /// Technical host name used in item references
    pub name: String,
    /// Whether the host is monitored
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Type of values an item receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Numeric,
    Text,
    Log,
}

impl Default for ValueType {
    fn default() -> Self {
        Self::Numeric
    }
}

/// One monitored metric on one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Item identifier
    pub id: ItemId,
    /// Owning host
    pub host_id: HostId,
    /// Item key, unique per host
    pub key: String,
    /// Type of received values
    #[serde(default)]
    pub value_type: ValueType,
    /// Whether the item is monitored
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Item {
    /// Convert a received raw value according to the item value type
    pub fn parse_value(&self, raw: &str) -> Result<SampleValue> {
        match self.value_type {
            ValueType::Numeric => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(SampleValue::Numeric)
                .ok_or_else(|| StoreError::InvalidValue {
                    item: self.key.clone(),
                    value: raw.to_string(),
                }),
            ValueType::Text | ValueType::Log => Ok(SampleValue::Text(raw.to_string())),
        }
    }
}

/// Trigger severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    NotClassified,
    Information,
    Warning,
    Average,
    High,
    Disaster,
}

impl Default for Severity {
    fn default() -> Self {
        Self::NotClassified
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotClassified => write!(f, "Not classified"),
            Self::Information => write!(f, "Information"),
            Self::Warning => write!(f, "Warning"),
            Self::Average => write!(f, "Average"),
            Self::High => write!(f, "High"),
            Self::Disaster => write!(f, "Disaster"),
        }
    }
}

/// How a trigger in problem state returns to OK
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RecoveryMode {
    /// OK as soon as the problem expression is false
    Expression,
    /// OK once the problem expression is false and the recovery expression is true
    RecoveryExpression { expression: Expression },
    /// Never OK automatically, only by manual close
    None,
}

impl Default for RecoveryMode {
    fn default() -> Self {
        Self::Expression
    }
}

/// Boolean condition over item values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Trigger identifier
    pub id: TriggerId,
    /// Human readable trigger name
    pub description: String,
    /// Problem expression
    pub expression: Expression,
    /// Recovery behaviour
    #[serde(default)]
    pub recovery: RecoveryMode,
    /// Trigger severity
    #[serde(default)]
    pub severity: Severity,
    /// Whether the trigger is evaluated
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether problems may be closed manually
    #[serde(default)]
    pub manual_close: bool,
    /// Triggers whose problems suppress this one
    #[serde(default)]
    pub dependencies: Vec<TriggerId>,
}

impl Trigger {
    /// Recovery expression, if the trigger uses one
    pub fn recovery_expression(&self) -> Option<&Expression> {
        match &self.recovery {
            RecoveryMode::RecoveryExpression { expression } => Some(expression),
            _ => None,
        }
    }

    /// Item identifiers referenced by the problem and recovery expressions
    pub fn item_ids(&self) -> Vec<ItemId> {
        let mut ids = self.expression.item_ids();
        if let Some(recovery) = self.recovery_expression() {
            for id in recovery.item_ids() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }
}

/// Condition operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equal,
    NotEqual,
    Like,
    NotLike,
    GreaterOrEqual,
    LessOrEqual,
}

/// Kind of action condition, used to group conditions for and/or evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConditionKind {
    Host,
    HostName,
    Trigger,
    TriggerName,
    Severity,
}

/// Action condition on the trigger that produced an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Host { operator: ConditionOperator, host: HostId },
    HostName { operator: ConditionOperator, pattern: String },
    Trigger { operator: ConditionOperator, trigger: TriggerId },
    TriggerName { operator: ConditionOperator, pattern: String },
    Severity { operator: ConditionOperator, severity: Severity },
}

impl Condition {
    pub fn kind(&self) -> ConditionKind {
        match self {
            Self::Host { .. } => ConditionKind::Host,
            Self::HostName { .. } => ConditionKind::HostName,
            Self::Trigger { .. } => ConditionKind::Trigger,
            Self::TriggerName { .. } => ConditionKind::TriggerName,
            Self::Severity { .. } => ConditionKind::Severity,
        }
    }

    pub fn operator(&self) -> ConditionOperator {
        match self {
            Self::Host { operator, .. }
            | Self::HostName { operator, .. }
            | Self::Trigger { operator, .. }
            | Self::TriggerName { operator, .. }
            | Self::Severity { operator, .. } => *operator,
        }
    }

    /// Check the operator is meaningful for the condition kind
    pub fn validate(&self) -> Result<()> {
        use ConditionOperator::*;
        let supported: &[ConditionOperator] = match self {
            Self::Host { .. } | Self::Trigger { .. } => &[Equal, NotEqual],
            Self::HostName { .. } | Self::TriggerName { .. } => &[Like, NotLike],
            Self::Severity { .. } => &[Equal, NotEqual, GreaterOrEqual, LessOrEqual],
        };
        if supported.contains(&self.operator()) {
            Ok(())
        } else {
            Err(StoreError::validation(format!(
                "operator {:?} is not supported by {:?} conditions",
                self.operator(),
                self.kind()
            )))
        }
    }

    /// Evaluate the condition against a trigger and its owner host
    pub fn matches(&self, trigger: &Trigger, host: &Host) -> bool {
        match self {
            Self::Host { operator, host: id } => compare_eq(*operator, &host.id, id),
            Self::HostName { operator, pattern } => compare_like(*operator, &host.name, pattern),
            Self::Trigger { operator, trigger: id } => compare_eq(*operator, &trigger.id, id),
            Self::TriggerName { operator, pattern } => compare_like(*operator, &trigger.description, pattern),
            Self::Severity { operator, severity } => match operator {
                ConditionOperator::GreaterOrEqual => trigger.severity >= *severity,
                ConditionOperator::LessOrEqual => trigger.severity <= *severity,
                operator => compare_eq(*operator, &trigger.severity, severity),
            },
        }
    }
}

fn compare_eq<T: PartialEq>(operator: ConditionOperator, actual: &T, expected: &T) -> bool {
    match operator {
        ConditionOperator::Equal => actual == expected,
        ConditionOperator::NotEqual => actual != expected,
        _ => false,
    }
}

fn compare_like(operator: ConditionOperator, actual: &str, pattern: &str) -> bool {
    match operator {
        ConditionOperator::Like => actual.contains(pattern),
        ConditionOperator::NotLike => !actual.contains(pattern),
        _ => false,
    }
}

/// How action conditions are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationType {
    /// Conditions of the same kind are or-ed, different kinds are and-ed
    AndOr,
    And,
    Or,
}

impl Default for EvaluationType {
    fn default() -> Self {
        Self::AndOr
    }
}

/// Notification recipient
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recipient {
    User(String),
    Group(String),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(name) => write!(f, "user:{}", name),
            Self::Group(name) => write!(f, "group:{}", name),
        }
    }
}

/// Operation executed by an escalation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscalationOperation {
    /// Send a message through a notification channel
    Notify {
        channel: String,
        #[serde(default)]
        recipients: Vec<Recipient>,
        /// Subject template, the configured default when absent
        #[serde(default)]
        subject: Option<String>,
        /// Message template, the configured default when absent
        #[serde(default)]
        message: Option<String>,
    },
    /// Run a command through a command channel
    RunCommand {
        channel: String,
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl EscalationOperation {
    pub fn channel(&self) -> &str {
        match self {
            Self::Notify { channel, .. } | Self::RunCommand { channel, .. } => channel,
        }
    }
}

/// Escalation operation bound to a range of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// First step, starting at 1
    #[serde(default = "default_step")]
    pub step_from: u32,
    /// Last step, 0 for every following step
    #[serde(default = "default_step")]
    pub step_to: u32,
    /// Duration of the steps this operation covers, the action default when absent
    #[serde(default)]
    pub step_duration_seconds: Option<u64>,
    #[serde(flatten)]
    pub operation: EscalationOperation,
}

impl Operation {
    /// Whether the operation runs at the 1-based step `step`
    pub fn covers(&self, step: u32) -> bool {
        self.step_from <= step && (self.step_to == 0 || step <= self.step_to)
    }

    /// Whether the operation runs at any step after the 1-based step `step`
    pub fn covers_after(&self, step: u32) -> bool {
        self.step_to == 0 || self.step_to > step
    }
}

/// Longest delay between two escalation steps
pub const MAX_STEP_DURATION_SECONDS: u64 = 7 * 86_400;

/// Pairing of event conditions with escalation operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action identifier
    pub id: ActionId,
    /// Action name
    pub name: String,
    /// Whether the action is active
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Conditions on the trigger and host of the event
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// How conditions are combined
    #[serde(default)]
    pub evaluation: EvaluationType,
    /// Default step duration
    #[serde(default = "default_step_duration")]
    pub default_step_duration_seconds: u64,
    /// Problem operations
    #[serde(default)]
    pub operations: Vec<Operation>,
    /// Operations run once when the problem is resolved
    #[serde(default)]
    pub recovery_operations: Vec<EscalationOperation>,
    /// Operations run when the problem is acknowledged
    #[serde(default)]
    pub update_operations: Vec<EscalationOperation>,
    /// Pause escalation while the problem is acknowledged
    #[serde(default)]
    pub pause_on_acknowledge: bool,
}

impl Action {
    /// Evaluate the action conditions for a trigger and its owner host
    pub fn matches(&self, trigger: &Trigger, host: &Host) -> bool {
        if self.conditions.is_empty() {
            return true;
        }

        match self.evaluation {
            EvaluationType::And => self.conditions.iter().all(|c| c.matches(trigger, host)),
            EvaluationType::Or => self.conditions.iter().any(|c| c.matches(trigger, host)),
            EvaluationType::AndOr => {
                let mut kinds: Vec<ConditionKind> = self.conditions.iter().map(|c| c.kind()).collect();
                kinds.sort();
                kinds.dedup();
                kinds.into_iter().all(|kind| {
                    self.conditions
                        .iter()
                        .filter(|c| c.kind() == kind)
                        .any(|c| c.matches(trigger, host))
                })
            }
        }
    }

    /// Operations executed at the 0-based escalation step `step`
    pub fn operations_at(&self, step: u32) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(move |op| op.covers(step + 1))
    }

    /// Time until the step after the 0-based step `step` is due
    ///
    /// The shortest duration among the operations of the step wins; operations
    /// without their own duration use the action default.
    pub fn step_duration(&self, step: u32) -> u64 {
        self.operations_at(step)
            .map(|op| op.step_duration_seconds.unwrap_or(self.default_step_duration_seconds))
            .min()
            .unwrap_or(self.default_step_duration_seconds)
    }

    /// Whether any operation covers a step after the 0-based step `step`
    pub fn has_steps_after(&self, step: u32) -> bool {
        self.operations.iter().any(|op| op.covers_after(step + 1))
    }

    /// Check operation step ranges
    pub fn validate(&self) -> Result<()> {
        for condition in &self.conditions {
            condition.validate()?;
        }
        for op in &self.operations {
            if op.step_from == 0 {
                return Err(StoreError::validation(format!(
                    "action {}: operation step_from must be at least 1",
                    self.id
                )));
            }
            if op.step_to != 0 && op.step_to < op.step_from {
                return Err(StoreError::validation(format!(
                    "action {}: operation step_to {} is before step_from {}",
                    self.id, op.step_to, op.step_from
                )));
            }
            if let Some(duration) = op.step_duration_seconds {
                check_step_duration(self.id, "operation step duration", duration)?;
            }
        }
        check_step_duration(self.id, "default step duration", self.default_step_duration_seconds)
    }
}

fn check_step_duration(id: ActionId, what: &str, seconds: u64) -> Result<()> {
    if !(1..=MAX_STEP_DURATION_SECONDS).contains(&seconds) {
        return Err(StoreError::validation(format!(
            "action {}: {} must be between 1 and {} seconds",
            id, what, MAX_STEP_DURATION_SECONDS
        )));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

fn default_step() -> u32 {
    1
}

fn default_step_duration() -> u64 {
    3600
}
