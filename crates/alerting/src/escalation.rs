/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Escalation state machine
//!
//! Every problem event matched by an action gets one escalation. The
//! scheduler tick executes the operations of the escalation's next step once
//! it is due, then schedules the step after it. Records live in a concurrent
//! map; a record's entry lock is only held for state changes and never
//! across a notification dispatch.

use crate::channels::{CommandSpec, Notification};
use crate::dispatch::Dispatcher;
use crate::error::{AlertingError, Result};
use crate::event::{Acknowledgement, Event, EventId, EventLog, EventValue};
use crate::metrics::MetricsRecorder;
use crate::templates::{NotificationKind, TemplateContext, TemplateEngine};
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use store::{
    Action, ActionId, ConfigSnapshot, EscalationOperation, Host, MAX_STEP_DURATION_SECONDS, SnapshotStore, Trigger,
    TriggerId,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Escalation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscalationId(pub u64);

impl fmt::Display for EscalationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Escalation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    /// Created, first step not executed yet
    Pending,
    /// Steps executing on schedule
    Active,
    /// Suspended while the problem is acknowledged
    PausedAck,
    /// Problem resolved
    Resolved,
    /// Stopped by an operator or by a configuration change
    Cancelled,
}

impl EscalationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Cancelled)
    }
}

impl fmt::Display for EscalationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Active => write!(f, "ACTIVE"),
            Self::PausedAck => write!(f, "PAUSED_ACK"),
            Self::Resolved => write!(f, "RESOLVED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Operation that could not be delivered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    /// 0-based step
    pub step: u32,
    /// Index of the operation in the action
    pub operation: usize,
    pub channel: String,
    pub attempts: u32,
    pub error: String,
    pub clock: DateTime<Utc>,
}

/// Escalation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: EscalationId,
    /// Problem event being escalated
    pub event_id: EventId,
    pub trigger_id: TriggerId,
    pub action_id: ActionId,
    pub status: EscalationStatus,
    /// 0-based index of the last executed step
    pub current_step: u32,
    /// When the next step is due, `None` once steps are exhausted
    pub next_execution: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_executed_at: Option<DateTime<Utc>>,
    /// Operations that failed after every retry
    pub failures: Vec<StepFailure>,
    pub cancel_reason: Option<String>,
    /// Whether a step is being executed
    pub in_flight: bool,
}

impl Escalation {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, EscalationStatus::Pending | EscalationStatus::Active)
            && !self.in_flight
            && self.next_execution.is_some_and(|next| next <= now)
    }

    fn has_executed(&self) -> bool {
        self.last_executed_at.is_some()
    }

    fn cancel(&mut self, reason: &str) {
        self.status = EscalationStatus::Cancelled;
        self.next_execution = None;
        self.cancel_reason = Some(reason.to_string());
    }
}

/// Escalation query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationFilter {
    pub trigger_id: Option<TriggerId>,
    pub event_id: Option<EventId>,
    pub action_id: Option<ActionId>,
    pub status: Option<EscalationStatus>,
    /// Include resolved and cancelled escalations
    pub include_closed: bool,
}

impl EscalationFilter {
    pub fn matches(&self, escalation: &Escalation) -> bool {
        (self.include_closed || !escalation.status.is_terminal())
            && self.trigger_id.is_none_or(|id| escalation.trigger_id == id)
            && self.event_id.is_none_or(|id| escalation.event_id == id)
            && self.action_id.is_none_or(|id| escalation.action_id == id)
            && self.status.is_none_or(|status| escalation.status == status)
    }
}

/// Summary of a scheduler tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Steps executed
    pub executed: usize,
    /// Escalations cancelled because they were no longer valid
    pub cancelled: usize,
    /// Due escalations held back while a trigger they depend on is in problem
    pub deferred: usize,
}

/// Escalations affected by an event
#[derive(Debug, Default)]
pub struct EventOutcome {
    pub created: Vec<EscalationId>,
    pub resolved: Vec<EscalationId>,
    /// Background delivery of recovery operations
    pub recovery: Option<JoinHandle<()>>,
}

struct StepJob {
    id: EscalationId,
    step: u32,
    now: DateTime<Utc>,
    action: Action,
    notifications: Vec<(usize, Notification)>,
}

enum Claim {
    Run(StepJob),
    Cancelled,
    Deferred,
    Skip,
}

/// Owner of every escalation record
#[derive(Debug)]
pub struct Escalator {
    escalations: DashMap<EscalationId, Escalation>,
    sequence: AtomicU64,
    store: Arc<SnapshotStore>,
    events: Arc<EventLog>,
    dispatcher: Arc<Dispatcher>,
    templates: Arc<TemplateEngine>,
    metrics: Arc<MetricsRecorder>,
}

impl Escalator {
    pub fn new(
        store: Arc<SnapshotStore>,
        events: Arc<EventLog>,
        dispatcher: Arc<Dispatcher>,
        templates: Arc<TemplateEngine>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            escalations: DashMap::new(),
            sequence: AtomicU64::new(0),
            store,
            events,
            dispatcher,
            templates,
            metrics,
        }
    }

    pub fn get(&self, id: EscalationId) -> Option<Escalation> {
        self.escalations.get(&id).map(|escalation| escalation.clone())
    }

    /// Escalations matching a filter, ordered by identifier
    pub fn list(&self, filter: &EscalationFilter) -> Vec<Escalation> {
        let mut escalations: Vec<Escalation> = self
            .escalations
            .iter()
            .filter(|escalation| filter.matches(escalation))
            .map(|escalation| escalation.clone())
            .collect();
        escalations.sort_by_key(|escalation| escalation.id);
        escalations
    }

    pub fn len(&self) -> usize {
        self.escalations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.escalations.is_empty()
    }

    /// React to a new event
    ///
    /// Problem events start an escalation for every matching action with
    /// operations. OK events resolve the open escalations of the trigger and
    /// send the recovery operations of their actions in the background.
    pub fn handle_event(&self, event: &Event, snapshot: &ConfigSnapshot, now: DateTime<Utc>) -> EventOutcome {
        match event.value {
            EventValue::Problem => EventOutcome {
                created: self.create_for_event(event, snapshot, now),
                ..Default::default()
            },
            EventValue::Ok => {
                let resolved = self.resolve_trigger(event.trigger_id);
                let recovery = self.send_recovery(event, &resolved, snapshot);
                EventOutcome {
                    created: Vec::new(),
                    resolved: resolved.iter().map(|escalation| escalation.id).collect(),
                    recovery,
                }
            }
        }
    }

    /// Start escalations for a problem event
    pub fn create_for_event(&self, event: &Event, snapshot: &ConfigSnapshot, now: DateTime<Utc>) -> Vec<EscalationId> {
        let Some(trigger) = snapshot.trigger(event.trigger_id) else {
            return Vec::new();
        };

        let mut created = Vec::new();
        for action in snapshot.actions_matching(trigger) {
            if action.operations.is_empty() {
                continue;
            }

            let id = EscalationId(self.sequence.fetch_add(1, Ordering::Relaxed) + 1);
            self.escalations.insert(
                id,
                Escalation {
                    id,
                    event_id: event.id,
                    trigger_id: trigger.id,
                    action_id: action.id,
                    status: EscalationStatus::Pending,
                    current_step: 0,
                    next_execution: Some(now),
                    created_at: now,
                    last_executed_at: None,
                    failures: Vec::new(),
                    cancel_reason: None,
                    in_flight: false,
                },
            );
            self.metrics.record_escalation_created();
            info!(
                escalation_id = %id,
                event_id = %event.id,
                trigger_id = %trigger.id,
                action_id = %action.id,
                "Escalation created"
            );
            created.push(id);
        }
        created
    }

    /// Resolve every open escalation of a trigger
    pub fn resolve_trigger(&self, trigger_id: TriggerId) -> Vec<Escalation> {
        let mut resolved = Vec::new();
        for mut escalation in self.escalations.iter_mut() {
            if escalation.trigger_id == trigger_id && !escalation.status.is_terminal() {
                escalation.status = EscalationStatus::Resolved;
                escalation.next_execution = None;
                resolved.push(escalation.clone());
            }
        }

        for escalation in &resolved {
            self.metrics.record_escalation_resolved();
            info!(escalation_id = %escalation.id, trigger_id = %trigger_id, "Escalation resolved");
        }
        resolved
    }

    fn send_recovery(
        &self,
        event: &Event,
        resolved: &[Escalation],
        snapshot: &ConfigSnapshot,
    ) -> Option<JoinHandle<()>> {
        let trigger = snapshot.trigger(event.trigger_id)?;
        let host = snapshot.host_of_trigger(trigger.id);

        // Once per action, and only for problems that were notified
        let mut by_action: BTreeMap<ActionId, &Escalation> = BTreeMap::new();
        for escalation in resolved.iter().filter(|escalation| escalation.has_executed()) {
            by_action.entry(escalation.action_id).or_insert(escalation);
        }

        let mut notifications = Vec::new();
        for (action_id, escalation) in by_action {
            let Some(action) = snapshot.action(action_id) else {
                continue;
            };
            let context = TemplateContext::new(NotificationKind::Recovery, trigger, host, event)
                .with_escalation(escalation.id.0, escalation.current_step);
            for operation in &action.recovery_operations {
                notifications.push(self.build_notification(
                    NotificationKind::Recovery,
                    operation,
                    trigger,
                    host,
                    escalation,
                    &context,
                ));
            }
        }

        if notifications.is_empty() {
            return None;
        }

        let dispatcher = self.dispatcher.clone();
        Some(tokio::spawn(async move {
            for notification in notifications {
                let outcome = dispatcher.dispatch(&notification).await;
                if let Some(err) = outcome.error(&notification.channel) {
                    warn!(
                        event_id = %notification.event_id,
                        error = %err,
                        "Recovery notification failed"
                    );
                }
            }
        }))
    }

    /// Send the update operations of the actions escalating an acknowledged problem
    ///
    /// Runs once per action with an open escalation for the event, in the
    /// background like recovery operations.
    pub fn send_update(
        &self,
        event: &Event,
        ack: &Acknowledgement,
        snapshot: &ConfigSnapshot,
    ) -> Option<JoinHandle<()>> {
        let trigger = snapshot.trigger(event.trigger_id)?;
        let host = snapshot.host_of_trigger(trigger.id);

        let mut by_action: BTreeMap<ActionId, Escalation> = BTreeMap::new();
        for escalation in self.escalations.iter() {
            if escalation.event_id == event.id && !escalation.status.is_terminal() {
                by_action
                    .entry(escalation.action_id)
                    .or_insert_with(|| escalation.clone());
            }
        }

        let mut notifications = Vec::new();
        for (action_id, escalation) in &by_action {
            let Some(action) = snapshot.action(*action_id).filter(|action| action.enabled) else {
                continue;
            };
            let context = TemplateContext::new(NotificationKind::Update, trigger, host, event)
                .with_escalation(escalation.id.0, escalation.current_step)
                .with_acknowledgement(ack);
            for operation in &action.update_operations {
                notifications.push(self.build_notification(
                    NotificationKind::Update,
                    operation,
                    trigger,
                    host,
                    escalation,
                    &context,
                ));
            }
        }

        if notifications.is_empty() {
            return None;
        }

        let dispatcher = self.dispatcher.clone();
        Some(tokio::spawn(async move {
            for notification in notifications {
                let outcome = dispatcher.dispatch(&notification).await;
                if let Some(err) = outcome.error(&notification.channel) {
                    warn!(
                        event_id = %notification.event_id,
                        error = %err,
                        "Update notification failed"
                    );
                }
            }
        }))
    }

    /// Execute every escalation step that is due at `now`
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let snapshot = self.store.load();
        let due: Vec<(EscalationId, EventId)> = self
            .escalations
            .iter()
            .filter(|escalation| escalation.is_due(now))
            .map(|escalation| (escalation.id, escalation.event_id))
            .collect();

        let mut report = TickReport::default();
        let mut jobs = Vec::with_capacity(due.len());
        for (id, event_id) in due {
            let event = self.events.get(event_id);
            match self.claim(id, event.as_ref(), &snapshot, now) {
                Claim::Run(job) => jobs.push(job),
                Claim::Cancelled => report.cancelled += 1,
                Claim::Deferred => report.deferred += 1,
                Claim::Skip => {}
            }
        }

        report.executed = jobs.len();
        join_all(jobs.into_iter().map(|job| self.execute(job))).await;
        report
    }

    /// Validate a due escalation and mark its next step in flight
    fn claim(&self, id: EscalationId, event: Option<&Event>, snapshot: &ConfigSnapshot, now: DateTime<Utc>) -> Claim {
        let Some(mut escalation) = self.escalations.get_mut(&id) else {
            return Claim::Skip;
        };
        if !escalation.is_due(now) {
            return Claim::Skip;
        }

        let Some(action) = snapshot.action(escalation.action_id).filter(|action| action.enabled) else {
            return self.invalidate(&mut escalation, "action disabled");
        };
        if let Some(reason) = snapshot.inactive_reason(escalation.trigger_id) {
            return self.invalidate(&mut escalation, reason);
        }
        let Some(trigger) = snapshot.trigger(escalation.trigger_id) else {
            return self.invalidate(&mut escalation, "trigger deleted");
        };
        let event = match event {
            None => return self.invalidate(&mut escalation, "problem event missing"),
            Some(event) if event.false_positive => {
                return self.invalidate(&mut escalation, "problem marked false positive");
            }
            Some(event) => event,
        };

        // Retried on a later tick once the master problem is gone
        if let Some(master) = self.events.master_in_problem(snapshot, trigger.id) {
            debug!(escalation_id = %id, master_trigger_id = %master, "Escalation deferred by dependency");
            return Claim::Deferred;
        }

        let step = if escalation.has_executed() {
            escalation.current_step + 1
        } else {
            0
        };
        escalation.status = EscalationStatus::Active;
        escalation.current_step = step;
        escalation.last_executed_at = Some(now);
        escalation.next_execution = None;
        escalation.in_flight = true;

        let host = snapshot.host_of_trigger(trigger.id);
        let context =
            TemplateContext::new(NotificationKind::Problem, trigger, host, event).with_escalation(id.0, step);
        let notifications = action
            .operations
            .iter()
            .enumerate()
            .filter(|(_, operation)| operation.covers(step + 1))
            .map(|(index, operation)| {
                (
                    index,
                    self.build_notification(
                        NotificationKind::Problem,
                        &operation.operation,
                        trigger,
                        host,
                        &escalation,
                        &context,
                    ),
                )
            })
            .collect();

        debug!(escalation_id = %id, step, "Escalation step claimed");
        Claim::Run(StepJob {
            id,
            step,
            now,
            action: action.clone(),
            notifications,
        })
    }

    fn invalidate(&self, escalation: &mut Escalation, reason: &str) -> Claim {
        escalation.cancel(reason);
        self.metrics.record_escalation_cancelled();
        info!(escalation_id = %escalation.id, reason, "Escalation cancelled");
        Claim::Cancelled
    }

    async fn execute(&self, job: StepJob) {
        let mut failures = Vec::new();
        for (index, notification) in &job.notifications {
            let outcome = self.dispatcher.dispatch(notification).await;
            if let Some(err) = outcome.error(&notification.channel) {
                warn!(escalation_id = %job.id, step = job.step, error = %err, "Escalation operation failed");
                self.metrics.record_error(err.category());
                failures.push(StepFailure {
                    step: job.step,
                    operation: *index,
                    channel: notification.channel.clone(),
                    attempts: outcome.attempts,
                    error: outcome.result.error.unwrap_or_default(),
                    clock: Utc::now(),
                });
            }
        }
        self.metrics.record_escalation_step();

        let Some(mut escalation) = self.escalations.get_mut(&job.id) else {
            return;
        };
        escalation.in_flight = false;
        escalation.failures.extend(failures);

        // Resolved or cancelled while in flight: nothing more to schedule
        if escalation.status.is_terminal() {
            return;
        }

        escalation.next_execution = if job.action.has_steps_after(job.step) {
            next_step_at(&job.action, job.step, job.now)
        } else {
            None
        };

        info!(
            escalation_id = %job.id,
            step = job.step,
            next_execution = ?escalation.next_execution,
            "Escalation step executed"
        );
    }

    fn build_notification(
        &self,
        kind: NotificationKind,
        operation: &EscalationOperation,
        trigger: &Trigger,
        host: Option<&Host>,
        escalation: &Escalation,
        context: &TemplateContext,
    ) -> Notification {
        let (recipients, subject, message, command) = match operation {
            EscalationOperation::Notify {
                recipients,
                subject,
                message,
                ..
            } => (
                recipients.clone(),
                self.templates.render_subject(kind, subject.as_deref(), context),
                self.templates.render_message(kind, message.as_deref(), context),
                None,
            ),
            EscalationOperation::RunCommand { command, args, .. } => (
                Vec::new(),
                self.templates.render_subject(kind, None, context),
                self.templates.render_message(kind, None, context),
                Some(CommandSpec {
                    command: self.templates.render(command, context),
                    args: args.iter().map(|arg| self.templates.render(arg, context)).collect(),
                }),
            ),
        };

        Notification {
            id: Uuid::new_v4(),
            kind,
            channel: operation.channel().to_string(),
            recipients,
            subject,
            message,
            command,
            event_id: escalation.event_id,
            trigger_id: trigger.id,
            severity: trigger.severity,
            host: host.map(|host| host.name.clone()).unwrap_or_default(),
            escalation_id: Some(escalation.id.0),
            step: Some(escalation.current_step),
            created_at: Utc::now(),
        }
    }

    /// Pause the escalations of an acknowledged event
    ///
    /// Only escalations whose action pauses on acknowledgement are affected.
    pub fn pause(&self, event_id: EventId, snapshot: &ConfigSnapshot) -> usize {
        let mut paused = 0;
        for mut escalation in self.escalations.iter_mut() {
            if escalation.event_id != event_id
                || !matches!(escalation.status, EscalationStatus::Pending | EscalationStatus::Active)
            {
                continue;
            }
            let pauses = snapshot
                .action(escalation.action_id)
                .is_some_and(|action| action.pause_on_acknowledge);
            if pauses {
                escalation.status = EscalationStatus::PausedAck;
                paused += 1;
                info!(escalation_id = %escalation.id, event_id = %event_id, "Escalation paused");
            }
        }
        paused
    }

    /// Resume the paused escalations of an unacknowledged event
    pub fn resume(&self, event_id: EventId, now: DateTime<Utc>) -> usize {
        let mut resumed = 0;
        for mut escalation in self.escalations.iter_mut() {
            if escalation.event_id != event_id || escalation.status != EscalationStatus::PausedAck {
                continue;
            }
            escalation.status = if escalation.has_executed() {
                EscalationStatus::Active
            } else {
                EscalationStatus::Pending
            };
            if escalation.next_execution.is_some_and(|next| next < now) {
                escalation.next_execution = Some(now);
            }
            resumed += 1;
            info!(escalation_id = %escalation.id, event_id = %event_id, "Escalation resumed");
        }
        resumed
    }

    /// Cancel an escalation
    pub fn cancel(&self, id: EscalationId, reason: &str) -> Result<Escalation> {
        let mut escalation = self
            .escalations
            .get_mut(&id)
            .ok_or_else(|| AlertingError::not_found(format!("escalation {}", id)))?;
        if escalation.status.is_terminal() {
            return Err(AlertingError::invalid_state(format!(
                "escalation {} is already {}",
                id, escalation.status
            )));
        }

        escalation.cancel(reason);
        self.metrics.record_escalation_cancelled();
        info!(escalation_id = %id, reason, "Escalation cancelled");
        Ok(escalation.clone())
    }

    /// Cancel the open escalations matching a filter
    pub fn cancel_matching(&self, filter: &EscalationFilter, reason: &str) -> usize {
        let mut cancelled = 0;
        for mut escalation in self.escalations.iter_mut() {
            if !escalation.status.is_terminal() && filter.matches(&escalation) {
                escalation.cancel(reason);
                self.metrics.record_escalation_cancelled();
                info!(escalation_id = %escalation.id, reason, "Escalation cancelled");
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Drop resolved and cancelled escalations closed before `before`
    pub fn purge_closed(&self, before: DateTime<Utc>) -> usize {
        let len = self.escalations.len();
        self.escalations.retain(|_, escalation| {
            !(escalation.status.is_terminal()
                && !escalation.in_flight
                && escalation.last_executed_at.unwrap_or(escalation.created_at) < before)
        });
        len - self.escalations.len()
    }
}

/// Due time of the step after the 0-based `step` executed at `now`
fn next_step_at(action: &Action, step: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let seconds = action.step_duration(step).min(MAX_STEP_DURATION_SECONDS);
    TimeDelta::try_seconds(seconds as i64).and_then(|delay| now.checked_add_signed(delay))
}
