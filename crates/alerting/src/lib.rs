/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! # Alerting core
//!
//! Turns item values into trigger events and drives the escalation of
//! problems:
//!
//! - Host partitioned trigger evaluation over the item value history
//! - Event generation with deduplication of repeated values
//! - Escalation steps with acknowledgement, recovery and cancellation
//! - Notification delivery through webhook, log and command channels
//! - Handlebars message templates

pub mod channels;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod event;
pub mod generator;
pub mod metrics;
pub mod templates;

pub use channels::{DeliveryResult, Notification, NotificationChannel};
pub use config::{AlertingConfig, ChannelConfig, ChannelType};
pub use dispatch::Dispatcher;
pub use engine::{EvaluationEngine, HostPass, IngestSummary, ItemValue};
pub use error::{AlertingError, Result};
pub use escalation::{Escalation, EscalationFilter, EscalationId, EscalationStatus, Escalator, TickReport};
pub use event::{AckAction, Acknowledgement, Event, EventId, EventLog, EventSource, EventValue};
pub use generator::{EventGenerator, TriggerState, TriggerValue};
pub use metrics::{AlertingMetrics, MetricsRecorder};
pub use templates::TemplateEngine;

use chrono::{DateTime, Utc};
use expression::Evaluator;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use store::{HistoryCache, HostId, SnapshotStore, TriggerId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Closed escalations are kept this long before being purged
const CLOSED_RETENTION_HOURS: i64 = 24;

/// Main alerting service
#[derive(Debug, Clone)]
pub struct AlertingService {
    inner: Arc<AlertingServiceInner>,
}

#[derive(Debug)]
struct AlertingServiceInner {
    config: AlertingConfig,
    store: Arc<SnapshotStore>,
    history: Arc<HistoryCache>,
    events: Arc<EventLog>,
    generator: Arc<EventGenerator>,
    escalator: Arc<Escalator>,
    engine: Arc<EvaluationEngine>,
    metrics: Arc<MetricsRecorder>,
    running: Mutex<Option<Running>>,
}

#[derive(Debug)]
struct Running {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl AlertingService {
    /// Create a new alerting service with the configured channels
    pub fn new(config: AlertingConfig, store: Arc<SnapshotStore>) -> Result<Self> {
        Self::with_channels(config, store, Vec::new())
    }

    /// Create a new alerting service with additional channels
    ///
    /// Channels given here replace configured channels of the same name.
    pub fn with_channels(
        config: AlertingConfig,
        store: Arc<SnapshotStore>,
        channels: Vec<Arc<dyn NotificationChannel>>,
    ) -> Result<Self> {
        config.validate()?;
        info!("Initializing alerting service");

        let metrics = Arc::new(MetricsRecorder::new());
        let mut dispatcher = Dispatcher::from_config(
            &config.channels,
            config.escalation.retry.clone(),
            config.escalation.dispatch_timeout(),
            metrics.clone(),
        )?;
        for channel in channels {
            dispatcher.register(channel);
        }
        let templates = TemplateEngine::new(config.templates.clone())?;

        let history = Arc::new(HistoryCache::new(
            config.evaluation.history_max_values,
            config.evaluation.history_max_age_seconds,
        ));
        let events = Arc::new(EventLog::new());
        let generator = Arc::new(EventGenerator::new(events.clone()));
        let escalator = Arc::new(Escalator::new(
            store.clone(),
            events.clone(),
            Arc::new(dispatcher),
            Arc::new(templates),
            metrics.clone(),
        ));
        let engine = Arc::new(EvaluationEngine::new(
            store.clone(),
            history.clone(),
            generator.clone(),
            escalator.clone(),
            metrics.clone(),
            Evaluator::new(config.evaluation.epsilon),
            config.evaluation.workers,
            config.evaluation.interval(),
        ));

        Ok(Self {
            inner: Arc::new(AlertingServiceInner {
                config,
                store,
                history,
                events,
                generator,
                escalator,
                engine,
                metrics,
                running: Mutex::new(None),
            }),
        })
    }

    /// Start the evaluation workers and the escalation scheduler
    pub fn start(&self) -> Result<()> {
        let mut running = self.inner.running.lock();
        if running.is_some() {
            return Err(AlertingError::invalid_state("alerting service is already running"));
        }
        info!("Starting alerting service");

        let token = CancellationToken::new();
        let mut tasks = self.inner.engine.start(token.child_token());
        tasks.push(self.start_scheduler(token.child_token()));

        *running = Some(Running { token, tasks });
        info!("Alerting service started successfully");
        Ok(())
    }

    /// Stop the background tasks and wait for them to finish
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.inner.running.lock().take() else {
            return Ok(());
        };
        info!("Stopping alerting service");

        running.token.cancel();
        for task in running.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Alerting task ended abnormally");
            }
        }

        info!("Alerting service stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// Escalation scheduler: one tick per interval, each in its own task so
    /// a tick waiting on a slow channel never delays the next one
    fn start_scheduler(&self, token: CancellationToken) -> JoinHandle<()> {
        let escalator = self.inner.escalator.clone();
        let tick_interval = self.inner.config.escalation.tick_interval();

        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(tick_interval);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut cleanup = tokio::time::interval(Duration::from_secs(3600));

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticks.tick() => {
                        let escalator = escalator.clone();
                        tokio::spawn(async move {
                            let report = escalator.tick(Utc::now()).await;
                            if report.executed > 0 || report.cancelled > 0 {
                                debug!(
                                    executed = report.executed,
                                    cancelled = report.cancelled,
                                    "Escalation tick"
                                );
                            }
                        });
                    }
                    _ = cleanup.tick() => {
                        let before = Utc::now() - chrono::Duration::hours(CLOSED_RETENTION_HOURS);
                        let purged = escalator.purge_closed(before);
                        if purged > 0 {
                            debug!(purged, "Purged closed escalations");
                        }
                    }
                }
            }
            debug!("Escalation scheduler stopped");
        })
    }

    /// Store received item values and queue the affected hosts
    pub fn ingest(&self, values: &[ItemValue], now: DateTime<Utc>) -> IngestSummary {
        self.inner.engine.ingest(values, now)
    }

    /// Evaluate the triggers of one host immediately
    pub async fn evaluate_host(&self, host_id: HostId, now: DateTime<Utc>) -> Result<HostPass> {
        self.inner.engine.evaluate_host(host_id, now).await
    }

    /// Run one escalation scheduler tick immediately
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        self.inner.escalator.tick(now).await
    }

    /// Earliest event of the trigger's current problem
    pub fn get_current_problem(&self, trigger_id: TriggerId) -> Option<Event> {
        self.inner.events.current_problem(trigger_id)
    }

    /// Earliest event of the problem the trigger was in at `at`
    pub fn get_current_problem_at(&self, trigger_id: TriggerId, at: DateTime<Utc>) -> Option<Event> {
        self.inner.events.current_problem_at(trigger_id, at)
    }

    /// Open escalations matching a filter
    pub fn list_open_escalations(&self, filter: &EscalationFilter) -> Vec<Escalation> {
        let filter = EscalationFilter {
            include_closed: false,
            ..filter.clone()
        };
        self.inner.escalator.list(&filter)
    }

    /// Escalations matching a filter, closed ones included when requested
    pub fn list_escalations(&self, filter: &EscalationFilter) -> Vec<Escalation> {
        self.inner.escalator.list(filter)
    }

    pub fn escalation(&self, id: EscalationId) -> Option<Escalation> {
        self.inner.escalator.get(id)
    }

    /// Acknowledge a problem event
    ///
    /// Sends the update operations of the actions escalating the problem,
    /// then pauses the escalations of actions configured to pause on
    /// acknowledgement.
    pub fn acknowledge_event(&self, event_id: EventId, user: &str, message: Option<String>) -> Result<Event> {
        let event = self
            .inner
            .events
            .acknowledge(event_id, self.ack(user, message, AckAction::Acknowledge))?;
        let snapshot = self.inner.store.load();
        if let Some(ack) = event.acknowledgements.last() {
            // Delivered in the background, failures are logged by the escalator
            let _ = self.inner.escalator.send_update(&event, ack, &snapshot);
        }
        let paused = self.inner.escalator.pause(event_id, &snapshot);
        info!(event_id = %event_id, user, paused, "Event acknowledged");
        Ok(event)
    }

    /// Withdraw the acknowledgement of a problem event
    pub fn unacknowledge_event(&self, event_id: EventId, user: &str) -> Result<Event> {
        let event = self
            .inner
            .events
            .acknowledge(event_id, self.ack(user, None, AckAction::Unacknowledge))?;
        let resumed = self.inner.escalator.resume(event_id, Utc::now());
        info!(event_id = %event_id, user, resumed, "Event unacknowledged");
        Ok(event)
    }

    /// Close the problem an event belongs to
    ///
    /// Only triggers allowing manual close qualify, and only for events of
    /// their current problem. Returns the OK event appended for the trigger.
    pub fn close_problem(&self, event_id: EventId, user: &str, message: Option<String>) -> Result<Event> {
        let event = self
            .inner
            .events
            .get(event_id)
            .ok_or_else(|| AlertingError::not_found(format!("event {}", event_id)))?;
        let snapshot = self.inner.store.load();
        let trigger = snapshot
            .trigger(event.trigger_id)
            .ok_or_else(|| AlertingError::not_found(format!("trigger {}", event.trigger_id)))?;
        if !trigger.manual_close {
            return Err(AlertingError::invalid_state(format!(
                "trigger {} does not allow manual close",
                trigger.id
            )));
        }
        let in_current_problem = self
            .inner
            .events
            .current_problem(trigger.id)
            .is_some_and(|current| current.id <= event.id);
        if !in_current_problem {
            return Err(AlertingError::invalid_state(format!(
                "event {} is not part of the current problem of trigger {}",
                event_id, trigger.id
            )));
        }

        let now = Utc::now();
        let clock = self
            .inner
            .events
            .latest(trigger.id)
            .map_or(now, |latest| latest.clock.max(now));
        let ok = self.inner.generator.close(trigger.id, clock)?;
        self.inner
            .events
            .acknowledge(event_id, self.ack(user, message, AckAction::Close))?;

        self.inner.metrics.record_event(&ok);
        self.inner.escalator.handle_event(&ok, &snapshot, now);
        info!(event_id = %event_id, trigger_id = %trigger.id, user, "Problem closed");
        Ok(ok)
    }

    /// Flag a problem event as false positive
    ///
    /// When the event belongs to the trigger's ongoing problem, every open
    /// escalation of the trigger is cancelled. Otherwise only the
    /// escalations of that event are.
    pub fn mark_false_positive(&self, event_id: EventId, user: &str) -> Result<Event> {
        let event = self
            .inner
            .events
            .mark_false_positive(event_id, self.ack(user, None, AckAction::FalsePositive))?;

        let filter = if self.inner.events.is_latest(event_id) {
            EscalationFilter {
                trigger_id: Some(event.trigger_id),
                ..Default::default()
            }
        } else {
            EscalationFilter {
                event_id: Some(event_id),
                ..Default::default()
            }
        };
        let cancelled = self
            .inner
            .escalator
            .cancel_matching(&filter, "problem marked false positive");
        info!(event_id = %event_id, user, cancelled, "Event marked false positive");
        Ok(event)
    }

    /// Cancel an escalation
    pub fn cancel_escalation(&self, id: EscalationId, reason: &str) -> Result<Escalation> {
        self.inner.escalator.cancel(id, reason)
    }

    pub fn event(&self, event_id: EventId) -> Option<Event> {
        self.inner.events.get(event_id)
    }

    pub fn events_for_trigger(&self, trigger_id: TriggerId) -> Vec<Event> {
        self.inner.events.events_for_trigger(trigger_id)
    }

    /// Evaluation state of a trigger, `None` before its first evaluation
    pub fn trigger_status(&self, trigger_id: TriggerId) -> Option<TriggerState> {
        self.inner.generator.state(trigger_id)
    }

    /// Get alerting metrics
    pub fn metrics(&self) -> AlertingMetrics {
        self.inner.metrics.snapshot()
    }

    pub fn config(&self) -> &AlertingConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.inner.store
    }

    pub fn history(&self) -> &Arc<HistoryCache> {
        &self.inner.history
    }

    fn ack(&self, user: &str, message: Option<String>, action: AckAction) -> Acknowledgement {
        Acknowledgement {
            user: user.to_string(),
            message,
            clock: Utc::now(),
            action,
        }
    }
}
