/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Host partitioned trigger evaluation
//!
//! Every host is owned by one worker (`host id mod workers`). A worker
//! evaluates the triggers of its hosts one pass at a time, which keeps the
//! events of a host in a deterministic order while different hosts are
//! evaluated in parallel.

use crate::error::{AlertingError, Result};
use crate::escalation::Escalator;
use crate::event::Event;
use crate::generator::EventGenerator;
use crate::metrics::MetricsRecorder;
use chrono::{DateTime, Utc};
use expression::{Evaluator, Sample, Tristate};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use store::{ConfigSnapshot, HistoryCache, HostId, SnapshotStore, Trigger};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Item value as received from an agent or sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemValue {
    /// Host name
    pub host: String,
    /// Item key
    pub key: String,
    /// Raw value
    pub value: String,
    /// Value timestamp, the reception time when absent
    #[serde(default)]
    pub clock: Option<DateTime<Utc>>,
}

impl ItemValue {
    pub fn new<H: Into<String>, K: Into<String>, V: Into<String>>(host: H, key: K, value: V) -> Self {
        Self {
            host: host.into(),
            key: key.into(),
            value: value.into(),
            clock: None,
        }
    }

    pub fn at(mut self, clock: DateTime<Utc>) -> Self {
        self.clock = Some(clock);
        self
    }
}

/// Result of an ingestion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    /// Values stored
    pub processed: usize,
    /// Values rejected: unknown or disabled item, or value of the wrong type
    pub failed: usize,
}

impl IngestSummary {
    pub fn total(&self) -> usize {
        self.processed + self.failed
    }
}

/// Result of one host pass
#[derive(Debug, Default)]
pub struct HostPass {
    /// Triggers evaluated
    pub evaluated: usize,
    /// Triggers skipped because they, one of their items or hosts is disabled
    pub skipped: usize,
    /// Triggers left untouched while a trigger they depend on is in problem
    pub suppressed: usize,
    /// Triggers whose evaluation failed
    pub errors: usize,
    /// Events generated
    pub events: Vec<Event>,
    /// Background deliveries of recovery operations started by the pass
    pub recoveries: Vec<JoinHandle<()>>,
}

/// Trigger evaluation engine
#[derive(Debug)]
pub struct EvaluationEngine {
    store: Arc<SnapshotStore>,
    history: Arc<HistoryCache>,
    generator: Arc<EventGenerator>,
    escalator: Arc<Escalator>,
    metrics: Arc<MetricsRecorder>,
    evaluator: Evaluator,
    workers: usize,
    interval: Duration,
    queues: RwLock<Vec<mpsc::UnboundedSender<HostId>>>,
}

impl EvaluationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SnapshotStore>,
        history: Arc<HistoryCache>,
        generator: Arc<EventGenerator>,
        escalator: Arc<Escalator>,
        metrics: Arc<MetricsRecorder>,
        evaluator: Evaluator,
        workers: usize,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            history,
            generator,
            escalator,
            metrics,
            evaluator,
            workers: workers.max(1),
            interval,
            queues: RwLock::new(Vec::new()),
        }
    }

    /// Worker owning a host
    pub fn worker_for(&self, host_id: HostId) -> usize {
        (host_id.0 % self.workers as u64) as usize
    }

    /// Spawn the workers and the periodic evaluation timer
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.workers + 1);
        let mut queues = self.queues.write();
        queues.clear();

        for worker in 0..self.workers {
            let (tx, rx) = mpsc::unbounded_channel();
            queues.push(tx);
            handles.push(tokio::spawn(self.clone().run_worker(worker, rx, token.clone())));
        }
        drop(queues);

        let engine = self.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => engine.schedule_all(),
                }
            }
            debug!("Periodic evaluation stopped");
        }));

        info!(workers = self.workers, interval = ?self.interval, "Evaluation engine started");
        handles
    }

    async fn run_worker(
        self: Arc<Self>,
        worker: usize,
        mut rx: mpsc::UnboundedReceiver<HostId>,
        token: CancellationToken,
    ) {
        debug!(worker, "Evaluation worker started");
        loop {
            let host_id = tokio::select! {
                _ = token.cancelled() => break,
                host_id = rx.recv() => match host_id {
                    Some(host_id) => host_id,
                    None => break,
                },
            };

            // Requests queued while the previous pass ran are merged
            let mut hosts = BTreeSet::from([host_id]);
            while let Ok(host_id) = rx.try_recv() {
                hosts.insert(host_id);
            }

            for host_id in hosts {
                if let Err(err) = self.evaluate_host(host_id, Utc::now()).await {
                    error!(worker, host_id = %host_id, error = %err, "Host evaluation pass aborted");
                }
            }
        }
        debug!(worker, "Evaluation worker stopped");
    }

    /// Queue a host for evaluation on its worker
    ///
    /// Returns `false` when the workers are not running.
    pub fn schedule(&self, host_id: HostId) -> bool {
        let queues = self.queues.read();
        queues
            .get(self.worker_for(host_id))
            .is_some_and(|queue| queue.send(host_id).is_ok())
    }

    /// Queue every enabled host and forget state of deleted triggers and items
    pub fn schedule_all(&self) {
        let snapshot = self.store.load();
        for host in snapshot.hosts().filter(|host| host.enabled) {
            self.schedule(host.id);
        }
        self.generator
            .retain(|trigger_id| snapshot.trigger(trigger_id).is_some());
        self.history.retain(|item_id| snapshot.item(item_id).is_some());
    }

    /// Store received values and queue the hosts owning affected triggers
    pub fn ingest(&self, values: &[ItemValue], now: DateTime<Utc>) -> IngestSummary {
        let snapshot = self.store.load();
        let mut summary = IngestSummary::default();
        let mut hosts = BTreeSet::new();

        for value in values {
            let Some(item) = snapshot
                .item_by_key(&value.host, &value.key)
                .filter(|item| item.enabled)
            else {
                debug!(host = %value.host, key = %value.key, "Value for unknown or disabled item");
                summary.failed += 1;
                continue;
            };

            match item.parse_value(&value.value) {
                Ok(parsed) => {
                    self.history
                        .insert(item.id, Sample::new(value.clock.unwrap_or(now), parsed), now);
                    hosts.extend(
                        snapshot
                            .triggers_for_item(item.id)
                            .iter()
                            .filter_map(|trigger_id| snapshot.owner_host_id(*trigger_id)),
                    );
                    summary.processed += 1;
                }
                Err(err) => {
                    debug!(host = %value.host, key = %value.key, error = %err, "Rejected value");
                    summary.failed += 1;
                }
            }
        }

        for host_id in hosts {
            self.schedule(host_id);
        }
        self.metrics
            .record_values(summary.processed as u64, summary.failed as u64);
        summary
    }

    /// Evaluate every trigger owned by a host against one snapshot
    ///
    /// Errors of a single trigger are recorded and the pass continues. A
    /// snapshot inconsistency aborts the whole pass.
    pub async fn evaluate_host(&self, host_id: HostId, now: DateTime<Utc>) -> Result<HostPass> {
        let snapshot = self.store.load();
        let trigger_ids = snapshot.triggers_for_host(host_id);

        for trigger_id in trigger_ids {
            if let Err(err) = snapshot.ensure_consistent(*trigger_id) {
                let err = AlertingError::from(err);
                self.metrics.record_error(err.category());
                return Err(err);
            }
        }

        let mut pass = HostPass::default();
        for trigger_id in trigger_ids {
            let Some(trigger) = snapshot
                .trigger(*trigger_id)
                .filter(|_| snapshot.is_trigger_active(*trigger_id))
            else {
                pass.skipped += 1;
                continue;
            };
            if let Some(master) = self.generator.log().master_in_problem(&snapshot, trigger.id) {
                debug!(trigger_id = %trigger.id, master_trigger_id = %master, "Trigger suppressed by dependency");
                pass.suppressed += 1;
                continue;
            }

            pass.evaluated += 1;
            match self.evaluate_trigger(trigger, now).await {
                Ok(Some(event)) => {
                    self.metrics.record_event(&event);
                    let outcome = self.escalator.handle_event(&event, &snapshot, now);
                    pass.recoveries.extend(outcome.recovery);
                    pass.events.push(event);
                }
                Ok(None) => {}
                Err(err) => {
                    self.report_error(trigger, &err, now);
                    pass.errors += 1;
                }
            }
        }

        debug!(
            host_id = %host_id,
            version = snapshot.version(),
            evaluated = pass.evaluated,
            suppressed = pass.suppressed,
            events = pass.events.len(),
            "Host evaluated"
        );
        Ok(pass)
    }

    async fn evaluate_trigger(&self, trigger: &Trigger, now: DateTime<Utc>) -> Result<Option<Event>> {
        let problem = expression::evaluate(&self.evaluator, &trigger.expression, self.history.as_ref(), now).await?;

        let recovery = match trigger.recovery_expression() {
            Some(recovery) => {
                match expression::evaluate(&self.evaluator, recovery, self.history.as_ref(), now).await {
                    Ok(result) => Some(result),
                    Err(err) => {
                        warn!(trigger_id = %trigger.id, error = %err, "Recovery expression failed");
                        Some(Tristate::Unknown)
                    }
                }
            }
            None => None,
        };

        self.metrics.record_evaluation(problem == Tristate::Unknown);
        self.generator.process(trigger, problem, recovery, now)
    }

    fn report_error(&self, trigger: &Trigger, err: &AlertingError, now: DateTime<Utc>) {
        self.metrics.record_error(err.category());
        match err {
            AlertingError::DataUnavailable(_) => {
                debug!(trigger_id = %trigger.id, error = %err, "Trigger data unavailable");
                self.generator.process_error(trigger.id, err, now);
            }
            AlertingError::Evaluation(_) => {
                warn!(
                    trigger_id = %trigger.id,
                    expression = %trigger.expression,
                    error = %err,
                    "Trigger evaluation failed"
                );
                self.generator.process_error(trigger.id, err, now);
            }
            _ => error!(trigger_id = %trigger.id, error = %err, "Failed to process trigger"),
        }
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.store.load()
    }
}
