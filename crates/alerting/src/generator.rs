/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Trigger state tracking and event generation
//!
//! A trigger only produces an event when its value changes between OK and
//! PROBLEM. Unknown evaluation results put the trigger in the unknown state
//! without touching its value, and a trigger leaving the unknown state to OK
//! is recorded silently.

use crate::error::{AlertingError, Result};
use crate::event::{Event, EventLog, EventSource, EventValue};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use expression::Tristate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use store::{RecoveryMode, Trigger, TriggerId};
use tracing::{debug, info};

/// Current value of a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerValue {
    /// Never evaluated to a known result
    Unknown,
    Ok,
    Problem,
}

/// Evaluation state of a trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerState {
    /// Last known value
    pub value: TriggerValue,
    /// Whether the last evaluation could not produce a known result
    pub unknown: bool,
    /// Why the last evaluation was unknown
    pub error: Option<String>,
    /// Time of the last value change
    pub last_change: Option<DateTime<Utc>>,
    /// Time of the last evaluation
    pub last_evaluation: Option<DateTime<Utc>>,
}

impl Default for TriggerState {
    fn default() -> Self {
        Self {
            value: TriggerValue::Unknown,
            unknown: false,
            error: None,
            last_change: None,
            last_evaluation: None,
        }
    }
}

/// Turns evaluation results into deduplicated events
#[derive(Debug)]
pub struct EventGenerator {
    states: DashMap<TriggerId, TriggerState>,
    log: Arc<EventLog>,
}

impl EventGenerator {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self {
            states: DashMap::new(),
            log,
        }
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn state(&self, trigger_id: TriggerId) -> Option<TriggerState> {
        self.states.get(&trigger_id).map(|state| state.clone())
    }

    /// Apply an evaluation result to a trigger
    ///
    /// `problem` is the result of the problem expression and `recovery` the
    /// result of the recovery expression, when the trigger has one. Returns
    /// the event produced by a value change.
    pub fn process(
        &self,
        trigger: &Trigger,
        problem: Tristate,
        recovery: Option<Tristate>,
        clock: DateTime<Utc>,
    ) -> Result<Option<Event>> {
        // The entry guard serializes every state change of this trigger
        let mut state = self.states.entry(trigger.id).or_default();
        state.last_evaluation = Some(clock);

        if problem == Tristate::Unknown {
            if !state.unknown {
                debug!(trigger_id = %trigger.id, "Trigger became unknown");
            }
            state.unknown = true;
            state.error = Some("not enough data".to_string());
            return Ok(None);
        }
        state.unknown = false;
        state.error = None;

        let next = match (state.value, problem) {
            (_, Tristate::True) => TriggerValue::Problem,
            (TriggerValue::Problem, _) => match &trigger.recovery {
                RecoveryMode::Expression => TriggerValue::Ok,
                RecoveryMode::RecoveryExpression { .. } => {
                    if recovery == Some(Tristate::True) {
                        TriggerValue::Ok
                    } else {
                        TriggerValue::Problem
                    }
                }
                RecoveryMode::None => TriggerValue::Problem,
            },
            _ => TriggerValue::Ok,
        };

        if next == state.value {
            return Ok(None);
        }

        let previous = state.value;
        let value = match (previous, next) {
            (TriggerValue::Unknown, TriggerValue::Ok) => None,
            (_, TriggerValue::Problem) => Some(EventValue::Problem),
            _ => Some(EventValue::Ok),
        };

        let event = match value {
            Some(value) => Some(self.log.append(trigger.id, clock, value, EventSource::Trigger)?),
            None => None,
        };

        state.value = next;
        state.last_change = Some(clock);
        if let Some(event) = &event {
            info!(
                trigger_id = %trigger.id,
                event_id = %event.id,
                value = %event.value,
                severity = %trigger.severity,
                "Trigger value changed"
            );
        }
        Ok(event)
    }

    /// Record an evaluation that failed for a trigger
    pub fn process_error(&self, trigger_id: TriggerId, error: &AlertingError, clock: DateTime<Utc>) {
        let mut state = self.states.entry(trigger_id).or_default();
        state.last_evaluation = Some(clock);
        state.unknown = true;
        state.error = Some(error.to_string());
    }

    /// Move a trigger in problem state to OK by manual close
    pub fn close(&self, trigger_id: TriggerId, clock: DateTime<Utc>) -> Result<Event> {
        let mut state = self.states.entry(trigger_id).or_default();
        if state.value != TriggerValue::Problem {
            return Err(AlertingError::invalid_state(format!(
                "trigger {} is not in problem state",
                trigger_id
            )));
        }

        let event = self
            .log
            .append(trigger_id, clock, EventValue::Ok, EventSource::ManualClose)?;
        state.value = TriggerValue::Ok;
        state.last_change = Some(clock);
        info!(trigger_id = %trigger_id, event_id = %event.id, "Problem closed manually");
        Ok(event)
    }

    /// Forget the state of triggers that are no longer configured
    pub fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(TriggerId) -> bool,
    {
        self.states.retain(|trigger_id, _| keep(*trigger_id));
    }
}
