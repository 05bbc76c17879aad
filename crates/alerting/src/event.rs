/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Trigger events and the append-only event log

use crate::error::{AlertingError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use store::{ConfigSnapshot, TriggerId};
use tracing::debug;

/// Event identifier, increasing in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trigger value carried by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventValue {
    Ok,
    Problem,
}

impl fmt::Display for EventValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Problem => write!(f, "PROBLEM"),
        }
    }
}

/// What produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Trigger evaluation
    Trigger,
    /// Manual close of a problem
    ManualClose,
}

/// Acknowledgement operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckAction {
    Acknowledge,
    Unacknowledge,
    Close,
    FalsePositive,
}

/// Acknowledgement record attached to a problem event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// User performing the operation
    pub user: String,
    /// Optional comment
    pub message: Option<String>,
    /// Operation timestamp
    pub clock: DateTime<Utc>,
    /// Operation performed
    pub action: AckAction,
}

/// Trigger value change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier
    pub id: EventId,
    /// Trigger the event belongs to
    pub trigger_id: TriggerId,
    /// Event timestamp
    pub clock: DateTime<Utc>,
    /// New trigger value
    pub value: EventValue,
    /// What produced the event
    pub source: EventSource,
    /// Whether the problem is acknowledged
    pub acknowledged: bool,
    /// Whether the problem was marked false positive
    pub false_positive: bool,
    /// Acknowledgement history, oldest first
    pub acknowledgements: Vec<Acknowledgement>,
}

impl Event {
    pub fn is_problem(&self) -> bool {
        self.value == EventValue::Problem
    }
}

type TriggerEvents = Arc<Mutex<Vec<Event>>>;

/// Append-only log of trigger events
///
/// Events of a trigger are kept ordered by clock and then by identifier.
/// Each trigger has its own lock so appends for different triggers never
/// contend, and lookups never hold a map shard while a trigger lock is taken.
#[derive(Debug, Default)]
pub struct EventLog {
    triggers: DashMap<TriggerId, TriggerEvents>,
    index: DashMap<EventId, TriggerId>,
    sequence: AtomicU64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn events_of(&self, trigger_id: TriggerId) -> Option<TriggerEvents> {
        self.triggers.get(&trigger_id).map(|events| events.clone())
    }

    /// Append an event to a trigger's log
    ///
    /// Fails with [`AlertingError::EventOrder`] when `clock` is older than the
    /// newest event of the trigger.
    pub fn append(
        &self,
        trigger_id: TriggerId,
        clock: DateTime<Utc>,
        value: EventValue,
        source: EventSource,
    ) -> Result<Event> {
        let events = self.triggers.entry(trigger_id).or_default().clone();
        let mut events = events.lock();

        if let Some(newest) = events.last() {
            if newest.clock > clock {
                return Err(AlertingError::event_order(format!(
                    "event at {} for trigger {} is older than event {} at {}",
                    clock, trigger_id, newest.id, newest.clock
                )));
            }
        }

        let event = Event {
            id: EventId(self.sequence.fetch_add(1, Ordering::Relaxed) + 1),
            trigger_id,
            clock,
            value,
            source,
            acknowledged: false,
            false_positive: false,
            acknowledgements: Vec::new(),
        };
        events.push(event.clone());
        self.index.insert(event.id, trigger_id);

        debug!(event_id = %event.id, trigger_id = %trigger_id, value = %value, "Event appended");
        Ok(event)
    }

    pub fn get(&self, id: EventId) -> Option<Event> {
        let trigger_id = *self.index.get(&id)?;
        let events = self.events_of(trigger_id)?;
        let events = events.lock();
        find(&events, id).map(|position| events[position].clone())
    }

    /// Every event of a trigger, oldest first
    pub fn events_for_trigger(&self, trigger_id: TriggerId) -> Vec<Event> {
        self.events_of(trigger_id)
            .map(|events| events.lock().clone())
            .unwrap_or_default()
    }

    /// Newest event of a trigger
    pub fn latest(&self, trigger_id: TriggerId) -> Option<Event> {
        self.events_of(trigger_id)
            .and_then(|events| events.lock().last().cloned())
    }

    /// Whether `id` is the newest event of its trigger
    pub fn is_latest(&self, id: EventId) -> bool {
        self.index
            .get(&id)
            .map(|trigger_id| *trigger_id)
            .and_then(|trigger_id| self.latest(trigger_id))
            .is_some_and(|event| event.id == id)
    }

    /// Total number of events
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The problem a trigger is currently in
    pub fn current_problem(&self, trigger_id: TriggerId) -> Option<Event> {
        self.current_problem_at(trigger_id, DateTime::<Utc>::MAX_UTC)
    }

    /// A trigger that `trigger_id` depends on and that is currently in problem
    ///
    /// Masters that are disabled or lost their item or host do not count.
    pub fn master_in_problem(&self, snapshot: &ConfigSnapshot, trigger_id: TriggerId) -> Option<TriggerId> {
        snapshot
            .masters(trigger_id)
            .iter()
            .copied()
            .find(|master| snapshot.is_trigger_active(*master) && self.current_problem(*master).is_some())
    }

    /// The problem a trigger was in at `at`
    ///
    /// Looks at the newest event with a clock not after `at`. When it is a
    /// problem, walks back through the contiguous run of problem events and
    /// returns the earliest one. Returns `None` when the newest event is OK,
    /// when it was marked false positive, or when no event precedes `at`.
    pub fn current_problem_at(&self, trigger_id: TriggerId, at: DateTime<Utc>) -> Option<Event> {
        let events = self.events_of(trigger_id)?;
        let events = events.lock();

        let upto = events.partition_point(|event| event.clock <= at);
        let newest = events[..upto].last()?;
        if !newest.is_problem() || newest.false_positive {
            return None;
        }

        events[..upto]
            .iter()
            .rev()
            .take_while(|event| event.is_problem())
            .last()
            .cloned()
    }

    /// Apply `update` to an event under its trigger lock
    pub fn update<F, R>(&self, id: EventId, update: F) -> Result<R>
    where
        F: FnOnce(&mut Event) -> Result<R>,
    {
        let trigger_id = self
            .index
            .get(&id)
            .map(|trigger_id| *trigger_id)
            .ok_or_else(|| AlertingError::not_found(format!("event {}", id)))?;
        let events = self
            .events_of(trigger_id)
            .ok_or_else(|| AlertingError::not_found(format!("event {}", id)))?;
        let mut events = events.lock();
        let position = find(&events, id).ok_or_else(|| AlertingError::not_found(format!("event {}", id)))?;
        update(&mut events[position])
    }

    /// Record an acknowledgement operation on a problem event
    pub fn acknowledge(&self, id: EventId, ack: Acknowledgement) -> Result<Event> {
        self.update(id, |event| {
            if !event.is_problem() {
                return Err(AlertingError::invalid_state(format!(
                    "event {} is not a problem event",
                    event.id
                )));
            }
            match ack.action {
                AckAction::Acknowledge => event.acknowledged = true,
                AckAction::Unacknowledge => event.acknowledged = false,
                AckAction::Close | AckAction::FalsePositive => {}
            }
            event.acknowledgements.push(ack);
            Ok(event.clone())
        })
    }

    /// Flag a problem event as false positive
    pub fn mark_false_positive(&self, id: EventId, ack: Acknowledgement) -> Result<Event> {
        self.update(id, |event| {
            if !event.is_problem() {
                return Err(AlertingError::invalid_state(format!(
                    "event {} is not a problem event",
                    event.id
                )));
            }
            if event.false_positive {
                return Err(AlertingError::invalid_state(format!(
                    "event {} is already marked false positive",
                    event.id
                )));
            }
            event.false_positive = true;
            event.acknowledgements.push(ack);
            Ok(event.clone())
        })
    }
}

// Events are sorted by clock and identifiers are assigned under the trigger
// lock, so identifiers are sorted too.
fn find(events: &[Event], id: EventId) -> Option<usize> {
    events.binary_search_by_key(&id, |event| event.id).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn append(log: &EventLog, clock: i64, value: EventValue) -> Event {
        log.append(TriggerId(1), at(clock), value, EventSource::Trigger).unwrap()
    }

    fn ack(action: AckAction) -> Acknowledgement {
        Acknowledgement {
            user: "admin".to_string(),
            message: None,
            clock: at(1000),
            action,
        }
    }

    #[test]
    fn test_current_problem_walks_back_through_run() {
        let log = EventLog::new();
        append(&log, 10, EventValue::Problem);
        append(&log, 20, EventValue::Problem);
        append(&log, 30, EventValue::Ok);

        assert_eq!(log.current_problem_at(TriggerId(1), at(25)).unwrap().clock, at(10));
        assert!(log.current_problem_at(TriggerId(1), at(35)).is_none());
        assert!(log.current_problem_at(TriggerId(1), at(5)).is_none());
        assert!(log.current_problem(TriggerId(1)).is_none());
    }

    #[test]
    fn test_current_problem_after_recovery() {
        let log = EventLog::new();
        append(&log, 10, EventValue::Problem);
        append(&log, 20, EventValue::Ok);
        let second = append(&log, 30, EventValue::Problem);

        assert_eq!(log.current_problem(TriggerId(1)).unwrap().id, second.id);
        assert!(log.current_problem(TriggerId(2)).is_none());
    }

    #[test]
    fn test_false_positive_hides_problem() {
        let log = EventLog::new();
        let problem = append(&log, 10, EventValue::Problem);

        log.mark_false_positive(problem.id, ack(AckAction::FalsePositive)).unwrap();
        assert!(log.current_problem(TriggerId(1)).is_none());
        assert!(log.mark_false_positive(problem.id, ack(AckAction::FalsePositive)).is_err());
    }

    #[test]
    fn test_out_of_order_append_rejected() {
        let log = EventLog::new();
        append(&log, 20, EventValue::Problem);

        let err = log
            .append(TriggerId(1), at(10), EventValue::Ok, EventSource::Trigger)
            .unwrap_err();
        assert!(matches!(err, AlertingError::EventOrder(_)));
        assert_eq!(log.len(), 1);

        // Same clock is accepted and ordered by identifier
        let ok = append(&log, 20, EventValue::Ok);
        assert!(log.is_latest(ok.id));
    }

    #[test]
    fn test_acknowledge_and_unacknowledge() {
        let log = EventLog::new();
        let problem = append(&log, 10, EventValue::Problem);
        let ok = append(&log, 20, EventValue::Ok);

        let event = log.acknowledge(problem.id, ack(AckAction::Acknowledge)).unwrap();
        assert!(event.acknowledged);
        let event = log.acknowledge(problem.id, ack(AckAction::Unacknowledge)).unwrap();
        assert!(!event.acknowledged);
        assert_eq!(log.get(problem.id).unwrap().acknowledgements.len(), 2);

        assert!(matches!(
            log.acknowledge(ok.id, ack(AckAction::Acknowledge)),
            Err(AlertingError::InvalidState(_))
        ));
        assert!(matches!(
            log.acknowledge(EventId(99), ack(AckAction::Acknowledge)),
            Err(AlertingError::NotFound(_))
        ));
    }

    #[test]
    fn test_identifiers_increase_across_triggers() {
        let log = EventLog::new();
        let first = append(&log, 10, EventValue::Problem);
        let second = log
            .append(TriggerId(2), at(5), EventValue::Problem, EventSource::Trigger)
            .unwrap();
        assert!(second.id > first.id);
        assert_eq!(log.events_for_trigger(TriggerId(2)).len(), 1);
    }
}
