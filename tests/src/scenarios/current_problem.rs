/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Current problem lookup over the event log

use super::at;
use alerting::{AckAction, Acknowledgement, EventLog, EventSource, EventValue};
use store::TriggerId;

const TRIGGER: TriggerId = TriggerId(7);

#[test]
fn test_earliest_event_of_problem_run() {
    let log = EventLog::new();
    let first = log
        .append(TRIGGER, at(10), EventValue::Problem, EventSource::Trigger)
        .unwrap();
    let second = log
        .append(TRIGGER, at(20), EventValue::Problem, EventSource::Trigger)
        .unwrap();
    assert!(!second.false_positive);
    log.append(TRIGGER, at(30), EventValue::Ok, EventSource::Trigger)
        .unwrap();

    assert!(log.current_problem_at(TRIGGER, at(5)).is_none());
    assert_eq!(log.current_problem_at(TRIGGER, at(10)).unwrap().id, first.id);
    assert_eq!(log.current_problem_at(TRIGGER, at(25)).unwrap().id, first.id);
    assert!(log.current_problem_at(TRIGGER, at(30)).is_none());
    assert!(log.current_problem(TRIGGER).is_none());
}

#[test]
fn test_run_restarts_after_recovery() {
    let log = EventLog::new();
    log.append(TRIGGER, at(10), EventValue::Problem, EventSource::Trigger)
        .unwrap();
    log.append(TRIGGER, at(20), EventValue::Ok, EventSource::Trigger)
        .unwrap();
    let reopened = log
        .append(TRIGGER, at(40), EventValue::Problem, EventSource::Trigger)
        .unwrap();
    log.append(TRIGGER, at(50), EventValue::Problem, EventSource::Trigger)
        .unwrap();

    assert_eq!(log.current_problem(TRIGGER).unwrap().id, reopened.id);
}

#[test]
fn test_same_clock_ordered_by_id() {
    let log = EventLog::new();
    log.append(TRIGGER, at(10), EventValue::Problem, EventSource::Trigger)
        .unwrap();
    log.append(TRIGGER, at(10), EventValue::Ok, EventSource::Trigger)
        .unwrap();
    let last = log
        .append(TRIGGER, at(10), EventValue::Problem, EventSource::Trigger)
        .unwrap();

    // Only the problem appended after the OK event belongs to the run
    assert_eq!(log.current_problem(TRIGGER).unwrap().id, last.id);

    // Older clocks are rejected
    assert!(log
        .append(TRIGGER, at(9), EventValue::Ok, EventSource::Trigger)
        .is_err());
}

#[test]
fn test_false_positive_hides_problem() {
    let log = EventLog::new();
    log.append(TRIGGER, at(10), EventValue::Problem, EventSource::Trigger)
        .unwrap();
    let latest = log
        .append(TRIGGER, at(20), EventValue::Problem, EventSource::Trigger)
        .unwrap();

    log.mark_false_positive(
        latest.id,
        Acknowledgement {
            user: "admin".to_string(),
            message: None,
            clock: at(25),
            action: AckAction::FalsePositive,
        },
    )
    .unwrap();

    assert!(log.current_problem(TRIGGER).is_none());
    assert!(log.get(latest.id).unwrap().false_positive);
}
