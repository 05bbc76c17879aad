/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Escalation schedule with a failing notification channel

use super::{RecordingChannel, at, store};
use alerting::{AlertingConfig, AlertingService, EscalationFilter, EscalationStatus, ItemValue};
use store::{HostId, TriggerId};

const CONFIGURATION: &str = r#"
[[hosts]]
id = 1
name = "db01"

[[items]]
id = 1
host_id = 1
key = "mysql.replication.lag"

[[triggers]]
id = 1
description = "Replication lag too high"
expression = "last(/db01/mysql.replication.lag) > 300"
severity = "high"

[[actions]]
id = 1
name = "Escalate replication problems"
default_step_duration_seconds = 60

[[actions.operations]]
step_from = 1
step_to = 0
type = "notify"
channel = "pager"
recipients = [{ group = "dba" }]
subject = "{{trigger.name}} (step {{escalation.step}})"
"#;

fn service(channel: std::sync::Arc<RecordingChannel>) -> AlertingService {
    let config = AlertingConfig::from_toml(
        r#"
        [escalation.retry]
        max_attempts = 3
        initial_delay_ms = 1
        max_delay_ms = 5
        "#,
    )
    .unwrap();
    AlertingService::with_channels(config, store(CONFIGURATION), vec![channel]).unwrap()
}

#[tokio::test]
async fn test_failed_step_does_not_stall_escalation() {
    let pager = RecordingChannel::new("pager");
    let service = service(pager.clone());

    service.ingest(&[ItemValue::new("db01", "mysql.replication.lag", "900").at(at(0))], at(0));
    let pass = service.evaluate_host(HostId(1), at(0)).await.unwrap();
    assert_eq!(pass.events.len(), 1);

    let escalation = service
        .list_open_escalations(&EscalationFilter {
            trigger_id: Some(TriggerId(1)),
            ..Default::default()
        })
        .remove(0);
    assert_eq!(escalation.status, EscalationStatus::Pending);

    // Step 0 fires at creation
    assert_eq!(service.tick(at(0)).await.executed, 1);
    let current = service.escalation(escalation.id).unwrap();
    assert_eq!(current.current_step, 0);
    assert_eq!(current.next_execution, Some(at(60)));
    assert_eq!(pager.attempts(), 1);
    assert_eq!(
        pager.attempts.lock()[0].subject,
        "Replication lag too high (step 1)"
    );

    // Step 1 at t=61, every attempt fails
    pager.fail(true);
    assert_eq!(service.tick(at(61)).await.executed, 1);
    let current = service.escalation(escalation.id).unwrap();
    assert_eq!(current.current_step, 1);
    assert_eq!(current.status, EscalationStatus::Active);
    assert_eq!(pager.attempts(), 4);
    assert_eq!(current.failures.len(), 1);
    assert_eq!(current.failures[0].step, 1);
    assert_eq!(current.failures[0].attempts, 3);
    assert_eq!(current.next_execution, Some(at(121)));

    // The escalation moves on to step 2 instead of retrying step 1
    assert_eq!(service.tick(at(121)).await.executed, 1);
    let current = service.escalation(escalation.id).unwrap();
    assert_eq!(current.current_step, 2);
    assert_eq!(current.failures.len(), 2);
    assert_eq!(pager.attempts(), 7);

    // Recovery is still detected
    pager.fail(false);
    service.ingest(&[ItemValue::new("db01", "mysql.replication.lag", "4").at(at(130))], at(130));
    service.evaluate_host(HostId(1), at(130)).await.unwrap();
    assert_eq!(
        service.escalation(escalation.id).unwrap().status,
        EscalationStatus::Resolved
    );

    let metrics = service.metrics();
    assert_eq!(metrics.escalation_steps_total, 3);
    assert_eq!(metrics.notifications_failed_total, 2);
}

#[tokio::test]
async fn test_steps_never_go_backwards() {
    let pager = RecordingChannel::new("pager");
    let service = service(pager.clone());

    service.ingest(&[ItemValue::new("db01", "mysql.replication.lag", "900").at(at(0))], at(0));
    service.evaluate_host(HostId(1), at(0)).await.unwrap();
    let id = service.list_open_escalations(&EscalationFilter::default())[0].id;

    let mut last_step = None;
    for tick in [0, 30, 60, 61, 90, 120, 200, 250, 400] {
        service.tick(at(tick)).await;
        let step = service.escalation(id).unwrap().current_step;
        if let Some(last_step) = last_step {
            assert!(step >= last_step);
        }
        last_step = Some(step);
    }
    assert_eq!(last_step, Some(4));
}
