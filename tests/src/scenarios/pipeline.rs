/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Values flowing from ingestion through evaluation to events

use super::{RecordingChannel, at, store};
use alerting::{AlertingConfig, AlertingService, EventValue, ItemValue, TriggerValue};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use store::{HostId, TriggerId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use trapper::codec::{HEADER_LEN, frame};
use trapper::{SenderResponse, TrapperConfig, TrapperServer};

const CONFIGURATION: &str = r#"
[[hosts]]
id = 1
name = "app01"

[[items]]
id = 1
host_id = 1
key = "vfs.fs.used"

[[items]]
id = 2
host_id = 1
key = "proc.num"

[[triggers]]
id = 1
description = "Disk almost full"
expression = "last(/app01/vfs.fs.used) > 90"
severity = "warning"
recovery = { mode = "recovery_expression", expression = "last(/app01/vfs.fs.used) < 80" }

[[triggers]]
id = 2
description = "Too many processes"
expression = "last(/app01/proc.num) > 500"
severity = "average"

[[actions]]
id = 1
name = "Notify operators"
default_step_duration_seconds = 300

[[actions.operations]]
step_from = 1
step_to = 1
type = "notify"
channel = "ops"
recipients = [{ group = "operators" }]
"#;

fn service(channel: Arc<RecordingChannel>) -> AlertingService {
    AlertingService::with_channels(AlertingConfig::default(), store(CONFIGURATION), vec![channel]).unwrap()
}

async fn push(service: &AlertingService, key: &str, value: &str, clock: i64) -> Vec<EventValue> {
    let summary = service.ingest(&[ItemValue::new("app01", key, value).at(at(clock))], at(clock));
    assert_eq!(summary.processed, 1);
    let pass = service.evaluate_host(HostId(1), at(clock)).await.unwrap();
    for recovery in pass.recoveries {
        recovery.await.unwrap();
    }
    pass.events.into_iter().map(|event| event.value).collect()
}

#[tokio::test]
async fn test_reevaluation_without_new_data_is_silent() {
    let service = service(RecordingChannel::new("ops"));

    assert_eq!(push(&service, "proc.num", "800", 0).await, vec![EventValue::Problem]);

    for clock in [1, 2, 3] {
        let pass = service.evaluate_host(HostId(1), at(clock)).await.unwrap();
        assert!(pass.events.is_empty());
    }
    assert_eq!(service.events_for_trigger(TriggerId(2)).len(), 1);
    assert_eq!(service.list_open_escalations(&Default::default()).len(), 1);
}

#[tokio::test]
async fn test_recovery_expression_hysteresis() {
    let service = service(RecordingChannel::new("ops"));

    assert_eq!(push(&service, "vfs.fs.used", "95", 0).await, vec![EventValue::Problem]);

    // Below the problem threshold but above the recovery threshold
    assert!(push(&service, "vfs.fs.used", "85", 10).await.is_empty());
    assert_eq!(
        service.trigger_status(TriggerId(1)).unwrap().value,
        TriggerValue::Problem
    );

    assert_eq!(push(&service, "vfs.fs.used", "70", 20).await, vec![EventValue::Ok]);
    assert!(service.get_current_problem(TriggerId(1)).is_none());

    // Back over the problem threshold opens a new run
    assert_eq!(push(&service, "vfs.fs.used", "99", 30).await, vec![EventValue::Problem]);
    let problem = service.get_current_problem(TriggerId(1)).unwrap();
    assert_eq!(problem.clock, at(30));
}

#[tokio::test]
async fn test_single_step_action_runs_once() {
    let ops = RecordingChannel::new("ops");
    let service = service(ops.clone());

    push(&service, "proc.num", "900", 0).await;
    for clock in [0, 300, 600, 900] {
        service.tick(at(clock)).await;
    }

    assert_eq!(ops.attempts(), 1);
    let escalation = service.list_open_escalations(&Default::default()).remove(0);
    assert_eq!(escalation.current_step, 0);
    assert_eq!(escalation.next_execution, None);
}

#[tokio::test]
async fn test_background_workers_pick_up_values() {
    let service = service(RecordingChannel::new("ops"));
    service.start().unwrap();

    service.ingest(&[ItemValue::new("app01", "proc.num", "1200").at(Utc::now())], Utc::now());

    let problem = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(problem) = service.get_current_problem(TriggerId(2)) {
                break problem;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("trigger was not evaluated");
    assert_eq!(problem.value, EventValue::Problem);

    service.stop().await.unwrap();
    assert!(!service.is_running());
}

#[tokio::test]
async fn test_trapper_values_raise_problem() {
    let service = service(RecordingChannel::new("ops"));
    service.start().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = CancellationToken::new();
    let server = Arc::new(TrapperServer::new(TrapperConfig::default(), service.clone()));
    let serving = tokio::spawn(server.serve(listener, token.clone()));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&frame(
            br#"{"request":"sender data","data":[{"host":"app01","key":"vfs.fs.used","value":"97"}]}"#,
        ))
        .await
        .unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    let response: SenderResponse = serde_json::from_slice(&reply[HEADER_LEN..]).unwrap();
    assert!(response.info.starts_with("processed: 1; failed: 0; total: 1;"));

    tokio::time::timeout(Duration::from_secs(5), async {
        while service.get_current_problem(TriggerId(1)).is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("trapper value did not raise a problem");

    token.cancel();
    serving.await.unwrap();
    service.stop().await.unwrap();
}
