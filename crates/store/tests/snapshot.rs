/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Snapshot building, validation and lookups

use store::{
    ActionId, Configuration, EscalationOperation, HostId, ItemId, Recipient, RecoveryMode, Severity,
    SnapshotStore, StoreError, TriggerId,
};

const SEED: &str = r#"
[[hosts]]
id = 1
name = "web01"

[[hosts]]
id = 2
name = "db01"

[[items]]
id = 11
host_id = 1
key = "system.cpu.load[all,avg1]"

[[items]]
id = 12
host_id = 1
key = "agent.ping"

[[items]]
id = 21
host_id = 2
key = "mysql.status"
value_type = "text"

[[triggers]]
id = 100
description = "High CPU load on web01"
expression = "avg(/web01/system.cpu.load[all,avg1],5m) > 5"
severity = "high"

[[triggers]]
id = 101
description = "Database down while web01 is up"
expression = "last(/db01/mysql.status) = \"down\" and nodata(/web01/agent.ping,3m) = 0"
severity = "disaster"
manual_close = true
recovery = { mode = "recovery_expression", expression = "last(/db01/mysql.status) = \"up\"" }

[[actions]]
id = 1
name = "Page on-call for severe problems"
default_step_duration_seconds = 600
pause_on_acknowledge = true

[[actions.conditions]]
type = "severity"
operator = "greater_or_equal"
severity = "high"

[[actions.operations]]
step_from = 1
step_to = 2
type = "notify"
channel = "webhook"
recipients = [{ group = "oncall" }]

[[actions.operations]]
step_from = 3
step_to = 0
step_duration_seconds = 1800
type = "run_command"
channel = "scripts"
command = "/usr/local/bin/page"
args = ["--loud"]

[[actions]]
id = 2
name = "Database team"

[[actions.conditions]]
type = "host_name"
operator = "like"
pattern = "db"
"#;

fn seeded() -> SnapshotStore {
    let configuration: Configuration = toml::from_str(SEED).unwrap();
    SnapshotStore::with_configuration(configuration).unwrap()
}

#[test]
fn test_seed_lookups() {
    let store = seeded();
    let snapshot = store.load();
    assert_eq!(snapshot.version(), 1);

    let cpu = snapshot.trigger(TriggerId(100)).unwrap();
    assert_eq!(cpu.severity, Severity::High);
    assert_eq!(cpu.expression.item_ids(), vec![ItemId(11)]);
    assert_eq!(snapshot.items_for_trigger(TriggerId(100)).len(), 1);

    // Owner host is the host of the first referenced item
    let db = snapshot.trigger(TriggerId(101)).unwrap();
    assert_eq!(snapshot.host_of_trigger(db.id).unwrap().name, "db01");
    assert_eq!(snapshot.triggers_for_host(HostId(2)), &[TriggerId(101)]);
    assert_eq!(snapshot.triggers_for_host(HostId(1)), &[TriggerId(100)]);
    assert_eq!(snapshot.triggers_for_item(ItemId(12)), &[TriggerId(101)]);
    assert!(matches!(db.recovery, RecoveryMode::RecoveryExpression { .. }));
    assert_eq!(snapshot.items_for_trigger(TriggerId(101)).len(), 2);

    let actions: Vec<ActionId> = snapshot.actions_matching(cpu).iter().map(|a| a.id).collect();
    assert_eq!(actions, vec![ActionId(1)]);
    let actions: Vec<ActionId> = snapshot.actions_matching(db).iter().map(|a| a.id).collect();
    assert_eq!(actions, vec![ActionId(1), ActionId(2)]);

    let page = snapshot.action(ActionId(1)).unwrap();
    assert_eq!(page.step_duration(0), 600);
    assert_eq!(page.step_duration(2), 1800);
    match &page.operations[0].operation {
        EscalationOperation::Notify { recipients, .. } => {
            assert_eq!(recipients, &vec![Recipient::Group("oncall".to_string())]);
        }
        other => panic!("unexpected operation {:?}", other),
    }
    assert!(snapshot.ensure_consistent(TriggerId(101)).is_ok());
    assert!(snapshot.is_trigger_active(TriggerId(101)));
}

#[test]
fn test_unknown_item_reference_rejected() {
    let store = seeded();
    let err = store
        .update(|draft| draft.triggers[0].expression = "last(/web01/missing) > 1".parse().unwrap())
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert_eq!(store.version(), 1);
}

#[test]
fn test_item_deletion_requires_trigger_update() {
    let store = seeded();

    // Removing an item still used by a trigger is rejected
    assert!(store.update(|draft| draft.items.retain(|item| item.id != ItemId(11))).is_err());

    let version = store
        .update(|draft| {
            draft.items.retain(|item| item.id != ItemId(11));
            draft.triggers.retain(|trigger| trigger.id != TriggerId(100));
        })
        .unwrap();
    assert_eq!(version, 2);

    let snapshot = store.load();
    assert!(snapshot.trigger(TriggerId(100)).is_none());
    assert!(snapshot.ensure_consistent(TriggerId(100)).is_err());
}

#[test]
fn test_invalid_step_range_rejected() {
    let store = seeded();
    let err = store
        .update(|draft| draft.actions[0].operations[0].step_from = 0)
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn test_disabled_host_deactivates_trigger() {
    let store = seeded();
    store.update(|draft| draft.hosts[0].enabled = false).unwrap();

    let snapshot = store.load();
    assert!(!snapshot.is_trigger_active(TriggerId(100)));
    // Trigger 101 also reads agent.ping on web01
    assert!(!snapshot.is_trigger_active(TriggerId(101)));
}

#[test]
fn test_inactive_reason() {
    let store = seeded();
    let snapshot = store.load();
    assert_eq!(snapshot.inactive_reason(TriggerId(100)), None);
    assert_eq!(snapshot.inactive_reason(TriggerId(999)), Some("trigger deleted"));

    store.update(|draft| draft.items[1].enabled = false).unwrap();
    assert_eq!(store.load().inactive_reason(TriggerId(101)), Some("item disabled"));

    store
        .update(|draft| {
            draft.items[1].enabled = true;
            draft.hosts[1].enabled = false;
        })
        .unwrap();
    let snapshot = store.load();
    assert_eq!(snapshot.inactive_reason(TriggerId(101)), Some("host disabled"));
    assert_eq!(snapshot.inactive_reason(TriggerId(100)), None);
}

#[test]
fn test_trigger_dependencies() {
    let store = seeded();
    store
        .update(|draft| {
            let mut ping = draft.triggers[0].clone();
            ping.id = TriggerId(102);
            ping.description = "web01 unreachable".to_string();
            ping.expression = "nodata(/web01/agent.ping,5m) = 1".parse().unwrap();
            draft.triggers.push(ping);
            draft.triggers[0].dependencies = vec![TriggerId(102)];
            draft.triggers[1].dependencies = vec![TriggerId(100)];
        })
        .unwrap();

    let snapshot = store.load();
    assert_eq!(snapshot.masters(TriggerId(100)), &[TriggerId(102)]);
    // Masters of masters count too
    assert_eq!(snapshot.masters(TriggerId(101)), &[TriggerId(100), TriggerId(102)]);
    assert!(snapshot.masters(TriggerId(102)).is_empty());

    // Cycles and unknown triggers are rejected
    let err = store
        .update(|draft| draft.triggers[2].dependencies = vec![TriggerId(101)])
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    let err = store
        .update(|draft| draft.triggers[2].dependencies = vec![TriggerId(999)])
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert_eq!(store.version(), 2);
}

#[test]
fn test_step_duration_limit() {
    let store = seeded();
    let err = store
        .update(|draft| draft.actions[0].default_step_duration_seconds = u64::MAX)
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    let err = store
        .update(|draft| draft.actions[0].operations[1].step_duration_seconds = Some(u64::MAX))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert_eq!(store.version(), 1);
}
