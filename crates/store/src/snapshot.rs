/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Immutable, versioned configuration snapshots

use crate::error::{Result, StoreError};
use crate::model::{Action, ActionId, Host, HostId, Item, RecoveryMode, Trigger, TriggerId};
use ahash::AHashMap;
use expression::{ItemId, ItemRef};
use serde::{Deserialize, Serialize};

/// Editable configuration, the source every snapshot is built from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub hosts: Vec<Host>,
    pub items: Vec<Item>,
    pub triggers: Vec<Trigger>,
    pub actions: Vec<Action>,
}

/// Point-in-time view of the configuration
///
/// Snapshots are validated when built and never change afterwards: every
/// trigger item reference is resolved, every item belongs to a known host
/// and every action has well formed step ranges.
#[derive(Debug, Default)]
pub struct ConfigSnapshot {
    version: u64,
    hosts: AHashMap<HostId, Host>,
    items: AHashMap<ItemId, Item>,
    triggers: AHashMap<TriggerId, Trigger>,
    actions: Vec<Action>,
    items_by_key: AHashMap<(String, String), ItemId>,
    triggers_by_item: AHashMap<ItemId, Vec<TriggerId>>,
    triggers_by_host: AHashMap<HostId, Vec<TriggerId>>,
    owner_hosts: AHashMap<TriggerId, HostId>,
    masters: AHashMap<TriggerId, Vec<TriggerId>>,
}

impl ConfigSnapshot {
    /// Validate a configuration and build a snapshot from it
    pub fn build(configuration: &Configuration, version: u64) -> Result<Self> {
        let mut snapshot = ConfigSnapshot {
            version,
            ..Default::default()
        };

        for host in &configuration.hosts {
            if snapshot.hosts.values().any(|h| h.name == host.name) {
                return Err(StoreError::validation(format!("duplicate host name {}", host.name)));
            }
            if snapshot.hosts.insert(host.id, host.clone()).is_some() {
                return Err(StoreError::validation(format!("duplicate host {}", host.id)));
            }
        }

        for item in &configuration.items {
            let host = snapshot.hosts.get(&item.host_id).ok_or_else(|| {
                StoreError::validation(format!("item {} references unknown host {}", item.id, item.host_id))
            })?;
            if snapshot
                .items_by_key
                .insert((host.name.clone(), item.key.clone()), item.id)
                .is_some()
            {
                return Err(StoreError::validation(format!(
                    "duplicate item key {} on host {}",
                    item.key, host.name
                )));
            }
            if snapshot.items.insert(item.id, item.clone()).is_some() {
                return Err(StoreError::validation(format!("duplicate item {}", item.id)));
            }
        }

        for trigger in &configuration.triggers {
            let id = trigger.id;
            if snapshot.triggers.contains_key(&id) {
                return Err(StoreError::validation(format!("duplicate trigger {}", id)));
            }

            let mut trigger = trigger.clone();
            let lookup = |item: &ItemRef| {
                snapshot
                    .items_by_key
                    .get(&(item.host.clone(), item.key.clone()))
                    .copied()
            };
            trigger
                .expression
                .resolve(lookup)
                .map_err(|err| StoreError::validation(format!("trigger {}: {}", id, err)))?;
            if let RecoveryMode::RecoveryExpression { expression } = &mut trigger.recovery {
                expression
                    .resolve(lookup)
                    .map_err(|err| StoreError::validation(format!("trigger {} recovery: {}", id, err)))?;
            }

            let item_ids = trigger.item_ids();
            let owner = item_ids
                .first()
                .and_then(|item_id| snapshot.items.get(item_id))
                .map(|item| item.host_id)
                .ok_or_else(|| StoreError::validation(format!("trigger {} does not reference any item", id)))?;

            for item_id in item_ids {
                snapshot.triggers_by_item.entry(item_id).or_default().push(id);
            }
            snapshot.triggers_by_host.entry(owner).or_default().push(id);
            snapshot.owner_hosts.insert(id, owner);
            snapshot.triggers.insert(id, trigger);
        }

        for trigger in snapshot.triggers.values() {
            if let Some(master) = trigger
                .dependencies
                .iter()
                .find(|master| !snapshot.triggers.contains_key(master))
            {
                return Err(StoreError::validation(format!(
                    "trigger {} depends on unknown trigger {}",
                    trigger.id, master
                )));
            }
        }
        let dependent: Vec<TriggerId> = snapshot
            .triggers
            .values()
            .filter(|trigger| !trigger.dependencies.is_empty())
            .map(|trigger| trigger.id)
            .collect();
        for id in dependent {
            let masters = snapshot.collect_masters(id)?;
            snapshot.masters.insert(id, masters);
        }

        for action in &configuration.actions {
            action.validate()?;
            if snapshot.actions.iter().any(|a| a.id == action.id) {
                return Err(StoreError::validation(format!("duplicate action {}", action.id)));
            }
            snapshot.actions.push(action.clone());
        }
        snapshot.actions.sort_by_key(|action| action.id);

        for triggers in snapshot.triggers_by_host.values_mut() {
            triggers.sort();
        }
        for triggers in snapshot.triggers_by_item.values_mut() {
            triggers.sort();
        }

        Ok(snapshot)
    }

    /// Snapshot version, increasing with every published update
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn host(&self, id: HostId) -> Option<&Host> {
        self.hosts.get(&id)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    /// Item by host name and key
    pub fn item_by_key(&self, host: &str, key: &str) -> Option<&Item> {
        self.items_by_key
            .get(&(host.to_string(), key.to_string()))
            .and_then(|id| self.items.get(id))
    }

    pub fn trigger(&self, id: TriggerId) -> Option<&Trigger> {
        self.triggers.get(&id)
    }

    pub fn triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.values()
    }

    pub fn action(&self, id: ActionId) -> Option<&Action> {
        self.actions.iter().find(|action| action.id == id)
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Items referenced by a trigger's problem and recovery expressions
    pub fn items_for_trigger(&self, id: TriggerId) -> Vec<&Item> {
        self.trigger(id)
            .map(|trigger| {
                trigger
                    .item_ids()
                    .into_iter()
                    .filter_map(|item_id| self.items.get(&item_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Enabled actions whose conditions match the trigger
    pub fn actions_matching(&self, trigger: &Trigger) -> Vec<&Action> {
        let Some(host) = self.host_of_trigger(trigger.id) else {
            return Vec::new();
        };
        self.actions
            .iter()
            .filter(|action| action.enabled && action.matches(trigger, host))
            .collect()
    }

    /// Triggers referencing an item
    pub fn triggers_for_item(&self, id: ItemId) -> &[TriggerId] {
        self.triggers_by_item.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Triggers owned by a host
    pub fn triggers_for_host(&self, id: HostId) -> &[TriggerId] {
        self.triggers_by_host.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Owner host of a trigger: the host of the first item it references
    pub fn host_of_trigger(&self, id: TriggerId) -> Option<&Host> {
        self.owner_hosts.get(&id).and_then(|host_id| self.hosts.get(host_id))
    }

    /// Owner host identifier of a trigger
    pub fn owner_host_id(&self, id: TriggerId) -> Option<HostId> {
        self.owner_hosts.get(&id).copied()
    }

    /// Check that a trigger and everything it references is present
    pub fn ensure_consistent(&self, id: TriggerId) -> Result<&Trigger> {
        let trigger = self
            .trigger(id)
            .ok_or_else(|| StoreError::inconsistent(format!("trigger {} missing from snapshot {}", id, self.version)))?;
        for item_id in trigger.item_ids() {
            let item = self.items.get(&item_id).ok_or_else(|| {
                StoreError::inconsistent(format!(
                    "trigger {} references item {} missing from snapshot {}",
                    id, item_id, self.version
                ))
            })?;
            if !self.hosts.contains_key(&item.host_id) {
                return Err(StoreError::inconsistent(format!(
                    "item {} references host {} missing from snapshot {}",
                    item_id, item.host_id, self.version
                )));
            }
        }
        Ok(trigger)
    }

    /// Whether the trigger, its items and their hosts are all enabled
    pub fn is_trigger_active(&self, id: TriggerId) -> bool {
        self.inactive_reason(id).is_none()
    }

    /// Why a trigger is not evaluated, `None` when it is active
    pub fn inactive_reason(&self, id: TriggerId) -> Option<&'static str> {
        let Some(trigger) = self.trigger(id) else {
            return Some("trigger deleted");
        };
        if !trigger.enabled {
            return Some("trigger disabled");
        }
        for item_id in trigger.item_ids() {
            let Some(item) = self.items.get(&item_id) else {
                return Some("item deleted");
            };
            if !item.enabled {
                return Some("item disabled");
            }
            match self.hosts.get(&item.host_id) {
                None => return Some("host deleted"),
                Some(host) if !host.enabled => return Some("host disabled"),
                Some(_) => {}
            }
        }
        None
    }

    /// Every trigger `id` depends on, directly or through other triggers
    pub fn masters(&self, id: TriggerId) -> &[TriggerId] {
        self.masters.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn collect_masters(&self, id: TriggerId) -> Result<Vec<TriggerId>> {
        let mut masters = Vec::new();
        let mut pending = self
            .triggers
            .get(&id)
            .map(|trigger| trigger.dependencies.clone())
            .unwrap_or_default();
        while let Some(master) = pending.pop() {
            if master == id {
                return Err(StoreError::validation(format!("trigger {} depends on itself", id)));
            }
            if masters.contains(&master) {
                continue;
            }
            masters.push(master);
            if let Some(trigger) = self.triggers.get(&master) {
                pending.extend(trigger.dependencies.iter().copied());
            }
        }
        masters.sort();
        Ok(masters)
    }
}
