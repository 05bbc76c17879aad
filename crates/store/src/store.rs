/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Copy-on-write publication of configuration snapshots

use crate::error::Result;
use crate::snapshot::{ConfigSnapshot, Configuration};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Holder of the current configuration snapshot
///
/// Readers call [`SnapshotStore::load`] once per pass and keep the returned
/// `Arc` for the whole pass. Writers go through [`SnapshotStore::update`],
/// which validates the edited draft and swaps the published pointer only
/// when the draft is valid.
#[derive(Debug)]
pub struct SnapshotStore {
    current: ArcSwap<ConfigSnapshot>,
    draft: Mutex<Configuration>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self {
            current: ArcSwap::from_pointee(ConfigSnapshot::default()),
            draft: Mutex::new(Configuration::default()),
        }
    }
}

impl SnapshotStore {
    /// Create an empty store at version 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store publishing `configuration` as version 1
    pub fn with_configuration(configuration: Configuration) -> Result<Self> {
        let store = Self::new();
        store.update(|draft| *draft = configuration)?;
        Ok(store)
    }

    /// Current snapshot
    pub fn load(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    /// Current snapshot version
    pub fn version(&self) -> u64 {
        self.current.load().version()
    }

    /// Copy of the configuration behind the current snapshot
    pub fn configuration(&self) -> Configuration {
        self.draft.lock().clone()
    }

    /// Edit the configuration and publish it as a new snapshot
    ///
    /// Returns the new version. An invalid draft is rejected and the
    /// current snapshot stays published.
    pub fn update<F>(&self, edit: F) -> Result<u64>
    where
        F: FnOnce(&mut Configuration),
    {
        let mut source = self.draft.lock();
        let mut draft = source.clone();
        edit(&mut draft);

        let version = self.current.load().version() + 1;
        let snapshot = match ConfigSnapshot::build(&draft, version) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(version, error = %err, "Rejected configuration update");
                return Err(err);
            }
        };

        debug!(
            version,
            hosts = draft.hosts.len(),
            items = draft.items.len(),
            triggers = draft.triggers.len(),
            actions = draft.actions.len(),
            "Publishing configuration snapshot"
        );

        *source = draft;
        self.current.store(Arc::new(snapshot));
        info!(version, "Configuration snapshot published");
        Ok(version)
    }
}
