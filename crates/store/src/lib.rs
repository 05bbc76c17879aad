/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! # Configuration Store
//!
//! Read-only, point-in-time consistent views of hosts, items, triggers and
//! actions, plus the in-memory history of received item values.

pub mod error;
pub mod history;
pub mod model;
pub mod snapshot;
pub mod store;

pub use error::{Result, StoreError};
pub use history::HistoryCache;
pub use model::{
    Action, ActionId, Condition, ConditionKind, ConditionOperator, EscalationOperation, EvaluationType, Host,
    HostId, Item, MAX_STEP_DURATION_SECONDS, Operation, Recipient, RecoveryMode, Severity, Trigger, TriggerId,
    ValueType,
};
pub use snapshot::{ConfigSnapshot, Configuration};
pub use store::SnapshotStore;

pub use expression::ItemId;
