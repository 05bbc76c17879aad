/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! In-memory item value history

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use expression::{HistorySource, ItemId, Sample, Window};
use std::collections::VecDeque;

/// Default number of values kept per item
pub const DEFAULT_MAX_VALUES: usize = 1024;

/// Default age of the oldest value kept per item
pub const DEFAULT_MAX_AGE_SECONDS: u64 = 86_400;

const MAX_AGE_LIMIT_SECONDS: u64 = 100 * 365 * 86_400;

/// Bounded per-item history, newest value first
#[derive(Debug)]
pub struct HistoryCache {
    values: DashMap<ItemId, VecDeque<Sample>>,
    max_values: usize,
    max_age: Duration,
}

impl Default for HistoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VALUES, DEFAULT_MAX_AGE_SECONDS)
    }
}

impl HistoryCache {
    pub fn new(max_values: usize, max_age_seconds: u64) -> Self {
        Self {
            values: DashMap::new(),
            max_values: max_values.max(1),
            max_age: Duration::seconds(max_age_seconds.min(MAX_AGE_LIMIT_SECONDS) as i64),
        }
    }

    /// Store a value received at `now`, keeping the per-item history ordered by clock
    ///
    /// Age retention counts back from the newest value, but never from a
    /// clock later than `now`: a value stamped in the future cannot push the
    /// rest of the history out.
    pub fn insert(&self, item_id: ItemId, sample: Sample, now: DateTime<Utc>) {
        let mut values = self.values.entry(item_id).or_default();

        // Out of order values are placed after every value with the same or a newer clock
        let position = values
            .iter()
            .position(|existing| existing.clock < sample.clock)
            .unwrap_or(values.len());
        values.insert(position, sample);

        values.truncate(self.max_values);
        if let Some(newest) = values.front().map(|sample| sample.clock.min(now)) {
            let oldest_allowed = newest.checked_sub_signed(self.max_age).unwrap_or(DateTime::<Utc>::MIN_UTC);
            while values.back().is_some_and(|sample| sample.clock < oldest_allowed) {
                values.pop_back();
            }
        }
    }

    /// Newest value of an item
    pub fn latest(&self, item_id: ItemId) -> Option<Sample> {
        self.values.get(&item_id).and_then(|values| values.front().cloned())
    }

    /// Number of values stored for an item
    pub fn len(&self, item_id: ItemId) -> usize {
        self.values.get(&item_id).map(|values| values.len()).unwrap_or(0)
    }

    /// Drop the history of every item `keep` rejects
    pub fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(ItemId) -> bool,
    {
        self.values.retain(|item_id, _| keep(*item_id));
    }

    /// Samples of an item inside a window, newest first
    pub fn select(&self, item_id: ItemId, window: Window, now: DateTime<Utc>) -> Vec<Sample> {
        self.values
            .get(&item_id)
            .map(|values| window.select(values.iter(), now))
            .unwrap_or_default()
    }
}

#[async_trait]
impl HistorySource for HistoryCache {
    async fn fetch(&self, item_id: ItemId, window: Window, now: DateTime<Utc>) -> expression::Result<Vec<Sample>> {
        Ok(self.select(item_id, window, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn test_out_of_order_insert() {
        let cache = HistoryCache::default();
        cache.insert(ItemId(1), Sample::numeric(at(10), 1.0), at(10));
        cache.insert(ItemId(1), Sample::numeric(at(30), 3.0), at(30));
        cache.insert(ItemId(1), Sample::numeric(at(20), 2.0), at(30));

        let values = cache.select(ItemId(1), Window::Count(3), at(30));
        let clocks: Vec<_> = values.iter().map(|s| s.clock).collect();
        assert_eq!(clocks, vec![at(30), at(20), at(10)]);
        assert_eq!(cache.latest(ItemId(1)).unwrap().clock, at(30));
    }

    #[test]
    fn test_retention_by_count_and_age() {
        let cache = HistoryCache::new(3, 100);
        for clock in [10, 20, 30, 40] {
            cache.insert(ItemId(1), Sample::numeric(at(clock), clock as f64), at(clock));
        }
        assert_eq!(cache.len(ItemId(1)), 3);

        cache.insert(ItemId(1), Sample::numeric(at(135), 135.0), at(135));
        // 30 is older than 135 - 100
        assert_eq!(cache.len(ItemId(1)), 2);
    }

    #[test]
    fn test_future_clock_keeps_history() {
        let cache = HistoryCache::new(10, 100);
        cache.insert(ItemId(1), Sample::numeric(at(1_000), 1.0), at(1_000));
        // Sender clock far ahead of the receive time
        cache.insert(ItemId(1), Sample::numeric(at(4_000_000_000), 9.0), at(1_005));
        cache.insert(ItemId(1), Sample::numeric(at(1_010), 2.0), at(1_010));

        assert_eq!(cache.len(ItemId(1)), 3);
        let visible = cache.select(ItemId(1), Window::Count(1), at(1_010));
        assert_eq!(visible[0].value, expression::SampleValue::Numeric(2.0));
    }

    #[test]
    fn test_retain() {
        let cache = HistoryCache::default();
        cache.insert(ItemId(1), Sample::numeric(at(10), 1.0), at(10));
        cache.insert(ItemId(2), Sample::numeric(at(10), 2.0), at(10));
        cache.retain(|item_id| item_id == ItemId(2));
        assert_eq!(cache.len(ItemId(1)), 0);
        assert_eq!(cache.len(ItemId(2)), 1);
    }

    #[tokio::test]
    async fn test_history_source() {
        let cache = HistoryCache::default();
        cache.insert(ItemId(1), Sample::numeric(at(100), 5.0), at(100));

        let samples = cache.fetch(ItemId(1), Window::Span(60), at(120)).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert!(cache.fetch(ItemId(2), Window::Count(1), at(120)).await.unwrap().is_empty());
    }
}
