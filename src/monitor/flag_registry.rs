// src/monitor/flag_registry.rs - Violation log for moderator review

use dashmap::DashMap;
use log::{debug, error, info};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{MonitorError, MonitorResult};
use crate::types::{FlaggedRecord, UserId};

/// Append-only (per user) record store with a bounded global size
pub struct FlagRegistry {
    records: DashMap<UserId, VecDeque<FlaggedRecord>>,
    total: AtomicUsize,
    sequence: AtomicU64,
    max_records: usize,
    history_per_user: usize,
}

impl FlagRegistry {
    pub fn new(max_records: usize, history_per_user: usize) -> Self {
        Self {
            records: DashMap::new(),
            total: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
            max_records: max_records.max(1),
            history_per_user: history_per_user.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_records
    }

    /// Add a record. When the user's history is full the oldest entry makes room;
    /// otherwise the record needs a free global slot or `RegistryFull` is returned.
    pub fn append(&self, mut record: FlaggedRecord) -> MonitorResult<()> {
        let user_id = record.user_id.clone();
        let result = {
            let mut history = self.records.entry(user_id.clone()).or_default();
            let evicting = history.len() >= self.history_per_user;

            if !evicting && !self.reserve_slot() {
                Err(MonitorError::RegistryFull { capacity: self.max_records })
            } else {
                if evicting {
                    history.pop_front();
                }
                record.sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
                debug!(
                    "Flag record #{} for {} ({}, warning {})",
                    record.sequence, record.user_id, record.category, record.warning_count_at_time
                );
                history.push_back(record);
                Ok(())
            }
        };

        if let Err(ref e) = result {
            error!("Dropping flag record for {}: {}", user_id, e);
            self.records.remove_if(&user_id, |_, history| history.is_empty());
        }
        result
    }

    fn reserve_slot(&self) -> bool {
        self.total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < self.max_records { Some(n + 1) } else { None }
            })
            .is_ok()
    }

    /// Most recent record per user, newest first
    pub fn list_flagged(&self) -> Vec<FlaggedRecord> {
        let mut latest: Vec<FlaggedRecord> = self
            .records
            .iter()
            .filter_map(|entry| entry.value().back().cloned())
            .collect();

        latest.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });
        latest
    }

    pub fn latest_for(&self, user_id: &str) -> Option<FlaggedRecord> {
        self.records
            .get(user_id)
            .and_then(|history| history.back().cloned())
    }

    /// Retained history for one user, oldest first
    pub fn history(&self, user_id: &str) -> Vec<FlaggedRecord> {
        self.records
            .get(user_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every record for a user, returning how many were dropped
    pub fn clear_for_user(&self, user_id: &str) -> usize {
        match self.records.remove(user_id) {
            Some((_, history)) => {
                let removed = history.len();
                self.total.fetch_sub(removed, Ordering::SeqCst);
                info!("Cleared {} flag records for {}", removed, user_id);
                removed
            }
            None => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flagged_users(&self) -> usize {
        self.records.iter().filter(|entry| !entry.value().is_empty()).count()
    }

    /// Every retained record, in insertion order
    pub fn snapshot(&self) -> Vec<FlaggedRecord> {
        let mut all: Vec<FlaggedRecord> = self
            .records
            .iter()
            .flat_map(|entry| entry.value().iter().cloned().collect::<Vec<_>>())
            .collect();
        all.sort_by_key(|record| record.sequence);
        all
    }

    /// Re-append saved records; insertion order is preserved, sequences are reassigned
    pub fn restore(&self, mut records: Vec<FlaggedRecord>) -> MonitorResult<usize> {
        records.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.timestamp.cmp(&b.timestamp)));
        let count = records.len();
        for record in records {
            self.append(record)?;
        }
        info!("Restored {} flag records", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Severity, ViolationCategory};
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use std::thread;
    use uuid::Uuid;

    fn record(user: &str, count: u32, minutes_ago: i64) -> FlaggedRecord {
        FlaggedRecord {
            id: Uuid::new_v4(),
            user_id: user.to_string(),
            username: format!("{}-name", user),
            location: "Unknown".to_string(),
            category: ViolationCategory::new("harassment", Severity::Major),
            matched_categories: vec!["harassment".to_string()],
            message_snippet: "you are worthless".to_string(),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            warning_count_at_time: count,
            sequence: 0,
        }
    }

    #[test]
    fn test_latest_per_user_newest_first() {
        let registry = FlagRegistry::new(100, 10);
        registry.append(record("a", 1, 30)).unwrap();
        registry.append(record("b", 1, 20)).unwrap();
        registry.append(record("a", 2, 10)).unwrap();

        let listed = registry.list_flagged();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].user_id, "a");
        assert_eq!(listed[0].warning_count_at_time, 2);
        assert_eq!(listed[1].user_id, "b");
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.flagged_users(), 2);
    }

    #[test]
    fn test_equal_timestamps_fall_back_to_insertion_order() {
        let registry = FlagRegistry::new(100, 10);
        let mut first = record("a", 1, 0);
        let mut second = record("b", 1, 0);
        let now = Utc::now();
        first.timestamp = now;
        second.timestamp = now;
        registry.append(first).unwrap();
        registry.append(second).unwrap();

        let listed = registry.list_flagged();
        assert_eq!(listed[0].user_id, "b");
        assert_eq!(listed[1].user_id, "a");
    }

    #[test]
    fn test_history_trims_oldest_without_consuming_capacity() {
        let registry = FlagRegistry::new(3, 2);
        for count in 1..=5 {
            registry.append(record("a", count, 0)).unwrap();
        }

        let history = registry.history("a");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].warning_count_at_time, 4);
        assert_eq!(history[1].warning_count_at_time, 5);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_full_registry_reports_error() {
        let registry = FlagRegistry::new(2, 10);
        registry.append(record("a", 1, 0)).unwrap();
        registry.append(record("b", 1, 0)).unwrap();

        let err = registry.append(record("c", 1, 0)).unwrap_err();
        assert!(matches!(err, MonitorError::RegistryFull { capacity: 2 }));
        assert!(err.is_unavailable());
        assert!(registry.history("c").is_empty());
        assert_eq!(registry.flagged_users(), 2);
        assert_eq!(registry.list_flagged().len(), 2);
    }

    #[test]
    fn test_clear_for_user_frees_capacity() {
        let registry = FlagRegistry::new(2, 10);
        registry.append(record("a", 1, 0)).unwrap();
        registry.append(record("a", 2, 0)).unwrap();

        assert_eq!(registry.clear_for_user("a"), 2);
        assert_eq!(registry.clear_for_user("a"), 0);
        assert!(registry.is_empty());
        assert!(registry.latest_for("a").is_none());
        registry.append(record("b", 1, 0)).unwrap();
    }

    #[test]
    fn test_concurrent_appends_are_all_visible() {
        let registry = Arc::new(FlagRegistry::new(10_000, 1_000));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for n in 0..50 {
                        registry.append(record(&format!("user-{}", i % 4), n, 0)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 400);
        assert_eq!(registry.list_flagged().len(), 4);
        assert_eq!(registry.history("user-0").len(), 100);
    }

    #[test]
    fn test_snapshot_restore_keeps_order() {
        let registry = FlagRegistry::new(100, 10);
        registry.append(record("a", 1, 5)).unwrap();
        registry.append(record("b", 1, 4)).unwrap();
        registry.append(record("a", 2, 3)).unwrap();

        let restored = FlagRegistry::new(100, 10);
        assert_eq!(restored.restore(registry.snapshot()).unwrap(), 3);
        assert_eq!(restored.history("a").len(), 2);
        assert_eq!(restored.latest_for("a").unwrap().warning_count_at_time, 2);
        assert_eq!(restored.list_flagged()[0].user_id, "a");
    }
}
