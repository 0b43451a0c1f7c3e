// src/monitor/escalation.rs - Per-user warning counts and block state

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info, warn};

use crate::types::{EscalationState, UserId, ViolationCategory, ViolationOutcome};

/// Concurrent store of `EscalationState` keyed by user.
///
/// Every operation on one user runs under that user's shard lock, so an
/// increment and its threshold check are a single step and a reset can
/// never interleave with a violation.
pub struct EscalationStore {
    states: DashMap<UserId, EscalationState>,
    block_threshold: u32,
}

impl EscalationStore {
    pub fn new(block_threshold: u32) -> Self {
        Self {
            states: DashMap::new(),
            block_threshold: block_threshold.max(1),
        }
    }

    pub fn block_threshold(&self) -> u32 {
        self.block_threshold
    }

    /// Absent users are never blocked
    pub fn is_blocked(&self, user_id: &str) -> bool {
        self.states.get(user_id).map_or(false, |state| state.blocked)
    }

    pub fn warning_count(&self, user_id: &str) -> u32 {
        self.states.get(user_id).map_or(0, |state| state.warning_count)
    }

    pub fn state(&self, user_id: &str) -> Option<EscalationState> {
        self.states.get(user_id).map(|state| state.value().clone())
    }

    pub fn record_violation(
        &self,
        user_id: &str,
        category: &ViolationCategory,
        at: DateTime<Utc>,
    ) -> ViolationOutcome {
        self.record_violation_with(user_id, category, at, |_| ()).0
    }

    /// Increment the user's count and run `then` before the user's lock is released.
    ///
    /// `became_blocked_now` is true only on the call that crosses the threshold.
    pub fn record_violation_with<T>(
        &self,
        user_id: &str,
        category: &ViolationCategory,
        at: DateTime<Utc>,
        then: impl FnOnce(ViolationOutcome) -> T,
    ) -> (ViolationOutcome, T) {
        let mut state = self.states.entry(user_id.to_string()).or_default();
        self.apply_violation(user_id, &mut *state, category, at, then)
    }

    /// As `record_violation_with`, but returns `None` and changes nothing when the
    /// user is already blocked. The check and the increment share one lock.
    pub fn record_violation_unless_blocked<T>(
        &self,
        user_id: &str,
        category: &ViolationCategory,
        at: DateTime<Utc>,
        then: impl FnOnce(ViolationOutcome) -> T,
    ) -> Option<(ViolationOutcome, T)> {
        let mut state = self.states.entry(user_id.to_string()).or_default();
        if state.blocked {
            return None;
        }
        Some(self.apply_violation(user_id, &mut *state, category, at, then))
    }

    fn apply_violation<T>(
        &self,
        user_id: &str,
        state: &mut EscalationState,
        category: &ViolationCategory,
        at: DateTime<Utc>,
        then: impl FnOnce(ViolationOutcome) -> T,
    ) -> (ViolationOutcome, T) {
        state.warning_count = state.warning_count.saturating_add(1);
        state.last_category = Some(category.clone());
        state.last_violation = Some(at);

        let became_blocked_now = !state.blocked && state.warning_count >= self.block_threshold;
        if became_blocked_now {
            state.blocked = true;
            warn!(
                "User {} blocked after {} warnings (last category: {})",
                user_id, state.warning_count, category
            );
        } else {
            debug!(
                "User {} warning count now {}/{}",
                user_id, state.warning_count, self.block_threshold
            );
        }

        let outcome = ViolationOutcome {
            warning_count: state.warning_count,
            became_blocked_now,
        };
        let extra = then(outcome);
        (outcome, extra)
    }

    /// Zero the count and lift the block. Returns the previous count (0 for unknown users).
    pub fn reset(&self, user_id: &str) -> u32 {
        self.reset_with(user_id, |_| ()).0
    }

    /// Reset and run `then` with the previous count before the user's lock is released
    pub fn reset_with<T>(&self, user_id: &str, then: impl FnOnce(u32) -> T) -> (u32, T) {
        match self.states.entry(user_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                let previous = state.warning_count;
                state.warning_count = 0;
                state.blocked = false;
                info!("Reset warnings for {} (previous count: {})", user_id, previous);
                let extra = then(previous);
                (previous, extra)
            }
            Entry::Vacant(_vacant) => {
                debug!("Reset requested for {} with no recorded state", user_id);
                let extra = then(0);
                (0, extra)
            }
        }
    }

    pub fn tracked_users(&self) -> usize {
        self.states.len()
    }

    pub fn blocked_users(&self) -> usize {
        self.states.iter().filter(|entry| entry.blocked).count()
    }

    pub fn snapshot(&self) -> Vec<(UserId, EscalationState)> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Load saved states. `blocked` is recomputed from the current threshold.
    pub fn restore(&self, entries: Vec<(UserId, EscalationState)>) {
        let count = entries.len();
        for (user_id, mut state) in entries {
            let blocked = state.warning_count >= self.block_threshold;
            if state.blocked != blocked {
                warn!(
                    "Adjusting restored block flag for {} ({} warnings, threshold {})",
                    user_id, state.warning_count, self.block_threshold
                );
                state.blocked = blocked;
            }
            self.states.insert(user_id, state);
        }
        info!("Restored escalation state for {} users", count);
    }
}
