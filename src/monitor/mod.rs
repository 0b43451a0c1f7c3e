// src/monitor/mod.rs - Screening engine: matcher, escalation store and flag registry together

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::config::{MonitorConfig, ResetPolicy};
use crate::error::MonitorResult;
use crate::types::{FlaggedRecord, MessageEvent, Severity, UserStatus};

pub mod alerts;
pub mod escalation;
pub mod flag_registry;
pub mod pattern_matching;
pub mod snapshot;

use escalation::EscalationStore;
use flag_registry::FlagRegistry;
use pattern_matching::{cap_chars, primary_match, PatternMatcher};
use snapshot::MonitorSnapshot;

/// Behaviour switches taken from configuration
#[derive(Debug, Clone)]
pub struct MonitorPolicy {
    pub reset_policy: ResetPolicy,
    pub allow_self_reset: bool,
    pub snippet_length: usize,
}

#[derive(Debug, Default)]
struct MonitorCounters {
    screened: AtomicU64,
    flagged: AtomicU64,
    block_notices: AtomicU64,
    resets: AtomicU64,
}

/// Aggregate numbers for status endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStats {
    pub messages_screened: u64,
    pub messages_flagged: u64,
    pub block_notices: u64,
    pub resets: u64,
    pub tracked_users: usize,
    pub blocked_users: usize,
    pub flagged_records: usize,
    pub registry_capacity: usize,
    pub block_threshold: u32,
    pub categories: usize,
}

/// Public view of one configured category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub name: String,
    pub severity: Severity,
    pub description: Option<String>,
    pub pattern_count: usize,
}

/// The one entry point transports call into.
///
/// Constructed once at startup and shared behind an `Arc`; every method
/// takes `&self` and is safe to call from any number of tasks.
pub struct ChatMonitor {
    matcher: PatternMatcher,
    escalation: EscalationStore,
    registry: FlagRegistry,
    policy: MonitorPolicy,
    counters: MonitorCounters,
}

impl ChatMonitor {
    pub fn new(
        matcher: PatternMatcher,
        escalation: EscalationStore,
        registry: FlagRegistry,
        policy: MonitorPolicy,
    ) -> Self {
        Self {
            matcher,
            escalation,
            registry,
            policy,
            counters: MonitorCounters::default(),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> MonitorResult<Self> {
        let matcher = PatternMatcher::from_config(&config.categories, &config.screening)?;
        let monitor = Self::new(
            matcher,
            EscalationStore::new(config.escalation.block_threshold),
            FlagRegistry::new(config.registry.max_records, config.registry.history_per_user),
            MonitorPolicy {
                reset_policy: config.escalation.reset_policy,
                allow_self_reset: config.escalation.allow_self_reset,
                snippet_length: config.registry.snippet_length,
            },
        );
        info!(
            "Chat monitor ready: {} categories, block threshold {}, reset policy {:?}",
            monitor.matcher.category_count(),
            monitor.escalation.block_threshold(),
            monitor.policy.reset_policy
        );
        Ok(monitor)
    }

    pub fn block_threshold(&self) -> u32 {
        self.escalation.block_threshold()
    }

    pub fn allows_self_reset(&self) -> bool {
        self.policy.allow_self_reset
    }

    /// Configured categories in configuration order
    pub fn categories(&self) -> Vec<CategorySummary> {
        self.matcher
            .rules()
            .map(|rule| CategorySummary {
                name: rule.category.name.clone(),
                severity: rule.category.severity,
                description: rule.description.clone(),
                pattern_count: rule.patterns.len(),
            })
            .collect()
    }

    /// Screen one message and return the alerts to deliver, in order.
    ///
    /// An empty result means the message passed.
    pub fn screen(&self, user_id: &str, username: &str, message: &str, location: &str) -> MonitorResult<Vec<String>> {
        self.screen_event(&MessageEvent::new(user_id, username, message, location))
    }

    pub fn screen_event(&self, event: &MessageEvent) -> MonitorResult<Vec<String>> {
        self.counters.screened.fetch_add(1, Ordering::Relaxed);

        if self.escalation.is_blocked(&event.user_id) {
            return Ok(self.refuse_blocked(&event.user_id));
        }

        let matches = self.matcher.classify(&event.content);
        let Some(primary) = primary_match(&matches) else {
            return Ok(Vec::new());
        };

        let matched_categories: Vec<String> = matches.iter().map(|m| m.category.name.clone()).collect();
        let snippet = self.snippet(&event.content);

        // Block check, increment and record append all happen under the user's lock;
        // another message may have blocked the user since the check above
        let recorded = self.escalation.record_violation_unless_blocked(
            &event.user_id,
            &primary.category,
            event.timestamp,
            |outcome| {
                self.registry.append(FlaggedRecord {
                    id: Uuid::new_v4(),
                    user_id: event.user_id.clone(),
                    username: event.username.clone(),
                    location: event.location.clone(),
                    category: primary.category.clone(),
                    matched_categories: matched_categories.clone(),
                    message_snippet: snippet,
                    timestamp: event.timestamp,
                    warning_count_at_time: outcome.warning_count,
                    sequence: 0,
                })
            },
        );
        let Some((outcome, appended)) = recorded else {
            return Ok(self.refuse_blocked(&event.user_id));
        };

        self.counters.flagged.fetch_add(1, Ordering::Relaxed);
        info!(
            "Flagged message from {} ({}) for {}: warning {}/{}",
            event.username,
            event.user_id,
            matched_categories.join(", "),
            outcome.warning_count,
            self.block_threshold()
        );
        appended?;

        let mut alerts = vec![alerts::warning(
            outcome.warning_count,
            self.block_threshold(),
            &matched_categories,
        )];
        if outcome.became_blocked_now {
            alerts.push(alerts::block_transition(self.block_threshold()));
        }
        Ok(alerts)
    }

    pub fn is_blocked(&self, user_id: &str) -> bool {
        self.escalation.is_blocked(user_id)
    }

    /// Clear a user's warnings and block; returns the confirmation text
    pub fn reset(&self, user_id: &str) -> String {
        let (previous, cleared) = self.reset_user(user_id);
        alerts::reset_confirmation(user_id, previous, cleared)
    }

    /// Returns the previous warning count and, under `ClearHistory`, the number of records removed
    pub fn reset_user(&self, user_id: &str) -> (u32, Option<usize>) {
        self.counters.resets.fetch_add(1, Ordering::Relaxed);
        self.escalation.reset_with(user_id, |_| match self.policy.reset_policy {
            ResetPolicy::KeepHistory => None,
            ResetPolicy::ClearHistory => Some(self.registry.clear_for_user(user_id)),
        })
    }

    pub fn list_flagged(&self) -> Vec<FlaggedRecord> {
        self.registry.list_flagged()
    }

    pub fn flag_history(&self, user_id: &str) -> Vec<FlaggedRecord> {
        self.registry.history(user_id)
    }

    pub fn status(&self, user_id: &str) -> UserStatus {
        let state = self.escalation.state(user_id).unwrap_or_default();
        UserStatus {
            user_id: user_id.to_string(),
            warning_count: state.warning_count,
            blocked: state.blocked,
            state: state.user_state(),
            block_threshold: self.block_threshold(),
            last_category: state.last_category.map(|c| c.name),
            last_violation: state.last_violation,
        }
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            messages_screened: self.counters.screened.load(Ordering::Relaxed),
            messages_flagged: self.counters.flagged.load(Ordering::Relaxed),
            block_notices: self.counters.block_notices.load(Ordering::Relaxed),
            resets: self.counters.resets.load(Ordering::Relaxed),
            tracked_users: self.escalation.tracked_users(),
            blocked_users: self.escalation.blocked_users(),
            flagged_records: self.registry.len(),
            registry_capacity: self.registry.capacity(),
            block_threshold: self.block_threshold(),
            categories: self.matcher.category_count(),
        }
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot::new(self.escalation.snapshot(), self.registry.snapshot())
    }

    pub fn restore(&self, snapshot: MonitorSnapshot) -> MonitorResult<()> {
        let (users, records) = snapshot.into_parts();
        self.escalation.restore(users);
        self.registry.restore(records)?;
        Ok(())
    }

    /// Time of the most recent flag across all users
    pub fn last_flagged_at(&self) -> Option<DateTime<Utc>> {
        self.registry.list_flagged().first().map(|r| r.timestamp)
    }

    fn refuse_blocked(&self, user_id: &str) -> Vec<String> {
        self.counters.block_notices.fetch_add(1, Ordering::Relaxed);
        debug!("Refusing message from blocked user {}", user_id);
        vec![alerts::block_notice(self.policy.allow_self_reset)]
    }

    fn snippet(&self, content: &str) -> String {
        let capped = cap_chars(content, self.policy.snippet_length);
        if capped.len() < content.len() {
            format!("{}…", capped)
        } else {
            capped.to_string()
        }
    }
}
