// src/types/mod.rs - Core data model shared by the screening engine and its adapters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque end-user identifier supplied by the transport layer
pub type UserId = String;

/// How serious a category of unsafe content is
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,     // Spam, flooding
    Moderate,  // Insults, crude language
    Major,     // Harassment, targeted abuse
    Severe,    // Threats, self-harm risk
}

impl Severity {
    pub fn weight(&self) -> u8 {
        match self {
            Severity::Minor => 1,
            Severity::Moderate => 2,
            Severity::Major => 3,
            Severity::Severe => 4,
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Moderate
    }
}

/// A labelled class of unsafe content. Loaded from configuration at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ViolationCategory {
    pub name: String,
    pub severity: Severity,
}

impl ViolationCategory {
    pub fn new(name: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: name.into(),
            severity,
        }
    }
}

impl fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A single chat message on its way through the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub user_id: UserId,
    pub username: String,
    pub location: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageEvent {
    pub fn new(
        user_id: impl Into<UserId>,
        username: impl Into<String>,
        content: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            location: location.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Per-user escalation state, created lazily on the first violation.
///
/// `blocked` implies `warning_count >= threshold`; both fields are only
/// ever changed together under the owning store's per-user lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EscalationState {
    pub warning_count: u32,
    pub blocked: bool,
    pub last_category: Option<ViolationCategory>,
    pub last_violation: Option<DateTime<Utc>>,
}

impl EscalationState {
    pub fn user_state(&self) -> UserState {
        if self.blocked {
            UserState::Blocked
        } else if self.warning_count > 0 {
            UserState::Warned
        } else {
            UserState::Clean
        }
    }
}

/// Screening state machine position derived from an `EscalationState`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserState {
    Clean,
    Warned,
    Blocked,
}

/// One violation event kept for moderator review
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub username: String,
    pub location: String,
    pub category: ViolationCategory,
    pub matched_categories: Vec<String>,
    #[serde(rename = "snippet")]
    pub message_snippet: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "warningCount")]
    pub warning_count_at_time: u32,
    /// Registry-assigned insertion order, breaks timestamp ties
    #[serde(default)]
    pub sequence: u64,
}

/// Outcome of a single `record_violation` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationOutcome {
    pub warning_count: u32,
    pub became_blocked_now: bool,
}

/// Read-only view of one user's standing, served to moderators and clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub user_id: UserId,
    pub warning_count: u32,
    pub blocked: bool,
    pub state: UserState,
    pub block_threshold: u32,
    pub last_category: Option<String>,
    pub last_violation: Option<DateTime<Utc>>,
}
