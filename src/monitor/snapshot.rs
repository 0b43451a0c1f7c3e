// src/monitor/snapshot.rs - JSON persistence of escalation state and flag records

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::error::{MonitorError, MonitorResult};
use crate::types::{EscalationState, FlaggedRecord, UserId};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub user_id: UserId,
    pub state: EscalationState,
}

/// Point-in-time copy of everything the engine owns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub users: Vec<UserSnapshot>,
    pub records: Vec<FlaggedRecord>,
}

impl MonitorSnapshot {
    pub fn new(users: Vec<(UserId, EscalationState)>, records: Vec<FlaggedRecord>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            taken_at: Utc::now(),
            users: users
                .into_iter()
                .map(|(user_id, state)| UserSnapshot { user_id, state })
                .collect(),
            records,
        }
    }

    /// Write via a temporary file so a crash never leaves a half-written snapshot
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> MonitorResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| MonitorError::Snapshot(format!("serialize failed: {}", e)))?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, path).await?;

        info!(
            "Saved snapshot to {} ({} users, {} records)",
            path.display(),
            self.users.len(),
            self.records.len()
        );
        Ok(())
    }

    /// `Ok(None)` when no snapshot exists yet
    pub async fn load<P: AsRef<Path>>(path: P) -> MonitorResult<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No snapshot at {}", path.display());
            return Ok(None);
        }

        let bytes = fs::read(path).await?;
        let snapshot: MonitorSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| MonitorError::Snapshot(format!("{}: {}", path.display(), e)))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(MonitorError::Snapshot(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(Some(snapshot))
    }

    pub fn into_parts(self) -> (Vec<(UserId, EscalationState)>, Vec<FlaggedRecord>) {
        let users = self
            .users
            .into_iter()
            .map(|user| (user.user_id, user.state))
            .collect();
        (users, self.records)
    }
}
