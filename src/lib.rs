//! # Chat Message-Safety Engine
//!
//! Screens user chat messages against configured violation categories,
//! escalates repeat offenders from warnings to a block, and keeps a
//! registry of flagged users for moderators.
//!
//! ## Features
//!
//! - **Pattern Matching**: literal, wildcard and regex patterns per category, with evasion-resistant normalisation
//! - **Escalation**: per-user warning counts with an atomic threshold check
//! - **Flag Registry**: latest record per user for moderation, plus bounded history
//! - **Transports**: REST endpoints and a websocket alarm channel sharing one engine
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatwatch::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let monitor = ChatMonitor::from_config(&MonitorConfig::with_default_categories())?;
//!
//!     for alert in monitor.screen("u1", "alice", "you are worthless", "Lisbon")? {
//!         println!("{}", alert);
//!     }
//!     assert!(!monitor.is_blocked("u1"));
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod monitor;
pub mod types;

#[cfg(feature = "web")]
pub mod web;

// Re-export commonly used items
pub mod prelude {
    pub use crate::config::{MonitorConfig, ResetPolicy};
    pub use crate::error::{MonitorError, MonitorResult};
    pub use crate::monitor::{snapshot::MonitorSnapshot, ChatMonitor, MonitorStats};
    pub use crate::types::{
        EscalationState, FlaggedRecord, MessageEvent, Severity, UserState, UserStatus,
        ViolationCategory,
    };

    #[cfg(feature = "web")]
    pub use crate::web::WebServer;
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
