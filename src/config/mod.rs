// src/config/mod.rs - Startup configuration: lexicon, thresholds, registry limits, server

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::monitor::pattern_matching::CategoryPattern;
use crate::types::Severity;

pub const DEFAULT_CONFIG_PATH: &str = "config/chatwatch.yaml";

/// Complete configuration, read once at startup and immutable afterwards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub version: String,
    pub escalation: EscalationConfig,
    pub registry: RegistryConfig,
    pub screening: ScreeningConfig,
    pub server: ServerConfig,
    pub categories: Vec<CategoryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Warning count at which a user becomes blocked
    pub block_threshold: u32,
    pub reset_policy: ResetPolicy,
    /// Whether users may clear their own warnings with `/reset`
    pub allow_self_reset: bool,
}

/// What a reset does to the user's flag history
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    KeepHistory,
    ClearHistory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub max_records: usize,
    pub history_per_user: usize,
    pub snippet_length: usize,
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    /// Longest message the transports accept, in characters
    pub max_message_length: usize,
    /// Characters of a message the matcher looks at
    pub max_scan_length: usize,
    pub normalization: NormalizationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub leetspeak: bool,
    pub diacritics: bool,
    pub homoglyphs: bool,
    pub repeated_chars: bool,
    pub encoded_content: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

/// One violation category and the patterns that detect it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub whole_words_only: bool,
    pub patterns: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            block_threshold: 3,
            reset_policy: ResetPolicy::KeepHistory,
            allow_self_reset: true,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_records: 100_000,
            history_per_user: 50,
            snippet_length: 120,
            snapshot_path: None,
        }
    }
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            max_message_length: 2000,
            max_scan_length: 4096,
            normalization: NormalizationConfig::default(),
        }
    }
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            leetspeak: true,
            diacritics: true,
            homoglyphs: true,
            repeated_chars: true,
            encoded_content: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8081,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            escalation: EscalationConfig::default(),
            registry: RegistryConfig::default(),
            screening: ScreeningConfig::default(),
            server: ServerConfig::default(),
            categories: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// Default configuration with a small starter lexicon
    pub fn with_default_categories() -> Self {
        let category = |name: &str, severity, description: &str, patterns: &[&str]| CategoryConfig {
            name: name.to_string(),
            severity,
            description: Some(description.to_string()),
            whole_words_only: true,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        };

        Self {
            categories: vec![
                category(
                    "threat",
                    Severity::Severe,
                    "Threats of violence against a person",
                    &["kill you", "~/\\bi('ll| will| am going to) (hurt|kill|find) you\\b/", "watch your back"],
                ),
                category(
                    "self_harm_risk",
                    Severity::Severe,
                    "Statements suggesting risk of self-harm",
                    &["kill myself", "end my life", "~/\\bwant to die\\b/"],
                ),
                category(
                    "harassment",
                    Severity::Major,
                    "Insults and targeted abuse",
                    &["worthless", "idiot*", "loser", "nobody likes you"],
                ),
                category(
                    "spam",
                    Severity::Minor,
                    "Scams and unsolicited promotion",
                    &["free money", "click here", "~/\\bcrypto\\s+giveaway\\b/"],
                ),
            ],
            ..Self::default()
        }
    }

    /// Read the configuration at `path`; write and return the defaults when it is missing
    pub async fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Configuration {} not found, creating defaults", path.display());
            let config = Self::with_default_categories();
            config.save(path).await?;
            return Ok(config);
        }
        Self::load(path).await
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;

        let config: MonitorConfig = if is_toml(path) {
            toml::from_str(&content)
                .with_context(|| format!("Invalid TOML in {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML in {}", path.display()))?
        };

        ConfigValidator::validate(&config)?;
        info!(
            "Loaded configuration from {} ({} categories, block threshold {})",
            path.display(),
            config.categories.len(),
            config.escalation.block_threshold
        );
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
                info!("Created configuration directory: {}", parent.display());
            }
        }

        let content = if is_toml(path) {
            toml::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)?
        };
        fs::write(path, content).await?;
        debug!("Wrote configuration to {}", path.display());
        Ok(())
    }

    /// Apply `CHATWATCH_PORT`, `CHATWATCH_BIND` and `CHATWATCH_BLOCK_THRESHOLD`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = env::var("CHATWATCH_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("CHATWATCH_PORT is not a valid port: {}", port))?;
        }
        if let Ok(bind) = env::var("CHATWATCH_BIND") {
            self.server.bind_address = bind;
        }
        if let Ok(threshold) = env::var("CHATWATCH_BLOCK_THRESHOLD") {
            self.escalation.block_threshold = threshold
                .parse()
                .with_context(|| format!("CHATWATCH_BLOCK_THRESHOLD is not a number: {}", threshold))?;
        }
        ConfigValidator::validate(self)
    }

    /// Path from `CHATWATCH_CONFIG`, falling back to the default location
    pub fn path_from_env() -> PathBuf {
        env::var("CHATWATCH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "toml")
}

/// Structural checks run on every loaded configuration
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &MonitorConfig) -> Result<()> {
        if config.escalation.block_threshold == 0 {
            return Err(anyhow::anyhow!("block_threshold must be at least 1"));
        }
        if config.registry.max_records == 0 {
            return Err(anyhow::anyhow!("registry.max_records must be at least 1"));
        }
        if config.registry.history_per_user == 0 {
            return Err(anyhow::anyhow!("registry.history_per_user must be at least 1"));
        }
        if config.screening.max_message_length == 0 || config.screening.max_scan_length == 0 {
            return Err(anyhow::anyhow!("screening lengths must be at least 1"));
        }

        let mut names = HashSet::new();
        for category in &config.categories {
            Self::validate_category(category)?;
            if !names.insert(category.name.as_str()) {
                return Err(anyhow::anyhow!("Duplicate category name: {}", category.name));
            }
        }
        Ok(())
    }

    fn validate_category(category: &CategoryConfig) -> Result<()> {
        if category.name.trim().is_empty() {
            return Err(anyhow::anyhow!("Category name cannot be empty"));
        }
        if category.patterns.is_empty() {
            return Err(anyhow::anyhow!("Category '{}' must have at least one pattern", category.name));
        }
        for pattern in &category.patterns {
            CategoryPattern::parse(pattern).map_err(|e| {
                anyhow::anyhow!("Invalid pattern '{}' in category '{}': {}", pattern, category.name, e)
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_config_is_created_with_defaults() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("chatwatch.yaml");

        let config = MonitorConfig::load_or_create(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.escalation.block_threshold, 3);
        assert!(!config.categories.is_empty());

        // Reloading the written file yields the same lexicon
        let reloaded = MonitorConfig::load(&path).await.unwrap();
        assert_eq!(reloaded.categories.len(), config.categories.len());
        assert_eq!(reloaded.escalation.reset_policy, ResetPolicy::KeepHistory);
    }

    #[tokio::test]
    async fn test_partial_yaml_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("partial.yaml");
        fs::write(
            &path,
            r#"
escalation:
  block_threshold: 5
  reset_policy: clear_history
categories:
  - name: harassment
    severity: major
    patterns: ["worthless", "idiot*"]
"#,
        )
        .await
        .unwrap();

        let config = MonitorConfig::load(&path).await.unwrap();
        assert_eq!(config.escalation.block_threshold, 5);
        assert_eq!(config.escalation.reset_policy, ResetPolicy::ClearHistory);
        assert!(config.escalation.allow_self_reset);
        assert_eq!(config.registry.history_per_user, 50);
        assert_eq!(config.server.port, 8081);
        assert!(config.categories[0].whole_words_only);
        assert_eq!(config.categories[0].severity, Severity::Major);
    }

    #[tokio::test]
    async fn test_toml_config() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("chatwatch.toml");
        fs::write(
            &path,
            r#"
[escalation]
block_threshold = 2

[[categories]]
name = "spam"
severity = "minor"
patterns = ["free money"]
"#,
        )
        .await
        .unwrap();

        let config = MonitorConfig::load(&path).await.unwrap();
        assert_eq!(config.escalation.block_threshold, 2);
        assert_eq!(config.categories[0].name, "spam");
    }

    #[tokio::test]
    async fn test_invalid_regex_rejected_at_load() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(
            &path,
            "categories:\n  - name: broken\n    patterns: [\"~/(unclosed/\"]\n",
        )
        .await
        .unwrap();

        let err = MonitorConfig::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_validation_rules() {
        let mut config = MonitorConfig::with_default_categories();
        assert!(ConfigValidator::validate(&config).is_ok());

        config.escalation.block_threshold = 0;
        assert!(ConfigValidator::validate(&config).is_err());

        let mut config = MonitorConfig::with_default_categories();
        let duplicate = config.categories[0].clone();
        config.categories.push(duplicate);
        assert!(ConfigValidator::validate(&config).is_err());

        let mut config = MonitorConfig::with_default_categories();
        config.categories[0].patterns.clear();
        assert!(ConfigValidator::validate(&config).is_err());

        let mut config = MonitorConfig::with_default_categories();
        config.registry.history_per_user = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
