//! # Configuration
//!
//! TOML configuration for the `itemforge` binary, split into sections:
//!
//! - [`SnapshotConfig`] - where the read-only SQLite snapshot and item table live
//! - [`DuplicationConfig`] - replay exclusions, sync timing, recompute ids
//! - [`SchemaConfig`] - optional property schema file replacing the built-in table
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use itemforge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("itemforge.toml").await?;
//!     let config = Config::load("itemforge.toml").await?;
//!     println!("snapshot: {}", config.snapshot.db_path);
//!     Ok(())
//! }
//! ```
//!
//! Every section and most fields have defaults, so a partial file is enough.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::dupe::{DuplicationSettings, ExclusionSet, RecomputeIds};
use crate::schema::{ApplyVerb, PropertySchema};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub duplication: DuplicationConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Copy of the game database. Opened read-only.
    pub db_path: String,
    /// Exported item table CSV used to name templates in reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_table: Option<String>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            db_path: "game.db".to_string(),
            item_table: Some("ItemTable.csv".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicationConfig {
    /// Property ids never copied onto a duplicate.
    #[serde(default = "default_excluded_ids")]
    pub excluded_ids: Vec<u32>,
    #[serde(default = "default_sync_delay_ms")]
    pub sync_delay_ms: u64,
    #[serde(default = "default_sync_attempts")]
    pub sync_attempts: u32,
    #[serde(default = "default_sync_backoff")]
    pub sync_backoff: f64,
    #[serde(default = "default_crafter_tier_id")]
    pub crafter_tier_id: u32,
    #[serde(default = "default_crafter_profession_id")]
    pub crafter_profession_id: u32,
    /// Verb for ids the schema does not know.
    #[serde(default)]
    pub unknown_apply: ApplyVerb,
}

fn default_excluded_ids() -> Vec<u32> {
    vec![crate::dupe::INSTANCE_ID]
}

fn default_sync_delay_ms() -> u64 {
    5000
}

fn default_sync_attempts() -> u32 {
    3
}

fn default_sync_backoff() -> f64 {
    2.0
}

fn default_crafter_tier_id() -> u32 {
    RecomputeIds::default().crafter_tier
}

fn default_crafter_profession_id() -> u32 {
    RecomputeIds::default().crafter_profession
}

impl Default for DuplicationConfig {
    fn default() -> Self {
        Self {
            excluded_ids: default_excluded_ids(),
            sync_delay_ms: default_sync_delay_ms(),
            sync_attempts: default_sync_attempts(),
            sync_backoff: default_sync_backoff(),
            crafter_tier_id: default_crafter_tier_id(),
            crafter_profession_id: default_crafter_profession_id(),
            unknown_apply: ApplyVerb::default(),
        }
    }
}

impl DuplicationConfig {
    /// Runtime settings for the duplicator.
    pub fn settings(&self) -> DuplicationSettings {
        DuplicationSettings {
            exclusions: ExclusionSet::new(self.excluded_ids.iter().copied()),
            sync_delay: Duration::from_millis(self.sync_delay_ms),
            sync_attempts: self.sync_attempts,
            sync_backoff: self.sync_backoff,
            recompute: RecomputeIds {
                crafter_tier: self.crafter_tier_id,
                crafter_profession: self.crafter_profession_id,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// TOML property table; the built-in table is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("itemforge.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Property schema described by this configuration, with the unknown-id verb applied.
    pub fn schema(&self) -> Result<PropertySchema> {
        let schema = match &self.schema.file {
            Some(path) => PropertySchema::load(path)
                .map_err(|e| anyhow!("Failed to load schema {}: {}", path, e))?,
            None => PropertySchema::builtin(),
        };
        Ok(schema.with_unknown_apply(self.duplication.unknown_apply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplication_defaults() {
        let settings = DuplicationConfig::default().settings();
        assert!(settings.exclusions.contains(22));
        assert_eq!(settings.sync_delay, Duration::from_secs(5));
        assert_eq!(settings.sync_attempts, 3);
        assert_eq!(settings.recompute, RecomputeIds::default());
        assert_eq!(settings, DuplicationSettings::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
[snapshot]
db_path = "/srv/snapshots/game.db"

[duplication]
excluded_ids = [22, 147]
unknown_apply = "float"
"#,
        )
        .unwrap();
        assert_eq!(config.snapshot.db_path, "/srv/snapshots/game.db");
        assert!(config.snapshot.item_table.is_none());
        assert_eq!(config.duplication.sync_attempts, 3);
        assert_eq!(config.duplication.crafter_profession_id, 67);
        let settings = config.duplication.settings();
        assert!(settings.exclusions.contains(147));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.schema().unwrap().unknown_apply(), ApplyVerb::FloatApply);
    }

    #[tokio::test]
    async fn test_create_default_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("itemforge.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.snapshot.db_path, "game.db");
        assert_eq!(loaded.duplication.excluded_ids, vec![22]);
        assert_eq!(loaded.duplication.unknown_apply, ApplyVerb::IntApply);
        assert!(loaded.schema.file.is_none());
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let err = Config::load("/nonexistent/itemforge.toml").await.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
