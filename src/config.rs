//! Sharding configuration.
//!
//! Sources, lowest to highest priority:
//! - built-in defaults (sharding disabled, no shards),
//! - a TOML file,
//! - environment variables with the `SHARDROUTE__` prefix.
//!
//! ```toml
//! enabled = true
//! strategy = "hash"
//!
//! [[shards]]
//! name = "shard_00"
//! connection = { url = "data/shard_00.db", pool_size = 4 }
//!
//! [[shards]]
//! name = "shard_01"
//! connection = { url = "data/shard_01.db" }
//!
//! [[overrides]]
//! key = 1001
//! shard = 1
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::shard::ShardKey;

pub const ENV_ENABLED: &str = "SHARDROUTE__ENABLED";

/// How keys are spread over shards. Only hashing is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
  #[default]
  Hash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
  /// When false, no routing components are built at all.
  pub enabled: bool,

  pub strategy: Strategy,

  /// Shards in index order; position `i` becomes shard index `i`.
  pub shards: Vec<ShardConfig>,

  /// Pinned keys, applied after the router is built.
  pub overrides: Vec<OverrideConfig>,
}

impl Default for ShardingConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      strategy: Strategy::Hash,
      shards: Vec::new(),
      overrides: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardConfig {
  pub name: String,
  pub connection: ConnectionConfig,
}

impl ShardConfig {
  pub fn new(name: impl Into<String>, connection: ConnectionConfig) -> Self {
    Self {
      name: name.into(),
      connection,
    }
  }
}

/// Connection parameters handed untouched to the backend that opens the
/// shard's resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
  pub url: String,

  /// Connections opened per shard.
  /// Default: 1.
  pub pool_size: usize,

  /// How long a statement waits on a locked database.
  /// Default: 5000 ms.
  pub busy_timeout_ms: u64,

  /// How long acquiring a pooled connection may block.
  /// Default: 30000 ms.
  pub connection_timeout_ms: u64,
}

impl Default for ConnectionConfig {
  fn default() -> Self {
    Self {
      url: String::new(),
      pool_size: 1,
      busy_timeout_ms: 5_000,
      connection_timeout_ms: 30_000,
    }
  }
}

impl ConnectionConfig {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      ..Default::default()
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideConfig {
  pub key: ShardKey,
  pub shard: i64,
}

impl ShardingConfig {
  /// Loads configuration from an optional TOML file, then applies
  /// environment overrides. A path that does not exist yields the defaults
  /// and logs a warning.
  pub fn load(path: Option<impl AsRef<Path>>) -> Result<Self> {
    let mut config = Self::default();

    if let Some(path) = path {
      let path = path.as_ref();
      if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        config = Self::from_toml_str(&contents)?;
      } else {
        tracing::warn!(
          target: "shardroute::config",
          path = %path.display(),
          "configuration file not found, using defaults (sharding disabled)"
        );
      }
    }

    config.apply_env_overrides();
    Ok(config)
  }

  pub fn from_toml_str(contents: &str) -> Result<Self> {
    Ok(toml::from_str(contents)?)
  }

  pub fn to_toml(&self) -> Result<String> {
    toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
  }

  fn apply_env_overrides(&mut self) {
    if let Ok(val) = std::env::var(ENV_ENABLED) {
      self.enabled = parse_flag(&val);
    }
  }

  /// Checks the configuration can be turned into a router.
  ///
  /// # Errors
  ///
  /// `Error::Config` when there are no shards, a shard name repeats, or an
  /// override targets an index outside `0..shards.len()`.
  pub fn validate(&self) -> Result<()> {
    if self.shards.is_empty() {
      return Err(Error::Config("At least one shard must be configured".into()));
    }

    let mut names = HashSet::with_capacity(self.shards.len());
    for shard in &self.shards {
      if !names.insert(shard.name.as_str()) {
        return Err(Error::Config(format!("Duplicate shard name: {}", shard.name)));
      }
    }

    for o in &self.overrides {
      if o.shard < 0 || o.shard as u64 >= self.shards.len() as u64 {
        return Err(Error::Config(format!(
          "Override for key {} targets shard {}, but only {} shards are configured",
          o.key,
          o.shard,
          self.shards.len()
        )));
      }
    }

    Ok(())
  }
}

fn parse_flag(val: &str) -> bool {
  val.eq_ignore_ascii_case("true") || val == "1"
}
