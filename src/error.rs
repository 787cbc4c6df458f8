use std::io;
use thiserror::Error;

use crate::shard::ShardKey;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause carried by engine and data-access failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Invalid shard index: {index} (shard count: {shard_count})")]
  InvalidShardIndex { index: i64, shard_count: usize },

  #[error("No shard key in scope: {0}")]
  NoShardKey(&'static str),

  #[error(
    "Cross-shard operation unsupported: key {first} resolves to shard {first_shard}, \
     key {second} resolves to shard {second_shard}"
  )]
  CrossShard {
    first: ShardKey,
    first_shard: usize,
    second: ShardKey,
    second_shard: usize,
  },

  #[error("Shard operation failed for key {key}: {source}")]
  DataAccess {
    key: ShardKey,
    #[source]
    source: BoxError,
  },

  #[error("Engine Error: {0}")]
  Engine(#[source] BoxError),

  #[error("Transaction Error: {0}")]
  Transaction(String),

  #[error("I/O Error: {0}")]
  Io(#[from] io::Error),

  #[error("Failed to parse configuration: {0}")]
  Toml(#[from] toml::de::Error),
}

impl Error {
  /// Wraps any engine-level failure.
  pub fn engine(source: impl Into<BoxError>) -> Self {
    Error::Engine(source.into())
  }

  /// Attaches the shard key in scope to an engine failure.
  ///
  /// Errors that already describe a routing or context problem pass through
  /// untouched so callers can still match on them.
  pub(crate) fn keyed(self, key: ShardKey) -> Self {
    match self {
      Error::Engine(source) => Error::DataAccess { key, source },
      other => other,
    }
  }
}
