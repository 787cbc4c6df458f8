//! Key-based routing to determine shard assignment.
//!
//! Explicit overrides (VIP pinning, live migration) take precedence over the
//! hash placement computed by [`HashStrategy`].

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::resolver::HashStrategy;
use crate::shard::{Shard, ShardKey, ShardRegistry};

/// Resolves shard keys to shards.
pub trait ShardRouter<R>: Send + Sync {
  /// Returns the shard that owns `key`.
  fn resolve(&self, key: ShardKey) -> Result<&Shard<R>>;

  /// Returns the total number of shards.
  fn shard_count(&self) -> usize;

  /// Returns the shard at `index`.
  ///
  /// # Errors
  ///
  /// Returns `Error::InvalidShardIndex` if `index` is out of range.
  fn shard_at(&self, index: usize) -> Result<&Shard<R>>;

  /// True when both keys currently resolve to the same shard.
  fn on_same_shard(&self, first: ShardKey, second: ShardKey) -> Result<bool> {
    Ok(self.resolve(first)?.index() == self.resolve(second)?.index())
  }

  /// Fails with `Error::CrossShard` unless both keys resolve to the same
  /// shard. Returns that shard's index on success.
  fn ensure_same_shard(&self, first: ShardKey, second: ShardKey) -> Result<usize> {
    let first_shard = self.resolve(first)?.index();
    let second_shard = self.resolve(second)?.index();

    if first_shard != second_shard {
      return Err(Error::CrossShard {
        first,
        first_shard,
        second,
        second_shard,
      });
    }

    Ok(first_shard)
  }
}

/// Hash-based router with a runtime-mutable override table.
///
/// The override table is a concurrent map: lookups for one key never wait on
/// writes to an unrelated key, and a reader sees either the old or the new
/// entry, never a partial one.
pub struct HashShardRouter<R> {
  registry: Arc<ShardRegistry<R>>,
  strategy: HashStrategy,
  overrides: DashMap<ShardKey, usize>,
}

impl<R> HashShardRouter<R> {
  /// Creates a router over `registry` with an empty override table.
  pub fn new(registry: impl Into<Arc<ShardRegistry<R>>>) -> Self {
    Self {
      registry: registry.into(),
      strategy: HashStrategy::new(),
      overrides: DashMap::new(),
    }
  }

  /// Creates a router with an initial set of overrides.
  ///
  /// # Errors
  ///
  /// Returns `Error::InvalidShardIndex` if any override targets an index
  /// outside the registry.
  pub fn with_overrides(
    registry: impl Into<Arc<ShardRegistry<R>>>,
    overrides: impl IntoIterator<Item = (ShardKey, i64)>,
  ) -> Result<Self> {
    let router = Self::new(registry);
    for (key, index) in overrides {
      router.add_override(key, index)?;
    }
    Ok(router)
  }

  /// Pins `key` to the shard at `index`, replacing any previous override.
  ///
  /// # Errors
  ///
  /// Returns `Error::InvalidShardIndex` if `index` is negative or not less
  /// than the shard count. The table is left unchanged in that case.
  pub fn add_override(&self, key: ShardKey, index: i64) -> Result<()> {
    let target = self.checked_index(index)?;
    let previous = self.overrides.insert(key, target);

    tracing::debug!(
      target: "shardroute::router",
      key,
      shard = target,
      ?previous,
      "override installed"
    );
    Ok(())
  }

  /// Removes the override for `key`, if any.
  pub fn remove_override(&self, key: ShardKey) {
    if let Some((_, shard)) = self.overrides.remove(&key) {
      tracing::debug!(target: "shardroute::router", key, shard, "override removed");
    }
  }

  /// Returns the override target for `key`, if one is installed.
  pub fn override_for(&self, key: ShardKey) -> Option<usize> {
    self.overrides.get(&key).map(|entry| *entry.value())
  }

  /// Returns the number of installed overrides.
  pub fn override_count(&self) -> usize {
    self.overrides.len()
  }

  /// Index the hash strategy assigns to `key`, ignoring overrides.
  pub fn hashed_index(&self, key: ShardKey) -> Result<usize> {
    self.strategy.shard_index(key, self.registry.len())
  }

  pub fn registry(&self) -> &ShardRegistry<R> {
    &self.registry
  }

  fn checked_index(&self, index: i64) -> Result<usize> {
    let shard_count = self.registry.len();
    match usize::try_from(index) {
      Ok(i) if i < shard_count => Ok(i),
      _ => Err(Error::InvalidShardIndex { index, shard_count }),
    }
  }
}

impl<R: Send + Sync> ShardRouter<R> for HashShardRouter<R> {
  fn resolve(&self, key: ShardKey) -> Result<&Shard<R>> {
    // Copy the index out so the map guard is released before indexing.
    if let Some(index) = self.override_for(key) {
      return self.shard_at(index);
    }

    let index = self.hashed_index(key)?;
    Ok(&self.registry[index])
  }

  fn shard_count(&self) -> usize {
    self.registry.len()
  }

  fn shard_at(&self, index: usize) -> Result<&Shard<R>> {
    self.registry.get(index).ok_or(Error::InvalidShardIndex {
      index: i64::try_from(index).unwrap_or(i64::MAX),
      shard_count: self.registry.len(),
    })
  }
}
