//! Shard descriptors and the immutable registry that holds them.

use std::fmt;
use std::ops::Index;

use crate::error::{Error, Result};

/// The partitioning attribute (e.g. an account id). Any `i64` is valid,
/// including zero and negative values.
pub type ShardKey = i64;

/// A single backend partition.
///
/// `index` is the shard's position in its [`ShardRegistry`]; it is also the
/// value stored in router overrides and produced by the resolver.
pub struct Shard<R> {
  name: String,
  index: usize,
  resource: R,
}

impl<R> Shard<R> {
  pub fn new(name: impl Into<String>, index: usize, resource: R) -> Self {
    Self {
      name: name.into(),
      index,
      resource,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn index(&self) -> usize {
    self.index
  }

  /// The opaque connection resource (pool, database handle, ...) for this shard.
  pub fn resource(&self) -> &R {
    &self.resource
  }
}

impl<R> fmt::Debug for Shard<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Shard")
      .field("name", &self.name)
      .field("index", &self.index)
      .finish_non_exhaustive()
  }
}

/// An ordered, non-empty list of shards with contiguous indices `0..N`.
///
/// The registry is immutable once built.
pub struct ShardRegistry<R> {
  shards: Vec<Shard<R>>,
}

impl<R> ShardRegistry<R> {
  /// Builds a registry from `(name, resource)` pairs. Indices are assigned by
  /// position.
  ///
  /// # Errors
  ///
  /// Returns `Error::Config` if the list is empty.
  pub fn new<N: Into<String>>(entries: impl IntoIterator<Item = (N, R)>) -> Result<Self> {
    let shards: Vec<Shard<R>> = entries
      .into_iter()
      .enumerate()
      .map(|(index, (name, resource))| Shard::new(name, index, resource))
      .collect();

    Self::from_shards(shards)
  }

  /// Builds a registry from pre-constructed shards.
  ///
  /// # Errors
  ///
  /// Returns `Error::Config` if the list is empty or if any shard's index
  /// does not match its position.
  pub fn from_shards(shards: Vec<Shard<R>>) -> Result<Self> {
    if shards.is_empty() {
      return Err(Error::Config("Shards cannot be empty".into()));
    }

    if let Some((position, shard)) = shards.iter().enumerate().find(|(i, s)| s.index != *i) {
      return Err(Error::Config(format!(
        "Shard '{}' has index {} but sits at position {}",
        shard.name, shard.index, position
      )));
    }

    Ok(Self { shards })
  }

  pub fn len(&self) -> usize {
    self.shards.len()
  }

  /// Always false for a constructed registry; provided for API symmetry.
  pub fn is_empty(&self) -> bool {
    self.shards.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&Shard<R>> {
    self.shards.get(index)
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Shard<R>> {
    self.shards.iter()
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.shards.iter().map(|s| s.name())
  }
}

impl<R> Index<usize> for ShardRegistry<R> {
  type Output = Shard<R>;

  fn index(&self, index: usize) -> &Self::Output {
    &self.shards[index]
  }
}

impl<'a, R> IntoIterator for &'a ShardRegistry<R> {
  type Item = &'a Shard<R>;
  type IntoIter = std::slice::Iter<'a, Shard<R>>;

  fn into_iter(self) -> Self::IntoIter {
    self.shards.iter()
  }
}

impl<R> fmt::Debug for ShardRegistry<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.shards.iter()).finish()
  }
}
