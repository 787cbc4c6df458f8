//! The carrier for "the shard key currently in effect".
//!
//! A [`ShardContext`] belongs to exactly one unit of work and is passed by
//! reference to whatever needs it (the connection provider, the transaction
//! boundary). There is no global or thread-local slot: two units of work
//! running concurrently each own their own context, so neither can observe
//! the other's key.
//!
//! Scopes nest. [`ShardContext::enter`] remembers the key that was in effect
//! and the returned [`ContextGuard`] restores it when dropped, on normal
//! return, early `?` return, panic unwind, or when the owning future is
//! dropped mid-flight.

use std::ops::{Deref, DerefMut};

use crate::error::{Error, Result};
use crate::shard::ShardKey;

/// Per-unit-of-work shard key slot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShardContext {
  key: Option<ShardKey>,
}

impl ShardContext {
  /// Creates an unset context.
  pub fn new() -> Self {
    Self { key: None }
  }

  /// Overwrites the key for the remainder of this unit of work.
  ///
  /// Prefer [`enter`](Self::enter), which guarantees the key is released.
  pub fn set(&mut self, key: ShardKey) {
    self.key = Some(key);
  }

  pub fn get(&self) -> Option<ShardKey> {
    self.key
  }

  /// Unsets the key. Calling it on an unset context is a no-op.
  pub fn clear(&mut self) {
    self.key = None;
  }

  pub fn is_set(&self) -> bool {
    self.key.is_some()
  }

  /// Returns the key in scope, or `Error::NoShardKey` carrying `reason`.
  pub fn require(&self, reason: &'static str) -> Result<ShardKey> {
    self.key.ok_or(Error::NoShardKey(reason))
  }

  /// Makes `key` current until the returned guard is dropped, at which
  /// point the previous key (or none) is restored.
  pub fn enter(&mut self, key: ShardKey) -> ContextGuard<'_> {
    let previous = self.key.replace(key);
    ContextGuard { ctx: self, previous }
  }

  /// Runs `body` with `key` in scope and restores the previous key on every
  /// exit path.
  pub fn with_context<T>(&mut self, key: ShardKey, body: impl FnOnce(&mut ShardContext) -> T) -> T {
    let mut guard = self.enter(key);
    body(&mut *guard)
  }
}

/// Scope handle returned by [`ShardContext::enter`].
///
/// Dereferences to the context, so nested scopes and reads go through it.
#[must_use = "the key is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard<'a> {
  ctx: &'a mut ShardContext,
  previous: Option<ShardKey>,
}

impl ContextGuard<'_> {
  /// The key that will be restored when this scope ends.
  pub fn previous(&self) -> Option<ShardKey> {
    self.previous
  }
}

impl Deref for ContextGuard<'_> {
  type Target = ShardContext;

  fn deref(&self) -> &ShardContext {
    self.ctx
  }
}

impl DerefMut for ContextGuard<'_> {
  fn deref_mut(&mut self) -> &mut ShardContext {
    self.ctx
  }
}

impl Drop for ContextGuard<'_> {
  fn drop(&mut self) {
    self.ctx.key = self.previous;
  }
}
