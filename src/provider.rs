//! Connection acquisition driven by the shard key in scope.

use std::sync::Arc;

use crate::context::ShardContext;
use crate::error::Result;
use crate::router::ShardRouter;
use crate::shard::Shard;

/// Hands out the physical connection resource of whichever shard owns the
/// key currently in scope.
///
/// Resolution happens on every call, so override changes made between
/// entering a scope and acquiring a connection are honored.
pub struct RoutingConnectionProvider<R> {
  router: Arc<dyn ShardRouter<R>>,
}

impl<R> Clone for RoutingConnectionProvider<R> {
  fn clone(&self) -> Self {
    Self {
      router: self.router.clone(),
    }
  }
}

impl<R: 'static> RoutingConnectionProvider<R> {
  pub fn new(router: Arc<dyn ShardRouter<R>>) -> Self {
    Self { router }
  }

  /// Resolves the key in `ctx` to its shard.
  ///
  /// # Errors
  ///
  /// Returns `Error::NoShardKey` if `ctx` has no key set. There is no
  /// fallback shard.
  pub fn acquire_shard(&self, ctx: &ShardContext) -> Result<&Shard<R>> {
    let key = ctx.require("use a shard-scoped operation or enter a context before acquiring a connection")?;
    let shard = self.router.resolve(key)?;

    tracing::trace!(
      target: "shardroute::provider",
      key,
      shard = shard.name(),
      "connection routed"
    );
    Ok(shard)
  }

  /// Returns the connection resource for the key in `ctx`.
  pub fn acquire_connection(&self, ctx: &ShardContext) -> Result<&R> {
    self.acquire_shard(ctx).map(Shard::resource)
  }

  pub fn router(&self) -> &dyn ShardRouter<R> {
    self.router.as_ref()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Error;
  use crate::router::HashShardRouter;
  use crate::shard::ShardRegistry;

  fn provider() -> (Arc<HashShardRouter<&'static str>>, RoutingConnectionProvider<&'static str>) {
    let registry = ShardRegistry::new([("s0", "pool-0"), ("s1", "pool-1"), ("s2", "pool-2")]).unwrap();
    let router = Arc::new(HashShardRouter::new(registry));
    let provider = RoutingConnectionProvider::new(router.clone() as Arc<dyn ShardRouter<&'static str>>);
    (router, provider)
  }

  #[test]
  fn test_requires_key_in_scope() {
    let (_, provider) = provider();
    let ctx = ShardContext::new();

    assert!(matches!(provider.acquire_connection(&ctx), Err(Error::NoShardKey(_))));
  }

  #[test]
  fn test_acquires_resolved_shard_resource() {
    let (_, provider) = provider();
    let mut ctx = ShardContext::new();

    // Key 1 hashes to shard 2, key 8 to shard 0.
    let scoped = ctx.enter(1);
    assert_eq!(*provider.acquire_connection(&scoped).unwrap(), "pool-2");
    drop(scoped);

    let scoped = ctx.enter(8);
    assert_eq!(*provider.acquire_connection(&scoped).unwrap(), "pool-0");
  }

  #[test]
  fn test_override_applied_at_acquisition_time() {
    let (router, provider) = provider();
    let mut ctx = ShardContext::new();
    let scoped = ctx.enter(1);

    assert_eq!(*provider.acquire_connection(&scoped).unwrap(), "pool-2");

    router.add_override(1, 1).unwrap();
    assert_eq!(*provider.acquire_connection(&scoped).unwrap(), "pool-1");

    router.remove_override(1);
    assert_eq!(*provider.acquire_connection(&scoped).unwrap(), "pool-2");
  }
}
