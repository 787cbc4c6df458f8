//! Startup wiring: configuration -> registry -> router -> engine.
//!
//! Nothing here is global. The caller builds a [`Sharding`] once and hands
//! clones of its template or repositories to whatever needs them.

use std::sync::Arc;

use crate::config::{ShardConfig, ShardingConfig};
use crate::engine::{ConnectionResource, Engine};
use crate::error::Result;
use crate::provider::RoutingConnectionProvider;
use crate::repository::{Entity, ShardRepository};
use crate::router::{HashShardRouter, ShardRouter};
use crate::shard::{Shard, ShardKey, ShardRegistry};
use crate::template::ShardTemplate;

/// Builds the router described by `config`.
///
/// Returns `Ok(None)` when sharding is disabled, without opening anything.
/// Otherwise each shard's resource is opened through `open`, in list order,
/// and configured overrides are installed.
///
/// # Errors
///
/// - `Error::Config` if the configuration does not validate.
/// - Whatever `open` returns for the first shard that fails to open.
pub fn build_router<R, F>(config: &ShardingConfig, mut open: F) -> Result<Option<Arc<HashShardRouter<R>>>>
where
  F: FnMut(&ShardConfig) -> Result<R>,
{
  if !config.enabled {
    tracing::debug!(target: "shardroute::bootstrap", "sharding disabled, no router built");
    return Ok(None);
  }
  config.validate()?;

  let mut shards = Vec::with_capacity(config.shards.len());
  for (index, shard_config) in config.shards.iter().enumerate() {
    let resource = open(shard_config)?;
    shards.push(Shard::new(shard_config.name.clone(), index, resource));
  }

  let router = HashShardRouter::new(ShardRegistry::from_shards(shards)?);
  for o in &config.overrides {
    router.add_override(o.key, o.shard)?;
    tracing::warn!(
      target: "shardroute::bootstrap",
      key = o.key,
      shard = o.shard,
      "configured override pins key outside hash placement"
    );
  }

  tracing::info!(
    target: "shardroute::bootstrap",
    shards = router.registry().len(),
    overrides = router.override_count(),
    "shard router ready"
  );
  Ok(Some(Arc::new(router)))
}

/// The assembled routing stack.
pub struct Sharding<R> {
  router: Arc<HashShardRouter<R>>,
  template: ShardTemplate<R>,
}

impl<R> Clone for Sharding<R> {
  fn clone(&self) -> Self {
    Self {
      router: self.router.clone(),
      template: self.template.clone(),
    }
  }
}

impl<R: ConnectionResource + 'static> Sharding<R> {
  /// Wires provider, engine and template around an existing router.
  pub fn new(router: Arc<HashShardRouter<R>>) -> Self {
    let provider = RoutingConnectionProvider::new(router.clone() as Arc<dyn ShardRouter<R>>);
    let template = ShardTemplate::new(Engine::new(provider));
    Self { router, template }
  }

  /// [`build_router`] followed by [`Sharding::new`].
  pub fn from_config<F>(config: &ShardingConfig, open: F) -> Result<Option<Self>>
  where
    F: FnMut(&ShardConfig) -> Result<R>,
  {
    Ok(build_router(config, open)?.map(Self::new))
  }

  pub fn router(&self) -> &HashShardRouter<R> {
    &self.router
  }

  pub fn template(&self) -> &ShardTemplate<R> {
    &self.template
  }

  pub fn engine(&self) -> &Engine<R> {
    self.template.engine()
  }

  pub fn repository<T: Entity>(&self) -> ShardRepository<T, R> {
    ShardRepository::new(self.template.clone())
  }

  /// See [`HashShardRouter::add_override`].
  pub fn add_override(&self, key: ShardKey, index: i64) -> Result<()> {
    self.router.add_override(key, index)
  }

  pub fn remove_override(&self, key: ShardKey) {
    self.router.remove_override(key)
  }
}
