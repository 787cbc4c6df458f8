//! # shardroute
//!
//! `shardroute` routes data access to one of several independent databases
//! ("shards") based on a 64-bit shard key, such as a user or account id.
//!
//! Application code never picks a shard. Each operation names the key it
//! works on; the key is placed in a [`ShardContext`] for exactly the
//! duration of the operation, and the connection provider resolves it to a
//! shard when a connection is needed.
//!
//! ## Key Features
//!
//! * **Deterministic placement**: Murmur3 hashing of the key, stable across
//!   processes and restarts.
//! * **Overrides**: individual keys can be pinned to a shard at runtime
//!   (VIP isolation, live migration) without blocking routing.
//! * **Scoped context**: the key in scope is restored on every exit path,
//!   including errors and panics.
//! * **Single-shard transactions**: work on keys that live on different
//!   shards is rejected before it starts.
//!
//! ## Example
//!
//! ```no_run
//! use shardroute::sqlite::open_sharding;
//! use shardroute::{ShardingConfig, args};
//!
//! # fn main() -> shardroute::Result<()> {
//! let config = ShardingConfig::load(Some("sharding.toml"))?;
//! let Some(sharding) = open_sharding(&config)? else {
//!   return Ok(());
//! };
//! let db = sharding.template();
//!
//! // Runs on whichever shard owns user 42.
//! db.update(42, "UPDATE users SET name = ? WHERE id = ?", &args!["ana", 42_i64])?;
//!
//! // Both rows must live on one shard, or nothing runs.
//! db.in_same_shard_transaction(42, 43, |tx| {
//!   tx.execute("UPDATE wallets SET balance = balance - 10 WHERE user_id = ?", &args![42_i64])?;
//!   tx.execute("UPDATE wallets SET balance = balance + 10 WHERE user_id = ?", &args![43_i64])?;
//!   Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
mod context;
mod engine;
mod error;
mod provider;
mod repository;
pub mod resolver;
mod router;
mod shard;
mod template;
mod transaction;
mod value;

// SQLite backend (optional feature)
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(test)]
mod testing;

// Re-exports for the flat public API
pub use bootstrap::{Sharding, build_router};
pub use config::{ConnectionConfig, OverrideConfig, ShardConfig, ShardingConfig, Strategy};
pub use context::{ContextGuard, ShardContext};
pub use engine::{ConnectionResource, Engine, Session};
pub use error::{BoxError, Error, Result};
pub use provider::RoutingConnectionProvider;
pub use repository::{Entity, Repository, ShardRepository};
pub use resolver::HashStrategy;
pub use router::{HashShardRouter, ShardRouter};
pub use shard::{Shard, ShardKey, ShardRegistry};
pub use template::ShardTemplate;
pub use transaction::{Binding, ShardTransaction, TransactionState};
pub use value::{FromValue, Row, Value};
