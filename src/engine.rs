//! The non-sharded data-access engine and the connection boundary it drives.
//!
//! The engine knows nothing about shard keys: it asks the
//! [`RoutingConnectionProvider`] for "the connection" given a
//! [`ShardContext`], and runs statements on whatever comes back.

use crate::context::ShardContext;
use crate::error::{BoxError, Error, Result};
use crate::provider::RoutingConnectionProvider;
use crate::transaction::ShardTransaction;
use crate::value::{Row, Value};

/// A physical per-shard connection resource (a pool, a database handle).
pub trait ConnectionResource: Send + Sync {
  type Session: Session;

  /// Checks out a session. May block while the resource is busy.
  fn open_session(&self) -> std::result::Result<Self::Session, BoxError>;
}

/// Exclusive access to one shard connection for the lifetime of the value.
pub trait Session {
  /// Runs a statement and returns the number of affected rows.
  fn execute(&mut self, sql: &str, args: &[Value]) -> std::result::Result<usize, BoxError>;

  /// Runs a query and returns all result rows.
  fn query(&mut self, sql: &str, args: &[Value]) -> std::result::Result<Vec<Row>, BoxError>;

  fn begin(&mut self) -> std::result::Result<(), BoxError>;

  fn commit(&mut self) -> std::result::Result<(), BoxError>;

  fn rollback(&mut self) -> std::result::Result<(), BoxError>;
}

/// Statement execution over routed connections.
pub struct Engine<R> {
  provider: RoutingConnectionProvider<R>,
}

impl<R: ConnectionResource + 'static> Engine<R> {
  pub fn new(provider: RoutingConnectionProvider<R>) -> Self {
    Self { provider }
  }

  pub fn provider(&self) -> &RoutingConnectionProvider<R> {
    &self.provider
  }

  /// Checks out a session on the shard selected by `ctx` and runs `op` on it.
  pub fn with_session<T>(&self, ctx: &ShardContext, op: impl FnOnce(&mut R::Session) -> Result<T>) -> Result<T> {
    let resource = self.provider.acquire_connection(ctx)?;
    let mut session = resource.open_session().map_err(Error::Engine)?;
    op(&mut session)
  }

  pub fn execute(&self, ctx: &ShardContext, sql: &str, args: &[Value]) -> Result<usize> {
    self.with_session(ctx, |session| session.execute(sql, args).map_err(Error::Engine))
  }

  /// Runs `sql` once per argument set, in order, on a single session.
  ///
  /// Stops at the first failure. The batch is not atomic on its own; wrap
  /// it in a transaction when it must be.
  pub fn execute_batch(&self, ctx: &ShardContext, sql: &str, batch: &[Vec<Value>]) -> Result<Vec<usize>> {
    self.with_session(ctx, |session| {
      batch
        .iter()
        .map(|args| session.execute(sql, args).map_err(Error::Engine))
        .collect()
    })
  }

  pub fn query(&self, ctx: &ShardContext, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
    self.with_session(ctx, |session| session.query(sql, args).map_err(Error::Engine))
  }

  /// Creates an idle transaction boundary bound to this engine's provider.
  pub fn transaction(&self) -> ShardTransaction<'_, R> {
    ShardTransaction::new(&self.provider)
  }
}
