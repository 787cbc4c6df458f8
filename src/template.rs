//! Keyed statement execution.
//!
//! [`ShardTemplate`] is the only place that puts keys into a
//! [`ShardContext`]. Every operation takes the shard key as its first
//! argument, enters a context scope for exactly the duration of the call, and
//! reports engine failures as `Error::DataAccess` tagged with that key.

use std::sync::Arc;

use crate::context::ShardContext;
use crate::engine::{ConnectionResource, Engine};
use crate::error::Result;
use crate::router::ShardRouter;
use crate::shard::ShardKey;
use crate::transaction::ShardTransaction;
use crate::value::{FromValue, Row, Value};

pub struct ShardTemplate<R> {
  engine: Arc<Engine<R>>,
}

impl<R> Clone for ShardTemplate<R> {
  fn clone(&self) -> Self {
    Self {
      engine: self.engine.clone(),
    }
  }
}

impl<R: ConnectionResource + 'static> ShardTemplate<R> {
  pub fn new(engine: impl Into<Arc<Engine<R>>>) -> Self {
    Self { engine: engine.into() }
  }

  /// Runs `op` with `key` in scope on the caller's context.
  ///
  /// The previous key of `ctx` is restored on every exit path, including
  /// panics. Engine failures come back as `Error::DataAccess { key, .. }`.
  pub fn scoped<T>(
    &self,
    ctx: &mut ShardContext,
    key: ShardKey,
    op: impl FnOnce(&Engine<R>, &ShardContext) -> Result<T>,
  ) -> Result<T> {
    let scope = ctx.enter(key);
    op(self.engine.as_ref(), &*scope).map_err(|e| e.keyed(key))
  }

  /// Runs `op` in a fresh unit of work keyed by `key`.
  fn keyed<T>(&self, key: ShardKey, op: impl FnOnce(&Engine<R>, &ShardContext) -> Result<T>) -> Result<T> {
    self.scoped(&mut ShardContext::new(), key, op)
  }

  /// Executes an insert/update/delete and returns the affected row count.
  pub fn update(&self, key: ShardKey, sql: &str, args: &[Value]) -> Result<usize> {
    self.keyed(key, |engine, ctx| engine.execute(ctx, sql, args))
  }

  /// Executes `sql` once per argument set on the key's shard.
  pub fn batch_update(&self, key: ShardKey, sql: &str, batch: &[Vec<Value>]) -> Result<Vec<usize>> {
    self.keyed(key, |engine, ctx| engine.execute_batch(ctx, sql, batch))
  }

  pub fn query(&self, key: ShardKey, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
    self.keyed(key, |engine, ctx| engine.query(ctx, sql, args))
  }

  /// First row of the result set, if any.
  pub fn query_one(&self, key: ShardKey, sql: &str, args: &[Value]) -> Result<Option<Row>> {
    Ok(self.query(key, sql, args)?.into_iter().next())
  }

  /// Maps every result row through `mapper`.
  pub fn query_map<T>(
    &self,
    key: ShardKey,
    sql: &str,
    args: &[Value],
    mapper: impl FnMut(&Row) -> Result<T>,
  ) -> Result<Vec<T>> {
    self.keyed(key, |engine, ctx| engine.query(ctx, sql, args)?.iter().map(mapper).collect())
  }

  /// First column of the first row, converted to `T`.
  pub fn query_scalar<T: FromValue>(&self, key: ShardKey, sql: &str, args: &[Value]) -> Result<Option<T>> {
    self.keyed(key, |engine, ctx| {
      engine
        .query(ctx, sql, args)?
        .first()
        .map(|row| row.get_at::<T>(0))
        .transpose()
    })
  }

  /// Runs `body` inside a transaction on `key`'s shard.
  ///
  /// Commits when `body` returns `Ok`, rolls back when it returns `Err` (the
  /// body's error wins over a rollback failure, which is only logged). A
  /// panic in `body` rolls back as the transaction unwinds.
  ///
  /// Statements in `body` must go through `tx`. A keyed call on this
  /// template for a key on the same shard needs a second connection, which
  /// the transaction may be holding; with the SQLite backend that call fails
  /// immediately instead of waiting.
  pub fn in_transaction<T>(
    &self,
    key: ShardKey,
    body: impl FnOnce(&mut ShardTransaction<'_, R>) -> Result<T>,
  ) -> Result<T> {
    self.keyed(key, |engine, ctx| run_transaction(engine, ctx, &[], body))
  }

  /// Runs `body` in one transaction that covers both keys.
  ///
  /// # Errors
  ///
  /// Returns `Error::CrossShard` before anything is executed if the keys
  /// resolve to different shards. The check is repeated once the
  /// transaction is bound, so an override installed in between cannot split
  /// the work.
  ///
  /// As with [`in_transaction`](Self::in_transaction), `body` must run its
  /// statements through `tx`.
  pub fn in_same_shard_transaction<T>(
    &self,
    first: ShardKey,
    second: ShardKey,
    body: impl FnOnce(&mut ShardTransaction<'_, R>) -> Result<T>,
  ) -> Result<T> {
    self.router().ensure_same_shard(first, second)?;
    self.keyed(first, |engine, ctx| run_transaction(engine, ctx, &[second], body))
  }

  /// True when both keys currently resolve to the same shard.
  pub fn on_same_shard(&self, first: ShardKey, second: ShardKey) -> Result<bool> {
    self.router().on_same_shard(first, second)
  }

  pub fn router(&self) -> &dyn ShardRouter<R> {
    self.engine.provider().router()
  }

  /// The underlying engine. Calls made through it need a context the caller
  /// manages; prefer the keyed operations.
  pub fn engine(&self) -> &Engine<R> {
    &self.engine
  }
}

fn run_transaction<R, T>(
  engine: &Engine<R>,
  ctx: &ShardContext,
  also_covers: &[ShardKey],
  body: impl FnOnce(&mut ShardTransaction<'_, R>) -> Result<T>,
) -> Result<T>
where
  R: ConnectionResource + 'static,
{
  let mut tx = engine.transaction();
  tx.begin(ctx)?;

  let outcome = also_covers
    .iter()
    .try_for_each(|key| tx.ensure_covers(*key))
    .and_then(|()| body(&mut tx));

  match outcome {
    Ok(value) => {
      tx.commit()?;
      Ok(value)
    }
    Err(e) => {
      // Rollback failures are logged by the transaction itself.
      let _ = tx.rollback();
      Err(e)
    }
  }
}
