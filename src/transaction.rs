//! Single-shard transaction boundary.
//!
//! A [`ShardTransaction`] moves through `Idle -> Active -> {Committed |
//! RolledBack}`. `begin` binds it to the shard the key in scope resolves to
//! at that instant; from then on every statement runs on that shard's
//! session. A transaction never spans shards.

use std::fmt;

use crate::context::ShardContext;
use crate::engine::{ConnectionResource, Session};
use crate::error::{Error, Result};
use crate::provider::RoutingConnectionProvider;
use crate::shard::ShardKey;
use crate::value::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
  Idle,
  Active,
  Committed,
  RolledBack,
  /// Commit was attempted and the engine reported a failure.
  Failed,
}

impl fmt::Display for TransactionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TransactionState::Idle => "idle",
      TransactionState::Active => "active",
      TransactionState::Committed => "committed",
      TransactionState::RolledBack => "rolled back",
      TransactionState::Failed => "failed",
    };
    f.write_str(name)
  }
}

/// Where an active transaction is pinned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
  pub key: ShardKey,
  pub shard_index: usize,
  pub shard_name: String,
}

pub struct ShardTransaction<'a, R: ConnectionResource> {
  provider: &'a RoutingConnectionProvider<R>,
  state: TransactionState,
  binding: Option<Binding>,
  session: Option<R::Session>,
}

impl<'a, R: ConnectionResource + 'static> ShardTransaction<'a, R> {
  pub(crate) fn new(provider: &'a RoutingConnectionProvider<R>) -> Self {
    Self {
      provider,
      state: TransactionState::Idle,
      binding: None,
      session: None,
    }
  }

  pub fn state(&self) -> TransactionState {
    self.state
  }

  /// The shard this transaction is pinned to, once begun.
  pub fn binding(&self) -> Option<&Binding> {
    self.binding.as_ref()
  }

  /// Starts the transaction on the shard owning the key in `ctx`.
  ///
  /// # Errors
  ///
  /// - `Error::NoShardKey` if `ctx` has no key set.
  /// - `Error::Transaction` if the transaction is not idle.
  /// - `Error::Engine` if the session cannot be opened or `BEGIN` fails.
  pub fn begin(&mut self, ctx: &ShardContext) -> Result<()> {
    let key = ctx.require("cannot begin transaction without shard key")?;
    self.expect_state(TransactionState::Idle, "begin")?;

    let shard = self.provider.acquire_shard(ctx)?;
    let mut session = shard.resource().open_session().map_err(Error::Engine)?;
    session.begin().map_err(Error::Engine)?;

    tracing::debug!(
      target: "shardroute::transaction",
      key,
      shard = shard.name(),
      "transaction started"
    );

    self.binding = Some(Binding {
      key,
      shard_index: shard.index(),
      shard_name: shard.name().to_owned(),
    });
    self.session = Some(session);
    self.state = TransactionState::Active;
    Ok(())
  }

  /// Verifies that `key` currently resolves to this transaction's shard.
  ///
  /// # Errors
  ///
  /// Returns `Error::CrossShard` if it resolves elsewhere.
  pub fn ensure_covers(&self, key: ShardKey) -> Result<()> {
    let binding = self.active_binding("ensure_covers")?;
    let shard_index = self.provider.router().resolve(key)?.index();

    if shard_index != binding.shard_index {
      return Err(Error::CrossShard {
        first: binding.key,
        first_shard: binding.shard_index,
        second: key,
        second_shard: shard_index,
      });
    }
    Ok(())
  }

  /// Direct access to the pinned session, for repository operations.
  pub fn session(&mut self) -> Result<&mut R::Session> {
    self.expect_state(TransactionState::Active, "use session of")?;
    self
      .session
      .as_mut()
      .ok_or_else(|| Error::Transaction("active transaction has no session".into()))
  }

  pub fn execute(&mut self, sql: &str, args: &[Value]) -> Result<usize> {
    self.session()?.execute(sql, args).map_err(Error::Engine)
  }

  pub fn query(&mut self, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
    self.session()?.query(sql, args).map_err(Error::Engine)
  }

  /// Commits. On engine failure the transaction ends up `Failed` and the
  /// commit error is returned; nothing is retried. A rollback is still issued
  /// so the session does not go back to its pool with the transaction open.
  pub fn commit(&mut self) -> Result<()> {
    self.expect_state(TransactionState::Active, "commit")?;
    let mut session = self.take_session()?;

    match session.commit() {
      Ok(()) => {
        self.state = TransactionState::Committed;
        tracing::debug!(target: "shardroute::transaction", binding = ?self.binding, "transaction committed");
        Ok(())
      }
      Err(e) => {
        self.state = TransactionState::Failed;
        tracing::error!(
          target: "shardroute::transaction",
          binding = ?self.binding,
          error = %e,
          "transaction commit failed"
        );
        if let Err(rollback) = session.rollback() {
          tracing::warn!(
            target: "shardroute::transaction",
            binding = ?self.binding,
            error = %rollback,
            "rollback after failed commit also failed"
          );
        }
        Err(Error::Engine(e))
      }
    }
  }

  /// Rolls back. The state becomes `RolledBack` even if the engine reports
  /// a failure; the failure is logged and returned.
  pub fn rollback(&mut self) -> Result<()> {
    self.expect_state(TransactionState::Active, "roll back")?;
    let mut session = self.take_session()?;
    self.state = TransactionState::RolledBack;

    match session.rollback() {
      Ok(()) => {
        tracing::debug!(target: "shardroute::transaction", binding = ?self.binding, "transaction rolled back");
        Ok(())
      }
      Err(e) => {
        tracing::error!(
          target: "shardroute::transaction",
          binding = ?self.binding,
          error = %e,
          "transaction rollback failed"
        );
        Err(Error::Engine(e))
      }
    }
  }

  fn take_session(&mut self) -> Result<R::Session> {
    self
      .session
      .take()
      .ok_or_else(|| Error::Transaction("active transaction has no session".into()))
  }

  fn active_binding(&self, action: &str) -> Result<&Binding> {
    self.expect_state(TransactionState::Active, action)?;
    self
      .binding
      .as_ref()
      .ok_or_else(|| Error::Transaction("active transaction is not bound to a shard".into()))
  }

  fn expect_state(&self, expected: TransactionState, action: &str) -> Result<()> {
    if self.state != expected {
      return Err(Error::Transaction(format!(
        "cannot {} a transaction that is {}",
        action, self.state
      )));
    }
    Ok(())
  }
}

impl<R: ConnectionResource> Drop for ShardTransaction<'_, R> {
  fn drop(&mut self) {
    if self.state != TransactionState::Active {
      return;
    }

    if let Some(mut session) = self.session.take() {
      tracing::warn!(
        target: "shardroute::transaction",
        binding = ?self.binding,
        "active transaction dropped, rolling back"
      );
      if let Err(e) = session.rollback() {
        tracing::error!(target: "shardroute::transaction", error = %e, "implicit rollback failed");
      }
    }
    self.state = TransactionState::RolledBack;
  }
}
