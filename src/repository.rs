//! Generic CRUD over mapped entities, plus its keyed wrapper.
//!
//! [`Repository`] generates portable SQL for an [`Entity`] and runs it on a
//! [`Session`]; it has no notion of shards. [`ShardRepository`] composes a
//! repository with a [`ShardTemplate`] and exposes the same operations with
//! a leading shard key.

use std::fmt::Write as _;
use std::marker::PhantomData;

use crate::context::ShardContext;
use crate::engine::{ConnectionResource, Session};
use crate::error::{Error, Result};
use crate::shard::ShardKey;
use crate::template::ShardTemplate;
use crate::value::{Row, Value};

/// A type persisted as one row of one table.
pub trait Entity: Sized {
  type Id: Into<Value> + Clone;

  const TABLE: &'static str;
  const ID_COLUMN: &'static str;
  /// Non-id columns, in the order produced by [`Entity::values`].
  const COLUMNS: &'static [&'static str];

  fn id(&self) -> Self::Id;

  /// Values for [`Entity::COLUMNS`], in the same order.
  fn values(&self) -> Vec<Value>;

  fn from_row(row: &Row) -> Result<Self>;
}

/// Shard-agnostic repository for `T`.
pub struct Repository<T> {
  _entity: PhantomData<fn() -> T>,
}

impl<T> Default for Repository<T> {
  fn default() -> Self {
    Self { _entity: PhantomData }
  }
}

impl<T> Clone for Repository<T> {
  fn clone(&self) -> Self {
    Self::default()
  }
}

impl<T: Entity> Repository<T> {
  pub fn new() -> Self {
    Self::default()
  }

  fn select_sql() -> String {
    let mut sql = format!("SELECT {}", T::ID_COLUMN);
    for column in T::COLUMNS {
      let _ = write!(sql, ", {}", column);
    }
    let _ = write!(sql, " FROM {}", T::TABLE);
    sql
  }

  fn insert_sql() -> String {
    let columns = std::iter::once(T::ID_COLUMN)
      .chain(T::COLUMNS.iter().copied())
      .collect::<Vec<_>>();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!("INSERT INTO {} ({}) VALUES ({})", T::TABLE, columns.join(", "), placeholders)
  }

  fn update_sql() -> String {
    let assignments = T::COLUMNS
      .iter()
      .map(|c| format!("{} = ?", c))
      .collect::<Vec<_>>()
      .join(", ");
    format!("UPDATE {} SET {} WHERE {} = ?", T::TABLE, assignments, T::ID_COLUMN)
  }

  /// Updates the row with the entity's id, inserting it if none exists.
  pub fn save_in<S: Session>(&self, session: &mut S, entity: &T) -> Result<()> {
    let mut values = entity.values();
    if values.len() != T::COLUMNS.len() {
      return Err(Error::engine(format!(
        "{} produced {} values for {} columns",
        T::TABLE,
        values.len(),
        T::COLUMNS.len()
      )));
    }

    let id: Value = entity.id().into();

    if !T::COLUMNS.is_empty() {
      let mut update_args = values.clone();
      update_args.push(id.clone());
      let updated = session.execute(&Self::update_sql(), &update_args).map_err(Error::Engine)?;
      if updated > 0 {
        return Ok(());
      }
    } else if self.exists_by_id_in(session, entity.id())? {
      return Ok(());
    }

    values.insert(0, id);
    session.execute(&Self::insert_sql(), &values).map_err(Error::Engine)?;
    Ok(())
  }

  pub fn find_by_id_in<S: Session>(&self, session: &mut S, id: T::Id) -> Result<Option<T>> {
    let sql = format!("{} WHERE {} = ?", Self::select_sql(), T::ID_COLUMN);
    let rows = session.query(&sql, &[id.into()]).map_err(Error::Engine)?;
    rows.first().map(T::from_row).transpose()
  }

  pub fn find_all_in<S: Session>(&self, session: &mut S) -> Result<Vec<T>> {
    let sql = format!("{} ORDER BY {}", Self::select_sql(), T::ID_COLUMN);
    let rows = session.query(&sql, &[]).map_err(Error::Engine)?;
    rows.iter().map(T::from_row).collect()
  }

  pub fn count_in<S: Session>(&self, session: &mut S) -> Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}", T::TABLE);
    let rows = session.query(&sql, &[]).map_err(Error::Engine)?;
    let count = match rows.first() {
      Some(row) => row.get_at::<i64>(0)?,
      None => 0,
    };
    Ok(count.max(0) as u64)
  }

  pub fn exists_by_id_in<S: Session>(&self, session: &mut S, id: T::Id) -> Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE {} = ? LIMIT 1", T::TABLE, T::ID_COLUMN);
    let rows = session.query(&sql, &[id.into()]).map_err(Error::Engine)?;
    Ok(!rows.is_empty())
  }

  /// Returns the number of rows removed.
  pub fn delete_by_id_in<S: Session>(&self, session: &mut S, id: T::Id) -> Result<usize> {
    let sql = format!("DELETE FROM {} WHERE {} = ?", T::TABLE, T::ID_COLUMN);
    session.execute(&sql, &[id.into()]).map_err(Error::Engine)
  }

  pub fn delete_all_in<S: Session>(&self, session: &mut S) -> Result<usize> {
    let sql = format!("DELETE FROM {}", T::TABLE);
    session.execute(&sql, &[]).map_err(Error::Engine)
  }
}

/// Keyed facade over [`Repository`].
///
/// Each call runs in its own context scope on the shard owning `key`.
pub struct ShardRepository<T, R> {
  template: ShardTemplate<R>,
  repository: Repository<T>,
}

impl<T, R> Clone for ShardRepository<T, R> {
  fn clone(&self) -> Self {
    Self {
      template: self.template.clone(),
      repository: self.repository.clone(),
    }
  }
}

impl<T: Entity, R: ConnectionResource + 'static> ShardRepository<T, R> {
  pub fn new(template: ShardTemplate<R>) -> Self {
    Self {
      template,
      repository: Repository::new(),
    }
  }

  /// The shard-agnostic repository, for use inside a transaction session.
  pub fn inner(&self) -> &Repository<T> {
    &self.repository
  }

  fn with_session<V>(&self, key: ShardKey, op: impl FnOnce(&Repository<T>, &mut R::Session) -> Result<V>) -> Result<V> {
    let mut ctx = ShardContext::new();
    self.template.scoped(&mut ctx, key, |engine, ctx| {
      engine.with_session(ctx, |session| op(&self.repository, session))
    })
  }

  pub fn save(&self, key: ShardKey, entity: &T) -> Result<()> {
    self.with_session(key, |repo, session| repo.save_in(session, entity))
  }

  /// Saves every entity on one session of `key`'s shard, stopping at the
  /// first failure.
  pub fn save_all<'e>(&self, key: ShardKey, entities: impl IntoIterator<Item = &'e T>) -> Result<usize>
  where
    T: 'e,
  {
    self.with_session(key, |repo, session| {
      let mut saved = 0;
      for entity in entities {
        repo.save_in(session, entity)?;
        saved += 1;
      }
      Ok(saved)
    })
  }

  pub fn find_by_id(&self, key: ShardKey, id: T::Id) -> Result<Option<T>> {
    self.with_session(key, |repo, session| repo.find_by_id_in(session, id))
  }

  /// Entities for the ids that exist, in the order of `ids`.
  pub fn find_all_by_id(&self, key: ShardKey, ids: impl IntoIterator<Item = T::Id>) -> Result<Vec<T>> {
    self.with_session(key, |repo, session| {
      let mut found = Vec::new();
      for id in ids {
        if let Some(entity) = repo.find_by_id_in(session, id)? {
          found.push(entity);
        }
      }
      Ok(found)
    })
  }

  pub fn find_all(&self, key: ShardKey) -> Result<Vec<T>> {
    self.with_session(key, |repo, session| repo.find_all_in(session))
  }

  pub fn count(&self, key: ShardKey) -> Result<u64> {
    self.with_session(key, |repo, session| repo.count_in(session))
  }

  pub fn exists_by_id(&self, key: ShardKey, id: T::Id) -> Result<bool> {
    self.with_session(key, |repo, session| repo.exists_by_id_in(session, id))
  }

  pub fn delete_by_id(&self, key: ShardKey, id: T::Id) -> Result<usize> {
    self.with_session(key, |repo, session| repo.delete_by_id_in(session, id))
  }

  pub fn delete_all_by_id(&self, key: ShardKey, ids: impl IntoIterator<Item = T::Id>) -> Result<usize> {
    self.with_session(key, |repo, session| {
      let mut deleted = 0;
      for id in ids {
        deleted += repo.delete_by_id_in(session, id)?;
      }
      Ok(deleted)
    })
  }

  /// Deletes every row of the entity's table on `key`'s shard.
  pub fn delete_all(&self, key: ShardKey) -> Result<usize> {
    self.with_session(key, |repo, session| repo.delete_all_in(session))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Account;

  impl Entity for Account {
    type Id = i64;

    const TABLE: &'static str = "accounts";
    const ID_COLUMN: &'static str = "account_id";
    const COLUMNS: &'static [&'static str] = &["balance", "owner"];

    fn id(&self) -> i64 {
      1
    }

    fn values(&self) -> Vec<Value> {
      vec![Value::Integer(10), Value::Text("ana".into())]
    }

    fn from_row(_row: &Row) -> Result<Self> {
      Ok(Account)
    }
  }

  #[test]
  fn test_generated_sql() {
    assert_eq!(
      Repository::<Account>::select_sql(),
      "SELECT account_id, balance, owner FROM accounts"
    );
    assert_eq!(
      Repository::<Account>::insert_sql(),
      "INSERT INTO accounts (account_id, balance, owner) VALUES (?, ?, ?)"
    );
    assert_eq!(
      Repository::<Account>::update_sql(),
      "UPDATE accounts SET balance = ?, owner = ? WHERE account_id = ?"
    );
  }

  #[test]
  fn test_save_tries_update_first() {
    use crate::testing::{Call, engine};

    let (engine, shards) = engine(3);
    let repo = ShardRepository::<Account, _>::new(ShardTemplate::new(engine));

    // The recording session reports one affected row per argument.
    repo.save(1, &Account).unwrap();
    assert_eq!(
      shards[2].calls(),
      vec![Call::Execute(Repository::<Account>::update_sql())]
    );
  }
}
