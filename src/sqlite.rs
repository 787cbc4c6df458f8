//! SQLite connection resource.
//!
//! Each shard owns a small fixed pool of connections. A session checks one
//! connection out and keeps it until dropped, so a transaction has its
//! connection to itself from `BEGIN` until it finishes. When the pool is
//! empty, `open_session` blocks up to the configured connection timeout,
//! unless every checked-out connection belongs to the calling thread: that
//! wait could never end, so it fails at once.
//!
//! A connection only goes back to the pool in autocommit mode. One returned
//! with a transaction still open is rolled back, or replaced by a fresh
//! connection when the rollback does not take.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql, params_from_iter};

use crate::bootstrap::Sharding;
use crate::config::{ConnectionConfig, ShardingConfig};
use crate::engine::{ConnectionResource, Session};
use crate::error::{BoxError, Error, Result};
use crate::value::{Row, Value};

const MEMORY_URL: &str = ":memory:";

fn open_file(path: &Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
  let conn = Connection::open(path)?;
  conn.busy_timeout(busy_timeout)?;
  conn.execute_batch("PRAGMA journal_mode = WAL;")?;
  Ok(conn)
}

struct PoolState {
  idle: Vec<Connection>,
  /// One entry per checked-out connection.
  holders: Vec<ThreadId>,
}

struct Pool {
  state: Mutex<PoolState>,
  available: Condvar,
  checkout_timeout: Duration,
  busy_timeout: Duration,
  /// Where replacement connections are opened; `None` for in-memory shards.
  path: Option<PathBuf>,
}

impl Pool {
  fn new(
    connections: Vec<Connection>,
    checkout_timeout: Duration,
    busy_timeout: Duration,
    path: Option<PathBuf>,
  ) -> Arc<Self> {
    Arc::new(Self {
      state: Mutex::new(PoolState {
        idle: connections,
        holders: Vec::new(),
      }),
      available: Condvar::new(),
      checkout_timeout,
      busy_timeout,
      path,
    })
  }

  fn checkout(&self) -> std::result::Result<(Connection, ThreadId), BoxError> {
    let me = thread::current().id();
    let deadline = Instant::now() + self.checkout_timeout;
    let mut state = self.state.lock();

    loop {
      if let Some(conn) = state.idle.pop() {
        state.holders.push(me);
        return Ok((conn, me));
      }
      if !state.holders.is_empty() && state.holders.iter().all(|h| *h == me) {
        return Err(
          "every connection of this shard is held by the current thread; \
           statements inside a transaction must go through the transaction handle"
            .into(),
        );
      }
      if self.available.wait_until(&mut state, deadline).timed_out() && state.idle.is_empty() {
        return Err(format!("timed out after {:?} waiting for a connection", self.checkout_timeout).into());
      }
    }
  }

  fn checkin(&self, conn: Connection, holder: ThreadId) {
    let conn = self.reset(conn);

    let mut state = self.state.lock();
    if let Some(pos) = state.holders.iter().position(|h| *h == holder) {
      state.holders.swap_remove(pos);
    }
    if let Some(conn) = conn {
      state.idle.push(conn);
    }
    drop(state);
    self.available.notify_one();
  }

  /// Brings `conn` back to autocommit mode, replacing it if that fails.
  fn reset(&self, conn: Connection) -> Option<Connection> {
    if conn.is_autocommit() {
      return Some(conn);
    }

    tracing::warn!(target: "shardroute::sqlite", "connection returned with an open transaction, rolling back");
    if let Err(e) = conn.execute_batch("ROLLBACK") {
      tracing::warn!(target: "shardroute::sqlite", error = %e, "rollback on check-in failed");
    }
    if conn.is_autocommit() {
      return Some(conn);
    }
    drop(conn);

    let Some(path) = &self.path else {
      tracing::error!(target: "shardroute::sqlite", "in-memory connection could not be reset and was discarded");
      return None;
    };
    match open_file(path, self.busy_timeout) {
      Ok(fresh) => Some(fresh),
      Err(e) => {
        tracing::error!(
          target: "shardroute::sqlite",
          path = %path.display(),
          error = %e,
          "could not replace a stuck connection, pool shrinks by one"
        );
        None
      }
    }
  }
}

pub struct SqliteShard {
  pool: Arc<Pool>,
}

impl SqliteShard {
  /// Opens the database described by `config`.
  ///
  /// `url` is either `:memory:` or a file path; an optional `sqlite://`
  /// prefix is stripped. An in-memory database is private to its
  /// connection, so its pool always holds exactly one.
  pub fn open(config: &ConnectionConfig) -> Result<Self> {
    let url = config.url.strip_prefix("sqlite://").unwrap_or(&config.url);
    let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
    let checkout_timeout = Duration::from_millis(config.connection_timeout_ms);

    if url == MEMORY_URL {
      if config.pool_size > 1 {
        tracing::warn!(
          target: "shardroute::sqlite",
          pool_size = config.pool_size,
          "in-memory shards use a single connection"
        );
      }
      let conn = Connection::open_in_memory().map_err(Error::engine)?;
      conn.busy_timeout(busy_timeout).map_err(Error::engine)?;
      return Ok(Self {
        pool: Pool::new(vec![conn], checkout_timeout, busy_timeout, None),
      });
    }

    let path = PathBuf::from(url);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }

    let mut connections = Vec::with_capacity(config.pool_size.max(1));
    for _ in 0..config.pool_size.max(1) {
      connections.push(open_file(&path, busy_timeout).map_err(Error::engine)?);
    }

    Ok(Self {
      pool: Pool::new(connections, checkout_timeout, busy_timeout, Some(path)),
    })
  }

  pub fn open_in_memory() -> Result<Self> {
    Self::open(&ConnectionConfig::new(MEMORY_URL))
  }

  /// Opens (creating if needed) a database file in WAL mode with the default
  /// pool settings.
  pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
    Self::open(&ConnectionConfig::new(path.as_ref().to_string_lossy()))
  }

  /// The database file, or `None` for an in-memory shard.
  pub fn path(&self) -> Option<&Path> {
    self.pool.path.as_deref()
  }

  /// Runs a multi-statement script (schema setup) on one pooled connection,
  /// outside of any routing.
  pub fn execute_script(&self, sql: &str) -> Result<()> {
    let (conn, holder) = self.pool.checkout().map_err(Error::Engine)?;
    let result = conn.execute_batch(sql).map_err(Error::engine);
    self.pool.checkin(conn, holder);
    result
  }
}

impl ConnectionResource for SqliteShard {
  type Session = SqliteSession;

  fn open_session(&self) -> std::result::Result<SqliteSession, BoxError> {
    let (conn, holder) = self.pool.checkout()?;
    Ok(SqliteSession {
      conn: Some(conn),
      holder,
      pool: self.pool.clone(),
    })
  }
}

/// A connection checked out of a shard's pool; returned on drop.
pub struct SqliteSession {
  conn: Option<Connection>,
  holder: ThreadId,
  pool: Arc<Pool>,
}

impl SqliteSession {
  fn conn(&self) -> std::result::Result<&Connection, BoxError> {
    self.conn.as_ref().ok_or_else(|| "session connection already returned".into())
  }
}

impl Drop for SqliteSession {
  fn drop(&mut self) {
    if let Some(conn) = self.conn.take() {
      self.pool.checkin(conn, self.holder);
    }
  }
}

impl Session for SqliteSession {
  fn execute(&mut self, sql: &str, args: &[Value]) -> std::result::Result<usize, BoxError> {
    let mut stmt = self.conn()?.prepare_cached(sql)?;
    Ok(stmt.execute(params_from_iter(args.iter()))?)
  }

  fn query(&mut self, sql: &str, args: &[Value]) -> std::result::Result<Vec<Row>, BoxError> {
    let mut stmt = self.conn()?.prepare_cached(sql)?;
    let columns: Arc<[String]> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = stmt.query(params_from_iter(args.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
      let mut values = Vec::with_capacity(width);
      for i in 0..width {
        values.push(from_sql(row.get_ref(i)?));
      }
      out.push(Row::new(columns.clone(), values)?);
    }
    Ok(out)
  }

  fn begin(&mut self) -> std::result::Result<(), BoxError> {
    Ok(self.conn()?.execute_batch("BEGIN")?)
  }

  fn commit(&mut self) -> std::result::Result<(), BoxError> {
    Ok(self.conn()?.execute_batch("COMMIT")?)
  }

  fn rollback(&mut self) -> std::result::Result<(), BoxError> {
    Ok(self.conn()?.execute_batch("ROLLBACK")?)
  }
}

impl ToSql for Value {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(match self {
      Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
      Value::Integer(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
      Value::Real(v) => ToSqlOutput::Borrowed(ValueRef::Real(*v)),
      Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
      Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
    })
  }
}

fn from_sql(value: ValueRef<'_>) -> Value {
  match value {
    ValueRef::Null => Value::Null,
    ValueRef::Integer(v) => Value::Integer(v),
    ValueRef::Real(v) => Value::Real(v),
    ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
    ValueRef::Blob(v) => Value::Blob(v.to_vec()),
  }
}

/// Builds the routing stack for `config` with one SQLite database per shard.
///
/// Returns `Ok(None)` when sharding is disabled.
pub fn open_sharding(config: &ShardingConfig) -> Result<Option<Sharding<SqliteShard>>> {
  Sharding::from_config(config, |shard| SqliteShard::open(&shard.connection))
}
