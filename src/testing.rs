//! In-memory connection resource that records every call, for unit tests.

use std::ops::Index;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::engine::{ConnectionResource, Engine, Session};
use crate::error::BoxError;
use crate::provider::RoutingConnectionProvider;
use crate::router::{HashShardRouter, ShardRouter};
use crate::shard::ShardRegistry;
use crate::value::{Row, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
  Begin,
  Commit,
  Rollback,
  Execute(String),
  Query(String),
}

#[derive(Default)]
struct Faults {
  open: AtomicBool,
  execute: AtomicBool,
  commit: AtomicBool,
  rollback: AtomicBool,
}

pub struct RecordingShard {
  name: String,
  log: Arc<Mutex<Vec<Call>>>,
  faults: Arc<Faults>,
}

impl RecordingShard {
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      log: Arc::default(),
      faults: Arc::default(),
    }
  }

  pub fn calls(&self) -> Vec<Call> {
    self.log.lock().clone()
  }

  pub fn fail_open(&self, fail: bool) {
    self.faults.open.store(fail, Ordering::SeqCst);
  }

  pub fn fail_execute(&self, fail: bool) {
    self.faults.execute.store(fail, Ordering::SeqCst);
  }

  pub fn fail_commit(&self, fail: bool) {
    self.faults.commit.store(fail, Ordering::SeqCst);
  }

  pub fn fail_rollback(&self, fail: bool) {
    self.faults.rollback.store(fail, Ordering::SeqCst);
  }
}

impl ConnectionResource for RecordingShard {
  type Session = RecordingSession;

  fn open_session(&self) -> Result<RecordingSession, BoxError> {
    if self.faults.open.load(Ordering::SeqCst) {
      return Err(format!("{} is unavailable", self.name).into());
    }
    Ok(RecordingSession {
      shard: self.name.clone(),
      log: self.log.clone(),
      faults: self.faults.clone(),
    })
  }
}

pub struct RecordingSession {
  shard: String,
  log: Arc<Mutex<Vec<Call>>>,
  faults: Arc<Faults>,
}

impl RecordingSession {
  fn record(&self, call: Call, fault: &AtomicBool) -> Result<(), BoxError> {
    self.log.lock().push(call.clone());
    if fault.load(Ordering::SeqCst) {
      return Err(format!("{:?} failed on {}", call, self.shard).into());
    }
    Ok(())
  }
}

impl Session for RecordingSession {
  fn execute(&mut self, sql: &str, args: &[Value]) -> Result<usize, BoxError> {
    self.record(Call::Execute(sql.to_owned()), &self.faults.execute)?;
    Ok(args.len())
  }

  /// Answers every query with one row naming the shard that served it.
  fn query(&mut self, sql: &str, _args: &[Value]) -> Result<Vec<Row>, BoxError> {
    self.record(Call::Query(sql.to_owned()), &self.faults.execute)?;
    let columns: Arc<[String]> = vec!["shard".to_string()].into();
    Ok(vec![Row::new(columns, vec![Value::Text(self.shard.clone())])?])
  }

  fn begin(&mut self) -> Result<(), BoxError> {
    self.log.lock().push(Call::Begin);
    Ok(())
  }

  fn commit(&mut self) -> Result<(), BoxError> {
    self.record(Call::Commit, &self.faults.commit)
  }

  fn rollback(&mut self) -> Result<(), BoxError> {
    self.record(Call::Rollback, &self.faults.rollback)
  }
}

/// Handle onto the shards of a test engine.
pub struct Fixture {
  router: Arc<HashShardRouter<RecordingShard>>,
}

impl Fixture {
  pub fn router(&self) -> &HashShardRouter<RecordingShard> {
    &self.router
  }
}

impl Index<usize> for Fixture {
  type Output = RecordingShard;

  fn index(&self, index: usize) -> &RecordingShard {
    self.router.registry()[index].resource()
  }
}

/// Builds an engine over `shard_count` recording shards named `shard_NN`.
pub fn engine(shard_count: usize) -> (Engine<RecordingShard>, Fixture) {
  let registry = ShardRegistry::new((0..shard_count).map(|i| {
    let name = format!("shard_{:02}", i);
    (name.clone(), RecordingShard::named(name))
  }))
  .unwrap();
  let router = Arc::new(HashShardRouter::new(registry));
  let provider = RoutingConnectionProvider::new(router.clone() as Arc<dyn ShardRouter<RecordingShard>>);

  (Engine::new(provider), Fixture { router })
}
