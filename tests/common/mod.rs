#![allow(dead_code)]

use shardroute::sqlite::{SqliteShard, open_sharding};
use shardroute::{
  ConnectionConfig, ConnectionResource, Entity, Row, Session, ShardConfig, ShardKey, ShardRepository, Sharding,
  ShardingConfig, Value,
};
use tempfile::TempDir;

pub const SCHEMA: &str = "
  CREATE TABLE IF NOT EXISTS accounts (
    account_id INTEGER PRIMARY KEY,
    user_id    INTEGER NOT NULL,
    balance    INTEGER NOT NULL,
    currency   TEXT    NOT NULL
  );
";

pub struct TestEnv {
  pub sharding: Sharding<SqliteShard>,
  pub config: ShardingConfig,
  // The TempDir guard must be kept alive to prevent premature deletion of the directory.
  pub _dir: TempDir,
}

impl TestEnv {
  /// `shard_count` file-backed shards named `shard_NN`, schema applied.
  pub fn new(shard_count: usize) -> Self {
    let dir = tempfile::tempdir().unwrap();
    let config = ShardingConfig {
      enabled: true,
      shards: (0..shard_count)
        .map(|i| {
          let path = dir.path().join(format!("shard_{:02}.db", i));
          ShardConfig::new(format!("shard_{:02}", i), ConnectionConfig::new(path.to_string_lossy()))
        })
        .collect(),
      ..Default::default()
    };

    let sharding = open_sharding(&config).unwrap().unwrap();
    for shard in sharding.router().registry() {
      shard.resource().execute_script(SCHEMA).unwrap();
    }

    Self {
      sharding,
      config,
      _dir: dir,
    }
  }

  pub fn shard(&self, index: usize) -> &SqliteShard {
    self.sharding.router().registry()[index].resource()
  }

  /// Row count of `accounts` read straight from one shard, bypassing routing.
  pub fn rows_on(&self, index: usize) -> i64 {
    let mut session = self.shard(index).open_session().unwrap();
    let rows = session.query("SELECT COUNT(*) FROM accounts", &[]).unwrap();
    rows[0].get_at::<i64>(0).unwrap()
  }

  pub fn accounts(&self) -> ShardRepository<Account, SqliteShard> {
    self.sharding.repository()
  }

  /// Opens an account for `user` keyed by the user id.
  pub fn open_account(&self, user: ShardKey, account_id: i64, balance: i64) {
    self
      .accounts()
      .save(user, &Account::new(account_id, user, balance))
      .unwrap();
  }

  pub fn balance(&self, user: ShardKey, account_id: i64) -> i64 {
    self.accounts().find_by_id(user, account_id).unwrap().unwrap().balance
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
  pub account_id: i64,
  pub user_id: i64,
  pub balance: i64,
  pub currency: String,
}

impl Account {
  pub fn new(account_id: i64, user_id: i64, balance: i64) -> Self {
    Self {
      account_id,
      user_id,
      balance,
      currency: "EUR".into(),
    }
  }
}

impl Entity for Account {
  type Id = i64;

  const TABLE: &'static str = "accounts";
  const ID_COLUMN: &'static str = "account_id";
  const COLUMNS: &'static [&'static str] = &["user_id", "balance", "currency"];

  fn id(&self) -> i64 {
    self.account_id
  }

  fn values(&self) -> Vec<Value> {
    vec![
      self.user_id.into(),
      self.balance.into(),
      self.currency.clone().into(),
    ]
  }

  fn from_row(row: &Row) -> shardroute::Result<Self> {
    Ok(Self {
      account_id: row.get("account_id")?,
      user_id: row.get("user_id")?,
      balance: row.get("balance")?,
      currency: row.get("currency")?,
    })
  }
}
