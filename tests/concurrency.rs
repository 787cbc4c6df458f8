mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use common::TestEnv;
use rand::Rng;
use shardroute::{ConnectionResource, Session, ShardContext, ShardRouter, args};

#[test]
fn test_threads_keep_their_own_context() {
  let env = TestEnv::new(3);
  let engine = env.sharding.engine();
  let thread_count = 8;
  let barrier = Barrier::new(thread_count);

  thread::scope(|s| {
    for t in 0..thread_count {
      let barrier = &barrier;
      s.spawn(move || {
        let key = t as i64 + 1;
        let mut ctx = ShardContext::new();
        let scope = ctx.enter(key);

        // Every thread sets its key before any of them routes.
        barrier.wait();
        for i in 0..10_i64 {
          let account_id = key * 1000 + i;
          engine
            .execute(
              &scope,
              "INSERT INTO accounts (account_id, user_id, balance, currency) VALUES (?, ?, 0, 'EUR')",
              &args![account_id, key],
            )
            .unwrap();
        }
        assert_eq!(scope.get(), Some(key));
      });
    }
  });

  // Each user's rows ended up on exactly the shard that user hashes to.
  for key in 1..=thread_count as i64 {
    let owner = env.sharding.router().hashed_index(key).unwrap();
    for index in 0..3 {
      let mut session = env.shard(index).open_session().unwrap();
      let rows = session
        .query("SELECT COUNT(*) FROM accounts WHERE user_id = ?", &args![key])
        .unwrap();
      let expected = if index == owner { 10 } else { 0 };
      assert_eq!(rows[0].get_at::<i64>(0).unwrap(), expected);
    }
  }
}

#[test]
fn test_concurrent_transfers_conserve_balance() {
  let env = TestEnv::new(3);
  // Users 1 and 2 share a shard.
  env.open_account(1, 101, 1_000);
  env.open_account(2, 102, 1_000);

  let template = env.sharding.template().clone();
  let handles: Vec<_> = (0..4)
    .map(|t| {
      let template = template.clone();
      thread::spawn(move || {
        let (from, to) = if t % 2 == 0 { (101_i64, 102_i64) } else { (102, 101) };
        for _ in 0..25 {
          template
            .in_same_shard_transaction(1, 2, |tx| {
              tx.execute(
                "UPDATE accounts SET balance = balance - 1 WHERE account_id = ?",
                &args![from],
              )?;
              tx.execute(
                "UPDATE accounts SET balance = balance + 1 WHERE account_id = ?",
                &args![to],
              )?;
              Ok(())
            })
            .unwrap();
        }
      })
    })
    .collect();

  for h in handles {
    h.join().unwrap();
  }

  // Two threads each way, same number of transfers.
  assert_eq!(env.balance(1, 101), 1_000);
  assert_eq!(env.balance(2, 102), 1_000);
}

#[test]
fn test_resolve_during_override_churn() {
  let env = TestEnv::new(3);
  let router = env.sharding.router();
  let hashed = router.hashed_index(1).unwrap();
  let pinned = (hashed + 1) % 3;
  let done = AtomicBool::new(false);

  thread::scope(|s| {
    s.spawn(|| {
      let mut rng = rand::rng();
      for _ in 0..2_000 {
        if rng.random_range(0..2) == 0 {
          router.add_override(1, pinned as i64).unwrap();
        } else {
          router.remove_override(1);
        }
        // Unrelated keys churn alongside.
        router.add_override(rng.random_range(100..200), rng.random_range(0..3)).unwrap();
      }
      done.store(true, Ordering::SeqCst);
    });

    for _ in 0..4 {
      s.spawn(|| {
        while !done.load(Ordering::SeqCst) {
          let index = router.resolve(1).unwrap().index();
          assert!(index == hashed || index == pinned, "key 1 resolved to {}", index);
        }
      });
    }
  });

  router.remove_override(1);
  assert_eq!(router.resolve(1).unwrap().index(), hashed);
}

#[test]
fn test_shared_sharding_handle_across_threads() {
  let env = TestEnv::new(3);
  let sharding = Arc::new(env.sharding.clone());

  let handles: Vec<_> = (0..6_i64)
    .map(|t| {
      let sharding = sharding.clone();
      thread::spawn(move || {
        let user = 500 + t;
        let accounts = sharding.repository::<common::Account>();
        accounts.save(user, &common::Account::new(user, user, t)).unwrap();
        accounts.find_by_id(user, user).unwrap().unwrap().balance
      })
    })
    .collect();

  for (t, h) in handles.into_iter().enumerate() {
    assert_eq!(h.join().unwrap(), t as i64);
  }
}
