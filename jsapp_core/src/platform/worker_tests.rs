use super::worker::*;
use crate::platform::{SystemMonotonicClock, TaskPriority};
use crate::test::helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn wait_until(deadline: Duration, check: impl Fn() -> bool) -> bool {
  let start = Instant::now();
  while start.elapsed() < deadline {
    if check() {
      return true;
    }
    std::thread::sleep(Duration::from_millis(5));
  }
  check()
}

#[test]
fn post_task1() {
  helpers::init_log();
  let pool = WorkerTaskRunner::new(
    2,
    TaskPriority::UserVisible,
    Arc::new(SystemMonotonicClock::new()),
  );

  let counter = Arc::new(AtomicUsize::new(0));
  for _ in 0..10 {
    let counter = counter.clone();
    pool.post_task(Box::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    }));
  }

  assert!(wait_until(Duration::from_secs(5), || {
    counter.load(Ordering::SeqCst) == 10
  }));
  pool.terminate();
}

#[test]
fn post_delayed_task1() {
  helpers::init_log();
  let pool = WorkerTaskRunner::new(
    1,
    TaskPriority::BestEffort,
    Arc::new(SystemMonotonicClock::new()),
  );

  let counter = Arc::new(AtomicUsize::new(0));
  {
    let counter = counter.clone();
    pool.post_delayed_task(
      Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
      }),
      0.05,
    );
  }

  assert!(wait_until(Duration::from_secs(5), || {
    counter.load(Ordering::SeqCst) == 1
  }));
  pool.terminate();
}

#[test]
fn paused1() {
  helpers::init_log();
  let pool = WorkerTaskRunner::new(
    2,
    TaskPriority::UserBlocking,
    Arc::new(SystemMonotonicClock::new()),
  );

  pool.set_paused(true);
  assert!(pool.is_paused());

  let counter = Arc::new(AtomicUsize::new(0));
  {
    let counter = counter.clone();
    pool.post_task(Box::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    }));
  }

  std::thread::sleep(Duration::from_millis(50));
  assert_eq!(counter.load(Ordering::SeqCst), 0);

  // Unpausing wakes the blocked workers.
  pool.set_paused(false);
  assert!(wait_until(Duration::from_secs(5), || {
    counter.load(Ordering::SeqCst) == 1
  }));
  pool.terminate();
}

#[test]
fn terminate1() {
  helpers::init_log();
  let pool = WorkerTaskRunner::new(
    1,
    TaskPriority::BestEffort,
    Arc::new(SystemMonotonicClock::new()),
  );
  pool.terminate();
  // Idempotent, and posts after termination are dropped.
  pool.terminate();
  pool.post_task(Box::new(|| panic!("must not run")));
  std::thread::sleep(Duration::from_millis(20));
}
