use super::*;
use crate::runtime::JsRuntimeIsolateHelper;
use crate::test::helpers;

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

struct CountingJob {
  slices: AtomicUsize,
  target: usize,
}

impl JobTask for CountingJob {
  fn run(&self, _delegate: &JobDelegate) {
    self.slices.fetch_add(1, AtomicOrdering::SeqCst);
  }

  fn get_max_concurrency(&self, worker_count: usize) -> usize {
    let done = self.slices.load(AtomicOrdering::SeqCst);
    if done >= self.target {
      0
    } else {
      (self.target - done).saturating_sub(worker_count).min(4)
    }
  }
}

// The platform is a process-wide singleton, so the whole lifecycle runs in
// one test.
#[test]
fn platform_lifecycle1() {
  helpers::init_log();

  let platform =
    AppPlatform::initialize(Box::new(JsRuntimeIsolateHelper)).unwrap();
  assert!(AppPlatform::is_initialized());

  // A second initialize fails until shutdown reverses the first.
  assert!(AppPlatform::initialize(Box::new(JsRuntimeIsolateHelper)).is_err());

  // Worker tasks flow through the priority pools.
  let counter = std::sync::Arc::new(AtomicUsize::new(0));
  for priority in TaskPriority::all() {
    let counter = counter.clone();
    platform.post_worker_task(
      priority,
      Box::new(move || {
        counter.fetch_add(1, AtomicOrdering::SeqCst);
      }),
    );
  }
  let deadline = std::time::Instant::now() + Duration::from_secs(5);
  while counter.load(AtomicOrdering::SeqCst) < 3
    && std::time::Instant::now() < deadline
  {
    std::thread::sleep(Duration::from_millis(5));
  }
  assert_eq!(counter.load(AtomicOrdering::SeqCst), 3);

  // Jobs run until their reported concurrency drops to zero.
  let job = Box::new(CountingJob {
    slices: AtomicUsize::new(0),
    target: 8,
  });
  let handle = platform.post_job(TaskPriority::UserVisible, job);
  handle.notify_concurrency_increase();
  handle.join();

  // Pausing parks the workers between tasks; unpausing resumes them.
  platform.set_workers_paused(true);
  let paused_counter = std::sync::Arc::new(AtomicUsize::new(0));
  {
    let paused_counter = paused_counter.clone();
    platform.post_worker_task(
      TaskPriority::BestEffort,
      Box::new(move || {
        paused_counter.fetch_add(1, AtomicOrdering::SeqCst);
      }),
    );
  }
  std::thread::sleep(Duration::from_millis(50));
  assert_eq!(paused_counter.load(AtomicOrdering::SeqCst), 0);
  platform.set_workers_paused(false);
  let deadline = std::time::Instant::now() + Duration::from_secs(5);
  while paused_counter.load(AtomicOrdering::SeqCst) < 1
    && std::time::Instant::now() < deadline
  {
    std::thread::sleep(Duration::from_millis(5));
  }
  assert_eq!(paused_counter.load(AtomicOrdering::SeqCst), 1);

  drop(platform);
  AppPlatform::shutdown();
  assert!(!AppPlatform::is_initialized());

  // After shutdown a subsequent initialize succeeds.
  AppPlatform::initialize(Box::new(JsRuntimeIsolateHelper)).unwrap();
  AppPlatform::shutdown();
}

#[test]
fn clock1() {
  let clock = SystemMonotonicClock::new();
  let first = clock.now_seconds();
  let second = clock.now_seconds();
  assert!(second >= first);
}
