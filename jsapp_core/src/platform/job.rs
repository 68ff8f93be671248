//! Job handles over the worker pools.

use crate::platform::WorkerTaskRunner;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A unit of parallelizable work. Workers repeatedly invoke [`JobTask::run`]
/// until the reported concurrency drops to zero.
pub trait JobTask: Send + Sync {
  /// Runs one slice of the job. Implementations should return promptly when
  /// [`JobDelegate::should_yield`] turns true.
  fn run(&self, delegate: &JobDelegate);

  /// The number of workers the job can use right now, given how many are
  /// already active on it.
  fn get_max_concurrency(&self, worker_count: usize) -> usize;
}

pub struct JobDelegate {
  cancelled: Arc<AtomicBool>,
}

impl JobDelegate {
  pub fn should_yield(&self) -> bool {
    self.cancelled.load(Ordering::Acquire)
  }
}

struct JobState {
  task: Box<dyn JobTask>,
  active: AtomicUsize,
  cancelled: Arc<AtomicBool>,
}

impl JobState {
  fn run_worker(&self) {
    loop {
      let active = self.active.load(Ordering::Acquire);
      if self.cancelled.load(Ordering::Acquire)
        || self.task.get_max_concurrency(active) == 0
      {
        return;
      }
      let delegate = JobDelegate {
        cancelled: self.cancelled.clone(),
      };
      self.active.fetch_add(1, Ordering::AcqRel);
      self.task.run(&delegate);
      self.active.fetch_sub(1, Ordering::AcqRel);
      if self.cancelled.load(Ordering::Acquire) {
        return;
      }
    }
  }
}

/// Handle returned from `post_job`.
pub struct JobHandle {
  state: Arc<JobState>,
  pool: Arc<WorkerTaskRunner>,
}

pub(crate) fn spawn_job(
  pool: Arc<WorkerTaskRunner>,
  task: Box<dyn JobTask>,
) -> JobHandle {
  let handle = JobHandle {
    state: Arc::new(JobState {
      task,
      active: AtomicUsize::new(0),
      cancelled: Arc::new(AtomicBool::new(false)),
    }),
    pool,
  };
  handle.notify_concurrency_increase();
  handle
}

impl JobHandle {
  /// Schedules additional worker slices up to the job's reported
  /// concurrency.
  pub fn notify_concurrency_increase(&self) {
    let active = self.state.active.load(Ordering::Acquire);
    let wanted = self.state.task.get_max_concurrency(active);
    for _ in 0..wanted {
      let state = self.state.clone();
      self.pool.post_task(Box::new(move || state.run_worker()));
    }
  }

  /// Contributes the calling thread until the job's concurrency reaches
  /// zero.
  pub fn join(&self) {
    self.state.run_worker();
    // Wait out any worker currently inside a slice.
    while self.state.active.load(Ordering::Acquire) > 0 {
      std::thread::yield_now();
    }
  }

  pub fn cancel(&self) {
    self.state.cancelled.store(true, Ordering::Release);
  }

  pub fn is_active(&self) -> bool {
    self.state.active.load(Ordering::Acquire) > 0
      || self
        .state
        .task
        .get_max_concurrency(self.state.active.load(Ordering::Acquire))
        > 0
  }
}
