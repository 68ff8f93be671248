//! The embedder platform: worker pools, job handles, foreground runner
//! lookup and the monotonic clock.
//!
//! V8 itself keeps its default platform for internal work (see
//! [`init_v8`]); this singleton carries the embedder side of the contract:
//! per-priority worker pools, pausing around snapshot emission, and the
//! per-isolate foreground-runner lookup used while pumping tasks.

use crate::prelude::*;

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::Once;
use std::time::Instant;

pub use foreground::{ForegroundTaskRunner, ForegroundTaskRunnerRc, TaskRunScope};
pub use job::{JobDelegate, JobHandle, JobTask};
pub use worker::WorkerTaskRunner;

pub mod foreground;
pub mod job;
pub mod worker;

#[cfg(test)]
mod platform_tests;
#[cfg(test)]
mod worker_tests;

/// Worker pool priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPriority {
  BestEffort = 0,
  UserVisible = 1,
  UserBlocking = 2,
}

pub const NUM_TASK_PRIORITIES: usize = 3;

impl TaskPriority {
  pub fn all() -> [TaskPriority; NUM_TASK_PRIORITIES] {
    [
      TaskPriority::BestEffort,
      TaskPriority::UserVisible,
      TaskPriority::UserBlocking,
    ]
  }
}

/// A task that runs on the isolate thread under a handle scope.
pub trait JsTask {
  fn run(&mut self, scope: &mut v8::HandleScope);
}

impl<F> JsTask for F
where
  F: FnMut(&mut v8::HandleScope),
{
  fn run(&mut self, scope: &mut v8::HandleScope) {
    self(scope)
  }
}

/// An idle task that runs on the isolate thread with a deadline in seconds.
pub trait JsIdleTask {
  fn run(&mut self, scope: &mut v8::HandleScope, deadline: f64);
}

impl<F> JsIdleTask for F
where
  F: FnMut(&mut v8::HandleScope, f64),
{
  fn run(&mut self, scope: &mut v8::HandleScope, deadline: f64) {
    self(scope, deadline)
  }
}

/// A task that runs on a worker pool thread. Workers never touch VM state.
pub type WorkerTask = Box<dyn FnOnce() + Send>;

/// Monotonic time source, overridable in tests.
pub trait MonotonicClock: Send + Sync {
  /// Seconds since an arbitrary origin.
  fn now_seconds(&self) -> f64;
}

pub struct SystemMonotonicClock {
  origin: Instant,
}

impl SystemMonotonicClock {
  pub fn new() -> Self {
    SystemMonotonicClock {
      origin: Instant::now(),
    }
  }
}

impl Default for SystemMonotonicClock {
  fn default() -> Self {
    SystemMonotonicClock::new()
  }
}

impl MonotonicClock for SystemMonotonicClock {
  fn now_seconds(&self) -> f64 {
    self.origin.elapsed().as_secs_f64()
  }
}

/// Routes per-isolate questions from the platform to the owning runtime.
pub trait PlatformRuntimeProvider: Send + Sync {
  /// The foreground task runner for the given isolate. Only meaningful on
  /// the isolate's own thread.
  fn foreground_runner(
    &self,
    isolate: &v8::Isolate,
  ) -> Option<ForegroundTaskRunnerRc>;

  /// Whether the given isolate has idle task support enabled.
  fn idle_tasks_enabled(&self, isolate: &v8::Isolate) -> bool;
}

/// Configuration flags for V8. Must be set before [`init_v8`] runs.
pub fn set_v8_flags(flags: &[String]) {
  if !flags.is_empty() {
    v8::V8::set_flags_from_string(&flags.join(" "));
  }
}

// Initialize the v8 engine, once per process.
pub fn init_v8() {
  static V8_INIT: Once = Once::new();
  V8_INIT.call_once(move || {
    let platform = v8::new_default_platform(0, false).make_shared();
    v8::V8::initialize_platform(platform);
    v8::V8::initialize();
  });
}

/// The process-wide embedder platform.
pub struct AppPlatform {
  workers: Vec<Arc<WorkerTaskRunner>>,
  provider: Box<dyn PlatformRuntimeProvider>,
  clock: Arc<dyn MonotonicClock>,
}

static PLATFORM: Mutex<Option<Arc<AppPlatform>>> = Mutex::new(None);

impl AppPlatform {
  /// Initializes the platform singleton, exactly once per process until
  /// [`AppPlatform::shutdown`] reverses it.
  pub fn initialize(
    provider: Box<dyn PlatformRuntimeProvider>,
  ) -> TheResult<Arc<AppPlatform>> {
    AppPlatform::initialize_with_clock(
      provider,
      Arc::new(SystemMonotonicClock::new()),
    )
  }

  /// Same as [`AppPlatform::initialize`] with a custom clock.
  pub fn initialize_with_clock(
    provider: Box<dyn PlatformRuntimeProvider>,
    clock: Arc<dyn MonotonicClock>,
  ) -> TheResult<Arc<AppPlatform>> {
    let mut guard = PLATFORM.lock();
    if guard.is_some() {
      return Err(TheErr::AlreadyExists("platform".to_string()));
    }

    init_v8();

    let workers_per_pool = std::thread::available_parallelism()
      .map(|value| value.get())
      .unwrap_or(1);
    let workers = TaskPriority::all()
      .iter()
      .map(|priority| {
        Arc::new(WorkerTaskRunner::new(
          workers_per_pool,
          *priority,
          clock.clone(),
        ))
      })
      .collect::<Vec<_>>();

    let platform = Arc::new(AppPlatform {
      workers,
      provider,
      clock,
    });
    *guard = Some(platform.clone());
    Ok(platform)
  }

  /// Tears the singleton down. A subsequent initialize succeeds.
  pub fn shutdown() {
    let platform = PLATFORM.lock().take();
    if let Some(platform) = platform {
      for worker in platform.workers.iter() {
        worker.terminate();
      }
    }
  }

  /// The current platform.
  pub fn get() -> TheResult<Arc<AppPlatform>> {
    PLATFORM
      .lock()
      .clone()
      .ok_or_else(|| TheErr::InvalidState("platform not initialized".into()))
  }

  pub fn is_initialized() -> bool {
    PLATFORM.lock().is_some()
  }

  pub fn clock(&self) -> Arc<dyn MonotonicClock> {
    self.clock.clone()
  }

  fn pool(&self, priority: TaskPriority) -> &Arc<WorkerTaskRunner> {
    &self.workers[priority as usize]
  }

  /// Enqueues a task onto the pool matching the priority.
  pub fn post_worker_task(&self, priority: TaskPriority, task: WorkerTask) {
    self.pool(priority).post_task(task);
  }

  /// Enqueues a task with a due time of `now() + delay_in_seconds`.
  pub fn post_delayed_worker_task(
    &self,
    priority: TaskPriority,
    task: WorkerTask,
    delay_in_seconds: f64,
  ) {
    self.pool(priority).post_delayed_task(task, delay_in_seconds);
  }

  /// Creates a job backed by the pool of the given priority.
  pub fn post_job(
    &self,
    priority: TaskPriority,
    job: Box<dyn JobTask>,
  ) -> JobHandle {
    job::spawn_job(self.pool(priority).clone(), job)
  }

  /// Pauses or resumes every worker between tasks. Used around snapshot
  /// emission.
  pub fn set_workers_paused(&self, paused: bool) {
    for worker in self.workers.iter() {
      worker.set_paused(paused);
    }
  }

  /// Looks up the foreground runner for an isolate via the installed
  /// runtime provider.
  pub fn foreground_runner(
    &self,
    isolate: &v8::Isolate,
  ) -> Option<ForegroundTaskRunnerRc> {
    self.provider.foreground_runner(isolate)
  }

  /// Whether idle tasks are enabled for an isolate.
  pub fn idle_tasks_enabled(&self, isolate: &v8::Isolate) -> bool {
    self.provider.idle_tasks_enabled(isolate)
  }
}
