//! Per-isolate foreground task runner.

use crate::platform::{JsIdleTask, JsTask, MonotonicClock, SystemMonotonicClock};
use crate::prelude::*;

use std::collections::VecDeque;
use std::sync::Arc;

struct TaskEntry {
  task: Box<dyn JsTask>,
  nestable: bool,
  /// Monotonic due time in seconds, `None` when immediately runnable.
  due: Option<f64>,
}

/// The foreground queue for one isolate.
///
/// Tasks run in post order within a `(nestable-class, due-ready)`
/// partition; non-nestable tasks are deferred until the outer scope, and
/// delayed tasks become runnable once their due time passes.
pub struct ForegroundTaskRunner {
  tasks: VecDeque<TaskEntry>,
  idle_tasks: VecDeque<Box<dyn JsIdleTask>>,
  nesting_depth: usize,
  terminated: bool,
  clock: Arc<dyn MonotonicClock>,
}

rc_refcell_ptr!(ForegroundTaskRunner);

impl ForegroundTaskRunner {
  pub fn new() -> Self {
    ForegroundTaskRunner::with_clock(Arc::new(SystemMonotonicClock::new()))
  }

  pub fn with_clock(clock: Arc<dyn MonotonicClock>) -> Self {
    ForegroundTaskRunner {
      tasks: VecDeque::new(),
      idle_tasks: VecDeque::new(),
      nesting_depth: 0,
      terminated: false,
      clock,
    }
  }

  pub fn nesting_depth(&self) -> usize {
    self.nesting_depth
  }

  pub fn is_terminated(&self) -> bool {
    self.terminated
  }

  pub fn post_task(&mut self, task: Box<dyn JsTask>) {
    self.post(task, true, None);
  }

  pub fn post_non_nestable_task(&mut self, task: Box<dyn JsTask>) {
    self.post(task, false, None);
  }

  pub fn post_delayed_task(&mut self, task: Box<dyn JsTask>, delay: f64) {
    let due = self.clock.now_seconds() + delay;
    self.post(task, true, Some(due));
  }

  pub fn post_non_nestable_delayed_task(
    &mut self,
    task: Box<dyn JsTask>,
    delay: f64,
  ) {
    let due = self.clock.now_seconds() + delay;
    self.post(task, false, Some(due));
  }

  pub fn post_idle_task(&mut self, task: Box<dyn JsIdleTask>) {
    if self.terminated {
      trace!("Dropped idle task posted to a terminated runner");
      return;
    }
    self.idle_tasks.push_back(task);
  }

  fn post(&mut self, task: Box<dyn JsTask>, nestable: bool, due: Option<f64>) {
    if self.terminated {
      trace!("Dropped task posted to a terminated runner");
      return;
    }
    self.tasks.push_back(TaskEntry {
      task,
      nestable,
      due,
    });
  }

  /// Pulls the next task whose nesting policy matches the current depth and
  /// whose due time, if any, has passed. Ownership of the task transfers to
  /// the caller, who runs it exactly once.
  pub fn get_next_task(&mut self) -> Option<Box<dyn JsTask>> {
    if self.terminated {
      // Already queued tasks are dropped when pulled.
      self.tasks.clear();
      self.idle_tasks.clear();
      return None;
    }

    let now = self.clock.now_seconds();
    let depth = self.nesting_depth;
    let position = self.tasks.iter().position(|entry| {
      let ready = entry.due.map(|due| due <= now).unwrap_or(true);
      let runnable = entry.nestable || depth == 0;
      ready && runnable
    })?;

    self.tasks.remove(position).map(|entry| entry.task)
  }

  /// FIFO over the idle queue.
  pub fn get_next_idle_task(&mut self) -> Option<Box<dyn JsIdleTask>> {
    if self.terminated {
      self.idle_tasks.clear();
      return None;
    }
    self.idle_tasks.pop_front()
  }

  pub fn maybe_has_task(&self) -> bool {
    !self.terminated && !self.tasks.is_empty()
  }

  pub fn maybe_has_idle_task(&self) -> bool {
    !self.terminated && !self.idle_tasks.is_empty()
  }

  /// Idempotent and permanent for the runner's lifetime.
  pub fn terminate(&mut self) {
    self.terminated = true;
    self.tasks.clear();
    self.idle_tasks.clear();
  }
}

impl Default for ForegroundTaskRunner {
  fn default() -> Self {
    ForegroundTaskRunner::new()
  }
}

/// Scoped nesting acquisition: increments the nesting depth on entry,
/// decrements on exit.
pub struct TaskRunScope {
  runner: ForegroundTaskRunnerRc,
}

impl TaskRunScope {
  pub fn new(runner: ForegroundTaskRunnerRc) -> Self {
    runner.borrow_mut().nesting_depth += 1;
    TaskRunScope {
      runner,
    }
  }
}

impl Drop for TaskRunScope {
  fn drop(&mut self) {
    let mut runner = self.runner.borrow_mut();
    debug_assert!(runner.nesting_depth > 0);
    runner.nesting_depth = runner.nesting_depth.saturating_sub(1);
  }
}
