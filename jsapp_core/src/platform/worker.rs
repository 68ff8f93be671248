//! Worker pool with a delayed queue.

use crate::platform::{MonotonicClock, TaskPriority, WorkerTask};
use crate::prelude::*;

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

struct DelayedEntry {
  task: WorkerTask,
  due: f64,
  seq: u64,
}

impl PartialEq for DelayedEntry {
  fn eq(&self, other: &Self) -> bool {
    self.due == other.due && self.seq == other.seq
  }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for DelayedEntry {
  fn cmp(&self, other: &Self) -> Ordering {
    // Min-heap over due time, post order among equal due times.
    other
      .due
      .total_cmp(&self.due)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

struct PoolState {
  ready: VecDeque<WorkerTask>,
  delayed: BinaryHeap<DelayedEntry>,
  paused: bool,
  terminated: bool,
  next_seq: u64,
}

struct PoolShared {
  state: Mutex<PoolState>,
  cond: Condvar,
  clock: Arc<dyn MonotonicClock>,
}

/// One worker pool: a fixed number of OS threads draining a ready queue fed
/// directly or through a due-time min-heap. Pausing blocks every worker
/// between tasks; unpausing wakes them.
pub struct WorkerTaskRunner {
  shared: Arc<PoolShared>,
  priority: TaskPriority,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerTaskRunner {
  pub fn new(
    num_workers: usize,
    priority: TaskPriority,
    clock: Arc<dyn MonotonicClock>,
  ) -> Self {
    let shared = Arc::new(PoolShared {
      state: Mutex::new(PoolState {
        ready: VecDeque::new(),
        delayed: BinaryHeap::new(),
        paused: false,
        terminated: false,
        next_seq: 0,
      }),
      cond: Condvar::new(),
      clock,
    });

    let workers = (0..num_workers.max(1))
      .map(|n| {
        let shared = shared.clone();
        std::thread::Builder::new()
          .name(format!("jsapp-worker-{:?}-{n}", priority))
          .spawn(move || worker_loop(shared))
          .unwrap()
      })
      .collect::<Vec<_>>();

    WorkerTaskRunner {
      shared,
      priority,
      workers: Mutex::new(workers),
    }
  }

  pub fn priority(&self) -> TaskPriority {
    self.priority
  }

  pub fn post_task(&self, task: WorkerTask) {
    let mut state = self.shared.state.lock();
    if state.terminated {
      trace!("Dropped worker task posted to a terminated pool");
      return;
    }
    state.ready.push_back(task);
    drop(state);
    self.shared.cond.notify_one();
  }

  pub fn post_delayed_task(&self, task: WorkerTask, delay_in_seconds: f64) {
    let mut state = self.shared.state.lock();
    if state.terminated {
      trace!("Dropped delayed worker task posted to a terminated pool");
      return;
    }
    let due = self.shared.clock.now_seconds() + delay_in_seconds.max(0.0);
    let seq = state.next_seq;
    state.next_seq += 1;
    state.delayed.push(DelayedEntry {
      task,
      due,
      seq,
    });
    drop(state);
    // Wake a worker so it can re-arm its wait for the new due time.
    self.shared.cond.notify_one();
  }

  /// Pause is observed between tasks, never mid-task.
  pub fn set_paused(&self, paused: bool) {
    let mut state = self.shared.state.lock();
    state.paused = paused;
    drop(state);
    self.shared.cond.notify_all();
  }

  pub fn is_paused(&self) -> bool {
    self.shared.state.lock().paused
  }

  /// Stops the pool and joins every worker. Idempotent.
  pub fn terminate(&self) {
    {
      let mut state = self.shared.state.lock();
      state.terminated = true;
      state.ready.clear();
      state.delayed.clear();
    }
    self.shared.cond.notify_all();
    let workers = std::mem::take(&mut *self.workers.lock());
    for worker in workers {
      let _ = worker.join();
    }
  }
}

impl Drop for WorkerTaskRunner {
  fn drop(&mut self) {
    self.terminate();
  }
}

fn worker_loop(shared: Arc<PoolShared>) {
  let mut state = shared.state.lock();
  loop {
    if state.terminated {
      return;
    }

    // Promote due delayed tasks into the ready queue.
    let now = shared.clock.now_seconds();
    while state
      .delayed
      .peek()
      .map(|entry| entry.due <= now)
      .unwrap_or(false)
    {
      let entry = state.delayed.pop().unwrap();
      state.ready.push_back(entry.task);
    }

    if state.paused || state.ready.is_empty() {
      match next_wakeup(&state, now) {
        Some(wait) => {
          shared
            .cond
            .wait_for(&mut state, Duration::from_secs_f64(wait));
        }
        None => shared.cond.wait(&mut state),
      }
      continue;
    }

    let task = state.ready.pop_front().unwrap();
    drop(state);
    task();
    state = shared.state.lock();
  }
}

fn next_wakeup(state: &PoolState, now: f64) -> Option<f64> {
  if state.paused {
    return None;
  }
  state
    .delayed
    .peek()
    .map(|entry| (entry.due - now).max(0.001))
}
