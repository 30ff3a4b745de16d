//! Bounded-concurrency task queue.
//!
//! Tasks enqueue as futures and start in FIFO order, never more than the
//! configured limit at once. Finishing a task (success, failure or panic)
//! frees its slot and drains the queue. The limit can be changed at runtime:
//! raising it starts queued tasks immediately, lowering it never preempts
//! tasks that already started. Queued tasks can be cancelled; started tasks
//! cannot.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

type QueuedJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct LimiterState {
    limit: usize,
    active: usize,
    next_id: u64,
    queue: VecDeque<(u64, QueuedJob)>,
}

/// FIFO task queue with a runtime-adjustable concurrency bound.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    state: Arc<Mutex<LimiterState>>,
}

/// The task was removed from the queue before it could run, or its result
/// was otherwise discarded.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("task cancelled before completion")]
pub struct TaskCancelled;

/// Resolves with the task's output once it completes.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task to finish.
    pub async fn join(self) -> std::result::Result<T, TaskCancelled> {
        self.rx.await.map_err(|_| TaskCancelled)
    }
}

/// Removes the associated task from the queue if it has not started yet.
pub struct CancelHandle {
    id: u64,
    state: Arc<Mutex<LimiterState>>,
}

impl CancelHandle {
    /// Cancel the task. Returns `true` if it was still queued and has been
    /// removed; `false` if it already started (or finished).
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.queue.iter().position(|(id, _)| *id == self.id) {
            // Dropping the job drops its result sender, resolving the
            // TaskHandle as cancelled.
            state.queue.remove(pos);
            true
        } else {
            false
        }
    }
}

/// Frees the slot when a running task finishes, even on panic.
struct SlotGuard(Arc<Mutex<LimiterState>>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut state = self.0.lock().unwrap();
        state.active -= 1;
        ConcurrencyLimiter::drain(&self.0, &mut state);
    }
}

impl ConcurrencyLimiter {
    /// Create a limiter allowing at most `limit` tasks at once (minimum 1).
    pub fn new(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(LimiterState {
                limit: limit.max(1),
                active: 0,
                next_id: 0,
                queue: VecDeque::new(),
            })),
        }
    }

    /// Queue a task. It starts as soon as a slot is free, in FIFO order.
    pub fn enqueue<F>(&self, task: F) -> (TaskHandle<F::Output>, CancelHandle)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: QueuedJob = Box::pin(async move {
            let output = task.await;
            let _ = tx.send(output);
        });

        let id;
        {
            let mut state = self.state.lock().unwrap();
            id = state.next_id;
            state.next_id += 1;
            state.queue.push_back((id, job));
            Self::drain(&self.state, &mut state);
        }

        (
            TaskHandle { rx },
            CancelHandle {
                id,
                state: Arc::clone(&self.state),
            },
        )
    }

    /// Change the concurrency limit (minimum 1). Raising the limit starts
    /// queued tasks immediately; lowering it only affects future starts.
    pub fn set_limit(&self, limit: usize) {
        let mut state = self.state.lock().unwrap();
        state.limit = limit.max(1);
        Self::drain(&self.state, &mut state);
    }

    /// Currently running tasks.
    pub fn active(&self) -> usize {
        self.state.lock().unwrap().active
    }

    /// Tasks waiting for a slot.
    pub fn queued(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Current concurrency limit.
    pub fn limit(&self) -> usize {
        self.state.lock().unwrap().limit
    }

    /// Start queued tasks while slots are free. Caller holds the lock.
    fn drain(shared: &Arc<Mutex<LimiterState>>, state: &mut LimiterState) {
        while state.active < state.limit {
            let Some((_, job)) = state.queue.pop_front() else {
                break;
            };
            state.active += 1;
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                let _slot = SlotGuard(shared);
                job.await;
            });
        }
    }
}
