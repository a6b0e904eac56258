//! The shared task queue and its synchronization protocol.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex},
};

use crate::task::Task;

/// Queue state protected by a single lock.
///
/// The `open` flag lives inside the locked state: a worker decides
/// "keep waiting, take a task, or exit" from the flag and the queue
/// contents together, so both must be observed under the same lock.
struct State {
    tasks: VecDeque<Task>,
    open: bool,
}

/// An unbounded FIFO queue of tasks shared by all producers and workers.
///
/// The queue starts open. Closing it is a one-way transition: new pushes
/// are refused, while waiting poppers are woken so they can drain
/// whatever is still queued and then observe the closed, empty state.
pub(crate) struct TaskQueue {
    state: Mutex<State>,
    work_available: Condvar,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                tasks: VecDeque::new(),
                open: true,
            }),
            work_available: Condvar::new(),
        }
    }

    /// Enqueue a task at the back of the queue and wake one waiting
    /// worker.
    ///
    /// Never blocks. If the queue has been closed, the task is handed
    /// back to the caller unboxed.
    pub(crate) fn push<F: FnOnce() + Send + 'static>(&self, task: F) -> Result<(), F> {
        let mut state = self.state.lock().unwrap();

        if !state.open {
            return Err(task);
        }

        state.tasks.push_back(Box::new(task));
        drop(state);

        self.work_available.notify_one();

        Ok(())
    }

    /// Take the task at the front of the queue, blocking while the queue
    /// is empty but still open.
    ///
    /// Returns `None` only once the queue is closed *and* fully drained,
    /// which is a worker's signal to exit.
    pub(crate) fn pop(&self) -> Option<Task> {
        let mut state = self.state.lock().unwrap();

        loop {
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }

            if !state.open {
                return None;
            }

            state = self.work_available.wait(state).unwrap();
        }
    }

    /// Close the queue and wake every waiting worker.
    ///
    /// Idempotent. Queued tasks are not discarded; they remain available
    /// to `pop` until drained.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.open = false;
        drop(state);

        self.work_available.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        !self.state.lock().unwrap().open
    }
}
