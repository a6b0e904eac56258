use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use crate::{
    queue::TaskQueue,
    task::{panic_message, Task},
};

/// A type which receives notifications from a worker.
pub(crate) trait Listener {
    fn on_task_started(&mut self) {}

    fn on_task_completed(&mut self, _panicked: bool) {}
}

/// A worker thread which belongs to a pool and executes queued tasks.
pub(crate) struct Worker<L: Listener> {
    id: usize,

    /// Shared queue of pending tasks. The worker blocks on this queue
    /// when idle and exits once it reports closed and drained.
    queue: Arc<TaskQueue>,

    /// Receiver of worker events.
    listener: L,
}

impl<L: Listener> Worker<L> {
    pub(crate) fn new(id: usize, queue: Arc<TaskQueue>, listener: L) -> Self {
        Self {
            id,
            queue,
            listener,
        }
    }

    pub(crate) fn run(mut self) {
        // Main worker loop. `pop` blocks while the queue is empty but
        // still open; `None` means closed and drained.
        while let Some(task) = self.queue.pop() {
            self.execute(task);
        }

        log::trace!("worker {} stopping", self.id);
    }

    /// Run a single task to completion, outside the queue lock.
    ///
    /// A panicking task must never unwind into the loop above, so the
    /// payload is caught here, reported and counted.
    fn execute(&mut self, task: Task) {
        self.listener.on_task_started();

        let result = catch_unwind(AssertUnwindSafe(task));

        if let Err(payload) = &result {
            log::error!(
                "worker {}: task panicked: {}",
                self.id,
                panic_message(&**payload)
            );
        }

        self.listener.on_task_completed(result.is_err());
    }
}
