//! Implementation of the worker pool itself.

use std::{
    fmt, io,
    panic::resume_unwind,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use once_cell::sync::Lazy;

use crate::{
    error::{PoolStoppedError, StartError},
    queue::TaskQueue,
    worker::{Listener, Worker},
};

#[cfg(target_has_atomic = "64")]
type AtomicCounter = std::sync::atomic::AtomicU64;

#[cfg(not(target_has_atomic = "64"))]
type AtomicCounter = std::sync::atomic::AtomicU32;

/// A value describing how many worker threads a pool should own.
///
/// Any count can be wrapped in [`PerCore`] to be made relative to the
/// number of available CPU cores on the current system.
///
/// See [`Builder::size`] for details.
pub trait PoolSize {
    /// Get the number of worker threads for the pool.
    fn worker_count(&self) -> usize;
}

impl PoolSize for usize {
    fn worker_count(&self) -> usize {
        *self
    }
}

/// Modifies a worker count to be per available CPU core.
///
/// # Examples
///
/// ```
/// # use threadmill::PerCore;
/// // one worker per core
/// let size = PerCore(1);
///
/// // four workers per core
/// let size = PerCore(4);
/// ```
pub struct PerCore<T>(pub T);

static CORE_COUNT: Lazy<usize> = Lazy::new(|| num_cpus::get().max(1));

impl<T> From<T> for PerCore<T> {
    fn from(size: T) -> Self {
        Self(size)
    }
}

impl<T: PoolSize> PoolSize for PerCore<T> {
    fn worker_count(&self) -> usize {
        *CORE_COUNT * self.0.worker_count()
    }
}

/// A builder for constructing a customized [`WorkerPool`].
///
/// # Examples
///
/// ```
/// let custom_pool = threadmill::WorkerPool::builder()
///     .name("my-pool")
///     .size(2)
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
    size: Option<usize>,
    stack_size: Option<usize>,
}

impl Builder {
    /// Set a custom thread name for threads spawned by this pool.
    ///
    /// # Panics
    ///
    /// Panics if the name contains null bytes (`\0`).
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = threadmill::WorkerPool::builder().name("my-pool").build();
    /// ```
    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        let name = name.into();

        if name.as_bytes().contains(&0) {
            panic!("worker pool name must not contain null bytes");
        }

        self.name = Some(name);
        self
    }

    /// Set the number of worker threads owned by this pool.
    ///
    /// The count is fixed for the lifetime of the pool. Any count can be
    /// wrapped in [`PerCore`] to be made relative to the number of
    /// available CPU cores on the current system.
    ///
    /// If not set, the pool gets one worker per CPU core.
    ///
    /// A size of zero is allowed and produces a degenerate pool: it
    /// accepts submissions without blocking but never executes them, and
    /// [`start`](WorkerPool::start) has nothing to run.
    ///
    /// # Examples
    ///
    /// ```
    /// // Create a pool with exactly 2 worker threads.
    /// let pool = threadmill::WorkerPool::builder().size(2).build();
    /// ```
    ///
    /// ```
    /// use threadmill::PerCore;
    ///
    /// // Create a pool with two workers per core.
    /// let pool = threadmill::WorkerPool::builder().size(PerCore(2)).build();
    /// ```
    pub fn size<S: PoolSize>(mut self, size: S) -> Self {
        self.size = Some(size.worker_count());
        self
    }

    /// Set the size of the stack (in bytes) for workers in this pool.
    ///
    /// The actual stack size may be greater than this value if the
    /// platform enforces a larger minimum stack size.
    ///
    /// The stack size if not specified will be the default size for new
    /// Rust threads, currently 2 MiB. This can also be overridden by
    /// setting the `RUST_MIN_STACK` environment variable if not specified
    /// in code.
    ///
    /// # Examples
    ///
    /// ```
    /// // Worker threads will have a stack size of at least 32 KiB.
    /// let pool = threadmill::WorkerPool::builder().stack_size(32 * 1024).build();
    /// ```
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Create a worker pool according to the configuration set with this
    /// builder.
    ///
    /// No threads are spawned here; workers come to life inside
    /// [`start`](WorkerPool::start).
    pub fn build(self) -> WorkerPool {
        let worker_count = self
            .size
            .unwrap_or_else(|| PerCore(1).worker_count());

        WorkerPool {
            thread_name: self.name,
            stack_size: self.stack_size,
            worker_count,
            started: AtomicBool::new(false),
            queue: Arc::new(TaskQueue::new()),
            shared: Arc::new(Shared {
                running_tasks_count: Default::default(),
                completed_tasks_count: Default::default(),
                panicked_tasks_count: Default::default(),
            }),
        }
    }
}

/// A fixed-size pool of worker threads sharing one FIFO task queue.
///
/// Producers call [`submit`](WorkerPool::submit) from any number of
/// threads; a fixed group of workers dequeues tasks in submission order
/// and runs them in parallel.
///
/// # Lifecycle
///
/// Construction allocates the queue but spawns nothing. Workers exist
/// only while [`start`](WorkerPool::start) runs: it spawns the configured
/// number of threads and then blocks until every one of them has exited,
/// which happens once [`stop`](WorkerPool::stop) has been signalled *and*
/// the queue is drained. Starting is one-shot; the pool cannot be
/// restarted.
///
/// Because the workers are spawned and joined inside a single call, no
/// worker thread can outlive the scope that runs the pool, whichever way
/// that scope exits.
///
/// # Queueing
///
/// The queue is unbounded and submission never blocks, including before
/// `start`. Tasks submitted after `stop` are refused and handed back to
/// the caller. Dequeue order is submission order, but completion order
/// across workers is not guaranteed.
///
/// # Monitoring
///
/// Each pool instance provides methods for gathering various statistics
/// on the pool's usage, such as queued, running and completed task
/// counts. While these methods provide the most up-to-date numbers upon
/// invocation, they should not be used for controlling program behavior
/// since they can become immediately outdated due to the live nature of
/// the pool.
pub struct WorkerPool {
    thread_name: Option<String>,
    stack_size: Option<usize>,
    worker_count: usize,
    started: AtomicBool,
    queue: Arc<TaskQueue>,
    shared: Arc<Shared>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    /// Create a new worker pool with the default configuration.
    ///
    /// If you'd like to customize the pool's behavior then use
    /// [`WorkerPool::builder`].
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Get a builder for creating a customized worker pool.
    #[inline]
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Get the number of worker threads this pool was configured with.
    #[inline]
    pub fn size(&self) -> usize {
        self.worker_count
    }

    /// Get the number of tasks queued for execution, but not yet started.
    ///
    /// Note that the number returned may become immediately outdated
    /// after invocation.
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = threadmill::WorkerPool::builder().size(1).build();
    ///
    /// // Nothing is queued yet.
    /// assert_eq!(pool.queued_tasks(), 0);
    ///
    /// // Tasks wait in the queue until the pool is started.
    /// pool.submit(|| {}).unwrap();
    /// pool.submit(|| {}).unwrap();
    /// assert_eq!(pool.queued_tasks(), 2);
    ///
    /// pool.stop();
    /// pool.start().unwrap();
    /// assert_eq!(pool.queued_tasks(), 0);
    /// ```
    #[inline]
    pub fn queued_tasks(&self) -> usize {
        self.queue.len()
    }

    /// Get the number of tasks currently being executed by workers.
    ///
    /// Note that the number returned may become immediately outdated
    /// after invocation.
    #[inline]
    pub fn running_tasks(&self) -> usize {
        self.shared.running_tasks_count.load(Ordering::Relaxed)
    }

    /// Get the number of tasks completed (successfully or otherwise) by
    /// this pool since it was created.
    ///
    /// Note that the number returned may become immediately outdated
    /// after invocation.
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = threadmill::WorkerPool::builder().size(1).build();
    ///
    /// for _ in 0..4 {
    ///     pool.submit(|| {}).unwrap();
    /// }
    ///
    /// pool.stop();
    /// pool.start().unwrap();
    ///
    /// assert_eq!(pool.completed_tasks(), 4);
    /// ```
    #[inline]
    #[allow(clippy::useless_conversion)]
    pub fn completed_tasks(&self) -> u64 {
        self.shared.completed_tasks_count.load(Ordering::Relaxed).into()
    }

    /// Get the number of tasks that have panicked since the pool was
    /// created.
    ///
    /// Note that the number returned may become immediately outdated
    /// after invocation.
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = threadmill::WorkerPool::builder().size(1).build();
    ///
    /// pool.submit(|| panic!("this task panics")).unwrap();
    /// pool.stop();
    /// pool.start().unwrap();
    ///
    /// assert_eq!(pool.panicked_tasks(), 1);
    /// ```
    #[inline]
    #[allow(clippy::useless_conversion)]
    pub fn panicked_tasks(&self) -> u64 {
        self.shared.panicked_tasks_count.load(Ordering::Relaxed).into()
    }

    /// Check whether [`stop`](WorkerPool::stop) has been called on this
    /// pool.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.queue.is_closed()
    }

    /// Submit a closure to be executed by the pool.
    ///
    /// The task is placed at the back of the shared queue and one idle
    /// worker, if any, is woken to take it. Submission never blocks: the
    /// queue is unbounded, and tasks submitted before
    /// [`start`](WorkerPool::start) simply accrue until workers are
    /// running.
    ///
    /// Once the pool has been stopped, submissions are refused and the
    /// closure is returned inside the error, so the caller can run it
    /// elsewhere instead of it being silently stranded in a queue no
    /// worker will ever drain again.
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = threadmill::WorkerPool::builder().size(2).build();
    /// let (tx, rx) = std::sync::mpsc::channel();
    ///
    /// for i in 0..4 {
    ///     let tx = tx.clone();
    ///     pool.submit(move || tx.send(i * i).unwrap()).unwrap();
    /// }
    ///
    /// pool.stop();
    /// pool.start().unwrap();
    ///
    /// let sum: i32 = rx.try_iter().sum();
    /// assert_eq!(sum, 0 + 1 + 4 + 9);
    /// ```
    ///
    /// A refused submission hands the closure back:
    ///
    /// ```
    /// let pool = threadmill::WorkerPool::new();
    /// pool.stop();
    ///
    /// let rejected = pool.submit(|| println!("never queued")).unwrap_err();
    ///
    /// // The closure comes back so you can run it yourself.
    /// rejected.into_inner()();
    /// ```
    pub fn submit<F>(&self, task: F) -> Result<(), PoolStoppedError<F>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(task).map_err(PoolStoppedError)
    }

    /// Spawn the pool's workers and block until all of them have exited.
    ///
    /// Exactly [`size`](WorkerPool::size) threads are spawned, each
    /// running the worker loop: wait for a task or for shutdown, take the
    /// task at the front of the queue, run it outside the queue lock,
    /// repeat. A worker exits once the pool is stopped *and* the queue is
    /// empty, so every task submitted before [`stop`](WorkerPool::stop)
    /// is executed before `start` returns.
    ///
    /// This is a blocking "run until stopped and drained" call, not a
    /// launcher. Callers that need the pool running in the background
    /// should hand this call to a dedicated thread and share the pool
    /// behind an [`Arc`].
    ///
    /// Starting is one-shot: a second call returns
    /// [`StartError::AlreadyStarted`] and spawns nothing. A pool of size
    /// zero has nothing to run and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`StartError::Spawn`] if a worker thread could not be
    /// created. The workers spawned before the failure are stopped and
    /// joined before the error is returned; the pool is unusable
    /// afterwards.
    ///
    /// # Panics
    ///
    /// Task panics are caught inside the workers and only reported. If a
    /// worker thread itself panics, that is a bug in the pool; the
    /// remaining workers are still joined and then the panic is
    /// propagated to the caller.
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = threadmill::WorkerPool::builder().size(2).build();
    ///
    /// for _ in 0..8 {
    ///     pool.submit(|| { /* work */ }).unwrap();
    /// }
    ///
    /// // Nothing has executed yet; workers exist only while `start` runs.
    /// pool.stop();
    /// pool.start().unwrap();
    ///
    /// assert_eq!(pool.completed_tasks(), 8);
    /// assert!(pool.start().is_err());
    /// ```
    pub fn start(&self) -> Result<(), StartError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StartError::AlreadyStarted);
        }

        let mut handles = Vec::with_capacity(self.worker_count);
        let mut spawn_error = None;

        for id in 0..self.worker_count {
            match self.spawn_worker(id) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    spawn_error = Some(e);
                    break;
                }
            }
        }

        // A failed spawn is fatal for the pool. Close the queue so the
        // workers that did spawn drain and exit before the error
        // surfaces.
        if spawn_error.is_some() {
            self.stop();
        }

        let mut worker_panic = None;

        for handle in handles {
            if let Err(payload) = handle.join() {
                // Task panics are caught inside the worker, so this means
                // the worker loop itself panicked. Keep joining the rest
                // before re-raising.
                if worker_panic.is_none() {
                    worker_panic = Some(payload);
                }
            }
        }

        if let Some(payload) = worker_panic {
            resume_unwind(payload);
        }

        match spawn_error {
            Some(e) => Err(StartError::Spawn(e)),
            None => Ok(()),
        }
    }

    /// Signal the pool to shut down.
    ///
    /// Closes the queue to new submissions and wakes every waiting
    /// worker. Tasks already queued are not discarded: workers drain the
    /// queue before exiting. Tasks already running are not interrupted.
    ///
    /// Stopping does not wait for anything; [`start`](WorkerPool::start)
    /// returning is what marks the pool fully shut down. Calling `stop`
    /// more than once has no additional effect.
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = threadmill::WorkerPool::new();
    ///
    /// pool.stop();
    /// pool.stop();
    /// assert!(pool.is_stopped());
    /// ```
    pub fn stop(&self) {
        self.queue.close();
    }

    /// Spawn a single worker thread, configured per the pool settings.
    fn spawn_worker(&self, id: usize) -> io::Result<thread::JoinHandle<()>> {
        struct WorkerListener {
            shared: Arc<Shared>,
        }

        impl Listener for WorkerListener {
            fn on_task_started(&mut self) {
                self.shared
                    .running_tasks_count
                    .fetch_add(1, Ordering::Relaxed);
            }

            fn on_task_completed(&mut self, panicked: bool) {
                self.shared
                    .running_tasks_count
                    .fetch_sub(1, Ordering::Relaxed);
                self.shared
                    .completed_tasks_count
                    .fetch_add(1, Ordering::Relaxed);

                if panicked {
                    self.shared
                        .panicked_tasks_count
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let mut builder = thread::Builder::new();

        if let Some(name) = self.thread_name.as_ref() {
            builder = builder.name(name.clone());
        }

        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        let worker = Worker::new(
            id,
            self.queue.clone(),
            WorkerListener {
                shared: self.shared.clone(),
            },
        );

        builder.spawn(move || worker.run())
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size())
            .field("queued_tasks", &self.queued_tasks())
            .field("running_tasks", &self.running_tasks())
            .field("completed_tasks", &self.completed_tasks())
            .finish()
    }
}

/// Counters shared by the pool handle and the worker threads.
struct Shared {
    running_tasks_count: AtomicUsize,
    completed_tasks_count: AtomicCounter,
    panicked_tasks_count: AtomicCounter,
}
