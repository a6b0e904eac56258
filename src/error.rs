use std::{error::Error, fmt, io};

/// An error returned when a task could not be submitted because the pool
/// has been stopped.
///
/// Contains the original closure that was refused. This allows you to run
/// it on the current thread or route it somewhere else.
pub struct PoolStoppedError<T>(pub(crate) T);

impl<T> PoolStoppedError<T> {
    /// Extracts the inner closure that could not be submitted.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Error for PoolStoppedError<T> {}

impl<T> fmt::Debug for PoolStoppedError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PoolStoppedError(..)")
    }
}

impl<T> fmt::Display for PoolStoppedError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("worker pool is stopped")
    }
}

/// An error returned when a pool could not be started.
#[derive(Debug)]
pub enum StartError {
    /// The pool has already been started once. Starting is a one-shot
    /// operation.
    AlreadyStarted,

    /// A worker thread could not be spawned. Workers spawned before the
    /// failure have been stopped and joined.
    Spawn(io::Error),
}

impl Error for StartError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StartError::AlreadyStarted => None,
            StartError::Spawn(e) => Some(e),
        }
    }
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::AlreadyStarted => f.write_str("worker pool already started"),
            StartError::Spawn(e) => write!(f, "failed to spawn worker thread: {}", e),
        }
    }
}
