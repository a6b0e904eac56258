#![doc = include_str!("../README.md")]

mod error;
mod pool;
mod queue;
mod task;
mod worker;

pub use crate::{
    error::{PoolStoppedError, StartError},
    pool::{Builder, PerCore, PoolSize, WorkerPool},
};
