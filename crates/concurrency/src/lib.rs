//! Concurrency layer for the nirva runtime
//!
//! - [`ThreadPool`]: native worker threads consuming a shared FIFO queue
//! - [`ProcThread`]: a pool work item wrapped in a [`ThreadState`] machine,
//!   with cooperative cancel/pause/resume and hard/soft synchronisation waits
//! - [`CancellationToken`]: the flag cancellation requests flip
//! - [`RefCounter`]: counter with a single destruction edge

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod pool;
pub mod proc_thread;
pub mod refcount;
pub mod state;
pub mod token;

pub use error::{ThreadError, ThreadResult};
pub use pool::{PoolConfig, PoolStats, ThreadPool};
pub use proc_thread::{
    ProcThread, ProcThreadBuilder, Step, ThreadBody, ThreadConfig, ThreadContext, ThreadSlot,
};
pub use refcount::RefCounter;
pub use state::{ThreadAttrs, ThreadState};
pub use token::CancellationToken;
