//! procpool - a local process pool.
//!
//! Fans a batch of parameter sets for one registered task out to at most
//! `max_parallel` OS worker processes, reusing idle workers, retrying failed
//! parameter sets first and shutting down once the queue drains.
//!
//! ```no_run
//! use procpool::worker::{Pool, PoolConfig};
//! use serde_json::json;
//!
//! # fn main() -> procpool::Result<()> {
//! let config = PoolConfig::new("echo")
//!     .max_parallel(2)
//!     .task_params([json!([1]), json!([2]), json!([3])]);
//! let report = Pool::new(config)?.run()?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod logging;
pub mod paths;
pub mod tasks;
pub mod worker;

pub use error::{ArtifactStage, PoolError, Result};
pub use worker::{Pool, PoolConfig, PoolReport, TaskParam, TaskRegistry};
