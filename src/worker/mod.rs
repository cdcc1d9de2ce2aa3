//! API worker system: remote-facing jobs executed off the caller's path.
//!
//! - `job`: Job, JobOperation, JobResult
//! - `worker`: job loop and per-operation handlers
//! - `pool`: WorkerPool lifecycle, submission and result stream
//! - `sync`: reconciliation of local and remote task sets

pub mod job;
pub mod pool;
pub mod sync;
pub mod worker;

pub use job::{Job, JobKind, JobOperation, JobResult};
pub use pool::{PoolStatus, WorkerPool};
pub use sync::{Reconciler, SyncReport};
pub use worker::{Worker, WorkerDeps};
