//! Shared runtime pieces for codervpn.
//!
//! - [`concurrency`]: cancellable sibling joins and a scoped async lock
//! - [`tracing`]: logging setup shared by the CLI and the service host

pub mod concurrency;
pub mod tracing;

pub use concurrency::{CancellableJoin, Cancelled, ScopedLock, TaskError, join_cancellable};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
