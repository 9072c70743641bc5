//! ---
//! mbs_section: "02-stress-runtime"
//! mbs_subsection: "module"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Membarrier stress runtime."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
//! Concurrent `membarrier(2)` stressor.
//!
//! A [`Coordinator`] probes the kernel for the shared barrier command, spawns
//! a small pool of signal-isolated worker threads that hammer the same
//! primitive, drives its own barrier loop under the harness' [`RunControl`]
//! and finally joins every worker that actually started.

pub mod capability;
pub mod control;
pub mod coordinator;
pub mod error;
pub mod isolation;
pub mod pool;
pub mod worker;

pub use capability::{CapabilityMask, CapabilityProbe, Command, Membarrier, SysMembarrier};
pub use control::{RunControl, ShutdownFlag};
pub use coordinator::{Coordinator, CoordinatorOptions, Outcome, RunReport, DEFAULT_WORKERS};
pub use error::{
    IsolationError, PrimitiveError, ProbeError, SpawnError, StackInstallError, StressError,
    UnsupportedFeature,
};
pub use isolation::{default_alt_stack_size, SignalsBlocked, ThreadIsolation};
pub use pool::{
    JoinReport, OsThreadSpawner, WorkerBody, WorkerPool, WorkerSpawner, WORKER_THREAD_PREFIX,
};
pub use worker::{Worker, WorkerContext, WorkerExit, WorkerState};
