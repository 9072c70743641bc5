//! ---
//! mbs_section: "01-core-functionality"
//! mbs_subsection: "module"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Shared configuration and tracing setup."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
//! Shared primitives for the membarrier stress workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the harness binary and the integration tests.

pub mod config;
pub mod logging;

pub use config::{
    LoadedStressConfig, LoggingConfig, MetricsConfig, RunConfig, StressConfig, WorkerConfig,
};
pub use logging::{init_tracing, LogFormat};
