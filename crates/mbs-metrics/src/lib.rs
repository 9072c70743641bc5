//! ---
//! mbs_section: "03-logging"
//! mbs_subsection: "module"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Metrics collection and export utilities."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::debug;

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Encode every registered family in the prometheus text format.
pub fn render_text(registry: &Registry) -> Result<String> {
    let families = registry.gather();
    TextEncoder::new()
        .encode_to_string(&families)
        .context("failed to encode metrics")
}

/// Write the text exposition to `path`, creating parent directories.
pub fn write_text(registry: &Registry, path: &Path) -> Result<()> {
    let body = render_text(registry)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("unable to create metrics directory {}", parent.display()))?;
    }
    fs::write(path, body)
        .with_context(|| format!("unable to write metrics file {}", path.display()))?;
    debug!(path = %path.display(), "metrics exposition written");
    Ok(())
}

/// Where a primitive call was issued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    Coordinator,
    Worker,
}

impl CallSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallSite::Coordinator => "coordinator",
            CallSite::Worker => "worker",
        }
    }
}

/// Metrics published by a stress instance.
#[derive(Clone)]
pub struct StressMetrics {
    registry: SharedRegistry,
    iterations_total: IntCounter,
    primitive_errors_total: IntCounterVec,
    workers_spawned_total: IntCounter,
    worker_spawn_failures_total: IntCounter,
    worker_exits_total: IntCounterVec,
    workers_active: IntGauge,
    capabilities: IntGauge,
}

impl StressMetrics {
    /// Register the stress metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let iterations_total = IntCounter::with_opts(Opts::new(
            "mbs_coordinator_iterations_total",
            "Coordinator loop iterations, one per recorded bogo op",
        ))?;
        registry.register(Box::new(iterations_total.clone()))?;

        let primitive_errors_total = IntCounterVec::new(
            Opts::new(
                "mbs_primitive_errors_total",
                "Failed membarrier invocations by call site and command",
            ),
            &["site", "command"],
        )?;
        registry.register(Box::new(primitive_errors_total.clone()))?;

        let workers_spawned_total = IntCounter::with_opts(Opts::new(
            "mbs_workers_spawned_total",
            "Worker threads that started successfully",
        ))?;
        registry.register(Box::new(workers_spawned_total.clone()))?;

        let worker_spawn_failures_total = IntCounter::with_opts(Opts::new(
            "mbs_worker_spawn_failures_total",
            "Worker threads that could not be started",
        ))?;
        registry.register(Box::new(worker_spawn_failures_total.clone()))?;

        let worker_exits_total = IntCounterVec::new(
            Opts::new(
                "mbs_worker_exits_total",
                "Worker terminations by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(worker_exits_total.clone()))?;

        let workers_active = IntGauge::with_opts(Opts::new(
            "mbs_workers_active",
            "Workers currently inside their barrier loop",
        ))?;
        registry.register(Box::new(workers_active.clone()))?;

        let capabilities = IntGauge::with_opts(Opts::new(
            "mbs_membarrier_capabilities",
            "Command mask reported by the initial membarrier query",
        ))?;
        registry.register(Box::new(capabilities.clone()))?;

        Ok(Self {
            registry,
            iterations_total,
            primitive_errors_total,
            workers_spawned_total,
            worker_spawn_failures_total,
            worker_exits_total,
            workers_active,
            capabilities,
        })
    }

    /// Registry the metric family was registered against.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_iteration(&self) {
        self.iterations_total.inc();
    }

    pub fn iterations(&self) -> u64 {
        self.iterations_total.get()
    }

    pub fn record_primitive_error(&self, site: CallSite, command: &str) {
        self.primitive_errors_total
            .with_label_values(&[site.as_str(), command])
            .inc();
    }

    pub fn record_spawn(&self, started: bool) {
        if started {
            self.workers_spawned_total.inc();
        } else {
            self.worker_spawn_failures_total.inc();
        }
    }

    pub fn worker_entered_loop(&self) {
        self.workers_active.inc();
    }

    pub fn worker_left_loop(&self) {
        self.workers_active.dec();
    }

    pub fn record_worker_exit(&self, reason: &str) {
        self.worker_exits_total.with_label_values(&[reason]).inc();
    }

    pub fn set_capabilities(&self, bits: u32) {
        self.capabilities.set(i64::from(bits));
    }
}

impl std::fmt::Debug for StressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StressMetrics").finish_non_exhaustive()
    }
}
