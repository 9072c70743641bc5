//! ---
//! mbs_section: "02-stress-runtime"
//! mbs_subsection: "module"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Membarrier stress runtime."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use mbs_logging::{mbs_debug, mbs_info, LogContext, LogSink};
use mbs_metrics::{CallSite, StressMetrics};

use crate::capability::{CapabilityMask, CapabilityProbe, Membarrier, SysMembarrier};
use crate::control::{RunControl, ShutdownFlag};
use crate::error::StressError;
use crate::isolation::default_alt_stack_size;
use crate::pool::{JoinReport, OsThreadSpawner, WorkerPool, WorkerSpawner};
use crate::worker::{Worker, WorkerContext};

/// Reference pool size.
pub const DEFAULT_WORKERS: usize = 4;

/// Binary result handed back to the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Process exit status conventionally associated with the outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::Failure => 1,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Failure => f.write_str("failure"),
        }
    }
}

/// Sizing knobs passed in by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Worker threads to attempt.
    pub workers: usize,
    /// Alternate signal stack size per worker, in bytes.
    pub alt_stack_size: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            alt_stack_size: default_alt_stack_size(),
        }
    }
}

/// What happened during one [`Coordinator::run_with_report`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: Outcome,
    /// Mask from the initial probe, when the probe succeeded.
    pub capabilities: Option<CapabilityMask>,
    pub workers_requested: usize,
    pub workers_started: usize,
    pub spawn_failures: usize,
    pub joins: JoinReport,
    /// Coordinator loop iterations, one recorded progress unit each.
    pub iterations: u64,
    /// Failed barrier calls in the coordinator loop.
    pub primitive_errors: u64,
}

impl RunReport {
    fn aborted(workers_requested: usize, capabilities: Option<CapabilityMask>) -> Self {
        Self {
            outcome: Outcome::Failure,
            capabilities,
            workers_requested,
            workers_started: 0,
            spawn_failures: 0,
            joins: JoinReport::default(),
            iterations: 0,
            primitive_errors: 0,
        }
    }
}

/// Drives one membarrier stress instance.
#[derive(Clone)]
pub struct Coordinator {
    primitive: Arc<dyn Membarrier>,
    spawner: Arc<dyn WorkerSpawner>,
    options: CoordinatorOptions,
    metrics: Option<StressMetrics>,
}

impl Coordinator {
    pub fn new(primitive: Arc<dyn Membarrier>) -> Self {
        Self {
            primitive,
            spawner: Arc::new(OsThreadSpawner::new()),
            options: CoordinatorOptions::default(),
            metrics: None,
        }
    }

    /// Coordinator issuing the real system call.
    pub fn system() -> Self {
        Self::new(Arc::new(SysMembarrier))
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_metrics(mut self, metrics: StressMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run the instance and report only its outcome.
    pub fn run(&self, control: Arc<dyn RunControl>, log: Arc<dyn LogSink>) -> Outcome {
        self.run_with_report(control, log).outcome
    }

    /// Run the instance.
    ///
    /// Only a failed probe or a missing shared command produce
    /// [`Outcome::Failure`]; spawn failures, worker failures and failed
    /// barrier calls in the coordinator loop are logged and tolerated.
    pub fn run_with_report(
        &self,
        control: Arc<dyn RunControl>,
        log: Arc<dyn LogSink>,
    ) -> RunReport {
        let requested = self.options.workers;

        let mask = match CapabilityProbe::new(self.primitive.clone()).require_shared() {
            Ok(mask) => mask,
            Err(StressError::Probe(err)) => {
                log.fail(&err.to_string());
                return RunReport::aborted(requested, None);
            }
            Err(StressError::Unsupported(unsupported)) => {
                mbs_debug!(
                    context = LogContext::new().with_phase("probe"),
                    "capability mask {} lacks the shared command",
                    unsupported.mask
                );
                log.info(&unsupported.to_string());
                return RunReport::aborted(requested, Some(unsupported.mask));
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.set_capabilities(mask.bits());
        }

        let flag = ShutdownFlag::running();
        let mut pool = WorkerPool::with_capacity(requested);
        let mut spawn_failures = 0;
        for slot in 0..requested {
            let ctx = WorkerContext {
                slot,
                flag: flag.clone(),
                control: control.clone(),
                log: log.clone(),
                primitive: self.primitive.clone(),
                alt_stack_size: self.options.alt_stack_size,
                metrics: self.metrics.clone(),
            };
            let spawned = pool.spawn(
                self.spawner.as_ref(),
                slot,
                Box::new(move || {
                    Worker::new(ctx).run();
                }),
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_spawn(spawned.is_ok());
            }
            if let Err(err) = spawned {
                log.warn(&err.to_string());
                spawn_failures += 1;
            }
        }
        let started = pool.started();
        mbs_info!(
            context = LogContext::new().with_phase("spawn"),
            "{} of {} workers started",
            started,
            requested
        );

        let mut iterations = 0u64;
        let mut primitive_errors = 0u64;
        while control.should_continue() {
            if let Err(err) = self.primitive.shared() {
                log.fail(&err.brief());
                primitive_errors += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.record_primitive_error(CallSite::Coordinator, err.command.label());
                }
            }
            control.record_progress();
            iterations += 1;
            if let Some(metrics) = &self.metrics {
                metrics.inc_iteration();
            }
        }

        flag.stop();
        let joins = pool.join();
        if joins.panicked > 0 {
            log.warn(&format!("{} worker(s) panicked", joins.panicked));
        }
        mbs_debug!(
            context = LogContext::new().with_phase("join"),
            "joined {} workers after {} iterations",
            joins.joined,
            iterations
        );

        RunReport {
            outcome: Outcome::Success,
            capabilities: Some(mask),
            workers_requested: requested,
            workers_started: started,
            spawn_failures,
            joins,
            iterations,
            primitive_errors,
        }
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("options", &self.options)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}
