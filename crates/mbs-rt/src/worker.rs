//! ---
//! mbs_section: "02-stress-runtime"
//! mbs_subsection: "module"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Membarrier stress runtime."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
use std::sync::Arc;

use mbs_logging::{mbs_debug, LogContext, LogSink};
use mbs_metrics::{CallSite, StressMetrics};

use crate::capability::{Command, Membarrier};
use crate::control::{RunControl, ShutdownFlag};
use crate::error::{IsolationError, PrimitiveError};
use crate::isolation::ThreadIsolation;

/// Lifecycle of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    SignalIsolated,
    StackInstalled,
    Looping,
    Terminated,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Init => "init",
            WorkerState::SignalIsolated => "signal-isolated",
            WorkerState::StackInstalled => "stack-installed",
            WorkerState::Looping => "looping",
            WorkerState::Terminated => "terminated",
        }
    }
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The shutdown flag or the run control asked it to stop.
    Stopped,
    /// Signal isolation or the alternate stack could not be set up.
    IsolationFailed,
    /// A query or shared barrier call failed.
    PrimitiveFailed(Command),
}

impl WorkerExit {
    /// Label used for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerExit::Stopped => "stopped",
            WorkerExit::IsolationFailed => "isolation_failed",
            WorkerExit::PrimitiveFailed(Command::Query) => "query_failed",
            WorkerExit::PrimitiveFailed(Command::Shared) => "shared_failed",
        }
    }
}

/// Everything a worker thread shares with its coordinator.
#[derive(Clone)]
pub struct WorkerContext {
    pub slot: usize,
    pub flag: ShutdownFlag,
    pub control: Arc<dyn RunControl>,
    pub log: Arc<dyn LogSink>,
    pub primitive: Arc<dyn Membarrier>,
    pub alt_stack_size: usize,
    pub metrics: Option<StressMetrics>,
}

/// Thread body hammering the shared barrier.
pub struct Worker {
    ctx: WorkerContext,
    state: WorkerState,
}

impl Worker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            state: WorkerState::Init,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run to completion on the calling thread.
    ///
    /// Failures are reported through the log sink; the returned reason is
    /// informational only.
    pub fn run(mut self) -> WorkerExit {
        let exit = match self.isolate() {
            Ok(isolation) => {
                let exit = self.barrier_loop();
                drop(isolation);
                exit
            }
            Err(err) => {
                self.ctx.log.fail(&err.to_string());
                WorkerExit::IsolationFailed
            }
        };
        self.transition(WorkerState::Terminated);
        if let Some(metrics) = &self.ctx.metrics {
            metrics.record_worker_exit(exit.as_str());
        }
        exit
    }

    /// Walk `Init -> SignalIsolated -> StackInstalled`, stopping at the
    /// first stage that fails.
    fn isolate(&mut self) -> Result<ThreadIsolation, IsolationError> {
        let blocked = ThreadIsolation::block_signals()?;
        self.transition(WorkerState::SignalIsolated);
        let isolation = blocked.install_alt_stack(self.ctx.alt_stack_size)?;
        self.transition(WorkerState::StackInstalled);
        Ok(isolation)
    }

    fn barrier_loop(&mut self) -> WorkerExit {
        self.transition(WorkerState::Looping);
        if let Some(metrics) = &self.ctx.metrics {
            metrics.worker_entered_loop();
        }

        let exit = loop {
            if !(self.ctx.flag.is_running() && self.ctx.control.should_continue()) {
                break WorkerExit::Stopped;
            }
            // The mask is re-queried every pass rather than cached.
            let mask = match self.ctx.primitive.query() {
                Ok(mask) => mask,
                Err(err) => break self.primitive_failed(err),
            };
            // Mid-run loss of the shared command is re-polled immediately,
            // without backoff.
            if !mask.supports_shared_barrier() {
                continue;
            }
            if let Err(err) = self.ctx.primitive.shared() {
                break self.primitive_failed(err);
            }
        };

        if let Some(metrics) = &self.ctx.metrics {
            metrics.worker_left_loop();
        }
        exit
    }

    fn primitive_failed(&self, err: PrimitiveError) -> WorkerExit {
        self.ctx.log.fail(&err.to_string());
        if let Some(metrics) = &self.ctx.metrics {
            metrics.record_primitive_error(CallSite::Worker, err.command.label());
        }
        WorkerExit::PrimitiveFailed(err.command)
    }

    fn transition(&mut self, next: WorkerState) {
        mbs_debug!(
            context = LogContext::new().with_worker(self.ctx.slot).with_phase(next.as_str()),
            "worker {} {} -> {}",
            self.ctx.slot,
            self.state.as_str(),
            next.as_str()
        );
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;

    use mbs_logging::Severity;

    use super::*;
    use crate::capability::CapabilityMask;
    use crate::isolation::{default_alt_stack_size, is_isolated, signals_blocked};

    #[derive(Default)]
    struct Log(Mutex<Vec<(Severity, String)>>);

    impl LogSink for Log {
        fn emit(&self, severity: Severity, message: &str) {
            self.0.lock().unwrap().push((severity, message.to_owned()));
        }
    }

    /// Allows a fixed number of `should_continue` checks.
    struct Checks {
        remaining: AtomicUsize,
    }

    impl RunControl for Checks {
        fn should_continue(&self) -> bool {
            self.remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }

        fn record_progress(&self) {}
    }

    struct Primitive {
        mask: u32,
        fail_shared_after: Option<u64>,
        queries: AtomicU64,
        shared: AtomicU64,
        unisolated_calls: AtomicU64,
    }

    impl Primitive {
        fn new(mask: u32, fail_shared_after: Option<u64>) -> Self {
            Self {
                mask,
                fail_shared_after,
                queries: AtomicU64::new(0),
                shared: AtomicU64::new(0),
                unisolated_calls: AtomicU64::new(0),
            }
        }

        fn check_isolation(&self) {
            if !(is_isolated() && signals_blocked()) {
                self.unisolated_calls.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    impl Membarrier for Primitive {
        fn query(&self) -> Result<CapabilityMask, PrimitiveError> {
            self.check_isolation();
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(CapabilityMask::from_bits_retain(self.mask))
        }

        fn shared(&self) -> Result<(), PrimitiveError> {
            self.check_isolation();
            let n = self.shared.fetch_add(1, Ordering::SeqCst) + 1;
            match self.fail_shared_after {
                Some(limit) if n > limit => Err(PrimitiveError::new(
                    Command::Shared,
                    io::Error::from_raw_os_error(libc::EINVAL),
                )),
                _ => Ok(()),
            }
        }
    }

    fn context(
        primitive: Arc<Primitive>,
        control: Arc<dyn RunControl>,
        log: Arc<Log>,
        alt_stack_size: usize,
    ) -> WorkerContext {
        WorkerContext {
            slot: 0,
            flag: ShutdownFlag::running(),
            control,
            log,
            primitive,
            alt_stack_size,
            metrics: None,
        }
    }

    fn run_on_thread(ctx: WorkerContext) -> WorkerExit {
        thread::spawn(move || Worker::new(ctx).run()).join().unwrap()
    }

    #[test]
    fn stops_when_run_control_is_exhausted() {
        let primitive = Arc::new(Primitive::new(0x1, None));
        let log = Arc::new(Log::default());
        let control = Arc::new(Checks {
            remaining: AtomicUsize::new(5),
        });
        let ctx = context(primitive.clone(), control, log.clone(), default_alt_stack_size());
        assert_eq!(run_on_thread(ctx), WorkerExit::Stopped);
        assert_eq!(primitive.queries.load(Ordering::SeqCst), 5);
        assert_eq!(primitive.shared.load(Ordering::SeqCst), 5);
        assert_eq!(primitive.unisolated_calls.load(Ordering::SeqCst), 0);
        assert!(log.0.lock().unwrap().is_empty());
    }

    #[test]
    fn cleared_flag_prevents_any_call() {
        let primitive = Arc::new(Primitive::new(0x1, None));
        let log = Arc::new(Log::default());
        let control = Arc::new(Checks {
            remaining: AtomicUsize::new(usize::MAX),
        });
        let ctx = context(primitive.clone(), control, log, default_alt_stack_size());
        ctx.flag.stop();
        assert_eq!(run_on_thread(ctx), WorkerExit::Stopped);
        assert_eq!(primitive.queries.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_shared_bit_spins_without_issuing_barriers() {
        let primitive = Arc::new(Primitive::new(0x8, None));
        let log = Arc::new(Log::default());
        let control = Arc::new(Checks {
            remaining: AtomicUsize::new(100),
        });
        let ctx = context(primitive.clone(), control, log.clone(), default_alt_stack_size());
        assert_eq!(run_on_thread(ctx), WorkerExit::Stopped);
        assert_eq!(primitive.queries.load(Ordering::SeqCst), 100);
        assert_eq!(primitive.shared.load(Ordering::SeqCst), 0);
        assert!(log.0.lock().unwrap().is_empty());
    }

    #[test]
    fn shared_failure_ends_the_loop_with_a_fail_line() {
        let primitive = Arc::new(Primitive::new(0x1, Some(3)));
        let log = Arc::new(Log::default());
        let control = Arc::new(Checks {
            remaining: AtomicUsize::new(usize::MAX),
        });
        let ctx = context(primitive.clone(), control, log.clone(), default_alt_stack_size());
        assert_eq!(
            run_on_thread(ctx),
            WorkerExit::PrimitiveFailed(Command::Shared)
        );
        assert_eq!(primitive.shared.load(Ordering::SeqCst), 4);
        let records = log.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, Severity::Fail);
        assert!(records[0].1.starts_with("membarrier MEMBARRIER_CMD_SHARED failed: errno=22"));
    }

    #[test]
    fn stack_install_failure_returns_before_the_loop() {
        let primitive = Arc::new(Primitive::new(0x1, None));
        let log = Arc::new(Log::default());
        let polled = Arc::new(AtomicBool::new(false));

        struct Flagging(Arc<AtomicBool>);
        impl RunControl for Flagging {
            fn should_continue(&self) -> bool {
                self.0.store(true, Ordering::SeqCst);
                true
            }
            fn record_progress(&self) {}
        }

        let ctx = context(
            primitive.clone(),
            Arc::new(Flagging(polled.clone())),
            log.clone(),
            1,
        );
        assert_eq!(run_on_thread(ctx), WorkerExit::IsolationFailed);
        assert!(!polled.load(Ordering::SeqCst));
        assert_eq!(primitive.queries.load(Ordering::SeqCst), 0);
        let records = log.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, Severity::Fail);
        assert!(records[0].1.starts_with("sigaltstack of 1 bytes failed"));
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Runs the worker on its own thread and returns its debug output.
    fn run_traced(ctx: WorkerContext) -> (WorkerExit, String) {
        let capture = Capture::default();
        let writer = capture.clone();
        let exit = thread::spawn(move || {
            let subscriber = tracing_subscriber::fmt()
                .with_ansi(false)
                .with_max_level(tracing::Level::DEBUG)
                .with_writer(move || writer.clone())
                .finish();
            tracing::subscriber::with_default(subscriber, || Worker::new(ctx).run())
        })
        .join()
        .unwrap();
        let bytes = capture.0.lock().unwrap().clone();
        (exit, String::from_utf8(bytes).unwrap())
    }

    #[test]
    fn stack_failure_stops_after_the_signal_stage() {
        let primitive = Arc::new(Primitive::new(0x1, None));
        let log = Arc::new(Log::default());
        let control = Arc::new(Checks {
            remaining: AtomicUsize::new(usize::MAX),
        });
        let (exit, output) = run_traced(context(primitive, control, log, 1));
        assert_eq!(exit, WorkerExit::IsolationFailed);
        assert!(output.contains("worker 0 init -> signal-isolated"));
        assert!(output.contains("worker 0 signal-isolated -> terminated"));
        assert!(!output.contains("stack-installed"));
        assert!(!output.contains("looping"));
    }

    #[test]
    fn successful_run_walks_every_state() {
        let primitive = Arc::new(Primitive::new(0x1, None));
        let log = Arc::new(Log::default());
        let control = Arc::new(Checks {
            remaining: AtomicUsize::new(2),
        });
        let (exit, output) =
            run_traced(context(primitive, control, log, default_alt_stack_size()));
        assert_eq!(exit, WorkerExit::Stopped);
        let transitions: Vec<&str> = output
            .lines()
            .filter_map(|line| line.split("worker 0 ").nth(1))
            .map(|rest| rest.split_whitespace().take(3).collect::<Vec<_>>())
            .filter(|words| words.len() == 3 && words[1] == "->")
            .map(|words| words[2])
            .collect();
        assert_eq!(
            transitions,
            ["signal-isolated", "stack-installed", "looping", "terminated"]
        );
    }

    #[test]
    fn state_starts_at_init() {
        let primitive = Arc::new(Primitive::new(0x1, None));
        let ctx = context(
            primitive,
            Arc::new(Checks {
                remaining: AtomicUsize::new(0),
            }),
            Arc::new(Log::default()),
            default_alt_stack_size(),
        );
        assert_eq!(Worker::new(ctx).state(), WorkerState::Init);
    }
}
