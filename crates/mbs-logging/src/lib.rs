//! ---
//! mbs_section: "03-logging"
//! mbs_subsection: "module"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Log sinks and structured logging macros."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Log sink abstraction handed to the stressor by its harness, plus
//! context-enriched tracing macros for internal diagnostics.

use std::fmt;

pub mod macros;

#[doc(hidden)]
pub use tracing;

/// Severity understood by every [`LogSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Expected conditions, including "feature not present" skips.
    Info,
    /// Tolerated degradation, e.g. a worker that never started.
    Warn,
    /// Misbehaviour of the system under test.
    Fail,
}

impl Severity {
    /// Represent the severity as a static label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Fail => "fail",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for harness-visible messages.
///
/// Implementations own message prefixing (the instance name) and formatting;
/// callers pass bare messages. Sinks are shared with worker threads.
pub trait LogSink: Send + Sync {
    /// Emit a message at the given severity.
    fn emit(&self, severity: Severity, message: &str);

    /// Emit an informational message.
    fn info(&self, message: &str) {
        self.emit(Severity::Info, message);
    }

    /// Emit a warning.
    fn warn(&self, message: &str) {
        self.emit(Severity::Warn, message);
    }

    /// Emit a failure.
    fn fail(&self, message: &str) {
        self.emit(Severity::Fail, message);
    }
}

/// [`LogSink`] forwarding to `tracing`, prefixing each message with the
/// instance name.
#[derive(Debug, Clone)]
pub struct TracingLogSink {
    instance: String,
}

impl TracingLogSink {
    /// Create a sink for the named stress instance.
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Instance name used as message prefix.
    pub fn instance(&self) -> &str {
        &self.instance
    }
}

impl LogSink for TracingLogSink {
    fn emit(&self, severity: Severity, message: &str) {
        let instance = self.instance.as_str();
        match severity {
            Severity::Info => tracing::info!(
                instance,
                severity = severity.as_str(),
                "{}: {}",
                instance,
                message
            ),
            Severity::Warn => tracing::warn!(
                instance,
                severity = severity.as_str(),
                "{}: {}",
                instance,
                message
            ),
            Severity::Fail => tracing::error!(
                instance,
                severity = severity.as_str(),
                "{}: {}",
                instance,
                message
            ),
        }
    }
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Stress instance the event belongs to.
    pub instance: Option<&'a str>,
    /// Worker slot, when the event originates from a worker thread.
    pub worker: Option<usize>,
    /// Lifecycle phase (probe, spawn, loop, join, ...).
    pub phase: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an instance name.
    pub fn with_instance(mut self, instance: &'a str) -> Self {
        self.instance = Some(instance);
        self
    }

    /// Attach a worker slot.
    pub fn with_worker(mut self, slot: usize) -> Self {
        self.worker = Some(slot);
        self
    }

    /// Attach a lifecycle phase.
    pub fn with_phase(mut self, phase: &'a str) -> Self {
        self.phase = Some(phase);
        self
    }
}
