//! ---
//! mbs_section: "11-test-harness"
//! mbs_subsection: "02-doubles"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Log sink that records harness log lines."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
use mbs_logging::{LogSink, Severity};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub severity: Severity,
    pub message: String,
}

/// Captures every emitted line in order.
#[derive(Debug, Default)]
pub struct RecordingLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl RecordingLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.severity == severity)
            .count()
    }

    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.severity == severity)
            .map(|r| r.message.clone())
            .collect()
    }
}

impl LogSink for RecordingLogSink {
    fn emit(&self, severity: Severity, message: &str) {
        self.records.lock().push(LogRecord {
            severity,
            message: message.to_owned(),
        });
    }
}
