//! ---
//! mbs_section: "01-core-functionality"
//! mbs_subsection: "binary"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Run summary printed and persisted after a stress run."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use mbs_rt::RunReport;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub instance: String,
    pub outcome: String,
    pub bogo_ops: u64,
    pub elapsed_secs: f64,
    pub ops_per_sec: f64,
    /// Probe mask in hex, absent when the probe failed.
    pub capabilities: Option<String>,
    pub workers_requested: usize,
    pub workers_started: usize,
    pub workers_joined: usize,
    pub workers_panicked: usize,
    pub coordinator_errors: u64,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn from_report(
        instance: &str,
        report: &RunReport,
        elapsed: Duration,
        interrupted: bool,
    ) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        let ops_per_sec = if elapsed_secs > 0.0 {
            report.iterations as f64 / elapsed_secs
        } else {
            0.0
        };
        Self {
            instance: instance.to_owned(),
            outcome: report.outcome.to_string(),
            bogo_ops: report.iterations,
            elapsed_secs,
            ops_per_sec,
            capabilities: report.capabilities.map(|mask| mask.to_string()),
            workers_requested: report.workers_requested,
            workers_started: report.workers_started,
            workers_joined: report.joins.joined,
            workers_panicked: report.joins.panicked,
            coordinator_errors: report.primitive_errors,
            interrupted,
        }
    }

    /// One-line human summary.
    pub fn line(&self) -> String {
        format!(
            "{}: {} bogo ops in {:.2}s ({:.2}/s)",
            self.instance, self.bogo_ops, self.elapsed_secs, self.ops_per_sec
        )
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("unable to create {}", parent.display()))?;
            }
        }
        let body = serde_json::to_string_pretty(self)?;
        fs::write(path, body)
            .with_context(|| format!("unable to write run summary {}", path.display()))
    }
}
