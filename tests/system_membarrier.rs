//! ---
//! mbs_section: "15-testing-qa-runbook"
//! mbs_subsection: "integration-tests"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Short runs against the host kernel's membarrier(2)."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
#![cfg(target_os = "linux")]

use std::sync::Arc;

use mbs_logging::Severity;
use mbs_rt::{CapabilityProbe, Coordinator, Outcome};
use mbs_testharness::{CountingRunControl, RecordingLogSink};

// Containers may filter the syscall or run kernels without the command, so
// the expectations follow whatever the probe reports on this host.
#[test]
fn system_run_agrees_with_probe() {
    let probed = CapabilityProbe::system().query();
    let control = Arc::new(CountingRunControl::allowing(20));
    let log = Arc::new(RecordingLogSink::new());

    let report = Coordinator::system().run_with_report(control.clone(), log.clone());

    match probed {
        Ok(mask) if mask.supports_shared_barrier() => {
            assert_eq!(report.outcome, Outcome::Success);
            assert_eq!(report.iterations, 20);
            assert_eq!(control.progress(), 20);
            assert_eq!(report.joins.joined, report.workers_started);
            assert_eq!(log.count(Severity::Fail), 0);
        }
        Ok(_) => {
            assert_eq!(report.outcome, Outcome::Failure);
            assert_eq!(log.count(Severity::Info), 1);
            assert_eq!(report.workers_started, 0);
        }
        Err(_) => {
            assert_eq!(report.outcome, Outcome::Failure);
            assert_eq!(log.count(Severity::Fail), 1);
            assert_eq!(report.workers_started, 0);
        }
    }
}
