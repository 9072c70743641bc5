//! ---
//! mbs_section: "11-test-harness"
//! mbs_subsection: "01-bootstrap"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Test doubles for the stress runtime."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
//! Test doubles standing in for the kernel primitive, the harness run
//! control, the harness log sink and thread creation.

pub mod control;
pub mod log;
pub mod primitive;
pub mod spawner;

pub use control::{CountingRunControl, PredicateRunControl};
pub use log::{LogRecord, RecordingLogSink};
pub use primitive::{ScriptedMembarrier, Site, Target};
pub use spawner::FlakySpawner;
