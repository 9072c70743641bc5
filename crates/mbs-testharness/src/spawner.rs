//! ---
//! mbs_section: "11-test-harness"
//! mbs_subsection: "02-doubles"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Thread spawner with injected failures."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use mbs_rt::{OsThreadSpawner, WorkerBody, WorkerSpawner};

/// Refuses to start the listed slots; starts the rest as real named threads.
#[derive(Debug, Default)]
pub struct FlakySpawner {
    failing: HashSet<usize>,
    inner: OsThreadSpawner,
    attempts: AtomicUsize,
    started: AtomicUsize,
}

impl FlakySpawner {
    pub fn failing(slots: impl IntoIterator<Item = usize>) -> Self {
        Self {
            failing: slots.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Never fails.
    pub fn reliable() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl WorkerSpawner for FlakySpawner {
    fn spawn(&self, slot: usize, body: WorkerBody) -> io::Result<JoinHandle<()>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&slot) {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "Resource temporarily unavailable",
            ));
        }
        let handle = self.inner.spawn(slot, body)?;
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }
}
