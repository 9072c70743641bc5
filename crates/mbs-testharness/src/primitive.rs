//! ---
//! mbs_section: "11-test-harness"
//! mbs_subsection: "02-doubles"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Scripted membarrier primitive."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use mbs_rt::isolation::{is_isolated, signals_blocked};
use mbs_rt::{CapabilityMask, Command, Membarrier, PrimitiveError, WORKER_THREAD_PREFIX};

const TRACKED_SLOTS: usize = 64;

/// Thread a call was issued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    /// Any thread not named like a worker: the probe and coordinator loop.
    Caller,
    Worker(usize),
}

impl Site {
    pub fn current() -> Self {
        thread::current()
            .name()
            .and_then(|name| name.strip_prefix(WORKER_THREAD_PREFIX))
            .and_then(|slot| slot.parse().ok())
            .map_or(Site::Caller, Site::Worker)
    }
}

/// Which callers an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Nowhere,
    Caller,
    Worker(usize),
}

impl Target {
    fn matches(&self, site: Site) -> bool {
        match (self, site) {
            (Target::Caller, Site::Caller) => true,
            (Target::Worker(want), Site::Worker(slot)) => *want == slot,
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct CallCounts {
    query: AtomicU64,
    shared: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    target: Target,
    errno: i32,
}

impl Failure {
    const NONE: Failure = Failure {
        target: Target::Nowhere,
        errno: 0,
    };
}

/// [`Membarrier`] double with scripted masks and failures.
///
/// Calls are counted per site. Every call made from a worker thread also
/// checks that the thread is signal-isolated; violations are counted.
#[derive(Debug)]
pub struct ScriptedMembarrier {
    caller_mask: u32,
    worker_mask: u32,
    query_failure: Failure,
    shared_failure: Failure,
    caller: CallCounts,
    workers: Vec<CallCounts>,
    isolation_violations: AtomicU64,
}

impl ScriptedMembarrier {
    /// Reports `mask` to every caller and never fails.
    pub fn with_mask(mask: u32) -> Self {
        Self {
            caller_mask: mask,
            worker_mask: mask,
            query_failure: Failure::NONE,
            shared_failure: Failure::NONE,
            caller: CallCounts::default(),
            workers: (0..TRACKED_SLOTS).map(|_| CallCounts::default()).collect(),
            isolation_violations: AtomicU64::new(0),
        }
    }

    /// Reports only the shared command.
    pub fn supporting_shared() -> Self {
        Self::with_mask(CapabilityMask::SHARED.bits())
    }

    /// Mask seen by worker threads, independent of the probe's.
    pub fn worker_mask(mut self, mask: u32) -> Self {
        self.worker_mask = mask;
        self
    }

    pub fn fail_query(mut self, target: Target, errno: i32) -> Self {
        self.query_failure = Failure { target, errno };
        self
    }

    pub fn fail_shared(mut self, target: Target, errno: i32) -> Self {
        self.shared_failure = Failure { target, errno };
        self
    }

    pub fn caller_queries(&self) -> u64 {
        self.caller.query.load(Ordering::SeqCst)
    }

    pub fn caller_shared_calls(&self) -> u64 {
        self.caller.shared.load(Ordering::SeqCst)
    }

    pub fn worker_queries(&self, slot: usize) -> u64 {
        self.workers
            .get(slot)
            .map_or(0, |counts| counts.query.load(Ordering::SeqCst))
    }

    pub fn worker_shared_calls(&self, slot: usize) -> u64 {
        self.workers
            .get(slot)
            .map_or(0, |counts| counts.shared.load(Ordering::SeqCst))
    }

    /// Query plus shared calls made by all worker threads.
    pub fn worker_calls(&self) -> u64 {
        self.workers
            .iter()
            .map(|c| c.query.load(Ordering::SeqCst) + c.shared.load(Ordering::SeqCst))
            .sum()
    }

    /// Worker calls made without signals blocked and an alternate stack installed.
    pub fn isolation_violations(&self) -> u64 {
        self.isolation_violations.load(Ordering::SeqCst)
    }

    fn counts(&self, site: Site) -> Option<&CallCounts> {
        match site {
            Site::Caller => Some(&self.caller),
            Site::Worker(slot) => self.workers.get(slot),
        }
    }

    fn observe(&self, site: Site) {
        if matches!(site, Site::Worker(_)) && !(is_isolated() && signals_blocked()) {
            self.isolation_violations.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn injected(command: Command, errno: i32) -> PrimitiveError {
    PrimitiveError::new(command, io::Error::from_raw_os_error(errno))
}

impl Membarrier for ScriptedMembarrier {
    fn query(&self) -> Result<CapabilityMask, PrimitiveError> {
        let site = Site::current();
        self.observe(site);
        if let Some(counts) = self.counts(site) {
            counts.query.fetch_add(1, Ordering::SeqCst);
        }
        if self.query_failure.target.matches(site) {
            return Err(injected(Command::Query, self.query_failure.errno));
        }
        let bits = match site {
            Site::Caller => self.caller_mask,
            Site::Worker(_) => self.worker_mask,
        };
        Ok(CapabilityMask::from_bits_retain(bits))
    }

    fn shared(&self) -> Result<(), PrimitiveError> {
        let site = Site::current();
        self.observe(site);
        if let Some(counts) = self.counts(site) {
            counts.shared.fetch_add(1, Ordering::SeqCst);
        }
        if self.shared_failure.target.matches(site) {
            return Err(injected(Command::Shared, self.shared_failure.errno));
        }
        Ok(())
    }
}
