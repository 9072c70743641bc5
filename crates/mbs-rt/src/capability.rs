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
use std::io;
use std::sync::Arc;

use bitflags::bitflags;
use tracing::debug;

use crate::error::{PrimitiveError, ProbeError, StressError, UnsupportedFeature};

bitflags! {
    /// Command mask returned by `MEMBARRIER_CMD_QUERY`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CapabilityMask: u32 {
        /// `MEMBARRIER_CMD_SHARED`, later renamed `MEMBARRIER_CMD_GLOBAL`.
        const SHARED = 1 << 0;
        const GLOBAL_EXPEDITED = 1 << 1;
        const REGISTER_GLOBAL_EXPEDITED = 1 << 2;
        const PRIVATE_EXPEDITED = 1 << 3;
        const REGISTER_PRIVATE_EXPEDITED = 1 << 4;
        const PRIVATE_EXPEDITED_SYNC_CORE = 1 << 5;
        const REGISTER_PRIVATE_EXPEDITED_SYNC_CORE = 1 << 6;
        const PRIVATE_EXPEDITED_RSEQ = 1 << 7;
        const REGISTER_PRIVATE_EXPEDITED_RSEQ = 1 << 8;
        const GET_REGISTRATIONS = 1 << 9;
    }
}

impl CapabilityMask {
    /// Whether the broadcast barrier used by the stressor is available.
    pub fn supports_shared_barrier(&self) -> bool {
        self.contains(CapabilityMask::SHARED)
    }

    /// Names of every known command present in the mask.
    pub fn command_names(&self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

impl fmt::Display for CapabilityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.bits())
    }
}

/// Commands the stressor issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Side-effect free capability discovery.
    Query,
    /// Broadcast fence across every thread of every process.
    Shared,
}

impl Command {
    /// Value passed to the system call.
    pub fn code(&self) -> i32 {
        match self {
            Command::Query => 0,
            Command::Shared => CapabilityMask::SHARED.bits() as i32,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Query => "MEMBARRIER_CMD_QUERY",
            Command::Shared => "MEMBARRIER_CMD_SHARED",
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Command::Query => "query",
            Command::Shared => "shared",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kernel barrier primitive under stress.
///
/// Every caller of [`Membarrier::shared`] must have seen
/// [`CapabilityMask::supports_shared_barrier`] return `true` first.
pub trait Membarrier: Send + Sync {
    /// Issue `MEMBARRIER_CMD_QUERY`.
    fn query(&self) -> Result<CapabilityMask, PrimitiveError>;

    /// Issue `MEMBARRIER_CMD_SHARED`.
    fn shared(&self) -> Result<(), PrimitiveError>;
}

/// `membarrier(2)` through the raw system call.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysMembarrier;

impl SysMembarrier {
    #[cfg(target_os = "linux")]
    fn call(command: Command) -> Result<libc::c_long, PrimitiveError> {
        // SAFETY: membarrier takes two integer arguments (cmd, flags) and does
        // not dereference user memory for the commands issued here.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_membarrier,
                command.code() as libc::c_int,
                0 as libc::c_int,
            )
        };
        if ret < 0 {
            return Err(PrimitiveError::new(command, io::Error::last_os_error()));
        }
        Ok(ret)
    }

    #[cfg(not(target_os = "linux"))]
    fn call(command: Command) -> Result<libc::c_long, PrimitiveError> {
        Err(PrimitiveError::new(
            command,
            io::Error::from_raw_os_error(libc::ENOSYS),
        ))
    }
}

impl Membarrier for SysMembarrier {
    fn query(&self) -> Result<CapabilityMask, PrimitiveError> {
        let bits = Self::call(Command::Query)?;
        Ok(CapabilityMask::from_bits_retain(bits as u32))
    }

    fn shared(&self) -> Result<(), PrimitiveError> {
        Self::call(Command::Shared).map(|_| ())
    }
}

/// Capability discovery performed once before any active barrier is issued.
#[derive(Clone)]
pub struct CapabilityProbe {
    primitive: Arc<dyn Membarrier>,
}

impl CapabilityProbe {
    pub fn new(primitive: Arc<dyn Membarrier>) -> Self {
        Self { primitive }
    }

    /// Probe the running kernel.
    pub fn system() -> Self {
        Self::new(Arc::new(SysMembarrier))
    }

    /// Query the primitive without side effects.
    pub fn query(&self) -> Result<CapabilityMask, ProbeError> {
        let mask = self.primitive.query()?;
        debug!(mask = %mask, commands = ?mask.command_names(), "membarrier capabilities");
        Ok(mask)
    }

    /// Query and insist on the shared barrier command.
    pub fn require_shared(&self) -> Result<CapabilityMask, StressError> {
        let mask = self.query()?;
        if !mask.supports_shared_barrier() {
            return Err(UnsupportedFeature { mask }.into());
        }
        Ok(mask)
    }
}

impl fmt::Debug for CapabilityProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityProbe").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMask(Result<u32, i32>);

    impl Membarrier for FixedMask {
        fn query(&self) -> Result<CapabilityMask, PrimitiveError> {
            match self.0 {
                Ok(bits) => Ok(CapabilityMask::from_bits_retain(bits)),
                Err(errno) => Err(PrimitiveError::new(
                    Command::Query,
                    io::Error::from_raw_os_error(errno),
                )),
            }
        }

        fn shared(&self) -> Result<(), PrimitiveError> {
            Ok(())
        }
    }

    fn probe(result: Result<u32, i32>) -> CapabilityProbe {
        CapabilityProbe::new(Arc::new(FixedMask(result)))
    }

    #[test]
    fn mask_reports_shared_bit() {
        assert!(CapabilityMask::from_bits_retain(0b1).supports_shared_barrier());
        assert!(CapabilityMask::from_bits_retain(0x19).supports_shared_barrier());
        assert!(!CapabilityMask::from_bits_retain(0x18).supports_shared_barrier());
        assert!(!CapabilityMask::empty().supports_shared_barrier());
    }

    #[test]
    fn unknown_bits_are_retained() {
        let mask = CapabilityMask::from_bits_retain(0x8001);
        assert_eq!(mask.bits(), 0x8001);
        assert_eq!(mask.command_names(), vec!["SHARED"]);
        assert_eq!(mask.to_string(), "0x8001");
    }

    #[test]
    fn command_codes_match_kernel_abi() {
        assert_eq!(Command::Query.code(), 0);
        assert_eq!(Command::Shared.code(), 1);
    }

    #[test]
    fn require_shared_distinguishes_failures() {
        assert!(probe(Ok(0x1)).require_shared().is_ok());
        assert!(matches!(
            probe(Ok(0x8)).require_shared(),
            Err(StressError::Unsupported(UnsupportedFeature { mask })) if mask.bits() == 0x8
        ));
        assert!(matches!(
            probe(Err(libc::ENOSYS)).require_shared(),
            Err(StressError::Probe(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn system_query_is_side_effect_free() {
        // Kernels without membarrier (or seccomp sandboxes) report an error;
        // either way the call must not panic.
        match SysMembarrier.query() {
            Ok(mask) => assert_eq!(CapabilityMask::from_bits_retain(mask.bits()), mask),
            Err(err) => assert_eq!(err.command, Command::Query),
        }
    }
}
