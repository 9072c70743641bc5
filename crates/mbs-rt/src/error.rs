//! ---
//! mbs_section: "02-stress-runtime"
//! mbs_subsection: "module"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Membarrier stress runtime."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
use std::io;

use crate::capability::{CapabilityMask, Command};

/// Render an OS error as `errno=<n>: (<description>)`.
fn describe_os_error(err: &io::Error) -> String {
    let errno = err.raw_os_error().unwrap_or(0);
    let text = err.to_string();
    let description = text.split(" (os error").next().unwrap_or(&text);
    format!("errno={}: ({})", errno, description)
}

/// A membarrier invocation rejected by the kernel.
#[derive(Debug, thiserror::Error)]
#[error("membarrier {command} failed: {}", describe_os_error(.source))]
pub struct PrimitiveError {
    /// Command that was issued.
    pub command: Command,
    /// Underlying OS error.
    #[source]
    pub source: io::Error,
}

impl PrimitiveError {
    pub fn new(command: Command, source: io::Error) -> Self {
        Self { command, source }
    }

    /// Raw errno, if the failure came from the kernel.
    pub fn errno(&self) -> Option<i32> {
        self.source.raw_os_error()
    }

    /// `membarrier failed: errno=<n>: (<description>)`, without the command.
    pub fn brief(&self) -> String {
        format!("membarrier failed: {}", describe_os_error(&self.source))
    }
}

/// The capability query itself failed; the primitive is absent or disallowed.
#[derive(Debug, thiserror::Error)]
#[error("{}", .0.brief())]
pub struct ProbeError(#[source] pub PrimitiveError);

impl From<PrimitiveError> for ProbeError {
    fn from(err: PrimitiveError) -> Self {
        Self(err)
    }
}

/// The primitive exists but does not offer the shared barrier command.
#[derive(Debug, thiserror::Error)]
#[error("membarrier MEMBARRIER_CMD_SHARED not supported")]
pub struct UnsupportedFeature {
    /// Mask returned by the query.
    pub mask: CapabilityMask,
}

/// A worker thread could not be started.
#[derive(Debug, thiserror::Error)]
#[error("worker {slot} could not be started: {source}")]
pub struct SpawnError {
    pub slot: usize,
    #[source]
    pub source: io::Error,
}

/// The per-thread alternate signal stack could not be installed.
#[derive(Debug, thiserror::Error)]
#[error("sigaltstack of {size} bytes failed: {}", describe_os_error(.source))]
pub struct StackInstallError {
    pub size: usize,
    #[source]
    pub source: io::Error,
}

/// Errors raised while a worker isolates itself from signal delivery.
#[derive(Debug, thiserror::Error)]
pub enum IsolationError {
    /// `pthread_sigmask` rejected the request.
    #[error("pthread_sigmask failed: {}", describe_os_error(.0))]
    SignalMask(#[source] io::Error),
    /// `sigaltstack` rejected the request.
    #[error(transparent)]
    AltStack(#[from] StackInstallError),
}

/// Failures that end the whole stress instance.
#[derive(Debug, thiserror::Error)]
pub enum StressError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Unsupported(#[from] UnsupportedFeature),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_error_formats_errno_and_description() {
        let err = PrimitiveError::new(Command::Query, io::Error::from_raw_os_error(libc::EPERM));
        let text = err.to_string();
        assert!(text.starts_with("membarrier MEMBARRIER_CMD_QUERY failed: errno=1: ("));
        assert!(!text.contains("os error"));
        assert_eq!(err.errno(), Some(libc::EPERM));
    }

    #[test]
    fn query_failure_message_omits_the_command() {
        let inner = PrimitiveError::new(Command::Query, io::Error::from_raw_os_error(libc::ENOSYS));
        let err = ProbeError::from(inner);
        assert_eq!(
            err.to_string(),
            "membarrier failed: errno=38: (Function not implemented)"
        );
        assert_eq!(err.0.command, Command::Query);
    }

    #[test]
    fn unsupported_message_is_bare() {
        let err = UnsupportedFeature {
            mask: CapabilityMask::PRIVATE_EXPEDITED,
        };
        assert_eq!(
            err.to_string(),
            "membarrier MEMBARRIER_CMD_SHARED not supported"
        );
    }

    #[test]
    fn stack_install_error_reports_size() {
        let err = StackInstallError {
            size: 1,
            source: io::Error::from_raw_os_error(libc::ENOMEM),
        };
        assert!(err.to_string().starts_with("sigaltstack of 1 bytes failed: errno=12"));
    }
}
