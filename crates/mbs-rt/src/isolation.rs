//! ---
//! mbs_section: "02-stress-runtime"
//! mbs_subsection: "module"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Membarrier stress runtime."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
//! Per-thread signal isolation for worker threads.
//!
//! A worker blocks every deliverable signal so that process-directed signals
//! land on the coordinator (or harness) thread, then installs a private
//! alternate signal stack. POSIX expects a distinct alternate stack per
//! thread; with everything blocked it is never used today, but a later
//! change of disposition must not find the thread without one.
//!
//! Isolation happens in two stages so a caller can observe each one:
//! [`ThreadIsolation::block_signals`] yields a [`SignalsBlocked`], whose
//! [`SignalsBlocked::install_alt_stack`] completes the [`ThreadIsolation`].
//! Both acquisitions are guards: if the stack cannot be installed the mask is
//! restored on return, and dropping [`ThreadIsolation`] reinstates the
//! previous alternate stack before its buffer is freed and then restores the
//! previous signal mask.

use std::cell::Cell;
use std::io;
use std::mem;
use std::ptr;

use crate::error::{IsolationError, StackInstallError};

/// Alignment applied to the alternate stack base.
pub const STACK_ALIGNMENT: usize = 64;

thread_local! {
    static ISOLATED: Cell<bool> = const { Cell::new(false) };
}

/// Platform minimum for an alternate signal stack.
pub fn default_alt_stack_size() -> usize {
    libc::SIGSTKSZ.max(libc::MINSIGSTKSZ)
}

/// Whether the calling thread currently holds a [`ThreadIsolation`].
pub fn is_isolated() -> bool {
    ISOLATED.with(|flag| flag.get())
}

/// Whether every blockable signal is blocked on the calling thread.
///
/// Signals the C library keeps out of `sigfillset` (its internal realtime
/// signals) and the unblockable `SIGKILL`/`SIGSTOP` are not considered.
pub fn signals_blocked() -> bool {
    // SAFETY: a null `set` makes pthread_sigmask only report the current mask
    // into `current`; both sets are plain bitmaps initialised before use.
    unsafe {
        let mut current: libc::sigset_t = mem::zeroed();
        if libc::pthread_sigmask(libc::SIG_BLOCK, ptr::null(), &mut current) != 0 {
            return false;
        }
        let mut blockable: libc::sigset_t = mem::zeroed();
        libc::sigfillset(&mut blockable);
        (1..=libc::SIGRTMAX())
            .filter(|&signal| signal != libc::SIGKILL && signal != libc::SIGSTOP)
            .filter(|&signal| libc::sigismember(&blockable, signal) == 1)
            .all(|signal| libc::sigismember(&current, signal) == 1)
    }
}

/// Blocks every signal on the current thread until dropped.
struct SignalMaskGuard {
    previous: libc::sigset_t,
}

impl SignalMaskGuard {
    fn block_all() -> io::Result<Self> {
        // SAFETY: `all` is initialised by sigfillset and `previous` is written
        // by pthread_sigmask before it is read.
        unsafe {
            let mut all: libc::sigset_t = mem::zeroed();
            libc::sigfillset(&mut all);
            let mut previous: libc::sigset_t = mem::zeroed();
            let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &all, &mut previous);
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
            Ok(Self { previous })
        }
    }
}

impl Drop for SignalMaskGuard {
    fn drop(&mut self) {
        // SAFETY: restores a mask previously reported by the kernel.
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous, ptr::null_mut());
        }
    }
}

/// Thread-private alternate signal stack.
struct AltStackGuard {
    previous: libc::stack_t,
    // Referenced by the kernel until `drop` reinstates `previous`.
    _buffer: Box<[u8]>,
}

impl AltStackGuard {
    fn install(size: usize) -> Result<Self, StackInstallError> {
        let padded = size.checked_add(STACK_ALIGNMENT).ok_or_else(|| StackInstallError {
            size,
            source: io::Error::from_raw_os_error(libc::ENOMEM),
        })?;
        let mut buffer = vec![0u8; padded].into_boxed_slice();
        let base = buffer.as_mut_ptr();
        let offset = base.align_offset(STACK_ALIGNMENT);

        // SAFETY: `offset < STACK_ALIGNMENT`, so `[base + offset, base + offset + size)`
        // lies inside `buffer`, which outlives the registration (see Drop).
        unsafe {
            let stack = libc::stack_t {
                ss_sp: base.add(offset).cast(),
                ss_flags: 0,
                ss_size: size,
            };
            let mut previous: libc::stack_t = mem::zeroed();
            if libc::sigaltstack(&stack, &mut previous) < 0 {
                return Err(StackInstallError {
                    size,
                    source: io::Error::last_os_error(),
                });
            }
            Ok(Self {
                previous,
                _buffer: buffer,
            })
        }
    }
}

impl Drop for AltStackGuard {
    fn drop(&mut self) {
        let restore = if self.previous.ss_flags & libc::SS_DISABLE != 0 {
            libc::stack_t {
                ss_sp: ptr::null_mut(),
                ss_flags: libc::SS_DISABLE,
                ss_size: 0,
            }
        } else {
            libc::stack_t {
                ss_sp: self.previous.ss_sp,
                ss_flags: 0,
                ss_size: self.previous.ss_size,
            }
        };
        // SAFETY: either disables the alternate stack or reinstates the one
        // that was registered before `install`; afterwards the kernel no
        // longer references `_buffer`, which is freed right after.
        unsafe {
            libc::sigaltstack(&restore, ptr::null_mut());
        }
    }
}

/// First isolation stage: every signal is blocked, no alternate stack yet.
///
/// Dropping it restores the previous signal mask.
pub struct SignalsBlocked {
    mask: SignalMaskGuard,
}

impl SignalsBlocked {
    /// Install an alternate stack of `size` bytes, completing the isolation.
    ///
    /// On failure the signal mask is restored before the error is returned.
    pub fn install_alt_stack(self, size: usize) -> Result<ThreadIsolation, IsolationError> {
        let alt_stack = AltStackGuard::install(size)?;
        ISOLATED.with(|flag| flag.set(true));
        Ok(ThreadIsolation {
            _alt_stack: alt_stack,
            _mask: self.mask,
        })
    }
}

impl std::fmt::Debug for SignalsBlocked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalsBlocked").finish_non_exhaustive()
    }
}

/// Scoped right to the calling thread's signal disposition.
///
/// Not `Send`: the mask and the alternate stack belong to the thread that
/// entered the isolation.
pub struct ThreadIsolation {
    // Field order is release order: the stack goes before the mask.
    _alt_stack: AltStackGuard,
    _mask: SignalMaskGuard,
}

impl ThreadIsolation {
    /// Block all signals on the calling thread.
    pub fn block_signals() -> Result<SignalsBlocked, IsolationError> {
        let mask = SignalMaskGuard::block_all().map_err(IsolationError::SignalMask)?;
        Ok(SignalsBlocked { mask })
    }
}

impl Drop for ThreadIsolation {
    fn drop(&mut self) {
        ISOLATED.with(|flag| flag.set(false));
    }
}

impl std::fmt::Debug for ThreadIsolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadIsolation").finish_non_exhaustive()
    }
}
