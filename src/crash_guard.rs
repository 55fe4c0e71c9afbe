//! Crash respawn guard
//!
//! When respawning is enabled the supervisor arms this guard before the
//! compositor runtime starts. A fatal signal (SIGILL, SIGABRT, SIGFPE,
//! SIGSEGV or SIGBUS) then runs [`trap_handler`] on a dedicated alternate
//! stack, so even an exhausted or corrupted main stack can still be
//! recovered from:
//!
//! - the handler forks;
//! - the child kills the faulting process, prints a one-line crash notice to
//!   stderr and execs the original executable without arguments;
//! - the faulting process lets the child ptrace it, waits for it and exits
//!   with a failure status (in practice it is usually killed first).
//!
//! Handlers are installed with `SA_RESETHAND | SA_NODEFER | SA_ONSTACK`: the
//! default disposition is back in place as soon as the handler runs, so a
//! fault inside the handler ends the process instead of looping, and the
//! trapped signal is not left blocked in the respawned image.
//!
//! Everything the handler touches is set up once by [`install`] and never
//! mutated afterwards. The handler itself only calls async-signal-safe
//! functions and never allocates.

use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult, Pid};
use once_cell::sync::OnceCell;
use std::ffi::{CStr, CString, OsStr};
use std::io;
use std::os::raw::{c_int, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info, warn};

/// Signals that trigger a respawn
pub const TRAPPED_SIGNALS: [Signal; 5] = [
    Signal::SIGILL,
    Signal::SIGABRT,
    Signal::SIGFPE,
    Signal::SIGSEGV,
    Signal::SIGBUS,
];

/// Lower bound for the alternate stack; `SIGSTKSZ` wins if it is larger
const MIN_SIGNAL_STACK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CrashGuardError {
    #[error("could not allocate space for the alternative signal stack: {0}")]
    StackAllocation(#[source] io::Error),

    #[error("failed to set the alternative signal stack: {0}")]
    StackRegistration(#[source] io::Error),

    #[error("crash guard is already installed")]
    AlreadyInstalled,

    #[error("executable path {0:?} is not usable for respawning")]
    InvalidExecutable(PathBuf),
}

/// Who to kill and what to exec when a trap fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    executable: CString,
    pid: Pid,
}

impl ProcessIdentity {
    /// Identity of the running process
    pub fn capture() -> Result<Self, CrashGuardError> {
        let executable = std::env::current_exe()
            .map_err(|_| CrashGuardError::InvalidExecutable(PathBuf::new()))?;
        Self::new(executable, unistd::getpid())
    }

    /// Build an identity from an absolute executable path
    pub fn new(executable: impl Into<PathBuf>, pid: Pid) -> Result<Self, CrashGuardError> {
        let executable = executable.into();
        if !executable.is_absolute() {
            return Err(CrashGuardError::InvalidExecutable(executable));
        }
        let executable = CString::new(executable.as_os_str().as_bytes())
            .map_err(|_| CrashGuardError::InvalidExecutable(executable.clone()))?;
        Ok(Self { executable, pid })
    }

    pub fn executable(&self) -> &CStr {
        &self.executable
    }

    pub fn executable_path(&self) -> &Path {
        Path::new(OsStr::from_bytes(self.executable.as_bytes()))
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }
}

/// Where the guard is in its lifecycle
///
/// `TrapTriggered` and `Respawning` are entered asynchronously from the
/// signal handler; the respawned child starts over at `Uninstalled`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Uninstalled = 0,
    Armed = 1,
    TrapTriggered = 2,
    Respawning = 3,
}

static STATE: AtomicU8 = AtomicU8::new(GuardState::Uninstalled as u8);

/// Current guard state
pub fn state() -> GuardState {
    match STATE.load(Ordering::SeqCst) {
        1 => GuardState::Armed,
        2 => GuardState::TrapTriggered,
        3 => GuardState::Respawning,
        _ => GuardState::Uninstalled,
    }
}

fn set_state(state: GuardState) {
    STATE.store(state as u8, Ordering::SeqCst);
}

/// Anonymous mapping used as the signal handler's stack
///
/// Once registered it is never unmapped: the kernel may switch to it at any
/// moment until the process exits.
#[derive(Debug)]
pub struct SignalStack {
    base: NonNull<c_void>,
    size: usize,
}

// The mapping is only ever touched by the kernel and the signal handler
unsafe impl Send for SignalStack {}
unsafe impl Sync for SignalStack {}

impl SignalStack {
    /// Size of the stack that [`install`] allocates
    pub fn size() -> usize {
        libc::SIGSTKSZ.max(MIN_SIGNAL_STACK_SIZE)
    }

    fn allocate() -> Result<Self, CrashGuardError> {
        let size = Self::size();
        // SAFETY: a fresh private anonymous mapping; MAP_FAILED is checked below
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(CrashGuardError::StackAllocation(io::Error::last_os_error()));
        }
        let base = NonNull::new(base).ok_or_else(|| {
            CrashGuardError::StackAllocation(io::Error::from(io::ErrorKind::OutOfMemory))
        })?;
        Ok(Self { base, size })
    }

    fn register(&self) -> Result<(), CrashGuardError> {
        let stack = libc::stack_t {
            ss_sp: self.base.as_ptr(),
            ss_flags: 0,
            ss_size: self.size,
        };
        // SAFETY: `stack` describes a live mapping that outlives the process
        if unsafe { libc::sigaltstack(&stack, ptr::null_mut()) } == -1 {
            return Err(CrashGuardError::StackRegistration(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Unmap a stack that never got registered
    fn release(self) {
        // SAFETY: the mapping was created by `allocate` and is not in use
        unsafe { libc::munmap(self.base.as_ptr(), self.size) };
    }
}

/// Everything the handler reads, frozen at install time
#[derive(Debug)]
struct Armed {
    identity: ProcessIdentity,
    _stack: SignalStack,
}

static ARMED: OnceCell<Armed> = OnceCell::new();

/// Handle returned by a successful [`install`]
#[derive(Debug)]
pub struct CrashGuard {
    identity: &'static ProcessIdentity,
    armed_signals: Vec<Signal>,
}

impl CrashGuard {
    /// Identity the handler will kill and re-exec
    pub fn identity(&self) -> &'static ProcessIdentity {
        self.identity
    }

    /// Signals whose handler was installed successfully
    pub fn armed_signals(&self) -> &[Signal] {
        &self.armed_signals
    }
}

/// Identity used for respawning, if the guard is installed
pub fn respawn_identity() -> Option<&'static ProcessIdentity> {
    ARMED.get().map(|armed| &armed.identity)
}

/// Arm the guard for the rest of the process lifetime
///
/// Stack failures are returned and leave the process unprotected. A signal
/// whose handler cannot be installed is only logged; the others stay armed.
pub fn install(identity: ProcessIdentity) -> Result<CrashGuard, CrashGuardError> {
    if ARMED.get().is_some() {
        return Err(CrashGuardError::AlreadyInstalled);
    }

    let stack = SignalStack::allocate()?;
    if let Err(err) = stack.register() {
        stack.release();
        return Err(err);
    }
    debug!("Alternative signal stack of {} bytes registered", stack.size);

    if let Err(armed) = ARMED.set(Armed {
        identity,
        _stack: stack,
    }) {
        // Registered with the kernel already, so it has to stay mapped
        std::mem::forget(armed);
        return Err(CrashGuardError::AlreadyInstalled);
    }
    let identity = respawn_identity().ok_or(CrashGuardError::AlreadyInstalled)?;

    let failed = arm_signals(trap_handler);
    for (signal, err) in &failed {
        warn!("Failed to install signal handler for signal \"{signal}\": {err}");
    }
    let armed_signals: Vec<Signal> = TRAPPED_SIGNALS
        .iter()
        .copied()
        .filter(|signal| !failed.iter().any(|(failed, _)| failed == signal))
        .collect();

    set_state(GuardState::Armed);
    info!(
        "Crash guard armed for {:?}: respawning {} (pid {})",
        armed_signals,
        identity.executable_path().display(),
        identity.pid()
    );

    Ok(CrashGuard {
        identity,
        armed_signals,
    })
}

/// Point every trapped signal at `handler`, returning the ones that failed
fn arm_signals(handler: extern "C" fn(c_int)) -> Vec<(Signal, Errno)> {
    let action = SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::SA_RESETHAND | SaFlags::SA_NODEFER | SaFlags::SA_ONSTACK,
        SigSet::empty(),
    );
    TRAPPED_SIGNALS
        .iter()
        .filter_map(|&signal| {
            // SAFETY: the handlers passed here only use async-signal-safe calls
            unsafe { signal::sigaction(signal, &action) }
                .err()
                .map(|err| (signal, err))
        })
        .collect()
}

extern "C" fn trap_handler(signal: c_int) {
    set_state(GuardState::TrapTriggered);
    let Some(armed) = ARMED.get() else {
        return fall_through(signal);
    };

    // SAFETY: both branches below stick to async-signal-safe calls
    match unsafe { unistd::fork() } {
        Err(_) => fall_through(signal),
        Ok(ForkResult::Child) => respawn(&armed.identity, signal),
        Ok(ForkResult::Parent { child }) => {
            set_state(GuardState::Respawning);
            allow_tracing_by(child);
            let _ = waitpid(child, None);
            // SAFETY: _exit skips atexit handlers and unwinding
            unsafe { libc::_exit(libc::EXIT_FAILURE) }
        }
    }
}

/// Terminate through the default disposition restored by `SA_RESETHAND`
///
/// Returning alone only works for faults, which re-trigger on the same
/// instruction; a signal sent with `kill` or `raise` would be consumed.
fn fall_through(signal: c_int) {
    // SAFETY: raise is async-signal-safe
    unsafe { libc::raise(signal) };
}

/// Child side of a trap: replace the crashed process
fn respawn(identity: &ProcessIdentity, signal: c_int) -> ! {
    set_state(GuardState::Uninstalled);
    let _ = signal::kill(identity.pid, Signal::SIGKILL);
    write_crash_notice(libc::STDERR_FILENO, identity, signal);

    let argv: [*const libc::c_char; 2] = [identity.executable.as_ptr(), ptr::null()];
    // SAFETY: argv is NULL terminated and both strings live in ARMED
    unsafe {
        libc::execv(identity.executable.as_ptr(), argv.as_ptr());
        libc::_exit(libc::EXIT_FAILURE)
    }
}

#[cfg(target_os = "linux")]
fn allow_tracing_by(child: Pid) {
    // SAFETY: plain prctl call, failure is harmless
    unsafe {
        libc::prctl(
            libc::PR_SET_PTRACER,
            child.as_raw() as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn allow_tracing_by(_child: Pid) {}

/// `crashed (PID <pid> SIG <signal>): respawn <executable>`
fn write_crash_notice(fd: c_int, identity: &ProcessIdentity, signal: c_int) {
    let mut pid_buf = [0u8; 20];
    let mut signal_buf = [0u8; 20];
    let pid = format_decimal(identity.pid.as_raw().unsigned_abs() as u64, &mut pid_buf);
    let signal = format_decimal(signal.unsigned_abs() as u64, &mut signal_buf);

    let parts: [&[u8]; 7] = [
        b"crashed (PID ",
        pid,
        b" SIG ",
        signal,
        b"): respawn ",
        identity.executable.as_bytes(),
        b"\n",
    ];
    for part in parts {
        write_raw(fd, part);
    }
}

/// Render `value` into the tail of `buf` without allocating
fn format_decimal(mut value: u64, buf: &mut [u8; 20]) -> &[u8] {
    let mut start = buf.len();
    loop {
        start -= 1;
        buf[start] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    &buf[start..]
}

fn write_raw(fd: c_int, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        // SAFETY: bytes is a valid buffer of the given length
        let written = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        if written < 0 {
            if Errno::last() == Errno::EINTR {
                continue;
            }
            return;
        }
        if written == 0 {
            return;
        }
        bytes = &bytes[written as usize..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::WaitStatus;
    use std::fs::File;
    use std::io::Read;
    use std::os::fd::AsRawFd;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn identity_is_the_absolute_current_executable() {
        let identity = ProcessIdentity::capture().unwrap();
        assert!(identity.executable_path().is_absolute());
        assert_eq!(
            identity.executable_path(),
            std::env::current_exe().unwrap().as_path()
        );
        assert_eq!(identity.pid(), unistd::getpid());
        assert_eq!(
            identity.executable().to_bytes(),
            identity.executable_path().as_os_str().as_bytes()
        );
    }

    #[test]
    fn relative_executable_is_rejected() {
        let err = ProcessIdentity::new("grefsen", Pid::from_raw(1)).unwrap_err();
        assert!(matches!(err, CrashGuardError::InvalidExecutable(_)));
    }

    #[test]
    fn guard_starts_uninstalled() {
        assert_eq!(state(), GuardState::Uninstalled);
        assert!(respawn_identity().is_none());
    }

    #[test]
    fn signal_stack_is_at_least_sigstksz() {
        assert!(SignalStack::size() >= libc::SIGSTKSZ);
    }

    #[test]
    fn decimal_formatting() {
        let mut buf = [0u8; 20];
        assert_eq!(format_decimal(0, &mut buf), b"0");
        assert_eq!(format_decimal(11, &mut buf), b"11");
        assert_eq!(format_decimal(4_194_304, &mut buf), b"4194304");
        assert_eq!(format_decimal(u64::MAX, &mut buf), b"18446744073709551615");
    }

    #[test]
    fn crash_notice_format() {
        let identity = ProcessIdentity::new("/usr/bin/grefsen", Pid::from_raw(4242)).unwrap();
        let (read_end, write_end) = unistd::pipe().unwrap();
        write_crash_notice(write_end.as_raw_fd(), &identity, libc::SIGSEGV);
        drop(write_end);

        let mut notice = String::new();
        File::from(read_end).read_to_string(&mut notice).unwrap();
        assert_eq!(
            notice,
            format!("crashed (PID 4242 SIG {}): respawn /usr/bin/grefsen\n", libc::SIGSEGV)
        );
    }

    static MARKER_FD: AtomicI32 = AtomicI32::new(-1);

    /// Handler that faults again while handling
    extern "C" fn faulting_handler(signal: c_int) {
        write_raw(MARKER_FD.load(Ordering::SeqCst), b"x");
        // SAFETY: raise is async-signal-safe
        unsafe { libc::raise(signal) };
        // Only reached if the second fault was handled too
        unsafe { libc::_exit(42) };
    }

    #[test]
    fn sent_signal_terminates_when_no_respawn_happens() {
        // SAFETY: the child only raises and exits
        match unsafe { unistd::fork() }.unwrap() {
            ForkResult::Child => {
                // Nothing is armed in the test process, so the handler cannot respawn
                arm_signals(trap_handler);
                unsafe {
                    libc::raise(libc::SIGFPE);
                    libc::_exit(0);
                }
            }
            ForkResult::Parent { child } => {
                let status = waitpid(child, None).unwrap();
                assert!(
                    matches!(status, WaitStatus::Signaled(pid, Signal::SIGFPE, _) if pid == child),
                    "unexpected status {status:?}"
                );
            }
        }
    }

    #[test]
    fn fault_inside_handler_terminates_once() {
        let (read_end, write_end) = unistd::pipe().unwrap();

        // SAFETY: the child only calls async-signal-safe functions
        match unsafe { unistd::fork() }.unwrap() {
            ForkResult::Child => {
                MARKER_FD.store(write_end.as_raw_fd(), Ordering::SeqCst);
                arm_signals(faulting_handler);
                unsafe {
                    libc::raise(libc::SIGSEGV);
                    libc::_exit(0);
                }
            }
            ForkResult::Parent { child } => {
                drop(write_end);
                let status = waitpid(child, None).unwrap();
                assert!(
                    matches!(status, WaitStatus::Signaled(pid, Signal::SIGSEGV, _) if pid == child),
                    "unexpected status {status:?}"
                );

                let mut entries = String::new();
                File::from(read_end).read_to_string(&mut entries).unwrap();
                assert_eq!(entries, "x");
            }
        }
    }
}
