//! Signal plane: flags, handlers, and fleet-wide shutdown
//!
//! Handlers are kept async-signal-safe: they touch process-wide atomics and
//! fields of the shared mapping, format into stack buffers with bounded
//! manual formatters, and call only `write(2)`, `kill(2)`,
//! `gettimeofday(2)`, `sysinfo(2)` and `_exit(2)`. No allocation, no locks,
//! no stdio.
//!
//! The shared plane is registered here as plain data (raw base pointer plus
//! slot count) before handlers are installed and cleared after the fleet is
//! reaped; handlers see either a fully valid region or none at all.

use std::mem;
use std::ptr;
use std::sync::atomic::{
    AtomicBool, AtomicI32, AtomicI64, AtomicPtr, AtomicU32, AtomicUsize, Ordering,
};

use crate::error::{Error, Result};
use crate::exit::ExitStatus;
use crate::shared::{SharedHeader, StatsRecord};

/// Global continue flag polled by workloads; cleared on shutdown
static CONTINUE_FLAG: AtomicBool = AtomicBool::new(true);

/// Parent wait-loop flag; cleared when the wait should stop blocking
static WAIT_FLAG: AtomicBool = AtomicBool::new(true);

/// Pid of the orchestrating parent; handlers branch on it
static MAIN_PID: AtomicI32 = AtomicI32::new(0);

/// Terminating signal observed, 0 when none
static TERMINATE_SIGNUM: AtomicI32 = AtomicI32::new(0);

/// Shutdown broadcast attempts; past five the signal escalates to KILL
static KILL_COUNT: AtomicU32 = AtomicU32::new(0);

static HEADER: AtomicPtr<SharedHeader> = AtomicPtr::new(ptr::null_mut());
static STATS: AtomicPtr<StatsRecord> = AtomicPtr::new(ptr::null_mut());
static STATS_LEN: AtomicUsize = AtomicUsize::new(0);

/// The child's own stats slot, for alarm attribution
static OWN_SLOT: AtomicPtr<StatsRecord> = AtomicPtr::new(ptr::null_mut());

static ALRM_TRIGGERED: AtomicBool = AtomicBool::new(false);
static ALRM_PID: AtomicI32 = AtomicI32::new(0);
static ALRM_UID: AtomicU32 = AtomicU32::new(0);
static ALRM_WHEN_US: AtomicI64 = AtomicI64::new(0);

/// Check the global continue flag
#[inline]
pub fn continue_flag() -> bool {
    CONTINUE_FLAG.load(Ordering::Relaxed)
}

/// Set or clear the global continue flag
pub fn set_continue(on: bool) {
    CONTINUE_FLAG.store(on, Ordering::Relaxed);
}

/// Check the parent wait-loop flag
pub fn wait_flag() -> bool {
    WAIT_FLAG.load(Ordering::Relaxed)
}

/// Set or clear the parent wait-loop flag
pub fn set_wait_flag(on: bool) {
    WAIT_FLAG.store(on, Ordering::Relaxed);
}

/// Record the orchestrating parent's pid; must happen before handlers are
/// installed
pub fn set_main_pid(pid: libc::pid_t) {
    MAIN_PID.store(pid, Ordering::Relaxed);
}

/// The terminating signal caught by this process, if any
pub fn terminate_signum() -> Option<i32> {
    match TERMINATE_SIGNUM.load(Ordering::Relaxed) {
        0 => None,
        sig => Some(sig),
    }
}

/// Register the shared plane for handler access
pub fn register_shared(header: *mut SharedHeader, stats: *mut StatsRecord, len: usize) {
    HEADER.store(header, Ordering::SeqCst);
    STATS.store(stats, Ordering::SeqCst);
    STATS_LEN.store(len, Ordering::SeqCst);
}

/// Detach the shared plane from the handlers before it is unmapped
pub fn clear_shared() {
    STATS_LEN.store(0, Ordering::SeqCst);
    STATS.store(ptr::null_mut(), Ordering::SeqCst);
    HEADER.store(ptr::null_mut(), Ordering::SeqCst);
}

/// Register the child's own stats slot for alarm attribution
pub fn register_own_slot(slot: *mut StatsRecord) {
    OWN_SLOT.store(slot, Ordering::SeqCst);
}

/// Details of a user-sent SIGALRM, for diagnostics
#[derive(Debug, Clone, Copy)]
pub struct UserAlarm {
    /// Sender pid
    pub pid: libc::pid_t,
    /// Sender uid
    pub uid: libc::uid_t,
    /// When it arrived, microseconds since the epoch
    pub when_us: i64,
}

/// The first user-originated SIGALRM observed, if any
pub fn user_alarm() -> Option<UserAlarm> {
    if !ALRM_TRIGGERED.load(Ordering::Relaxed) {
        return None;
    }
    Some(UserAlarm {
        pid: ALRM_PID.load(Ordering::Relaxed),
        uid: ALRM_UID.load(Ordering::Relaxed),
        when_us: ALRM_WHEN_US.load(Ordering::Relaxed),
    })
}

/// Pick the shutdown signal, escalating to KILL after more than five
/// forced broadcasts
fn shutdown_signal_with(count: &AtomicU32, force_sigkill: bool) -> libc::c_int {
    if force_sigkill {
        let n = count.fetch_add(1, Ordering::Relaxed) + 1;
        if n > 5 {
            return libc::SIGKILL;
        }
    }
    libc::SIGALRM
}

/// Send a shutdown signal to every live, not-yet-signalled worker.
///
/// Safe to call from a signal handler: only atomics and `kill(2)`.
pub fn broadcast_shutdown(force_sigkill: bool) {
    let signum = shutdown_signal_with(&KILL_COUNT, force_sigkill);
    let stats = STATS.load(Ordering::SeqCst);
    let len = STATS_LEN.load(Ordering::SeqCst);
    if stats.is_null() || len == 0 {
        return;
    }
    for idx in 0..len {
        let slot = unsafe { &*stats.add(idx) };
        let pid = slot.pid.load(Ordering::Relaxed);
        if pid > 0 && !slot.signalled.load(Ordering::Relaxed) {
            unsafe {
                libc::kill(pid, signum);
            }
            slot.signalled.store(true, Ordering::Relaxed);
        }
    }
}

// ---------------------------------------------------------------------------
// Bounded formatting helpers usable inside handlers
// ---------------------------------------------------------------------------

fn push_bytes(buf: &mut [u8], pos: &mut usize, bytes: &[u8]) {
    for &b in bytes {
        if *pos >= buf.len() {
            return;
        }
        buf[*pos] = b;
        *pos += 1;
    }
}

fn push_u64(buf: &mut [u8], pos: &mut usize, mut value: u64) {
    let mut digits = [0u8; 20];
    let mut n = 0;
    loop {
        digits[n] = b'0' + (value % 10) as u8;
        value /= 10;
        n += 1;
        if value == 0 {
            break;
        }
    }
    while n > 0 {
        n -= 1;
        push_bytes(buf, pos, &[digits[n]]);
    }
}

fn push_fixed2(buf: &mut [u8], pos: &mut usize, value: f64) {
    let value = if value.is_finite() && value >= 0.0 {
        value
    } else {
        0.0
    };
    let scaled = (value * 100.0) as u64;
    push_u64(buf, pos, scaled / 100);
    push_bytes(buf, pos, b".");
    let frac = scaled % 100;
    push_bytes(buf, pos, &[b'0' + (frac / 10) as u8, b'0' + (frac % 10) as u8]);
}

fn signal_name(sig: libc::c_int) -> &'static [u8] {
    match sig {
        libc::SIGILL => b"SIGILL",
        libc::SIGSEGV => b"SIGSEGV",
        libc::SIGFPE => b"SIGFPE",
        libc::SIGBUS => b"SIGBUS",
        libc::SIGABRT => b"SIGABRT",
        libc::SIGQUIT => b"SIGQUIT",
        libc::SIGTERM => b"SIGTERM",
        libc::SIGXCPU => b"SIGXCPU",
        libc::SIGXFSZ => b"SIGXFSZ",
        libc::SIGVTALRM => b"SIGVTALRM",
        libc::SIGHUP => b"SIGHUP",
        libc::SIGINT => b"SIGINT",
        libc::SIGALRM => b"SIGALRM",
        _ => b"SIG?",
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// INT / HUP: note the interrupt and ask the whole fleet to stop
extern "C" fn on_interrupt(_sig: libc::c_int) {
    let header = HEADER.load(Ordering::SeqCst);
    if !header.is_null() {
        unsafe { &*header }
            .caught_sigint
            .store(true, Ordering::Relaxed);
    }
    set_continue(false);
    set_wait_flag(false);
    broadcast_shutdown(true);
}

/// SIGALRM with SA_SIGINFO: deadline expiry, or a user poke we attribute
extern "C" fn on_alarm(
    signum: libc::c_int,
    info: *mut libc::siginfo_t,
    _ucontext: *mut libc::c_void,
) {
    let _ = signum;
    let header_ptr = HEADER.load(Ordering::SeqCst);

    #[cfg(target_os = "linux")]
    if !header_ptr.is_null() && !info.is_null() {
        let header = unsafe { &*header_ptr };
        let info = unsafe { &*info };
        if !header.caught_sigint.load(Ordering::Relaxed)
            && info.si_code == libc::SI_USER
            && !ALRM_TRIGGERED.load(Ordering::Relaxed)
        {
            let mut tv = libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            };
            unsafe {
                libc::gettimeofday(&mut tv, ptr::null_mut());
                ALRM_PID.store(info.si_pid(), Ordering::Relaxed);
                ALRM_UID.store(info.si_uid(), Ordering::Relaxed);
            }
            ALRM_WHEN_US.store(
                tv.tv_sec as i64 * 1_000_000 + tv.tv_usec as i64,
                Ordering::Relaxed,
            );
            ALRM_TRIGGERED.store(true, Ordering::Relaxed);
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = info;

    if !header_ptr.is_null() {
        let header = unsafe { &*header_ptr };
        header.caught_sigint.store(true, Ordering::Relaxed);
        let own = OWN_SLOT.load(Ordering::SeqCst);
        if !own.is_null() {
            let slot = unsafe { &*own };
            if !slot.sigalarmed.swap(true, Ordering::Relaxed) {
                header.instance_count.alarmed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    if unsafe { libc::getpid() } == MAIN_PID.load(Ordering::Relaxed) {
        set_wait_flag(false);
        broadcast_shutdown(false);
    } else {
        set_continue(false);
    }
}

/// USR2: one-line system snapshot to stdout
extern "C" fn on_stats(_sig: libc::c_int) {
    let mut buf = [0u8; 128];
    let mut pos = 0usize;

    #[cfg(target_os = "linux")]
    {
        // Fixed-point shift of sysinfo load averages
        const LOAD_SHIFT: u32 = 16;
        let mut info: libc::sysinfo = unsafe { mem::zeroed() };
        if unsafe { libc::sysinfo(&mut info) } == 0 {
            let unit = info.mem_unit.max(1) as u64;
            let scale = (1u64 << LOAD_SHIFT) as f64;
            push_bytes(&mut buf, &mut pos, b"Load Avg: ");
            push_fixed2(&mut buf, &mut pos, info.loads[0] as f64 / scale);
            push_bytes(&mut buf, &mut pos, b" ");
            push_fixed2(&mut buf, &mut pos, info.loads[1] as f64 / scale);
            push_bytes(&mut buf, &mut pos, b" ");
            push_fixed2(&mut buf, &mut pos, info.loads[2] as f64 / scale);
            push_bytes(&mut buf, &mut pos, b", MemFree: ");
            push_u64(&mut buf, &mut pos, info.freeram as u64 * unit / (1024 * 1024));
            push_bytes(&mut buf, &mut pos, b" MB, MemTotal: ");
            push_u64(
                &mut buf,
                &mut pos,
                info.totalram as u64 * unit / (1024 * 1024),
            );
            push_bytes(&mut buf, &mut pos, b" MB\n");
        }
    }
    #[cfg(not(target_os = "linux"))]
    push_bytes(&mut buf, &mut pos, b"stats snapshot unavailable\n");

    unsafe {
        libc::write(libc::STDOUT_FILENO, buf.as_ptr().cast(), pos);
    }
}

/// Terminating signals: report, stop the fleet, and for the critical
/// faults die immediately
extern "C" fn on_terminate(sig: libc::c_int) {
    TERMINATE_SIGNUM.store(sig, Ordering::Relaxed);
    set_continue(false);

    let fatal = matches!(
        sig,
        libc::SIGILL | libc::SIGSEGV | libc::SIGFPE | libc::SIGBUS | libc::SIGABRT
    );
    if fatal {
        let mut buf = [0u8; 128];
        let mut pos = 0usize;
        push_bytes(&mut buf, &mut pos, b"bogobench: info: [");
        push_u64(&mut buf, &mut pos, unsafe { libc::getpid() } as u64);
        push_bytes(
            &mut buf,
            &mut pos,
            b"] terminated with unexpected signal ",
        );
        push_bytes(&mut buf, &mut pos, signal_name(sig));
        push_bytes(&mut buf, &mut pos, b"\n");
        unsafe {
            libc::write(libc::STDERR_FILENO, buf.as_ptr().cast(), pos);
        }
        broadcast_shutdown(true);
        unsafe { libc::_exit(ExitStatus::Signaled.code()) };
    }
    broadcast_shutdown(true);
}

// ---------------------------------------------------------------------------
// Installation
// ---------------------------------------------------------------------------

fn install(sig: libc::c_int, action: libc::sighandler_t, flags: libc::c_int) -> Result<()> {
    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        sa.sa_sigaction = action;
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_flags = flags;
        if libc::sigaction(sig, &sa, ptr::null_mut()) < 0 {
            return Err(Error::Config(format!(
                "sigaction for signal {sig} failed: {}",
                std::io::Error::last_os_error()
            )));
        }
    }
    Ok(())
}

/// Install INT/HUP/ALRM (and for the parent, USR2) handlers.
///
/// The same set serves parent and child; the alarm handler branches on the
/// recorded main pid.
pub fn install_run_handlers(child: bool) -> Result<()> {
    install(
        libc::SIGINT,
        on_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t,
        0,
    )?;
    install(
        libc::SIGHUP,
        on_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t,
        0,
    )?;
    if !child {
        install(
            libc::SIGUSR2,
            on_stats as extern "C" fn(libc::c_int) as libc::sighandler_t,
            0,
        )?;
    }
    install(
        libc::SIGALRM,
        on_alarm as extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void)
            as libc::sighandler_t,
        libc::SA_SIGINFO,
    )?;
    Ok(())
}

/// Terminating signals that trigger cleanup rather than an abrupt death
const TERMINATE_SIGNALS: &[libc::c_int] = &[
    libc::SIGHUP,
    libc::SIGINT,
    libc::SIGILL,
    libc::SIGQUIT,
    libc::SIGABRT,
    libc::SIGFPE,
    libc::SIGBUS,
    libc::SIGSEGV,
    libc::SIGTERM,
    libc::SIGXCPU,
    libc::SIGXFSZ,
    #[cfg(target_os = "linux")]
    libc::SIGSTKFLT,
    #[cfg(target_os = "linux")]
    libc::SIGPWR,
    libc::SIGVTALRM,
];

/// Install the terminate handler across the terminating signal set
pub fn install_terminate_handlers() -> Result<()> {
    for &sig in TERMINATE_SIGNALS {
        install(
            sig,
            on_terminate as extern "C" fn(libc::c_int) as libc::sighandler_t,
            0,
        )?;
    }
    Ok(())
}

/// Signals the harness ignores outright
const IGNORE_SIGNALS: &[libc::c_int] = &[
    libc::SIGUSR1,
    libc::SIGUSR2,
    libc::SIGTTOU,
    libc::SIGTTIN,
    libc::SIGWINCH,
];

/// Ignore the signals that should never disturb a run
pub fn install_ignore_handlers() {
    for &sig in IGNORE_SIGNALS {
        let _ = install(sig, libc::SIG_IGN, 0);
    }
}

/// Block every signal; used by a child on its way out so late alarms
/// cannot re-enter the exit path
pub fn block_all_signals() {
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigfillset(&mut set);
        libc::sigprocmask(libc::SIG_SETMASK, &set, ptr::null_mut());
    }
}

/// Arm (or with 0, cancel) the process alarm clock
pub fn set_alarm(secs: u64) {
    unsafe {
        libc::alarm(secs.min(u32::MAX as u64) as libc::c_uint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continue_and_wait_flags() {
        set_continue(true);
        assert!(continue_flag());
        set_continue(false);
        assert!(!continue_flag());
        set_continue(true);

        set_wait_flag(true);
        assert!(wait_flag());
        set_wait_flag(false);
        assert!(!wait_flag());
        set_wait_flag(true);
    }

    #[test]
    fn test_shutdown_signal_escalates_after_five() {
        let count = AtomicU32::new(0);
        for _ in 0..5 {
            assert_eq!(shutdown_signal_with(&count, true), libc::SIGALRM);
        }
        assert_eq!(shutdown_signal_with(&count, true), libc::SIGKILL);
        assert_eq!(shutdown_signal_with(&count, true), libc::SIGKILL);
    }

    #[test]
    fn test_shutdown_signal_unforced_never_escalates() {
        let count = AtomicU32::new(0);
        for _ in 0..32 {
            assert_eq!(shutdown_signal_with(&count, false), libc::SIGALRM);
        }
    }

    #[test]
    fn test_push_helpers_bounded() {
        let mut buf = [0u8; 8];
        let mut pos = 0;
        push_bytes(&mut buf, &mut pos, b"0123456789abc");
        assert_eq!(pos, 8);
        assert_eq!(&buf, b"01234567");

        let mut buf = [0u8; 32];
        let mut pos = 0;
        push_u64(&mut buf, &mut pos, 0);
        push_bytes(&mut buf, &mut pos, b" ");
        push_u64(&mut buf, &mut pos, 90210);
        assert_eq!(&buf[..pos], b"0 90210");
    }

    #[test]
    fn test_push_fixed2() {
        let mut buf = [0u8; 32];
        let mut pos = 0;
        push_fixed2(&mut buf, &mut pos, 1.25);
        push_bytes(&mut buf, &mut pos, b" ");
        push_fixed2(&mut buf, &mut pos, 0.07);
        push_bytes(&mut buf, &mut pos, b" ");
        push_fixed2(&mut buf, &mut pos, f64::NAN);
        assert_eq!(&buf[..pos], b"1.25 0.07 0.00");
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(libc::SIGSEGV), b"SIGSEGV");
        assert_eq!(signal_name(libc::SIGTERM), b"SIGTERM");
        assert_eq!(signal_name(9999), b"SIG?");
    }
}
