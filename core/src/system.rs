//! Thin wrappers over the system interfaces the harness needs
//!
//! Everything here is best-effort: Linux-only facilities degrade to no-ops
//! or `None` elsewhere so the orchestrator itself stays portable across
//! Unix-likes.

use std::mem::MaybeUninit;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

static TEMP_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Set the directory workloads use for temporary files; first call wins
pub fn set_temp_path(path: &Path) -> std::io::Result<()> {
    let meta = std::fs::metadata(path)?;
    if !meta.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a directory", path.display()),
        ));
    }
    let _ = TEMP_PATH.set(path.to_path_buf());
    Ok(())
}

/// The configured temporary directory; defaults to the current working
/// directory
pub fn temp_path() -> PathBuf {
    TEMP_PATH
        .get()
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Per-instance scratch directory name for a workload
pub fn instance_temp_dir(name: &str, pid: libc::pid_t, instance: u32) -> PathBuf {
    temp_path().join(format!("{}-{name}-{pid}-{instance}", crate::APP_NAME))
}

/// System page size
pub fn page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 {
        sz as usize
    } else {
        4096
    }
}

/// Number of configured processors; at least 1
pub fn processors_configured() -> i32 {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    if n > 0 {
        n as i32
    } else {
        1
    }
}

/// Number of online processors; at least 1
pub fn processors_online() -> i32 {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n > 0 {
        n as i32
    } else {
        1
    }
}

/// Clock ticks per second (jiffies)
pub fn ticks_per_second() -> i32 {
    let n = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if n > 0 {
        n as i32
    } else {
        100
    }
}

/// Resolve an instance count: 0 means configured CPUs, negative means
/// online CPUs
pub fn apply_count_convention(count: i32) -> i32 {
    if count == 0 {
        processors_configured()
    } else if count < 0 {
        processors_online()
    } else {
        count
    }
}

/// Wall-clock time in seconds since the epoch
pub fn time_now() -> f64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(_) => 0.0,
    }
}

/// 1/5/15 minute load averages
pub fn load_avg() -> Option<(f64, f64, f64)> {
    let mut loads = [0f64; 3];
    let n = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
    if n == 3 {
        Some((loads[0], loads[1], loads[2]))
    } else {
        None
    }
}

/// Total and free memory in bytes
pub fn mem_info() -> Option<(u64, u64)> {
    #[cfg(target_os = "linux")]
    {
        let mut info: MaybeUninit<libc::sysinfo> = MaybeUninit::uninit();
        let rc = unsafe { libc::sysinfo(info.as_mut_ptr()) };
        if rc == 0 {
            let info = unsafe { info.assume_init() };
            let unit = info.mem_unit.max(1) as u64;
            return Some((info.totalram as u64 * unit, info.freeram as u64 * unit));
        }
        None
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// User and system CPU time plus peak RSS (KB) of this process and its
/// waited-for children
pub fn rusage_self_and_children() -> Option<(f64, f64, i64)> {
    fn one(who: libc::c_int) -> Option<(f64, f64, i64)> {
        let mut usage: MaybeUninit<libc::rusage> = MaybeUninit::uninit();
        let rc = unsafe { libc::getrusage(who, usage.as_mut_ptr()) };
        if rc != 0 {
            return None;
        }
        let usage = unsafe { usage.assume_init() };
        let utime = usage.ru_utime.tv_sec as f64 + usage.ru_utime.tv_usec as f64 / 1e6;
        let stime = usage.ru_stime.tv_sec as f64 + usage.ru_stime.tv_usec as f64 / 1e6;
        Some((utime, stime, usage.ru_maxrss as i64))
    }

    let (su, ss, srss) = one(libc::RUSAGE_SELF)?;
    match one(libc::RUSAGE_CHILDREN) {
        Some((cu, cs, crss)) => Some((su + cu, ss + cs, srss.max(crss))),
        None => Some((su, ss, srss)),
    }
}

/// CPU time fallback via `times()`, scaled by ticks per second
pub fn times_fallback(ticks_per_sec: i32) -> Option<(f64, f64)> {
    if ticks_per_sec <= 0 {
        return None;
    }
    let mut buf: MaybeUninit<libc::tms> = MaybeUninit::uninit();
    let rc = unsafe { libc::times(buf.as_mut_ptr()) };
    if rc == -1 {
        return None;
    }
    let buf = unsafe { buf.assume_init() };
    let ticks = ticks_per_sec as f64;
    Some((
        (buf.tms_utime + buf.tms_cutime) as f64 / ticks,
        (buf.tms_stime + buf.tms_cstime) as f64 / ticks,
    ))
}

/// Accumulated CPU time of waited-for children, for the end-of-run summary
pub fn child_cpu_times(ticks_per_sec: i32) -> Option<(f64, f64)> {
    if ticks_per_sec <= 0 {
        return None;
    }
    let mut buf: MaybeUninit<libc::tms> = MaybeUninit::uninit();
    let rc = unsafe { libc::times(buf.as_mut_ptr()) };
    if rc == -1 {
        return None;
    }
    let buf = unsafe { buf.assume_init() };
    let ticks = ticks_per_sec as f64;
    Some((
        buf.tms_cutime as f64 / ticks,
        buf.tms_cstime as f64 / ticks,
    ))
}

/// Set the process name shown in ps/top (best effort)
pub fn set_proc_name(name: &str) {
    #[cfg(target_os = "linux")]
    {
        let mut buf = [0u8; 16];
        for (dst, src) in buf.iter_mut().take(15).zip(name.bytes()) {
            *dst = src;
        }
        unsafe {
            libc::prctl(libc::PR_SET_NAME, buf.as_ptr());
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = name;
    }
}

/// Control whether the process may dump core (best effort)
pub fn set_dumpable(dumpable: bool) {
    #[cfg(target_os = "linux")]
    unsafe {
        libc::prctl(libc::PR_SET_DUMPABLE, libc::c_ulong::from(dumpable));
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = dumpable;
    }
}

/// Request a SIGALRM when the parent dies, so orphans stop working
pub fn parent_died_alarm() {
    #[cfg(target_os = "linux")]
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGALRM as libc::c_ulong);
    }
}

/// Apply an I/O priority class and level to this process (best effort)
pub fn set_iopriority(class: Option<i32>, level: Option<i32>) {
    #[cfg(target_os = "linux")]
    {
        let class = match class {
            Some(c) if (1..=3).contains(&c) => c,
            _ => return,
        };
        let level = level.unwrap_or(0).clamp(0, 7);
        const IOPRIO_WHO_PROCESS: libc::c_int = 1;
        const IOPRIO_CLASS_SHIFT: i32 = 13;
        let prio = (class << IOPRIO_CLASS_SHIFT) | level;
        unsafe {
            libc::syscall(libc::SYS_ioprio_set, IOPRIO_WHO_PROCESS, 0, prio);
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (class, level);
    }
}

/// Raise the file descriptor soft limit to the hard limit (best effort)
pub fn raise_fd_limit() {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    unsafe {
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) == 0 {
            limit.rlim_cur = limit.rlim_max;
            libc::setrlimit(libc::RLIMIT_NOFILE, &limit);
        }
    }
}

/// The RLIMIT_NPROC ceiling, used to split process budgets across instances
pub fn nproc_limit() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        let rc = unsafe { libc::getrlimit(libc::RLIMIT_NPROC, &mut limit) };
        if rc == 0 {
            return Some(limit.rlim_cur);
        }
        None
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// The CPU this process last ran on, or -1 when unknown
pub fn current_cpu() -> i32 {
    #[cfg(target_os = "linux")]
    {
        unsafe { libc::sched_getcpu() }
    }
    #[cfg(not(target_os = "linux"))]
    {
        -1
    }
}

/// Scan the kernel ring buffer for an OOM kill record naming `pid`.
///
/// Needs syslog read permission; any failure reports false and the caller
/// falls back to the SIGKILL heuristic.
pub fn process_oomed(pid: libc::pid_t) -> bool {
    #[cfg(target_os = "linux")]
    {
        const SYSLOG_ACTION_READ_ALL: libc::c_int = 3;
        let mut buf = vec![0u8; 64 * 1024];
        let n = unsafe {
            libc::klogctl(
                SYSLOG_ACTION_READ_ALL,
                buf.as_mut_ptr().cast(),
                buf.len() as libc::c_int,
            )
        };
        if n <= 0 {
            return false;
        }
        let text = String::from_utf8_lossy(&buf[..n as usize]);
        let needle = format!("Killed process {pid}");
        text.contains(&needle)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        false
    }
}

/// uname fields used by the run-info block
#[derive(Debug, Clone)]
pub struct UnameInfo {
    /// Kernel name
    pub sysname: String,
    /// Host name
    pub nodename: String,
    /// Kernel release
    pub release: String,
    /// Kernel version string
    pub version: String,
    /// Hardware identifier
    pub machine: String,
}

/// System identification via `uname(2)`
pub fn uname_info() -> Option<UnameInfo> {
    let mut buf: MaybeUninit<libc::utsname> = MaybeUninit::uninit();
    let rc = unsafe { libc::uname(buf.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let buf = unsafe { buf.assume_init() };

    fn field(raw: &[libc::c_char]) -> String {
        let bytes: Vec<u8> = raw
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    Some(UnameInfo {
        sysname: field(&buf.sysname),
        nodename: field(&buf.nodename),
        release: field(&buf.release),
        version: field(&buf.version),
        machine: field(&buf.machine),
    })
}

/// Render a duration the way the run summary does: seconds under a minute,
/// otherwise days/hours/mins plus seconds
pub fn duration_to_str(secs: f64) -> String {
    if !secs.is_finite() || secs < 0.0 {
        return "0.00 secs".to_string();
    }
    let whole = secs as u64;
    let days = whole / 86_400;
    let hours = (whole % 86_400) / 3_600;
    let mins = (whole % 3_600) / 60;
    let rem_secs = secs - (whole - whole % 60) as f64;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{} day{}", days, if days == 1 { "" } else { "s" }));
    }
    if hours > 0 {
        parts.push(format!(
            "{} hour{}",
            hours,
            if hours == 1 { "" } else { "s" }
        ));
    }
    if mins > 0 {
        parts.push(format!("{} min{}", mins, if mins == 1 { "" } else { "s" }));
    }
    parts.push(format!("{rem_secs:.2} secs"));
    parts.join(", ")
}

/// Parse a duration argument: plain seconds, or a number with an
/// `s`/`m`/`h`/`d`/`y` suffix
pub fn parse_duration_secs(arg: &str) -> Result<u64, String> {
    let arg = arg.trim();
    if arg.is_empty() {
        return Err("empty duration".to_string());
    }
    let (num, multiplier) = match arg.chars().last().unwrap() {
        's' => (&arg[..arg.len() - 1], 1u64),
        'm' => (&arg[..arg.len() - 1], 60),
        'h' => (&arg[..arg.len() - 1], 3_600),
        'd' => (&arg[..arg.len() - 1], 86_400),
        'y' => (&arg[..arg.len() - 1], 31_556_926),
        _ => (arg, 1),
    };
    num.trim()
        .parse::<u64>()
        .map(|n| n.saturating_mul(multiplier))
        .map_err(|_| format!("invalid duration: '{arg}'"))
}

/// Sleep for a number of microseconds, ignoring interruption
pub fn usleep(us: u64) {
    if us == 0 {
        return;
    }
    std::thread::sleep(std::time::Duration::from_micros(us));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processor_counts_positive() {
        assert!(processors_configured() >= 1);
        assert!(processors_online() >= 1);
        assert!(ticks_per_second() > 0);
        assert!(page_size() >= 512);
    }

    #[test]
    fn test_count_convention() {
        assert_eq!(apply_count_convention(4), 4);
        assert_eq!(apply_count_convention(0), processors_configured());
        assert_eq!(apply_count_convention(-1), processors_online());
    }

    #[test]
    fn test_time_now_monotone_enough() {
        let a = time_now();
        let b = time_now();
        assert!(b >= a);
        assert!(a > 1_000_000_000.0);
    }

    #[test]
    fn test_duration_to_str() {
        assert_eq!(duration_to_str(5.5), "5.50 secs");
        assert_eq!(duration_to_str(65.0), "1 min, 5.00 secs");
        assert_eq!(duration_to_str(3_661.0), "1 hour, 1 min, 1.00 secs");
        assert_eq!(
            duration_to_str(90_000.0),
            "1 day, 1 hour, 0.00 secs"
        );
    }

    #[test]
    fn test_parse_duration_suffixes() {
        assert_eq!(parse_duration_secs("10"), Ok(10));
        assert_eq!(parse_duration_secs("10s"), Ok(10));
        assert_eq!(parse_duration_secs("2m"), Ok(120));
        assert_eq!(parse_duration_secs("1h"), Ok(3_600));
        assert_eq!(parse_duration_secs("1d"), Ok(86_400));
        assert!(parse_duration_secs("abc").is_err());
        assert!(parse_duration_secs("").is_err());
    }

    #[test]
    fn test_rusage_readable() {
        let usage = rusage_self_and_children();
        assert!(usage.is_some());
        let (utime, stime, maxrss) = usage.unwrap();
        assert!(utime >= 0.0);
        assert!(stime >= 0.0);
        assert!(maxrss >= 0);
    }

    #[test]
    fn test_uname_info() {
        let info = uname_info().unwrap();
        assert!(!info.sysname.is_empty());
        assert!(!info.machine.is_empty());
    }
}
