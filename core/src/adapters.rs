//! External collaborator adapters
//!
//! Thin in-process facades over the optional observability and tuning
//! collaborators (ftrace, klog, vmstat, smart, thrash, clocksource,
//! cpuidle, KSM, OOM scoring). Each is an on/off pair called at fixed
//! points around the fleet run and degrades to a best-effort no-op when
//! the facility is unavailable.

use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

static FTRACE_ENABLED: AtomicBool = AtomicBool::new(false);
static KLOG_MARK: AtomicU64 = AtomicU64::new(0);
static CLOCKSOURCE: Mutex<Option<String>> = Mutex::new(None);

const FTRACE_PID_FILE: &str = "/sys/kernel/debug/tracing/set_ftrace_pid";

/// Sum of serviced interrupts since boot, from /proc/stat; 0 when
/// unavailable
pub fn interrupt_count() -> u64 {
    #[cfg(target_os = "linux")]
    {
        match fs::read_to_string("/proc/stat") {
            Ok(text) => parse_intr_total(&text),
            Err(_) => 0,
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

fn parse_intr_total(stat: &str) -> u64 {
    for line in stat.lines() {
        if let Some(rest) = line.strip_prefix("intr ") {
            return rest
                .split_whitespace()
                .next()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
        }
    }
    0
}

/// Begin function tracing of the fleet, when the tracefs knob exists
pub fn ftrace_start(enabled: bool) {
    if !enabled {
        return;
    }
    if std::path::Path::new(FTRACE_PID_FILE).exists() {
        FTRACE_ENABLED.store(true, Ordering::Relaxed);
    } else {
        tracing::debug!("ftrace unavailable, tracing disabled");
    }
}

/// Register a freshly forked worker for function tracing
pub fn ftrace_add_pid(pid: libc::pid_t) {
    if !FTRACE_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let _ = fs::write(FTRACE_PID_FILE, format!("{pid}\n"));
}

/// Stop function tracing
pub fn ftrace_stop() {
    FTRACE_ENABLED.store(false, Ordering::Relaxed);
}

/// Mark the current kernel log position so the stop side only scans what
/// the run produced
pub fn klog_start() {
    KLOG_MARK.store(read_klog().map(|t| t.len() as u64).unwrap_or(0), Ordering::Relaxed);
}

/// Scan kernel messages emitted during the run for serious errors; any
/// oops or kernel bug clears `success`
pub fn klog_stop(success: &mut bool) {
    let Some(text) = read_klog() else {
        return;
    };
    let mark = KLOG_MARK.load(Ordering::Relaxed) as usize;
    let fresh = if mark <= text.len() {
        &text[mark..]
    } else {
        &text[..]
    };
    for line in fresh.lines() {
        if line.contains("Oops") || line.contains("BUG:") || line.contains("kernel panic") {
            tracing::error!(klog = line, "kernel error during run");
            *success = false;
        } else if line.contains("WARNING:") {
            tracing::warn!(klog = line, "kernel warning during run");
        }
    }
}

fn read_klog() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        const SYSLOG_ACTION_READ_ALL: libc::c_int = 3;
        let mut buf = vec![0u8; 128 * 1024];
        let n = unsafe {
            libc::klogctl(
                SYSLOG_ACTION_READ_ALL,
                buf.as_mut_ptr().cast(),
                buf.len() as libc::c_int,
            )
        };
        if n <= 0 {
            return None;
        }
        Some(String::from_utf8_lossy(&buf[..n as usize]).into_owned())
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Begin periodic memory statistics reporting; currently a facade that
/// records intent only
pub fn vmstat_start(enabled: bool) {
    if enabled {
        tracing::debug!("vmstat reporting enabled");
    }
}

/// Stop memory statistics reporting
pub fn vmstat_stop() {}

/// Begin S.M.A.R.T. drive state tracking; facade
pub fn smart_start(enabled: bool) {
    if enabled {
        tracing::debug!("smart tracking enabled");
    }
}

/// Stop S.M.A.R.T. tracking
pub fn smart_stop() {}

/// Start the page-thrashing helper; facade, best effort only
pub fn thrash_start(enabled: bool) {
    if enabled {
        tracing::debug!("thrash helper requested");
    }
}

/// Stop the page-thrashing helper
pub fn thrash_stop() {}

/// Log the current clocksource and warn when it changed mid-run
pub fn clocksource_check() {
    #[cfg(target_os = "linux")]
    {
        let path = "/sys/devices/system/clocksource/clocksource0/current_clocksource";
        let Ok(current) = fs::read_to_string(path) else {
            return;
        };
        let current = current.trim().to_string();
        let mut prev = CLOCKSOURCE.lock().unwrap();
        match prev.as_ref() {
            None => {
                tracing::debug!(clocksource = %current, "clocksource");
                *prev = Some(current);
            }
            Some(before) if *before != current => {
                tracing::warn!(
                    before = %before,
                    after = %current,
                    "clocksource changed during run"
                );
                *prev = Some(current);
            }
            Some(_) => {}
        }
    }
}

/// Log cpuidle state availability
pub fn cpuidle_init() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(entries) = fs::read_dir("/sys/devices/system/cpu/cpu0/cpuidle") {
            let states = entries.count();
            if states > 0 {
                tracing::debug!(states, "cpuidle states available");
            }
        }
    }
}

/// Release cpuidle bookkeeping
pub fn cpuidle_free() {}

/// Ask the kernel to merge same pages across the fleet (best effort)
pub fn ksm_memory_merge(enable: bool) {
    #[cfg(target_os = "linux")]
    {
        let value = if enable { "1" } else { "0" };
        let _ = fs::write("/sys/kernel/mm/ksm/run", value);
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = enable;
    }
}

/// Adjust this process's OOM score (best effort; needs privilege to lower)
pub fn set_oom_score_adj(score: i32) {
    #[cfg(target_os = "linux")]
    {
        let _ = fs::write("/proc/self/oom_score_adj", score.to_string());
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = score;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_intr_total() {
        let stat = "cpu  1 2 3 4\nintr 123456 0 1 2 3\nctxt 999\n";
        assert_eq!(parse_intr_total(stat), 123_456);
    }

    #[test]
    fn test_parse_intr_total_missing() {
        assert_eq!(parse_intr_total("cpu 1 2 3\nctxt 9\n"), 0);
    }

    #[test]
    fn test_interrupt_count_does_not_panic() {
        let _ = interrupt_count();
    }

    #[test]
    fn test_facade_pairs_are_callable() {
        vmstat_start(false);
        vmstat_stop();
        smart_start(false);
        smart_stop();
        thrash_start(false);
        thrash_stop();
        ftrace_start(false);
        ftrace_stop();
        cpuidle_init();
        cpuidle_free();
        clocksource_check();
        clocksource_check();
    }
}
