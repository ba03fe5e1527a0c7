//! Child-side run path
//!
//! Everything between `fork` returning zero and `_exit`: environment
//! hygiene, signal installation, the staggered start, the workload call,
//! and finalisation of the stats and checksum records.

use std::sync::atomic::Ordering;

use crate::adapters;
use crate::config::Settings;
use crate::exit::ExitStatus;
use crate::registry::{Registry, StressorArgs, VerifyMode};
use crate::shared::{ChecksumRecord, SharedPlane};
use crate::signal;
use crate::system;

/// Per-instance parameters computed by the parent before fork
#[derive(Debug, Clone, Copy)]
pub struct ChildTask {
    /// Index of the stressor descriptor
    pub spec_idx: usize,
    /// This worker's stats slot
    pub slot_idx: usize,
    /// This worker's checksum slot
    pub checksum_idx: usize,
    /// Instance number within the entry
    pub instance: u32,
    /// Total instances of the entry
    pub num_instances: u32,
    /// Per-instance bogo-ops budget
    pub ops_budget: u64,
    /// Instances already started; scales the startup backoff
    pub started_instances: i32,
    /// Wall-clock time just before the fork
    pub fork_time_start: f64,
    /// Overall timeout in seconds
    pub timeout_secs: u64,
    /// Clock ticks per second, for the CPU-time fallback
    pub ticks_per_sec: i32,
}

/// Trap a stray `exit()` in workload code: workloads must return, so a
/// libc exit path is reported as its own status
extern "C" fn child_atexit() {
    unsafe { libc::_exit(ExitStatus::BySysExit.code()) };
}

/// Run one worker instance to completion; the caller `_exit`s with the
/// returned status
pub fn run(
    registry: &Registry,
    settings: &Settings,
    plane: &SharedPlane,
    task: ChildTask,
) -> ExitStatus {
    let spec = &registry.specs()[task.spec_idx];
    let name = spec.munged_name();
    let pid = unsafe { libc::getpid() };

    // SAFETY: this child is the slot's sole writer from here to _exit
    let stats = unsafe { plane.stats_mut(task.slot_idx) };
    signal::register_own_slot(stats as *mut _);

    let header = plane.header();
    header.instance_count.started.fetch_add(1, Ordering::Relaxed);

    if !settings.keep_name {
        system::set_proc_name(&name);
    }
    system::set_dumpable(false);
    unsafe {
        libc::atexit(child_atexit);
        libc::umask(0o077);
    }

    let mut rc = ExitStatus::Success;

    if signal::install_run_handlers(true).is_err() {
        rc = ExitStatus::Failure;
        signal::block_all_signals();
        return finish(settings, plane, stats, task, rc);
    }

    system::parent_died_alarm();
    system::raise_fd_limit();
    system::set_iopriority(settings.ionice_class, settings.ionice_level);

    header.log_lock.with(|| {
        tracing::debug!(
            stressor = %name,
            pid,
            instance = task.instance,
            cpu = system::current_cpu(),
            "started"
        );
    });

    stats.interrupts_start = adapters::interrupt_count();

    // Staggered start: each later instance waits a little longer
    system::usleep(settings.backoff_us.saturating_mul(task.started_instances.max(0) as u64));

    stats.start = system::time_now();
    if task.timeout_secs > 0 {
        signal::set_alarm(task.timeout_secs);
    }

    if signal::continue_flag() && !settings.dry_run {
        // SAFETY: slot owned by this child, same discipline as stats
        let checksum = unsafe { plane.checksum_mut(task.checksum_idx) };
        *checksum = ChecksumRecord::default();

        let verify = match spec.verify {
            VerifyMode::Always => true,
            VerifyMode::Optional => settings.verify,
            VerifyMode::None => false,
        };
        stats.clear_metrics();

        stats.start = system::time_now();
        let time_end = stats.start + task.timeout_secs as f64;
        {
            let mut args = StressorArgs {
                ci: &mut stats.ci,
                name: &name,
                max_ops: task.ops_budget,
                instance: task.instance,
                num_instances: task.num_instances,
                pid,
                page_size: plane.page_size(),
                time_end,
                mapped: &header.mapped,
                metrics: &mut stats.metrics,
                verify,
            };
            rc = spec.module.run(&mut args);
        }

        signal::block_all_signals();
        signal::set_alarm(0);
        stats.interrupts_stop = adapters::interrupt_count();

        // Attribute an externally sent alarm for diagnostics
        if let Some(alarm) = signal::user_alarm() {
            tracing::debug!(
                stressor = %name,
                sender_pid = alarm.pid,
                sender_uid = alarm.uid,
                "terminated by SIGALRM sent externally"
            );
        }

        stats.completed = true;
        let ok = rc == ExitStatus::Success;
        stats.ci.run_ok = ok;

        // A counter left in a non-ready state means the workload was
        // interrupted mid-update; its numbers cannot be trusted
        if !stats.ci.counter_ready && !stats.ci.force_killed {
            tracing::warn!(
                stressor = %name,
                "bogo-ops counter in non-ready state, metrics are untrustworthy (process may have been terminated prematurely)"
            );
            rc = ExitStatus::MetricsUntrustworthy;
        }

        checksum.finalise(stats.ci.counter, ok);
    }

    finish(settings, plane, stats, task, rc)
}

/// Common exit path: timings, rusage, warnings, abort propagation and the
/// shared instance counters
fn finish(
    settings: &Settings,
    plane: &SharedPlane,
    stats: &mut crate::shared::StatsRecord,
    task: ChildTask,
    mut rc: ExitStatus,
) -> ExitStatus {
    let finish_time = system::time_now();
    stats.duration = if stats.start > 0.0 {
        finish_time - stats.start
    } else {
        0.0
    };
    stats.counter_total += stats.ci.counter;
    stats.duration_total += stats.duration;

    match system::rusage_self_and_children() {
        Some((utime, stime, maxrss)) => {
            stats.rusage_utime = utime;
            stats.rusage_stime = stime;
            stats.rusage_utime_total += utime;
            stats.rusage_stime_total += stime;
            stats.rusage_maxrss = stats.rusage_maxrss.max(maxrss);
        }
        None => {
            if let Some((utime, stime)) = system::times_fallback(task.ticks_per_sec) {
                stats.rusage_utime = utime;
                stats.rusage_stime = stime;
                stats.rusage_utime_total += utime;
                stats.rusage_stime_total += stime;
            }
        }
    }

    let header = plane.header();
    header.log_lock.with(|| {
        tracing::debug!(
            pid = unsafe { libc::getpid() },
            instance = task.instance,
            cpu = system::current_cpu(),
            "exited"
        );
    });

    // Allow ~0.5s of slop before calling a finish premature
    let run_duration = (finish_time - task.fork_time_start) + 0.5;
    let interrupted = header.caught_sigint.load(Ordering::Relaxed);
    if rc == ExitStatus::Success
        && stats.ci.run_ok
        && !interrupted
        && task.timeout_secs > 0
        && run_duration < task.timeout_secs as f64
        && !(task.ops_budget > 0 && stats.ci.counter >= task.ops_budget)
    {
        // Only the first instance to notice gets to complain
        header.warn_once_lock.with(|| {
            if !header.warned_premature.load(Ordering::Relaxed) {
                tracing::warn!(
                    "finished prematurely after just {}",
                    system::duration_to_str(run_duration)
                );
                header.warned_premature.store(true, Ordering::Relaxed);
            }
        });
    }

    if rc != ExitStatus::Success && settings.abort {
        signal::set_continue(false);
        signal::set_wait_flag(false);
        unsafe {
            libc::kill(libc::getppid(), libc::SIGALRM);
        }
    }

    if signal::terminate_signum().is_some() {
        rc = ExitStatus::Signaled;
    }

    let counts = &plane.header().instance_count;
    counts.exited.fetch_add(1, Ordering::Relaxed);
    if rc == ExitStatus::Failure {
        counts.failed.fetch_add(1, Ordering::Relaxed);
    }

    rc
}
