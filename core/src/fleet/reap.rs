//! Wait/reap cycle
//!
//! The parent blocks in `waitpid` per started child, decodes the exit
//! status into the entry's tallies and the run outcome flags, and frees the
//! stats slot by zeroing its pid. OOM kills are adjudicated against the
//! kernel log so they do not count as workload failures.

use std::sync::atomic::Ordering;

use crate::config::Settings;
use crate::exit::ExitStatus;
use crate::plan::{RunEntry, RunList};
use crate::registry::Registry;
use crate::rng::HarnessRng;
use crate::shared::SharedPlane;
use crate::signal;
use crate::system;

use super::affinity;
use super::RunOutcome;

/// Wait for every started child of the current batch
#[allow(clippy::too_many_arguments)]
pub fn wait_for_stressors(
    registry: &Registry,
    settings: &Settings,
    plane: &SharedPlane,
    ticks_per_sec: i32,
    rng: &mut HarnessRng,
    list: &mut RunList,
    outcome: &mut RunOutcome,
) {
    // In aggressive mode keep moving children between CPUs to stress
    // scheduler placement until the fleet drains
    if settings.aggressive {
        affinity::churn_children(ticks_per_sec, plane, list, rng);
    }

    for entry_idx in 0..list.entries.len() {
        let (runnable, permuted, instances, stats_offset, spec_idx) = {
            let e = &list.entries[entry_idx];
            (
                e.runnable(),
                e.ignore_permute,
                e.instances,
                e.stats_offset,
                e.spec_idx,
            )
        };
        if !runnable || permuted {
            continue;
        }
        let name = registry.specs()[spec_idx].munged_name();

        for j in 0..instances {
            let slot_idx = stats_offset + j as usize;
            let pid = plane.stats(slot_idx).pid.load(Ordering::Relaxed);
            if pid <= 0 {
                continue;
            }
            wait_pid(
                settings,
                plane,
                &mut list.entries[entry_idx],
                slot_idx,
                pid,
                &name,
                outcome,
            );
            if !settings.keep_files {
                let _ = std::fs::remove_dir_all(system::instance_temp_dir(
                    &name, pid, j as u32,
                ));
            }
        }
    }
}

/// Mark a slot reaped: clear the pid and bump the shared counter
fn slot_finished(plane: &SharedPlane, slot_idx: usize) {
    plane
        .stats(slot_idx)
        .pid
        .store(0, Ordering::Relaxed);
    plane
        .header()
        .instance_count
        .reaped
        .fetch_add(1, Ordering::Relaxed);
}

/// Reap one child and fold its status into the tallies
fn wait_pid(
    settings: &Settings,
    plane: &SharedPlane,
    entry: &mut RunEntry,
    slot_idx: usize,
    pid: libc::pid_t,
    name: &str,
    outcome: &mut RunOutcome,
) {
    let mut status: libc::c_int = 0;
    loop {
        let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                // Somebody interrupted the wait
                Some(libc::EINTR) => continue,
                // No such child; mark it done anyhow
                Some(libc::ECHILD) => {
                    slot_finished(plane, slot_idx);
                    return;
                }
                _ => return,
            }
        }

        let mut do_abort = false;

        if libc::WIFSIGNALED(status) {
            let term_signal = libc::WTERMSIG(status);
            if term_signal != libc::SIGALRM {
                tracing::debug!(
                    stressor = %name,
                    pid = ret,
                    signal = term_signal,
                    "terminated on signal"
                );
            }
            // A kill from outside our control is not a workload failure:
            // check the kernel's oom adjudication before blaming the worker
            if system::process_oomed(ret) {
                tracing::debug!(stressor = %name, pid = ret, "killed by the OOM killer");
            } else if term_signal == libc::SIGKILL {
                tracing::debug!(
                    stressor = %name,
                    pid = ret,
                    "possibly killed by the OOM killer"
                );
            } else if term_signal != libc::SIGALRM {
                outcome.success = false;
            }
        }

        let wexit = ExitStatus::from_code(libc::WEXITSTATUS(status));
        match wexit {
            ExitStatus::Success => {
                entry.status.passed += 1;
            }
            ExitStatus::NoResource => {
                entry.status.skipped += 1;
                tracing::warn!(
                    stressor = %name,
                    pid = ret,
                    "aborted early, out of system resources"
                );
                outcome.resource_success = false;
                do_abort = true;
            }
            ExitStatus::NotImplemented => {
                entry.status.skipped += 1;
                do_abort = true;
            }
            ExitStatus::Signaled => {
                do_abort = true;
            }
            ExitStatus::BySysExit => {
                entry.status.failed += 1;
                tracing::debug!(
                    stressor = %name,
                    pid = ret,
                    "aborted via exit() which was not expected"
                );
                do_abort = true;
            }
            ExitStatus::MetricsUntrustworthy => {
                entry.status.bad_metrics += 1;
                outcome.metrics_success = false;
            }
            ExitStatus::Failure | ExitStatus::NotSuccess => {
                // Failure means the harness itself misbehaved in the child;
                // both flavours fail the run
                if wexit == ExitStatus::Failure {
                    entry.status.failed += 1;
                }
                tracing::error!(
                    stressor = %name,
                    pid = ret,
                    status = wexit.code(),
                    "terminated with an error ({})",
                    wexit.describe()
                );
                outcome.success = false;
                do_abort = true;
            }
        }

        if settings.abort && do_abort {
            signal::set_continue(false);
            signal::set_wait_flag(false);
            signal::broadcast_shutdown(true);
        }

        slot_finished(plane, slot_idx);
        tracing::debug!(
            stressor = %name,
            pid = ret,
            "terminated ({})",
            wexit.describe()
        );
        return;
    }
}
