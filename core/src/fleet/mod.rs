//! Fleet scheduler: fork fan-out, execution policies, and the reap cycle
//!
//! Three policies share one worker core:
//!
//! - *parallel*: every runnable entry's instances forked together
//! - *sequential*: one entry at a time, its instances in parallel
//! - *permute*: every non-empty subset of up to 16 runnable entries, one
//!   subset at a time
//!
//! The parent forks, arms the overall alarm, then blocks in the wait/reap
//! cycle (optionally churning child CPU affinities in aggressive mode).

mod affinity;
mod child;
mod reap;

use crate::config::Settings;
use crate::plan::RunList;
use crate::registry::Registry;
use crate::rng::HarnessRng;
use crate::shared::SharedPlane;
use crate::signal;
use crate::system;

/// Upper bound on entries that participate in permute subsets
pub const PERMUTE_MAX: usize = 16;

/// Outcome flags accumulated over a whole run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Total wall-clock time spent running fleets
    pub duration: f64,
    /// False once any worker failed or metrics were corrupted
    pub success: bool,
    /// False once any worker ran out of resources
    pub resource_success: bool,
    /// False once any worker reported untrustworthy metrics
    pub metrics_success: bool,
}

impl Default for RunOutcome {
    fn default() -> Self {
        Self {
            duration: 0.0,
            success: true,
            resource_success: true,
            metrics_success: true,
        }
    }
}

/// Drives the process fleet for one run
pub struct Scheduler<'a> {
    registry: &'a Registry,
    settings: &'a Settings,
    plane: &'a SharedPlane,
    ticks_per_sec: i32,
    rng: HarnessRng,
    timeout_secs: u64,
}

impl<'a> Scheduler<'a> {
    /// Create a scheduler over an established shared plane
    pub fn new(
        registry: &'a Registry,
        settings: &'a Settings,
        plane: &'a SharedPlane,
        rng: HarnessRng,
    ) -> Self {
        let timeout_secs = settings.effective_timeout();
        Self {
            registry,
            settings,
            plane,
            ticks_per_sec: system::ticks_per_second(),
            rng,
            timeout_secs,
        }
    }

    /// Run every runnable entry's instances in parallel
    pub fn run_parallel(&mut self, list: &mut RunList, outcome: &mut RunOutcome) {
        let all: Vec<usize> = (0..list.entries.len()).collect();
        let mut checksum_base = 0usize;
        self.run_batch(list, &all, &mut checksum_base, outcome);
    }

    /// Run entries one at a time, each entry's instances in parallel
    pub fn run_sequential(&mut self, list: &mut RunList, outcome: &mut RunOutcome) {
        let mut checksum_base = 0usize;
        for idx in 0..list.entries.len() {
            if !signal::continue_flag() {
                break;
            }
            if !list.entries[idx].runnable() {
                continue;
            }
            // Run this entry in isolation; the checksum cursor carries
            // across entries so every instance keeps a distinct record
            self.run_batch(list, &[idx], &mut checksum_base, outcome);
        }
    }

    /// Run each non-empty subset of the first [`PERMUTE_MAX`] runnable
    /// entries, one subset at a time
    pub fn run_permute(&mut self, list: &mut RunList, outcome: &mut RunOutcome) {
        let runnable = list.runnable_count();
        let k = runnable.min(PERMUTE_MAX);
        if runnable > PERMUTE_MAX {
            tracing::info!("permute: limiting to first {PERMUTE_MAX} stressors");
        }
        let num_perms: u32 = 1 << k;

        for mask in 1..num_perms {
            if !signal::continue_flag() {
                break;
            }
            let members = apply_permute_mask(list, self.registry, mask, k);
            tracing::info!("permute: {}", members.join(", "));

            let mut checksum_base = 0usize;
            let all: Vec<usize> = (0..list.entries.len()).collect();
            self.run_batch(list, &all, &mut checksum_base, outcome);

            tracing::info!(
                "permute: {:.2}% complete",
                f64::from(mask) / f64::from(num_perms - 1) * 100.0
            );
        }
        list.clear_permute_flags();
    }

    /// Fork the selected entries' instances, then reap them.
    ///
    /// `checksum_base` is the cursor into the checksum segment; it advances
    /// by one per instance attempted.
    fn run_batch(
        &mut self,
        list: &mut RunList,
        selected: &[usize],
        checksum_base: &mut usize,
        outcome: &mut RunOutcome,
    ) {
        signal::set_wait_flag(true);
        let time_start = system::time_now();
        let mut started_instances: i32 = 0;
        tracing::debug!("starting stressors");

        'fanout: for &entry_idx in selected {
            let entry = &list.entries[entry_idx];
            if !entry.runnable() || entry.ignore_permute {
                continue;
            }
            let spec_idx = entry.spec_idx;
            let instances = entry.instances;
            let stats_offset = entry.stats_offset;
            let ops_budget = entry.ops_budget;

            for j in 0..instances {
                if self.timeout_secs > 0
                    && system::time_now() - time_start > self.timeout_secs as f64
                {
                    break 'fanout;
                }
                if !signal::continue_flag() {
                    break 'fanout;
                }

                let slot_idx = stats_offset + j as usize;
                let checksum_idx = *checksum_base;
                unsafe {
                    self.plane.stats_mut(slot_idx).prepare(checksum_idx as u32);
                }

                loop {
                    if !signal::continue_flag() {
                        break 'fanout;
                    }
                    let fork_time_start = system::time_now();
                    let pid = unsafe { libc::fork() };
                    match pid {
                        -1 => {
                            let err = std::io::Error::last_os_error();
                            if err.raw_os_error() == Some(libc::EAGAIN) {
                                system::usleep(100_000);
                                continue;
                            }
                            tracing::error!(error = %err, "cannot fork");
                            signal::broadcast_shutdown(false);
                            break 'fanout;
                        }
                        0 => {
                            // Child: run the workload and leave via _exit so
                            // no parent-side state unwinds in this copy
                            let rc = child::run(
                                self.registry,
                                self.settings,
                                self.plane,
                                child::ChildTask {
                                    spec_idx,
                                    slot_idx,
                                    checksum_idx,
                                    instance: j as u32,
                                    num_instances: instances as u32,
                                    ops_budget,
                                    started_instances,
                                    fork_time_start,
                                    timeout_secs: self.timeout_secs,
                                    ticks_per_sec: self.ticks_per_sec,
                                },
                            );
                            unsafe { libc::_exit(rc.code()) };
                        }
                        pid => {
                            let slot = self.plane.stats(slot_idx);
                            slot.signalled
                                .store(false, std::sync::atomic::Ordering::Relaxed);
                            slot.pid.store(pid, std::sync::atomic::Ordering::Relaxed);
                            started_instances += 1;
                            crate::adapters::ftrace_add_pid(pid);

                            // Forced early abort during startup?
                            if !signal::continue_flag() {
                                tracing::debug!("abort signal during startup, cleaning up");
                                signal::broadcast_shutdown(true);
                                break 'fanout;
                            }
                            break;
                        }
                    }
                }
                *checksum_base += 1;
            }
        }

        // The parent's run handlers go in once the fan-out is done; until
        // here the terminate handlers cover interrupts
        let _ = signal::install_run_handlers(false);

        tracing::debug!(
            "{} stressor{} started",
            started_instances,
            if started_instances == 1 { "" } else { "s" }
        );

        if self.timeout_secs > 0 {
            signal::set_alarm(self.timeout_secs);
        }

        reap::wait_for_stressors(
            self.registry,
            self.settings,
            self.plane,
            self.ticks_per_sec,
            &mut self.rng,
            list,
            outcome,
        );

        outcome.duration += system::time_now() - time_start;
    }
}

/// Set permute flags for one subset mask; returns the member names.
///
/// Bit *j* of the mask corresponds to the *j*-th runnable entry; entries
/// beyond `k` never participate.
fn apply_permute_mask(
    list: &mut RunList,
    registry: &Registry,
    mask: u32,
    k: usize,
) -> Vec<String> {
    let mut members = Vec::new();
    let mut j = 0usize;
    for entry in list.entries.iter_mut() {
        entry.ignore_permute = true;
        if !entry.runnable() {
            continue;
        }
        if j < k {
            entry.ignore_permute = (mask & (1 << j)) == 0;
            if !entry.ignore_permute {
                members.push(registry.specs()[entry.spec_idx].munged_name());
            }
        }
        j += 1;
    }
    members
}
