//! Aggressive CPU affinity churn
//!
//! While waiting for the fleet to drain, repeatedly pin every live child to
//! a random CPU drawn from the parent's own affinity mask. Exercises
//! scheduler placement and memory locality. Best effort: on systems
//! without affinity control this is a no-op.

use crate::plan::RunList;
use crate::rng::HarnessRng;
use crate::shared::SharedPlane;
use crate::system;

#[cfg(target_os = "linux")]
pub fn churn_children(
    ticks_per_sec: i32,
    plane: &SharedPlane,
    list: &RunList,
    rng: &mut HarnessRng,
) {
    use std::sync::atomic::Ordering;

    let usec_sleep: u64 = if ticks_per_sec > 0 {
        1_000_000 / (5 * ticks_per_sec as u64)
    } else {
        1_000_000 / 250
    };

    while crate::signal::wait_flag() {
        let cpus = system::processors_configured().max(1) as u32;

        let mut proc_mask: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::sched_getaffinity(
                0,
                std::mem::size_of::<libc::cpu_set_t>(),
                &mut proc_mask,
            )
        };
        if rc < 0 {
            return;
        }
        if unsafe { libc::CPU_COUNT(&proc_mask) } == 0 {
            return;
        }

        system::usleep(usec_sleep);

        let mut procs_alive = false;
        for entry in list.entries.iter() {
            if !entry.runnable() || entry.ignore_permute {
                continue;
            }
            for j in 0..entry.instances {
                let slot_idx = entry.stats_offset + j as usize;
                let pid = plane.stats(slot_idx).pid.load(Ordering::Relaxed);
                if pid <= 0 {
                    continue;
                }
                // Gone already?
                let alive = unsafe { libc::kill(pid, 0) } == 0
                    || std::io::Error::last_os_error().raw_os_error()
                        != Some(libc::ESRCH);
                if !alive {
                    continue;
                }
                procs_alive = true;

                let mut cpu;
                loop {
                    cpu = rng.below(cpus) as usize;
                    if unsafe { libc::CPU_ISSET(cpu, &proc_mask) } {
                        break;
                    }
                }

                let mut mask: libc::cpu_set_t = unsafe { std::mem::zeroed() };
                unsafe {
                    libc::CPU_SET(cpu, &mut mask);
                    if libc::sched_setaffinity(
                        pid,
                        std::mem::size_of::<libc::cpu_set_t>(),
                        &mask,
                    ) < 0
                    {
                        return;
                    }
                }
            }
        }
        if !procs_alive {
            break;
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn churn_children(
    _ticks_per_sec: i32,
    _plane: &SharedPlane,
    _list: &RunList,
    _rng: &mut HarnessRng,
) {
    // No affinity control here; aggressive mode degrades to plain waiting
    let _ = system::processors_configured();
}
