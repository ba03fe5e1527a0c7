//! Metrics aggregation and counter integrity checks
//!
//! After the fleet is reaped the parent folds per-instance stats into
//! per-entry aggregates (sums, arithmetic rates, geometric means of
//! auxiliary metrics) and independently re-hashes every worker's counter
//! state against the checksum segment.

use std::sync::atomic::Ordering;

use crate::plan::{IgnoreReason, RunList};
use crate::registry::Registry;
use crate::shared::stats::AUX_METRICS_MAX;
use crate::shared::{ChecksumRecord, SharedPlane};

/// Aggregated auxiliary metric for one entry
#[derive(Debug, Clone)]
pub struct AuxAggregate {
    /// Metric description as reported by the workload
    pub description: String,
    /// Arithmetic mean over completed instances
    pub mean: f64,
    /// Geometric mean over instances with positive values
    pub geomean: f64,
}

/// Aggregated metrics for one run-list entry
#[derive(Debug, Clone)]
pub struct EntryMetrics {
    /// Munged stressor name
    pub name: String,
    /// Sum of bogo-ops over all instances
    pub bogo_ops: u64,
    /// Average wall-clock time per completed instance
    pub wall_time: f64,
    /// Total user CPU time
    pub user_time: f64,
    /// Total system CPU time
    pub system_time: f64,
    /// Bogo-ops per second of wall-clock time
    pub bogo_ops_per_second_real: f64,
    /// Bogo-ops per second of user+system CPU time
    pub bogo_ops_per_second_cpu: f64,
    /// CPU usage percentage per instance
    pub cpu_usage_per_instance: f64,
    /// Peak RSS over all instances, kilobytes
    pub max_rss_kb: i64,
    /// Instances that completed their workload
    pub completed_instances: u32,
    /// True when at least one instance reported success
    pub run_ok: bool,
    /// Aggregated auxiliary metrics
    pub aux: Vec<AuxAggregate>,
}

/// Split a positive finite value into (mantissa in [0.5, 1), exponent)
fn frexp(value: f64) -> (f64, i32) {
    if value == 0.0 || !value.is_finite() {
        return (value, 0);
    }
    let bits = value.to_bits();
    let exp_bits = ((bits >> 52) & 0x7ff) as i32;
    if exp_bits == 0 {
        // Subnormal: renormalise first
        let (m, e) = frexp(value * 2f64.powi(64));
        return (m, e - 64);
    }
    let exponent = exp_bits - 1022;
    let mantissa = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
    (mantissa, exponent)
}

/// Geometric mean over the positive values, accumulated as decomposed
/// mantissas and exponents so large products cannot overflow
pub fn geometric_mean(values: &[f64]) -> f64 {
    let mut mantissa = 1.0f64;
    let mut exponent: i64 = 0;
    let mut n = 0.0f64;

    for &v in values {
        if v > 0.0 {
            let (m, e) = frexp(v);
            mantissa *= m;
            exponent += i64::from(e);
            n += 1.0;
        }
    }
    if n <= 0.0 {
        return 0.0;
    }
    let inverse_n = 1.0 / n;
    mantissa.powf(inverse_n) * 2f64.powf(exponent as f64 * inverse_n)
}

/// Aggregate per-entry metrics from the shared plane.
///
/// Also records each entry's completed-instance count for the summaries.
pub fn collect(registry: &Registry, list: &mut RunList, plane: &SharedPlane) -> Vec<EntryMetrics> {
    let mut result = Vec::new();

    for entry in list.entries.iter_mut() {
        if entry.ignore_run != IgnoreReason::NotIgnored || entry.instances <= 0 {
            continue;
        }
        let spec = &registry.specs()[entry.spec_idx];

        let mut c_total: u64 = 0;
        let mut r_total = 0.0f64;
        let mut u_total = 0.0f64;
        let mut s_total = 0.0f64;
        let mut max_rss: i64 = 0;
        let mut run_ok = false;
        let mut completed: u32 = 0;

        for j in 0..entry.instances {
            let stats = plane.stats(entry.stats_offset + j as usize);
            if stats.completed {
                completed += 1;
            }
            run_ok |= stats.ci.run_ok;
            c_total += stats.counter_total;
            u_total += stats.rusage_utime_total;
            s_total += stats.rusage_stime_total;
            max_rss = max_rss.max(stats.rusage_maxrss);
            r_total += stats.duration_total;
        }
        entry.completed_instances = completed;

        // Real time as the average wall clock of the completed instances
        let wall_time = if completed > 0 {
            r_total / f64::from(completed)
        } else {
            0.0
        };

        let t_time = u_total + s_total;
        let bogo_ops_per_second_real = if wall_time > 0.0 {
            c_total as f64 / wall_time
        } else {
            0.0
        };
        let bogo_ops_per_second_cpu = if t_time > 0.0 {
            c_total as f64 / t_time
        } else {
            0.0
        };
        let cpu_usage = if wall_time > 0.0 {
            100.0 * t_time / wall_time
        } else {
            0.0
        };
        let cpu_usage_per_instance = if completed > 0 {
            cpu_usage / f64::from(completed)
        } else {
            0.0
        };

        let mut aux = Vec::new();
        for i in 0..AUX_METRICS_MAX {
            let description = match plane.stats(entry.stats_offset).metrics[i].description() {
                Some(d) => d.to_string(),
                None => continue,
            };
            let values: Vec<f64> = (0..entry.instances)
                .map(|j| plane.stats(entry.stats_offset + j as usize).metrics[i].value)
                .collect();
            let total: f64 = values.iter().sum();
            let mean = if completed > 0 {
                total / f64::from(completed)
            } else {
                0.0
            };
            aux.push(AuxAggregate {
                description,
                mean,
                geomean: geometric_mean(&values),
            });
        }

        result.push(EntryMetrics {
            name: spec.munged_name(),
            bogo_ops: c_total,
            wall_time,
            user_time: u_total,
            system_time: s_total,
            bogo_ops_per_second_real,
            bogo_ops_per_second_cpu,
            cpu_usage_per_instance,
            max_rss_kb: max_rss,
            completed_instances: completed,
            run_ok,
            aux,
        });
    }

    result
}

/// Independently re-hash every completed worker's counter state and compare
/// against the worker-written checksum. Any mismatch clears `success`.
pub fn verify_counters(
    registry: &Registry,
    list: &RunList,
    plane: &SharedPlane,
    success: &mut bool,
) {
    let mut ok = true;
    let mut counter_check: u64 = 0;
    let mut min_run_time = f64::MAX;

    for entry in list.entries.iter() {
        if entry.ignore_run != IgnoreReason::NotIgnored {
            continue;
        }
        let name = registry.specs()[entry.spec_idx].munged_name();

        for j in 0..entry.instances {
            let stats = plane.stats(entry.stats_offset + j as usize);
            if !stats.completed {
                continue;
            }

            counter_check |= stats.ci.counter;
            if stats.duration < min_run_time {
                min_run_time = stats.duration;
            }

            let checksum = plane.checksum(stats.checksum_idx as usize);

            if stats.ci.counter != checksum.data.counter {
                tracing::error!(
                    stressor = %name,
                    instance = j,
                    stats = stats.ci.counter,
                    checksum = checksum.data.counter,
                    "corrupted bogo-ops counter"
                );
                ok = false;
            }
            if stats.ci.run_ok != checksum.data.run_ok {
                tracing::error!(
                    stressor = %name,
                    instance = j,
                    stats = stats.ci.run_ok,
                    checksum = checksum.data.run_ok,
                    "corrupted run flag"
                );
                ok = false;
            }
            let expected = ChecksumRecord::expected_hash(stats.ci.counter, stats.ci.run_ok);
            if expected != checksum.hash {
                tracing::error!(
                    stressor = %name,
                    instance = j,
                    expected,
                    actual = checksum.hash,
                    "hash error in bogo-ops counter and run flag"
                );
                ok = false;
            }
        }
    }

    // Counters should move within half a minute of real work
    if counter_check == 0 && min_run_time > 30.0 {
        tracing::warn!("metrics-check: all bogo-op counters are zero, data may be incorrect");
    }

    if ok {
        tracing::debug!("metrics-check: all stressor metrics validated and sane");
    } else {
        tracing::error!("metrics-check: stressor metrics corrupted, data is compromised");
        *success = false;
    }
}

/// Log one line per status kind listing each stressor's tally
pub fn exit_status_summary(registry: &Registry, list: &RunList) {
    summary_line(registry, list, "skipped", |e| e.status.skipped);
    summary_line(registry, list, "passed", |e| e.status.passed);
    summary_line(registry, list, "failed", |e| e.status.failed);
    summary_line(registry, list, "metrics untrustworthy", |e| {
        e.status.bad_metrics
    });
}

fn summary_line(
    registry: &Registry,
    list: &RunList,
    label: &str,
    count_of: impl Fn(&crate::plan::RunEntry) -> u32,
) {
    let mut total = 0u32;
    let mut parts = String::new();

    for entry in list.entries.iter() {
        let mut count = count_of(entry);
        // Entries that never ran show up as skipped in full
        if entry.ignore_run != IgnoreReason::NotIgnored && label == "skipped" {
            count = entry.instances.max(0) as u32;
        }
        if count > 0 {
            let name = registry.specs()[entry.spec_idx].munged_name();
            parts.push_str(&format!(" {name} ({count})"));
            total += count;
        }
    }

    if total > 0 {
        tracing::info!("{label}: {total}:{parts}");
    } else {
        tracing::info!("{label}: 0");
    }
}

/// Snapshot of the advisory instance counters, for the end-of-run report
pub fn instance_count_summary(plane: &SharedPlane) -> String {
    let counts = &plane.header().instance_count;
    format!(
        "instances started: {}, exited: {}, reaped: {}, failed: {}, alarmed: {}",
        counts.started.load(Ordering::Relaxed),
        counts.exited.load(Ordering::Relaxed),
        counts.reaped.load(Ordering::Relaxed),
        counts.failed.load(Ordering::Relaxed),
        counts.alarmed.load(Ordering::Relaxed),
    )
}
