//! Per-instance statistics records
//!
//! One [`StatsRecord`] per worker lives in the shared mapping. Exactly one
//! child writes its slot; the parent reads it only after `waitpid` has
//! returned for that pid, which orders the child's writes before the
//! parent's reads.
//!
//! Records are `repr(C)` and contain no pointers so the layout is identical
//! in every process that maps the segment.

use std::sync::atomic::{AtomicBool, AtomicI32};

/// Number of auxiliary metric slots per worker
pub const AUX_METRICS_MAX: usize = 8;

/// Width of an inline auxiliary metric description
pub const AUX_DESC_LEN: usize = 40;

/// Bogo-op counter state mutated by the workload
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterInfo {
    /// The bogo-ops counter; monotonically increasing while work is done
    pub counter: u64,
    /// True when the workload returned successfully
    pub run_ok: bool,
    /// True while the counter is in a readable state; a workload clears it
    /// around non-atomic counter maintenance
    pub counter_ready: bool,
    /// Set when the workload was deliberately killed and the counter should
    /// not be flagged as untrustworthy
    pub force_killed: bool,
}

/// One auxiliary metric: inline description plus value
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AuxMetric {
    /// NUL-padded description; empty slot when the first byte is zero
    pub desc: [u8; AUX_DESC_LEN],
    /// Metric value; aggregated as a geometric mean across instances
    pub value: f64,
}

impl Default for AuxMetric {
    fn default() -> Self {
        Self {
            desc: [0u8; AUX_DESC_LEN],
            value: -1.0,
        }
    }
}

impl AuxMetric {
    /// The description, if this slot has been set
    pub fn description(&self) -> Option<&str> {
        if self.desc[0] == 0 {
            return None;
        }
        let end = self
            .desc
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(AUX_DESC_LEN);
        std::str::from_utf8(&self.desc[..end]).ok()
    }
}

/// Shared statistics slot for one worker instance
#[repr(C)]
pub struct StatsRecord {
    /// Worker pid; -1 while spawning, 0 once reaped
    pub pid: AtomicI32,
    /// Set by the shutdown broadcast once this pid has been signalled, so a
    /// re-broadcast does not target it twice
    pub signalled: AtomicBool,
    /// Set by the worker's alarm handler the first time it fires
    pub sigalarmed: AtomicBool,
    /// True once the workload returned and the record was finalised
    pub completed: bool,
    /// Counter state written by the workload
    pub ci: CounterInfo,
    /// Workload start, seconds since the epoch
    pub start: f64,
    /// Duration of the most recent workload run
    pub duration: f64,
    /// Counter accumulated over all runs of this slot
    pub counter_total: u64,
    /// Duration accumulated over all runs of this slot
    pub duration_total: f64,
    /// User CPU time of the most recent run
    pub rusage_utime: f64,
    /// System CPU time of the most recent run
    pub rusage_stime: f64,
    /// Accumulated user CPU time
    pub rusage_utime_total: f64,
    /// Accumulated system CPU time
    pub rusage_stime_total: f64,
    /// Peak resident set size in kilobytes, maximum over all reads
    pub rusage_maxrss: i64,
    /// Interrupt count snapshot taken when the workload started
    pub interrupts_start: u64,
    /// Interrupt count snapshot taken when the workload stopped
    pub interrupts_stop: u64,
    /// Auxiliary metrics reported by the workload
    pub metrics: [AuxMetric; AUX_METRICS_MAX],
    /// Index of this worker's record in the checksum segment
    pub checksum_idx: u32,
}

impl StatsRecord {
    /// Prepare the slot for a fork: mark it spawning, arm the counter and
    /// bind its checksum slot
    pub fn prepare(&mut self, checksum_idx: u32) {
        self.pid.store(-1, std::sync::atomic::Ordering::Relaxed);
        self.signalled
            .store(false, std::sync::atomic::Ordering::Relaxed);
        self.ci.counter = 0;
        self.ci.counter_ready = true;
        self.checksum_idx = checksum_idx;
    }

    /// Reset every auxiliary metric slot to the unset state
    pub fn clear_metrics(&mut self) {
        for m in self.metrics.iter_mut() {
            *m = AuxMetric::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_prepare_arms_counter() {
        let mut rec: StatsRecord = unsafe { std::mem::zeroed() };
        rec.ci.counter = 99;
        rec.prepare(3);
        assert_eq!(rec.pid.load(Ordering::Relaxed), -1);
        assert_eq!(rec.ci.counter, 0);
        assert!(rec.ci.counter_ready);
        assert_eq!(rec.checksum_idx, 3);
    }

    #[test]
    fn test_aux_metric_description() {
        let mut m = AuxMetric::default();
        assert!(m.description().is_none());

        let text = b"page faults per second";
        m.desc[..text.len()].copy_from_slice(text);
        assert_eq!(m.description(), Some("page faults per second"));
    }

    #[test]
    fn test_aux_metric_description_full_width() {
        let mut m = AuxMetric::default();
        m.desc = [b'x'; AUX_DESC_LEN];
        assert_eq!(m.description().map(str::len), Some(AUX_DESC_LEN));
    }

    #[test]
    fn test_record_has_no_padding_surprises() {
        // The record must be safely zero-initialisable: the mapping is
        // created zeroed and never constructed through Rust initialisers.
        let rec: StatsRecord = unsafe { std::mem::zeroed() };
        assert_eq!(rec.pid.load(Ordering::Relaxed), 0);
        assert!(!rec.completed);
        assert_eq!(rec.ci.counter, 0);
    }
}
