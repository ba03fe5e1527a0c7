//! Shared segment header
//!
//! Lives at the start of the stats mapping and is visible to the parent,
//! every worker, and the signal handlers. Everything handlers touch is
//! atomic; nothing in here is a Rust pointer into process-private memory
//! except the sentinel page addresses, which are inherited at identical
//! virtual addresses across `fork`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Advisory fleet counters.
///
/// These are bumped by children (started, exited, failed, alarmed) and the
/// parent (reaped). The reap logic is pid-indexed and does not depend on
/// them; relaxed ordering is sufficient.
#[repr(C)]
#[derive(Debug, Default)]
pub struct InstanceCounts {
    /// Instances that entered their child run path
    pub started: AtomicU32,
    /// Instances that reached their exit path
    pub exited: AtomicU32,
    /// Instances the parent has observed via `waitpid`
    pub reaped: AtomicU32,
    /// Instances that exited with a harness failure
    pub failed: AtomicU32,
    /// Instances whose alarm handler fired
    pub alarmed: AtomicU32,
}

impl InstanceCounts {
    /// Relaxed snapshot of (started, exited, reaped, failed, alarmed)
    pub fn snapshot(&self) -> (u32, u32, u32, u32, u32) {
        (
            self.started.load(Ordering::Relaxed),
            self.exited.load(Ordering::Relaxed),
            self.reaped.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.alarmed.load(Ordering::Relaxed),
        )
    }
}

/// Shared memory cache tuning handed to cache-exercising workloads
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MemCache {
    /// Cache size in bytes; 0 asks workloads to self-detect
    pub size: u64,
    /// Cache level (1..=3)
    pub level: u16,
    /// Number of ways, 0 for unknown
    pub ways: u32,
}

/// Addresses of the three single-page sentinels workloads probe.
///
/// `page_wo` is named for its intended semantic but is mapped read-only;
/// workloads rely on the historical protection, so it stays that way.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MappedPages {
    /// PROT_NONE page; any access faults
    pub page_none: *mut u8,
    /// PROT_READ page; writes fault
    pub page_ro: *mut u8,
    /// Read-only despite the name; writes fault
    pub page_wo: *mut u8,
}

impl Default for MappedPages {
    fn default() -> Self {
        Self {
            page_none: std::ptr::null_mut(),
            page_ro: std::ptr::null_mut(),
            page_wo: std::ptr::null_mut(),
        }
    }
}

/// Spin lock usable across processes via the shared mapping.
///
/// Held only across short formatted writes (log serialisation), never
/// across fork or signal delivery, and never from a signal handler.
#[repr(C)]
#[derive(Debug, Default)]
pub struct ShmLock {
    state: AtomicU32,
}

impl ShmLock {
    /// Acquire the lock, spinning until it is free
    pub fn lock(&self) {
        while self
            .state
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    /// Release the lock
    pub fn unlock(&self) {
        self.state.store(0, Ordering::Release);
    }

    /// Run a closure under the lock
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        self.lock();
        let r = f();
        self.unlock();
        r
    }
}

/// Header at the front of the shared stats mapping
#[repr(C)]
pub struct SharedHeader {
    /// Total length of the stats mapping in bytes, including the guard page
    pub length: usize,
    /// Advisory fleet counters
    pub instance_count: InstanceCounts,
    /// Wall-clock time the plane was created, seconds since the epoch
    pub time_started: f64,
    /// Set once an interrupt (or user alarm) has been caught
    pub caught_sigint: AtomicBool,
    /// Sentinel page addresses
    pub mapped: MappedPages,
    /// Cache tuning for cache-class workloads
    pub mem_cache: MemCache,
    /// Serialises multi-writer log emission
    pub log_lock: ShmLock,
    /// Serialises warn-once bookkeeping
    pub warn_once_lock: ShmLock,
    /// Warn-once state guarded by `warn_once_lock`
    pub warned_premature: AtomicBool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_snapshot() {
        let counts = InstanceCounts::default();
        counts.started.fetch_add(3, Ordering::Relaxed);
        counts.exited.fetch_add(2, Ordering::Relaxed);
        counts.reaped.fetch_add(2, Ordering::Relaxed);
        assert_eq!(counts.snapshot(), (3, 2, 2, 0, 0));
    }

    #[test]
    fn test_shm_lock_mutual_exclusion() {
        use std::sync::atomic::AtomicU32;
        use std::sync::Arc;

        let lock = Arc::new(ShmLock::default());
        let shared = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        lock.with(|| {
                            let v = shared.load(Ordering::Relaxed);
                            shared.store(v + 1, Ordering::Relaxed);
                        });
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(shared.load(Ordering::Relaxed), 4000);
    }
}
