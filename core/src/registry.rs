//! Stressor catalog: descriptors, the module interface, and name lookup
//!
//! A stressor module is the unit of workload. The core only ever sees it
//! through the [`StressorModule`] trait: a set of lifecycle hooks around a
//! single `run` entry point that hammers a subsystem while bumping a
//! bogo-op counter in shared memory.

use crate::class::Class;
use crate::error::{Error, Result};
use crate::exit::ExitStatus;
use crate::shared::stats::{AuxMetric, CounterInfo, AUX_DESC_LEN, AUX_METRICS_MAX};
use crate::shared::MappedPages;
use crate::signal;

/// Whether a stressor can validate its own results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// No verification implemented
    None,
    /// Verification runs when `--verify` is given
    Optional,
    /// Verification always runs
    Always,
}

/// One help line for a stressor-specific option
#[derive(Debug, Clone, Copy)]
pub struct Help {
    /// Short option form, e.g. `"c N"`
    pub opt_short: Option<&'static str>,
    /// Long option form, e.g. `"cpu N"`
    pub opt_long: &'static str,
    /// Description text
    pub description: &'static str,
}

/// Arguments handed to a workload's `run` entry point.
///
/// `ci` lives inside the worker's own shared-memory stats slot; the workload
/// mutates the counter there so the parent can read it after reaping.
pub struct StressorArgs<'a> {
    /// Bogo-op counter and run state, in the worker's shared stats slot
    pub ci: &'a mut CounterInfo,
    /// Munged stressor name for log messages
    pub name: &'a str,
    /// Bogo-ops budget for this instance; 0 runs to the deadline
    pub max_ops: u64,
    /// Instance number within the entry, 0-based
    pub instance: u32,
    /// Total instances of this entry
    pub num_instances: u32,
    /// This worker's process id
    pub pid: libc::pid_t,
    /// System page size
    pub page_size: usize,
    /// Absolute wall-clock end time, seconds since the epoch
    pub time_end: f64,
    /// Sentinel pages workloads may probe for fault behavior
    pub mapped: &'a MappedPages,
    /// Auxiliary metric slots in the worker's stats record
    pub metrics: &'a mut [AuxMetric],
    /// True when result verification is enabled for this run
    pub verify: bool,
}

impl StressorArgs<'_> {
    /// Check whether the workload should keep running.
    ///
    /// False once the global continue flag is cleared (alarm, interrupt) or
    /// the bogo-ops budget is met.
    #[inline]
    pub fn continue_running(&self) -> bool {
        signal::continue_flag() && (self.max_ops == 0 || self.ci.counter < self.max_ops)
    }

    /// Bump the bogo-ops counter by one
    #[inline]
    pub fn bogo_inc(&mut self) {
        self.ci.counter += 1;
    }

    /// Record an auxiliary metric value.
    ///
    /// The description is truncated to the inline slot width; out-of-range
    /// indices are ignored.
    pub fn set_metric(&mut self, idx: usize, description: &str, value: f64) {
        if idx >= AUX_METRICS_MAX || idx >= self.metrics.len() {
            return;
        }
        let slot = &mut self.metrics[idx];
        slot.desc = [0u8; AUX_DESC_LEN];
        for (dst, src) in slot.desc.iter_mut().zip(description.bytes()) {
            *dst = src;
        }
        slot.value = value;
    }
}

/// The uniform interface every workload module exposes to the core
pub trait StressorModule: Sync {
    /// Probe whether this stressor can run on the current system
    fn supported(&self, _name: &str) -> bool {
        true
    }

    /// One-time setup before the fleet launches
    fn init(&self) {}

    /// Teardown after the whole run
    fn deinit(&self) {}

    /// Install default option values
    fn set_default(&self) {}

    /// Cap per-instance resource usage given a per-instance maximum
    fn set_limit(&self, _max: u64) {}

    /// Apply a stressor-specific option; returns false when the option is
    /// not recognised by this module
    fn set_option(&self, _opt: &str, _value: &str) -> std::result::Result<bool, String> {
        Ok(false)
    }

    /// The workload body
    fn run(&self, args: &mut StressorArgs<'_>) -> ExitStatus;

    /// Stressor-specific help lines
    fn help(&self) -> &'static [Help] {
        &[]
    }
}

/// Immutable descriptor for one catalog entry
pub struct StressorSpec {
    /// Stable identifier; unique across the catalog
    pub id: u32,
    /// Canonical name; may contain `_` which is munged to `-` for display
    pub name: &'static str,
    /// Class membership bitmask
    pub class: Class,
    /// Verification capability
    pub verify: VerifyMode,
    /// Optional short CLI option letter
    pub short_opt: Option<char>,
    /// The workload implementation
    pub module: &'static dyn StressorModule,
}

impl StressorSpec {
    /// Display name with underscores munged to dashes
    pub fn munged_name(&self) -> String {
        munge(self.name)
    }
}

impl std::fmt::Debug for StressorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StressorSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("class", &self.class)
            .finish()
    }
}

/// Munge a stressor name for display: underscores become dashes
pub fn munge(name: &str) -> String {
    name.replace('_', "-")
}

/// Name equality with case folding and `_` / `-` munging
pub fn names_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).all(|(ca, cb)| {
        let ca = if ca == b'_' { b'-' } else { ca.to_ascii_lowercase() };
        let cb = if cb == b'_' { b'-' } else { cb.to_ascii_lowercase() };
        ca == cb
    })
}

/// The full catalog of stressor descriptors
pub struct Registry {
    specs: Vec<StressorSpec>,
}

impl Registry {
    /// Build a registry, checking descriptor id uniqueness
    pub fn new(specs: Vec<StressorSpec>) -> Result<Self> {
        for (i, a) in specs.iter().enumerate() {
            for b in &specs[i + 1..] {
                if a.id == b.id {
                    return Err(Error::Config(format!(
                        "duplicate stressor id {} ('{}' and '{}')",
                        a.id, a.name, b.name
                    )));
                }
                if names_match(a.name, b.name) {
                    return Err(Error::Config(format!(
                        "duplicate stressor name '{}'",
                        a.name
                    )));
                }
            }
        }
        Ok(Self { specs })
    }

    /// All descriptors in catalog order
    pub fn specs(&self) -> &[StressorSpec] {
        &self.specs
    }

    /// Number of catalog entries
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// True when the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Find a descriptor index by (munged, case-insensitive) name
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.specs.iter().position(|s| names_match(s.name, name))
    }

    /// Find a descriptor index by id
    pub fn find_by_id(&self, id: u32) -> Option<usize> {
        self.specs.iter().position(|s| s.id == id)
    }

    /// Space-separated munged names, for error listings
    pub fn valid_names(&self) -> String {
        self.specs
            .iter()
            .map(|s| s.munged_name())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullModule;

    impl StressorModule for NullModule {
        fn run(&self, _args: &mut StressorArgs<'_>) -> ExitStatus {
            ExitStatus::Success
        }
    }

    static NULL_MODULE: NullModule = NullModule;

    fn spec(id: u32, name: &'static str) -> StressorSpec {
        StressorSpec {
            id,
            name,
            class: Class::CPU,
            verify: VerifyMode::None,
            short_opt: None,
            module: &NULL_MODULE,
        }
    }

    #[test]
    fn test_names_match_munging() {
        assert!(names_match("cpu_cache", "cpu-cache"));
        assert!(names_match("CPU", "cpu"));
        assert!(names_match("io-uring", "IO_URING"));
        assert!(!names_match("cpu", "cpus"));
    }

    #[test]
    fn test_find_by_name_and_id() {
        let reg = Registry::new(vec![spec(1, "cpu"), spec(2, "mem_copy")]).unwrap();
        assert_eq!(reg.find_by_name("cpu"), Some(0));
        assert_eq!(reg.find_by_name("mem-copy"), Some(1));
        assert_eq!(reg.find_by_name("MEM_COPY"), Some(1));
        assert_eq!(reg.find_by_name("gone"), None);
        assert_eq!(reg.find_by_id(2), Some(1));
        assert_eq!(reg.find_by_id(9), None);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        assert!(Registry::new(vec![spec(1, "cpu"), spec(1, "vm")]).is_err());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        assert!(Registry::new(vec![spec(1, "mem_copy"), spec(2, "mem-copy")]).is_err());
    }

    #[test]
    fn test_munged_name() {
        assert_eq!(spec(1, "cpu_cache").munged_name(), "cpu-cache");
    }
}
