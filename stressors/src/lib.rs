//! Built-in workload modules for bogobench
//!
//! Each module implements the core's stressor interface: a `run` body that
//! hammers one subsystem while bumping its bogo-op counter, plus the
//! lifecycle hooks the planner calls around it. The catalog here is what
//! the planner selects from.

#![warn(clippy::all)]

mod cpu;
mod hdd;
mod memcpy;
mod null;
mod pagemove;
mod pipe;
mod vm;
mod yield_;

use bogobench_core::registry::Registry;

/// The full built-in catalog, in listing order
pub fn catalog() -> Registry {
    Registry::new(vec![
        cpu::spec(),
        hdd::spec(),
        memcpy::spec(),
        null::spec(),
        pagemove::spec(),
        pipe::spec(),
        vm::spec(),
        yield_::spec(),
    ])
    .expect("catalog descriptors are unique")
}

#[cfg(test)]
pub(crate) mod testutil {
    use bogobench_core::registry::{StressorArgs, StressorModule};
    use bogobench_core::shared::header::MappedPages;
    use bogobench_core::shared::stats::StatsRecord;
    use bogobench_core::signal;

    /// Drive a module with a small ops budget and return the final counter
    /// state and exit status
    pub fn run_with_budget(
        module: &dyn StressorModule,
        max_ops: u64,
        verify: bool,
    ) -> (u64, bool, bogobench_core::exit::ExitStatus) {
        signal::set_continue(true);
        let mut stats: StatsRecord = unsafe { std::mem::zeroed() };
        stats.ci.counter_ready = true;
        let mapped = MappedPages::default();
        let pid = unsafe { libc::getpid() };

        let rc = {
            let mut args = StressorArgs {
                ci: &mut stats.ci,
                name: "test",
                max_ops,
                instance: 0,
                num_instances: 1,
                pid,
                page_size: bogobench_core::system::page_size(),
                time_end: bogobench_core::system::time_now() + 30.0,
                mapped: &mapped,
                metrics: &mut stats.metrics,
                verify,
            };
            module.run(&mut args)
        };
        (stats.ci.counter, stats.ci.counter_ready, rc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_builds() {
        let registry = catalog();
        assert!(registry.len() >= 8);
        assert!(registry.find_by_name("cpu").is_some());
        assert!(registry.find_by_name("vm").is_some());
    }

    #[test]
    fn test_catalog_has_a_pathological_entry() {
        use bogobench_core::class::Class;
        let registry = catalog();
        assert!(registry
            .specs()
            .iter()
            .any(|s| s.class.contains(Class::PATHOLOGICAL)));
    }

    #[test]
    fn test_catalog_classes_nonempty() {
        let registry = catalog();
        for spec in registry.specs() {
            assert!(!spec.class.is_empty(), "{} has no class", spec.name);
        }
    }
}
