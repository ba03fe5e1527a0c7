//! Run-plan construction
//!
//! Turns selection inputs (explicit names, class filters, random-N,
//! multi-select modes, exclusions) into an ordered run list of
//! (stressor, instance count, ops budget) entries with ignore flags.
//!
//! The rules apply in a fixed order so a pinned seed reproduces the same
//! list byte for byte.

use crate::class::Class;
use crate::config::{SelectionMode, Settings};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::rng::HarnessRng;
use crate::system;

/// Why an entry is not allowed to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IgnoreReason {
    /// Entry may run
    #[default]
    NotIgnored,
    /// The module's `supported` probe failed on this system
    Unsupported,
    /// Excluded by the user or the pathological gate
    Excluded,
}

/// Terminal status tallies for one entry
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCounts {
    /// Instances that exited with success
    pub passed: u32,
    /// Instances skipped at runtime (no resources / not implemented)
    pub skipped: u32,
    /// Instances that failed
    pub failed: u32,
    /// Instances whose metrics were flagged untrustworthy
    pub bad_metrics: u32,
}

/// One row of the run list: a stressor at a chosen multiplicity
#[derive(Debug)]
pub struct RunEntry {
    /// Index of the descriptor in the registry
    pub spec_idx: usize,
    /// Number of instances to fork; already resolved through the CPU-count
    /// conventions
    pub instances: i32,
    /// Per-instance bogo-ops budget; 0 runs to the deadline
    pub ops_budget: u64,
    /// Whether this entry may run at all
    pub ignore_run: IgnoreReason,
    /// Whether this entry sits out the current permutation
    pub ignore_permute: bool,
    /// First stats/checksum slot owned by this entry
    pub stats_offset: usize,
    /// Exit status tallies filled during reaping
    pub status: StatusCounts,
    /// Instances that completed, filled during aggregation
    pub completed_instances: u32,
}

impl RunEntry {
    fn new(spec_idx: usize, instances: i32) -> Self {
        Self {
            spec_idx,
            instances,
            ops_budget: 0,
            ignore_run: IgnoreReason::NotIgnored,
            ignore_permute: false,
            stats_offset: 0,
            status: StatusCounts::default(),
            completed_instances: 0,
        }
    }

    /// True when this entry will fork children (ignoring permute state)
    pub fn runnable(&self) -> bool {
        self.ignore_run == IgnoreReason::NotIgnored && self.instances > 0
    }
}

/// The ordered run list
#[derive(Debug, Default)]
pub struct RunList {
    /// Entries in selection order
    pub entries: Vec<RunEntry>,
}

impl RunList {
    fn find_entry(&mut self, spec_idx: usize) -> Option<&mut RunEntry> {
        self.entries.iter_mut().find(|e| e.spec_idx == spec_idx)
    }

    /// Total instances across runnable entries; sizes the shared plane
    pub fn total_instances(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.runnable())
            .map(|e| e.instances as usize)
            .sum()
    }

    /// Number of runnable entries
    pub fn runnable_count(&self) -> usize {
        self.entries.iter().filter(|e| e.runnable()).count()
    }

    /// Assign each runnable entry its contiguous slice of stats slots
    pub fn assign_stats_slots(&mut self) {
        let mut offset = 0usize;
        for entry in self.entries.iter_mut() {
            if entry.runnable() {
                entry.stats_offset = offset;
                offset += entry.instances as usize;
            }
        }
    }

    /// Clear every permute flag
    pub fn clear_permute_flags(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.ignore_permute = false;
        }
    }
}

/// Build the run list from the settings, applying the selection rules in
/// order
pub fn build(registry: &Registry, settings: &Settings, rng: &mut HarnessRng) -> Result<RunList> {
    let mut list = RunList::default();
    let mut unsupported_dropped = 0u32;
    let mut excluded_dropped = 0u32;

    // 1. Seed from explicit mentions
    for (name, count) in &settings.explicit {
        let spec_idx = registry
            .find_by_name(name)
            .ok_or_else(|| Error::UnknownStressor {
                name: name.clone(),
                valid: registry.valid_names(),
            })?;
        let instances = system::apply_count_convention(*count);
        match list.find_entry(spec_idx) {
            Some(entry) => entry.instances = instances,
            None => list.entries.push(RunEntry::new(spec_idx, instances)),
        }
    }

    match settings.mode {
        // 2. Random-N spreads N instances over the whole catalog
        SelectionMode::Random(n) => {
            let total = system::apply_count_convention(n);
            for spec_idx in 0..registry.len() {
                list.entries.push(RunEntry::new(spec_idx, 0));
            }
            if list.entries.is_empty() {
                return Err(Error::Plan(
                    "no stressors are available, unable to continue".into(),
                ));
            }
            for _ in 0..total {
                let pick = rng.below(list.entries.len() as u32) as usize;
                list.entries[pick].instances += 1;
            }
        }
        // 3. Multi-select modes enable the with-subset or the whole catalog
        SelectionMode::All(n) | SelectionMode::Sequential(n) | SelectionMode::Permute(n) => {
            let instances = system::apply_count_convention(n);
            if settings.with.is_empty() {
                for spec_idx in 0..registry.len() {
                    if list.find_entry(spec_idx).is_none() {
                        list.entries.push(RunEntry::new(spec_idx, instances));
                    }
                }
            } else {
                for name in &settings.with {
                    let spec_idx =
                        registry
                            .find_by_name(name)
                            .ok_or_else(|| Error::UnknownStressor {
                                name: name.clone(),
                                valid: registry.valid_names(),
                            })?;
                    match list.find_entry(spec_idx) {
                        Some(entry) => entry.instances = instances,
                        None => list.entries.push(RunEntry::new(spec_idx, instances)),
                    }
                }
            }
        }
        SelectionMode::Explicit => {}
    }

    // Bind per-stressor ops budgets to their entries
    for (name, ops) in &settings.ops_budgets {
        let spec_idx = registry
            .find_by_name(name)
            .ok_or_else(|| Error::UnknownStressor {
                name: name.clone(),
                valid: registry.valid_names(),
            })?;
        if let Some(entry) = list.find_entry(spec_idx) {
            entry.ops_budget = *ops;
        }
    }

    // 4. Class filter: entries outside the filter stay listed at zero
    // instances
    if let Some(filter) = settings.class_filter {
        for entry in list.entries.iter_mut() {
            let class = registry.specs()[entry.spec_idx].class;
            if (class & filter).is_empty() {
                entry.instances = 0;
            }
        }
    }

    // 5. Probe module support
    for entry in list.entries.iter_mut() {
        if entry.ignore_run != IgnoreReason::NotIgnored || entry.instances == 0 {
            continue;
        }
        let spec = &registry.specs()[entry.spec_idx];
        if !spec.module.supported(spec.name) {
            tracing::warn!(stressor = %spec.munged_name(), "not supported on this system");
            entry.ignore_run = IgnoreReason::Unsupported;
            unsupported_dropped += 1;
        }
    }

    // 6. Gate pathological workloads unless explicitly allowed
    if !settings.pathological {
        for entry in list.entries.iter_mut() {
            let spec = &registry.specs()[entry.spec_idx];
            if entry.ignore_run == IgnoreReason::NotIgnored
                && spec.class.contains(Class::PATHOLOGICAL)
            {
                if entry.instances > 0 {
                    tracing::info!(
                        stressor = %spec.munged_name(),
                        "disabled as it may hang or reboot the machine (enable it with the --pathological option)"
                    );
                    excluded_dropped += 1;
                }
                entry.ignore_run = IgnoreReason::Excluded;
            }
        }
    }

    // 7. User exclusions
    for name in &settings.exclude {
        let spec_idx = registry
            .find_by_name(name)
            .ok_or_else(|| Error::UnknownStressor {
                name: name.clone(),
                valid: registry.valid_names(),
            })?;
        for entry in list.entries.iter_mut() {
            if entry.spec_idx == spec_idx && entry.ignore_run == IgnoreReason::NotIgnored {
                if entry.instances > 0 {
                    excluded_dropped += 1;
                }
                entry.ignore_run = IgnoreReason::Excluded;
            }
        }
    }

    // Parallel modes share an entry's ops budget across its instances,
    // rounding up; sequential and permute runs keep the full budget per
    // round
    if !matches!(
        settings.mode,
        SelectionMode::Sequential(_) | SelectionMode::Permute(_)
    ) {
        for entry in list.entries.iter_mut() {
            if entry.instances > 0 && entry.ops_budget > 0 {
                let n = entry.instances as u64;
                entry.ops_budget = entry.ops_budget.div_ceil(n);
            }
        }
    }

    if list.runnable_count() == 0 {
        return Err(Error::NothingToRun {
            unsupported_only: unsupported_dropped > 0 && excluded_dropped == 0,
        });
    }

    list.assign_stats_slots();
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::ExitStatus;
    use crate::registry::{StressorArgs, StressorModule, StressorSpec, VerifyMode};

    struct TestModule {
        supported: bool,
    }

    impl StressorModule for TestModule {
        fn supported(&self, _name: &str) -> bool {
            self.supported
        }
        fn run(&self, _args: &mut StressorArgs<'_>) -> ExitStatus {
            ExitStatus::Success
        }
    }

    static OK_MODULE: TestModule = TestModule { supported: true };
    static BAD_MODULE: TestModule = TestModule { supported: false };

    fn spec(
        id: u32,
        name: &'static str,
        class: Class,
        module: &'static TestModule,
    ) -> StressorSpec {
        StressorSpec {
            id,
            name,
            class,
            verify: VerifyMode::None,
            short_opt: None,
            module,
        }
    }

    fn test_registry() -> Registry {
        Registry::new(vec![
            spec(1, "cpu", Class::CPU, &OK_MODULE),
            spec(2, "vm", Class::VM | Class::MEMORY, &OK_MODULE),
            spec(3, "pipe", Class::PIPE_IO, &OK_MODULE),
            spec(4, "gpu_burn", Class::GPU, &BAD_MODULE),
            spec(5, "pagemove", Class::VM | Class::PATHOLOGICAL, &OK_MODULE),
        ])
        .unwrap()
    }

    fn build_with(settings: &Settings, seed: u64) -> Result<RunList> {
        let registry = test_registry();
        let mut rng = HarnessRng::from_seed(seed);
        build(&registry, settings, &mut rng)
    }

    #[test]
    fn test_explicit_entries() {
        let settings = Settings {
            explicit: vec![("cpu".into(), 2), ("vm".into(), 1)],
            ..Default::default()
        };
        let list = build_with(&settings, 0).unwrap();
        assert_eq!(list.entries.len(), 2);
        assert_eq!(list.entries[0].instances, 2);
        assert_eq!(list.entries[1].instances, 1);
        assert_eq!(list.total_instances(), 3);
        assert_eq!(list.entries[0].stats_offset, 0);
        assert_eq!(list.entries[1].stats_offset, 2);
    }

    #[test]
    fn test_unknown_explicit_name_fails_with_listing() {
        let settings = Settings {
            explicit: vec![("cpuu".into(), 2)],
            ..Default::default()
        };
        match build_with(&settings, 0) {
            Err(Error::UnknownStressor { name, valid }) => {
                assert_eq!(name, "cpuu");
                assert!(valid.contains("pipe"));
            }
            other => panic!("expected UnknownStressor, got {other:?}"),
        }
    }

    #[test]
    fn test_random_n_total_instances() {
        for seed in 0..16 {
            let settings = Settings {
                mode: SelectionMode::Random(7),
                ..Default::default()
            };
            let list = build_with(&settings, seed).unwrap();
            let sum: i32 = list.entries.iter().map(|e| e.instances).sum();
            assert_eq!(sum, 7, "seed {seed}");
        }
    }

    #[test]
    fn test_plan_deterministic_for_seed() {
        let settings = Settings {
            mode: SelectionMode::Random(5),
            ..Default::default()
        };
        let a = build_with(&settings, 99).unwrap();
        let b = build_with(&settings, 99).unwrap();
        assert_eq!(a.entries.len(), b.entries.len());
        for (ea, eb) in a.entries.iter().zip(b.entries.iter()) {
            assert_eq!(ea.spec_idx, eb.spec_idx);
            assert_eq!(ea.instances, eb.instances);
            assert_eq!(ea.ignore_run, eb.ignore_run);
        }
    }

    #[test]
    fn test_all_mode_enables_catalog() {
        let settings = Settings {
            mode: SelectionMode::All(2),
            ..Default::default()
        };
        let list = build_with(&settings, 0).unwrap();
        assert_eq!(list.entries.len(), 5);
        // gpu_burn unsupported, pagemove pathological
        assert_eq!(list.runnable_count(), 3);
        let gpu = list.entries.iter().find(|e| e.spec_idx == 3).unwrap();
        assert_eq!(gpu.ignore_run, IgnoreReason::Unsupported);
        let patho = list.entries.iter().find(|e| e.spec_idx == 4).unwrap();
        assert_eq!(patho.ignore_run, IgnoreReason::Excluded);
    }

    #[test]
    fn test_pathological_opt_in() {
        let settings = Settings {
            mode: SelectionMode::All(1),
            pathological: true,
            ..Default::default()
        };
        let list = build_with(&settings, 0).unwrap();
        let patho = list.entries.iter().find(|e| e.spec_idx == 4).unwrap();
        assert_eq!(patho.ignore_run, IgnoreReason::NotIgnored);
    }

    #[test]
    fn test_class_filter_zeroes_non_members() {
        let settings = Settings {
            mode: SelectionMode::All(2),
            class_filter: Some(Class::VM),
            ..Default::default()
        };
        let list = build_with(&settings, 0).unwrap();
        let cpu = list.entries.iter().find(|e| e.spec_idx == 0).unwrap();
        assert_eq!(cpu.instances, 0);
        assert_eq!(cpu.ignore_run, IgnoreReason::NotIgnored);
        let vm = list.entries.iter().find(|e| e.spec_idx == 1).unwrap();
        assert_eq!(vm.instances, 2);
    }

    #[test]
    fn test_with_list_restricts_selection() {
        let settings = Settings {
            mode: SelectionMode::All(3),
            with: vec!["cpu".into(), "pipe".into()],
            ..Default::default()
        };
        let list = build_with(&settings, 0).unwrap();
        assert_eq!(list.entries.len(), 2);
        assert!(list.entries.iter().all(|e| e.instances == 3));
    }

    #[test]
    fn test_exclude_marks_entries() {
        let settings = Settings {
            mode: SelectionMode::All(1),
            exclude: vec!["pipe".into()],
            ..Default::default()
        };
        let list = build_with(&settings, 0).unwrap();
        let pipe = list.entries.iter().find(|e| e.spec_idx == 2).unwrap();
        assert_eq!(pipe.ignore_run, IgnoreReason::Excluded);
    }

    #[test]
    fn test_exclude_unknown_name_fails() {
        let settings = Settings {
            mode: SelectionMode::All(1),
            exclude: vec!["nonesuch".into()],
            ..Default::default()
        };
        assert!(matches!(
            build_with(&settings, 0),
            Err(Error::UnknownStressor { .. })
        ));
    }

    #[test]
    fn test_nothing_runnable_unsupported_only() {
        let settings = Settings {
            explicit: vec![("gpu-burn".into(), 2)],
            ..Default::default()
        };
        match build_with(&settings, 0) {
            Err(Error::NothingToRun { unsupported_only }) => assert!(unsupported_only),
            other => panic!("expected NothingToRun, got {other:?}"),
        }
    }

    #[test]
    fn test_nothing_runnable_excluded_is_failure() {
        let settings = Settings {
            explicit: vec![("cpu".into(), 2)],
            exclude: vec!["cpu".into()],
            ..Default::default()
        };
        match build_with(&settings, 0) {
            Err(Error::NothingToRun { unsupported_only }) => assert!(!unsupported_only),
            other => panic!("expected NothingToRun, got {other:?}"),
        }
    }

    #[test]
    fn test_parallel_ops_budget_split() {
        let settings = Settings {
            explicit: vec![("cpu".into(), 3)],
            ops_budgets: vec![("cpu".into(), 10)],
            ..Default::default()
        };
        let list = build_with(&settings, 0).unwrap();
        // 10 ops over 3 instances, rounded up
        assert_eq!(list.entries[0].ops_budget, 4);
    }

    #[test]
    fn test_sequential_ops_budget_not_split() {
        let settings = Settings {
            mode: SelectionMode::Sequential(3),
            with: vec!["cpu".into()],
            ops_budgets: vec![("cpu".into(), 10)],
            ..Default::default()
        };
        let list = build_with(&settings, 0).unwrap();
        assert_eq!(list.entries[0].ops_budget, 10);
    }

    #[test]
    fn test_count_conventions_resolved() {
        let settings = Settings {
            explicit: vec![("cpu".into(), 0), ("vm".into(), -1)],
            ..Default::default()
        };
        let list = build_with(&settings, 0).unwrap();
        assert_eq!(list.entries[0].instances, system::processors_configured());
        assert_eq!(list.entries[1].instances, system::processors_online());
    }
}
