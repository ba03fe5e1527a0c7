//! Run configuration
//!
//! [`Settings`] captures everything the planner and the fleet scheduler
//! need: which stressors to run, how many, under which policy, and the
//! global behavior flags.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::class::Class;
use crate::error::{Error, Result};

/// Default overall timeout: one day
pub const DEFAULT_TIMEOUT_SECS: u64 = 60 * 60 * 24;

/// Default per-entry timeout in sequential mode
pub const DEFAULT_SEQUENTIAL_TIMEOUT_SECS: u64 = 60;

/// Seed used with `--no-rand-seed`
pub const FIXED_SEED: u64 = 0xbb0_60b5;

/// How the run list is selected and scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Only explicitly named stressors, all instances in parallel
    Explicit,
    /// Every catalog entry (or the `--with` subset) at N instances, in parallel
    All(i32),
    /// Every catalog entry (or the `--with` subset) at N instances, one entry at a time
    Sequential(i32),
    /// Subsets of up to 16 runnable entries at N instances, one subset at a time
    Permute(i32),
    /// N instances spread over randomly chosen stressors
    Random(i32),
}

impl SelectionMode {
    /// True for the modes that enable multiple catalog entries at once
    pub fn is_multi_select(self) -> bool {
        matches!(
            self,
            SelectionMode::All(_) | SelectionMode::Sequential(_) | SelectionMode::Permute(_)
        )
    }
}

/// Full run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Selection and scheduling mode
    pub mode: SelectionMode,

    /// Explicitly requested stressors: (name, instance count)
    pub explicit: Vec<(String, i32)>,

    /// Per-stressor bogo-op budgets: (name, ops); 0 means run to deadline
    pub ops_budgets: Vec<(String, u64)>,

    /// Stressor-specific options as (option, value) pairs, resolved
    /// against the modules' option setters
    pub module_options: Vec<(String, String)>,

    /// Restrict multi-select modes to these classes
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub class_filter: Option<Class>,

    /// Stressors that must not run
    pub exclude: Vec<String>,

    /// Restrict multi-select modes to these stressors
    pub with: Vec<String>,

    /// Overall wall-clock budget in seconds; None picks the mode default
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timeout: Option<u64>,

    /// Per-instance staggered start delay in microseconds
    pub backoff_us: u64,

    /// Abort the whole fleet when any worker fails
    pub abort: bool,

    /// Churn child CPU affinities while waiting
    pub aggressive: bool,

    /// Emit the metrics table and YAML metrics blocks
    pub metrics: bool,

    /// Only emit metrics rows with non-zero counters
    pub metrics_brief: bool,

    /// Enable optional result verification in workloads
    pub verify: bool,

    /// Allow pathological-class stressors to run
    pub pathological: bool,

    /// Plan and fork but skip the workload bodies
    pub dry_run: bool,

    /// Keep the parent's process name in children
    pub keep_name: bool,

    /// Leave workload temporary files behind
    pub keep_files: bool,

    /// Emit the end-of-run CPU time and load average summary
    pub times: bool,

    /// Pin the PRNG seed
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub seed: Option<u64>,

    /// Use the fixed default seed instead of entropy
    pub no_rand_seed: bool,

    /// Use maximal stressor option defaults
    pub maximize: bool,

    /// Use minimal stressor option defaults
    pub minimize: bool,

    /// YAML results file
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub yaml_path: Option<PathBuf>,

    /// Directory for workload temporary files
    pub temp_path: PathBuf,

    /// I/O scheduling class for workers (best effort)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ionice_class: Option<i32>,

    /// I/O scheduling priority level for workers (best effort)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ionice_level: Option<i32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: SelectionMode::Explicit,
            explicit: Vec::new(),
            ops_budgets: Vec::new(),
            module_options: Vec::new(),
            class_filter: None,
            exclude: Vec::new(),
            with: Vec::new(),
            timeout: None,
            backoff_us: 0,
            abort: false,
            aggressive: false,
            metrics: false,
            metrics_brief: false,
            verify: false,
            pathological: false,
            dry_run: false,
            keep_name: false,
            keep_files: false,
            times: false,
            seed: None,
            no_rand_seed: false,
            maximize: false,
            minimize: false,
            yaml_path: None,
            temp_path: PathBuf::from("."),
            ionice_class: None,
            ionice_level: None,
        }
    }
}

impl Settings {
    /// The effective overall timeout for this mode, in seconds
    pub fn effective_timeout(&self) -> u64 {
        match self.timeout {
            Some(t) => t,
            None => match self.mode {
                SelectionMode::Sequential(_) => DEFAULT_SEQUENTIAL_TIMEOUT_SECS,
                _ => DEFAULT_TIMEOUT_SECS,
            },
        }
    }

    /// The PRNG seed to use for this run
    pub fn effective_seed(&self) -> Option<u64> {
        if let Some(seed) = self.seed {
            Some(seed)
        } else if self.no_rand_seed {
            Some(FIXED_SEED)
        } else {
            None
        }
    }

    /// Validate option combinations
    pub fn validate(&self) -> Result<()> {
        if let SelectionMode::Random(_) = self.mode {
            if !self.explicit.is_empty() {
                return Err(Error::Plan(
                    "cannot specify the random option with other stressors selected".into(),
                ));
            }
        }

        if self.class_filter.is_some() && !self.mode.is_multi_select() {
            return Err(Error::Plan(
                "the class option is only used with the sequential, all or permute options"
                    .into(),
            ));
        }

        if !self.with.is_empty() && !self.mode.is_multi_select() {
            return Err(Error::Plan(
                "the with option also requires the sequential, all or permute options".into(),
            ));
        }

        if self.seed.is_some() && self.no_rand_seed {
            return Err(Error::Plan(
                "cannot invoke mutually exclusive seed and no-rand-seed options together".into(),
            ));
        }

        if self.maximize && self.minimize {
            return Err(Error::Plan(
                "maximize and minimize cannot be used together".into(),
            ));
        }

        for (_, n) in &self.explicit {
            // 0 and negatives are CPU-count conventions, anything larger
            // must be a sane instance count
            if *n > 1_000_000 {
                return Err(Error::Plan(format!("too many instances requested: {n}")));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_random_with_explicit_rejected() {
        let s = Settings {
            mode: SelectionMode::Random(4),
            explicit: vec![("cpu".into(), 2)],
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_class_requires_multi_select() {
        let s = Settings {
            class_filter: Some(Class::CPU),
            ..Default::default()
        };
        assert!(s.validate().is_err());

        let s = Settings {
            mode: SelectionMode::All(2),
            class_filter: Some(Class::CPU),
            ..Default::default()
        };
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_with_requires_multi_select() {
        let s = Settings {
            with: vec!["cpu".into()],
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_seed_conflict() {
        let s = Settings {
            seed: Some(7),
            no_rand_seed: true,
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_effective_timeout_defaults() {
        let s = Settings::default();
        assert_eq!(s.effective_timeout(), DEFAULT_TIMEOUT_SECS);

        let s = Settings {
            mode: SelectionMode::Sequential(1),
            ..Default::default()
        };
        assert_eq!(s.effective_timeout(), DEFAULT_SEQUENTIAL_TIMEOUT_SECS);

        let s = Settings {
            timeout: Some(5),
            ..Default::default()
        };
        assert_eq!(s.effective_timeout(), 5);
    }

    #[test]
    fn test_settings_serialization_round_trip() {
        let settings = Settings {
            mode: SelectionMode::All(4),
            explicit: vec![("cpu".into(), 2)],
            class_filter: Some(Class::CPU | Class::VM),
            timeout: Some(30),
            ..Default::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mode, SelectionMode::All(4));
        assert_eq!(back.explicit, vec![("cpu".to_string(), 2)]);
        assert_eq!(back.class_filter, Some(Class::CPU | Class::VM));
        assert_eq!(back.timeout, Some(30));
    }

    #[test]
    fn test_effective_seed() {
        let s = Settings {
            seed: Some(42),
            ..Default::default()
        };
        assert_eq!(s.effective_seed(), Some(42));

        let s = Settings {
            no_rand_seed: true,
            ..Default::default()
        };
        assert_eq!(s.effective_seed(), Some(FIXED_SEED));

        assert_eq!(Settings::default().effective_seed(), None);
    }
}
