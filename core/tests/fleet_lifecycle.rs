//! End-to-end fleet lifecycle: fork fan-out, reap, accounting, integrity
#![cfg(unix)]

use std::sync::atomic::Ordering;

use bogobench_core::class::Class;
use bogobench_core::config::Settings;
use bogobench_core::exit::ExitStatus;
use bogobench_core::fleet::{RunOutcome, Scheduler};
use bogobench_core::metrics;
use bogobench_core::plan;
use bogobench_core::registry::{Registry, StressorArgs, StressorModule, StressorSpec, VerifyMode};
use bogobench_core::rng::HarnessRng;
use bogobench_core::shared::SharedPlane;
use bogobench_core::signal;

/// Spins the bogo counter until the budget or deadline stops it
struct CountingModule;

impl StressorModule for CountingModule {
    fn run(&self, args: &mut StressorArgs<'_>) -> ExitStatus {
        while args.continue_running() {
            args.bogo_inc();
        }
        args.set_metric(0, "loop iterations per op", 1.0);
        ExitStatus::Success
    }
}

/// Fails immediately
struct FailingModule;

impl StressorModule for FailingModule {
    fn run(&self, args: &mut StressorArgs<'_>) -> ExitStatus {
        args.bogo_inc();
        ExitStatus::NotSuccess
    }
}

static COUNTING: CountingModule = CountingModule;
static FAILING: FailingModule = FailingModule;

fn registry() -> Registry {
    Registry::new(vec![
        StressorSpec {
            id: 1,
            name: "spin",
            class: Class::CPU,
            verify: VerifyMode::None,
            short_opt: None,
            module: &COUNTING,
        },
        StressorSpec {
            id: 2,
            name: "flaky",
            class: Class::CPU,
            verify: VerifyMode::None,
            short_opt: None,
            module: &FAILING,
        },
    ])
    .unwrap()
}

#[test]
fn fleet_lifecycle_accounting_and_integrity() {
    let registry = registry();
    signal::set_main_pid(unsafe { libc::getpid() });
    // Cover the window before the scheduler re-installs them post-fan-out
    signal::install_run_handlers(false).unwrap();

    // --- Parallel: two instances of the counting workload with a small
    // ops budget fork, run, and reap cleanly ---
    {
        signal::set_continue(true);
        let settings = Settings {
            explicit: vec![("spin".into(), 2)],
            ops_budgets: vec![("spin".into(), 10_000)],
            timeout: Some(30),
            ..Default::default()
        };
        settings.validate().unwrap();

        let mut rng = HarnessRng::from_seed(1);
        let mut list = plan::build(&registry, &settings, &mut rng).unwrap();
        assert_eq!(list.total_instances(), 2);
        // Parallel mode splits the 10k budget across the two instances
        assert_eq!(list.entries[0].ops_budget, 5_000);

        let plane = SharedPlane::create(list.total_instances()).unwrap();
        signal::register_shared(
            plane.header() as *const _ as *mut _,
            plane.stats_base(),
            plane.num_slots(),
        );

        let mut outcome = RunOutcome::default();
        let mut scheduler = Scheduler::new(&registry, &settings, &plane, HarnessRng::from_seed(2));
        scheduler.run_parallel(&mut list, &mut outcome);
        signal::set_alarm(0);

        let (started, exited, reaped, failed, _alarmed) =
            plane.header().instance_count.snapshot();
        assert_eq!(started, 2);
        assert_eq!(exited, 2);
        assert_eq!(reaped, 2);
        assert_eq!(failed, 0);

        for idx in 0..2 {
            let stats = plane.stats(idx);
            assert!(stats.completed);
            assert!(stats.ci.run_ok);
            assert_eq!(stats.ci.counter, 5_000);
            assert_eq!(stats.pid.load(Ordering::Relaxed), 0, "slot reaped");
        }
        assert_eq!(list.entries[0].status.passed, 2);
        assert!(outcome.success);
        assert!(outcome.resource_success);
        assert!(outcome.metrics_success);

        // The parent's independent re-hash agrees with the workers
        let mut success = true;
        metrics::verify_counters(&registry, &list, &plane, &mut success);
        assert!(success);

        let collected = metrics::collect(&registry, &mut list, &plane);
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].bogo_ops, 10_000);
        assert_eq!(collected[0].completed_instances, 2);
        assert_eq!(collected[0].aux.len(), 1);

        signal::clear_shared();
    }

    // --- Sequential with --abort: a failing first entry stops the walk
    // before the second entry forks anything ---
    {
        signal::set_continue(true);
        let settings = Settings {
            mode: bogobench_core::config::SelectionMode::Sequential(1),
            with: vec!["flaky".into(), "spin".into()],
            ops_budgets: vec![("spin".into(), 1_000)],
            timeout: Some(5),
            abort: true,
            ..Default::default()
        };
        settings.validate().unwrap();

        let mut rng = HarnessRng::from_seed(3);
        let mut list = plan::build(&registry, &settings, &mut rng).unwrap();
        assert_eq!(list.entries.len(), 2);
        assert_eq!(list.total_instances(), 2);

        let plane = SharedPlane::create(list.total_instances()).unwrap();
        signal::register_shared(
            plane.header() as *const _ as *mut _,
            plane.stats_base(),
            plane.num_slots(),
        );

        let mut outcome = RunOutcome::default();
        let mut scheduler = Scheduler::new(&registry, &settings, &plane, HarnessRng::from_seed(4));
        scheduler.run_sequential(&mut list, &mut outcome);
        signal::set_alarm(0);

        assert!(!outcome.success);
        // The failing entry ran; the abort stopped the second entry cold
        let spin_entry = list
            .entries
            .iter()
            .find(|e| registry.specs()[e.spec_idx].name == "spin")
            .unwrap();
        assert_eq!(spin_entry.status.passed, 0);
        let spin_slot = plane.stats(spin_entry.stats_offset);
        assert!(!spin_slot.completed, "second entry must not have run");
        // Ignore flags are untouched by the abort
        assert_eq!(
            spin_entry.ignore_run,
            bogobench_core::plan::IgnoreReason::NotIgnored
        );

        let (started, _exited, reaped, _failed, _alarmed) =
            plane.header().instance_count.snapshot();
        assert_eq!(started, 1, "only the failing entry started");
        assert_eq!(reaped, 1);

        signal::clear_shared();
        signal::set_continue(true);
    }
}
