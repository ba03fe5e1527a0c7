//! Interrupt-driven shutdown: SIGINT mid-run drains the whole fleet
#![cfg(unix)]

use std::sync::atomic::Ordering;
use std::time::Duration;

use bogobench_core::class::Class;
use bogobench_core::config::Settings;
use bogobench_core::exit::ExitStatus;
use bogobench_core::fleet::{RunOutcome, Scheduler};
use bogobench_core::plan;
use bogobench_core::registry::{Registry, StressorArgs, StressorModule, StressorSpec, VerifyMode};
use bogobench_core::rng::HarnessRng;
use bogobench_core::shared::SharedPlane;
use bogobench_core::signal;

/// Runs until told to stop; never meets an ops budget
struct BusyModule;

impl StressorModule for BusyModule {
    fn run(&self, args: &mut StressorArgs<'_>) -> ExitStatus {
        while args.continue_running() {
            args.bogo_inc();
            std::hint::spin_loop();
        }
        ExitStatus::Success
    }
}

static BUSY: BusyModule = BusyModule;

#[test]
fn sigint_drains_fleet() {
    let registry = Registry::new(vec![StressorSpec {
        id: 1,
        name: "busy",
        class: Class::CPU,
        verify: VerifyMode::None,
        short_opt: None,
        module: &BUSY,
    }])
    .unwrap();

    signal::set_main_pid(unsafe { libc::getpid() });
    signal::install_run_handlers(false).unwrap();
    signal::set_continue(true);

    let settings = Settings {
        explicit: vec![("busy".into(), 2)],
        timeout: Some(60),
        ..Default::default()
    };
    let mut rng = HarnessRng::from_seed(5);
    let mut list = plan::build(&registry, &settings, &mut rng).unwrap();

    let plane = SharedPlane::create(list.total_instances()).unwrap();
    signal::register_shared(
        plane.header() as *const _ as *mut _,
        plane.stats_base(),
        plane.num_slots(),
    );

    // Interrupt ourselves shortly after the fleet is airborne
    let poker = std::thread::spawn(|| {
        std::thread::sleep(Duration::from_millis(400));
        unsafe {
            libc::kill(libc::getpid(), libc::SIGINT);
        }
    });

    let mut outcome = RunOutcome::default();
    let mut scheduler = Scheduler::new(&registry, &settings, &plane, HarnessRng::from_seed(6));
    scheduler.run_parallel(&mut list, &mut outcome);
    signal::set_alarm(0);
    poker.join().unwrap();

    // The interrupt was noted and every worker was signalled, returned
    // from its workload, and got reaped
    assert!(plane.header().caught_sigint.load(Ordering::Relaxed));
    let (started, exited, reaped, _failed, _alarmed) = plane.header().instance_count.snapshot();
    assert_eq!(started, 2);
    assert_eq!(exited, 2);
    assert_eq!(reaped, 2);

    for idx in 0..2 {
        let stats = plane.stats(idx);
        assert_eq!(stats.pid.load(Ordering::Relaxed), 0, "worker reaped");
        assert!(stats.completed);
        assert!(stats.ci.counter > 0, "workload made progress before stopping");
    }

    // Workloads returned success after the cooperative stop
    assert_eq!(list.entries[0].status.passed, 2);

    signal::clear_shared();
    signal::set_continue(true);
}
