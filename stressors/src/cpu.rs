//! CPU compute workload: floating point square-root sweeps

use bogobench_core::class::Class;
use bogobench_core::exit::ExitStatus;
use bogobench_core::registry::{Help, StressorArgs, StressorModule, StressorSpec, VerifyMode};

/// Square roots summed per bogo-op
const SWEEP: u32 = 16_384;

struct Cpu;

static CPU: Cpu = Cpu;

static HELP: &[Help] = &[Help {
    opt_short: Some("c N"),
    opt_long: "cpu N",
    description: "start N workers exercising the CPU with square root sweeps",
}];

fn sweep(base: u32) -> f64 {
    let mut sum = 0.0f64;
    for i in 1..=SWEEP {
        sum += f64::from(base.wrapping_add(i)).sqrt();
    }
    sum
}

impl StressorModule for Cpu {
    fn run(&self, args: &mut StressorArgs<'_>) -> ExitStatus {
        let mut ops = 0u64;
        while args.continue_running() {
            let base = (ops & 0xff) as u32;
            let sum = sweep(base);

            if args.verify {
                let check = sweep(base);
                if (sum - check).abs() > sum * 1e-12 {
                    tracing::error!(sum, check, "square root sweep mismatch");
                    return ExitStatus::NotSuccess;
                }
            }
            ops += 1;
            args.bogo_inc();
        }
        args.set_metric(0, "square root ops per bogo op", f64::from(SWEEP));
        ExitStatus::Success
    }

    fn help(&self) -> &'static [Help] {
        HELP
    }
}

pub fn spec() -> StressorSpec {
    StressorSpec {
        id: 1,
        name: "cpu",
        class: Class::CPU,
        verify: VerifyMode::Optional,
        short_opt: Some('c'),
        module: &CPU,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::run_with_budget;

    #[test]
    fn test_counter_reaches_budget() {
        let (counter, ready, rc) = run_with_budget(&CPU, 5, false);
        assert_eq!(counter, 5);
        assert!(ready);
        assert_eq!(rc, ExitStatus::Success);
    }

    #[test]
    fn test_verify_passes() {
        let (_, _, rc) = run_with_budget(&CPU, 3, true);
        assert_eq!(rc, ExitStatus::Success);
    }
}
