//! Scheduler workload: tight sched_yield loops

use bogobench_core::class::Class;
use bogobench_core::exit::ExitStatus;
use bogobench_core::registry::{StressorArgs, StressorModule, StressorSpec, VerifyMode};

struct Yield;

static YIELD: Yield = Yield;

impl StressorModule for Yield {
    fn run(&self, args: &mut StressorArgs<'_>) -> ExitStatus {
        while args.continue_running() {
            unsafe {
                libc::sched_yield();
            }
            args.bogo_inc();
        }
        ExitStatus::Success
    }
}

pub fn spec() -> StressorSpec {
    StressorSpec {
        id: 8,
        name: "yield",
        class: Class::SCHEDULER | Class::OS,
        verify: VerifyMode::None,
        short_opt: None,
        module: &YIELD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::run_with_budget;

    #[test]
    fn test_yields() {
        let (counter, _, rc) = run_with_budget(&YIELD, 32, false);
        assert_eq!(counter, 32);
        assert_eq!(rc, ExitStatus::Success);
    }
}
