//! Memory copy workload with always-on integrity verification

use bogobench_core::class::Class;
use bogobench_core::exit::ExitStatus;
use bogobench_core::registry::{StressorArgs, StressorModule, StressorSpec, VerifyMode};
use bogobench_core::shared::checksum::jenkins_hash;

const BUF_LEN: usize = 2048;

struct MemCopy;

static MEM_COPY: MemCopy = MemCopy;

impl StressorModule for MemCopy {
    fn run(&self, args: &mut StressorArgs<'_>) -> ExitStatus {
        let mut src = [0u8; BUF_LEN];
        let mut dst = [0u8; BUF_LEN];
        let mut seed = args.pid as u8 ^ args.instance as u8;

        while args.continue_running() {
            for (i, b) in src.iter_mut().enumerate() {
                *b = seed.wrapping_add(i as u8);
            }
            let expected = jenkins_hash(&src);

            dst.copy_from_slice(&src);

            // Verification is always on for this workload; a copy that
            // changed bytes means the memory subsystem lied to us
            if jenkins_hash(&dst) != expected {
                tracing::error!("memory copy corrupted data");
                return ExitStatus::NotSuccess;
            }

            seed = seed.wrapping_add(1);
            args.bogo_inc();
        }

        args.set_metric(0, "bytes copied per bogo op", BUF_LEN as f64);
        ExitStatus::Success
    }
}

pub fn spec() -> StressorSpec {
    StressorSpec {
        id: 3,
        name: "memcpy",
        class: Class::CPU_CACHE | Class::MEMORY,
        verify: VerifyMode::Always,
        short_opt: None,
        module: &MEM_COPY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::run_with_budget;

    #[test]
    fn test_copies_and_verifies() {
        let (counter, ready, rc) = run_with_budget(&MEM_COPY, 8, true);
        assert_eq!(counter, 8);
        assert!(ready);
        assert_eq!(rc, ExitStatus::Success);
    }
}
