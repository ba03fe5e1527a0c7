//! Device workload: writes into the null device

use std::fs::OpenOptions;
use std::io::Write;

use bogobench_core::class::Class;
use bogobench_core::exit::ExitStatus;
use bogobench_core::registry::{StressorArgs, StressorModule, StressorSpec, VerifyMode};

const CHUNK: usize = 4096;

struct Null;

static NULL: Null = Null;

impl StressorModule for Null {
    fn supported(&self, _name: &str) -> bool {
        std::path::Path::new("/dev/null").exists()
    }

    fn run(&self, args: &mut StressorArgs<'_>) -> ExitStatus {
        let mut dev = match OpenOptions::new().write(true).open("/dev/null") {
            Ok(f) => f,
            Err(err) => {
                tracing::warn!(error = %err, "cannot open /dev/null");
                return ExitStatus::NotImplemented;
            }
        };
        let buf = [0u8; CHUNK];
        while args.continue_running() {
            if dev.write_all(&buf).is_err() {
                return ExitStatus::NoResource;
            }
            args.bogo_inc();
        }
        ExitStatus::Success
    }
}

pub fn spec() -> StressorSpec {
    StressorSpec {
        id: 4,
        name: "null",
        class: Class::DEV | Class::OS,
        verify: VerifyMode::None,
        short_opt: None,
        module: &NULL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::run_with_budget;

    #[test]
    fn test_null_writes() {
        if !NULL.supported("null") {
            return;
        }
        let (counter, _, rc) = run_with_budget(&NULL, 8, false);
        assert_eq!(counter, 8);
        assert_eq!(rc, ExitStatus::Success);
    }
}
