//! Filesystem workload: sequential writes with periodic sync
//!
//! Files live in a per-instance scratch directory under the configured
//! temporary path; the parent removes the directory after reaping unless
//! file keeping was requested.

use std::fs;
use std::io::{Seek, SeekFrom, Write};

use bogobench_core::class::Class;
use bogobench_core::exit::ExitStatus;
use bogobench_core::registry::{StressorArgs, StressorModule, StressorSpec, VerifyMode};
use bogobench_core::system;

const CHUNK: usize = 64 * 1024;
const FILE_CHUNKS: u64 = 64;

struct Hdd;

static HDD: Hdd = Hdd;

impl StressorModule for Hdd {
    fn run(&self, args: &mut StressorArgs<'_>) -> ExitStatus {
        let dir = system::instance_temp_dir(args.name, args.pid, args.instance);
        if let Err(err) = fs::create_dir_all(&dir) {
            tracing::warn!(error = %err, dir = %dir.display(), "cannot create scratch dir");
            return ExitStatus::NoResource;
        }
        let path = dir.join("data");
        let mut file = match fs::File::create(&path) {
            Ok(f) => f,
            Err(err) => {
                tracing::warn!(error = %err, "cannot create scratch file");
                return ExitStatus::NoResource;
            }
        };

        let chunk = vec![0xa5u8; CHUNK];
        let mut written: u64 = 0;

        while args.continue_running() {
            if file.write_all(&chunk).is_err() {
                // Disk full counts as resource exhaustion, not failure
                return ExitStatus::NoResource;
            }
            written += 1;
            if written % FILE_CHUNKS == 0 {
                let _ = file.sync_data();
                if file.seek(SeekFrom::Start(0)).is_err() {
                    return ExitStatus::NoResource;
                }
            }
            args.bogo_inc();
        }
        let _ = file.sync_data();

        args.set_metric(0, "kbytes per write op", (CHUNK / 1024) as f64);
        ExitStatus::Success
    }
}

pub fn spec() -> StressorSpec {
    StressorSpec {
        id: 2,
        name: "hdd",
        class: Class::FILESYSTEM | Class::IO,
        verify: VerifyMode::None,
        short_opt: Some('d'),
        module: &HDD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::run_with_budget;

    #[test]
    fn test_writes_chunks() {
        let (counter, ready, rc) = run_with_budget(&HDD, 4, false);
        assert_eq!(counter, 4);
        assert!(ready);
        assert_eq!(rc, ExitStatus::Success);

        // Tidy the scratch dir this in-process run left behind
        let dir = system::instance_temp_dir("test", unsafe { libc::getpid() }, 0);
        let _ = std::fs::remove_dir_all(dir);
    }
}
