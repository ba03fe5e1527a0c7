//! Pipe I/O workload: write/read cycles through a kernel pipe

use std::io::{Read, Write};
use std::os::unix::io::FromRawFd;

use bogobench_core::class::Class;
use bogobench_core::exit::ExitStatus;
use bogobench_core::registry::{StressorArgs, StressorModule, StressorSpec, VerifyMode};

const CHUNK: usize = 512;

struct Pipe;

static PIPE: Pipe = Pipe;

impl StressorModule for Pipe {
    fn run(&self, args: &mut StressorArgs<'_>) -> ExitStatus {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            tracing::warn!(
                error = %std::io::Error::last_os_error(),
                "cannot create pipe"
            );
            return ExitStatus::NoResource;
        }
        let mut reader = unsafe { std::fs::File::from_raw_fd(fds[0]) };
        let mut writer = unsafe { std::fs::File::from_raw_fd(fds[1]) };

        let mut wbuf = [0u8; CHUNK];
        let mut rbuf = [0u8; CHUNK];
        let mut fill: u8 = args.instance as u8;

        while args.continue_running() {
            for b in wbuf.iter_mut() {
                *b = fill;
            }
            if writer.write_all(&wbuf).is_err() {
                break;
            }
            if reader.read_exact(&mut rbuf).is_err() {
                break;
            }
            if args.verify && rbuf != wbuf {
                tracing::error!("pipe data mismatch");
                return ExitStatus::NotSuccess;
            }
            fill = fill.wrapping_add(1);
            args.bogo_inc();
        }

        args.set_metric(0, "bytes per pipe op", CHUNK as f64);
        ExitStatus::Success
    }
}

pub fn spec() -> StressorSpec {
    StressorSpec {
        id: 6,
        name: "pipe",
        class: Class::PIPE_IO | Class::OS,
        verify: VerifyMode::Optional,
        short_opt: None,
        module: &PIPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::run_with_budget;

    #[test]
    fn test_pipe_round_trips() {
        let (counter, ready, rc) = run_with_budget(&PIPE, 16, true);
        assert_eq!(counter, 16);
        assert!(ready);
        assert_eq!(rc, ExitStatus::Success);
    }
}
