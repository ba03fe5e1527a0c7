//! Virtual memory workload: map, touch, verify, unmap

use std::sync::atomic::{AtomicU64, Ordering};

use bogobench_core::class::Class;
use bogobench_core::exit::ExitStatus;
use bogobench_core::registry::{Help, StressorArgs, StressorModule, StressorSpec, VerifyMode};

const DEFAULT_VM_BYTES: u64 = 4 * 1024 * 1024;
const MIN_VM_BYTES: u64 = 4 * 1024;
const MAX_VM_BYTES: u64 = 64 * 1024 * 1024 * 1024;

/// Mapping size, settable via the vm-bytes option
static VM_BYTES: AtomicU64 = AtomicU64::new(DEFAULT_VM_BYTES);

struct Vm;

static VM: Vm = Vm;

static HELP: &[Help] = &[
    Help {
        opt_short: Some("m N"),
        opt_long: "vm N",
        description: "start N workers continuously mapping and touching memory",
    },
    Help {
        opt_short: None,
        opt_long: "vm-bytes N",
        description: "size of each worker's mapping (K, M, G suffixes allowed)",
    },
];

/// Parse a byte size with an optional K/M/G suffix
fn parse_bytes(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let (num, mult) = match value.chars().last() {
        Some('K') | Some('k') => (&value[..value.len() - 1], 1024u64),
        Some('M') | Some('m') => (&value[..value.len() - 1], 1024 * 1024),
        Some('G') | Some('g') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    num.trim()
        .parse::<u64>()
        .map(|n| n.saturating_mul(mult))
        .map_err(|_| format!("invalid byte size: '{value}'"))
}

impl StressorModule for Vm {
    fn set_default(&self) {
        VM_BYTES.store(DEFAULT_VM_BYTES, Ordering::Relaxed);
    }

    fn set_limit(&self, max: u64) {
        // Keep the per-instance mapping inside the imposed budget
        let current = VM_BYTES.load(Ordering::Relaxed);
        if max > 0 && current > max {
            VM_BYTES.store(max.max(MIN_VM_BYTES), Ordering::Relaxed);
        }
    }

    fn set_option(&self, opt: &str, value: &str) -> Result<bool, String> {
        if opt != "vm-bytes" {
            return Ok(false);
        }
        let bytes = parse_bytes(value)?;
        if !(MIN_VM_BYTES..=MAX_VM_BYTES).contains(&bytes) {
            return Err(format!(
                "vm-bytes must be between {MIN_VM_BYTES} and {MAX_VM_BYTES}"
            ));
        }
        VM_BYTES.store(bytes, Ordering::Relaxed);
        Ok(true)
    }

    fn run(&self, args: &mut StressorArgs<'_>) -> ExitStatus {
        let bytes = VM_BYTES.load(Ordering::Relaxed) as usize;
        let page_size = args.page_size;
        let pages = bytes / page_size;
        let mut touched: u64 = 0;

        while args.continue_running() {
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    bytes,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                tracing::warn!(bytes, "out of memory mapping region");
                return ExitStatus::NoResource;
            }
            let base = ptr.cast::<u8>();

            // Counter maintenance spans the whole touch sweep; park the
            // ready flag so an interruption shows up as untrustworthy
            args.ci.counter_ready = false;
            for page in 0..pages {
                let p = unsafe { base.add(page * page_size) };
                unsafe { p.write((page & 0xff) as u8) };
                touched += 1;
            }
            if args.verify {
                for page in 0..pages {
                    let p = unsafe { base.add(page * page_size) };
                    if unsafe { p.read() } != (page & 0xff) as u8 {
                        tracing::error!(page, "page readback mismatch");
                        unsafe { libc::munmap(ptr, bytes) };
                        args.ci.counter_ready = true;
                        return ExitStatus::NotSuccess;
                    }
                }
            }
            args.bogo_inc();
            args.ci.counter_ready = true;

            unsafe { libc::munmap(ptr, bytes) };
        }

        args.set_metric(0, "pages touched", touched as f64);
        ExitStatus::Success
    }

    fn help(&self) -> &'static [Help] {
        HELP
    }
}

pub fn spec() -> StressorSpec {
    StressorSpec {
        id: 7,
        name: "vm",
        class: Class::VM | Class::MEMORY,
        verify: VerifyMode::Optional,
        short_opt: Some('m'),
        module: &VM,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::run_with_budget;

    #[test]
    fn test_touches_pages() {
        let (counter, ready, rc) = run_with_budget(&VM, 2, true);
        assert_eq!(counter, 2);
        assert!(ready);
        assert_eq!(rc, ExitStatus::Success);
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("4096"), Ok(4096));
        assert_eq!(parse_bytes("16K"), Ok(16 * 1024));
        assert_eq!(parse_bytes("2M"), Ok(2 * 1024 * 1024));
        assert_eq!(parse_bytes("1G"), Ok(1024 * 1024 * 1024));
        assert!(parse_bytes("lots").is_err());
    }

    #[test]
    fn test_set_option() {
        VM.set_default();
        assert_eq!(VM.set_option("vm-bytes", "64K"), Ok(true));
        assert_eq!(VM_BYTES.load(Ordering::Relaxed), 64 * 1024);
        assert_eq!(VM.set_option("other", "1"), Ok(false));
        assert!(VM.set_option("vm-bytes", "1").is_err());
        VM.set_default();
    }
}
