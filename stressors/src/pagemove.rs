//! Page remapping workload
//!
//! Shuffles pages of a mapping with mremap, which can severely disturb TLB
//! and page-table state machine behavior on loaded hosts. Classed
//! pathological, so it only runs with the explicit opt-in.

use bogobench_core::class::Class;
use bogobench_core::exit::ExitStatus;
use bogobench_core::registry::{StressorArgs, StressorModule, StressorSpec, VerifyMode};

const PAGES: usize = 16;

struct PageMove;

static PAGE_MOVE: PageMove = PageMove;

impl StressorModule for PageMove {
    fn supported(&self, _name: &str) -> bool {
        cfg!(target_os = "linux")
    }

    #[cfg(target_os = "linux")]
    fn run(&self, args: &mut StressorArgs<'_>) -> ExitStatus {
        let page_size = args.page_size;
        let len = PAGES * page_size;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return ExitStatus::NoResource;
        }

        while args.continue_running() {
            // Stamp, split a page out, move it, and fold it back
            for page in 0..PAGES {
                unsafe {
                    base.cast::<u8>()
                        .add(page * page_size)
                        .write((page & 0xff) as u8)
                };
            }
            let victim = unsafe { base.cast::<u8>().add((PAGES / 2) * page_size) };
            // Growing a page in the middle of the mapping forces a move
            let moved = unsafe {
                libc::mremap(
                    victim.cast(),
                    page_size,
                    page_size * 2,
                    libc::MREMAP_MAYMOVE,
                )
            };
            if moved == libc::MAP_FAILED {
                unsafe { libc::munmap(base, len) };
                return ExitStatus::NoResource;
            }
            if args.verify {
                let expected = ((PAGES / 2) & 0xff) as u8;
                if unsafe { moved.cast::<u8>().read() } != expected {
                    tracing::error!("page content lost across remap");
                    unsafe {
                        libc::munmap(moved, page_size * 2);
                        libc::munmap(base, len);
                    }
                    return ExitStatus::NotSuccess;
                }
            }
            unsafe { libc::munmap(moved, page_size * 2) };

            // Plug the hole the move left behind so the next sweep has a
            // full mapping to stamp
            let refill = unsafe {
                libc::mmap(
                    victim.cast(),
                    page_size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED,
                    -1,
                    0,
                )
            };
            if refill == libc::MAP_FAILED {
                unsafe { libc::munmap(base, len) };
                return ExitStatus::NoResource;
            }
            args.bogo_inc();
        }

        unsafe { libc::munmap(base, len) };
        ExitStatus::Success
    }

    #[cfg(not(target_os = "linux"))]
    fn run(&self, _args: &mut StressorArgs<'_>) -> ExitStatus {
        ExitStatus::NotImplemented
    }
}

pub fn spec() -> StressorSpec {
    StressorSpec {
        id: 5,
        name: "pagemove",
        class: Class::VM | Class::MEMORY | Class::PATHOLOGICAL,
        verify: VerifyMode::Optional,
        short_opt: None,
        module: &PAGE_MOVE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::run_with_budget;

    #[test]
    fn test_remaps_pages() {
        if !PAGE_MOVE.supported("pagemove") {
            return;
        }
        let (counter, _, rc) = run_with_budget(&PAGE_MOVE, 4, true);
        assert_eq!(counter, 4);
        assert_eq!(rc, ExitStatus::Success);
    }
}
