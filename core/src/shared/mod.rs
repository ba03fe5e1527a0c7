//! The shared-memory statistics plane
//!
//! Two anonymous `MAP_SHARED` mappings created before the first fork and
//! inherited by every worker:
//!
//! - the *stats* mapping: a [`SharedHeader`] followed by one
//!   [`StatsRecord`] per instance, with a `PROT_NONE` guard page at the end
//!   that traps stray writes into shared state
//! - the *checksum* mapping: one [`ChecksumRecord`] per instance, kept in a
//!   separate segment so stats-area corruption is detectable by hash
//!   mismatch
//!
//! Three single-page sentinels are also mapped for workloads that probe
//! fault behavior.

pub mod checksum;
pub mod header;
pub mod stats;

pub use checksum::ChecksumRecord;
pub use header::{MappedPages, SharedHeader};
pub use stats::StatsRecord;

use std::mem::{align_of, size_of};
use std::ptr;

use crate::error::{Error, Result};
use crate::system;

/// Owner of the shared mappings.
///
/// Created once in the parent before any fork; dropped (unmapping in
/// reverse creation order) after every child has been reaped.
pub struct SharedPlane {
    base: *mut u8,
    total_len: usize,
    stats_offset: usize,
    num_slots: usize,
    checksums: *mut ChecksumRecord,
    checksums_len: usize,
    page_size: usize,
}

/// Map one anonymous private page with the given protection
fn map_page(prot: libc::c_int, page_size: usize) -> Result<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            page_size,
            prot,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(Error::Mapping(format!(
            "cannot mmap sentinel page: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(ptr.cast())
}

impl SharedPlane {
    /// Create the plane sized for `num_slots` worker instances.
    ///
    /// On any mapping failure, previously mapped regions are unmapped in
    /// reverse order before the error is returned.
    pub fn create(num_slots: usize) -> Result<Self> {
        let page_size = system::page_size();

        let stats_offset = align_up(size_of::<SharedHeader>(), align_of::<StatsRecord>());
        let len = stats_offset + size_of::<StatsRecord>() * num_slots;
        // Room for the guard page, rounded to a page boundary
        let total_len = (len + (page_size << 1)) & !(page_size - 1);

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(Error::Mapping(format!(
                "cannot mmap shared stats region: {}",
                std::io::Error::last_os_error()
            )));
        }
        let base: *mut u8 = base.cast();

        // Anonymous mappings arrive zeroed; paranoid
        unsafe { ptr::write_bytes(base, 0, total_len) };

        let mut usable_len = total_len;
        // Trap any access to the last page
        let last_page = unsafe { base.add(total_len - page_size) };
        let rc =
            unsafe { libc::mprotect(last_page.cast(), page_size, libc::PROT_NONE) };
        if rc != 0 {
            // No in-place protection change here; shrink the usable length
            // so nothing is placed on the unguarded tail page
            usable_len -= page_size;
        }

        {
            let header = unsafe { &mut *base.cast::<SharedHeader>() };
            header.length = usable_len;
            header.time_started = system::time_now();
            header.mem_cache.level = 3;
        }

        // Checksums live in their own segment so a wild write into the
        // stats area cannot silently fix up its own hash
        let clen = size_of::<ChecksumRecord>() * num_slots;
        let checksums_len = (clen + page_size) & !(page_size - 1);
        let checksums = unsafe {
            libc::mmap(
                ptr::null_mut(),
                checksums_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if checksums == libc::MAP_FAILED {
            let err = Error::Mapping(format!(
                "cannot mmap checksums: {}",
                std::io::Error::last_os_error()
            ));
            unsafe { libc::munmap(base.cast(), total_len) };
            return Err(err);
        }
        let checksums: *mut ChecksumRecord = checksums.cast();
        unsafe { ptr::write_bytes(checksums.cast::<u8>(), 0, checksums_len) };

        let unwind = |created: &[(*mut u8, usize)]| {
            for &(p, l) in created.iter().rev() {
                unsafe { libc::munmap(p.cast(), l) };
            }
        };

        let page_none = match map_page(libc::PROT_NONE, page_size) {
            Ok(p) => p,
            Err(e) => {
                unwind(&[(base, total_len), (checksums.cast(), checksums_len)]);
                return Err(e);
            }
        };
        let page_ro = match map_page(libc::PROT_READ, page_size) {
            Ok(p) => p,
            Err(e) => {
                unwind(&[
                    (base, total_len),
                    (checksums.cast(), checksums_len),
                    (page_none, page_size),
                ]);
                return Err(e);
            }
        };
        // Named for its intended semantic; deliberately mapped read-only
        let page_wo = match map_page(libc::PROT_READ, page_size) {
            Ok(p) => p,
            Err(e) => {
                unwind(&[
                    (base, total_len),
                    (checksums.cast(), checksums_len),
                    (page_none, page_size),
                    (page_ro, page_size),
                ]);
                return Err(e);
            }
        };

        {
            let header = unsafe { &mut *base.cast::<SharedHeader>() };
            header.mapped = MappedPages {
                page_none,
                page_ro,
                page_wo,
            };
        }

        Ok(Self {
            base,
            total_len,
            stats_offset,
            num_slots,
            checksums,
            checksums_len,
            page_size,
        })
    }

    /// The shared header
    pub fn header(&self) -> &SharedHeader {
        unsafe { &*self.base.cast::<SharedHeader>() }
    }

    /// Mutable access to the header; parent only, before workers launch
    pub fn header_mut(&mut self) -> &mut SharedHeader {
        unsafe { &mut *self.base.cast::<SharedHeader>() }
    }

    /// Number of stats/checksum slots
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Base pointer of the stats record array, for signal-handler
    /// registration
    pub fn stats_base(&self) -> *mut StatsRecord {
        unsafe { self.base.add(self.stats_offset).cast() }
    }

    /// Read access to one stats slot.
    ///
    /// The parent must only call this for slots whose worker has been
    /// reaped (or not yet forked); `waitpid` is the ordering barrier.
    pub fn stats(&self, idx: usize) -> &StatsRecord {
        assert!(idx < self.num_slots);
        unsafe { &*self.stats_base().add(idx) }
    }

    /// Write access to one stats slot.
    ///
    /// # Safety
    ///
    /// The caller must be the slot's sole writer: the parent before the
    /// worker is forked or after it is reaped, or the worker itself.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn stats_mut(&self, idx: usize) -> &mut StatsRecord {
        assert!(idx < self.num_slots);
        &mut *self.stats_base().add(idx)
    }

    /// Read access to one checksum slot, same discipline as [`Self::stats`]
    pub fn checksum(&self, idx: usize) -> &ChecksumRecord {
        assert!(idx < self.num_slots);
        unsafe { &*self.checksums.add(idx) }
    }

    /// Write access to one checksum slot.
    ///
    /// # Safety
    ///
    /// Same single-writer discipline as [`Self::stats_mut`].
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn checksum_mut(&self, idx: usize) -> &mut ChecksumRecord {
        assert!(idx < self.num_slots);
        &mut *self.checksums.add(idx)
    }

    /// Length of the stats mapping, including the guard page
    pub fn stats_mapping_len(&self) -> usize {
        self.total_len
    }

    /// Length of the checksum mapping
    pub fn checksum_mapping_len(&self) -> usize {
        self.checksums_len
    }

    /// System page size the plane was laid out with
    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

impl Drop for SharedPlane {
    fn drop(&mut self) {
        let mapped = self.header().mapped;
        unsafe {
            if !mapped.page_wo.is_null() {
                libc::munmap(mapped.page_wo.cast(), self.page_size);
            }
            if !mapped.page_ro.is_null() {
                libc::munmap(mapped.page_ro.cast(), self.page_size);
            }
            if !mapped.page_none.is_null() {
                libc::munmap(mapped.page_none.cast(), self.page_size);
            }
            libc::munmap(self.checksums.cast(), self.checksums_len);
            libc::munmap(self.base.cast(), self.total_len);
        }
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
