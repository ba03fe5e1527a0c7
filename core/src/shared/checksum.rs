//! Counter integrity checksums
//!
//! Each worker finalises a checksum over its bogo-op counter and run flag
//! immediately before `_exit`. The records live in a mapping separate from
//! the stats segment so a wild write into the stats area shows up as a hash
//! mismatch when the parent independently re-hashes after reaping.

/// Hashed payload: the counter, the run flag, and reserved padding that must
/// be zero so it cannot perturb the hash
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumData {
    /// Bogo-ops counter at exit
    pub counter: u64,
    /// Whether the workload reported success
    pub run_ok: bool,
    /// Reserved; always zero
    pub pad: [u8; 7],
}

impl ChecksumData {
    /// Canonical byte serialisation used for hashing
    fn to_bytes(self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.counter.to_le_bytes());
        bytes[8] = self.run_ok as u8;
        bytes
    }
}

/// One checksum record per worker instance
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumRecord {
    /// The hashed payload
    pub data: ChecksumData,
    /// Jenkins hash over the payload bytes
    pub hash: u32,
}

impl ChecksumRecord {
    /// Finalise the record from the worker's counter state; called by the
    /// child after its last counter update
    pub fn finalise(&mut self, counter: u64, run_ok: bool) {
        self.data.counter = counter;
        self.data.run_ok = run_ok;
        self.data.pad = [0u8; 7];
        self.hash = jenkins_hash(&self.data.to_bytes());
    }

    /// The hash the parent expects for a given counter state
    pub fn expected_hash(counter: u64, run_ok: bool) -> u32 {
        let data = ChecksumData {
            counter,
            run_ok,
            pad: [0u8; 7],
        };
        jenkins_hash(&data.to_bytes())
    }
}

/// Jenkins one-at-a-time hash; collision resistant enough to catch
/// counter corruption, not cryptographic
pub fn jenkins_hash(data: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &byte in data {
        hash = hash.wrapping_add(u32::from(byte));
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}
