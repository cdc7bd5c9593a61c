//! Fixed-size CPU bitmask matching the kernel's `cpu_set_t` layout.

use std::{collections::BTreeSet, fmt};

/// Number of CPUs a [`CpuMask`] can describe.
///
/// This is the glibc `CPU_SETSIZE`. The kernel supports more CPUs, but the
/// `cpu_set_t` handed to `sched_setaffinity` is fixed at this size, so any
/// CPU id at or beyond it is dropped when a mask is built.
pub const CPU_SETSIZE: usize = 1024;

/// Size of a [`CpuMask`] in bytes.
pub const CPU_MASK_BYTES: usize = CPU_SETSIZE / 8;

const WORD_BITS: usize = u64::BITS as usize;
const CPU_MASK_WORDS: usize = CPU_SETSIZE / WORD_BITS;

/// Ordered set of CPU ids.
pub type CpuSet = BTreeSet<usize>;

/// Bitset with bit `i` set iff CPU `i` is a member.
///
/// Two masks built from the same member set are bit-identical regardless of
/// the order or multiplicity of the ids they were built from.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuMask {
    words: [u64; CPU_MASK_WORDS],
}

impl CpuMask {
    pub const fn empty() -> Self {
        Self {
            words: [0; CPU_MASK_WORDS],
        }
    }

    /// Builds a mask from CPU ids. Ids `>= CPU_SETSIZE` are silently dropped.
    pub fn from_cpus(cpus: impl IntoIterator<Item = usize>) -> Self {
        let mut mask = Self::empty();
        for cpu in cpus {
            mask.insert(cpu);
        }
        mask
    }

    /// Sets the bit for `cpu`. Returns `false` if `cpu` does not fit the mask.
    pub fn insert(&mut self, cpu: usize) -> bool {
        if cpu >= CPU_SETSIZE {
            return false;
        }
        self.words[cpu / WORD_BITS] |= 1u64 << (cpu % WORD_BITS);
        true
    }

    pub fn contains(&self, cpu: usize) -> bool {
        cpu < CPU_SETSIZE && self.words[cpu / WORD_BITS] & (1u64 << (cpu % WORD_BITS)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Member CPU ids in ascending order.
    pub fn cpus(&self) -> impl Iterator<Item = usize> + '_ {
        (0..CPU_SETSIZE).filter(move |cpu| self.contains(*cpu))
    }

    /// Little-endian byte view, byte `i / 8` bit `i % 8` for CPU `i`.
    pub fn to_bytes(&self) -> [u8; CPU_MASK_BYTES] {
        let mut bytes = [0u8; CPU_MASK_BYTES];
        for (chunk, word) in bytes.chunks_exact_mut(8).zip(self.words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}

impl Default for CpuMask {
    fn default() -> Self {
        Self::empty()
    }
}

impl FromIterator<usize> for CpuMask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self::from_cpus(iter)
    }
}

impl From<&CpuSet> for CpuMask {
    fn from(cpus: &CpuSet) -> Self {
        Self::from_cpus(cpus.iter().copied())
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.cpus()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_round_trip_dedups() {
        let mask = CpuMask::from_cpus([7, 3, 3, 0, 7, 64, 1023]);
        assert_eq!(mask.cpus().collect::<Vec<_>>(), vec![0, 3, 7, 64, 1023]);
        assert_eq!(mask.count(), 5);
    }

    #[test]
    fn test_mask_drops_out_of_range_ids() {
        let mut mask = CpuMask::from_cpus([1, 1024, 4096]);
        assert_eq!(mask.cpus().collect::<Vec<_>>(), vec![1]);
        assert!(!mask.insert(CPU_SETSIZE));
        assert!(!mask.contains(CPU_SETSIZE));
    }

    #[test]
    fn test_mask_is_order_independent() {
        let a = CpuMask::from_cpus([5, 1, 9]);
        let b: CpuMask = [9, 5, 1, 5].into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn test_mask_byte_layout() {
        let bytes = CpuMask::from_cpus([0, 9, 1023]).to_bytes();
        assert_eq!(bytes.len(), CPU_MASK_BYTES);
        assert_eq!(bytes[0], 0b0000_0001);
        assert_eq!(bytes[1], 0b0000_0010);
        assert_eq!(bytes[127], 0b1000_0000);
        assert!(bytes[2..127].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_empty_mask() {
        let mask = CpuMask::from_cpus(std::iter::empty());
        assert!(mask.is_empty());
        assert_eq!(mask, CpuMask::default());
        assert_eq!(format!("{mask:?}"), "{}");
    }
}
