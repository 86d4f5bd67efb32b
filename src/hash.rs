//! Hash primitives for the object cuckoo table.
//!
//! Three hash functions are derived from XXH64 by seeding it with three
//! entries of a fixed table, indexed by the 8-bit seed stored in the
//! object header. The table is a process-wide constant; identical inputs
//! always produce identical documents.

use twox_hash::XxHash64;

/// Slots per seed byte: entries `3 * seed + j` for `j` in 0..3.
pub(crate) const SEED_TABLE: [u64; 768] = build_seed_table();

// splitmix64 over a fixed starting state. Evaluated at compile time; the
// table must never change once documents exist.
const fn build_seed_table() -> [u64; 768] {
    let mut table = [0u64; 768];
    let mut state: u64 = 0x5851_f42d_4c95_7f2d;
    let mut i = 0;
    while i < table.len() {
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        table[i] = z ^ (z >> 31);
        i += 1;
    }
    table
}

/// Hash an attribute name with one of the table seeds.
pub(crate) fn attribute_hash(name: &[u8], seed: u64) -> u64 {
    XxHash64::oneshot(seed, name)
}

/// Reduce the low 32 bits of `hash` into `[0, nr_slots)` by reciprocal
/// multiplication. Only valid for `nr_slots <= 1 << 24`; builder and reader
/// must use the same reduction for slot positions to agree.
pub(crate) fn fast_modulo_32bit(hash: u64, nr_slots: usize) -> usize {
    (((hash as u32 as u64) * nr_slots as u64) >> 32) as usize
}

/// Slot position for a hash value: the fast reduction below the 2^24 slot
/// threshold, plain modulo above it.
pub(crate) fn slot_position(hash: u64, nr_slots: usize) -> usize {
    if nr_slots <= 0x0100_0000 {
        fast_modulo_32bit(hash, nr_slots)
    } else {
        (hash % nr_slots as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_table_entries_distinct() {
        // Documents on disk depend on this table; every entry must be
        // usable as an independent hash seed.
        for (i, &s) in SEED_TABLE.iter().enumerate() {
            assert_ne!(s, 0, "seed {i} is zero");
        }
        let mut sorted: Vec<u64> = SEED_TABLE.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 768);
    }

    #[test]
    fn test_attribute_hash_deterministic() {
        let a = attribute_hash(b"name", SEED_TABLE[0]);
        let b = attribute_hash(b"name", SEED_TABLE[0]);
        assert_eq!(a, b);
        assert_ne!(a, attribute_hash(b"name", SEED_TABLE[1]));
        assert_ne!(a, attribute_hash(b"nam", SEED_TABLE[0]));
    }

    #[test]
    fn test_fast_modulo_bounds() {
        for n in [1usize, 2, 3, 7, 100, 4099, 0x0100_0000] {
            for h in [0u64, 1, 0xffff_ffff, u64::MAX, 0x1234_5678_9abc_def0] {
                assert!(fast_modulo_32bit(h, n) < n);
            }
        }
    }

    #[test]
    fn test_slot_position_uses_plain_modulo_for_large_tables() {
        let n = 0x0100_0001usize;
        let h = u64::MAX;
        assert_eq!(slot_position(h, n), (h % n as u64) as usize);
    }
}
