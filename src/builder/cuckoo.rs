//! Construction of the 3-way cuckoo hash table written into closed
//! objects.
//!
//! Each member's attribute name is hashed with three seeded XXH64
//! functions; a member may sit in any of its three slots. The outer search
//! varies the 8-bit seed (256 candidates per table size) and enlarges the
//! table by 10% when no seed admits a collision-free placement. The
//! eviction coin is a deterministic RNG so identical inputs always yield
//! identical documents.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{Error, Result};
use crate::hash;
use crate::options::BuilderOptions;
use crate::slice::Slice;

/// A collision-free placement: slot values are member offsets relative to
/// the compound head byte, 0 marking an empty slot.
pub(crate) struct CuckooTable {
    pub slots: Vec<usize>,
    pub seed: u8,
}

/// Build the slot table for the object headed at `tos` whose member
/// offsets (relative to `tos`, each pointing at a key) are in `index`.
pub(crate) fn compute(
    data: &[u8],
    tos: usize,
    index: &[usize],
    options: &BuilderOptions,
) -> Result<CuckooTable> {
    let mut rng = ChaCha8Rng::seed_from_u64(123_456_789);
    let n = index.len();
    // One extra slot for sizes 2 to 6, two for 7 to 13, and so on.
    let mut nr_slots = n + n * 3 / 20 + 1;
    // The per-insert limit is fixed at the initial slot count and is not
    // raised when the table grows.
    let search_limit = if nr_slots < 400 {
        nr_slots * 3
    } else {
        1200 + (nr_slots as f64).sqrt() as usize
    };

    loop {
        for seed in 0..=255u8 {
            let mut slots = vec![0usize; nr_slots];
            let mut placed = true;
            for &offset in index {
                if !insert(
                    data,
                    tos,
                    offset,
                    seed,
                    search_limit,
                    &mut slots,
                    options,
                    &mut rng,
                )? {
                    placed = false;
                    break;
                }
            }
            if placed {
                return Ok(CuckooTable { slots, seed });
            }
        }
        nr_slots = nr_slots * 110 / 100;
        tracing::trace!(nr_slots, "all seeds exhausted, enlarging cuckoo table");
    }
}

/// Insert one member, displacing others if needed. Returns false when the
/// eviction chain exceeds the search limit.
#[allow(clippy::too_many_arguments)]
fn insert(
    data: &[u8],
    tos: usize,
    offset: usize,
    seed: u8,
    search_limit: usize,
    slots: &mut [usize],
    options: &BuilderOptions,
    rng: &mut ChaCha8Rng,
) -> Result<bool> {
    let nr_slots = slots.len();
    // Entries are never deleted and a new entry takes the first free of its
    // three slots, so a duplicate name must collide with its twin on the
    // first attempt; once the chain starts displacing, the check is off.
    let mut check_uniqueness = options.check_attribute_uniqueness;
    let mut offset = offset;
    let mut count = 0usize;

    loop {
        let name = attr_name(data, tos + offset, options)?;

        let mut positions = [0usize; 3];
        for (j, position) in positions.iter_mut().enumerate() {
            let h = hash::attribute_hash(name, hash::SEED_TABLE[3 * seed as usize + j]);
            *position = hash::slot_position(h, nr_slots);
        }

        let mut stored = false;
        for &p in &positions {
            if slots[p] == 0 {
                slots[p] = offset;
                stored = true;
                break;
            }
            if check_uniqueness && attr_name(data, tos + slots[p], options)? == name {
                return Err(Error::DuplicateAttributeName);
            }
        }
        if stored {
            return Ok(true);
        }

        // Play cuckoo: displace a random one of the three occupants.
        let j = rng.gen_range(0..3usize);
        std::mem::swap(&mut slots[positions[j]], &mut offset);
        check_uniqueness = false;

        count += 1;
        if count > search_limit {
            return Ok(false);
        }
    }
}

fn attr_name<'a>(data: &'a [u8], at: usize, options: &'a BuilderOptions) -> Result<&'a [u8]> {
    Slice::new(&data[at..]).key_name(options.translator())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::value::Value;

    // Build the raw bytes of an open object holding the given pairs and
    // return (buffer, member offsets) the way the closer sees them.
    fn open_object_bytes(pairs: &[(&str, i64)]) -> (Vec<u8>, Vec<usize>) {
        let mut data = vec![0x0b, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut index = Vec::new();
        for (key, value) in pairs {
            index.push(data.len());
            data.push(0x40 + key.len() as u8);
            data.extend_from_slice(key.as_bytes());
            assert!((0..=9).contains(value));
            data.push(0x30 + *value as u8);
        }
        (data, index)
    }

    #[test]
    fn test_every_member_lands_in_one_of_its_slots() {
        let pairs: Vec<(String, i64)> = (0..40).map(|i| (format!("key{i}"), i % 10)).collect();
        let borrowed: Vec<(&str, i64)> = pairs.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        let (data, index) = open_object_bytes(&borrowed);
        let options = BuilderOptions::default();

        let table = compute(&data, 0, &index, &options).expect("Failed to build cuckoo table");
        let nr_slots = table.slots.len();
        assert!(nr_slots >= index.len());

        let occupied: Vec<usize> = table.slots.iter().copied().filter(|&s| s != 0).collect();
        assert_eq!(occupied.len(), index.len());

        // Each member must sit at one of the three positions of its name.
        for &offset in &index {
            let name = attr_name(&data, offset, &options).unwrap();
            let found = (0..3).any(|j| {
                let h = hash::attribute_hash(name, hash::SEED_TABLE[3 * table.seed as usize + j]);
                table.slots[hash::slot_position(h, nr_slots)] == offset
            });
            assert!(found, "member at {offset} not reachable via its hashes");
        }
    }

    #[test]
    fn test_duplicate_names_detected() {
        let (data, index) = open_object_bytes(&[("a", 1), ("b", 2), ("a", 3)]);
        let options = BuilderOptions::default().check_attribute_uniqueness(true);
        assert_eq!(
            compute(&data, 0, &index, &options).err(),
            Some(Error::DuplicateAttributeName)
        );

        // Without the check the table builds; both twins are stored.
        let options = BuilderOptions::default();
        let table = compute(&data, 0, &index, &options).expect("Failed to build cuckoo table");
        assert_eq!(table.slots.iter().filter(|&&s| s != 0).count(), 3);
    }

    #[test]
    fn test_construction_is_deterministic() {
        let build = || {
            let mut b = Builder::new();
            b.open_object(false).unwrap();
            for i in 0..25 {
                let key = format!("attribute{i}");
                b.add_entry(&key, Value::int(i)).unwrap();
            }
            b.close().unwrap();
            b.take_buffer().unwrap()
        };
        assert_eq!(build(), build());
    }
}
