//! Closing a compound rewrites its header in place: the most compact
//! offset/length width is chosen, the body is moved down when the 1-byte
//! width frees header slack, arrays drop the index table when all elements
//! share one encoded length, and objects gain a cuckoo slot table.

use itertools::Itertools as _;

use crate::builder::{cuckoo, Builder};
use crate::error::{Error, Result};
use crate::value::{
    HEAD_ARRAY, HEAD_COMPACT_ARRAY, HEAD_COMPACT_OBJECT, HEAD_EMPTY_ARRAY, HEAD_EMPTY_OBJECT,
    HEAD_OBJECT,
};
use crate::varint;

impl Builder {
    /// Close the innermost open array or object, rewriting its header.
    pub fn close(&mut self) -> Result<&mut Self> {
        let tos = *self.stack.last().ok_or(Error::NeedOpenCompound)?;
        let head = self.buf.get(tos);
        debug_assert!(matches!(
            head,
            HEAD_ARRAY | HEAD_OBJECT | HEAD_COMPACT_ARRAY | HEAD_COMPACT_OBJECT
        ));
        let is_array = head == HEAD_ARRAY || head == HEAD_COMPACT_ARRAY;
        let depth = self.stack.len() - 1;

        if self.index[depth].is_empty() {
            self.close_empty(tos, is_array);
            return Ok(self);
        }

        let n = self.index[depth].len();
        if head == HEAD_COMPACT_ARRAY
            || head == HEAD_COMPACT_OBJECT
            || (head == HEAD_ARRAY && self.options.build_unindexed_arrays)
            || (head == HEAD_OBJECT && (self.options.build_unindexed_objects || n == 1))
        {
            if self.close_compact(tos, is_array) {
                return Ok(self);
            }
            // Fell through: the compact length field would not fit.
        }

        if is_array {
            self.close_array(tos);
        } else {
            self.close_object(tos)?;
        }
        Ok(self)
    }

    fn close_empty(&mut self, tos: usize, is_array: bool) {
        self.buf.set(
            tos,
            if is_array {
                HEAD_EMPTY_ARRAY
            } else {
                HEAD_EMPTY_OBJECT
            },
        );
        debug_assert_eq!(self.buf.len(), tos + 9);
        self.buf.truncate(tos + 1);
        self.stack.pop();
        // The member offsets of this depth stay allocated for reuse.
    }

    /// Attempt the compact notation; returns false when the byte length
    /// needs more than 8 varint bytes.
    fn close_compact(&mut self, tos: usize, is_array: bool) -> bool {
        let pos = self.buf.len();
        let depth = self.stack.len() - 1;
        let n = self.index[depth].len() as u64;

        let n_len = varint::length(n);
        let mut byte_size = (pos - (tos + 8) + n_len) as u64;
        let mut b_len = varint::length(byte_size);
        byte_size += b_len as u64;
        // Adding the length field may grow the length field itself, by at
        // most one byte.
        if varint::length(byte_size) != b_len {
            byte_size += 1;
            b_len += 1;
        }
        debug_assert_eq!(varint::length(byte_size), b_len);

        if b_len >= 9 {
            tracing::debug!(byte_size, "compact form too large, using indexed form");
            return false;
        }

        self.buf.set(
            tos,
            if is_array {
                HEAD_COMPACT_ARRAY
            } else {
                HEAD_COMPACT_OBJECT
            },
        );
        let target = tos + 1 + b_len;
        if pos > tos + 9 {
            self.buf.move_down(tos + 9, target);
        }
        varint::store(self.buf.as_mut_slice(), tos + 1, byte_size);

        // The member count sits at the tail, in reversed byte order.
        let end = tos + byte_size as usize;
        self.buf.resize(end);
        varint::store_reversed(self.buf.as_mut_slice(), end - 1, n);

        self.stack.pop();
        true
    }

    fn close_array(&mut self, tos: usize) {
        // Fix the head in case a compact array was originally requested.
        self.buf.set(tos, HEAD_ARRAY);
        let depth = self.stack.len() - 1;
        let pos = self.buf.len();
        let n = self.index[depth].len();

        let mut need_index_table = true;
        let mut need_nr_subs = true;
        {
            let index = &self.index[depth];
            if n == 1 {
                need_index_table = false;
                need_nr_subs = false;
            } else if (pos - tos) - index[0] == n * (index[1] - index[0]) {
                // All entries might share one encoded length; then no
                // offset table is needed at all.
                let sub_len = index[1] - index[0];
                let no_table = (pos - tos) - index[n - 1] == sub_len
                    && index.iter().tuple_windows().all(|(a, b)| b - a == sub_len);
                if no_table {
                    need_index_table = false;
                    need_nr_subs = false;
                }
            }
        }

        // The 9 reserved bytes are already counted in pos - tos; with the
        // 1-byte width the header shrinks to 3 bytes (2 without a table)
        // but gains one table byte per member.
        let table_len = |width: usize| if need_index_table { width * n } else { 0 };
        let offset_size: usize =
            if pos - tos + table_len(1) - (if need_nr_subs { 6 } else { 7 }) <= 0xff {
                1
            } else if pos - tos + table_len(2) <= 0xffff {
                2
            } else if pos - tos + table_len(4) <= 0xffff_ffff {
                4
            } else {
                8
            };

        if offset_size == 1 {
            let target = if need_index_table { 3 } else { 2 };
            if pos > tos + 9 {
                self.buf.move_down(tos + 9, tos + target);
            }
            let diff = 9 - target;
            if need_index_table {
                for offset in self.index[depth].iter_mut() {
                    *offset -= diff;
                }
            }
        }
        // Moving down for the 2-byte width would save 4 more bytes, but
        // the extra memmove is not worth it.

        if need_index_table {
            self.buf
                .reserve(offset_size * n + if offset_size == 8 { 8 } else { 0 });
            for i in 0..n {
                let offset = self.index[depth][i] as u64;
                self.buf.append_length(offset, offset_size);
            }
        } else {
            self.buf.set(tos, 0x02);
        }

        match offset_size {
            2 => self.buf.set(tos, self.buf.get(tos) + 1),
            4 => self.buf.set(tos, self.buf.get(tos) + 2),
            8 => {
                self.buf.set(tos, self.buf.get(tos) + 3);
                if need_nr_subs {
                    // With 8-byte offsets the count goes after the table.
                    self.buf.append_length(n as u64, 8);
                }
            }
            _ => {}
        }

        let final_pos = self.buf.len();
        self.buf
            .write_length_at(tos + 1, (final_pos - tos) as u64, offset_size);
        if offset_size < 8 && need_nr_subs {
            self.buf
                .write_length_at(tos + 1 + offset_size, n as u64, offset_size);
        }

        self.stack.pop();
    }

    fn close_object(&mut self, tos: usize) -> Result<()> {
        // Fix the head in case a compact object was originally requested.
        self.buf.set(tos, HEAD_OBJECT);
        let depth = self.stack.len() - 1;

        let cuckoo::CuckooTable { mut slots, seed } =
            cuckoo::compute(self.buf.as_slice(), tos, &self.index[depth], &self.options)?;
        let nr_slots = slots.len();
        let pos = self.buf.len();

        // Same shape as for arrays, but the 1-byte header keeps byte
        // length, count, slot count and seed in front (5 bytes), winning
        // back 4 of the 9 reserved bytes.
        let offset_size: usize = if pos - tos + nr_slots - 4 <= 0xff {
            1
        } else if pos - tos + 2 * nr_slots <= 0xffff {
            2
        } else if pos - tos + 4 * nr_slots <= 0xffff_ffff {
            4
        } else {
            8
        };

        if offset_size == 1 {
            if pos > tos + 9 {
                self.buf.move_down(tos + 9, tos + 5);
            }
            let diff = 4;
            for offset in self.index[depth].iter_mut() {
                *offset -= diff;
            }
            for slot in slots.iter_mut() {
                if *slot != 0 {
                    *slot -= diff;
                }
            }
        }

        self.buf.reserve(
            offset_size * nr_slots
                + if offset_size == 8 { 17 } else { 0 }
                + if offset_size == 4 { 5 } else { 0 },
        );
        for &slot in &slots {
            self.buf.append_length(slot as u64, offset_size);
        }

        let n = self.index[depth].len();
        match offset_size {
            2 => self.buf.set(tos, 0x0c),
            4 => {
                self.buf.set(tos, 0x0d);
                self.buf.append_length(nr_slots as u64, 4);
                self.buf.append_length(u64::from(seed), 1);
            }
            8 => {
                self.buf.set(tos, 0x0e);
                self.buf.append_length(n as u64, 8);
                self.buf.append_length(nr_slots as u64, 8);
                self.buf.append_length(u64::from(seed), 1);
            }
            _ => {}
        }

        let final_pos = self.buf.len();
        self.buf
            .write_length_at(tos + 1, (final_pos - tos) as u64, offset_size);
        if offset_size < 8 {
            self.buf
                .write_length_at(tos + 1 + offset_size, n as u64, offset_size);
            if offset_size < 4 {
                let base = if offset_size == 1 { 3 } else { 5 };
                self.buf
                    .write_length_at(tos + base, nr_slots as u64, offset_size);
                self.buf.set(tos + base + offset_size, seed);
            }
        }

        self.stack.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::error::Error;
    use crate::options::BuilderOptions;
    use crate::value::Value;

    fn finished(b: &mut Builder) -> Vec<u8> {
        b.take_buffer().expect("Failed to take finished document")
    }

    #[test]
    fn test_empty_array() {
        let mut b = Builder::new();
        b.open_array(false).unwrap();
        b.close().unwrap();
        assert_eq!(finished(&mut b), vec![0x01]);
    }

    #[test]
    fn test_empty_object() {
        let mut b = Builder::new();
        b.open_object(false).unwrap();
        b.close().unwrap();
        assert_eq!(finished(&mut b), vec![0x0a]);
    }

    #[test]
    fn test_equal_stride_array() {
        let mut b = Builder::new();
        b.open_array(false).unwrap();
        for i in 1..=3 {
            b.add(Value::small_int(i)).unwrap();
        }
        b.close().unwrap();
        assert_eq!(finished(&mut b), vec![0x02, 0x05, 0x31, 0x32, 0x33]);
    }

    #[test]
    fn test_single_element_array() {
        let mut b = Builder::new();
        b.open_array(false).unwrap();
        b.add(Value::small_int(1)).unwrap();
        b.close().unwrap();
        assert_eq!(finished(&mut b), vec![0x02, 0x03, 0x31]);
    }

    #[test]
    fn test_indexed_array() {
        let mut b = Builder::new();
        b.open_array(false).unwrap();
        b.add(Value::string("a")).unwrap();
        b.add(Value::string("ab")).unwrap();
        b.close().unwrap();
        assert_eq!(
            finished(&mut b),
            vec![0x06, 0x0a, 0x02, 0x41, 0x61, 0x42, 0x61, 0x62, 0x03, 0x05]
        );
    }

    #[test]
    fn test_compact_array() {
        let mut b = Builder::new();
        b.open_array(true).unwrap();
        for i in 1..=3 {
            b.add(Value::small_int(i)).unwrap();
        }
        b.close().unwrap();
        assert_eq!(finished(&mut b), vec![0x13, 0x06, 0x31, 0x32, 0x33, 0x03]);
    }

    #[test]
    fn test_unindexed_arrays_option() {
        let mut b = Builder::with_options(BuilderOptions::default().build_unindexed_arrays(true));
        b.open_array(false).unwrap();
        b.add(Value::small_int(7)).unwrap();
        b.add(Value::small_int(8)).unwrap();
        b.close().unwrap();
        assert_eq!(finished(&mut b), vec![0x13, 0x05, 0x37, 0x38, 0x02]);
    }

    #[test]
    fn test_single_pair_object_uses_compact_form() {
        let mut b = Builder::new();
        b.open_object(false).unwrap();
        b.add_entry("a", Value::small_int(1)).unwrap();
        b.close().unwrap();
        assert_eq!(finished(&mut b), vec![0x14, 0x06, 0x41, 0x61, 0x31, 0x01]);
    }

    #[test]
    fn test_indexed_object_layout() {
        let mut b = Builder::with_options(
            BuilderOptions::default().check_attribute_uniqueness(true),
        );
        b.open_object(false).unwrap();
        b.add_entry("a", Value::small_int(1)).unwrap();
        b.add_entry("b", Value::small_int(2)).unwrap();
        b.close().unwrap();
        let bytes = finished(&mut b);

        assert_eq!(bytes[0], 0x0b);
        assert_eq!(bytes[1] as usize, bytes.len());
        assert_eq!(bytes[2], 2); // member count
        let nr_slots = bytes[3] as usize;
        assert!(nr_slots >= 3);
        // Body starts at 5: "a", 1, "b", 2 in insertion order.
        assert_eq!(&bytes[5..11], &[0x41, 0x61, 0x31, 0x41, 0x62, 0x32]);
        // Slot table at the tail: two slots hold the key offsets 5 and 8.
        let table = &bytes[bytes.len() - nr_slots..];
        let mut occupied: Vec<u8> = table.iter().copied().filter(|&s| s != 0).collect();
        occupied.sort_unstable();
        assert_eq!(occupied, vec![5, 8]);
    }

    #[test]
    fn test_two_byte_width_array() {
        // A long string payload pushes the total over 255 bytes, forcing
        // the 2-byte width; the body stays at its original position with
        // zero padding after the 5 header bytes.
        let payload = "x".repeat(300);
        let mut b = Builder::new();
        b.open_array(false).unwrap();
        b.add(Value::string(&payload)).unwrap();
        b.add(Value::small_int(1)).unwrap();
        b.close().unwrap();
        let bytes = finished(&mut b);

        assert_eq!(bytes[0], 0x07);
        let byte_len = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
        assert_eq!(byte_len, bytes.len());
        let count = u16::from_le_bytes([bytes[3], bytes[4]]) as usize;
        assert_eq!(count, 2);
        assert_eq!(&bytes[5..9], &[0, 0, 0, 0]);

        let s = crate::slice::Slice::new(&bytes);
        assert_eq!(s.at(0).unwrap().get_string().unwrap(), payload);
        assert_eq!(s.at(1).unwrap().get_int().unwrap(), 1);
    }

    #[test]
    fn test_two_byte_width_equal_stride() {
        // 40 doubles: uniform 9-byte elements, 369 bytes total, no table.
        let mut b = Builder::new();
        b.open_array(false).unwrap();
        for i in 0..40 {
            b.add(Value::double(f64::from(i))).unwrap();
        }
        b.close().unwrap();
        let bytes = finished(&mut b);

        assert_eq!(bytes[0], 0x03);
        let byte_len = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
        assert_eq!(byte_len, bytes.len());
        assert_eq!(byte_len, 9 + 40 * 9);

        let s = crate::slice::Slice::new(&bytes);
        assert_eq!(s.length().unwrap(), 40);
        assert_eq!(s.at(39).unwrap().get_double().unwrap(), 39.0);
    }

    #[test]
    fn test_mixed_lengths_keep_index_table() {
        // Same stride between recorded offsets but a longer last element
        // must not be mistaken for the equal-stride form.
        let mut b = Builder::new();
        b.open_array(false).unwrap();
        b.add(Value::string("a")).unwrap();
        b.add(Value::string("bc")).unwrap();
        b.close().unwrap();
        let bytes = finished(&mut b);
        assert_eq!(bytes[0], 0x06);
    }

    #[test]
    fn test_nested_compounds() {
        let mut b = Builder::new();
        b.open_array(false).unwrap();
        b.open_array(false).unwrap();
        b.add(Value::small_int(1)).unwrap();
        b.close().unwrap();
        b.open_object(false).unwrap();
        b.add_entry("k", Value::bool(true)).unwrap();
        b.close().unwrap();
        b.close().unwrap();
        let bytes = finished(&mut b);

        let s = crate::slice::Slice::new(&bytes);
        assert_eq!(s.length().unwrap(), 2);
        let inner = s.at(0).unwrap();
        assert_eq!(inner.at(0).unwrap().get_int().unwrap(), 1);
        let obj = s.at(1).unwrap();
        assert!(obj.is_object());
        assert!(obj.get("k", None).unwrap().unwrap().get_bool().unwrap());
    }

    #[test]
    fn test_close_without_open() {
        let mut b = Builder::new();
        assert_eq!(b.close().err(), Some(Error::NeedOpenCompound));
        b.open_array(false).unwrap();
        b.close().unwrap();
        assert_eq!(b.close().err(), Some(Error::NeedOpenCompound));
    }

    #[test]
    fn test_compact_object_option() {
        let mut b = Builder::with_options(BuilderOptions::default().build_unindexed_objects(true));
        b.open_object(false).unwrap();
        b.add_entry("a", Value::small_int(1)).unwrap();
        b.add_entry("b", Value::small_int(2)).unwrap();
        b.close().unwrap();
        let bytes = finished(&mut b);
        // head | varint byteLen | "a" 1 "b" 2 | varint count
        assert_eq!(
            bytes,
            vec![0x14, 0x09, 0x41, 0x61, 0x31, 0x41, 0x62, 0x32, 0x02]
        );
    }
}
