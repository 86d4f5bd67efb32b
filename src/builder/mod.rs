//! The incremental VPack document builder.
//!
//! A builder materializes one document byte-by-byte: open a compound, add
//! members, close it. While a compound is open its member offsets are kept
//! on a nesting stack; closing rewrites the compound's header in place
//! (see [`close`](Builder::close)).
//!
//! ```
//! use vpack::{Builder, Value};
//!
//! let mut b = Builder::new();
//! b.open_object(false)?;
//! b.add_entry("name", Value::string("vpack"))?;
//! b.add_entry("version", Value::int(1))?;
//! b.close()?;
//! let doc = b.slice()?;
//! assert_eq!(doc.get("version", None)?.unwrap().get_int()?, 1);
//! # Ok::<(), vpack::Error>(())
//! ```

mod close;
mod cuckoo;

use crate::buffer::{int_width, ByteBuffer};
use crate::error::{Error, Result};
use crate::options::BuilderOptions;
use crate::slice::{ArrayIterator, ObjectIterator, Slice};
use crate::value::{
    Value, ValueData, ValuePair, ValueType, HEAD_ARRAY, HEAD_COMPACT_ARRAY, HEAD_COMPACT_OBJECT,
    HEAD_DOUBLE, HEAD_EXTERNAL, HEAD_FALSE, HEAD_ILLEGAL, HEAD_MAX_KEY, HEAD_MIN_KEY, HEAD_NULL,
    HEAD_OBJECT, HEAD_STRING_LONG, HEAD_TRUE, HEAD_UTC_DATE,
};

const PTR_SIZE: usize = std::mem::size_of::<*const u8>();

/// Append-only writer for a single VPack document.
///
/// The builder is strictly single-owner and single-threaded. A failed
/// operation leaves it in a well-defined state: the caller may continue
/// adding, remove the last member, or discard the builder.
#[derive(Debug, Default)]
pub struct Builder {
    buf: ByteBuffer,
    /// Header offset of each open compound, innermost last.
    stack: Vec<usize>,
    /// Member offsets per nesting depth, relative to the compound head.
    /// Retained across close/reopen to amortize allocation.
    index: Vec<Vec<usize>>,
    /// Inside an object: a key has been written, a value is expected.
    key_written: bool,
    options: BuilderOptions,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: BuilderOptions) -> Self {
        Builder {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &BuilderOptions {
        &self.options
    }

    /// Reset for reuse. Allocations (buffer and per-depth offset vectors)
    /// are retained.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.stack.clear();
        self.key_written = false;
    }

    /// True when no compound is open. A fresh builder is closed.
    pub fn is_closed(&self) -> bool {
        self.stack.is_empty()
    }

    /// The root slice of the finished document.
    pub fn slice(&self) -> Result<Slice<'_>> {
        if !self.is_closed() {
            return Err(Error::NotSealed);
        }
        if self.buf.is_empty() {
            Ok(Slice::none())
        } else {
            Ok(Slice::new(self.buf.as_slice()))
        }
    }

    /// The finished document bytes, borrowed.
    pub fn bytes(&self) -> Result<&[u8]> {
        if !self.is_closed() {
            return Err(Error::NotSealed);
        }
        Ok(self.buf.as_slice())
    }

    /// Transfer ownership of the finished document, leaving the builder
    /// empty and reusable.
    pub fn take_buffer(&mut self) -> Result<Vec<u8>> {
        if !self.is_closed() {
            return Err(Error::NotSealed);
        }
        self.key_written = false;
        Ok(self.buf.take())
    }

    /// Open an array; `unindexed` requests the compact form.
    pub fn open_array(&mut self, unindexed: bool) -> Result<&mut Self> {
        self.add(Value::array(unindexed))?;
        Ok(self)
    }

    /// Open an object; `unindexed` requests the compact form.
    pub fn open_object(&mut self, unindexed: bool) -> Result<&mut Self> {
        self.add(Value::object(unindexed))?;
        Ok(self)
    }

    /// Append one value at the current position and record it as a member
    /// of the innermost open compound. Returns the offset it was written
    /// at.
    pub fn add(&mut self, value: Value<'_>) -> Result<usize> {
        let reported = self.report_add();
        match self.set(&value) {
            Ok(offset) => Ok(offset),
            Err(e) => {
                if reported {
                    self.cleanup_add();
                }
                Err(e)
            }
        }
    }

    /// Append a key/value pair to the innermost open object.
    pub fn add_entry(&mut self, key: &str, value: Value<'_>) -> Result<usize> {
        self.add_entry_with(key, |b| b.set(&value))
    }

    /// Append a raw-bytes value (string, binary or custom).
    pub fn add_pair(&mut self, pair: ValuePair<'_>) -> Result<usize> {
        let reported = self.report_add();
        match self.set_pair(&pair) {
            Ok(offset) => Ok(offset),
            Err(e) => {
                if reported {
                    self.cleanup_add();
                }
                Err(e)
            }
        }
    }

    /// Append a key and a raw-bytes value to the innermost open object.
    pub fn add_entry_pair(&mut self, key: &str, pair: ValuePair<'_>) -> Result<usize> {
        self.add_entry_with(key, |b| b.set_pair(&pair))
    }

    /// Append an already-encoded value verbatim.
    pub fn add_slice(&mut self, item: Slice<'_>) -> Result<usize> {
        let reported = self.report_add();
        match self.set_slice(&item) {
            Ok(offset) => Ok(offset),
            Err(e) => {
                if reported {
                    self.cleanup_add();
                }
                Err(e)
            }
        }
    }

    /// Append a key and an already-encoded value to the innermost open
    /// object.
    pub fn add_entry_slice(&mut self, key: &str, item: Slice<'_>) -> Result<usize> {
        self.add_entry_with(key, |b| b.set_slice(&item))
    }

    /// Drain an array iterator into the innermost open array, which is
    /// intentionally left open.
    pub fn extend_array(&mut self, items: ArrayIterator<'_>) -> Result<()> {
        let &tos = self.stack.last().ok_or(Error::NeedOpenArray)?;
        let head = self.buf.get(tos);
        if head != HEAD_ARRAY && head != HEAD_COMPACT_ARRAY {
            return Err(Error::NeedOpenArray);
        }
        for item in items {
            self.add_slice(item?)?;
        }
        Ok(())
    }

    /// Drain an object iterator into the innermost open object, which is
    /// intentionally left open.
    pub fn extend_object(&mut self, items: ObjectIterator<'_>) -> Result<()> {
        let &tos = self.stack.last().ok_or(Error::NeedOpenObject)?;
        let head = self.buf.get(tos);
        if head != HEAD_OBJECT && head != HEAD_COMPACT_OBJECT {
            return Err(Error::NeedOpenObject);
        }
        if self.key_written {
            return Err(Error::KeyAlreadyWritten);
        }
        for pair in items {
            let (key, value) = pair?;
            self.add_slice(key)?;
            self.add_slice(value)?;
        }
        Ok(())
    }

    /// Remove the most recently added member of the innermost open
    /// compound.
    pub fn remove_last(&mut self) -> Result<()> {
        let &tos = self.stack.last().ok_or(Error::NeedOpenCompound)?;
        let depth = self.stack.len() - 1;
        let last = self.index[depth]
            .last()
            .copied()
            .ok_or(Error::NeedSubvalue)?;
        self.buf.truncate(tos + last);
        self.index[depth].pop();
        // A half-written pair loses its key here, so a key is expected
        // again.
        self.key_written = false;
        Ok(())
    }

    /// Whether the innermost open object already holds `key`.
    pub fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.find_key(key)?.is_some())
    }

    /// The value stored under `key` in the innermost open object, if any.
    pub fn get_key(&self, key: &str) -> Result<Option<Slice<'_>>> {
        match self.find_key(key)? {
            Some(at) => {
                let key_slice = Slice::new(&self.buf.as_slice()[at..]);
                let size = key_slice.byte_size()?;
                Ok(Some(Slice::new(&self.buf.as_slice()[at + size..])))
            }
            None => Ok(None),
        }
    }

    fn find_key(&self, key: &str) -> Result<Option<usize>> {
        let &tos = self.stack.last().ok_or(Error::NeedOpenObject)?;
        let head = self.buf.get(tos);
        if head != HEAD_OBJECT && head != HEAD_COMPACT_OBJECT {
            return Err(Error::NeedOpenObject);
        }
        let depth = self.stack.len() - 1;
        for &offset in &self.index[depth] {
            let key_slice = Slice::new(&self.buf.as_slice()[tos + offset..]);
            if key_slice.key_name(self.options.translator())? == key.as_bytes() {
                return Ok(Some(tos + offset));
            }
        }
        Ok(None)
    }

    /// Record the upcoming member's offset in the innermost frame; no
    /// record is made for the value half of an object pair (the key's
    /// offset stands for the pair) or for a root value.
    fn report_add(&mut self) -> bool {
        if let Some(&tos) = self.stack.last() {
            if !self.key_written {
                let depth = self.stack.len() - 1;
                let offset = self.buf.len() - tos;
                self.index[depth].push(offset);
                return true;
            }
        }
        false
    }

    fn cleanup_add(&mut self) {
        let depth = self.stack.len() - 1;
        self.index[depth].pop();
    }

    fn add_entry_with<F>(&mut self, key: &str, write_value: F) -> Result<usize>
    where
        F: FnOnce(&mut Self) -> Result<usize>,
    {
        let &tos = self.stack.last().ok_or(Error::NeedOpenObject)?;
        let head = self.buf.get(tos);
        if head != HEAD_OBJECT && head != HEAD_COMPACT_OBJECT {
            return Err(Error::NeedOpenObject);
        }
        if self.key_written {
            return Err(Error::KeyAlreadyWritten);
        }
        let depth = self.stack.len() - 1;
        let member_offset = self.buf.len() - tos;
        self.index[depth].push(member_offset);

        let result = self.set(&Value::string(key)).and_then(|offset| {
            write_value(self)?;
            Ok(offset)
        });
        if result.is_err() {
            // Roll back the member record and the key bytes so the object
            // never holds a dangling key.
            self.index[depth].pop();
            self.buf.truncate(tos + member_offset);
            self.key_written = false;
        }
        result
    }

    /// Enforce the key/value protocol of open objects: at key position
    /// only a string (or a translatable integer key) is admitted, and
    /// writing one flips the builder into value position.
    fn check_key_is_string(&mut self, value_type: ValueType) -> Result<()> {
        if let Some(&tos) = self.stack.last() {
            let head = self.buf.get(tos);
            if head == HEAD_OBJECT || head == HEAD_COMPACT_OBJECT {
                if !self.key_written {
                    let translatable = matches!(
                        value_type,
                        ValueType::Int | ValueType::UInt | ValueType::SmallInt
                    ) && self.options.attribute_translator.is_some();
                    if value_type != ValueType::String && !translatable {
                        return Err(Error::KeyMustBeString);
                    }
                    self.key_written = true;
                } else {
                    self.key_written = false;
                }
            }
        }
        Ok(())
    }

    /// Encode one value at the current position. Validation happens before
    /// any byte is written, so a failure never advances the position.
    fn set(&mut self, item: &Value<'_>) -> Result<usize> {
        let old_pos = self.buf.len();
        self.check_key_is_string(item.value_type)?;

        match item.value_type {
            ValueType::None => {
                return Err(Error::UnexpectedType("cannot set a ValueType::None"));
            }
            ValueType::Null => {
                self.buf.push(HEAD_NULL);
            }
            ValueType::Illegal => {
                self.buf.push(HEAD_ILLEGAL);
            }
            ValueType::MinKey => {
                self.buf.push(HEAD_MIN_KEY);
            }
            ValueType::MaxKey => {
                self.buf.push(HEAD_MAX_KEY);
            }
            ValueType::Bool => {
                let ValueData::Bool(b) = item.data else {
                    return Err(Error::UnexpectedValue("must give a bool for ValueType::Bool"));
                };
                self.buf.push(if b { HEAD_TRUE } else { HEAD_FALSE });
            }
            ValueType::Double => {
                let v = match item.data {
                    ValueData::Double(d) => d,
                    ValueData::Int(i) => i as f64,
                    ValueData::UInt(u) => u as f64,
                    _ => {
                        return Err(Error::UnexpectedValue(
                            "must give a number for ValueType::Double",
                        ));
                    }
                };
                self.buf.reserve(9);
                self.buf.push(HEAD_DOUBLE);
                self.buf.append_length(v.to_bits(), 8);
            }
            ValueType::UtcDate => {
                let v = self.coerce_int(item, "must give a number for ValueType::UTCDate")?;
                self.buf.reserve(9);
                self.buf.push(HEAD_UTC_DATE);
                self.buf.append_length(v as u64, 8);
            }
            ValueType::External => {
                if self.options.disallow_externals {
                    return Err(Error::ExternalsDisallowed);
                }
                let ValueData::Pointer(p) = item.data else {
                    return Err(Error::UnexpectedValue(
                        "must give a pointer for ValueType::External",
                    ));
                };
                self.buf.reserve(1 + PTR_SIZE);
                self.buf.push(HEAD_EXTERNAL);
                self.buf.append_length(p as usize as u64, PTR_SIZE);
            }
            ValueType::SmallInt => {
                let v = self.coerce_int(item, "must give a number for ValueType::SmallInt")?;
                if !(-6..=9).contains(&v) {
                    return Err(Error::NumberOutOfRange);
                }
                if v >= 0 {
                    self.buf.push(0x30 + v as u8);
                } else {
                    self.buf.push((0x40 + v) as u8);
                }
            }
            ValueType::Int => {
                let v = self.coerce_int(item, "must give a number for ValueType::Int")?;
                self.append_int(v);
            }
            ValueType::UInt => {
                let v = match item.data {
                    ValueData::Double(d) => {
                        if d < 0.0 {
                            return Err(Error::UnexpectedValue(
                                "must give a non-negative number for ValueType::UInt",
                            ));
                        }
                        d as u64
                    }
                    ValueData::Int(i) => {
                        if i < 0 {
                            return Err(Error::UnexpectedValue(
                                "must give a non-negative number for ValueType::UInt",
                            ));
                        }
                        i as u64
                    }
                    ValueData::UInt(u) => u,
                    _ => {
                        return Err(Error::UnexpectedValue(
                            "must give a number for ValueType::UInt",
                        ));
                    }
                };
                self.buf.reserve(9);
                self.buf.append_uint(v, 0x27);
            }
            ValueType::String => {
                let ValueData::Str(s) = item.data else {
                    return Err(Error::UnexpectedValue(
                        "must give a string for ValueType::String",
                    ));
                };
                self.append_string_bytes(s.as_bytes());
            }
            ValueType::Binary => {
                let ValueData::Str(s) = item.data else {
                    return Err(Error::UnexpectedValue(
                        "must give a string for ValueType::Binary",
                    ));
                };
                let bytes = s.as_bytes();
                self.buf.reserve(9 + bytes.len());
                self.buf.append_uint(bytes.len() as u64, 0xbf);
                self.buf.extend_from_slice(bytes);
            }
            ValueType::Array => {
                self.open_compound(if item.unindexed {
                    HEAD_COMPACT_ARRAY
                } else {
                    HEAD_ARRAY
                });
            }
            ValueType::Object => {
                self.open_compound(if item.unindexed {
                    HEAD_COMPACT_OBJECT
                } else {
                    HEAD_OBJECT
                });
            }
            ValueType::Bcd => {
                return Err(Error::NotImplemented);
            }
            ValueType::Custom => {
                return Err(Error::UnexpectedType(
                    "cannot set a ValueType::Custom with this method",
                ));
            }
        }
        Ok(old_pos)
    }

    /// Encode a raw-bytes value: string, binary or custom.
    fn set_pair(&mut self, pair: &ValuePair<'_>) -> Result<usize> {
        let old_pos = self.buf.len();
        let value_type = match pair {
            ValuePair::String(_) => ValueType::String,
            ValuePair::Binary(_) => ValueType::Binary,
            ValuePair::Custom { .. } => ValueType::Custom,
        };
        self.check_key_is_string(value_type)?;

        match *pair {
            ValuePair::String(bytes) => {
                self.append_string_bytes(bytes);
            }
            ValuePair::Binary(bytes) => {
                self.buf.reserve(9 + bytes.len());
                self.buf.append_uint(bytes.len() as u64, 0xbf);
                self.buf.extend_from_slice(bytes);
            }
            ValuePair::Custom { size, bytes } => {
                let size = size as usize;
                match bytes {
                    Some(b) => {
                        if b.len() != size {
                            return Err(Error::UnexpectedValue(
                                "custom bytes must match the declared size",
                            ));
                        }
                        self.buf.reserve(size);
                        self.buf.extend_from_slice(b);
                    }
                    // Only space is reserved; the caller fills it in.
                    None => self.buf.resize(old_pos + size),
                }
            }
        }
        Ok(old_pos)
    }

    /// Copy an already-encoded item verbatim.
    fn set_slice(&mut self, item: &Slice<'_>) -> Result<usize> {
        let bytes = item.encoded_bytes()?;
        let old_pos = self.buf.len();
        self.check_key_is_string(item.value_type())?;
        self.buf.reserve(bytes.len());
        self.buf.extend_from_slice(bytes);
        Ok(old_pos)
    }

    fn coerce_int(&self, item: &Value<'_>, msg: &'static str) -> Result<i64> {
        match item.data {
            ValueData::Double(d) => Ok(d as i64),
            ValueData::Int(i) => Ok(i),
            ValueData::UInt(u) => Ok(u as i64),
            _ => Err(Error::UnexpectedValue(msg)),
        }
    }

    fn append_int(&mut self, v: i64) {
        let width = int_width(v);
        self.buf.reserve(1 + width);
        self.buf.push(0x1f + width as u8);
        let bits = if width == 8 {
            v as u64
        } else {
            (v as u64) & ((1u64 << (8 * width)) - 1)
        };
        self.buf.append_length(bits, width);
    }

    fn append_string_bytes(&mut self, bytes: &[u8]) {
        let len = bytes.len();
        if len <= 126 {
            self.buf.reserve(1 + len);
            self.buf.push(0x40 + len as u8);
        } else {
            self.buf.reserve(9 + len);
            self.buf.push(HEAD_STRING_LONG);
            self.buf.append_length(len as u64, 8);
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Begin a compound: push a frame and reserve nine header bytes (one
    /// head byte plus up to eight for byte length and member count).
    fn open_compound(&mut self, head: u8) {
        self.buf.reserve(9);
        self.stack.push(self.buf.len());
        while self.index.len() < self.stack.len() {
            self.index.push(Vec::new());
        }
        self.index[self.stack.len() - 1].clear();
        self.buf.push(head);
        self.buf.extend_from_slice(&[0u8; 8]);
    }
}
