//! Incremental builder for the VPack compact binary document format.
//!
//! VPack is a schemaless binary representation of structured values, in the
//! spirit of CBOR or MessagePack but with two extra affordances: objects
//! carry a cuckoo-hash slot table giving O(1) key lookup, and arrays whose
//! elements share one encoded length drop their offset table entirely.
//!
//! The central type is [`Builder`]: an append-only writer that materializes
//! a document byte-by-byte and, when each array or object is closed,
//! rewrites its header in place to pick the most compact layout. A minimal
//! [`Slice`] reader is included for reading documents back.
//!
//! ```
//! use vpack::{Builder, Value};
//!
//! let mut b = Builder::new();
//! b.open_array(false)?;
//! b.add(Value::int(1))?;
//! b.add(Value::string("two"))?;
//! b.close()?;
//!
//! let doc = b.slice()?;
//! assert_eq!(doc.length()?, 2);
//! assert_eq!(doc.at(1)?.get_string()?, "two");
//! # Ok::<(), vpack::Error>(())
//! ```

pub mod builder;
pub mod error;
pub mod options;
pub mod slice;
pub mod value;

mod buffer;
mod hash;
mod varint;

pub use builder::Builder;
pub use error::{Error, Result};
pub use options::BuilderOptions;
pub use slice::{ArrayIterator, AttributeTranslator, ObjectIterator, Slice};
pub use value::{Value, ValuePair, ValueType};
