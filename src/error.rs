use std::fmt::Display;

/// VPack builder and reader errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A close or structural operation requires an open array or object.
    NeedOpenCompound,
    /// The operation requires the innermost open compound to be an array.
    NeedOpenArray,
    /// The operation requires the innermost open compound to be an object.
    NeedOpenObject,
    /// remove_last was called on a compound with no members.
    NeedSubvalue,
    /// A key was added while the previous key still awaits its value.
    KeyAlreadyWritten,
    /// An object key must be a string (or a translated integer key when an
    /// attribute translator is configured).
    KeyMustBeString,
    /// The supplied ValueType cannot be encoded here.
    UnexpectedType(&'static str),
    /// The payload kind does not match the declared ValueType.
    UnexpectedValue(&'static str),
    /// A SmallInt outside [-6, 9].
    NumberOutOfRange,
    /// External values are disallowed by the builder options.
    ExternalsDisallowed,
    /// Two members of the same object share an attribute name.
    DuplicateAttributeName,
    /// A translated integer key was found but no attribute translator is
    /// configured.
    NeedAttributeTranslator,
    /// The document is still open; close all compounds first.
    NotSealed,
    /// Array or object index out of bounds.
    IndexOutOfBounds,
    /// A slice accessor was called on a value of a different type.
    InvalidValueType(&'static str),
    /// A string value holds invalid UTF-8.
    InvalidUtf8,
    /// The byte run ends before the encoded value does.
    Truncated,
    /// The value type exists in the format but is not implemented.
    NotImplemented,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NeedOpenCompound => write!(f, "need an open array or object"),
            Error::NeedOpenArray => write!(f, "need an open array"),
            Error::NeedOpenObject => write!(f, "need an open object"),
            Error::NeedSubvalue => write!(f, "need at least one subvalue"),
            Error::KeyAlreadyWritten => write!(f, "attribute key already written"),
            Error::KeyMustBeString => write!(f, "object attribute key must be a string"),
            Error::UnexpectedType(msg) => write!(f, "unexpected value type: {msg}"),
            Error::UnexpectedValue(msg) => write!(f, "unexpected value payload: {msg}"),
            Error::NumberOutOfRange => write!(f, "number out of range"),
            Error::ExternalsDisallowed => write!(f, "external values are disallowed"),
            Error::DuplicateAttributeName => write!(f, "duplicate attribute name"),
            Error::NeedAttributeTranslator => write!(f, "no attribute translator configured"),
            Error::NotSealed => write!(f, "document is not sealed"),
            Error::IndexOutOfBounds => write!(f, "index out of bounds"),
            Error::InvalidValueType(msg) => write!(f, "invalid value type: {msg}"),
            Error::InvalidUtf8 => write!(f, "invalid utf-8 in string value"),
            Error::Truncated => write!(f, "truncated value"),
            Error::NotImplemented => write!(f, "not implemented"),
        }
    }
}

/// A VPack Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;
