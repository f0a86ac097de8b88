use crate::encryption::DecryptionError;
use crate::object::ObjectId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Neither `%PDF-` nor `%FDF-` was found within the header scan window.
    #[error("no PDF or FDF header found")]
    MissingHeader,

    /// The tail of the file carries no `%%EOF` marker.
    #[error("missing %%EOF marker")]
    MissingEof,

    /// No `startxref` keyword before the last `%%EOF`.
    #[error("missing startxref keyword")]
    MissingStartxref,

    #[error("cross-reference error: {0}")]
    Xref(#[from] XrefError),

    /// The header at a cross-referenced offset names a different object.
    #[error("expected object {} {} at offset {offset}, found {} {}", expected.0, expected.1, found.0, found.1)]
    ObjectMismatch {
        offset: u64,
        expected: ObjectId,
        found: ObjectId,
    },

    /// The declared `/Length` disagrees with where `endstream` actually is.
    #[error("stream at offset {offset} declares length {declared} but no endstream follows it")]
    StreamLengthInvalid { offset: u64, declared: i64 },

    #[error("invalid encryption dictionary: {0}")]
    InvalidEncryption(#[source] DecryptionError),

    /// The security handler rejected the supplied decryption material.
    #[error("the supplied decryption material was rejected")]
    InvalidPassword,

    /// An object transitively requires its own value to be materialized.
    #[error("object {0:?} depends on its own resolution")]
    CycleDetected(ObjectId),

    /// End of file reached inside object or stream data.
    #[error("unexpected end of file inside object data")]
    Truncated,

    /// A local, recoverable error confined to a single object.
    #[error("corrupt object at offset {offset}")]
    CorruptObject { offset: u64 },

    #[error("type mismatch: expected {expected}, found {found}")]
    ObjectType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("missing dictionary key: {0}")]
    DictKey(String),

    #[error("stream filter failed: {0}")]
    Filter(String),
}

#[derive(Debug, Error)]
pub enum XrefError {
    /// The `startxref` offset does not point at a cross-reference.
    #[error("invalid cross-reference start offset")]
    Start,

    /// Entry count mismatch, non-numeric fields, an unknown type column or
    /// a negative offset.
    #[error("malformed cross-reference: {0}")]
    Malformed(&'static str),

    /// The `/Prev` chain revisits an already-seen offset.
    #[error("cross-reference chain loops back to offset {0}")]
    Loop(u64),
}

impl From<DecryptionError> for Error {
    fn from(err: DecryptionError) -> Error {
        match err {
            DecryptionError::IncorrectPassword => Error::InvalidPassword,
            other => Error::InvalidEncryption(other),
        }
    }
}
