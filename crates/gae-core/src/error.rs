//! Error types shared by the layout engine and the archive codec.
//!
//! Everything reachable from untrusted bytes returns one of these. Broken
//! internal invariants (a label pointing at a freed item, say) are panics.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unexpected bytes.
    #[error("decode error in {what}: {detail}")]
    Decode {
        /// The struct being decoded, e.g. `"cl3 file entry"`.
        what: &'static str,
        /// The check that failed.
        detail: String,
    },

    /// A byte range past the end of a source.
    #[error("out of bounds: {len} bytes at {offset:#x} exceed size {size:#x}")]
    Bounds { offset: u64, len: u64, size: u64 },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn decode(what: &'static str, detail: impl Into<String>) -> Self {
        Error::Decode {
            what,
            detail: detail.into(),
        }
    }

    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }
}

/// Fails with [`Error::Decode`] naming the struct and the stringified check.
macro_rules! validate_field {
    ($what:expr, $cond:expr) => {
        if !($cond) {
            return Err($crate::error::Error::decode($what, stringify!($cond)));
        }
    };
}
pub(crate) use validate_field;
