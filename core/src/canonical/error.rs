//! Errors raised while canonicalizing a JSON-shaped payload.

use thiserror::Error;

/// Failure modes for [`super::canonicalize`] and [`super::canonical_bytes`].
///
/// These are fatal at the call site: the core never guesses at a
/// substitute encoding for a value it cannot represent canonically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanonicalError {
    /// A floating-point number was not integer-valued (e.g. `1.5`).
    ///
    /// Fixed-point values should be represented as integers (for example,
    /// cents instead of a fractional currency amount) before encoding.
    #[error(
        "non-integer float {path} = {value} is not representable in canonical form; \
         use a fixed-point integer representation instead"
    )]
    Float {
        /// JSON-pointer-ish path to the offending value.
        path: String,
        /// Debug rendering of the offending float.
        value: String,
    },
    /// A number was `NaN`.
    #[error("NaN at {path} is not representable in canonical form")]
    NaN {
        /// JSON-pointer-ish path to the offending value.
        path: String,
    },
    /// A number was `+Infinity` or `-Infinity`.
    #[error("infinite number at {path} is not representable in canonical form")]
    Infinite {
        /// JSON-pointer-ish path to the offending value.
        path: String,
    },
    /// An integer fell outside the signed 64-bit range.
    #[error("integer at {path} is out of the signed 64-bit range")]
    OutOfRange {
        /// JSON-pointer-ish path to the offending value.
        path: String,
    },
    /// A value of an unsupported shape (date, binary blob, custom object)
    /// was encountered.
    #[error("value at {path} has an unsupported type for canonical encoding")]
    UnsupportedType {
        /// JSON-pointer-ish path to the offending value.
        path: String,
    },
    /// Two distinct object keys NFC-normalized to the same string.
    #[error("object at {path} has two keys that normalize to the same key {key:?}")]
    DuplicateKey {
        /// JSON-pointer-ish path to the offending object.
        path: String,
        /// The normalized key shared by both inputs.
        key: String,
    },
}
