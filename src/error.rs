use thiserror::Error;

/// Errors reported at the crate's validated boundaries: row-major matrix
/// construction and binary deserialization.
///
/// Duplicate insertion and unsupported removal are not errors; both are
/// reported through `bool` results on [`crate::SGTree`].
#[derive(Debug, Error, PartialEq)]
pub enum TreeError {
    /// The flat point buffer is not a whole number of rows.
    #[error("point buffer of length {len} is not a multiple of dimension {dim}")]
    DimensionMismatch { len: usize, dim: usize },

    /// The scale base must be strictly greater than one.
    #[error("base must be greater than 1.0, got {0}")]
    InvalidBase(f64),

    /// A serialized tree was built for a different point dimension.
    #[error("serialized tree has dimension {got}, expected {expected}")]
    WrongDimension { expected: usize, got: usize },

    /// The buffer does not start with the serialization magic.
    #[error("buffer is not a serialized tree (bad magic)")]
    BadMagic,

    /// The buffer length disagrees with the exact encoded size.
    #[error("serialized buffer has {got} bytes, expected exactly {expected}")]
    BufferSize { expected: usize, got: usize },

    /// The pre-order and post-order segments are structurally inconsistent.
    #[error("malformed serialized tree: {0}")]
    Malformed(&'static str),
}
