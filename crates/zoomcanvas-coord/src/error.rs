//! Error types for coordinate parsing, arithmetic and address decoding.

use thiserror::Error;

/// Errors from constructing or dividing coordinates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordError {
    /// Text was not a signed base-8 number.
    #[error("invalid coordinate {0:?}: expected -?[0-7]+(.[0-7]+)?")]
    Parse(String),

    /// Divisor was exactly zero.
    #[error("division by zero")]
    DivideByZero,
}

/// Errors from decoding a wire address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Not valid unpadded base64url.
    #[error("address {0:?} is not base64url")]
    Encoding(String),

    /// Decoded to zero bytes.
    #[error("empty address")]
    Empty,

    /// Trailer byte does not describe a valid depth.
    #[error("bad trailer byte {trailer:#04x} after {data_len} data bytes")]
    Trailer { trailer: u8, data_len: usize },

    /// Bits below the significant part of the last nibble were set.
    #[error("address has non-zero padding bits")]
    Padding,
}
