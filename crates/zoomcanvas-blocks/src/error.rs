//! Error types for block storage.

use thiserror::Error;

use zoomcanvas_coord::AddressError;

/// Errors that can occur in block storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The address could not be decoded.
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    /// A block was built from the wrong number of cells.
    #[error("block must have {expected} cells, got {got}")]
    CellCount { expected: usize, got: usize },

    /// Color value wider than 12 bits.
    #[error("color {0:#x} does not fit in 12 bits")]
    Color(u32),
}

/// Result type for block storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
