//! Fixed-point coordinates and wire addresses for zoomcanvas.
//!
//! The canvas is the unit square `[0,1)²`, subdivided recursively. A point at
//! depth `bits` is named by the first `bits` fractional bits of each axis,
//! which quickly outgrows `f64`. This crate is the leaf everything else
//! builds on: it has **no internal zoomcanvas dependencies**.
//!
//! # Depths
//!
//! ```text
//! depth 0   ┌───────────────┐   one block, 64×64 cells (pixel depth 6)
//!           │               │
//! depth 1   ├───────┬───────┤   four blocks (pixel depth 7)
//!           │       │       │
//! ...       └───────┴───────┘
//! pixel depth = block depth + 6
//! ```
//!
//! # Key Types
//!
//! |-----------------|-------------------------------------------------|
//! | Type            | Purpose                                         |
//! |-----------------|-------------------------------------------------|
//! | [`Coord`]       | Binary fixed-point number, base-8 text form     |
//! | [`Precision`]   | Arithmetic context carrying the bit cap         |
//! | [`Location`]    | Validated `(x, y, bits)` inside the unit square |
//! | [`Address`]     | Base64url wire key for a location               |
//! |-----------------|-------------------------------------------------|

pub mod address;
pub mod coord;
pub mod error;

pub use address::{
    Address, BLOCK_BITS, BLOCK_EDGE, CELLS_PER_BLOCK, Location, MIN_PIXEL_BITS, cell_index, encode,
    pixel_index_within_block,
};
pub use coord::{Coord, MAX_PRECISION, Precision};
pub use error::{AddressError, CoordError};
