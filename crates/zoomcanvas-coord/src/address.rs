//! Wire addresses for canvas locations.
//!
//! An address names one square of the canvas at a given depth. Each axis
//! contributes its top `bits` fractional bits, interleaved four at a time:
//!
//! ```text
//!   byte 0         byte 1        ...  byte n-1        trailer
//! ┌────┬────┐   ┌────┬────┐         ┌────┬────┐   ┌──────────┐
//! │ y₀ │ x₀ │   │ y₁ │ x₁ │   ...   │ y  │ x  │   │ 000000mm │
//! └────┴────┘   └────┴────┘         └────┴────┘   └──────────┘
//!  high  low                         last nibble     mm = (bits-1) mod 4
//! ```
//!
//! `n = ceil(bits / 4)`. Only the top `mm + 1` bits of the last nibble are
//! significant. The bytes travel as unpadded base64url.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::coord::Coord;
use crate::error::AddressError;

/// Depth difference between a block and its cells (64 = 2^6 per edge).
pub const BLOCK_BITS: u32 = 6;

/// Cells along one edge of a block.
pub const BLOCK_EDGE: usize = 1 << BLOCK_BITS;

/// Cells in one block.
pub const CELLS_PER_BLOCK: usize = BLOCK_EDGE * BLOCK_EDGE;

/// Shallowest pixel depth that can be painted.
pub const MIN_PIXEL_BITS: u32 = 9;

// ============================================================================
// Address
// ============================================================================

/// Base64url wire key for a [`Location`].
///
/// Addresses are opaque keys: two addresses compare equal exactly when they
/// name the same square at the same depth. No spatial ordering is implied.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Validate and wrap wire text.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let bytes = decode_text(text)?;
        decode_bytes(&bytes)?;
        Ok(Address(text.to_string()))
    }

    /// Validate and encode raw address bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        decode_bytes(bytes)?;
        Ok(Address(URL_SAFE_NO_PAD.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw address bytes, trailer included.
    pub fn to_bytes(&self) -> Result<Vec<u8>, AddressError> {
        decode_text(&self.0)
    }

    /// Recover the location this address names.
    pub fn decode(&self) -> Result<Location, AddressError> {
        decode_bytes(&self.to_bytes()?)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

fn decode_text(text: &str) -> Result<Vec<u8>, AddressError> {
    URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|_| AddressError::Encoding(text.to_string()))
}

fn decode_bytes(bytes: &[u8]) -> Result<Location, AddressError> {
    let (&trailer, data) = bytes.split_last().ok_or(AddressError::Empty)?;
    if trailer > 3 || (data.is_empty() && trailer != 3) {
        return Err(AddressError::Trailer {
            trailer,
            data_len: data.len(),
        });
    }

    let bitmod = u32::from(trailer);
    let bits = data.len() as u32 * 4 + bitmod + 1 - 4;
    let shift = 3 - bitmod;

    if let Some(&last) = data.last() {
        let padding = (1u8 << shift) - 1;
        if last & padding != 0 || (last >> 4) & padding != 0 {
            return Err(AddressError::Padding);
        }
    }

    let mut x = BigInt::zero();
    let mut y = BigInt::zero();
    for &byte in data {
        x = (x << 4u32) | BigInt::from(byte & 0xF);
        y = (y << 4u32) | BigInt::from(byte >> 4);
    }

    Ok(Location {
        x: Coord::new(x >> shift, bits),
        y: Coord::new(y >> shift, bits),
        bits,
    })
}

/// Address of `(x, y)` at depth `bits`, or `None` when either coordinate
/// falls outside `[0, 1)`.
pub fn encode(x: &Coord, y: &Coord, bits: u32) -> Option<Address> {
    Location::new(x, y, bits).map(|location| location.address())
}

// ============================================================================
// Location
// ============================================================================

/// A square of the canvas: `(x, y)` floored to `bits` fractional bits.
///
/// Both coordinates are always inside `[0, 1)`, so every location has an
/// address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Location {
    x: Coord,
    y: Coord,
    bits: u32,
}

impl Location {
    /// Floor `(x, y)` to depth `bits`. `None` if either lies outside `[0, 1)`.
    pub fn new(x: &Coord, y: &Coord, bits: u32) -> Option<Self> {
        if !x.is_unit_fraction() || !y.is_unit_fraction() {
            return None;
        }
        Some(Self {
            x: Coord::new(x.to_fixed(bits), bits),
            y: Coord::new(y.to_fixed(bits), bits),
            bits,
        })
    }

    pub fn x(&self) -> &Coord {
        &self.x
    }

    pub fn y(&self) -> &Coord {
        &self.y
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Edge length, `2^-bits`.
    pub fn size(&self) -> Coord {
        Coord::new(1, self.bits)
    }

    pub fn address(&self) -> Address {
        let bitmod = self.bits.wrapping_sub(1) & 3;
        let len = (self.bits.saturating_add(3) >> 2) as usize;
        let shift = 3 - bitmod;

        let mut x = self.x.to_fixed(self.bits) << shift;
        let mut y = self.y.to_fixed(self.bits) << shift;
        let mut bytes = vec![0u8; len + 1];
        for slot in bytes[..len].iter_mut().rev() {
            *slot = low_bits(&x, 0xF) | (low_bits(&y, 0xF) << 4);
            x >>= 4u32;
            y >>= 4u32;
        }
        bytes[len] = bitmod as u8;

        Address(URL_SAFE_NO_PAD.encode(&bytes))
    }

    /// The enclosing location at a shallower depth. Asking for this depth or
    /// a deeper one returns a copy.
    pub fn ancestor(&self, bits: u32) -> Location {
        if bits >= self.bits {
            return self.clone();
        }
        Location {
            x: self.x.truncate(bits as i32),
            y: self.y.truncate(bits as i32),
            bits,
        }
    }

    /// One level shallower.
    pub fn parent(&self) -> Option<Location> {
        self.bits.checked_sub(1).map(|bits| self.ancestor(bits))
    }

    /// The block holding this location as a cell.
    pub fn block(&self) -> Option<Location> {
        self.bits
            .checked_sub(BLOCK_BITS)
            .map(|bits| self.ancestor(bits))
    }

    /// Index of this location's cell inside [`block`](Self::block).
    pub fn cell_index(&self) -> usize {
        cell_index(&self.x, &self.y, self.bits)
    }

    /// True when the point `(x, y)` lies inside this square.
    pub fn covers(&self, x: &Coord, y: &Coord) -> bool {
        x.truncate(self.bits as i32) == self.x && y.truncate(self.bits as i32) == self.y
    }

    /// True when `other` is this square or lies inside it.
    pub fn contains(&self, other: &Location) -> bool {
        other.bits >= self.bits && other.ancestor(self.bits) == *self
    }
}

// ============================================================================
// Cell indexing
// ============================================================================

/// Low bits of `value` under `mask`, in two's complement.
fn low_bits(value: &BigInt, mask: u8) -> u8 {
    (value & BigInt::from(mask)).to_u8().unwrap_or(0)
}

/// Index of the depth-`bits` cell containing `(x, y)` within its block at
/// depth `bits - 6`. Negative coordinates wrap like two's-complement
/// integers, so `-2^-bits` lands in the last column.
pub fn cell_index(x: &Coord, y: &Coord, bits: u32) -> usize {
    let column = low_bits(&x.to_fixed(bits), 0o77) as usize;
    let row = low_bits(&y.to_fixed(bits), 0o77) as usize;
    column + row * BLOCK_EDGE
}

/// Index `0..4096` of a pixel inside its block.
///
/// # Panics
///
/// Panics when `bits` is below [`MIN_PIXEL_BITS`].
pub fn pixel_index_within_block(x: &Coord, y: &Coord, bits: u32) -> usize {
    assert!(
        bits >= MIN_PIXEL_BITS,
        "pixel depth {bits} is below the minimum of {MIN_PIXEL_BITS}"
    );
    cell_index(x, y, bits)
}
