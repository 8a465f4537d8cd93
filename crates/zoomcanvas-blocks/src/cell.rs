//! Cell bit layout and 12-bit colors.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Cell carries an authoritative painted value at its own depth.
pub const SET: u32 = 0x8000_0000;
/// Cell can no longer be painted.
pub const DRY: u32 = 0x4000_0000;

const PAINTED_SHIFT: u32 = 16;
const PAINTED_MASK: u32 = 0x0FFF << PAINTED_SHIFT;
const INHERITED_MASK: u32 = 0xFFFF;
const ALPHA_SHIFT: u32 = 12;

/// Full inherited alpha.
pub const OPAQUE: u32 = 15;

// ============================================================================
// Color
// ============================================================================

/// 12-bit color, four bits per channel, red in the lowest nibble.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Color(u16);

impl Color {
    pub const BLACK: Color = Color(0);
    pub const WHITE: Color = Color(0xFFF);

    pub fn new(value: u16) -> Result<Self> {
        if value > 0xFFF {
            return Err(StoreError::Color(u32::from(value)));
        }
        Ok(Color(value))
    }

    /// Build from 4-bit channels; higher bits are ignored.
    pub fn from_rgb(red: u8, green: u8, blue: u8) -> Self {
        Color(u16::from(red & 0xF) | u16::from(green & 0xF) << 4 | u16::from(blue & 0xF) << 8)
    }

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn red(self) -> u8 {
        (self.0 & 0xF) as u8
    }

    pub fn green(self) -> u8 {
        (self.0 >> 4 & 0xF) as u8
    }

    pub fn blue(self) -> u8 {
        (self.0 >> 8 & 0xF) as u8
    }

    fn channels(self) -> [u32; 3] {
        [self.red(), self.green(), self.blue()].map(u32::from)
    }

    fn from_channels(channels: [u32; 3]) -> Self {
        Color((channels[0] | channels[1] << 4 | channels[2] << 8) as u16 & 0xFFF)
    }
}

impl TryFrom<u16> for Color {
    type Error = StoreError;

    fn try_from(value: u16) -> Result<Self> {
        Color::new(value)
    }
}

impl From<Color> for u16 {
    fn from(color: Color) -> Self {
        color.0
    }
}

// ============================================================================
// Cell
// ============================================================================

/// One 32-bit cell of a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Cell(u32);

impl Cell {
    pub const EMPTY: Cell = Cell(0);

    pub const fn from_bits(bits: u32) -> Self {
        Cell(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn is_set(self) -> bool {
        self.0 & SET != 0
    }

    pub fn is_dry(self) -> bool {
        self.0 & DRY != 0
    }

    pub fn painted(self) -> Color {
        Color(((self.0 & PAINTED_MASK) >> PAINTED_SHIFT) as u16)
    }

    /// Low 16 bits: inherited alpha and color together.
    pub fn inherited(self) -> u16 {
        (self.0 & INHERITED_MASK) as u16
    }

    pub fn inherited_alpha(self) -> u8 {
        (self.0 >> ALPHA_SHIFT & 0xF) as u8
    }

    pub fn inherited_color(self) -> Color {
        Color((self.0 & 0xFFF) as u16)
    }

    /// Set the painted color and SET, keeping inherited bits.
    pub fn painted_with(self, color: Color) -> Cell {
        Cell((self.0 & !PAINTED_MASK) | SET | u32::from(color.0) << PAINTED_SHIFT)
    }

    /// Replace the inherited bits, keeping the painted half.
    pub fn with_inherited(self, inherited: u16) -> Cell {
        Cell((self.0 & !INHERITED_MASK) | u32::from(inherited))
    }

    pub fn dried(self) -> Cell {
        Cell(self.0 | DRY)
    }

    /// Display color: painted when SET, inherited when it has alpha,
    /// transparent otherwise.
    pub fn rgba8(self) -> [u8; 4] {
        let color = if self.is_set() {
            self.painted()
        } else if self.inherited_alpha() != 0 {
            self.inherited_color()
        } else {
            return [0; 4];
        };
        // 255 / 15 = 17, so this is the exact rounding of nibble * 255 / 15.
        [color.red() * 17, color.green() * 17, color.blue() * 17, 255]
    }
}

impl From<Cell> for u32 {
    fn from(cell: Cell) -> Self {
        cell.0
    }
}

/// Average a 2×2 group into the inherited bits of their parent cell.
///
/// A SET cell weighs in at full alpha, with its painted color blended over
/// whatever it had inherited from below. An unset cell contributes only its
/// inherited color at its inherited alpha. Returns `None` when the averaged
/// alpha rounds down to zero.
pub fn blend_quad(cells: [Cell; 4]) -> Option<u16> {
    let mut sums = [0u32; 3];
    let mut total_alpha = 0u32;

    for cell in cells {
        let alpha = u32::from(cell.inherited_alpha());
        let inherited = cell.inherited_color().channels();
        if cell.is_set() {
            let painted = cell.painted().channels();
            total_alpha += OPAQUE;
            for ((sum, p), i) in sums.iter_mut().zip(painted).zip(inherited) {
                *sum += p * (OPAQUE - alpha) + i * alpha;
            }
        } else if alpha != 0 {
            total_alpha += alpha;
            for (sum, i) in sums.iter_mut().zip(inherited) {
                *sum += i * alpha;
            }
        }
    }

    let alpha = total_alpha / 4;
    if alpha == 0 {
        return None;
    }
    let color = Color::from_channels(sums.map(|sum| (sum + total_alpha / 2) / total_alpha));
    Some(color.0 | (alpha << ALPHA_SHIFT) as u16)
}
