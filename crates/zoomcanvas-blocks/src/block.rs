//! The 64×64 block, the unit of caching and transfer.

use serde::{Deserialize, Serialize};

use zoomcanvas_coord::CELLS_PER_BLOCK;

use crate::cell::Cell;
use crate::error::{Result, StoreError};

/// A 64×64 grid of cells, row-major (`index = x + y * 64`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireBlock")]
pub struct Block {
    pixels: Vec<u32>,
    /// Bumped on every change to any cell.
    pub revision: u64,
    /// Millisecond timestamp after which painted cells dry.
    pub dry_until: Option<u64>,
}

#[derive(Deserialize)]
struct WireBlock {
    pixels: Vec<u32>,
    revision: u64,
    #[serde(default)]
    dry_until: Option<u64>,
}

impl TryFrom<WireBlock> for Block {
    type Error = StoreError;

    fn try_from(wire: WireBlock) -> Result<Self> {
        let mut block = Block::from_pixels(wire.pixels, wire.revision)?;
        block.dry_until = wire.dry_until;
        Ok(block)
    }
}

impl Default for Block {
    fn default() -> Self {
        Self {
            pixels: vec![0; CELLS_PER_BLOCK],
            revision: 1,
            dry_until: None,
        }
    }
}

impl Block {
    /// An all-zero block at revision 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw cells, e.g. a block fetched over the wire.
    pub fn from_pixels(pixels: Vec<u32>, revision: u64) -> Result<Self> {
        if pixels.len() != CELLS_PER_BLOCK {
            return Err(StoreError::CellCount {
                expected: CELLS_PER_BLOCK,
                got: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            revision,
            dry_until: None,
        })
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn cell(&self, index: usize) -> Cell {
        Cell::from_bits(self.pixels[index])
    }

    pub(crate) fn set_cell(&mut self, index: usize, cell: Cell) {
        self.pixels[index] = cell.bits();
    }

    /// Mark every SET cell DRY once `dry_until` has passed.
    ///
    /// Returns true when cells were dried.
    pub fn dry(&mut self, now_ms: u64) -> bool {
        match self.dry_until {
            Some(deadline) if now_ms >= deadline => {}
            _ => return false,
        }
        for pixel in self.pixels.iter_mut() {
            let cell = Cell::from_bits(*pixel);
            if cell.is_set() {
                *pixel = cell.dried().bits();
            }
        }
        self.dry_until = None;
        true
    }

    /// Row-major RGBA8 buffer for display, four bytes per cell.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|&bits| Cell::from_bits(bits).rgba8())
            .collect()
    }
}
