//! Keyed block storage with upward aggregation.
//!
//! Painting a pixel at depth `N` writes one cell of the block at `N-6`, then
//! walks toward the root, folding each 2×2 group into a single cell of the
//! next shallower level:
//!
//! ```text
//!  block d          block d-1 (same region, half the resolution)
//! ┌──┬──┬──┬──┐    ┌─────┬─────┐
//! │a │b │  │  │    │ avg │     │
//! ├──┼──┼──┼──┤ →  │(abcd)     │
//! │c │d │  │  │    ├─────┼─────┤
//! └──┴──┴──┴──┘    └─────┴─────┘
//! ```
//!
//! The walk stops at the first level whose cell did not change, when the
//! group is too faint to register, or at pixel depth 6.
//!
//! # Modes
//!
//! - **Authoritative** stores create ancestor blocks as needed and dry
//!   painted cells once their block's drying deadline passes.
//! - **Cache** stores mirror blocks fetched from elsewhere. Aggregation only
//!   touches blocks already present, and nothing dries locally.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use zoomcanvas_coord::{Address, BLOCK_BITS, BLOCK_EDGE, Location, MIN_PIXEL_BITS};

use crate::block::Block;
use crate::cell::{Color, blend_quad};
use crate::clock::Clock;
use crate::error::Result;

/// Clears the low bit of both axes: top-left cell of a 2×2 group.
const QUAD_MASK: usize = 0o7676;

/// Outcome of painting one pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaintStatus {
    Ok,
    /// The cell had already dried; nothing changed.
    Dry,
}

#[derive(Debug)]
enum Mode {
    Cache,
    Authoritative {
        clock: Arc<dyn Clock>,
        dry_delay_ms: u64,
    },
}

/// Blocks keyed by address.
#[derive(Debug)]
pub struct BlockStore {
    blocks: HashMap<Address, Block>,
    mode: Mode,
}

impl BlockStore {
    /// A store mirroring blocks fetched from an authoritative source.
    pub fn cache() -> Self {
        Self {
            blocks: HashMap::new(),
            mode: Mode::Cache,
        }
    }

    /// A store that owns its data and dries cells `dry_delay` after painting.
    pub fn authoritative(clock: Arc<dyn Clock>, dry_delay: Duration) -> Self {
        Self {
            blocks: HashMap::new(),
            mode: Mode::Authoritative {
                clock,
                dry_delay_ms: dry_delay.as_millis() as u64,
            },
        }
    }

    pub fn is_authoritative(&self) -> bool {
        matches!(self.mode, Mode::Authoritative { .. })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.blocks.contains_key(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.blocks.keys()
    }

    pub fn get_block(&self, address: &Address) -> Option<&Block> {
        self.blocks.get(address)
    }

    /// The block at `address`, created empty at revision 1 if absent.
    pub fn get_or_create_block(&mut self, address: &Address) -> &mut Block {
        self.blocks.entry(address.clone()).or_default()
    }

    pub fn remove(&mut self, address: &Address) -> Option<Block> {
        self.blocks.remove(address)
    }

    /// Snapshot of the block for serving, drying it first if due.
    ///
    /// Unknown addresses yield an empty block without storing it.
    pub fn load(&mut self, address: &Address) -> Block {
        let now = self.drying().map(|(now, _)| now);
        match self.blocks.get_mut(address) {
            Some(block) => {
                if let Some(now) = now
                    && block.dry(now)
                {
                    debug!(%address, "block dried");
                }
                block.clone()
            }
            None => Block::new(),
        }
    }

    /// Store a block fetched from elsewhere.
    ///
    /// A cached block with a higher revision wins: it already carries local
    /// paints the fetched copy has not seen. Returns whether the fetched
    /// block was kept.
    pub fn insert_fetched(&mut self, address: Address, block: Block) -> bool {
        if let Some(existing) = self.blocks.get(&address)
            && existing.revision > block.revision
        {
            debug!(
                %address,
                cached = existing.revision,
                fetched = block.revision,
                "ignoring stale block"
            );
            return false;
        }
        self.blocks.insert(address, block);
        true
    }

    /// Paint one pixel and aggregate it into the levels above.
    ///
    /// # Panics
    ///
    /// Panics when the address is shallower than [`MIN_PIXEL_BITS`].
    pub fn paint(&mut self, pixel: &Address, color: Color) -> Result<PaintStatus> {
        let location = pixel.decode()?;
        assert!(
            location.bits() >= MIN_PIXEL_BITS,
            "cannot paint at depth {}: pixels start at depth {MIN_PIXEL_BITS}",
            location.bits()
        );

        let block_address = location.ancestor(location.bits() - BLOCK_BITS).address();
        let index = location.cell_index();
        let drying = self.drying();

        let block = self.get_or_create_block(&block_address);
        if let Some((now, _)) = drying {
            block.dry(now);
        }
        let cell = block.cell(index);
        if cell.is_dry() {
            debug!(%pixel, "pixel is dry");
            return Ok(PaintStatus::Dry);
        }

        block.set_cell(index, cell.painted_with(color));
        block.revision += 1;
        if let Some((now, delay)) = drying {
            block.dry_until = Some(now + delay);
        }
        debug!(%pixel, color = color.value(), revision = block.revision, "painted");

        self.bubble(location);
        Ok(PaintStatus::Ok)
    }

    fn drying(&self) -> Option<(u64, u64)> {
        match &self.mode {
            Mode::Cache => None,
            Mode::Authoritative {
                clock,
                dry_delay_ms,
            } => Some((clock.now_millis(), *dry_delay_ms)),
        }
    }

    /// Fold the 2×2 group around `pixel` into its parent, repeatedly.
    fn bubble(&mut self, pixel: Location) {
        let authoritative = self.is_authoritative();
        let mut child = pixel;

        while child.bits() > BLOCK_BITS {
            let child_block = child.ancestor(child.bits() - BLOCK_BITS).address();
            let Some(block) = self.blocks.get(&child_block) else {
                break;
            };
            let corner = child.cell_index() & QUAD_MASK;
            let quad = [
                corner,
                corner + 1,
                corner + BLOCK_EDGE,
                corner + BLOCK_EDGE + 1,
            ]
            .map(|i| block.cell(i));
            let Some(inherited) = blend_quad(quad) else {
                trace!(depth = child.bits(), "group too faint to aggregate");
                break;
            };

            let parent = child.ancestor(child.bits() - 1);
            let parent_address = parent.ancestor(parent.bits() - BLOCK_BITS).address();
            let parent_block = if authoritative {
                self.blocks.entry(parent_address).or_default()
            } else {
                match self.blocks.get_mut(&parent_address) {
                    Some(block) => block,
                    None => break,
                }
            };

            let index = parent.cell_index();
            let cell = parent_block.cell(index);
            if cell.inherited() == inherited {
                break;
            }
            parent_block.set_cell(index, cell.with_inherited(inherited));
            parent_block.revision += 1;
            trace!(depth = parent.bits(), inherited, "aggregated");

            child = parent;
        }
    }
}

/// Thread-safe shared handle to a block store.
pub type SharedBlockStore = Arc<RwLock<BlockStore>>;

pub fn shared_block_store(store: BlockStore) -> SharedBlockStore {
    Arc::new(RwLock::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::clock::ManualClock;
    use pretty_assertions::assert_eq;
    use zoomcanvas_coord::{Coord, encode};

    fn c(s: &str) -> Coord {
        s.parse().unwrap()
    }

    fn pixel(x: &Coord, y: &Coord, bits: u32) -> Address {
        encode(x, y, bits).unwrap()
    }

    fn origin_block(bits: u32) -> Address {
        pixel(&Coord::zero(), &Coord::zero(), bits)
    }

    fn authoritative() -> (BlockStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = BlockStore::authoritative(clock.clone(), Duration::from_millis(5_000));
        (store, clock)
    }

    #[test]
    fn test_paint_sets_cell_and_aggregates() {
        let (mut store, _) = authoritative();
        let status = store
            .paint(&pixel(&c("0.0077"), &c("0.0077"), 12), Color::WHITE)
            .unwrap();
        assert_eq!(status, PaintStatus::Ok);

        let block = store.get_block(&origin_block(6)).unwrap();
        assert_eq!(block.pixels()[4095], 0x8FFF_0000);
        assert_eq!(block.revision, 2);
        assert_eq!(block.dry_until, Some(6_000));

        let parent = store.get_block(&origin_block(5)).unwrap();
        for (i, &p) in parent.pixels().iter().enumerate() {
            let expected = if i == 31 * 64 + 31 { 0x0000_3FFF } else { 0 };
            assert_eq!(p, expected, "cell {i}");
        }
        // alpha 3 from a single cell is too faint to reach depth 4
        assert!(store.get_block(&origin_block(4)).is_none());
    }

    #[test]
    fn test_unchanged_parent_stops_aggregation() {
        let (mut store, _) = authoritative();
        let quad = [
            ("0.0076", "0.0076"),
            ("0.0077", "0.0076"),
            ("0.0076", "0.0077"),
            ("0.0077", "0.0077"),
        ];
        for (x, y) in quad {
            store.paint(&pixel(&c(x), &c(y), 12), Color::WHITE).unwrap();
        }
        let parent = store.get_block(&origin_block(5)).unwrap().clone();
        let grandparent = store.get_block(&origin_block(4)).unwrap().clone();
        assert_eq!(parent.pixels()[31 * 64 + 31], 0x0000_FFFF);
        let painted_revision = store.get_block(&origin_block(6)).unwrap().revision;

        // same pixel, same color: the block changes revision, nothing above it does
        let status = store
            .paint(&pixel(&c("0.0077"), &c("0.0077"), 12), Color::WHITE)
            .unwrap();
        assert_eq!(status, PaintStatus::Ok);
        assert_eq!(store.get_block(&origin_block(6)).unwrap().revision, painted_revision + 1);
        assert_eq!(store.get_block(&origin_block(5)).unwrap(), &parent);
        assert_eq!(store.get_block(&origin_block(4)).unwrap(), &grandparent);
    }

    #[test]
    fn test_striped_block_aggregates_to_all_levels() {
        let (mut store, _) = authoritative();
        let red = Color::new(0x00F).unwrap();
        let blue = Color::new(0xF00).unwrap();
        for y in 0..64u32 {
            for x in 0..64u32 {
                let color = if x % 2 == 0 { red } else { blue };
                let address = pixel(&Coord::new(x, 12), &Coord::new(y, 12), 12);
                assert_eq!(store.paint(&address, color).unwrap(), PaintStatus::Ok);
            }
        }

        for (depth, edge) in [(5, 32), (4, 16), (3, 8)] {
            let block = store.get_block(&origin_block(depth)).unwrap();
            for (i, &p) in block.pixels().iter().enumerate() {
                let inside = i % 64 < edge && i / 64 < edge;
                let expected = if inside { 0x0000_F808 } else { 0 };
                assert_eq!(p, expected, "depth {depth} cell {i}");
            }
        }
        // the fold continues all the way to the root block
        let root = store.get_block(&origin_block(0)).unwrap();
        assert_eq!(root.pixels()[0], 0x0000_F808);
    }

    #[test]
    fn test_cells_dry_after_delay() {
        let (mut store, clock) = authoritative();
        let address = pixel(&c("0.0001"), &c("0.0001"), 12);

        assert_eq!(store.paint(&address, Color::WHITE).unwrap(), PaintStatus::Ok);
        // still wet: repainting is allowed
        assert_eq!(store.paint(&address, Color::BLACK).unwrap(), PaintStatus::Ok);

        clock.advance(5_000);
        assert_eq!(store.paint(&address, Color::WHITE).unwrap(), PaintStatus::Dry);

        let block = store.load(&origin_block(6));
        let cell = block.cell(1 + 64);
        assert!(cell.is_dry());
        assert_eq!(cell.painted(), Color::BLACK);

        // a neighbour in the same block is still paintable
        let neighbour = pixel(&c("0.0002"), &c("0.0001"), 12);
        assert_eq!(store.paint(&neighbour, Color::WHITE).unwrap(), PaintStatus::Ok);
    }

    #[test]
    fn test_load_dries_and_defaults() {
        let (mut store, clock) = authoritative();
        let missing = store.load(&origin_block(9));
        assert_eq!(missing, Block::new());
        assert!(store.is_empty());

        store
            .paint(&pixel(&Coord::zero(), &Coord::zero(), 9), Color::WHITE)
            .unwrap();
        assert!(!store.load(&origin_block(3)).cell(0).is_dry());
        clock.advance(5_000);
        let dried = store.load(&origin_block(3));
        assert!(dried.cell(0).is_dry());
        assert_eq!(dried.dry_until, None);
    }

    #[test]
    fn test_cache_only_aggregates_into_loaded_blocks() {
        let mut store = BlockStore::cache();
        store.insert_fetched(origin_block(6), Block::new());

        store
            .paint(&pixel(&c("0.0077"), &c("0.0077"), 12), Color::WHITE)
            .unwrap();
        assert_eq!(store.len(), 1);

        store.insert_fetched(origin_block(5), Block::new());
        store
            .paint(&pixel(&c("0.0076"), &c("0.0077"), 12), Color::WHITE)
            .unwrap();
        let parent = store.get_block(&origin_block(5)).unwrap();
        // two opaque cells out of four: alpha 30 / 4 = 7
        assert_eq!(parent.pixels()[31 * 64 + 31], 0x0000_7FFF);
        assert_eq!(parent.revision, 2);
    }

    #[test]
    fn test_cache_never_dries() {
        let mut store = BlockStore::cache();
        store.insert_fetched(origin_block(3), Block::new());
        let address = pixel(&Coord::zero(), &Coord::zero(), 9);
        store.paint(&address, Color::WHITE).unwrap();
        assert_eq!(store.get_block(&origin_block(3)).unwrap().dry_until, None);
        assert_eq!(store.paint(&address, Color::BLACK).unwrap(), PaintStatus::Ok);
    }

    #[test]
    fn test_paint_respects_fetched_dry_bit() {
        let mut store = BlockStore::cache();
        let mut pixels = vec![0u32; 4096];
        pixels[0] = Cell::EMPTY.painted_with(Color::WHITE).dried().bits();
        store.insert_fetched(origin_block(3), Block::from_pixels(pixels, 7).unwrap());

        let address = pixel(&Coord::zero(), &Coord::zero(), 9);
        assert_eq!(store.paint(&address, Color::BLACK).unwrap(), PaintStatus::Dry);
        assert_eq!(store.get_block(&origin_block(3)).unwrap().revision, 7);
    }

    #[test]
    fn test_insert_fetched_keeps_newer_revision() {
        let mut store = BlockStore::cache();
        let address = origin_block(3);
        let newer = Block::from_pixels(vec![1; 4096], 5).unwrap();
        let older = Block::from_pixels(vec![2; 4096], 4).unwrap();
        let same = Block::from_pixels(vec![3; 4096], 5).unwrap();

        assert!(store.insert_fetched(address.clone(), newer));
        assert!(!store.insert_fetched(address.clone(), older));
        assert_eq!(store.get_block(&address).unwrap().pixels()[0], 1);
        assert!(store.insert_fetched(address.clone(), same));
        assert_eq!(store.get_block(&address).unwrap().pixels()[0], 3);
    }

    #[test]
    fn test_get_or_create_block() {
        let mut store = BlockStore::cache();
        let address = origin_block(4);
        assert!(store.get_block(&address).is_none());
        assert_eq!(store.get_or_create_block(&address).revision, 1);
        assert!(store.contains(&address));
        assert_eq!(store.addresses().count(), 1);
    }

    #[test]
    #[should_panic(expected = "pixels start at depth 9")]
    fn test_paint_below_pixel_depth_panics() {
        let mut store = BlockStore::cache();
        let _ = store.paint(&origin_block(8), Color::WHITE);
    }
}
