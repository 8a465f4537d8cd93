//! Block storage for zoomcanvas.
//!
//! A block is a 64×64 grid of 32-bit cells. Painting a cell at depth `N`
//! blends it into one cell at depth `N-1`, and so on up the tree, so that a
//! zoomed-out view shows an average of the detail below it.
//!
//! # Cell Layout
//!
//! ```text
//!  31  30  29 28  27 ────── 16  15 ── 12  11 ─────── 0
//! ┌───┬───┬──────┬────────────┬─────────┬────────────┐
//! │SET│DRY│unused│  painted   │ inh. α  │ inh. color │
//! └───┴───┴──────┴────────────┴─────────┴────────────┘
//!                  B   G   R               B   G   R
//! ```
//!
//! The low 16 bits are owned by aggregation; the high 16 by painting.

pub mod block;
pub mod cell;
pub mod clock;
pub mod error;
pub mod store;

pub use block::Block;
pub use cell::{Cell, Color};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, Result};
pub use store::{BlockStore, PaintStatus, SharedBlockStore, shared_block_store};
