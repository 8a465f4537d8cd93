//! Client-side block access for zoomcanvas.
//!
//! The [`BlockScheduler`] sits between a consumer (usually a renderer) and a
//! [`BlockSource`]. It answers from a local cache when it can and otherwise
//! queues a request; requests leave the queue in priority order, at the rate
//! the [`Throttler`] allows, and their results land in the cache and on the
//! [`EventBus`].
//!
//! ```text
//!  consumer ── get_block / paint ──► BlockScheduler ──► cache (BlockStore)
//!      ▲                               │ queue
//!      │                               ▼
//!  EventBus ◄── loaded / painted ── dispatch loop ── Throttler ──► BlockSource
//! ```

pub mod config;
pub mod constants;
pub mod events;
pub mod scheduler;
pub mod source;
pub mod throttle;
pub mod view;

pub use config::{CanvasConfig, ConfigError};
pub use events::{BlockEvent, EventBus, HandlerId, PaintFailure, Subscription};
pub use scheduler::{BlockLookup, BlockScheduler, PaintOutcome};
pub use source::{BlockSource, MemoryBlockSource, SourceError};
pub use throttle::{Throttler, TokioClock};
pub use view::{BlockPosition, Rect};
