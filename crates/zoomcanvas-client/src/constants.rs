//! Client configuration defaults.

use std::time::Duration;

/// Time for one throttle slot to refill.
pub const DEFAULT_THROTTLE_PERIOD: Duration = Duration::from_millis(100);

/// Requests admitted back-to-back before throttling starts.
pub const DEFAULT_THROTTLE_BURST: u32 = 10;

/// Shallowest block depth served by `get_block`.
pub const DEFAULT_MIN_BLOCK_DEPTH: u32 = 3;

/// Broadcast channel capacity for block events.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Queue priority of paint requests (lower runs first).
pub const DEFAULT_WRITE_PRIORITY: f64 = -1.0;

/// Queue priority of reads that give none.
pub const DEFAULT_READ_PRIORITY: f64 = 0.0;

/// How long a painted cell stays wet in an authoritative store.
pub const DEFAULT_DRY_DELAY: Duration = Duration::from_millis(5_000);
