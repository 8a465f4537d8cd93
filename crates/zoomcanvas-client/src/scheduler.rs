//! Priority-ordered, throttled access to a [`BlockSource`].
//!
//! # Request Lifecycle
//!
//! ```text
//!   get_block / paint
//!         │ enqueue (one open request per address; newer writes win)
//!         ▼
//!     ┌─────────┐  lowest priority, throttle admits  ┌───────────┐
//!     │ pending │ ─────────────────────────────────► │ in flight │
//!     └─────────┘                                    └───────────┘
//!         │ cancel_pending_read_requests                  │ source replies
//!         ▼                                               ▼
//!      dropped                               removed, cache updated, event
//! ```
//!
//! A single dispatch task drains the queue while it has pending requests.
//! Admitted requests run on their own tasks, so a slow fetch never holds up
//! the queue; the only bound on concurrency is the throttle.
//!
//! Transport failures are logged and the request is forgotten. Asking again
//! queues a fresh request.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use zoomcanvas_blocks::{Block, BlockStore, Clock, Color, PaintStatus, SharedBlockStore, shared_block_store};
use zoomcanvas_coord::{Address, BLOCK_BITS, Coord, Location, MIN_PIXEL_BITS, encode};

use crate::config::CanvasConfig;
use crate::constants::DEFAULT_READ_PRIORITY;
use crate::events::{BlockEvent, EventBus, HandlerId, PaintFailure, Subscription};
use crate::source::BlockSource;
use crate::throttle::{Throttler, TokioClock};

/// Answer to [`BlockScheduler::get_block`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockLookup {
    /// Served from cache.
    Ready(Block),
    /// A fetch is queued or running; watch for [`BlockEvent::Loaded`].
    Pending,
    OutOfBounds,
}

/// Answer to [`BlockScheduler::paint`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaintOutcome {
    /// Painted locally; the write to the source is queued.
    Pending,
    PixelIsDry,
    OutOfBounds,
    /// The pixel's block is not cached yet; fetch it first.
    NotLoaded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RequestKind {
    Read,
    Write(Color),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RequestStatus {
    Pending,
    InFlight,
}

#[derive(Debug)]
struct Request {
    id: u64,
    kind: RequestKind,
    address: Address,
    priority: f64,
    status: RequestStatus,
}

/// What a fulfilment task needs to know about its request.
#[derive(Debug)]
struct Job {
    id: u64,
    kind: RequestKind,
    address: Address,
}

#[derive(Debug)]
struct Queue {
    requests: Vec<Request>,
    next_id: u64,
    running: bool,
    throttler: Throttler,
}

impl Queue {
    fn push(&mut self, kind: RequestKind, address: Address, priority: f64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.requests.push(Request {
            id,
            kind,
            address,
            priority,
            status: RequestStatus::Pending,
        });
        id
    }

    /// Most urgent pending request; ties go to the oldest.
    fn next_pending(&self) -> Option<usize> {
        self.requests
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == RequestStatus::Pending)
            .min_by(|(_, a), (_, b)| a.priority.total_cmp(&b.priority).then(a.id.cmp(&b.id)))
            .map(|(index, _)| index)
    }

    fn remove(&mut self, id: u64) {
        self.requests.retain(|r| r.id != id);
    }

    fn count(&self, status: RequestStatus) -> usize {
        self.requests.iter().filter(|r| r.status == status).count()
    }
}

struct Inner {
    queue: Mutex<Queue>,
    cache: SharedBlockStore,
    source: Arc<dyn BlockSource>,
    events: Arc<EventBus>,
    min_block_depth: u32,
    write_priority: f64,
}

/// Cache-first, throttled front end to a [`BlockSource`].
///
/// Cheap to clone; clones share the queue, cache and event bus. Requests are
/// dispatched on the ambient tokio runtime.
#[derive(Clone)]
pub struct BlockScheduler {
    inner: Arc<Inner>,
}

impl BlockScheduler {
    pub fn new(source: Arc<dyn BlockSource>, config: &CanvasConfig) -> Self {
        Self::with_clock(source, config, Arc::new(TokioClock::new()))
    }

    /// Like [`new`](Self::new), with the throttle reading `clock`.
    pub fn with_clock(source: Arc<dyn BlockSource>, config: &CanvasConfig, clock: Arc<dyn Clock>) -> Self {
        let throttler = Throttler::new(config.throttle_period(), config.throttle.burst, clock);
        info!(
            period_ms = config.throttle.period_ms,
            burst = config.throttle.burst,
            "block scheduler created"
        );
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(Queue {
                    requests: Vec::new(),
                    next_id: 0,
                    running: false,
                    throttler,
                }),
                cache: shared_block_store(BlockStore::cache()),
                source,
                events: Arc::new(EventBus::new(config.scheduler.event_capacity)),
                min_block_depth: config.scheduler.min_block_depth,
                write_priority: config.scheduler.write_priority,
            }),
        }
    }

    /// The local cache. Readers may hold the read lock briefly; the
    /// scheduler writes to it when fetches land and on local paints.
    pub fn cache(&self) -> &SharedBlockStore {
        &self.inner.cache
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Call `handler` for every block event.
    pub fn subscribe(&self, handler: impl Fn(&BlockEvent) + Send + Sync + 'static) -> HandlerId {
        self.inner.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Receive events matching `pattern`, e.g. `block.*`.
    pub fn listen(&self, pattern: &str) -> Subscription {
        self.inner.events.listen(pattern)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queue.lock().count(RequestStatus::Pending)
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.queue.lock().count(RequestStatus::InFlight)
    }

    /// The block at `(x, y)` and depth `level`, from cache or by queueing a
    /// fetch. Lower `priority` is fetched sooner.
    pub fn get_block(&self, x: &Coord, y: &Coord, level: u32, priority: Option<f64>) -> BlockLookup {
        if level < self.inner.min_block_depth {
            return BlockLookup::OutOfBounds;
        }
        let Some(address) = encode(x, y, level) else {
            return BlockLookup::OutOfBounds;
        };
        if let Some(block) = self.inner.cache.read().get_block(&address) {
            return BlockLookup::Ready(block.clone());
        }
        self.enqueue_read(address, priority.unwrap_or(DEFAULT_READ_PRIORITY));
        BlockLookup::Pending
    }

    /// Paint the pixel at `(x, y)`, depth `level`, into the cache now and
    /// queue the write to the source.
    pub fn paint(&self, x: &Coord, y: &Coord, level: u32, color: Color) -> PaintOutcome {
        if level < MIN_PIXEL_BITS {
            return PaintOutcome::OutOfBounds;
        }
        let Some(pixel) = Location::new(x, y, level) else {
            return PaintOutcome::OutOfBounds;
        };
        let block_address = pixel.ancestor(level - BLOCK_BITS).address();
        let address = pixel.address();

        {
            let mut cache = self.inner.cache.write();
            if !cache.contains(&block_address) {
                return PaintOutcome::NotLoaded;
            }
            match cache.paint(&address, color) {
                Ok(PaintStatus::Ok) => {}
                Ok(PaintStatus::Dry) => return PaintOutcome::PixelIsDry,
                Err(err) => {
                    warn!(%address, error = %err, "local paint failed");
                    return PaintOutcome::OutOfBounds;
                }
            }
        }

        self.enqueue_write(address, color);
        PaintOutcome::Pending
    }

    /// Drop every read that has not been sent yet. In-flight reads finish
    /// and still populate the cache. Returns how many were dropped.
    pub fn cancel_pending_read_requests(&self) -> usize {
        let mut queue = self.inner.queue.lock();
        let before = queue.requests.len();
        queue
            .requests
            .retain(|r| !(r.status == RequestStatus::Pending && r.kind == RequestKind::Read));
        let dropped = before - queue.requests.len();
        if dropped > 0 {
            debug!(dropped, "cancelled pending reads");
        }
        dropped
    }

    fn enqueue_read(&self, address: Address, priority: f64) {
        let mut queue = self.inner.queue.lock();
        // Any open request for this address, read or write, suppresses it.
        if queue.requests.iter().any(|r| r.address == address) {
            return;
        }
        let id = queue.push(RequestKind::Read, address, priority);
        debug!(id, priority, "read queued");
        self.start_dispatch(&mut queue);
    }

    fn enqueue_write(&self, address: Address, color: Color) {
        let mut queue = self.inner.queue.lock();
        queue.requests.retain(|r| {
            !(r.status == RequestStatus::Pending
                && matches!(r.kind, RequestKind::Write(_))
                && r.address == address)
        });
        let id = queue.push(RequestKind::Write(color), address, self.inner.write_priority);
        debug!(id, color = color.value(), "write queued");
        self.start_dispatch(&mut queue);
    }

    fn start_dispatch(&self, queue: &mut Queue) {
        if queue.running {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                queue.running = true;
                handle.spawn(dispatch(Arc::clone(&self.inner)));
            }
            Err(_) => warn!("no tokio runtime; request stays queued until the next call from one"),
        }
    }
}

impl std::fmt::Debug for BlockScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.inner.queue.lock();
        f.debug_struct("BlockScheduler")
            .field("pending", &queue.count(RequestStatus::Pending))
            .field("in_flight", &queue.count(RequestStatus::InFlight))
            .field("running", &queue.running)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Dispatch
// ============================================================================

async fn dispatch(inner: Arc<Inner>) {
    // Let requests made in the same tick pile up, so they go out by
    // priority rather than arrival.
    tokio::task::yield_now().await;

    loop {
        let wait = {
            let mut queue = inner.queue.lock();
            let Some(index) = queue.next_pending() else {
                queue.running = false;
                return;
            };
            let wait = queue.throttler.check();
            if wait.is_zero() {
                let request = &mut queue.requests[index];
                request.status = RequestStatus::InFlight;
                let job = Job {
                    id: request.id,
                    kind: request.kind,
                    address: request.address.clone(),
                };
                debug!(id = job.id, address = %job.address, priority = request.priority, "request admitted");
                tokio::spawn(fulfill(Arc::clone(&inner), job));
                continue;
            }
            wait
        };
        tokio::time::sleep(wait).await;
    }
}

async fn fulfill(inner: Arc<Inner>, job: Job) {
    let event = match job.kind {
        RequestKind::Read => match inner.source.fetch(&job.address).await {
            Ok(block) => {
                let kept = inner.cache.write().insert_fetched(job.address.clone(), block);
                kept.then(|| BlockEvent::Loaded {
                    address: job.address.clone(),
                })
            }
            Err(err) => {
                warn!(address = %job.address, error = %err, "block fetch failed");
                None
            }
        },
        RequestKind::Write(color) => match inner.source.write(&job.address, color).await {
            Ok(PaintStatus::Ok) => Some(BlockEvent::Painted {
                address: job.address.clone(),
            }),
            Ok(PaintStatus::Dry) => {
                warn!(address = %job.address, "paint refused: pixel is dry");
                Some(BlockEvent::PaintFailed {
                    address: job.address.clone(),
                    reason: PaintFailure::Dry,
                })
            }
            Err(err) => {
                warn!(address = %job.address, error = %err, "paint failed");
                Some(BlockEvent::PaintFailed {
                    address: job.address.clone(),
                    reason: PaintFailure::Transport(err.to_string()),
                })
            }
        },
    };

    inner.queue.lock().remove(job.id);
    if let Some(event) = event {
        inner.events.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use zoomcanvas_blocks::ManualClock;

    fn queue() -> Queue {
        Queue {
            requests: Vec::new(),
            next_id: 0,
            running: false,
            throttler: Throttler::new(Duration::from_millis(1), 1, Arc::new(ManualClock::new(0))),
        }
    }

    fn address(bits: u32) -> Address {
        encode(&Coord::zero(), &Coord::zero(), bits).unwrap()
    }

    #[test]
    fn test_next_pending_lowest_priority_then_oldest() {
        let mut q = queue();
        q.push(RequestKind::Read, address(3), 5.0);
        let b = q.push(RequestKind::Read, address(4), 1.0);
        let c = q.push(RequestKind::Read, address(5), 1.0);
        q.push(RequestKind::Write(Color::WHITE), address(9), 2.0);

        let first = q.next_pending().unwrap();
        assert_eq!(q.requests[first].id, b);
        q.requests[first].status = RequestStatus::InFlight;

        let second = q.next_pending().unwrap();
        assert_eq!(q.requests[second].id, c);
        assert_eq!(q.count(RequestStatus::Pending), 3);
        assert_eq!(q.count(RequestStatus::InFlight), 1);
    }

    #[test]
    fn test_negative_priority_runs_first() {
        let mut q = queue();
        q.push(RequestKind::Read, address(3), 0.0);
        let write = q.push(RequestKind::Write(Color::BLACK), address(9), -1.0);
        assert_eq!(q.requests[q.next_pending().unwrap()].id, write);
        q.remove(write);
        assert_eq!(q.requests.len(), 1);
    }

    #[test]
    fn test_empty_queue_has_nothing_pending() {
        assert!(queue().next_pending().is_none());
    }
}
