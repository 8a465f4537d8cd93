//! Block event delivery.
//!
//! Events reach consumers two ways:
//!
//! - **Handlers** registered with [`EventBus::subscribe`] run synchronously
//!   on the task that completed the request. Keep them short.
//! - **Subscriptions** from [`EventBus::listen`] are broadcast receivers
//!   filtered by a dotted subject pattern, for consumers living on their own
//!   task.
//!
//! # Subjects
//!
//! | Event                       | Subject             |
//! |-----------------------------|---------------------|
//! | [`BlockEvent::Loaded`]      | `block.loaded`      |
//! | [`BlockEvent::Painted`]     | `block.painted`     |
//! | [`BlockEvent::PaintFailed`] | `block.paint_failed`|
//!
//! Patterns match token by token; `*` matches any single token and `>`
//! matches everything that remains. `block.*` therefore sees all events.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;

use zoomcanvas_coord::Address;

/// Why a paint request did not stick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaintFailure {
    /// The source reports the pixel had already dried.
    Dry,
    /// The request never got a verdict from the source.
    Transport(String),
}

/// Something happened to a block or pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockEvent {
    /// A fetched block is now in the cache. Cached imagery overlapping
    /// `address` is stale.
    Loaded { address: Address },
    /// The source accepted a paint.
    Painted { address: Address },
    PaintFailed {
        address: Address,
        reason: PaintFailure,
    },
}

impl BlockEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            BlockEvent::Loaded { .. } => "block.loaded",
            BlockEvent::Painted { .. } => "block.painted",
            BlockEvent::PaintFailed { .. } => "block.paint_failed",
        }
    }

    pub fn address(&self) -> &Address {
        match self {
            BlockEvent::Loaded { address }
            | BlockEvent::Painted { address }
            | BlockEvent::PaintFailed { address, .. } => address,
        }
    }
}

/// Whether a dotted subject matches a pattern (`*` one token, `>` the rest).
pub fn matches_subject(pattern: &str, subject: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    for token in pattern.split('.') {
        match (token, subject_tokens.next()) {
            (">", Some(_)) => return true,
            ("*", Some(_)) => {}
            (expected, Some(actual)) if expected == actual => {}
            _ => return false,
        }
    }
    subject_tokens.next().is_none()
}

// ============================================================================
// EventBus
// ============================================================================

/// Identifies a registered handler for [`EventBus::unsubscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&BlockEvent) + Send + Sync>;

/// Fan-out of block events to handlers and subscriptions.
pub struct EventBus {
    tx: broadcast::Sender<BlockEvent>,
    handlers: RwLock<Vec<(HandlerId, Handler)>>,
    next_handler: AtomicU64,
}

impl EventBus {
    /// Create a bus whose subscriptions buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            handlers: RwLock::new(Vec::new()),
            next_handler: AtomicU64::new(0),
        }
    }

    /// Register a callback for every event.
    pub fn subscribe(&self, handler: impl Fn(&BlockEvent) + Send + Sync + 'static) -> HandlerId {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Receive events whose subject matches `pattern`.
    pub fn listen(&self, pattern: &str) -> Subscription {
        Subscription {
            pattern: pattern.to_string(),
            rx: self.tx.subscribe(),
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Deliver an event. Returns how many handlers and listeners it reached.
    pub fn publish(&self, event: BlockEvent) -> usize {
        // Handlers may (un)subscribe, so call them outside the lock.
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in &handlers {
            handler(&event);
        }
        handlers.len() + self.tx.send(event).unwrap_or(0)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// A pattern-filtered receiver of block events.
pub struct Subscription {
    pattern: String,
    rx: broadcast::Receiver<BlockEvent>,
}

impl Subscription {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Next matching event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BlockEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if matches_subject(&self.pattern, event.subject()) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(pattern = %self.pattern, missed, "event subscription lagged");
                }
            }
        }
    }

    /// Next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<BlockEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if matches_subject(&self.pattern, event.subject()) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    tracing::warn!(pattern = %self.pattern, missed, "event subscription lagged");
                }
                Err(_) => return None,
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}
