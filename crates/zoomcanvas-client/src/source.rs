//! Where blocks come from and where paints go.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use zoomcanvas_blocks::{Block, BlockStore, Clock, Color, PaintStatus, SharedBlockStore, shared_block_store};
use zoomcanvas_coord::{Address, MIN_PIXEL_BITS};

/// Failures talking to a block source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The request did not complete (network, timeout, server error).
    #[error("transport error: {0}")]
    Transport(String),

    /// The source refused the request as malformed.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Authoritative home of blocks, usually a remote server.
///
/// `fetch` of an address with no data must return an empty block, not an
/// error.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn fetch(&self, address: &Address) -> Result<Block, SourceError>;

    async fn write(&self, pixel: &Address, color: Color) -> Result<PaintStatus, SourceError>;
}

/// A source backed by an in-process authoritative [`BlockStore`].
#[derive(Debug, Clone)]
pub struct MemoryBlockSource {
    store: SharedBlockStore,
}

impl MemoryBlockSource {
    pub fn new(store: SharedBlockStore) -> Self {
        Self { store }
    }

    /// A fresh authoritative store drying cells after `dry_delay`.
    pub fn with_clock(clock: Arc<dyn Clock>, dry_delay: Duration) -> Self {
        Self::new(shared_block_store(BlockStore::authoritative(clock, dry_delay)))
    }

    pub fn store(&self) -> &SharedBlockStore {
        &self.store
    }
}

#[async_trait]
impl BlockSource for MemoryBlockSource {
    async fn fetch(&self, address: &Address) -> Result<Block, SourceError> {
        Ok(self.store.write().load(address))
    }

    async fn write(&self, pixel: &Address, color: Color) -> Result<PaintStatus, SourceError> {
        let location = pixel
            .decode()
            .map_err(|err| SourceError::Rejected(err.to_string()))?;
        if location.bits() < MIN_PIXEL_BITS {
            return Err(SourceError::Rejected(format!(
                "pixel depth {} is below {MIN_PIXEL_BITS}",
                location.bits()
            )));
        }
        self.store
            .write()
            .paint(pixel, color)
            .map_err(|err| SourceError::Rejected(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zoomcanvas_blocks::ManualClock;
    use zoomcanvas_coord::{Coord, encode};

    fn source() -> (MemoryBlockSource, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (MemoryBlockSource::with_clock(clock.clone(), Duration::from_millis(5_000)), clock)
    }

    #[tokio::test]
    async fn test_fetch_unknown_is_empty() {
        let (source, _) = source();
        let address = encode(&Coord::zero(), &Coord::zero(), 7).unwrap();
        assert_eq!(source.fetch(&address).await.unwrap(), Block::new());
    }

    #[tokio::test]
    async fn test_write_then_dry() {
        let (source, clock) = source();
        let pixel = encode(&Coord::zero(), &Coord::zero(), 9).unwrap();
        assert_eq!(source.write(&pixel, Color::WHITE).await.unwrap(), PaintStatus::Ok);
        clock.advance(5_000);
        assert_eq!(source.write(&pixel, Color::WHITE).await.unwrap(), PaintStatus::Dry);

        let block = source
            .fetch(&encode(&Coord::zero(), &Coord::zero(), 3).unwrap())
            .await
            .unwrap();
        assert!(block.cell(0).is_dry());
    }

    #[tokio::test]
    async fn test_write_rejects_shallow_address() {
        let (source, _) = source();
        let shallow = encode(&Coord::zero(), &Coord::zero(), 8).unwrap();
        assert!(matches!(
            source.write(&shallow, Color::WHITE).await,
            Err(SourceError::Rejected(_))
        ));
    }
}
