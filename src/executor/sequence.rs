//! External id sequences reserved in adaptive blocks.

use crate::config::SequenceSettings;
use crate::error::DataResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// External id generator.
#[async_trait]
pub trait Sequencer: Send + Sync {
    /// Reserve `count` consecutive values under `key` and return the first.
    async fn reserve(&self, key: &str, count: u32) -> DataResult<i64>;
}

#[derive(Debug)]
struct Block {
    next: i64,
    end: i64,
    size: u32,
    refilled: Option<Instant>,
}

/// Hands out values from reserved blocks, one block per key.
///
/// Block size doubles while refills come faster than the grow threshold and
/// halves when they come slower than the shrink threshold.
pub struct SequenceReserver {
    sequencer: Arc<dyn Sequencer>,
    settings: SequenceSettings,
    blocks: Mutex<HashMap<String, Block>>,
}

impl std::fmt::Debug for SequenceReserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceReserver")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SequenceReserver {
    pub fn new(sequencer: Arc<dyn Sequencer>, settings: SequenceSettings) -> Self {
        Self {
            sequencer,
            settings,
            blocks: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &SequenceSettings {
        &self.settings
    }

    /// Next value for `key`, reserving a new block when the current one is spent.
    pub async fn next(&self, key: &str) -> DataResult<i64> {
        let mut blocks = self.blocks.lock().await;
        let block = blocks.entry(key.to_string()).or_insert_with(|| Block {
            next: 0,
            end: 0,
            size: self.settings.min_block,
            refilled: None,
        });

        if block.next >= block.end {
            let now = Instant::now();
            let size = adapt_block_size(
                block.size,
                block.refilled.map(|at| now.duration_since(at)),
                &self.settings,
            );
            let first = self.sequencer.reserve(key, size).await?;
            debug!(key = %key, first, size, "Reserved sequence block");
            block.next = first;
            block.end = first + i64::from(size);
            block.size = size;
            block.refilled = Some(now);
        }

        let value = block.next;
        block.next += 1;
        Ok(value)
    }

    /// Size of the last block reserved for `key`.
    pub async fn block_size(&self, key: &str) -> Option<u32> {
        self.blocks.lock().await.get(key).map(|b| b.size)
    }
}

/// Block size for the next refill given the time since the previous one.
pub fn adapt_block_size(
    current: u32,
    since_last: Option<Duration>,
    settings: &SequenceSettings,
) -> u32 {
    let size = match since_last {
        None => settings.min_block,
        Some(elapsed) if elapsed < settings.grow_threshold => current.saturating_mul(2),
        Some(elapsed) if elapsed > settings.shrink_threshold => current / 2,
        Some(_) => current,
    };
    size.clamp(settings.min_block, settings.max_block)
}
