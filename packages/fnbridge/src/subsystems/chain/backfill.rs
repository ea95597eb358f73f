use std::{
    collections::{HashSet, VecDeque},
    hash::Hash,
};

use alloy_primitives::{TxHash, B256};
use alloy_rpc_types_eth::{BlockNumberOrTag, Filter, Log};

use super::{error::ChainError, transport::NodeClient};

pub const DEDUPE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillSettings {
    pub chunk_size: u64,
}

/// Fetches logs in `from_block..=head` in chunks, oldest first.
/// Removed (reorged) logs are dropped.
pub async fn fetch_missed_logs<C: NodeClient>(
    client: &C,
    filter: &Filter,
    from_block: u64,
    settings: BackfillSettings,
) -> Result<Vec<Log>, ChainError> {
    let head = client.block_number().await?;
    if from_block > head {
        return Ok(Vec::new());
    }

    let chunk = settings.chunk_size.max(1);
    let mut logs = Vec::new();
    let mut start = from_block;

    while start <= head {
        let end = start.saturating_add(chunk - 1).min(head);
        let ranged = filter
            .clone()
            .from_block(BlockNumberOrTag::Number(start))
            .to_block(BlockNumberOrTag::Number(end));

        tracing::info!("Backfilling logs for blocks [{}..={}]", start, end);
        let chunk_logs = client.get_logs(&ranged).await?;
        logs.extend(chunk_logs.into_iter().filter(|log| !log.removed));

        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }

    Ok(logs)
}

/// Drops logs already seen, by (block hash, tx hash, log index). Logs
/// missing any of those are always forwarded.
#[derive(Debug)]
pub struct LogDedupe {
    seen: DedupeBuffer<LogIdentity>,
}

impl Default for LogDedupe {
    fn default() -> Self {
        Self::new(DEDUPE_CAPACITY)
    }
}

impl LogDedupe {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: DedupeBuffer::new(capacity),
        }
    }

    pub fn should_forward(&mut self, log: &Log) -> bool {
        let (Some(block_hash), Some(tx_hash), Some(log_index)) =
            (log.block_hash, log.transaction_hash, log.log_index)
        else {
            return true;
        };

        self.seen.record(LogIdentity {
            block_hash,
            tx_hash,
            log_index,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LogIdentity {
    block_hash: B256,
    tx_hash: TxHash,
    log_index: u64,
}

#[derive(Debug)]
struct DedupeBuffer<K> {
    set: HashSet<K>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K> DedupeBuffer<K>
where
    K: Eq + Hash + Clone,
{
    fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    // true if the key was new
    fn record(&mut self, key: K) -> bool {
        if !self.set.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }

        true
    }
}
