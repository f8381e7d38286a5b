//! Batched request processing against the shard store.

use std::sync::Arc;
use std::time::Duration;

use crate::server::{ShardStore, Stats};

use serde::{Deserialize, Serialize};

/// One read or write operation within a batch.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum Op {
    /// Read the key's live value.
    Get {
        /// Key to look up.
        key: String,
    },

    /// Write the value under the key.
    Put {
        /// Key to store under.
        key: String,

        /// Value bytes to store.
        value: String,
    },
}

impl Op {
    /// The key this operation touches.
    pub fn key(&self) -> &str {
        match self {
            Op::Get { key } | Op::Put { key, .. } => key,
        }
    }

    /// True for read operations.
    pub fn is_read(&self) -> bool {
        matches!(self, Op::Get { .. })
    }
}

/// Server-side entry point applying ordered operation batches to the store.
///
/// Operations apply strictly in sequence, so a read of a key written earlier
/// in the same batch observes that write. Results align positionally with
/// the batch: reads yield the found value or an empty string, writes yield
/// an empty string placeholder. No cross-shard lock is held: a batch
/// touching many shards causes many short independent critical sections,
/// with no all-or-nothing guarantee across the batch.
pub struct BatchProcessor {
    /// The sharded store batches apply to.
    store: Arc<ShardStore>,

    /// Counters bumped once per applied batch.
    stats: Arc<Stats>,

    /// Fixed time-to-live attached to every write.
    put_ttl: Duration,
}

impl BatchProcessor {
    /// Creates a new processor over the given store and counters.
    pub fn new(
        store: Arc<ShardStore>,
        stats: Arc<Stats>,
        put_ttl: Duration,
    ) -> Self {
        BatchProcessor {
            store,
            stats,
            put_ttl,
        }
    }

    /// Applies a mixed batch in order, returning one result string per
    /// operation.
    pub fn apply_batch(&self, ops: Vec<Op>) -> Vec<String> {
        let mut values = Vec::with_capacity(ops.len());
        let (mut gets, mut puts) = (0u64, 0u64);

        for op in ops {
            match op {
                Op::Get { key } => {
                    values.push(self.store.get(&key).unwrap_or_default());
                    gets += 1;
                }
                Op::Put { key, value } => {
                    self.store.put(key, value, self.put_ttl);
                    values.push(String::new());
                    puts += 1;
                }
            }
        }

        self.stats.bump(gets, puts);
        values
    }

    /// Applies a read-only batch, for the split wire shape.
    pub fn apply_gets(&self, keys: &[String]) -> Vec<String> {
        let values = keys
            .iter()
            .map(|key| self.store.get(key).unwrap_or_default())
            .collect();
        self.stats.bump(keys.len() as u64, 0);
        values
    }

    /// Applies a write-only batch, for the split wire shape.
    pub fn apply_puts(&self, entries: Vec<(String, String)>) {
        let puts = entries.len() as u64;
        for (key, value) in entries {
            self.store.put(key, value, self.put_ttl);
        }
        self.stats.bump(0, puts);
    }
}

#[cfg(test)]
mod batch_tests {
    use super::*;
    use crate::utils::ShardKvError;
    use std::thread;

    const TEST_TTL: Duration = Duration::from_secs(600);

    fn test_processor(
        put_ttl: Duration,
    ) -> Result<(BatchProcessor, Arc<Stats>), ShardKvError> {
        let store = Arc::new(ShardStore::new(4)?);
        let stats = Arc::new(Stats::new());
        Ok((
            BatchProcessor::new(store, stats.clone(), put_ttl),
            stats,
        ))
    }

    #[test]
    fn op_accessors() {
        let get = Op::Get { key: "77".into() };
        let put = Op::Put {
            key: "77".into(),
            value: "x".into(),
        };
        assert_eq!(get.key(), "77");
        assert_eq!(put.key(), "77");
        assert!(get.is_read());
        assert!(!put.is_read());
    }

    #[test]
    fn batch_positional_alignment() -> Result<(), ShardKvError> {
        let (processor, _) = test_processor(TEST_TTL)?;

        // a same-batch write is visible to the read that follows it
        let values = processor.apply_batch(vec![
            Op::Get { key: "8".into() },
            Op::Put {
                key: "5".into(),
                value: "v5".into(),
            },
            Op::Get { key: "5".into() },
        ]);
        assert_eq!(values, vec!["", "", "v5"]);

        // a key written by an earlier batch shows up in the next one
        processor.apply_batch(vec![Op::Put {
            key: "8".into(),
            value: "v8".into(),
        }]);
        let values = processor.apply_batch(vec![
            Op::Get { key: "8".into() },
            Op::Put {
                key: "5".into(),
                value: "x".into(),
            },
            Op::Get { key: "5".into() },
        ]);
        assert_eq!(values, vec!["v8", "", "x"]);
        Ok(())
    }

    #[test]
    fn batch_counts_by_kind() -> Result<(), ShardKvError> {
        let (processor, stats) = test_processor(TEST_TTL)?;
        processor.apply_batch(vec![
            Op::Get { key: "1".into() },
            Op::Get { key: "2".into() },
            Op::Put {
                key: "3".into(),
                value: "v".into(),
            },
        ]);
        assert_eq!(stats.totals(), (2, 1));
        Ok(())
    }

    #[test]
    fn empty_batch() -> Result<(), ShardKvError> {
        let (processor, stats) = test_processor(TEST_TTL)?;
        assert!(processor.apply_batch(vec![]).is_empty());
        assert_eq!(stats.totals(), (0, 0));
        Ok(())
    }

    #[test]
    fn write_ttl_applies() -> Result<(), ShardKvError> {
        let (processor, _) =
            test_processor(Duration::from_millis(50))?;
        processor.apply_batch(vec![Op::Put {
            key: "t".into(),
            value: "short-lived".into(),
        }]);
        let values =
            processor.apply_batch(vec![Op::Get { key: "t".into() }]);
        assert_eq!(values, vec!["short-lived"]);

        thread::sleep(Duration::from_millis(80));
        let values =
            processor.apply_batch(vec![Op::Get { key: "t".into() }]);
        assert_eq!(values, vec![""]);
        Ok(())
    }

    #[test]
    fn split_shapes_share_semantics() -> Result<(), ShardKvError> {
        let (processor, stats) = test_processor(TEST_TTL)?;
        processor.apply_puts(vec![
            ("a".into(), "1".into()),
            ("b".into(), "2".into()),
        ]);
        let values = processor.apply_gets(&[
            "a".into(),
            "missing".into(),
            "b".into(),
        ]);
        assert_eq!(values, vec!["1", "", "2"]);
        assert_eq!(stats.totals(), (3, 2));
        Ok(())
    }
}
