//! Partitioned durable event log contract (`trades.raw`, `trades.dlq`,
//! `prices.updates` topics), plus an in-memory implementation.
//!
//! `rdkafka` is the natural backing for this contract (see
//! `examples/other_examples/manifests/estuary-flow/Cargo.toml`) but cannot
//! be built in this environment (no cmake, no system librdkafka, no
//! general internet access for `apt-get`) — see DESIGN.md. The in-memory
//! implementation below is grounded on `pipeline.rs`'s bounded
//! `crossbeam_queue::ArrayQueue` + `push_with_backpressure` pattern, with
//! one queue per partition and a monotonic offset counter, so that a real
//! `rdkafka`-backed implementation of the same trait could be substituted
//! without touching callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

pub type Partition = u32;
pub type Offset = u64;

#[derive(Debug, Clone)]
pub struct Record {
    pub key: String,
    pub value: Vec<u8>,
    pub partition: Partition,
    pub offset: Offset,
}

/// Producer side of the log: publish keyed records, partitioned
/// deterministically by key (partition key = `trader_id`).
#[async_trait::async_trait]
pub trait Producer: Send + Sync {
    async fn publish(&self, key: &str, value: Vec<u8>) -> Result<(Partition, Offset), String>;
}

/// Consumer side: bounded poll plus explicit offset commit, so offsets
/// advance only after the message is committed to its sink or DLQ'd.
#[async_trait::async_trait]
pub trait Consumer: Send + Sync {
    async fn poll(&self) -> Option<Record>;
    async fn commit(&self, partition: Partition, offset: Offset);
}

fn partition_for_key(key: &str, partitions: u32) -> Partition {
    let mut hash: u64 = 1469598103934665603; // FNV offset basis
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash % partitions as u64) as Partition
}

struct PartitionQueue {
    queue: ArrayQueue<Record>,
    next_offset: AtomicU64,
}

/// In-memory partitioned log. Each partition is a bounded lock-free queue,
/// matching `pipeline.rs`'s `MultiThreadQueues` shape; bounded capacity
/// pushes backpressure from a slow downstream back to the producer loop.
pub struct InMemoryLog {
    partitions: Vec<Arc<PartitionQueue>>,
    capacity_per_partition: usize,
}

impl InMemoryLog {
    pub fn new(partitions: u32, capacity_per_partition: usize) -> Self {
        let partitions = (0..partitions)
            .map(|_| {
                Arc::new(PartitionQueue {
                    queue: ArrayQueue::new(capacity_per_partition),
                    next_offset: AtomicU64::new(0),
                })
            })
            .collect();
        Self {
            partitions,
            capacity_per_partition,
        }
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    pub fn len(&self, partition: Partition) -> usize {
        self.partitions[partition as usize].queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity_per_partition
    }
}

#[async_trait::async_trait]
impl Producer for InMemoryLog {
    async fn publish(&self, key: &str, value: Vec<u8>) -> Result<(Partition, Offset), String> {
        let partition = partition_for_key(key, self.partition_count());
        let pq = &self.partitions[partition as usize];
        let offset = pq.next_offset.fetch_add(1, Ordering::SeqCst);
        let record = Record {
            key: key.to_string(),
            value,
            partition,
            offset,
        };

        let mut to_push = record;
        loop {
            match pq.queue.push(to_push) {
                Ok(()) => return Ok((partition, offset)),
                Err(rejected) => {
                    to_push = rejected;
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}

/// A consumer reading a fixed set of partitions (simulating static
/// assignment after group rebalancing).
pub struct InMemoryConsumer {
    log: Arc<InMemoryLog>,
    assigned: Vec<Partition>,
    next_partition_cursor: AtomicU64,
}

impl InMemoryConsumer {
    pub fn new(log: Arc<InMemoryLog>, assigned: Vec<Partition>) -> Self {
        Self {
            log,
            assigned,
            next_partition_cursor: AtomicU64::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Consumer for InMemoryConsumer {
    async fn poll(&self) -> Option<Record> {
        let n = self.assigned.len();
        if n == 0 {
            return None;
        }
        let start = self.next_partition_cursor.fetch_add(1, Ordering::Relaxed) as usize;
        for i in 0..n {
            let partition = self.assigned[(start + i) % n];
            if let Some(record) = self.log.partitions[partition as usize].queue.pop() {
                return Some(record);
            }
        }
        None
    }

    async fn commit(&self, partition: Partition, offset: Offset) {
        tracing::debug!(partition, offset, "committed offset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn qa_same_key_routes_to_same_partition() {
        let log = InMemoryLog::new(12, 64);
        let (p1, _) = log.publish("T001", vec![1]).await.unwrap();
        let (p2, _) = log.publish("T001", vec![2]).await.unwrap();
        assert_eq!(p1, p2);
    }

    #[tokio::test]
    async fn qa_offsets_increase_monotonically_per_partition() {
        let log = Arc::new(InMemoryLog::new(1, 64));
        let (_, o1) = log.publish("a", vec![1]).await.unwrap();
        let (_, o2) = log.publish("a", vec![2]).await.unwrap();
        assert_eq!(o1, 0);
        assert_eq!(o2, 1);
    }

    #[tokio::test]
    async fn qa_consumer_reads_in_fifo_order_per_partition() {
        let log = Arc::new(InMemoryLog::new(1, 64));
        log.publish("a", vec![1]).await.unwrap();
        log.publish("a", vec![2]).await.unwrap();

        let consumer = InMemoryConsumer::new(log, vec![0]);
        let first = consumer.poll().await.unwrap();
        let second = consumer.poll().await.unwrap();
        assert_eq!(first.value, vec![1]);
        assert_eq!(second.value, vec![2]);
    }
}
