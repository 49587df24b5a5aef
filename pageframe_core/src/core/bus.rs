use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::configuration::Configuration;

use super::queue::ReduceQueue;

/// Shard reduce queues shared by every scan of one engine, plus the signal used
/// to wake idle workers when new frames are published.
pub struct MessageBus {
    queues: Vec<Arc<ReduceQueue>>,
    next_shard: AtomicUsize,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    steal_timeout: Duration,
}

impl MessageBus {
    pub fn new(configuration: &Configuration) -> Self {
        let capacity = configuration.queue_capacity();
        let queues = (0..configuration.shard_count())
            .map(|shard| Arc::new(ReduceQueue::new(shard, capacity)))
            .collect::<Vec<_>>();

        let (wake_tx, wake_rx) = bounded(configuration.worker_count().max(1));

        log::debug!(
            "message bus created [shards={}, capacity={}]",
            queues.len(),
            capacity
        );

        Self {
            queues,
            next_shard: AtomicUsize::new(0),
            wake_tx,
            wake_rx,
            steal_timeout: configuration.steal_timeout(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.queues.len()
    }

    pub fn reduce_queue(&self, shard: usize) -> &Arc<ReduceQueue> {
        &self.queues[shard % self.queues.len()]
    }

    /// Round-robin shard for a new scan.
    pub fn next_shard(&self) -> usize {
        self.next_shard.fetch_add(1, Ordering::Relaxed) % self.queues.len()
    }

    /// Longest a consumer may wait on a saturated shard queue before giving up.
    pub fn steal_timeout(&self) -> Duration {
        self.steal_timeout
    }

    /// Wakes one idle worker. Extra signals are dropped once every worker has one queued.
    pub fn notify_workers(&self) {
        _ = self.wake_tx.try_send(());
    }

    pub(crate) fn wake_receiver(&self) -> Receiver<()> {
        self.wake_rx.clone()
    }
}
