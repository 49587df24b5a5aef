use std::time::Duration;

use crate::{
    DEFAULT_PAGE_FRAME_MAX_ROWS, DEFAULT_QUEUE_CAPACITY, DEFAULT_SHARD_COUNT,
    DEFAULT_STEAL_TIMEOUT, DEFAULT_WORKER_COUNT, DEFAULT_WORKER_IDLE_WAIT,
};

/// Engine knobs for the page frame scan. Every field is optional and falls back
/// to the crate defaults.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub shard_count: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub worker_count: Option<usize>,
    pub page_frame_max_rows: Option<usize>,
    pub worker_idle_wait: Option<Duration>,
    pub steal_timeout: Option<Duration>,
}

impl Configuration {
    pub fn shard_count(&self) -> usize {
        self.shard_count.unwrap_or(DEFAULT_SHARD_COUNT).max(1)
    }

    /// Always a power of two so slot positions can be masked.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or(DEFAULT_QUEUE_CAPACITY)
            .max(1)
            .next_power_of_two()
    }

    /// Zero is valid: consumers then reduce every frame themselves.
    pub fn worker_count(&self) -> usize {
        self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT)
    }

    pub fn page_frame_max_rows(&self) -> usize {
        self.page_frame_max_rows.unwrap_or(DEFAULT_PAGE_FRAME_MAX_ROWS).max(1)
    }

    pub fn worker_idle_wait(&self) -> Duration {
        self.worker_idle_wait.unwrap_or(DEFAULT_WORKER_IDLE_WAIT)
    }

    pub fn steal_timeout(&self) -> Duration {
        self.steal_timeout.unwrap_or(DEFAULT_STEAL_TIMEOUT)
    }
}
