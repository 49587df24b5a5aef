// Number of independent reduce queues (shards) on the message bus
pub const DEFAULT_SHARD_COUNT: usize = 4;

// Slots per shard reduce queue, rounded up to a power of two
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

pub const DEFAULT_WORKER_COUNT: usize = 4;

// Maximum rows a single page frame may span within one partition
pub const DEFAULT_PAGE_FRAME_MAX_ROWS: usize = 1024 * 64;

pub(crate) const DEFAULT_WORKER_IDLE_WAIT: std::time::Duration =
    std::time::Duration::from_millis(5);

// How long a consumer may go without claiming, collecting or reducing anything
// before its scan fails with a saturated queue
pub const DEFAULT_STEAL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

pub mod core;

pub mod configuration;
