use std::num::NonZeroUsize;
use std::thread;

/// Capacity of the work queue and the output queue of the multistream reader
pub const QUEUE_CAPACITY: usize = 1000;

/// Number of shard directories in a page store (shard = id % SHARD_COUNT)
pub const SHARD_COUNT: u32 = 1000;

/// Progress update interval (tick every N blocks)
pub const PROGRESS_INTERVAL: u64 = 100;

/// Pages per block when reading a page log or a sequential dump
pub const LOG_BLOCK_SIZE: usize = 100;

/// Required suffix for page log files
pub const LOG_EXTENSION: &str = ".ld.zs";

/// Largest encoded page accepted in a page log record (256 MB)
pub const MAX_RECORD_SIZE: usize = 256 * 1024 * 1024;

/// zstd compression level for page logs
pub const ZSTD_LEVEL: i32 = 3;

/// Buffer size between a bzip2 decoder and the XML reader
pub const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Initial capacity of a worker's XML event buffer
pub const EVENT_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Number of segment-decoding worker threads
    pub workers: usize,
    /// Capacity of the work and output queues
    pub queue_capacity: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: QUEUE_CAPACITY,
        }
    }
}

impl ReaderConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
