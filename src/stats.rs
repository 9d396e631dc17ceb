use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the threads of a multistream reader
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub index_blocks_read: AtomicU64,
    pub blocks_decoded: AtomicU64,
    pub pages_decoded: AtomicU64,
    pub blocks_delivered: AtomicU64,
    pub errors_discarded: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_index_blocks(&self) {
        self.index_blocks_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_decoded(&self, pages: u64) {
        self.blocks_decoded.fetch_add(1, Ordering::Relaxed);
        self.pages_decoded.fetch_add(pages, Ordering::Relaxed);
    }

    pub fn inc_delivered(&self) {
        self.blocks_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_discarded(&self) {
        self.errors_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn index_blocks(&self) -> u64 {
        self.index_blocks_read.load(Ordering::Relaxed)
    }

    pub fn blocks(&self) -> u64 {
        self.blocks_decoded.load(Ordering::Relaxed)
    }

    pub fn pages(&self) -> u64 {
        self.pages_decoded.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.blocks_delivered.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.errors_discarded.load(Ordering::Relaxed)
    }
}
