//! Parallel multistream reader.
//!
//! One producer thread turns the index into [`IndexBlock`]s, N workers decode
//! them against private archive handles, and a supervisor joins everyone and
//! closes the output queue. Every queue operation selects against a shared
//! cancellation channel; the first failure is recorded once and returned to
//! every later caller.

use crate::config::ReaderConfig;
use crate::error::{Error, Result};
use crate::index::{IndexBlock, IndexReader};
use crate::models::PageBlock;
use crate::segment::{open_archive, SegmentDecoder};
use crate::sink::PageBlockReader;
use crate::stats::PipelineStats;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use once_cell::sync::OnceCell;
use std::io::{BufRead, Read, Seek};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

enum Outcome {
    Exhausted,
    Failed(Error),
}

struct Shared {
    outcome: OnceCell<Outcome>,
    cancelled: AtomicBool,
    /// Never sends; dropping it disconnects `cancel_rx` and wakes every select.
    cancel_tx: Mutex<Option<Sender<()>>>,
    cancel_rx: Receiver<()>,
    stats: PipelineStats,
}

impl Shared {
    fn new() -> Self {
        let (cancel_tx, cancel_rx) = bounded(0);
        Self {
            outcome: OnceCell::new(),
            cancelled: AtomicBool::new(false),
            cancel_tx: Mutex::new(Some(cancel_tx)),
            cancel_rx,
            stats: PipelineStats::new(),
        }
    }

    /// Records `err` if nothing was recorded yet and cancels the pipeline.
    fn fail(&self, err: Error) {
        match self.outcome.set(Outcome::Failed(err)) {
            Ok(()) => self.cancel(),
            Err(rejected) => {
                self.stats.inc_discarded();
                if let Outcome::Failed(err) = rejected {
                    warn!(error = %err, "Discarding error after first failure");
                }
            }
        }
    }

    fn close(&self) {
        if self.outcome.set(Outcome::Failed(Error::Cancelled)).is_ok() {
            debug!("Multistream reader cancelled");
        }
        self.cancel();
    }

    fn finish(&self) {
        let _ = self.outcome.set(Outcome::Exhausted);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn failure(&self) -> Option<Error> {
        match self.outcome.get() {
            Some(Outcome::Failed(err)) => Some(err.clone()),
            _ => None,
        }
    }
}

/// Cancels a [`MultiStreamReader`] from any thread.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.shared.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}

/// Reads page blocks out of a multistream archive using parallel workers.
///
/// Blocks arrive in worker completion order, not index order; pages inside a
/// block keep their archive order. Dropping the reader cancels it.
pub struct MultiStreamReader {
    pages: Receiver<PageBlock>,
    shared: Arc<Shared>,
    closed: bool,
}

impl MultiStreamReader {
    /// Opens the index and archive files and starts the pipeline.
    ///
    /// Each worker opens its own handle on `archive_path`.
    pub fn open(
        index_path: impl AsRef<Path>,
        archive_path: impl AsRef<Path>,
        config: ReaderConfig,
    ) -> Result<Self> {
        let index = IndexReader::open(index_path)?;
        let archive_path = archive_path.as_ref().to_path_buf();
        // Fail fast on a bad archive path instead of inside every worker
        open_archive(&archive_path)?;

        Self::from_source(index, move || open_archive(&archive_path), config)
    }

    /// Starts the pipeline over an already opened index and a factory that
    /// yields one independent archive handle per worker.
    pub fn from_source<R, H, F>(index: IndexReader<R>, open: F, config: ReaderConfig) -> Result<Self>
    where
        R: BufRead + Send + 'static,
        H: Read + Seek + Send + 'static,
        F: Fn() -> Result<H> + Send + Sync + 'static,
    {
        let workers = config.workers.max(1);
        let capacity = config.queue_capacity.max(1);
        let shared = Arc::new(Shared::new());
        let (blocks_tx, blocks_rx) = bounded::<IndexBlock>(capacity);
        let (pages_tx, pages_rx) = bounded::<PageBlock>(capacity);

        // Built first so an early return below cancels whatever already runs
        let reader = Self {
            pages: pages_rx,
            shared: Arc::clone(&shared),
            closed: false,
        };

        let mut handles = Vec::with_capacity(workers + 1);
        let s = Arc::clone(&shared);
        handles.push((
            "index",
            spawn("wikistream-index".to_string(), "index", move || {
                run_producer(index, blocks_tx, &s)
            })?,
        ));

        let open = Arc::new(open);
        for i in 0..workers {
            let s = Arc::clone(&shared);
            let open = Arc::clone(&open);
            let blocks = blocks_rx.clone();
            let pages = pages_tx.clone();
            handles.push((
                "worker",
                spawn(format!("wikistream-worker-{}", i), "worker", move || {
                    run_worker(&*open, blocks, pages, &s)
                })?,
            ));
        }
        drop(blocks_rx);

        let s = Arc::clone(&shared);
        spawn("wikistream-supervisor".to_string(), "supervisor", move || {
            supervise(handles, pages_tx, &s)
        })?;

        info!(workers, capacity, "Started multistream reader");
        Ok(reader)
    }

    /// Returns the next decoded block, `Ok(None)` once every block has been
    /// delivered, or the first recorded error.
    pub fn next_block(&mut self) -> Result<Option<PageBlock>> {
        if self.closed {
            return Err(self.shared.failure().unwrap_or(Error::Cancelled));
        }
        if let Some(err) = self.shared.failure() {
            return Err(err);
        }

        select! {
            recv(self.pages) -> msg => match msg {
                Ok(block) => {
                    if let Some(err) = self.shared.failure() {
                        return Err(err);
                    }
                    self.shared.stats.inc_delivered();
                    Ok(Some(block))
                }
                Err(_) => self.terminal(),
            },
            recv(self.shared.cancel_rx) -> _ => self.terminal(),
        }
    }

    /// Signals cancellation. Idempotent; does not wait for threads to exit.
    pub fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.shared.close();
        Ok(())
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.shared.stats
    }

    fn terminal(&self) -> Result<Option<PageBlock>> {
        match self.shared.outcome.get() {
            Some(Outcome::Exhausted) => Ok(None),
            Some(Outcome::Failed(err)) => Err(err.clone()),
            None => Err(Error::Cancelled),
        }
    }
}

impl PageBlockReader for MultiStreamReader {
    fn next_block(&mut self) -> Result<Option<PageBlock>> {
        MultiStreamReader::next_block(self)
    }

    fn close(&mut self) -> Result<()> {
        MultiStreamReader::close(self)
    }
}

impl Drop for MultiStreamReader {
    fn drop(&mut self) {
        self.shared.close();
    }
}

fn spawn<F>(name: String, role: &'static str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name)
        .spawn(f)
        .map_err(|e| Error::Spawn(role, Arc::new(e)))
}

fn run_producer<R: BufRead>(mut index: IndexReader<R>, blocks: Sender<IndexBlock>, shared: &Shared) {
    loop {
        match index.read_block() {
            Ok(Some(block)) => {
                shared.stats.inc_index_blocks();
                select! {
                    send(blocks, block) -> res => {
                        if res.is_err() {
                            return;
                        }
                    },
                    recv(shared.cancel_rx) -> _ => return,
                }
            }
            Ok(None) => {
                debug!(blocks = shared.stats.index_blocks(), "Index exhausted");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read index");
                shared.fail(e.into());
                return;
            }
        }
    }
}

fn run_worker<H, F>(open: &F, blocks: Receiver<IndexBlock>, pages: Sender<PageBlock>, shared: &Shared)
where
    H: Read + Seek,
    F: Fn() -> Result<H>,
{
    let handle = match open() {
        Ok(handle) => handle,
        Err(e) => {
            shared.fail(e);
            return;
        }
    };
    let mut decoder = SegmentDecoder::new(handle);

    while !shared.is_cancelled() {
        let block = select! {
            recv(blocks) -> msg => match msg {
                Ok(block) => block,
                Err(_) => return,
            },
            recv(shared.cancel_rx) -> _ => return,
        };

        let decoded = match decoder.decode(&block) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(offset = block.offset, error = %e, "Failed to decode segment");
                shared.fail(e.into());
                return;
            }
        };
        shared.stats.add_decoded(decoded.len() as u64);

        if shared.is_cancelled() {
            return;
        }
        select! {
            send(pages, decoded) -> res => {
                if res.is_err() {
                    return;
                }
            },
            recv(shared.cancel_rx) -> _ => return,
        }
    }
}

/// Joins every pipeline thread, then records exhaustion and closes the
/// output queue by dropping the last sender.
fn supervise(handles: Vec<(&'static str, JoinHandle<()>)>, pages: Sender<PageBlock>, shared: &Shared) {
    for (role, handle) in handles {
        if handle.join().is_err() {
            error!(role, "Pipeline thread panicked");
            shared.fail(Error::Panicked(role));
        }
    }
    shared.finish();
    debug!(
        blocks = shared.stats.blocks(),
        pages = shared.stats.pages(),
        "All pipeline threads finished"
    );
    drop(pages);
}
