//! Wikistream: parallel reader for Wikipedia multistream XML dumps
//!
//! Wikipedia publishes its article dump in two companion files: a plaintext
//! index (`offset:id:title` per line, usually bzip2-compressed) and a page
//! archive built from many independently compressed bzip2 segments. This
//! crate uses the index to seek straight to each segment and decodes the
//! segments concurrently:
//!
//! 1. **Index** -- Aggregate consecutive index rows sharing an offset into
//!    `(offset, page_count)` blocks
//! 2. **Decode** -- Worker threads seek to a block, open a fresh bzip2
//!    decoder and stream exactly `page_count` `<page>` elements out of it
//! 3. **Deliver** -- Decoded blocks are handed out through a bounded queue
//!    with cooperative cancellation and first-error capture
//! 4. **Transfer** -- A pump copies blocks into a page store or page log
//!
//! # Architecture
//!
//! - **Independent handles** -- Each worker owns its archive handle and
//!   scratch buffer; nothing is shared behind a lock
//! - **Bounded queues** -- crossbeam channels provide backpressure between
//!   the index producer, workers and consumer
//! - **First error wins** -- The first failure is stored once and returned
//!   by every later `next_block()` call
//! - **Atomic counters** -- Lock-free pipeline statistics
//!
//! # Key Modules
//!
//! - [`index`] -- Index row parsing and block aggregation
//! - [`parser`] -- Streaming `<page>` parser and writer
//! - [`segment`] -- Seek-and-decode of one compressed segment
//! - [`canonical`] -- Conversion to the canonical [`models::Page`]
//! - [`pipeline`] -- The concurrent [`pipeline::MultiStreamReader`]
//! - [`dump`] -- Sequential reader for single-stream dumps
//! - [`sink`] -- Reader/writer traits and the transfer pump
//! - [`store`] -- Sharded on-disk page store
//! - [`pagelog`] -- Append-only zstd page log
//! - [`stats`] -- Thread-safe atomic counters
//! - [`config`] -- Constants and reader configuration
//!
//! # Example Usage
//!
//! ```bash
//! # Decode a multistream dump into a page store with 8 workers
//! wikistream parse --index-file enwiki-multistream-index.txt.bz2 \
//!     --pages-file enwiki-multistream.xml.bz2 -o pages/ --workers 8
//!
//! # Write a page log instead, then replay it into a store
//! wikistream parse --index-file index.txt.bz2 --pages-file pages.xml.bz2 \
//!     --output log -o pages.ld.zs
//! wikistream replay -i pages.ld.zs -o pages/
//! ```

pub mod canonical;
pub mod config;
pub mod dump;
pub mod error;
pub mod index;
pub mod models;
pub mod pagelog;
pub mod parser;
pub mod pipeline;
pub mod segment;
pub mod sink;
pub mod stats;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
