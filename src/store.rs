use crate::config::SHARD_COUNT;
use crate::error::{Result, SinkError};
use crate::models::{Page, PageBlock};
use crate::sink::PageBlockWriter;
use bincode::Options;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Point lookups and writes keyed by page id.
pub trait PageStore {
    fn get(&self, id: i32) -> Result<Option<Page>>;

    fn put(&self, page: &Page) -> Result<()>;
}

/// Page store laid out as `{id % SHARD_COUNT:03}/{id}.bin`, one bincode value
/// per file.
pub struct ShardedStore {
    root: PathBuf,
    pages_written: AtomicU64,
    closed: bool,
}

impl ShardedStore {
    /// Creates an empty store at `root`, removing anything already there.
    pub fn create(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if root.exists() {
            warn!(path = ?root, "Removing existing page store");
            fs::remove_dir_all(root).map_err(|e| SinkError::io(root, e))?;
        }
        fs::create_dir_all(root).map_err(|e| SinkError::io(root, e))?;
        info!(path = ?root, "Created page store");
        Ok(Self::at(root))
    }

    /// Opens an existing store for lookups and further writes.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            let e = io::Error::new(io::ErrorKind::NotFound, "page store directory not found");
            return Err(SinkError::io(root, e).into());
        }
        Ok(Self::at(root))
    }

    fn at(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            pages_written: AtomicU64::new(0),
            closed: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, id: i32) -> PathBuf {
        let shard = id.rem_euclid(SHARD_COUNT as i32);
        self.root
            .join(format!("{:03}", shard))
            .join(format!("{}.bin", id))
    }

    pub fn pages_written(&self) -> u64 {
        self.pages_written.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SinkError::Closed("page store").into());
        }
        Ok(())
    }
}

impl PageStore for ShardedStore {
    fn get(&self, id: i32) -> Result<Option<Page>> {
        let path = self.path_for(id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SinkError::io(&path, e).into()),
        };
        let file_size = file.metadata().map_err(|e| SinkError::io(&path, e))?.len();

        // Same layout as `bincode::serialize_into`, bounded by the file size
        let options = bincode::options()
            .with_fixint_encoding()
            .allow_trailing_bytes()
            .with_limit(file_size.saturating_add(1024));
        let page = options
            .deserialize_from(BufReader::new(file))
            .map_err(SinkError::from)?;
        Ok(Some(page))
    }

    /// Writes to a temp file beside the target and renames it into place.
    fn put(&self, page: &Page) -> Result<()> {
        self.ensure_open()?;
        let path = self.path_for(page.id);
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(|e| SinkError::io(dir, e))?;

        let tmp_path = path.with_extension("bin.tmp");
        let file = File::create(&tmp_path).map_err(|e| SinkError::io(&tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, page).map_err(SinkError::from)?;
        writer.flush().map_err(|e| SinkError::io(&tmp_path, e))?;
        drop(writer);

        fs::rename(&tmp_path, &path).map_err(|e| SinkError::io(&path, e))?;
        self.pages_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl PageBlockWriter for ShardedStore {
    fn write_block(&mut self, block: PageBlock) -> Result<()> {
        self.ensure_open()?;
        let store = &*self;
        block.par_iter().try_for_each(|page| store.put(page))?;
        debug!(pages = block.len(), "Stored page block");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            info!(pages = self.pages_written(), path = ?self.root, "Closed page store");
        }
        Ok(())
    }
}
