//! Append-only page log.
//!
//! A log file is a single zstd stream of length-delimited records: a `u32`
//! little-endian byte count followed by the bincode encoding of one [`Page`].

use crate::config::{LOG_EXTENSION, MAX_RECORD_SIZE, ZSTD_LEVEL};
use crate::error::{Error, Result, SinkError};
use crate::models::{Page, PageBlock};
use crate::sink::{PageBlockReader, PageBlockWriter};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zstd::stream::read::Decoder as ZstdDecoder;
use zstd::stream::write::Encoder as ZstdEncoder;

const LEN_PREFIX: usize = 4;

fn check_extension(path: &Path) -> Result<()> {
    let ok = path
        .to_str()
        .is_some_and(|p| p.ends_with(LOG_EXTENSION) && p.len() > LOG_EXTENSION.len());
    if ok {
        Ok(())
    } else {
        Err(Error::invalid_file(
            path,
            format!("page log must end in {}", LOG_EXTENSION),
        ))
    }
}

pub struct LogWriter {
    path: PathBuf,
    encoder: Option<ZstdEncoder<'static, BufWriter<File>>>,
    scratch: Vec<u8>,
    pages: u64,
}

impl LogWriter {
    /// Creates a new log. Fails if `path` already exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        check_extension(path)?;

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => Error::invalid_file(path, "page log already exists"),
                _ => SinkError::io(path, e).into(),
            })?;
        let encoder = ZstdEncoder::new(BufWriter::new(file), ZSTD_LEVEL)
            .map_err(|e| SinkError::io(path, e))?;

        debug!(path = ?path, level = ZSTD_LEVEL, "Created page log");
        Ok(Self {
            path: path.to_path_buf(),
            encoder: Some(encoder),
            scratch: Vec::new(),
            pages: 0,
        })
    }

    pub fn pages_written(&self) -> u64 {
        self.pages
    }

    pub fn append(&mut self, page: &Page) -> Result<()> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or(SinkError::Closed("page log"))?;

        self.scratch.clear();
        bincode::serialize_into(&mut self.scratch, page).map_err(SinkError::from)?;
        if self.scratch.len() > MAX_RECORD_SIZE {
            return Err(SinkError::Corrupt {
                path: self.path.clone(),
                detail: format!(
                    "page {} encodes to {} bytes, above the {} byte record limit",
                    page.id,
                    self.scratch.len(),
                    MAX_RECORD_SIZE
                ),
            }
            .into());
        }
        let len = self.scratch.len() as u32;

        encoder
            .write_all(&len.to_le_bytes())
            .and_then(|()| encoder.write_all(&self.scratch))
            .map_err(|e| SinkError::io(&self.path, e))?;
        self.pages += 1;
        Ok(())
    }

    /// Finishes the zstd stream and syncs the file. Idempotent.
    fn finish(&mut self) -> Result<()> {
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };
        let mut writer = encoder.finish().map_err(|e| SinkError::io(&self.path, e))?;
        writer.flush().map_err(|e| SinkError::io(&self.path, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| SinkError::io(&self.path, e))?;
        info!(path = ?self.path, pages = self.pages, "Closed page log");
        Ok(())
    }
}

impl PageBlockWriter for LogWriter {
    fn write_block(&mut self, block: PageBlock) -> Result<()> {
        for page in &block {
            self.append(page)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.finish()
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(path = ?self.path, error = %e, "Failed to finish page log on drop");
        }
    }
}

pub struct LogReader {
    path: PathBuf,
    decoder: Option<ZstdDecoder<'static, BufReader<File>>>,
    block_size: usize,
    exhausted: bool,
    pages: u64,
}

impl LogReader {
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let path = path.as_ref();
        check_extension(path)?;
        let file = File::open(path)
            .map_err(|e| Error::invalid_file(path, format!("failed to open page log: {}", e)))?;
        let decoder = ZstdDecoder::new(file).map_err(|e| SinkError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            decoder: Some(decoder),
            block_size: block_size.max(1),
            exhausted: false,
            pages: 0,
        })
    }

    pub fn pages_read(&self) -> u64 {
        self.pages
    }

    /// Reads one record, or `None` at a clean end of the log.
    pub fn read_page(&mut self) -> Result<Option<Page>> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or(SinkError::Closed("page log reader"))?;
        if self.exhausted {
            return Ok(None);
        }

        let mut prefix = [0u8; LEN_PREFIX];
        let n = read_full(decoder, &mut prefix).map_err(|e| SinkError::io(&self.path, e))?;
        if n == 0 {
            self.exhausted = true;
            return Ok(None);
        }
        if n < LEN_PREFIX {
            return Err(self.corrupt(format!("truncated length prefix after {} pages", self.pages)));
        }

        let len = u32::from_le_bytes(prefix) as usize;
        if len > MAX_RECORD_SIZE {
            return Err(self.corrupt(format!(
                "record length {} after {} pages exceeds {} bytes",
                len, self.pages, MAX_RECORD_SIZE
            )));
        }
        let mut payload = vec![0u8; len];
        if let Err(e) = decoder.read_exact(&mut payload) {
            return Err(match e.kind() {
                io::ErrorKind::UnexpectedEof => {
                    self.corrupt(format!("truncated record after {} pages", self.pages))
                }
                _ => SinkError::io(&self.path, e).into(),
            });
        }

        let page = bincode::deserialize(&payload).map_err(SinkError::from)?;
        self.pages += 1;
        Ok(Some(page))
    }

    fn corrupt(&self, detail: String) -> Error {
        SinkError::Corrupt {
            path: self.path.clone(),
            detail,
        }
        .into()
    }
}

/// Fills `buf` until it is full or the reader hits end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl PageBlockReader for LogReader {
    fn next_block(&mut self) -> Result<Option<PageBlock>> {
        let mut block = Vec::with_capacity(self.block_size);
        while block.len() < self.block_size {
            match self.read_page()? {
                Some(page) => block.push(page),
                None => break,
            }
        }
        if block.is_empty() {
            Ok(None)
        } else {
            Ok(Some(block))
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.decoder.take().is_some() {
            debug!(path = ?self.path, pages = self.pages, "Closed page log reader");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Revision;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn page(id: i32) -> Page {
        Page {
            title: format!("Page {}", id),
            id,
            namespace: (id % 3) as u32,
            redirect_title: if id % 2 == 0 {
                "Target".to_string()
            } else {
                String::new()
            },
            revisions: vec![Revision {
                id: id + 1000,
                timestamp: Utc.with_ymd_and_hms(2019, 12, 31, 23, 59, 59).unwrap(),
                text: "x".repeat(id as usize),
            }],
        }
    }

    fn write_log(path: &Path, blocks: Vec<PageBlock>) {
        let mut writer = LogWriter::create(path).unwrap();
        for block in blocks {
            writer.write_block(block).unwrap();
        }
        writer.close().unwrap();
    }

    fn read_all(reader: &mut LogReader) -> Vec<PageBlock> {
        let mut blocks = Vec::new();
        while let Some(block) = reader.next_block().unwrap() {
            blocks.push(block);
        }
        blocks
    }

    #[test]
    fn reads_back_in_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pages.ld.zs");
        write_log(&path, vec![(1..=4).map(page).collect(), (5..=7).map(page).collect()]);

        let mut reader = LogReader::open(&path, 3).unwrap();
        let blocks = read_all(&mut reader);
        let sizes: Vec<usize> = blocks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        let pages: Vec<Page> = blocks.into_iter().flatten().collect();
        assert_eq!(pages, (1..=7).map(page).collect::<Vec<_>>());
        assert_eq!(reader.pages_read(), 7);

        assert!(reader.next_block().unwrap().is_none());
    }

    #[test]
    fn empty_log_is_exhausted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.ld.zs");
        write_log(&path, vec![]);
        let mut reader = LogReader::open(&path, 10).unwrap();
        assert!(reader.next_block().unwrap().is_none());
    }

    #[test]
    fn rejects_wrong_extension() {
        let dir = TempDir::new().unwrap();
        let result = LogWriter::create(dir.path().join("pages.log"));
        assert!(matches!(result, Err(Error::InvalidFile { .. })));
        let result = LogReader::open(dir.path().join("pages.zst"), 10);
        assert!(matches!(result, Err(Error::InvalidFile { .. })));
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pages.ld.zs");
        write_log(&path, vec![vec![page(1)]]);
        let result = LogWriter::create(&path);
        assert!(matches!(result, Err(Error::InvalidFile { .. })));

        // The existing log is untouched
        let mut reader = LogReader::open(&path, 10).unwrap();
        assert_eq!(read_all(&mut reader), vec![vec![page(1)]]);
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let dir = TempDir::new().unwrap();
        let mut writer = LogWriter::create(dir.path().join("a.ld.zs")).unwrap();
        writer.write_block(vec![page(1)]).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        let err = writer.write_block(vec![page(2)]).unwrap_err();
        assert!(matches!(err, Error::Sink(SinkError::Closed(_))));
        assert_eq!(writer.pages_written(), 1);
    }

    #[test]
    fn drop_finishes_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dropped.ld.zs");
        {
            let mut writer = LogWriter::create(&path).unwrap();
            writer.write_block(vec![page(3), page(4)]).unwrap();
        }
        let mut reader = LogReader::open(&path, 10).unwrap();
        assert_eq!(read_all(&mut reader), vec![vec![page(3), page(4)]]);
    }

    #[test]
    fn truncated_record_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.ld.zs");
        let mut raw = Vec::new();
        raw.extend_from_slice(&100u32.to_le_bytes());
        raw.extend_from_slice(&[0u8; 10]);
        std::fs::write(&path, zstd::encode_all(&raw[..], ZSTD_LEVEL).unwrap()).unwrap();

        let mut reader = LogReader::open(&path, 10).unwrap();
        let err = reader.next_block().unwrap_err();
        assert!(matches!(err, Error::Sink(SinkError::Corrupt { .. })));
    }

    #[test]
    fn oversized_length_prefix_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.ld.zs");
        let mut raw = Vec::new();
        raw.extend_from_slice(&u32::MAX.to_le_bytes());
        raw.extend_from_slice(&[0u8; 16]);
        std::fs::write(&path, zstd::encode_all(&raw[..], ZSTD_LEVEL).unwrap()).unwrap();

        let mut reader = LogReader::open(&path, 10).unwrap();
        match reader.read_page() {
            Err(Error::Sink(SinkError::Corrupt { detail, .. })) => {
                assert!(detail.contains("exceeds"), "{}", detail)
            }
            other => panic!("expected Corrupt, got {:?}", other.map(|p| p.map(|p| p.id))),
        }
    }

    #[test]
    fn truncated_prefix_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.ld.zs");
        std::fs::write(&path, zstd::encode_all(&[1u8, 0][..], ZSTD_LEVEL).unwrap()).unwrap();

        let mut reader = LogReader::open(&path, 10).unwrap();
        assert!(matches!(
            reader.read_page(),
            Err(Error::Sink(SinkError::Corrupt { .. }))
        ));
    }

    #[test]
    fn closed_reader_rejects_reads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.ld.zs");
        write_log(&path, vec![vec![page(1)]]);
        let mut reader = LogReader::open(&path, 10).unwrap();
        reader.close().unwrap();
        reader.close().unwrap();
        assert!(matches!(
            reader.next_block(),
            Err(Error::Sink(SinkError::Closed(_)))
        ));
    }
}
