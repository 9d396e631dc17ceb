use crate::canonical::to_page;
use crate::config::{EVENT_BUFFER_SIZE, READ_BUFFER_SIZE};
use crate::error::{DecodeError, Error};
use crate::index::IndexBlock;
use crate::models::PageBlock;
use crate::parser::{self, RawPage};
use bzip2::read::BzDecoder;
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::trace;

/// Opens a multistream page archive. The path must carry a `.bz2` extension.
pub fn open_archive(path: impl AsRef<Path>) -> Result<File, Error> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("bz2") => {}
        other => {
            return Err(Error::invalid_file(
                path,
                format!("page archive must be in bzip2 format, was: {:?}", other),
            ))
        }
    }
    File::open(path)
        .map_err(|e| Error::invalid_file(path, format!("failed to open page archive: {}", e)))
}

/// Decodes exactly `block.page_count` pages from the segment at `block.offset`.
///
/// A fresh bzip2 decoder is created at the seek position for every call; any
/// failure discards the whole block.
pub fn decode_block<H: Read + Seek>(
    handle: &mut H,
    block: &IndexBlock,
    buf: &mut Vec<u8>,
) -> Result<Vec<RawPage>, DecodeError> {
    let offset = u64::try_from(block.offset)
        .map_err(|_| DecodeError::parse("segment", format!("negative offset {}", block.offset)))?;
    handle
        .seek(SeekFrom::Start(offset))
        .map_err(|e| DecodeError::io("seek", e))?;

    let decoder = BzDecoder::new(&mut *handle);
    let mut reader = Reader::from_reader(BufReader::with_capacity(READ_BUFFER_SIZE, decoder));
    // The closing </mediawiki> lives in a different segment than its start tag
    reader.check_end_names(false);

    let mut pages = Vec::with_capacity(block.page_count);
    while pages.len() < block.page_count {
        match parser::read_page(&mut reader, buf)? {
            Some(page) => pages.push(page),
            None => {
                return Err(DecodeError::parse(
                    "segment",
                    format!(
                        "segment at offset {} ended after {} of {} pages",
                        block.offset,
                        pages.len(),
                        block.page_count
                    ),
                ))
            }
        }
    }

    trace!(offset = block.offset, pages = pages.len(), "Decoded segment");
    Ok(pages)
}

/// A worker's private view of the archive: one handle and one scratch buffer,
/// reused for every block it decodes.
pub struct SegmentDecoder<H = File> {
    handle: H,
    buf: Vec<u8>,
}

impl SegmentDecoder<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::new(open_archive(path)?))
    }
}

impl<H: Read + Seek> SegmentDecoder<H> {
    pub fn new(handle: H) -> Self {
        Self {
            handle,
            buf: Vec::with_capacity(EVENT_BUFFER_SIZE),
        }
    }

    pub fn decode_raw(&mut self, block: &IndexBlock) -> Result<Vec<RawPage>, DecodeError> {
        decode_block(&mut self.handle, block, &mut self.buf)
    }

    /// Decodes and canonicalizes one block.
    pub fn decode(&mut self, block: &IndexBlock) -> Result<PageBlock, DecodeError> {
        self.decode_raw(block)?.into_iter().map(to_page).collect()
    }
}
