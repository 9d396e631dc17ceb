use crate::canonical::to_page;
use crate::config::{EVENT_BUFFER_SIZE, READ_BUFFER_SIZE};
use crate::error::{DecodeError, Error, Result};
use crate::models::PageBlock;
use crate::parser::{self, xml_error, RawPage};
use crate::sink::PageBlockReader;
use bzip2::read::MultiBzDecoder;
use quick_xml::events::Event;
use quick_xml::name::QName;
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Header {
    Pending,
    Skipped,
    /// `<page>` start tag already consumed while looking for `<siteinfo>`
    PageStarted,
    /// `</mediawiki>` reached while skipping the header
    Finished,
}

/// Reads pages one at a time from a single-stream dump: one `<mediawiki>`
/// document with a leading `<siteinfo>`.
pub struct DumpReader<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    header: Header,
}

pub type DumpFileReader = DumpReader<BufReader<MultiBzDecoder<File>>>;

impl DumpFileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.extension().and_then(|ext| ext.to_str()) != Some("bz2") {
            return Err(Error::invalid_file(path, "dump must be in bzip2 format"));
        }
        let file = File::open(path)
            .map_err(|e| Error::invalid_file(path, format!("failed to open dump: {}", e)))?;
        debug!(path = ?path, "Opened dump");
        Ok(Self::new(BufReader::with_capacity(
            READ_BUFFER_SIZE,
            MultiBzDecoder::new(file),
        )))
    }
}

impl<R: BufRead> DumpReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: Reader::from_reader(source),
            buf: Vec::with_capacity(EVENT_BUFFER_SIZE),
            header: Header::Pending,
        }
    }

    /// Returns the next page, or `None` at the end of the document.
    pub fn read_page(&mut self) -> Result<Option<RawPage>, DecodeError> {
        if self.header == Header::Pending {
            self.skip_header()?;
        }
        match self.header {
            Header::Finished => Ok(None),
            Header::PageStarted => {
                self.header = Header::Skipped;
                parser::read_page_body(&mut self.reader, &mut self.buf).map(Some)
            }
            _ => parser::read_page(&mut self.reader, &mut self.buf),
        }
    }

    fn skip_header(&mut self) -> Result<(), DecodeError> {
        loop {
            self.buf.clear();
            match self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|e| xml_error("mediawiki", e))?
            {
                Event::Start(e) if e.name().as_ref() == b"mediawiki" => break,
                Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
                Event::Text(t) if t.iter().all(u8::is_ascii_whitespace) => {}
                Event::Eof => {
                    return Err(DecodeError::parse(
                        "mediawiki",
                        "stream ended before <mediawiki>",
                    ))
                }
                other => {
                    return Err(DecodeError::parse(
                        "mediawiki",
                        format!("expected <mediawiki>, found {:?}", other),
                    ))
                }
            }
        }

        loop {
            self.buf.clear();
            let siteinfo = match self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|e| xml_error("siteinfo", e))?
            {
                Event::Start(e) if e.name().as_ref() == b"siteinfo" => true,
                Event::Start(e) if e.name().as_ref() == b"page" => {
                    self.header = Header::PageStarted;
                    return Ok(());
                }
                Event::End(e) if e.name().as_ref() == b"mediawiki" => {
                    self.header = Header::Finished;
                    return Ok(());
                }
                Event::Eof => {
                    return Err(DecodeError::parse(
                        "siteinfo",
                        "stream ended inside <mediawiki>",
                    ))
                }
                _ => false,
            };
            if siteinfo {
                self.buf.clear();
                self.reader
                    .read_to_end_into(QName(b"siteinfo"), &mut self.buf)
                    .map_err(|e| xml_error("siteinfo", e))?;
                self.header = Header::Skipped;
                return Ok(());
            }
        }
    }
}

/// Exposes a [`DumpReader`] as a block source.
pub struct DumpBlocks<R> {
    dump: DumpReader<R>,
    block_size: usize,
    closed: bool,
}

impl<R: BufRead> DumpBlocks<R> {
    pub fn new(dump: DumpReader<R>, block_size: usize) -> Self {
        Self {
            dump,
            block_size: block_size.max(1),
            closed: false,
        }
    }
}

impl<R: BufRead> PageBlockReader for DumpBlocks<R> {
    fn next_block(&mut self) -> Result<Option<PageBlock>> {
        if self.closed {
            return Err(Error::Cancelled);
        }
        let mut block = Vec::with_capacity(self.block_size);
        while block.len() < self.block_size {
            match self.dump.read_page()? {
                Some(raw) => block.push(to_page(raw)?),
                None => break,
            }
        }
        Ok((!block.is_empty()).then_some(block))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
