use crate::config::READ_BUFFER_SIZE;
use crate::error::{Error, IndexError};
use bzip2::read::MultiBzDecoder;
use memchr::memchr;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::num::ParseIntError;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// One line of the multistream index: `offset:id:title`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub offset: i64,
    pub page_id: i32,
    pub title: String,
}

/// Byte offset of one compressed segment and the number of pages inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBlock {
    pub offset: i64,
    pub page_count: usize,
}

impl IndexBlock {
    fn starting_at(offset: i64) -> Self {
        Self {
            offset,
            page_count: 1,
        }
    }
}

pub type BoxedIndexSource = Box<dyn BufRead + Send>;

/// Reads rows and blocks from a multistream index.
pub struct IndexReader<R> {
    source: R,
    line: Vec<u8>,
    line_no: u64,
    pending: Option<IndexBlock>,
}

impl IndexReader<BoxedIndexSource> {
    /// Opens an index file. `.bz2` files are decoded as (multi-stream) bzip2,
    /// anything else is read as plain text.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::invalid_file(path, format!("failed to open index file: {}", e)))?;

        let is_bz2 = path.extension().is_some_and(|ext| ext == "bz2");
        let source: BoxedIndexSource = if is_bz2 {
            Box::new(BufReader::with_capacity(
                READ_BUFFER_SIZE,
                MultiBzDecoder::new(file),
            ))
        } else {
            Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file))
        };

        debug!(path = ?path, compressed = is_bz2, "Opened index stream");
        Ok(Self::new(source))
    }
}

impl<R: BufRead> IndexReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            line: Vec::new(),
            line_no: 0,
            pending: None,
        }
    }

    /// Returns the next row, or `None` once the stream is exhausted.
    pub fn read_row(&mut self) -> Result<Option<IndexRow>, IndexError> {
        if !self.next_line()? {
            return Ok(None);
        }
        let (offset, page_id, title) = parse_fields(&self.line, self.line_no)?;
        Ok(Some(IndexRow {
            offset,
            page_id,
            title: String::from_utf8_lossy(title).into_owned(),
        }))
    }

    /// Aggregates consecutive rows sharing an offset into one block.
    ///
    /// After the trailing block has been returned every call yields `None`.
    pub fn read_block(&mut self) -> Result<Option<IndexBlock>, IndexError> {
        loop {
            if !self.next_line()? {
                return Ok(self.pending.take());
            }
            let (offset, _, _) = parse_fields(&self.line, self.line_no)?;

            let Some(current) = self.pending.as_mut() else {
                self.pending = Some(IndexBlock::starting_at(offset));
                continue;
            };

            if offset == current.offset {
                current.page_count += 1;
                continue;
            }
            if offset < current.offset {
                return Err(IndexError::InvalidOffset {
                    line: self.line_no,
                    detail: format!("offset {} follows larger offset {}", offset, current.offset),
                });
            }

            return Ok(self.pending.replace(IndexBlock::starting_at(offset)));
        }
    }

    /// Reads the next line into `self.line` without its line terminator.
    /// Titles are not required to be UTF-8.
    fn next_line(&mut self) -> Result<bool, IndexError> {
        self.line.clear();
        let n = self
            .source
            .read_until(b'\n', &mut self.line)
            .map_err(|e| IndexError::Io(Arc::new(e)))?;
        if n == 0 {
            return Ok(false);
        }
        self.line_no += 1;

        while matches!(self.line.last(), Some(b'\n' | b'\r')) {
            self.line.pop();
        }
        Ok(true)
    }
}

impl<R: BufRead> Iterator for IndexReader<R> {
    type Item = Result<IndexBlock, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_block().transpose()
    }
}

/// Splits `offset:id:title`. Only the first two colons are structural.
fn parse_fields(line: &[u8], line_no: u64) -> Result<(i64, i32, &[u8]), IndexError> {
    let first = memchr(b':', line).ok_or(IndexError::BadRecord { line: line_no })?;
    let second = memchr(b':', &line[first + 1..])
        .map(|i| first + 1 + i)
        .ok_or(IndexError::BadRecord { line: line_no })?;

    let offset_field = &line[..first];
    let offset: i64 = std::str::from_utf8(offset_field)
        .map_err(|e| e.to_string())
        .and_then(|field| field.parse().map_err(|e: ParseIntError| e.to_string()))
        .map_err(|detail| IndexError::InvalidOffset {
            line: line_no,
            detail: format!("{:?}: {}", String::from_utf8_lossy(offset_field), detail),
        })?;
    if offset < 0 {
        return Err(IndexError::InvalidOffset {
            line: line_no,
            detail: format!("negative offset {}", offset),
        });
    }

    let page_id: i32 = std::str::from_utf8(&line[first + 1..second])
        .map_err(|_| IndexError::BadRecord { line: line_no })?
        .parse()
        .map_err(|source| IndexError::ParseFailed {
            context: "ID",
            line: line_no,
            source,
        })?;

    Ok((offset, page_id, &line[second + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(input: &str) -> IndexReader<Cursor<&[u8]>> {
        IndexReader::new(Cursor::new(input.as_bytes()))
    }

    fn block(offset: i64, page_count: usize) -> IndexBlock {
        IndexBlock { offset, page_count }
    }

    const VALID: &str = "1:10:A\n1:11:B\n1:12:C\n2:13:D\n2:14:E\n2:15:F\n3:16:G";

    #[test]
    fn read_row_parses_fields() {
        let mut r = reader("1:10:A\n2:13:D\n");
        assert_eq!(
            r.read_row().unwrap(),
            Some(IndexRow {
                offset: 1,
                page_id: 10,
                title: "A".to_string()
            })
        );
        assert_eq!(r.read_row().unwrap().unwrap().page_id, 13);
        assert_eq!(r.read_row().unwrap(), None);
    }

    #[test]
    fn read_row_keeps_colons_in_title() {
        let mut r = reader("600:42:Wikipedia:Manual of Style: Titles\n");
        let row = r.read_row().unwrap().unwrap();
        assert_eq!(row.offset, 600);
        assert_eq!(row.page_id, 42);
        assert_eq!(row.title, "Wikipedia:Manual of Style: Titles");
    }

    #[test]
    fn read_row_strips_crlf() {
        let mut r = reader("5:1:Windows line\r\n");
        assert_eq!(r.read_row().unwrap().unwrap().title, "Windows line");
    }

    #[test]
    fn read_row_empty_input() {
        let mut r = reader("");
        assert_eq!(r.read_row().unwrap(), None);
    }

    #[test]
    fn read_row_incomplete_record() {
        let mut r = reader("abc123");
        assert!(matches!(r.read_row(), Err(IndexError::BadRecord { line: 1 })));
        assert_eq!(r.read_row().unwrap(), None);
    }

    #[test]
    fn read_row_two_fields_is_bad_record() {
        let mut r = reader("1:10");
        assert!(matches!(r.read_row(), Err(IndexError::BadRecord { .. })));
    }

    #[test]
    fn read_row_invalid_offset() {
        let mut r = reader("x1:10:A");
        assert!(matches!(r.read_row(), Err(IndexError::InvalidOffset { .. })));
    }

    #[test]
    fn read_row_negative_offset() {
        let mut r = reader("-1:10:A");
        assert!(matches!(r.read_row(), Err(IndexError::InvalidOffset { .. })));
    }

    #[test]
    fn read_row_invalid_id() {
        let mut r = reader("1:ten:A");
        match r.read_row() {
            Err(IndexError::ParseFailed { context, line, .. }) => {
                assert_eq!(context, "ID");
                assert_eq!(line, 1);
            }
            other => panic!("expected ParseFailed, got {:?}", other),
        }
    }

    #[test]
    fn read_row_id_out_of_range() {
        let mut r = reader("1:99999999999:A");
        assert!(matches!(r.read_row(), Err(IndexError::ParseFailed { .. })));
    }

    #[test]
    fn read_block_aggregates_by_offset() {
        let mut r = reader(VALID);
        assert_eq!(r.read_block().unwrap(), Some(block(1, 3)));
        assert_eq!(r.read_block().unwrap(), Some(block(2, 3)));
        assert_eq!(r.read_block().unwrap(), Some(block(3, 1)));
        assert_eq!(r.read_block().unwrap(), None);
    }

    #[test]
    fn read_block_stays_exhausted() {
        let mut r = reader(VALID);
        while r.read_block().unwrap().is_some() {}
        for _ in 0..3 {
            assert_eq!(r.read_block().unwrap(), None);
        }
    }

    #[test]
    fn read_block_empty_input() {
        let mut r = reader("");
        assert_eq!(r.read_block().unwrap(), None);
    }

    #[test]
    fn read_block_incomplete_record() {
        let mut r = reader("abc123");
        assert!(matches!(r.read_block(), Err(IndexError::BadRecord { .. })));
        assert_eq!(r.read_block().unwrap(), None);
    }

    #[test]
    fn read_block_trailing_newline() {
        let mut r = reader("7:1:A\n7:2:B\n");
        assert_eq!(r.read_block().unwrap(), Some(block(7, 2)));
        assert_eq!(r.read_block().unwrap(), None);
    }

    #[test]
    fn read_block_decreasing_offset() {
        let mut r = reader("5:1:A\n5:2:B\n3:3:C\n");
        assert!(matches!(
            r.read_block(),
            Err(IndexError::InvalidOffset { line: 3, .. })
        ));
    }

    #[test]
    fn read_block_counts_rows_with_non_utf8_titles() {
        let input: &[u8] = b"5:1:A\n5:2:\xff\xfe\n9:3:C\n";
        let mut r = IndexReader::new(Cursor::new(input));
        assert_eq!(r.read_block().unwrap(), Some(block(5, 2)));
        assert_eq!(r.read_block().unwrap(), Some(block(9, 1)));
        assert_eq!(r.read_block().unwrap(), None);
    }

    #[test]
    fn read_row_replaces_invalid_title_bytes() {
        let input: &[u8] = b"5:2:Caf\xe9\n6:3:B\n";
        let mut r = IndexReader::new(Cursor::new(input));
        let row = r.read_row().unwrap().unwrap();
        assert_eq!(row.page_id, 2);
        assert_eq!(row.title, "Caf\u{fffd}");
        assert_eq!(r.read_row().unwrap().unwrap().title, "B");
    }

    #[test]
    fn read_row_non_utf8_id_is_bad_record() {
        let input: &[u8] = b"5:\xff:A\n";
        let mut r = IndexReader::new(Cursor::new(input));
        assert!(matches!(r.read_row(), Err(IndexError::BadRecord { line: 1 })));
    }

    #[test]
    fn read_block_zero_offset_is_its_own_segment() {
        let mut r = reader("0:1:A\n0:2:B\n900:3:C\n");
        assert_eq!(r.read_block().unwrap(), Some(block(0, 2)));
        assert_eq!(r.read_block().unwrap(), Some(block(900, 1)));
        assert_eq!(r.read_block().unwrap(), None);
    }

    #[test]
    fn iterator_yields_blocks() {
        let blocks: Vec<IndexBlock> = reader(VALID).map(|b| b.unwrap()).collect();
        assert_eq!(blocks, vec![block(1, 3), block(2, 3), block(3, 1)]);
    }

    #[test]
    fn open_missing_file_is_invalid_file() {
        let result = IndexReader::open("/nonexistent/index.txt.bz2");
        assert!(matches!(result, Err(Error::InvalidFile { .. })));
    }

    #[test]
    fn open_reads_bz2_index() {
        use bzip2::write::BzEncoder;
        use bzip2::Compression;
        use std::io::Write;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index.txt.bz2");
        let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(VALID.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let blocks: Vec<IndexBlock> = IndexReader::open(&path)
            .unwrap()
            .map(|b| b.unwrap())
            .collect();
        assert_eq!(blocks, vec![block(1, 3), block(2, 3), block(3, 1)]);
    }

    #[test]
    fn open_reads_plain_index() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index.txt");
        std::fs::write(&path, VALID).unwrap();

        let mut r = IndexReader::open(&path).unwrap();
        assert_eq!(r.read_row().unwrap().unwrap().title, "A");
    }
}
