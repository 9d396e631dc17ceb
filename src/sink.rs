use crate::config::PROGRESS_INTERVAL;
use crate::error::Result;
use crate::models::PageBlock;
use indicatif::ProgressBar;
use tracing::{debug, info};

/// A source of page blocks: the multistream reader, a sequential dump, or a
/// previously written page log.
pub trait PageBlockReader {
    /// Returns the next block, or `None` once the source is exhausted.
    fn next_block(&mut self) -> Result<Option<PageBlock>>;

    fn close(&mut self) -> Result<()>;
}

/// A destination for page blocks.
pub trait PageBlockWriter {
    fn write_block(&mut self, block: PageBlock) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    pub blocks: u64,
    pub pages: u64,
}

/// Copies blocks from `reader` to `writer` until the reader is exhausted.
///
/// Empty blocks are skipped. The first reader or writer error aborts the
/// transfer; neither side is closed here.
pub fn transfer<R, W>(reader: &mut R, writer: &mut W) -> Result<TransferStats>
where
    R: PageBlockReader + ?Sized,
    W: PageBlockWriter + ?Sized,
{
    let pb = ProgressBar::new_spinner();
    let result = pump(reader, writer, &pb);
    pb.finish_and_clear();

    let stats = result?;
    info!(
        blocks = stats.blocks,
        pages = stats.pages,
        "Transfer complete"
    );
    Ok(stats)
}

fn pump<R, W>(reader: &mut R, writer: &mut W, pb: &ProgressBar) -> Result<TransferStats>
where
    R: PageBlockReader + ?Sized,
    W: PageBlockWriter + ?Sized,
{
    let mut stats = TransferStats::default();
    while let Some(block) = reader.next_block()? {
        if block.is_empty() {
            debug!("Skipping empty block");
            continue;
        }
        let pages = block.len() as u64;
        writer.write_block(block)?;

        stats.blocks += 1;
        stats.pages += pages;
        if stats.blocks % PROGRESS_INTERVAL == 0 {
            pb.set_message(format!("{} pages", stats.pages));
            pb.tick();
        }
    }
    Ok(stats)
}
