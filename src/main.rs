use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use wikistream::config::{self, ReaderConfig};
use wikistream::dump::{DumpBlocks, DumpReader};
use wikistream::pagelog::{LogReader, LogWriter};
use wikistream::pipeline::MultiStreamReader;
use wikistream::sink::{transfer, PageBlockReader, PageBlockWriter, TransferStats};
use wikistream::store::{PageStore, ShardedStore};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "wikistream")]
#[command(about = "Read Wikipedia XML dumps into a page store or page log")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a multistream dump in parallel using its index
    Parse(ParseArgs),
    /// Read a single-stream dump sequentially
    Dump(DumpArgs),
    /// Copy a page log into a page store or another log
    Replay(ReplayArgs),
    /// Look up one page in a page store
    Get(GetArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputKind {
    /// Sharded key/value directory keyed by page id
    Store,
    /// Append-only zstd page log (.ld.zs)
    Log,
}

#[derive(Args)]
struct OutputArgs {
    /// Kind of sink to write
    #[arg(long, value_enum, default_value_t = OutputKind::Store)]
    output: OutputKind,

    /// Store directory or log file path
    #[arg(short, long)]
    outpath: PathBuf,
}

#[derive(Args)]
struct ParseArgs {
    /// Path to the multistream index (.txt or .txt.bz2)
    #[arg(long)]
    index_file: PathBuf,

    /// Path to the multistream page archive (.xml.bz2)
    #[arg(long)]
    pages_file: PathBuf,

    #[command(flatten)]
    sink: OutputArgs,

    /// Number of decode workers (defaults to available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// Capacity of the work and output queues
    #[arg(long, default_value_t = config::QUEUE_CAPACITY)]
    queue_capacity: usize,
}

#[derive(Args)]
struct DumpArgs {
    /// Path to the single-stream dump (.xml.bz2)
    #[arg(short, long)]
    input: PathBuf,

    #[command(flatten)]
    sink: OutputArgs,

    /// Pages per block
    #[arg(long, default_value_t = config::LOG_BLOCK_SIZE)]
    block_size: usize,
}

#[derive(Args)]
struct ReplayArgs {
    /// Page log to read (.ld.zs)
    #[arg(short, long)]
    input: PathBuf,

    #[command(flatten)]
    sink: OutputArgs,

    /// Pages per block
    #[arg(long, default_value_t = config::LOG_BLOCK_SIZE)]
    block_size: usize,
}

#[derive(Args)]
struct GetArgs {
    /// Page store directory
    #[arg(short, long)]
    store: PathBuf,

    /// Page id
    id: i32,
}

/// Creates the output sink. Callers open their input first so a bad input
/// path never clears an existing store.
fn open_sink(args: &OutputArgs) -> Result<Box<dyn PageBlockWriter>> {
    Ok(match args.output {
        OutputKind::Store => Box::new(
            ShardedStore::create(&args.outpath)
                .with_context(|| format!("Failed to create page store: {:?}", args.outpath))?,
        ),
        OutputKind::Log => Box::new(
            LogWriter::create(&args.outpath)
                .with_context(|| format!("Failed to create page log: {:?}", args.outpath))?,
        ),
    })
}

/// Runs the transfer, then closes both sides. The transfer error wins over
/// close errors.
fn drive(reader: &mut dyn PageBlockReader, writer: &mut dyn PageBlockWriter) -> Result<TransferStats> {
    let result = transfer(reader, writer);
    let reader_closed = reader.close();
    let writer_closed = writer.close();

    let stats = result.context("Transfer failed")?;
    reader_closed.context("Failed to close reader")?;
    writer_closed.context("Failed to close writer")?;
    Ok(stats)
}

fn print_summary(stats: &TransferStats, started: Instant) {
    println!();
    println!("=== Summary ===");
    println!("Total time:         {:.2}s", started.elapsed().as_secs_f64());
    println!("Blocks written:     {}", stats.blocks);
    println!("Pages written:      {}", stats.pages);
}

fn run_parse(args: ParseArgs) -> Result<()> {
    let mut reader_config = ReaderConfig::default().with_queue_capacity(args.queue_capacity);
    if let Some(workers) = args.workers {
        reader_config = reader_config.with_workers(workers);
    }
    info!(
        workers = reader_config.workers,
        capacity = reader_config.queue_capacity,
        "Starting multistream parse"
    );

    let started = Instant::now();
    let mut reader = MultiStreamReader::open(&args.index_file, &args.pages_file, reader_config)
        .context("Failed to start multistream reader")?;
    let mut writer = open_sink(&args.sink)?;

    let stats = drive(&mut reader, writer.as_mut())?;
    print_summary(&stats, started);
    println!("Index blocks read:  {}", reader.stats().index_blocks());
    println!("Pages decoded:      {}", reader.stats().pages());
    Ok(())
}

fn run_dump(args: DumpArgs) -> Result<()> {
    let started = Instant::now();
    let dump = DumpReader::open(&args.input)
        .with_context(|| format!("Failed to open dump: {:?}", args.input))?;
    let mut reader = DumpBlocks::new(dump, args.block_size);
    let mut writer = open_sink(&args.sink)?;

    let stats = drive(&mut reader, writer.as_mut())?;
    print_summary(&stats, started);
    Ok(())
}

fn run_replay(args: ReplayArgs) -> Result<()> {
    let started = Instant::now();
    let mut reader = LogReader::open(&args.input, args.block_size)
        .with_context(|| format!("Failed to open page log: {:?}", args.input))?;
    let mut writer = open_sink(&args.sink)?;

    let stats = drive(&mut reader, writer.as_mut())?;
    print_summary(&stats, started);
    Ok(())
}

fn run_get(args: GetArgs) -> Result<()> {
    let store = ShardedStore::open(&args.store)
        .with_context(|| format!("Failed to open page store: {:?}", args.store))?;
    match store.get(args.id)? {
        Some(page) => {
            println!("id:         {}", page.id);
            println!("title:      {}", page.title);
            println!("namespace:  {}", page.namespace);
            if page.is_redirect() {
                println!("redirect:   {}", page.redirect_title);
            }
            for rev in &page.revisions {
                println!(
                    "revision:   {} at {} ({} bytes)",
                    rev.id,
                    wikistream::canonical::format_timestamp(&rev.timestamp),
                    rev.text.len()
                );
            }
        }
        None => println!("page {} not found", args.id),
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Parse(args) => run_parse(args),
        Commands::Dump(args) => run_dump(args),
        Commands::Replay(args) => run_replay(args),
        Commands::Get(args) => run_get(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
