use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use basaltdb::transaction::wal::{
    LogManager, LogRecord, LogRecordContent, ScanDirection,
};
use basaltdb::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(author, version, about = "BasaltDB - storage engine maintenance tool")]
struct Cli {
    /// Database root directory (holds data/ and wal/)
    #[arg(short, long, default_value = "basalt")]
    root: PathBuf,

    /// Buffer pool size (number of pages)
    #[arg(short, long, default_value_t = 128)]
    buffer_size: usize,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run crash recovery and report what it did
    Recover,

    /// Print the records of the write-ahead log
    DumpLog {
        /// Newest records first
        #[arg(long)]
        reverse: bool,

        /// Print at most this many records
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Open the database and write a checkpoint
    Checkpoint,

    /// Show database information
    Info,
}

fn describe(record: &LogRecord) -> String {
    match &record.content {
        LogRecordContent::Data(data) => format!(
            "page {} bytes {}..{}",
            data.page_id,
            data.offset,
            data.offset as usize + data.after_image.len()
        ),
        LogRecordContent::Checkpoint(checkpoint) => format!(
            "active {:?} redo from {}",
            checkpoint.active_transactions, checkpoint.redo_lsn
        ),
        LogRecordContent::Transaction(content) => format!("at {}", content.timestamp),
    }
}

fn dump_log(config: &DatabaseConfig, reverse: bool, limit: Option<usize>) -> Result<()> {
    let log_manager = LogManager::new(config.log.clone())
        .with_context(|| format!("Failed to open log in {}", config.log.log_dir.display()))?;

    let direction = if reverse {
        ScanDirection::Backward
    } else {
        ScanDirection::Forward
    };

    println!("{:>8}  {:>6}  {:>8}  {:<18}  DETAILS", "LSN", "TXN", "PREV", "TYPE");
    let records = log_manager.iter(direction)?.take(limit.unwrap_or(usize::MAX));
    for record in records {
        let record = record?;
        println!(
            "{:>8}  {:>6}  {:>8}  {:<18}  {}",
            record.lsn,
            record.txn_id,
            record.prev_lsn,
            format!("{:?}", record.record_type),
            describe(&record)
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = DatabaseConfig::with_root(&cli.root);
    config.buffer_pool.pool_size = cli.buffer_size;

    match cli.command {
        Commands::DumpLog { reverse, limit } => dump_log(&config, reverse, limit)?,
        Commands::Recover => {
            let db = Database::open(config).context("Failed to open database")?;
            let summary = db.recovery_summary();
            println!("Checkpoint:       {:?}", summary.checkpoint_lsn);
            println!("Redo started at:  {}", summary.redo_start_lsn);
            println!("Changes redone:   {}", summary.redone);
            println!("Updates undone:   {}", summary.undone);
            println!("Rolled back:      {:?}", summary.losers);
            db.shutdown()?;
        }
        Commands::Checkpoint => {
            let db = Database::open(config).context("Failed to open database")?;
            let lsn = db.checkpoint()?;
            println!("Checkpoint written at LSN {}", lsn);
            db.shutdown()?;
        }
        Commands::Info => {
            let db = Database::open(config).context("Failed to open database")?;
            let log_manager = db.log_manager();
            println!("Data directory:   {}", db.config().data_dir.display());
            println!("Log file:         {}", log_manager.log_path().display());
            println!("Next LSN:         {}", log_manager.next_lsn());
            println!("Durable LSN:      {}", log_manager.flushed_lsn());
            println!("Buffer pool:      {} frames", db.buffer_pool().capacity());
            println!("Next transaction: {}", db.transaction_manager().next_txn_id());
            db.shutdown()?;
        }
    }

    Ok(())
}
