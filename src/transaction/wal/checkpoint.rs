// BasaltDB WAL Checkpoint Module

use std::sync::Arc;
use std::time::Instant;

use log::info;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::Lsn;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::transaction::concurrency::TransactionManager;
use crate::transaction::wal::log_manager::{LogManager, LogManagerError};
use crate::transaction::wal::log_record::{LogRecordContent, LogRecordType};

/// Error type for checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Log manager error: {0}")]
    LogManagerError(#[from] LogManagerError),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Configuration for checkpoint behavior
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Minimum time between checkpoints in seconds
    pub checkpoint_interval: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 300, // 5 minutes
        }
    }
}

/// Writes checkpoints: force the log, write every dirty page, then record
/// which transactions were running and where redo may start.
pub struct CheckpointManager {
    log_manager: Arc<LogManager>,
    buffer_pool: Arc<BufferPoolManager>,
    config: CheckpointConfig,
    last_checkpoint_time: Mutex<Instant>,
}

impl CheckpointManager {
    pub fn new(
        log_manager: Arc<LogManager>,
        buffer_pool: Arc<BufferPoolManager>,
        config: CheckpointConfig,
    ) -> Self {
        Self {
            log_manager,
            buffer_pool,
            config,
            last_checkpoint_time: Mutex::new(Instant::now()),
        }
    }

    /// Create a checkpoint and return its LSN
    pub fn create_checkpoint(&self, transaction_manager: &TransactionManager) -> Result<Lsn> {
        self.log_manager.flush()?;

        // Any change logged before redo_lsn is on disk once the flush below
        // returns: writers hold the page latch from append to mark_dirty,
        // and flushing takes every page latch. The active set is taken at
        // the same instant, so it is exact as of redo_lsn.
        let (active_transactions, redo_lsn) =
            transaction_manager.snapshot_active(|| self.log_manager.next_lsn());
        self.buffer_pool.flush_all_pages()?;

        let active_count = active_transactions.len();
        let lsn = self.log_manager.append_log_record(
            0,
            0,
            LogRecordType::Checkpoint,
            LogRecordContent::checkpoint_now(active_transactions, redo_lsn),
        )?;
        self.log_manager.flush_till_lsn(lsn)?;

        // Whatever began after the snapshot starts at or past redo_lsn
        let oldest_needed = transaction_manager
            .oldest_first_lsn()
            .map_or(redo_lsn, |lsn| lsn.min(redo_lsn));
        self.log_manager.trim_rollback_index(oldest_needed);

        *self.last_checkpoint_time.lock() = Instant::now();
        info!(
            "Checkpoint at LSN {} (redo from {}, {} active transactions)",
            lsn, redo_lsn, active_count
        );
        Ok(lsn)
    }

    /// Check if a checkpoint is needed based on the time interval
    pub fn checkpoint_needed(&self) -> bool {
        let elapsed = self.last_checkpoint_time.lock().elapsed();
        elapsed.as_secs() >= self.config.checkpoint_interval
    }
}
