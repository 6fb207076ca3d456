use thiserror::Error;
use serde::{Serialize, Deserialize};
use bincode::{serialize, deserialize};

use crate::common::types::{Lsn, PageId, TxnId};

/// Error type for log record operations
#[derive(Error, Debug)]
pub enum LogRecordError {
    #[error("Failed to serialize log record: {0}")]
    SerializationError(String),

    #[error("Failed to deserialize log record: {0}")]
    DeserializationError(String),

    #[error("Invalid log record format")]
    InvalidFormat,
}

/// Result type for log record operations
pub type Result<T> = std::result::Result<T, LogRecordError>;

/// Types of log records supported by the WAL system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecordType {
    /// Marks the beginning of a transaction
    Begin,
    /// Marks the successful completion of a transaction
    Commit,
    /// Marks the end of a rollback
    Abort,
    /// Byte-range change to one page
    Update,
    /// Marks a checkpoint in the log
    Checkpoint,
    /// Restores the bytes of an undone update (written during rollback)
    CompensationUpdate,
}

impl LogRecordType {
    /// Records that carry page images and are replayed by redo
    pub fn is_page_change(&self) -> bool {
        matches!(self, LogRecordType::Update | LogRecordType::CompensationUpdate)
    }
}

/// Content of a page change record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataOperationContent {
    /// Page where the change happened
    pub page_id: PageId,
    /// Byte offset of the changed range within the page
    pub offset: u32,
    /// Bytes of the range before the change
    pub before_image: Vec<u8>,
    /// Bytes of the range after the change
    pub after_image: Vec<u8>,
}

impl DataOperationContent {
    /// Byte range covered by this change
    pub fn range(&self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.after_image.len()
    }
}

/// Content of a transaction lifecycle record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOperationContent {
    /// Timestamp when the operation occurred
    pub timestamp: u64,
}

/// Content of a checkpoint record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointContent {
    /// Timestamp when the checkpoint occurred
    pub timestamp: u64,
    /// Transactions still running when the checkpoint was taken
    pub active_transactions: Vec<TxnId>,
    /// Redo may start here: every change logged earlier was on disk
    pub redo_lsn: Lsn,
}

/// Union of all possible log record content types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecordContent {
    Data(DataOperationContent),
    Transaction(TransactionOperationContent),
    Checkpoint(CheckpointContent),
}

/// Main log record structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Log Sequence Number - unique identifier for this log record
    pub lsn: Lsn,
    /// Transaction ID that generated this log record (0 for checkpoints)
    pub txn_id: TxnId,
    /// LSN of the previous log record in this transaction
    pub prev_lsn: Lsn,
    /// Type of the log record
    pub record_type: LogRecordType,
    /// Content of the log record, depends on the record type
    pub content: LogRecordContent,
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl LogRecordContent {
    /// Lifecycle content stamped with the current time
    pub fn transaction_now() -> Self {
        LogRecordContent::Transaction(TransactionOperationContent {
            timestamp: now_secs(),
        })
    }

    /// Checkpoint content stamped with the current time
    pub fn checkpoint_now(active_transactions: Vec<TxnId>, redo_lsn: Lsn) -> Self {
        LogRecordContent::Checkpoint(CheckpointContent {
            timestamp: now_secs(),
            active_transactions,
            redo_lsn,
        })
    }
}

impl LogRecord {
    /// Create a new log record
    pub fn new(
        lsn: Lsn,
        txn_id: TxnId,
        prev_lsn: Lsn,
        record_type: LogRecordType,
        content: LogRecordContent,
    ) -> Self {
        Self {
            lsn,
            txn_id,
            prev_lsn,
            record_type,
            content,
        }
    }

    /// Create a new BEGIN transaction log record
    pub fn new_begin(lsn: Lsn, txn_id: TxnId) -> Self {
        Self::new(lsn, txn_id, 0, LogRecordType::Begin, LogRecordContent::transaction_now())
    }

    /// Create a new COMMIT transaction log record
    pub fn new_commit(lsn: Lsn, txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(lsn, txn_id, prev_lsn, LogRecordType::Commit, LogRecordContent::transaction_now())
    }

    /// Create a new ABORT transaction log record
    pub fn new_abort(lsn: Lsn, txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(lsn, txn_id, prev_lsn, LogRecordType::Abort, LogRecordContent::transaction_now())
    }

    /// Create a new UPDATE log record
    pub fn new_update(
        lsn: Lsn,
        txn_id: TxnId,
        prev_lsn: Lsn,
        page_id: PageId,
        offset: u32,
        before_image: Vec<u8>,
        after_image: Vec<u8>,
    ) -> Self {
        Self::new(
            lsn,
            txn_id,
            prev_lsn,
            LogRecordType::Update,
            LogRecordContent::Data(DataOperationContent {
                page_id,
                offset,
                before_image,
                after_image,
            }),
        )
    }

    /// Create a new CHECKPOINT log record
    pub fn new_checkpoint(lsn: Lsn, active_transactions: Vec<TxnId>, redo_lsn: Lsn) -> Self {
        Self::new(
            lsn,
            0, // Checkpoint doesn't belong to any transaction
            0,
            LogRecordType::Checkpoint,
            LogRecordContent::checkpoint_now(active_transactions, redo_lsn),
        )
    }

    /// Page change carried by this record, if any
    pub fn data(&self) -> Option<&DataOperationContent> {
        match (&self.record_type, &self.content) {
            (t, LogRecordContent::Data(data)) if t.is_page_change() => Some(data),
            _ => None,
        }
    }

    /// Whether this record ends its transaction
    pub fn ends_transaction(&self) -> bool {
        matches!(self.record_type, LogRecordType::Commit | LogRecordType::Abort)
    }

    /// Serialize the log record to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self).map_err(|e| LogRecordError::SerializationError(e.to_string()))
    }

    /// Deserialize bytes into a log record
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let record: Self =
            deserialize(data).map_err(|e| LogRecordError::DeserializationError(e.to_string()))?;

        // Page change records must agree with their content shape
        let well_formed = match (&record.record_type, &record.content) {
            (t, LogRecordContent::Data(d)) => {
                t.is_page_change() && d.before_image.len() == d.after_image.len()
            }
            (LogRecordType::Checkpoint, LogRecordContent::Checkpoint(_)) => true,
            (
                LogRecordType::Begin | LogRecordType::Commit | LogRecordType::Abort,
                LogRecordContent::Transaction(_),
            ) => true,
            _ => false,
        };
        if !well_formed {
            return Err(LogRecordError::InvalidFormat);
        }

        Ok(record)
    }
}
