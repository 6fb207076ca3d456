use thiserror::Error;

use crate::common::types::{Lsn, PageId, TxnId};
use crate::storage::disk::DiskManagerError;
use crate::transaction::concurrency::LockError;
use crate::transaction::wal::LogManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("Transaction aborted: {0}")]
    TransactionAborted(#[from] LockError),
    #[error("Every buffer frame is pinned")]
    CacheExhausted,
    #[error("Page {0} is pinned and cannot be discarded")]
    PagePinned(PageId),
    #[error("Page {page_id} has LSN {page_lsn} but the log is only durable up to {flushed_lsn}")]
    WalViolation {
        page_id: PageId,
        page_lsn: Lsn,
        flushed_lsn: Lsn,
    },
    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),
    #[error("Log manager error: {0}")]
    LogManagerError(#[from] LogManagerError),
}

impl BufferPoolError {
    /// Transaction that must abort because of this error, if any
    pub fn aborted_txn(&self) -> Option<TxnId> {
        match self {
            BufferPoolError::TransactionAborted(e) => Some(e.txn_id()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BufferPoolError>;
