use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;
use parking_lot::Mutex;

use crate::common::types::{Lsn, TxnId};
use crate::transaction::concurrency::transaction::{Result, Transaction, TransactionError};
use crate::transaction::wal::log_manager::LogManager;

/// Transaction manager - responsible for creating and tracking transactions
pub struct TransactionManager {
    /// Next transaction ID to assign
    next_txn_id: AtomicU32,

    /// Log manager reference
    log_manager: Arc<LogManager>,

    /// Active transactions map (txn_id -> Transaction)
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    /// Create a transaction manager that hands out IDs from `first_txn_id`.
    /// After a restart this must be past every ID already in the log.
    pub fn new(log_manager: Arc<LogManager>, first_txn_id: TxnId) -> Self {
        Self {
            next_txn_id: AtomicU32::new(first_txn_id.max(1)),
            log_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction. The BEGIN record is written while the
    /// active table is locked, so a checkpoint snapshot never misses it.
    pub fn begin_transaction(&self) -> Result<Arc<Transaction>> {
        let mut active = self.active_transactions.lock();
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);

        let txn = Arc::new(Transaction::new(txn_id, self.log_manager.clone()));
        txn.begin()?;

        active.insert(txn_id, Arc::clone(&txn));
        debug!("Began transaction {}", txn_id);
        Ok(txn)
    }

    /// Write a transaction's final record with `end` and drop it from the
    /// active table in one step
    pub fn end_transaction<F>(&self, txn_id: TxnId, end: F) -> Result<Lsn>
    where
        F: FnOnce() -> Result<Lsn>,
    {
        let mut active = self.active_transactions.lock();
        let lsn = end()?;
        active.remove(&txn_id);
        Ok(lsn)
    }

    /// Active transaction IDs together with a value captured at the same
    /// instant. No transaction can begin or end while `capture` runs.
    pub fn snapshot_active<T>(&self, capture: impl FnOnce() -> T) -> (Vec<TxnId>, T) {
        let active = self.active_transactions.lock();
        let value = capture();
        let mut ids: Vec<TxnId> = active.keys().copied().collect();
        ids.sort_unstable();
        (ids, value)
    }

    /// First LSN of the oldest running transaction
    pub fn oldest_first_lsn(&self) -> Option<Lsn> {
        self.active_transactions
            .lock()
            .values()
            .map(|txn| txn.first_lsn())
            .min()
    }

    /// Look up an active transaction
    pub fn get_transaction(&self, txn_id: TxnId) -> Result<Arc<Transaction>> {
        self.active_transactions
            .lock()
            .get(&txn_id)
            .cloned()
            .ok_or(TransactionError::NotFound(txn_id))
    }

    /// Forget a transaction that has committed or aborted
    pub fn remove_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().remove(&txn_id)
    }

    /// Check if a transaction is still running
    pub fn is_active(&self, txn_id: TxnId) -> bool {
        self.active_transactions.lock().contains_key(&txn_id)
    }

    /// Get all active transaction IDs, oldest first
    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        let mut ids: Vec<TxnId> = self.active_transactions.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// ID the next transaction will get
    pub fn next_txn_id(&self) -> TxnId {
        self.next_txn_id.load(Ordering::SeqCst)
    }
}
