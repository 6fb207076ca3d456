// BasaltDB storage engine kernel

pub mod common;
pub mod database;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use common::config::DatabaseConfig;
pub use common::types::{Lsn, PageId, Rid, TxnId, PAGE_SIZE};
pub use database::{Database, DatabaseError};
pub use storage::buffer::{BufferPoolError, BufferPoolManager, PageGuard};
pub use storage::page::{PageError, PageManager};
pub use transaction::concurrency::{LockError, LockMode, Transaction};
