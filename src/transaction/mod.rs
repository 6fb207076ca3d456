// BasaltDB Transaction Management Module

pub mod wal;
pub mod concurrency;
pub mod recovery;

// Public exports
pub use concurrency::{LockManager, LockMode, Transaction, TransactionManager};
pub use recovery::TransactionRecoveryManager;
pub use wal::log_manager::LogManager;
pub use wal::log_record::{LogRecord, LogRecordType};
