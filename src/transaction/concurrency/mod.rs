// BasaltDB Transaction concurrency module exports

mod deadlock;
pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

// Public exports
pub use lock_manager::{LockError, LockManager, LockManagerConfig, LockMode};
pub use transaction::{Transaction, TransactionError, TransactionState};
pub use transaction_manager::TransactionManager;
