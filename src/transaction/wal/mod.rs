// BasaltDB Write-Ahead Logging Module

pub mod log_record;
pub mod log_buffer;
pub mod log_manager;
pub mod log_iterator;
pub mod checkpoint;
pub mod recovery;

pub use checkpoint::{CheckpointConfig, CheckpointManager};
pub use log_iterator::{LogRecordIterator, ScanDirection};
pub use log_manager::{LogManager, LogManagerConfig, LogManagerError, Result};
pub use log_record::{LogRecord, LogRecordContent, LogRecordType};
pub use recovery::{RecoveryError, RecoveryManager, RecoverySummary};
