use std::path::PathBuf;

use crate::storage::buffer::BufferPoolConfig;
use crate::transaction::concurrency::LockManagerConfig;
use crate::transaction::wal::{CheckpointConfig, LogManagerConfig};

/// Top-level configuration for a database instance
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Directory holding one file per table
    pub data_dir: PathBuf,

    /// Page cache configuration
    pub buffer_pool: BufferPoolConfig,

    /// Lock manager configuration
    pub lock_manager: LockManagerConfig,

    /// Write-ahead log configuration
    pub log: LogManagerConfig,

    /// Checkpoint configuration
    pub checkpoint: CheckpointConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            buffer_pool: BufferPoolConfig::default(),
            lock_manager: LockManagerConfig::default(),
            log: LogManagerConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Place the data files and the log under one root directory
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut config = Self::default();
        config.data_dir = root.join("data");
        config.log.log_dir = root.join("wal");
        config
    }
}
