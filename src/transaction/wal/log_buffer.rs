use byteorder::{LittleEndian, WriteBytesExt};
use thiserror::Error;

use crate::common::types::Lsn;
use crate::transaction::wal::log_record::{LogRecord, LogRecordError};

/// Error type for log buffer operations
#[derive(Error, Debug)]
pub enum LogBufferError {
    #[error("Log record of {0} bytes exceeds the frame limit")]
    RecordTooLarge(usize),

    #[error("Log record error: {0}")]
    LogRecordError(#[from] LogRecordError),
}

/// Result type for log buffer operations
pub type Result<T> = std::result::Result<T, LogBufferError>;

/// Largest encoded record accepted into a frame
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Configuration for log buffer behavior
#[derive(Debug, Clone)]
pub struct LogBufferConfig {
    /// Size of the buffer in bytes
    pub buffer_size: usize,

    /// Flush threshold as a percentage of buffer capacity
    pub flush_threshold: f32,
}

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024 * 1024, // 1 MB default
            flush_threshold: 0.75,    // 75% default
        }
    }
}

/// Framed log records that have an LSN but are not yet on disk.
///
/// Each record is laid out as `[u32 little-endian length][bincode bytes]`,
/// the same framing used by the log file, so draining the buffer is a
/// single append.
#[derive(Debug)]
pub struct LogBuffer {
    data: Vec<u8>,
    /// Maximum LSN currently buffered
    max_lsn: Lsn,
    config: LogBufferConfig,
}

impl LogBuffer {
    /// Create a new log buffer with the given configuration
    pub fn new(config: LogBufferConfig) -> Self {
        Self {
            data: Vec::with_capacity(config.buffer_size),
            max_lsn: 0,
            config,
        }
    }

    /// Frame and buffer a record
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let bytes = record.serialize()?;
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(LogBufferError::RecordTooLarge(bytes.len()));
        }

        // Writes into a Vec cannot fail
        let _ = self.data.write_u32::<LittleEndian>(bytes.len() as u32);
        self.data.extend_from_slice(&bytes);

        if record.lsn > self.max_lsn {
            self.max_lsn = record.lsn;
        }
        Ok(())
    }

    /// Whether the buffer has crossed its flush threshold
    pub fn needs_flush(&self) -> bool {
        let flush_size = (self.config.buffer_size as f32 * self.config.flush_threshold) as usize;
        self.data.len() >= flush_size
    }

    /// Buffered frames, ready to be appended to the log file as they are
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Forget the buffered frames once they are safely in the file
    pub fn clear(&mut self) {
        self.data.clear();
        self.max_lsn = 0;
    }

    /// Get current buffer utilization as a percentage
    pub fn utilization(&self) -> f32 {
        self.data.len() as f32 / self.config.buffer_size as f32
    }

    /// Highest LSN currently buffered (0 when empty)
    pub fn max_lsn(&self) -> Lsn {
        self.max_lsn
    }

    /// Check if the buffer is currently empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
