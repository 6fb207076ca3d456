use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, TxnId};
use crate::transaction::wal::log_buffer::{LogBuffer, LogBufferConfig, LogBufferError};
use crate::transaction::wal::log_iterator::{scan_frames, LogRecordIterator, ScanDirection};
use crate::transaction::wal::log_record::{LogRecord, LogRecordContent, LogRecordError, LogRecordType};

/// Error type for log manager operations
#[derive(Error, Debug)]
pub enum LogManagerError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Buffer error: {0}")]
    BufferError(#[from] LogBufferError),

    #[error("Log record error: {0}")]
    LogRecordError(#[from] LogRecordError),

    #[error("Invalid log file format")]
    InvalidFormat,

    #[error("Corrupt log record at offset {0}")]
    CorruptRecord(u64),

    #[error("Log is unusable after a failed write; restart to recover")]
    LogFailed,

    #[error("Log record {0} is not available for rollback")]
    RecordNotFound(Lsn),
}

/// Result type for log manager operations
pub type Result<T> = std::result::Result<T, LogManagerError>;

/// Log file header structure
#[derive(Debug, Clone)]
pub struct LogFileHeader {
    /// Magic number to identify log files
    pub magic: u32,
    /// Version of the log file format
    pub version: u32,
    /// Size of the header in bytes
    pub header_size: u32,
    /// LSN of the first record in the file
    pub first_lsn: Lsn,
}

impl LogFileHeader {
    /// Magic number for log files: "WALD" in ASCII
    pub const MAGIC: u32 = 0x57414C44;

    /// Current log file format version
    pub const VERSION: u32 = 1;

    /// Size of the header in bytes
    pub const HEADER_SIZE: u32 = 20;

    pub fn new(first_lsn: Lsn) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            header_size: Self::HEADER_SIZE,
            first_lsn,
        }
    }

    pub fn write_to(&self, file: &mut File) -> io::Result<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_u32::<LittleEndian>(self.magic)?;
        file.write_u32::<LittleEndian>(self.version)?;
        file.write_u32::<LittleEndian>(self.header_size)?;
        file.write_u64::<LittleEndian>(self.first_lsn)?;
        file.flush()
    }

    pub fn read_from<R: Read + Seek>(reader: &mut R) -> io::Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let magic = reader.read_u32::<LittleEndian>()?;
        let version = reader.read_u32::<LittleEndian>()?;
        let header_size = reader.read_u32::<LittleEndian>()?;
        let first_lsn = reader.read_u64::<LittleEndian>()?;

        Ok(Self {
            magic,
            version,
            header_size,
            first_lsn,
        })
    }

    pub fn validate(&self) -> bool {
        self.magic == Self::MAGIC
            && self.version == Self::VERSION
            && self.header_size == Self::HEADER_SIZE
            && self.first_lsn >= 1
    }
}

/// Configuration for the log manager
#[derive(Debug, Clone)]
pub struct LogManagerConfig {
    /// Path to the log directory
    pub log_dir: PathBuf,

    /// Base name for the log file
    pub log_file_base_name: String,

    /// Log buffer configuration
    pub buffer_config: LogBufferConfig,

    /// Whether to sync the file on every flush
    pub force_sync: bool,
}

impl Default for LogManagerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("wal"),
            log_file_base_name: "basalt_wal".to_string(),
            buffer_config: LogBufferConfig::default(),
            force_sync: true,
        }
    }
}

impl LogManagerConfig {
    /// Path of the log file this configuration points at
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(format!("{}.log", self.log_file_base_name))
    }
}

/// State guarded by the log manager's mutex: the sequence counter, the
/// in-memory tail and the file it drains into
struct LogState {
    file: File,
    /// Separate handle for random reads, so the append position never moves
    reader: File,
    /// Length of the file up to the last whole frame
    file_len: u64,
    buffer: LogBuffer,
    next_lsn: Lsn,
    /// Set by a failed write. Nothing is appended or flushed afterwards.
    failed: bool,
    /// File offset of every frame from `index_base` on, for rollback
    frame_offsets: VecDeque<u64>,
    index_base: Lsn,
}

impl LogState {
    fn frame_offset(&self, lsn: Lsn) -> Option<u64> {
        let index = lsn.checked_sub(self.index_base)?;
        self.frame_offsets.get(usize::try_from(index).ok()?).copied()
    }
}

/// Manager for write-ahead logging operations
pub struct LogManager {
    config: LogManagerConfig,
    log_path: PathBuf,
    state: Mutex<LogState>,
    /// Highest LSN known to be on disk
    flushed_lsn: AtomicU64,
}

impl LogManager {
    /// Open the log, creating it if needed. A torn or corrupt tail left by a
    /// crash is cut off at the last well-formed record.
    pub fn new(config: LogManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.log_dir)?;
        let log_path = config.log_path();

        let (file, last_lsn, file_len) = Self::open_log_file(&log_path)?;
        let reader = File::open(&log_path)?;
        info!("Opened log {} (last LSN {})", log_path.display(), last_lsn);

        let buffer = LogBuffer::new(config.buffer_config.clone());
        Ok(Self {
            config,
            log_path,
            state: Mutex::new(LogState {
                file,
                reader,
                file_len,
                buffer,
                next_lsn: last_lsn + 1,
                failed: false,
                frame_offsets: VecDeque::new(),
                index_base: last_lsn + 1,
            }),
            flushed_lsn: AtomicU64::new(last_lsn),
        })
    }

    fn open_log_file(path: &Path) -> Result<(File, Lsn, u64)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.metadata()?.len() < LogFileHeader::HEADER_SIZE as u64 {
            // New (or never completed) log file
            file.set_len(0)?;
            LogFileHeader::new(1).write_to(&mut file)?;
            file.sync_all()?;
            return Ok((file, 0, LogFileHeader::HEADER_SIZE as u64));
        }

        let header = LogFileHeader::read_from(&mut file)?;
        if !header.validate() {
            return Err(LogManagerError::InvalidFormat);
        }

        let scan = scan_frames(&mut file, &header)?;
        let file_size = file.metadata()?.len();
        if scan.valid_end < file_size {
            warn!(
                "Truncating log {} at offset {} ({} trailing bytes unreadable)",
                path.display(),
                scan.valid_end,
                file_size - scan.valid_end
            );
            file.set_len(scan.valid_end)?;
            file.sync_all()?;
        }

        let file_len = file.seek(SeekFrom::End(0))?;
        Ok((file, scan.last_lsn, file_len))
    }

    /// Path of the log file
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Append a log record and return its LSN. The record is durable only
    /// once a flush covering its LSN has returned.
    pub fn append_log_record(
        &self,
        txn_id: TxnId,
        prev_lsn: Lsn,
        record_type: LogRecordType,
        content: LogRecordContent,
    ) -> Result<Lsn> {
        let mut state = self.state.lock();
        if state.failed {
            return Err(LogManagerError::LogFailed);
        }

        let lsn = state.next_lsn;
        let record = LogRecord::new(lsn, txn_id, prev_lsn, record_type, content);
        let offset = state.file_len + state.buffer.len() as u64;
        state.buffer.append(&record)?;
        state.next_lsn += 1;
        state.frame_offsets.push_back(offset);

        if state.buffer.needs_flush() {
            self.flush_locked(&mut state)?;
        }

        Ok(lsn)
    }

    /// Drain the buffer into the file. The buffer is only cleared once the
    /// write (and sync) succeeded; a failure cuts the file back to its last
    /// whole frame and fails the log for good, so no record can ever land
    /// behind a gap.
    fn flush_locked(&self, state: &mut LogState) -> Result<Lsn> {
        if state.failed {
            return Err(LogManagerError::LogFailed);
        }
        if state.buffer.is_empty() {
            return Ok(self.flushed_lsn());
        }

        let max_lsn = state.buffer.max_lsn();
        let mut written = state.file.write_all(state.buffer.data());
        if written.is_ok() && self.config.force_sync {
            written = state.file.sync_data();
        }

        if let Err(e) = written {
            state.failed = true;
            error!("Log write failed, no further records will be accepted: {}", e);
            if let Err(truncate) = state.file.set_len(state.file_len) {
                warn!("Could not cut the log back to offset {}: {}", state.file_len, truncate);
            }
            return Err(e.into());
        }

        let bytes = state.buffer.len();
        state.file_len += bytes as u64;
        state.buffer.clear();
        self.flushed_lsn.store(max_lsn, Ordering::SeqCst);
        debug!("Flushed log through LSN {} ({} bytes)", max_lsn, bytes);
        Ok(max_lsn)
    }

    /// Write every buffered record to disk, returning the durable LSN
    pub fn flush(&self) -> Result<Lsn> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    /// Make sure every record up to and including `target_lsn` is durable
    pub fn flush_till_lsn(&self, target_lsn: Lsn) -> Result<()> {
        if self.flushed_lsn() >= target_lsn {
            return Ok(());
        }
        self.flush()?;
        Ok(())
    }

    /// Highest LSN known to be durable
    pub fn flushed_lsn(&self) -> Lsn {
        self.flushed_lsn.load(Ordering::SeqCst)
    }

    /// LSN the next appended record will receive
    pub fn next_lsn(&self) -> Lsn {
        self.state.lock().next_lsn
    }

    /// Read one record appended since the log was opened, from the buffer
    /// if it has not reached the file yet
    pub fn read_record(&self, lsn: Lsn) -> Result<LogRecord> {
        let mut state = self.state.lock();
        let offset = state.frame_offset(lsn).ok_or(LogManagerError::RecordNotFound(lsn))?;

        let frame = if offset >= state.file_len {
            let mut buffered = &state.buffer.data()[(offset - state.file_len) as usize..];
            read_frame(&mut buffered)?
        } else {
            state.reader.seek(SeekFrom::Start(offset))?;
            read_frame(&mut state.reader)?
        };
        Ok(LogRecord::deserialize(&frame)?)
    }

    /// Stop tracking frame offsets below `lsn`. Nothing older can still be
    /// rolled back.
    pub fn trim_rollback_index(&self, lsn: Lsn) {
        let mut state = self.state.lock();
        while state.index_base < lsn && state.frame_offsets.pop_front().is_some() {
            state.index_base += 1;
        }
    }

    /// Flush, then iterate over the whole log in the given direction
    pub fn iter(&self, direction: ScanDirection) -> Result<LogRecordIterator> {
        self.flush()?;
        LogRecordIterator::open(&self.log_path, direction)
    }

    /// Every record in the log, oldest first
    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        self.iter(ScanDirection::Forward)?.collect()
    }
}

#[cfg(test)]
impl LogManager {
    /// Point appends at a read-only handle so the next write fails
    pub(crate) fn break_writes(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.file = File::open(&self.log_path)?;
        Ok(())
    }
}

fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame)?;
    Ok(frame)
}
