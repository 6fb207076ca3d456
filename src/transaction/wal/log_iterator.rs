// BasaltDB WAL Log Iterator
//
// Walks the framed records of a log file forward or backward.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::common::types::Lsn;
use crate::transaction::wal::log_buffer::MAX_FRAME_SIZE;
use crate::transaction::wal::log_manager::{LogFileHeader, LogManagerError, Result};
use crate::transaction::wal::log_record::LogRecord;

/// Scan direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Backward,
}

/// Result of scanning the frames of a log file
#[derive(Debug)]
pub(crate) struct FrameScan {
    /// Byte offset of every well-formed frame, in file order
    pub offsets: Vec<u64>,
    /// LSN of the last well-formed record (0 when none)
    pub last_lsn: Lsn,
    /// Offset just past the last well-formed frame
    pub valid_end: u64,
}

/// Read one frame at the reader's current position.
/// Returns `Ok(None)` on a clean end of file.
fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let len = match reader.read_u32::<LittleEndian>() {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad frame length"));
    }

    let mut data = vec![0; len];
    reader.read_exact(&mut data)?;
    Ok(Some(data))
}

/// Scan every frame after the header, stopping at the first one that is
/// torn, undecodable, or out of LSN sequence.
pub(crate) fn scan_frames(file: &mut File, header: &LogFileHeader) -> Result<FrameScan> {
    let file_size = file.metadata()?.len();
    file.seek(SeekFrom::Start(header.header_size as u64))?;
    let mut reader = BufReader::new(file);

    let mut offsets = Vec::new();
    let mut position = header.header_size as u64;
    let mut expected_lsn = header.first_lsn;

    while position < file_size {
        let frame = match read_frame(&mut reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof
                || e.kind() == io::ErrorKind::InvalidData => break,
            Err(e) => return Err(e.into()),
        };

        match LogRecord::deserialize(&frame) {
            Ok(record) if record.lsn == expected_lsn => {
                offsets.push(position);
                position += 4 + frame.len() as u64;
                expected_lsn += 1;
            }
            _ => break,
        }
    }

    Ok(FrameScan {
        offsets,
        last_lsn: expected_lsn - 1,
        valid_end: position,
    })
}

/// Iterator over the durable records of a log file
pub struct LogRecordIterator {
    reader: BufReader<File>,
    offsets: Vec<u64>,
    direction: ScanDirection,
    /// Next index into `offsets` (forward) or one past it (backward)
    cursor: usize,
}

impl LogRecordIterator {
    /// Open an iterator over the log file at `path`
    pub fn open(path: &Path, direction: ScanDirection) -> Result<Self> {
        let mut file = File::open(path)?;
        let header = LogFileHeader::read_from(&mut file)?;
        if !header.validate() {
            return Err(LogManagerError::InvalidFormat);
        }

        let scan = scan_frames(&mut file, &header)?;
        let cursor = match direction {
            ScanDirection::Forward => 0,
            ScanDirection::Backward => scan.offsets.len(),
        };

        Ok(Self {
            reader: BufReader::new(file),
            offsets: scan.offsets,
            direction,
            cursor,
        })
    }

    /// Number of records this iterator covers
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn read_at(&mut self, offset: u64) -> Result<LogRecord> {
        self.reader.seek(SeekFrom::Start(offset))?;
        let frame = read_frame(&mut self.reader)?
            .ok_or(LogManagerError::CorruptRecord(offset))?;
        LogRecord::deserialize(&frame).map_err(|_| LogManagerError::CorruptRecord(offset))
    }
}

impl Iterator for LogRecordIterator {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = match self.direction {
            ScanDirection::Forward => {
                let offset = *self.offsets.get(self.cursor)?;
                self.cursor += 1;
                offset
            }
            ScanDirection::Backward => {
                if self.cursor == 0 {
                    return None;
                }
                self.cursor -= 1;
                self.offsets[self.cursor]
            }
        };
        Some(self.read_at(offset))
    }
}
