use crate::storage::page::header::PageHeader;
use crate::storage::page::error::PageError;
use crate::storage::page::layout::{
    slot_position, RecordLocation, HEADER_SIZE, MAX_RECORD_SIZE, RECORD_OFFSET_SIZE,
};

/// Slotted record layout over raw page bytes.
///
/// Record data grows up from just after the header; slot entries grow down
/// from the end of the page. Deleting a record zeroes its slot length and
/// leaves the slot number reserved, so record IDs stay stable.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageManager;

impl PageManager {
    pub fn new() -> Self {
        Self
    }

    pub fn init_page(&self, data: &mut [u8]) {
        data[0..HEADER_SIZE].copy_from_slice(&PageHeader::new().to_bytes());
    }

    pub fn get_header(&self, data: &[u8]) -> PageHeader {
        PageHeader::from_bytes(&data[0..HEADER_SIZE])
    }

    pub fn get_free_space(&self, data: &[u8]) -> u32 {
        self.get_header(data).free_space_size
    }

    pub fn record_count(&self, data: &[u8]) -> u32 {
        self.get_header(data).record_count
    }

    /// Whether a record of `len` bytes fits without compaction
    pub fn can_fit(&self, data: &[u8], len: usize) -> bool {
        self.get_free_space(data) as usize >= len + RECORD_OFFSET_SIZE
    }

    pub fn insert_record(&self, data: &mut [u8], record: &[u8]) -> Result<u32, PageError> {
        if record.is_empty() {
            return Err(PageError::EmptyRecord);
        }
        if record.len() > MAX_RECORD_SIZE {
            return Err(PageError::RecordTooLarge(record.len()));
        }

        let mut header = self.get_header(data);
        if !self.can_fit(data, record.len()) {
            return Err(PageError::InsufficientSpace);
        }

        let slot = header.record_count;
        let location = RecordLocation {
            offset: header.free_space_offset,
            length: record.len() as u32,
        };

        let start = location.offset as usize;
        data[start..start + record.len()].copy_from_slice(record);

        let slot_pos = slot_position(slot);
        data[slot_pos..slot_pos + RECORD_OFFSET_SIZE].copy_from_slice(&location.to_bytes());

        header.free_space_offset += location.length;
        header.free_space_size -= location.length + RECORD_OFFSET_SIZE as u32;
        header.record_count += 1;
        data[0..HEADER_SIZE].copy_from_slice(&header.to_bytes());

        Ok(slot)
    }

    pub fn delete_record(&self, data: &mut [u8], slot: u32) -> Result<(), PageError> {
        let mut location = self.get_record_location(data, slot)?;
        if location.is_deleted() {
            return Err(PageError::RecordNotFound);
        }

        // Space is not reclaimed; only the slot is tombstoned
        location.length = 0;
        let slot_pos = slot_position(slot);
        data[slot_pos..slot_pos + RECORD_OFFSET_SIZE].copy_from_slice(&location.to_bytes());

        // Rewrite the header so a lazily-initialised page becomes explicit
        let header = self.get_header(data);
        data[0..HEADER_SIZE].copy_from_slice(&header.to_bytes());

        Ok(())
    }

    pub fn get_record(&self, data: &[u8], slot: u32) -> Result<Vec<u8>, PageError> {
        let location = self.get_record_location(data, slot)?;
        if location.is_deleted() {
            return Err(PageError::RecordNotFound);
        }

        let start = location.offset as usize;
        Ok(data[start..start + location.length as usize].to_vec())
    }

    /// Live (non-deleted) slot numbers on the page
    pub fn live_slots(&self, data: &[u8]) -> Vec<u32> {
        (0..self.record_count(data))
            .filter(|&slot| {
                self.get_record_location(data, slot)
                    .map(|loc| !loc.is_deleted())
                    .unwrap_or(false)
            })
            .collect()
    }

    fn get_record_location(&self, data: &[u8], slot: u32) -> Result<RecordLocation, PageError> {
        if slot >= self.record_count(data) {
            return Err(PageError::InvalidRecordId);
        }
        let slot_pos = slot_position(slot);
        Ok(RecordLocation::from_bytes(&data[slot_pos..slot_pos + RECORD_OFFSET_SIZE]))
    }
}
