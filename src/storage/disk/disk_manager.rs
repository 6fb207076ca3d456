use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, PageNo, TableId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("Page store I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page reference: {0}")]
    InvalidPageId(PageId),
}

pub type Result<T> = std::result::Result<T, DiskManagerError>;

/// Block-level access to table files. The page cache only ever talks to
/// storage through this trait.
pub trait PageStore: Send + Sync {
    /// Read one full block
    fn read_page(&self, page_id: PageId) -> Result<Box<[u8; PAGE_SIZE]>>;

    /// Overwrite one full block
    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Append a zeroed block to the table and return its ID
    fn allocate_page(&self, table_id: TableId) -> Result<PageId>;

    /// Number of blocks currently in the table
    fn num_pages(&self, table_id: TableId) -> Result<PageNo>;

    /// Make every completed write durable
    fn sync(&self) -> Result<()>;
}

/// DiskManager stores each table in its own file, `table_<id>.dat`
pub struct DiskManager {
    data_dir: PathBuf,
    files: Mutex<HashMap<TableId, File>>,
}

impl DiskManager {
    /// Create a DiskManager rooted at the given directory
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(data_dir.as_ref())?;

        Ok(Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Path of the file backing a table
    pub fn table_path(&self, table_id: TableId) -> PathBuf {
        self.data_dir.join(format!("table_{}.dat", table_id))
    }

    fn with_file<T>(
        &self,
        table_id: TableId,
        op: impl FnOnce(&mut File) -> Result<T>,
    ) -> Result<T> {
        let mut files = self.files.lock();

        let file = match files.entry(table_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(self.table_path(table_id))?;
                entry.insert(file)
            }
        };
        op(file)
    }

    fn page_count(file: &File) -> Result<PageNo> {
        let file_size = file.metadata()?.len();
        Ok((file_size / PAGE_SIZE as u64) as PageNo)
    }

    /// Calculate the offset of a page in its table file
    fn page_offset(page_no: PageNo) -> u64 {
        page_no as u64 * PAGE_SIZE as u64
    }
}

impl PageStore for DiskManager {
    fn read_page(&self, page_id: PageId) -> Result<Box<[u8; PAGE_SIZE]>> {
        self.with_file(page_id.table_id, |file| {
            if page_id.page_no >= Self::page_count(file)? {
                return Err(DiskManagerError::InvalidPageId(page_id));
            }

            let mut buffer = Box::new([0u8; PAGE_SIZE]);
            file.seek(SeekFrom::Start(Self::page_offset(page_id.page_no)))?;
            file.read_exact(&mut buffer[..])?;
            Ok(buffer)
        })
    }

    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        self.with_file(page_id.table_id, |file| {
            file.seek(SeekFrom::Start(Self::page_offset(page_id.page_no)))?;
            file.write_all(&data[..])?;
            file.flush()?;
            Ok(())
        })
    }

    fn allocate_page(&self, table_id: TableId) -> Result<PageId> {
        self.with_file(table_id, |file| {
            let page_no = Self::page_count(file)?;

            file.seek(SeekFrom::Start(Self::page_offset(page_no)))?;
            file.write_all(&[0u8; PAGE_SIZE])?;
            // The new length must be durable before any log record names the page
            file.sync_all()?;

            debug!("Allocated page {}:{}", table_id, page_no);
            Ok(PageId::new(table_id, page_no))
        })
    }

    fn num_pages(&self, table_id: TableId) -> Result<PageNo> {
        self.with_file(table_id, |file| Self::page_count(file))
    }

    fn sync(&self) -> Result<()> {
        let files = self.files.lock();
        for file in files.values() {
            file.sync_data()?;
        }
        Ok(())
    }
}
