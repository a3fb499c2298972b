use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{PageId, Result, StrataError, HEADER_PAGE_ID, PAGE_SIZE};

/// DiskManager is responsible for reading and writing pages to/from disk.
/// It manages a single database file and tracks the number of pages allocated.
///
/// Page `p` lives at byte offset `p * PAGE_SIZE`. Page 0 is reserved for the
/// index header page, so a fresh file starts with one zeroed page and the
/// first page handed out by `allocate_page` is page 1.
pub struct DiskManager {
    /// The database file
    db_file: Mutex<File>,
    /// Path to the database file
    db_path: PathBuf,
    /// Number of pages currently allocated, the header page included
    num_pages: AtomicU32,
    /// Number of page reads performed
    num_reads: AtomicU32,
    /// Number of page writes performed
    num_writes: AtomicU32,
    /// Number of pages handed back through `deallocate_page`
    num_deallocations: AtomicU32,
}

impl DiskManager {
    /// Opens the database file at `db_path`, creating it if it doesn't exist.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(db_path.as_ref())?;

        let file_size = file.metadata()?.len();
        let mut num_pages = file_size.div_ceil(PAGE_SIZE as u64) as u32;

        if num_pages == 0 {
            file.write_all(&[0u8; PAGE_SIZE])?;
            file.flush()?;
            num_pages = HEADER_PAGE_ID.as_u32() + 1;
            log::debug!("initialised {} with an empty header page", db_path.as_ref().display());
        }

        Ok(Self {
            db_file: Mutex::new(file),
            db_path: db_path.as_ref().to_path_buf(),
            num_pages: AtomicU32::new(num_pages),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
            num_deallocations: AtomicU32::new(0),
        })
    }

    /// Reads a page from disk into the provided buffer.
    /// Bytes past the end of the file read as zeros.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        self.check_page_id(page_id)?;

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(Self::offset(page_id)))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data[filled..].fill(0);

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page to disk from the provided buffer.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        self.check_page_id(page_id)?;

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(Self::offset(page_id)))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates a new page on disk and returns its page ID.
    /// Page ids grow monotonically and are never reused.
    pub fn allocate_page(&self) -> Result<PageId> {
        let page_id = PageId::new(self.num_pages.fetch_add(1, Ordering::SeqCst));

        // Extend the file so the page reads back as zeros after a restart
        let zeros = [0u8; PAGE_SIZE];
        self.write_page(page_id, &zeros)?;

        Ok(page_id)
    }

    /// Gives a page back. The space is not reclaimed; the page simply stops
    /// being referenced.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        self.check_page_id(page_id)?;
        if page_id == HEADER_PAGE_ID {
            return Err(StrataError::InvalidPageId(page_id));
        }
        self.num_deallocations.fetch_add(1, Ordering::Relaxed);
        log::trace!("deallocated {page_id}");
        Ok(())
    }

    /// Returns the number of pages currently allocated.
    pub fn get_num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Relaxed)
    }

    /// Returns the number of disk reads performed.
    pub fn get_num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of disk writes performed.
    pub fn get_num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn get_num_deallocations(&self) -> u32 {
        self.num_deallocations.load(Ordering::Relaxed)
    }

    /// Returns the path to the database file.
    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    /// Flushes any buffered writes to disk.
    pub fn sync(&self) -> Result<()> {
        let file = self.db_file.lock();
        file.sync_all()?;
        Ok(())
    }

    fn offset(page_id: PageId) -> u64 {
        (page_id.as_u32() as u64) * (PAGE_SIZE as u64)
    }

    fn check_page_id(&self, page_id: PageId) -> Result<()> {
        if !page_id.is_valid() {
            return Err(StrataError::InvalidPageId(page_id));
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        // Ensure all data is flushed to disk
        let file = self.db_file.get_mut();
        let _ = file.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_disk_manager_new_reserves_header_page() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(temp_file.path()).unwrap();
        assert_eq!(dm.get_num_pages(), 1);
        assert_eq!(
            std::fs::metadata(temp_file.path()).unwrap().len(),
            PAGE_SIZE as u64
        );
    }

    #[test]
    fn test_disk_manager_allocate_page() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(temp_file.path()).unwrap();

        let page_id = dm.allocate_page().unwrap();
        assert_eq!(page_id, PageId::new(1));
        assert_eq!(dm.get_num_pages(), 2);

        let page_id2 = dm.allocate_page().unwrap();
        assert_eq!(page_id2, PageId::new(2));
        assert_eq!(dm.get_num_pages(), 3);
    }

    #[test]
    fn test_disk_manager_read_write() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(temp_file.path()).unwrap();

        let page_id = dm.allocate_page().unwrap();

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        write_data[PAGE_SIZE - 1] = 128;
        dm.write_page(page_id, &write_data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut read_data).unwrap();

        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
        assert_eq!(read_data[PAGE_SIZE - 1], 128);
        assert_eq!(dm.get_num_reads(), 1);
    }

    #[test]
    fn test_disk_manager_read_past_end_is_zeroed() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(temp_file.path()).unwrap();

        let mut data = [7u8; PAGE_SIZE];
        dm.read_page(PageId::new(9), &mut data).unwrap();
        assert!(data.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_disk_manager_rejects_invalid_page() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(temp_file.path()).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        assert!(matches!(
            dm.read_page(crate::common::INVALID_PAGE_ID, &mut data),
            Err(StrataError::InvalidPageId(_))
        ));
        assert!(dm.deallocate_page(HEADER_PAGE_ID).is_err());
    }

    #[test]
    fn test_disk_manager_persistence() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        let page_id = {
            let dm = DiskManager::new(&path).unwrap();
            let page_id = dm.allocate_page().unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[0] = 123;
            dm.write_page(page_id, &data).unwrap();
            page_id
        };

        let dm = DiskManager::new(&path).unwrap();
        assert_eq!(dm.get_num_pages(), 2);

        let mut data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut data).unwrap();
        assert_eq!(data[0], 123);
    }
}
