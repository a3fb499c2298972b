use crate::common::{PageId, Result, StrataError, MAX_INDEX_NAME_LEN, PAGE_SIZE};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const ROOT_ID_SIZE: usize = 4;
const RECORD_SIZE: usize = MAX_INDEX_NAME_LEN + ROOT_ID_SIZE;

/// Maximum number of index records page 0 can hold.
pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// View over the header page: a table of `(index name, root page id)` records.
///
/// Layout: record count (u32) followed by fixed-width records, each a
/// zero-padded name of `MAX_INDEX_NAME_LEN` bytes and the root page id.
pub struct HeaderPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> HeaderPage<B> {
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        let data = self.data.as_ref();
        u32::from_le_bytes(
            data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        ) as usize
    }

    /// Root page id recorded for `name`.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find(name).map(|slot| self.root_at(slot))
    }

    /// All recorded index names, in insertion order.
    pub fn names(&self) -> Vec<String> {
        (0..self.record_count())
            .map(|slot| String::from_utf8_lossy(self.name_at(slot)).into_owned())
            .collect()
    }

    fn record_offset(slot: usize) -> usize {
        RECORDS_OFFSET + slot * RECORD_SIZE
    }

    fn name_at(&self, slot: usize) -> &[u8] {
        let offset = Self::record_offset(slot);
        let raw = &self.data.as_ref()[offset..offset + MAX_INDEX_NAME_LEN];
        let len = raw.iter().position(|b| *b == 0).unwrap_or(MAX_INDEX_NAME_LEN);
        &raw[..len]
    }

    fn root_at(&self, slot: usize) -> PageId {
        let offset = Self::record_offset(slot) + MAX_INDEX_NAME_LEN;
        let bytes = &self.data.as_ref()[offset..offset + ROOT_ID_SIZE];
        PageId::new(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn find(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|slot| self.name_at(*slot) == name.as_bytes())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeaderPage<B> {
    /// Adds a record. Returns false if `name` is already recorded.
    pub fn insert_record(&mut self, name: &str, root_id: PageId) -> Result<bool> {
        check_name(name)?;
        if self.find(name).is_some() {
            return Ok(false);
        }

        let count = self.record_count();
        if count >= MAX_HEADER_RECORDS {
            return Err(StrataError::HeaderPageFull);
        }

        let offset = Self::record_offset(count);
        let data = self.data.as_mut();
        data[offset..offset + RECORD_SIZE].fill(0);
        data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        self.write_root(count, root_id);
        self.set_record_count(count + 1);
        Ok(true)
    }

    /// Points an existing record at a new root. Returns false if absent.
    pub fn update_record(&mut self, name: &str, root_id: PageId) -> bool {
        match self.find(name) {
            Some(slot) => {
                self.write_root(slot, root_id);
                true
            }
            None => false,
        }
    }

    /// Removes a record, moving the last record into its slot.
    /// Returns false if absent.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(slot) = self.find(name) else {
            return false;
        };

        let last = self.record_count() - 1;
        let data = self.data.as_mut();
        if slot != last {
            let from = Self::record_offset(last);
            data.copy_within(from..from + RECORD_SIZE, Self::record_offset(slot));
        }
        let tail = Self::record_offset(last);
        data[tail..tail + RECORD_SIZE].fill(0);
        self.set_record_count(last);
        true
    }

    fn write_root(&mut self, slot: usize, root_id: PageId) {
        let offset = Self::record_offset(slot) + MAX_INDEX_NAME_LEN;
        self.data.as_mut()[offset..offset + ROOT_ID_SIZE]
            .copy_from_slice(&root_id.as_u32().to_le_bytes());
    }

    fn set_record_count(&mut self, count: usize) {
        self.data.as_mut()[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count as u32).to_le_bytes());
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_INDEX_NAME_LEN || name.as_bytes().contains(&0) {
        return Err(StrataError::IndexNameTooLong(name.to_string()));
    }
    Ok(())
}

/// Validates an index name without touching a page.
pub fn validate_index_name(name: &str) -> Result<()> {
    check_name(name)
}
