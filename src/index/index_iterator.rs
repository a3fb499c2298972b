use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{PageId, Result, StrataError, INVALID_PAGE_ID};
use crate::storage::page::{self, BPlusTreeNode, FixedSizeCodec, PageType};

/// Forward cursor over the leaf level of a B+Tree.
///
/// The cursor is a `(leaf page, slot)` pair and only pins a leaf while
/// reading from it, so it sees whatever the tree holds at each step. After
/// every step it moves past exhausted leaves, which keeps `is_end` exact.
pub struct IndexIterator<K, V> {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    index: usize,
    /// Error hit while advancing past the last item handed out
    pending: Option<StrataError>,
    _marker: PhantomData<(K, V)>,
}

impl<K: FixedSizeCodec, V: FixedSizeCodec> IndexIterator<K, V> {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, index: usize) -> Result<Self> {
        let mut iter = Self {
            bpm,
            page_id,
            index,
            pending: None,
            _marker: PhantomData,
        };
        iter.skip_exhausted_leaves()?;
        Ok(iter)
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            page_id: INVALID_PAGE_ID,
            index: 0,
            pending: None,
            _marker: PhantomData,
        }
    }

    pub fn is_end(&self) -> bool {
        !self.page_id.is_valid() && self.pending.is_none()
    }

    /// Leaf page the cursor points into.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Slot within the current leaf.
    pub fn index(&self) -> usize {
        self.index
    }

    fn fetch_leaf(&self) -> Result<ReadPageGuard> {
        let guard = self
            .bpm
            .fetch_page_read(self.page_id)?
            .ok_or(StrataError::BufferPoolFull)?;

        let tag = page::page_type_tag(guard.data());
        if tag != PageType::Leaf as u8 {
            return Err(StrataError::InvalidPageType {
                page_id: self.page_id,
                tag,
            });
        }

        let size = page::node_size(guard.data());
        let capacity = BPlusTreeNode::<K, V>::capacity();
        if size > capacity {
            return Err(StrataError::IndexCorrupted(format!(
                "{} claims {size} entries, a page holds at most {capacity}",
                self.page_id
            )));
        }
        Ok(guard)
    }

    fn skip_exhausted_leaves(&mut self) -> Result<()> {
        while self.page_id.is_valid() {
            let guard = self.fetch_leaf()?;
            if self.index < page::node_size(guard.data()) {
                break;
            }
            self.page_id = page::next_page_id(guard.data());
            self.index = 0;
        }
        Ok(())
    }

    fn read_current(&self) -> Result<(K, V)> {
        let guard = self.fetch_leaf()?;
        if self.index >= page::node_size(guard.data()) {
            // The leaf shrank under the cursor
            return Err(StrataError::IndexCorrupted(format!(
                "cursor slot {} past the end of {}",
                self.index, self.page_id
            )));
        }
        Ok(page::entry_at(guard.data(), self.index))
    }
}

impl<K: FixedSizeCodec, V: FixedSizeCodec> Iterator for IndexIterator<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending.take() {
            return Some(Err(e));
        }
        if !self.page_id.is_valid() {
            return None;
        }

        let item = match self.read_current() {
            Ok(item) => item,
            Err(e) => {
                self.page_id = INVALID_PAGE_ID;
                return Some(Err(e));
            }
        };

        self.index += 1;
        if let Err(e) = self.skip_exhausted_leaves() {
            self.page_id = INVALID_PAGE_ID;
            self.pending = Some(e);
        }

        Some(Ok(item))
    }
}

impl<K, V> PartialEq for IndexIterator<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id && self.index == other.index
    }
}

impl<K, V> std::fmt::Debug for IndexIterator<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexIterator")
            .field("page_id", &self.page_id)
            .field("index", &self.index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::RecordId;
    use crate::index::{BPlusTree, OrdComparator};
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    fn create_tree(keys: impl IntoIterator<Item = i64>) -> (BPlusTree<i64, RecordId, OrdComparator>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(16, 2, dm));
        let mut tree = BPlusTree::new("iter_index", bpm, OrdComparator, 3, 3).unwrap();
        for key in keys {
            tree.insert(key, RecordId::from_i64(key)).unwrap();
        }
        (tree, temp_file)
    }

    #[test]
    fn test_iterator_crosses_leaves() {
        let (tree, _temp) = create_tree(1..=10);
        let keys: Vec<i64> = tree.begin().unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(keys, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_iterator_begin_at() {
        let (tree, _temp) = create_tree((0..20).map(|k| k * 2));

        let from_odd: Vec<i64> = tree.begin_at(&7).unwrap().map(|r| r.unwrap().0).take(3).collect();
        assert_eq!(from_odd, vec![8, 10, 12]);

        let from_exact: Vec<i64> = tree.begin_at(&8).unwrap().map(|r| r.unwrap().0).take(2).collect();
        assert_eq!(from_exact, vec![8, 10]);

        assert!(tree.begin_at(&39).unwrap().is_end());
        assert_eq!(tree.begin_at(&100).unwrap(), tree.end());
    }

    #[test]
    fn test_iterator_reaches_end() {
        let (tree, _temp) = create_tree(1..=4);
        let mut iter = tree.begin().unwrap();
        for _ in 0..4 {
            assert!(!iter.is_end());
            iter.next().unwrap().unwrap();
        }
        assert!(iter.is_end());
        assert_eq!(iter, tree.end());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_iterator_rejects_corrupt_entry_count() {
        let (tree, _temp) = create_tree(1..=4);
        let mut iter = tree.begin().unwrap();
        assert_eq!(iter.next().unwrap().unwrap().0, 1);

        {
            // The entry count sits right after the 4-byte type field
            let mut guard = iter.bpm.fetch_page_write(iter.page_id()).unwrap().unwrap();
            guard.data_mut()[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        }

        assert!(matches!(
            iter.next(),
            Some(Err(StrataError::IndexCorrupted(_)))
        ));
        assert!(iter.next().is_none());
    }
}
