use std::cmp::Ordering;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{PageId, RecordId, Result, StrataError, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::page::{
    self, BPlusTreeNode, FixedSizeCodec, HeaderPage, IntegerKey, InternalNode, LeafNode,
    PageType,
};

use super::{IndexIterator, KeyComparator};

/// A decoded node whose kind was read from its page tag.
enum Node<K, V> {
    Leaf(LeafNode<K, V>),
    Internal(InternalNode<K>),
}

fn max_key_of<K: FixedSizeCodec, X: FixedSizeCodec>(node: &BPlusTreeNode<K, X>) -> Result<K> {
    node.max_key()
        .cloned()
        .ok_or_else(|| StrataError::IndexCorrupted(format!("{} has no entries", node.page_id)))
}

/// Disk-resident B+Tree mapping unique keys to values.
///
/// Every internal entry pairs a child with the largest key stored under that
/// child, so a lookup descends into the first child whose key is not smaller
/// than the target. Nodes live in buffer pool pages and are only touched
/// through page guards; the root page id is recorded under the index name in
/// the header page so the tree can be reopened.
///
/// Mutations take `&mut self`, lookups and iteration take `&self`.
pub struct BPlusTree<K, V, C> {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    root_page_id: PageId,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: FixedSizeCodec,
    V: FixedSizeCodec,
    C: KeyComparator<K>,
{
    /// Opens the index called `index_name`, creating an empty one if the
    /// header page has no record of it.
    ///
    /// # Panics
    /// If a max size is too small to split or too large for a page.
    pub fn new(
        index_name: &str,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        page::validate_index_name(index_name)?;
        assert!(
            (2..=page::leaf_max_size::<K, V>()).contains(&leaf_max_size),
            "leaf max size {leaf_max_size} out of range"
        );
        assert!(
            (3..=page::internal_max_size::<K>()).contains(&internal_max_size),
            "internal max size {internal_max_size} out of range"
        );

        let root_page_id = {
            let guard = bpm
                .fetch_page_read(HEADER_PAGE_ID)?
                .ok_or(StrataError::BufferPoolFull)?;
            HeaderPage::new(guard.data())
                .get_root_id(index_name)
                .unwrap_or(INVALID_PAGE_ID)
        };

        if root_page_id.is_valid() {
            log::debug!("reopened index '{index_name}' at root {root_page_id}");
        }

        Ok(Self {
            index_name: index_name.to_string(),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_page_id,
            _marker: PhantomData,
        })
    }

    /// Opens an index whose nodes fill a whole page.
    pub fn with_default_sizes(
        index_name: &str,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
    ) -> Result<Self> {
        Self::new(
            index_name,
            bpm,
            comparator,
            page::leaf_max_size::<K, V>(),
            page::internal_max_size::<K>(),
        )
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn is_empty(&self) -> bool {
        !self.root_page_id.is_valid()
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    /// Looks up the value stored for `key`.
    pub fn search(&self, key: &K) -> Result<Option<V>> {
        if self.is_empty() {
            return Ok(None);
        }

        let leaf = self.find_leaf(key)?;
        Ok(self
            .leaf_search(&leaf, key)
            .ok()
            .map(|pos| leaf.entries[pos].1.clone()))
    }

    /// Inserts `key`, or replaces its value if it is already present.
    /// Returns true if the key is new.
    pub fn insert(&mut self, key: K, value: V) -> Result<bool> {
        if self.is_empty() {
            self.start_new_tree(key, value)?;
            return Ok(true);
        }

        let mut page_id = self.root_page_id;
        let mut leaf = loop {
            match self.load_node(page_id)? {
                Node::Leaf(leaf) => break leaf,
                Node::Internal(mut node) => {
                    let (idx, child) = self.route(&node, &key)?;
                    // Past the end of the subtree: its routing key grows
                    if idx + 1 == node.len()
                        && self.comparator.compare(&node.entries[idx].0, &key) == Ordering::Less
                    {
                        node.entries[idx].0 = key.clone();
                        self.store(&node)?;
                    }
                    page_id = child;
                }
            }
        };

        match self.leaf_search(&leaf, &key) {
            Ok(pos) => {
                leaf.entries[pos].1 = value;
                self.store(&leaf)?;
                Ok(false)
            }
            Err(pos) => {
                leaf.entries.insert(pos, (key, value));
                if leaf.len() > leaf.max_size {
                    self.split_leaf(leaf)?;
                } else {
                    self.store(&leaf)?;
                }
                Ok(true)
            }
        }
    }

    /// Removes `key`. Returns false if it was not present.
    pub fn remove(&mut self, key: &K) -> Result<bool> {
        if self.is_empty() {
            return Ok(false);
        }

        let mut leaf = self.find_leaf(key)?;
        let Ok(pos) = self.leaf_search(&leaf, key) else {
            return Ok(false);
        };
        leaf.entries.remove(pos);

        if pos == leaf.len() {
            if let Some(new_max) = leaf.max_key().cloned() {
                self.fix_routing_keys(leaf.page_id, leaf.parent_page_id, new_max)?;
            }
        }

        self.rebalance_leaf(leaf)?;
        Ok(true)
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator<K, V>> {
        if self.is_empty() {
            return Ok(self.end());
        }

        let mut page_id = self.root_page_id;
        loop {
            match self.load_node(page_id)? {
                Node::Leaf(_) => break,
                Node::Internal(node) => {
                    page_id = node.entries.first().map(|(_, child)| *child).ok_or_else(|| {
                        StrataError::IndexCorrupted(format!("{page_id} has no children"))
                    })?;
                }
            }
        }

        IndexIterator::new(Arc::clone(&self.bpm), page_id, 0)
    }

    /// Iterator positioned at the first key not smaller than `key`.
    pub fn begin_at(&self, key: &K) -> Result<IndexIterator<K, V>> {
        if self.is_empty() {
            return Ok(self.end());
        }

        let leaf = self.find_leaf(key)?;
        let index = leaf
            .entries
            .partition_point(|(k, _)| self.comparator.compare(k, key) == Ordering::Less);
        IndexIterator::new(Arc::clone(&self.bpm), leaf.page_id, index)
    }

    /// The past-the-end iterator.
    pub fn end(&self) -> IndexIterator<K, V> {
        IndexIterator::end(Arc::clone(&self.bpm))
    }

    /// Walks the whole tree and reports the first structural problem found:
    /// unsorted or out-of-range keys, bad occupancy, stale parent pointers,
    /// routing keys that differ from their subtree's maximum, uneven leaf
    /// depth, or a broken leaf chain.
    pub fn check_integrity(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let mut walk = IntegrityWalk {
            leaf_depth: None,
            leaves: Vec::new(),
        };
        self.check_subtree(self.root_page_id, INVALID_PAGE_ID, None, 0, &mut walk)?;

        for (i, leaf_id) in walk.leaves.iter().enumerate() {
            let leaf = self.load_leaf(*leaf_id)?;
            let expected_prev = if i == 0 { INVALID_PAGE_ID } else { walk.leaves[i - 1] };
            let expected_next = walk.leaves.get(i + 1).copied().unwrap_or(INVALID_PAGE_ID);
            if leaf.prev_page_id != expected_prev || leaf.next_page_id != expected_next {
                return Err(StrataError::IndexCorrupted(format!(
                    "leaf chain broken at {leaf_id}: prev {} next {}, expected prev {expected_prev} next {expected_next}",
                    leaf.prev_page_id, leaf.next_page_id
                )));
            }
        }

        Ok(())
    }

    /// Renders the tree in Graphviz dot format.
    pub fn to_dot(&self) -> Result<String> {
        let mut out = String::from("digraph BPlusTree {\n  node [shape=record];\n");
        if !self.is_empty() {
            self.dot_subtree(self.root_page_id, &mut out)?;
        }
        out.push_str("}\n");
        Ok(out)
    }

    /// Renders the tree as indented text, one node per line.
    pub fn dump(&self) -> Result<String> {
        let mut out = String::new();
        if self.is_empty() {
            out.push_str("(empty)\n");
        } else {
            self.dump_subtree(self.root_page_id, 0, &mut out)?;
        }
        Ok(out)
    }

    fn start_new_tree(&mut self, key: K, value: V) -> Result<()> {
        let page_id = self.allocate_page()?;
        let mut leaf = LeafNode::new(PageType::Leaf, page_id, INVALID_PAGE_ID, self.leaf_max_size);
        leaf.entries.push((key, value));
        self.store(&leaf)?;
        self.set_root(page_id)
    }

    fn split_leaf(&mut self, mut leaf: LeafNode<K, V>) -> Result<()> {
        let right_id = self.allocate_page()?;
        let split_at = leaf.len() - leaf.min_size();

        let mut right = LeafNode::new(PageType::Leaf, right_id, leaf.parent_page_id, leaf.max_size);
        right.entries = leaf.entries.split_off(split_at);
        right.prev_page_id = leaf.page_id;
        right.next_page_id = leaf.next_page_id;
        if right.next_page_id.is_valid() {
            let mut guard = self.fetch_write(right.next_page_id)?;
            page::set_prev_page_id(guard.data_mut(), right_id);
        }
        leaf.next_page_id = right_id;

        self.store(&leaf)?;
        self.store(&right)?;
        log::trace!(
            "split leaf {} into {} + {} entries, new sibling {right_id}",
            leaf.page_id,
            leaf.len(),
            right.len()
        );

        self.insert_into_parent(
            leaf.page_id,
            max_key_of(&leaf)?,
            leaf.parent_page_id,
            right_id,
            max_key_of(&right)?,
        )
    }

    fn split_internal(&mut self, mut node: InternalNode<K>) -> Result<()> {
        let right_id = self.allocate_page()?;
        let split_at = node.len() - node.min_size();

        let mut right =
            InternalNode::new(PageType::Internal, right_id, node.parent_page_id, node.max_size);
        right.entries = node.entries.split_off(split_at);

        self.store(&node)?;
        self.store(&right)?;
        self.adopt_children(&right.entries, right_id)?;
        log::trace!(
            "split internal {} into {} + {} entries, new sibling {right_id}",
            node.page_id,
            node.len(),
            right.len()
        );

        self.insert_into_parent(
            node.page_id,
            max_key_of(&node)?,
            node.parent_page_id,
            right_id,
            max_key_of(&right)?,
        )
    }

    /// Records that `left` was split and `right` now holds its upper half.
    fn insert_into_parent(
        &mut self,
        left_id: PageId,
        left_max: K,
        parent_id: PageId,
        right_id: PageId,
        right_max: K,
    ) -> Result<()> {
        if !parent_id.is_valid() {
            let root_id = self.allocate_page()?;
            let mut root =
                InternalNode::new(PageType::Internal, root_id, INVALID_PAGE_ID, self.internal_max_size);
            root.entries.push((left_max, left_id));
            root.entries.push((right_max, right_id));
            self.store(&root)?;
            self.set_parent(left_id, root_id)?;
            self.set_parent(right_id, root_id)?;
            return self.set_root(root_id);
        }

        let mut parent = self.load_internal(parent_id)?;
        let pos = self.position_in_parent(&parent, left_id)?;
        parent.entries[pos].0 = left_max;
        parent.entries.insert(pos + 1, (right_max, right_id));

        if parent.len() > parent.max_size {
            self.split_internal(parent)
        } else {
            self.store(&parent)
        }
    }

    /// Propagates a child's new maximum to the ancestors that route on it.
    fn fix_routing_keys(&self, child_id: PageId, parent_id: PageId, new_max: K) -> Result<()> {
        let mut child_id = child_id;
        let mut parent_id = parent_id;

        while parent_id.is_valid() {
            let mut parent = self.load_internal(parent_id)?;
            let pos = self.position_in_parent(&parent, child_id)?;
            if self.comparator.compare(&parent.entries[pos].0, &new_max) == Ordering::Equal {
                break;
            }

            parent.entries[pos].0 = new_max.clone();
            self.store(&parent)?;
            if pos + 1 < parent.len() {
                break;
            }

            child_id = parent_id;
            parent_id = parent.parent_page_id;
        }

        Ok(())
    }

    fn rebalance_leaf(&mut self, leaf: LeafNode<K, V>) -> Result<()> {
        if leaf.page_id == self.root_page_id {
            if leaf.is_empty() {
                log::debug!("index '{}' is now empty", self.index_name);
                self.set_root(INVALID_PAGE_ID)?;
                self.discard_page(leaf.page_id)?;
                return Ok(());
            }
            return self.store(&leaf);
        }

        self.rebalance_non_root(leaf, |_: &Self, _: &[(K, V)], _: PageId| Ok(()))
    }

    fn rebalance_internal(&mut self, node: InternalNode<K>) -> Result<()> {
        if node.page_id == self.root_page_id {
            if node.len() == 1 {
                let child = node.entries[0].1;
                self.set_parent(child, INVALID_PAGE_ID)?;
                self.set_root(child)?;
                self.discard_page(node.page_id)?;
                return Ok(());
            }
            return self.store(&node);
        }

        self.rebalance_non_root(node, Self::adopt_children)
    }

    /// Restores minimum occupancy of a non-root node that just lost an entry,
    /// first by borrowing from a sibling, then by merging with one.
    /// `adopt` re-parents entries that moved between internal nodes.
    fn rebalance_non_root<X, A>(&mut self, mut node: BPlusTreeNode<K, X>, adopt: A) -> Result<()>
    where
        X: FixedSizeCodec,
        A: Fn(&Self, &[(K, X)], PageId) -> Result<()>,
    {
        if node.len() >= node.min_size() {
            return self.store(&node);
        }

        let mut parent = self.load_internal(node.parent_page_id)?;
        let idx = self.position_in_parent(&parent, node.page_id)?;
        let old_parent_max = max_key_of(&parent)?;

        let mut left = match idx.checked_sub(1) {
            Some(left_idx) => Some(self.load::<X>(parent.entries[left_idx].1, node.page_type)?),
            None => None,
        };
        if let Some(left) = left.as_mut().filter(|left| left.len() > left.min_size()) {
            if let Some(moved) = left.entries.pop() {
                node.entries.insert(0, moved);
            }
            adopt(self, &node.entries[..1], node.page_id)?;
            parent.entries[idx - 1].0 = max_key_of(left)?;
            parent.entries[idx].0 = max_key_of(&node)?;
            self.store(left)?;
            self.store(&node)?;
            log::trace!("{} borrowed from left sibling {}", node.page_id, left.page_id);
            return self.finish_parent_update(parent, old_parent_max, false);
        }

        let mut right = match parent.entries.get(idx + 1) {
            Some((_, right_id)) => Some(self.load::<X>(*right_id, node.page_type)?),
            None => None,
        };
        if let Some(right) = right.as_mut().filter(|right| right.len() > right.min_size()) {
            node.entries.push(right.entries.remove(0));
            adopt(self, &node.entries[node.len() - 1..], node.page_id)?;
            parent.entries[idx].0 = max_key_of(&node)?;
            self.store(right)?;
            self.store(&node)?;
            log::trace!("{} borrowed from right sibling {}", node.page_id, right.page_id);
            return self.finish_parent_update(parent, old_parent_max, false);
        }

        if let Some(mut left) = left {
            let start = left.len();
            left.entries.append(&mut node.entries);
            adopt(self, &left.entries[start..], left.page_id)?;
            if node.is_leaf() {
                self.relink_next(&mut left, node.next_page_id)?;
            }
            parent.entries[idx - 1].0 = max_key_of(&left)?;
            parent.entries.remove(idx);
            self.store(&left)?;
            self.discard_page(node.page_id)?;
            log::trace!("merged {} into left sibling {}", node.page_id, left.page_id);
        } else if let Some(mut right) = right {
            let start = node.len();
            node.entries.append(&mut right.entries);
            adopt(self, &node.entries[start..], node.page_id)?;
            if node.is_leaf() {
                self.relink_next(&mut node, right.next_page_id)?;
            }
            parent.entries[idx].0 = max_key_of(&node)?;
            parent.entries.remove(idx + 1);
            self.store(&node)?;
            self.discard_page(right.page_id)?;
            log::trace!("merged right sibling {} into {}", right.page_id, node.page_id);
        } else {
            return Err(StrataError::IndexCorrupted(format!(
                "{} is under-full and has no siblings",
                node.page_id
            )));
        }

        self.finish_parent_update(parent, old_parent_max, true)
    }

    /// Writes back a parent after its children were rebalanced, pushing a
    /// changed maximum upward and rebalancing the parent if it lost an entry.
    fn finish_parent_update(
        &mut self,
        parent: InternalNode<K>,
        old_max: K,
        lost_entry: bool,
    ) -> Result<()> {
        let new_max = max_key_of(&parent)?;
        if self.comparator.compare(&new_max, &old_max) != Ordering::Equal {
            self.fix_routing_keys(parent.page_id, parent.parent_page_id, new_max)?;
        }

        if lost_entry {
            self.rebalance_internal(parent)
        } else {
            self.store(&parent)
        }
    }

    /// Points `leaf` at `next` and `next` back at `leaf`.
    fn relink_next<X: FixedSizeCodec>(&self, leaf: &mut BPlusTreeNode<K, X>, next: PageId) -> Result<()> {
        leaf.next_page_id = next;
        if next.is_valid() {
            let mut guard = self.fetch_write(next)?;
            page::set_prev_page_id(guard.data_mut(), leaf.page_id);
        }
        Ok(())
    }

    fn adopt_children(&self, entries: &[(K, PageId)], parent_id: PageId) -> Result<()> {
        for (_, child) in entries {
            self.set_parent(*child, parent_id)?;
        }
        Ok(())
    }

    fn set_parent(&self, page_id: PageId, parent_id: PageId) -> Result<()> {
        let mut guard = self.fetch_write(page_id)?;
        page::set_parent_page_id(guard.data_mut(), parent_id);
        Ok(())
    }

    fn set_root(&mut self, root_page_id: PageId) -> Result<()> {
        self.root_page_id = root_page_id;

        let mut guard = self.fetch_write(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.index_name, root_page_id) {
            header.insert_record(&self.index_name, root_page_id)?;
        }

        log::debug!("index '{}' root is now {root_page_id}", self.index_name);
        Ok(())
    }

    fn discard_page(&self, page_id: PageId) -> Result<()> {
        if !self.bpm.delete_page(page_id)? {
            log::warn!("{page_id} is still pinned, leaving it allocated");
        }
        Ok(())
    }

    fn find_leaf(&self, key: &K) -> Result<LeafNode<K, V>> {
        let mut page_id = self.root_page_id;
        loop {
            match self.load_node(page_id)? {
                Node::Leaf(leaf) => return Ok(leaf),
                Node::Internal(node) => page_id = self.route(&node, key)?.1,
            }
        }
    }

    /// First child whose routing key is not smaller than `key`, or the last one.
    fn route(&self, node: &InternalNode<K>, key: &K) -> Result<(usize, PageId)> {
        if node.is_empty() {
            return Err(StrataError::IndexCorrupted(format!(
                "{} has no children",
                node.page_id
            )));
        }
        let pos = node
            .entries
            .partition_point(|(k, _)| self.comparator.compare(k, key) == Ordering::Less)
            .min(node.len() - 1);
        Ok((pos, node.entries[pos].1))
    }

    fn leaf_search(&self, leaf: &LeafNode<K, V>, key: &K) -> std::result::Result<usize, usize> {
        leaf.entries
            .binary_search_by(|(k, _)| self.comparator.compare(k, key))
    }

    fn position_in_parent(&self, parent: &InternalNode<K>, child_id: PageId) -> Result<usize> {
        parent.position_of(&child_id).ok_or_else(|| {
            StrataError::IndexCorrupted(format!("{child_id} missing from parent {}", parent.page_id))
        })
    }

    fn fetch_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        self.bpm
            .fetch_page_read(page_id)?
            .ok_or(StrataError::BufferPoolFull)
    }

    fn fetch_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        self.bpm
            .fetch_page_write(page_id)?
            .ok_or(StrataError::BufferPoolFull)
    }

    /// Allocates a page for a new node. The node is written later by `store`.
    fn allocate_page(&self) -> Result<PageId> {
        let guard = self.bpm.new_page()?.ok_or(StrataError::BufferPoolFull)?;
        Ok(guard.page_id())
    }

    fn store<X: FixedSizeCodec>(&self, node: &BPlusTreeNode<K, X>) -> Result<()> {
        let mut guard = self.fetch_write(node.page_id)?;
        node.encode(guard.data_mut());
        Ok(())
    }

    fn load<X: FixedSizeCodec>(&self, page_id: PageId, page_type: PageType) -> Result<BPlusTreeNode<K, X>> {
        let guard = self.fetch_read(page_id)?;
        let node = BPlusTreeNode::decode(guard.data(), page_type)?;
        Self::check_stamp(page_id, node.page_id)?;
        Ok(node)
    }

    fn load_leaf(&self, page_id: PageId) -> Result<LeafNode<K, V>> {
        self.load(page_id, PageType::Leaf)
    }

    fn load_internal(&self, page_id: PageId) -> Result<InternalNode<K>> {
        self.load(page_id, PageType::Internal)
    }

    fn load_node(&self, page_id: PageId) -> Result<Node<K, V>> {
        let guard = self.fetch_read(page_id)?;
        let data = guard.data();
        let tag = page::page_type_tag(data);

        let node = match PageType::from_tag(tag) {
            Some(PageType::Leaf) => {
                let leaf: LeafNode<K, V> = BPlusTreeNode::decode(data, PageType::Leaf)?;
                Self::check_stamp(page_id, leaf.page_id)?;
                Node::Leaf(leaf)
            }
            Some(PageType::Internal) => {
                let internal: InternalNode<K> = BPlusTreeNode::decode(data, PageType::Internal)?;
                Self::check_stamp(page_id, internal.page_id)?;
                Node::Internal(internal)
            }
            _ => return Err(StrataError::InvalidPageType { page_id, tag }),
        };
        Ok(node)
    }

    fn check_stamp(page_id: PageId, stamped: PageId) -> Result<()> {
        if page_id != stamped {
            return Err(StrataError::IndexCorrupted(format!(
                "{page_id} holds a node stamped {stamped}"
            )));
        }
        Ok(())
    }

    /// Checks the subtree at `page_id` and returns its largest key.
    fn check_subtree(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower_bound: Option<&K>,
        depth: usize,
        walk: &mut IntegrityWalk,
    ) -> Result<K> {
        match self.load_node(page_id)? {
            Node::Leaf(leaf) => {
                self.check_node_shape(&leaf, expected_parent, lower_bound)?;
                match walk.leaf_depth {
                    Some(d) if d != depth => {
                        return Err(StrataError::IndexCorrupted(format!(
                            "leaf {page_id} at depth {depth}, other leaves at depth {d}"
                        )));
                    }
                    _ => walk.leaf_depth = Some(depth),
                }
                walk.leaves.push(page_id);
                max_key_of(&leaf)
            }
            Node::Internal(node) => {
                self.check_node_shape(&node, expected_parent, lower_bound)?;
                if page_id == self.root_page_id && node.len() < 2 {
                    return Err(StrataError::IndexCorrupted(format!(
                        "internal root {page_id} has a single child"
                    )));
                }

                let mut lower = lower_bound.cloned();
                for (key, child) in &node.entries {
                    let child_max =
                        self.check_subtree(*child, page_id, lower.as_ref(), depth + 1, walk)?;
                    if self.comparator.compare(&child_max, key) != Ordering::Equal {
                        return Err(StrataError::IndexCorrupted(format!(
                            "{page_id} routes {child} on {key:?} but its largest key is {child_max:?}"
                        )));
                    }
                    lower = Some(key.clone());
                }
                max_key_of(&node)
            }
        }
    }

    fn check_node_shape<X: FixedSizeCodec>(
        &self,
        node: &BPlusTreeNode<K, X>,
        expected_parent: PageId,
        lower_bound: Option<&K>,
    ) -> Result<()> {
        let page_id = node.page_id;
        let corrupted = |msg: String| Err(StrataError::IndexCorrupted(msg));

        if node.parent_page_id != expected_parent {
            return corrupted(format!(
                "{page_id} points at parent {}, expected {expected_parent}",
                node.parent_page_id
            ));
        }
        if node.is_empty() {
            return corrupted(format!("{page_id} has no entries"));
        }
        if node.len() > node.max_size {
            return corrupted(format!("{page_id} holds {} > {} entries", node.len(), node.max_size));
        }
        if page_id != self.root_page_id && node.len() < node.min_size() {
            return corrupted(format!("{page_id} holds {} < {} entries", node.len(), node.min_size()));
        }

        let sorted = node.entries.windows(2).all(|pair| {
            self.comparator.compare(&pair[0].0, &pair[1].0) == Ordering::Less
        });
        if !sorted {
            return corrupted(format!("{page_id} keys are not strictly increasing"));
        }
        if let Some(lower) = lower_bound {
            if self.comparator.compare(&node.entries[0].0, lower) != Ordering::Greater {
                return corrupted(format!(
                    "{page_id} starts at {:?}, not above its left neighbour's {lower:?}",
                    node.entries[0].0
                ));
            }
        }

        Ok(())
    }

    fn dot_subtree(&self, page_id: PageId, out: &mut String) -> Result<()> {
        let id = page_id.as_u32();
        match self.load_node(page_id)? {
            Node::Leaf(leaf) => {
                let keys: Vec<String> = leaf.entries.iter().map(|(k, _)| format!("{k:?}")).collect();
                out.push_str(&format!(
                    "  page_{id} [label=\"P{id}|{}\" style=filled fillcolor=\"#d8f0d8\"];\n",
                    keys.join("|")
                ));
                if leaf.next_page_id.is_valid() {
                    out.push_str(&format!(
                        "  page_{id} -> page_{} [style=dashed constraint=false];\n",
                        leaf.next_page_id.as_u32()
                    ));
                }
            }
            Node::Internal(node) => {
                let slots: Vec<String> = node
                    .entries
                    .iter()
                    .enumerate()
                    .map(|(i, (k, _))| format!("<s{i}>{k:?}"))
                    .collect();
                out.push_str(&format!("  page_{id} [label=\"P{id}|{}\"];\n", slots.join("|")));
                for (i, (_, child)) in node.entries.iter().enumerate() {
                    out.push_str(&format!("  page_{id}:s{i} -> page_{};\n", child.as_u32()));
                    self.dot_subtree(*child, out)?;
                }
            }
        }
        Ok(())
    }

    fn dump_subtree(&self, page_id: PageId, depth: usize, out: &mut String) -> Result<()> {
        let indent = "  ".repeat(depth);
        match self.load_node(page_id)? {
            Node::Leaf(leaf) => {
                let keys: Vec<String> = leaf.entries.iter().map(|(k, _)| format!("{k:?}")).collect();
                out.push_str(&format!(
                    "{indent}leaf {page_id} prev={} next={} [{}]\n",
                    leaf.prev_page_id,
                    leaf.next_page_id,
                    keys.join(", ")
                ));
            }
            Node::Internal(node) => {
                let routes: Vec<String> = node
                    .entries
                    .iter()
                    .map(|(k, child)| format!("{k:?}->{}", child.as_u32()))
                    .collect();
                out.push_str(&format!(
                    "{indent}internal {page_id} parent={} [{}]\n",
                    node.parent_page_id,
                    routes.join(", ")
                ));
                for (_, child) in &node.entries {
                    self.dump_subtree(*child, depth + 1, out)?;
                }
            }
        }
        Ok(())
    }
}

struct IntegrityWalk {
    leaf_depth: Option<usize>,
    leaves: Vec<PageId>,
}

impl<K, C> BPlusTree<K, RecordId, C>
where
    K: FixedSizeCodec + IntegerKey,
    C: KeyComparator<K>,
{
    /// Inserts every whitespace-separated integer in the file, using the
    /// integer both as the key and as the record id. Returns how many keys
    /// were new. Nothing is inserted if any token is not a valid key.
    pub fn insert_from_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let mut inserted = 0;
        for (key, value) in read_integer_keys::<K>(path.as_ref())? {
            if self.insert(key, RecordId::from_i64(value))? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Removes every whitespace-separated integer in the file. Returns how
    /// many keys were present. Nothing is removed if any token is not a
    /// valid key.
    pub fn remove_from_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let mut removed = 0;
        for (key, _) in read_integer_keys::<K>(path.as_ref())? {
            if self.remove(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn read_integer_keys<K: IntegerKey>(path: &Path) -> Result<Vec<(K, i64)>> {
    std::fs::read_to_string(path)?
        .split_whitespace()
        .map(|token| {
            let value = token
                .parse::<i64>()
                .map_err(|_| StrataError::InvalidKey(token.to_string()))?;
            Ok((K::from_i64(value)?, value))
        })
        .collect()
}
