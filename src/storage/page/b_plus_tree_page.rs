use std::fmt;

use crate::common::{PageId, RecordId, Result, SlotId, StrataError, INVALID_PAGE_ID, PAGE_SIZE};

// Node header layout (little-endian):
//   [0]      page type tag
//   [4..8]   number of entries
//   [8..12]  max entries
//   [12..16] parent page id
//   [16..20] own page id
//   [20..24] next leaf (leaves only)
//   [24..28] previous leaf (leaves only)
const PAGE_TYPE_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 4;
const MAX_SIZE_OFFSET: usize = 8;
const PARENT_PAGE_OFFSET: usize = 12;
const PAGE_ID_OFFSET: usize = 16;
const NEXT_PAGE_OFFSET: usize = 20;
const PREV_PAGE_OFFSET: usize = 24;

pub const NODE_HEADER_SIZE: usize = 28;

/// Tag stored in the first byte of every B+Tree page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    Invalid = 0,
    Leaf = 1,
    Internal = 2,
}

impl PageType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PageType::Invalid),
            1 => Some(PageType::Leaf),
            2 => Some(PageType::Internal),
            _ => None,
        }
    }
}

/// Fixed-width binary encoding for keys and values stored in tree nodes.
pub trait FixedSizeCodec: Clone + fmt::Debug + Send + Sync + 'static {
    const ENCODED_SIZE: usize;

    /// Writes exactly `ENCODED_SIZE` bytes into the front of `buf`.
    fn encode(&self, buf: &mut [u8]);

    /// Reads a value from the first `ENCODED_SIZE` bytes of `buf`.
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_codec_for_int {
    ($($t:ty),*) => {
        $(
            impl FixedSizeCodec for $t {
                const ENCODED_SIZE: usize = std::mem::size_of::<$t>();

                fn encode(&self, buf: &mut [u8]) {
                    buf[..Self::ENCODED_SIZE].copy_from_slice(&self.to_le_bytes());
                }

                fn decode(buf: &[u8]) -> Self {
                    <$t>::from_le_bytes(buf[..Self::ENCODED_SIZE].try_into().unwrap())
                }
            }
        )*
    };
}

impl_codec_for_int!(u32, u64, i32, i64);

impl FixedSizeCodec for PageId {
    const ENCODED_SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        self.as_u32().encode(buf);
    }

    fn decode(buf: &[u8]) -> Self {
        PageId::new(u32::decode(buf))
    }
}

impl FixedSizeCodec for RecordId {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        self.page_id.encode(&mut buf[0..4]);
        self.slot_id.as_u32().encode(&mut buf[4..8]);
    }

    fn decode(buf: &[u8]) -> Self {
        RecordId::new(PageId::decode(&buf[0..4]), SlotId::new(u32::decode(&buf[4..8])))
    }
}

/// Opaque fixed-width key compared byte by byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenericKey<const N: usize> {
    pub data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    pub fn new(data: [u8; N]) -> Self {
        Self { data }
    }

    /// Inverse of `IntegerKey::from_i64`. Reads the first 8 bytes.
    pub fn to_i64(&self) -> i64 {
        let bits = u64::from_be_bytes(self.data[..8].try_into().unwrap());
        (bits ^ (1 << 63)) as i64
    }

    /// Copies `bytes` into a zero-padded key. Longer input is truncated.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; N];
        let len = bytes.len().min(N);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }
}

impl<const N: usize> Default for GenericKey<N> {
    fn default() -> Self {
        Self { data: [0u8; N] }
    }
}

impl<const N: usize> fmt::Debug for GenericKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if N >= 8 {
            write!(f, "{}", self.to_i64())
        } else {
            write!(f, "{:02x?}", &self.data[..])
        }
    }
}

impl<const N: usize> FixedSizeCodec for GenericKey<N> {
    const ENCODED_SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.data);
    }

    fn decode(buf: &[u8]) -> Self {
        Self::from_bytes(&buf[..N])
    }
}

/// Keys that can be built from an integer, for loading keys from text.
/// Values the key type cannot represent are rejected, never wrapped.
pub trait IntegerKey: Sized {
    fn from_i64(value: i64) -> Result<Self>;
}

impl IntegerKey for i64 {
    fn from_i64(value: i64) -> Result<Self> {
        Ok(value)
    }
}

macro_rules! impl_integer_key_checked {
    ($($t:ty),*) => {
        $(
            impl IntegerKey for $t {
                fn from_i64(value: i64) -> Result<Self> {
                    <$t>::try_from(value).map_err(|_| StrataError::InvalidKey(value.to_string()))
                }
            }
        )*
    };
}

impl_integer_key_checked!(i32, u32, u64);

impl<const N: usize> IntegerKey for GenericKey<N> {
    /// Big-endian with the sign bit flipped, so byte order equals numeric order.
    fn from_i64(value: i64) -> Result<Self> {
        if N < 8 {
            return Err(StrataError::InvalidKey(format!(
                "{value} does not fit in a {N}-byte key"
            )));
        }
        let bits = (value as u64) ^ (1 << 63);
        Ok(Self::from_bytes(&bits.to_be_bytes()))
    }
}

/// Largest leaf that fits in a page for the given key and value types.
pub fn leaf_max_size<K: FixedSizeCodec, V: FixedSizeCodec>() -> usize {
    (PAGE_SIZE - NODE_HEADER_SIZE) / (K::ENCODED_SIZE + V::ENCODED_SIZE)
}

/// Largest internal node that fits in a page for the given key type.
pub fn internal_max_size<K: FixedSizeCodec>() -> usize {
    (PAGE_SIZE - NODE_HEADER_SIZE) / (K::ENCODED_SIZE + PageId::ENCODED_SIZE)
}

/// Smallest legal entry count of a non-root node.
pub fn min_size(max_size: usize) -> usize {
    max_size.div_ceil(2)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Raw page type tag of a node page.
pub fn page_type_tag(data: &[u8]) -> u8 {
    data[PAGE_TYPE_OFFSET]
}

/// Number of entries stored in a node page.
pub fn node_size(data: &[u8]) -> usize {
    read_u32(data, SIZE_OFFSET) as usize
}

pub fn next_page_id(data: &[u8]) -> PageId {
    PageId::new(read_u32(data, NEXT_PAGE_OFFSET))
}

/// Rewrites a node's parent pointer without decoding the node.
pub fn set_parent_page_id(data: &mut [u8], parent: PageId) {
    write_u32(data, PARENT_PAGE_OFFSET, parent.as_u32());
}

/// Rewrites a leaf's previous-leaf pointer without decoding the leaf.
pub fn set_prev_page_id(data: &mut [u8], prev: PageId) {
    write_u32(data, PREV_PAGE_OFFSET, prev.as_u32());
}

/// Decodes the `index`-th entry of a node page.
pub fn entry_at<K: FixedSizeCodec, X: FixedSizeCodec>(data: &[u8], index: usize) -> (K, X) {
    let offset = NODE_HEADER_SIZE + index * (K::ENCODED_SIZE + X::ENCODED_SIZE);
    let key = K::decode(&data[offset..]);
    let value = X::decode(&data[offset + K::ENCODED_SIZE..]);
    (key, value)
}

/// In-memory image of a B+Tree node.
///
/// Leaves carry `(key, value)` entries and sibling links; internal nodes carry
/// `(key, child)` entries where each key is the largest key in that child's
/// subtree. Nodes are decoded out of a page, edited, and encoded back.
#[derive(Debug, Clone)]
pub struct BPlusTreeNode<K, X> {
    pub page_type: PageType,
    pub page_id: PageId,
    pub parent_page_id: PageId,
    pub max_size: usize,
    pub next_page_id: PageId,
    pub prev_page_id: PageId,
    pub entries: Vec<(K, X)>,
}

pub type LeafNode<K, V> = BPlusTreeNode<K, V>;
pub type InternalNode<K> = BPlusTreeNode<K, PageId>;

impl<K: FixedSizeCodec, X: FixedSizeCodec> BPlusTreeNode<K, X> {
    pub fn new(page_type: PageType, page_id: PageId, parent_page_id: PageId, max_size: usize) -> Self {
        Self {
            page_type,
            page_id,
            parent_page_id,
            max_size,
            next_page_id: INVALID_PAGE_ID,
            prev_page_id: INVALID_PAGE_ID,
            entries: Vec::with_capacity(max_size + 1),
        }
    }

    /// Entries a page can hold for this node's key and payload widths.
    pub fn capacity() -> usize {
        (PAGE_SIZE - NODE_HEADER_SIZE) / (K::ENCODED_SIZE + X::ENCODED_SIZE)
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type == PageType::Leaf
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn min_size(&self) -> usize {
        min_size(self.max_size)
    }

    /// Largest key in the node, which is also its routing key in the parent.
    pub fn max_key(&self) -> Option<&K> {
        self.entries.last().map(|(key, _)| key)
    }

    /// Decodes a node, checking that the page carries the expected tag.
    pub fn decode(data: &[u8], expected: PageType) -> Result<Self> {
        let page_id = PageId::new(read_u32(data, PAGE_ID_OFFSET));
        let tag = page_type_tag(data);
        let page_type = PageType::from_tag(tag)
            .filter(|t| *t == expected)
            .ok_or(StrataError::InvalidPageType { page_id, tag })?;

        let size = node_size(data);
        if size > Self::capacity() {
            return Err(StrataError::IndexCorrupted(format!(
                "{page_id} claims {size} entries, a page holds at most {}",
                Self::capacity()
            )));
        }

        let entries = (0..size).map(|i| entry_at(data, i)).collect();

        Ok(Self {
            page_type,
            page_id,
            parent_page_id: PageId::new(read_u32(data, PARENT_PAGE_OFFSET)),
            max_size: read_u32(data, MAX_SIZE_OFFSET) as usize,
            next_page_id: PageId::new(read_u32(data, NEXT_PAGE_OFFSET)),
            prev_page_id: PageId::new(read_u32(data, PREV_PAGE_OFFSET)),
            entries,
        })
    }

    /// Writes the node into a page buffer.
    ///
    /// # Panics
    /// If the entries don't fit in a page.
    pub fn encode(&self, data: &mut [u8]) {
        assert!(
            self.entries.len() <= Self::capacity(),
            "{} entries overflow {}",
            self.entries.len(),
            self.page_id
        );

        data[PAGE_TYPE_OFFSET] = self.page_type as u8;
        write_u32(data, SIZE_OFFSET, self.entries.len() as u32);
        write_u32(data, MAX_SIZE_OFFSET, self.max_size as u32);
        write_u32(data, PARENT_PAGE_OFFSET, self.parent_page_id.as_u32());
        write_u32(data, PAGE_ID_OFFSET, self.page_id.as_u32());
        write_u32(data, NEXT_PAGE_OFFSET, self.next_page_id.as_u32());
        write_u32(data, PREV_PAGE_OFFSET, self.prev_page_id.as_u32());

        let width = K::ENCODED_SIZE + X::ENCODED_SIZE;
        for (i, (key, payload)) in self.entries.iter().enumerate() {
            let offset = NODE_HEADER_SIZE + i * width;
            key.encode(&mut data[offset..]);
            payload.encode(&mut data[offset + K::ENCODED_SIZE..]);
        }
    }

    /// Position of the entry whose payload is `payload`.
    pub fn position_of(&self, payload: &X) -> Option<usize>
    where
        X: PartialEq,
    {
        self.entries.iter().position(|(_, x)| x == payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_node_encode_decode() {
        let mut leaf: LeafNode<i64, RecordId> =
            BPlusTreeNode::new(PageType::Leaf, PageId::new(3), PageId::new(1), 4);
        leaf.next_page_id = PageId::new(4);
        leaf.entries.push((-5, RecordId::from_i64(-5)));
        leaf.entries.push((9, RecordId::from_i64(9)));

        let mut page = [0u8; PAGE_SIZE];
        leaf.encode(&mut page);

        assert_eq!(page_type_tag(&page), PageType::Leaf as u8);
        assert_eq!(node_size(&page), 2);
        assert_eq!(next_page_id(&page), PageId::new(4));

        let decoded: LeafNode<i64, RecordId> = BPlusTreeNode::decode(&page, PageType::Leaf).unwrap();
        assert_eq!(decoded.page_id, PageId::new(3));
        assert_eq!(decoded.parent_page_id, PageId::new(1));
        assert_eq!(decoded.prev_page_id, INVALID_PAGE_ID);
        assert_eq!(decoded.max_size, 4);
        assert_eq!(decoded.entries, leaf.entries);
        assert_eq!(entry_at::<i64, RecordId>(&page, 1), (9, RecordId::from_i64(9)));
    }

    #[test]
    fn test_decode_rejects_wrong_page_type() {
        let mut internal: InternalNode<u32> =
            BPlusTreeNode::new(PageType::Internal, PageId::new(2), INVALID_PAGE_ID, 3);
        internal.entries.push((10, PageId::new(5)));

        let mut page = [0u8; PAGE_SIZE];
        internal.encode(&mut page);

        let result = BPlusTreeNode::<u32, u32>::decode(&page, PageType::Leaf);
        assert!(matches!(
            result,
            Err(StrataError::InvalidPageType { tag: 2, .. })
        ));

        let zeroed = [0u8; PAGE_SIZE];
        assert!(BPlusTreeNode::<u32, PageId>::decode(&zeroed, PageType::Internal).is_err());
    }

    #[test]
    fn test_in_place_header_updates() {
        let leaf: LeafNode<u32, u32> =
            BPlusTreeNode::new(PageType::Leaf, PageId::new(7), INVALID_PAGE_ID, 8);
        let mut page = [0u8; PAGE_SIZE];
        leaf.encode(&mut page);

        set_parent_page_id(&mut page, PageId::new(2));
        set_prev_page_id(&mut page, PageId::new(6));

        let decoded: LeafNode<u32, u32> = BPlusTreeNode::decode(&page, PageType::Leaf).unwrap();
        assert_eq!(decoded.parent_page_id, PageId::new(2));
        assert_eq!(decoded.prev_page_id, PageId::new(6));
    }

    #[test]
    fn test_generic_key_integer_order() {
        let keys: Vec<GenericKey<8>> = [-300i64, -1, 0, 1, 42, i64::MAX]
            .iter()
            .map(|v| GenericKey::from_i64(*v).unwrap())
            .collect();
        assert!(keys.windows(2).all(|w| w[0].data < w[1].data));
        assert_eq!(format!("{:?}", keys[0]), "-300");
    }

    #[test]
    fn test_integer_keys_reject_out_of_range() {
        assert_eq!(i32::from_i64(-7).unwrap(), -7);
        assert_eq!(u32::from_i64(u32::MAX as i64).unwrap(), u32::MAX);
        assert!(matches!(
            i32::from_i64(4_294_967_297),
            Err(StrataError::InvalidKey(token)) if token == "4294967297"
        ));
        assert!(matches!(u32::from_i64(-1), Err(StrataError::InvalidKey(_))));
        assert!(matches!(u64::from_i64(i64::MIN), Err(StrataError::InvalidKey(_))));
        assert!(matches!(GenericKey::<4>::from_i64(1), Err(StrataError::InvalidKey(_))));
    }

    #[test]
    fn test_default_max_sizes_fit_a_page() {
        let leaf_max = leaf_max_size::<i64, RecordId>();
        assert_eq!(leaf_max, (PAGE_SIZE - NODE_HEADER_SIZE) / 16);
        assert_eq!(internal_max_size::<i64>(), (PAGE_SIZE - NODE_HEADER_SIZE) / 12);
        assert_eq!(min_size(5), 3);
        assert_eq!(min_size(4), 2);
    }
}
