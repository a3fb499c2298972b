use std::hash::{BuildHasher, BuildHasherDefault, Hash, Hasher};

use parking_lot::RwLock;

/// Hasher that passes integer keys through unchanged.
///
/// Page ids and frame ids are dense integers, so their low bits already spread
/// evenly across the directory; hashing them again buys nothing and makes the
/// directory layout hard to reason about. Only a lone leading integer write
/// passes through; everything after it, and any byte input, is folded with
/// FNV-1a.
#[derive(Debug, Clone, Copy)]
pub struct IdentityHasher {
    state: u64,
    fresh: bool,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl IdentityHasher {
    fn write_int(&mut self, i: u64) {
        if self.fresh {
            self.state = i;
            self.fresh = false;
        } else {
            self.write(&i.to_le_bytes());
        }
    }
}

impl Default for IdentityHasher {
    fn default() -> Self {
        Self {
            state: FNV_OFFSET,
            fresh: true,
        }
    }
}

impl Hasher for IdentityHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        self.fresh = false;
        for byte in bytes {
            self.state ^= *byte as u64;
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    fn write_u8(&mut self, i: u8) {
        self.write_int(i as u64);
    }

    fn write_u16(&mut self, i: u16) {
        self.write_int(i as u64);
    }

    fn write_u32(&mut self, i: u32) {
        self.write_int(i as u64);
    }

    fn write_u64(&mut self, i: u64) {
        self.write_int(i);
    }

    fn write_usize(&mut self, i: usize) {
        self.write_int(i as u64);
    }

    fn write_i32(&mut self, i: i32) {
        self.write_int(i as u32 as u64);
    }

    fn write_i64(&mut self, i: i64) {
        self.write_int(i as u64);
    }
}

pub type IdentityBuildHasher = BuildHasherDefault<IdentityHasher>;

/// A bucket of at most `capacity` key/value pairs sharing `depth` low hash bits.
#[derive(Debug)]
struct Bucket<K, V> {
    depth: u32,
    items: Vec<(K, V)>,
}

impl<K: Eq, V> Bucket<K, V> {
    fn new(depth: u32, capacity: usize) -> Self {
        Self {
            depth,
            items: Vec::with_capacity(capacity),
        }
    }

    fn position(&self, key: &K) -> Option<usize> {
        self.items.iter().position(|(k, _)| k == key)
    }
}

#[derive(Debug)]
struct Directory<K, V> {
    global_depth: u32,
    /// Directory slot -> index into `buckets`. Several slots may share a bucket.
    slots: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// Extendible hash table.
///
/// The directory holds `2^global_depth` slots, each pointing at a bucket. A
/// bucket with local depth `d` is shared by every slot whose low `d` bits
/// match. When an insert hits a full bucket the bucket splits on its next
/// hash bit, doubling the directory first if the bucket was already addressed
/// by all `global_depth` bits.
///
/// Lookups take a shared lock; inserts and removals take it exclusively.
pub struct ExtendibleHashTable<K, V, S = IdentityBuildHasher> {
    bucket_size: usize,
    hash_builder: S,
    directory: RwLock<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V, IdentityBuildHasher>
where
    K: Hash + Eq,
    V: Clone,
{
    /// Creates an empty table whose buckets hold `bucket_size` entries each.
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, IdentityBuildHasher::default())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq,
    V: Clone,
    S: BuildHasher,
{
    pub fn with_hasher(bucket_size: usize, hash_builder: S) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            bucket_size,
            hash_builder,
            directory: RwLock::new(Directory {
                global_depth: 0,
                slots: vec![0],
                buckets: vec![Bucket::new(0, bucket_size)],
            }),
        }
    }

    fn hash(&self, key: &K) -> u64 {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn index_of(&self, key: &K, global_depth: u32) -> usize {
        let mask = (1u64 << global_depth) - 1;
        (self.hash(key) & mask) as usize
    }

    /// Looks up the value stored for `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let dir = self.directory.read();
        let bucket = &dir.buckets[dir.slots[self.index_of(key, dir.global_depth)]];
        bucket
            .position(key)
            .map(|pos| bucket.items[pos].1.clone())
    }

    /// Removes `key`, returning whether it was present. Buckets never merge.
    pub fn remove(&self, key: &K) -> bool {
        let mut dir = self.directory.write();
        let bucket_idx = dir.slots[self.index_of(key, dir.global_depth)];
        let bucket = &mut dir.buckets[bucket_idx];
        match bucket.position(key) {
            Some(pos) => {
                bucket.items.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Inserts or overwrites `key`, splitting buckets and growing the
    /// directory as many times as it takes to make room.
    pub fn insert(&self, key: K, value: V) {
        let mut dir = self.directory.write();

        loop {
            let bucket_idx = dir.slots[self.index_of(&key, dir.global_depth)];
            let bucket = &mut dir.buckets[bucket_idx];

            if let Some(pos) = bucket.position(&key) {
                bucket.items[pos].1 = value;
                return;
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                return;
            }

            self.split_bucket(&mut dir, bucket_idx);
        }
    }

    fn split_bucket(&self, dir: &mut Directory<K, V>, bucket_idx: usize) {
        let local_depth = dir.buckets[bucket_idx].depth;

        if local_depth == dir.global_depth {
            // Upper half mirrors the lower half slot for slot
            dir.slots.extend_from_within(..);
            dir.global_depth += 1;
            log::debug!(
                "page table directory grew to global depth {} ({} slots)",
                dir.global_depth,
                dir.slots.len()
            );
        }

        let split_bit = 1usize << local_depth;
        let sibling_idx = dir.buckets.len();
        dir.buckets.push(Bucket::new(local_depth + 1, self.bucket_size));
        dir.buckets[bucket_idx].depth = local_depth + 1;

        // Slot numbers are the low hash bits, so the slot number itself tells
        // which half of the split a slot addresses.
        for slot_no in 0..dir.slots.len() {
            if dir.slots[slot_no] == bucket_idx && slot_no & split_bit != 0 {
                dir.slots[slot_no] = sibling_idx;
            }
        }

        let items = std::mem::take(&mut dir.buckets[bucket_idx].items);
        for (key, value) in items {
            let target = if self.hash(&key) as usize & split_bit != 0 {
                sibling_idx
            } else {
                bucket_idx
            };
            dir.buckets[target].items.push((key, value));
        }
    }

    /// Number of hash bits used to address the directory.
    pub fn global_depth(&self) -> u32 {
        self.directory.read().global_depth
    }

    /// Local depth of the bucket referenced by directory slot `dir_index`.
    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let dir = self.directory.read();
        dir.buckets[dir.slots[dir_index]].depth
    }

    /// Number of distinct buckets.
    pub fn num_buckets(&self) -> usize {
        self.directory.read().buckets.len()
    }

    /// Number of entries in the bucket referenced by directory slot `dir_index`.
    pub fn bucket_len(&self, dir_index: usize) -> usize {
        let dir = self.directory.read();
        dir.buckets[dir.slots[dir_index]].items.len()
    }

    /// Whether two directory slots reference the same bucket.
    pub fn shares_bucket(&self, a: usize, b: usize) -> bool {
        let dir = self.directory.read();
        dir.slots[a] == dir.slots[b]
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.directory
            .read()
            .buckets
            .iter()
            .map(|b| b.items.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
