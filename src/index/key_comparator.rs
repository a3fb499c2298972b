use std::cmp::Ordering;

use crate::storage::page::GenericKey;

/// Total order over index keys.
pub trait KeyComparator<K>: Send + Sync {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Orders keys by their `Ord` implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrdComparator;

impl<K: Ord> KeyComparator<K> for OrdComparator {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Orders generic keys by their raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl<const N: usize> KeyComparator<GenericKey<N>> for BytewiseComparator {
    fn compare(&self, a: &GenericKey<N>, b: &GenericKey<N>) -> Ordering {
        a.data.cmp(&b.data)
    }
}

impl<K, F> KeyComparator<K> for F
where
    F: Fn(&K, &K) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &K, b: &K) -> Ordering {
        self(a, b)
    }
}
