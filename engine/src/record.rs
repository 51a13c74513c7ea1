//! Keys and records stored in the index.

use std::fmt::Debug;

/// A key the index can order and feed to an approximator.
///
/// `feature` is a lossy projection onto the approximator's input space.
/// Distinct keys may collapse to the same feature; the index stays correct
/// because every lookup ends in an exact key comparison.
pub trait IndexKey: Ord + Copy + Debug + Send + Sync + 'static {
    fn feature(&self) -> f32;
}

macro_rules! impl_index_key {
    ($($t:ty),* $(,)?) => {
        $(
            impl IndexKey for $t {
                #[inline]
                fn feature(&self) -> f32 {
                    *self as f32
                }
            }
        )*
    };
}

impl_index_key!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

/// An immutable (key, value) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Record<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    pub fn into_pair(self) -> (K, V) {
        (self.key, self.value)
    }
}

impl<K, V> From<(K, V)> for Record<K, V> {
    fn from((key, value): (K, V)) -> Self {
        Self { key, value }
    }
}

/// Merge `incoming` into an already sorted `snapshot`, returning a new sorted
/// snapshot.
///
/// Keys are kept unique with last-write-wins: a later record (snapshot before
/// incoming, and incoming in insertion order) replaces any earlier one with
/// the same key.
pub fn merge_sorted<K: IndexKey, V: Clone>(
    snapshot: &[Record<K, V>],
    incoming: &[Record<K, V>],
) -> Vec<Record<K, V>> {
    let mut merged: Vec<Record<K, V>> = Vec::with_capacity(snapshot.len() + incoming.len());
    merged.extend_from_slice(snapshot);
    merged.extend_from_slice(incoming);

    // Stable: equal keys keep their relative order, so the last one is newest
    merged.sort_by_key(|r| r.key);

    let mut deduped: Vec<Record<K, V>> = Vec::with_capacity(merged.len());
    for record in merged {
        match deduped.last_mut() {
            Some(last) if last.key == record.key => *last = record,
            _ => deduped.push(record),
        }
    }
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_projection() {
        assert_eq!(42u64.feature(), 42.0);
        assert_eq!((-7i32).feature(), -7.0);
    }

    #[test]
    fn test_merge_sorted_orders_and_deduplicates() {
        let snapshot = vec![Record::new(1u64, "a"), Record::new(5, "b"), Record::new(9, "c")];
        let incoming = vec![Record::new(7u64, "d"), Record::new(5, "e"), Record::new(0, "f"), Record::new(7, "g")];

        let merged = merge_sorted(&snapshot, &incoming);
        let pairs: Vec<_> = merged.into_iter().map(Record::into_pair).collect();
        assert_eq!(pairs, vec![(0, "f"), (1, "a"), (5, "e"), (7, "g"), (9, "c")]);
    }

    #[test]
    fn test_merge_sorted_empty_inputs() {
        let empty: Vec<Record<u64, u64>> = Vec::new();
        assert!(merge_sorted(&empty, &empty).is_empty());
    }
}
