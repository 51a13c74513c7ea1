use std::collections::BTreeMap;

/// Exact key → value lookup used where a learned model cannot be trusted.
pub trait OrderedIndex<K, V> {
    /// Insert a mapping, replacing any previous value for `key`.
    fn insert(&mut self, key: K, value: V);
    /// Lookup a key.
    fn get(&self, key: &K) -> Option<&V>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory BTreeMap based index.
#[derive(Debug, Clone)]
pub struct BTreeIndex<K, V> {
    map: BTreeMap<K, V>,
}

impl<K: Ord, V> Default for BTreeIndex<K, V> {
    fn default() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }
}

impl<K: Ord, V> OrderedIndex<K, V> for BTreeIndex<K, V> {
    fn insert(&mut self, key: K, value: V) {
        self.map.insert(key, value);
    }

    fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

impl<K: Ord, V> BTreeIndex<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-load from an iterator of pairs.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut index = Self::new();
        for (key, value) in pairs {
            index.insert(key, value);
        }
        index
    }
}
