use crate::record::{IndexKey, Record};

/// Append log for records inserted since the last rebuild.
///
/// Unordered; lookups scan from the most recent record backwards so a
/// re-inserted key shadows its older value.
#[derive(Debug, Clone)]
pub struct OverflowBuffer<K, V> {
    records: Vec<Record<K, V>>,
    /// Rebuild threshold: the buffer is over capacity once `len > capacity`.
    capacity: usize,
}

impl<K: IndexKey, V> OverflowBuffer<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            capacity,
        }
    }

    pub fn push(&mut self, key: K, value: V) {
        self.records.push(Record::new(key, value));
    }

    /// Newest record for `key`, if any.
    pub fn get(&self, key: K) -> Option<&Record<K, V>> {
        self.records.iter().rev().find(|r| r.key == key)
    }

    /// True once the buffer holds more records than its capacity.
    pub fn exceeds_capacity(&self) -> bool {
        self.records.len() > self.capacity
    }

    pub fn records(&self) -> &[Record<K, V>] {
        &self.records
    }

    /// Remove and return every record, oldest first.
    pub fn drain_all(&mut self) -> Vec<Record<K, V>> {
        std::mem::take(&mut self.records)
    }

    /// Put back records taken by `drain_all`, ahead of anything appended
    /// since, so insertion order is preserved.
    pub fn restore(&mut self, mut older: Vec<Record<K, V>>) {
        older.append(&mut self.records);
        self.records = older;
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fraction of the rebuild threshold in use.
    pub fn utilization(&self) -> f32 {
        if self.capacity == 0 {
            return if self.records.is_empty() { 0.0 } else { 1.0 };
        }
        self.records.len() as f32 / self.capacity as f32
    }
}
