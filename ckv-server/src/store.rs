//! In-memory object store: bucket -> key -> value.
//!
//! Ordered maps keep listings deterministic, which the tests rely on.

use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct Store {
    buckets: Mutex<BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket: &[u8], key: &[u8]) -> Option<Vec<u8>> {
        let buckets = self.buckets.lock().expect("store mutex poisoned");
        buckets.get(bucket).and_then(|keys| keys.get(key)).cloned()
    }

    pub fn put(&self, bucket: &[u8], key: &[u8], value: Vec<u8>) {
        let mut buckets = self.buckets.lock().expect("store mutex poisoned");
        buckets
            .entry(bucket.to_vec())
            .or_default()
            .insert(key.to_vec(), value);
    }

    /// Removes a key; empty buckets disappear from listings.
    pub fn delete(&self, bucket: &[u8], key: &[u8]) -> bool {
        let mut buckets = self.buckets.lock().expect("store mutex poisoned");
        let removed = match buckets.get_mut(bucket) {
            Some(keys) => keys.remove(key).is_some(),
            None => return false,
        };
        if buckets.get(bucket).map_or(false, BTreeMap::is_empty) {
            buckets.remove(bucket);
        }
        removed
    }

    pub fn buckets(&self) -> Vec<Vec<u8>> {
        let buckets = self.buckets.lock().expect("store mutex poisoned");
        buckets.keys().cloned().collect()
    }

    pub fn keys(&self, bucket: &[u8]) -> Vec<Vec<u8>> {
        let buckets = self.buckets.lock().expect("store mutex poisoned");
        buckets
            .get(bucket)
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default()
    }
}
