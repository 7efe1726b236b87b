use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Weak;

use crate::surface::Surface;

/// Tag attached to each bitstream submission and echoed back with the
/// decoded picture.
pub type PictureTag = u32;

pub const DEFAULT_CAPACITY: usize = 128;

/// Fixed-capacity LRU from picture tag to destination surface.
///
/// Surfaces are held weakly: destroying a surface while its picture is still
/// in flight leaves a dead entry that lookups skip.
#[derive(Debug)]
pub struct RenderTargetCache<V = Weak<Surface>, K = PictureTag> {
    capacity: usize,
    entries: HashMap<K, V>,
    /// Least recently put at the front.
    order: VecDeque<K>,
}

impl<V, K: Copy + Eq + Hash> RenderTargetCache<V, K> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "render target cache capacity must be non-zero");
        RenderTargetCache {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Insert or replace, making `key` the most recently used entry.
    pub fn put(&mut self, key: K, value: V) {
        if self.entries.insert(key, value).is_some() {
            if let Some(pos) = self.order.iter().position(|k| *k == key) {
                self.order.remove(pos);
            }
        }
        self.order.push_back(key);

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    /// Look up without refreshing recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
