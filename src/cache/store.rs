//! Bounded in-memory response cache
//!
//! A flat map with FIFO eviction: entries leave in insertion order, never
//! reordered by access. Updating an existing key keeps its position.
//! Expired entries are dropped lazily when a lookup touches them.

use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::humanize::ByteSize;

use super::entry::CacheEntry;

struct State {
    map: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

pub struct BoundedCache {
    state: Mutex<State>,
    capacity: usize,
    max_entry_size: ByteSize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BoundedCache {
    pub fn new(capacity: usize, max_entry_size: ByteSize) -> Self {
        BoundedCache {
            state: Mutex::new(State {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
            max_entry_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lookup(&self, key: &str, now: i64) -> Option<CacheEntry> {
        let mut state = self.lock();
        let expired = match state.map.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if expired {
            state.map.remove(key);
            state.order.retain(|k| k != key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Expired cache entry dropped");
            return None;
        }
        let entry = state.map.get_mut(key)?;
        entry.hit_count += 1;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.clone())
    }

    /// Stores an entry, evicting the single oldest one when full. Returns
    /// false when the entry is too large to hold at all.
    pub fn store(&self, entry: CacheEntry) -> bool {
        if self.capacity == 0 || entry.content.len() as u64 > self.max_entry_size.as_u64() {
            return false;
        }
        let mut state = self.lock();
        if !state.map.contains_key(&entry.key) {
            state.order.push_back(entry.key.clone());
        }
        state.map.insert(entry.key.clone(), entry);
        while state.order.len() > self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.map.remove(&oldest);
                debug!(key = %oldest, "Evicted oldest cache entry");
            }
        }
        true
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let mut state = self.lock();
        if state.map.remove(key).is_some() {
            state.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Removes every entry whose key matches, returning how many went
    pub fn invalidate_matching(&self, pattern: &Regex) -> usize {
        let mut state = self.lock();
        let doomed: Vec<String> = state
            .map
            .keys()
            .filter(|key| pattern.is_match(key))
            .cloned()
            .collect();
        for key in &doomed {
            state.map.remove(key);
        }
        state.order.retain(|k| !doomed.contains(k));
        doomed.len()
    }

    /// All live entries in insertion order
    pub fn entries(&self) -> Vec<CacheEntry> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter_map(|key| state.map.get(key))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        }
    }
}
