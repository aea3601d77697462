//! Per-file header cache.
//!
//! Ranged reads need the container header and metadata before they can
//! compute which packets to fetch. Both are kept here by file ID so repeated
//! range requests against the same file skip the header round-trip.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use super::container::{ContainerHeader, Metadata};

pub const HEADER_CACHE_SIZE: usize = 200;

#[derive(Debug, Clone)]
pub struct CachedHeader {
    pub header: ContainerHeader,
    pub metadata: Metadata,
    pub metadata_offset: u64,
}

pub struct HeaderCache {
    entries: Mutex<LruCache<String, CachedHeader>>,
}

impl HeaderCache {
    pub fn new() -> Self {
        Self::with_capacity(HEADER_CACHE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, file_id: &str) -> Option<CachedHeader> {
        self.entries.lock().get(file_id).cloned()
    }

    pub fn put(&self, file_id: &str, entry: CachedHeader) {
        self.entries.lock().put(file_id.to_string(), entry);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for HeaderCache {
    fn default() -> Self {
        Self::new()
    }
}
