use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use alloy_primitives::B256;
use tracing::debug;

use crate::types::HeaderRef;

/// Read access to headers known to be valid or available.
pub trait HeaderReader: Send + Sync {
    fn header(&self, hash: B256, number: u64) -> Option<HeaderRef>;
}

/// A header store that can be appended to. Implementations must be safe to
/// share between tasks.
pub trait HeaderCache: HeaderReader {
    fn insert(&self, header: HeaderRef);
}

/// In-memory header cache keyed by number, then hash (siblings at the same
/// height are kept side by side).
///
/// With a capacity set, the lowest block numbers are evicted first once the
/// cache grows past it.
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: RwLock<Buckets>,
    capacity: Option<usize>,
}

#[derive(Debug, Default)]
struct Buckets {
    by_number: BTreeMap<u64, HashMap<B256, HeaderRef>>,
    len: usize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::default(),
            capacity: Some(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HeaderReader for MemoryCache {
    fn header(&self, hash: B256, number: u64) -> Option<HeaderRef> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_number.get(&number)?.get(&hash).cloned()
    }
}

impl HeaderCache for MemoryCache {
    fn insert(&self, header: HeaderRef) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let bucket = inner.by_number.entry(header.number()).or_default();
        if bucket.insert(header.hash(), header).is_none() {
            inner.len += 1;
        }

        let Some(capacity) = self.capacity else {
            return;
        };
        while inner.len > capacity {
            let Some((number, evicted)) = inner.by_number.pop_first() else {
                break;
            };
            inner.len -= evicted.len();
            debug!(number, count = evicted.len(), "header cache evicted lowest height");
        }
    }
}
