//! In-memory backend: one ordered map shared by every session.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use cimigrate_error::Result;
use parking_lot::RwLock;

use crate::keys::prefix_successor;
use crate::traits::{KvStore, ScanPage, SessionMetrics, StoreSession};

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

/// An in-memory ordered store for tests and dry runs over exported data.
///
/// Every session shares the same map. Scans copy one page out under the read
/// lock and release it before the caller sees the entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Entries>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `entries`.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        Self {
            inner: Arc::new(RwLock::new(entries.into_iter().collect())),
        }
    }

    /// Insert directly, bypassing session accounting.
    pub fn insert(&self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.write().insert(key, value);
    }

    /// Read directly, bypassing session accounting.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Copy of the full contents.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.inner.read().clone()
    }
}

impl KvStore for MemoryStore {
    type Session = MemorySession;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn open_session(&self) -> Result<Self::Session> {
        Ok(MemorySession {
            inner: Arc::clone(&self.inner),
            metrics: SessionMetrics::default(),
        })
    }
}

/// A session over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySession {
    inner: Arc<RwLock<Entries>>,
    metrics: SessionMetrics,
}

impl StoreSession for MemorySession {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self.inner.read().get(key).cloned();
        self.metrics.record_get(value.as_deref());
        Ok(value)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.write().insert(key.to_vec(), value.to_vec());
        self.metrics.record_set(key, value);
        Ok(())
    }

    fn scan_page(
        &mut self,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<ScanPage> {
        let lower = after.map_or_else(
            || Bound::Included(prefix.to_vec()),
            |key| Bound::Excluded(key.to_vec()),
        );
        let upper = prefix_successor(prefix).map_or(Bound::Unbounded, Bound::Excluded);
        let page: ScanPage = {
            let entries = self.inner.read();
            entries
                .range::<Vec<u8>, _>((lower, upper))
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        self.metrics.record_scan(&page);
        Ok(page)
    }

    fn metrics(&self) -> SessionMetrics {
        self.metrics
    }
}
