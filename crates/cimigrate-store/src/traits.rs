use cimigrate_error::Result;
use serde::{Deserialize, Serialize};

/// Page of `(key, value)` pairs returned by [`StoreSession::scan_page`].
pub type ScanPage = Vec<(Vec<u8>, Vec<u8>)>;

/// Whether a prefix scan should keep going after visiting an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop,
}

/// An ordered key-value store.
///
/// The store itself only hands out sessions. All reads and writes go through
/// a [`StoreSession`], and each thread that touches the store owns its own
/// session so per-session accounting is never shared.
pub trait KvStore: Send + Sync {
    /// The session type produced by this store.
    type Session: StoreSession;

    /// The name of this backend (e.g., "memory", "sqlite").
    fn name(&self) -> &'static str;

    /// Open an independent session over the same underlying data.
    fn open_session(&self) -> Result<Self::Session>;
}

/// A handle onto a [`KvStore`] with its own resource accounting.
///
/// Sessions are `Send` but not required to be `Sync`: a session belongs to
/// exactly one thread at a time.
pub trait StoreSession: Send {
    /// Read the value stored under `key`.
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite the value stored under `key`.
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Fetch up to `limit` entries whose keys start with `prefix`, in
    /// ascending key order, starting strictly after `after` when given.
    fn scan_page(&mut self, prefix: &[u8], after: Option<&[u8]>, limit: usize)
    -> Result<ScanPage>;

    /// Accounting snapshot for this session.
    fn metrics(&self) -> SessionMetrics;

    /// Visit every entry under `prefix` in ascending key order.
    ///
    /// Entries are materialized `page_size` at a time; no store lock or read
    /// transaction is held while `visit` runs, so `visit` may block on other
    /// threads that write through their own sessions.
    fn scan_prefix(
        &mut self,
        prefix: &[u8],
        page_size: usize,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<ScanControl>,
    ) -> Result<()> {
        let limit = page_size.max(1);
        let mut after: Option<Vec<u8>> = None;
        loop {
            let page = self.scan_page(prefix, after.as_deref(), limit)?;
            let exhausted = page.len() < limit;
            for (key, value) in &page {
                if visit(key, value)? == ScanControl::Stop {
                    return Ok(());
                }
            }
            if exhausted {
                return Ok(());
            }
            after = page.into_iter().next_back().map(|(key, _)| key);
        }
    }

    /// Count entries under `prefix`.
    fn count_prefix(&mut self, prefix: &[u8], page_size: usize) -> Result<u64> {
        let mut count = 0_u64;
        self.scan_prefix(prefix, page_size, &mut |_, _| {
            count += 1;
            Ok(ScanControl::Continue)
        })?;
        Ok(count)
    }
}

/// Per-session resource accounting.
///
/// Owned by one session and updated through `&mut self`; snapshots from
/// several sessions are combined with [`SessionMetrics::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub gets: u64,
    pub sets: u64,
    pub scanned: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl SessionMetrics {
    pub fn record_get(&mut self, value: Option<&[u8]>) {
        self.gets = self.gets.saturating_add(1);
        if let Some(value) = value {
            self.bytes_read = self.bytes_read.saturating_add(value.len() as u64);
        }
    }

    pub fn record_set(&mut self, key: &[u8], value: &[u8]) {
        self.sets = self.sets.saturating_add(1);
        self.bytes_written = self
            .bytes_written
            .saturating_add((key.len() + value.len()) as u64);
    }

    pub fn record_scan(&mut self, page: &[(Vec<u8>, Vec<u8>)]) {
        self.scanned = self.scanned.saturating_add(page.len() as u64);
        let bytes: usize = page.iter().map(|(k, v)| k.len() + v.len()).sum();
        self.bytes_read = self.bytes_read.saturating_add(bytes as u64);
    }

    /// Add another session's totals to this one.
    pub fn merge(&mut self, other: &Self) {
        self.gets = self.gets.saturating_add(other.gets);
        self.sets = self.sets.saturating_add(other.sets);
        self.scanned = self.scanned.saturating_add(other.scanned);
        self.bytes_read = self.bytes_read.saturating_add(other.bytes_read);
        self.bytes_written = self.bytes_written.saturating_add(other.bytes_written);
    }
}
