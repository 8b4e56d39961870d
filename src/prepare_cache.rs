use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::col::ColumnDefinition;

/// Outcome of a server-side PREPARE: the statement id and its metadata.
#[derive(Debug, Clone)]
pub struct PrepareResult {
    pub statement_id: u32,
    pub num_params: u16,
    pub columns: Arc<[ColumnDefinition]>,
}

/// A cached prepare, shared between the cache and live statement handles.
///
/// The reference count tracks live statement handles only; a count of zero
/// for an entry still in the cache means it is idle but reusable. Once an
/// entry has been evicted and its count reaches zero, exactly one
/// COM_STMT_CLOSE is dispatched for it.
#[derive(Debug)]
pub struct PrepareEntry {
    pub result: PrepareResult,
    ref_count: AtomicUsize,
    evicted: AtomicBool,
    closed: AtomicBool,
}

impl PrepareEntry {
    fn new(result: PrepareResult) -> Self {
        Self {
            result,
            ref_count: AtomicUsize::new(0),
            evicted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn statement_id(&self) -> u32 {
        self.result.statement_id
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    fn increment_use(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }
}

/// Result of a cache insert.
#[derive(Debug)]
pub struct CachePut {
    pub entry: Arc<PrepareEntry>,
    /// Statement id the caller prepared but lost to an existing entry;
    /// must be closed on the server.
    pub discard_id: Option<u32>,
    /// Statement id of an evicted idle entry; must be closed on the server.
    pub evict_close_id: Option<u32>,
}

/// Per-session LRU of server-prepared statements, keyed by SQL text.
///
/// Eviction over capacity drops the least recently used entry; an evicted
/// entry still referenced by statement handles is closed later, when the
/// last handle releases it.
#[derive(Debug, Default)]
pub struct PrepareCache {
    capacity: usize,
    entries: HashMap<String, Arc<PrepareEntry>>,
    order: Vec<String>,
}

impl PrepareCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, sql: &str) {
        if let Some(pos) = self.order.iter().position(|key| key == sql) {
            let key = self.order.remove(pos);
            self.order.push(key);
        }
    }

    /// Look up a cached prepare and take a handle reference on it.
    pub fn get(&mut self, sql: &str) -> Option<Arc<PrepareEntry>> {
        let entry = self.entries.get(sql)?.clone();
        entry.increment_use();
        self.touch(sql);
        Some(entry)
    }

    /// Insert a fresh prepare, taking a handle reference on the returned
    /// entry. When the SQL is already cached the existing entry wins and
    /// the caller's `result` is handed back for closing.
    pub fn put(&mut self, sql: &str, result: PrepareResult) -> CachePut {
        if self.capacity == 0 {
            // caching disabled: the entry is born evicted
            let entry = Arc::new(PrepareEntry::new(result));
            entry.evicted.store(true, Ordering::Release);
            entry.increment_use();
            return CachePut {
                entry,
                discard_id: None,
                evict_close_id: None,
            };
        }

        if let Some(existing) = self.entries.get(sql) {
            let entry = existing.clone();
            entry.increment_use();
            self.touch(sql);
            return CachePut {
                entry,
                discard_id: Some(result.statement_id),
                evict_close_id: None,
            };
        }

        let mut evict_close_id = None;
        if self.entries.len() >= self.capacity {
            let lru = self.order.remove(0);
            if let Some(evicted) = self.entries.remove(&lru) {
                evicted.evicted.store(true, Ordering::Release);
                if evicted.ref_count() == 0 && !evicted.closed.swap(true, Ordering::AcqRel) {
                    evict_close_id = Some(evicted.statement_id());
                }
            }
        }

        let entry = Arc::new(PrepareEntry::new(result));
        entry.increment_use();
        self.entries.insert(sql.to_string(), entry.clone());
        self.order.push(sql.to_string());

        CachePut {
            entry,
            discard_id: None,
            evict_close_id,
        }
    }

    /// Release one statement handle. Returns the statement id to close when
    /// this was the last handle of an evicted entry.
    pub fn decrement_use(&mut self, entry: &Arc<PrepareEntry>) -> Option<u32> {
        let previous = entry.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "ref count underflow");

        if previous == 1
            && entry.evicted.load(Ordering::Acquire)
            && !entry.closed.swap(true, Ordering::AcqRel)
        {
            Some(entry.statement_id())
        } else {
            None
        }
    }

    /// Destructive drain for connection teardown: every entry is evicted
    /// and the ids still requiring a server-side close are returned.
    pub fn drain(&mut self) -> Vec<u32> {
        self.order.clear();
        self.entries
            .drain()
            .filter_map(|(_, entry)| {
                entry.evicted.store(true, Ordering::Release);
                if entry.ref_count() == 0 && !entry.closed.swap(true, Ordering::AcqRel) {
                    Some(entry.statement_id())
                } else {
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "prepare_cache_test.rs"]
mod prepare_cache_test;
