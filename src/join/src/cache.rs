// Copyright 2024 Basalt Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The process-wide hash table recycler. Completed tables are shared
//! across queries; eviction is LRU by total hashtable bytes.

use std::sync::{Arc, OnceLock};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use basalt_plan::JoinType;

use crate::hash_table::PerfectHashTable;

/// Primary cache key: the DAG hash of the plan that produced the join,
/// plus the inner column identity and join shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashTableCacheKey {
    pub dag_hash: u64,
    pub inner_table_id: i32,
    pub inner_column_id: i32,
    pub join_type: JoinType,
    /// Chunk identity of the inner fragments the table was built from.
    pub chunk_keys: Vec<i64>,
    /// Fallback discriminator for entry points with no DAG available.
    pub alternative_key: Option<u64>,
}

struct CacheEntry {
    table: Arc<PerfectHashTable>,
    bytes: usize,
    touched: u64,
}

/// LRU recycler, keyed by [`HashTableCacheKey`] and bounded by a byte
/// budget.
pub struct HashtableRecycler {
    inner: Mutex<RecyclerInner>,
    max_bytes: usize,
}

#[derive(Default)]
struct RecyclerInner {
    entries: HashMap<HashTableCacheKey, CacheEntry>,
    total_bytes: usize,
    clock: u64,
}

static GLOBAL_RECYCLER: OnceLock<HashtableRecycler> = OnceLock::new();

impl HashtableRecycler {
    pub fn new(max_bytes: usize) -> HashtableRecycler {
        HashtableRecycler {
            inner: Mutex::new(RecyclerInner::default()),
            max_bytes,
        }
    }

    /// The process-wide instance. The byte budget of the first caller
    /// wins; the driver initializes it at startup.
    pub fn global(max_bytes: usize) -> &'static HashtableRecycler {
        GLOBAL_RECYCLER.get_or_init(|| HashtableRecycler::new(max_bytes))
    }

    pub fn get(&self, key: &HashTableCacheKey) -> Option<Arc<PerfectHashTable>> {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.touched = clock;
                debug!(dag_hash = key.dag_hash, "hash table cache hit");
                Some(entry.table.clone())
            }
            None => None,
        }
    }

    pub fn put(&self, key: HashTableCacheKey, table: Arc<PerfectHashTable>) {
        let bytes = table.byte_size();
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        if let Some(old) = inner.entries.insert(
            key,
            CacheEntry {
                table,
                bytes,
                touched: clock,
            },
        ) {
            inner.total_bytes -= old.bytes;
        }
        inner.total_bytes += bytes;
        while inner.total_bytes > self.max_bytes && inner.entries.len() > 1 {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.touched)
                .map(|(k, _)| k.clone())
                .expect("non-empty cache");
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.total_bytes -= evicted.bytes;
                debug!(bytes = evicted.bytes, "evicted hash table from recycler");
            }
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(dag_hash: u64) -> HashTableCacheKey {
        HashTableCacheKey {
            dag_hash,
            inner_table_id: 1,
            inner_column_id: 1,
            join_type: JoinType::Inner,
            chunk_keys: vec![0],
            alternative_key: None,
        }
    }

    fn table(entries: usize) -> Arc<PerfectHashTable> {
        Arc::new(PerfectHashTable::new_one_to_one(entries))
    }

    #[test]
    fn identical_joins_share_the_buffer() {
        let recycler = HashtableRecycler::new(1 << 20);
        let t = table(16);
        recycler.put(key(42), t.clone());
        let hit = recycler.get(&key(42)).expect("cache hit");
        assert!(Arc::ptr_eq(&hit, &t));
        assert!(recycler.get(&key(43)).is_none());
    }

    #[test]
    fn eviction_is_lru_by_bytes() {
        // budget fits two of the three tables
        let recycler = HashtableRecycler::new(2 * 16 * 4);
        recycler.put(key(1), table(16));
        recycler.put(key(2), table(16));
        // touch key 1 so key 2 is the eviction candidate
        recycler.get(&key(1));
        recycler.put(key(3), table(16));
        assert!(recycler.get(&key(1)).is_some());
        assert!(recycler.get(&key(2)).is_none());
        assert!(recycler.get(&key(3)).is_some());
        assert!(recycler.total_bytes() <= 2 * 16 * 4);
    }
}
