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

//! String dictionary capability. Dictionaries are externally owned and do
//! their own locking; the engine addresses them by dictionary id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub use crate::types::INVALID_STR_ID;

pub trait Dictionary: Send + Sync {
    fn dict_id(&self) -> i32;

    /// Returns the id of `s`, adding it if absent.
    fn get_or_add(&self, s: &str) -> i32;

    fn get_or_add_bulk(&self, strings: &[&str], out_ids: &mut [i32]) {
        for (s, out) in strings.iter().zip(out_ids.iter_mut()) {
            *out = self.get_or_add(s);
        }
    }

    /// Returns the id of `s` or [`INVALID_STR_ID`] if it was never added.
    fn id_of_string(&self, s: &str) -> i32;

    fn string(&self, id: i32) -> Option<String>;

    fn entry_count(&self) -> usize;

    /// For every id of `self`, the id of the same string in `outer`, or
    /// [`INVALID_STR_ID`] when `outer` does not contain it.
    fn build_translation_map(&self, outer: &dyn Dictionary) -> Vec<i32> {
        (0..self.entry_count() as i32)
            .map(|id| match self.string(id) {
                Some(s) => outer.id_of_string(&s),
                None => INVALID_STR_ID,
            })
            .collect()
    }
}

pub type DictionaryRef = Arc<dyn Dictionary>;

/// Lookup of dictionaries by id, provided by the driver.
pub trait DictionaryProvider: Send + Sync {
    fn dictionary(&self, dict_id: i32) -> Option<DictionaryRef>;
}

pub type DictionaryProviderRef = Arc<dyn DictionaryProvider>;

/// In-memory dictionary used by tests.
pub struct MemoryDictionary {
    dict_id: i32,
    inner: RwLock<MemoryDictionaryInner>,
}

#[derive(Default)]
struct MemoryDictionaryInner {
    strings: Vec<String>,
    ids: HashMap<String, i32>,
}

impl MemoryDictionary {
    pub fn new(dict_id: i32) -> Self {
        MemoryDictionary {
            dict_id,
            inner: RwLock::new(MemoryDictionaryInner::default()),
        }
    }
}

impl Dictionary for MemoryDictionary {
    fn dict_id(&self) -> i32 {
        self.dict_id
    }

    fn get_or_add(&self, s: &str) -> i32 {
        let mut inner = self.inner.write();
        if let Some(id) = inner.ids.get(s) {
            return *id;
        }
        let id = inner.strings.len() as i32;
        inner.strings.push(s.to_owned());
        inner.ids.insert(s.to_owned(), id);
        id
    }

    fn id_of_string(&self, s: &str) -> i32 {
        self.inner.read().ids.get(s).copied().unwrap_or(INVALID_STR_ID)
    }

    fn string(&self, id: i32) -> Option<String> {
        self.inner.read().strings.get(id as usize).cloned()
    }

    fn entry_count(&self) -> usize {
        self.inner.read().strings.len()
    }
}

/// Simple provider over a fixed dictionary set, used by tests.
#[derive(Default)]
pub struct MemoryDictionaryProvider {
    dicts: RwLock<HashMap<i32, DictionaryRef>>,
}

impl MemoryDictionaryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, dict: DictionaryRef) {
        self.dicts.write().insert(dict.dict_id(), dict);
    }
}

impl DictionaryProvider for MemoryDictionaryProvider {
    fn dictionary(&self, dict_id: i32) -> Option<DictionaryRef> {
        self.dicts.read().get(&dict_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_map() {
        let inner = MemoryDictionary::new(1);
        let outer = MemoryDictionary::new(2);
        for s in ["a", "b", "c"] {
            inner.get_or_add(s);
        }
        outer.get_or_add("c");
        outer.get_or_add("a");
        let map = inner.build_translation_map(&outer);
        assert_eq!(map, vec![1, INVALID_STR_ID, 0]);
    }
}
