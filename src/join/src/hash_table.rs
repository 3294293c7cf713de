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

//! Perfect hash table layouts.
//!
//! The hash of a key is `(key - min) / bucket_size`; there is no collision
//! chaining. OneToOne keeps one `i32` row id per entry. OneToMany keeps
//! three contiguous `i32` subarrays: `offsets[N]`, `counts[N]` and
//! `payload[M]`, each component 4-byte aligned and addressed by byte
//! offsets off the single backing buffer.

use basalt_common::buffer::DeviceBuffer;

/// Slot value marking an empty OneToOne entry.
pub const INVALID_SLOT_VAL: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashTableLayout {
    OneToOne,
    OneToMany,
}

/// A materialized perfect hash table. The CPU buffer is the master copy;
/// GPU replicas are copied from it by the builder.
#[derive(Debug)]
pub struct PerfectHashTable {
    layout: HashTableLayout,
    entry_count: usize,
    inner_row_count: usize,
    buffer: Vec<i32>,
    /// Device replica, when the build targeted GPU memory.
    pub gpu_buffer: Option<DeviceBuffer>,
}

impl PerfectHashTable {
    pub fn new_one_to_one(entry_count: usize) -> PerfectHashTable {
        PerfectHashTable {
            layout: HashTableLayout::OneToOne,
            entry_count,
            inner_row_count: 0,
            buffer: vec![INVALID_SLOT_VAL; entry_count],
            gpu_buffer: None,
        }
    }

    pub fn new_one_to_many(entry_count: usize, inner_row_count: usize) -> PerfectHashTable {
        PerfectHashTable {
            layout: HashTableLayout::OneToMany,
            entry_count,
            inner_row_count,
            buffer: vec![0; 2 * entry_count + inner_row_count],
            gpu_buffer: None,
        }
    }

    pub fn layout(&self) -> HashTableLayout {
        self.layout
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn inner_row_count(&self) -> usize {
        self.inner_row_count
    }

    pub fn buffer(&self) -> &[i32] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [i32] {
        &mut self.buffer
    }

    /// Size in bytes of one OneToMany component; 0 for OneToOne.
    pub fn component_buffer_size(&self) -> usize {
        match self.layout {
            HashTableLayout::OneToOne => 0,
            HashTableLayout::OneToMany => self.entry_count * std::mem::size_of::<i32>(),
        }
    }

    pub fn offset_buffer_off(&self) -> usize {
        0
    }

    pub fn count_buffer_off(&self) -> usize {
        self.component_buffer_size()
    }

    pub fn payload_buffer_off(&self) -> usize {
        2 * self.component_buffer_size()
    }

    pub fn byte_size(&self) -> usize {
        self.buffer.len() * std::mem::size_of::<i32>()
    }

    /// The raw bytes of the CPU master copy, for device uploads.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_size());
        for v in &self.buffer {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn offsets(&self) -> &[i32] {
        debug_assert_eq!(self.layout, HashTableLayout::OneToMany);
        &self.buffer[..self.entry_count]
    }

    pub fn counts(&self) -> &[i32] {
        debug_assert_eq!(self.layout, HashTableLayout::OneToMany);
        &self.buffer[self.entry_count..2 * self.entry_count]
    }

    pub fn payload(&self) -> &[i32] {
        debug_assert_eq!(self.layout, HashTableLayout::OneToMany);
        &self.buffer[2 * self.entry_count..]
    }
}
