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

//! Perfect hash table construction.

use std::sync::Arc;

use tracing::{debug, warn};

use basalt_common::buffer::{BufferProvider, DeviceGuard, MemoryLevel};
use basalt_common::config::Config;
use basalt_common::dictionary::DictionaryRef;
use basalt_common::types::{TimeUnit, Type, TypeRef};
use basalt_plan::JoinType;

use crate::error::{JoinError, Result};
use crate::hash_table::{HashTableLayout, PerfectHashTable, INVALID_SLOT_VAL};
use crate::runtime::{
    fill_hash_join_buff_bucketized, fill_one_to_many_hash_table_bucketized,
    init_hash_join_buff, JoinColumn, JoinColumnTypeInfo,
};

/// Value range of the inner join key, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub min: i64,
    pub max: i64,
    pub has_nulls: bool,
}

/// Seconds per day; the bucket size for day-granularity date keys.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Per-type bucket size: date keys stored in seconds hash by day.
pub fn bucket_normalization(key_type: TypeRef) -> i64 {
    match key_type {
        Type::Date { unit, .. } if *unit == TimeUnit::Second => SECONDS_PER_DAY,
        _ => 1,
    }
}

/// Everything the builder needs to know about one equijoin.
pub struct HashTableBuildSpec<'a> {
    pub key_type: TypeRef,
    pub range: KeyRange,
    pub join_type: JoinType,
    pub is_bw_eq: bool,
    pub inner_col: JoinColumn<'a>,
    pub null_val: i64,
    /// Map from inner dictionary ids to the outer dictionary, when the two
    /// sides are encoded with different dictionaries.
    pub translation_map: Option<Vec<i32>>,
    pub memory_level: MemoryLevel,
    pub device_id: i32,
}

/// Builds a translation map when the join sides use different string
/// dictionaries. GPU builds skip translation and stay on CPU.
pub fn build_dictionary_translation_map(
    inner: &DictionaryRef,
    outer: &DictionaryRef,
) -> Option<Vec<i32>> {
    if inner.dict_id() == outer.dict_id() {
        return None;
    }
    Some(inner.build_translation_map(outer.as_ref()))
}

/// Entry count of the perfect hash, after bucketization and the bw-eq
/// extra slot.
pub fn hash_entry_count(range: KeyRange, is_bw_eq: bool, bucket_norm: i64) -> usize {
    let raw = (range.max - range.min + 1 + if is_bw_eq { 1 } else { 0 }).max(0) as u64;
    raw.div_ceil(bucket_norm as u64) as usize
}

/// The build decision tree: validate the entry count, try OneToOne, fall
/// back to OneToMany on collision, replicate to GPU when requested.
pub fn build_perfect_hash_table(
    spec: &HashTableBuildSpec<'_>,
    config: &Config,
    buffer_provider: Option<&dyn BufferProvider>,
) -> Result<Arc<PerfectHashTable>> {
    let bucket_norm = bucket_normalization(spec.key_type);
    let entry_count = hash_entry_count(spec.range, spec.is_bw_eq, bucket_norm);
    let max_entries = match spec.memory_level {
        // No more than 2GB contiguous on GPU and each entry is 4 bytes.
        MemoryLevel::Gpu => i32::MAX as usize / std::mem::size_of::<i32>(),
        MemoryLevel::Cpu => i32::MAX as usize,
    };
    if entry_count == 0 || entry_count > max_entries {
        return Err(JoinError::TooManyHashEntries);
    }
    if entry_count > config.exec.join.huge_join_hash_threshold
        && spec.inner_col.num_elems * 100 < config.exec.join.huge_join_hash_min_load * entry_count
    {
        return Err(JoinError::TooManyHashEntries);
    }
    if spec.is_bw_eq && spec.range.max == i64::MAX {
        return Err(JoinError::UntranslatableNull);
    }
    if spec.translation_map.is_some() && spec.memory_level == MemoryLevel::Gpu {
        warn!("cross-dictionary translation keeps the hash join on CPU");
        return Err(JoinError::NotSupported(
            "dictionary translation on GPU".into(),
        ));
    }

    let type_info = JoinColumnTypeInfo {
        min_val: spec.range.min,
        max_val: spec.range.max,
        null_val: spec.null_val,
        uses_bw_eq: spec.is_bw_eq,
        translated_null_val: spec.range.max + 1,
    };
    let for_semi_join =
        matches!(spec.join_type, JoinType::Semi | JoinType::Anti) && !spec.is_bw_eq;

    let mut table = match try_one_to_one(spec, entry_count, type_info, for_semi_join, bucket_norm) {
        Ok(table) => table,
        Err(JoinError::OneToOneCollision) => {
            debug!(entry_count, "one-to-one collision, retrying as one-to-many");
            build_one_to_many(spec, entry_count, type_info, bucket_norm)
        }
        Err(e) => return Err(e),
    };

    if spec.memory_level == MemoryLevel::Gpu {
        let provider = buffer_provider.ok_or_else(|| {
            JoinError::NotSupported("GPU build without a buffer provider".into())
        })?;
        let bytes = table.as_bytes();
        let guard = DeviceGuard::alloc(provider, bytes.len(), spec.device_id)?;
        provider.copy_to_device(guard.buffer(), &bytes)?;
        table.gpu_buffer = Some(guard.into_inner());
    }

    debug!(
        entry_count,
        layout = ?table.layout(),
        bytes = table.byte_size(),
        "built perfect hash table"
    );
    Ok(Arc::new(table))
}

fn try_one_to_one(
    spec: &HashTableBuildSpec<'_>,
    entry_count: usize,
    type_info: JoinColumnTypeInfo,
    for_semi_join: bool,
    bucket_norm: i64,
) -> Result<PerfectHashTable> {
    let mut table = PerfectHashTable::new_one_to_one(entry_count);
    init_hash_join_buff(table.buffer_mut(), INVALID_SLOT_VAL);
    let rc = fill_hash_join_buff_bucketized(
        table.buffer_mut(),
        INVALID_SLOT_VAL,
        for_semi_join,
        spec.inner_col,
        type_info,
        spec.translation_map.as_deref(),
        spec.range.min,
        bucket_norm,
    );
    if rc != 0 {
        return Err(JoinError::OneToOneCollision);
    }
    Ok(table)
}

fn build_one_to_many(
    spec: &HashTableBuildSpec<'_>,
    entry_count: usize,
    type_info: JoinColumnTypeInfo,
    bucket_norm: i64,
) -> PerfectHashTable {
    let mut table = PerfectHashTable::new_one_to_many(entry_count, spec.inner_col.num_elems);
    let entry_count = table.entry_count();
    fill_one_to_many_hash_table_bucketized(
        table.buffer_mut(),
        entry_count,
        spec.inner_col,
        type_info,
        spec.translation_map.as_deref(),
        spec.range.min,
        bucket_norm,
    );
    table
}

#[cfg(test)]
mod tests {
    use basalt_common::buffer::HostBufferProvider;
    use basalt_common::types::TypeContext;

    use super::*;

    fn column_bytes(vals: &[i64]) -> Vec<u8> {
        vals.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn spec<'a>(data: &'a [u8], n: usize, range: KeyRange) -> HashTableBuildSpec<'a> {
        HashTableBuildSpec {
            key_type: TypeContext::global().int64(true),
            range,
            join_type: JoinType::Inner,
            is_bw_eq: false,
            inner_col: JoinColumn {
                data,
                num_elems: n,
                elem_size: 8,
            },
            null_val: i64::MIN,
            translation_map: None,
            memory_level: MemoryLevel::Cpu,
            device_id: 0,
        }
    }

    #[test]
    fn unique_keys_build_one_to_one() {
        let data = column_bytes(&[10, 20, 30]);
        let range = KeyRange {
            min: 0,
            max: 31,
            has_nulls: false,
        };
        let table =
            build_perfect_hash_table(&spec(&data, 3, range), &Config::default(), None).unwrap();
        assert_eq!(table.layout(), HashTableLayout::OneToOne);
        assert_eq!(table.entry_count(), 32);
    }

    #[test]
    fn duplicate_keys_fall_back_to_one_to_many() {
        let data = column_bytes(&[1, 1, 2, 2, 2, 3]);
        let range = KeyRange {
            min: 1,
            max: 3,
            has_nulls: false,
        };
        let table =
            build_perfect_hash_table(&spec(&data, 6, range), &Config::default(), None).unwrap();
        assert_eq!(table.layout(), HashTableLayout::OneToMany);
        // bucket of key 2 holds exactly the three matching row ids
        let bucket = 1usize;
        let offset = table.offsets()[bucket] as usize;
        let count = table.counts()[bucket] as usize;
        assert_eq!(count, 3);
        let mut rows = table.payload()[offset..offset + count].to_vec();
        rows.sort_unstable();
        assert_eq!(rows, vec![2, 3, 4]);
    }

    #[test]
    fn huge_sparse_tables_are_rejected() {
        let mut config = Config::default();
        config.exec.join.huge_join_hash_threshold = 16;
        config.exec.join.huge_join_hash_min_load = 50;
        let data = column_bytes(&[0, 1_000_000]);
        let range = KeyRange {
            min: 0,
            max: 1_000_000,
            has_nulls: false,
        };
        let err = build_perfect_hash_table(&spec(&data, 2, range), &config, None).unwrap_err();
        assert!(matches!(err, JoinError::TooManyHashEntries));
    }

    #[test]
    fn gpu_build_copies_from_cpu_master() {
        let provider = HostBufferProvider::new();
        let data = column_bytes(&[4, 6]);
        let range = KeyRange {
            min: 0,
            max: 7,
            has_nulls: false,
        };
        let mut s = spec(&data, 2, range);
        s.memory_level = MemoryLevel::Gpu;
        s.device_id = 1;
        let table = build_perfect_hash_table(&s, &Config::default(), Some(&provider)).unwrap();
        let gpu = table.gpu_buffer.as_ref().expect("device replica");
        assert_eq!(gpu.len, table.byte_size());
        let mut readback = vec![0u8; gpu.len];
        provider.copy_from_device(&mut readback, gpu).unwrap();
        assert_eq!(readback, table.as_bytes());
        assert_eq!(provider.live_buffers(), 1);
    }

    #[test]
    fn date_keys_bucketize_by_day() {
        let ctx = TypeContext::global();
        let day = SECONDS_PER_DAY;
        let data = column_bytes(&[0, day, 2 * day]);
        let range = KeyRange {
            min: 0,
            max: 2 * day,
            has_nulls: false,
        };
        let mut s = spec(&data, 3, range);
        s.key_type = ctx.date(TimeUnit::Second, true);
        let table = build_perfect_hash_table(&s, &Config::default(), None).unwrap();
        assert_eq!(table.entry_count(), 3);
        assert_eq!(table.layout(), HashTableLayout::OneToOne);
    }
}
