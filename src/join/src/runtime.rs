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

//! Fill and probe runtime for perfect hash tables. The same names are
//! emitted as extern calls by the probe IR and linked by the driver; the
//! interpreter binds them to these implementations.

use crate::hash_table::INVALID_SLOT_VAL;

/// Flat inner join column: a byte buffer of `num_elems` fixed-width
/// values.
#[derive(Debug, Clone, Copy)]
pub struct JoinColumn<'a> {
    pub data: &'a [u8],
    pub num_elems: usize,
    pub elem_size: usize,
}

impl JoinColumn<'_> {
    pub fn get(&self, i: usize) -> i64 {
        let start = i * self.elem_size;
        let bytes = &self.data[start..start + self.elem_size];
        let mut raw = [0u8; 8];
        raw[..self.elem_size].copy_from_slice(bytes);
        let unsigned = u64::from_le_bytes(raw);
        let shift = 64 - self.elem_size * 8;
        ((unsigned << shift) as i64) >> shift
    }
}

/// Type facts the fill loop needs about the inner column.
#[derive(Debug, Clone, Copy)]
pub struct JoinColumnTypeInfo {
    pub min_val: i64,
    pub max_val: i64,
    pub null_val: i64,
    pub uses_bw_eq: bool,
    /// The in-range value NULL maps to under bitwise equality.
    pub translated_null_val: i64,
}

pub fn init_hash_join_buff(buff: &mut [i32], invalid_slot_val: i32) {
    buff.fill(invalid_slot_val);
}

/// Fills a OneToOne buffer. Returns -1 when two inner rows land in the
/// same bucket, which aborts the OneToOne attempt.
pub fn fill_hash_join_buff_bucketized(
    buff: &mut [i32],
    invalid_slot_val: i32,
    for_semi_join: bool,
    col: JoinColumn<'_>,
    type_info: JoinColumnTypeInfo,
    translation_map: Option<&[i32]>,
    min_inner_elem: i64,
    bucket_normalization: i64,
) -> i32 {
    for i in 0..col.num_elems {
        let mut val = col.get(i);
        if val == type_info.null_val {
            if !type_info.uses_bw_eq {
                continue;
            }
            val = type_info.translated_null_val;
        }
        if let Some(map) = translation_map {
            if val != type_info.translated_null_val || !type_info.uses_bw_eq {
                let translated = map[(val - min_inner_elem) as usize];
                if translated == crate::INVALID_STR_ID {
                    continue;
                }
                val = translated as i64;
            }
        }
        let idx = ((val - type_info.min_val) / bucket_normalization) as usize;
        if buff[idx] != invalid_slot_val {
            if for_semi_join {
                // first matching row wins for semi joins
                continue;
            }
            return -1;
        }
        buff[idx] = i as i32;
    }
    0
}

pub fn fill_hash_join_buff(
    buff: &mut [i32],
    invalid_slot_val: i32,
    for_semi_join: bool,
    col: JoinColumn<'_>,
    type_info: JoinColumnTypeInfo,
    translation_map: Option<&[i32]>,
    min_inner_elem: i64,
) -> i32 {
    fill_hash_join_buff_bucketized(
        buff,
        invalid_slot_val,
        for_semi_join,
        col,
        type_info,
        translation_map,
        min_inner_elem,
        1,
    )
}

/// Fills a OneToMany layout: `offsets[N] ++ counts[N] ++ payload[M]`.
pub fn fill_one_to_many_hash_table_bucketized(
    buff: &mut [i32],
    entry_count: usize,
    col: JoinColumn<'_>,
    type_info: JoinColumnTypeInfo,
    translation_map: Option<&[i32]>,
    min_inner_elem: i64,
    bucket_normalization: i64,
) {
    let resolve = |i: usize| -> Option<usize> {
        let mut val = col.get(i);
        if val == type_info.null_val {
            if !type_info.uses_bw_eq {
                return None;
            }
            val = type_info.translated_null_val;
        }
        if let Some(map) = translation_map {
            if val != type_info.translated_null_val || !type_info.uses_bw_eq {
                let translated = map[(val - min_inner_elem) as usize];
                if translated == crate::INVALID_STR_ID {
                    return None;
                }
                val = translated as i64;
            }
        }
        Some(((val - type_info.min_val) / bucket_normalization) as usize)
    };

    // pass 1: bucket counts
    for i in 0..col.num_elems {
        if let Some(idx) = resolve(i) {
            buff[entry_count + idx] += 1;
        }
    }
    // pass 2: exclusive prefix sums into offsets
    let mut running = 0i32;
    for h in 0..entry_count {
        buff[h] = running;
        running += buff[entry_count + h];
    }
    // pass 3: payload, reusing counts as cursors
    for h in 0..entry_count {
        buff[entry_count + h] = 0;
    }
    for i in 0..col.num_elems {
        if let Some(idx) = resolve(i) {
            let pos = buff[idx] + buff[entry_count + idx];
            buff[2 * entry_count + pos as usize] = i as i32;
            buff[entry_count + idx] += 1;
        }
    }
}

pub fn fill_one_to_many_hash_table(
    buff: &mut [i32],
    entry_count: usize,
    col: JoinColumn<'_>,
    type_info: JoinColumnTypeInfo,
    translation_map: Option<&[i32]>,
    min_inner_elem: i64,
) {
    fill_one_to_many_hash_table_bucketized(
        buff,
        entry_count,
        col,
        type_info,
        translation_map,
        min_inner_elem,
        1,
    )
}

// ---- probe side ----

/// Returns the matching inner row id or [`INVALID_SLOT_VAL`].
pub fn hash_join_idx(hash_buff: &[i32], key: i64, min_key: i64, max_key: i64) -> i64 {
    if key >= min_key && key <= max_key {
        return hash_buff[(key - min_key) as usize] as i64;
    }
    INVALID_SLOT_VAL as i64
}

pub fn hash_join_idx_nullable(
    hash_buff: &[i32],
    key: i64,
    min_key: i64,
    max_key: i64,
    null_val: i64,
) -> i64 {
    if key != null_val {
        hash_join_idx(hash_buff, key, min_key, max_key)
    } else {
        INVALID_SLOT_VAL as i64
    }
}

/// Bitwise equality: NULL keys probe through their translated slot.
pub fn hash_join_idx_bitwise(
    hash_buff: &[i32],
    key: i64,
    min_key: i64,
    max_key: i64,
    null_val: i64,
    translated_val: i64,
) -> i64 {
    if key != null_val {
        hash_join_idx(hash_buff, key, min_key, max_key)
    } else {
        hash_join_idx(hash_buff, translated_val, min_key, translated_val)
    }
}

pub fn bucketized_hash_join_idx(
    hash_buff: &[i32],
    key: i64,
    min_key: i64,
    max_key: i64,
    bucket_normalization: i64,
) -> i64 {
    if key >= min_key && key <= max_key {
        let idx = (key - min_key) / bucket_normalization;
        return hash_buff[idx as usize] as i64;
    }
    INVALID_SLOT_VAL as i64
}

pub fn bucketized_hash_join_idx_nullable(
    hash_buff: &[i32],
    key: i64,
    min_key: i64,
    max_key: i64,
    null_val: i64,
    bucket_normalization: i64,
) -> i64 {
    if key != null_val {
        bucketized_hash_join_idx(hash_buff, key, min_key, max_key, bucket_normalization)
    } else {
        INVALID_SLOT_VAL as i64
    }
}

/// Probe shortcut when the inner column is the virtual rowid: the key is
/// the row id, subject only to the range and null checks.
pub fn rowid_hash_join_idx(key: i64, min_key: i64, max_key: i64) -> i64 {
    if key >= min_key && key <= max_key {
        key
    } else {
        INVALID_SLOT_VAL as i64
    }
}

pub fn rowid_hash_join_idx_nullable(key: i64, min_key: i64, max_key: i64, null_val: i64) -> i64 {
    if key != null_val {
        rowid_hash_join_idx(key, min_key, max_key)
    } else {
        INVALID_SLOT_VAL as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_from(vals: &[i64]) -> Vec<u8> {
        let mut out = Vec::new();
        for v in vals {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    fn type_info(min_val: i64, max_val: i64) -> JoinColumnTypeInfo {
        JoinColumnTypeInfo {
            min_val,
            max_val,
            null_val: i64::MIN,
            uses_bw_eq: false,
            translated_null_val: max_val + 1,
        }
    }

    #[test]
    fn one_to_one_round_trip() {
        let data = column_from(&[10, 20, 30]);
        let col = JoinColumn {
            data: &data,
            num_elems: 3,
            elem_size: 8,
        };
        let mut buff = vec![0i32; 32];
        init_hash_join_buff(&mut buff, INVALID_SLOT_VAL);
        let rc = fill_hash_join_buff(
            &mut buff,
            INVALID_SLOT_VAL,
            false,
            col,
            type_info(0, 31),
            None,
            0,
        );
        assert_eq!(rc, 0);
        for (row, key) in [10i64, 20, 30].iter().enumerate() {
            assert_eq!(hash_join_idx(&buff, *key, 0, 31), row as i64);
        }
        for key in [0i64, 1, 11, 31] {
            assert_eq!(hash_join_idx(&buff, key, 0, 31), INVALID_SLOT_VAL as i64);
        }
        // out of range keys never touch the buffer
        assert_eq!(hash_join_idx(&buff, 99, 0, 31), INVALID_SLOT_VAL as i64);
    }

    #[test]
    fn one_to_one_collision_aborts() {
        let data = column_from(&[5, 5]);
        let col = JoinColumn {
            data: &data,
            num_elems: 2,
            elem_size: 8,
        };
        let mut buff = vec![INVALID_SLOT_VAL; 8];
        let rc = fill_hash_join_buff(
            &mut buff,
            INVALID_SLOT_VAL,
            false,
            col,
            type_info(0, 7),
            None,
            0,
        );
        assert_eq!(rc, -1);
    }

    #[test]
    fn semi_join_keeps_first_match() {
        let data = column_from(&[5, 5]);
        let col = JoinColumn {
            data: &data,
            num_elems: 2,
            elem_size: 8,
        };
        let mut buff = vec![INVALID_SLOT_VAL; 8];
        let rc = fill_hash_join_buff(
            &mut buff,
            INVALID_SLOT_VAL,
            true,
            col,
            type_info(0, 7),
            None,
            0,
        );
        assert_eq!(rc, 0);
        assert_eq!(hash_join_idx(&buff, 5, 0, 7), 0);
    }

    #[test]
    fn one_to_many_payload_is_complete() {
        let data = column_from(&[1, 1, 2, 2, 2, 3]);
        let col = JoinColumn {
            data: &data,
            num_elems: 6,
            elem_size: 8,
        };
        let entry_count = 4usize;
        let mut buff = vec![0i32; 2 * entry_count + 6];
        fill_one_to_many_hash_table(&mut buff, entry_count, col, type_info(0, 3), None, 0);
        let bucket = 2usize;
        let offset = buff[bucket] as usize;
        let count = buff[entry_count + bucket] as usize;
        assert_eq!(count, 3);
        let mut rows: Vec<i32> = buff[2 * entry_count + offset..2 * entry_count + offset + count]
            .to_vec();
        rows.sort_unstable();
        assert_eq!(rows, vec![2, 3, 4]);
    }

    #[test]
    fn nulls_are_skipped_without_bw_eq() {
        let data = column_from(&[i64::MIN, 7]);
        let col = JoinColumn {
            data: &data,
            num_elems: 2,
            elem_size: 8,
        };
        let mut buff = vec![INVALID_SLOT_VAL; 8];
        let rc = fill_hash_join_buff(
            &mut buff,
            INVALID_SLOT_VAL,
            false,
            col,
            type_info(0, 7),
            None,
            0,
        );
        assert_eq!(rc, 0);
        assert_eq!(hash_join_idx(&buff, 7, 0, 7), 1);
        assert_eq!(buff.iter().filter(|v| **v != INVALID_SLOT_VAL).count(), 1);
    }

    #[test]
    fn bw_eq_probes_null_through_translated_slot() {
        let data = column_from(&[i64::MIN, 3]);
        let col = JoinColumn {
            data: &data,
            num_elems: 2,
            elem_size: 8,
        };
        let ti = JoinColumnTypeInfo {
            min_val: 0,
            max_val: 8,
            null_val: i64::MIN,
            uses_bw_eq: true,
            translated_null_val: 8,
        };
        let mut buff = vec![INVALID_SLOT_VAL; 9];
        let rc = fill_hash_join_buff(&mut buff, INVALID_SLOT_VAL, false, col, ti, None, 0);
        assert_eq!(rc, 0);
        // NULL probe matches the NULL inner row
        assert_eq!(hash_join_idx_bitwise(&buff, i64::MIN, 0, 8, i64::MIN, 8), 0);
        // non-null probes still work
        assert_eq!(hash_join_idx_bitwise(&buff, 3, 0, 8, i64::MIN, 8), 1);
        assert_eq!(
            hash_join_idx_bitwise(&buff, 5, 0, 8, i64::MIN, 8),
            INVALID_SLOT_VAL as i64
        );
    }

    #[test]
    fn bucketized_dates_share_a_day() {
        let day = 86_400i64;
        let data = column_from(&[0, day, 2 * day]);
        let col = JoinColumn {
            data: &data,
            num_elems: 3,
            elem_size: 8,
        };
        let ti = type_info(0, 2 * day);
        let mut buff = vec![INVALID_SLOT_VAL; 3];
        let rc = fill_hash_join_buff_bucketized(
            &mut buff,
            INVALID_SLOT_VAL,
            false,
            col,
            ti,
            None,
            0,
            day,
        );
        assert_eq!(rc, 0);
        assert_eq!(bucketized_hash_join_idx(&buff, day, 0, 2 * day, day), 1);
    }
}
