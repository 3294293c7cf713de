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

//! Bit-vector lowering of long IN lists.
//!
//! The probe is an external `bit_is_set` call against a bitmap covering
//! `[min, max]`; values outside the range compare false without touching
//! the bitmap.

use crate::error::{CodegenError, Result};

const PARALLEL_FILL_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone)]
pub struct InValuesBitmap {
    pub min_val: i64,
    pub max_val: i64,
    pub has_null: bool,
    pub null_val: i64,
    pub bitmap: Vec<u8>,
}

impl InValuesBitmap {
    /// Builds the bitmap over `values`. Lists beyond the parallel
    /// threshold are filled by worker threads over disjoint chunks.
    pub fn build(values: &[i64], null_val: i64) -> Result<InValuesBitmap> {
        let mut has_null = false;
        let mut min_val = i64::MAX;
        let mut max_val = i64::MIN;
        for &v in values {
            if v == null_val {
                has_null = true;
                continue;
            }
            min_val = min_val.min(v);
            max_val = max_val.max(v);
        }
        if min_val > max_val {
            // only NULLs in the list
            return Ok(InValuesBitmap {
                min_val: 0,
                max_val: -1,
                has_null,
                null_val,
                bitmap: Vec::new(),
            });
        }
        let span = max_val
            .checked_sub(min_val)
            .and_then(|s| s.checked_add(1))
            .ok_or_else(|| CodegenError::NotSupported("IN list range too wide".into()))?;
        if span > (1i64 << 33) {
            return Err(CodegenError::NotSupported(
                "IN list range too wide for a bitmap".into(),
            ));
        }
        let bytes = (span as usize).div_ceil(8);
        let mut bitmap = vec![0u8; bytes];
        if values.len() > PARALLEL_FILL_THRESHOLD {
            let workers = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            let chunk = values.len().div_ceil(workers);
            let partials: Vec<Vec<u8>> = std::thread::scope(|scope| {
                values
                    .chunks(chunk)
                    .map(|part| {
                        scope.spawn(move || {
                            let mut local = vec![0u8; bytes];
                            fill_bitmap(&mut local, part, min_val, null_val);
                            local
                        })
                    })
                    .collect::<Vec<_>>()
                    .into_iter()
                    .map(|h| h.join().expect("bitmap fill worker"))
                    .collect()
            });
            for partial in partials {
                for (dst, src) in bitmap.iter_mut().zip(partial) {
                    *dst |= src;
                }
            }
        } else {
            fill_bitmap(&mut bitmap, values, min_val, null_val);
        }
        Ok(InValuesBitmap {
            min_val,
            max_val,
            has_null,
            null_val,
            bitmap,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    pub fn contains(&self, v: i64) -> bool {
        if v < self.min_val || v > self.max_val {
            return false;
        }
        let bit = (v - self.min_val) as usize;
        (self.bitmap[bit / 8] >> (bit % 8)) & 1 == 1
    }
}

fn fill_bitmap(bitmap: &mut [u8], values: &[i64], min_val: i64, null_val: i64) {
    for &v in values {
        if v == null_val {
            continue;
        }
        let bit = (v - min_val) as usize;
        bitmap[bit / 8] |= 1 << (bit % 8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_matches_membership() {
        let values: Vec<i64> = (0..50_000).map(|i| i * 3).collect();
        let bitmap = InValuesBitmap::build(&values, i64::MIN).unwrap();
        for v in 0..150_000 {
            assert_eq!(bitmap.contains(v), v % 3 == 0 && v < 150_000);
        }
        assert!(!bitmap.contains(-5));
        assert!(!bitmap.contains(200_000));
    }

    #[test]
    fn null_only_list_is_empty() {
        let bitmap = InValuesBitmap::build(&[i64::MIN], i64::MIN).unwrap();
        assert!(bitmap.is_empty());
        assert!(bitmap.has_null);
    }
}
