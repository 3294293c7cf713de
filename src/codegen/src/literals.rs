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

//! The per-query literal buffer.
//!
//! With literal hoisting enabled, constants load from a buffer passed to
//! the row function instead of being inlined, so textually different
//! queries with different constants share compiled code. Offsets are
//! 16-bit; exceeding them fails compilation.

use hashbrown::HashMap;

use basalt_common::datum::Datum;

use crate::error::{CodegenError, Result};

/// One hoisted literal: the value plus the dictionary id it was encoded
/// with (0 for none).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LiteralKey {
    value: Datum,
    dict_id: i32,
}

#[derive(Debug, Default)]
pub struct LiteralBuffer {
    bytes: Vec<u8>,
    offsets: HashMap<LiteralKey, u16>,
}

impl LiteralBuffer {
    pub fn new() -> LiteralBuffer {
        LiteralBuffer::default()
    }

    /// Materializes `value` once and returns its byte offset.
    pub fn get_or_add(&mut self, value: &Datum, dict_id: i32) -> Result<u16> {
        let key = LiteralKey {
            value: value.clone(),
            dict_id,
        };
        if let Some(off) = self.offsets.get(&key) {
            return Ok(*off);
        }
        // every slot is padded to 8 bytes
        let off = self.bytes.len();
        if off + 8 > u16::MAX as usize {
            return Err(CodegenError::TooManyLiterals);
        }
        let encoded: i64 = match value {
            Datum::Int(v) => *v,
            Datum::Bool(b) => *b as i64,
            Datum::Fp(v) => v.to_bits() as i64,
            Datum::Null => 0,
            Datum::Str(_) | Datum::Array(_) => {
                // string literals hoist as dictionary ids resolved at
                // compile time; the caller passes the encoded id
                return Err(CodegenError::NotSupported(
                    "hoisting a non-scalar literal".into(),
                ));
            }
        };
        self.bytes.extend_from_slice(&encoded.to_le_bytes());
        let off = off as u16;
        self.offsets.insert(key, off);
        Ok(off)
    }

    /// Adds an already-encoded value (e.g. a dictionary id).
    pub fn get_or_add_encoded(&mut self, raw: i64, dict_id: i32) -> Result<u16> {
        self.get_or_add(&Datum::Int(raw), dict_id)
    }

    /// Appends raw bytes (pattern strings), 8-byte aligned, deduplicated.
    pub fn add_raw_bytes(&mut self, bytes: &[u8]) -> Result<u16> {
        let key = LiteralKey {
            value: Datum::Str(String::from_utf8_lossy(bytes).into()),
            dict_id: -1,
        };
        if let Some(off) = self.offsets.get(&key) {
            return Ok(*off);
        }
        let off = self.bytes.len();
        let padded = bytes.len().div_ceil(8) * 8;
        if off + padded > u16::MAX as usize {
            return Err(CodegenError::TooManyLiterals);
        }
        self.bytes.extend_from_slice(bytes);
        self.bytes.resize(off + padded, 0);
        let off = off as u16;
        self.offsets.insert(key, off);
        Ok(off)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_literals_get_distinct_slots() {
        let mut buf = LiteralBuffer::new();
        let a = buf.get_or_add(&Datum::Int(5), 0).unwrap();
        let b = buf.get_or_add(&Datum::Int(6), 0).unwrap();
        let a2 = buf.get_or_add(&Datum::Int(5), 0).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a2);
        assert_eq!(buf.len(), 16);
    }

    #[test]
    fn offset_space_is_bounded() {
        let mut buf = LiteralBuffer::new();
        let mut last = Ok(0);
        for i in 0..10_000i64 {
            last = buf.get_or_add(&Datum::Int(i), 0);
            if last.is_err() {
                break;
            }
        }
        assert!(matches!(last, Err(CodegenError::TooManyLiterals)));
    }
}
