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

//! Probe-side IR emission and runtime bindings.

use std::sync::Arc;

use basalt_expr::expr::ColumnVar;
use basalt_llir::{FunctionBuilder, IrType, Memory, Operand, PtrVal, RuntimeEnv, ScalarVal};

use crate::builder::KeyRange;
use crate::error::{JoinError, Result};
use crate::hash_table::{HashTableLayout, PerfectHashTable};
use crate::runtime;

/// The OneToMany probe result: where the matching inner rows live.
pub struct HashJoinMatchingSet {
    /// Number of matching rows; zero when the key misses.
    pub count: Operand,
    /// Byte pointer to the payload segment start for this key.
    pub payload_ptr: Operand,
    /// Slot index the key hashed to, `-1` on a miss.
    pub slot: Operand,
    /// Size in bytes of one table component.
    pub sub_buffer_size: usize,
}

/// Emits probe IR against one attached perfect hash table.
pub struct PerfectJoinProbe {
    pub table: Arc<PerfectHashTable>,
    pub range: KeyRange,
    pub is_bw_eq: bool,
    pub key_nullable: bool,
    pub null_val: i64,
    /// Date keys probe through the bucketized variants.
    pub is_date: bool,
    pub bucket_normalization: i64,
}

impl PerfectJoinProbe {
    /// Loads the base pointer of the `index`-th hash table attached to the
    /// row function.
    pub fn codegen_hash_table_load(b: &mut FunctionBuilder, index: usize) -> Operand {
        let tables = b.arg("join_hash_tables");
        let entry = b.gep(tables, Operand::i64(index as i64), 8);
        b.load(IrType::Ptr, entry)
    }

    fn probe_args(&self, hash_ptr: Operand, key: Operand) -> Vec<Operand> {
        let mut args = vec![
            hash_ptr,
            key,
            Operand::i64(self.range.min),
            Operand::i64(self.range.max),
        ];
        if self.key_nullable || self.is_bw_eq {
            args.push(Operand::i64(self.null_val));
        }
        if self.is_bw_eq {
            let translated = if self.is_date {
                self.range.max / self.bucket_normalization + 1
            } else {
                self.range.max + 1
            };
            args.push(Operand::i64(translated));
        }
        if self.is_date {
            args.push(Operand::i64(self.bucket_normalization));
        }
        args
    }

    fn probe_fname(&self) -> String {
        let mut fname = if self.is_date {
            "bucketized_hash_join_idx".to_owned()
        } else {
            "hash_join_idx".to_owned()
        };
        if self.is_bw_eq {
            fname += "_bitwise";
        }
        if !self.is_bw_eq && self.key_nullable {
            fname += "_nullable";
        }
        fname
    }

    /// OneToOne probe: the matching inner row id or the invalid sentinel.
    pub fn codegen_slot(
        &self,
        b: &mut FunctionBuilder,
        index: usize,
        key: Operand,
    ) -> Result<Operand> {
        if self.table.layout() != HashTableLayout::OneToOne {
            return Err(JoinError::NotSupported(
                "codegen_slot on a one-to-many table".into(),
            ));
        }
        let hash_ptr = Self::codegen_hash_table_load(b, index);
        let args = self.probe_args(hash_ptr, key);
        Ok(b.call(self.probe_fname(), IrType::I64, args))
    }

    /// Rowid shortcut: the key is the row id, subject only to range and
    /// null checks.
    pub fn codegen_rowid_slot(&self, b: &mut FunctionBuilder, key: Operand) -> Operand {
        let mut args = vec![key, Operand::i64(self.range.min), Operand::i64(self.range.max)];
        let mut fname = "rowid_hash_join_idx".to_owned();
        if self.key_nullable {
            fname += "_nullable";
            args.push(Operand::i64(self.null_val));
        }
        b.call(fname, IrType::I64, args)
    }

    /// OneToMany probe: the `(count, payload, slot)` triple the loop
    /// driver in the code generator iterates.
    pub fn codegen_matching_set(
        &self,
        b: &mut FunctionBuilder,
        index: usize,
        key: Operand,
    ) -> Result<HashJoinMatchingSet> {
        if self.table.layout() != HashTableLayout::OneToMany {
            return Err(JoinError::NotSupported(
                "codegen_matching_set on a one-to-one table".into(),
            ));
        }
        // the probe helper runs once against the offset component and once
        // against the count component; a miss yields -1 from both
        let sub_buffer_size = self.table.component_buffer_size();
        let hash_ptr = Self::codegen_hash_table_load(b, index);
        let offset_args = self.probe_args(hash_ptr, key);
        let offset = b.call(self.probe_fname(), IrType::I64, offset_args);
        let count_base = b.gep(hash_ptr, Operand::i64(self.table.count_buffer_off() as i64), 1);
        let count_args = self.probe_args(count_base, key);
        let raw_count = b.call(self.probe_fname(), IrType::I64, count_args);
        use basalt_llir::ICmpPred;
        let missed = b.icmp(ICmpPred::Slt, IrType::I64, offset, Operand::i64(0));
        let count = b.select(IrType::I64, missed, Operand::i64(0), raw_count);
        let offset_clamped = b.select(IrType::I64, missed, Operand::i64(0), offset);
        let payload_base = b.gep(
            hash_ptr,
            Operand::i64(self.table.payload_buffer_off() as i64),
            1,
        );
        let payload_ptr = b.gep(payload_base, offset_clamped, 4);
        Ok(HashJoinMatchingSet {
            count,
            payload_ptr,
            slot: offset,
            sub_buffer_size,
        })
    }
}

/// Self-join shapes not expressible in a single left-deep join tree are
/// rejected at probe time.
pub fn check_self_join_covered(
    inner_col: &ColumnVar,
    outer_col: &ColumnVar,
    max_rte_covered: i32,
) -> Result<()> {
    let same_table = inner_col.col_info.table_id == outer_col.col_info.table_id
        && inner_col.col_info.db_id == outer_col.col_info.db_id;
    if same_table && inner_col.rte_idx.max(outer_col.rte_idx) > max_rte_covered {
        return Err(JoinError::NotSupported(
            "the query contains a self-join pattern that requires multiple left-deep \
             join trees; consider rewriting the table order in the FROM clause"
                .into(),
        ));
    }
    Ok(())
}

fn table_slice(mem: &Memory, ptr: PtrVal) -> basalt_llir::interp::Result<Vec<i32>> {
    let buf = mem.buffer(ptr)?;
    let bytes = &buf[ptr.offset as usize..];
    Ok(bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Binds the probe helper names to their implementations.
pub fn register_runtime(env: &mut RuntimeEnv) {
    env.register("hash_join_idx", |mem, args| {
        let buff = table_slice(mem, args[0].as_ptr()?)?;
        Ok(ScalarVal::I(runtime::hash_join_idx(
            &buff,
            args[1].as_i()?,
            args[2].as_i()?,
            args[3].as_i()?,
        )))
    });
    env.register("hash_join_idx_nullable", |mem, args| {
        let buff = table_slice(mem, args[0].as_ptr()?)?;
        Ok(ScalarVal::I(runtime::hash_join_idx_nullable(
            &buff,
            args[1].as_i()?,
            args[2].as_i()?,
            args[3].as_i()?,
            args[4].as_i()?,
        )))
    });
    env.register("hash_join_idx_bitwise", |mem, args| {
        let buff = table_slice(mem, args[0].as_ptr()?)?;
        Ok(ScalarVal::I(runtime::hash_join_idx_bitwise(
            &buff,
            args[1].as_i()?,
            args[2].as_i()?,
            args[3].as_i()?,
            args[4].as_i()?,
            args[5].as_i()?,
        )))
    });
    env.register("bucketized_hash_join_idx", |mem, args| {
        let buff = table_slice(mem, args[0].as_ptr()?)?;
        Ok(ScalarVal::I(runtime::bucketized_hash_join_idx(
            &buff,
            args[1].as_i()?,
            args[2].as_i()?,
            args[3].as_i()?,
            args[4].as_i()?,
        )))
    });
    env.register("bucketized_hash_join_idx_nullable", |mem, args| {
        let buff = table_slice(mem, args[0].as_ptr()?)?;
        Ok(ScalarVal::I(runtime::bucketized_hash_join_idx_nullable(
            &buff,
            args[1].as_i()?,
            args[2].as_i()?,
            args[3].as_i()?,
            args[4].as_i()?,
            args[5].as_i()?,
        )))
    });
    env.register("rowid_hash_join_idx", |_mem, args| {
        Ok(ScalarVal::I(runtime::rowid_hash_join_idx(
            args[0].as_i()?,
            args[1].as_i()?,
            args[2].as_i()?,
        )))
    });
    env.register("rowid_hash_join_idx_nullable", |_mem, args| {
        Ok(ScalarVal::I(runtime::rowid_hash_join_idx_nullable(
            args[0].as_i()?,
            args[1].as_i()?,
            args[2].as_i()?,
            args[3].as_i()?,
        )))
    });
}
