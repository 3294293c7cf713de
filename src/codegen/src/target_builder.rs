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

//! Per-target update emission into the result buffer.
//!
//! For each target expression the builder emits the runtime call that
//! folds the current row into the slot addressed by the group row pointer,
//! choosing the helper variant from the aggregate kind, slot type and
//! nullability. Count fast paths use the shared-memory atomic on GPU.

use basalt_common::types::TypeRef;
use basalt_expr::expr::Expr;
use basalt_expr::ops::OpType;
use basalt_expr::ExprRef;
use basalt_llir::{BinOp, BlockId, ICmpPred, IrType, Operand};

use crate::codegen::{CgValue, CodeGenerator};
use crate::descriptor::{slot_sentinel, TargetKind, TargetSlot};
use crate::error::{CodegenError, Result};
use crate::options::DeviceType;

pub struct TargetExprBuilder<'a, 'b> {
    pub cg: &'a mut CodeGenerator<'b>,
}

impl<'a, 'b> TargetExprBuilder<'a, 'b> {
    pub fn new(cg: &'a mut CodeGenerator<'b>) -> TargetExprBuilder<'a, 'b> {
        TargetExprBuilder { cg }
    }

    /// Emits the update of `target` for the current row. `row_ptr` points
    /// at the slot area of the group's row.
    pub fn codegen_update(&mut self, target: &TargetSlot, row_ptr: Operand) -> Result<()> {
        let slot_ptr = self.slot_ptr(row_ptr, target.slot);
        match &target.kind {
            TargetKind::Projected => {
                let expr = target.expr.as_ref().expect("projection carries its expr");
                let value = self.cg.codegen(expr)?;
                self.store_slot(slot_ptr, &value)
            }
            TargetKind::Count { arg, distinct, big } => {
                self.codegen_count(arg.as_ref(), *distinct, *big, slot_ptr)
            }
            TargetKind::Sum { arg } => self.codegen_sum(arg, slot_ptr),
            TargetKind::Min { arg } => self.codegen_min_max(arg, slot_ptr, true),
            TargetKind::Max { arg } => self.codegen_min_max(arg, slot_ptr, false),
            TargetKind::Avg { arg } => {
                let count_ptr =
                    self.slot_ptr(row_ptr, target.count_slot.expect("avg has a count slot"));
                self.codegen_avg(arg, slot_ptr, count_ptr)
            }
            TargetKind::SingleValue { arg } => self.codegen_single_value(arg, slot_ptr),
            TargetKind::Sample { arg } => self.codegen_sample(arg, slot_ptr),
            TargetKind::ApproxCountDistinct { arg, bits } => {
                self.codegen_approx_count_distinct(arg, *bits, slot_ptr)
            }
            TargetKind::ApproxQuantile { arg, .. } => self.codegen_approx_quantile(arg, slot_ptr),
        }
    }

    fn slot_ptr(&mut self, row_ptr: Operand, slot: usize) -> Operand {
        self.cg
            .b()
            .gep(row_ptr, Operand::i64(slot as i64), 8)
    }

    fn store_slot(&mut self, slot_ptr: Operand, value: &CgValue) -> Result<()> {
        if value.ty.is_text() || value.ty.is_varlen_array() {
            return Err(CodegenError::NotSupported(
                "projecting a none-encoded variable-length value".into(),
            ));
        }
        let b = self.cg.b();
        if value.ty.is_fp() {
            b.store(IrType::F64, value.v, slot_ptr);
        } else {
            b.store(IrType::I64, value.v, slot_ptr);
        }
        Ok(())
    }

    fn codegen_count(
        &mut self,
        arg: Option<&ExprRef>,
        distinct: bool,
        big: bool,
        slot_ptr: Operand,
    ) -> Result<()> {
        if distinct {
            let arg = arg.ok_or_else(|| {
                CodegenError::NotSupported("COUNT(DISTINCT) without an argument".into())
            })?;
            return self.for_each_value(arg, |tb, value| {
                tb.cg.cgen_state.emit_call(
                    "agg_count_distinct",
                    IrType::I32,
                    vec![slot_ptr, value.v],
                );
                Ok(())
            });
        }
        let helper = match (big, self.cg.cgen_state.co.device_type) {
            (_, DeviceType::Gpu) => "agg_count_shared",
            (true, _) => "agg_count",
            (false, _) => "agg_count_int32",
        };
        match arg {
            None => {
                self.cg
                    .cgen_state
                    .emit_call(helper, IrType::I64, vec![slot_ptr]);
                Ok(())
            }
            Some(arg) => self.for_each_value(arg, |tb, _value| {
                tb.cg
                    .cgen_state
                    .emit_call(helper, IrType::I64, vec![slot_ptr]);
                Ok(())
            }),
        }
    }

    fn codegen_sum(&mut self, arg: &ExprRef, slot_ptr: Operand) -> Result<()> {
        let ty = arg.ty();
        self.for_each_value_with_nulls(arg, |tb, value| {
            if ty.is_fp() {
                let helper = if ty.nullable() {
                    "agg_sum_double_skip_val"
                } else {
                    "agg_sum_double"
                };
                tb.cg
                    .cgen_state
                    .emit_call(helper, IrType::I32, vec![slot_ptr, value.v]);
            } else if ty.nullable() {
                let skip = Operand::i64(slot_sentinel(ty));
                tb.cg.cgen_state.emit_call(
                    "agg_sum_skip_val",
                    IrType::I32,
                    vec![slot_ptr, value.v, skip],
                );
            } else {
                tb.cg
                    .cgen_state
                    .emit_call("agg_sum", IrType::I64, vec![slot_ptr, value.v]);
            }
            Ok(())
        })
    }

    fn codegen_min_max(&mut self, arg: &ExprRef, slot_ptr: Operand, is_min: bool) -> Result<()> {
        let ty = arg.ty();
        // the slot is sentinel-initialized, so the skip-val variant also
        // serves non-nullable inputs
        self.for_each_value_with_nulls(arg, |tb, value| {
            if ty.is_fp() {
                let helper = if is_min {
                    "agg_min_double_skip_val"
                } else {
                    "agg_max_double_skip_val"
                };
                tb.cg
                    .cgen_state
                    .emit_call(helper, IrType::I32, vec![slot_ptr, value.v]);
            } else {
                let helper = if is_min {
                    "agg_min_skip_val"
                } else {
                    "agg_max_skip_val"
                };
                let skip = Operand::i64(slot_sentinel(ty));
                tb.cg
                    .cgen_state
                    .emit_call(helper, IrType::I32, vec![slot_ptr, value.v, skip]);
            }
            Ok(())
        })
    }

    /// AVG keeps a sum slot and a parallel count slot; materialization
    /// divides them and a zero count reads back as NULL.
    fn codegen_avg(&mut self, arg: &ExprRef, sum_ptr: Operand, count_ptr: Operand) -> Result<()> {
        let ty = arg.ty();
        self.for_each_value(arg, |tb, value| {
            if ty.is_fp() {
                tb.cg.cgen_state.emit_call(
                    "agg_sum_double_skip_val",
                    IrType::I32,
                    vec![sum_ptr, value.v],
                );
            } else {
                let skip = Operand::i64(slot_sentinel(ty));
                tb.cg.cgen_state.emit_call(
                    "agg_sum_skip_val",
                    IrType::I32,
                    vec![sum_ptr, value.v, skip],
                );
            }
            tb.cg
                .cgen_state
                .emit_call("agg_count", IrType::I64, vec![count_ptr]);
            Ok(())
        })
    }

    fn codegen_single_value(&mut self, arg: &ExprRef, slot_ptr: Operand) -> Result<()> {
        let ty = arg.ty();
        let value = self.cg.codegen(arg)?;
        let sentinel = Operand::i64(slot_sentinel(ty));
        let rc = self.cg.cgen_state.emit_call(
            "checked_single_agg_id",
            IrType::I32,
            vec![slot_ptr, value.v, sentinel],
        );
        // a non-zero return is the error code to propagate
        let b = self.cg.b();
        let failed = b.icmp(ICmpPred::Ne, IrType::I32, rc, Operand::i32(0));
        let fail_bb = b.new_block("single_value_fail");
        let ok_bb = b.new_block("single_value_ok");
        b.cond_br(failed, fail_bb, ok_bb);
        b.position_at_end(fail_bb);
        b.ret(Some(rc));
        b.position_at_end(ok_bb);
        self.cg.cgen_state.needs_error_check = true;
        Ok(())
    }

    /// SAMPLE: the slot is initialized to the sentinel and the first
    /// non-null row wins.
    fn codegen_sample(&mut self, arg: &ExprRef, slot_ptr: Operand) -> Result<()> {
        let ty = arg.ty();
        let value = self.cg.codegen(arg)?;
        if ty.is_fp() {
            self.cg
                .cgen_state
                .emit_call("agg_id_double", IrType::I32, vec![slot_ptr, value.v]);
        } else {
            let sentinel = Operand::i64(slot_sentinel(ty));
            self.cg.cgen_state.emit_call(
                "agg_id",
                IrType::I32,
                vec![slot_ptr, value.v, sentinel],
            );
        }
        Ok(())
    }

    fn codegen_approx_count_distinct(
        &mut self,
        arg: &ExprRef,
        bits: u8,
        slot_ptr: Operand,
    ) -> Result<()> {
        self.for_each_value(arg, |tb, value| {
            tb.cg.cgen_state.emit_call(
                "agg_approximate_count_distinct",
                IrType::I32,
                vec![slot_ptr, value.v, Operand::i64(bits as i64)],
            );
            Ok(())
        })
    }

    fn codegen_approx_quantile(&mut self, arg: &ExprRef, slot_ptr: Operand) -> Result<()> {
        self.for_each_value(arg, |tb, value| {
            let v = if value.ty.is_fp() {
                value.v
            } else {
                tb.cg.b().cast(
                    basalt_llir::CastOp::SiToFp,
                    value.v,
                    IrType::I64,
                    IrType::F64,
                )
            };
            tb.cg
                .cgen_state
                .emit_call("agg_approx_quantile", IrType::I32, vec![slot_ptr, v]);
            Ok(())
        })
    }

    /// Evaluates `arg` and runs `update` once per non-null value. An
    /// UNNEST argument turns into a per-element loop over the array.
    fn for_each_value<F>(&mut self, arg: &ExprRef, update: F) -> Result<()>
    where
        F: Fn(&mut Self, &CgValue) -> Result<()>,
    {
        if let Expr::UOper(u) = arg.as_ref() {
            if u.op == OpType::Unnest {
                return self.unnest_loop(&u.operand, update);
            }
        }
        let value = self.cg.codegen(arg)?;
        if !arg.ty().nullable() {
            return update(self, &value);
        }
        let is_null = self.cg.codegen_is_null(&value);
        let update_bb = self.cg.b().new_block("agg_notnull");
        let skip_bb = self.cg.b().new_block("agg_skip");
        self.cg.b().cond_br(is_null, skip_bb, update_bb);
        self.cg.b().position_at_end(update_bb);
        update(self, &value)?;
        self.cg.b().br(skip_bb);
        self.cg.b().position_at_end(skip_bb);
        Ok(())
    }

    /// Like [`Self::for_each_value`] but nulls also reach `update`; used
    /// by the skip-val helpers which test the sentinel themselves.
    fn for_each_value_with_nulls<F>(&mut self, arg: &ExprRef, update: F) -> Result<()>
    where
        F: Fn(&mut Self, &CgValue) -> Result<()>,
    {
        if let Expr::UOper(u) = arg.as_ref() {
            if u.op == OpType::Unnest {
                return self.unnest_loop(&u.operand, update);
            }
        }
        let value = self.cg.codegen(arg)?;
        update(self, &value)
    }

    /// Per-element loop over an array argument, driven by the array's
    /// element count.
    fn unnest_loop<F>(&mut self, array: &ExprRef, update: F) -> Result<()>
    where
        F: Fn(&mut Self, &CgValue) -> Result<()>,
    {
        let elem_ty = array
            .ty()
            .elem_type()
            .ok_or_else(|| CodegenError::NotSupported("UNNEST of a non-array".into()))?;
        if !elem_ty.is_integer_like() {
            return Err(CodegenError::NotSupported(format!(
                "UNNEST over array of {elem_ty}"
            )));
        }
        let arr = self.cg.codegen(array)?;
        let elem_size = elem_ty.size();
        let b = self.cg.b();
        let ptr = b.extract_value(arr.v, 1);
        let len = b.extract_value(arr.v, 2);
        let is_null = b.icmp(ICmpPred::Slt, IrType::I64, len, Operand::i64(0));
        let count = b.binop(IrType::I64, BinOp::SDiv, len, Operand::i64(elem_size as i64));
        let count = b.select(IrType::I64, is_null, Operand::i64(0), count);
        let entry_end: BlockId = b.current_block();
        let head = b.new_block("unnest_head");
        let body = b.new_block("unnest_body");
        let exit = b.new_block("unnest_exit");
        b.br(head);
        b.position_at_end(head);
        let idx = b.phi(IrType::I64);
        b.add_incoming(idx, Operand::i64(0), entry_end);
        let more = b.icmp(ICmpPred::Slt, IrType::I64, idx, count);
        b.cond_br(more, body, exit);
        b.position_at_end(body);
        let elem_ptr = b.gep(ptr, idx, elem_size);
        let raw = b.load(IrType::int_of_size(elem_size), elem_ptr);
        let widened = b.cast(
            basalt_llir::CastOp::SExt,
            raw,
            IrType::int_of_size(elem_size),
            IrType::I64,
        );
        let elem_val = CgValue::new(widened, elem_ty.with_nullable(true));
        // skip null elements
        let elem_null = self.cg.codegen_is_null(&elem_val);
        let do_update = self.cg.b().new_block("unnest_update");
        let next = self.cg.b().new_block("unnest_next");
        self.cg.b().cond_br(elem_null, next, do_update);
        self.cg.b().position_at_end(do_update);
        update(self, &elem_val)?;
        self.cg.b().br(next);
        self.cg.b().position_at_end(next);
        let bumped = self
            .cg
            .b()
            .binop(IrType::I64, BinOp::Add, idx, Operand::i64(1));
        let next_end = self.cg.b().current_block();
        self.cg.b().br(head);
        self.cg.b().add_incoming(idx, bumped, next_end);
        self.cg.b().position_at_end(exit);
        Ok(())
    }
}
