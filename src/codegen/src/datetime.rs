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

//! EXTRACT, DATE_ADD, DATEDIFF and DATE_TRUNC lowering. High-precision
//! timestamps scale to seconds before the helper call; the sub-second
//! fields are computed inline from the tick remainder.

use basalt_common::types::{TypeContext, TypeRef};
use basalt_expr::expr::{DateAddExpr, DateDiffExpr, DateTruncExpr, ExtractExpr};
use basalt_expr::ops::ExtractField;
use basalt_llir::{BinOp, IrType, Operand};

use crate::codegen::{CgValue, CodeGenerator};
use crate::error::Result;

fn ticks_of(ty: TypeRef) -> i64 {
    ty.time_unit().map_or(1, |u| u.ticks_per_second())
}

impl CodeGenerator<'_> {
    fn scale_to_seconds(&mut self, v: Operand, ticks: i64) -> Operand {
        if ticks == 1 {
            return v;
        }
        self.cgen_state
            .emit_call("floor_div", IrType::I64, vec![v, Operand::i64(ticks)])
    }

    pub(crate) fn codegen_extract(&mut self, e: &ExtractExpr) -> Result<CgValue> {
        let from = self.codegen(&e.from)?;
        let ticks = ticks_of(from.ty);
        let result_ty = TypeContext::global().int64(from.ty.nullable());
        let operand = CgValue::new(from.v, from.ty);
        self.wrap_datetime_nullable(&operand, result_ty, |cg, v| {
            // sub-second fields read the tick remainder directly
            let sub_second = matches!(
                e.field,
                ExtractField::Milli | ExtractField::Micro | ExtractField::Nano
            );
            if sub_second {
                let per_second = match e.field {
                    ExtractField::Milli => 1_000,
                    ExtractField::Micro => 1_000_000,
                    _ => 1_000_000_000,
                };
                if ticks == 1 {
                    return Ok(Operand::i64(0));
                }
                let b = cg.b();
                let rem = b.binop(IrType::I64, BinOp::SRem, v, Operand::i64(ticks));
                let scaled = if per_second >= ticks {
                    let factor = per_second / ticks;
                    cg.b()
                        .binop(IrType::I64, BinOp::Mul, rem, Operand::i64(factor))
                } else {
                    let factor = ticks / per_second;
                    cg.b()
                        .binop(IrType::I64, BinOp::SDiv, rem, Operand::i64(factor))
                };
                return Ok(scaled);
            }
            let secs = cg.scale_to_seconds(v, ticks);
            Ok(cg.cgen_state.emit_call(
                &format!("extract_{}", e.field),
                IrType::I64,
                vec![secs],
            ))
        })
    }

    pub(crate) fn codegen_date_add(&mut self, d: &DateAddExpr) -> Result<CgValue> {
        let datetime = self.codegen(&d.datetime)?;
        let number = self.codegen(&d.number)?;
        let ticks = ticks_of(datetime.ty);
        let result_ty = d.ty;
        self.wrap_datetime_nullable(&datetime, result_ty, |cg, v| {
            let secs = cg.scale_to_seconds(v, ticks);
            let added = cg.cgen_state.emit_call(
                &format!("date_add_{}", d.field),
                IrType::I64,
                vec![secs, number.v],
            );
            if ticks == 1 {
                return Ok(added);
            }
            // restore the sub-second part lost to the downscale
            let b = cg.b();
            let up = b.binop(IrType::I64, BinOp::Mul, added, Operand::i64(ticks));
            let rem = b.binop(IrType::I64, BinOp::SRem, v, Operand::i64(ticks));
            Ok(b.binop(IrType::I64, BinOp::Add, up, rem))
        })
    }

    pub(crate) fn codegen_date_diff(&mut self, d: &DateDiffExpr) -> Result<CgValue> {
        let start = self.codegen(&d.start)?;
        let end = self.codegen(&d.end)?;
        let start_secs = {
            let ticks = ticks_of(start.ty);
            self.scale_to_seconds(start.v, ticks)
        };
        let end_secs = {
            let ticks = ticks_of(end.ty);
            self.scale_to_seconds(end.v, ticks)
        };
        let v = self.cgen_state.emit_call(
            &format!("date_diff_{}", d.field),
            IrType::I64,
            vec![start_secs, end_secs],
        );
        let nullable = d.start.ty().nullable() || d.end.ty().nullable();
        Ok(CgValue::new(v, TypeContext::global().int64(nullable)))
    }

    pub(crate) fn codegen_date_trunc(&mut self, d: &DateTruncExpr) -> Result<CgValue> {
        let from = self.codegen(&d.from)?;
        let ticks = ticks_of(from.ty);
        let result_ty = d.ty;
        self.wrap_datetime_nullable(&from, result_ty, |cg, v| {
            use basalt_expr::ops::DateTruncField;
            // sub-second truncation clears the remainder below the field
            let sub_second_ticks = match d.field {
                DateTruncField::Milli => Some(1_000),
                DateTruncField::Micro => Some(1_000_000),
                DateTruncField::Nano => Some(1_000_000_000),
                _ => None,
            };
            if let Some(per_second) = sub_second_ticks {
                if ticks <= per_second {
                    return Ok(v);
                }
                let factor = ticks / per_second;
                let b = cg.b();
                let rem = b.binop(IrType::I64, BinOp::SRem, v, Operand::i64(factor));
                return Ok(b.binop(IrType::I64, BinOp::Sub, v, rem));
            }
            let secs = cg.scale_to_seconds(v, ticks);
            let truncated = cg.cgen_state.emit_call(
                &format!("date_trunc_{}", d.field),
                IrType::I64,
                vec![secs],
            );
            if ticks == 1 {
                return Ok(truncated);
            }
            Ok(cg
                .b()
                .binop(IrType::I64, BinOp::Mul, truncated, Operand::i64(ticks)))
        })
    }

    /// Null diamond specialized for the datetime family: NULL in, NULL
    /// sentinel out.
    fn wrap_datetime_nullable<F>(
        &mut self,
        operand: &CgValue,
        result_ty: TypeRef,
        body: F,
    ) -> Result<CgValue>
    where
        F: FnOnce(&mut Self, Operand) -> Result<Operand>,
    {
        if !operand.ty.nullable() {
            let v = body(self, operand.v)?;
            return Ok(CgValue::new(v, result_ty));
        }
        let is_null = self.codegen_is_null(operand);
        let conv_bb = self.b().new_block("dt_body");
        let merge_bb = self.b().new_block("dt_merge");
        let from_null = self.b().current_block();
        self.b().cond_br(is_null, merge_bb, conv_bb);
        self.b().position_at_end(conv_bb);
        let converted = body(self, operand.v)?;
        let from_conv = self.b().current_block();
        self.b().br(merge_bb);
        self.b().position_at_end(merge_bb);
        let sentinel = self.null_operand(result_ty);
        let b = self.b();
        let phi = b.phi(IrType::I64);
        b.add_incoming(phi, sentinel, from_null);
        b.add_incoming(phi, converted, from_conv);
        Ok(CgValue::new(phi, result_ty))
    }
}
