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

//! The cast matrix.

use basalt_common::error::ERR_OVERFLOW_OR_UNDERFLOW;
use basalt_common::types::{Type, TypeRef};
use basalt_expr::expr::UOper;
use basalt_llir::{BinOp, BlockId, CastOp, ICmpPred, IrType, Operand};

use crate::codegen::{CgValue, CodeGenerator};
use crate::error::{CodegenError, Result};

fn int_bounds_of_width(size: usize) -> (i64, i64) {
    match size {
        1 => (i8::MIN as i64 + 1, i8::MAX as i64),
        2 => (i16::MIN as i64 + 1, i16::MAX as i64),
        4 => (i32::MIN as i64 + 1, i32::MAX as i64),
        _ => (i64::MIN + 1, i64::MAX),
    }
}

impl CodeGenerator<'_> {
    pub(crate) fn codegen_cast(&mut self, u: &UOper) -> Result<CgValue> {
        let operand = self.codegen(&u.operand)?;
        let from = operand.ty;
        let to = u.ty;
        if from == to {
            return Ok(operand);
        }
        // string <-> dictionary goes through the dictionary proxy
        if from.is_text() && to.is_ext_dictionary() {
            return self.codegen_compress(operand, to);
        }
        if from.is_ext_dictionary() && to.is_text() {
            return self.codegen_decompress(operand, to);
        }
        if from.is_fp() && to.is_fp() {
            // the widened representation is already f64
            return Ok(CgValue::new(operand.v, to));
        }
        if from.is_fp() && to.is_integer_like() {
            return self.codegen_cast_from_fp(operand, to);
        }
        if from.is_integer_like() && to.is_fp() {
            return self.codegen_cast_to_fp(operand, to);
        }
        if from.is_integer_like() && to.is_integer_like() {
            return self.codegen_cast_between_int_types(operand, to);
        }
        Err(CodegenError::NotSupported(format!(
            "cast from {from} to {to}"
        )))
    }

    /// Wraps a conversion in a null diamond: a NULL input maps straight to
    /// the target sentinel without running the conversion body.
    fn wrap_nullable<F>(&mut self, operand: &CgValue, to: TypeRef, body: F) -> Result<CgValue>
    where
        F: FnOnce(&mut Self, Operand) -> Result<Operand>,
    {
        if !operand.ty.nullable() {
            let v = body(self, operand.v)?;
            return Ok(CgValue::new(v, to));
        }
        let is_null = self.codegen_is_null(operand);
        let conv_bb = self.b().new_block("cast_conv");
        let merge_bb = self.b().new_block("cast_merge");
        let from_null = self.b().current_block();
        self.b().cond_br(is_null, merge_bb, conv_bb);
        self.b().position_at_end(conv_bb);
        let converted = body(self, operand.v)?;
        let from_conv = self.b().current_block();
        self.b().br(merge_bb);
        self.b().position_at_end(merge_bb);
        let sentinel = self.null_operand(to);
        let ir_ty = if to.is_fp() { IrType::F64 } else { IrType::I64 };
        let b = self.b();
        let phi = b.phi(ir_ty);
        b.add_incoming(phi, sentinel, from_null);
        b.add_incoming(phi, converted, from_conv);
        Ok(CgValue::new(phi, to))
    }

    /// Integer-like to integer-like: decimal rescale, datetime unit
    /// scaling, boolean conversions, and a range check when narrowing.
    fn codegen_cast_between_int_types(&mut self, operand: CgValue, to: TypeRef) -> Result<CgValue> {
        let from = operand.ty;
        self.wrap_nullable(&operand, to, |cg, v| {
            let mut v = v;
            // boolean target: the value collapses to 0/1
            if to.is_boolean() {
                let b = cg.b();
                let nz = b.icmp(ICmpPred::Ne, IrType::I64, v, Operand::i64(0));
                return Ok(b.cast(CastOp::ZExt, nz, IrType::I1, IrType::I64));
            }
            // decimal rescale
            let from_scale = from.scale().unwrap_or(0) as i32;
            let to_scale = to.scale().unwrap_or(0) as i32;
            if from_scale != to_scale {
                v = cg.rescale_checked(v, from_scale, to_scale, "cast_scale")?;
            }
            // datetime unit scaling
            if from.is_datetime() && to.is_datetime() {
                let from_ticks = datetime_ticks(from);
                let to_ticks = datetime_ticks(to);
                if from_ticks != to_ticks {
                    v = cg.retick_checked(v, from_ticks, to_ticks)?;
                }
                if to.is_date() && !from.is_date() {
                    // truncate to the containing day
                    let day =
                        Operand::i64(86_400 * to.time_unit().map_or(1, |u| u.ticks_per_second()));
                    let floored = cg
                        .cgen_state
                        .emit_call("floor_div", IrType::I64, vec![v, day]);
                    v = cg.b().binop(IrType::I64, BinOp::Mul, floored, day);
                }
            }
            // narrowing range check
            if narrowing(from, to) {
                let (min, max) = int_bounds_of_width(to.size());
                let b = cg.b();
                let too_small = b.icmp(ICmpPred::Slt, IrType::I64, v, Operand::i64(min));
                let too_big = b.icmp(ICmpPred::Sgt, IrType::I64, v, Operand::i64(max));
                let out = b.binop(IrType::I1, BinOp::Or, too_small, too_big);
                cg.cgen_state
                    .ret_on_error(out, ERR_OVERFLOW_OR_UNDERFLOW, "cast_narrow");
            }
            Ok(v)
        })
    }

    /// Decimal scale adjustment with an overflow guard on upscale.
    fn rescale_checked(
        &mut self,
        v: Operand,
        from_scale: i32,
        to_scale: i32,
        name: &str,
    ) -> Result<Operand> {
        if to_scale > from_scale {
            let factor = 10i64.pow((to_scale - from_scale) as u32);
            let limit = i64::MAX / factor;
            let b = self.b();
            let over = b.icmp(ICmpPred::Sgt, IrType::I64, v, Operand::i64(limit));
            let under = b.icmp(ICmpPred::Slt, IrType::I64, v, Operand::i64(-limit));
            let out = b.binop(IrType::I1, BinOp::Or, over, under);
            self.cgen_state
                .ret_on_error(out, ERR_OVERFLOW_OR_UNDERFLOW, name);
            Ok(self
                .b()
                .binop(IrType::I64, BinOp::Mul, v, Operand::i64(factor)))
        } else {
            let factor = 10i64.pow((from_scale - to_scale) as u32);
            Ok(self
                .b()
                .binop(IrType::I64, BinOp::SDiv, v, Operand::i64(factor)))
        }
    }

    /// Timestamp unit-ratio scaling, guarded against overflow when
    /// multiplying up to a finer unit.
    fn retick_checked(&mut self, v: Operand, from_ticks: i64, to_ticks: i64) -> Result<Operand> {
        if to_ticks > from_ticks {
            let factor = to_ticks / from_ticks;
            let limit = i64::MAX / factor;
            let b = self.b();
            let over = b.icmp(ICmpPred::Sgt, IrType::I64, v, Operand::i64(limit));
            let under = b.icmp(ICmpPred::Slt, IrType::I64, v, Operand::i64(-limit));
            let out = b.binop(IrType::I1, BinOp::Or, over, under);
            self.cgen_state
                .ret_on_error(out, ERR_OVERFLOW_OR_UNDERFLOW, "cast_ts_unit");
            Ok(self
                .b()
                .binop(IrType::I64, BinOp::Mul, v, Operand::i64(factor)))
        } else {
            let factor = from_ticks / to_ticks;
            Ok(self
                .cgen_state
                .emit_call("floor_div", IrType::I64, vec![v, Operand::i64(factor)]))
        }
    }

    fn codegen_cast_to_fp(&mut self, operand: CgValue, to: TypeRef) -> Result<CgValue> {
        let from = operand.ty;
        self.wrap_nullable(&operand, to, |cg, v| {
            let b = cg.b();
            let mut fp = b.cast(CastOp::SiToFp, v, IrType::I64, IrType::F64);
            if let Some(scale) = from.scale() {
                if scale > 0 {
                    let divisor = Operand::f64(10f64.powi(scale as i32));
                    fp = cg.b().binop(IrType::F64, BinOp::FDiv, fp, divisor);
                }
            }
            Ok(fp)
        })
    }

    fn codegen_cast_from_fp(&mut self, operand: CgValue, to: TypeRef) -> Result<CgValue> {
        // NaN input maps to the integer sentinel through the null wrapper
        self.wrap_nullable(&operand, to, |cg, v| {
            let mut fp = v;
            if let Some(scale) = to.scale() {
                if scale > 0 {
                    let factor = Operand::f64(10f64.powi(scale as i32));
                    fp = cg.b().binop(IrType::F64, BinOp::FMul, fp, factor);
                }
            }
            let (min, max) = int_bounds_of_width(to.size());
            let b = cg.b();
            let too_small = b.fcmp(
                basalt_llir::FCmpPred::OLt,
                IrType::F64,
                fp,
                Operand::f64(min as f64),
            );
            let too_big = b.fcmp(
                basalt_llir::FCmpPred::OGt,
                IrType::F64,
                fp,
                Operand::f64(max as f64),
            );
            let out = b.binop(IrType::I1, BinOp::Or, too_small, too_big);
            cg.cgen_state
                .ret_on_error(out, ERR_OVERFLOW_OR_UNDERFLOW, "cast_fp_int");
            Ok(cg.b().cast(CastOp::FpToSi, fp, IrType::F64, IrType::I64))
        })
    }

    fn codegen_compress(&mut self, operand: CgValue, to: TypeRef) -> Result<CgValue> {
        let Type::ExtDictionary { dict_id, .. } = to else {
            return Err(CodegenError::NotSupported("compress to a non-dictionary".into()));
        };
        let is_null = self.codegen_is_null(&operand);
        let conv_bb = self.b().new_block("compress");
        let merge_bb = self.b().new_block("compress_merge");
        let from_null: BlockId = self.b().current_block();
        self.b().cond_br(is_null, merge_bb, conv_bb);
        self.b().position_at_end(conv_bb);
        let b = self.b();
        let ptr = b.extract_value(operand.v, 1);
        let len = b.extract_value(operand.v, 2);
        let id = self.cgen_state.emit_call(
            "string_compress",
            IrType::I64,
            vec![ptr, len, Operand::i64(*dict_id as i64)],
        );
        let from_conv = self.b().current_block();
        self.b().br(merge_bb);
        self.b().position_at_end(merge_bb);
        let b = self.b();
        let phi = b.phi(IrType::I64);
        b.add_incoming(phi, Operand::i64(to.inline_null_value()), from_null);
        b.add_incoming(phi, id, from_conv);
        Ok(CgValue::new(phi, to))
    }

    fn codegen_decompress(&mut self, operand: CgValue, to: TypeRef) -> Result<CgValue> {
        let dict_id = operand
            .ty
            .dict_id()
            .ok_or_else(|| CodegenError::NotSupported("decompress of a plain string".into()))?;
        let v = self.cgen_state.emit_call(
            "string_decompress",
            IrType::StringView,
            vec![operand.v, Operand::i64(dict_id as i64)],
        );
        Ok(CgValue::new(v, to))
    }
}

fn datetime_ticks(ty: TypeRef) -> i64 {
    ty.time_unit().map_or(1, |u| u.ticks_per_second())
}

fn narrowing(from: TypeRef, to: TypeRef) -> bool {
    from.is_integer() && to.is_integer() && to.size() < from.size()
}
