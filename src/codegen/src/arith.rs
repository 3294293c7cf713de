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

//! Arithmetic lowering with runtime overflow guards.
//!
//! Integer add/sub/mul are overflow-checked: on CPU through the
//! `*.with.overflow` intrinsic shapes, on GPU through explicit
//! comparisons. Nullable operands short-circuit the check and evaluate
//! through the `_nullable` helper, which propagates the sentinel.

use basalt_common::config::DivByZeroPolicy;
use basalt_common::error::{ERR_DIV_BY_ZERO, ERR_OVERFLOW_OR_UNDERFLOW};
use basalt_common::types::TypeRef;
use basalt_expr::expr::{BinOper, Expr, UOper};
use basalt_expr::ops::OpType;
use basalt_llir::{BinOp, BlockId, CheckedOp, ICmpPred, IrType, Operand};

use crate::codegen::{CgValue, CodeGenerator};
use crate::error::{CodegenError, Result};
use crate::options::DeviceType;

fn ir_int_type(ty: TypeRef) -> IrType {
    IrType::int_of_size(ty.size().clamp(1, 8))
}

fn int_bounds(ty: TypeRef) -> (i64, i64) {
    match ty.size() {
        1 => (i8::MIN as i64, i8::MAX as i64),
        2 => (i16::MIN as i64, i16::MAX as i64),
        4 => (i32::MIN as i64, i32::MAX as i64),
        _ => (i64::MIN, i64::MAX),
    }
}

fn exp_to_scale(scale: u8) -> i64 {
    10i64.pow(scale as u32)
}

impl CodeGenerator<'_> {
    pub(crate) fn codegen_arith(&mut self, bin: &BinOper) -> Result<CgValue> {
        let ty = bin.ty;
        if ty.is_fp() {
            return self.codegen_fp_arith(bin);
        }
        match bin.op {
            OpType::Plus => self.codegen_checked_arith(bin, CheckedOp::SAdd, "add"),
            OpType::Minus => self.codegen_checked_arith(bin, CheckedOp::SSub, "sub"),
            OpType::Mul => self.codegen_checked_arith(bin, CheckedOp::SMul, "mul"),
            OpType::Div => self.codegen_div_entry(bin),
            OpType::Mod => self.codegen_mod(bin),
            other => Err(CodegenError::NotSupported(format!(
                "arithmetic operator {other}"
            ))),
        }
    }

    fn codegen_fp_arith(&mut self, bin: &BinOper) -> Result<CgValue> {
        let lhs = self.codegen(&bin.lhs)?;
        let rhs = self.codegen(&bin.rhs)?;
        let op = match bin.op {
            OpType::Plus => BinOp::FAdd,
            OpType::Minus => BinOp::FSub,
            OpType::Mul => BinOp::FMul,
            OpType::Div => return self.codegen_div(bin.ty, lhs, rhs),
            other => {
                return Err(CodegenError::NotSupported(format!(
                    "floating-point {other}"
                )))
            }
        };
        // NaN is the fp null sentinel and propagates through the op
        let b = self.b();
        let v = b.binop(IrType::F64, op, lhs.v, rhs.v);
        Ok(CgValue::new(v, bin.ty))
    }

    /// Overflow-checked integer add/sub/mul, with the decimal downscale
    /// after multiplication.
    fn codegen_checked_arith(
        &mut self,
        bin: &BinOper,
        op: CheckedOp,
        name: &str,
    ) -> Result<CgValue> {
        let ty = bin.ty;
        let lhs = self.codegen(&bin.lhs)?;
        let rhs = self.codegen(&bin.rhs)?;
        let nullable = ty.nullable();
        let result = if !nullable {
            let v = self.emit_overflow_checked_op(op, name, lhs.v, rhs.v, ty)?;
            CgValue::new(v, ty)
        } else {
            // either operand NULL skips the overflow check entirely
            let lhs_null = self.codegen_is_null(&lhs);
            let rhs_null = self.codegen_is_null(&rhs);
            let any_null = self
                .b()
                .binop(IrType::I1, BinOp::Or, lhs_null, rhs_null);
            let op_bb = self.b().new_block(format!("{name}_op"));
            let check_bb = self.b().new_block(format!("{name}_check"));
            self.b().cond_br(any_null, op_bb, check_bb);
            self.b().position_at_end(check_bb);
            self.emit_overflow_guard_only(op, name, lhs.v, rhs.v, ty)?;
            self.b().br(op_bb);
            self.b().position_at_end(op_bb);
            let null_op = self.null_operand(ty);
            let v = self.cgen_state.emit_call(
                &format!("{name}_int64_nullable"),
                IrType::I64,
                vec![lhs.v, rhs.v, null_op],
            );
            CgValue::new(v, ty)
        };
        // decimal multiplication is downscaled back by 10^scale
        if bin.op == OpType::Mul && ty.is_decimal() {
            let scale = ty.scale().unwrap_or(0);
            if scale > 0 {
                let factor = Operand::i64(exp_to_scale(scale));
                let v = if nullable {
                    let null_op = self.null_operand(ty);
                    self.cgen_state.emit_call(
                        "div_int64_nullable",
                        IrType::I64,
                        vec![result.v, factor, null_op],
                    )
                } else {
                    self.b().binop(IrType::I64, BinOp::SDiv, result.v, factor)
                };
                return Ok(CgValue::new(v, ty));
            }
        }
        Ok(result)
    }

    /// The check-and-compute path for non-nullable operands: returns the
    /// operation result.
    fn emit_overflow_checked_op(
        &mut self,
        op: CheckedOp,
        name: &str,
        lhs: Operand,
        rhs: Operand,
        ty: TypeRef,
    ) -> Result<Operand> {
        if self.cgen_state.co.device_type == DeviceType::Cpu {
            let ir_ty = ir_int_type(ty);
            let b = self.b();
            let pair = b.checked(ir_ty, op, lhs, rhs);
            let carry = b.extract_value(pair, 1);
            self.cgen_state
                .ret_on_error(carry, ERR_OVERFLOW_OR_UNDERFLOW, name);
            Ok(self.b().extract_value(pair, 0))
        } else {
            self.emit_overflow_guard_only(op, name, lhs, rhs, ty)?;
            let bin_op = match op {
                CheckedOp::SAdd => BinOp::Add,
                CheckedOp::SSub => BinOp::Sub,
                CheckedOp::SMul => BinOp::Mul,
            };
            Ok(self.b().binop(ir_int_type(ty), bin_op, lhs, rhs))
        }
    }

    /// Emits only the guard (no result), used where a `_nullable` helper
    /// performs the operation afterwards.
    fn emit_overflow_guard_only(
        &mut self,
        op: CheckedOp,
        name: &str,
        lhs: Operand,
        rhs: Operand,
        ty: TypeRef,
    ) -> Result<()> {
        if self.cgen_state.co.device_type == DeviceType::Cpu {
            let ir_ty = ir_int_type(ty);
            let b = self.b();
            let pair = b.checked(ir_ty, op, lhs, rhs);
            let carry = b.extract_value(pair, 1);
            self.cgen_state
                .ret_on_error(carry, ERR_OVERFLOW_OR_UNDERFLOW, name);
            return Ok(());
        }
        // GPU: no overflow intrinsic; emit explicit comparisons
        let (min, max) = int_bounds(ty);
        let overflowed = match op {
            CheckedOp::SAdd => {
                // lhs > 0 && rhs > MAX - lhs, or lhs < 0 && rhs < MIN - lhs
                let b = self.b();
                let pos = b.icmp(ICmpPred::Sgt, IrType::I64, lhs, Operand::i64(0));
                let headroom = b.binop(IrType::I64, BinOp::Sub, Operand::i64(max), lhs);
                let above = b.icmp(ICmpPred::Sgt, IrType::I64, rhs, headroom);
                let ovf = b.binop(IrType::I1, BinOp::And, pos, above);
                let neg = b.icmp(ICmpPred::Slt, IrType::I64, lhs, Operand::i64(0));
                let floor = b.binop(IrType::I64, BinOp::Sub, Operand::i64(min), lhs);
                let below = b.icmp(ICmpPred::Slt, IrType::I64, rhs, floor);
                let unf = b.binop(IrType::I1, BinOp::And, neg, below);
                b.binop(IrType::I1, BinOp::Or, ovf, unf)
            }
            CheckedOp::SSub => {
                // symmetric to addition
                let b = self.b();
                let neg = b.icmp(ICmpPred::Slt, IrType::I64, rhs, Operand::i64(0));
                let headroom = b.binop(IrType::I64, BinOp::Add, Operand::i64(max), rhs);
                let above = b.icmp(ICmpPred::Sgt, IrType::I64, lhs, headroom);
                let ovf = b.binop(IrType::I1, BinOp::And, neg, above);
                let pos = b.icmp(ICmpPred::Sgt, IrType::I64, rhs, Operand::i64(0));
                let floor = b.binop(IrType::I64, BinOp::Add, Operand::i64(min), rhs);
                let below = b.icmp(ICmpPred::Slt, IrType::I64, lhs, floor);
                let unf = b.binop(IrType::I1, BinOp::And, pos, below);
                b.binop(IrType::I1, BinOp::Or, ovf, unf)
            }
            CheckedOp::SMul => {
                // sign-split unsigned comparison against MAX/|rhs|, with
                // (MAX+1)/|rhs| when the signs differ
                let b = self.b();
                let zero = Operand::i64(0);
                let r_zero = b.icmp(ICmpPred::Eq, IrType::I64, rhs, zero);
                let l_neg = b.icmp(ICmpPred::Slt, IrType::I64, lhs, zero);
                let r_neg = b.icmp(ICmpPred::Slt, IrType::I64, rhs, zero);
                let neg_l = b.binop(IrType::I64, BinOp::Sub, zero, lhs);
                let neg_r = b.binop(IrType::I64, BinOp::Sub, zero, rhs);
                let abs_l = b.select(IrType::I64, l_neg, neg_l, lhs);
                let abs_r = b.select(IrType::I64, r_neg, neg_r, rhs);
                let same_sign = b.icmp(ICmpPred::Eq, IrType::I1, l_neg, r_neg);
                let safe_r = b.select(IrType::I64, r_zero, Operand::i64(1), abs_r);
                let lim = b.binop(IrType::I64, BinOp::SDiv, Operand::i64(max), safe_r);
                let lim_plus = b.binop(IrType::I64, BinOp::Add, lim, Operand::i64(1));
                let lim = b.select(IrType::I64, same_sign, lim, lim_plus);
                let over = b.icmp(ICmpPred::Ugt, IrType::I64, abs_l, lim);
                let not_zero = b.binop(IrType::I1, BinOp::Xor, r_zero, Operand::i1(true));
                b.binop(IrType::I1, BinOp::And, over, not_zero)
            }
        };
        self.cgen_state
            .ret_on_error(overflowed, ERR_OVERFLOW_OR_UNDERFLOW, name);
        Ok(())
    }

    // ---- division ----

    fn codegen_div_entry(&mut self, bin: &BinOper) -> Result<CgValue> {
        let ty = bin.ty;
        if ty.is_decimal() {
            return self.codegen_decimal_div(bin);
        }
        let lhs = self.codegen(&bin.lhs)?;
        let rhs = self.codegen(&bin.rhs)?;
        self.codegen_div(ty, lhs, rhs)
    }

    /// Decimal division upscales the dividend by `10^scale` first, with an
    /// overflow guard. When the divisor is a scaled integer constant
    /// divisible by `10^scale`, the operation runs at the lower scale
    /// instead to avoid the overflow risk.
    fn codegen_decimal_div(&mut self, bin: &BinOper) -> Result<CgValue> {
        let ty = bin.ty;
        let scale = ty.scale().unwrap_or(0);
        let factor = exp_to_scale(scale);
        if let Expr::Constant(c) = bin.rhs.as_ref() {
            if !c.is_null {
                if let Some(raw) = c.value.as_int() {
                    if raw != 0 && raw % factor == 0 {
                        let lhs = self.codegen(&bin.lhs)?;
                        let rhs = CgValue::new(Operand::i64(raw / factor), ty);
                        return self.codegen_div(ty, lhs, rhs);
                    }
                }
            }
        }
        let lhs = self.codegen(&bin.lhs)?;
        let rhs = self.codegen(&bin.rhs)?;
        // guard: lhs must stay below MAX / 10^scale before upscaling
        let lhs_max = i64::MAX / factor;
        let nullable = ty.nullable();
        let upscaled = if nullable {
            let lhs_null = self.codegen_is_null(&lhs);
            let ok_bb = self.b().new_block("decimal_div_check");
            let op_bb = self.b().new_block("decimal_div_ok");
            self.b().cond_br(lhs_null, op_bb, ok_bb);
            self.b().position_at_end(ok_bb);
            let over = self
                .b()
                .icmp(ICmpPred::Sgt, IrType::I64, lhs.v, Operand::i64(lhs_max));
            self.cgen_state
                .ret_on_error(over, ERR_OVERFLOW_OR_UNDERFLOW, "decimal_div");
            self.b().br(op_bb);
            self.b().position_at_end(op_bb);
            let null_op = self.null_operand(ty);
            self.cgen_state.emit_call(
                "mul_int64_nullable",
                IrType::I64,
                vec![lhs.v, Operand::i64(factor), null_op],
            )
        } else {
            let over = self
                .b()
                .icmp(ICmpPred::Sgt, IrType::I64, lhs.v, Operand::i64(lhs_max));
            self.cgen_state
                .ret_on_error(over, ERR_OVERFLOW_OR_UNDERFLOW, "decimal_div");
            self.b()
                .binop(IrType::I64, BinOp::Mul, lhs.v, Operand::i64(factor))
        };
        self.codegen_div(ty, CgValue::new(upscaled, ty), rhs)
    }

    pub(crate) fn codegen_div(&mut self, ty: TypeRef, lhs: CgValue, rhs: CgValue) -> Result<CgValue> {
        let policy = self
            .cgen_state
            .config
            .exec
            .codegen
            .div_by_zero_policy(ty.is_fp());
        match policy {
            DivByZeroPolicy::Inf => {
                debug_assert!(ty.is_fp());
                let v = self.cgen_state.emit_call(
                    "safe_inf_div_double",
                    IrType::F64,
                    vec![
                        lhs.v,
                        rhs.v,
                        Operand::f64(f64::INFINITY),
                        Operand::f64(f64::NAN),
                    ],
                );
                Ok(CgValue::new(v, ty))
            }
            DivByZeroPolicy::Null => {
                let (helper, ret, null_op) = if ty.is_fp() {
                    ("safe_div_double", IrType::F64, Operand::f64(f64::NAN))
                } else {
                    ("safe_div_int64", IrType::I64, self.null_operand(ty))
                };
                let v = self
                    .cgen_state
                    .emit_call(helper, ret, vec![lhs.v, rhs.v, null_op]);
                Ok(CgValue::new(v, ty))
            }
            DivByZeroPolicy::Error => {
                self.codegen_div_with_zero_check(ty, lhs, rhs, false)
            }
        }
    }

    fn codegen_div_with_zero_check(
        &mut self,
        ty: TypeRef,
        lhs: CgValue,
        rhs: CgValue,
        is_mod: bool,
    ) -> Result<CgValue> {
        let name = if is_mod { "mod" } else { "div" };
        let nullable = ty.nullable();
        let op_bb = self.b().new_block(format!("{name}_ok"));
        let mut skip_from: Option<BlockId> = None;
        if nullable {
            // NULL operands bypass the zero check; the helper returns NULL
            let lhs_null = self.codegen_is_null(&lhs);
            let rhs_null = self.codegen_is_null(&rhs);
            let any_null = self.b().binop(IrType::I1, BinOp::Or, lhs_null, rhs_null);
            let check_bb = self.b().new_block(format!("{name}_zero_check"));
            self.b().cond_br(any_null, op_bb, check_bb);
            skip_from = Some(self.b().current_block());
            self.b().position_at_end(check_bb);
        }
        let zero_cond = if ty.is_fp() {
            let b = self.b();
            b.fcmp(basalt_llir::FCmpPred::OEq, IrType::F64, rhs.v, Operand::f64(0.0))
        } else {
            let b = self.b();
            b.icmp(ICmpPred::Eq, IrType::I64, rhs.v, Operand::i64(0))
        };
        self.cgen_state.ret_on_error(zero_cond, ERR_DIV_BY_ZERO, name);
        self.b().br(op_bb);
        self.b().position_at_end(op_bb);
        let _ = skip_from;
        let v = if nullable {
            let (helper, ret, null_op) = if ty.is_fp() {
                (
                    format!("{name}_double_nullable"),
                    IrType::F64,
                    Operand::f64(f64::NAN),
                )
            } else {
                (
                    format!("{name}_int64_nullable"),
                    IrType::I64,
                    self.null_operand(ty),
                )
            };
            self.cgen_state
                .emit_call(&helper, ret, vec![lhs.v, rhs.v, null_op])
        } else if ty.is_fp() {
            self.b().binop(IrType::F64, BinOp::FDiv, lhs.v, rhs.v)
        } else {
            let op = if is_mod { BinOp::SRem } else { BinOp::SDiv };
            self.b().binop(IrType::I64, op, lhs.v, rhs.v)
        };
        Ok(CgValue::new(v, ty))
    }

    fn codegen_mod(&mut self, bin: &BinOper) -> Result<CgValue> {
        let ty = bin.ty;
        if !ty.is_exact_numeric() {
            return Err(CodegenError::NotSupported("MOD of a non-integer".into()));
        }
        let lhs = self.codegen(&bin.lhs)?;
        let rhs = self.codegen(&bin.rhs)?;
        self.codegen_div_with_zero_check(ty, lhs, rhs, true)
    }

    // ---- unary minus ----

    pub(crate) fn codegen_uminus(&mut self, u: &UOper) -> Result<CgValue> {
        let ty = u.ty;
        let operand = self.codegen(&u.operand)?;
        if ty.is_fp() {
            let b = self.b();
            let v = b.binop(IrType::F64, BinOp::FSub, Operand::f64(0.0), operand.v);
            return Ok(CgValue::new(v, ty));
        }
        let (min, _) = int_bounds(ty);
        if !ty.nullable() {
            let is_min = self
                .b()
                .icmp(ICmpPred::Eq, IrType::I64, operand.v, Operand::i64(min));
            self.cgen_state
                .ret_on_error(is_min, ERR_OVERFLOW_OR_UNDERFLOW, "uminus");
            let b = self.b();
            let v = b.binop(IrType::I64, BinOp::Sub, Operand::i64(0), operand.v);
            return Ok(CgValue::new(v, ty));
        }
        // the overflow trigger and the null sentinel share the MIN value;
        // the null test must run first
        let is_null = self.codegen_is_null(&operand);
        let ok_bb = self.b().new_block("uminus_check");
        let merge_bb = self.b().new_block("uminus_merge");
        let from_null = self.b().current_block();
        self.b().cond_br(is_null, merge_bb, ok_bb);
        self.b().position_at_end(ok_bb);
        let is_min = self
            .b()
            .icmp(ICmpPred::Eq, IrType::I64, operand.v, Operand::i64(min));
        self.cgen_state
            .ret_on_error(is_min, ERR_OVERFLOW_OR_UNDERFLOW, "uminus");
        let negated = self
            .b()
            .binop(IrType::I64, BinOp::Sub, Operand::i64(0), operand.v);
        let from_ok = self.b().current_block();
        self.b().br(merge_bb);
        self.b().position_at_end(merge_bb);
        let sentinel = self.null_operand(ty);
        let b = self.b();
        let phi = b.phi(IrType::I64);
        b.add_incoming(phi, sentinel, from_null);
        b.add_incoming(phi, negated, from_ok);
        Ok(CgValue::new(phi, ty))
    }
}
