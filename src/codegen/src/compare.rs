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

//! Comparison lowering.

use basalt_common::types::{TypeContext, NULL_BOOLEAN};
use basalt_expr::expr::BinOper;
use basalt_expr::ops::{OpType, Qualifier};
use basalt_llir::{BinOp, CastOp, FCmpPred, ICmpPred, IrType, Operand};

use crate::codegen::{CgValue, CodeGenerator};
use crate::error::{CodegenError, Result};

pub(crate) fn llvm_icmp_pred(op: OpType) -> ICmpPred {
    match op {
        OpType::Eq | OpType::BwEq => ICmpPred::Eq,
        OpType::Ne => ICmpPred::Ne,
        OpType::Lt => ICmpPred::Slt,
        OpType::Le => ICmpPred::Sle,
        OpType::Gt => ICmpPred::Sgt,
        OpType::Ge => ICmpPred::Sge,
        _ => panic!("{op} is not a comparison"),
    }
}

pub(crate) fn llvm_fcmp_pred(op: OpType) -> FCmpPred {
    match op {
        OpType::Eq | OpType::BwEq => FCmpPred::OEq,
        OpType::Ne => FCmpPred::ONe,
        OpType::Lt => FCmpPred::OLt,
        OpType::Le => FCmpPred::OLe,
        OpType::Gt => FCmpPred::OGt,
        OpType::Ge => FCmpPred::OGe,
        _ => panic!("{op} is not a comparison"),
    }
}

fn cmp_helper_prefix(op: OpType) -> &'static str {
    match op {
        OpType::Eq => "eq",
        OpType::Ne => "ne",
        OpType::Lt => "lt",
        OpType::Le => "le",
        OpType::Gt => "gt",
        OpType::Ge => "ge",
        _ => panic!("{op} is not a comparison"),
    }
}

fn string_helper(op: OpType) -> &'static str {
    match op {
        OpType::Eq => "string_eq",
        OpType::Ne => "string_ne",
        OpType::Lt => "string_lt",
        OpType::Le => "string_le",
        OpType::Gt => "string_gt",
        OpType::Ge => "string_ge",
        _ => panic!("{op} is not a string comparison"),
    }
}

impl CodeGenerator<'_> {
    pub(crate) fn codegen_cmp(&mut self, bin: &BinOper) -> Result<CgValue> {
        if bin.qualifier != Qualifier::One {
            return self.codegen_qualifier_cmp(bin.op, bin.qualifier, &bin.lhs, &bin.rhs, bin.ty);
        }
        if bin.op == OpType::BwEq {
            return self.codegen_bw_eq(bin);
        }
        let lhs_ty = bin.lhs.ty();
        if lhs_ty.is_string() {
            return self.codegen_str_cmp(bin);
        }
        let lhs = self.codegen(&bin.lhs)?;
        let rhs = self.codegen(&bin.rhs)?;
        let nullable = lhs.ty.nullable() || rhs.ty.nullable();
        if !nullable {
            let b = self.b();
            let i1 = if lhs.ty.is_fp() {
                b.fcmp(llvm_fcmp_pred(bin.op), IrType::F64, lhs.v, rhs.v)
            } else {
                b.icmp(llvm_icmp_pred(bin.op), IrType::I64, lhs.v, rhs.v)
            };
            let v = b.cast(CastOp::ZExt, i1, IrType::I1, IrType::I8);
            return Ok(CgValue::new(v, bin.ty));
        }
        let (helper, null_op) = if lhs.ty.is_fp() {
            (
                format!("{}_double_nullable", cmp_helper_prefix(bin.op)),
                Operand::f64(f64::NAN),
            )
        } else {
            (
                format!("{}_int64_nullable", cmp_helper_prefix(bin.op)),
                self.null_operand(lhs.ty),
            )
        };
        let v = self.cgen_state.emit_call(
            &helper,
            IrType::I8,
            vec![lhs.v, rhs.v, null_op, Operand::i64(NULL_BOOLEAN as i64)],
        );
        Ok(CgValue::new(v, bin.ty))
    }

    /// `IS NOT DISTINCT FROM`: `(a = b) OR (a IS NULL AND b IS NULL)`.
    fn codegen_bw_eq(&mut self, bin: &BinOper) -> Result<CgValue> {
        let lhs = self.codegen(&bin.lhs)?;
        let rhs = self.codegen(&bin.rhs)?;
        let b = self.b();
        let eq = if lhs.ty.is_fp() {
            b.fcmp(FCmpPred::OEq, IrType::F64, lhs.v, rhs.v)
        } else {
            b.icmp(ICmpPred::Eq, IrType::I64, lhs.v, rhs.v)
        };
        let lhs_null = self.codegen_is_null(&lhs);
        let rhs_null = self.codegen_is_null(&rhs);
        let b = self.b();
        let both_null = b.binop(IrType::I1, BinOp::And, lhs_null, rhs_null);
        let either = b.binop(IrType::I1, BinOp::Or, eq, both_null);
        // NULL = NULL compares equal under icmp on sentinels too, but only
        // when both sides are null; a single null side must not match
        let one_null = b.binop(IrType::I1, BinOp::Xor, lhs_null, rhs_null);
        let not_one_null = b.binop(IrType::I1, BinOp::Xor, one_null, Operand::i1(true));
        let matched = b.binop(IrType::I1, BinOp::And, either, not_one_null);
        let v = b.cast(CastOp::ZExt, matched, IrType::I1, IrType::I8);
        Ok(CgValue::new(v, bin.ty))
    }

    /// String comparison: identical dictionaries compare ids directly;
    /// plain text goes through the `string_<op>` helpers.
    fn codegen_str_cmp(&mut self, bin: &BinOper) -> Result<CgValue> {
        let lhs_ty = bin.lhs.ty();
        let rhs_ty = bin.rhs.ty();
        if lhs_ty.is_ext_dictionary() && rhs_ty.is_ext_dictionary() {
            if lhs_ty.dict_id() != rhs_ty.dict_id() {
                return Err(CodegenError::NotSupported(
                    "comparison across different string dictionaries".into(),
                ));
            }
            if !bin.op.is_equivalence() && bin.op != OpType::Ne {
                return Err(CodegenError::NotSupported(
                    "ordering comparison on dictionary ids".into(),
                ));
            }
            let lhs = self.codegen(&bin.lhs)?;
            let rhs = self.codegen(&bin.rhs)?;
            let nullable = lhs.ty.nullable() || rhs.ty.nullable();
            if !nullable {
                let b = self.b();
                let i1 = b.icmp(llvm_icmp_pred(bin.op), IrType::I64, lhs.v, rhs.v);
                let v = b.cast(CastOp::ZExt, i1, IrType::I1, IrType::I8);
                return Ok(CgValue::new(v, bin.ty));
            }
            let null_op = self.null_operand(lhs.ty);
            let v = self.cgen_state.emit_call(
                &format!("{}_int64_nullable", cmp_helper_prefix(bin.op)),
                IrType::I8,
                vec![lhs.v, rhs.v, null_op, Operand::i64(NULL_BOOLEAN as i64)],
            );
            return Ok(CgValue::new(v, bin.ty));
        }
        if lhs_ty.is_ext_dictionary() || rhs_ty.is_ext_dictionary() {
            return Err(CodegenError::NotSupported(
                "mixed dictionary/plain string comparison must be normalized first".into(),
            ));
        }
        let lhs = self.codegen(&bin.lhs)?;
        let rhs = self.codegen(&bin.rhs)?;
        let lhs_null = self.codegen_is_null(&lhs);
        let rhs_null = self.codegen_is_null(&rhs);
        let b = self.b();
        let any_null = b.binop(IrType::I1, BinOp::Or, lhs_null, rhs_null);
        let lhs_ptr = b.extract_value(lhs.v, 1);
        let lhs_len = b.extract_value(lhs.v, 2);
        let rhs_ptr = b.extract_value(rhs.v, 1);
        let rhs_len = b.extract_value(rhs.v, 2);
        let cmp = self.cgen_state.emit_call(
            string_helper(bin.op),
            IrType::I8,
            vec![lhs_ptr, lhs_len, rhs_ptr, rhs_len],
        );
        let b = self.b();
        let v = b.select(
            IrType::I8,
            any_null,
            Operand::i64(NULL_BOOLEAN as i64),
            cmp,
        );
        Ok(CgValue::new(v, bin.ty))
    }

    /// Equality over a key tuple: the conjunction of per-column
    /// equalities, used by multi-column hash join conditions.
    pub fn codegen_tuple_eq(&mut self, pairs: &[(CgValue, CgValue)]) -> Result<CgValue> {
        let mut acc: Option<Operand> = None;
        for (l, r) in pairs {
            let b = self.b();
            let eq = if l.ty.is_fp() {
                b.fcmp(FCmpPred::OEq, IrType::F64, l.v, r.v)
            } else {
                b.icmp(ICmpPred::Eq, IrType::I64, l.v, r.v)
            };
            acc = Some(match acc {
                None => eq,
                Some(prev) => self.b().binop(IrType::I1, BinOp::And, prev, eq),
            });
        }
        let all = acc.ok_or_else(|| CodegenError::NotSupported("empty key tuple".into()))?;
        let b = self.b();
        let v = b.cast(CastOp::ZExt, all, IrType::I1, IrType::I8);
        Ok(CgValue::new(v, TypeContext::global().boolean(false)))
    }
}
