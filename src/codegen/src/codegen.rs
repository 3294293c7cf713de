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

//! Scalar expression lowering.
//!
//! Values are carried in a widened representation: integer-like types as
//! `i64`, floating point as `f64`, booleans as `i8` with `-1` for NULL,
//! strings as a `{packed, ptr, len}` view. Null propagation goes through
//! the type's in-band sentinel.

use hashbrown::HashMap;

use basalt_common::datum::Datum;
use basalt_common::dictionary::DictionaryProviderRef;
use basalt_common::types::{Type, TypeContext, TypeRef, NULL_BOOLEAN};
use basalt_expr::expr::*;
use basalt_expr::ops::{OpType, Qualifier};
use basalt_expr::NodeId;
use basalt_llir::{BinOp, CastOp, Diamond, FCmpPred, FunctionBuilder, ICmpPred, IrType, Operand};

use crate::cgen_state::CgenState;
use crate::error::{CodegenError, Result};
use crate::in_values_bitmap::InValuesBitmap;
use crate::options::DeviceType;

/// One lowered scalar value.
#[derive(Debug, Clone, Copy)]
pub struct CgValue {
    pub v: Operand,
    pub ty: TypeRef,
}

impl CgValue {
    pub fn new(v: Operand, ty: TypeRef) -> CgValue {
        CgValue { v, ty }
    }
}

/// Compile-time description of one input column slot.
#[derive(Debug, Clone)]
pub struct InputColDesc {
    pub source: NodeId,
    pub index: usize,
    pub ty: TypeRef,
    /// Variable-length columns occupy two buffer slots: offsets then data.
    pub data_slot: usize,
}

/// Maps column references onto `col_buffers` slots.
#[derive(Debug, Clone, Default)]
pub struct FragmentBinding {
    pub cols: Vec<InputColDesc>,
    by_ref: HashMap<(NodeId, usize), usize>,
}

impl FragmentBinding {
    /// Registers a column of `source` and returns its slot.
    pub fn bind(&mut self, source: NodeId, index: usize, ty: TypeRef) -> usize {
        if let Some(slot) = self.by_ref.get(&(source, index)) {
            return *slot;
        }
        let varlen = ty.is_text() || ty.is_varlen_array();
        let slot = self.next_slot();
        let data_slot = if varlen { slot + 1 } else { slot };
        self.cols.push(InputColDesc {
            source,
            index,
            ty,
            data_slot,
        });
        self.by_ref.insert((source, index), slot);
        slot
    }

    fn next_slot(&self) -> usize {
        self.cols
            .last()
            .map(|c| c.data_slot + 1)
            .unwrap_or(0)
    }

    pub fn slot_of(&self, source: NodeId, index: usize) -> Option<usize> {
        self.by_ref.get(&(source, index)).copied()
    }

    /// Total number of buffer pointers the kernel receives.
    pub fn buffer_count(&self) -> usize {
        self.next_slot()
    }
}

/// Row position override for a join's build side: the inner row id
/// produced by the probe, plus the match flag of a left join.
#[derive(Debug, Clone, Copy)]
pub struct PosOverride {
    pub pos: Operand,
    pub matched: Option<Operand>,
}

/// Code generation for scalar expressions.
pub struct CodeGenerator<'a> {
    pub cgen_state: &'a mut CgenState,
    pub binding: &'a FragmentBinding,
    pub dict_provider: Option<DictionaryProviderRef>,
    /// Output buffers of precomputed window functions, keyed by the
    /// window expression; loads go through an ordinary column slot.
    pub window_slots: &'a HashMap<WindowFunction, usize>,
    /// Per-source row position overrides, set up by the join driver.
    pub pos_overrides: HashMap<NodeId, PosOverride>,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(
        cgen_state: &'a mut CgenState,
        binding: &'a FragmentBinding,
        dict_provider: Option<DictionaryProviderRef>,
        window_slots: &'a HashMap<WindowFunction, usize>,
    ) -> CodeGenerator<'a> {
        CodeGenerator {
            cgen_state,
            binding,
            dict_provider,
            window_slots,
            pos_overrides: HashMap::new(),
        }
    }

    pub fn b(&mut self) -> &mut FunctionBuilder {
        &mut self.cgen_state.row_func
    }

    /// Generates IR for `expr`, returning its widened value.
    pub fn codegen(&mut self, expr: &ExprRef) -> Result<CgValue> {
        match expr.as_ref() {
            Expr::Constant(c) => self.codegen_constant(c),
            Expr::ColumnRef(c) => self.codegen_column_ref(c.node, c.index, c.ty),
            Expr::ColumnVar(c) => Err(CodegenError::NotSupported(format!(
                "unresolved base column {} at codegen",
                c.col_info.name
            ))),
            Expr::Var(_) => Err(CodegenError::NotSupported(
                "targetlist variables outside aggregation".into(),
            )),
            Expr::UOper(u) => self.codegen_uoper(u),
            Expr::BinOper(b) => self.codegen_bin_oper(b),
            Expr::Case(c) => self.codegen_case(c),
            Expr::InValues(e) => self.codegen_in_values(e),
            Expr::InIntegerSet(e) => self.codegen_in_integer_set(e),
            Expr::Like(l) => self.codegen_like(l),
            Expr::Regexp(r) => self.codegen_regexp(r),
            Expr::CharLength(c) => self.codegen_char_length(c),
            Expr::KeyForString(k) => self.codegen_key_for_string(k),
            Expr::Lower(l) => self.codegen_lower(l),
            Expr::Cardinality(c) => self.codegen_cardinality(c),
            Expr::WidthBucket(w) => self.codegen_width_bucket(w),
            Expr::Extract(e) => self.codegen_extract(e),
            Expr::DateAdd(d) => self.codegen_date_add(d),
            Expr::DateDiff(d) => self.codegen_date_diff(d),
            Expr::DateTrunc(d) => self.codegen_date_trunc(d),
            Expr::SampleRatio(s) => self.codegen_sample_ratio(s),
            Expr::Likelihood(l) => self.codegen(&l.arg),
            Expr::OffsetInFragment(_) => Ok(CgValue::new(
                self.b().arg("pos"),
                TypeContext::global().int64(false),
            )),
            Expr::FunctionOper(f) => self.codegen_function_oper(f),
            Expr::Window(w) => self.codegen_window_load(w, expr.ty()),
            Expr::Agg(_) => Err(CodegenError::NotSupported(
                "aggregate outside a target position".into(),
            )),
            Expr::MakeArray(_) => Err(CodegenError::NotSupported(
                "array literals in generated code".into(),
            )),
            Expr::ScalarSubquery(_) | Expr::InSubquery(_) => Err(CodegenError::NotSupported(
                "subqueries must be pre-executed by the driver".into(),
            )),
        }
    }

    // ---- constants ----

    fn codegen_constant(&mut self, c: &Constant) -> Result<CgValue> {
        let ty = c.ty;
        if c.is_null {
            return Ok(CgValue::new(self.null_operand(ty), ty));
        }
        if ty.is_text() {
            return Err(CodegenError::NotSupported(
                "free-standing string literals must be dictionary-encoded".into(),
            ));
        }
        let encoded: Operand = match (&c.value, ty) {
            (Datum::Int(v), _) => Operand::i64(*v),
            (Datum::Bool(b), _) => Operand::i64(*b as i64),
            (Datum::Fp(v), _) => Operand::f64(*v),
            (Datum::Str(s), Type::ExtDictionary { dict_id, .. }) => {
                let provider = self.dict_provider.as_ref().ok_or_else(|| {
                    CodegenError::NotSupported("string literal without a dictionary".into())
                })?;
                let dict = provider.dictionary(*dict_id).ok_or_else(|| {
                    CodegenError::NotSupported(format!("unknown dictionary {dict_id}"))
                })?;
                Operand::i64(dict.get_or_add(s) as i64)
            }
            _ => {
                return Err(CodegenError::NotSupported(format!(
                    "literal {} of type {ty}",
                    c.value
                )))
            }
        };
        if self.cgen_state.co.hoist_literals {
            if let Operand::ConstI(_, raw) = encoded {
                let off = self
                    .cgen_state
                    .literals
                    .get_or_add_encoded(raw, ty.dict_id().unwrap_or(0))?;
                let base = self.b().arg("literals");
                let b = self.b();
                let ptr = b.gep(base, Operand::i64(off as i64), 1);
                let v = b.load(IrType::I64, ptr);
                return Ok(CgValue::new(v, ty));
            }
        }
        Ok(CgValue::new(encoded, ty))
    }

    pub fn null_operand(&self, ty: TypeRef) -> Operand {
        if ty.is_fp() {
            Operand::f64(f64::NAN)
        } else if ty.is_boolean() {
            Operand::i64(NULL_BOOLEAN as i64)
        } else if ty.is_null() {
            Operand::i64(0)
        } else {
            Operand::i64(ty.inline_null_value())
        }
    }

    // ---- column fetch ----

    pub fn codegen_column_ref(&mut self, node: NodeId, index: usize, ty: TypeRef) -> Result<CgValue> {
        let slot = self.binding.slot_of(node, index).ok_or_else(|| {
            CodegenError::NotSupported(format!("column ${node}.{index} is not bound"))
        })?;
        match self.pos_overrides.get(&node).copied() {
            None => self.codegen_column_slot(slot, ty),
            Some(over) => {
                if ty.is_text() || ty.is_varlen_array() {
                    if over.matched.is_some() {
                        return Err(CodegenError::NotSupported(
                            "variable-length columns on the padded side of a left join".into(),
                        ));
                    }
                    return self.codegen_varlen_col(slot, ty, over.pos);
                }
                let fetched = self.codegen_column_at(slot, ty, over.pos)?;
                match over.matched {
                    None => Ok(fetched),
                    Some(matched) => {
                        // unmatched rows read back as NULL
                        let sentinel = self.null_operand(ty.with_nullable(true));
                        let ir_ty = if ty.is_fp() { IrType::F64 } else { IrType::I64 };
                        let b = self.b();
                        let v = b.select(ir_ty, matched, fetched.v, sentinel);
                        Ok(CgValue::new(v, ty.with_nullable(true)))
                    }
                }
            }
        }
    }

    /// Loads the column in buffer slot `slot` at the current row.
    pub fn codegen_column_slot(&mut self, slot: usize, ty: TypeRef) -> Result<CgValue> {
        let pos = self.b().arg("pos");
        if ty.is_text() || ty.is_varlen_array() {
            return self.codegen_varlen_col(slot, ty, pos);
        }
        self.codegen_column_at(slot, ty, pos)
    }

    /// Fixed-width gather at an explicit row index.
    pub fn codegen_column_at(&mut self, slot: usize, ty: TypeRef, pos: Operand) -> Result<CgValue> {
        let width = ty.size();
        let base = self.load_buffer_ptr(slot);
        let b = self.b();
        let elem_ptr = b.gep(base, pos, width);
        let v = match ty {
            t if t.is_fp32() => {
                let raw = b.load(IrType::F32, elem_ptr);
                b.cast(CastOp::FpExt, raw, IrType::F32, IrType::F64)
            }
            t if t.is_fp64() => b.load(IrType::F64, elem_ptr),
            _ => {
                let raw = b.load(IrType::int_of_size(width), elem_ptr);
                b.cast(CastOp::SExt, raw, IrType::int_of_size(width), IrType::I64)
            }
        };
        Ok(CgValue::new(v, ty))
    }

    fn codegen_varlen_col(&mut self, slot: usize, ty: TypeRef, pos: Operand) -> Result<CgValue> {
        // offsets buffer holds (byte offset, byte length) i64 pairs; a
        // negative offset marks a NULL row
        let offsets = self.load_buffer_ptr(slot);
        let data = self.load_buffer_ptr(slot + 1);
        let b = self.b();
        let pair_ptr = b.gep(offsets, pos, 16);
        let off = b.load(IrType::I64, pair_ptr);
        let len_ptr = b.gep(pair_ptr, Operand::i64(8), 1);
        let len = b.load(IrType::I64, len_ptr);
        let is_null = b.icmp(ICmpPred::Slt, IrType::I64, off, Operand::i64(0));
        let zero = Operand::i64(0);
        let abs_off = b.binop(IrType::I64, BinOp::Sub, zero, off);
        let real_off = b.select(IrType::I64, is_null, abs_off, off);
        let ptr = b.gep(data, real_off, 1);
        // length -1 marks NULL in the packed view
        let neg_one = Operand::i64(-1);
        let view_len = b.select(IrType::I64, is_null, neg_one, len);
        let packed = view_len;
        let view = b.push(basalt_llir::Instr::MakeStringView {
            packed,
            ptr,
            len: view_len,
        });
        Ok(CgValue::new(view, ty))
    }

    pub fn load_buffer_ptr(&mut self, slot: usize) -> Operand {
        let bufs = self.b().arg("col_buffers");
        let b = self.b();
        let entry = b.gep(bufs, Operand::i64(slot as i64), 8);
        b.load(IrType::Ptr, entry)
    }

    fn codegen_window_load(&mut self, w: &WindowFunction, ty: TypeRef) -> Result<CgValue> {
        let slot = self.window_slots.get(w).copied().ok_or_else(|| {
            CodegenError::NotSupported("window function without a computed context".into())
        })?;
        // window outputs are materialized as an i64/f64 column
        let load_ty = if ty.is_fp() {
            TypeContext::global().fp64(ty.nullable())
        } else {
            TypeContext::global().int64(ty.nullable())
        };
        let v = self.codegen_column_slot(slot, load_ty)?;
        Ok(CgValue::new(v.v, ty))
    }

    // ---- null tests ----

    /// `i1` test of the in-band null sentinel.
    pub fn codegen_is_null(&mut self, value: &CgValue) -> Operand {
        let ty = value.ty;
        if ty.is_fp() {
            let b = self.b();
            let ord = b.fcmp(FCmpPred::OEq, IrType::F64, value.v, value.v);
            return b.binop(IrType::I1, BinOp::Xor, ord, Operand::i1(true));
        }
        if ty.is_text() || ty.is_varlen_array() {
            let b = self.b();
            let len = b.extract_value(value.v, 2);
            return b.icmp(ICmpPred::Slt, IrType::I64, len, Operand::i64(0));
        }
        if !ty.nullable() {
            return Operand::i1(false);
        }
        let sentinel = self.null_operand(ty);
        self.b().icmp(ICmpPred::Eq, IrType::I64, value.v, sentinel)
    }

    /// Converts a boolean value (`0/1/-1`) into an `i1`, mapping NULL to
    /// false; quals treat NULL as a non-match.
    pub fn to_bool(&mut self, value: &CgValue) -> Operand {
        self.b()
            .icmp(ICmpPred::Sgt, IrType::I64, value.v, Operand::i64(0))
    }

    // ---- unary operators ----

    fn codegen_uoper(&mut self, u: &UOper) -> Result<CgValue> {
        match u.op {
            OpType::Cast => self.codegen_cast(u),
            OpType::IsNull => {
                let operand = self.codegen(&u.operand)?;
                let is_null = self.codegen_is_null(&operand);
                let b = self.b();
                let v = b.cast(CastOp::ZExt, is_null, IrType::I1, IrType::I64);
                Ok(CgValue::new(v, TypeContext::global().boolean(false)))
            }
            OpType::Not => {
                let operand = self.codegen(&u.operand)?;
                if !operand.ty.nullable() {
                    let b = self.b();
                    let v = b.binop(IrType::I64, BinOp::Xor, operand.v, Operand::i64(1));
                    return Ok(CgValue::new(v, u.ty));
                }
                let v = self.cgen_state.emit_call(
                    "logical_not",
                    IrType::I8,
                    vec![operand.v, Operand::i64(NULL_BOOLEAN as i64)],
                );
                Ok(CgValue::new(v, u.ty))
            }
            OpType::UMinus => self.codegen_uminus(u),
            OpType::BwNot => {
                let operand = self.codegen(&u.operand)?;
                let b = self.b();
                let v = b.binop(IrType::I64, BinOp::Xor, operand.v, Operand::i64(-1));
                Ok(CgValue::new(v, u.ty))
            }
            OpType::Unnest => Err(CodegenError::NotSupported(
                "UNNEST outside an aggregate argument or projection".into(),
            )),
            other => Err(CodegenError::NotSupported(format!(
                "unary operator {other}"
            ))),
        }
    }

    // ---- logical connectives ----

    fn codegen_bin_oper(&mut self, bin: &BinOper) -> Result<CgValue> {
        match bin.op {
            OpType::And | OpType::Or => self.codegen_logical(bin),
            op if op.is_comparison() => self.codegen_cmp(bin),
            op if op.is_arithmetic() => self.codegen_arith(bin),
            OpType::ArrayAt => self.codegen_array_at(bin),
            other => Err(CodegenError::NotSupported(format!(
                "binary operator {other}"
            ))),
        }
    }

    fn codegen_logical(&mut self, bin: &BinOper) -> Result<CgValue> {
        let nullable = bin.lhs.ty().nullable() || bin.rhs.ty().nullable();
        if !nullable {
            return self.codegen_logical_short_circuit(bin);
        }
        let lhs = self.codegen(&bin.lhs)?;
        let rhs = self.codegen(&bin.rhs)?;
        let helper = if bin.op == OpType::And {
            "logical_and"
        } else {
            "logical_or"
        };
        let v = self.cgen_state.emit_call(
            helper,
            IrType::I8,
            vec![lhs.v, rhs.v, Operand::i64(NULL_BOOLEAN as i64)],
        );
        Ok(CgValue::new(v, bin.ty))
    }

    /// Two-valued AND/OR with a branch diamond: the right side only
    /// evaluates when it can still change the result.
    fn codegen_logical_short_circuit(&mut self, bin: &BinOper) -> Result<CgValue> {
        let lhs = self.codegen(&bin.lhs)?;
        let lhs_true = self.to_bool(&lhs);
        let is_and = bin.op == OpType::And;
        let name = if is_and { "and" } else { "or" };
        let d = Diamond::build(&mut self.cgen_state.row_func, lhs_true, name);
        // the side where the result depends on rhs
        let eval_side = if is_and { d.on_true } else { d.on_false };
        let const_side = if is_and { d.on_false } else { d.on_true };
        self.b().position_at_end(eval_side);
        let rhs = self.codegen(&bin.rhs)?;
        let rhs_end = self.b().current_block();
        self.b().br(d.merge);
        self.b().position_at_end(const_side);
        self.b().br(d.merge);
        self.b().position_at_end(d.merge);
        let b = self.b();
        let phi = b.phi(IrType::I8);
        b.add_incoming(phi, rhs.v, rhs_end);
        b.add_incoming(phi, Operand::i64(if is_and { 0 } else { 1 }), const_side);
        Ok(CgValue::new(phi, bin.ty))
    }

    // ---- CASE ----

    fn codegen_case(&mut self, case: &CaseExpr) -> Result<CgValue> {
        let result_ir_ty = if case.ty.is_fp() { IrType::F64 } else { IrType::I64 };
        let exit = self.b().new_block("case_exit");
        let mut incomings: Vec<(Operand, basalt_llir::BlockId)> = Vec::new();
        for (i, (when, then)) in case.when_then.iter().enumerate() {
            let cond = self.codegen(when)?;
            let cond_i1 = self.to_bool(&cond);
            let then_bb = self.b().new_block(format!("case_then{i}"));
            let next_bb = self.b().new_block(format!("case_next{i}"));
            self.b().cond_br(cond_i1, then_bb, next_bb);
            self.b().position_at_end(then_bb);
            let then_val = self.codegen(then)?;
            let then_end = self.b().current_block();
            self.b().br(exit);
            incomings.push((then_val.v, then_end));
            self.b().position_at_end(next_bb);
        }
        let else_val = self.codegen(&case.else_expr)?;
        let else_end = self.b().current_block();
        self.b().br(exit);
        incomings.push((else_val.v, else_end));
        self.b().position_at_end(exit);
        let b = self.b();
        let phi = b.phi(result_ir_ty);
        for (v, block) in incomings {
            b.add_incoming(phi, v, block);
        }
        Ok(CgValue::new(phi, case.ty))
    }

    // ---- IN ----

    fn codegen_in_values(&mut self, e: &InValues) -> Result<CgValue> {
        let threshold = self.cgen_state.config.exec.codegen.in_values_bitmap_threshold;
        let arg_ty = e.arg.ty();
        let all_int_consts = arg_ty.is_integer_like()
            && e.values.iter().all(|v| {
                matches!(v.as_ref(), Expr::Constant(c) if c.is_null || c.value.as_int().is_some())
            });
        if all_int_consts && e.values.len() > threshold {
            let null_val = arg_ty.inline_null_value();
            let ints: Vec<i64> = e
                .values
                .iter()
                .map(|v| {
                    let c = v.as_ref().as_constant().expect("checked constant");
                    if c.is_null {
                        null_val
                    } else {
                        c.value.as_int().expect("checked integer")
                    }
                })
                .collect();
            return self.codegen_bitmap_probe(&e.arg, &ints, null_val);
        }
        // few values: chained OR of equality
        let ctx = TypeContext::global();
        let bool_ty = ctx.boolean(arg_ty.nullable());
        let mut result: Option<CgValue> = None;
        for value in &e.values {
            let eq = BinOper {
                ty: bool_ty,
                op: OpType::Eq,
                qualifier: Qualifier::One,
                lhs: e.arg.clone(),
                rhs: value.clone(),
            };
            let eq_val = self.codegen_cmp(&eq)?;
            result = Some(match result {
                None => eq_val,
                Some(acc) => {
                    let v = self.cgen_state.emit_call(
                        "logical_or",
                        IrType::I8,
                        vec![acc.v, eq_val.v, Operand::i64(NULL_BOOLEAN as i64)],
                    );
                    CgValue::new(v, bool_ty)
                }
            });
        }
        result.ok_or_else(|| CodegenError::NotSupported("empty IN list".into()))
    }

    fn codegen_in_integer_set(&mut self, e: &InIntegerSet) -> Result<CgValue> {
        let null_val = e.arg.ty().inline_null_value();
        self.codegen_bitmap_probe(&e.arg, &e.values, null_val)
    }

    fn codegen_bitmap_probe(
        &mut self,
        arg: &ExprRef,
        values: &[i64],
        null_val: i64,
    ) -> Result<CgValue> {
        let bitmap = InValuesBitmap::build(values, null_val)?;
        let arg_val = self.codegen(arg)?;
        let bool_ty = TypeContext::global().boolean(arg.ty().nullable());
        if bitmap.is_empty() {
            // only NULLs in the list: the result is NULL for a NULL needle
            // and false otherwise
            let v = if bitmap.has_null {
                let is_null = self.codegen_is_null(&arg_val);
                let b = self.b();
                b.select(
                    IrType::I8,
                    is_null,
                    Operand::i64(NULL_BOOLEAN as i64),
                    Operand::i64(0),
                )
            } else {
                Operand::i64(0)
            };
            return Ok(CgValue::new(v, bool_ty));
        }
        let index = self.cgen_state.in_values_bitmaps.len();
        let (min_val, max_val) = (bitmap.min_val, bitmap.max_val);
        self.cgen_state.in_values_bitmaps.push(bitmap);
        let bitmaps = self.b().arg("bitmaps");
        let b = self.b();
        let entry = b.gep(bitmaps, Operand::i64(index as i64), 8);
        let bitmap_ptr = b.load(IrType::Ptr, entry);
        let null_bool = if arg.ty().nullable() {
            NULL_BOOLEAN as i64
        } else {
            0
        };
        let v = self.cgen_state.emit_call(
            "bit_is_set",
            IrType::I8,
            vec![
                bitmap_ptr,
                arg_val.v,
                Operand::i64(min_val),
                Operand::i64(max_val),
                Operand::i64(null_val),
                Operand::i64(null_bool),
            ],
        );
        Ok(CgValue::new(v, bool_ty))
    }

    // ---- strings ----

    fn codegen_like(&mut self, like: &LikeExpr) -> Result<CgValue> {
        let arg = self.codegen(&like.arg)?;
        let bool_ty = TypeContext::global().boolean(like.arg.ty().nullable());
        let escape = like
            .escape
            .as_ref()
            .and_then(|e| e.as_ref().as_constant().cloned())
            .and_then(|c| c.value.as_str().and_then(|s| s.chars().next()))
            .unwrap_or('\\');
        let pattern = self.pattern_view(&like.pattern)?;
        if arg.ty.is_ext_dictionary() {
            let dict_id = arg.ty.dict_id().expect("dictionary type");
            let b = self.b();
            let pattern_ptr = b.extract_value(pattern.v, 1);
            let pattern_len = b.extract_value(pattern.v, 2);
            let v = self.cgen_state.emit_call(
                "dict_string_like",
                IrType::I8,
                vec![
                    arg.v,
                    Operand::i64(dict_id as i64),
                    pattern_ptr,
                    pattern_len,
                    Operand::i64(escape as i64),
                ],
            );
            return Ok(CgValue::new(v, bool_ty));
        }
        let helper = if like.is_simple {
            "string_like_simple"
        } else if like.is_ilike {
            "string_ilike"
        } else {
            "string_like"
        };
        let b = self.b();
        let arg_ptr = b.extract_value(arg.v, 1);
        let arg_len = b.extract_value(arg.v, 2);
        let pattern_ptr = b.extract_value(pattern.v, 1);
        let pattern_len = b.extract_value(pattern.v, 2);
        let mut args = vec![arg_ptr, arg_len, pattern_ptr, pattern_len];
        if !like.is_simple {
            args.push(Operand::i64(escape as i64));
        }
        let v = self.cgen_state.emit_call(helper, IrType::I8, args);
        Ok(CgValue::new(v, bool_ty))
    }

    fn codegen_regexp(&mut self, re: &RegexpExpr) -> Result<CgValue> {
        let arg = self.codegen(&re.arg)?;
        if arg.ty.is_ext_dictionary() {
            return Err(CodegenError::NotSupported(
                "REGEXP over dictionary-encoded strings".into(),
            ));
        }
        let bool_ty = TypeContext::global().boolean(re.arg.ty().nullable());
        let pattern = self.pattern_view(&re.pattern)?;
        let b = self.b();
        let arg_ptr = b.extract_value(arg.v, 1);
        let arg_len = b.extract_value(arg.v, 2);
        let pattern_ptr = b.extract_value(pattern.v, 1);
        let pattern_len = b.extract_value(pattern.v, 2);
        let v = self.cgen_state.emit_call(
            "regexp_like",
            IrType::I8,
            vec![arg_ptr, arg_len, pattern_ptr, pattern_len],
        );
        Ok(CgValue::new(v, bool_ty))
    }

    /// Materializes a constant pattern string into a module-lifetime
    /// buffer and yields its view.
    fn pattern_view(&mut self, pattern: &ExprRef) -> Result<CgValue> {
        let Expr::Constant(c) = pattern.as_ref() else {
            return Err(CodegenError::NotSupported(
                "pattern must be a string literal".into(),
            ));
        };
        let s = c
            .value
            .as_str()
            .ok_or_else(|| CodegenError::NotSupported("pattern must be a string".into()))?;
        // patterns travel through the literal buffer as raw bytes
        let bytes = s.as_bytes();
        let off = self.pattern_bytes_offset(bytes)?;
        let base = self.b().arg("literals");
        let b = self.b();
        let ptr = b.gep(base, Operand::i64(off as i64), 1);
        let len = Operand::i64(bytes.len() as i64);
        let view = b.push(basalt_llir::Instr::MakeStringView {
            packed: len,
            ptr,
            len,
        });
        Ok(CgValue::new(view, pattern.ty()))
    }

    fn pattern_bytes_offset(&mut self, bytes: &[u8]) -> Result<u16> {
        self.cgen_state.literals.add_raw_bytes(bytes)
    }

    fn codegen_char_length(&mut self, c: &CharLengthExpr) -> Result<CgValue> {
        let arg = self.codegen(&c.arg)?;
        if arg.ty.is_ext_dictionary() {
            return Err(CodegenError::NotSupported(
                "CHAR_LENGTH over dictionary-encoded strings".into(),
            ));
        }
        let b = self.b();
        let len = b.extract_value(arg.v, 2);
        Ok(CgValue::new(len, TypeContext::global().int32(arg.ty.nullable())))
    }

    fn codegen_key_for_string(&mut self, k: &KeyForStringExpr) -> Result<CgValue> {
        let arg = self.codegen(&k.arg)?;
        // the value already is the dictionary id
        Ok(CgValue::new(
            arg.v,
            TypeContext::global().int32(arg.ty.nullable()),
        ))
    }

    fn codegen_lower(&mut self, l: &LowerExpr) -> Result<CgValue> {
        let arg = self.codegen(&l.arg)?;
        if !arg.ty.is_text() {
            return Err(CodegenError::NotSupported(
                "LOWER over dictionary-encoded strings".into(),
            ));
        }
        let b = self.b();
        let ptr = b.extract_value(arg.v, 1);
        let len = b.extract_value(arg.v, 2);
        let v = self
            .cgen_state
            .emit_call("string_lower", IrType::StringView, vec![ptr, len]);
        Ok(CgValue::new(v, arg.ty))
    }

    fn codegen_cardinality(&mut self, c: &CardinalityExpr) -> Result<CgValue> {
        let arg = self.codegen(&c.arg)?;
        let elem_size = arg
            .ty
            .elem_type()
            .map(|e| e.size())
            .ok_or_else(|| CodegenError::NotSupported("CARDINALITY of a non-array".into()))?;
        let b = self.b();
        let len = b.extract_value(arg.v, 2);
        let is_null = b.icmp(ICmpPred::Slt, IrType::I64, len, Operand::i64(0));
        let count = b.binop(
            IrType::I64,
            BinOp::SDiv,
            len,
            Operand::i64(elem_size as i64),
        );
        let ty = TypeContext::global().int32(true);
        let null = Operand::i64(ty.inline_null_value());
        let v = b.select(IrType::I64, is_null, null, count);
        Ok(CgValue::new(v, ty))
    }

    fn codegen_width_bucket(&mut self, w: &WidthBucketExpr) -> Result<CgValue> {
        let target = self.codegen_fp(&w.target)?;
        let lower = self.codegen_fp(&w.lower)?;
        let upper = self.codegen_fp(&w.upper)?;
        let count = self.codegen(&w.partition_count)?;
        let v = self.cgen_state.emit_call(
            "width_bucket",
            IrType::I64,
            vec![target, lower, upper, count.v],
        );
        // a negative result is an error code
        let b = self.b();
        let failed = b.icmp(ICmpPred::Slt, IrType::I64, v, Operand::i64(0));
        self.cgen_state.ret_on_error(
            failed,
            basalt_common::error::ERR_WIDTH_BUCKET_INVALID_ARGUMENT,
            "width_bucket",
        );
        Ok(CgValue::new(v, TypeContext::global().int32(w.target.ty().nullable())))
    }

    fn codegen_fp(&mut self, expr: &ExprRef) -> Result<Operand> {
        let value = self.codegen(expr)?;
        if value.ty.is_fp() {
            return Ok(value.v);
        }
        let b = self.b();
        Ok(b.cast(CastOp::SiToFp, value.v, IrType::I64, IrType::F64))
    }

    fn codegen_sample_ratio(&mut self, s: &SampleRatioExpr) -> Result<CgValue> {
        let ratio = self.codegen(&s.arg)?;
        let pos = self.b().arg("pos");
        let v = self
            .cgen_state
            .emit_call("sample_ratio", IrType::I8, vec![ratio.v, pos]);
        Ok(CgValue::new(v, TypeContext::global().boolean(false)))
    }

    // ---- extension functions ----

    fn codegen_function_oper(&mut self, f: &FunctionOper) -> Result<CgValue> {
        let runtime_name = extension_function_name(&f.name)
            .ok_or_else(|| CodegenError::UnknownFunction(f.name.clone()))?;
        // null-check prologue over the nullable arguments: if any is
        // NULL, the result is NULL without calling
        let mut arg_vals = Vec::with_capacity(f.args.len());
        let mut null_checks = Vec::new();
        for arg in &f.args {
            let v = self.codegen(arg)?;
            if v.ty.nullable() {
                null_checks.push(self.codegen_is_null(&v));
            }
            arg_vals.push(self.codegen_fp_value(v));
        }
        let any_null = null_checks.into_iter().reduce(|acc, next| {
            self.cgen_state
                .row_func
                .binop(IrType::I1, BinOp::Or, acc, next)
        });
        match any_null {
            None => {
                let v = self
                    .cgen_state
                    .emit_call(runtime_name, IrType::F64, arg_vals);
                Ok(CgValue::new(v, f.ty))
            }
            Some(cond) => {
                let d = Diamond::build(&mut self.cgen_state.row_func, cond, "fn_args_null");
                self.b().position_at_end(d.on_true);
                self.b().br(d.merge);
                self.b().position_at_end(d.on_false);
                let call = self
                    .cgen_state
                    .emit_call(runtime_name, IrType::F64, arg_vals);
                let call_end = self.b().current_block();
                self.b().br(d.merge);
                self.b().position_at_end(d.merge);
                let b = self.b();
                let phi = b.phi(IrType::F64);
                b.add_incoming(phi, Operand::f64(f64::NAN), d.on_true);
                b.add_incoming(phi, call, call_end);
                Ok(CgValue::new(phi, f.ty))
            }
        }
    }

    fn codegen_fp_value(&mut self, value: CgValue) -> Operand {
        if value.ty.is_fp() {
            value.v
        } else {
            let b = self.b();
            b.cast(CastOp::SiToFp, value.v, IrType::I64, IrType::F64)
        }
    }

    // ---- arrays ----

    fn codegen_array_at(&mut self, bin: &BinOper) -> Result<CgValue> {
        let arr = self.codegen(&bin.lhs)?;
        let idx = self.codegen(&bin.rhs)?;
        let elem = bin
            .lhs
            .ty()
            .elem_type()
            .ok_or_else(|| CodegenError::NotSupported("subscript of a non-array".into()))?;
        if !elem.is_integer_like() {
            return Err(CodegenError::NotSupported(format!(
                "subscript of array of {elem}"
            )));
        }
        let elem_size = elem.size();
        let b = self.b();
        let ptr = b.extract_value(arr.v, 1);
        let len = b.extract_value(arr.v, 2);
        let count = b.binop(IrType::I64, BinOp::SDiv, len, Operand::i64(elem_size as i64));
        let null_val = Operand::i64(elem.inline_null_value());
        let v = self.cgen_state.emit_call(
            "array_at_int64",
            IrType::I64,
            vec![ptr, count, idx.v, null_val],
        );
        let _ = elem_size;
        Ok(CgValue::new(v, bin.ty))
    }

    /// Quantified comparison against an array operand:
    /// `x <op> ANY/ALL arr`.
    pub fn codegen_qualifier_cmp(
        &mut self,
        op: OpType,
        qualifier: Qualifier,
        lhs: &ExprRef,
        rhs: &ExprRef,
        result_ty: TypeRef,
    ) -> Result<CgValue> {
        if self.cgen_state.co.device_type == DeviceType::Gpu
            && rhs
                .ty()
                .elem_type()
                .is_some_and(|e| e.is_string())
        {
            return Err(CodegenError::NotSupported(
                "quantified string-array comparison on GPU".into(),
            ));
        }
        let elem = rhs
            .ty()
            .elem_type()
            .ok_or_else(|| CodegenError::NotSupported("quantifier over a non-array".into()))?;
        if !elem.is_integer_like() {
            return Err(CodegenError::NotSupported(format!(
                "quantified comparison over array of {elem}"
            )));
        }
        let mode = match qualifier {
            Qualifier::Any => "any",
            Qualifier::All => "all",
            Qualifier::One => {
                return Err(CodegenError::NotSupported(
                    "plain comparison routed to the quantifier path".into(),
                ))
            }
        };
        let op_name = match op {
            OpType::Eq => "eq",
            OpType::Ne => "ne",
            OpType::Lt => "lt",
            OpType::Le => "le",
            OpType::Gt => "gt",
            OpType::Ge => "ge",
            other => {
                return Err(CodegenError::NotSupported(format!(
                    "quantified {other}"
                )))
            }
        };
        let needle = self.codegen(lhs)?;
        let arr = self.codegen(rhs)?;
        let elem_size = elem.size();
        let b = self.b();
        let ptr = b.extract_value(arr.v, 1);
        let len = b.extract_value(arr.v, 2);
        let count = b.binop(IrType::I64, BinOp::SDiv, len, Operand::i64(elem_size as i64));
        let v = self.cgen_state.emit_call(
            &format!("array_{mode}_{op_name}_int64"),
            IrType::I8,
            vec![ptr, count, needle.v, Operand::i64(elem.inline_null_value())],
        );
        Ok(CgValue::new(v, result_ty))
    }
}

/// Registered extension functions callable from generated code.
fn extension_function_name(name: &str) -> Option<&'static str> {
    Some(match name.to_ascii_lowercase().as_str() {
        "abs" => "fn_abs",
        "ceil" | "ceiling" => "fn_ceil",
        "floor" => "fn_floor",
        "round" => "fn_round",
        "sqrt" => "fn_sqrt",
        "exp" => "fn_exp",
        "ln" => "fn_ln",
        "log10" | "log" => "fn_log10",
        "power" | "pow" => "fn_power",
        "truncate" => "fn_truncate",
        _ => return None,
    })
}
