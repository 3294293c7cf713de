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

//! Reference interpreter.
//!
//! Executes one function against a [`Memory`] of flat byte buffers and a
//! [`RuntimeEnv`] binding extern helper names to host functions. This is
//! the execution path the test suite drives; the production driver JITs
//! the same module instead.

use std::collections::HashMap;

use thiserror::Error;

use crate::function::Function;
use crate::instr::*;
use crate::module::Module;

#[derive(Debug, Error)]
pub enum InterpError {
    #[error("no function or extern named {0}")]
    MissingFunction(String),

    #[error("null or dangling pointer dereference")]
    BadPointer,

    #[error("use of unassigned SSA value %v{0}")]
    UnboundValue(u32),

    #[error("unguarded division by zero in generated code")]
    DivByZero,

    #[error("phi has no incoming edge for the taken path")]
    PhiMismatch,

    #[error("type mismatch: {0}")]
    TypeMismatch(&'static str),
}

pub type Result<T, E = InterpError> = std::result::Result<T, E>;

/// A pointer into interpreter memory: buffer index plus byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PtrVal {
    pub buf: u32,
    pub offset: i64,
}

pub const NULL_PTR: PtrVal = PtrVal {
    buf: u32::MAX,
    offset: 0,
};

impl PtrVal {
    pub fn is_null(self) -> bool {
        self.buf == u32::MAX
    }

    pub fn offset_by(self, bytes: i64) -> PtrVal {
        PtrVal {
            buf: self.buf,
            offset: self.offset + bytes,
        }
    }
}

/// A dynamically-typed runtime value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarVal {
    /// All integer widths, sign-extended to 64 bits; `i1` is 0/1.
    I(i64),
    F(f64),
    Ptr(PtrVal),
    Pair {
        value: i64,
        overflow: bool,
    },
    Str {
        packed: i64,
        ptr: PtrVal,
        len: i64,
    },
    Unit,
}

impl ScalarVal {
    pub fn as_i(self) -> Result<i64> {
        match self {
            ScalarVal::I(v) => Ok(v),
            _ => Err(InterpError::TypeMismatch("expected integer")),
        }
    }

    pub fn as_f(self) -> Result<f64> {
        match self {
            ScalarVal::F(v) => Ok(v),
            ScalarVal::I(v) => Ok(v as f64),
            _ => Err(InterpError::TypeMismatch("expected float")),
        }
    }

    pub fn as_ptr(self) -> Result<PtrVal> {
        match self {
            ScalarVal::Ptr(p) => Ok(p),
            _ => Err(InterpError::TypeMismatch("expected pointer")),
        }
    }
}

/// Flat byte buffers plus a side table for pointers stored in memory.
#[derive(Default)]
pub struct Memory {
    bufs: Vec<Vec<u8>>,
    stored_ptrs: HashMap<(u32, i64), PtrVal>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory::default()
    }

    pub fn alloc(&mut self, bytes: usize) -> PtrVal {
        self.add_buffer(vec![0u8; bytes])
    }

    pub fn add_buffer(&mut self, data: Vec<u8>) -> PtrVal {
        let buf = self.bufs.len() as u32;
        self.bufs.push(data);
        PtrVal { buf, offset: 0 }
    }

    pub fn buffer(&self, ptr: PtrVal) -> Result<&[u8]> {
        self.bufs
            .get(ptr.buf as usize)
            .map(|b| b.as_slice())
            .ok_or(InterpError::BadPointer)
    }

    pub fn read_int(&self, ptr: PtrVal, size: usize) -> Result<i64> {
        let buf = self.buffer(ptr)?;
        let start = ptr.offset as usize;
        let bytes = buf
            .get(start..start + size)
            .ok_or(InterpError::BadPointer)?;
        let mut raw = [0u8; 8];
        raw[..size].copy_from_slice(bytes);
        let unsigned = u64::from_le_bytes(raw);
        // sign-extend from `size` bytes
        let shift = 64 - size * 8;
        Ok(((unsigned << shift) as i64) >> shift)
    }

    pub fn write_int(&mut self, ptr: PtrVal, size: usize, v: i64) -> Result<()> {
        let bytes = v.to_le_bytes();
        let buf = self
            .bufs
            .get_mut(ptr.buf as usize)
            .ok_or(InterpError::BadPointer)?;
        let start = ptr.offset as usize;
        let dst = buf
            .get_mut(start..start + size)
            .ok_or(InterpError::BadPointer)?;
        dst.copy_from_slice(&bytes[..size]);
        Ok(())
    }

    pub fn read_f32(&self, ptr: PtrVal) -> Result<f64> {
        let bits = self.read_int(ptr, 4)? as u32;
        Ok(f32::from_bits(bits) as f64)
    }

    pub fn read_f64(&self, ptr: PtrVal) -> Result<f64> {
        let bits = self.read_int(ptr, 8)? as u64;
        Ok(f64::from_bits(bits))
    }

    pub fn write_f32(&mut self, ptr: PtrVal, v: f64) -> Result<()> {
        self.write_int(ptr, 4, (v as f32).to_bits() as i64)
    }

    pub fn write_f64(&mut self, ptr: PtrVal, v: f64) -> Result<()> {
        self.write_int(ptr, 8, v.to_bits() as i64)
    }

    /// Stores a pointer value at `at`; pointers live in a side table keyed
    /// by address, with a token written into the bytes for visibility.
    pub fn store_ptr(&mut self, at: PtrVal, p: PtrVal) -> Result<()> {
        self.write_int(at, 8, ((p.buf as i64) << 48) | (p.offset & 0xffff_ffff))?;
        self.stored_ptrs.insert((at.buf, at.offset), p);
        Ok(())
    }

    pub fn load_ptr(&self, at: PtrVal) -> Result<PtrVal> {
        self.stored_ptrs
            .get(&(at.buf, at.offset))
            .copied()
            .ok_or(InterpError::BadPointer)
    }

    pub fn bytes(&self, ptr: PtrVal, len: usize) -> Result<&[u8]> {
        let buf = self.buffer(ptr)?;
        let start = ptr.offset as usize;
        buf.get(start..start + len).ok_or(InterpError::BadPointer)
    }
}

pub type ExternFn = Box<dyn Fn(&mut Memory, &[ScalarVal]) -> Result<ScalarVal> + Send + Sync>;

/// Binds extern helper names to host implementations.
#[derive(Default)]
pub struct RuntimeEnv {
    fns: HashMap<String, ExternFn>,
}

impl RuntimeEnv {
    pub fn new() -> RuntimeEnv {
        RuntimeEnv::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut Memory, &[ScalarVal]) -> Result<ScalarVal> + Send + Sync + 'static,
    {
        self.fns.insert(name.into(), Box::new(f));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fns.contains_key(name)
    }
}

pub struct Interp<'m> {
    module: &'m Module,
    env: &'m RuntimeEnv,
}

impl<'m> Interp<'m> {
    pub fn new(module: &'m Module, env: &'m RuntimeEnv) -> Interp<'m> {
        Interp { module, env }
    }

    /// Calls a module function or extern helper by name.
    pub fn call(&self, mem: &mut Memory, name: &str, args: &[ScalarVal]) -> Result<ScalarVal> {
        if let Some(func) = self.module.function(name) {
            return self.run(mem, func, args);
        }
        match self.env.fns.get(name) {
            Some(f) => f(mem, args),
            None => Err(InterpError::MissingFunction(name.to_owned())),
        }
    }

    pub fn run(&self, mem: &mut Memory, func: &Function, args: &[ScalarVal]) -> Result<ScalarVal> {
        debug_assert_eq!(args.len(), func.params.len());
        let mut values: Vec<Option<ScalarVal>> = vec![None; func.value_types.len()];
        let mut block = func.entry();
        let mut prev_block: Option<BlockId> = None;
        loop {
            let blk = func.block(block);
            for (id, instr) in &blk.instrs {
                let result = self.eval(mem, func, args, &values, prev_block, instr)?;
                values[id.0 as usize] = Some(result);
            }
            match blk.terminator.as_ref().expect("finished function") {
                Terminator::Br(target) => {
                    prev_block = Some(block);
                    block = *target;
                }
                Terminator::CondBr {
                    cond,
                    on_true,
                    on_false,
                    ..
                } => {
                    let taken = operand(args, &values, cond)?.as_i()? != 0;
                    prev_block = Some(block);
                    block = if taken { *on_true } else { *on_false };
                }
                Terminator::Ret(Some(value)) => {
                    return operand(args, &values, value);
                }
                Terminator::Ret(None) => return Ok(ScalarVal::Unit),
                Terminator::Unreachable => {
                    return Err(InterpError::TypeMismatch("reached unreachable"))
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn eval(
        &self,
        mem: &mut Memory,
        func: &Function,
        args: &[ScalarVal],
        values: &[Option<ScalarVal>],
        prev_block: Option<BlockId>,
        instr: &Instr,
    ) -> Result<ScalarVal> {
        match instr {
            Instr::BinOp { ty, op, lhs, rhs } => {
                let l = operand(args, values, lhs)?;
                let r = operand(args, values, rhs)?;
                eval_binop(*ty, *op, l, r)
            }
            Instr::Checked { ty, op, lhs, rhs } => {
                let l = operand(args, values, lhs)?.as_i()? as i128;
                let r = operand(args, values, rhs)?.as_i()? as i128;
                let wide = match op {
                    CheckedOp::SAdd => l + r,
                    CheckedOp::SSub => l - r,
                    CheckedOp::SMul => l * r,
                };
                let (min, max) = int_range(*ty);
                let overflow = wide < min || wide > max;
                Ok(ScalarVal::Pair {
                    value: ty.truncate(wide as i64),
                    overflow,
                })
            }
            Instr::ExtractValue { value, index } => {
                match (operand(args, values, value)?, index) {
                    (ScalarVal::Pair { value, .. }, 0) => Ok(ScalarVal::I(value)),
                    (ScalarVal::Pair { overflow, .. }, 1) => Ok(ScalarVal::I(overflow as i64)),
                    (ScalarVal::Str { packed, .. }, 0) => Ok(ScalarVal::I(packed)),
                    (ScalarVal::Str { ptr, .. }, 1) => Ok(ScalarVal::Ptr(ptr)),
                    (ScalarVal::Str { len, .. }, 2) => Ok(ScalarVal::I(len)),
                    _ => Err(InterpError::TypeMismatch("extractvalue on a scalar")),
                }
            }
            Instr::ICmp { pred, ty, lhs, rhs } => {
                let l = operand(args, values, lhs)?;
                let r = operand(args, values, rhs)?;
                let result = match (l, r) {
                    (ScalarVal::Ptr(a), ScalarVal::Ptr(b)) => match pred {
                        ICmpPred::Eq => a == b,
                        ICmpPred::Ne => a != b,
                        _ => return Err(InterpError::TypeMismatch("ordered pointer compare")),
                    },
                    _ => {
                        let a = l.as_i()?;
                        let b = r.as_i()?;
                        icmp(*pred, *ty, a, b)
                    }
                };
                Ok(ScalarVal::I(result as i64))
            }
            Instr::FCmp { pred, lhs, rhs, .. } => {
                let a = operand(args, values, lhs)?.as_f()?;
                let b = operand(args, values, rhs)?.as_f()?;
                let result = match pred {
                    FCmpPred::OEq => a == b,
                    FCmpPred::ONe => a != b && !a.is_nan() && !b.is_nan(),
                    FCmpPred::OLt => a < b,
                    FCmpPred::OLe => a <= b,
                    FCmpPred::OGt => a > b,
                    FCmpPred::OGe => a >= b,
                };
                Ok(ScalarVal::I(result as i64))
            }
            Instr::Select {
                cond,
                on_true,
                on_false,
                ..
            } => {
                let c = operand(args, values, cond)?.as_i()?;
                if c != 0 {
                    operand(args, values, on_true)
                } else {
                    operand(args, values, on_false)
                }
            }
            Instr::Cast {
                op,
                value,
                from,
                to,
            } => {
                let v = operand(args, values, value)?;
                eval_cast(*op, v, *from, *to)
            }
            Instr::Phi { incoming, .. } => {
                let prev = prev_block.ok_or(InterpError::PhiMismatch)?;
                for (value, block) in incoming {
                    if *block == prev {
                        return operand(args, values, value);
                    }
                }
                Err(InterpError::PhiMismatch)
            }
            Instr::Call { callee, args: call_args, .. } => {
                let mut evaluated = Vec::with_capacity(call_args.len());
                for a in call_args {
                    evaluated.push(operand(args, values, a)?);
                }
                self.call(mem, callee, &evaluated)
            }
            Instr::Gep {
                base,
                index,
                elem_size,
            } => {
                let p = operand(args, values, base)?.as_ptr()?;
                let i = operand(args, values, index)?.as_i()?;
                Ok(ScalarVal::Ptr(p.offset_by(i * *elem_size as i64)))
            }
            Instr::Load { ty, ptr } => {
                let p = operand(args, values, ptr)?.as_ptr()?;
                if p.is_null() {
                    return Err(InterpError::BadPointer);
                }
                match ty {
                    IrType::F32 => Ok(ScalarVal::F(mem.read_f32(p)?)),
                    IrType::F64 => Ok(ScalarVal::F(mem.read_f64(p)?)),
                    IrType::Ptr => Ok(ScalarVal::Ptr(mem.load_ptr(p)?)),
                    t if t.is_integer() => {
                        Ok(ScalarVal::I(mem.read_int(p, t.bit_width().div_ceil(8))?))
                    }
                    _ => Err(InterpError::TypeMismatch("load of aggregate")),
                }
            }
            Instr::Store { ty, value, ptr } => {
                let p = operand(args, values, ptr)?.as_ptr()?;
                let v = operand(args, values, value)?;
                match (ty, v) {
                    (IrType::F32, v) => mem.write_f32(p, v.as_f()?)?,
                    (IrType::F64, v) => mem.write_f64(p, v.as_f()?)?,
                    (IrType::Ptr, ScalarVal::Ptr(inner)) => mem.store_ptr(p, inner)?,
                    (t, v) if t.is_integer() => {
                        mem.write_int(p, t.bit_width().div_ceil(8), v.as_i()?)?
                    }
                    _ => return Err(InterpError::TypeMismatch("store of aggregate")),
                }
                Ok(ScalarVal::Unit)
            }
            Instr::AtomicAdd { ty, ptr, value, .. } => {
                let p = operand(args, values, ptr)?.as_ptr()?;
                let v = operand(args, values, value)?.as_i()?;
                let size = ty.bit_width().div_ceil(8);
                let old = mem.read_int(p, size)?;
                mem.write_int(p, size, ty.truncate(old.wrapping_add(v)))?;
                Ok(ScalarVal::I(old))
            }
            Instr::MakeStringView { packed, ptr, len } => Ok(ScalarVal::Str {
                packed: operand(args, values, packed)?.as_i()?,
                ptr: operand(args, values, ptr)?.as_ptr()?,
                len: operand(args, values, len)?.as_i()?,
            }),
        }
    }
}

fn operand(args: &[ScalarVal], values: &[Option<ScalarVal>], op: &Operand) -> Result<ScalarVal> {
    match op {
        Operand::ConstI(_, v) => Ok(ScalarVal::I(*v)),
        Operand::ConstF(_, v) => Ok(ScalarVal::F(*v)),
        Operand::ConstNullPtr => Ok(ScalarVal::Ptr(NULL_PTR)),
        Operand::Arg(i) => Ok(args[*i as usize]),
        Operand::Value(id) => values[id.0 as usize]
            .ok_or(InterpError::UnboundValue(id.0)),
    }
}

fn int_range(ty: IrType) -> (i128, i128) {
    match ty {
        IrType::I8 => (i8::MIN as i128, i8::MAX as i128),
        IrType::I16 => (i16::MIN as i128, i16::MAX as i128),
        IrType::I32 => (i32::MIN as i128, i32::MAX as i128),
        _ => (i64::MIN as i128, i64::MAX as i128),
    }
}

fn eval_binop(ty: IrType, op: BinOp, l: ScalarVal, r: ScalarVal) -> Result<ScalarVal> {
    if matches!(
        op,
        BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv
    ) {
        let a = l.as_f()?;
        let b = r.as_f()?;
        let v = match op {
            BinOp::FAdd => a + b,
            BinOp::FSub => a - b,
            BinOp::FMul => a * b,
            BinOp::FDiv => a / b,
            _ => unreachable!(),
        };
        let v = if ty == IrType::F32 { v as f32 as f64 } else { v };
        return Ok(ScalarVal::F(v));
    }
    let a = l.as_i()?;
    let b = r.as_i()?;
    let v = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::SDiv => {
            if b == 0 {
                return Err(InterpError::DivByZero);
            }
            a.wrapping_div(b)
        }
        BinOp::SRem => {
            if b == 0 {
                return Err(InterpError::DivByZero);
            }
            a.wrapping_rem(b)
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => a.wrapping_shl(b as u32),
        BinOp::AShr => a.wrapping_shr(b as u32),
        BinOp::LShr => {
            let width = ty.bit_width();
            let mask = if width >= 64 {
                u64::MAX
            } else {
                (1u64 << width) - 1
            };
            (((a as u64) & mask) >> (b as u32)) as i64
        }
        _ => unreachable!(),
    };
    Ok(ScalarVal::I(ty.truncate(v)))
}

fn icmp(pred: ICmpPred, ty: IrType, a: i64, b: i64) -> bool {
    let width = ty.bit_width().max(1);
    let mask = if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    };
    let ua = (a as u64) & mask;
    let ub = (b as u64) & mask;
    match pred {
        ICmpPred::Eq => a == b,
        ICmpPred::Ne => a != b,
        ICmpPred::Slt => a < b,
        ICmpPred::Sle => a <= b,
        ICmpPred::Sgt => a > b,
        ICmpPred::Sge => a >= b,
        ICmpPred::Ult => ua < ub,
        ICmpPred::Ule => ua <= ub,
        ICmpPred::Ugt => ua > ub,
        ICmpPred::Uge => ua >= ub,
    }
}

fn eval_cast(op: CastOp, v: ScalarVal, from: IrType, to: IrType) -> Result<ScalarVal> {
    match op {
        CastOp::Trunc => Ok(ScalarVal::I(to.truncate(v.as_i()?))),
        CastOp::SExt => Ok(ScalarVal::I(v.as_i()?)),
        CastOp::ZExt => {
            let width = from.bit_width();
            let mask = if width >= 64 {
                u64::MAX
            } else {
                (1u64 << width) - 1
            };
            Ok(ScalarVal::I(((v.as_i()? as u64) & mask) as i64))
        }
        CastOp::SiToFp => {
            let f = v.as_i()? as f64;
            Ok(ScalarVal::F(if to == IrType::F32 {
                f as f32 as f64
            } else {
                f
            }))
        }
        CastOp::FpToSi => Ok(ScalarVal::I(to.truncate(v.as_f()? as i64))),
        CastOp::FpExt => Ok(ScalarVal::F(v.as_f()?)),
        CastOp::FpTrunc => Ok(ScalarVal::F(v.as_f()? as f32 as f64)),
        CastOp::Bitcast => match (from, to) {
            (IrType::F64, IrType::I64) => Ok(ScalarVal::I(v.as_f()?.to_bits() as i64)),
            (IrType::I64, IrType::F64) => Ok(ScalarVal::F(f64::from_bits(v.as_i()? as u64))),
            (IrType::F32, IrType::I32) => {
                Ok(ScalarVal::I((v.as_f()? as f32).to_bits() as i32 as i64))
            }
            (IrType::I32, IrType::F32) => {
                Ok(ScalarVal::F(f32::from_bits(v.as_i()? as u32) as f64))
            }
            _ => Ok(v),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{FunctionBuilder, Param};

    fn module_with(func: Function) -> Module {
        let mut m = Module::new("test");
        m.add_function(func);
        m
    }

    use crate::function::Function;

    #[test]
    fn add_with_overflow_detects_overflow() {
        let mut b = FunctionBuilder::new(
            "inc",
            vec![Param {
                name: "x".into(),
                ty: IrType::I64,
            }],
            IrType::I1,
        );
        let x = b.arg("x");
        let pair = b.checked(IrType::I64, CheckedOp::SAdd, x, Operand::i64(1));
        let carry = b.extract_value(pair, 1);
        b.ret(Some(carry));
        let m = module_with(b.finish());
        let env = RuntimeEnv::new();
        let interp = Interp::new(&m, &env);
        let mut mem = Memory::new();
        let ok = interp
            .call(&mut mem, "inc", &[ScalarVal::I(5)])
            .unwrap();
        assert_eq!(ok, ScalarVal::I(0));
        let overflow = interp
            .call(&mut mem, "inc", &[ScalarVal::I(i64::MAX)])
            .unwrap();
        assert_eq!(overflow, ScalarVal::I(1));
    }

    #[test]
    fn phi_takes_the_branch_value() {
        let mut b = FunctionBuilder::new(
            "abs",
            vec![Param {
                name: "x".into(),
                ty: IrType::I64,
            }],
            IrType::I64,
        );
        let x = b.arg("x");
        let neg = b.icmp(ICmpPred::Slt, IrType::I64, x, Operand::i64(0));
        let then_bb = b.new_block("neg");
        let else_bb = b.new_block("pos");
        let merge = b.new_block("merge");
        b.cond_br(neg, then_bb, else_bb);
        b.position_at_end(then_bb);
        let negated = b.binop(IrType::I64, BinOp::Sub, Operand::i64(0), x);
        b.br(merge);
        b.position_at_end(else_bb);
        b.br(merge);
        b.position_at_end(merge);
        let phi = b.phi(IrType::I64);
        b.add_incoming(phi, negated, then_bb);
        b.add_incoming(phi, x, else_bb);
        b.ret(Some(phi));
        let m = module_with(b.finish());
        let env = RuntimeEnv::new();
        let interp = Interp::new(&m, &env);
        let mut mem = Memory::new();
        assert_eq!(
            interp.call(&mut mem, "abs", &[ScalarVal::I(-7)]).unwrap(),
            ScalarVal::I(7)
        );
        assert_eq!(
            interp.call(&mut mem, "abs", &[ScalarVal::I(3)]).unwrap(),
            ScalarVal::I(3)
        );
    }

    #[test]
    fn loads_respect_width_and_sign() {
        let mut mem = Memory::new();
        let ptr = mem.add_buffer(vec![0xff, 0xff, 0x01, 0x00]);
        assert_eq!(mem.read_int(ptr, 2).unwrap(), -1);
        assert_eq!(mem.read_int(ptr.offset_by(2), 2).unwrap(), 1);
    }

    #[test]
    fn extern_dispatch() {
        let mut b = FunctionBuilder::new("wrap", Vec::new(), IrType::I64);
        let v = b.call("the_answer", IrType::I64, Vec::new());
        b.ret(Some(v));
        let m = module_with(b.finish());
        let mut env = RuntimeEnv::new();
        env.register("the_answer", |_mem, _args| Ok(ScalarVal::I(42)));
        let interp = Interp::new(&m, &env);
        let mut mem = Memory::new();
        assert_eq!(
            interp.call(&mut mem, "wrap", &[]).unwrap(),
            ScalarVal::I(42)
        );
    }
}
