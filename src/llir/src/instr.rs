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

//! Instruction set of the SSA IR.
//!
//! The shapes mirror the LLVM subset the code generator relies on: checked
//! arithmetic intrinsics, `icmp`/`fcmp` predicates, branch diamonds with
//! phis, and calls to named runtime helpers.

use std::fmt;

/// Scalar value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Ptr,
    Void,
    /// `{iN, i1}` result of a checked arithmetic op.
    PairWithOverflow,
    /// `{i64, ptr, i64}` packed/ptr/len triple of a variable-length value.
    StringView,
}

impl IrType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            IrType::I1 | IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64
        )
    }

    pub fn is_fp(self) -> bool {
        matches!(self, IrType::F32 | IrType::F64)
    }

    pub fn bit_width(self) -> usize {
        match self {
            IrType::I1 => 1,
            IrType::I8 => 8,
            IrType::I16 => 16,
            IrType::I32 => 32,
            IrType::I64 => 64,
            IrType::F32 => 32,
            IrType::F64 => 64,
            IrType::Ptr => 64,
            IrType::Void | IrType::PairWithOverflow | IrType::StringView => 0,
        }
    }

    /// The integer type of `bytes` width.
    pub fn int_of_size(bytes: usize) -> IrType {
        match bytes {
            1 => IrType::I8,
            2 => IrType::I16,
            4 => IrType::I32,
            8 => IrType::I64,
            _ => panic!("no integer type of {bytes} bytes"),
        }
    }

    /// Wraps `v` to the value range of this integer type.
    pub fn truncate(self, v: i64) -> i64 {
        match self {
            IrType::I1 => v & 1,
            IrType::I8 => v as i8 as i64,
            IrType::I16 => v as i16 as i64,
            IrType::I32 => v as i32 as i64,
            _ => v,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IrType::I1 => "i1",
            IrType::I8 => "i8",
            IrType::I16 => "i16",
            IrType::I32 => "i32",
            IrType::I64 => "i64",
            IrType::F32 => "float",
            IrType::F64 => "double",
            IrType::Ptr => "ptr",
            IrType::Void => "void",
            IrType::PairWithOverflow => "{ i64, i1 }",
            IrType::StringView => "{ i64, ptr, i64 }",
        };
        write!(f, "{s}")
    }
}

/// SSA value index within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

/// Basic block index within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// An instruction operand: a constant, a function argument or the result
/// of another instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    ConstI(IrType, i64),
    ConstF(IrType, f64),
    /// A null pointer constant.
    ConstNullPtr,
    Arg(u32),
    Value(ValueId),
}

impl Operand {
    pub fn i1(v: bool) -> Operand {
        Operand::ConstI(IrType::I1, v as i64)
    }

    pub fn i32(v: i32) -> Operand {
        Operand::ConstI(IrType::I32, v as i64)
    }

    pub fn i64(v: i64) -> Operand {
        Operand::ConstI(IrType::I64, v)
    }

    pub fn f64(v: f64) -> Operand {
        Operand::ConstF(IrType::F64, v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    And,
    Or,
    Xor,
    Shl,
    AShr,
    LShr,
}

impl BinOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::SDiv => "sdiv",
            BinOp::SRem => "srem",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::AShr => "ashr",
            BinOp::LShr => "lshr",
        }
    }
}

/// Signed arithmetic with an overflow flag, the `llvm.*.with.overflow`
/// intrinsic shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckedOp {
    SAdd,
    SSub,
    SMul,
}

impl CheckedOp {
    pub fn intrinsic_name(self, ty: IrType) -> String {
        let op = match self {
            CheckedOp::SAdd => "sadd",
            CheckedOp::SSub => "ssub",
            CheckedOp::SMul => "smul",
        };
        format!("llvm.{op}.with.overflow.{ty}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ICmpPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl ICmpPred {
    pub fn mnemonic(self) -> &'static str {
        match self {
            ICmpPred::Eq => "eq",
            ICmpPred::Ne => "ne",
            ICmpPred::Slt => "slt",
            ICmpPred::Sle => "sle",
            ICmpPred::Sgt => "sgt",
            ICmpPred::Sge => "sge",
            ICmpPred::Ult => "ult",
            ICmpPred::Ule => "ule",
            ICmpPred::Ugt => "ugt",
            ICmpPred::Uge => "uge",
        }
    }
}

/// Ordered float predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FCmpPred {
    OEq,
    ONe,
    OLt,
    OLe,
    OGt,
    OGe,
}

impl FCmpPred {
    pub fn mnemonic(self) -> &'static str {
        match self {
            FCmpPred::OEq => "oeq",
            FCmpPred::ONe => "one",
            FCmpPred::OLt => "olt",
            FCmpPred::OLe => "ole",
            FCmpPred::OGt => "ogt",
            FCmpPred::OGe => "oge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    SExt,
    ZExt,
    SiToFp,
    FpToSi,
    FpExt,
    FpTrunc,
    Bitcast,
}

impl CastOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            CastOp::Trunc => "trunc",
            CastOp::SExt => "sext",
            CastOp::ZExt => "zext",
            CastOp::SiToFp => "sitofp",
            CastOp::FpToSi => "fptosi",
            CastOp::FpExt => "fpext",
            CastOp::FpTrunc => "fptrunc",
            CastOp::Bitcast => "bitcast",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    BinOp {
        ty: IrType,
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    /// Checked signed arithmetic; result is [`IrType::PairWithOverflow`].
    Checked {
        ty: IrType,
        op: CheckedOp,
        lhs: Operand,
        rhs: Operand,
    },
    /// Extracts element `index` from a pair/triple value.
    ExtractValue {
        value: Operand,
        index: u32,
    },
    ICmp {
        pred: ICmpPred,
        ty: IrType,
        lhs: Operand,
        rhs: Operand,
    },
    FCmp {
        pred: FCmpPred,
        ty: IrType,
        lhs: Operand,
        rhs: Operand,
    },
    Select {
        ty: IrType,
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    },
    Cast {
        op: CastOp,
        value: Operand,
        from: IrType,
        to: IrType,
    },
    Phi {
        ty: IrType,
        incoming: Vec<(Operand, BlockId)>,
    },
    /// Call to an extern runtime helper or another module function.
    Call {
        callee: String,
        ret: IrType,
        args: Vec<Operand>,
    },
    /// Pointer to `base + index * elem_size`.
    Gep {
        base: Operand,
        index: Operand,
        elem_size: usize,
    },
    Load {
        ty: IrType,
        ptr: Operand,
    },
    Store {
        ty: IrType,
        value: Operand,
        ptr: Operand,
    },
    /// Atomic read-modify-write add; used by shared-memory count slots.
    AtomicAdd {
        ty: IrType,
        ptr: Operand,
        value: Operand,
        /// GPU shared-memory address space (3) or generic (0).
        address_space: u8,
    },
    /// Builds a [`IrType::StringView`] triple.
    MakeStringView {
        packed: Operand,
        ptr: Operand,
        len: Operand,
    },
}

impl Instr {
    /// Result type of the instruction, `Void` for stores.
    pub fn result_type(&self) -> IrType {
        match self {
            Instr::BinOp { ty, .. } => *ty,
            Instr::Checked { .. } => IrType::PairWithOverflow,
            Instr::ExtractValue { .. } => IrType::I64,
            Instr::ICmp { .. } | Instr::FCmp { .. } => IrType::I1,
            Instr::Select { ty, .. } => *ty,
            Instr::Cast { to, .. } => *to,
            Instr::Phi { ty, .. } => *ty,
            Instr::Call { ret, .. } => *ret,
            Instr::Gep { .. } => IrType::Ptr,
            Instr::Load { ty, .. } => *ty,
            Instr::Store { .. } => IrType::Void,
            Instr::AtomicAdd { ty, .. } => *ty,
            Instr::MakeStringView { .. } => IrType::StringView,
        }
    }
}

/// Block terminator.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Br(BlockId),
    CondBr {
        cond: Operand,
        on_true: BlockId,
        on_false: BlockId,
        /// Branch weight hint: likelihood of the true edge, when known.
        likelihood: Option<f32>,
    },
    Ret(Option<Operand>),
    Unreachable,
}
