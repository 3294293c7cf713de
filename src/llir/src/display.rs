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

//! Textual rendering of modules in an `.ll`-flavored syntax. The output is
//! stable and is what snapshot tests and the driver handoff consume.

use std::fmt;

use crate::function::{Block, Function};
use crate::instr::*;
use crate::module::Module;

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for ext in &self.externs {
            let params = ext
                .params
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(f, "declare {} @{}({})", ext.ret, ext.name, params)?;
        }
        if !self.externs.is_empty() {
            writeln!(f)?;
        }
        for (i, func) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|p| format!("{} %{}", p.ty, p.name))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "define {} @{}({}) {{", self.ret, self.name, params)?;
        for block in &self.blocks {
            write_block(f, self, block)?;
        }
        writeln!(f, "}}")
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, func: &Function, block: &Block) -> fmt::Result {
    writeln!(f, "{}:", block.label)?;
    for (id, instr) in &block.instrs {
        write!(f, "  ")?;
        if instr.result_type() != IrType::Void {
            write!(f, "%v{} = ", id.0)?;
        }
        write_instr(f, func, instr)?;
        writeln!(f)?;
    }
    match &block.terminator {
        Some(term) => {
            write!(f, "  ")?;
            write_terminator(f, func, term)?;
            writeln!(f)
        }
        None => writeln!(f, "  ; <unterminated>"),
    }
}

fn opnd(func: &Function, op: &Operand) -> String {
    match op {
        Operand::ConstI(_, v) => format!("{v}"),
        Operand::ConstF(_, v) => {
            if v.fract() == 0.0 && v.is_finite() {
                format!("{v:.1}")
            } else {
                format!("{v}")
            }
        }
        Operand::ConstNullPtr => "null".to_owned(),
        Operand::Arg(i) => format!("%{}", func.params[*i as usize].name),
        Operand::Value(id) => format!("%v{}", id.0),
    }
}

fn write_instr(f: &mut fmt::Formatter<'_>, func: &Function, instr: &Instr) -> fmt::Result {
    match instr {
        Instr::BinOp { ty, op, lhs, rhs } => write!(
            f,
            "{} {} {}, {}",
            op.mnemonic(),
            ty,
            opnd(func, lhs),
            opnd(func, rhs)
        ),
        Instr::Checked { ty, op, lhs, rhs } => write!(
            f,
            "call {{ {ty}, i1 }} @{}({ty} {}, {ty} {})",
            op.intrinsic_name(*ty),
            opnd(func, lhs),
            opnd(func, rhs)
        ),
        Instr::ExtractValue { value, index } => {
            write!(f, "extractvalue {}, {}", opnd(func, value), index)
        }
        Instr::ICmp { pred, ty, lhs, rhs } => write!(
            f,
            "icmp {} {} {}, {}",
            pred.mnemonic(),
            ty,
            opnd(func, lhs),
            opnd(func, rhs)
        ),
        Instr::FCmp { pred, ty, lhs, rhs } => write!(
            f,
            "fcmp {} {} {}, {}",
            pred.mnemonic(),
            ty,
            opnd(func, lhs),
            opnd(func, rhs)
        ),
        Instr::Select {
            ty,
            cond,
            on_true,
            on_false,
        } => write!(
            f,
            "select i1 {}, {} {}, {} {}",
            opnd(func, cond),
            ty,
            opnd(func, on_true),
            ty,
            opnd(func, on_false)
        ),
        Instr::Cast {
            op,
            value,
            from,
            to,
        } => write!(
            f,
            "{} {} {} to {}",
            op.mnemonic(),
            from,
            opnd(func, value),
            to
        ),
        Instr::Phi { ty, incoming } => {
            write!(f, "phi {ty} ")?;
            for (i, (value, block)) in incoming.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(
                    f,
                    "[ {}, %{} ]",
                    opnd(func, value),
                    func.blocks[block.0 as usize].label
                )?;
            }
            Ok(())
        }
        Instr::Call { callee, ret, args } => {
            let rendered = args
                .iter()
                .map(|a| opnd(func, a))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "call {ret} @{callee}({rendered})")
        }
        Instr::Gep {
            base,
            index,
            elem_size,
        } => write!(
            f,
            "gep ptr {}, {} x {}",
            opnd(func, base),
            opnd(func, index),
            elem_size
        ),
        Instr::Load { ty, ptr } => write!(f, "load {ty}, ptr {}", opnd(func, ptr)),
        Instr::Store { ty, value, ptr } => {
            write!(f, "store {ty} {}, ptr {}", opnd(func, value), opnd(func, ptr))
        }
        Instr::AtomicAdd {
            ty,
            ptr,
            value,
            address_space,
        } => write!(
            f,
            "atomicrmw add ptr addrspace({}) {}, {ty} {}",
            address_space,
            opnd(func, ptr),
            opnd(func, value)
        ),
        Instr::MakeStringView { packed, ptr, len } => write!(
            f,
            "stringview {{ {}, {}, {} }}",
            opnd(func, packed),
            opnd(func, ptr),
            opnd(func, len)
        ),
    }
}

fn write_terminator(f: &mut fmt::Formatter<'_>, func: &Function, term: &Terminator) -> fmt::Result {
    match term {
        Terminator::Br(target) => {
            write!(f, "br label %{}", func.blocks[target.0 as usize].label)
        }
        Terminator::CondBr {
            cond,
            on_true,
            on_false,
            likelihood,
        } => {
            write!(
                f,
                "br i1 {}, label %{}, label %{}",
                opnd(func, cond),
                func.blocks[on_true.0 as usize].label,
                func.blocks[on_false.0 as usize].label
            )?;
            if let Some(p) = likelihood {
                write!(f, " ; !prof {p}")?;
            }
            Ok(())
        }
        Terminator::Ret(Some(value)) => write!(f, "ret {}", opnd(func, value)),
        Terminator::Ret(None) => write!(f, "ret void"),
        Terminator::Unreachable => write!(f, "unreachable"),
    }
}
