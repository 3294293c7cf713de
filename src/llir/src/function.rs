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

//! Function bodies and the builder used to emit them.

use crate::instr::*;

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: IrType,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub label: String,
    pub instrs: Vec<(ValueId, Instr)>,
    pub terminator: Option<Terminator>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: IrType,
    pub blocks: Vec<Block>,
    /// Result type of every SSA value, indexed by [`ValueId`].
    pub value_types: Vec<IrType>,
}

impl Function {
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn param_index(&self, name: &str) -> Option<u32> {
        self.params.iter().position(|p| p.name == name).map(|i| i as u32)
    }

    /// The operand referring to the named parameter.
    pub fn arg(&self, name: &str) -> Operand {
        Operand::Arg(
            self.param_index(name)
                .unwrap_or_else(|| panic!("no parameter named {name} in {}", self.name)),
        )
    }
}

/// Emits instructions into one function, one block at a time.
pub struct FunctionBuilder {
    func: Function,
    current: BlockId,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, params: Vec<Param>, ret: IrType) -> FunctionBuilder {
        let entry = Block {
            label: "entry".to_owned(),
            instrs: Vec::new(),
            terminator: None,
        };
        FunctionBuilder {
            func: Function {
                name: name.into(),
                params,
                ret,
                blocks: vec![entry],
                value_types: Vec::new(),
            },
            current: BlockId(0),
        }
    }

    pub fn func(&self) -> &Function {
        &self.func
    }

    pub fn arg(&self, name: &str) -> Operand {
        self.func.arg(name)
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn new_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = BlockId(self.func.blocks.len() as u32);
        self.func.blocks.push(Block {
            label: label.into(),
            instrs: Vec::new(),
            terminator: None,
        });
        id
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.current = block;
    }

    /// Appends `instr` to the current block and returns its result.
    pub fn push(&mut self, instr: Instr) -> Operand {
        let id = ValueId(self.func.value_types.len() as u32);
        self.func.value_types.push(instr.result_type());
        self.func.blocks[self.current.0 as usize]
            .instrs
            .push((id, instr));
        Operand::Value(id)
    }

    pub fn binop(&mut self, ty: IrType, op: BinOp, lhs: Operand, rhs: Operand) -> Operand {
        self.push(Instr::BinOp { ty, op, lhs, rhs })
    }

    pub fn checked(&mut self, ty: IrType, op: CheckedOp, lhs: Operand, rhs: Operand) -> Operand {
        self.push(Instr::Checked { ty, op, lhs, rhs })
    }

    pub fn extract_value(&mut self, value: Operand, index: u32) -> Operand {
        self.push(Instr::ExtractValue { value, index })
    }

    pub fn icmp(&mut self, pred: ICmpPred, ty: IrType, lhs: Operand, rhs: Operand) -> Operand {
        self.push(Instr::ICmp { pred, ty, lhs, rhs })
    }

    pub fn fcmp(&mut self, pred: FCmpPred, ty: IrType, lhs: Operand, rhs: Operand) -> Operand {
        self.push(Instr::FCmp { pred, ty, lhs, rhs })
    }

    pub fn select(&mut self, ty: IrType, cond: Operand, on_true: Operand, on_false: Operand) -> Operand {
        self.push(Instr::Select {
            ty,
            cond,
            on_true,
            on_false,
        })
    }

    pub fn cast(&mut self, op: CastOp, value: Operand, from: IrType, to: IrType) -> Operand {
        self.push(Instr::Cast {
            op,
            value,
            from,
            to,
        })
    }

    pub fn call(&mut self, callee: impl Into<String>, ret: IrType, args: Vec<Operand>) -> Operand {
        self.push(Instr::Call {
            callee: callee.into(),
            ret,
            args,
        })
    }

    pub fn gep(&mut self, base: Operand, index: Operand, elem_size: usize) -> Operand {
        self.push(Instr::Gep {
            base,
            index,
            elem_size,
        })
    }

    pub fn load(&mut self, ty: IrType, ptr: Operand) -> Operand {
        self.push(Instr::Load { ty, ptr })
    }

    pub fn store(&mut self, ty: IrType, value: Operand, ptr: Operand) {
        self.push(Instr::Store { ty, value, ptr });
    }

    /// Starts an empty phi in the current block; fill it with
    /// [`FunctionBuilder::add_incoming`].
    pub fn phi(&mut self, ty: IrType) -> Operand {
        self.push(Instr::Phi {
            ty,
            incoming: Vec::new(),
        })
    }

    pub fn add_incoming(&mut self, phi: Operand, value: Operand, from: BlockId) {
        let Operand::Value(id) = phi else {
            panic!("add_incoming on a non-phi operand");
        };
        for block in &mut self.func.blocks {
            for (vid, instr) in &mut block.instrs {
                if *vid == id {
                    let Instr::Phi { incoming, .. } = instr else {
                        panic!("add_incoming on a non-phi instruction");
                    };
                    incoming.push((value, from));
                    return;
                }
            }
        }
        panic!("phi value not found");
    }

    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br(target));
    }

    pub fn cond_br(&mut self, cond: Operand, on_true: BlockId, on_false: BlockId) {
        self.terminate(Terminator::CondBr {
            cond,
            on_true,
            on_false,
            likelihood: None,
        });
    }

    pub fn cond_br_weighted(
        &mut self,
        cond: Operand,
        on_true: BlockId,
        on_false: BlockId,
        likelihood: f32,
    ) {
        self.terminate(Terminator::CondBr {
            cond,
            on_true,
            on_false,
            likelihood: Some(likelihood),
        });
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.terminate(Terminator::Ret(value));
    }

    /// Whether the current block already ends in a terminator.
    pub fn is_terminated(&self) -> bool {
        self.func.blocks[self.current.0 as usize].terminator.is_some()
    }

    fn terminate(&mut self, term: Terminator) {
        let block = &mut self.func.blocks[self.current.0 as usize];
        assert!(
            block.terminator.is_none(),
            "block {} already terminated",
            block.label
        );
        block.terminator = term.into();
    }

    pub fn finish(self) -> Function {
        for block in &self.func.blocks {
            assert!(
                block.terminator.is_some(),
                "block {} of {} has no terminator",
                block.label,
                self.func.name
            );
        }
        self.func
    }
}

/// The branch diamond the generator emits for null and overflow checks:
/// evaluate in two arms, merge through a phi.
pub struct Diamond {
    pub on_true: BlockId,
    pub on_false: BlockId,
    pub merge: BlockId,
}

impl Diamond {
    /// Splits the current position three ways on `cond`. The caller emits
    /// each arm, branches to `merge`, and places the phi there.
    pub fn build(builder: &mut FunctionBuilder, cond: Operand, name: &str) -> Diamond {
        let on_true = builder.new_block(format!("{name}_true"));
        let on_false = builder.new_block(format!("{name}_false"));
        let merge = builder.new_block(format!("{name}_merge"));
        builder.cond_br(cond, on_true, on_false);
        Diamond {
            on_true,
            on_false,
            merge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_diamond() {
        let mut b = FunctionBuilder::new(
            "max0",
            vec![Param {
                name: "x".into(),
                ty: IrType::I64,
            }],
            IrType::I64,
        );
        let x = b.arg("x");
        let neg = b.icmp(ICmpPred::Slt, IrType::I64, x, Operand::i64(0));
        let d = Diamond::build(&mut b, neg, "clamp");
        b.position_at_end(d.on_true);
        b.br(d.merge);
        b.position_at_end(d.on_false);
        b.br(d.merge);
        b.position_at_end(d.merge);
        let phi = b.phi(IrType::I64);
        b.add_incoming(phi, Operand::i64(0), d.on_true);
        b.add_incoming(phi, x, d.on_false);
        b.ret(Some(phi));
        let func = b.finish();
        assert_eq!(func.blocks.len(), 4);
        assert!(func.blocks.iter().all(|blk| blk.terminator.is_some()));
    }
}
