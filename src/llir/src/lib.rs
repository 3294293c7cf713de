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

//! SSA intermediate representation for generated query code.
//!
//! The code generator lowers relational operators into one module per
//! query holding a row function and a query kernel. The module renders to
//! a stable textual form for the driver and is executable through the
//! reference interpreter for tests and the no-JIT fallback.

mod display;
pub mod function;
pub mod instr;
pub mod interp;
pub mod module;

pub use function::{Block, Diamond, Function, FunctionBuilder, Param};
pub use instr::{
    BinOp, BlockId, CastOp, CheckedOp, FCmpPred, ICmpPred, Instr, IrType, Operand, Terminator,
    ValueId,
};
pub use interp::{
    ExternFn, Interp, InterpError, Memory, PtrVal, RuntimeEnv, ScalarVal, NULL_PTR,
};
pub use module::{ExternDecl, Module};
