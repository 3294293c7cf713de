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

//! Per-query mutable code generation state.

use basalt_common::config::Config;
use basalt_llir::{FunctionBuilder, IrType, Module, Operand, Param};

use crate::literals::LiteralBuffer;
use crate::options::CompilationOptions;

/// Parameters every row function takes, in order.
pub const ROW_FUNC_PARAMS: &[(&str, IrType)] = &[
    ("pos", IrType::I64),
    ("col_buffers", IrType::Ptr),
    ("literals", IrType::Ptr),
    ("agg_out", IrType::Ptr),
    ("out_count", IrType::Ptr),
    ("join_hash_tables", IrType::Ptr),
    ("bitmaps", IrType::Ptr),
];

/// Mutable state threaded through one query's code generation: the module
/// being filled, the row function under construction, hoisted literals and
/// the auxiliary buffers the generated code references by index.
pub struct CgenState {
    pub config: Config,
    pub co: CompilationOptions,
    pub module: Module,
    pub row_func: FunctionBuilder,
    pub literals: LiteralBuffer,
    /// Materialized IN-list bitmaps, referenced by index via the
    /// `bitmaps` argument.
    pub in_values_bitmaps: Vec<crate::in_values_bitmap::InValuesBitmap>,
    pub needs_error_check: bool,
}

impl CgenState {
    pub fn new(config: Config, co: CompilationOptions, module_name: &str) -> CgenState {
        let params = ROW_FUNC_PARAMS
            .iter()
            .map(|(name, ty)| Param {
                name: (*name).to_owned(),
                ty: *ty,
            })
            .collect();
        CgenState {
            config,
            co,
            module: Module::new(module_name),
            row_func: FunctionBuilder::new("row_func", params, IrType::I32),
            literals: LiteralBuffer::new(),
            in_values_bitmaps: Vec::new(),
            needs_error_check: false,
        }
    }

    /// Emits a call to a runtime helper, declaring the extern once.
    pub fn emit_call(&mut self, name: &str, ret: IrType, args: Vec<Operand>) -> Operand {
        self.module.declare_extern(name, Vec::new(), ret);
        self.row_func.call(name, ret, args)
    }

    /// Emits `if cond { return code; }` on the row function, continuing in
    /// a fresh block.
    pub fn ret_on_error(&mut self, cond: Operand, code: i32, name: &str) {
        self.needs_error_check = true;
        let fail = self.row_func.new_block(format!("{name}_fail"));
        let ok = self.row_func.new_block(format!("{name}_ok"));
        self.row_func.cond_br(cond, fail, ok);
        self.row_func.position_at_end(fail);
        self.row_func.ret(Some(Operand::ConstI(IrType::I32, code as i64)));
        self.row_func.position_at_end(ok);
    }
}
