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

use crate::function::Function;
use crate::instr::IrType;

/// A declared-but-not-defined runtime helper.
#[derive(Debug, Clone)]
pub struct ExternDecl {
    pub name: String,
    pub params: Vec<IrType>,
    pub ret: IrType,
}

/// One query's worth of generated code: the row function, the kernel, and
/// the extern declarations they call.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    pub externs: Vec<ExternDecl>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Module {
        Module {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_function(&mut self, func: Function) {
        debug_assert!(
            self.function(&func.name).is_none(),
            "duplicate function {}",
            func.name
        );
        self.functions.push(func);
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Records an extern declaration once per distinct name.
    pub fn declare_extern(&mut self, name: &str, params: Vec<IrType>, ret: IrType) {
        if self.externs.iter().any(|e| e.name == name) {
            return;
        }
        self.externs.push(ExternDecl {
            name: name.to_owned(),
            params,
            ret,
        });
    }
}
