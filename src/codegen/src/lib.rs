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

//! The code generator: lowers a rewritten relational DAG into one row
//! function and one query kernel per query, together with the target
//! aggregator, the UDTF ABI, and the runtime helper library the generated
//! code calls into.

mod arith;
mod cast;
pub mod cgen_state;
pub mod codegen;
mod compare;
mod datetime;
pub mod descriptor;
pub mod error;
pub mod exec;
pub mod in_values_bitmap;
pub mod kernel;
pub mod literals;
pub mod options;
pub mod runtime;
pub mod target_builder;
pub mod udtf;
pub mod window;

pub use codegen::{CgValue, CodeGenerator, FragmentBinding};
pub use descriptor::QueryMemoryDescriptor;
pub use error::{CodegenError, Result};
pub use exec::{execute_dag, ColumnData, FragmentSet};
pub use kernel::{analyze_query, compile_query, CompiledQuery};
pub use options::{CompilationOptions, DeviceType};
