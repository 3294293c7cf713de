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

//! Table-valued function ABI.
//!
//! The generated entry point binds heterogeneous columnar arguments to a
//! UDTF and collects its output rows:
//! `(mgr, col_buffers, row_counts, output_buffers, output_row_count) -> i32`.
//! A negative return from the user function propagates as the error code;
//! otherwise the produced row count lands in `*output_row_count`.

use basalt_common::datum::Datum;
use basalt_common::types::TypeRef;
use basalt_llir::{
    Function, FunctionBuilder, ICmpPred, IrType, Module, Operand, Param,
};

use crate::error::{CodegenError, Result};

/// One declared UDTF input.
#[derive(Debug, Clone)]
pub enum UdtfParam {
    /// A scalar literal, placed into a 64-bit-padded local.
    Scalar { value: Datum, ty: TypeRef },
    /// A whole input column: pointer plus row count.
    Column { ty: TypeRef },
    /// A fixed-length list of input columns.
    ColumnList { ty: TypeRef, len: usize },
}

/// Compile-time metadata of a registered table function.
#[derive(Debug, Clone)]
pub struct TableFunction {
    pub name: String,
    pub params: Vec<UdtfParam>,
    pub output_types: Vec<TypeRef>,
    /// The output size is known up front; the manager is told before the
    /// call so it can allocate exactly once.
    pub pre_sized_outputs: bool,
    /// `Column`/`ColumnList` arguments are passed by value (pointer and
    /// length as separate scalars) rather than through a struct pointer.
    pub pass_column_arguments_by_value: bool,
}

/// The generated entry point plus its GPU wrapper.
pub struct TableFunctionCompilationContext {
    pub module: Module,
    pub entry_name: String,
    pub kernel_name: String,
}

pub fn compile_table_function(func: &TableFunction) -> Result<TableFunctionCompilationContext> {
    if func.output_types.is_empty() {
        return Err(CodegenError::NotSupported(
            "table function with no outputs".into(),
        ));
    }
    let entry_name = format!("{}__entry", func.name);
    let kernel_name = format!("{}__gpu_kernel", func.name);
    let mut module = Module::new(&func.name);

    module.add_function(build_entry(func, &entry_name)?);
    module.add_function(build_gpu_wrapper(func, &entry_name, &kernel_name));

    Ok(TableFunctionCompilationContext {
        module,
        entry_name,
        kernel_name,
    })
}

fn entry_params() -> Vec<Param> {
    [
        ("mgr", IrType::Ptr),
        ("col_buffers", IrType::Ptr),
        ("row_counts", IrType::Ptr),
        ("output_buffers", IrType::Ptr),
        ("output_row_count", IrType::Ptr),
    ]
    .into_iter()
    .map(|(name, ty)| Param {
        name: name.to_owned(),
        ty,
    })
    .collect()
}

fn build_entry(func: &TableFunction, entry_name: &str) -> Result<Function> {
    let mut b = FunctionBuilder::new(entry_name, entry_params(), IrType::I32);
    let col_buffers = b.arg("col_buffers");
    let row_counts = b.arg("row_counts");
    let mgr = b.arg("mgr");

    let mut call_args: Vec<Operand> = vec![mgr];
    let mut input_rows: Option<Operand> = None;
    let mut slot = 0usize;
    for param in &func.params {
        match param {
            UdtfParam::Scalar { value, ty } => {
                let operand = match value {
                    Datum::Int(v) => Operand::i64(*v),
                    Datum::Bool(v) => Operand::i64(*v as i64),
                    Datum::Fp(v) => Operand::f64(*v),
                    Datum::Null => Operand::i64(ty.inline_null_value()),
                    other => {
                        return Err(CodegenError::NotSupported(format!(
                            "scalar UDTF argument {other}"
                        )))
                    }
                };
                call_args.push(operand);
            }
            UdtfParam::Column { .. } => {
                let entry = b.gep(col_buffers, Operand::i64(slot as i64), 8);
                let ptr = b.load(IrType::Ptr, entry);
                let count_entry = b.gep(row_counts, Operand::i64(slot as i64), 8);
                let count = b.load(IrType::I64, count_entry);
                if input_rows.is_none() {
                    input_rows = Some(count);
                }
                if func.pass_column_arguments_by_value {
                    call_args.push(ptr);
                    call_args.push(count);
                } else {
                    let column = b.call(
                        "ColumnStruct_make",
                        IrType::Ptr,
                        vec![ptr, count],
                    );
                    call_args.push(column);
                }
                slot += 1;
            }
            UdtfParam::ColumnList { len, .. } => {
                // the list is the contiguous run of buffer slots
                let base = b.gep(col_buffers, Operand::i64(slot as i64), 8);
                let count_entry = b.gep(row_counts, Operand::i64(slot as i64), 8);
                let count = b.load(IrType::I64, count_entry);
                if input_rows.is_none() {
                    input_rows = Some(count);
                }
                if func.pass_column_arguments_by_value {
                    call_args.push(base);
                    call_args.push(Operand::i64(*len as i64));
                    call_args.push(count);
                } else {
                    let list = b.call(
                        "ColumnListStruct_make",
                        IrType::Ptr,
                        vec![base, Operand::i64(*len as i64), count],
                    );
                    call_args.push(list);
                }
                slot += len;
            }
        }
    }

    if func.pre_sized_outputs {
        let rows = input_rows.unwrap_or(Operand::i64(0));
        b.call(
            "TableFunctionManager_set_output_row_size",
            IrType::I32,
            vec![mgr, rows],
        );
    }

    // output columns are handed over as the raw buffer table
    let output_buffers = b.arg("output_buffers");
    call_args.push(output_buffers);

    let produced = b.call(&func.name, IrType::I64, call_args);
    let failed = b.icmp(ICmpPred::Slt, IrType::I64, produced, Operand::i64(0));
    let fail_bb = b.new_block("udtf_error");
    let ok_bb = b.new_block("udtf_done");
    b.cond_br(failed, fail_bb, ok_bb);
    b.position_at_end(fail_bb);
    let code = b.cast(basalt_llir::CastOp::Trunc, produced, IrType::I64, IrType::I32);
    b.ret(Some(code));
    b.position_at_end(ok_bb);
    let out_ptr = b.arg("output_row_count");
    b.store(IrType::I64, produced, out_ptr);
    b.ret(Some(Operand::ConstI(IrType::I32, 0)));
    Ok(b.finish())
}

/// The thin kernel that wraps the entry point for GPU launches; the
/// driver allocates device buffers, copies inputs, launches it, and
/// copies the produced row count back.
fn build_gpu_wrapper(_func: &TableFunction, entry_name: &str, kernel_name: &str) -> Function {
    let mut b = FunctionBuilder::new(kernel_name, entry_params(), IrType::I32);
    let args = ["mgr", "col_buffers", "row_counts", "output_buffers", "output_row_count"]
        .iter()
        .map(|name| b.arg(name))
        .collect();
    let rc = b.call(entry_name, IrType::I32, args);
    b.ret(Some(rc));
    b.finish()
}

#[cfg(test)]
mod tests {
    use basalt_common::types::TypeContext;
    use basalt_llir::{Interp, Memory, RuntimeEnv, ScalarVal};

    use super::*;

    /// A no-op table function copying its input column to the output.
    fn copy_udtf() -> TableFunction {
        let ctx = TypeContext::global();
        TableFunction {
            name: "copy_column".to_owned(),
            params: vec![UdtfParam::Column {
                ty: ctx.column(ctx.int64(false), false),
            }],
            output_types: vec![ctx.int64(false)],
            pre_sized_outputs: true,
            pass_column_arguments_by_value: true,
        }
    }

    #[test]
    fn no_op_udtf_round_trips_rows() {
        let func = copy_udtf();
        let compiled = compile_table_function(&func).unwrap();
        let mut mem = Memory::new();

        let input: Vec<u8> = (0..4i64).flat_map(|v| v.to_le_bytes()).collect();
        let input_ptr = mem.add_buffer(input);
        let col_buffers = mem.alloc(8);
        mem.store_ptr(col_buffers, input_ptr).unwrap();
        let mut counts = Vec::new();
        counts.extend_from_slice(&4i64.to_le_bytes());
        let row_counts = mem.add_buffer(counts);
        let out_col = mem.alloc(4 * 8);
        let output_buffers = mem.alloc(8);
        mem.store_ptr(output_buffers, out_col).unwrap();
        let out_row_count = mem.alloc(8);
        let mgr = mem.alloc(8);

        let mut env = RuntimeEnv::new();
        env.register("TableFunctionManager_set_output_row_size", |_mem, _args| {
            Ok(ScalarVal::I(0))
        });
        env.register("copy_column", |mem, args| {
            // (mgr, input_ptr, input_count, output_buffers)
            let input = args[1].as_ptr()?;
            let count = args[2].as_i()?;
            let outputs = args[3].as_ptr()?;
            let out = mem.load_ptr(outputs)?;
            for i in 0..count {
                let v = mem.read_int(input.offset_by(i * 8), 8)?;
                mem.write_int(out.offset_by(i * 8), 8, v)?;
            }
            Ok(ScalarVal::I(count))
        });

        let interp = Interp::new(&compiled.module, &env);
        let rc = interp
            .call(
                &mut mem,
                &compiled.entry_name,
                &[
                    ScalarVal::Ptr(mgr),
                    ScalarVal::Ptr(col_buffers),
                    ScalarVal::Ptr(row_counts),
                    ScalarVal::Ptr(output_buffers),
                    ScalarVal::Ptr(out_row_count),
                ],
            )
            .unwrap()
            .as_i()
            .unwrap();
        assert_eq!(rc, 0);
        assert_eq!(mem.read_int(out_row_count, 8).unwrap(), 4);
        for i in 0..4i64 {
            assert_eq!(mem.read_int(out_col.offset_by(i * 8), 8).unwrap(), i);
        }
    }

    #[test]
    fn negative_return_propagates_as_error() {
        let func = copy_udtf();
        let compiled = compile_table_function(&func).unwrap();
        let mut mem = Memory::new();
        let input_ptr = mem.add_buffer(Vec::new());
        let col_buffers = mem.alloc(8);
        mem.store_ptr(col_buffers, input_ptr).unwrap();
        let row_counts = mem.add_buffer(0i64.to_le_bytes().to_vec());
        let output_buffers = mem.alloc(8);
        let out_col = mem.alloc(8);
        mem.store_ptr(output_buffers, out_col).unwrap();
        let out_row_count = mem.alloc(8);
        let mgr = mem.alloc(8);

        let mut env = RuntimeEnv::new();
        env.register("TableFunctionManager_set_output_row_size", |_mem, _args| {
            Ok(ScalarVal::I(0))
        });
        env.register("copy_column", |_mem, _args| Ok(ScalarVal::I(-3)));

        let interp = Interp::new(&compiled.module, &env);
        let rc = interp
            .call(
                &mut mem,
                &compiled.entry_name,
                &[
                    ScalarVal::Ptr(mgr),
                    ScalarVal::Ptr(col_buffers),
                    ScalarVal::Ptr(row_counts),
                    ScalarVal::Ptr(output_buffers),
                    ScalarVal::Ptr(out_row_count),
                ],
            )
            .unwrap()
            .as_i()
            .unwrap();
        assert_eq!(rc, -3);
    }
}
