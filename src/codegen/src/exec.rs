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

//! The reference execution driver.
//!
//! Runs a compiled query against in-memory columnar fragments through the
//! IR interpreter: builds the hash tables, binds the buffers, runs the
//! kernel, and materializes the result rows, applying the sort node on
//! the way out. The production driver does the same against JITed code.

use std::cmp::Ordering;

use hashbrown::HashMap;

use basalt_common::config::Config;
use basalt_common::datum::Datum;
use basalt_common::dictionary::DictionaryProviderRef;
use basalt_common::error::error_message;
use basalt_common::types::{Type, TypeRef};
use basalt_expr::expr::Expr;
use basalt_expr::{ExprRef, NodeId};
use basalt_join::{
    build_perfect_hash_table, HashTableBuildSpec, JoinColumn, KeyRange, PerfectJoinProbe,
};
use basalt_llir::{Interp, Memory, PtrVal, RuntimeEnv, ScalarVal};
use basalt_plan::builder::QueryDag;
use thiserror_ext::AsReport;
use tracing::warn;

use crate::codegen::InputColDesc;
use crate::descriptor::{QueryMemoryDescriptor, TargetKind, TargetSlot};
use crate::error::{CodegenError, Result};
use crate::kernel::{analyze_query, compile_query, CompiledQuery, QueryShape};
use crate::options::CompilationOptions;
use crate::runtime::{self, EMPTY_KEY_64};
use crate::window::compute_window_output;

/// One materialized input column.
#[derive(Debug, Clone)]
pub enum ColumnData {
    Fixed {
        bytes: Vec<u8>,
        width: usize,
    },
    /// Variable-length data: signed (offset, byte length) pairs plus the
    /// flat data buffer; a negative offset marks a NULL row.
    Varlen {
        offsets: Vec<(i64, i64)>,
        data: Vec<u8>,
    },
}

/// In-memory columnar fragments, keyed by (scan node, column index).
#[derive(Debug, Default, Clone)]
pub struct FragmentSet {
    pub row_counts: HashMap<NodeId, usize>,
    pub columns: HashMap<(NodeId, usize), ColumnData>,
}

impl FragmentSet {
    pub fn new() -> FragmentSet {
        FragmentSet::default()
    }

    /// Adds a fixed-width column, encoding NULLs with the type sentinel.
    pub fn add_int_column(
        &mut self,
        node: NodeId,
        index: usize,
        ty: TypeRef,
        values: &[Option<i64>],
    ) {
        let width = ty.size();
        let sentinel = ty.inline_null_value();
        let mut bytes = Vec::with_capacity(values.len() * width);
        for v in values {
            let raw = v.unwrap_or(sentinel);
            bytes.extend_from_slice(&raw.to_le_bytes()[..width]);
        }
        self.row_counts.insert(node, values.len());
        self.columns
            .insert((node, index), ColumnData::Fixed { bytes, width });
    }

    pub fn add_fp_column(&mut self, node: NodeId, index: usize, ty: TypeRef, values: &[Option<f64>]) {
        let width = ty.size();
        let mut bytes = Vec::with_capacity(values.len() * width);
        for v in values {
            let raw = v.unwrap_or(f64::NAN);
            if width == 4 {
                bytes.extend_from_slice(&(raw as f32).to_bits().to_le_bytes());
            } else {
                bytes.extend_from_slice(&raw.to_bits().to_le_bytes());
            }
        }
        self.row_counts.insert(node, values.len());
        self.columns
            .insert((node, index), ColumnData::Fixed { bytes, width });
    }

    /// Adds a text column; the data lands in a flat buffer addressed by
    /// (offset, length) pairs.
    pub fn add_text_column(&mut self, node: NodeId, index: usize, values: &[Option<&str>]) {
        let mut data = Vec::new();
        let mut offsets = Vec::with_capacity(values.len());
        for v in values {
            match v {
                Some(s) => {
                    offsets.push((data.len() as i64, s.len() as i64));
                    data.extend_from_slice(s.as_bytes());
                }
                None => offsets.push((-(data.len() as i64), -1)),
            }
        }
        self.row_counts.insert(node, values.len());
        self.columns
            .insert((node, index), ColumnData::Varlen { offsets, data });
    }

    fn row_count(&self, node: NodeId) -> usize {
        self.row_counts.get(&node).copied().unwrap_or(0)
    }

    /// Reads a fixed-width column back as datums, for the window
    /// precompute.
    fn read_column(&self, node: NodeId, index: usize, ty: TypeRef) -> Result<Vec<Datum>> {
        let data = self.columns.get(&(node, index)).ok_or_else(|| {
            CodegenError::NotSupported(format!("no data for column ${node}.{index}"))
        })?;
        let ColumnData::Fixed { bytes, width } = data else {
            return Err(CodegenError::NotSupported(
                "window inputs over variable-length columns".into(),
            ));
        };
        let mut out = Vec::new();
        for chunk in bytes.chunks_exact(*width) {
            let mut raw = [0u8; 8];
            raw[..*width].copy_from_slice(chunk);
            let unsigned = u64::from_le_bytes(raw);
            let shift = 64 - *width * 8;
            let value = ((unsigned << shift) as i64) >> shift;
            out.push(decode_datum(ty, value, f64::from_bits(unsigned)));
        }
        Ok(out)
    }
}

fn decode_datum(ty: TypeRef, int_value: i64, fp_value: f64) -> Datum {
    if ty.is_fp() {
        let v = if ty.is_fp32() {
            f32::from_bits(int_value as u32) as f64
        } else {
            fp_value
        };
        if v.is_nan() {
            Datum::Null
        } else {
            Datum::Fp(v)
        }
    } else if ty.nullable() && int_value == ty.inline_null_value() {
        Datum::Null
    } else if ty.is_boolean() {
        Datum::Bool(int_value != 0)
    } else {
        Datum::Int(int_value)
    }
}

/// Compiles and runs `dag` against `fragments`, returning materialized
/// rows.
pub fn execute_dag(
    dag: &QueryDag,
    config: &Config,
    co: CompilationOptions,
    dict_provider: Option<DictionaryProviderRef>,
    fragments: &FragmentSet,
) -> Result<Vec<Vec<Datum>>> {
    let shape = analyze_query(dag)?;
    let mut fragments = fragments.clone();
    materialize_values_nodes(dag, &mut fragments)?;
    let fragments = &fragments;
    let outer_rows = outer_row_count(&shape, fragments);

    // build the hash table first; its layout shapes the probe IR
    let mut inner_rows = 1usize;
    let probe = match &shape.join {
        None => None,
        Some(join) => {
            let data = fragments
                .columns
                .get(&(join.inner_node, join.inner_col_index))
                .ok_or_else(|| {
                    CodegenError::NotSupported("missing build-side column data".into())
                })?;
            let ColumnData::Fixed { bytes, width } = data else {
                return Err(CodegenError::NotSupported(
                    "variable-length join keys".into(),
                ));
            };
            inner_rows = fragments.row_count(join.inner_node).max(1);
            let col = JoinColumn {
                data: bytes,
                num_elems: fragments.row_count(join.inner_node),
                elem_size: *width,
            };
            let null_val = join.inner_ty.inline_null_value();
            let range = key_range(col, null_val);
            let spec = HashTableBuildSpec {
                key_type: join.inner_ty,
                range,
                join_type: join.join_type,
                is_bw_eq: join.is_bw_eq,
                inner_col: col,
                null_val,
                translation_map: None,
                memory_level: basalt_common::buffer::MemoryLevel::Cpu,
                device_id: 0,
            };
            let table = build_perfect_hash_table(&spec, config, None)?;
            Some(PerfectJoinProbe {
                table,
                range,
                is_bw_eq: join.is_bw_eq,
                key_nullable: join.outer_expr.ty().nullable(),
                null_val: join.outer_expr.ty().canonicalize().inline_null_value(),
                is_date: join.inner_ty.is_date(),
                bucket_normalization: basalt_join::bucket_normalization(join.inner_ty),
            })
        }
    };

    let entry_count = if shape.is_aggregate {
        if shape.group_by_exprs.is_empty() {
            1
        } else {
            (outer_rows * 2).next_power_of_two().max(16)
        }
    } else {
        outer_rows * inner_rows + 8
    };

    let compiled = compile_query(
        &shape,
        config,
        co,
        dict_provider.clone(),
        probe.as_ref(),
        entry_count,
    )?;
    run_compiled(&compiled, dict_provider, fragments, probe.as_ref(), outer_rows)
}

/// Turns `LogicalValues` literal rows into ordinary input columns.
fn materialize_values_nodes(dag: &QueryDag, fragments: &mut FragmentSet) -> Result<()> {
    for node in &dag.nodes {
        let basalt_plan::RelAlgNode::Values(values) = node.as_ref() else {
            continue;
        };
        for (col, ty) in values.row_type.iter().enumerate() {
            if ty.is_fp() {
                let column: Vec<Option<f64>> = values
                    .rows
                    .iter()
                    .map(|row| {
                        let c = &row[col];
                        (!c.is_null).then(|| c.value.as_fp().unwrap_or(f64::NAN))
                    })
                    .collect();
                fragments.add_fp_column(values.id, col, *ty, &column);
            } else if ty.is_null() {
                // untyped NULL columns are never loaded; only the row
                // count matters
                continue;
            } else if ty.is_integer_like() {
                let column: Vec<Option<i64>> = values
                    .rows
                    .iter()
                    .map(|row| {
                        let c = &row[col];
                        (!c.is_null).then(|| c.value.as_int().unwrap_or(0))
                    })
                    .collect();
                fragments.add_int_column(values.id, col, *ty, &column);
            } else {
                return Err(CodegenError::NotSupported(format!(
                    "VALUES rows of type {ty}"
                )));
            }
        }
        fragments.row_counts.insert(values.id, values.rows.len());
    }
    Ok(())
}

fn outer_row_count(shape: &QueryShape, fragments: &FragmentSet) -> usize {
    let outer_scan = match &shape.join {
        Some(join) => shape
            .scan_nodes
            .iter()
            .find(|n| **n != join.inner_node)
            .copied()
            .or(Some(join.inner_node)),
        None => shape.scan_nodes.first().copied(),
    };
    outer_scan.map(|n| fragments.row_count(n)).unwrap_or(0)
}

fn key_range(col: JoinColumn<'_>, null_val: i64) -> KeyRange {
    let mut min = i64::MAX;
    let mut max = i64::MIN;
    let mut has_nulls = false;
    for i in 0..col.num_elems {
        let v = col.get(i);
        if v == null_val {
            has_nulls = true;
            continue;
        }
        min = min.min(v);
        max = max.max(v);
    }
    if min > max {
        // empty or all-null build side: a one-entry table that never hits
        min = 0;
        max = 0;
    }
    KeyRange {
        min,
        max,
        has_nulls,
    }
}

fn run_compiled(
    compiled: &CompiledQuery,
    dict_provider: Option<DictionaryProviderRef>,
    fragments: &FragmentSet,
    probe: Option<&PerfectJoinProbe>,
    outer_rows: usize,
) -> Result<Vec<Vec<Datum>>> {
    let desc = &compiled.desc;
    let mut mem = Memory::new();

    // column buffers, in binding slot order
    let mut slot_ptrs: Vec<(usize, PtrVal)> = Vec::new();
    for col in &compiled.binding.cols {
        let slot = compiled
            .binding
            .slot_of(col.source, col.index)
            .expect("bound column");
        if is_window_slot(compiled, col) {
            let ptr = compute_window_buffer(compiled, col, fragments, &mut mem)?;
            slot_ptrs.push((slot, ptr));
            continue;
        }
        let data = fragments.columns.get(&(col.source, col.index)).ok_or_else(|| {
            CodegenError::NotSupported(format!(
                "no data for column ${}.{}",
                col.source, col.index
            ))
        })?;
        match data {
            ColumnData::Fixed { bytes, .. } => {
                let ptr = mem.add_buffer(bytes.clone());
                slot_ptrs.push((slot, ptr));
            }
            ColumnData::Varlen { offsets, data } => {
                let mut offset_bytes = Vec::with_capacity(offsets.len() * 16);
                for (off, len) in offsets {
                    offset_bytes.extend_from_slice(&off.to_le_bytes());
                    offset_bytes.extend_from_slice(&len.to_le_bytes());
                }
                let offsets_ptr = mem.add_buffer(offset_bytes);
                let data_ptr = mem.add_buffer(data.clone());
                slot_ptrs.push((slot, offsets_ptr));
                slot_ptrs.push((col.data_slot, data_ptr));
            }
        }
    }
    let col_buffers = mem.alloc(compiled.binding.buffer_count().max(1) * 8);
    for (slot, ptr) in &slot_ptrs {
        mem.store_ptr(col_buffers.offset_by((*slot * 8) as i64), *ptr)?;
    }

    // literals, bitmaps, join tables
    let literals = mem.add_buffer(compiled.literal_bytes.clone());
    let bitmaps_table = mem.alloc(compiled.bitmaps.len().max(1) * 8);
    for (i, bitmap) in compiled.bitmaps.iter().enumerate() {
        let ptr = mem.add_buffer(bitmap.bitmap.clone());
        mem.store_ptr(bitmaps_table.offset_by((i * 8) as i64), ptr)?;
    }
    let join_tables = mem.alloc(8);
    if let Some(probe) = probe {
        let table_ptr = mem.add_buffer(probe.table.as_bytes());
        mem.store_ptr(join_tables, table_ptr)?;
    }

    // the output buffer, initialized with the row template
    let agg_out = {
        let mut template = Vec::with_capacity(desc.row_bytes());
        for _ in 0..desc.group_key_types.len() {
            template.extend_from_slice(&EMPTY_KEY_64.to_le_bytes());
        }
        for init in desc.slot_init_values() {
            template.extend_from_slice(&init.to_le_bytes());
        }
        let mut buffer = Vec::with_capacity(desc.entry_count * template.len());
        for _ in 0..desc.entry_count {
            buffer.extend_from_slice(&template);
        }
        mem.add_buffer(buffer)
    };
    let out_count = mem.alloc(8);

    let mut env = RuntimeEnv::new();
    runtime::register_runtime(&mut env, dict_provider.clone());
    basalt_join::register_runtime(&mut env);
    runtime::reset_aggregate_scratch();

    let interp = Interp::new(&compiled.module, &env);
    let code = interp
        .call(
            &mut mem,
            "query_kernel",
            &[
                ScalarVal::I(outer_rows as i64),
                ScalarVal::Ptr(col_buffers),
                ScalarVal::Ptr(literals),
                ScalarVal::Ptr(agg_out),
                ScalarVal::Ptr(out_count),
                ScalarVal::Ptr(join_tables),
                ScalarVal::Ptr(bitmaps_table),
            ],
        )?
        .as_i()?;
    if code != 0 {
        let err = CodegenError::Runtime {
            code: code as i32,
            message: error_message(code as i32).to_owned(),
        };
        warn!(error = %err.as_report(), "query kernel returned an error");
        return Err(err);
    }

    // materialize
    let mut rows = Vec::new();
    if desc.is_projection {
        let produced = mem.read_int(out_count, 8)? as usize;
        for row in 0..produced {
            let base = agg_out.offset_by((row * desc.row_bytes()) as i64);
            rows.push(materialize_row(desc, &mem, base, &dict_provider)?);
        }
    } else if desc.group_key_types.is_empty() {
        rows.push(materialize_row(desc, &mem, agg_out, &dict_provider)?);
    } else {
        for entry in 0..desc.entry_count {
            let base = agg_out.offset_by((entry * desc.row_bytes()) as i64);
            let first_key = mem.read_int(base, 8)?;
            if first_key == EMPTY_KEY_64 {
                continue;
            }
            let mut row = Vec::new();
            for (k, key_ty) in desc.group_key_types.iter().enumerate() {
                let raw = mem.read_int(base.offset_by((k * 8) as i64), 8)?;
                row.push(finalize_key(*key_ty, raw, &dict_provider));
            }
            let slots_base = base.offset_by((desc.group_key_types.len() * 8) as i64);
            row.extend(materialize_row(desc, &mem, slots_base, &dict_provider)?);
            rows.push(row);
        }
    }

    apply_sort(compiled, &mut rows);
    Ok(rows)
}

fn is_window_slot(compiled: &CompiledQuery, col: &InputColDesc) -> bool {
    compiled.windows.iter().any(|w| w.pseudo_node == col.source)
}

/// Precomputes a window function's output column into a dense buffer.
fn compute_window_buffer(
    compiled: &CompiledQuery,
    col: &InputColDesc,
    fragments: &FragmentSet,
    mem: &mut Memory,
) -> Result<PtrVal> {
    let desc = compiled
        .windows
        .iter()
        .find(|w| w.pseudo_node == col.source)
        .expect("window slot has a descriptor");
    let func = &desc.func;
    let read_inputs = |exprs: &[ExprRef]| -> Result<Vec<Vec<Datum>>> {
        exprs
            .iter()
            .map(|e| match e.as_ref() {
                Expr::ColumnRef(c) => fragments.read_column(c.node, c.index, c.ty),
                Expr::Constant(c) => {
                    let n = fragments
                        .row_counts
                        .values()
                        .copied()
                        .max()
                        .unwrap_or(0);
                    Ok(vec![
                        if c.is_null {
                            Datum::Null
                        } else {
                            c.value.clone()
                        };
                        n
                    ])
                }
                _ => Err(CodegenError::NotSupported(
                    "window inputs must be plain columns".into(),
                )),
            })
            .collect()
    };
    let args = read_inputs(&func.args)?;
    let partitions = read_inputs(&func.partition_keys)?;
    let orders = read_inputs(&func.order_keys)?;
    let num_rows = partitions
        .first()
        .or(orders.first())
        .or(args.first())
        .map(|c| c.len())
        .unwrap_or(0);
    let out = compute_window_output(func, &args, &partitions, &orders, num_rows)?;
    // serialize with the sentinel encoding of the bound slot type
    let mut bytes = Vec::with_capacity(out.len() * 8);
    for v in &out {
        if col.ty.is_fp() {
            let raw = match v {
                Datum::Null => f64::NAN,
                other => other.as_fp().unwrap_or(f64::NAN),
            };
            bytes.extend_from_slice(&raw.to_bits().to_le_bytes());
        } else {
            let raw = match v {
                Datum::Null => col.ty.inline_null_value(),
                other => other.as_int().unwrap_or(0),
            };
            bytes.extend_from_slice(&raw.to_le_bytes());
        }
    }
    Ok(mem.add_buffer(bytes))
}

fn finalize_key(ty: TypeRef, raw: i64, dict_provider: &Option<DictionaryProviderRef>) -> Datum {
    if ty.nullable() && raw == ty.inline_null_value() {
        return Datum::Null;
    }
    if let Type::ExtDictionary { dict_id, .. } = ty {
        if let Some(provider) = dict_provider {
            if let Some(dict) = provider.dictionary(*dict_id) {
                if let Some(s) = dict.string(raw as i32) {
                    return Datum::Str(s.into());
                }
            }
        }
    }
    if ty.is_fp() {
        let v = f64::from_bits(raw as u64);
        return if v.is_nan() { Datum::Null } else { Datum::Fp(v) };
    }
    if ty.is_boolean() {
        return Datum::Bool(raw != 0);
    }
    Datum::Int(raw)
}

/// Reads one row of target slots and finalizes each target.
fn materialize_row(
    desc: &QueryMemoryDescriptor,
    mem: &Memory,
    slots_base: PtrVal,
    dict_provider: &Option<DictionaryProviderRef>,
) -> Result<Vec<Datum>> {
    let mut out = Vec::with_capacity(desc.targets.len());
    for target in &desc.targets {
        out.push(finalize_target(target, mem, slots_base, dict_provider)?);
    }
    Ok(out)
}

fn slot_is_fp(ty: TypeRef) -> bool {
    ty.is_fp()
}

fn finalize_target(
    target: &TargetSlot,
    mem: &Memory,
    slots_base: PtrVal,
    dict_provider: &Option<DictionaryProviderRef>,
) -> Result<Datum> {
    let slot_ptr = slots_base.offset_by((target.slot * 8) as i64);
    let raw = mem.read_int(slot_ptr, 8)?;
    Ok(match &target.kind {
        TargetKind::Projected => {
            let ty = target.ty;
            if slot_is_fp(ty) {
                let v = f64::from_bits(raw as u64);
                if v.is_nan() && ty.nullable() {
                    Datum::Null
                } else {
                    Datum::Fp(v)
                }
            } else {
                finalize_key(ty, raw, dict_provider)
            }
        }
        TargetKind::Count { .. } => Datum::Int(raw),
        TargetKind::Sum { arg } | TargetKind::Min { arg } | TargetKind::Max { arg } => {
            if slot_is_fp(arg.ty()) {
                let v = f64::from_bits(raw as u64);
                if v.is_nan() {
                    Datum::Null
                } else {
                    Datum::Fp(v)
                }
            } else if raw == crate::descriptor::slot_sentinel(arg.ty()) {
                Datum::Null
            } else {
                Datum::Int(raw)
            }
        }
        TargetKind::Avg { arg } => {
            let count_ptr =
                slots_base.offset_by((target.count_slot.expect("avg count slot") * 8) as i64);
            let count = mem.read_int(count_ptr, 8)?;
            if count == 0 {
                Datum::Null
            } else if slot_is_fp(arg.ty()) {
                Datum::Fp(f64::from_bits(raw as u64) / count as f64)
            } else {
                Datum::Fp(raw as f64 / count as f64)
            }
        }
        TargetKind::SingleValue { arg } | TargetKind::Sample { arg } => {
            if slot_is_fp(arg.ty()) {
                let v = f64::from_bits(raw as u64);
                if v.is_nan() {
                    Datum::Null
                } else {
                    Datum::Fp(v)
                }
            } else if raw == crate::descriptor::slot_sentinel(arg.ty()) {
                Datum::Null
            } else {
                finalize_key(arg.ty().with_nullable(false), raw, dict_provider)
            }
        }
        TargetKind::ApproxCountDistinct { .. } => {
            Datum::Int(runtime::approx_count_distinct_estimate(slot_ptr))
        }
        TargetKind::ApproxQuantile { fraction, .. } => {
            match runtime::approx_quantile_result(slot_ptr, *fraction) {
                Some(v) => Datum::Fp(v),
                None => Datum::Null,
            }
        }
    })
}

fn datum_order(a: &Datum, b: &Datum) -> Ordering {
    match (a, b) {
        (Datum::Int(x), Datum::Int(y)) => x.cmp(y),
        (Datum::Fp(x), Datum::Fp(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Datum::Int(x), Datum::Fp(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Datum::Fp(x), Datum::Int(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Datum::Bool(x), Datum::Bool(y)) => x.cmp(y),
        (Datum::Str(x), Datum::Str(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Applies the sort node's collation, offset and limit to the
/// materialized rows.
fn apply_sort(compiled: &CompiledQuery, rows: &mut Vec<Vec<Datum>>) {
    let Some(sort) = &compiled.shape.sort else {
        return;
    };
    if sort.empty_result {
        rows.clear();
        return;
    }
    if !sort.collation.is_empty() {
        let collation = sort.collation.clone();
        rows.sort_by(|a, b| {
            for entry in &collation {
                let (x, y) = (&a[entry.field], &b[entry.field]);
                let ord = match (x.is_null(), y.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => {
                        if entry.nulls_first {
                            Ordering::Less
                        } else {
                            Ordering::Greater
                        }
                    }
                    (false, true) => {
                        if entry.nulls_first {
                            Ordering::Greater
                        } else {
                            Ordering::Less
                        }
                    }
                    (false, false) => {
                        let ord = datum_order(x, y);
                        if entry.is_desc {
                            ord.reverse()
                        } else {
                            ord
                        }
                    }
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
    if sort.offset > 0 {
        let offset = sort.offset.min(rows.len());
        rows.drain(..offset);
    }
    if let Some(limit) = sort.limit {
        rows.truncate(limit);
    }
}

pub type ResultRows = Vec<Vec<Datum>>;
