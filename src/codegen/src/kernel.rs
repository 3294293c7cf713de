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

//! Query compilation: lowering a rewritten DAG into one row function and
//! one query kernel.
//!
//! The row function runs once per input row: it evaluates the quals,
//! drives the hash-join probe, and updates the aggregation or projection
//! slots, returning 0 or a negative error code. The kernel is the outer
//! loop over the fragment's row indices, with the interrupt poll.

use hashbrown::HashMap;
use tracing::debug;

use basalt_common::config::Config;
use basalt_common::dictionary::DictionaryProviderRef;
use basalt_common::error::ERR_INTERRUPTED;
use basalt_common::types::TypeRef;
use basalt_expr::expr::{ColumnRef, Expr, OrderEntry, WindowFunction};
use basalt_expr::ops::OpType;
use basalt_expr::rewriter::ExprRewriter;
use basalt_expr::visitor::{ColumnRefCollector, ExprVisitor};
use basalt_expr::{ExprRef, NodeId};
use basalt_join::{HashTableLayout, PerfectJoinProbe};
use basalt_llir::{
    BinOp, FunctionBuilder, ICmpPred, Instr, IrType, Module, Operand, Param,
};
use basalt_plan::builder::QueryDag;
use basalt_plan::{JoinType, NodePtr, RelAlgNode};

use crate::cgen_state::{CgenState, ROW_FUNC_PARAMS};
use crate::codegen::{CodeGenerator, FragmentBinding, PosOverride};
use crate::descriptor::QueryMemoryDescriptor;
use crate::error::{CodegenError, Result};
use crate::in_values_bitmap::InValuesBitmap;
use crate::options::CompilationOptions;
use crate::target_builder::TargetExprBuilder;
use crate::window::WindowDesc;

#[derive(Debug, Clone)]
pub struct SortDesc {
    pub collation: Vec<OrderEntry>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub empty_result: bool,
}

#[derive(Debug, Clone)]
pub struct JoinCompileInfo {
    pub join_node: NodeId,
    pub join_type: JoinType,
    pub inner_node: NodeId,
    pub inner_col_index: usize,
    pub inner_ty: TypeRef,
    /// Flattened probe key expression over the outer side.
    pub outer_expr: ExprRef,
    pub is_bw_eq: bool,
    /// Residual join conjuncts evaluated after the probe.
    pub join_quals: Vec<ExprRef>,
}

/// The flattened execution shape of one query: everything below refers to
/// scan output columns only.
#[derive(Debug, Clone)]
pub struct QueryShape {
    pub is_aggregate: bool,
    pub group_by_exprs: Vec<ExprRef>,
    pub target_names: Vec<String>,
    pub target_exprs: Vec<ExprRef>,
    pub quals: Vec<ExprRef>,
    pub join: Option<JoinCompileInfo>,
    pub sort: Option<SortDesc>,
    pub scan_nodes: Vec<NodeId>,
}

/// The compiled artifact plus everything the driver needs to run it.
pub struct CompiledQuery {
    pub module: Module,
    pub binding: FragmentBinding,
    pub desc: QueryMemoryDescriptor,
    pub shape: QueryShape,
    pub literal_bytes: Vec<u8>,
    pub bitmaps: Vec<InValuesBitmap>,
    pub windows: Vec<WindowDesc>,
}

// ---- DAG flattening ----

/// Rewrites `ColumnRef`s through intermediate nodes until they address
/// scan outputs only.
struct Flattener<'a> {
    nodes: &'a HashMap<NodeId, NodePtr>,
}

impl ExprRewriter for Flattener<'_> {
    fn rewrite_column_ref(&mut self, expr: &ExprRef, col_ref: &ColumnRef) -> ExprRef {
        let Some(node) = self.nodes.get(&col_ref.node) else {
            return expr.clone();
        };
        match node.as_ref() {
            RelAlgNode::Scan(_) | RelAlgNode::Values(_) => expr.clone(),
            RelAlgNode::Project(p) => {
                let inner = p.exprs[col_ref.index].clone();
                self.rewrite_expr(&inner)
            }
            RelAlgNode::Filter(f) => {
                let types = f.input.output_types();
                let inner: ExprRef = ColumnRef {
                    ty: types[col_ref.index],
                    node: f.input.id(),
                    index: col_ref.index,
                }
                .into();
                self.rewrite_expr(&inner)
            }
            RelAlgNode::Sort(s) => {
                let types = s.input.output_types();
                let inner: ExprRef = ColumnRef {
                    ty: types[col_ref.index],
                    node: s.input.id(),
                    index: col_ref.index,
                }
                .into();
                self.rewrite_expr(&inner)
            }
            RelAlgNode::Aggregate(a) if a.is_nop => {
                let types = a.input.output_types();
                let inner: ExprRef = ColumnRef {
                    ty: types[col_ref.index],
                    node: a.input.id(),
                    index: col_ref.index,
                }
                .into();
                self.rewrite_expr(&inner)
            }
            RelAlgNode::Join(j) => {
                let left_size = j.left.size();
                let inner: ExprRef = if col_ref.index < left_size {
                    ColumnRef {
                        ty: j.left.output_types()[col_ref.index],
                        node: j.left.id(),
                        index: col_ref.index,
                    }
                    .into()
                } else {
                    ColumnRef {
                        ty: j.right.output_types()[col_ref.index - left_size],
                        node: j.right.id(),
                        index: col_ref.index - left_size,
                    }
                    .into()
                };
                self.rewrite_expr(&inner)
            }
            RelAlgNode::Aggregate(_) | RelAlgNode::Union(_) => expr.clone(),
        }
    }
}

fn node_map(dag: &QueryDag) -> HashMap<NodeId, NodePtr> {
    let mut map = HashMap::new();
    for node in &dag.nodes {
        map.insert(node.id(), node.clone());
    }
    map
}

fn split_conjuncts(expr: &ExprRef, out: &mut Vec<ExprRef>) {
    if let Expr::BinOper(b) = expr.as_ref() {
        if b.op == OpType::And {
            split_conjuncts(&b.lhs, out);
            split_conjuncts(&b.rhs, out);
            return;
        }
    }
    out.push(expr.clone());
}

fn scans_under(node: &NodePtr, out: &mut Vec<NodeId>) {
    if matches!(node.as_ref(), RelAlgNode::Scan(_) | RelAlgNode::Values(_)) {
        out.push(node.id());
    }
    for input in node.inputs() {
        scans_under(&input, out);
    }
}

/// Extracts the execution shape of a rewritten DAG.
pub fn analyze_query(dag: &QueryDag) -> Result<QueryShape> {
    let nodes = node_map(dag);
    let mut flattener = Flattener { nodes: &nodes };

    let mut current = dag.root.clone();
    let mut sort = None;
    if let RelAlgNode::Sort(s) = current.as_ref() {
        sort = Some(SortDesc {
            collation: s.collation.clone(),
            limit: s.limit,
            offset: s.offset,
            empty_result: s.empty_result,
        });
        current = s.input.clone();
    }

    let (is_aggregate, group_by_exprs, target_names, target_exprs, below) =
        match current.as_ref() {
            RelAlgNode::Aggregate(agg) if !agg.is_nop => {
                let input_types = agg.input.output_types();
                let keys: Vec<ExprRef> = (0..agg.group_by_count)
                    .map(|i| {
                        let col: ExprRef = ColumnRef {
                            ty: input_types[i],
                            node: agg.input.id(),
                            index: i,
                        }
                        .into();
                        flattener.rewrite_expr(&col)
                    })
                    .collect();
                let aggs: Vec<ExprRef> = agg
                    .aggs
                    .iter()
                    .map(|a| flattener.rewrite_expr(a))
                    .collect();
                (true, keys, agg.fields.clone(), aggs, agg.input.clone())
            }
            RelAlgNode::Project(p) => {
                let exprs: Vec<ExprRef> =
                    p.exprs.iter().map(|e| flattener.rewrite_expr(e)).collect();
                (false, Vec::new(), p.fields.clone(), exprs, p.input.clone())
            }
            other => {
                return Err(CodegenError::NotSupported(format!(
                    "{} as the compiled root",
                    other.kind_name()
                )))
            }
        };

    // walk the input chain gathering quals and the join
    let mut quals = Vec::new();
    let mut join = None;
    let mut cursor = below;
    loop {
        match cursor.clone().as_ref() {
            RelAlgNode::Filter(f) => {
                let flattened = flattener.rewrite_expr(&f.condition);
                split_conjuncts(&flattened, &mut quals);
                cursor = f.input.clone();
            }
            RelAlgNode::Project(p) => {
                cursor = p.input.clone();
            }
            RelAlgNode::Aggregate(a) if a.is_nop => {
                cursor = a.input.clone();
            }
            RelAlgNode::Join(j) => {
                join = Some(analyze_join(j, &mut flattener)?);
                break;
            }
            RelAlgNode::Scan(_) | RelAlgNode::Values(_) => break,
            other => {
                return Err(CodegenError::NotSupported(format!(
                    "{} below the compiled root",
                    other.kind_name()
                )))
            }
        }
    }

    let mut scan_nodes = Vec::new();
    scans_under(&dag.root, &mut scan_nodes);
    scan_nodes.dedup();

    Ok(QueryShape {
        is_aggregate,
        group_by_exprs,
        target_names,
        target_exprs,
        quals,
        join,
        sort,
        scan_nodes,
    })
}

fn analyze_join(
    join: &basalt_plan::Join,
    flattener: &mut Flattener<'_>,
) -> Result<JoinCompileInfo> {
    // the build side must bottom out in a bare scan
    let mut right = join.right.clone();
    loop {
        match right.clone().as_ref() {
            RelAlgNode::Scan(_) => break,
            RelAlgNode::Project(p) => right = p.input.clone(),
            RelAlgNode::Aggregate(a) if a.is_nop => right = a.input.clone(),
            other => {
                return Err(CodegenError::NotSupported(format!(
                    "{} on the build side of a hash join",
                    other.kind_name()
                )))
            }
        }
    }
    let right_id = right.id();

    let flattened = flattener.rewrite_expr(&join.condition);
    let mut conjuncts = Vec::new();
    split_conjuncts(&flattened, &mut conjuncts);
    let mut key_pair: Option<(ExprRef, ColumnRef, bool)> = None;
    let mut residual = Vec::new();
    for conjunct in conjuncts {
        if key_pair.is_none() {
            if let Expr::BinOper(b) = conjunct.as_ref() {
                if b.op.is_equivalence() {
                    if let Some(pair) = normalize_column_pair(&b.lhs, &b.rhs, right_id) {
                        key_pair = Some((pair.0, pair.1, b.op == OpType::BwEq));
                        continue;
                    }
                }
            }
        }
        residual.push(conjunct);
    }
    let Some((outer_expr, inner_col, is_bw_eq)) = key_pair else {
        return Err(CodegenError::NotSupported(
            "hash join without a usable equality condition".into(),
        ));
    };
    Ok(JoinCompileInfo {
        join_node: join.id,
        join_type: join.join_type,
        inner_node: right_id,
        inner_col_index: inner_col.index,
        inner_ty: inner_col.ty,
        outer_expr,
        is_bw_eq,
        join_quals: residual,
    })
}

/// Orients an equality's operands into (outer expression, inner column).
fn normalize_column_pair(
    lhs: &ExprRef,
    rhs: &ExprRef,
    inner_node: NodeId,
) -> Option<(ExprRef, ColumnRef)> {
    let references = |e: &ExprRef, node: NodeId| {
        let mut collector = ColumnRefCollector::default();
        collector.visit(e);
        collector.refs.iter().any(|r| r.node == node)
    };
    let as_inner_col = |e: &ExprRef| -> Option<ColumnRef> {
        match basalt_expr::expr::remove_cast(e).as_ref() {
            Expr::ColumnRef(c) if c.node == inner_node => Some(c.clone()),
            _ => None,
        }
    };
    if let Some(inner) = as_inner_col(rhs) {
        if !references(lhs, inner_node) {
            return Some((lhs.clone(), inner));
        }
    }
    if let Some(inner) = as_inner_col(lhs) {
        if !references(rhs, inner_node) {
            return Some((rhs.clone(), inner));
        }
    }
    None
}

// ---- compilation ----

/// Collects every scan column the shape's expressions reference into the
/// binding, in first-use order.
fn bind_columns(shape: &QueryShape, binding: &mut FragmentBinding) {
    let mut exprs: Vec<&ExprRef> = Vec::new();
    exprs.extend(shape.group_by_exprs.iter());
    exprs.extend(shape.target_exprs.iter());
    exprs.extend(shape.quals.iter());
    if let Some(join) = &shape.join {
        exprs.push(&join.outer_expr);
        exprs.extend(join.join_quals.iter());
    }
    for expr in exprs {
        let mut collector = ColumnRefCollector::default();
        collector.visit(expr);
        for col_ref in collector.refs {
            binding.bind(col_ref.node, col_ref.index, col_ref.ty);
        }
    }
    if let Some(join) = &shape.join {
        binding.bind(
            join.inner_node,
            join.inner_col_index,
            join.inner_ty,
        );
    }
}

/// Compiles the analyzed shape into a module. `probe` carries the built
/// hash table layout when the shape contains a join; `entry_count` sizes
/// the output buffer.
pub fn compile_query(
    shape: &QueryShape,
    config: &Config,
    co: CompilationOptions,
    dict_provider: Option<DictionaryProviderRef>,
    probe: Option<&PerfectJoinProbe>,
    entry_count: usize,
) -> Result<CompiledQuery> {
    let mut binding = FragmentBinding::default();
    bind_columns(shape, &mut binding);

    // window functions get pseudo column slots for their outputs
    let mut windows = Vec::new();
    let mut window_slots: HashMap<WindowFunction, usize> = HashMap::new();
    for target in &shape.target_exprs {
        if let Expr::Window(w) = target.as_ref() {
            if window_slots.contains_key(w) {
                continue;
            }
            let pseudo = basalt_plan::node::next_node_id();
            let ty = if w.ty.is_fp() {
                basalt_common::types::TypeContext::global().fp64(w.ty.nullable())
            } else {
                basalt_common::types::TypeContext::global().int64(w.ty.nullable())
            };
            let slot = binding.bind(pseudo, 0, ty);
            window_slots.insert(w.clone(), slot);
            windows.push(WindowDesc {
                func: w.clone(),
                pseudo_node: pseudo,
                slot,
            });
        }
    }

    let desc = if shape.is_aggregate {
        let group_key_types: Vec<TypeRef> =
            shape.group_by_exprs.iter().map(|e| e.ty()).collect();
        let named: Vec<(String, ExprRef)> = shape
            .target_names
            .iter()
            .skip(shape.group_by_exprs.len())
            .cloned()
            .zip(shape.target_exprs.iter().cloned())
            .collect();
        QueryMemoryDescriptor::for_aggregate(group_key_types, &named, config, entry_count)?
    } else {
        let named: Vec<(String, ExprRef)> = shape
            .target_names
            .iter()
            .cloned()
            .zip(shape.target_exprs.iter().cloned())
            .collect();
        QueryMemoryDescriptor::for_projection(&named, entry_count)
    };

    let mut cgen_state = CgenState::new(config.clone(), co, "query");
    {
        let mut cg = CodeGenerator::new(
            &mut cgen_state,
            &binding,
            dict_provider,
            &window_slots,
        );

        // 1. simple quals gate the row
        for qual in &shape.quals {
            emit_qual(&mut cg, qual)?;
        }

        // 2. the join probe
        match (&shape.join, probe) {
            (None, _) => {
                emit_body(&mut cg, &desc, shape)?;
                if !cg.b().is_terminated() {
                    cg.b().ret(Some(Operand::ConstI(IrType::I32, 0)));
                }
            }
            (Some(join), Some(probe)) => {
                emit_join_and_body(&mut cg, &desc, shape, join, probe)?;
            }
            (Some(_), None) => {
                return Err(CodegenError::NotSupported(
                    "join compilation without a built hash table".into(),
                ))
            }
        }
    }

    let row_func = std::mem::replace(
        &mut cgen_state.row_func,
        FunctionBuilder::new("unused", Vec::new(), IrType::Void),
    );
    cgen_state.module.add_function(row_func.finish());
    let kernel = build_kernel(config);
    cgen_state.module.add_function(kernel);

    debug!(
        targets = desc.targets.len(),
        quals = shape.quals.len(),
        joined = shape.join.is_some(),
        "compiled query module"
    );

    Ok(CompiledQuery {
        module: cgen_state.module,
        binding,
        desc,
        shape: shape.clone(),
        literal_bytes: cgen_state.literals.bytes().to_vec(),
        bitmaps: cgen_state.in_values_bitmaps,
        windows,
    })
}

fn emit_qual(cg: &mut CodeGenerator<'_>, qual: &ExprRef) -> Result<()> {
    let likelihood = match qual.as_ref() {
        Expr::Likelihood(l) => Some(l.likelihood),
        _ => None,
    };
    let value = cg.codegen(qual)?;
    let cond = cg.to_bool(&value);
    let pass = cg.b().new_block("qual_pass");
    let fail = cg.b().new_block("qual_fail");
    match likelihood {
        Some(p) => cg.b().cond_br_weighted(cond, pass, fail, p),
        None => cg.b().cond_br(cond, pass, fail),
    }
    cg.b().position_at_end(fail);
    cg.b().ret(Some(Operand::ConstI(IrType::I32, 0)));
    cg.b().position_at_end(pass);
    Ok(())
}

/// Emits the probe and wraps the body per join type and table layout.
fn emit_join_and_body(
    cg: &mut CodeGenerator<'_>,
    desc: &QueryMemoryDescriptor,
    shape: &QueryShape,
    join: &JoinCompileInfo,
    probe: &PerfectJoinProbe,
) -> Result<()> {
    let key = cg.codegen(&join.outer_expr)?;
    match probe.table.layout() {
        HashTableLayout::OneToOne => {
            let slot = probe
                .codegen_slot(&mut cg.cgen_state.row_func, 0, key.v)
                .map_err(CodegenError::Join)?;
            let missed = cg
                .b()
                .icmp(ICmpPred::Slt, IrType::I64, slot, Operand::i64(0));
            match join.join_type {
                JoinType::Inner | JoinType::Semi | JoinType::Left => {
                    let matched_bb = cg.b().new_block("join_matched");
                    let miss_bb = cg.b().new_block("join_miss");
                    cg.b().cond_br(missed, miss_bb, matched_bb);
                    cg.b().position_at_end(miss_bb);
                    if join.join_type == JoinType::Left {
                        // unmatched rows still emit, with the build side
                        // padded to NULL
                        cg.b().br(matched_bb);
                    } else {
                        cg.b().ret(Some(Operand::ConstI(IrType::I32, 0)));
                    }
                    cg.b().position_at_end(matched_bb);
                    let matched_flag = (join.join_type == JoinType::Left).then(|| {
                        let b = cg.b();
                        b.binop(IrType::I1, BinOp::Xor, missed, Operand::i1(true))
                    });
                    let clamped = if join.join_type == JoinType::Left {
                        let b = cg.b();
                        b.select(IrType::I64, missed, Operand::i64(0), slot)
                    } else {
                        slot
                    };
                    cg.pos_overrides.insert(
                        join.inner_node,
                        PosOverride {
                            pos: clamped,
                            matched: matched_flag,
                        },
                    );
                }
                JoinType::Anti => {
                    // matches are the rows to drop
                    let keep_bb = cg.b().new_block("anti_keep");
                    let drop_bb = cg.b().new_block("anti_drop");
                    cg.b().cond_br(missed, keep_bb, drop_bb);
                    cg.b().position_at_end(drop_bb);
                    cg.b().ret(Some(Operand::ConstI(IrType::I32, 0)));
                    cg.b().position_at_end(keep_bb);
                }
            }
            for qual in &join.join_quals {
                emit_qual(cg, qual)?;
            }
            emit_body(cg, desc, shape)?;
            if !cg.b().is_terminated() {
                cg.b().ret(Some(Operand::ConstI(IrType::I32, 0)));
            }
            Ok(())
        }
        HashTableLayout::OneToMany => {
            if join.join_type != JoinType::Inner && join.join_type != JoinType::Semi {
                return Err(CodegenError::NotSupported(
                    "one-to-many layout for outer joins".into(),
                ));
            }
            let set = probe
                .codegen_matching_set(&mut cg.cgen_state.row_func, 0, key.v)
                .map_err(CodegenError::Join)?;
            let count = set.count;
            let entry_end = cg.b().current_block();
            let head = cg.b().new_block("match_head");
            let body = cg.b().new_block("match_body");
            let exit = cg.b().new_block("match_exit");
            cg.b().br(head);
            cg.b().position_at_end(head);
            let idx = cg.b().phi(IrType::I64);
            cg.b().add_incoming(idx, Operand::i64(0), entry_end);
            let more = cg.b().icmp(ICmpPred::Slt, IrType::I64, idx, count);
            cg.b().cond_br(more, body, exit);
            cg.b().position_at_end(body);
            let row_raw = {
                let b = cg.b();
                let elem = b.gep(set.payload_ptr, idx, 4);
                let raw = b.load(IrType::I32, elem);
                b.cast(basalt_llir::CastOp::SExt, raw, IrType::I32, IrType::I64)
            };
            cg.pos_overrides.insert(
                join.inner_node,
                PosOverride {
                    pos: row_raw,
                    matched: None,
                },
            );
            // residual quals skip to the next match on failure
            let next = cg.b().new_block("match_next");
            for qual in &join.join_quals {
                let value = cg.codegen(qual)?;
                let cond = cg.to_bool(&value);
                let pass = cg.b().new_block("join_qual_pass");
                cg.b().cond_br(cond, pass, next);
                cg.b().position_at_end(pass);
            }
            emit_body(cg, desc, shape)?;
            if !cg.b().is_terminated() {
                // a semi join emits each probe row at most once
                if join.join_type == JoinType::Semi {
                    cg.b().br(exit);
                } else {
                    cg.b().br(next);
                }
            }
            cg.b().position_at_end(next);
            let bumped = cg
                .b()
                .binop(IrType::I64, BinOp::Add, idx, Operand::i64(1));
            let next_end = cg.b().current_block();
            cg.b().br(head);
            cg.b().add_incoming(idx, bumped, next_end);
            cg.b().position_at_end(exit);
            cg.b().ret(Some(Operand::ConstI(IrType::I32, 0)));
            Ok(())
        }
    }
}

/// Emits the per-matched-row body: group lookup plus target updates, or
/// the projection row write.
fn emit_body(
    cg: &mut CodeGenerator<'_>,
    desc: &QueryMemoryDescriptor,
    shape: &QueryShape,
) -> Result<()> {
    let agg_out = cg.b().arg("agg_out");
    let row_ptr = if shape.is_aggregate {
        if shape.group_by_exprs.is_empty() {
            agg_out
        } else {
            if shape.group_by_exprs.len() > 4 {
                return Err(CodegenError::NotSupported(
                    "more than four group keys".into(),
                ));
            }
            let mut keys = Vec::new();
            for key_expr in &shape.group_by_exprs {
                let key = cg.codegen(key_expr)?;
                if key.ty.is_fp() {
                    return Err(CodegenError::NotSupported(
                        "floating-point group keys".into(),
                    ));
                }
                keys.push(key.v);
            }
            let helper = format!("get_group_value_key{}", keys.len());
            let mut args = vec![
                agg_out,
                Operand::i64(desc.entry_count as i64),
                Operand::i64(desc.row_quads() as i64),
            ];
            args.extend(keys);
            cg.cgen_state.emit_call(&helper, IrType::Ptr, args)
        }
    } else {
        // projection: claim the next output row
        let out_count = cg.b().arg("out_count");
        let b = cg.b();
        let out_idx = b.push(Instr::AtomicAdd {
            ty: IrType::I64,
            ptr: out_count,
            value: Operand::i64(1),
            address_space: 0,
        });
        b.gep(agg_out, out_idx, desc.row_bytes())
    };
    let mut builder = TargetExprBuilder::new(cg);
    for target in &desc.targets {
        builder.codegen_update(target, row_ptr)?;
    }
    Ok(())
}

/// The outer kernel: loops the row function over the fragment, polling
/// the interrupt flag every 64k rows.
fn build_kernel(config: &Config) -> basalt_llir::Function {
    let params: Vec<Param> = std::iter::once(Param {
        name: "row_count".to_owned(),
        ty: IrType::I64,
    })
    .chain(ROW_FUNC_PARAMS.iter().skip(1).map(|(name, ty)| Param {
        name: (*name).to_owned(),
        ty: *ty,
    }))
    .collect();
    let mut b = FunctionBuilder::new("query_kernel", params, IrType::I32);
    let row_count = b.arg("row_count");
    let entry = b.current_block();
    let head = b.new_block("loop_head");
    let body = b.new_block("loop_body");
    let exit = b.new_block("loop_exit");
    b.br(head);
    b.position_at_end(head);
    let pos = b.phi(IrType::I64);
    b.add_incoming(pos, Operand::i64(0), entry);
    let more = b.icmp(ICmpPred::Slt, IrType::I64, pos, row_count);
    b.cond_br(more, body, exit);
    b.position_at_end(body);
    if config.exec.watchdog.enable {
        let masked = b.binop(IrType::I64, BinOp::And, pos, Operand::i64(0xffff));
        let at_boundary = b.icmp(ICmpPred::Eq, IrType::I64, masked, Operand::i64(0));
        let check_bb = b.new_block("watchdog_check");
        let go_bb = b.new_block("row");
        b.cond_br(at_boundary, check_bb, go_bb);
        b.position_at_end(check_bb);
        let interrupted = b.call("check_interrupt", IrType::I1, Vec::new());
        let stop_bb = b.new_block("interrupted");
        b.cond_br(interrupted, stop_bb, go_bb);
        b.position_at_end(stop_bb);
        b.ret(Some(Operand::ConstI(IrType::I32, ERR_INTERRUPTED as i64)));
        b.position_at_end(go_bb);
    }
    let args: Vec<Operand> = std::iter::once(pos)
        .chain(
            ROW_FUNC_PARAMS
                .iter()
                .skip(1)
                .map(|(name, _)| b.arg(name)),
        )
        .collect();
    let err = b.call("row_func", IrType::I32, args);
    let failed = b.icmp(ICmpPred::Ne, IrType::I32, err, Operand::i32(0));
    let fail_bb = b.new_block("row_error");
    let cont_bb = b.new_block("advance");
    b.cond_br(failed, fail_bb, cont_bb);
    b.position_at_end(fail_bb);
    b.ret(Some(err));
    b.position_at_end(cont_bb);
    let bumped = b.binop(IrType::I64, BinOp::Add, pos, Operand::i64(1));
    let cont_end = b.current_block();
    b.br(head);
    b.add_incoming(pos, bumped, cont_end);
    b.position_at_end(exit);
    b.ret(Some(Operand::ConstI(IrType::I32, 0)));
    b.finish()
}
