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

//! The DAG rewrite pipeline, applied once after building, in a fixed
//! order. Every pass preserves the columns observable at the root and the
//! `ColumnRef` consistency invariant: references always name a node that
//! is an input of the referencing node.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use fixedbitset::FixedBitSet;
use tracing::debug;

use basalt_common::config::Config;
use basalt_common::types::TypeContext;
use basalt_expr::expr::{BinOper, ColumnRef, Constant, Expr, ExprRef, WindowFunction};
use basalt_expr::ops::{OpType, Qualifier};
use basalt_expr::rewriter::{ColumnRefRewriter, ExprRewriter};
use basalt_expr::visitor::{ColumnRefCollector, ExprVisitor, WindowFunctionCollector};
use basalt_expr::NodeId;

use crate::builder::QueryDag;
use crate::error::Result;
use crate::node::*;

pub fn run_pipeline(dag: QueryDag, _config: &Config) -> Result<QueryDag> {
    let mut nodes = dag.nodes;
    let subqueries = dag.subqueries;

    nodes = mark_nops(nodes);
    nodes = simplify_sort(nodes);
    nodes = sink_projected_boolean_expr_to_join(nodes);
    nodes = eliminate_identical_copy(nodes);
    nodes = insert_join_projections(nodes);
    nodes = fold_filters(nodes);
    nodes = hoist_filter_cond_to_cross_join(nodes);
    nodes = eliminate_dead_columns(nodes);
    let subqueries = eliminate_dead_subqueries(&nodes, subqueries);
    nodes = separate_window_function_expressions(nodes);

    let root = nodes.last().cloned().expect("pipeline kept the root");
    Ok(QueryDag {
        root,
        nodes,
        subqueries,
    })
}

/// How consumers of an edited node must adjust their column references.
#[derive(Debug, Clone)]
struct ColRemap {
    /// The node the references should point at now.
    target: NodeId,
    /// `index_map[old] = new`; identity when `None`.
    index_map: Option<Vec<usize>>,
}

/// One round of DAG surgery: nodes to drop (with their passthrough
/// target), nodes whose content changed, and column remaps for consumers.
#[derive(Default)]
struct DagEdits {
    removed: HashMap<NodeId, NodeId>,
    replacements: HashMap<NodeId, RelAlgNode>,
    col_remaps: HashMap<NodeId, ColRemap>,
}

impl DagEdits {
    fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.replacements.is_empty() && self.col_remaps.is_empty()
    }
}

/// Applies `edits` over the topo-ordered node list, rebuilding consumers
/// so inputs point at the rebuilt producers. Node ids are preserved.
fn apply_edits(nodes: &[NodePtr], edits: &DagEdits) -> Vec<NodePtr> {
    if edits.is_empty() {
        return nodes.to_vec();
    }
    let mut new_by_id: HashMap<NodeId, NodePtr> = HashMap::new();
    let mut result = Vec::with_capacity(nodes.len());
    for node in nodes {
        let id = node.id();
        if edits.removed.contains_key(&id) {
            continue;
        }
        let base = edits
            .replacements
            .get(&id)
            .cloned()
            .unwrap_or_else(|| (**node).clone());
        let inputs = base
            .inputs()
            .iter()
            .map(|input| {
                let mut target = input.id();
                while let Some(next) = edits.removed.get(&target) {
                    target = *next;
                }
                new_by_id
                    .get(&target)
                    .cloned()
                    .unwrap_or_else(|| input.clone())
            })
            .collect();
        let rebuilt = base.clone_with_inputs(inputs);
        let rebuilt = remap_node_exprs(rebuilt, &edits.col_remaps, &new_by_id);
        let ptr = Arc::new(rebuilt);
        new_by_id.insert(id, ptr.clone());
        result.push(ptr);
    }
    result
}

fn remap_node_exprs(
    node: RelAlgNode,
    remaps: &HashMap<NodeId, ColRemap>,
    new_by_id: &HashMap<NodeId, NodePtr>,
) -> RelAlgNode {
    if remaps.is_empty() {
        return node;
    }
    let mapping = |col_ref: &ColumnRef| -> Option<ExprRef> {
        let remap = remaps.get(&col_ref.node)?;
        let index = match &remap.index_map {
            Some(map) => map[col_ref.index],
            None => col_ref.index,
        };
        let ty = new_by_id
            .get(&remap.target)
            .map(|n| n.output_types()[index])
            .unwrap_or(col_ref.ty);
        Some(
            ColumnRef {
                ty,
                node: remap.target,
                index,
            }
            .into(),
        )
    };
    let mut rewriter = ColumnRefRewriter { mapping: &mapping };
    rewrite_node_exprs(node, &mut rewriter)
}

/// Rewrites every expression a node carries.
fn rewrite_node_exprs(node: RelAlgNode, rewriter: &mut dyn ExprRewriter) -> RelAlgNode {
    match node {
        RelAlgNode::Project(mut n) => {
            n.exprs = n.exprs.iter().map(|e| rewriter.rewrite_expr(e)).collect();
            RelAlgNode::Project(n)
        }
        RelAlgNode::Filter(mut n) => {
            n.condition = rewriter.rewrite_expr(&n.condition);
            RelAlgNode::Filter(n)
        }
        RelAlgNode::Aggregate(mut n) => {
            n.aggs = n.aggs.iter().map(|e| rewriter.rewrite_expr(e)).collect();
            RelAlgNode::Aggregate(n)
        }
        RelAlgNode::Join(mut n) => {
            n.condition = rewriter.rewrite_expr(&n.condition);
            RelAlgNode::Join(n)
        }
        other => other,
    }
}

fn consumers_of(nodes: &[NodePtr], id: NodeId) -> Vec<NodePtr> {
    nodes
        .iter()
        .filter(|n| n.inputs().iter().any(|i| i.id() == id))
        .cloned()
        .collect()
}

// ---- pass 1: mark no-op aggregates ----

fn mark_nops(nodes: Vec<NodePtr>) -> Vec<NodePtr> {
    let mut edits = DagEdits::default();
    for node in &nodes {
        if let RelAlgNode::Aggregate(agg) = node.as_ref() {
            if agg.aggs.is_empty() && agg.group_by_count == agg.input.size() && !agg.is_nop {
                let mut marked = agg.clone();
                marked.is_nop = true;
                edits
                    .replacements
                    .insert(agg.id, RelAlgNode::Aggregate(marked));
            }
        }
    }
    apply_edits(&nodes, &edits)
}

// ---- pass 2: sort simplification ----

fn simplify_sort(nodes: Vec<NodePtr>) -> Vec<NodePtr> {
    let mut edits = DagEdits::default();
    for node in &nodes {
        if let RelAlgNode::Sort(sort) = node.as_ref() {
            // A sort directly under another sort cannot affect the result.
            if let RelAlgNode::Sort(inner) = sort.input.as_ref() {
                if inner.limit.is_none() && inner.offset == 0 {
                    edits.removed.insert(inner.id, inner.input.id());
                    edits.col_remaps.insert(
                        inner.id,
                        ColRemap {
                            target: inner.input.id(),
                            index_map: None,
                        },
                    );
                }
            }
        }
    }
    if !edits.is_empty() {
        debug!(count = edits.removed.len(), "folded redundant sorts");
    }
    apply_edits(&nodes, &edits)
}

// ---- pass 3: sink projected boolean expressions into joins ----

/// `Filter(c)(Project(...e_i...)(Join))` where the filter condition is the
/// projected boolean `e_i` spanning both join sides: the predicate moves
/// into the join condition, and the projected column degenerates to TRUE.
fn sink_projected_boolean_expr_to_join(nodes: Vec<NodePtr>) -> Vec<NodePtr> {
    let ctx = TypeContext::global();
    let mut edits = DagEdits::default();
    for node in &nodes {
        let RelAlgNode::Filter(filter) = node.as_ref() else {
            continue;
        };
        let RelAlgNode::Project(project) = filter.input.as_ref() else {
            continue;
        };
        let RelAlgNode::Join(join) = project.input.as_ref() else {
            continue;
        };
        if join.join_type != JoinType::Inner {
            continue;
        }
        let Expr::ColumnRef(cond_ref) = filter.condition.as_ref() else {
            continue;
        };
        if cond_ref.node != project.id {
            continue;
        }
        let sunk = &project.exprs[cond_ref.index];
        if !sunk.ty().is_boolean() || sunk.as_ref().as_column_ref().is_some() {
            continue;
        }
        if !references_both_join_sides(sunk, join) {
            continue;
        }
        let translated = translate_refs_through_join(sunk, join);
        let new_cond: ExprRef = BinOper {
            ty: ctx.boolean(join.condition.ty().nullable() || translated.ty().nullable()),
            op: OpType::And,
            qualifier: Qualifier::One,
            lhs: join.condition.clone(),
            rhs: translated,
        }
        .into();
        let mut new_join = join.clone();
        new_join.condition = new_cond;
        edits.replacements.insert(join.id, RelAlgNode::Join(new_join));

        let mut new_project = project.clone();
        new_project.exprs[cond_ref.index] = Constant::boolean(true).into();
        edits
            .replacements
            .insert(project.id, RelAlgNode::Project(new_project));

        edits.removed.insert(filter.id, project.id);
        edits.col_remaps.insert(
            filter.id,
            ColRemap {
                target: project.id,
                index_map: None,
            },
        );
        break; // one sink per round keeps edits consistent
    }
    apply_edits(&nodes, &edits)
}

fn references_both_join_sides(expr: &ExprRef, join: &Join) -> bool {
    let mut collector = ColumnRefCollector::default();
    collector.visit(expr);
    let left_size = join.left.size();
    let mut saw_left = false;
    let mut saw_right = false;
    for col_ref in &collector.refs {
        if col_ref.node != join.id {
            return false;
        }
        if col_ref.index < left_size {
            saw_left = true;
        } else {
            saw_right = true;
        }
    }
    saw_left && saw_right
}

/// Rewrites `ColumnRef(join, i)` into refs against the join's inputs, for
/// predicates that move into the join condition.
fn translate_refs_through_join(expr: &ExprRef, join: &Join) -> ExprRef {
    let left_size = join.left.size();
    let left_id = join.left.id();
    let right_id = join.right.id();
    let left_types = join.left.output_types();
    let right_types = join.right.output_types();
    let mapping = move |col_ref: &ColumnRef| -> Option<ExprRef> {
        if col_ref.node != join.id {
            return None;
        }
        Some(if col_ref.index < left_size {
            ColumnRef {
                ty: left_types[col_ref.index],
                node: left_id,
                index: col_ref.index,
            }
            .into()
        } else {
            ColumnRef {
                ty: right_types[col_ref.index - left_size],
                node: right_id,
                index: col_ref.index - left_size,
            }
            .into()
        })
    };
    let mut rewriter = ColumnRefRewriter { mapping: &mapping };
    rewriter.rewrite_expr(expr)
}

// ---- pass 4: identity-copy elimination ----

fn eliminate_identical_copy(nodes: Vec<NodePtr>) -> Vec<NodePtr> {
    let root_id = nodes.last().map(|n| n.id());
    let mut edits = DagEdits::default();
    for node in &nodes {
        if Some(node.id()) == root_id {
            continue;
        }
        let RelAlgNode::Project(project) = node.as_ref() else {
            continue;
        };
        if project.exprs.len() != project.input.size() {
            continue;
        }
        let identity = project.exprs.iter().enumerate().all(|(i, e)| {
            matches!(e.as_ref(), Expr::ColumnRef(c) if c.node == project.input.id() && c.index == i)
        });
        if identity {
            edits.removed.insert(project.id, project.input.id());
            edits.col_remaps.insert(
                project.id,
                ColRemap {
                    target: project.input.id(),
                    index_map: None,
                },
            );
        }
    }
    if !edits.is_empty() {
        debug!(count = edits.removed.len(), "dropped identity projections");
    }
    apply_edits(&nodes, &edits)
}

// ---- pass 5: join projection insertion ----

/// Inserts a projection of all join columns above joins that are not
/// already consumed by a single projection, so dead-column elimination can
/// narrow the join output. Skipped when the consumer is a `Project` or
/// when the join feeds the left side of a parent join.
fn insert_join_projections(nodes: Vec<NodePtr>) -> Vec<NodePtr> {
    let mut result: Vec<NodePtr> = Vec::with_capacity(nodes.len());
    let mut pending: HashSet<NodeId> = HashSet::new();
    for node in &nodes {
        let RelAlgNode::Join(join) = node.as_ref() else {
            continue;
        };
        let consumers = consumers_of(&nodes, join.id);
        let skip = consumers.iter().any(|c| match c.as_ref() {
            RelAlgNode::Project(_) => true,
            RelAlgNode::Join(parent) => parent.left.id() == join.id,
            _ => false,
        });
        if skip {
            continue;
        }
        pending.insert(join.id);
    }
    if pending.is_empty() {
        return nodes;
    }
    // Rebuild with projections spliced in right after each join.
    let mut new_by_id: HashMap<NodeId, NodePtr> = HashMap::new();
    let mut redirect: HashMap<NodeId, NodeId> = HashMap::new();
    let mut remaps: HashMap<NodeId, ColRemap> = HashMap::new();
    for node in &nodes {
        let base = (**node).clone();
        let inputs = base
            .inputs()
            .iter()
            .map(|input| {
                let target = redirect.get(&input.id()).copied().unwrap_or(input.id());
                new_by_id.get(&target).cloned().unwrap_or_else(|| input.clone())
            })
            .collect();
        let rebuilt = base.clone_with_inputs(inputs);
        let rebuilt = remap_node_exprs(rebuilt, &remaps, &new_by_id);
        let ptr = Arc::new(rebuilt);
        new_by_id.insert(node.id(), ptr.clone());
        result.push(ptr.clone());
        if pending.contains(&node.id()) {
            let project_id = next_node_id();
            let project = RelAlgNode::Project(Project {
                id: project_id,
                exprs: column_refs_for(&ptr),
                fields: ptr.field_names(),
                input: ptr.clone(),
            });
            let project_ptr = Arc::new(project);
            new_by_id.insert(project_id, project_ptr.clone());
            result.push(project_ptr);
            redirect.insert(node.id(), project_id);
            remaps.insert(
                node.id(),
                ColRemap {
                    target: project_id,
                    index_map: None,
                },
            );
            debug!(join = node.id(), projection = project_id, "inserted join projection");
        }
    }
    result
}

// ---- pass 6: filter folding ----

fn fold_filters(nodes: Vec<NodePtr>) -> Vec<NodePtr> {
    let ctx = TypeContext::global();
    let mut current = nodes;
    loop {
        let mut edits = DagEdits::default();
        for node in &current {
            let RelAlgNode::Filter(outer) = node.as_ref() else {
                continue;
            };
            let RelAlgNode::Filter(inner) = outer.input.as_ref() else {
                continue;
            };
            // Both conditions end up referencing the inner filter's input.
            let rebased = {
                let inner_input = inner.input.clone();
                let inner_id = inner.id;
                let mapping = move |col_ref: &ColumnRef| -> Option<ExprRef> {
                    (col_ref.node == inner_id).then(|| {
                        ColumnRef {
                            ty: col_ref.ty,
                            node: inner_input.id(),
                            index: col_ref.index,
                        }
                        .into()
                    })
                };
                let mut rewriter = ColumnRefRewriter { mapping: &mapping };
                rewriter.rewrite_expr(&outer.condition)
            };
            let merged: ExprRef = BinOper {
                ty: ctx.boolean(
                    inner.condition.ty().nullable() || rebased.ty().nullable(),
                ),
                op: OpType::And,
                qualifier: Qualifier::One,
                lhs: inner.condition.clone(),
                rhs: rebased,
            }
            .into();
            let mut merged_filter = outer.clone();
            merged_filter.condition = merged;
            merged_filter.input = inner.input.clone();
            edits
                .replacements
                .insert(outer.id, RelAlgNode::Filter(merged_filter));
            edits.removed.insert(inner.id, inner.input.id());
            edits.col_remaps.insert(
                inner.id,
                ColRemap {
                    target: inner.input.id(),
                    index_map: None,
                },
            );
            break;
        }
        if edits.is_empty() {
            return current;
        }
        current = apply_edits(&current, &edits);
    }
}

// ---- pass 7: filter hoisting into joins ----

/// Conjuncts of a filter over an inner join that span both join inputs
/// migrate into the join condition.
fn hoist_filter_cond_to_cross_join(nodes: Vec<NodePtr>) -> Vec<NodePtr> {
    let ctx = TypeContext::global();
    let mut edits = DagEdits::default();
    for node in &nodes {
        let RelAlgNode::Filter(filter) = node.as_ref() else {
            continue;
        };
        let RelAlgNode::Join(join) = filter.input.as_ref() else {
            continue;
        };
        if join.join_type != JoinType::Inner {
            continue;
        }
        let conjuncts = split_conjunction(&filter.condition);
        let (hoisted, kept): (Vec<_>, Vec<_>) = conjuncts
            .into_iter()
            .partition(|c| references_both_join_sides_of_filter(c, join));
        if hoisted.is_empty() {
            continue;
        }
        let mut join_cond = join.condition.clone();
        for conjunct in hoisted {
            let translated = translate_filter_ref_to_join_inputs(&conjunct, join);
            join_cond = BinOper {
                ty: ctx.boolean(join_cond.ty().nullable() || translated.ty().nullable()),
                op: OpType::And,
                qualifier: Qualifier::One,
                lhs: join_cond,
                rhs: translated,
            }
            .into();
        }
        let mut new_join = join.clone();
        new_join.condition = join_cond;
        edits.replacements.insert(join.id, RelAlgNode::Join(new_join));
        match rebuild_conjunction(kept, ctx.boolean(false)) {
            Some(kept_cond) => {
                let mut new_filter = filter.clone();
                new_filter.condition = kept_cond;
                edits
                    .replacements
                    .insert(filter.id, RelAlgNode::Filter(new_filter));
            }
            None => {
                edits.removed.insert(filter.id, join.id);
                edits.col_remaps.insert(
                    filter.id,
                    ColRemap {
                        target: join.id,
                        index_map: None,
                    },
                );
            }
        }
        break;
    }
    apply_edits(&nodes, &edits)
}

fn split_conjunction(expr: &ExprRef) -> Vec<ExprRef> {
    match expr.as_ref() {
        Expr::BinOper(b) if b.op == OpType::And => {
            let mut out = split_conjunction(&b.lhs);
            out.extend(split_conjunction(&b.rhs));
            out
        }
        _ => vec![expr.clone()],
    }
}

fn rebuild_conjunction(
    conjuncts: Vec<ExprRef>,
    bool_ty: basalt_common::types::TypeRef,
) -> Option<ExprRef> {
    let mut it = conjuncts.into_iter();
    let first = it.next()?;
    Some(it.fold(first, |acc, next| {
        BinOper {
            ty: bool_ty.with_nullable(acc.ty().nullable() || next.ty().nullable()),
            op: OpType::And,
            qualifier: Qualifier::One,
            lhs: acc,
            rhs: next,
        }
        .into()
    }))
}

fn references_both_join_sides_of_filter(expr: &ExprRef, join: &Join) -> bool {
    let mut collector = ColumnRefCollector::default();
    collector.visit(expr);
    let left_size = join.left.size();
    let mut saw_left = false;
    let mut saw_right = false;
    for col_ref in &collector.refs {
        if col_ref.node != join.id {
            return false;
        }
        if col_ref.index < left_size {
            saw_left = true;
        } else {
            saw_right = true;
        }
    }
    saw_left && saw_right
}

fn translate_filter_ref_to_join_inputs(expr: &ExprRef, join: &Join) -> ExprRef {
    translate_refs_through_join(expr, join)
}

// ---- pass 8: dead-column elimination ----

fn eliminate_dead_columns(nodes: Vec<NodePtr>) -> Vec<NodePtr> {
    let Some(root) = nodes.last() else {
        return nodes;
    };
    let root_id = root.id();
    let mut live: HashMap<NodeId, FixedBitSet> = HashMap::new();
    let mut root_live = FixedBitSet::with_capacity(root.size());
    root_live.insert_range(..);
    live.insert(root_id, root_live);

    for node in nodes.iter().rev() {
        let node_live = live
            .entry(node.id())
            .or_insert_with(|| {
                let mut all = FixedBitSet::with_capacity(node.size());
                all.insert_range(..);
                all
            })
            .clone();
        propagate_liveness(node, &node_live, &mut live);
    }

    let mut edits = DagEdits::default();
    for node in &nodes {
        if node.id() == root_id {
            continue;
        }
        let node_live = &live[&node.id()];
        match node.as_ref() {
            RelAlgNode::Project(project) => {
                if node_live.count_ones(..) == project.exprs.len() {
                    continue;
                }
                let mut index_map = vec![usize::MAX; project.exprs.len()];
                let mut exprs = Vec::new();
                let mut fields = Vec::new();
                for i in node_live.ones() {
                    index_map[i] = exprs.len();
                    exprs.push(project.exprs[i].clone());
                    fields.push(project.fields[i].clone());
                }
                if exprs.is_empty() {
                    index_map[0] = 0;
                    exprs.push(project.exprs[0].clone());
                    fields.push(project.fields[0].clone());
                }
                let mut narrowed = project.clone();
                narrowed.exprs = exprs;
                narrowed.fields = fields;
                edits
                    .replacements
                    .insert(project.id, RelAlgNode::Project(narrowed));
                edits.col_remaps.insert(
                    project.id,
                    ColRemap {
                        target: project.id,
                        index_map: Some(index_map),
                    },
                );
            }
            RelAlgNode::Aggregate(agg) => {
                let total = agg.group_by_count + agg.aggs.len();
                if node_live.count_ones(..) == total {
                    continue;
                }
                let mut index_map = vec![usize::MAX; total];
                for i in 0..agg.group_by_count {
                    index_map[i] = i;
                }
                let mut aggs = Vec::new();
                let mut fields: Vec<String> =
                    agg.fields.iter().take(agg.group_by_count).cloned().collect();
                for i in node_live.ones().filter(|i| *i >= agg.group_by_count) {
                    index_map[i] = agg.group_by_count + aggs.len();
                    aggs.push(agg.aggs[i - agg.group_by_count].clone());
                    fields.push(agg.fields[i].clone());
                }
                if aggs.len() == agg.aggs.len() {
                    continue;
                }
                let mut narrowed = agg.clone();
                narrowed.aggs = aggs;
                narrowed.fields = fields;
                edits
                    .replacements
                    .insert(agg.id, RelAlgNode::Aggregate(narrowed));
                edits.col_remaps.insert(
                    agg.id,
                    ColRemap {
                        target: agg.id,
                        index_map: Some(index_map),
                    },
                );
            }
            _ => {}
        }
    }
    if !edits.is_empty() {
        debug!(narrowed = edits.replacements.len(), "eliminated dead columns");
    }
    apply_edits(&nodes, &edits)
}

fn mark_expr_refs(expr: &ExprRef, per_node: &mut HashMap<NodeId, Vec<usize>>) {
    let mut collector = ColumnRefCollector::default();
    collector.visit(expr);
    for col_ref in collector.refs {
        per_node.entry(col_ref.node).or_default().push(col_ref.index);
    }
}

fn propagate_liveness(
    node: &NodePtr,
    node_live: &FixedBitSet,
    live: &mut HashMap<NodeId, FixedBitSet>,
) {
    let mut referenced: HashMap<NodeId, Vec<usize>> = HashMap::new();
    match node.as_ref() {
        RelAlgNode::Project(project) => {
            for i in node_live.ones() {
                mark_expr_refs(&project.exprs[i], &mut referenced);
            }
        }
        RelAlgNode::Filter(filter) => {
            mark_expr_refs(&filter.condition, &mut referenced);
            let input_id = filter.input.id();
            let entry = referenced.entry(input_id).or_default();
            entry.extend(node_live.ones());
        }
        RelAlgNode::Aggregate(agg) => {
            let entry = referenced.entry(agg.input.id()).or_default();
            entry.extend(0..agg.group_by_count);
            for (i, a) in agg.aggs.iter().enumerate() {
                if node_live.contains(agg.group_by_count + i) {
                    mark_expr_refs(a, &mut referenced);
                }
            }
        }
        RelAlgNode::Join(join) => {
            mark_expr_refs(&join.condition, &mut referenced);
            let left_size = join.left.size();
            for i in node_live.ones() {
                if i < left_size {
                    referenced.entry(join.left.id()).or_default().push(i);
                } else {
                    referenced
                        .entry(join.right.id())
                        .or_default()
                        .push(i - left_size);
                }
            }
        }
        RelAlgNode::Sort(sort) => {
            let entry = referenced.entry(sort.input.id()).or_default();
            entry.extend(node_live.ones());
            entry.extend(sort.collation.iter().map(|c| c.field));
        }
        RelAlgNode::Union(union) => {
            for input in &union.inputs {
                let entry = referenced.entry(input.id()).or_default();
                entry.extend(node_live.ones());
            }
        }
        RelAlgNode::Scan(_) | RelAlgNode::Values(_) => {}
    }
    for input in node.inputs() {
        let indices = referenced.remove(&input.id()).unwrap_or_default();
        let entry = live
            .entry(input.id())
            .or_insert_with(|| FixedBitSet::with_capacity(input.size()));
        for i in indices {
            entry.insert(i);
        }
    }
}

// ---- pass 9: dead-subquery elimination ----

fn eliminate_dead_subqueries(nodes: &[NodePtr], subqueries: Vec<NodePtr>) -> Vec<NodePtr> {
    #[derive(Default)]
    struct SubqueryRefs {
        referenced: HashSet<NodeId>,
    }
    impl ExprVisitor for SubqueryRefs {
        type Output = ();

        fn visit_scalar_subquery(&mut self, s: &basalt_expr::expr::ScalarSubquery) {
            self.referenced.insert(s.node);
        }

        fn visit_in_subquery(&mut self, s: &basalt_expr::expr::InSubquery) {
            self.referenced.insert(s.node);
            self.visit(&s.arg);
        }
    }
    let mut refs = SubqueryRefs::default();
    for node in nodes {
        for expr in node.exprs() {
            refs.visit(&expr);
        }
    }
    let before = subqueries.len();
    let kept: Vec<_> = subqueries
        .into_iter()
        .filter(|s| refs.referenced.contains(&s.id()))
        .collect();
    if kept.len() != before {
        debug!(dropped = before - kept.len(), "eliminated dead subqueries");
    }
    kept
}

// ---- pass 10: window-function separation ----

/// A window function nested inside a larger projection expression moves to
/// its own lower projection; the upper expression reads it back through a
/// `ColumnRef`. Window state machines are only generated for top-level
/// projection expressions.
fn separate_window_function_expressions(nodes: Vec<NodePtr>) -> Vec<NodePtr> {
    let mut result: Vec<NodePtr> = Vec::with_capacity(nodes.len());
    let mut new_by_id: HashMap<NodeId, NodePtr> = HashMap::new();
    for node in &nodes {
        // Re-point inputs to rebuilt producers first.
        let inputs = node
            .inputs()
            .iter()
            .map(|i| new_by_id.get(&i.id()).cloned().unwrap_or_else(|| i.clone()))
            .collect();
        let rebuilt = node.clone_with_inputs(inputs);
        let RelAlgNode::Project(project) = &rebuilt else {
            let ptr = Arc::new(rebuilt);
            new_by_id.insert(node.id(), ptr.clone());
            result.push(ptr);
            continue;
        };
        let mut nested: Vec<WindowFunction> = Vec::new();
        for expr in &project.exprs {
            if expr.as_ref().as_window().is_some() {
                continue; // already top-level
            }
            let mut collector = WindowFunctionCollector::default();
            collector.visit(expr);
            for w in collector.found {
                if !nested.contains(&w) {
                    nested.push(w);
                }
            }
        }
        if nested.is_empty() {
            let ptr = Arc::new(rebuilt);
            new_by_id.insert(node.id(), ptr.clone());
            result.push(ptr);
            continue;
        }
        debug!(project = project.id, count = nested.len(), "separating window functions");
        let input = project.input.clone();
        let input_size = input.size();
        let mut lower_exprs = column_refs_for(&input);
        let mut lower_fields: Vec<String> = (0..input_size).map(|i| format!("col{i}")).collect();
        for (i, w) in nested.iter().enumerate() {
            lower_exprs.push(w.clone().into());
            lower_fields.push(format!("win{i}"));
        }
        let lower_id = next_node_id();
        let lower = Arc::new(RelAlgNode::Project(Project {
            id: lower_id,
            exprs: lower_exprs,
            fields: lower_fields,
            input,
        }));
        let lower_types = lower.output_types();
        // Upper: original exprs, with input refs re-pointed at the lower
        // projection and nested window functions replaced by loads.
        let nested_for_mapping = nested.clone();
        let upper_exprs: Vec<ExprRef> = project
            .exprs
            .iter()
            .map(|expr| {
                replace_windows(expr, &nested_for_mapping, lower_id, input_size, &lower_types)
            })
            .collect();
        let upper = Arc::new(RelAlgNode::Project(Project {
            id: project.id,
            exprs: upper_exprs,
            fields: project.fields.clone(),
            input: lower.clone(),
        }));
        new_by_id.insert(node.id(), upper.clone());
        result.push(lower);
        result.push(upper);
    }
    result
}

struct WindowReplacer<'a> {
    nested: &'a [WindowFunction],
    lower_id: NodeId,
    input_size: usize,
    lower_types: &'a [basalt_common::types::TypeRef],
}

impl ExprRewriter for WindowReplacer<'_> {
    fn rewrite_window(&mut self, w: &WindowFunction) -> ExprRef {
        if let Some(pos) = self.nested.iter().position(|n| n == w) {
            let index = self.input_size + pos;
            return ColumnRef {
                ty: self.lower_types[index],
                node: self.lower_id,
                index,
            }
            .into();
        }
        // Top-level window function: keep it, repointing argument refs.
        WindowFunction {
            ty: w.ty,
            kind: w.kind,
            args: w.args.iter().map(|a| self.rewrite_expr(a)).collect(),
            partition_keys: w
                .partition_keys
                .iter()
                .map(|a| self.rewrite_expr(a))
                .collect(),
            order_keys: w.order_keys.iter().map(|a| self.rewrite_expr(a)).collect(),
            collation: w.collation.clone(),
        }
        .into()
    }

    fn rewrite_column_ref(&mut self, _expr: &ExprRef, col_ref: &ColumnRef) -> ExprRef {
        // The lower projection passes every input column through at the
        // same ordinal, so an identity repoint is enough.
        ColumnRef {
            ty: self.lower_types[col_ref.index],
            node: self.lower_id,
            index: col_ref.index,
        }
        .into()
    }
}

fn replace_windows(
    expr: &ExprRef,
    nested: &[WindowFunction],
    lower_id: NodeId,
    input_size: usize,
    lower_types: &[basalt_common::types::TypeRef],
) -> ExprRef {
    let mut replacer = WindowReplacer {
        nested,
        lower_id,
        input_size,
        lower_types,
    };
    replacer.rewrite_expr(expr)
}
