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

//! Relational algebra nodes.
//!
//! Nodes are immutable and shared; rewrite passes rebuild nodes while
//! preserving their ids, so `ColumnRef`s stay valid across passes unless a
//! pass explicitly remaps them.

use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use enum_as_inner::EnumAsInner;
use itertools::Itertools;
use parse_display::Display;

use basalt_common::schema::{ColumnInfoRef, TableInfoRef};
use basalt_common::types::TypeRef;
use basalt_expr::expr::{ColumnRef, Constant, OrderEntry};
use basalt_expr::{ExprRef, NodeId};

pub type NodePtr = Arc<RelAlgNode>;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_node_id() -> NodeId {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display(style = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
    Semi,
    Anti,
}

#[derive(Debug, Clone, EnumAsInner)]
pub enum RelAlgNode {
    Scan(Scan),
    Project(Project),
    Filter(Filter),
    Aggregate(Aggregate),
    Join(Join),
    Sort(Sort),
    Union(LogicalUnion),
    Values(LogicalValues),
}

#[derive(Debug, Clone)]
pub struct Scan {
    pub id: NodeId,
    pub table: TableInfoRef,
    pub columns: Vec<ColumnInfoRef>,
}

#[derive(Debug, Clone)]
pub struct Project {
    pub id: NodeId,
    pub exprs: Vec<ExprRef>,
    pub fields: Vec<String>,
    pub input: NodePtr,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub id: NodeId,
    pub condition: ExprRef,
    pub input: NodePtr,
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub id: NodeId,
    pub group_by_count: usize,
    pub aggs: Vec<ExprRef>,
    pub fields: Vec<String>,
    pub input: NodePtr,
    /// Wraps an equivalent input without new work; skipped by execution.
    pub is_nop: bool,
}

#[derive(Debug, Clone)]
pub struct Join {
    pub id: NodeId,
    pub left: NodePtr,
    pub right: NodePtr,
    pub condition: ExprRef,
    pub join_type: JoinType,
}

#[derive(Debug, Clone)]
pub struct Sort {
    pub id: NodeId,
    pub collation: Vec<OrderEntry>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub input: NodePtr,
    /// `LIMIT 0`: statically empty result.
    pub empty_result: bool,
}

#[derive(Debug, Clone)]
pub struct LogicalUnion {
    pub id: NodeId,
    pub inputs: Vec<NodePtr>,
    pub all: bool,
}

#[derive(Debug, Clone)]
pub struct LogicalValues {
    pub id: NodeId,
    pub fields: Vec<String>,
    pub row_type: Vec<TypeRef>,
    pub rows: Vec<Vec<Constant>>,
}

impl RelAlgNode {
    pub fn id(&self) -> NodeId {
        match self {
            RelAlgNode::Scan(n) => n.id,
            RelAlgNode::Project(n) => n.id,
            RelAlgNode::Filter(n) => n.id,
            RelAlgNode::Aggregate(n) => n.id,
            RelAlgNode::Join(n) => n.id,
            RelAlgNode::Sort(n) => n.id,
            RelAlgNode::Union(n) => n.id,
            RelAlgNode::Values(n) => n.id,
        }
    }

    pub fn inputs(&self) -> Vec<NodePtr> {
        match self {
            RelAlgNode::Scan(_) => Vec::new(),
            RelAlgNode::Project(n) => vec![n.input.clone()],
            RelAlgNode::Filter(n) => vec![n.input.clone()],
            RelAlgNode::Aggregate(n) => vec![n.input.clone()],
            RelAlgNode::Join(n) => vec![n.left.clone(), n.right.clone()],
            RelAlgNode::Sort(n) => vec![n.input.clone()],
            RelAlgNode::Union(n) => n.inputs.clone(),
            RelAlgNode::Values(_) => Vec::new(),
        }
    }

    /// Number of output columns.
    pub fn size(&self) -> usize {
        match self {
            RelAlgNode::Scan(n) => n.columns.len(),
            RelAlgNode::Project(n) => n.exprs.len(),
            RelAlgNode::Filter(n) => n.input.size(),
            RelAlgNode::Aggregate(n) => n.group_by_count + n.aggs.len(),
            RelAlgNode::Join(n) => match n.join_type {
                JoinType::Inner | JoinType::Left => n.left.size() + n.right.size(),
                JoinType::Semi | JoinType::Anti => n.left.size(),
            },
            RelAlgNode::Sort(n) => n.input.size(),
            RelAlgNode::Union(n) => n.inputs[0].size(),
            RelAlgNode::Values(n) => n.row_type.len(),
        }
    }

    /// Output column types, in order.
    pub fn output_types(&self) -> Vec<TypeRef> {
        match self {
            RelAlgNode::Scan(n) => n.columns.iter().map(|c| c.ty).collect(),
            RelAlgNode::Project(n) => n.exprs.iter().map(|e| e.ty()).collect(),
            RelAlgNode::Filter(n) => n.input.output_types(),
            RelAlgNode::Aggregate(n) => {
                let mut types: Vec<TypeRef> = n
                    .input
                    .output_types()
                    .into_iter()
                    .take(n.group_by_count)
                    .collect();
                types.extend(n.aggs.iter().map(|a| a.ty()));
                types
            }
            RelAlgNode::Join(n) => {
                let mut types = n.left.output_types();
                match n.join_type {
                    JoinType::Inner => types.extend(n.right.output_types()),
                    JoinType::Left => types.extend(
                        n.right
                            .output_types()
                            .into_iter()
                            .map(|t| t.with_nullable(true)),
                    ),
                    JoinType::Semi | JoinType::Anti => {}
                }
                types
            }
            RelAlgNode::Sort(n) => n.input.output_types(),
            RelAlgNode::Union(n) => n.inputs[0].output_types(),
            RelAlgNode::Values(n) => n.row_type.clone(),
        }
    }

    /// Output field names, synthesized where the node kind has none.
    pub fn field_names(&self) -> Vec<String> {
        match self {
            RelAlgNode::Scan(n) => n.columns.iter().map(|c| c.name.clone()).collect(),
            RelAlgNode::Project(n) => n.fields.clone(),
            RelAlgNode::Filter(n) => n.input.field_names(),
            RelAlgNode::Aggregate(n) => n.fields.clone(),
            RelAlgNode::Join(n) => {
                let mut names = n.left.field_names();
                if matches!(n.join_type, JoinType::Inner | JoinType::Left) {
                    names.extend(n.right.field_names());
                }
                names
            }
            RelAlgNode::Sort(n) => n.input.field_names(),
            RelAlgNode::Union(n) => n.inputs[0].field_names(),
            RelAlgNode::Values(n) => n.fields.clone(),
        }
    }

    /// All expressions carried directly by this node.
    pub fn exprs(&self) -> Vec<ExprRef> {
        match self {
            RelAlgNode::Project(n) => n.exprs.clone(),
            RelAlgNode::Filter(n) => vec![n.condition.clone()],
            RelAlgNode::Aggregate(n) => n.aggs.clone(),
            RelAlgNode::Join(n) => vec![n.condition.clone()],
            _ => Vec::new(),
        }
    }

    /// A fresh copy of this node with `inputs` replaced, keeping the id.
    pub fn clone_with_inputs(&self, inputs: Vec<NodePtr>) -> RelAlgNode {
        match self {
            RelAlgNode::Scan(n) => {
                debug_assert!(inputs.is_empty());
                RelAlgNode::Scan(n.clone())
            }
            RelAlgNode::Project(n) => {
                let [input] = <[NodePtr; 1]>::try_from(inputs).expect("project has one input");
                RelAlgNode::Project(Project {
                    input,
                    ..n.clone()
                })
            }
            RelAlgNode::Filter(n) => {
                let [input] = <[NodePtr; 1]>::try_from(inputs).expect("filter has one input");
                RelAlgNode::Filter(Filter {
                    input,
                    ..n.clone()
                })
            }
            RelAlgNode::Aggregate(n) => {
                let [input] = <[NodePtr; 1]>::try_from(inputs).expect("aggregate has one input");
                RelAlgNode::Aggregate(Aggregate {
                    input,
                    ..n.clone()
                })
            }
            RelAlgNode::Join(n) => {
                let [left, right] =
                    <[NodePtr; 2]>::try_from(inputs).expect("join has two inputs");
                RelAlgNode::Join(Join {
                    left,
                    right,
                    ..n.clone()
                })
            }
            RelAlgNode::Sort(n) => {
                let [input] = <[NodePtr; 1]>::try_from(inputs).expect("sort has one input");
                RelAlgNode::Sort(Sort {
                    input,
                    ..n.clone()
                })
            }
            RelAlgNode::Union(n) => RelAlgNode::Union(LogicalUnion {
                inputs,
                ..n.clone()
            }),
            RelAlgNode::Values(n) => {
                debug_assert!(inputs.is_empty());
                RelAlgNode::Values(n.clone())
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            RelAlgNode::Scan(_) => "Scan",
            RelAlgNode::Project(_) => "Project",
            RelAlgNode::Filter(_) => "Filter",
            RelAlgNode::Aggregate(_) => "Aggregate",
            RelAlgNode::Join(_) => "Join",
            RelAlgNode::Sort(_) => "Sort",
            RelAlgNode::Union(_) => "Union",
            RelAlgNode::Values(_) => "Values",
        }
    }
}

/// `ColumnRef`s addressing every output column of `node`, the expression
/// scope its consumers parse against.
pub fn column_refs_for(node: &NodePtr) -> Vec<ExprRef> {
    node.output_types()
        .into_iter()
        .enumerate()
        .map(|(index, ty)| {
            ColumnRef {
                ty,
                node: node.id(),
                index,
            }
            .into()
        })
        .collect()
}

/// Structural hash of the DAG under `root`, the recycler cache key. Node
/// ids are excluded so identical plans from different queries collide.
pub fn dag_hash(root: &NodePtr) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    hash_node(root, &mut hasher);
    hasher.finish()
}

fn hash_node(node: &NodePtr, hasher: &mut impl Hasher) {
    node.kind_name().hash(hasher);
    match node.as_ref() {
        RelAlgNode::Scan(n) => {
            n.table.db_id.hash(hasher);
            n.table.table_id.hash(hasher);
            for c in &n.columns {
                c.column_id.hash(hasher);
            }
        }
        RelAlgNode::Project(n) => {
            for (e, f) in n.exprs.iter().zip(&n.fields) {
                e.hash(hasher);
                f.hash(hasher);
            }
        }
        RelAlgNode::Filter(n) => n.condition.hash(hasher),
        RelAlgNode::Aggregate(n) => {
            n.group_by_count.hash(hasher);
            for a in &n.aggs {
                a.hash(hasher);
            }
        }
        RelAlgNode::Join(n) => {
            n.join_type.hash(hasher);
            n.condition.hash(hasher);
        }
        RelAlgNode::Sort(n) => {
            n.collation.hash(hasher);
            n.limit.hash(hasher);
            n.offset.hash(hasher);
        }
        RelAlgNode::Union(n) => n.all.hash(hasher),
        RelAlgNode::Values(n) => {
            for row in &n.rows {
                for value in row {
                    value.hash(hasher);
                }
            }
        }
    }
    for input in node.inputs() {
        hash_node(&input, hasher);
    }
}

/// Renders an indented tree for logs and snapshot tests.
pub fn explain(root: &NodePtr) -> String {
    let mut out = String::new();
    explain_rec(root, 0, &mut out);
    out
}

fn explain_rec(node: &NodePtr, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let detail = match node.as_ref() {
        RelAlgNode::Scan(n) => format!("table={}", n.table.name),
        RelAlgNode::Project(n) => {
            let exprs = n.exprs.iter().map(|e| e.to_string()).join(", ");
            format!("exprs=[{exprs}]")
        }
        RelAlgNode::Filter(n) => format!("condition={}", n.condition),
        RelAlgNode::Aggregate(n) => {
            let aggs = n.aggs.iter().map(|e| e.to_string()).join(", ");
            format!("groups={} aggs=[{aggs}]", n.group_by_count)
        }
        RelAlgNode::Join(n) => format!("type={} condition={}", n.join_type, n.condition),
        RelAlgNode::Sort(n) => format!(
            "collation={:?} limit={:?} offset={}",
            n.collation
                .iter()
                .map(|c| (c.field, c.is_desc))
                .collect::<Vec<_>>(),
            n.limit,
            n.offset
        ),
        RelAlgNode::Union(n) => format!("all={}", n.all),
        RelAlgNode::Values(n) => format!("rows={}", n.rows.len()),
    };
    let _ = writeln!(out, "{indent}{} {detail}", node.kind_name());
    for input in node.inputs() {
        explain_rec(&input, depth + 1, out);
    }
}
