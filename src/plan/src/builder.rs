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

//! JSON plan deserialization.
//!
//! The input is `{"rels": [...]}` where each element carries a `relOp`
//! discriminator and an `id` equal to its 0-based position. Nodes are
//! built in order; `inputs` entries refer back by id.

use std::sync::Arc;

use serde_json::Value as Json;

use basalt_common::config::Config;
use basalt_common::datum::Datum;
use basalt_common::schema::SchemaProviderRef;
use basalt_common::types::{TimeUnit, TypeContext, TypeRef};
use basalt_expr::analyzer;
use basalt_expr::expr::{
    AggExpr, ArrayExpr, CardinalityExpr, CharLengthExpr, Constant, DateAddExpr, DateDiffExpr,
    DateTruncExpr, Expr, ExprRef, FunctionOper, InSubquery, KeyForStringExpr, LikelihoodExpr,
    LowerExpr, OffsetInFragment, OrderEntry, SampleRatioExpr, ScalarSubquery, UOper,
    WidthBucketExpr, WindowFunction,
};
use basalt_expr::ops::{
    AggType, DateAddField, DateTruncField, ExtractField, OpType, Qualifier, WindowFuncKind,
};

use crate::error::{PlanError, Result};
use crate::node::*;
use crate::passes;

/// A fully built and rewritten query DAG.
#[derive(Debug, Clone)]
pub struct QueryDag {
    pub root: NodePtr,
    pub nodes: Vec<NodePtr>,
    pub subqueries: Vec<NodePtr>,
}

/// Parses the JSON plan and runs the rewrite pipeline.
pub fn build_dag(
    plan_json: &str,
    db_id: i32,
    schema: &SchemaProviderRef,
    config: &Config,
) -> Result<QueryDag> {
    let ast: Json = serde_json::from_str(plan_json)?;
    let mut builder = PlanBuilder {
        db_id,
        schema: schema.clone(),
        nodes: Vec::new(),
        subqueries: Vec::new(),
    };
    let rels = field(&ast, "rels")?;
    builder.run(rels)?;
    let dag = QueryDag {
        root: builder
            .nodes
            .last()
            .cloned()
            .ok_or_else(|| PlanError::MalformedPlan("empty rels array".into()))?,
        nodes: builder.nodes,
        subqueries: builder.subqueries,
    };
    passes::run_pipeline(dag, config)
}

struct PlanBuilder {
    db_id: i32,
    schema: SchemaProviderRef,
    nodes: Vec<NodePtr>,
    subqueries: Vec<NodePtr>,
}

fn field<'a>(v: &'a Json, name: &str) -> Result<&'a Json> {
    v.get(name)
        .ok_or_else(|| PlanError::MalformedPlan(format!("missing field '{name}'")))
}

fn json_str<'a>(v: &'a Json) -> Result<&'a str> {
    v.as_str()
        .ok_or_else(|| PlanError::MalformedPlan(format!("expected string, got {v}")))
}

fn json_i64(v: &Json) -> Result<i64> {
    v.as_i64()
        .ok_or_else(|| PlanError::MalformedPlan(format!("expected integer, got {v}")))
}

fn json_bool(v: &Json) -> Result<bool> {
    v.as_bool()
        .ok_or_else(|| PlanError::MalformedPlan(format!("expected boolean, got {v}")))
}

fn json_array<'a>(v: &'a Json) -> Result<&'a Vec<Json>> {
    v.as_array()
        .ok_or_else(|| PlanError::MalformedPlan(format!("expected array, got {v}")))
}

impl PlanBuilder {
    fn run(&mut self, rels: &Json) -> Result<()> {
        for rel in json_array(rels)? {
            let rel_op = json_str(field(rel, "relOp")?)?;
            let node = match rel_op {
                "LogicalTableScan" | "EnumerableTableScan" => self.dispatch_table_scan(rel)?,
                "LogicalProject" => self.dispatch_project(rel)?,
                "LogicalFilter" => self.dispatch_filter(rel)?,
                "LogicalAggregate" => self.dispatch_aggregate(rel)?,
                "LogicalJoin" => self.dispatch_join(rel)?,
                "LogicalSort" => self.dispatch_sort(rel)?,
                "LogicalValues" => self.dispatch_logical_values(rel)?,
                "LogicalUnion" => self.dispatch_union(rel)?,
                other => {
                    return Err(PlanError::NotSupported(format!(
                        "node {other} not supported yet"
                    )))
                }
            };
            self.nodes.push(Arc::new(node));
        }
        Ok(())
    }

    fn inputs(&self, rel: &Json) -> Result<Vec<NodePtr>> {
        if let Some(inputs) = rel.get("inputs") {
            let mut result = Vec::new();
            for entry in json_array(inputs)? {
                let idx: usize = json_str(entry)?
                    .parse()
                    .map_err(|_| PlanError::MalformedPlan("bad input id".into()))?;
                let node = self
                    .nodes
                    .get(idx)
                    .ok_or_else(|| PlanError::MalformedPlan(format!("input {idx} out of range")))?;
                result.push(node.clone());
            }
            return Ok(result);
        }
        match self.nodes.last() {
            Some(prev) => Ok(vec![prev.clone()]),
            None => Err(PlanError::MalformedPlan(
                "first node cannot take an implicit input".into(),
            )),
        }
    }

    fn one_input(&self, rel: &Json) -> Result<NodePtr> {
        let inputs = self.inputs(rel)?;
        let [input] = <[NodePtr; 1]>::try_from(inputs)
            .map_err(|_| PlanError::MalformedPlan("expected exactly one input".into()))?;
        Ok(input)
    }

    fn dispatch_table_scan(&mut self, rel: &Json) -> Result<RelAlgNode> {
        let table_path = json_array(field(rel, "table")?)?;
        let table_name = json_str(
            table_path
                .last()
                .ok_or_else(|| PlanError::MalformedPlan("empty table path".into()))?,
        )?;
        let table = self
            .schema
            .table_info(self.db_id, table_name)
            .ok_or_else(|| PlanError::UnknownTable(table_name.to_owned()))?;
        let mut columns = Vec::new();
        for name in json_array(field(rel, "fieldNames")?)? {
            let name = json_str(name)?;
            let info = self
                .schema
                .column_info(&table, name)
                .ok_or_else(|| PlanError::UnknownColumn(format!("{table_name}.{name}")))?;
            columns.push(info);
        }
        Ok(RelAlgNode::Scan(Scan {
            id: next_node_id(),
            table,
            columns,
        }))
    }

    fn dispatch_project(&mut self, rel: &Json) -> Result<RelAlgNode> {
        let input = self.one_input(rel)?;
        let scope = column_refs_for(&input);
        let mut exprs = Vec::new();
        for e in json_array(field(rel, "exprs")?)? {
            exprs.push(self.parse_expr(e, &scope)?);
        }
        if exprs.is_empty() {
            return Err(PlanError::NotSupported(
                "empty projections are not allowed".into(),
            ));
        }
        let fields = strings_from_json_array(field(rel, "fields")?)?;
        Ok(RelAlgNode::Project(Project {
            id: next_node_id(),
            exprs,
            fields,
            input,
        }))
    }

    fn dispatch_filter(&mut self, rel: &Json) -> Result<RelAlgNode> {
        let input = self.one_input(rel)?;
        let scope = column_refs_for(&input);
        let condition = self.parse_expr(field(rel, "condition")?, &scope)?;
        if !condition.ty().is_boolean() {
            return Err(PlanError::MalformedPlan(
                "filter condition is not boolean".into(),
            ));
        }
        Ok(RelAlgNode::Filter(Filter {
            id: next_node_id(),
            condition,
            input,
        }))
    }

    fn dispatch_aggregate(&mut self, rel: &Json) -> Result<RelAlgNode> {
        let input = self.one_input(rel)?;
        if rel.get("groups").is_some() || rel.get("indicator").is_some() {
            return Err(PlanError::NotSupported("GROUP BY extensions".into()));
        }
        let fields = strings_from_json_array(field(rel, "fields")?)?;
        let group = json_array(field(rel, "group")?)?;
        for (i, g) in group.iter().enumerate() {
            if json_i64(g)? as usize != i {
                return Err(PlanError::NotSupported(
                    "group keys must be a dense prefix".into(),
                ));
            }
        }
        let scope = column_refs_for(&input);
        let mut aggs = Vec::new();
        for agg in json_array(field(rel, "aggs")?)? {
            aggs.push(self.parse_agg_expr(agg, &scope)?);
        }
        Ok(RelAlgNode::Aggregate(Aggregate {
            id: next_node_id(),
            group_by_count: group.len(),
            aggs,
            fields,
            input,
            is_nop: false,
        }))
    }

    fn dispatch_join(&mut self, rel: &Json) -> Result<RelAlgNode> {
        let inputs = self.inputs(rel)?;
        let [left, right] = <[NodePtr; 2]>::try_from(inputs)
            .map_err(|_| PlanError::MalformedPlan("join expects two inputs".into()))?;
        let join_type = match json_str(field(rel, "joinType")?)? {
            "inner" => JoinType::Inner,
            "left" => JoinType::Left,
            "semi" => JoinType::Semi,
            "anti" => JoinType::Anti,
            other => {
                return Err(PlanError::NotSupported(format!(
                    "join type ({other}) not supported"
                )))
            }
        };
        let mut scope = column_refs_for(&left);
        scope.extend(column_refs_for(&right));
        let condition = self.parse_expr(field(rel, "condition")?, &scope)?;
        Ok(RelAlgNode::Join(Join {
            id: next_node_id(),
            left,
            right,
            condition,
            join_type,
        }))
    }

    fn dispatch_sort(&mut self, rel: &Json) -> Result<RelAlgNode> {
        let input = self.one_input(rel)?;
        let mut collation = Vec::new();
        for entry in json_array(field(rel, "collation")?)? {
            let field_idx = json_i64(field(entry, "field")?)? as usize;
            let is_desc = match entry.get("direction").map(json_str).transpose()? {
                Some("DESCENDING") => true,
                _ => false,
            };
            let nulls_first = matches!(
                entry.get("nulls").map(json_str).transpose()?,
                Some("FIRST")
            );
            collation.push(OrderEntry {
                field: field_idx,
                is_desc,
                nulls_first,
            });
        }
        let limit = self.int_literal_field(rel, "fetch")?;
        let offset = self.int_literal_field(rel, "offset")?.unwrap_or(0);
        Ok(RelAlgNode::Sort(Sort {
            id: next_node_id(),
            collation,
            limit: limit.filter(|l| *l > 0).map(|l| l as usize),
            offset: offset as usize,
            input,
            empty_result: limit == Some(0),
        }))
    }

    fn dispatch_logical_values(&mut self, rel: &Json) -> Result<RelAlgNode> {
        let mut fields = Vec::new();
        let mut row_type = Vec::new();
        for component in json_array(field(rel, "type")?)? {
            fields.push(json_str(field(component, "name")?)?.to_owned());
            row_type.push(parse_type(component)?);
        }
        if rel
            .get("inputs")
            .is_some_and(|v| v.as_array().is_some_and(|a| !a.is_empty()))
        {
            return Err(PlanError::NotSupported(
                "inputs in logical values".into(),
            ));
        }
        let mut rows = Vec::new();
        for row in json_array(field(rel, "tuples")?)? {
            let mut parsed = Vec::new();
            for value in json_array(row)? {
                let expr = self.parse_literal(value)?;
                let constant = expr
                    .as_constant()
                    .ok_or_else(|| PlanError::MalformedPlan("non-literal values row".into()))?
                    .clone();
                parsed.push(constant);
            }
            if let Some(first) = rows.first() {
                let first: &Vec<Constant> = first;
                if first.len() != parsed.len() {
                    return Err(PlanError::MalformedPlan("ragged values rows".into()));
                }
            }
            rows.push(parsed);
        }
        Ok(RelAlgNode::Values(LogicalValues {
            id: next_node_id(),
            fields,
            row_type,
            rows,
        }))
    }

    fn dispatch_union(&mut self, rel: &Json) -> Result<RelAlgNode> {
        let inputs = self.inputs(rel)?;
        if inputs.len() < 2 {
            return Err(PlanError::MalformedPlan("union expects >= 2 inputs".into()));
        }
        let all = json_bool(field(rel, "all")?)?;
        let arity = inputs[0].size();
        if inputs.iter().any(|i| i.size() != arity) {
            return Err(PlanError::NotSupported(
                "union of mismatched arity".into(),
            ));
        }
        Ok(RelAlgNode::Union(LogicalUnion {
            id: next_node_id(),
            inputs,
            all,
        }))
    }

    fn int_literal_field(&mut self, rel: &Json, name: &str) -> Result<Option<i64>> {
        let Some(value) = rel.get(name) else {
            return Ok(None);
        };
        let expr = self.parse_literal(value)?;
        let constant = expr
            .as_constant()
            .ok_or_else(|| PlanError::MalformedPlan(format!("{name} is not a literal")))?;
        constant
            .value
            .as_int()
            .map(Some)
            .ok_or_else(|| PlanError::MalformedPlan(format!("{name} is not an integer")))
    }

    // ---- expression parsing ----

    fn parse_expr(&mut self, expr: &Json, scope: &[ExprRef]) -> Result<ExprRef> {
        if expr.get("input").is_some() {
            let ordinal = json_i64(field(expr, "input")?)? as usize;
            return scope.get(ordinal).cloned().ok_or_else(|| {
                PlanError::MalformedPlan(format!("input ordinal {ordinal} out of range"))
            });
        }
        if expr.get("literal").is_some() {
            return self.parse_literal(expr);
        }
        if expr.get("op").is_some() {
            let op_str = json_str(field(expr, "op")?)?;
            return match op_str {
                "CASE" => self.parse_case(expr, scope),
                "$SCALAR_QUERY" => self.parse_scalar_subquery(expr),
                "IS NOT NULL" => {
                    let operands = json_array(field(expr, "operands")?)?;
                    let operand = self.parse_expr(&operands[0], scope)?;
                    let is_null = self.make_uoper(expr, OpType::IsNull, operand)?;
                    self.make_uoper(expr, OpType::Not, is_null)
                }
                _ => self.parse_operator(expr, scope),
            };
        }
        Err(PlanError::NotSupported(format!(
            "expression node {expr} not supported"
        )))
    }

    fn parse_literal(&mut self, expr: &Json) -> Result<ExprRef> {
        let ctx = TypeContext::global();
        let literal = field(expr, "literal")?;
        let type_name = json_str(field(expr, "type")?)?;
        let target_name = json_str(field(expr, "target_type")?)?;
        let scale = json_i64(field(expr, "scale")?)?;
        let precision = json_i64(field(expr, "precision")?)?;
        let type_scale = json_i64(field(expr, "type_scale")?)?;
        let type_precision = json_i64(field(expr, "type_precision")?)?;
        let lit_type = build_type(type_name, false, precision, scale)?;
        let target_type = build_type(target_name, false, type_precision, type_scale)?;

        if literal.is_null() {
            if target_type.is_array() {
                return Ok(ArrayExpr {
                    ty: target_type.with_nullable(true),
                    elements: Vec::new(),
                    is_null: true,
                }
                .into());
            }
            if target_type.is_null() {
                return Ok(Constant::untyped_null().into());
            }
            return Ok(Constant::null(target_type.with_nullable(true)).into());
        }
        let lit: ExprRef = match type_name {
            "DECIMAL" | "NUMERIC" => {
                let value = json_i64(literal)?;
                if target_type.is_fp() && scale == 0 {
                    Constant::new(ctx.fp64(false), Datum::Fp(value as f64)).into()
                } else if scale != 0 {
                    analyzer::analyze_fixed_pt_value(value, precision as u8, scale as u8)
                } else {
                    analyzer::analyze_int_value(value)
                }
            }
            "TINYINT" | "SMALLINT" | "INTEGER" | "BIGINT" => {
                Constant::new(lit_type, Datum::Int(json_i64(literal)?)).into()
            }
            "VARCHAR" | "CHAR" | "TEXT" => analyzer::analyze_string_value(json_str(literal)?),
            "BOOLEAN" => Constant::new(lit_type, Datum::Bool(json_bool(literal)?)).into(),
            "FLOAT" | "REAL" | "DOUBLE" => {
                let v = literal
                    .as_f64()
                    .ok_or_else(|| PlanError::MalformedPlan("bad fp literal".into()))?;
                Constant::new(ctx.fp64(false), Datum::Fp(v)).into()
            }
            "TIME" | "TIMESTAMP" | "INTERVAL_YEAR" | "INTERVAL_MONTH" | "INTERVAL_DAY"
            | "INTERVAL_HOUR" | "INTERVAL_MINUTE" | "INTERVAL_SECOND" => {
                Constant::new(lit_type, Datum::Int(json_i64(literal)?)).into()
            }
            "DATE" => {
                Constant::new(lit_type, Datum::Int(json_i64(literal)? * 24 * 3600)).into()
            }
            other => {
                return Err(PlanError::NotSupported(format!(
                    "literal type {other}"
                )))
            }
        };
        if lit.ty() == target_type {
            return Ok(lit);
        }
        Ok(lit.add_cast(target_type)?)
    }

    fn parse_case(&mut self, expr: &Json, scope: &[ExprRef]) -> Result<ExprRef> {
        let operands = json_array(field(expr, "operands")?)?;
        if operands.len() < 2 {
            return Err(PlanError::MalformedPlan("CASE needs >= 2 operands".into()));
        }
        let mut when_then = Vec::new();
        let mut else_expr = None;
        let mut it = operands.iter().peekable();
        while let Some(first) = it.next() {
            let first = self.parse_expr(first, scope)?;
            match it.next() {
                Some(second) => {
                    let second = self.parse_expr(second, scope)?;
                    when_then.push((first, second));
                }
                None => {
                    else_expr = Some(first);
                }
            }
        }
        Ok(analyzer::normalize_case_expr(when_then, else_expr)?)
    }

    fn parse_scalar_subquery(&mut self, expr: &Json) -> Result<ExprRef> {
        let subquery_ast = field(expr, "subquery")?;
        let rels = field(subquery_ast, "rels")?;
        let mut sub_builder = PlanBuilder {
            db_id: self.db_id,
            schema: self.schema.clone(),
            nodes: Vec::new(),
            subqueries: Vec::new(),
        };
        sub_builder.run(rels)?;
        let root = sub_builder
            .nodes
            .last()
            .cloned()
            .ok_or_else(|| PlanError::MalformedPlan("empty subquery".into()))?;
        self.subqueries.extend(sub_builder.subqueries);
        self.subqueries.push(root.clone());
        let ty = root
            .output_types()
            .first()
            .copied()
            .ok_or_else(|| PlanError::MalformedPlan("subquery with no columns".into()))?;
        Ok(ScalarSubquery {
            ty: ty.with_nullable(true),
            node: root.id(),
        }
        .into())
    }

    fn parse_operator(&mut self, expr: &Json, scope: &[ExprRef]) -> Result<ExprRef> {
        let op_name = json_str(field(expr, "op")?)?;
        if expr.get("partition_keys").is_some() {
            return self.parse_window_function(expr, op_name, scope);
        }
        let operands_json = json_array(field(expr, "operands")?)?;

        if op_name == "IN" && expr.get("subquery").is_some() {
            let arg = self.parse_expr(&operands_json[0], scope)?;
            let sub = self.parse_scalar_subquery(expr)?;
            let node = sub
                .as_scalar_subquery()
                .expect("scalar subquery")
                .node;
            return Ok(InSubquery { arg, node }.into());
        }

        let op = OpType::from_sql_name(op_name);
        match op {
            Some(OpType::In) => {
                let arg = self.parse_expr(&operands_json[0], scope)?;
                let mut values = Vec::new();
                for v in &operands_json[1..] {
                    values.push(self.parse_expr(v, scope)?);
                }
                return Ok(basalt_expr::expr::InValues { arg, values }.into());
            }
            Some(op) if operands_json.len() == 1 => {
                let operand = self.parse_expr(&operands_json[0], scope)?;
                return self.make_uoper(expr, op, operand);
            }
            Some(op) => {
                let mut operands = Vec::new();
                for o in operands_json {
                    operands.push((o, self.parse_expr(o, scope)?));
                }
                if let Some(date_expr) = maybe_make_date_expr(op, &operands)? {
                    return Ok(date_expr);
                }
                let mut result = operands[0].1.clone();
                for (raw, parsed) in &operands[1..] {
                    let (rhs, qualifier) = self.quantified_rhs(raw, parsed, scope)?;
                    result = analyzer::normalize_oper_expr(op, qualifier, result, rhs)?;
                }
                return Ok(result);
            }
            None => {}
        }
        // Function-style operator.
        let mut operands = Vec::new();
        for o in operands_json {
            operands.push(self.parse_expr(o, scope)?);
        }
        let ty = expr
            .get("type")
            .map(parse_type)
            .transpose()?
            .unwrap_or_else(|| TypeContext::global().null());
        self.parse_function_operator(op_name, operands, ty)
    }

    fn quantified_rhs(
        &mut self,
        raw: &&Json,
        parsed: &ExprRef,
        scope: &[ExprRef],
    ) -> Result<(ExprRef, Qualifier)> {
        if let Some(op) = raw.get("op").map(json_str).transpose()? {
            let qualifier = match op {
                "PG_ANY" => Some(Qualifier::Any),
                "PG_ALL" => Some(Qualifier::All),
                _ => None,
            };
            if let Some(qualifier) = qualifier {
                let inner = json_array(field(raw, "operands")?)?;
                let rhs = self.parse_expr(&inner[0], scope)?;
                return Ok((rhs, qualifier));
            }
        }
        Ok((parsed.clone(), Qualifier::One))
    }

    fn make_uoper(&mut self, expr: &Json, op: OpType, operand: ExprRef) -> Result<ExprRef> {
        let ctx = TypeContext::global();
        Ok(match op {
            OpType::Cast => {
                let target = parse_type(field(expr, "type")?)?;
                operand.add_cast(target)?
            }
            OpType::IsNull => UOper {
                ty: ctx.boolean(false),
                op: OpType::IsNull,
                operand,
            }
            .into(),
            OpType::Not => {
                if !operand.ty().is_boolean() {
                    return Err(PlanError::MalformedPlan("NOT of a non-boolean".into()));
                }
                UOper {
                    ty: operand.ty(),
                    op: OpType::Not,
                    operand,
                }
                .into()
            }
            OpType::Minus => UOper {
                ty: operand.ty(),
                op: OpType::UMinus,
                operand,
            }
            .into(),
            OpType::Unnest => {
                let Some(elem) = operand.ty().elem_type() else {
                    return Err(PlanError::MalformedPlan("UNNEST of a non-array".into()));
                };
                UOper {
                    ty: elem.with_nullable(true),
                    op: OpType::Unnest,
                    operand,
                }
                .into()
            }
            other => {
                return Err(PlanError::NotSupported(format!(
                    "unary operator {other}"
                )))
            }
        })
    }

    fn parse_window_function(
        &mut self,
        expr: &Json,
        op_name: &str,
        scope: &[ExprRef],
    ) -> Result<ExprRef> {
        let kind = WindowFuncKind::from_window_name(op_name).ok_or_else(|| {
            PlanError::NotSupported(format!("window function {op_name}"))
        })?;
        let mut args = Vec::new();
        for o in json_array(field(expr, "operands")?)? {
            args.push(self.parse_expr(o, scope)?);
        }
        let mut partition_keys = Vec::new();
        for k in json_array(field(expr, "partition_keys")?)? {
            partition_keys.push(self.parse_expr(k, scope)?);
        }
        let mut order_keys = Vec::new();
        let mut collation = Vec::new();
        if let Some(order_json) = expr.get("order_keys") {
            for (i, entry) in json_array(order_json)?.iter().enumerate() {
                order_keys.push(self.parse_expr(field(entry, "field")?, scope)?);
                let is_desc = matches!(
                    entry.get("direction").map(json_str).transpose()?,
                    Some("DESCENDING")
                );
                let nulls_first = matches!(
                    entry.get("nulls").map(json_str).transpose()?,
                    Some("FIRST")
                );
                collation.push(OrderEntry {
                    field: i,
                    is_desc,
                    nulls_first,
                });
            }
        }
        let ty = parse_type(field(expr, "type")?)?;
        Ok(WindowFunction {
            ty,
            kind,
            args,
            partition_keys,
            order_keys,
            collation,
        }
        .into())
    }

    fn parse_function_operator(
        &mut self,
        name: &str,
        mut args: Vec<ExprRef>,
        ty: TypeRef,
    ) -> Result<ExprRef> {
        let ctx = TypeContext::global();
        Ok(match name {
            "LIKE" | "PG_ILIKE" => {
                let is_ilike = name == "PG_ILIKE";
                let escape = (args.len() > 2).then(|| args.remove(2));
                let pattern = args.remove(1);
                let arg = args.remove(0);
                analyzer::get_like_expr(arg, pattern, escape, is_ilike, false)?
            }
            "REGEXP_LIKE" => {
                let escape = (args.len() > 2).then(|| args.remove(2));
                let pattern = args.remove(1);
                let arg = args.remove(0);
                analyzer::get_regexp_expr(arg, pattern, escape, false)?
            }
            "EXTRACT" | "PG_EXTRACT" => {
                let unit = constant_str(&args[0], "EXTRACT unit")?;
                let from = args.remove(1);
                let extract_field = parse_field::<ExtractField>(&unit, "EXTRACT")?;
                basalt_expr::expr::ExtractExpr {
                    field: extract_field,
                    from,
                }
                .into()
            }
            "DATEADD" | "TIMESTAMPADD" => {
                let unit = constant_str(&args[0], "DATEADD unit")?;
                let datetime = args.remove(2);
                let number = args.remove(1);
                let dt_ty = datetime.ty();
                DateAddExpr {
                    ty: dt_ty,
                    field: parse_field::<DateAddField>(&unit, "DATEADD")?,
                    number,
                    datetime,
                }
                .into()
            }
            "DATEDIFF" | "TIMESTAMPDIFF" => {
                let unit = constant_str(&args[0], "DATEDIFF unit")?;
                let end = args.remove(2);
                let start = args.remove(1);
                DateDiffExpr {
                    field: parse_field::<DateTruncField>(&unit, "DATEDIFF")?,
                    start,
                    end,
                }
                .into()
            }
            "DATE_TRUNC" | "PG_DATE_TRUNC" => {
                let unit = constant_str(&args[0], "DATE_TRUNC unit")?;
                let from = args.remove(1);
                let from_ty = from.ty();
                DateTruncExpr {
                    ty: from_ty,
                    field: parse_field::<DateTruncField>(&unit, "DATE_TRUNC")?,
                    from,
                }
                .into()
            }
            "CHAR_LENGTH" => CharLengthExpr {
                arg: args.remove(0),
                calc_encoded_length: true,
            }
            .into(),
            "LENGTH" => CharLengthExpr {
                arg: args.remove(0),
                calc_encoded_length: false,
            }
            .into(),
            "LOWER" => LowerExpr {
                arg: args.remove(0),
            }
            .into(),
            "KEY_FOR_STRING" => {
                let arg = args.remove(0);
                if !arg.ty().is_ext_dictionary() {
                    return Err(PlanError::MalformedPlan(
                        "KEY_FOR_STRING expects a dictionary-encoded string".into(),
                    ));
                }
                KeyForStringExpr { arg }.into()
            }
            "CARDINALITY" => CardinalityExpr {
                arg: args.remove(0),
            }
            .into(),
            "WIDTH_BUCKET" => {
                let partition_count = args.remove(3);
                let upper = args.remove(2);
                let lower = args.remove(1);
                let target = args.remove(0);
                WidthBucketExpr {
                    target,
                    lower,
                    upper,
                    partition_count,
                }
                .into()
            }
            "SAMPLE_RATIO" => {
                let arg = args.remove(0).add_cast(ctx.fp64(false))?;
                SampleRatioExpr { arg }.into()
            }
            "LIKELY" => LikelihoodExpr {
                arg: args.remove(0),
                likelihood: 0.9375,
            }
            .into(),
            "UNLIKELY" => LikelihoodExpr {
                arg: args.remove(0),
                likelihood: 0.0625,
            }
            .into(),
            "OFFSET_IN_FRAGMENT" => OffsetInFragment.into(),
            "ARRAY" => ArrayExpr {
                ty,
                elements: args,
                is_null: false,
            }
            .into(),
            "ITEM" => {
                let index = args.remove(1);
                let array = args.remove(0);
                analyzer::normalize_oper_expr(OpType::ArrayAt, Qualifier::One, array, index)?
            }
            _ => FunctionOper {
                ty,
                name: name.to_owned(),
                args,
                custom_type_handling: false,
            }
            .into(),
        })
    }

    fn parse_agg_expr(&mut self, agg: &Json, input_exprs: &[ExprRef]) -> Result<ExprRef> {
        let name = json_str(field(agg, "agg")?)?;
        let kind = AggType::from_agg_name(name)
            .ok_or_else(|| PlanError::NotSupported(format!("aggregate function {name}")))?;
        let is_distinct = json_bool(field(agg, "distinct")?)?;
        let operands = json_array(field(agg, "operands")?)?;
        let mut arg = None;
        let mut arg1 = None;
        if let Some(first) = operands.first() {
            let idx = json_i64(first)? as usize;
            arg = Some(input_exprs.get(idx).cloned().ok_or_else(|| {
                PlanError::MalformedPlan(format!("aggregate operand {idx} out of range"))
            })?);
        }
        if let Some(second) = operands.get(1) {
            let idx = json_i64(second)? as usize;
            let expr = input_exprs.get(idx).cloned().ok_or_else(|| {
                PlanError::MalformedPlan(format!("aggregate operand {idx} out of range"))
            })?;
            let constant = expr.as_constant().cloned().ok_or_else(|| {
                PlanError::NotSupported(
                    "non-constant direct argument to an approximate aggregate".into(),
                )
            })?;
            arg1 = Some(constant);
        }
        let ty = parse_type(field(agg, "type")?)?;
        Ok(AggExpr {
            ty,
            kind,
            arg,
            is_distinct,
            arg1,
        }
        .into())
    }
}

fn constant_str(expr: &ExprRef, what: &str) -> Result<String> {
    match expr.as_ref() {
        Expr::Constant(c) => c
            .value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| PlanError::MalformedPlan(format!("{what} must be a string literal"))),
        _ => Err(PlanError::MalformedPlan(format!(
            "{what} must be a string literal"
        ))),
    }
}

fn parse_field<T: std::str::FromStr>(name: &str, what: &str) -> Result<T> {
    let normalized = name.to_lowercase();
    normalized
        .parse::<T>()
        .map_err(|_| PlanError::NotSupported(format!("{what} field {name}")))
}

fn strings_from_json_array(v: &Json) -> Result<Vec<String>> {
    json_array(v)?
        .iter()
        .map(|s| json_str(s).map(str::to_owned))
        .collect()
}

/// `a + interval` / `a - interval` become DATE_ADD when `a` is a datetime.
fn maybe_make_date_expr(op: OpType, operands: &[(&Json, ExprRef)]) -> Result<Option<ExprRef>> {
    if !matches!(op, OpType::Plus | OpType::Minus) || operands.len() != 2 {
        return Ok(None);
    }
    let (_, lhs) = &operands[0];
    let (_, rhs) = &operands[1];
    if !lhs.ty().is_datetime() || !rhs.ty().is_interval() {
        return Ok(None);
    }
    let unit = rhs.ty().time_unit().expect("interval has unit");
    let field = match unit {
        TimeUnit::Month => DateAddField::Month,
        TimeUnit::Day => DateAddField::Day,
        TimeUnit::Second => DateAddField::Second,
        TimeUnit::Milli => DateAddField::Milli,
        TimeUnit::Micro => DateAddField::Micro,
        TimeUnit::Nano => DateAddField::Nano,
    };
    let number = if op == OpType::Minus {
        UOper {
            ty: rhs.ty(),
            op: OpType::UMinus,
            operand: rhs.clone(),
        }
        .into()
    } else {
        rhs.clone()
    };
    Ok(Some(
        DateAddExpr {
            ty: lhs.ty().with_nullable(lhs.ty().nullable() || rhs.ty().nullable()),
            field,
            number,
            datetime: lhs.clone(),
        }
        .into(),
    ))
}

/// Maps a serialized type name plus parameters onto an interned type.
pub fn parse_type(v: &Json) -> Result<TypeRef> {
    let name = json_str(field(v, "type")?)?;
    let nullable = v
        .get("nullable")
        .map(json_bool)
        .transpose()?
        .unwrap_or(true);
    let precision = v.get("precision").map(json_i64).transpose()?.unwrap_or(0);
    let scale = v.get("scale").map(json_i64).transpose()?.unwrap_or(0);
    build_type(name, nullable, precision, scale)
}

fn build_type(name: &str, nullable: bool, precision: i64, scale: i64) -> Result<TypeRef> {
    let ctx = TypeContext::global();
    Ok(match name {
        "NULL" => ctx.null(),
        "TINYINT" => ctx.int8(nullable),
        "SMALLINT" => ctx.int16(nullable),
        "INTEGER" => ctx.int32(nullable),
        "BIGINT" => ctx.int64(nullable),
        "FLOAT" | "REAL" => ctx.fp32(nullable),
        "DOUBLE" => ctx.fp64(nullable),
        "DECIMAL" | "NUMERIC" => ctx.decimal64(precision.clamp(1, 19) as u8, scale as u8, nullable),
        "BOOLEAN" => ctx.boolean(nullable),
        "VARCHAR" | "CHAR" | "TEXT" => ctx.text(nullable),
        "TIMESTAMP" => ctx.timestamp(timestamp_unit(precision), nullable),
        "DATE" => ctx.date(TimeUnit::Second, nullable),
        "TIME" => ctx.time(TimeUnit::Second, nullable),
        "INTERVAL_YEAR" | "INTERVAL_MONTH" | "INTERVAL_YEAR_MONTH" => {
            ctx.interval(TimeUnit::Month, nullable)
        }
        "INTERVAL_DAY" | "INTERVAL_HOUR" | "INTERVAL_MINUTE" | "INTERVAL_SECOND"
        | "INTERVAL_DAY_HOUR" | "INTERVAL_DAY_MINUTE" | "INTERVAL_DAY_SECOND"
        | "INTERVAL_HOUR_MINUTE" | "INTERVAL_HOUR_SECOND" | "INTERVAL_MINUTE_SECOND" => {
            ctx.interval(TimeUnit::Milli, nullable)
        }
        other => {
            return Err(PlanError::NotSupported(format!("type {other}")))
        }
    })
}

fn timestamp_unit(precision: i64) -> TimeUnit {
    match precision {
        9 => TimeUnit::Nano,
        6 => TimeUnit::Micro,
        3 => TimeUnit::Milli,
        _ => TimeUnit::Second,
    }
}
