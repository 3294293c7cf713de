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

use std::sync::Arc;

use expect_test::expect;

use basalt_common::config::Config;
use basalt_common::schema::{MemorySchemaProvider, SchemaProviderRef};
use basalt_common::types::TypeContext;
use basalt_plan::{build_dag, explain, RelAlgNode};

fn test_schema() -> SchemaProviderRef {
    let ctx = TypeContext::global();
    let schema = MemorySchemaProvider::new();
    schema.add_table(
        1,
        "t",
        vec![
            ("a".to_owned(), ctx.int32(true)),
            ("b".to_owned(), ctx.int64(true)),
            ("c".to_owned(), ctx.fp64(true)),
        ],
    );
    schema.add_table(
        1,
        "t2",
        vec![
            ("k".to_owned(), ctx.int32(true)),
            ("v".to_owned(), ctx.text(true)),
        ],
    );
    Arc::new(schema)
}

const FILTER_AGG_PLAN: &str = r#"{
  "rels": [
    {"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t"], "fieldNames": ["a", "b", "c"]},
    {"id": "1", "relOp": "LogicalFilter", "condition":
      {"op": ">", "operands": [
        {"input": 0},
        {"literal": 0, "type": "DECIMAL", "target_type": "INTEGER",
         "scale": 0, "precision": 1, "type_scale": 0, "type_precision": 10}],
       "type": {"type": "BOOLEAN", "nullable": true}}},
    {"id": "2", "relOp": "LogicalProject", "fields": ["a"], "exprs": [{"input": 0}]},
    {"id": "3", "relOp": "LogicalAggregate", "fields": ["a", "cnt"], "group": [0],
     "aggs": [{"agg": "COUNT", "distinct": false, "operands": [],
               "type": {"type": "BIGINT", "nullable": false}}]}
  ]
}"#;

#[test]
fn builds_filter_aggregate_plan() {
    let schema = test_schema();
    let dag = build_dag(FILTER_AGG_PLAN, 1, &schema, &Config::default()).unwrap();
    let agg = dag.root.as_aggregate().expect("root is the aggregate");
    assert_eq!(agg.group_by_count, 1);
    assert_eq!(agg.aggs.len(), 1);
    assert_eq!(dag.root.size(), 2);
    let types = dag.root.output_types();
    assert!(types[0].is_integer());
    assert_eq!(types[1].size(), 8);
}

#[test]
fn explain_snapshot() {
    let schema = test_schema();
    let dag = build_dag(FILTER_AGG_PLAN, 1, &schema, &Config::default()).unwrap();
    let rendered = explain(&dag.root)
        // node ids are global and run-dependent; strip them for the snapshot
        .split('$')
        .map(|part| {
            let trimmed: String = part
                .chars()
                .skip_while(|c| c.is_ascii_digit())
                .collect();
            trimmed
        })
        .collect::<String>();
    expect![[r#"
        Aggregate groups=1 aggs=[count(*)]
          Project exprs=[.0]
            Filter condition=(.0 GT 0)
              Scan table=t
    "#]]
    .assert_eq(&rendered);
}

#[test]
fn unknown_rel_op_is_not_supported() {
    let schema = test_schema();
    let err = build_dag(
        r#"{"rels": [{"id": "0", "relOp": "LogicalExchange"}]}"#,
        1,
        &schema,
        &Config::default(),
    )
    .unwrap_err();
    assert!(matches!(err, basalt_plan::PlanError::NotSupported(_)));
}

#[test]
fn filter_chains_fold() {
    let schema = test_schema();
    let plan = r#"{
      "rels": [
        {"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t"], "fieldNames": ["a", "b", "c"]},
        {"id": "1", "relOp": "LogicalFilter", "condition":
          {"op": ">", "operands": [
            {"input": 0},
            {"literal": 0, "type": "DECIMAL", "target_type": "INTEGER",
             "scale": 0, "precision": 1, "type_scale": 0, "type_precision": 10}],
           "type": {"type": "BOOLEAN", "nullable": true}}},
        {"id": "2", "relOp": "LogicalFilter", "condition":
          {"op": "<", "operands": [
            {"input": 1},
            {"literal": 100, "type": "DECIMAL", "target_type": "BIGINT",
             "scale": 0, "precision": 3, "type_scale": 0, "type_precision": 19}],
           "type": {"type": "BOOLEAN", "nullable": true}}},
        {"id": "3", "relOp": "LogicalProject", "fields": ["a"], "exprs": [{"input": 0}]}
      ]
    }"#;
    let dag = build_dag(plan, 1, &schema, &Config::default()).unwrap();
    let filters = dag
        .nodes
        .iter()
        .filter(|n| matches!(n.as_ref(), RelAlgNode::Filter(_)))
        .count();
    assert_eq!(filters, 1, "filter chain should fold into one node");
}

#[test]
fn join_gets_a_projection_inserted() {
    let schema = test_schema();
    let plan = r#"{
      "rels": [
        {"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t"], "fieldNames": ["a", "b", "c"]},
        {"id": "1", "relOp": "LogicalTableScan", "table": ["db", "t2"], "fieldNames": ["k", "v"]},
        {"id": "2", "relOp": "LogicalJoin", "joinType": "inner", "inputs": ["0", "1"],
         "condition": {"op": "=", "operands": [{"input": 0}, {"input": 3}],
                       "type": {"type": "BOOLEAN", "nullable": true}}},
        {"id": "3", "relOp": "LogicalSort", "collation": [{"field": 0, "direction": "ASCENDING", "nulls": "LAST"}]}
      ]
    }"#;
    let dag = build_dag(plan, 1, &schema, &Config::default()).unwrap();
    // The join is consumed by a sort, so the pipeline inserts a projection
    // of all join columns between them.
    let sort = dag.root.as_sort().expect("root is the sort");
    assert!(matches!(sort.input.as_ref(), RelAlgNode::Project(_)));
}

#[test]
fn dead_columns_are_pruned() {
    let schema = test_schema();
    let plan = r#"{
      "rels": [
        {"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t"], "fieldNames": ["a", "b", "c"]},
        {"id": "1", "relOp": "LogicalProject", "fields": ["a", "b", "c"],
         "exprs": [{"input": 0}, {"input": 1}, {"input": 2}]},
        {"id": "2", "relOp": "LogicalProject", "fields": ["b"], "exprs": [{"input": 1}]}
      ]
    }"#;
    let dag = build_dag(plan, 1, &schema, &Config::default()).unwrap();
    // The intermediate projection either narrows to the single live column
    // or is eliminated outright as an identity copy.
    let project = dag.root.as_project().expect("root projection");
    assert_eq!(project.exprs.len(), 1);
    for node in &dag.nodes {
        if node.id() != dag.root.id() {
            if let RelAlgNode::Project(p) = node.as_ref() {
                assert!(p.exprs.len() <= 2, "inner projection was not narrowed");
            }
        }
    }
}

#[test]
fn window_functions_are_separated() {
    let schema = test_schema();
    let plan = r#"{
      "rels": [
        {"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t"], "fieldNames": ["a", "b", "c"]},
        {"id": "1", "relOp": "LogicalProject", "fields": ["r"],
         "exprs": [
           {"op": "+", "operands": [
              {"op": "ROW_NUMBER", "operands": [], "partition_keys": [{"input": 0}],
               "order_keys": [{"field": {"input": 1}, "direction": "ASCENDING", "nulls": "LAST"}],
               "type": {"type": "BIGINT", "nullable": false}},
              {"literal": 1, "type": "DECIMAL", "target_type": "BIGINT",
               "scale": 0, "precision": 1, "type_scale": 0, "type_precision": 19}],
            "type": {"type": "BIGINT", "nullable": false}}]}
      ]
    }"#;
    let dag = build_dag(plan, 1, &schema, &Config::default()).unwrap();
    let upper = dag.root.as_project().expect("upper projection");
    let lower = upper.input.as_project().expect("lower projection");
    // The lower projection computes the window function standalone.
    assert!(lower
        .exprs
        .iter()
        .any(|e| e.as_window().is_some()));
    // The upper expression reads it back through a column reference.
    assert!(upper.exprs[0].as_window().is_none());
}
