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

//! End-to-end scenarios: JSON plan in, rewritten DAG, compiled module,
//! interpreted kernel, materialized rows out.

use std::sync::Arc;

use basalt_codegen::error::CodegenError;
use basalt_codegen::exec::FragmentSet;
use basalt_codegen::{execute_dag, CompilationOptions};
use basalt_common::config::Config;
use basalt_common::datum::Datum;
use basalt_common::dictionary::{
    DictionaryProviderRef, MemoryDictionary, MemoryDictionaryProvider,
};
use basalt_common::error::{ERR_DIV_BY_ZERO, ERR_INTERRUPTED, ERR_OVERFLOW_OR_UNDERFLOW};
use basalt_common::schema::{MemorySchemaProvider, SchemaProviderRef};
use basalt_common::types::TypeContext;
use basalt_plan::{build_dag, RelAlgNode};

struct Harness {
    schema: SchemaProviderRef,
    dicts: DictionaryProviderRef,
    config: Config,
}

impl Harness {
    fn new() -> Harness {
        let ctx = TypeContext::global();
        let schema = MemorySchemaProvider::new();
        schema.add_table(
            1,
            "t",
            vec![
                ("a".to_owned(), ctx.int64(true)),
                ("b".to_owned(), ctx.int64(true)),
                ("f".to_owned(), ctx.fp64(true)),
            ],
        );
        schema.add_table(1, "t1", vec![("k".to_owned(), ctx.int64(true))]);
        schema.add_table(1, "t2", vec![("k".to_owned(), ctx.int64(true))]);
        let dict = Arc::new(MemoryDictionary::new(1));
        schema.add_table(
            1,
            "ts",
            vec![("s".to_owned(), ctx.ext_dict(ctx.text(true), 1, 4))],
        );
        let dicts = MemoryDictionaryProvider::new();
        dicts.add(dict);
        Harness {
            schema: Arc::new(schema),
            dicts: Arc::new(dicts),
            config: Config::default(),
        }
    }

    fn run(&self, plan: &str, fragments: &FragmentSet) -> Vec<Vec<Datum>> {
        self.try_run(plan, fragments).expect("query executes")
    }

    fn try_run(
        &self,
        plan: &str,
        fragments: &FragmentSet,
    ) -> Result<Vec<Vec<Datum>>, CodegenError> {
        let dag = build_dag(plan, 1, &self.schema, &self.config)?;
        execute_dag(
            &dag,
            &self.config,
            CompilationOptions::cpu(),
            Some(self.dicts.clone()),
            fragments,
        )
    }

    /// The scan node id of `table` in a freshly built dag for `plan`.
    fn scan_id(&self, plan: &str, table: &str) -> (basalt_plan::builder::QueryDag, u64) {
        let dag = build_dag(plan, 1, &self.schema, &self.config).expect("plan builds");
        let id = dag
            .nodes
            .iter()
            .find_map(|n| match n.as_ref() {
                RelAlgNode::Scan(s) if s.table.name == table => Some(n.id()),
                _ => None,
            })
            .expect("scan exists");
        (dag, id)
    }
}

fn int_literal(v: i64) -> String {
    format!(
        r#"{{"literal": {v}, "type": "DECIMAL", "target_type": "BIGINT",
            "scale": 0, "precision": 19, "type_scale": 0, "type_precision": 19}}"#
    )
}

const FILTER_AGG_PLAN_TEMPLATE: &str = r#"{
  "rels": [
    {"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t"], "fieldNames": ["a", "b", "f"]},
    {"id": "1", "relOp": "LogicalFilter", "condition":
      {"op": ">", "operands": [{"input": 0}, LIT0],
       "type": {"type": "BOOLEAN", "nullable": true}}},
    {"id": "2", "relOp": "LogicalAggregate", "fields": ["cnt", "s", "avg"], "group": [],
     "aggs": [
       {"agg": "COUNT", "distinct": false, "operands": [], "type": {"type": "BIGINT", "nullable": false}},
       {"agg": "SUM", "distinct": false, "operands": [0], "type": {"type": "BIGINT", "nullable": true}},
       {"agg": "AVG", "distinct": false, "operands": [0], "type": {"type": "DOUBLE", "nullable": true}}]}
  ]
}"#;

#[test]
fn count_sum_avg_with_filter() {
    let h = Harness::new();
    let plan = FILTER_AGG_PLAN_TEMPLATE.replace("LIT0", &int_literal(0));
    let (dag, scan) = h.scan_id(&plan, "t");
    let ctx = TypeContext::global();
    let mut frags = FragmentSet::new();
    frags.add_int_column(
        scan,
        0,
        ctx.int64(true),
        &[None, Some(1), Some(2), Some(3)],
    );
    let rows = execute_dag(
        &dag,
        &h.config,
        CompilationOptions::cpu(),
        Some(h.dicts.clone()),
        &frags,
    )
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Datum::Int(3));
    assert_eq!(rows[0][1], Datum::Int(6));
    assert_eq!(rows[0][2], Datum::Fp(2.0));
}

#[test]
fn aggregates_over_empty_input() {
    let h = Harness::new();
    let plan = FILTER_AGG_PLAN_TEMPLATE.replace("LIT0", &int_literal(0));
    let (dag, scan) = h.scan_id(&plan, "t");
    let ctx = TypeContext::global();
    let mut frags = FragmentSet::new();
    frags.add_int_column(scan, 0, ctx.int64(true), &[]);
    let rows = execute_dag(
        &dag,
        &h.config,
        CompilationOptions::cpu(),
        Some(h.dicts.clone()),
        &frags,
    )
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Datum::Int(0));
    assert_eq!(rows[0][1], Datum::Null);
    assert_eq!(rows[0][2], Datum::Null);
}

const GROUP_BY_PLAN: &str = r#"{
  "rels": [
    {"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t"], "fieldNames": ["a", "b", "f"]},
    {"id": "1", "relOp": "LogicalProject", "fields": ["a"], "exprs": [{"input": 0}]},
    {"id": "2", "relOp": "LogicalAggregate", "fields": ["a", "cnt"], "group": [0],
     "aggs": [{"agg": "COUNT", "distinct": false, "operands": [],
               "type": {"type": "BIGINT", "nullable": false}}]}
  ]
}"#;

#[test]
fn group_by_counts() {
    let h = Harness::new();
    let (dag, scan) = h.scan_id(GROUP_BY_PLAN, "t");
    let ctx = TypeContext::global();
    let mut frags = FragmentSet::new();
    frags.add_int_column(scan, 0, ctx.int64(true), &[Some(1), Some(1), Some(2)]);
    let mut rows = execute_dag(
        &dag,
        &h.config,
        CompilationOptions::cpu(),
        Some(h.dicts.clone()),
        &frags,
    )
    .unwrap();
    rows.sort_by_key(|r| r[0].as_int());
    assert_eq!(
        rows,
        vec![
            vec![Datum::Int(1), Datum::Int(2)],
            vec![Datum::Int(2), Datum::Int(1)],
        ]
    );
}

const JOIN_PLAN: &str = r#"{
  "rels": [
    {"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t1"], "fieldNames": ["k"]},
    {"id": "1", "relOp": "LogicalTableScan", "table": ["db", "t2"], "fieldNames": ["k"]},
    {"id": "2", "relOp": "LogicalJoin", "joinType": "inner", "inputs": ["0", "1"],
     "condition": {"op": "=", "operands": [{"input": 0}, {"input": 1}],
                   "type": {"type": "BOOLEAN", "nullable": true}}},
    {"id": "3", "relOp": "LogicalProject", "fields": ["k"], "exprs": [{"input": 0}]}
  ]
}"#;

#[test]
fn hash_join_one_to_many() {
    let h = Harness::new();
    let (dag, t1) = h.scan_id(JOIN_PLAN, "t1");
    let t2 = dag
        .nodes
        .iter()
        .find_map(|n| match n.as_ref() {
            RelAlgNode::Scan(s) if s.table.name == "t2" => Some(n.id()),
            _ => None,
        })
        .unwrap();
    let ctx = TypeContext::global();
    let mut frags = FragmentSet::new();
    frags.add_int_column(t1, 0, ctx.int64(true), &[Some(1), Some(2), Some(3)]);
    frags.add_int_column(t2, 0, ctx.int64(true), &[Some(2), Some(2), Some(4)]);
    let rows = execute_dag(
        &dag,
        &h.config,
        CompilationOptions::cpu(),
        Some(h.dicts.clone()),
        &frags,
    )
    .unwrap();
    let mut keys: Vec<i64> = rows.iter().map(|r| r[0].as_int().unwrap()).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec![2, 2]);
}

#[test]
fn timestamp_literal_cast() {
    let h = Harness::new();
    // the "hijacked cast" path: a string literal cast to TIMESTAMP(6)
    let plan = r#"{
      "rels": [
        {"id": "0", "relOp": "LogicalValues",
         "type": [{"name": "x", "type": "BIGINT", "nullable": false}],
         "inputs": [], "tuples": [[
            {"literal": 0, "type": "DECIMAL", "target_type": "BIGINT",
             "scale": 0, "precision": 1, "type_scale": 0, "type_precision": 19}]]},
        {"id": "1", "relOp": "LogicalProject", "fields": ["ts"],
         "exprs": [{"op": "CAST",
                    "operands": [{"literal": "2020-01-01", "type": "VARCHAR", "target_type": "VARCHAR",
                                  "scale": 0, "precision": 0, "type_scale": 0, "type_precision": 0}],
                    "type": {"type": "TIMESTAMP", "precision": 6, "nullable": false}}]}
      ]
    }"#;
    let rows = h.run(plan, &FragmentSet::new());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Datum::Int(1_577_836_800_000_000));
}

#[test]
fn row_number_over_order_by() {
    let h = Harness::new();
    let plan = r#"{
      "rels": [
        {"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t"], "fieldNames": ["a", "b", "f"]},
        {"id": "1", "relOp": "LogicalProject", "fields": ["rn"],
         "exprs": [{"op": "ROW_NUMBER", "operands": [], "partition_keys": [],
                    "order_keys": [{"field": {"input": 0}, "direction": "ASCENDING", "nulls": "LAST"}],
                    "type": {"type": "BIGINT", "nullable": false}}]}
      ]
    }"#;
    let (dag, scan) = h.scan_id(plan, "t");
    let ctx = TypeContext::global();
    let mut frags = FragmentSet::new();
    frags.add_int_column(scan, 0, ctx.int64(true), &[Some(5), Some(3), Some(7)]);
    let rows = execute_dag(
        &dag,
        &h.config,
        CompilationOptions::cpu(),
        Some(h.dicts.clone()),
        &frags,
    )
    .unwrap();
    let ranks: Vec<i64> = rows.iter().map(|r| r[0].as_int().unwrap()).collect();
    // a=5 ranks 2nd, a=3 ranks 1st, a=7 ranks 3rd
    assert_eq!(ranks, vec![2, 1, 3]);
}

fn division_plan() -> String {
    format!(
        r#"{{
      "rels": [
        {{"id": "0", "relOp": "LogicalValues",
         "type": [{{"name": "x", "type": "BIGINT", "nullable": false}}],
         "inputs": [], "tuples": [[{lit}]]}},
        {{"id": "1", "relOp": "LogicalProject", "fields": ["q"],
         "exprs": [{{"op": "/", "operands": [{one}, {zero}],
                    "type": {{"type": "BIGINT", "nullable": true}}}}]}}
      ]
    }}"#,
        lit = int_literal(0),
        one = int_literal(1),
        zero = int_literal(0),
    )
}

#[test]
fn division_by_zero_errors_by_default() {
    let h = Harness::new();
    let err = h.try_run(&division_plan(), &FragmentSet::new()).unwrap_err();
    match err {
        CodegenError::Runtime { code, .. } => assert_eq!(code, ERR_DIV_BY_ZERO),
        other => panic!("expected a runtime error, got {other}"),
    }
}

#[test]
fn division_by_zero_yields_null_when_configured() {
    let mut h = Harness::new();
    h.config.exec.codegen.null_div_by_zero = true;
    let rows = h.run(&division_plan(), &FragmentSet::new());
    assert_eq!(rows[0][0], Datum::Null);
}

fn arith_probe_plan(op: &str, rhs: i64) -> String {
    format!(
        r#"{{
      "rels": [
        {{"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t"], "fieldNames": ["a", "b", "f"]}},
        {{"id": "1", "relOp": "LogicalProject", "fields": ["v"],
         "exprs": [{{"op": "{op}", "operands": [{{"input": 0}}, {rhs}],
                    "type": {{"type": "BIGINT", "nullable": true}}}}]}}
      ]
    }}"#,
        rhs = int_literal(rhs),
    )
}

#[test]
fn overflow_guards_fire_on_cpu_and_gpu() {
    let h = Harness::new();
    let ctx = TypeContext::global();
    let cases: Vec<(String, i64)> = vec![
        (arith_probe_plan("+", 1), i64::MAX),
        (arith_probe_plan("-", 1), i64::MIN),
        (arith_probe_plan("*", -1), i64::MIN),
        (arith_probe_plan("*", 2), i64::MAX),
    ];
    for co in [CompilationOptions::cpu(), CompilationOptions::gpu()] {
        for (plan, input) in &cases {
            let (dag, scan) = h.scan_id(plan, "t");
            let mut frags = FragmentSet::new();
            frags.add_int_column(scan, 0, ctx.int64(true), &[Some(*input)]);
            let err = execute_dag(&dag, &h.config, co, Some(h.dicts.clone()), &frags)
                .unwrap_err();
            match err {
                CodegenError::Runtime { code, .. } => {
                    assert_eq!(code, ERR_OVERFLOW_OR_UNDERFLOW, "plan {plan} input {input}")
                }
                other => panic!("expected overflow, got {other}"),
            }
        }
    }
}

#[test]
fn null_propagates_through_arithmetic() {
    let h = Harness::new();
    let plan = r#"{
      "rels": [
        {"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t"], "fieldNames": ["a", "b", "f"]},
        {"id": "1", "relOp": "LogicalProject", "fields": ["v"],
         "exprs": [{"op": "+", "operands": [{"input": 0}, {"input": 1}],
                    "type": {"type": "BIGINT", "nullable": true}}]}
      ]
    }"#;
    let (dag, scan) = h.scan_id(plan, "t");
    let ctx = TypeContext::global();
    let mut frags = FragmentSet::new();
    frags.add_int_column(scan, 0, ctx.int64(true), &[Some(1), None]);
    frags.add_int_column(scan, 1, ctx.int64(true), &[None, Some(2)]);
    let rows = execute_dag(
        &dag,
        &h.config,
        CompilationOptions::cpu(),
        Some(h.dicts.clone()),
        &frags,
    )
    .unwrap();
    assert_eq!(rows, vec![vec![Datum::Null], vec![Datum::Null]]);
}

#[test]
fn bw_eq_matches_nulls() {
    let h = Harness::new();
    let plan = r#"{
      "rels": [
        {"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t"], "fieldNames": ["a", "b", "f"]},
        {"id": "1", "relOp": "LogicalProject", "fields": ["v"],
         "exprs": [{"op": "IS NOT DISTINCT FROM", "operands": [{"input": 0}, {"input": 1}],
                    "type": {"type": "BOOLEAN", "nullable": false}}]}
      ]
    }"#;
    let (dag, scan) = h.scan_id(plan, "t");
    let ctx = TypeContext::global();
    let mut frags = FragmentSet::new();
    frags.add_int_column(scan, 0, ctx.int64(true), &[None, None, Some(0)]);
    frags.add_int_column(scan, 1, ctx.int64(true), &[None, Some(0), Some(0)]);
    let rows = execute_dag(
        &dag,
        &h.config,
        CompilationOptions::cpu(),
        Some(h.dicts.clone()),
        &frags,
    )
    .unwrap();
    let bools: Vec<bool> = rows.iter().map(|r| r[0].as_bool().unwrap()).collect();
    assert_eq!(bools, vec![true, false, true]);
}

#[test]
fn long_in_list_matches_chained_or() {
    let h = Harness::new();
    let values: Vec<String> = (0..40).map(|v| int_literal(v * 3)).collect();
    let plan = format!(
        r#"{{
      "rels": [
        {{"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t"], "fieldNames": ["a", "b", "f"]}},
        {{"id": "1", "relOp": "LogicalProject", "fields": ["v"],
         "exprs": [{{"op": "IN", "operands": [{{"input": 0}}, {}],
                    "type": {{"type": "BOOLEAN", "nullable": true}}}}]}}
      ]
    }}"#,
        values.join(", ")
    );
    let (dag, scan) = h.scan_id(&plan, "t");
    let ctx = TypeContext::global();
    let inputs: Vec<Option<i64>> = (0..150).map(Some).collect();
    let mut frags = FragmentSet::new();
    frags.add_int_column(scan, 0, ctx.int64(true), &inputs);
    let rows = execute_dag(
        &dag,
        &h.config,
        CompilationOptions::cpu(),
        Some(h.dicts.clone()),
        &frags,
    )
    .unwrap();
    for (i, row) in rows.iter().enumerate() {
        let expected = i % 3 == 0 && i < 120;
        assert_eq!(row[0].as_bool(), Some(expected), "value {i}");
    }
}

#[test]
fn group_by_dictionary_column() {
    let h = Harness::new();
    let plan = r#"{
      "rels": [
        {"id": "0", "relOp": "LogicalTableScan", "table": ["db", "ts"], "fieldNames": ["s"]},
        {"id": "1", "relOp": "LogicalAggregate", "fields": ["s", "cnt"], "group": [0],
         "aggs": [{"agg": "COUNT", "distinct": false, "operands": [],
                   "type": {"type": "BIGINT", "nullable": false}}]}
      ]
    }"#;
    let (dag, scan) = h.scan_id(plan, "ts");
    let dict = h.dicts.dictionary(1).unwrap();
    let ids: Vec<Option<i64>> = ["a", "b", "a"]
        .iter()
        .map(|s| Some(dict.get_or_add(s) as i64))
        .collect();
    let ctx = TypeContext::global();
    let mut frags = FragmentSet::new();
    frags.add_int_column(scan, 0, ctx.ext_dict(ctx.text(true), 1, 4), &ids);
    let mut rows = execute_dag(
        &dag,
        &h.config,
        CompilationOptions::cpu(),
        Some(h.dicts.clone()),
        &frags,
    )
    .unwrap();
    rows.sort_by_key(|r| r[0].as_str().map(str::to_owned));
    assert_eq!(
        rows,
        vec![
            vec![Datum::Str("a".into()), Datum::Int(2)],
            vec![Datum::Str("b".into()), Datum::Int(1)],
        ]
    );
}

#[test]
fn interrupt_surfaces_from_the_kernel() {
    let h = Harness::new();
    let (dag, scan) = h.scan_id(GROUP_BY_PLAN, "t");
    let ctx = TypeContext::global();
    let mut frags = FragmentSet::new();
    frags.add_int_column(scan, 0, ctx.int64(true), &[Some(1)]);
    basalt_codegen::runtime::set_interrupted(true);
    let result = execute_dag(
        &dag,
        &h.config,
        CompilationOptions::cpu(),
        Some(h.dicts.clone()),
        &frags,
    );
    basalt_codegen::runtime::set_interrupted(false);
    match result.unwrap_err() {
        CodegenError::Runtime { code, .. } => assert_eq!(code, ERR_INTERRUPTED),
        other => panic!("expected interrupt, got {other}"),
    }
}

#[test]
fn approx_count_distinct_stays_within_bound() {
    let h = Harness::new();
    let plan = r#"{
      "rels": [
        {"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t"], "fieldNames": ["a", "b", "f"]},
        {"id": "1", "relOp": "LogicalAggregate", "fields": ["d"], "group": [],
         "aggs": [{"agg": "APPROX_COUNT_DISTINCT", "distinct": false, "operands": [0],
                   "type": {"type": "BIGINT", "nullable": false}}]}
      ]
    }"#;
    let (dag, scan) = h.scan_id(plan, "t");
    let ctx = TypeContext::global();
    let n = 100_000i64;
    let inputs: Vec<Option<i64>> = (0..n).map(Some).collect();
    let mut frags = FragmentSet::new();
    frags.add_int_column(scan, 0, ctx.int64(true), &inputs);
    let rows = execute_dag(
        &dag,
        &h.config,
        CompilationOptions::cpu(),
        Some(h.dicts.clone()),
        &frags,
    )
    .unwrap();
    let estimate = rows[0][0].as_int().unwrap() as f64;
    let error = (estimate - n as f64).abs() / n as f64;
    assert!(error < 0.05, "estimate {estimate} off by {error}");
}

#[test]
fn sort_limit_offset_apply() {
    let h = Harness::new();
    let plan = r#"{
      "rels": [
        {"id": "0", "relOp": "LogicalTableScan", "table": ["db", "t"], "fieldNames": ["a", "b", "f"]},
        {"id": "1", "relOp": "LogicalProject", "fields": ["a"], "exprs": [{"input": 0}]},
        {"id": "2", "relOp": "LogicalSort",
         "collation": [{"field": 0, "direction": "DESCENDING", "nulls": "LAST"}],
         "fetch": {"literal": 2, "type": "DECIMAL", "target_type": "BIGINT",
                   "scale": 0, "precision": 1, "type_scale": 0, "type_precision": 19},
         "offset": {"literal": 1, "type": "DECIMAL", "target_type": "BIGINT",
                    "scale": 0, "precision": 1, "type_scale": 0, "type_precision": 19}}
      ]
    }"#;
    let (dag, scan) = h.scan_id(plan, "t");
    let ctx = TypeContext::global();
    let mut frags = FragmentSet::new();
    frags.add_int_column(
        scan,
        0,
        ctx.int64(true),
        &[Some(10), Some(40), Some(20), Some(30)],
    );
    let rows = execute_dag(
        &dag,
        &h.config,
        CompilationOptions::cpu(),
        Some(h.dicts.clone()),
        &frags,
    )
    .unwrap();
    let got: Vec<i64> = rows.iter().map(|r| r[0].as_int().unwrap()).collect();
    assert_eq!(got, vec![30, 20]);
}
