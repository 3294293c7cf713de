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

//! Expression rewriting.
//!
//! By default, `ExprRewriter` traverses the tree and rebuilds nodes whose
//! children changed, leaving everything else shared. Implementations
//! override a subset of methods to transform particular node kinds.
//! [`rewrite_memoized`] caches results by node identity so shared subtrees
//! are rewritten once.

use std::collections::HashMap;
use std::sync::Arc;

use crate::expr::*;

pub trait ExprRewriter {
    fn rewrite_expr(&mut self, expr: &ExprRef) -> ExprRef {
        match expr.as_ref() {
            Expr::Constant(_)
            | Expr::ColumnVar(_)
            | Expr::Var(_)
            | Expr::ScalarSubquery(_)
            | Expr::OffsetInFragment(_) => expr.clone(),
            Expr::ColumnRef(c) => self.rewrite_column_ref(expr, c),
            Expr::UOper(u) => {
                let operand = self.rewrite_expr(&u.operand);
                if Arc::ptr_eq(&operand, &u.operand) {
                    expr.clone()
                } else {
                    UOper { operand, ..u.clone() }.into()
                }
            }
            Expr::BinOper(b) => {
                let lhs = self.rewrite_expr(&b.lhs);
                let rhs = self.rewrite_expr(&b.rhs);
                if Arc::ptr_eq(&lhs, &b.lhs) && Arc::ptr_eq(&rhs, &b.rhs) {
                    expr.clone()
                } else {
                    BinOper {
                        lhs,
                        rhs,
                        ..b.clone()
                    }
                    .into()
                }
            }
            Expr::Case(c) => {
                let when_then: Vec<_> = c
                    .when_then
                    .iter()
                    .map(|(w, t)| (self.rewrite_expr(w), self.rewrite_expr(t)))
                    .collect();
                let else_expr = self.rewrite_expr(&c.else_expr);
                CaseExpr {
                    ty: c.ty,
                    when_then,
                    else_expr,
                }
                .into()
            }
            Expr::InValues(e) => InValues {
                arg: self.rewrite_expr(&e.arg),
                values: e.values.iter().map(|v| self.rewrite_expr(v)).collect(),
            }
            .into(),
            Expr::InIntegerSet(e) => InIntegerSet {
                arg: self.rewrite_expr(&e.arg),
                values: e.values.clone(),
            }
            .into(),
            Expr::InSubquery(s) => InSubquery {
                arg: self.rewrite_expr(&s.arg),
                node: s.node,
            }
            .into(),
            Expr::Agg(a) => AggExpr {
                ty: a.ty,
                kind: a.kind,
                arg: a.arg.as_ref().map(|arg| self.rewrite_expr(arg)),
                is_distinct: a.is_distinct,
                arg1: a.arg1.clone(),
            }
            .into(),
            Expr::Window(w) => self.rewrite_window(w),
            Expr::FunctionOper(f) => FunctionOper {
                ty: f.ty,
                name: f.name.clone(),
                args: f.args.iter().map(|a| self.rewrite_expr(a)).collect(),
                custom_type_handling: f.custom_type_handling,
            }
            .into(),
            Expr::Like(l) => LikeExpr {
                arg: self.rewrite_expr(&l.arg),
                pattern: self.rewrite_expr(&l.pattern),
                escape: l.escape.as_ref().map(|e| self.rewrite_expr(e)),
                is_ilike: l.is_ilike,
                is_simple: l.is_simple,
            }
            .into(),
            Expr::Regexp(r) => RegexpExpr {
                arg: self.rewrite_expr(&r.arg),
                pattern: self.rewrite_expr(&r.pattern),
                escape: r.escape.as_ref().map(|e| self.rewrite_expr(e)),
            }
            .into(),
            Expr::CharLength(c) => CharLengthExpr {
                arg: self.rewrite_expr(&c.arg),
                calc_encoded_length: c.calc_encoded_length,
            }
            .into(),
            Expr::KeyForString(k) => KeyForStringExpr {
                arg: self.rewrite_expr(&k.arg),
            }
            .into(),
            Expr::Lower(l) => LowerExpr {
                arg: self.rewrite_expr(&l.arg),
            }
            .into(),
            Expr::Cardinality(c) => CardinalityExpr {
                arg: self.rewrite_expr(&c.arg),
            }
            .into(),
            Expr::WidthBucket(w) => WidthBucketExpr {
                target: self.rewrite_expr(&w.target),
                lower: self.rewrite_expr(&w.lower),
                upper: self.rewrite_expr(&w.upper),
                partition_count: self.rewrite_expr(&w.partition_count),
            }
            .into(),
            Expr::Extract(e) => ExtractExpr {
                field: e.field,
                from: self.rewrite_expr(&e.from),
            }
            .into(),
            Expr::DateAdd(d) => DateAddExpr {
                ty: d.ty,
                field: d.field,
                number: self.rewrite_expr(&d.number),
                datetime: self.rewrite_expr(&d.datetime),
            }
            .into(),
            Expr::DateDiff(d) => DateDiffExpr {
                field: d.field,
                start: self.rewrite_expr(&d.start),
                end: self.rewrite_expr(&d.end),
            }
            .into(),
            Expr::DateTrunc(d) => DateTruncExpr {
                ty: d.ty,
                field: d.field,
                from: self.rewrite_expr(&d.from),
            }
            .into(),
            Expr::SampleRatio(s) => SampleRatioExpr {
                arg: self.rewrite_expr(&s.arg),
            }
            .into(),
            Expr::Likelihood(l) => LikelihoodExpr {
                arg: self.rewrite_expr(&l.arg),
                likelihood: l.likelihood,
            }
            .into(),
            Expr::MakeArray(a) => ArrayExpr {
                ty: a.ty,
                elements: a.elements.iter().map(|e| self.rewrite_expr(e)).collect(),
                is_null: a.is_null,
            }
            .into(),
        }
    }

    fn rewrite_column_ref(&mut self, expr: &ExprRef, _col_ref: &ColumnRef) -> ExprRef {
        expr.clone()
    }

    fn rewrite_window(&mut self, w: &WindowFunction) -> ExprRef {
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
}

/// Rewrites `expr`, caching results by node identity so shared subtrees are
/// processed once and sharing is preserved in the output.
pub fn rewrite_memoized(
    rewriter: &mut dyn ExprRewriter,
    memo: &mut HashMap<*const Expr, ExprRef>,
    expr: &ExprRef,
) -> ExprRef {
    let key = Arc::as_ptr(expr);
    if let Some(cached) = memo.get(&key) {
        return cached.clone();
    }
    let rewritten = rewriter.rewrite_expr(expr);
    memo.insert(key, rewritten.clone());
    rewritten
}

/// Replaces every [`ColumnRef`] according to `mapping`; entries absent from
/// the mapping are kept.
pub struct ColumnRefRewriter<'a> {
    pub mapping: &'a dyn Fn(&ColumnRef) -> Option<ExprRef>,
}

impl ExprRewriter for ColumnRefRewriter<'_> {
    fn rewrite_column_ref(&mut self, expr: &ExprRef, col_ref: &ColumnRef) -> ExprRef {
        (self.mapping)(col_ref).unwrap_or_else(|| expr.clone())
    }
}

#[cfg(test)]
mod tests {
    use basalt_common::types::TypeContext;

    use super::*;
    use crate::ops::{OpType, Qualifier};

    #[test]
    fn untouched_trees_stay_shared() {
        let ctx = TypeContext::global();
        let leaf: ExprRef = Constant::int64(7).into();
        let tree: ExprRef = BinOper {
            ty: ctx.int64(false),
            op: OpType::Plus,
            qualifier: Qualifier::One,
            lhs: leaf.clone(),
            rhs: leaf,
        }
        .into();
        struct Noop;
        impl ExprRewriter for Noop {}
        let rewritten = Noop.rewrite_expr(&tree);
        assert!(Arc::ptr_eq(&rewritten, &tree));
    }

    #[test]
    fn column_refs_are_replaced() {
        let ctx = TypeContext::global();
        let col: ExprRef = ColumnRef {
            ty: ctx.int64(false),
            node: 1,
            index: 0,
        }
        .into();
        let replacement: ExprRef = Constant::int64(9).into();
        let mapping = |c: &ColumnRef| {
            (c.index == 0).then(|| replacement.clone())
        };
        let mut rewriter = ColumnRefRewriter { mapping: &mapping };
        let out = rewriter.rewrite_expr(&col);
        assert!(matches!(out.as_ref(), Expr::Constant(c) if c.value.as_int() == Some(9)));
    }
}
