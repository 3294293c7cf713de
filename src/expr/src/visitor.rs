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

//! Generic expression visitor.
//!
//! By default every method traverses the children and folds their results
//! through [`ExprVisitor::aggregate_result`]. Implementations override the
//! node kinds they care about.

use crate::expr::*;

pub trait ExprVisitor {
    type Output: Default;

    fn visit(&mut self, expr: &ExprRef) -> Self::Output {
        match expr.as_ref() {
            Expr::Constant(c) => self.visit_constant(c),
            Expr::ColumnVar(c) => self.visit_column_var(c),
            Expr::ColumnRef(c) => self.visit_column_ref(c),
            Expr::Var(v) => self.visit_var(v),
            Expr::UOper(u) => self.visit_uoper(u),
            Expr::BinOper(b) => self.visit_bin_oper(b),
            Expr::Case(c) => self.visit_case(c),
            Expr::InValues(e) => self.visit_in_values(e),
            Expr::InIntegerSet(e) => self.visit_in_integer_set(e),
            Expr::ScalarSubquery(s) => self.visit_scalar_subquery(s),
            Expr::InSubquery(s) => self.visit_in_subquery(s),
            Expr::Agg(a) => self.visit_agg(a),
            Expr::Window(w) => self.visit_window(w),
            Expr::FunctionOper(f) => self.visit_function_oper(f),
            Expr::Like(l) => self.visit_like(l),
            Expr::Regexp(r) => self.visit_regexp(r),
            Expr::CharLength(c) => self.visit_char_length(c),
            Expr::KeyForString(k) => self.visit_key_for_string(k),
            Expr::Lower(l) => self.visit_lower(l),
            Expr::Cardinality(c) => self.visit_cardinality(c),
            Expr::WidthBucket(w) => self.visit_width_bucket(w),
            Expr::Extract(e) => self.visit_extract(e),
            Expr::DateAdd(d) => self.visit_date_add(d),
            Expr::DateDiff(d) => self.visit_date_diff(d),
            Expr::DateTrunc(d) => self.visit_date_trunc(d),
            Expr::SampleRatio(s) => self.visit_sample_ratio(s),
            Expr::Likelihood(l) => self.visit_likelihood(l),
            Expr::OffsetInFragment(o) => self.visit_offset_in_fragment(o),
            Expr::MakeArray(a) => self.visit_make_array(a),
        }
    }

    fn default_result(&self) -> Self::Output {
        Self::Output::default()
    }

    /// Folds the result of visiting one more child into the accumulator.
    fn aggregate_result(&self, _prev: Self::Output, next: Self::Output) -> Self::Output {
        next
    }

    /// Visits every child of `expr` and folds the results.
    fn visit_children(&mut self, expr: &Expr) -> Self::Output {
        let mut children = Vec::new();
        expr.for_each_child(&mut |child| children.push(child.clone()));
        let mut result = self.default_result();
        for child in &children {
            let next = self.visit(child);
            result = self.aggregate_result(result, next);
        }
        result
    }

    fn visit_constant(&mut self, _c: &Constant) -> Self::Output {
        self.default_result()
    }

    fn visit_column_var(&mut self, _c: &ColumnVar) -> Self::Output {
        self.default_result()
    }

    fn visit_column_ref(&mut self, _c: &ColumnRef) -> Self::Output {
        self.default_result()
    }

    fn visit_var(&mut self, _v: &Var) -> Self::Output {
        self.default_result()
    }

    fn visit_uoper(&mut self, u: &UOper) -> Self::Output {
        self.visit(&u.operand)
    }

    fn visit_bin_oper(&mut self, b: &BinOper) -> Self::Output {
        let lhs = self.visit(&b.lhs);
        let rhs = self.visit(&b.rhs);
        self.aggregate_result(lhs, rhs)
    }

    fn visit_case(&mut self, c: &CaseExpr) -> Self::Output {
        let mut result = self.default_result();
        for (when, then) in &c.when_then {
            let next = self.visit(when);
            result = self.aggregate_result(result, next);
            let next = self.visit(then);
            result = self.aggregate_result(result, next);
        }
        let next = self.visit(&c.else_expr);
        self.aggregate_result(result, next)
    }

    fn visit_in_values(&mut self, e: &InValues) -> Self::Output {
        let mut result = self.visit(&e.arg);
        for v in &e.values {
            let next = self.visit(v);
            result = self.aggregate_result(result, next);
        }
        result
    }

    fn visit_in_integer_set(&mut self, e: &InIntegerSet) -> Self::Output {
        self.visit(&e.arg)
    }

    fn visit_scalar_subquery(&mut self, _s: &ScalarSubquery) -> Self::Output {
        self.default_result()
    }

    fn visit_in_subquery(&mut self, s: &InSubquery) -> Self::Output {
        self.visit(&s.arg)
    }

    fn visit_agg(&mut self, a: &AggExpr) -> Self::Output {
        match &a.arg {
            Some(arg) => self.visit(arg),
            None => self.default_result(),
        }
    }

    fn visit_window(&mut self, w: &WindowFunction) -> Self::Output {
        let mut result = self.default_result();
        for e in w.args.iter().chain(&w.partition_keys).chain(&w.order_keys) {
            let next = self.visit(e);
            result = self.aggregate_result(result, next);
        }
        result
    }

    fn visit_function_oper(&mut self, f: &FunctionOper) -> Self::Output {
        let mut result = self.default_result();
        for a in &f.args {
            let next = self.visit(a);
            result = self.aggregate_result(result, next);
        }
        result
    }

    fn visit_like(&mut self, l: &LikeExpr) -> Self::Output {
        let mut result = self.visit(&l.arg);
        let next = self.visit(&l.pattern);
        result = self.aggregate_result(result, next);
        if let Some(esc) = &l.escape {
            let next = self.visit(esc);
            result = self.aggregate_result(result, next);
        }
        result
    }

    fn visit_regexp(&mut self, r: &RegexpExpr) -> Self::Output {
        let mut result = self.visit(&r.arg);
        let next = self.visit(&r.pattern);
        result = self.aggregate_result(result, next);
        if let Some(esc) = &r.escape {
            let next = self.visit(esc);
            result = self.aggregate_result(result, next);
        }
        result
    }

    fn visit_char_length(&mut self, c: &CharLengthExpr) -> Self::Output {
        self.visit(&c.arg)
    }

    fn visit_key_for_string(&mut self, k: &KeyForStringExpr) -> Self::Output {
        self.visit(&k.arg)
    }

    fn visit_lower(&mut self, l: &LowerExpr) -> Self::Output {
        self.visit(&l.arg)
    }

    fn visit_cardinality(&mut self, c: &CardinalityExpr) -> Self::Output {
        self.visit(&c.arg)
    }

    fn visit_width_bucket(&mut self, w: &WidthBucketExpr) -> Self::Output {
        let mut result = self.visit(&w.target);
        for e in [&w.lower, &w.upper, &w.partition_count] {
            let next = self.visit(e);
            result = self.aggregate_result(result, next);
        }
        result
    }

    fn visit_extract(&mut self, e: &ExtractExpr) -> Self::Output {
        self.visit(&e.from)
    }

    fn visit_date_add(&mut self, d: &DateAddExpr) -> Self::Output {
        let number = self.visit(&d.number);
        let datetime = self.visit(&d.datetime);
        self.aggregate_result(number, datetime)
    }

    fn visit_date_diff(&mut self, d: &DateDiffExpr) -> Self::Output {
        let start = self.visit(&d.start);
        let end = self.visit(&d.end);
        self.aggregate_result(start, end)
    }

    fn visit_date_trunc(&mut self, d: &DateTruncExpr) -> Self::Output {
        self.visit(&d.from)
    }

    fn visit_sample_ratio(&mut self, s: &SampleRatioExpr) -> Self::Output {
        self.visit(&s.arg)
    }

    fn visit_likelihood(&mut self, l: &LikelihoodExpr) -> Self::Output {
        self.visit(&l.arg)
    }

    fn visit_offset_in_fragment(&mut self, _o: &OffsetInFragment) -> Self::Output {
        self.default_result()
    }

    fn visit_make_array(&mut self, a: &ArrayExpr) -> Self::Output {
        let mut result = self.default_result();
        for e in &a.elements {
            let next = self.visit(e);
            result = self.aggregate_result(result, next);
        }
        result
    }
}

/// Collects the column references appearing under an expression.
#[derive(Default)]
pub struct ColumnRefCollector {
    pub refs: Vec<ColumnRef>,
}

impl ExprVisitor for ColumnRefCollector {
    type Output = ();

    fn visit_column_ref(&mut self, c: &ColumnRef) {
        self.refs.push(c.clone());
    }
}

/// Collects the distinct window functions under an expression.
#[derive(Default)]
pub struct WindowFunctionCollector {
    pub found: Vec<WindowFunction>,
}

impl ExprVisitor for WindowFunctionCollector {
    type Output = ();

    fn visit_window(&mut self, w: &WindowFunction) {
        self.found.push(w.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use basalt_common::types::TypeContext;

    use super::*;
    use crate::ops::{OpType, Qualifier};

    struct CountConstants;

    impl ExprVisitor for CountConstants {
        type Output = usize;

        fn aggregate_result(&self, prev: usize, next: usize) -> usize {
            prev + next
        }

        fn visit_constant(&mut self, _c: &Constant) -> usize {
            1
        }
    }

    #[test]
    fn default_traversal_aggregates() {
        let ctx = TypeContext::global();
        let one: ExprRef = Constant::int64(1).into();
        let two: ExprRef = Constant::int64(2).into();
        let sum: ExprRef = BinOper {
            ty: ctx.int64(false),
            op: OpType::Plus,
            qualifier: Qualifier::One,
            lhs: one,
            rhs: two,
        }
        .into();
        let neg: ExprRef = UOper {
            ty: ctx.int64(false),
            op: OpType::UMinus,
            operand: Arc::clone(&sum),
        }
        .into();
        assert_eq!(CountConstants.visit(&neg), 2);
    }
}
