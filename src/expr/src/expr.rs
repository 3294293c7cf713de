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

//! Expression nodes.
//!
//! Expression graphs are immutable DAGs shared through [`ExprRef`]; all
//! transformation goes through the rewriter. Constructors compute derived
//! facts (nullability, aggregate containment) once.

use std::fmt;
use std::sync::Arc;

use enum_as_inner::EnumAsInner;

use basalt_common::datum::Datum;
use basalt_common::schema::ColumnInfoRef;
use basalt_common::types::{Type, TypeContext, TypeRef};

use crate::error::{ExprError, Result};
use crate::ops::{
    AggType, DateAddField, DateTruncField, ExtractField, OpType, Qualifier, WindowFuncKind,
};

pub type ExprRef = Arc<Expr>;

/// Identity of a relational node producing columns referenced by
/// [`ColumnRef`] and the subquery nodes. Ids are process-unique.
pub type NodeId = u64;

/// Which row a [`Var`] reads from during aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WhichRow {
    InputOuter,
    InputInner,
    Output,
    GroupBy,
}

/// One ORDER BY entry: output field ordinal plus direction and null
/// placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderEntry {
    pub field: usize,
    pub is_desc: bool,
    pub nulls_first: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumAsInner)]
pub enum Expr {
    Constant(Constant),
    ColumnVar(ColumnVar),
    ColumnRef(ColumnRef),
    Var(Var),
    UOper(UOper),
    BinOper(BinOper),
    Case(CaseExpr),
    InValues(InValues),
    InIntegerSet(InIntegerSet),
    ScalarSubquery(ScalarSubquery),
    InSubquery(InSubquery),
    Agg(AggExpr),
    Window(WindowFunction),
    FunctionOper(FunctionOper),
    Like(LikeExpr),
    Regexp(RegexpExpr),
    CharLength(CharLengthExpr),
    KeyForString(KeyForStringExpr),
    Lower(LowerExpr),
    Cardinality(CardinalityExpr),
    WidthBucket(WidthBucketExpr),
    Extract(ExtractExpr),
    DateAdd(DateAddExpr),
    DateDiff(DateDiffExpr),
    DateTrunc(DateTruncExpr),
    SampleRatio(SampleRatioExpr),
    Likelihood(LikelihoodExpr),
    OffsetInFragment(OffsetInFragment),
    MakeArray(ArrayExpr),
}

/// A tagged scalar literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constant {
    pub ty: TypeRef,
    pub is_null: bool,
    pub value: Datum,
}

/// A base-table column reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnVar {
    pub col_info: ColumnInfoRef,
    /// Range-table index: which join side / input the column comes from.
    pub rte_idx: i32,
}

/// A reference to column `index` of the output of relational node `node`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub ty: TypeRef,
    pub node: NodeId,
    pub index: usize,
}

/// A targetlist-entry reference used inside aggregation lowering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Var {
    pub ty: TypeRef,
    pub col_info: Option<ColumnInfoRef>,
    pub rte_idx: i32,
    pub which_row: WhichRow,
    pub varno: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UOper {
    pub ty: TypeRef,
    pub op: OpType,
    pub operand: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinOper {
    pub ty: TypeRef,
    pub op: OpType,
    pub qualifier: Qualifier,
    pub lhs: ExprRef,
    pub rhs: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaseExpr {
    pub ty: TypeRef,
    /// At least one pair; conditions are boolean.
    pub when_then: Vec<(ExprRef, ExprRef)>,
    /// Synthesized typed NULL when the query has no ELSE.
    pub else_expr: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InValues {
    pub arg: ExprRef,
    pub values: Vec<ExprRef>,
}

/// Post-lowering form of IN over a large integer set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InIntegerSet {
    pub arg: ExprRef,
    pub values: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScalarSubquery {
    pub ty: TypeRef,
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InSubquery {
    pub arg: ExprRef,
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggExpr {
    pub ty: TypeRef,
    pub kind: AggType,
    /// None for `COUNT(*)`.
    pub arg: Option<ExprRef>,
    pub is_distinct: bool,
    /// Direct argument of the approximate aggregates: HLL precision or
    /// quantile fraction.
    pub arg1: Option<Constant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowFunction {
    pub ty: TypeRef,
    pub kind: WindowFuncKind,
    pub args: Vec<ExprRef>,
    pub partition_keys: Vec<ExprRef>,
    pub order_keys: Vec<ExprRef>,
    pub collation: Vec<OrderEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionOper {
    pub ty: TypeRef,
    pub name: String,
    pub args: Vec<ExprRef>,
    /// The return type does not follow the default extension-function
    /// inference and the generator must consult the name.
    pub custom_type_handling: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LikeExpr {
    pub arg: ExprRef,
    pub pattern: ExprRef,
    pub escape: Option<ExprRef>,
    pub is_ilike: bool,
    /// `%needle%` with no other metacharacters: a plain contains scan.
    pub is_simple: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegexpExpr {
    pub arg: ExprRef,
    pub pattern: ExprRef,
    pub escape: Option<ExprRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharLengthExpr {
    pub arg: ExprRef,
    pub calc_encoded_length: bool,
}

/// The dictionary id of a dictionary-encoded string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyForStringExpr {
    pub arg: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LowerExpr {
    pub arg: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CardinalityExpr {
    pub arg: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WidthBucketExpr {
    pub target: ExprRef,
    pub lower: ExprRef,
    pub upper: ExprRef,
    pub partition_count: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtractExpr {
    pub field: ExtractField,
    pub from: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DateAddExpr {
    pub ty: TypeRef,
    pub field: DateAddField,
    pub number: ExprRef,
    pub datetime: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DateDiffExpr {
    pub field: DateTruncField,
    pub start: ExprRef,
    pub end: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DateTruncExpr {
    pub ty: TypeRef,
    pub field: DateTruncField,
    pub from: ExprRef,
}

/// `SAMPLE_RATIO(f)`: keep the row with probability `f`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleRatioExpr {
    pub arg: ExprRef,
}

/// Branch-weight annotation on a qual.
#[derive(Debug, Clone)]
pub struct LikelihoodExpr {
    pub arg: ExprRef,
    pub likelihood: f32,
}

impl PartialEq for LikelihoodExpr {
    fn eq(&self, other: &Self) -> bool {
        self.arg == other.arg && self.likelihood.to_bits() == other.likelihood.to_bits()
    }
}

impl Eq for LikelihoodExpr {}

impl std::hash::Hash for LikelihoodExpr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.arg.hash(state);
        self.likelihood.to_bits().hash(state);
    }
}

/// The virtual rowid of the current row within its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OffsetInFragment;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayExpr {
    pub ty: TypeRef,
    pub elements: Vec<ExprRef>,
    pub is_null: bool,
}

impl Expr {
    /// The result type of this expression.
    pub fn ty(&self) -> TypeRef {
        let ctx = TypeContext::global();
        match self {
            Expr::Constant(c) => c.ty,
            Expr::ColumnVar(c) => c.col_info.ty,
            Expr::ColumnRef(c) => c.ty,
            Expr::Var(v) => v.ty,
            Expr::UOper(u) => u.ty,
            Expr::BinOper(b) => b.ty,
            Expr::Case(c) => c.ty,
            Expr::InValues(e) => ctx.boolean(e.arg.ty().nullable()),
            Expr::InIntegerSet(e) => ctx.boolean(e.arg.ty().nullable()),
            Expr::ScalarSubquery(s) => s.ty,
            Expr::InSubquery(s) => ctx.boolean(s.arg.ty().nullable()),
            Expr::Agg(a) => a.ty,
            Expr::Window(w) => w.ty,
            Expr::FunctionOper(f) => f.ty,
            Expr::Like(l) => ctx.boolean(l.arg.ty().nullable()),
            Expr::Regexp(r) => ctx.boolean(r.arg.ty().nullable()),
            Expr::CharLength(c) => ctx.int32(c.arg.ty().nullable()),
            Expr::KeyForString(k) => ctx.int32(k.arg.ty().nullable()),
            Expr::Lower(l) => l.arg.ty(),
            Expr::Cardinality(c) => ctx.int32(c.arg.ty().nullable()),
            Expr::WidthBucket(w) => ctx.int32(w.target.ty().nullable()),
            Expr::Extract(e) => ctx.int64(e.from.ty().nullable()),
            Expr::DateAdd(d) => d.ty,
            Expr::DateDiff(d) => ctx.int64(d.start.ty().nullable() || d.end.ty().nullable()),
            Expr::DateTrunc(d) => d.ty,
            Expr::SampleRatio(_) => ctx.boolean(false),
            Expr::Likelihood(l) => l.arg.ty(),
            Expr::OffsetInFragment(_) => ctx.int64(false),
            Expr::MakeArray(a) => a.ty,
        }
    }

    /// Whether an aggregate appears anywhere under this node.
    pub fn contains_agg(&self) -> bool {
        match self {
            Expr::Agg(_) => true,
            _ => {
                let mut found = false;
                self.for_each_child(&mut |child| found |= child.contains_agg());
                found
            }
        }
    }

    /// Invokes `f` on every direct child.
    pub fn for_each_child(&self, f: &mut dyn FnMut(&ExprRef)) {
        match self {
            Expr::Constant(_)
            | Expr::ColumnVar(_)
            | Expr::ColumnRef(_)
            | Expr::Var(_)
            | Expr::ScalarSubquery(_)
            | Expr::OffsetInFragment(_) => {}
            Expr::UOper(u) => f(&u.operand),
            Expr::BinOper(b) => {
                f(&b.lhs);
                f(&b.rhs);
            }
            Expr::Case(c) => {
                for (when, then) in &c.when_then {
                    f(when);
                    f(then);
                }
                f(&c.else_expr);
            }
            Expr::InValues(e) => {
                f(&e.arg);
                for v in &e.values {
                    f(v);
                }
            }
            Expr::InIntegerSet(e) => f(&e.arg),
            Expr::InSubquery(s) => f(&s.arg),
            Expr::Agg(a) => {
                if let Some(arg) = &a.arg {
                    f(arg);
                }
            }
            Expr::Window(w) => {
                for e in w.args.iter().chain(&w.partition_keys).chain(&w.order_keys) {
                    f(e);
                }
            }
            Expr::FunctionOper(fun) => {
                for a in &fun.args {
                    f(a);
                }
            }
            Expr::Like(l) => {
                f(&l.arg);
                f(&l.pattern);
                if let Some(esc) = &l.escape {
                    f(esc);
                }
            }
            Expr::Regexp(r) => {
                f(&r.arg);
                f(&r.pattern);
                if let Some(esc) = &r.escape {
                    f(esc);
                }
            }
            Expr::CharLength(c) => f(&c.arg),
            Expr::KeyForString(k) => f(&k.arg),
            Expr::Lower(l) => f(&l.arg),
            Expr::Cardinality(c) => f(&c.arg),
            Expr::WidthBucket(w) => {
                f(&w.target);
                f(&w.lower);
                f(&w.upper);
                f(&w.partition_count);
            }
            Expr::Extract(e) => f(&e.from),
            Expr::DateAdd(d) => {
                f(&d.number);
                f(&d.datetime);
            }
            Expr::DateDiff(d) => {
                f(&d.start);
                f(&d.end);
            }
            Expr::DateTrunc(d) => f(&d.from),
            Expr::SampleRatio(s) => f(&s.arg),
            Expr::Likelihood(l) => f(&l.arg),
            Expr::MakeArray(a) => {
                for e in &a.elements {
                    f(e);
                }
            }
        }
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(self, Expr::Constant(c) if c.is_null)
    }

    /// Wraps this expression in a cast to `ty`, folding constants.
    pub fn add_cast(self: &Arc<Self>, ty: TypeRef) -> Result<ExprRef> {
        if self.ty() == ty {
            return Ok(self.clone());
        }
        if let Expr::Constant(c) = self.as_ref() {
            return Ok(Arc::new(Expr::Constant(c.cast_to(ty)?)));
        }
        let from = self.ty();
        let ok = (from.is_numeric() && ty.is_numeric())
            || (from.is_string() && ty.is_string())
            || (from.is_datetime() && (ty.is_datetime() || ty.is_integer()))
            || (from.is_integer() && ty.is_datetime())
            || (from.is_boolean() && ty.is_integer())
            || (from.is_integer() && ty.is_boolean())
            || (from.is_string() && ty.is_integer())
            || from.is_null();
        if !ok {
            return Err(ExprError::UnsupportedCast {
                from: from.to_string(),
                to: ty.to_string(),
            });
        }
        Ok(Arc::new(Expr::UOper(UOper {
            ty,
            op: OpType::Cast,
            operand: self.clone(),
        })))
    }

    /// Strips dictionary encoding by casting to the canonical type.
    pub fn decompress(self: &Arc<Self>) -> ExprRef {
        let ty = self.ty();
        let canon = ty.canonicalize();
        if canon == ty {
            return self.clone();
        }
        Arc::new(Expr::UOper(UOper {
            ty: canon,
            op: OpType::Cast,
            operand: self.clone(),
        }))
    }
}

/// Builds the [`Var`] aggregation lowering uses to address a targetlist
/// entry, preserving column identity when `expr` is a base-table column.
pub fn var_ref(expr: &Expr, which_row: WhichRow, varno: i32) -> ExprRef {
    let (col_info, rte_idx) = match expr {
        Expr::ColumnVar(cv) => (Some(cv.col_info.clone()), cv.rte_idx),
        _ => (None, -1),
    };
    Arc::new(Expr::Var(Var {
        ty: expr.ty(),
        col_info,
        rte_idx,
        which_row,
        varno,
    }))
}

/// Removes a cast operator if present.
pub fn remove_cast(expr: &ExprRef) -> ExprRef {
    match expr.as_ref() {
        Expr::UOper(u) if u.op == OpType::Cast => u.operand.clone(),
        _ => expr.clone(),
    }
}

impl Constant {
    pub fn new(ty: TypeRef, value: Datum) -> Constant {
        Constant {
            ty,
            is_null: value.is_null(),
            value,
        }
    }

    pub fn null(ty: TypeRef) -> Constant {
        Constant {
            ty,
            is_null: true,
            value: Datum::Null,
        }
    }

    /// Untyped NULL literal; must be cast before codegen.
    pub fn untyped_null() -> Constant {
        Constant::null(TypeContext::global().null())
    }

    pub fn int64(v: i64) -> Constant {
        Constant::new(TypeContext::global().int64(false), Datum::Int(v))
    }

    pub fn boolean(v: bool) -> Constant {
        Constant::new(TypeContext::global().boolean(false), Datum::Bool(v))
    }

    /// Casts the literal, folding the conversion at analysis time.
    pub fn cast_to(&self, ty: TypeRef) -> Result<Constant> {
        if self.ty == ty {
            return Ok(self.clone());
        }
        if self.is_null {
            if ty.is_null() {
                return Ok(self.clone());
            }
            return Ok(Constant::null(ty.with_nullable(true)));
        }
        let from = self.ty;
        let value = match (&self.value, ty) {
            (Datum::Int(v), Type::Integer { size, .. }) => {
                let scaled = descale(*v, from)?;
                check_int_range(scaled, *size)?;
                Datum::Int(scaled)
            }
            (Datum::Int(v), Type::Decimal64 { scale, .. }) => {
                let unscaled = descale(*v, from)?;
                Datum::Int(rescale(unscaled, 0, *scale as i32)?)
            }
            (Datum::Int(v), Type::FloatingPoint { .. }) => {
                let divisor = 10f64.powi(from.scale().unwrap_or(0) as i32);
                Datum::Fp(*v as f64 / divisor)
            }
            (Datum::Int(v), Type::Boolean { .. }) => Datum::Bool(*v != 0),
            (Datum::Bool(b), Type::Integer { .. }) => Datum::Int(*b as i64),
            (Datum::Fp(v), Type::FloatingPoint { .. }) => Datum::Fp(*v),
            (Datum::Fp(v), Type::Integer { size, .. }) => {
                let rounded = *v as i64;
                check_int_range(rounded, *size)?;
                Datum::Int(rounded)
            }
            (Datum::Fp(v), Type::Decimal64 { scale, .. }) => {
                Datum::Int((*v * 10f64.powi(*scale as i32)).round() as i64)
            }
            (Datum::Int(v), Type::Timestamp { .. } | Type::Date { .. } | Type::Time { .. }) => {
                Datum::Int(*v)
            }
            (Datum::Str(s), ty_to) if ty_to.is_timestamp() => {
                Datum::Int(crate::analyzer::parse_timestamp_literal(
                    s,
                    ty_to.time_unit().expect("timestamp has unit"),
                )?)
            }
            (Datum::Str(s), ty_to) if ty_to.is_date() => {
                Datum::Int(crate::analyzer::parse_date_literal(
                    s,
                    ty_to.time_unit().expect("date has unit"),
                )?)
            }
            (Datum::Str(s), ty_to) if ty_to.is_text() => Datum::Str(s.clone()),
            // Dictionary encoding of string literals happens at codegen
            // time through the dictionary capability; keep the value.
            (Datum::Str(s), ty_to) if ty_to.is_ext_dictionary() => Datum::Str(s.clone()),
            _ => {
                return Err(ExprError::UnsupportedCast {
                    from: from.to_string(),
                    to: ty.to_string(),
                })
            }
        };
        Ok(Constant {
            ty,
            is_null: false,
            value,
        })
    }
}

fn check_int_range(v: i64, size: u8) -> Result<()> {
    let ok = match size {
        1 => i8::try_from(v).is_ok(),
        2 => i16::try_from(v).is_ok(),
        4 => i32::try_from(v).is_ok(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(ExprError::LiteralOutOfRange(v, size))
    }
}

fn descale(v: i64, from: TypeRef) -> Result<i64> {
    match from.scale() {
        Some(s) if s > 0 => rescale(v, s as i32, 0),
        _ => Ok(v),
    }
}

fn rescale(v: i64, from_scale: i32, to_scale: i32) -> Result<i64> {
    if from_scale == to_scale {
        return Ok(v);
    }
    if to_scale > from_scale {
        let factor = 10i64
            .checked_pow((to_scale - from_scale) as u32)
            .ok_or(ExprError::LiteralOutOfRange(v, 8))?;
        v.checked_mul(factor)
            .ok_or(ExprError::LiteralOutOfRange(v, 8))
    } else {
        Ok(v / 10i64.pow((from_scale - to_scale) as u32))
    }
}

macro_rules! impl_from_node {
    ($($struct_name:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$struct_name> for Expr {
                fn from(node: $struct_name) -> Expr {
                    Expr::$variant(node)
                }
            }

            impl From<$struct_name> for ExprRef {
                fn from(node: $struct_name) -> ExprRef {
                    Arc::new(Expr::$variant(node))
                }
            }
        )*
    };
}

impl_from_node! {
    Constant => Constant,
    ColumnVar => ColumnVar,
    ColumnRef => ColumnRef,
    Var => Var,
    UOper => UOper,
    BinOper => BinOper,
    CaseExpr => Case,
    InValues => InValues,
    InIntegerSet => InIntegerSet,
    ScalarSubquery => ScalarSubquery,
    InSubquery => InSubquery,
    AggExpr => Agg,
    WindowFunction => Window,
    FunctionOper => FunctionOper,
    LikeExpr => Like,
    RegexpExpr => Regexp,
    CharLengthExpr => CharLength,
    KeyForStringExpr => KeyForString,
    LowerExpr => Lower,
    CardinalityExpr => Cardinality,
    WidthBucketExpr => WidthBucket,
    ExtractExpr => Extract,
    DateAddExpr => DateAdd,
    DateDiffExpr => DateDiff,
    DateTruncExpr => DateTrunc,
    SampleRatioExpr => SampleRatio,
    LikelihoodExpr => Likelihood,
    OffsetInFragment => OffsetInFragment,
    ArrayExpr => MakeArray,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(c) => {
                if c.is_null {
                    write!(f, "NULL")
                } else {
                    write!(f, "{}", c.value)
                }
            }
            Expr::ColumnVar(c) => write!(f, "{}", c.col_info.name),
            Expr::ColumnRef(c) => write!(f, "${}.{}", c.node, c.index),
            Expr::Var(v) => write!(f, "var#{}", v.varno),
            Expr::UOper(u) => match u.op {
                OpType::Cast => write!(f, "CAST({} AS {})", u.operand, u.ty),
                OpType::IsNull => write!(f, "({} IS NULL)", u.operand),
                OpType::UMinus => write!(f, "(- {})", u.operand),
                op => write!(f, "({op} {})", u.operand),
            },
            Expr::BinOper(b) => write!(f, "({} {} {})", b.lhs, b.op, b.rhs),
            Expr::Case(c) => {
                write!(f, "CASE")?;
                for (when, then) in &c.when_then {
                    write!(f, " WHEN {when} THEN {then}")?;
                }
                write!(f, " ELSE {} END", c.else_expr)
            }
            Expr::InValues(e) => {
                write!(f, "({} IN (", e.arg)?;
                for (i, v) in e.values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "))")
            }
            Expr::InIntegerSet(e) => write!(f, "({} IN <{} values>)", e.arg, e.values.len()),
            Expr::ScalarSubquery(s) => write!(f, "(subquery ${})", s.node),
            Expr::InSubquery(s) => write!(f, "({} IN subquery ${})", s.arg, s.node),
            Expr::Agg(a) => {
                write!(f, "{}(", a.kind)?;
                if a.is_distinct {
                    write!(f, "DISTINCT ")?;
                }
                match &a.arg {
                    Some(arg) => write!(f, "{arg})"),
                    None => write!(f, "*)"),
                }
            }
            Expr::Window(w) => write!(f, "{}() OVER (...)", w.kind),
            Expr::FunctionOper(func) => {
                write!(f, "{}(", func.name)?;
                for (i, a) in func.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Like(l) => write!(f, "({} LIKE {})", l.arg, l.pattern),
            Expr::Regexp(r) => write!(f, "({} REGEXP {})", r.arg, r.pattern),
            Expr::CharLength(c) => write!(f, "CHAR_LENGTH({})", c.arg),
            Expr::KeyForString(k) => write!(f, "KEY_FOR_STRING({})", k.arg),
            Expr::Lower(l) => write!(f, "LOWER({})", l.arg),
            Expr::Cardinality(c) => write!(f, "CARDINALITY({})", c.arg),
            Expr::WidthBucket(w) => write!(
                f,
                "WIDTH_BUCKET({}, {}, {}, {})",
                w.target, w.lower, w.upper, w.partition_count
            ),
            Expr::Extract(e) => write!(f, "EXTRACT({} FROM {})", e.field, e.from),
            Expr::DateAdd(d) => write!(f, "DATE_ADD({}, {}, {})", d.field, d.number, d.datetime),
            Expr::DateDiff(d) => write!(f, "DATE_DIFF({}, {}, {})", d.field, d.start, d.end),
            Expr::DateTrunc(d) => write!(f, "DATE_TRUNC({}, {})", d.field, d.from),
            Expr::SampleRatio(s) => write!(f, "SAMPLE_RATIO({})", s.arg),
            Expr::Likelihood(l) => write!(f, "LIKELIHOOD({}, {})", l.arg, l.likelihood),
            Expr::OffsetInFragment(_) => write!(f, "OFFSET_IN_FRAGMENT()"),
            Expr::MakeArray(a) => write!(f, "ARRAY[{} elements]", a.elements.len()),
        }
    }
}
