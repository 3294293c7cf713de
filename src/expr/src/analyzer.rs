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

//! Semantic analysis: operator normalization, literal analysis and the
//! LIKE/REGEXP builders.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use basalt_common::datum::Datum;
use basalt_common::types::{TimeUnit, Type, TypeContext, TypeRef};

use crate::error::{ExprError, Result};
use crate::expr::*;
use crate::ops::{OpType, Qualifier};

/// SQL numeric promotion: the common type both operands are cast to.
///
/// Signed-wider wins among integers; integer and decimal widen to a decimal
/// whose scale is max-merged; anything with floating point widens to fp64
/// (except fp32 with fp32); datetimes meet at the finer unit.
pub fn common_numeric_type(t1: TypeRef, t2: TypeRef) -> Result<TypeRef> {
    let ctx = TypeContext::global();
    let nullable = t1.nullable() || t2.nullable();
    if t1.with_nullable(nullable) == t2.with_nullable(nullable) {
        return Ok(t1.with_nullable(nullable));
    }
    if t1.is_fp() || t2.is_fp() {
        if t1.is_fp32() && t2.is_fp32() {
            return Ok(ctx.fp32(nullable));
        }
        return Ok(ctx.fp64(nullable));
    }
    if t1.is_boolean() && t2.is_boolean() {
        return Ok(ctx.boolean(nullable));
    }
    if t1.is_integer() && t2.is_integer() {
        let size = t1.size().max(t2.size()) as u8;
        return Ok(ctx.integer(size, nullable));
    }
    if t1.is_decimal() || t2.is_decimal() {
        let (p1, s1) = decimal_shape(t1)?;
        let (p2, s2) = decimal_shape(t2)?;
        let scale = s1.max(s2);
        let integral = (p1 - s1).max(p2 - s2);
        let precision = (integral + scale).min(19);
        return Ok(ctx.decimal64(precision, scale, nullable));
    }
    if t1.is_datetime() && t2.is_datetime() {
        return common_datetime_type(t1, t2, nullable);
    }
    if t1.is_interval() && t2.is_interval() {
        let unit = t1
            .time_unit()
            .expect("interval has unit")
            .max(t2.time_unit().expect("interval has unit"));
        return Ok(ctx.interval(unit, nullable));
    }
    Err(ExprError::TypeInference(format!(
        "no common numeric type for {t1} and {t2}"
    )))
}

fn decimal_shape(ty: TypeRef) -> Result<(u8, u8)> {
    match *ty {
        Type::Decimal64 {
            precision, scale, ..
        } => Ok((precision, scale)),
        Type::Integer { size, .. } => Ok((digits_for_int_width(size), 0)),
        Type::Boolean { .. } => Ok((1, 0)),
        _ => Err(ExprError::TypeInference(format!(
            "{ty} does not unify with a decimal"
        ))),
    }
}

fn digits_for_int_width(size: u8) -> u8 {
    match size {
        1 => 3,
        2 => 5,
        4 => 10,
        _ => 19,
    }
}

fn common_datetime_type(t1: TypeRef, t2: TypeRef, nullable: bool) -> Result<TypeRef> {
    let ctx = TypeContext::global();
    let u1 = t1.time_unit().expect("datetime has unit");
    let u2 = t2.time_unit().expect("datetime has unit");
    let unit = u1.max(u2);
    if t1.is_timestamp() || t2.is_timestamp() {
        return Ok(ctx.timestamp(unit, nullable));
    }
    if t1.is_date() && t2.is_date() {
        return Ok(ctx.date(unit, nullable));
    }
    if t1.is_time() && t2.is_time() {
        return Ok(ctx.time(unit, nullable));
    }
    Err(ExprError::TypeInference(format!(
        "no common datetime type for {t1} and {t2}"
    )))
}

/// Common type for two string operands. Identical dictionaries stay
/// encoded; every other combination decompresses to plain text.
pub fn common_string_type(t1: TypeRef, t2: TypeRef) -> Result<TypeRef> {
    let ctx = TypeContext::global();
    let nullable = t1.nullable() || t2.nullable();
    match (t1, t2) {
        (
            Type::ExtDictionary {
                dict_id: d1,
                elem,
                index_size: s1,
                ..
            },
            Type::ExtDictionary {
                dict_id: d2,
                index_size: s2,
                ..
            },
        ) if d1 == d2 => Ok(ctx.ext_dict(elem.with_nullable(nullable), *d1, (*s1).max(*s2))),
        _ if t1.is_string() && t2.is_string() => Ok(ctx.text(nullable)),
        _ => Err(ExprError::TypeInference(format!(
            "no common string type for {t1} and {t2}"
        ))),
    }
}

/// The unified operand and result types for a binary operator.
pub struct BinOperTypes {
    pub result: TypeRef,
    pub lhs: TypeRef,
    pub rhs: TypeRef,
}

/// Computes the types a binary operation is evaluated at.
pub fn analyze_binary_types(op: OpType, lhs: TypeRef, rhs: TypeRef) -> Result<BinOperTypes> {
    let ctx = TypeContext::global();
    let nullable = lhs.nullable() || rhs.nullable();
    if op.is_logic() {
        if !lhs.is_boolean() || !rhs.is_boolean() {
            return Err(ExprError::TypeInference(format!(
                "{op} requires boolean operands, got {lhs} and {rhs}"
            )));
        }
        let ty = ctx.boolean(nullable);
        return Ok(BinOperTypes {
            result: ty,
            lhs: ty.with_nullable(lhs.nullable()),
            rhs: ty.with_nullable(rhs.nullable()),
        });
    }
    if op.is_comparison() {
        let common = if lhs.is_string() && rhs.is_string() {
            let common = common_string_type(lhs, rhs)?;
            // Equality against a dictionary side stays in the encoded
            // domain; ordering comparisons work on the decompressed text.
            if op.is_equivalence() || op == OpType::Ne {
                match (lhs.is_ext_dictionary(), rhs.is_ext_dictionary()) {
                    (true, false) => lhs.with_nullable(nullable),
                    (false, true) => rhs.with_nullable(nullable),
                    _ => common,
                }
            } else {
                common.canonicalize()
            }
        } else if lhs.is_numeric() && rhs.is_numeric() {
            common_numeric_type(lhs, rhs)?
        } else if lhs.is_datetime() && rhs.is_datetime() {
            common_numeric_type(lhs, rhs)?
        } else if lhs.is_boolean() && rhs.is_boolean() {
            ctx.boolean(nullable)
        } else if lhs.is_datetime() && rhs.is_text() {
            // String literals compare against datetimes after parsing.
            lhs.with_nullable(nullable)
        } else if lhs.is_text() && rhs.is_datetime() {
            rhs.with_nullable(nullable)
        } else {
            return Err(ExprError::TypeInference(format!(
                "cannot compare {lhs} to {rhs}"
            )));
        };
        return Ok(BinOperTypes {
            result: ctx.boolean(nullable),
            lhs: common.with_nullable(lhs.nullable()),
            rhs: common.with_nullable(rhs.nullable()),
        });
    }
    if op.is_arithmetic() {
        if op == OpType::Mod && !(lhs.is_exact_numeric() && rhs.is_exact_numeric()) {
            return Err(ExprError::TypeInference(format!(
                "MOD requires integer operands, got {lhs} and {rhs}"
            )));
        }
        if !(lhs.is_numeric() && rhs.is_numeric()) {
            return Err(ExprError::TypeInference(format!(
                "{op} requires numeric operands, got {lhs} and {rhs}"
            )));
        }
        let common = common_numeric_type(lhs, rhs)?;
        // division and modulus can produce NULL under the configured
        // divide-by-zero policy even for non-null inputs
        let result = if matches!(op, OpType::Div | OpType::Mod) {
            common.with_nullable(true)
        } else {
            common
        };
        return Ok(BinOperTypes {
            result,
            lhs: common.with_nullable(lhs.nullable()),
            rhs: common.with_nullable(rhs.nullable()),
        });
    }
    Err(ExprError::InvalidExpression(format!(
        "{op} is not a binary operator"
    )))
}

/// Produces a well-typed [`BinOper`] with both operands cast to the common
/// type.
pub fn normalize_oper_expr(
    op: OpType,
    qualifier: Qualifier,
    lhs: ExprRef,
    rhs: ExprRef,
) -> Result<ExprRef> {
    if op == OpType::ArrayAt {
        return normalize_array_at(lhs, rhs);
    }
    let lhs_ty = lhs.ty();
    let mut rhs_ty = rhs.ty();
    if qualifier != Qualifier::One {
        if !rhs_ty.is_array() {
            return Err(ExprError::InvalidExpression(
                "ANY/ALL qualifiers need an array operand".into(),
            ));
        }
        rhs_ty = rhs_ty.elem_type().expect("array has element type");
    }
    let types = analyze_binary_types(op, lhs_ty, rhs_ty)?;
    let lhs = lhs.add_cast(types.lhs)?;
    let rhs = if qualifier == Qualifier::One {
        rhs.add_cast(types.rhs)?
    } else {
        // The element type already unified; quantified comparisons keep the
        // array operand as-is and reconcile per element at codegen time.
        if types.rhs.canonicalize() != rhs_ty.canonicalize() {
            return Err(ExprError::NotSupported(
                "casting the array side of a quantified comparison".into(),
            ));
        }
        rhs
    };
    Ok(BinOper {
        ty: types.result,
        op,
        qualifier,
        lhs,
        rhs,
    }
    .into())
}

fn normalize_array_at(lhs: ExprRef, rhs: ExprRef) -> Result<ExprRef> {
    let Some(elem) = lhs.ty().elem_type() else {
        return Err(ExprError::InvalidExpression(format!(
            "{lhs} is not of array type"
        )));
    };
    if !rhs.ty().is_integer() {
        return Err(ExprError::InvalidExpression(format!(
            "{rhs} is not of integer type"
        )));
    }
    Ok(BinOper {
        ty: elem.with_nullable(true),
        op: OpType::ArrayAt,
        qualifier: Qualifier::One,
        lhs,
        rhs,
    }
    .into())
}

/// Computes the common result type over the THEN branches (and ELSE), then
/// wraps each arm in a cast to it. A CASE whose arms are all untyped NULL
/// cannot be typed.
pub fn normalize_case_expr(
    when_then: Vec<(ExprRef, ExprRef)>,
    else_expr: Option<ExprRef>,
) -> Result<ExprRef> {
    if when_then.is_empty() {
        return Err(ExprError::InvalidExpression(
            "CASE needs at least one WHEN arm".into(),
        ));
    }
    for (when, _) in &when_then {
        if !when.ty().is_boolean() {
            return Err(ExprError::InvalidExpression(format!(
                "CASE condition {when} is not boolean"
            )));
        }
    }
    let mut common: Option<TypeRef> = None;
    let arms = when_then
        .iter()
        .map(|(_, then)| then)
        .chain(else_expr.iter());
    for arm in arms.clone() {
        let ty = arm.ty();
        if ty.is_null() {
            continue;
        }
        common = Some(match common {
            None => ty,
            Some(prev) if prev.is_string() && ty.is_string() => common_string_type(prev, ty)?,
            Some(prev) => common_numeric_type(prev, ty)?,
        });
    }
    let Some(mut result_ty) = common else {
        return Err(ExprError::TypeInference(
            "all CASE branches are NULL".into(),
        ));
    };
    let has_null_arm =
        else_expr.is_none() || arms.clone().any(|arm| arm.ty().is_null() || arm.ty().nullable());
    if has_null_arm {
        result_ty = result_ty.with_nullable(true);
    }
    let when_then = when_then
        .into_iter()
        .map(|(when, then)| Ok((when, then.add_cast(result_ty)?)))
        .collect::<Result<Vec<_>>>()?;
    let else_expr = match else_expr {
        Some(e) => e.add_cast(result_ty)?,
        None => Constant::null(result_ty).into(),
    };
    Ok(CaseExpr {
        ty: result_ty,
        when_then,
        else_expr,
    }
    .into())
}

/// Selects the smallest of int16/int32/int64 that holds `v`.
pub fn analyze_int_value(v: i64) -> ExprRef {
    let ctx = TypeContext::global();
    let ty = if i16::try_from(v).is_ok() {
        ctx.int16(false)
    } else if i32::try_from(v).is_ok() {
        ctx.int32(false)
    } else {
        ctx.int64(false)
    };
    Constant::new(ty, Datum::Int(v)).into()
}

/// A decimal constant with the given shape; `value` is already scaled.
pub fn analyze_fixed_pt_value(value: i64, precision: u8, scale: u8) -> ExprRef {
    let ty = TypeContext::global().decimal64(precision, scale, false);
    Constant::new(ty, Datum::Int(value)).into()
}

pub fn analyze_string_value(s: &str) -> ExprRef {
    let ty = TypeContext::global().text(false);
    Constant::new(ty, Datum::Str(s.into())).into()
}

const DEFAULT_ESCAPE: char = '\\';

fn pattern_constant<'a>(expr: &'a ExprRef, what: &str) -> Result<&'a str> {
    match expr.as_ref() {
        Expr::Constant(c) if !c.is_null
            => c.value.as_str().ok_or_else(|| {
                ExprError::InvalidExpression(format!("{what} pattern must be a string literal"))
            }),
        _ => Err(ExprError::InvalidExpression(format!(
            "{what} pattern must be a string literal"
        ))),
    }
}

fn escape_char(escape: &Option<ExprRef>, what: &str) -> Result<char> {
    let Some(escape) = escape else {
        return Ok(DEFAULT_ESCAPE);
    };
    let s = pattern_constant(escape, what)?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(ExprError::InvalidExpression(format!(
            "{what} escape must be a single character"
        ))),
    }
}

/// Whether the pattern is `%needle%` with no other metacharacters, i.e. a
/// plain substring scan.
fn is_simple_like(pattern: &str, escape: char) -> bool {
    let chars: Vec<char> = pattern.chars().collect();
    if chars.len() < 2 || chars[0] != '%' || chars[chars.len() - 1] != '%' {
        return false;
    }
    if chars.len() >= 3 && chars[chars.len() - 2] == escape && chars[chars.len() - 3] != escape {
        return false;
    }
    for i in 1..chars.len() - 1 {
        if matches!(chars[i], '%' | '_' | '[' | ']') && chars[i - 1] != escape {
            return false;
        }
    }
    true
}

/// Strips unescaped `%` and the escape characters, leaving the raw needle
/// of a simple pattern.
fn erase_like_metacharacters(pattern: &str, escape: char) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut prev = '\0';
    for c in pattern.chars() {
        if (c == '%' || c == escape) && prev != escape {
            prev = c;
            continue;
        }
        out.push(c);
        prev = c;
    }
    out
}

/// Validates the pattern and constructs a [`LikeExpr`], folding the NOT
/// prefix into a wrapping `Not`.
pub fn get_like_expr(
    arg: ExprRef,
    pattern: ExprRef,
    escape: Option<ExprRef>,
    is_ilike: bool,
    is_not: bool,
) -> Result<ExprRef> {
    if !arg.ty().is_string() {
        return Err(ExprError::InvalidExpression(format!(
            "LIKE argument {arg} is not a string"
        )));
    }
    let escape_c = escape_char(&escape, "LIKE")?;
    let pattern_str = pattern_constant(&pattern, "LIKE")?.to_owned();
    if pattern_str.ends_with(escape_c) {
        return Err(ExprError::InvalidExpression(
            "LIKE pattern must not end with escape character".into(),
        ));
    }
    let pattern_str = if is_ilike {
        pattern_str.to_lowercase()
    } else {
        pattern_str
    };
    let is_simple = is_simple_like(&pattern_str, escape_c);
    let pattern_str = if is_simple {
        erase_like_metacharacters(&pattern_str, escape_c)
    } else {
        pattern_str
    };
    let pattern: ExprRef =
        Constant::new(TypeContext::global().text(false), Datum::Str(pattern_str.into())).into();
    let like: ExprRef = LikeExpr {
        arg,
        pattern,
        escape,
        is_ilike,
        is_simple,
    }
    .into();
    Ok(maybe_not(like, is_not))
}

/// Validates the pattern and constructs a [`RegexpExpr`].
pub fn get_regexp_expr(
    arg: ExprRef,
    pattern: ExprRef,
    escape: Option<ExprRef>,
    is_not: bool,
) -> Result<ExprRef> {
    if !arg.ty().is_string() {
        return Err(ExprError::InvalidExpression(format!(
            "REGEXP argument {arg} is not a string"
        )));
    }
    pattern_constant(&pattern, "REGEXP")?;
    escape_char(&escape, "REGEXP")?;
    let re: ExprRef = RegexpExpr {
        arg,
        pattern,
        escape,
    }
    .into();
    Ok(maybe_not(re, is_not))
}

fn maybe_not(expr: ExprRef, is_not: bool) -> ExprRef {
    if !is_not {
        return expr;
    }
    let ty = expr.ty();
    Arc::new(Expr::UOper(UOper {
        ty,
        op: OpType::Not,
        operand: expr,
    }))
}

/// Parses a timestamp literal into epoch ticks of `unit`. This is the
/// "hijacked cast" path high-precision timestamp strings arrive through.
pub fn parse_timestamp_literal(s: &str, unit: TimeUnit) -> Result<i64> {
    let s = s.trim();
    let parsed = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).expect("midnight is valid"))
        })
        .map_err(|_| ExprError::LiteralParse(s.to_owned(), "timestamp"))?;
    let secs = parsed.and_utc().timestamp();
    let ticks = unit.ticks_per_second();
    let sub = match unit {
        TimeUnit::Milli => parsed.and_utc().timestamp_subsec_millis() as i64,
        TimeUnit::Micro => parsed.and_utc().timestamp_subsec_micros() as i64,
        TimeUnit::Nano => parsed.and_utc().timestamp_subsec_nanos() as i64,
        _ => 0,
    };
    secs.checked_mul(ticks)
        .and_then(|v| v.checked_add(sub))
        .ok_or_else(|| ExprError::LiteralParse(s.to_owned(), "timestamp"))
}

/// Parses a date literal into the representation of a date of `unit`:
/// days since epoch for day-unit dates, otherwise epoch ticks.
pub fn parse_date_literal(s: &str, unit: TimeUnit) -> Result<i64> {
    let s = s.trim();
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| ExprError::LiteralParse(s.to_owned(), "date"))?;
    let days = date
        .signed_duration_since(NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch"))
        .num_days();
    match unit {
        TimeUnit::Day => Ok(days),
        _ => days
            .checked_mul(86_400 * unit.ticks_per_second())
            .ok_or_else(|| ExprError::LiteralParse(s.to_owned(), "date")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_ty(nullable: bool) -> TypeRef {
        TypeContext::global().int32(nullable)
    }

    #[test]
    fn unification_is_commutative_and_idempotent() {
        let ctx = TypeContext::global();
        let cases = [
            (ctx.int16(false), ctx.int64(true)),
            (ctx.int32(false), ctx.decimal64(10, 2, false)),
            (ctx.int64(true), ctx.fp32(false)),
            (ctx.fp32(false), ctx.fp32(false)),
            (ctx.decimal64(12, 4, false), ctx.decimal64(9, 1, true)),
            (
                ctx.timestamp(TimeUnit::Second, false),
                ctx.date(TimeUnit::Day, false),
            ),
        ];
        for (t1, t2) in cases {
            let a = common_numeric_type(t1, t2).unwrap();
            let b = common_numeric_type(t2, t1).unwrap();
            assert!(std::ptr::eq(a, b), "common({t1},{t2}) not commutative");
            let idem = common_numeric_type(t1, t1).unwrap();
            assert!(std::ptr::eq(idem, t1.with_nullable(t1.nullable())));
        }
    }

    #[test]
    fn decimal_scale_max_merges() {
        let ctx = TypeContext::global();
        let t = common_numeric_type(ctx.decimal64(10, 2, false), ctx.decimal64(12, 5, false))
            .unwrap();
        assert_eq!(t.precision(), Some(12));
        assert_eq!(t.scale(), Some(5));
    }

    #[test]
    fn int_plus_fp_is_fp64() {
        let ctx = TypeContext::global();
        let t = common_numeric_type(ctx.int64(false), ctx.fp32(false)).unwrap();
        assert!(t.is_fp64());
    }

    #[test]
    fn normalized_binoper_is_well_typed() {
        let ctx = TypeContext::global();
        let lhs: ExprRef = ColumnRef {
            ty: ctx.int16(true),
            node: 0,
            index: 0,
        }
        .into();
        let rhs: ExprRef = Constant::int64(5).into();
        let out = normalize_oper_expr(OpType::Plus, Qualifier::One, lhs, rhs).unwrap();
        let bin = out.as_bin_oper().unwrap();
        assert!(bin.ty.is_integer());
        assert_eq!(bin.ty.size(), 8);
        assert_eq!(bin.lhs.ty().canonicalize().size(), 8);
        assert_eq!(bin.rhs.ty().canonicalize().size(), 8);
    }

    #[test]
    fn comparison_result_is_boolean() {
        let lhs: ExprRef = ColumnRef {
            ty: int_ty(true),
            node: 0,
            index: 0,
        }
        .into();
        let rhs: ExprRef = Constant::int64(0).into();
        let out = normalize_oper_expr(OpType::Gt, Qualifier::One, lhs, rhs).unwrap();
        assert!(out.ty().is_boolean());
        assert!(out.ty().nullable());
    }

    #[test]
    fn dict_comparison_forces_encoding_on_plain_side() {
        let ctx = TypeContext::global();
        let dict_ty = ctx.ext_dict(ctx.text(true), 3, 4);
        let lhs: ExprRef = ColumnRef {
            ty: dict_ty,
            node: 0,
            index: 0,
        }
        .into();
        let rhs = analyze_string_value("x");
        let out = normalize_oper_expr(OpType::Eq, Qualifier::One, lhs, rhs).unwrap();
        let bin = out.as_bin_oper().unwrap();
        assert!(bin.rhs.ty().is_ext_dictionary());
        assert_eq!(bin.rhs.ty().dict_id(), Some(3));
    }

    #[test]
    fn ordering_comparison_decompresses_both_sides() {
        let ctx = TypeContext::global();
        let dict_ty = ctx.ext_dict(ctx.text(true), 3, 4);
        let lhs: ExprRef = ColumnRef {
            ty: dict_ty,
            node: 0,
            index: 0,
        }
        .into();
        let rhs = analyze_string_value("x");
        let out = normalize_oper_expr(OpType::Lt, Qualifier::One, lhs, rhs).unwrap();
        let bin = out.as_bin_oper().unwrap();
        assert!(bin.lhs.ty().is_text());
        assert!(bin.rhs.ty().is_text());
    }

    #[test]
    fn all_null_case_fails() {
        let cond: ExprRef = Constant::boolean(true).into();
        let null: ExprRef = Constant::untyped_null().into();
        let err = normalize_case_expr(vec![(cond, null.clone())], Some(null)).unwrap_err();
        assert!(matches!(err, ExprError::TypeInference(_)));
    }

    #[test]
    fn case_with_typed_arm_keeps_type_and_becomes_nullable() {
        let cond: ExprRef = Constant::boolean(true).into();
        let then: ExprRef = Constant::int64(1).into();
        let null: ExprRef = Constant::untyped_null().into();
        let out = normalize_case_expr(vec![(cond, then)], Some(null)).unwrap();
        let case = out.as_case().unwrap();
        assert!(case.ty.is_integer());
        assert!(case.ty.nullable());
    }

    #[test]
    fn missing_else_synthesizes_typed_null() {
        let cond: ExprRef = Constant::boolean(true).into();
        let then: ExprRef = Constant::int64(1).into();
        let out = normalize_case_expr(vec![(cond, then)], None).unwrap();
        let case = out.as_case().unwrap();
        assert!(case.else_expr.is_null_constant());
        assert!(case.else_expr.ty().is_integer());
    }

    #[test]
    fn int_literal_picks_smallest_width() {
        assert_eq!(analyze_int_value(12).ty().size(), 2);
        assert_eq!(analyze_int_value(40_000).ty().size(), 4);
        assert_eq!(analyze_int_value(5_000_000_000).ty().size(), 8);
    }

    #[test]
    fn simple_like_detection() {
        assert!(is_simple_like("%foo%", '\\'));
        assert!(!is_simple_like("%f_o%", '\\'));
        assert!(!is_simple_like("foo%", '\\'));
        assert_eq!(erase_like_metacharacters("%foo%", '\\'), "foo");
    }

    #[test]
    fn like_folds_not() {
        let arg = analyze_string_value("haystack");
        let pattern = analyze_string_value("%needle%");
        let out = get_like_expr(arg, pattern, None, false, true).unwrap();
        let uoper = out.as_u_oper().unwrap();
        assert_eq!(uoper.op, OpType::Not);
        let like = uoper.operand.as_like().unwrap();
        assert!(like.is_simple);
        assert_eq!(
            like.pattern.as_constant().unwrap().value.as_str(),
            Some("needle")
        );
    }

    #[test]
    fn like_pattern_must_be_literal() {
        let arg = analyze_string_value("haystack");
        let pattern: ExprRef = ColumnRef {
            ty: TypeContext::global().text(true),
            node: 0,
            index: 0,
        }
        .into();
        assert!(matches!(
            get_like_expr(arg, pattern, None, false, false),
            Err(ExprError::InvalidExpression(_))
        ));
    }

    #[test]
    fn timestamp_literal_micro() {
        let micros = parse_timestamp_literal("2020-01-01 00:00:00", TimeUnit::Micro).unwrap();
        assert_eq!(micros, 1_577_836_800_000_000);
    }
}
