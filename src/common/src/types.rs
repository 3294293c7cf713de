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

//! The interned type system.
//!
//! Every [`Type`] lives in the process-wide [`TypeContext`]; equal types are
//! pointer-equal, so a [`TypeRef`] can be compared and hashed by address.

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use parking_lot::Mutex;
use parse_display::{Display, FromStr};

use crate::datum::Datum;

/// A shared reference to an interned type descriptor.
pub type TypeRef = &'static Type;

/// Granularity of the datetime family and of intervals.
#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display(style = "snake_case")]
pub enum TimeUnit {
    Month,
    Day,
    Second,
    Milli,
    Micro,
    Nano,
}

impl TimeUnit {
    /// Sub-second ticks per second for this unit; 1 for coarser units.
    pub fn ticks_per_second(self) -> i64 {
        match self {
            TimeUnit::Month | TimeUnit::Day | TimeUnit::Second => 1,
            TimeUnit::Milli => 1_000,
            TimeUnit::Micro => 1_000_000,
            TimeUnit::Nano => 1_000_000_000,
        }
    }
}

/// Floating-point precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FpPrecision {
    Fp32,
    Fp64,
}

/// Discriminator for [`Type`], used by dispatch ladders that do not care
/// about the kind-specific parameters.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display(style = "snake_case")]
pub enum TypeKind {
    Null,
    Boolean,
    Integer,
    FloatingPoint,
    Decimal64,
    Date,
    Time,
    Timestamp,
    Interval,
    Text,
    ExtDictionary,
    FixedLenArray,
    VarLenArray,
    Column,
    ColumnList,
}

/// An immutable type descriptor. Do not construct directly; go through
/// [`TypeContext`] so that interning holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Type of an untyped NULL literal. Must be cast before use.
    Null,
    Boolean {
        nullable: bool,
    },
    /// Signed integer of 1, 2, 4 or 8 bytes.
    Integer {
        size: u8,
        nullable: bool,
    },
    FloatingPoint {
        precision: FpPrecision,
        nullable: bool,
    },
    /// Fixed-point value stored as a scaled `i64`; precision <= 19.
    Decimal64 {
        precision: u8,
        scale: u8,
        nullable: bool,
    },
    Date {
        unit: TimeUnit,
        nullable: bool,
    },
    Time {
        unit: TimeUnit,
        nullable: bool,
    },
    Timestamp {
        unit: TimeUnit,
        nullable: bool,
    },
    Interval {
        unit: TimeUnit,
        nullable: bool,
    },
    /// Variable-length UTF-8, not dictionary-encoded.
    Text {
        nullable: bool,
    },
    /// A text type re-encoded as a dense integer id. Id `-1` is the invalid
    /// sentinel.
    ExtDictionary {
        elem: TypeRef,
        dict_id: i32,
        /// Width of the encoded id in bytes: 1, 2 or 4.
        index_size: u8,
        nullable: bool,
    },
    FixedLenArray {
        elem: TypeRef,
        len: usize,
        nullable: bool,
    },
    VarLenArray {
        elem: TypeRef,
        nullable: bool,
    },
    /// UDTF parameter: a whole column of `elem`.
    Column {
        elem: TypeRef,
        nullable: bool,
    },
    /// UDTF parameter: a fixed-length list of columns of `elem`.
    ColumnList {
        elem: TypeRef,
        length: usize,
        nullable: bool,
    },
}

impl Type {
    pub fn kind(&self) -> TypeKind {
        match self {
            Type::Null => TypeKind::Null,
            Type::Boolean { .. } => TypeKind::Boolean,
            Type::Integer { .. } => TypeKind::Integer,
            Type::FloatingPoint { .. } => TypeKind::FloatingPoint,
            Type::Decimal64 { .. } => TypeKind::Decimal64,
            Type::Date { .. } => TypeKind::Date,
            Type::Time { .. } => TypeKind::Time,
            Type::Timestamp { .. } => TypeKind::Timestamp,
            Type::Interval { .. } => TypeKind::Interval,
            Type::Text { .. } => TypeKind::Text,
            Type::ExtDictionary { .. } => TypeKind::ExtDictionary,
            Type::FixedLenArray { .. } => TypeKind::FixedLenArray,
            Type::VarLenArray { .. } => TypeKind::VarLenArray,
            Type::Column { .. } => TypeKind::Column,
            Type::ColumnList { .. } => TypeKind::ColumnList,
        }
    }

    pub fn nullable(&self) -> bool {
        match *self {
            Type::Null => true,
            Type::Boolean { nullable }
            | Type::Integer { nullable, .. }
            | Type::FloatingPoint { nullable, .. }
            | Type::Decimal64 { nullable, .. }
            | Type::Date { nullable, .. }
            | Type::Time { nullable, .. }
            | Type::Timestamp { nullable, .. }
            | Type::Interval { nullable, .. }
            | Type::Text { nullable }
            | Type::ExtDictionary { nullable, .. }
            | Type::FixedLenArray { nullable, .. }
            | Type::VarLenArray { nullable, .. }
            | Type::Column { nullable, .. }
            | Type::ColumnList { nullable, .. } => nullable,
        }
    }

    /// Storage width in bytes of one value of this type in a flat buffer.
    /// Variable-length values are represented by their offset entry.
    pub fn size(&self) -> usize {
        match *self {
            Type::Null => 0,
            Type::Boolean { .. } => 1,
            Type::Integer { size, .. } => size as usize,
            Type::FloatingPoint { precision, .. } => match precision {
                FpPrecision::Fp32 => 4,
                FpPrecision::Fp64 => 8,
            },
            Type::Decimal64 { .. } => 8,
            Type::Date { .. } | Type::Time { .. } | Type::Timestamp { .. } => 8,
            Type::Interval { .. } => 8,
            // offset + length pair
            Type::Text { .. } => 16,
            Type::ExtDictionary { index_size, .. } => index_size as usize,
            Type::FixedLenArray { elem, len, .. } => elem.size() * len,
            Type::VarLenArray { .. } => 8,
            Type::Column { .. } | Type::ColumnList { .. } => 16,
        }
    }

    /// Width in bytes the type has with dictionary encoding stripped.
    pub fn canonical_size(&'static self) -> usize {
        self.canonicalize().size()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Type::Null)
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Type::Boolean { .. })
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Integer { .. })
    }

    pub fn is_fp(&self) -> bool {
        matches!(self, Type::FloatingPoint { .. })
    }

    pub fn is_fp32(&self) -> bool {
        matches!(
            self,
            Type::FloatingPoint {
                precision: FpPrecision::Fp32,
                ..
            }
        )
    }

    pub fn is_fp64(&self) -> bool {
        matches!(
            self,
            Type::FloatingPoint {
                precision: FpPrecision::Fp64,
                ..
            }
        )
    }

    pub fn is_decimal(&self) -> bool {
        matches!(self, Type::Decimal64 { .. })
    }

    /// Integers and decimals: values a perfect hash can key on directly.
    pub fn is_exact_numeric(&self) -> bool {
        self.is_integer() || self.is_decimal()
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_fp() || self.is_decimal()
    }

    pub fn is_date(&self) -> bool {
        matches!(self, Type::Date { .. })
    }

    pub fn is_time(&self) -> bool {
        matches!(self, Type::Time { .. })
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self, Type::Timestamp { .. })
    }

    pub fn is_interval(&self) -> bool {
        matches!(self, Type::Interval { .. })
    }

    pub fn is_datetime(&self) -> bool {
        self.is_date() || self.is_time() || self.is_timestamp()
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Type::Text { .. })
    }

    pub fn is_ext_dictionary(&self) -> bool {
        matches!(self, Type::ExtDictionary { .. })
    }

    pub fn is_string(&self) -> bool {
        self.is_text() || self.is_ext_dictionary()
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::FixedLenArray { .. } | Type::VarLenArray { .. })
    }

    pub fn is_varlen_array(&self) -> bool {
        matches!(self, Type::VarLenArray { .. })
    }

    pub fn is_column(&self) -> bool {
        matches!(self, Type::Column { .. })
    }

    pub fn is_column_list(&self) -> bool {
        matches!(self, Type::ColumnList { .. })
    }

    /// Types whose generated-code representation is a signed integer.
    pub fn is_integer_like(&self) -> bool {
        self.is_integer()
            || self.is_decimal()
            || self.is_boolean()
            || self.is_datetime()
            || self.is_interval()
            || self.is_ext_dictionary()
    }

    pub fn time_unit(&self) -> Option<TimeUnit> {
        match *self {
            Type::Date { unit, .. }
            | Type::Time { unit, .. }
            | Type::Timestamp { unit, .. }
            | Type::Interval { unit, .. } => Some(unit),
            _ => None,
        }
    }

    pub fn precision(&self) -> Option<u8> {
        match *self {
            Type::Decimal64 { precision, .. } => Some(precision),
            _ => None,
        }
    }

    pub fn scale(&self) -> Option<u8> {
        match *self {
            Type::Decimal64 { scale, .. } => Some(scale),
            _ => None,
        }
    }

    pub fn dict_id(&self) -> Option<i32> {
        match *self {
            Type::ExtDictionary { dict_id, .. } => Some(dict_id),
            _ => None,
        }
    }

    pub fn elem_type(&self) -> Option<TypeRef> {
        match *self {
            Type::ExtDictionary { elem, .. }
            | Type::FixedLenArray { elem, .. }
            | Type::VarLenArray { elem, .. }
            | Type::Column { elem, .. }
            | Type::ColumnList { elem, .. } => Some(elem),
            _ => None,
        }
    }

    /// An identical type with the nullable flag set to `nullable`.
    pub fn with_nullable(&'static self, nullable: bool) -> TypeRef {
        if self.nullable() == nullable || self.is_null() {
            return self;
        }
        let mut ty = self.clone();
        match &mut ty {
            Type::Null => {}
            Type::Boolean { nullable: n }
            | Type::Integer { nullable: n, .. }
            | Type::FloatingPoint { nullable: n, .. }
            | Type::Decimal64 { nullable: n, .. }
            | Type::Date { nullable: n, .. }
            | Type::Time { nullable: n, .. }
            | Type::Timestamp { nullable: n, .. }
            | Type::Interval { nullable: n, .. }
            | Type::Text { nullable: n }
            | Type::ExtDictionary { nullable: n, .. }
            | Type::FixedLenArray { nullable: n, .. }
            | Type::VarLenArray { nullable: n, .. }
            | Type::Column { nullable: n, .. }
            | Type::ColumnList { nullable: n, .. } => *n = nullable,
        }
        TypeContext::global().intern(ty)
    }

    /// Strips dictionary encoding, recursively for array element types.
    pub fn canonicalize(&'static self) -> TypeRef {
        let ctx = TypeContext::global();
        match *self {
            Type::ExtDictionary { elem, nullable, .. } => elem.with_nullable(nullable),
            Type::FixedLenArray {
                elem,
                len,
                nullable,
            } => {
                let canon = elem.canonicalize();
                if canon == elem {
                    self
                } else {
                    ctx.fixed_len_array(canon, len, nullable)
                }
            }
            Type::VarLenArray { elem, nullable } => {
                let canon = elem.canonicalize();
                if canon == elem {
                    self
                } else {
                    ctx.varlen_array(canon, nullable)
                }
            }
            _ => self,
        }
    }

    /// The reserved in-band value representing NULL for this type.
    pub fn null_sentinel(&self) -> Datum {
        match *self {
            Type::Null => Datum::Null,
            Type::Boolean { .. } => Datum::Int(NULL_BOOLEAN as i64),
            Type::Integer { size, .. } => Datum::Int(inline_int_null_value(size as usize)),
            Type::FloatingPoint { precision, .. } => match precision {
                FpPrecision::Fp32 => Datum::Fp(f32::NAN as f64),
                FpPrecision::Fp64 => Datum::Fp(f64::NAN),
            },
            Type::Decimal64 { .. } => Datum::Int(i64::MIN),
            Type::Date { .. }
            | Type::Time { .. }
            | Type::Timestamp { .. }
            | Type::Interval { .. } => Datum::Int(i64::MIN),
            Type::ExtDictionary { .. } => Datum::Int(INVALID_STR_ID as i64),
            Type::Text { .. }
            | Type::FixedLenArray { .. }
            | Type::VarLenArray { .. }
            | Type::Column { .. }
            | Type::ColumnList { .. } => Datum::Null,
        }
    }

    /// The integer null sentinel for types whose codegen representation is a
    /// signed integer. Panics for other kinds.
    pub fn inline_null_value(&self) -> i64 {
        match self.null_sentinel() {
            Datum::Int(v) => v,
            _ => panic!("no inline integer null for type {}", self),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Type::Null => write!(f, "null"),
            Type::Boolean { .. } => write!(f, "bool"),
            Type::Integer { size, .. } => write!(f, "int{}", size as usize * 8),
            Type::FloatingPoint { precision, .. } => match precision {
                FpPrecision::Fp32 => write!(f, "fp32"),
                FpPrecision::Fp64 => write!(f, "fp64"),
            },
            Type::Decimal64 {
                precision, scale, ..
            } => write!(f, "decimal({},{})", precision, scale),
            Type::Date { unit, .. } => write!(f, "date[{}]", unit),
            Type::Time { unit, .. } => write!(f, "time[{}]", unit),
            Type::Timestamp { unit, .. } => write!(f, "timestamp[{}]", unit),
            Type::Interval { unit, .. } => write!(f, "interval[{}]", unit),
            Type::Text { .. } => write!(f, "text"),
            Type::ExtDictionary {
                elem,
                dict_id,
                index_size,
                ..
            } => write!(f, "dict({})[{}]#{}", elem, index_size, dict_id),
            Type::FixedLenArray { elem, len, .. } => write!(f, "array({})[{}]", elem, len),
            Type::VarLenArray { elem, .. } => write!(f, "array({})", elem),
            Type::Column { elem, .. } => write!(f, "column({})", elem),
            Type::ColumnList { elem, length, .. } => write!(f, "column_list({})[{}]", elem, length),
        }
    }
}

/// Invalid dictionary id sentinel.
pub const INVALID_STR_ID: i32 = -1;

/// 8-bit boolean null, distinct from 0/1.
pub const NULL_BOOLEAN: i8 = -1;

/// Smallest signed value of the given byte width; the integer null sentinel.
pub fn inline_int_null_value(size: usize) -> i64 {
    match size {
        1 => i8::MIN as i64,
        2 => i16::MIN as i64,
        4 => i32::MIN as i64,
        8 => i64::MIN,
        _ => panic!("unexpected integer width {size}"),
    }
}

/// The process-wide type interner. Immutable from the caller's point of
/// view: interning an already-known type returns the existing reference.
pub struct TypeContext {
    interned: Mutex<HashSet<&'static Type>>,
}

static GLOBAL_TYPE_CONTEXT: OnceLock<TypeContext> = OnceLock::new();

impl TypeContext {
    pub fn global() -> &'static TypeContext {
        GLOBAL_TYPE_CONTEXT.get_or_init(|| TypeContext {
            interned: Mutex::new(HashSet::new()),
        })
    }

    /// Interns `ty`, leaking at most one allocation per distinct type for
    /// the process lifetime.
    pub fn intern(&self, ty: Type) -> TypeRef {
        let mut interned = self.interned.lock();
        if let Some(existing) = interned.get(&ty) {
            return existing;
        }
        let leaked: &'static Type = Box::leak(Box::new(ty));
        interned.insert(leaked);
        leaked
    }

    pub fn null(&self) -> TypeRef {
        self.intern(Type::Null)
    }

    pub fn boolean(&self, nullable: bool) -> TypeRef {
        self.intern(Type::Boolean { nullable })
    }

    pub fn integer(&self, size: u8, nullable: bool) -> TypeRef {
        assert!(matches!(size, 1 | 2 | 4 | 8), "bad integer width {size}");
        self.intern(Type::Integer { size, nullable })
    }

    pub fn int8(&self, nullable: bool) -> TypeRef {
        self.integer(1, nullable)
    }

    pub fn int16(&self, nullable: bool) -> TypeRef {
        self.integer(2, nullable)
    }

    pub fn int32(&self, nullable: bool) -> TypeRef {
        self.integer(4, nullable)
    }

    pub fn int64(&self, nullable: bool) -> TypeRef {
        self.integer(8, nullable)
    }

    pub fn fp32(&self, nullable: bool) -> TypeRef {
        self.intern(Type::FloatingPoint {
            precision: FpPrecision::Fp32,
            nullable,
        })
    }

    pub fn fp64(&self, nullable: bool) -> TypeRef {
        self.intern(Type::FloatingPoint {
            precision: FpPrecision::Fp64,
            nullable,
        })
    }

    pub fn decimal64(&self, precision: u8, scale: u8, nullable: bool) -> TypeRef {
        assert!(precision <= 19, "decimal precision {precision} out of range");
        assert!(scale <= precision, "decimal scale {scale} > precision");
        self.intern(Type::Decimal64 {
            precision,
            scale,
            nullable,
        })
    }

    pub fn date(&self, unit: TimeUnit, nullable: bool) -> TypeRef {
        self.intern(Type::Date { unit, nullable })
    }

    pub fn time(&self, unit: TimeUnit, nullable: bool) -> TypeRef {
        self.intern(Type::Time { unit, nullable })
    }

    pub fn timestamp(&self, unit: TimeUnit, nullable: bool) -> TypeRef {
        self.intern(Type::Timestamp { unit, nullable })
    }

    pub fn interval(&self, unit: TimeUnit, nullable: bool) -> TypeRef {
        self.intern(Type::Interval { unit, nullable })
    }

    pub fn text(&self, nullable: bool) -> TypeRef {
        self.intern(Type::Text { nullable })
    }

    pub fn ext_dict(&self, elem: TypeRef, dict_id: i32, index_size: u8) -> TypeRef {
        assert!(elem.is_text(), "dictionary element must be text");
        assert!(matches!(index_size, 1 | 2 | 4), "bad index width");
        self.intern(Type::ExtDictionary {
            elem,
            dict_id,
            index_size,
            nullable: elem.nullable(),
        })
    }

    pub fn fixed_len_array(&self, elem: TypeRef, len: usize, nullable: bool) -> TypeRef {
        self.intern(Type::FixedLenArray {
            elem,
            len,
            nullable,
        })
    }

    pub fn varlen_array(&self, elem: TypeRef, nullable: bool) -> TypeRef {
        self.intern(Type::VarLenArray { elem, nullable })
    }

    pub fn column(&self, elem: TypeRef, nullable: bool) -> TypeRef {
        self.intern(Type::Column { elem, nullable })
    }

    pub fn column_list(&self, elem: TypeRef, length: usize, nullable: bool) -> TypeRef {
        self.intern(Type::ColumnList {
            elem,
            length,
            nullable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_pointer_stable() {
        let ctx = TypeContext::global();
        let a = ctx.int64(true);
        let b = ctx.int64(true);
        assert!(std::ptr::eq(a, b));
        assert!(!std::ptr::eq(a, ctx.int64(false)));
    }

    #[test]
    fn with_nullable_round_trips() {
        let ctx = TypeContext::global();
        let t = ctx.int32(false);
        assert!(t.with_nullable(true).nullable());
        assert!(std::ptr::eq(t.with_nullable(true).with_nullable(false), t));
    }

    #[test]
    fn canonicalize_strips_dictionary() {
        let ctx = TypeContext::global();
        let text = ctx.text(true);
        let dict = ctx.ext_dict(text, 7, 4);
        assert!(std::ptr::eq(dict.canonicalize(), text));
        let arr = ctx.varlen_array(dict, true);
        assert!(std::ptr::eq(
            arr.canonicalize(),
            ctx.varlen_array(text, true)
        ));
    }

    #[test]
    fn null_sentinels() {
        let ctx = TypeContext::global();
        assert_eq!(ctx.int16(true).inline_null_value(), i16::MIN as i64);
        assert_eq!(ctx.boolean(true).inline_null_value(), -1);
        assert_eq!(ctx.ext_dict(ctx.text(true), 0, 4).inline_null_value(), -1);
        match ctx.fp64(true).null_sentinel() {
            Datum::Fp(v) => assert!(v.is_nan()),
            other => panic!("expected fp sentinel, got {other:?}"),
        }
    }

    #[test]
    fn sizes() {
        let ctx = TypeContext::global();
        assert_eq!(ctx.int64(true).size(), 8);
        assert_eq!(ctx.boolean(true).size(), 1);
        assert_eq!(ctx.ext_dict(ctx.text(true), 0, 2).size(), 2);
        assert_eq!(ctx.fixed_len_array(ctx.int32(false), 3, true).size(), 12);
    }
}
