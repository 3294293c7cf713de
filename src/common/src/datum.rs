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

//! Tagged runtime scalar values.

use std::fmt;

// Datums are copied around in literal rows and hoisting maps; keep the
// enum from growing past its current footprint.
static_assertions::const_assert!(std::mem::size_of::<Datum>() <= 32);

/// A scalar runtime value, as carried by constants and literal plan rows.
///
/// Integer-like types (integers, booleans, decimals, datetimes, dictionary
/// ids) all use the `Int` representation; the owning expression's type gives
/// the value its meaning.
#[derive(Debug, Clone)]
pub enum Datum {
    Null,
    Int(i64),
    Fp(f64),
    Bool(bool),
    Str(Box<str>),
    Array(Vec<Datum>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Datum::Int(v) => Some(*v),
            Datum::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_fp(&self) -> Option<f64> {
        match self {
            Datum::Fp(v) => Some(*v),
            Datum::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Bool(b) => Some(*b),
            Datum::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Datum::Null, Datum::Null) => true,
            (Datum::Int(a), Datum::Int(b)) => a == b,
            // NaN-insensitive so hoisted-literal dedup can key on datums.
            (Datum::Fp(a), Datum::Fp(b)) => a.to_bits() == b.to_bits(),
            (Datum::Bool(a), Datum::Bool(b)) => a == b,
            (Datum::Str(a), Datum::Str(b)) => a == b,
            (Datum::Array(a), Datum::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Datum {}

impl std::hash::Hash for Datum {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Datum::Null => {}
            Datum::Int(v) => v.hash(state),
            Datum::Fp(v) => v.to_bits().hash(state),
            Datum::Bool(b) => b.hash(state),
            Datum::Str(s) => s.hash(state),
            Datum::Array(items) => items.hash(state),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Int(v) => write!(f, "{v}"),
            Datum::Fp(v) => write!(f, "{v}"),
            Datum::Bool(b) => write!(f, "{b}"),
            Datum::Str(s) => write!(f, "'{s}'"),
            Datum::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}
