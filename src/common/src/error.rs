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

//! Runtime error codes and shared error helpers.
//!
//! Generated row functions signal failure by returning one of the negative
//! codes below; `0` is success. The driver materializes the code into a
//! user-facing error.

pub const ERR_DIV_BY_ZERO: i32 = -1;
pub const ERR_OVERFLOW_OR_UNDERFLOW: i32 = -2;
pub const ERR_SINGLE_VALUE_FOUND_MULTIPLE_VALUES: i32 = -3;
pub const ERR_INTERRUPTED: i32 = -4;
pub const ERR_TOO_MANY_LITERALS: i32 = -5;
pub const ERR_WIDTH_BUCKET_INVALID_ARGUMENT: i32 = -6;

/// Stable message for a runtime error code.
pub fn error_message(code: i32) -> &'static str {
    match code {
        ERR_DIV_BY_ZERO => "Division by zero",
        ERR_OVERFLOW_OR_UNDERFLOW => "Overflow or underflow",
        ERR_SINGLE_VALUE_FOUND_MULTIPLE_VALUES => "More than one distinct value for SINGLE_VALUE",
        ERR_INTERRUPTED => "Query execution has been interrupted",
        ERR_TOO_MANY_LITERALS => "Too many literals in the query",
        ERR_WIDTH_BUCKET_INVALID_ARGUMENT => "Arguments to WIDTH_BUCKET must be finite",
        _ => "Unknown error code",
    }
}

/// Early-returns an `Internal` error built from a format string, for use in
/// functions whose error type has a `#[from] anyhow::Error` variant.
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err(::anyhow::anyhow!($($arg)*).into())
    };
}

/// `anyhow::ensure!` counterpart for [`bail!`].
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::bail!($($arg)*);
        }
    };
}
