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

use thiserror::Error;

/// A specialized Result type for expression operations.
pub type Result<T, E = ExprError> = std::result::Result<T, E>;

/// The error type for expression construction and normalization.
#[derive(Error, Debug)]
pub enum ExprError {
    #[error("Type inference failed: {0}")]
    TypeInference(String),

    #[error("Unsupported cast: {from} to {to}")]
    UnsupportedCast { from: String, to: String },

    #[error("Literal {0} out of range for a {1}-byte integer")]
    LiteralOutOfRange(i64, u8),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Failed to parse '{0}' as a {1} literal")]
    LiteralParse(String, &'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
