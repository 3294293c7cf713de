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

pub type Result<T, E = CodegenError> = std::result::Result<T, E>;

/// The error type for query compilation.
#[derive(Error, Debug)]
pub enum CodegenError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Too many literals in the query")]
    TooManyLiterals,

    #[error("Not supported: {0}")]
    NotSupported(String),

    /// A negative error code surfaced from a generated row function.
    #[error("{message} (error code {code})")]
    Runtime { code: i32, message: String },

    #[error(transparent)]
    Expr(#[from] basalt_expr::ExprError),

    #[error(transparent)]
    Plan(#[from] basalt_plan::PlanError),

    #[error(transparent)]
    Join(#[from] basalt_join::JoinError),

    #[error(transparent)]
    Interp(#[from] basalt_llir::InterpError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
