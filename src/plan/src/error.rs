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

use basalt_expr::ExprError;

pub type Result<T, E = PlanError> = std::result::Result<T, E>;

/// The error type for plan building and rewriting.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Malformed plan JSON: {0}")]
    MalformedPlan(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
