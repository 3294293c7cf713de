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

//! The typed, immutable expression IR: node definitions, visitors,
//! rewriters and SQL normalization.

pub mod analyzer;
pub mod error;
pub mod expr;
pub mod ops;
pub mod rewriter;
pub mod visitor;

pub use error::{ExprError, Result};
pub use expr::{Expr, ExprRef, NodeId, OrderEntry, WhichRow};
pub use ops::{AggType, OpType, Qualifier, WindowFuncKind};
pub use rewriter::ExprRewriter;
pub use visitor::ExprVisitor;
