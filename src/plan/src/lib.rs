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

//! Relational algebra DAG: node definitions, the JSON plan builder and the
//! rewrite pipeline.

pub mod builder;
pub mod error;
pub mod node;
pub mod passes;

pub use builder::{build_dag, QueryDag};
pub use error::{PlanError, Result};
pub use node::{
    column_refs_for, dag_hash, explain, Aggregate, Filter, Join, JoinType, LogicalUnion,
    LogicalValues, NodePtr, Project, RelAlgNode, Scan, Sort,
};
