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

//! Arrow import shims: columns convert from Arrow's validity-bitmap
//! representation into the flat sentinel-encoded buffers the generated
//! code scans.

pub mod error;
pub mod import;

pub use error::{Result, StorageError};
pub use import::{
    narrow_dict_indices, replace_null_values, FixedColumn, ImportedColumn, VarlenColumn,
};
