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

//! Shared foundations of the Basalt execution core: the interned type
//! system, runtime datums, engine configuration, runtime error codes, and
//! the contracts of the external collaborators (catalog, string
//! dictionaries, device buffers).

pub mod buffer;
pub mod config;
pub mod datum;
pub mod dictionary;
pub mod error;
pub mod schema;
pub mod types;
