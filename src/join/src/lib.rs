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

//! Perfect hash-join tables: one-to-one and one-to-many layouts keyed on
//! integer and dictionary-encoded columns, with a process-wide recycler
//! and probe IR emission for the code generator.

pub mod builder;
pub mod cache;
pub mod error;
pub mod hash_table;
pub mod probe;
pub mod runtime;

pub use basalt_common::types::INVALID_STR_ID;
pub use builder::{
    build_dictionary_translation_map, build_perfect_hash_table, bucket_normalization,
    hash_entry_count, HashTableBuildSpec, KeyRange, SECONDS_PER_DAY,
};
pub use cache::{HashTableCacheKey, HashtableRecycler};
pub use error::{JoinError, Result};
pub use hash_table::{HashTableLayout, PerfectHashTable, INVALID_SLOT_VAL};
pub use probe::{
    check_self_join_covered, register_runtime, HashJoinMatchingSet, PerfectJoinProbe,
};
pub use runtime::{JoinColumn, JoinColumnTypeInfo};
