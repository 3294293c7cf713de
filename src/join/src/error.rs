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

pub type Result<T, E = JoinError> = std::result::Result<T, E>;

/// The error type for hash-join table construction and probing.
#[derive(Error, Debug)]
pub enum JoinError {
    /// The key range is too wide for a perfect hash layout; the driver may
    /// retry with a different join strategy.
    #[error("Hash tables with more than 2B entries not supported yet")]
    TooManyHashEntries,

    /// A OneToOne build saw a duplicate inner key; retry as OneToMany.
    #[error("Could not build a 1-to-1 correspondence for columns involved in equijoin")]
    OneToOneCollision,

    #[error("Cannot translate null value for IS NOT DISTINCT FROM")]
    UntranslatableNull,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error(transparent)]
    Buffer(#[from] basalt_common::buffer::BufferError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
