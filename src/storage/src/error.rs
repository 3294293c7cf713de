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

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// The error type for Arrow import.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Unsupported column type: {0}")]
    UnsupportedType(String),

    #[error("Arrow array does not match the declared {0} layout")]
    TypeMismatch(&'static str),

    #[error(transparent)]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
