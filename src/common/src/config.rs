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

//! Engine configuration. Constructed by the driver (deserialized from its
//! config file or built with `Default`) and passed by reference into every
//! executor.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exec: ExecConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub codegen: CodegenConfig,
    pub group_by: GroupByConfig,
    pub join: JoinConfig,
    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
    /// Load constants from the query literal buffer instead of inlining.
    pub hoist_literals: bool,
    /// Integer/decimal division by zero yields NULL instead of an error.
    pub null_div_by_zero: bool,
    /// Floating-point division by zero yields +/-inf instead of an error.
    pub inf_div_by_zero: bool,
    /// IN lists longer than this compile to a bitmap probe rather than a
    /// chained OR.
    pub in_values_bitmap_threshold: usize,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        CodegenConfig {
            hoist_literals: true,
            null_div_by_zero: false,
            inf_div_by_zero: false,
            in_values_bitmap_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GroupByConfig {
    /// COUNT slots are 64-bit; otherwise 32-bit.
    pub bigint_count: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for GroupByConfig {
    fn default() -> Self {
        GroupByConfig {
            bigint_count: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    /// Entry count above which the sparse-table load check kicks in.
    pub huge_join_hash_threshold: usize,
    /// Minimum percent load of a huge perfect hash table; sparser inner
    /// tables are rejected.
    pub huge_join_hash_min_load: usize,
}

impl Default for JoinConfig {
    fn default() -> Self {
        JoinConfig {
            huge_join_hash_threshold: 1_000_000_000,
            huge_join_hash_min_load: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Poll the per-query interrupt flag at fragment boundaries.
    pub enable: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig { enable: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Total byte budget of the process-wide hash table recycler.
    pub max_hashtable_cache_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_hashtable_cache_bytes: 4 << 30,
        }
    }
}

/// Resolved divide-by-zero behavior for one division site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivByZeroPolicy {
    /// Row function returns `ERR_DIV_BY_ZERO`.
    Error,
    /// Result is the null sentinel.
    Null,
    /// Result is +/-inf; floating point only.
    Inf,
}

impl CodegenConfig {
    /// Resolves the two overlapping flags into one policy. When both are
    /// set, floating-point division gets `Inf` and exact division `Null`.
    pub fn div_by_zero_policy(&self, is_fp: bool) -> DivByZeroPolicy {
        match (self.null_div_by_zero, self.inf_div_by_zero) {
            (false, false) => DivByZeroPolicy::Error,
            (true, false) => DivByZeroPolicy::Null,
            (false, true) => {
                if is_fp {
                    DivByZeroPolicy::Inf
                } else {
                    DivByZeroPolicy::Error
                }
            }
            (true, true) => {
                if is_fp {
                    DivByZeroPolicy::Inf
                } else {
                    DivByZeroPolicy::Null
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn div_by_zero_tie_break() {
        let mut cfg = CodegenConfig::default();
        assert_eq!(cfg.div_by_zero_policy(true), DivByZeroPolicy::Error);
        cfg.null_div_by_zero = true;
        cfg.inf_div_by_zero = true;
        assert_eq!(cfg.div_by_zero_policy(true), DivByZeroPolicy::Inf);
        assert_eq!(cfg.div_by_zero_policy(false), DivByZeroPolicy::Null);
    }

    #[test]
    fn deserializes_partial_config() {
        let cfg: Config =
            serde_json::from_str(r#"{"exec": {"group_by": {"bigint_count": true}}}"#).unwrap();
        assert!(cfg.exec.group_by.bigint_count);
        assert!(cfg.exec.codegen.hoist_literals);
    }
}
