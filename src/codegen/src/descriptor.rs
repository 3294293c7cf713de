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

//! Result buffer layout.
//!
//! Rows are laid out row-major: group-by key slots first, then one or two
//! slots per target. Every slot is padded to 8 bytes, which also leaves
//! room for the row-id a lazily fetched column stores instead of a value.

use basalt_common::config::Config;
use basalt_common::types::TypeRef;
use basalt_expr::expr::{AggExpr, Constant};
use basalt_expr::ops::AggType;
use basalt_expr::ExprRef;

use crate::error::{CodegenError, Result};

/// How one output slot is updated and finalized.
#[derive(Debug, Clone)]
pub enum TargetKind {
    /// Plain projected value.
    Projected,
    Count {
        /// `COUNT(expr)` counts non-null inputs; `COUNT(*)` has no arg.
        arg: Option<ExprRef>,
        distinct: bool,
        big: bool,
    },
    Sum {
        arg: ExprRef,
    },
    Min {
        arg: ExprRef,
    },
    Max {
        arg: ExprRef,
    },
    Avg {
        arg: ExprRef,
    },
    SingleValue {
        arg: ExprRef,
    },
    Sample {
        arg: ExprRef,
    },
    ApproxCountDistinct {
        arg: ExprRef,
        bits: u8,
    },
    ApproxQuantile {
        arg: ExprRef,
        fraction: f64,
    },
}

#[derive(Debug, Clone)]
pub struct TargetSlot {
    pub name: String,
    pub ty: TypeRef,
    pub kind: TargetKind,
    /// Primary slot index, after the group keys.
    pub slot: usize,
    /// The parallel COUNT slot of an AVG.
    pub count_slot: Option<usize>,
    /// The projected expression for `Projected` targets.
    pub expr: Option<ExprRef>,
}

#[derive(Debug, Clone)]
pub struct QueryMemoryDescriptor {
    pub group_key_types: Vec<TypeRef>,
    pub targets: Vec<TargetSlot>,
    pub slot_count: usize,
    /// Group buffer entries (power of two); 1 for global aggregates.
    pub entry_count: usize,
    pub is_projection: bool,
}

impl QueryMemoryDescriptor {
    /// Builds the layout for an aggregation over `group_key_types` with
    /// the given target expressions.
    pub fn for_aggregate(
        group_key_types: Vec<TypeRef>,
        aggs: &[(String, ExprRef)],
        config: &Config,
        entry_count: usize,
    ) -> Result<QueryMemoryDescriptor> {
        let mut targets = Vec::new();
        let mut slot = 0usize;
        for (name, expr) in aggs {
            let agg = expr
                .as_ref()
                .as_agg()
                .ok_or_else(|| CodegenError::NotSupported("non-aggregate target".into()))?;
            let (kind, extra) = classify_agg(agg, config)?;
            targets.push(TargetSlot {
                name: name.clone(),
                ty: agg.ty,
                kind,
                slot,
                count_slot: extra.then_some(slot + 1),
                expr: None,
            });
            slot += 1 + extra as usize;
        }
        Ok(QueryMemoryDescriptor {
            group_key_types,
            targets,
            slot_count: slot,
            entry_count,
            is_projection: false,
        })
    }

    /// Builds the layout for a projection.
    pub fn for_projection(
        targets: &[(String, ExprRef)],
        entry_count: usize,
    ) -> QueryMemoryDescriptor {
        let slots = targets
            .iter()
            .enumerate()
            .map(|(i, (name, expr))| TargetSlot {
                name: name.clone(),
                ty: expr.ty(),
                kind: TargetKind::Projected,
                slot: i,
                count_slot: None,
                expr: Some(expr.clone()),
            })
            .collect::<Vec<_>>();
        QueryMemoryDescriptor {
            group_key_types: Vec::new(),
            targets: slots,
            slot_count: targets.len(),
            entry_count,
            is_projection: true,
        }
    }

    /// Quads (8-byte cells) per row: keys then slots.
    pub fn row_quads(&self) -> usize {
        self.group_key_types.len() + self.slot_count
    }

    pub fn row_bytes(&self) -> usize {
        self.row_quads() * 8
    }

    /// The initial value of each slot, used to fill the buffer before the
    /// kernel runs.
    pub fn slot_init_values(&self) -> Vec<i64> {
        let mut init = vec![0i64; self.slot_count];
        for target in &self.targets {
            match &target.kind {
                TargetKind::Count { .. }
                | TargetKind::ApproxCountDistinct { .. }
                | TargetKind::ApproxQuantile { .. } => init[target.slot] = 0,
                TargetKind::Sum { arg } | TargetKind::Avg { arg } => {
                    init[target.slot] = slot_sentinel(arg.ty());
                    if let Some(count_slot) = target.count_slot {
                        init[count_slot] = 0;
                    }
                    // a non-nullable sum accumulates from zero
                    if !arg.ty().nullable() {
                        init[target.slot] = 0;
                    }
                }
                TargetKind::Min { arg }
                | TargetKind::Max { arg }
                | TargetKind::SingleValue { arg }
                | TargetKind::Sample { arg } => {
                    init[target.slot] = slot_sentinel(arg.ty());
                }
                TargetKind::Projected => init[target.slot] = 0,
            }
        }
        init
    }
}

/// The slot-level sentinel: NaN bits for fp accumulators, the type's
/// integer sentinel otherwise.
pub fn slot_sentinel(ty: TypeRef) -> i64 {
    if ty.is_fp() {
        f64::NAN.to_bits() as i64
    } else {
        ty.inline_null_value()
    }
}

fn classify_agg(agg: &AggExpr, config: &Config) -> Result<(TargetKind, bool)> {
    let arg = agg.arg.clone();
    let kind = match agg.kind {
        AggType::Count => TargetKind::Count {
            arg,
            distinct: agg.is_distinct,
            big: config.exec.group_by.bigint_count,
        },
        AggType::Sum => TargetKind::Sum {
            arg: required_arg(arg, "SUM")?,
        },
        AggType::Min => TargetKind::Min {
            arg: required_arg(arg, "MIN")?,
        },
        AggType::Max => TargetKind::Max {
            arg: required_arg(arg, "MAX")?,
        },
        AggType::Avg => {
            return Ok((
                TargetKind::Avg {
                    arg: required_arg(arg, "AVG")?,
                },
                true,
            ))
        }
        AggType::SingleValue => TargetKind::SingleValue {
            arg: required_arg(arg, "SINGLE_VALUE")?,
        },
        AggType::Sample => TargetKind::Sample {
            arg: required_arg(arg, "SAMPLE")?,
        },
        AggType::ApproxCountDistinct => {
            let bits = direct_arg_int(&agg.arg1).unwrap_or(11).clamp(1, 100) as u8;
            TargetKind::ApproxCountDistinct {
                arg: required_arg(arg, "APPROX_COUNT_DISTINCT")?,
                bits,
            }
        }
        AggType::ApproxQuantile => {
            let fraction = direct_arg_fp(&agg.arg1).unwrap_or(0.5);
            TargetKind::ApproxQuantile {
                arg: required_arg(arg, "APPROX_QUANTILE")?,
                fraction,
            }
        }
        AggType::Quantile | AggType::TopK => {
            return Err(CodegenError::NotSupported(format!(
                "aggregate {}",
                agg.kind
            )))
        }
    };
    Ok((kind, false))
}

fn required_arg(arg: Option<ExprRef>, what: &str) -> Result<ExprRef> {
    arg.ok_or_else(|| CodegenError::NotSupported(format!("{what} without an argument")))
}

fn direct_arg_int(arg1: &Option<Constant>) -> Option<i64> {
    arg1.as_ref().and_then(|c| c.value.as_int())
}

fn direct_arg_fp(arg1: &Option<Constant>) -> Option<f64> {
    arg1.as_ref().and_then(|c| c.value.as_fp())
}
