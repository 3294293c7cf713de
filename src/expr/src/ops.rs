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

//! Operator, aggregate and window-function kinds.

use parse_display::{Display, FromStr};

/// Binary and unary operator kinds.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display(style = "UPPERCASE")]
pub enum OpType {
    Eq,
    /// `IS NOT DISTINCT FROM`: equality where NULL matches NULL.
    BwEq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Not,
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    UMinus,
    IsNull,
    Cast,
    ArrayAt,
    Unnest,
    BwNot,
    /// Dispatched to a registered extension function by name.
    Function,
    In,
}

impl OpType {
    /// Maps the serialized operator spelling used by the plan JSON.
    pub fn from_sql_name(name: &str) -> Option<OpType> {
        Some(match name {
            ">" => OpType::Gt,
            ">=" => OpType::Ge,
            "<" => OpType::Lt,
            "<=" => OpType::Le,
            "=" => OpType::Eq,
            "<>" => OpType::Ne,
            "IS NOT DISTINCT FROM" => OpType::BwEq,
            "+" => OpType::Plus,
            "-" => OpType::Minus,
            "*" => OpType::Mul,
            "/" => OpType::Div,
            "MOD" => OpType::Mod,
            "AND" => OpType::And,
            "OR" => OpType::Or,
            "CAST" => OpType::Cast,
            "NOT" => OpType::Not,
            "IS NULL" => OpType::IsNull,
            "PG_UNNEST" => OpType::Unnest,
            "IN" => OpType::In,
            _ => return None,
        })
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            OpType::Eq | OpType::BwEq | OpType::Ne | OpType::Lt | OpType::Gt | OpType::Le | OpType::Ge
        )
    }

    pub fn is_equivalence(self) -> bool {
        matches!(self, OpType::Eq | OpType::BwEq)
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            OpType::Plus | OpType::Minus | OpType::Mul | OpType::Div | OpType::Mod
        )
    }

    pub fn is_logic(self) -> bool {
        matches!(self, OpType::And | OpType::Or)
    }

    /// The operator with its operand order swapped, when one exists.
    pub fn swapped(self) -> Option<OpType> {
        Some(match self {
            OpType::Eq => OpType::Eq,
            OpType::BwEq => OpType::BwEq,
            OpType::Ne => OpType::Ne,
            OpType::Lt => OpType::Gt,
            OpType::Gt => OpType::Lt,
            OpType::Le => OpType::Ge,
            OpType::Ge => OpType::Le,
            _ => return None,
        })
    }
}

/// Comparison qualifier: plain, `ANY` or `ALL` over an array operand.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display(style = "UPPERCASE")]
pub enum Qualifier {
    One,
    Any,
    All,
}

/// Aggregate function kinds.
#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq, Hash)]
#[display(style = "snake_case")]
pub enum AggType {
    Count,
    Min,
    Max,
    Sum,
    Avg,
    /// Errors out when the group sees a second distinct value.
    SingleValue,
    /// First non-null value wins.
    Sample,
    ApproxCountDistinct,
    ApproxQuantile,
    Quantile,
    TopK,
}

impl AggType {
    /// Maps the serialized aggregate name used by the plan JSON.
    pub fn from_agg_name(name: &str) -> Option<AggType> {
        Some(match name {
            "COUNT" => AggType::Count,
            "MIN" => AggType::Min,
            "MAX" => AggType::Max,
            "SUM" => AggType::Sum,
            "AVG" => AggType::Avg,
            "SINGLE_VALUE" => AggType::SingleValue,
            "ANY_VALUE" | "SAMPLE" | "LAST_SAMPLE" => AggType::Sample,
            "APPROX_COUNT_DISTINCT" => AggType::ApproxCountDistinct,
            "APPROX_MEDIAN" | "APPROX_PERCENTILE" | "APPROX_QUANTILE" => AggType::ApproxQuantile,
            "QUANTILE" => AggType::Quantile,
            "TOP_K" => AggType::TopK,
            _ => return None,
        })
    }
}

/// Window function kinds.
#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq, Hash)]
#[display(style = "snake_case")]
pub enum WindowFuncKind {
    RowNumber,
    Rank,
    DenseRank,
    PercentRank,
    CumeDist,
    NTile,
    Lag,
    Lead,
    FirstValue,
    LastValue,
    Avg,
    Min,
    Max,
    Sum,
    Count,
    /// Internal SUM without the SQL NULL-if-empty semantics; backs AVG.
    SumInternal,
}

impl WindowFuncKind {
    pub fn from_window_name(name: &str) -> Option<WindowFuncKind> {
        Some(match name {
            "ROW_NUMBER" => WindowFuncKind::RowNumber,
            "RANK" => WindowFuncKind::Rank,
            "DENSE_RANK" => WindowFuncKind::DenseRank,
            "PERCENT_RANK" => WindowFuncKind::PercentRank,
            "CUME_DIST" => WindowFuncKind::CumeDist,
            "NTILE" => WindowFuncKind::NTile,
            "LAG" => WindowFuncKind::Lag,
            "LEAD" => WindowFuncKind::Lead,
            "FIRST_VALUE" => WindowFuncKind::FirstValue,
            "LAST_VALUE" => WindowFuncKind::LastValue,
            "AVG" => WindowFuncKind::Avg,
            "MIN" => WindowFuncKind::Min,
            "MAX" => WindowFuncKind::Max,
            "SUM" => WindowFuncKind::Sum,
            "COUNT" => WindowFuncKind::Count,
            "$SUM0" => WindowFuncKind::SumInternal,
            _ => return None,
        })
    }

    /// Ranking functions computed from the row position alone.
    pub fn is_rank(self) -> bool {
        matches!(
            self,
            WindowFuncKind::RowNumber
                | WindowFuncKind::Rank
                | WindowFuncKind::DenseRank
                | WindowFuncKind::NTile
        )
    }

    /// Value functions reading from a precomputed partition array.
    pub fn is_value(self) -> bool {
        matches!(
            self,
            WindowFuncKind::Lag
                | WindowFuncKind::Lead
                | WindowFuncKind::FirstValue
                | WindowFuncKind::LastValue
        )
    }

    /// Aggregate window functions with a running accumulator.
    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            WindowFuncKind::Avg
                | WindowFuncKind::Min
                | WindowFuncKind::Max
                | WindowFuncKind::Sum
                | WindowFuncKind::Count
                | WindowFuncKind::SumInternal
        )
    }
}

/// Fields for EXTRACT / DATE_PART.
#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq, Hash)]
#[display(style = "snake_case")]
pub enum ExtractField {
    Year,
    Quarter,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Milli,
    Micro,
    Nano,
    DayOfWeek,
    IsoDayOfWeek,
    DayOfYear,
    Epoch,
    QuarterDay,
    Week,
    WeekSunday,
    WeekSaturday,
    DateEpoch,
}

/// Units for DATE_ADD / TIMESTAMPADD.
#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq, Hash)]
#[display(style = "snake_case")]
pub enum DateAddField {
    Year,
    Quarter,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millennium,
    Century,
    Decade,
    Milli,
    Micro,
    Nano,
    Week,
}

/// Truncation targets for DATE_TRUNC, also used by DATEDIFF.
#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq, Hash)]
#[display(style = "snake_case")]
pub enum DateTruncField {
    Year,
    Quarter,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millennium,
    Century,
    Decade,
    Milli,
    Micro,
    Nano,
    Week,
    WeekSunday,
    WeekSaturday,
    QuarterDay,
}
