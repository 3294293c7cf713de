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

//! Window function evaluation context.
//!
//! Ordering and partition boundaries are precomputed into auxiliary
//! arrays before the kernel runs: a sorted permutation, a partition-start
//! bitset, and one dense output column per window function. The row
//! function then loads window results like any other column.

use fixedbitset::FixedBitSet;

use basalt_common::datum::Datum;
use basalt_expr::expr::{OrderEntry, WindowFunction};
use basalt_expr::ops::WindowFuncKind;
use basalt_expr::NodeId;

use crate::error::{CodegenError, Result};

/// One window function scheduled for precomputation, with its output
/// bound to a column slot of the fragment.
#[derive(Debug, Clone)]
pub struct WindowDesc {
    pub func: WindowFunction,
    pub pseudo_node: NodeId,
    pub slot: usize,
}

fn datum_cmp(a: &Datum, b: &Datum) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Datum::Null, Datum::Null) => Ordering::Equal,
        (Datum::Int(x), Datum::Int(y)) => x.cmp(y),
        (Datum::Fp(x), Datum::Fp(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Datum::Int(x), Datum::Fp(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Datum::Fp(x), Datum::Int(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Datum::Bool(x), Datum::Bool(y)) => x.cmp(y),
        (Datum::Str(x), Datum::Str(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Sorts row ids by partition keys, then by the order keys under their
/// collation. Returns the permutation and the partition-start bitset over
/// sorted positions.
pub fn sort_and_partition(
    num_rows: usize,
    partition_keys: &[Vec<Datum>],
    order_keys: &[Vec<Datum>],
    collation: &[OrderEntry],
) -> (Vec<usize>, FixedBitSet) {
    use std::cmp::Ordering;
    let mut sorted: Vec<usize> = (0..num_rows).collect();
    let cmp_rows = |a: &usize, b: &usize| -> Ordering {
        for key in partition_keys {
            let ord = datum_cmp(&key[*a], &key[*b]);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        for entry in collation {
            let key = &order_keys[entry.field];
            let (x, y) = (&key[*a], &key[*b]);
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => {
                    if entry.nulls_first {
                        Ordering::Less
                    } else {
                        Ordering::Greater
                    }
                }
                (false, true) => {
                    if entry.nulls_first {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    }
                }
                (false, false) => {
                    let ord = datum_cmp(x, y);
                    if entry.is_desc {
                        ord.reverse()
                    } else {
                        ord
                    }
                }
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    };
    sorted.sort_by(cmp_rows);
    let mut partition_starts = FixedBitSet::with_capacity(num_rows.max(1));
    if num_rows > 0 {
        partition_starts.insert(0);
    }
    for i in 1..num_rows {
        let different = partition_keys
            .iter()
            .any(|key| datum_cmp(&key[sorted[i - 1]], &key[sorted[i]]) != std::cmp::Ordering::Equal);
        if different {
            partition_starts.insert(i);
        }
    }
    (sorted, partition_starts)
}

fn peer_with_prev(
    sorted: &[usize],
    order_keys: &[Vec<Datum>],
    collation: &[OrderEntry],
    pos: usize,
) -> bool {
    collation.iter().all(|entry| {
        let key = &order_keys[entry.field];
        let (a, b) = (&key[sorted[pos - 1]], &key[sorted[pos]]);
        match (a.is_null(), b.is_null()) {
            (true, true) => true,
            (false, false) => datum_cmp(a, b) == std::cmp::Ordering::Equal,
            _ => false,
        }
    })
}

/// Ranking functions driven by the sorted position alone.
pub fn row_number_window_func(
    kind: WindowFuncKind,
    sorted: &[usize],
    partition_starts: &FixedBitSet,
    order_keys: &[Vec<Datum>],
    collation: &[OrderEntry],
    ntile_buckets: Option<i64>,
) -> Vec<i64> {
    let n = sorted.len();
    let mut out = vec![0i64; n];
    let mut partition_start = 0usize;
    let mut partition_len = 0usize;
    let mut rank = 0i64;
    let mut dense = 0i64;
    for pos in 0..n {
        if partition_starts.contains(pos) {
            partition_start = pos;
            partition_len = (pos + 1..n)
                .take_while(|p| !partition_starts.contains(*p))
                .count()
                + 1;
            rank = 0;
            dense = 0;
        }
        let in_partition = (pos - partition_start) as i64;
        let new_peer_group =
            pos == partition_start || !peer_with_prev(sorted, order_keys, collation, pos);
        if new_peer_group {
            rank = in_partition + 1;
            dense += 1;
        }
        out[sorted[pos]] = match kind {
            WindowFuncKind::RowNumber => in_partition + 1,
            WindowFuncKind::Rank => rank,
            WindowFuncKind::DenseRank => dense,
            WindowFuncKind::NTile => {
                let buckets = ntile_buckets.unwrap_or(1).max(1);
                in_partition * buckets / partition_len as i64 + 1
            }
            _ => unreachable!("not a ranking function"),
        };
    }
    out
}

/// PERCENT_RANK and CUME_DIST.
pub fn percent_window_func(
    kind: WindowFuncKind,
    sorted: &[usize],
    partition_starts: &FixedBitSet,
    order_keys: &[Vec<Datum>],
    collation: &[OrderEntry],
) -> Vec<f64> {
    let n = sorted.len();
    let ranks = row_number_window_func(
        WindowFuncKind::Rank,
        sorted,
        partition_starts,
        order_keys,
        collation,
        None,
    );
    let mut out = vec![0f64; n];
    let mut partition_start = 0usize;
    let mut partition_len = 0usize;
    for pos in 0..n {
        if partition_starts.contains(pos) {
            partition_start = pos;
            partition_len = (pos + 1..n)
                .take_while(|p| !partition_starts.contains(*p))
                .count()
                + 1;
        }
        let row = sorted[pos];
        match kind {
            WindowFuncKind::PercentRank => {
                out[row] = if partition_len <= 1 {
                    0.0
                } else {
                    (ranks[row] - 1) as f64 / (partition_len - 1) as f64
                };
            }
            WindowFuncKind::CumeDist => {
                // count of rows peer-with or before this one
                let mut peers_end = pos + 1;
                while peers_end < partition_start + partition_len
                    && peer_with_prev(sorted, order_keys, collation, peers_end)
                {
                    peers_end += 1;
                }
                out[row] = (peers_end - partition_start) as f64 / partition_len as f64;
            }
            _ => unreachable!("not a percent function"),
        }
    }
    out
}

/// Computes one window function into a dense per-row output column.
pub fn compute_window_output(
    func: &WindowFunction,
    args: &[Vec<Datum>],
    partition_keys: &[Vec<Datum>],
    order_keys: &[Vec<Datum>],
    num_rows: usize,
) -> Result<Vec<Datum>> {
    let (sorted, partition_starts) =
        sort_and_partition(num_rows, partition_keys, order_keys, &func.collation);
    let kind = func.kind;
    if kind.is_rank() {
        let buckets = args
            .first()
            .and_then(|a| a.first())
            .and_then(|d| d.as_int());
        let out = row_number_window_func(
            kind,
            &sorted,
            &partition_starts,
            order_keys,
            &func.collation,
            buckets,
        );
        return Ok(out.into_iter().map(Datum::Int).collect());
    }
    if matches!(kind, WindowFuncKind::PercentRank | WindowFuncKind::CumeDist) {
        let out = percent_window_func(kind, &sorted, &partition_starts, order_keys, &func.collation);
        return Ok(out.into_iter().map(Datum::Fp).collect());
    }
    if kind.is_value() {
        return compute_value_function(kind, args, &sorted, &partition_starts, num_rows);
    }
    if kind.is_aggregate() {
        return compute_window_aggregate(
            kind,
            args,
            &sorted,
            &partition_starts,
            order_keys,
            &func.collation,
            num_rows,
        );
    }
    Err(CodegenError::NotSupported(format!(
        "window function {kind}"
    )))
}

/// LAG/LEAD/FIRST_VALUE/LAST_VALUE read from the precomputed order.
fn compute_value_function(
    kind: WindowFuncKind,
    args: &[Vec<Datum>],
    sorted: &[usize],
    partition_starts: &FixedBitSet,
    num_rows: usize,
) -> Result<Vec<Datum>> {
    let values = args
        .first()
        .ok_or_else(|| CodegenError::NotSupported("value window function without args".into()))?;
    let offset = args
        .get(1)
        .and_then(|a| a.first())
        .and_then(|d| d.as_int())
        .unwrap_or(1);
    let mut out = vec![Datum::Null; num_rows];
    let mut partition_start = 0usize;
    let mut partition_len = 0usize;
    for pos in 0..num_rows {
        if partition_starts.contains(pos) {
            partition_start = pos;
            partition_len = (pos + 1..num_rows)
                .take_while(|p| !partition_starts.contains(*p))
                .count()
                + 1;
        }
        let row = sorted[pos];
        let source_pos: Option<usize> = match kind {
            WindowFuncKind::Lag => pos
                .checked_sub(offset as usize)
                .filter(|p| *p >= partition_start),
            WindowFuncKind::Lead => {
                let p = pos + offset as usize;
                (p < partition_start + partition_len).then_some(p)
            }
            WindowFuncKind::FirstValue => Some(partition_start),
            WindowFuncKind::LastValue => Some(partition_start + partition_len - 1),
            _ => unreachable!("not a value function"),
        };
        out[row] = match source_pos {
            Some(p) => values[sorted[p]].clone(),
            None => Datum::Null,
        };
    }
    Ok(out)
}

/// Aggregate window functions: a one-slot accumulator reset at every
/// partition boundary; with an ORDER BY the result is the running value
/// through the current peer group, otherwise the whole partition.
fn compute_window_aggregate(
    kind: WindowFuncKind,
    args: &[Vec<Datum>],
    sorted: &[usize],
    partition_starts: &FixedBitSet,
    order_keys: &[Vec<Datum>],
    collation: &[OrderEntry],
    num_rows: usize,
) -> Result<Vec<Datum>> {
    let values = (kind != WindowFuncKind::Count)
        .then(|| {
            args.first().ok_or_else(|| {
                CodegenError::NotSupported("aggregate window function without args".into())
            })
        })
        .transpose()?;
    let whole_partition = collation.is_empty();
    let mut out = vec![Datum::Null; num_rows];
    let mut pos = 0usize;
    while pos < num_rows {
        // one partition
        let start = pos;
        let mut end = pos + 1;
        while end < num_rows && !partition_starts.contains(end) {
            end += 1;
        }
        // AVG keeps a parallel count next to the running sum
        let mut sum = 0f64;
        let mut int_sum = 0i64;
        let mut count = 0i64;
        let mut min: Option<Datum> = None;
        let mut max: Option<Datum> = None;
        let mut cursor = start;
        while cursor < end {
            // advance through the whole peer group before emitting
            let mut peer_end = cursor + 1;
            while peer_end < end
                && !whole_partition
                && peer_with_prev(sorted, order_keys, collation, peer_end)
            {
                peer_end += 1;
            }
            let group_end = if whole_partition { end } else { peer_end };
            for p in cursor..group_end {
                let row = sorted[p];
                match values {
                    None => count += 1,
                    Some(column) => {
                        let v = &column[row];
                        if v.is_null() {
                            continue;
                        }
                        count += 1;
                        if let Some(i) = v.as_int() {
                            int_sum = int_sum.wrapping_add(i);
                        }
                        sum += v.as_fp().unwrap_or(0.0);
                        let better_min =
                            min.as_ref().map_or(true, |m| datum_cmp(v, m) == std::cmp::Ordering::Less);
                        if better_min {
                            min = Some(v.clone());
                        }
                        let better_max =
                            max.as_ref().map_or(true, |m| datum_cmp(v, m) == std::cmp::Ordering::Greater);
                        if better_max {
                            max = Some(v.clone());
                        }
                    }
                }
            }
            let emit_range = if whole_partition {
                start..end
            } else {
                cursor..group_end
            };
            for p in emit_range {
                let row = sorted[p];
                out[row] = match kind {
                    WindowFuncKind::Count => Datum::Int(count),
                    WindowFuncKind::Sum | WindowFuncKind::SumInternal => {
                        if count == 0 {
                            Datum::Null
                        } else if values
                            .map(|c| c.iter().any(|d| matches!(d, Datum::Fp(_))))
                            .unwrap_or(false)
                        {
                            Datum::Fp(sum)
                        } else {
                            Datum::Int(int_sum)
                        }
                    }
                    WindowFuncKind::Avg => {
                        if count == 0 {
                            Datum::Null
                        } else {
                            Datum::Fp(sum / count as f64)
                        }
                    }
                    WindowFuncKind::Min => min.clone().unwrap_or(Datum::Null),
                    WindowFuncKind::Max => max.clone().unwrap_or(Datum::Null),
                    _ => unreachable!("not an aggregate window function"),
                };
            }
            if whole_partition {
                break;
            }
            cursor = group_end;
        }
        pos = end;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_common::types::TypeContext;

    fn window(kind: WindowFuncKind, collation: Vec<OrderEntry>) -> WindowFunction {
        WindowFunction {
            ty: TypeContext::global().int64(false),
            kind,
            args: Vec::new(),
            partition_keys: Vec::new(),
            order_keys: Vec::new(),
            collation,
        }
    }

    fn asc(field: usize) -> OrderEntry {
        OrderEntry {
            field,
            is_desc: false,
            nulls_first: false,
        }
    }

    #[test]
    fn row_number_restarts_at_partition_boundaries() {
        // p = [1, 1, 2, 2, 2], q = [3, 1, 9, 7, 8]
        let p: Vec<Datum> = [1, 1, 2, 2, 2].iter().map(|v| Datum::Int(*v)).collect();
        let q: Vec<Datum> = [3, 1, 9, 7, 8].iter().map(|v| Datum::Int(*v)).collect();
        let func = window(WindowFuncKind::RowNumber, vec![asc(0)]);
        let out = compute_window_output(&func, &[], &[p], &[q], 5).unwrap();
        let ints: Vec<i64> = out.iter().map(|d| d.as_int().unwrap()).collect();
        // partition 1 sorted by q: row1(q=1)->1, row0(q=3)->2
        // partition 2 sorted by q: row3(q=7)->1, row4(q=8)->2, row2(q=9)->3
        assert_eq!(ints, vec![2, 1, 3, 1, 2]);
    }

    #[test]
    fn lag_is_null_at_partition_start() {
        let p: Vec<Datum> = [1, 1, 2].iter().map(|v| Datum::Int(*v)).collect();
        let q: Vec<Datum> = [1, 2, 1].iter().map(|v| Datum::Int(*v)).collect();
        let x: Vec<Datum> = [10, 20, 30].iter().map(|v| Datum::Int(*v)).collect();
        let mut func = window(WindowFuncKind::Lag, vec![asc(0)]);
        func.args = Vec::new();
        let out = compute_window_output(&func, &[x], &[p], &[q], 3).unwrap();
        assert!(out[0].is_null(), "first row of partition 1");
        assert_eq!(out[1].as_int(), Some(10));
        assert!(out[2].is_null(), "first row of partition 2");
    }

    #[test]
    fn running_sum_respects_order() {
        let p: Vec<Datum> = vec![Datum::Int(1); 3];
        let q: Vec<Datum> = [1, 2, 3].iter().map(|v| Datum::Int(*v)).collect();
        let x: Vec<Datum> = [5, 6, 7].iter().map(|v| Datum::Int(*v)).collect();
        let func = window(WindowFuncKind::Sum, vec![asc(0)]);
        let out = compute_window_output(&func, &[x], &[p], &[q], 3).unwrap();
        let ints: Vec<i64> = out.iter().map(|d| d.as_int().unwrap()).collect();
        assert_eq!(ints, vec![5, 11, 18]);
    }

    #[test]
    fn rank_ties_share_and_skip() {
        let p: Vec<Datum> = vec![Datum::Int(1); 4];
        let q: Vec<Datum> = [1, 1, 2, 3].iter().map(|v| Datum::Int(*v)).collect();
        let func = window(WindowFuncKind::Rank, vec![asc(0)]);
        let out = compute_window_output(&func, &[], &[p], &[q], 4).unwrap();
        let ints: Vec<i64> = out.iter().map(|d| d.as_int().unwrap()).collect();
        assert_eq!(ints, vec![1, 1, 3, 4]);
    }
}
