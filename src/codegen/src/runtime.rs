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

//! The runtime helper library.
//!
//! Generated code calls these by name; the driver links the same names
//! into its JIT module, and [`register_runtime`] binds them for the
//! reference interpreter. Helpers that can fail return negative error
//! codes, which the row function propagates as its own return value.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use basalt_common::dictionary::DictionaryProviderRef;
use basalt_common::error::ERR_SINGLE_VALUE_FOUND_MULTIPLE_VALUES;
use basalt_llir::interp::Result as InterpResult;
use basalt_llir::{InterpError, Memory, PtrVal, RuntimeEnv, ScalarVal};

/// Sentinel marking an unused group-buffer entry key.
pub const EMPTY_KEY_64: i64 = i64::MAX;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Raises or clears the per-query interrupt flag the kernel polls.
pub fn set_interrupted(value: bool) {
    INTERRUPTED.store(value, Ordering::SeqCst);
}

thread_local! {
    /// Per-slot scratch state of the sketch aggregates, keyed by slot
    /// address. Reset before every kernel run.
    static AGG_SCRATCH: RefCell<AggScratch> = RefCell::new(AggScratch::default());
}

#[derive(Default)]
struct AggScratch {
    distinct: HashMap<(u32, i64), HashSet<i64>>,
    hll: HashMap<(u32, i64), Vec<u8>>,
    quantile: HashMap<(u32, i64), Vec<f64>>,
}

pub fn reset_aggregate_scratch() {
    AGG_SCRATCH.with(|s| *s.borrow_mut() = AggScratch::default());
}

/// Final HLL estimate for the sketch attached to `slot`.
pub fn approx_count_distinct_estimate(slot: PtrVal) -> i64 {
    AGG_SCRATCH.with(|s| {
        let scratch = s.borrow();
        let Some(registers) = scratch.hll.get(&(slot.buf, slot.offset)) else {
            return 0;
        };
        hll_estimate(registers)
    })
}

/// Final quantile value for the digest attached to `slot`.
pub fn approx_quantile_result(slot: PtrVal, fraction: f64) -> Option<f64> {
    AGG_SCRATCH.with(|s| {
        let scratch = s.borrow();
        let values = scratch.quantile.get(&(slot.buf, slot.offset))?;
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("digest holds no NaN"));
        let rank = fraction * (sorted.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        let weight = rank - lo as f64;
        Some(sorted[lo] * (1.0 - weight) + sorted[hi] * weight)
    })
}

fn hll_estimate(registers: &[u8]) -> i64 {
    let m = registers.len() as f64;
    let alpha = match registers.len() {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / m),
    };
    let sum: f64 = registers.iter().map(|r| 2f64.powi(-(*r as i32))).sum();
    let raw = alpha * m * m / sum;
    let zeros = registers.iter().filter(|r| **r == 0).count();
    if raw <= 2.5 * m && zeros != 0 {
        // small-range correction
        (m * (m / zeros as f64).ln()).round() as i64
    } else {
        raw.round() as i64
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

// ---- civil date math ----

/// Days since epoch -> (year, month, day).
pub fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// (year, month, day) -> days since epoch.
pub fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = if m > 2 { m - 3 } else { m + 9 } as i64;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

const SECS_PER_DAY: i64 = 86_400;

fn split_ts(ts_secs: i64) -> (i64, i64) {
    let days = ts_secs.div_euclid(SECS_PER_DAY);
    let secs = ts_secs.rem_euclid(SECS_PER_DAY);
    (days, secs)
}

/// EXTRACT over a second-granularity timestamp.
pub fn extract_from_ts(field: &str, ts_secs: i64) -> i64 {
    let (days, secs) = split_ts(ts_secs);
    let (y, m, d) = civil_from_days(days);
    match field {
        "year" => y,
        "quarter" => ((m - 1) / 3 + 1) as i64,
        "month" => m as i64,
        "day" => d as i64,
        "hour" => secs / 3600,
        "minute" => secs % 3600 / 60,
        "second" => secs % 60,
        "day_of_week" => (days + 4).rem_euclid(7),
        "iso_day_of_week" => (days + 3).rem_euclid(7) + 1,
        "day_of_year" => days - days_from_civil(y, 1, 1) + 1,
        "epoch" => ts_secs,
        "date_epoch" => days * SECS_PER_DAY,
        "quarter_day" => secs / (6 * 3600) + 1,
        "week" => iso_week(days),
        "week_sunday" => (days - days_from_civil(y, 1, 1) + first_dow_offset(y, 0)) / 7 + 1,
        "week_saturday" => (days - days_from_civil(y, 1, 1) + first_dow_offset(y, 6)) / 7 + 1,
        _ => panic!("unexpected extract field {field}"),
    }
}

fn first_dow_offset(y: i64, anchor: i64) -> i64 {
    let jan1 = days_from_civil(y, 1, 1);
    (jan1 + 4 - anchor).rem_euclid(7)
}

fn iso_week(days: i64) -> i64 {
    let dow = (days + 3).rem_euclid(7); // 0 = Monday
    let thursday = days + (3 - dow);
    let (iso_year, _, _) = civil_from_days(thursday);
    let jan1 = days_from_civil(iso_year, 1, 1);
    (thursday - jan1) / 7 + 1
}

/// DATE_TRUNC over a second-granularity timestamp.
pub fn date_trunc_ts(field: &str, ts_secs: i64) -> i64 {
    let (days, secs) = split_ts(ts_secs);
    let (y, m, d) = civil_from_days(days);
    match field {
        "year" => days_from_civil(y, 1, 1) * SECS_PER_DAY,
        "quarter" => days_from_civil(y, (m - 1) / 3 * 3 + 1, 1) * SECS_PER_DAY,
        "month" => days_from_civil(y, m, 1) * SECS_PER_DAY,
        "week" => {
            let dow = (days + 3).rem_euclid(7); // 0 = Monday
            (days - dow) * SECS_PER_DAY
        }
        "week_sunday" => {
            let dow = (days + 4).rem_euclid(7);
            (days - dow) * SECS_PER_DAY
        }
        "week_saturday" => {
            let dow = (days + 5).rem_euclid(7);
            (days - dow) * SECS_PER_DAY
        }
        "day" => days * SECS_PER_DAY,
        "hour" => days * SECS_PER_DAY + secs / 3600 * 3600,
        "minute" => days * SECS_PER_DAY + secs / 60 * 60,
        "second" | "milli" | "micro" | "nano" => ts_secs,
        "decade" => days_from_civil(y - y.rem_euclid(10), 1, 1) * SECS_PER_DAY,
        "century" => days_from_civil(y - (y - 1).rem_euclid(100), 1, 1) * SECS_PER_DAY,
        "millennium" => days_from_civil(y - (y - 1).rem_euclid(1000), 1, 1) * SECS_PER_DAY,
        "quarter_day" => days * SECS_PER_DAY + secs / (6 * 3600) * (6 * 3600),
        _ => {
            let _ = d;
            panic!("unexpected date_trunc field {field}")
        }
    }
}

/// DATE_ADD over a second-granularity timestamp.
pub fn date_add_ts(field: &str, number: i64, ts_secs: i64) -> i64 {
    match field {
        "second" => ts_secs + number,
        "minute" => ts_secs + number * 60,
        "hour" => ts_secs + number * 3600,
        "day" => ts_secs + number * SECS_PER_DAY,
        "week" => ts_secs + number * 7 * SECS_PER_DAY,
        "milli" => ts_secs + number / 1000,
        "micro" => ts_secs + number / 1_000_000,
        "nano" => ts_secs + number / 1_000_000_000,
        "month" | "quarter" | "year" | "decade" | "century" | "millennium" => {
            let months = match field {
                "month" => number,
                "quarter" => number * 3,
                "year" => number * 12,
                "decade" => number * 120,
                "century" => number * 1200,
                _ => number * 12_000,
            };
            let (days, secs) = split_ts(ts_secs);
            let (y, m, d) = civil_from_days(days);
            let total = y * 12 + (m as i64 - 1) + months;
            let new_y = total.div_euclid(12);
            let new_m = (total.rem_euclid(12) + 1) as u32;
            let new_d = d.min(days_in_month(new_y, new_m));
            days_from_civil(new_y, new_m, new_d) * SECS_PER_DAY + secs
        }
        _ => panic!("unexpected date_add field {field}"),
    }
}

fn days_in_month(y: i64, m: u32) -> u32 {
    match m {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            if (y % 4 == 0 && y % 100 != 0) || y % 400 == 0 {
                29
            } else {
                28
            }
        }
    }
}

/// DATEDIFF over second-granularity timestamps.
pub fn date_diff_ts(field: &str, start_secs: i64, end_secs: i64) -> i64 {
    match field {
        "second" => end_secs - start_secs,
        "minute" => (end_secs - start_secs) / 60,
        "hour" => (end_secs - start_secs) / 3600,
        "day" => (end_secs - start_secs) / SECS_PER_DAY,
        "week" => (end_secs - start_secs) / (7 * SECS_PER_DAY),
        "milli" => (end_secs - start_secs) * 1000,
        "micro" => (end_secs - start_secs) * 1_000_000,
        "nano" => (end_secs - start_secs) * 1_000_000_000,
        "month" | "quarter" | "year" | "decade" | "century" | "millennium" => {
            let (sd, _) = split_ts(start_secs);
            let (ed, _) = split_ts(end_secs);
            let (sy, sm, _) = civil_from_days(sd);
            let (ey, em, _) = civil_from_days(ed);
            let months = (ey * 12 + em as i64) - (sy * 12 + sm as i64);
            match field {
                "month" => months,
                "quarter" => months / 3,
                "year" => months / 12,
                "decade" => months / 120,
                "century" => months / 1200,
                _ => months / 12_000,
            }
        }
        _ => panic!("unexpected date_diff field {field}"),
    }
}

// ---- LIKE matching ----

/// SQL LIKE. `%` matches any run, `_` one character, escape works on both.
pub fn string_like(s: &str, pattern: &str, escape: char) -> bool {
    fn matches(s: &[char], p: &[char], escape: char) -> bool {
        if p.is_empty() {
            return s.is_empty();
        }
        if p[0] == escape && p.len() > 1 {
            return !s.is_empty() && s[0] == p[1] && matches(&s[1..], &p[2..], escape);
        }
        match p[0] {
            '%' => {
                (0..=s.len()).any(|i| matches(&s[i..], &p[1..], escape))
            }
            '_' => !s.is_empty() && matches(&s[1..], &p[1..], escape),
            c => !s.is_empty() && s[0] == c && matches(&s[1..], &p[1..], escape),
        }
    }
    let s: Vec<char> = s.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    matches(&s, &p, escape)
}

// ---- interpreter bindings ----

fn arg_i(args: &[ScalarVal], i: usize) -> InterpResult<i64> {
    args[i].as_i()
}

fn arg_f(args: &[ScalarVal], i: usize) -> InterpResult<f64> {
    args[i].as_f()
}

fn arg_p(args: &[ScalarVal], i: usize) -> InterpResult<PtrVal> {
    args[i].as_ptr()
}

fn read_str(mem: &Memory, ptr: PtrVal, len: i64) -> InterpResult<String> {
    let bytes = mem.bytes(ptr, len as usize)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| InterpError::TypeMismatch("invalid utf-8"))
}

macro_rules! register_nullable_arith {
    ($env:expr, $name:literal, $op:tt) => {
        $env.register(concat!($name, "_int64_nullable"), |_mem, args| {
            let (l, r, null) = (arg_i(args, 0)?, arg_i(args, 1)?, arg_i(args, 2)?);
            Ok(ScalarVal::I(if l == null || r == null {
                null
            } else {
                l $op r
            }))
        });
        $env.register(concat!($name, "_double_nullable"), |_mem, args| {
            let (l, r) = (arg_f(args, 0)?, arg_f(args, 1)?);
            Ok(ScalarVal::F(if l.is_nan() || r.is_nan() {
                f64::NAN
            } else {
                l $op r
            }))
        });
    };
}

macro_rules! register_nullable_cmp {
    ($env:expr, $name:literal, $op:tt) => {
        $env.register(concat!($name, "_int64_nullable"), |_mem, args| {
            let (l, r, null, bool_null) = (
                arg_i(args, 0)?,
                arg_i(args, 1)?,
                arg_i(args, 2)?,
                arg_i(args, 3)?,
            );
            Ok(ScalarVal::I(if l == null || r == null {
                bool_null
            } else {
                (l $op r) as i64
            }))
        });
        $env.register(concat!($name, "_double_nullable"), |_mem, args| {
            let (l, r) = (arg_f(args, 0)?, arg_f(args, 1)?);
            let bool_null = arg_i(args, 3)?;
            Ok(ScalarVal::I(if l.is_nan() || r.is_nan() {
                bool_null
            } else {
                (l $op r) as i64
            }))
        });
    };
}

/// Binds every runtime helper into `env`. The dictionary provider backs
/// the string compression and proxy helpers.
pub fn register_runtime(env: &mut RuntimeEnv, dict_provider: Option<DictionaryProviderRef>) {
    register_nullable_arith!(env, "add", +);
    register_nullable_arith!(env, "sub", -);
    register_nullable_arith!(env, "mul", *);

    register_nullable_cmp!(env, "eq", ==);
    register_nullable_cmp!(env, "ne", !=);
    register_nullable_cmp!(env, "lt", <);
    register_nullable_cmp!(env, "le", <=);
    register_nullable_cmp!(env, "gt", >);
    register_nullable_cmp!(env, "ge", >=);

    env.register("div_int64_nullable", |_mem, args| {
        let (l, r, null) = (arg_i(args, 0)?, arg_i(args, 1)?, arg_i(args, 2)?);
        Ok(ScalarVal::I(if l == null || r == null {
            null
        } else {
            l / r
        }))
    });
    env.register("div_double_nullable", |_mem, args| {
        let (l, r) = (arg_f(args, 0)?, arg_f(args, 1)?);
        Ok(ScalarVal::F(l / r))
    });
    env.register("mod_int64_nullable", |_mem, args| {
        let (l, r, null) = (arg_i(args, 0)?, arg_i(args, 1)?, arg_i(args, 2)?);
        Ok(ScalarVal::I(if l == null || r == null {
            null
        } else {
            l % r
        }))
    });
    env.register("safe_div_int64", |_mem, args| {
        let (l, r, null) = (arg_i(args, 0)?, arg_i(args, 1)?, arg_i(args, 2)?);
        Ok(ScalarVal::I(if r == 0 || l == null || r == null {
            null
        } else {
            l / r
        }))
    });
    env.register("safe_div_double", |_mem, args| {
        let (l, r, null) = (arg_f(args, 0)?, arg_f(args, 1)?, arg_f(args, 2)?);
        Ok(ScalarVal::F(if r == 0.0 { null } else { l / r }))
    });
    env.register("safe_inf_div_double", |_mem, args| {
        let (l, r, inf, null) = (
            arg_f(args, 0)?,
            arg_f(args, 1)?,
            arg_f(args, 2)?,
            arg_f(args, 3)?,
        );
        Ok(ScalarVal::F(if r == 0.0 {
            if l == 0.0 {
                null
            } else if l > 0.0 {
                inf
            } else {
                -inf
            }
        } else {
            l / r
        }))
    });

    env.register("logical_and", |_mem, args| {
        let (l, r, null) = (arg_i(args, 0)?, arg_i(args, 1)?, arg_i(args, 2)?);
        Ok(ScalarVal::I(kleene_and(l, r, null)))
    });
    env.register("logical_or", |_mem, args| {
        let (l, r, null) = (arg_i(args, 0)?, arg_i(args, 1)?, arg_i(args, 2)?);
        Ok(ScalarVal::I(kleene_or(l, r, null)))
    });
    env.register("logical_not", |_mem, args| {
        let (v, null) = (arg_i(args, 0)?, arg_i(args, 1)?);
        Ok(ScalarVal::I(if v == null { null } else { (v == 0) as i64 }))
    });

    // ---- aggregates; slots are 8-byte cells ----

    env.register("agg_count", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = mem.read_int(slot, 8)?;
        mem.write_int(slot, 8, v + 1)?;
        Ok(ScalarVal::I(v + 1))
    });
    env.register("agg_count_int32", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = mem.read_int(slot, 8)?;
        mem.write_int(slot, 8, v + 1)?;
        Ok(ScalarVal::I(v + 1))
    });
    env.register("agg_count_shared", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = mem.read_int(slot, 8)?;
        mem.write_int(slot, 8, v + 1)?;
        Ok(ScalarVal::I(v + 1))
    });

    env.register("agg_sum", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_i(args, 1)?;
        let acc = mem.read_int(slot, 8)?;
        mem.write_int(slot, 8, acc.wrapping_add(v))?;
        Ok(ScalarVal::I(acc))
    });
    env.register("agg_sum_skip_val", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_i(args, 1)?;
        let skip = arg_i(args, 2)?;
        if v != skip {
            let acc = mem.read_int(slot, 8)?;
            let acc = if acc == skip { 0 } else { acc };
            mem.write_int(slot, 8, acc.wrapping_add(v))?;
        }
        Ok(ScalarVal::I(0))
    });
    env.register("agg_sum_double", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_f(args, 1)?;
        let acc = mem.read_f64(slot)?;
        mem.write_f64(slot, acc + v)?;
        Ok(ScalarVal::I(0))
    });
    env.register("agg_sum_double_skip_val", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_f(args, 1)?;
        if !v.is_nan() {
            let acc = mem.read_f64(slot)?;
            let acc = if acc.is_nan() { 0.0 } else { acc };
            mem.write_f64(slot, acc + v)?;
        }
        Ok(ScalarVal::I(0))
    });

    env.register("agg_min", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_i(args, 1)?;
        let acc = mem.read_int(slot, 8)?;
        mem.write_int(slot, 8, acc.min(v))?;
        Ok(ScalarVal::I(0))
    });
    env.register("agg_min_skip_val", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_i(args, 1)?;
        let skip = arg_i(args, 2)?;
        if v != skip {
            let acc = mem.read_int(slot, 8)?;
            let next = if acc == skip { v } else { acc.min(v) };
            mem.write_int(slot, 8, next)?;
        }
        Ok(ScalarVal::I(0))
    });
    env.register("agg_min_double_skip_val", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_f(args, 1)?;
        if !v.is_nan() {
            let acc = mem.read_f64(slot)?;
            let next = if acc.is_nan() { v } else { acc.min(v) };
            mem.write_f64(slot, next)?;
        }
        Ok(ScalarVal::I(0))
    });
    env.register("agg_max", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_i(args, 1)?;
        let acc = mem.read_int(slot, 8)?;
        mem.write_int(slot, 8, acc.max(v))?;
        Ok(ScalarVal::I(0))
    });
    env.register("agg_max_skip_val", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_i(args, 1)?;
        let skip = arg_i(args, 2)?;
        if v != skip {
            let acc = mem.read_int(slot, 8)?;
            let next = if acc == skip { v } else { acc.max(v) };
            mem.write_int(slot, 8, next)?;
        }
        Ok(ScalarVal::I(0))
    });
    env.register("agg_max_double_skip_val", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_f(args, 1)?;
        if !v.is_nan() {
            let acc = mem.read_f64(slot)?;
            let next = if acc.is_nan() { v } else { acc.max(v) };
            mem.write_f64(slot, next)?;
        }
        Ok(ScalarVal::I(0))
    });

    // SAMPLE: first non-null value wins the slot.
    env.register("agg_id", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_i(args, 1)?;
        let sentinel = arg_i(args, 2)?;
        let current = mem.read_int(slot, 8)?;
        if current == sentinel && v != sentinel {
            mem.write_int(slot, 8, v)?;
        }
        Ok(ScalarVal::I(0))
    });
    env.register("agg_id_double", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_f(args, 1)?;
        let current = mem.read_f64(slot)?;
        if current.is_nan() && !v.is_nan() {
            mem.write_f64(slot, v)?;
        }
        Ok(ScalarVal::I(0))
    });

    env.register("checked_single_agg_id", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_i(args, 1)?;
        let sentinel = arg_i(args, 2)?;
        if v == sentinel {
            return Ok(ScalarVal::I(0));
        }
        let current = mem.read_int(slot, 8)?;
        if current == sentinel {
            mem.write_int(slot, 8, v)?;
            Ok(ScalarVal::I(0))
        } else if current == v {
            Ok(ScalarVal::I(0))
        } else {
            Ok(ScalarVal::I(ERR_SINGLE_VALUE_FOUND_MULTIPLE_VALUES as i64))
        }
    });

    env.register("agg_count_distinct", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_i(args, 1)?;
        let count = AGG_SCRATCH.with(|s| {
            let mut scratch = s.borrow_mut();
            let set = scratch.distinct.entry((slot.buf, slot.offset)).or_default();
            set.insert(v);
            set.len() as i64
        });
        mem.write_int(slot, 8, count)?;
        Ok(ScalarVal::I(0))
    });

    env.register("agg_approximate_count_distinct", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_i(args, 1)?;
        let b = arg_i(args, 2)?.clamp(1, 16) as u32;
        AGG_SCRATCH.with(|s| {
            let mut scratch = s.borrow_mut();
            let registers = scratch
                .hll
                .entry((slot.buf, slot.offset))
                .or_insert_with(|| vec![0u8; 1 << b]);
            let h = splitmix64(v as u64);
            let idx = (h >> (64 - b)) as usize;
            let rank = ((h << b) | (1 << (b - 1))).leading_zeros() as u8 + 1;
            registers[idx] = registers[idx].max(rank);
        });
        mem.write_int(slot, 8, 1)?;
        Ok(ScalarVal::I(0))
    });

    env.register("agg_approx_quantile", |mem, args| {
        let slot = arg_p(args, 0)?;
        let v = arg_f(args, 1)?;
        if !v.is_nan() {
            AGG_SCRATCH.with(|s| {
                s.borrow_mut()
                    .quantile
                    .entry((slot.buf, slot.offset))
                    .or_default()
                    .push(v);
            });
            mem.write_int(slot, 8, 1)?;
        }
        Ok(ScalarVal::I(0))
    });

    // ---- group-by buffer probing ----

    for (name, key_count) in [
        ("get_group_value_key1", 1usize),
        ("get_group_value_key2", 2),
        ("get_group_value_key3", 3),
        ("get_group_value_key4", 4),
    ] {
        env.register(name, move |mem, args| {
            let groups = arg_p(args, 0)?;
            let entry_count = arg_i(args, 1)? as usize;
            let row_quads = arg_i(args, 2)? as usize;
            let mut keys = [0i64; 4];
            for (k, key) in keys.iter_mut().take(key_count).enumerate() {
                *key = arg_i(args, 3 + k)?;
            }
            get_group_value(mem, groups, entry_count, row_quads, &keys[..key_count])
        });
    }

    env.register("check_interrupt", |_mem, _args| {
        Ok(ScalarVal::I(INTERRUPTED.load(Ordering::SeqCst) as i64))
    });

    env.register("floor_div", |_mem, args| {
        let (a, b) = (arg_i(args, 0)?, arg_i(args, 1)?);
        Ok(ScalarVal::I(a.div_euclid(b)))
    });

    env.register("bit_is_set", |mem, args| {
        let bitmap = arg_p(args, 0)?;
        let val = arg_i(args, 1)?;
        let min = arg_i(args, 2)?;
        let max = arg_i(args, 3)?;
        let null_val = arg_i(args, 4)?;
        let null_bool = arg_i(args, 5)?;
        if val == null_val {
            return Ok(ScalarVal::I(null_bool));
        }
        if val < min || val > max {
            return Ok(ScalarVal::I(0));
        }
        let bit = (val - min) as usize;
        let byte = mem.read_int(bitmap.offset_by((bit / 8) as i64), 1)? as u8;
        Ok(ScalarVal::I(((byte >> (bit % 8)) & 1) as i64))
    });

    // ---- strings ----

    for (name, op) in [
        ("string_eq", 0i8),
        ("string_ne", 100),
        ("string_lt", -1),
        ("string_le", -2),
        ("string_gt", 1),
        ("string_ge", 2),
    ] {
        env.register(name, move |mem, args| {
            let l = read_str(mem, arg_p(args, 0)?, arg_i(args, 1)?)?;
            let r = read_str(mem, arg_p(args, 2)?, arg_i(args, 3)?)?;
            let result = match op {
                0 => l == r,
                100 => l != r,
                -1 => l < r,
                -2 => l <= r,
                1 => l > r,
                2 => l >= r,
                _ => unreachable!(),
            };
            Ok(ScalarVal::I(result as i64))
        });
    }

    env.register("string_like", |mem, args| {
        let s = read_str(mem, arg_p(args, 0)?, arg_i(args, 1)?)?;
        let p = read_str(mem, arg_p(args, 2)?, arg_i(args, 3)?)?;
        let escape = char::from_u32(arg_i(args, 4)? as u32).unwrap_or('\\');
        Ok(ScalarVal::I(string_like(&s, &p, escape) as i64))
    });
    env.register("string_ilike", |mem, args| {
        let s = read_str(mem, arg_p(args, 0)?, arg_i(args, 1)?)?;
        let p = read_str(mem, arg_p(args, 2)?, arg_i(args, 3)?)?;
        let escape = char::from_u32(arg_i(args, 4)? as u32).unwrap_or('\\');
        Ok(ScalarVal::I(
            string_like(&s.to_lowercase(), &p, escape) as i64
        ))
    });
    env.register("string_like_simple", |mem, args| {
        let s = read_str(mem, arg_p(args, 0)?, arg_i(args, 1)?)?;
        let needle = read_str(mem, arg_p(args, 2)?, arg_i(args, 3)?)?;
        Ok(ScalarVal::I(s.contains(&needle) as i64))
    });
    env.register("regexp_like", |mem, args| {
        let s = read_str(mem, arg_p(args, 0)?, arg_i(args, 1)?)?;
        let p = read_str(mem, arg_p(args, 2)?, arg_i(args, 3)?)?;
        let re = regex::Regex::new(&p)
            .map_err(|_| InterpError::TypeMismatch("invalid regular expression"))?;
        Ok(ScalarVal::I(re.is_match(&s) as i64))
    });

    if let Some(provider) = dict_provider {
        let compress = provider.clone();
        env.register("string_compress", move |mem, args| {
            let s = read_str(mem, arg_p(args, 0)?, arg_i(args, 1)?)?;
            let dict_id = arg_i(args, 2)? as i32;
            let dict = compress
                .dictionary(dict_id)
                .ok_or(InterpError::TypeMismatch("unknown dictionary"))?;
            Ok(ScalarVal::I(dict.get_or_add(&s) as i64))
        });
        let decompress = provider.clone();
        env.register("string_decompress", move |mem, args| {
            let id = arg_i(args, 0)? as i32;
            let dict_id = arg_i(args, 1)? as i32;
            let dict = decompress
                .dictionary(dict_id)
                .ok_or(InterpError::TypeMismatch("unknown dictionary"))?;
            let s = dict
                .string(id)
                .ok_or(InterpError::TypeMismatch("unknown dictionary id"))?;
            let len = s.len() as i64;
            let ptr = mem.add_buffer(s.into_bytes());
            Ok(ScalarVal::Str {
                packed: 0,
                ptr,
                len,
            })
        });
        let dict_like = provider;
        env.register("dict_string_like", move |mem, args| {
            let id = arg_i(args, 0)? as i32;
            let dict_id = arg_i(args, 1)? as i32;
            let p = read_str(mem, arg_p(args, 2)?, arg_i(args, 3)?)?;
            let escape = char::from_u32(arg_i(args, 4)? as u32).unwrap_or('\\');
            let dict = dict_like
                .dictionary(dict_id)
                .ok_or(InterpError::TypeMismatch("unknown dictionary"))?;
            let s = dict
                .string(id)
                .ok_or(InterpError::TypeMismatch("unknown dictionary id"))?;
            Ok(ScalarVal::I(string_like(&s, &p, escape) as i64))
        });
    }

    // ---- datetime ----

    for field in [
        "year",
        "quarter",
        "month",
        "day",
        "hour",
        "minute",
        "second",
        "day_of_week",
        "iso_day_of_week",
        "day_of_year",
        "epoch",
        "date_epoch",
        "quarter_day",
        "week",
        "week_sunday",
        "week_saturday",
    ] {
        env.register(format!("extract_{field}"), move |_mem, args| {
            Ok(ScalarVal::I(extract_from_ts(field, arg_i(args, 0)?)))
        });
    }
    for field in [
        "year",
        "quarter",
        "month",
        "week",
        "week_sunday",
        "week_saturday",
        "day",
        "hour",
        "minute",
        "second",
        "milli",
        "micro",
        "nano",
        "decade",
        "century",
        "millennium",
        "quarter_day",
    ] {
        env.register(format!("date_trunc_{field}"), move |_mem, args| {
            Ok(ScalarVal::I(date_trunc_ts(field, arg_i(args, 0)?)))
        });
        env.register(format!("date_diff_{field}"), move |_mem, args| {
            Ok(ScalarVal::I(date_diff_ts(
                field,
                arg_i(args, 0)?,
                arg_i(args, 1)?,
            )))
        });
    }
    for field in [
        "year", "quarter", "month", "day", "hour", "minute", "second", "week", "milli", "micro",
        "nano", "decade", "century", "millennium",
    ] {
        env.register(format!("date_add_{field}"), move |_mem, args| {
            Ok(ScalarVal::I(date_add_ts(
                field,
                arg_i(args, 1)?,
                arg_i(args, 0)?,
            )))
        });
    }

    // ---- arrays ----

    for (name, op) in [
        ("eq", 0i32),
        ("ne", 1),
        ("lt", 2),
        ("le", 3),
        ("gt", 4),
        ("ge", 5),
    ] {
        for (mode, is_any) in [("any", true), ("all", false)] {
            env.register(
                format!("array_{mode}_{name}_int64"),
                move |mem, args| {
                    let arr = arg_p(args, 0)?;
                    let n = arg_i(args, 1)?;
                    let needle = arg_i(args, 2)?;
                    let elem_null = arg_i(args, 3)?;
                    let mut result = !is_any;
                    for i in 0..n {
                        let v = mem.read_int(arr.offset_by(i * 8), 8)?;
                        if v == elem_null {
                            continue;
                        }
                        let hit = match op {
                            0 => needle == v,
                            1 => needle != v,
                            2 => needle < v,
                            3 => needle <= v,
                            4 => needle > v,
                            _ => needle >= v,
                        };
                        if is_any && hit {
                            result = true;
                            break;
                        }
                        if !is_any && !hit {
                            result = false;
                            break;
                        }
                    }
                    Ok(ScalarVal::I(result as i64))
                },
            );
        }
    }

    env.register("array_at_int64", |mem, args| {
        let arr = arg_p(args, 0)?;
        let n = arg_i(args, 1)?;
        let idx = arg_i(args, 2)?;
        let null_val = arg_i(args, 3)?;
        // SQL array indexing is 1-based
        if idx < 1 || idx > n {
            return Ok(ScalarVal::I(null_val));
        }
        Ok(ScalarVal::I(mem.read_int(arr.offset_by((idx - 1) * 8), 8)?))
    });

    env.register("width_bucket", |_mem, args| {
        let target = arg_f(args, 0)?;
        let lower = arg_f(args, 1)?;
        let upper = arg_f(args, 2)?;
        let count = arg_i(args, 3)?;
        if !target.is_finite() || count <= 0 || lower == upper {
            return Ok(ScalarVal::I(
                basalt_common::error::ERR_WIDTH_BUCKET_INVALID_ARGUMENT as i64,
            ));
        }
        let (lo, hi, reversed) = if lower < upper {
            (lower, upper, false)
        } else {
            (upper, lower, true)
        };
        let bucket = if target < lo {
            if reversed {
                count + 1
            } else {
                0
            }
        } else if target >= hi {
            if reversed {
                0
            } else {
                count + 1
            }
        } else {
            let raw = ((target - lo) / (hi - lo) * count as f64) as i64 + 1;
            if reversed {
                count + 1 - raw
            } else {
                raw
            }
        };
        Ok(ScalarVal::I(bucket))
    });

    // ---- extension functions ----

    env.register("fn_abs", |_mem, args| Ok(ScalarVal::F(arg_f(args, 0)?.abs())));
    env.register("fn_ceil", |_mem, args| Ok(ScalarVal::F(arg_f(args, 0)?.ceil())));
    env.register("fn_floor", |_mem, args| {
        Ok(ScalarVal::F(arg_f(args, 0)?.floor()))
    });
    env.register("fn_round", |_mem, args| {
        Ok(ScalarVal::F(arg_f(args, 0)?.round()))
    });
    env.register("fn_sqrt", |_mem, args| Ok(ScalarVal::F(arg_f(args, 0)?.sqrt())));
    env.register("fn_exp", |_mem, args| Ok(ScalarVal::F(arg_f(args, 0)?.exp())));
    env.register("fn_ln", |_mem, args| Ok(ScalarVal::F(arg_f(args, 0)?.ln())));
    env.register("fn_log10", |_mem, args| {
        Ok(ScalarVal::F(arg_f(args, 0)?.log10()))
    });
    env.register("fn_power", |_mem, args| {
        Ok(ScalarVal::F(arg_f(args, 0)?.powf(arg_f(args, 1)?)))
    });
    env.register("fn_truncate", |_mem, args| {
        Ok(ScalarVal::F(arg_f(args, 0)?.trunc()))
    });

    env.register("string_lower", |mem, args| {
        let s = read_str(mem, arg_p(args, 0)?, arg_i(args, 1)?)?;
        let lowered = s.to_lowercase();
        let len = lowered.len() as i64;
        let ptr = mem.add_buffer(lowered.into_bytes());
        Ok(ScalarVal::Str {
            packed: len,
            ptr,
            len,
        })
    });

    env.register("sample_ratio", |_mem, args| {
        let ratio = arg_f(args, 0)?;
        let pos = arg_i(args, 1)?;
        // deterministic per-row hash keeps the decision reproducible
        let h = splitmix64(pos as u64) as f64 / u64::MAX as f64;
        Ok(ScalarVal::I((h < ratio) as i64))
    });
}

fn kleene_and(l: i64, r: i64, null: i64) -> i64 {
    if l == null {
        if r == 0 {
            0
        } else {
            null
        }
    } else if r == null {
        if l == 0 {
            0
        } else {
            null
        }
    } else {
        ((l != 0) && (r != 0)) as i64
    }
}

fn kleene_or(l: i64, r: i64, null: i64) -> i64 {
    if l == null {
        if r != 0 && r != null {
            1
        } else {
            null
        }
    } else if r == null {
        if l != 0 {
            1
        } else {
            null
        }
    } else {
        ((l != 0) || (r != 0)) as i64
    }
}

/// Open-addressing probe of the group buffer. Rows are
/// `[keys.. , slots..]` quads; an empty row starts with [`EMPTY_KEY_64`].
/// Returns a pointer to the row's slot area.
fn get_group_value(
    mem: &mut Memory,
    groups: PtrVal,
    entry_count: usize,
    row_quads: usize,
    keys: &[i64],
) -> InterpResult<ScalarVal> {
    let mut h = 0u64;
    for k in keys {
        h = splitmix64(h ^ *k as u64);
    }
    let mut idx = (h % entry_count as u64) as usize;
    for _ in 0..entry_count {
        let row_ptr = groups.offset_by((idx * row_quads * 8) as i64);
        let first = mem.read_int(row_ptr, 8)?;
        if first == EMPTY_KEY_64 {
            for (k, key) in keys.iter().enumerate() {
                mem.write_int(row_ptr.offset_by((k * 8) as i64), 8, *key)?;
            }
            return Ok(ScalarVal::Ptr(row_ptr.offset_by((keys.len() * 8) as i64)));
        }
        let mut matches = true;
        for (k, key) in keys.iter().enumerate() {
            if mem.read_int(row_ptr.offset_by((k * 8) as i64), 8)? != *key {
                matches = false;
                break;
            }
        }
        if matches {
            return Ok(ScalarVal::Ptr(row_ptr.offset_by((keys.len() * 8) as i64)));
        }
        idx = (idx + 1) % entry_count;
    }
    Err(InterpError::TypeMismatch("group buffer is full"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn civil_round_trip() {
        for days in [-1000i64, -1, 0, 1, 365, 18_262, 20_000] {
            let (y, m, d) = civil_from_days(days);
            assert_eq!(days_from_civil(y, m, d), days);
        }
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(18_262), (2020, 1, 1));
    }

    #[test]
    fn extract_fields() {
        // 2020-06-15 12:34:56 UTC
        let ts = days_from_civil(2020, 6, 15) * 86_400 + 12 * 3600 + 34 * 60 + 56;
        assert_eq!(extract_from_ts("year", ts), 2020);
        assert_eq!(extract_from_ts("quarter", ts), 2);
        assert_eq!(extract_from_ts("month", ts), 6);
        assert_eq!(extract_from_ts("day", ts), 15);
        assert_eq!(extract_from_ts("hour", ts), 12);
        assert_eq!(extract_from_ts("minute", ts), 34);
        assert_eq!(extract_from_ts("second", ts), 56);
        assert_eq!(extract_from_ts("day_of_week", ts), 1); // Monday
    }

    #[test]
    fn date_add_handles_month_ends() {
        // 2020-01-31 + 1 month = 2020-02-29 (leap year clamp)
        let ts = days_from_civil(2020, 1, 31) * 86_400;
        let added = date_add_ts("month", 1, ts);
        assert_eq!(civil_from_days(added / 86_400), (2020, 2, 29));
    }

    #[test]
    fn like_matcher() {
        assert!(string_like("hello world", "hello%", '\\'));
        assert!(string_like("hello", "h_llo", '\\'));
        assert!(!string_like("hello", "h_lo", '\\'));
        assert!(string_like("50%", "50\\%", '\\'));
        assert!(!string_like("505", "50\\%", '\\'));
        assert!(string_like("abc", "%b%", '\\'));
    }

    #[test]
    fn kleene_logic() {
        let null = -1;
        assert_eq!(kleene_and(1, null, null), null);
        assert_eq!(kleene_and(0, null, null), 0);
        assert_eq!(kleene_or(0, null, null), null);
        assert_eq!(kleene_or(1, null, null), 1);
    }

    #[test]
    fn hll_estimate_is_close() {
        let b = 11u32;
        let mut registers = vec![0u8; 1 << b];
        let n = 100_000u64;
        for i in 0..n {
            let h = splitmix64(i.wrapping_mul(0x9e3779b97f4a7c15));
            let idx = (h >> (64 - b)) as usize;
            let rank = ((h << b) | (1 << (b - 1))).leading_zeros() as u8 + 1;
            registers[idx] = registers[idx].max(rank);
        }
        let estimate = hll_estimate(&registers) as f64;
        let error = (estimate - n as f64).abs() / n as f64;
        assert!(error < 0.05, "estimate {estimate} off by {error}");
    }

    #[test]
    fn group_value_probe_reuses_rows() {
        let mut mem = Memory::new();
        let entry_count = 8usize;
        let row_quads = 3usize; // 1 key + 2 slots
        let groups = mem.add_buffer(
            EMPTY_KEY_64
                .to_le_bytes()
                .iter()
                .copied()
                .cycle()
                .take(entry_count * row_quads * 8)
                .collect(),
        );
        let a = get_group_value(&mut mem, groups, entry_count, row_quads, &[42])
            .unwrap()
            .as_ptr()
            .unwrap();
        let b = get_group_value(&mut mem, groups, entry_count, row_quads, &[42])
            .unwrap()
            .as_ptr()
            .unwrap();
        assert_eq!(a, b);
        let c = get_group_value(&mut mem, groups, entry_count, row_quads, &[7])
            .unwrap()
            .as_ptr()
            .unwrap();
        assert_ne!(a, c);
    }
}
