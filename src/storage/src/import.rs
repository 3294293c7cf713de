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

//! Arrow-to-engine column conversion.
//!
//! Generated code reads flat buffers with in-band null sentinels, so
//! Arrow validity bitmaps are folded in here: null elements are replaced
//! by the target type's sentinel, bit-packed booleans densify to 8-bit,
//! and dictionary indices narrow to the declared encoded width. Chunks
//! convert in parallel on the rayon pool.

use arrow_array::cast::AsArray;
use arrow_array::types::{
    Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
};
use arrow_array::{Array, ArrayRef, PrimitiveArray};
use rayon::prelude::*;

use basalt_common::types::{Type, TypeRef, NULL_BOOLEAN};

use crate::error::{StorageError, Result};

/// A converted fixed-width column: dense values, nulls as sentinels.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedColumn {
    pub bytes: Vec<u8>,
    pub width: usize,
}

/// A converted variable-length column: signed (offset, byte length)
/// pairs into the flat data buffer. A negative offset marks a NULL row;
/// its magnitude is still the true offset.
#[derive(Debug, Clone, PartialEq)]
pub struct VarlenColumn {
    pub offsets: Vec<(i64, i64)>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportedColumn {
    Fixed(FixedColumn),
    Varlen(VarlenColumn),
}

/// Replaces nulls with the type's sentinel across all chunks of one
/// column, producing the engine's dense layout.
pub fn replace_null_values(ty: TypeRef, chunks: &[ArrayRef]) -> Result<ImportedColumn> {
    match ty {
        Type::Boolean { .. } => fixed(chunks, ty, convert_boolean_chunk),
        Type::Integer { .. }
        | Type::Decimal64 { .. }
        | Type::Date { .. }
        | Type::Time { .. }
        | Type::Timestamp { .. }
        | Type::Interval { .. } => fixed(chunks, ty, convert_integer_chunk),
        Type::FloatingPoint { .. } => fixed(chunks, ty, convert_fp_chunk),
        Type::ExtDictionary { .. } => fixed(chunks, ty, convert_dictionary_chunk),
        Type::Text { .. } => convert_text(chunks),
        Type::VarLenArray { .. } => convert_varlen_array(ty, chunks),
        Type::FixedLenArray { .. } => fixed(chunks, ty, convert_fixed_array_chunk),
        other => Err(StorageError::UnsupportedType(other.to_string())),
    }
}

fn fixed(
    chunks: &[ArrayRef],
    ty: TypeRef,
    convert: fn(&ArrayRef, TypeRef) -> Result<Vec<u8>>,
) -> Result<ImportedColumn> {
    let width = ty.size();
    let parts: Vec<Vec<u8>> = chunks
        .par_iter()
        .map(|chunk| convert(chunk, ty))
        .collect::<Result<_>>()?;
    let mut bytes = Vec::with_capacity(parts.iter().map(Vec::len).sum());
    for part in parts {
        bytes.extend_from_slice(&part);
    }
    Ok(ImportedColumn::Fixed(FixedColumn { bytes, width }))
}

/// Bit-packed Arrow booleans densify to one byte per value with `-1` for
/// NULL, so 0/1/NULL stay distinguishable downstream.
fn convert_boolean_chunk(chunk: &ArrayRef, _ty: TypeRef) -> Result<Vec<u8>> {
    let array = chunk
        .as_boolean_opt()
        .ok_or_else(|| StorageError::TypeMismatch("boolean"))?;
    let mut out = Vec::with_capacity(array.len());
    for i in 0..array.len() {
        out.push(if array.is_null(i) {
            NULL_BOOLEAN as u8
        } else {
            array.value(i) as u8
        });
    }
    Ok(out)
}

fn convert_integer_chunk(chunk: &ArrayRef, ty: TypeRef) -> Result<Vec<u8>> {
    let width = ty.size();
    let sentinel = ty.inline_null_value();
    let mut out = Vec::with_capacity(chunk.len() * width);
    match width {
        1 => emit_primitive::<Int8Type>(chunk, sentinel, width, &mut out)?,
        2 => emit_primitive::<Int16Type>(chunk, sentinel, width, &mut out)?,
        4 => emit_primitive::<Int32Type>(chunk, sentinel, width, &mut out)?,
        8 => emit_primitive::<Int64Type>(chunk, sentinel, width, &mut out)?,
        _ => return Err(StorageError::TypeMismatch("integer width")),
    }
    Ok(out)
}

fn emit_primitive<T>(
    chunk: &ArrayRef,
    sentinel: i64,
    width: usize,
    out: &mut Vec<u8>,
) -> Result<()>
where
    T: arrow_array::ArrowPrimitiveType,
    T::Native: Into<i64>,
{
    let array: &PrimitiveArray<T> = chunk
        .as_primitive_opt()
        .ok_or_else(|| StorageError::TypeMismatch("primitive"))?;
    for i in 0..array.len() {
        let v: i64 = if array.is_null(i) {
            sentinel
        } else {
            array.value(i).into()
        };
        out.extend_from_slice(&v.to_le_bytes()[..width]);
    }
    Ok(())
}

fn convert_fp_chunk(chunk: &ArrayRef, ty: TypeRef) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(chunk.len() * ty.size());
    if ty.size() == 4 {
        let array: &PrimitiveArray<Float32Type> = chunk
            .as_primitive_opt()
            .ok_or_else(|| StorageError::TypeMismatch("float32"))?;
        for i in 0..array.len() {
            let v = if array.is_null(i) {
                f32::NAN
            } else {
                array.value(i)
            };
            out.extend_from_slice(&v.to_bits().to_le_bytes());
        }
    } else {
        let array: &PrimitiveArray<Float64Type> = chunk
            .as_primitive_opt()
            .ok_or_else(|| StorageError::TypeMismatch("float64"))?;
        for i in 0..array.len() {
            let v = if array.is_null(i) {
                f64::NAN
            } else {
                array.value(i)
            };
            out.extend_from_slice(&v.to_bits().to_le_bytes());
        }
    }
    Ok(out)
}

/// Dictionary columns arrive with 32-bit Arrow keys; the engine stores
/// them at the declared encoded width. The narrowing loop is written over
/// fixed-size lanes so the optimizer can vectorize it.
fn convert_dictionary_chunk(chunk: &ArrayRef, ty: TypeRef) -> Result<Vec<u8>> {
    let width = ty.size();
    let sentinel = ty.inline_null_value();
    let array = chunk
        .as_dictionary_opt::<Int32Type>()
        .ok_or_else(|| StorageError::TypeMismatch("dictionary with int32 keys"))?;
    let keys = array.keys();
    let mut indices: Vec<i32> = Vec::with_capacity(keys.len());
    for i in 0..keys.len() {
        indices.push(if keys.is_null(i) {
            sentinel as i32
        } else {
            keys.value(i)
        });
    }
    Ok(narrow_dict_indices(&indices, width))
}

/// int32 -> int16/int8 index narrowing; the scalar loop below is the
/// portable version of the wide-register fast path.
pub fn narrow_dict_indices(indices: &[i32], width: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(indices.len() * width);
    match width {
        1 => {
            let mut lanes = indices.chunks_exact(16);
            for lane in &mut lanes {
                for v in lane {
                    out.push(*v as i8 as u8);
                }
            }
            for v in lanes.remainder() {
                out.push(*v as i8 as u8);
            }
        }
        2 => {
            let mut lanes = indices.chunks_exact(16);
            for lane in &mut lanes {
                for v in lane {
                    out.extend_from_slice(&(*v as i16).to_le_bytes());
                }
            }
            for v in lanes.remainder() {
                out.extend_from_slice(&(*v as i16).to_le_bytes());
            }
        }
        _ => {
            for v in indices {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
    out
}

fn convert_text(chunks: &[ArrayRef]) -> Result<ImportedColumn> {
    let mut offsets = Vec::new();
    let mut data = Vec::new();
    for chunk in chunks {
        let array = chunk
            .as_string_opt::<i32>()
            .ok_or_else(|| StorageError::TypeMismatch("utf8"))?;
        for i in 0..array.len() {
            if array.is_null(i) {
                offsets.push((-(data.len() as i64), -1));
            } else {
                let s = array.value(i);
                offsets.push((data.len() as i64, s.len() as i64));
                data.extend_from_slice(s.as_bytes());
            }
        }
    }
    Ok(ImportedColumn::Varlen(VarlenColumn { offsets, data }))
}

/// Variable-length arrays keep their element data flat; a NULL row is
/// encoded by flipping the sign of its offset entry. This convention is
/// preserved byte-for-byte from the storage format the generated code
/// expects.
fn convert_varlen_array(ty: TypeRef, chunks: &[ArrayRef]) -> Result<ImportedColumn> {
    let elem = ty
        .elem_type()
        .ok_or_else(|| StorageError::TypeMismatch("array element"))?;
    let elem_width = elem.size();
    let elem_sentinel = elem.inline_null_value();
    let mut offsets = Vec::new();
    let mut data = Vec::new();
    for chunk in chunks {
        let array = chunk
            .as_list_opt::<i32>()
            .ok_or_else(|| StorageError::TypeMismatch("list"))?;
        for i in 0..array.len() {
            if array.is_null(i) {
                offsets.push((-(data.len() as i64), -1));
                continue;
            }
            let values = array.value(i);
            let start = data.len() as i64;
            append_elements(&values, elem_width, elem_sentinel, &mut data)?;
            offsets.push((start, data.len() as i64 - start));
        }
    }
    Ok(ImportedColumn::Varlen(VarlenColumn { offsets, data }))
}

/// Fixed-length arrays: short rows pad with the element sentinel, long
/// rows truncate to the declared length.
fn convert_fixed_array_chunk(chunk: &ArrayRef, ty: TypeRef) -> Result<Vec<u8>> {
    let Type::FixedLenArray { elem, len, .. } = ty else {
        return Err(StorageError::TypeMismatch("fixed-length array"));
    };
    let elem_width = elem.size();
    let elem_sentinel = elem.inline_null_value();
    let array = chunk
        .as_list_opt::<i32>()
        .ok_or_else(|| StorageError::TypeMismatch("list"))?;
    let mut out = Vec::with_capacity(array.len() * len * elem_width);
    for i in 0..array.len() {
        let row_start = out.len();
        if !array.is_null(i) {
            let values = array.value(i);
            let keep = values.len().min(*len);
            append_elements(&values.slice(0, keep), elem_width, elem_sentinel, &mut out)?;
        }
        while out.len() < row_start + len * elem_width {
            out.extend_from_slice(&elem_sentinel.to_le_bytes()[..elem_width]);
        }
    }
    Ok(out)
}

fn append_elements(
    values: &ArrayRef,
    elem_width: usize,
    elem_sentinel: i64,
    out: &mut Vec<u8>,
) -> Result<()> {
    match elem_width {
        1 => append_prim::<Int8Type>(values, elem_sentinel, elem_width, out),
        2 => append_prim::<Int16Type>(values, elem_sentinel, elem_width, out),
        4 => append_prim::<Int32Type>(values, elem_sentinel, elem_width, out),
        8 => append_prim::<Int64Type>(values, elem_sentinel, elem_width, out),
        _ => Err(StorageError::TypeMismatch("array element width")),
    }
}

fn append_prim<T>(
    values: &ArrayRef,
    sentinel: i64,
    width: usize,
    out: &mut Vec<u8>,
) -> Result<()>
where
    T: arrow_array::ArrowPrimitiveType,
    T::Native: Into<i64>,
{
    let array: &PrimitiveArray<T> = values
        .as_primitive_opt()
        .ok_or_else(|| StorageError::TypeMismatch("array elements"))?;
    for i in 0..array.len() {
        let v: i64 = if array.is_null(i) {
            sentinel
        } else {
            array.value(i).into()
        };
        out.extend_from_slice(&v.to_le_bytes()[..width]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{BooleanArray, Int32Array, Int64Array, ListArray};
    use arrow_array::types::Int32Type as ArrowInt32;

    use basalt_common::types::TypeContext;

    use super::*;

    #[test]
    fn all_null_chunk_fills_with_sentinels() {
        let ctx = TypeContext::global();
        let ty = ctx.int64(true);
        let non_null: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), Some(2)]));
        let all_null: ArrayRef = Arc::new(Int64Array::from(vec![None::<i64>, None]));
        let out = replace_null_values(ty, &[non_null, all_null]).unwrap();
        let ImportedColumn::Fixed(col) = out else {
            panic!("fixed column expected")
        };
        let values: Vec<i64> = col
            .bytes
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![1, 2, i64::MIN, i64::MIN]);
    }

    #[test]
    fn booleans_densify_to_bytes() {
        let ctx = TypeContext::global();
        let ty = ctx.boolean(true);
        let array: ArrayRef = Arc::new(BooleanArray::from(vec![
            Some(true),
            Some(false),
            None,
        ]));
        let out = replace_null_values(ty, &[array]).unwrap();
        let ImportedColumn::Fixed(col) = out else {
            panic!("fixed column expected")
        };
        assert_eq!(col.bytes, vec![1, 0, NULL_BOOLEAN as u8]);
    }

    #[test]
    fn dictionary_indices_narrow() {
        let indices = vec![0i32, 1, 127, -1];
        assert_eq!(narrow_dict_indices(&indices, 1), vec![0, 1, 127, 0xff]);
        let two = narrow_dict_indices(&indices, 2);
        assert_eq!(two.len(), 8);
        assert_eq!(i16::from_le_bytes([two[6], two[7]]), -1);
    }

    #[test]
    fn narrowing_matches_scalar_reference_on_long_runs() {
        let indices: Vec<i32> = (0..1000).map(|v| v % 200).collect();
        let narrow = narrow_dict_indices(&indices, 1);
        for (i, v) in indices.iter().enumerate() {
            assert_eq!(narrow[i] as i8, *v as i8);
        }
    }

    #[test]
    fn null_varlen_arrays_flip_the_offset_sign() {
        let ctx = TypeContext::global();
        let ty = ctx.varlen_array(ctx.int32(true), true);
        let array: ArrayRef = Arc::new(ListArray::from_iter_primitive::<ArrowInt32, _, _>(vec![
            Some(vec![Some(1), Some(2)]),
            None,
            Some(vec![Some(3)]),
        ]));
        let out = replace_null_values(ty, &[array]).unwrap();
        let ImportedColumn::Varlen(col) = out else {
            panic!("varlen column expected")
        };
        assert_eq!(col.offsets[0], (0, 8));
        assert_eq!(col.offsets[1], (-8, -1));
        assert_eq!(col.offsets[2], (8, 4));
    }

    #[test]
    fn fixed_arrays_pad_and_truncate() {
        let ctx = TypeContext::global();
        let ty = ctx.fixed_len_array(ctx.int32(true), 2, true);
        let array: ArrayRef = Arc::new(ListArray::from_iter_primitive::<ArrowInt32, _, _>(vec![
            Some(vec![Some(7)]),                     // short: padded
            Some(vec![Some(1), Some(2), Some(3)]),   // long: truncated
        ]));
        let out = replace_null_values(ty, &[array]).unwrap();
        let ImportedColumn::Fixed(col) = out else {
            panic!("fixed column expected")
        };
        let values: Vec<i32> = col
            .bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![7, i32::MIN, 1, 2]);
    }

    #[test]
    fn fully_non_null_chunk_is_unchanged() {
        let ctx = TypeContext::global();
        let ty = ctx.int32(true);
        let array: ArrayRef = Arc::new(Int32Array::from(vec![5, 6, 7]));
        let out = replace_null_values(ty, &[array]).unwrap();
        let ImportedColumn::Fixed(col) = out else {
            panic!("fixed column expected")
        };
        let values: Vec<i32> = col
            .bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![5, 6, 7]);
    }
}
