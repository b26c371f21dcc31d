//! Primitive conversions with cast semantics.
//!
//! Integers narrow by truncation and widen by sign extension (`u16` zero
//! extends). Floating point values convert to `i32`/`i64` saturating, NaN
//! becoming zero; narrower integer targets go through `i32` first. Anything
//! converts to `bool` as `x != 0`, and `bool` converts to 1 or 0.

use ogp_binary::{PrimitiveType, PrimitiveValue};

enum Wide {
    Int(i64),
    Float(f64),
}

fn widen(value: PrimitiveValue) -> Wide {
    match value {
        PrimitiveValue::Bool(v) => Wide::Int(i64::from(v)),
        PrimitiveValue::I8(v) => Wide::Int(i64::from(v)),
        PrimitiveValue::I16(v) => Wide::Int(i64::from(v)),
        PrimitiveValue::U16(v) => Wide::Int(i64::from(v)),
        PrimitiveValue::I32(v) => Wide::Int(i64::from(v)),
        PrimitiveValue::I64(v) => Wide::Int(v),
        PrimitiveValue::F32(v) => Wide::Float(f64::from(v)),
        PrimitiveValue::F64(v) => Wide::Float(v),
    }
}

/// Convert `value` to `target`.
pub fn convert(value: PrimitiveValue, target: PrimitiveType) -> PrimitiveValue {
    if value.primitive_type() == target {
        return value;
    }
    match (widen(value), target) {
        (Wide::Int(v), PrimitiveType::Bool) => PrimitiveValue::Bool(v != 0),
        (Wide::Float(v), PrimitiveType::Bool) => PrimitiveValue::Bool(v != 0.0),
        (Wide::Int(v), PrimitiveType::I8) => PrimitiveValue::I8(v as i8),
        (Wide::Int(v), PrimitiveType::I16) => PrimitiveValue::I16(v as i16),
        (Wide::Int(v), PrimitiveType::U16) => PrimitiveValue::U16(v as u16),
        (Wide::Int(v), PrimitiveType::I32) => PrimitiveValue::I32(v as i32),
        (Wide::Int(v), PrimitiveType::I64) => PrimitiveValue::I64(v),
        (Wide::Int(v), PrimitiveType::F32) => PrimitiveValue::F32(v as f32),
        (Wide::Int(v), PrimitiveType::F64) => PrimitiveValue::F64(v as f64),
        (Wide::Float(v), PrimitiveType::I8) => PrimitiveValue::I8(v as i32 as i8),
        (Wide::Float(v), PrimitiveType::I16) => PrimitiveValue::I16(v as i32 as i16),
        (Wide::Float(v), PrimitiveType::U16) => PrimitiveValue::U16(v as i32 as u16),
        (Wide::Float(v), PrimitiveType::I32) => PrimitiveValue::I32(v as i32),
        (Wide::Float(v), PrimitiveType::I64) => PrimitiveValue::I64(v as i64),
        (Wide::Float(v), PrimitiveType::F32) => PrimitiveValue::F32(v as f32),
        (Wide::Float(v), PrimitiveType::F64) => PrimitiveValue::F64(v),
    }
}
