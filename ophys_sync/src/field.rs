//! Cell values exchanged with the upstream session tables.
//!
//! Upstream tables hand us fixed-width numeric values (`i32` ROI ids, `f32` responses, `u16`
//! frame counters, ...). [`Field`] keeps that width information so the normalizer in
//! [`crate::normalize`] can collapse every variant into the plain JSON scalars the document
//! store understands.
//!
//! Serde goes through [`serde_json::Value`]: deserializing lifts plain JSON into the widest
//! variants (`I64`, `U64`, `F64`), serializing normalizes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered mapping from field name to value: one row of an upstream table.
pub type RawRecord = IndexMap<String, Field>;

/// A single cell value as produced upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Field {
    /// Missing value.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// 8-bit signed integer.
    I8(i8),
    /// 16-bit signed integer.
    I16(i16),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer (the plain integer form).
    I64(i64),
    /// 8-bit unsigned integer.
    U8(u8),
    /// 16-bit unsigned integer.
    U16(u16),
    /// 32-bit unsigned integer.
    U32(u32),
    /// 64-bit unsigned integer.
    U64(u64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float (the plain float form).
    F64(f64),
    /// UTF-8 text.
    Text(String),
    /// Ordered sequence (traces, per-presentation columns).
    Seq(Vec<Field>),
    /// Nested mapping.
    Map(IndexMap<String, Field>),
}

impl Field {
    /// True for every integer-like variant, regardless of width or signedness.
    pub fn is_int(&self) -> bool {
        matches!(
            self,
            Field::I8(_)
                | Field::I16(_)
                | Field::I32(_)
                | Field::I64(_)
                | Field::U8(_)
                | Field::U16(_)
                | Field::U32(_)
                | Field::U64(_)
        )
    }

    /// True for `F32` and `F64`.
    pub fn is_float(&self) -> bool {
        matches!(self, Field::F32(_) | Field::F64(_))
    }

    /// True for [`Field::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    /// True when the value (recursively) only uses the plain representations that survive a
    /// trip through the document store: `I64` (or `U64` beyond `i64::MAX`), `F64`, text,
    /// bool, null, sequences and mappings.
    pub fn is_plain(&self) -> bool {
        match self {
            Field::Null | Field::Bool(_) | Field::I64(_) | Field::F64(_) | Field::Text(_) => true,
            Field::U64(v) => i64::try_from(*v).is_err(),
            Field::Seq(items) => items.iter().all(Field::is_plain),
            Field::Map(map) => map.values().all(Field::is_plain),
            _ => false,
        }
    }

    /// Integer value of any integer-like variant. Floats with no fractional part are
    /// accepted too, because identifiers sometimes arrive as floats after a join.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Field::I8(v) => Some(v.into()),
            Field::I16(v) => Some(v.into()),
            Field::I32(v) => Some(v.into()),
            Field::I64(v) => Some(v),
            Field::U8(v) => Some(v.into()),
            Field::U16(v) => Some(v.into()),
            Field::U32(v) => Some(v.into()),
            Field::U64(v) => i64::try_from(v).ok(),
            Field::F32(v) if v.fract() == 0.0 && v.is_finite() => Some(v as i64),
            Field::F64(v) if v.fract() == 0.0 && v.is_finite() => Some(v as i64),
            _ => None,
        }
    }

    /// Float value of any numeric variant.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Field::F32(v) => Some(v.into()),
            Field::F64(v) => Some(v),
            Field::U64(v) => Some(v as f64),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Borrow the text of a [`Field::Text`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the items of a [`Field::Seq`].
    pub fn as_seq(&self) -> Option<&[Field]> {
        match self {
            Field::Seq(items) => Some(items),
            _ => None,
        }
    }

    /// Numeric sequence as `f64`s; null entries become NaN.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        self.as_seq()?
            .iter()
            .map(|f| if f.is_null() { Some(f64::NAN) } else { f.as_f64() })
            .collect()
    }
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Field::Null,
            Value::Bool(b) => Field::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Field::I64(i)
                } else if let Some(u) = n.as_u64() {
                    Field::U64(u)
                } else {
                    n.as_f64().map_or(Field::Null, Field::F64)
                }
            }
            Value::String(s) => Field::Text(s),
            Value::Array(items) => Field::Seq(items.into_iter().map(Field::from).collect()),
            Value::Object(map) => Field::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

impl From<Field> for Value {
    fn from(field: Field) -> Self {
        crate::normalize::simplify(&field)
    }
}

macro_rules! field_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Field {
                fn from(v: $ty) -> Self {
                    Field::$variant(v)
                }
            }
        )*
    };
}

field_from! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => Text,
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::Text(v.to_string())
    }
}

impl From<Vec<f64>> for Field {
    fn from(v: Vec<f64>) -> Self {
        Field::Seq(v.into_iter().map(Field::F64).collect())
    }
}

impl From<Vec<Field>> for Field {
    fn from(v: Vec<Field>) -> Self {
        Field::Seq(v)
    }
}

impl<T: Into<Field>> From<Option<T>> for Field {
    fn from(v: Option<T>) -> Self {
        v.map_or(Field::Null, Into::into)
    }
}
