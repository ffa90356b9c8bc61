//! Value normalization applied to every record before it reaches the document store.
//!
//! - [`simplify`] collapses any integer-like [`Field`] into a plain integer and any
//!   float-like one into a plain float. Text, bools, nulls pass through; sequences and
//!   mappings are simplified recursively.
//! - [`simplify_entry`] applies that to every field of a record, keeping field order.
//! - [`clean_and_timestamp`] additionally stamps [`ENTRY_TIME_FIELD`] with the current UTC
//!   time, so every persisted record can be audited by ingestion time.
//!
//! Non-finite floats have no JSON encoding and are stored as `null`.

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};

use crate::field::{Field, RawRecord};

/// A normalized record, ready to be written.
pub type Document = Map<String, Value>;

/// Name of the ingestion timestamp field carried by every stored record.
pub const ENTRY_TIME_FIELD: &str = "entry_time_utc";

/// Normalize one value.
pub fn simplify(field: &Field) -> Value {
    match field {
        Field::Null => Value::Null,
        Field::Bool(b) => Value::Bool(*b),
        Field::I8(v) => Value::from(*v),
        Field::I16(v) => Value::from(*v),
        Field::I32(v) => Value::from(*v),
        Field::I64(v) => Value::from(*v),
        Field::U8(v) => Value::from(*v),
        Field::U16(v) => Value::from(*v),
        Field::U32(v) => Value::from(*v),
        Field::U64(v) => match i64::try_from(*v) {
            Ok(i) => Value::from(i),
            Err(_) => Value::from(*v),
        },
        Field::F32(v) => float_value(f64::from(*v)),
        Field::F64(v) => float_value(*v),
        Field::Text(s) => Value::String(s.clone()),
        Field::Seq(items) => Value::Array(items.iter().map(simplify).collect()),
        Field::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), simplify(v)))
                .collect(),
        ),
    }
}

fn float_value(v: f64) -> Value {
    Number::from_f64(v).map_or(Value::Null, Value::Number)
}

/// Normalize every field of a record.
pub fn simplify_entry(entry: &RawRecord) -> Document {
    entry
        .iter()
        .map(|(k, v)| (k.clone(), simplify(v)))
        .collect()
}

/// Normalize a record and stamp it with the current UTC time.
pub fn clean_and_timestamp(entry: &RawRecord) -> Document {
    clean_and_timestamp_at(entry, Utc::now())
}

/// Same as [`clean_and_timestamp`] with an explicit ingestion time.
pub fn clean_and_timestamp_at(entry: &RawRecord, at: DateTime<Utc>) -> Document {
    let mut doc = simplify_entry(entry);
    doc.insert(
        ENTRY_TIME_FIELD.to_string(),
        Value::String(format_entry_time(at)),
    );
    doc
}

/// Render an ingestion time as `YYYY-MM-DD HH:MM:SS.ffffff`.
pub fn format_entry_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Lift a stored document back into a raw record (the inverse direction of
/// [`simplify_entry`]).
pub fn to_raw(doc: &Document) -> RawRecord {
    doc.iter()
        .map(|(k, v)| (k.clone(), Field::from(v.clone())))
        .collect()
}
