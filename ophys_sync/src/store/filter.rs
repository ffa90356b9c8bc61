//! Equality filters over top-level document fields.

use indexmap::IndexMap;
use serde_json::Value;

use crate::field::Field;
use crate::normalize::{Document, simplify};

/// Ordered mapping from field name to required value. An empty filter matches everything.
///
/// Values are normalized when added, and numbers compare numerically, so a filter built
/// from an `i32` id matches a document holding the same id as `5.0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(IndexMap<String, Value>);

impl Filter {
    /// Filter matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: also require `field == value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Field>) -> Self {
        self.insert(field, value);
        self
    }

    /// Require `field == value`, replacing any earlier condition on `field`.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Field>) {
        self.0.insert(field.into(), simplify(&value.into()));
    }

    /// True if the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Conditions in insertion order.
    pub fn conditions(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// True if every condition holds for `doc`.
    pub fn matches(&self, doc: &Document) -> bool {
        self.0
            .iter()
            .all(|(k, want)| doc.get(k).is_some_and(|got| values_equal(got, want)))
    }

    /// Parse a `field=value` command-line argument. The value is read as JSON when it parses
    /// (`experiment_id=5`, `omitted=true`) and as a string otherwise (`image_name=im065`).
    pub fn parse_condition(arg: &str) -> anyhow::Result<(String, Field)> {
        let Some((field, raw)) = arg.split_once('=') else {
            anyhow::bail!("filter must look like field=value, got '{arg}'");
        };
        let field = field.trim();
        if field.is_empty() {
            anyhow::bail!("filter field name is empty in '{arg}'");
        }
        let value = serde_json::from_str::<Value>(raw.trim())
            .map(Field::from)
            .unwrap_or_else(|_| Field::Text(raw.trim().to_string()));
        Ok((field.to_string(), value))
    }

    /// Build a filter from `field=value` arguments.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> anyhow::Result<Self> {
        let mut filter = Filter::new();
        for arg in args {
            let (field, value) = Self::parse_condition(arg.as_ref())?;
            filter.insert(field, value);
        }
        Ok(filter)
    }
}

impl<K: Into<String>, V: Into<Field>> FromIterator<(K, V)> for Filter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filter = Filter::new();
        for (k, v) in iter {
            filter.insert(k, v);
        }
        filter
    }
}

/// Structural equality with numeric comparison for numbers.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => match (x.as_u64(), y.as_u64()) {
                (Some(i), Some(j)) => i == j,
                _ => x.as_f64() == y.as_f64(),
            },
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, x)| ym.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}
