//! Collection operations over the `documents` table.
//!
//! Documents are JSON bodies scoped by `(database_name, collection)`. Scalar filter conditions
//! on plain field names run in SQL as `json_extract(body, '$.field') = ?`, so only candidate
//! rows are decoded. [`Filter::matches`] then runs on every candidate, which keeps numeric and
//! structural comparison identical whatever was pushed down.

use anyhow::Context;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Double, Text};
use diesel::sqlite::Sqlite;
use diesel::{SqliteConnection, insert_into, sql_query};
use serde_json::Value;
use tracing::debug;

use crate::models::{DocumentRow, NewDocumentRow};
use crate::normalize::{Document, ENTRY_TIME_FIELD};
use crate::schema::documents::dsl as d;
use crate::store::filter::Filter;

/// SQLite caps bound parameters per statement; stay well under it.
const INSERT_CHUNK: usize = 500;
const DELETE_CHUNK: usize = 900;

/// Identifier the store assigns to each document.
pub type DocumentId = i64;

/// A document as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// The document's `_id`.
    pub id: DocumentId,
    /// Document fields.
    pub body: Document,
}

/// Handle to one collection. Borrows the client's connection for its lifetime.
pub struct Collection<'c> {
    conn: &'c mut SqliteConnection,
    database: &'c str,
    name: &'c str,
}

impl<'c> Collection<'c> {
    pub(crate) fn new(conn: &'c mut SqliteConnection, database: &'c str, name: &'c str) -> Self {
        Self {
            conn,
            database,
            name,
        }
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Owning database name.
    pub fn database(&self) -> &str {
        self.database
    }

    /// Rows of this collection that may match `filter`, in `_id` order.
    fn load_rows(&mut self, filter: &Filter) -> anyhow::Result<Vec<DocumentRow>> {
        let mut sql = String::from(
            "SELECT id, database_name, collection, body, entry_time_utc FROM documents \
             WHERE database_name = ? AND collection = ?",
        );
        let mut binds = Vec::new();
        for (field, want) in filter.conditions() {
            if let Some(bind) = pushdown(field, want) {
                sql.push_str(&format!(" AND json_extract(body, '$.{field}') = ?"));
                binds.push(bind);
            }
        }
        sql.push_str(" ORDER BY id");

        let mut query = sql_query(sql)
            .into_boxed::<Sqlite>()
            .bind::<Text, _>(self.database)
            .bind::<Text, _>(self.name);
        for bind in binds {
            query = match bind {
                SqlScalar::Int(v) => query.bind::<BigInt, _>(v),
                SqlScalar::Real(v) => query.bind::<Double, _>(v),
                SqlScalar::Text(v) => query.bind::<Text, _>(v),
            };
        }
        let rows = query
            .load::<DocumentRow>(self.conn)
            .with_context(|| format!("load {}.{}", self.database, self.name))?;
        Ok(rows)
    }

    fn decode(row: DocumentRow) -> anyhow::Result<StoredDocument> {
        let body: Document = serde_json::from_str(&row.body)
            .with_context(|| format!("document {} is not a JSON object", row.id))?;
        Ok(StoredDocument { id: row.id, body })
    }

    /// Every document matching `filter`, in insertion order.
    pub fn find(&mut self, filter: &Filter) -> anyhow::Result<Vec<StoredDocument>> {
        let mut out = Vec::new();
        for row in self.load_rows(filter)? {
            let doc = Self::decode(row)?;
            if filter.matches(&doc.body) {
                out.push(doc);
            }
        }
        Ok(out)
    }

    /// Up to `limit` matching documents.
    pub fn find_limit(
        &mut self,
        filter: &Filter,
        limit: usize,
    ) -> anyhow::Result<Vec<StoredDocument>> {
        let mut out = Vec::new();
        for row in self.load_rows(filter)? {
            if out.len() == limit {
                break;
            }
            let doc = Self::decode(row)?;
            if filter.matches(&doc.body) {
                out.push(doc);
            }
        }
        Ok(out)
    }

    /// First matching document, if any.
    pub fn find_one(&mut self, filter: &Filter) -> anyhow::Result<Option<StoredDocument>> {
        Ok(self.find_limit(filter, 1)?.into_iter().next())
    }

    /// Number of matching documents.
    pub fn count(&mut self, filter: &Filter) -> anyhow::Result<usize> {
        if filter.is_empty() {
            let n: i64 = d::documents
                .filter(d::database_name.eq(self.database))
                .filter(d::collection.eq(self.name))
                .count()
                .get_result(self.conn)?;
            return Ok(n as usize);
        }
        Ok(self.find(filter)?.len())
    }

    fn new_row(&self, doc: &Document) -> anyhow::Result<NewDocumentRow<'c>> {
        Ok(NewDocumentRow {
            database_name: self.database,
            collection: self.name,
            body: serde_json::to_string(doc)?,
            entry_time_utc: entry_time(doc),
        })
    }

    /// Insert one document and return its `_id`.
    pub fn insert_one(&mut self, doc: &Document) -> anyhow::Result<DocumentId> {
        let row = self.new_row(doc)?;
        let id = insert_into(d::documents)
            .values(&row)
            .returning(d::id)
            .get_result(self.conn)
            .with_context(|| format!("insert into {}.{}", self.database, self.name))?;
        debug!(collection = self.name, id, "inserted document");
        Ok(id)
    }

    /// Insert all documents as one multi-document write. Either every document lands or
    /// none does. No identity check is made.
    pub fn insert_many(&mut self, docs: &[Document]) -> anyhow::Result<usize> {
        let rows = docs
            .iter()
            .map(|doc| self.new_row(doc))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let inserted = self.conn.immediate_transaction::<_, anyhow::Error, _>(|conn| {
            let mut n = 0;
            for chunk in rows.chunks(INSERT_CHUNK) {
                n += insert_into(d::documents).values(chunk).execute(conn)?;
            }
            Ok(n)
        })?;
        debug!(collection = self.name, inserted, "bulk inserted documents");
        Ok(inserted)
    }

    /// Set every field of `set` on document `id`, leaving its other fields untouched.
    ///
    /// Returns `false` if the document no longer exists.
    pub fn update_one(&mut self, id: DocumentId, set: &Document) -> anyhow::Result<bool> {
        let database = self.database;
        let name = self.name;
        self.conn.immediate_transaction::<_, anyhow::Error, _>(|conn| {
            let Some(body) = d::documents
                .filter(d::id.eq(id))
                .filter(d::database_name.eq(database))
                .filter(d::collection.eq(name))
                .select(d::body)
                .first::<String>(conn)
                .optional()?
            else {
                return Ok(false);
            };

            let mut merged: Document = serde_json::from_str(&body)
                .with_context(|| format!("document {id} is not a JSON object"))?;
            for (k, v) in set {
                merged.insert(k.clone(), v.clone());
            }

            diesel::update(d::documents.filter(d::id.eq(id)))
                .set((
                    d::body.eq(serde_json::to_string(&merged)?),
                    d::entry_time_utc.eq(entry_time(&merged)),
                ))
                .execute(conn)?;
            debug!(collection = name, id, fields = set.len(), "updated document");
            Ok(true)
        })
    }

    /// Delete every matching document and return how many were removed.
    pub fn delete_many(&mut self, filter: &Filter) -> anyhow::Result<usize> {
        let scope = d::documents
            .filter(d::database_name.eq(self.database))
            .filter(d::collection.eq(self.name));

        if filter.is_empty() {
            return Ok(diesel::delete(scope).execute(self.conn)?);
        }

        let ids: Vec<DocumentId> = self.find(filter)?.into_iter().map(|doc| doc.id).collect();
        let deleted = self.conn.immediate_transaction::<_, anyhow::Error, _>(|conn| {
            let mut n = 0;
            for chunk in ids.chunks(DELETE_CHUNK) {
                n += diesel::delete(d::documents.filter(d::id.eq_any(chunk))).execute(conn)?;
            }
            Ok(n)
        })?;
        debug!(collection = self.name, deleted, "deleted documents");
        Ok(deleted)
    }
}

/// A filter value SQLite can compare against `json_extract` output.
#[derive(Debug, Clone, PartialEq)]
enum SqlScalar {
    Int(i64),
    Real(f64),
    Text(String),
}

/// SQL form of `field == want`, or `None` when the condition stays in process only: nulls,
/// arrays, objects, integers beyond `i64`, and field names that are not plain identifiers.
fn pushdown(field: &str, want: &Value) -> Option<SqlScalar> {
    let plain = !field.is_empty() && field.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if !plain {
        return None;
    }
    match want {
        Value::Bool(b) => Some(SqlScalar::Int(i64::from(*b))),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => Some(SqlScalar::Int(i)),
            (None, Some(_)) => None,
            (None, None) => n.as_f64().map(SqlScalar::Real),
        },
        Value::String(s) => Some(SqlScalar::Text(s.clone())),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn entry_time(doc: &Document) -> Option<String> {
    doc.get(ENTRY_TIME_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
}
