//! Diesel models mapping to [`crate::schema::documents`].
//!
//! Each row is one stored document: the owning database and collection names, the JSON body,
//! and a copy of the body's `entry_time_utc` so ingestion time can be inspected without
//! parsing bodies.

use diesel::prelude::*;

use crate::schema::documents;

/// A row in [`crate::schema::documents`].
#[derive(Debug, Clone, Queryable, QueryableByName, Identifiable, Selectable)]
#[diesel(table_name = documents, check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentRow {
    /// Store-assigned identifier (the document's `_id`).
    pub id: i64,
    /// Database (collection group) name, e.g. "ophys_data".
    pub database_name: String,
    /// Collection name, e.g. "dff_traces".
    pub collection: String,
    /// JSON-encoded document body.
    pub body: String,
    /// Ingestion time copied from the body, if present.
    pub entry_time_utc: Option<String>,
}

/// Insertable form of [`DocumentRow`].
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocumentRow<'a> {
    /// Database (collection group) name.
    pub database_name: &'a str,
    /// Collection name.
    pub collection: &'a str,
    /// JSON-encoded document body.
    pub body: String,
    /// Ingestion time copied from the body, if present.
    pub entry_time_utc: Option<String>,
}
