//! Upsert-based sync of ophys experiment tables into a document store.
//!
//! Upstream session objects hand over already-computed tables ([`session`]). Writers
//! ([`writers`]) reshape them into typed records ([`records`]), normalize every value
//! ([`normalize`]) and push them through the upsert primitive ([`upsert`]) into collections
//! of the document store ([`store`]). Readers ([`readers`]) rebuild tables from stored
//! documents. [`pipeline`] drives the per-session batch upload.

#![deny(missing_docs)]

pub mod cell_metrics;
pub mod config;
pub mod db;
pub mod field;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod readers;
pub mod records;
#[allow(missing_docs)]
pub mod schema;
pub mod session;
pub mod store;
pub mod table;
pub mod upsert;
pub mod writers;
