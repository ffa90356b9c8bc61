//! Per-table readers.
//!
//! Each reader takes an optional [`Filter`] (`None` or an empty filter selects the whole
//! collection) and rebuilds a [`Table`] from the matching documents.
//!
//! - Fixed projections keep exactly a hard-coded column list; a matching document that
//!   lacks one of them fails the call with [`ReadError::MissingColumn`].
//! - Open projections keep their required columns first, then every other stored field in
//!   first-seen order, null-filling cells a document does not carry.
//!
//! No match yields an empty table that still has the expected columns.

use anyhow::Context;
use serde_json::Value;

use crate::field::Field;
use crate::normalize::to_raw;
use crate::records::{
    EventLockedTraceRecord, ManifestRecord, MetricsRecord, Record, StimulusPresentationsRecord,
    StimulusResponseRecord, TraceRecord,
};
use crate::store::{DocumentClient, DocumentId, Filter, StoredDocument};
use crate::table::Table;

/// Columns returned by [`get_stimulus_response`].
pub const STIMULUS_RESPONSE_COLUMNS: &[&str] = &[
    "stimulus_presentations_id",
    "cell_specimen_id",
    "mean_response",
    "baseline_response",
    "p_value",
];

/// Columns returned by [`get_eventlocked_traces`].
pub const EVENTLOCKED_COLUMNS: &[&str] = &[
    "ophys_experiment_id",
    "cell_specimen_id",
    "stimulus_presentations_id",
    "t_0",
    "t_f",
    "dff",
];

/// Columns returned by [`get_stimulus_presentations`], one row per presentation.
pub const STIMULUS_PRESENTATIONS_COLUMNS: &[&str] = &[
    "stimulus_presentations_id",
    "index",
    "block_index",
    "index_within_block",
    "change",
    "duration",
    "start_time",
    "start_frame",
    "end_frame",
    "stop_time",
    "image_index",
    "image_name",
    "image_set",
    "omitted",
    "orientation",
    "time_from_last_lick",
    "time_from_last_reward",
    "time_from_last_change",
    "image_block_repetition",
    "mean_running_speed",
];

const MANIFEST_REQUIRED: &[&str] = &["ophys_session_id"];
const DFF_REQUIRED: &[&str] = &[
    "ophys_experiment_id",
    "cell_specimen_id",
    "cell_roi_id",
    "dff",
];
const METRICS_REQUIRED: &[&str] = &["ophys_experiment_id", "cell_specimen_id"];

/// Store-assigned id field some imported documents carry; never returned.
const STORE_ID_FIELD: &str = "_id";

/// Errors raised while rebuilding tables from documents.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// A matching document lacks an expected column.
    #[error("document {document_id} in {collection} has no '{column}' field")]
    MissingColumn {
        /// Source collection.
        collection: String,
        /// Expected column.
        column: String,
        /// Offending document.
        document_id: DocumentId,
    },
    /// An exploded column is not stored as an array.
    #[error("field '{column}' of document {document_id} in {collection} is not an array")]
    NotAnArray {
        /// Source collection.
        collection: String,
        /// Offending column.
        column: String,
        /// Offending document.
        document_id: DocumentId,
    },
    /// An id column holds a value that is not an integer.
    #[error("'{column}' in {collection} holds non-integer value {value}")]
    NotAnInteger {
        /// Source collection.
        collection: String,
        /// Offending column.
        column: String,
        /// Rendered value.
        value: String,
    },
}

fn documents(
    client: &mut DocumentClient,
    collection: &str,
    filter: Option<&Filter>,
) -> anyhow::Result<Vec<StoredDocument>> {
    let all = Filter::new();
    client
        .ophys(collection)
        .find(filter.unwrap_or(&all))
        .with_context(|| format!("query {collection}"))
}

fn field_of<'d>(
    collection: &str,
    doc: &'d StoredDocument,
    column: &str,
) -> Result<&'d Value, ReadError> {
    doc.body.get(column).ok_or_else(|| ReadError::MissingColumn {
        collection: collection.to_string(),
        column: column.to_string(),
        document_id: doc.id,
    })
}

/// One row per document, exactly `columns`.
fn fixed_projection(
    collection: &str,
    docs: &[StoredDocument],
    columns: &[&str],
) -> Result<Table, ReadError> {
    let mut table = Table::with_columns(columns);
    for doc in docs {
        let mut row = indexmap::IndexMap::with_capacity(columns.len());
        for column in columns {
            let value = field_of(collection, doc, column)?;
            row.insert(column.to_string(), Field::from(value.clone()));
        }
        table.push_row(row);
    }
    Ok(table)
}

/// One row per document, `required` first, then whatever else is stored.
fn open_projection(
    collection: &str,
    docs: &[StoredDocument],
    required: &[&str],
) -> Result<Table, ReadError> {
    let mut table = Table::with_columns(required);
    for doc in docs {
        for column in required {
            field_of(collection, doc, column)?;
        }
        let mut row = to_raw(&doc.body);
        row.shift_remove(STORE_ID_FIELD);
        table.push_row(row);
    }
    Ok(table)
}

/// One row per array element, exactly `columns`, stacked over documents.
fn exploded_projection(
    collection: &str,
    docs: &[StoredDocument],
    columns: &[&str],
) -> anyhow::Result<Table> {
    let mut parts = vec![Table::with_columns(columns)];
    for doc in docs {
        let mut part = Table::new();
        for column in columns {
            let Value::Array(items) = field_of(collection, doc, column)? else {
                return Err(ReadError::NotAnArray {
                    collection: collection.to_string(),
                    column: column.to_string(),
                    document_id: doc.id,
                }
                .into());
            };
            let cells = items.iter().cloned().map(Field::from).collect();
            part.set_column(*column, cells)
                .with_context(|| format!("document {} in {collection}", doc.id))?;
        }
        parts.push(part);
    }
    Ok(Table::concat(parts))
}

fn coerce_ids(collection: &str, table: &mut Table, columns: &[&str]) -> anyhow::Result<()> {
    for column in columns {
        let Some(cells) = table.column(column) else {
            continue;
        };
        let ids = cells
            .iter()
            .map(|cell| {
                cell.as_i64().map(Field::I64).ok_or_else(|| ReadError::NotAnInteger {
                    collection: collection.to_string(),
                    column: column.to_string(),
                    value: Value::from(cell.clone()).to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        table.set_column(*column, ids)?;
    }
    Ok(())
}

/// Whole manifest, or the sessions matching `filter`.
pub fn get_manifest(client: &mut DocumentClient, filter: Option<&Filter>) -> anyhow::Result<Table> {
    let docs = documents(client, ManifestRecord::COLLECTION, filter)?;
    Ok(open_projection(ManifestRecord::COLLECTION, &docs, MANIFEST_REQUIRED)?)
}

/// Stored dF/F traces, one row per cell ROI.
pub fn get_dff_traces(
    client: &mut DocumentClient,
    filter: Option<&Filter>,
) -> anyhow::Result<Table> {
    let docs = documents(client, TraceRecord::COLLECTION, filter)?;
    Ok(open_projection(TraceRecord::COLLECTION, &docs, DFF_REQUIRED)?)
}

/// Stored response summaries, one row per (cell, presentation).
pub fn get_stimulus_response(
    client: &mut DocumentClient,
    filter: Option<&Filter>,
) -> anyhow::Result<Table> {
    let docs = documents(client, StimulusResponseRecord::COLLECTION, filter)?;
    Ok(fixed_projection(
        StimulusResponseRecord::COLLECTION,
        &docs,
        STIMULUS_RESPONSE_COLUMNS,
    )?)
}

/// Stored event-locked traces, one row per (cell, presentation).
pub fn get_eventlocked_traces(
    client: &mut DocumentClient,
    filter: Option<&Filter>,
) -> anyhow::Result<Table> {
    let docs = documents(client, EventLockedTraceRecord::COLLECTION, filter)?;
    Ok(fixed_projection(
        EventLockedTraceRecord::COLLECTION,
        &docs,
        EVENTLOCKED_COLUMNS,
    )?)
}

/// Stored stimulus tables, exploded back into one row per presentation.
pub fn get_stimulus_presentations(
    client: &mut DocumentClient,
    filter: Option<&Filter>,
) -> anyhow::Result<Table> {
    let docs = documents(client, StimulusPresentationsRecord::COLLECTION, filter)?;
    exploded_projection(
        StimulusPresentationsRecord::COLLECTION,
        &docs,
        STIMULUS_PRESENTATIONS_COLUMNS,
    )
}

/// Stored cell metrics, with integer experiment and cell ids.
pub fn get_metrics(client: &mut DocumentClient, filter: Option<&Filter>) -> anyhow::Result<Table> {
    let docs = documents(client, MetricsRecord::COLLECTION, filter)?;
    let mut table = open_projection(MetricsRecord::COLLECTION, &docs, METRICS_REQUIRED)?;
    coerce_ids(MetricsRecord::COLLECTION, &mut table, METRICS_REQUIRED)?;
    Ok(table)
}
