//! The upsert primitive: update-if-present-else-insert, keyed by a declared identity.
//!
//! Writers put individual records into a collection only through [`upsert`]. Force-write
//! deletes and the bulk modes of [`crate::writers::write_eventlocked_traces`] bypass it.

use std::fmt;

use crate::field::RawRecord;
use crate::normalize::clean_and_timestamp;
use crate::store::{Collection, DocumentId, Filter, StoreError};

/// What a single upsert call wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new document was created.
    Inserted(DocumentId),
    /// An existing document had its fields merged.
    Updated(DocumentId),
}

impl UpsertOutcome {
    /// Id of the written document.
    pub fn id(self) -> DocumentId {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) => id,
        }
    }
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpsertOutcome::Inserted(id) => write!(f, "inserted {id}"),
            UpsertOutcome::Updated(id) => write!(f, "updated {id}"),
        }
    }
}

/// Build the identity filter for `record` from its `key_fields`.
pub fn identity_filter(
    collection: &str,
    record: &RawRecord,
    key_fields: &[&str],
) -> Result<Filter, StoreError> {
    let mut filter = Filter::new();
    for key in key_fields {
        let value = record.get(*key).ok_or_else(|| StoreError::MissingKeyField {
            collection: collection.to_string(),
            field: (*key).to_string(),
        })?;
        filter.insert(*key, value.clone());
    }
    Ok(filter)
}

/// Insert `record`, or merge it into the one document sharing its identity.
///
/// - `force`: insert unconditionally. Callers use this after deleting the prior documents
///   themselves, to get full-document overwrite instead of a field merge.
/// - otherwise: look up documents matching the normalized key fields. None → insert.
///   Exactly one → set every field of the normalized record on it; fields absent from the
///   record are left as they were. More than one → [`StoreError::AmbiguousIdentity`] and
///   nothing is written.
///
/// Every successful call performs exactly one write, stamped with a fresh
/// `entry_time_utc`.
pub fn upsert(
    collection: &mut Collection<'_>,
    record: &RawRecord,
    key_fields: &[&str],
    force: bool,
) -> anyhow::Result<UpsertOutcome> {
    let entry = clean_and_timestamp(record);

    if force {
        let id = collection.insert_one(&entry)?;
        return Ok(UpsertOutcome::Inserted(id));
    }

    let filter = identity_filter(collection.name(), record, key_fields)?;
    let mut matches = collection.find_limit(&filter, 2)?;
    match matches.len() {
        0 => {
            let id = collection.insert_one(&entry)?;
            Ok(UpsertOutcome::Inserted(id))
        }
        1 => {
            let existing = matches.remove(0);
            if !collection.update_one(existing.id, &entry)? {
                return Err(StoreError::Vanished {
                    collection: collection.name().to_string(),
                    id: existing.id,
                }
                .into());
            }
            Ok(UpsertOutcome::Updated(existing.id))
        }
        _ => {
            let matches = collection.count(&filter)?;
            Err(StoreError::AmbiguousIdentity {
                collection: collection.name().to_string(),
                identity: render_identity(&filter),
                matches,
            }
            .into())
        }
    }
}

fn render_identity(filter: &Filter) -> String {
    let parts: Vec<String> = filter
        .conditions()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    format!("{{{}}}", parts.join(", "))
}
