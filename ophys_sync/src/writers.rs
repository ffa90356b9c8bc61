//! Per-table writers.
//!
//! Each writer reshapes one upstream table into typed records and pushes them into its
//! collection under [`crate::store::OPHYS_DATABASE`] through [`crate::upsert::upsert`].
//! Records are built before anything is written, so a malformed table never leaves a
//! half-deleted experiment behind.
//!
//! Force-write means "delete every document of this experiment, then insert": a full
//! overwrite instead of a field merge. Event-locked traces add a bulk path
//! ([`TraceWriteMode`]) for their volume.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::field::Field;
use crate::normalize::{Document, clean_and_timestamp};
use crate::records::{
    EventLockedTraceRecord, ManifestRecord, MetricsRecord, Record, StimulusPresentationsRecord,
    StimulusResponseRecord, TraceRecord,
};
use crate::session::SessionData;
use crate::store::{Collection, DocumentClient, Filter};
use crate::table::Table;
use crate::upsert::{UpsertOutcome, upsert};

/// Columns of the stimulus response table that are stored elsewhere.
pub const STIMULUS_RESPONSE_DROPPED: &[&str] = &["dff_trace", "dff_trace_timestamps"];

/// Columns of the extended stimulus table that are not stored.
pub const STIMULUS_PRESENTATIONS_DROPPED: &[&str] = &["licks", "rewards"];

/// Counts of what one writer call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    /// Target collection.
    pub collection: &'static str,
    /// Documents created.
    pub inserted: usize,
    /// Documents merged in place.
    pub updated: usize,
    /// Documents removed before writing.
    pub deleted: usize,
    /// Records not written because they were already present.
    pub skipped: usize,
}

impl WriteReport {
    fn new(collection: &'static str) -> Self {
        Self {
            collection,
            inserted: 0,
            updated: 0,
            deleted: 0,
            skipped: 0,
        }
    }

    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted(_) => self.inserted += 1,
            UpsertOutcome::Updated(_) => self.updated += 1,
        }
    }

    /// Documents written (inserted or updated).
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }

    fn finish(self, ophys_experiment_id: Option<i64>) -> Self {
        info!(
            collection = self.collection,
            ophys_experiment_id,
            inserted = self.inserted,
            updated = self.updated,
            deleted = self.deleted,
            skipped = self.skipped,
            "write complete"
        );
        self
    }
}

impl fmt::Display for WriteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} inserted, {} updated, {} deleted, {} skipped",
            self.collection, self.inserted, self.updated, self.deleted, self.skipped
        )
    }
}

/// How event-locked traces reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceWriteMode {
    /// One upsert per trace; safe to re-run, slow.
    #[default]
    Upsert,
    /// Delete the experiment's traces, then one multi-document insert.
    BulkReplace,
    /// One multi-document insert with no delete. Re-running duplicates every trace.
    BulkAppend,
}

impl TraceWriteMode {
    /// Mode matching a writer's force flag: force is delete-then-bulk-insert.
    pub fn from_force(force: bool) -> Self {
        if force {
            TraceWriteMode::BulkReplace
        } else {
            TraceWriteMode::Upsert
        }
    }
}

fn experiment_filter(ophys_experiment_id: i64) -> Filter {
    Filter::new().eq("ophys_experiment_id", ophys_experiment_id)
}

fn upsert_all<R: Record>(
    coll: &mut Collection<'_>,
    records: &[R],
    force: bool,
    report: &mut WriteReport,
) -> anyhow::Result<()> {
    for record in records {
        let outcome = upsert(coll, &record.to_fields(), R::KEY_FIELDS, force)?;
        debug!(collection = R::COLLECTION, %outcome, "upserted");
        report.record(outcome);
    }
    Ok(())
}

/// Upsert one session into the manifest, keyed on `ophys_session_id`.
pub fn write_manifest_entry(
    client: &mut DocumentClient,
    entry: &ManifestRecord,
) -> anyhow::Result<WriteReport> {
    let mut report = WriteReport::new(ManifestRecord::COLLECTION);
    let mut coll = client.ophys(ManifestRecord::COLLECTION);
    upsert_all(&mut coll, std::slice::from_ref(entry), false, &mut report)
        .with_context(|| format!("write manifest entry {}", entry.ophys_session_id))?;
    Ok(report.finish(entry.ophys_experiment_id))
}

/// Write one document per cell ROI.
///
/// Without `force` this is insert-only: a row whose `cell_roi_id` is already stored is
/// skipped, and existing traces are never modified. With `force` every trace of the
/// experiment is deleted first.
pub fn write_dff_traces(
    client: &mut DocumentClient,
    session: &dyn SessionData,
    force: bool,
) -> anyhow::Result<WriteReport> {
    let oeid = session.ophys_experiment_id();
    let table = session.dff_traces().context("load dff traces")?;
    let records = table
        .rows()
        .map(|row| TraceRecord::from_row(oeid, &row))
        .collect::<anyhow::Result<Vec<_>>>()
        .with_context(|| format!("dff traces of experiment {oeid}"))?;

    let mut report = WriteReport::new(TraceRecord::COLLECTION);
    let mut coll = client.ophys(TraceRecord::COLLECTION);
    if force {
        report.deleted = coll.delete_many(&experiment_filter(oeid))?;
    }

    let mut pending = Vec::with_capacity(records.len());
    for record in records {
        if !force
            && coll
                .find_one(&Filter::new().eq("cell_roi_id", record.cell_roi_id))?
                .is_some()
        {
            report.skipped += 1;
            continue;
        }
        pending.push(record);
    }
    upsert_all(&mut coll, &pending, force, &mut report)?;
    Ok(report.finish(Some(oeid)))
}

/// Attach `image_name` to every stimulus response row, looked up by
/// `stimulus_presentations_id`. Rows whose presentation is unknown are dropped.
pub fn join_image_names(
    stimulus_response: &Table,
    stimulus_presentations: &Table,
) -> anyhow::Result<Table> {
    let ids = stimulus_presentations.require_column("stimulus_presentations_id")?;
    let names = stimulus_presentations.require_column("image_name")?;
    let lookup: HashMap<i64, &Field> = ids
        .iter()
        .zip(names)
        .filter_map(|(id, name)| Some((id.as_i64()?, name)))
        .collect();

    stimulus_response.require_column("stimulus_presentations_id")?;
    let mut out = Table::new();
    for mut row in stimulus_response.rows() {
        let Some(name) = row["stimulus_presentations_id"]
            .as_i64()
            .and_then(|id| lookup.get(&id))
        else {
            continue;
        };
        row.insert("image_name".to_string(), (*name).clone());
        out.push_row(row);
    }
    Ok(out)
}

/// Write one document per (cell, presentation) response summary.
///
/// Without `force` the whole experiment is skipped if any of its responses is already
/// stored. With `force` they are deleted first.
pub fn write_stimulus_response(
    client: &mut DocumentClient,
    session: &dyn SessionData,
    force: bool,
) -> anyhow::Result<WriteReport> {
    let oeid = session.ophys_experiment_id();
    let mut report = WriteReport::new(StimulusResponseRecord::COLLECTION);

    if !force {
        let existing = client
            .ophys(StimulusResponseRecord::COLLECTION)
            .count(&experiment_filter(oeid))?;
        if existing > 0 {
            debug!(ophys_experiment_id = oeid, existing, "experiment already stored");
            report.skipped = existing;
            return Ok(report.finish(Some(oeid)));
        }
    }

    let mut responses = session
        .stimulus_response()
        .context("load stimulus response")?;
    responses.drop_columns(STIMULUS_RESPONSE_DROPPED);
    let presentations = session
        .stimulus_presentations()
        .context("load stimulus presentations")?;
    let joined = join_image_names(&responses, &presentations)?;
    let records = joined
        .rows()
        .map(|row| StimulusResponseRecord::from_row(oeid, &row))
        .collect::<anyhow::Result<Vec<_>>>()
        .with_context(|| format!("stimulus response of experiment {oeid}"))?;

    let mut coll = client.ophys(StimulusResponseRecord::COLLECTION);
    if force {
        report.deleted = coll.delete_many(&experiment_filter(oeid))?;
    }
    upsert_all(&mut coll, &records, force, &mut report)?;
    Ok(report.finish(Some(oeid)))
}

/// Stack the event-locked cube into one record per (cell, presentation).
pub fn eventlocked_records(
    session: &dyn SessionData,
) -> anyhow::Result<Vec<EventLockedTraceRecord>> {
    let oeid = session.ophys_experiment_id();
    let traces = session
        .eventlocked_traces()
        .context("load event-locked traces")?;
    let Some((t_0, t_f)) = traces.time_bounds() else {
        anyhow::bail!("event-locked traces of experiment {oeid} have no timestamps");
    };
    let stacked = traces
        .stacked()
        .with_context(|| format!("event-locked traces of experiment {oeid}"))?;
    Ok(stacked
        .map(|(cell, presentation, dff)| EventLockedTraceRecord {
            ophys_experiment_id: oeid,
            cell_specimen_id: cell,
            stimulus_presentations_id: presentation,
            t_0,
            t_f,
            dff: dff.to_vec(),
        })
        .collect())
}

/// Write one document per (cell, presentation) event-locked trace.
pub fn write_eventlocked_traces(
    client: &mut DocumentClient,
    session: &dyn SessionData,
    mode: TraceWriteMode,
) -> anyhow::Result<WriteReport> {
    let oeid = session.ophys_experiment_id();
    let records = eventlocked_records(session)?;
    let mut report = WriteReport::new(EventLockedTraceRecord::COLLECTION);
    let mut coll = client.ophys(EventLockedTraceRecord::COLLECTION);

    match mode {
        TraceWriteMode::Upsert => upsert_all(&mut coll, &records, false, &mut report)?,
        TraceWriteMode::BulkReplace | TraceWriteMode::BulkAppend => {
            if mode == TraceWriteMode::BulkReplace {
                report.deleted = coll.delete_many(&experiment_filter(oeid))?;
            } else {
                warn!(
                    ophys_experiment_id = oeid,
                    "appending event-locked traces without delete; re-runs duplicate documents"
                );
            }
            let docs: Vec<Document> = records
                .iter()
                .map(|r| clean_and_timestamp(&r.to_fields()))
                .collect();
            report.inserted = coll
                .insert_many(&docs)
                .with_context(|| format!("bulk insert traces of experiment {oeid}"))?;
        }
    }
    Ok(report.finish(Some(oeid)))
}

/// Write the experiment's stimulus table as one document of parallel arrays.
///
/// Without `force` the stored document is merged; with `force` it is replaced.
pub fn write_stimulus_presentations(
    client: &mut DocumentClient,
    session: &dyn SessionData,
    force: bool,
) -> anyhow::Result<WriteReport> {
    let oeid = session.ophys_experiment_id();
    let mut table = session
        .extended_stimulus_presentations()
        .context("load extended stimulus presentations")?;
    table.drop_columns(STIMULUS_PRESENTATIONS_DROPPED);
    let record = StimulusPresentationsRecord {
        ophys_experiment_id: oeid,
        columns: table.into(),
    };

    let mut report = WriteReport::new(StimulusPresentationsRecord::COLLECTION);
    let mut coll = client.ophys(StimulusPresentationsRecord::COLLECTION);
    if force {
        report.deleted = coll.delete_many(&experiment_filter(oeid))?;
    }
    upsert_all(&mut coll, std::slice::from_ref(&record), force, &mut report)?;
    Ok(report.finish(Some(oeid)))
}

/// Write one document per (experiment, cell) row of a metrics table.
///
/// The table may name its experiment column `experiment_id`; it is stored as
/// `ophys_experiment_id`. With `force` every experiment present in the table is deleted
/// first.
pub fn write_metrics(
    client: &mut DocumentClient,
    metrics: &Table,
    force: bool,
) -> anyhow::Result<WriteReport> {
    let mut table = metrics.clone();
    table.rename_column("experiment_id", "ophys_experiment_id");
    let records = table
        .rows()
        .map(|row| MetricsRecord::from_row(&row))
        .collect::<anyhow::Result<Vec<_>>>()
        .context("metrics table")?;

    let mut report = WriteReport::new(MetricsRecord::COLLECTION);
    let mut coll = client.ophys(MetricsRecord::COLLECTION);
    if force {
        let experiments: BTreeSet<i64> = records.iter().map(|r| r.ophys_experiment_id).collect();
        for oeid in experiments {
            report.deleted += coll.delete_many(&experiment_filter(oeid))?;
        }
    }
    upsert_all(&mut coll, &records, force, &mut report)?;

    let single = match records.as_slice() {
        [first, rest @ ..]
            if rest
                .iter()
                .all(|r| r.ophys_experiment_id == first.ophys_experiment_id) =>
        {
            Some(first.ophys_experiment_id)
        }
        _ => None,
    };
    Ok(report.finish(single))
}
