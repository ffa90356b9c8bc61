//! Typed records, one per collection.
//!
//! Each record declares its collection, its identity fields and its field list through
//! [`Record`]. Normalization is then one generic pass over [`Record::to_fields`].

use anyhow::Context;
use indexmap::IndexMap;

use crate::field::{Field, RawRecord};
use crate::table::TableError;

/// A record stored in one collection and identified by a fixed set of fields.
pub trait Record {
    /// Target collection under [`crate::store::OPHYS_DATABASE`].
    const COLLECTION: &'static str;
    /// Identity fields; at most one stored document may share their values.
    const KEY_FIELDS: &'static [&'static str];

    /// Declared fields in storage order.
    fn to_fields(&self) -> RawRecord;
}

fn require<'a>(row: &'a RawRecord, name: &str) -> Result<&'a Field, TableError> {
    row.get(name)
        .ok_or_else(|| TableError::MissingColumn(name.to_string()))
}

fn require_id(row: &RawRecord, name: &str) -> anyhow::Result<i64> {
    require(row, name)?
        .as_i64()
        .with_context(|| format!("column '{name}' is not an integer id"))
}

fn float_or_nan(row: &RawRecord, name: &str) -> anyhow::Result<f64> {
    let field = require(row, name)?;
    if field.is_null() {
        return Ok(f64::NAN);
    }
    field
        .as_f64()
        .with_context(|| format!("column '{name}' is not numeric"))
}

fn extras(row: &RawRecord, known: &[&str]) -> RawRecord {
    row.iter()
        .filter(|(k, _)| !known.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// One imaging session in the master manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRecord {
    /// Session identifier (identity).
    pub ophys_session_id: i64,
    /// Experiment identifier.
    pub ophys_experiment_id: Option<i64>,
    /// Experiment container identifier.
    pub container_id: Option<i64>,
    /// Behavior (foraging) session identifier.
    pub foraging_id: Option<String>,
    /// Remaining session metadata, in source order.
    pub metadata: RawRecord,
}

impl ManifestRecord {
    const KNOWN: &'static [&'static str] = &[
        "ophys_session_id",
        "ophys_experiment_id",
        "container_id",
        "foraging_id",
    ];

    /// Build from one row of the sessions table.
    pub fn from_row(row: &RawRecord) -> anyhow::Result<Self> {
        let opt_id = |name: &str| row.get(name).and_then(Field::as_i64);
        Ok(Self {
            ophys_session_id: require_id(row, "ophys_session_id")?,
            ophys_experiment_id: opt_id("ophys_experiment_id"),
            container_id: opt_id("container_id"),
            foraging_id: row.get("foraging_id").and_then(|f| match f {
                Field::Text(s) => Some(s.clone()),
                Field::Null => None,
                other => other.as_i64().map(|v| v.to_string()),
            }),
            metadata: extras(row, Self::KNOWN),
        })
    }
}

impl Record for ManifestRecord {
    const COLLECTION: &'static str = "manifest";
    const KEY_FIELDS: &'static [&'static str] = &["ophys_session_id"];

    fn to_fields(&self) -> RawRecord {
        let mut out = IndexMap::from([
            ("ophys_session_id".to_string(), Field::I64(self.ophys_session_id)),
            ("ophys_experiment_id".to_string(), self.ophys_experiment_id.into()),
            ("container_id".to_string(), self.container_id.into()),
            ("foraging_id".to_string(), self.foraging_id.clone().into()),
        ]);
        out.extend(self.metadata.clone());
        out
    }
}

/// Fluorescence (dF/F) trace of one cell ROI.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    /// Experiment identifier.
    pub ophys_experiment_id: i64,
    /// Cell identifier, stable across sessions.
    pub cell_specimen_id: i64,
    /// Region-of-interest identifier within this experiment.
    pub cell_roi_id: i64,
    /// Time series samples.
    pub dff: Vec<f64>,
}

impl TraceRecord {
    /// Build from one row of a session's `dff_traces` table.
    pub fn from_row(ophys_experiment_id: i64, row: &RawRecord) -> anyhow::Result<Self> {
        Ok(Self {
            ophys_experiment_id,
            cell_specimen_id: require_id(row, "cell_specimen_id")?,
            cell_roi_id: require_id(row, "cell_roi_id")?,
            dff: require(row, "dff")?
                .to_f64_vec()
                .context("column 'dff' is not a numeric sequence")?,
        })
    }
}

impl Record for TraceRecord {
    const COLLECTION: &'static str = "dff_traces";
    const KEY_FIELDS: &'static [&'static str] =
        &["ophys_experiment_id", "cell_specimen_id", "cell_roi_id"];

    fn to_fields(&self) -> RawRecord {
        IndexMap::from([
            ("ophys_experiment_id".to_string(), Field::I64(self.ophys_experiment_id)),
            ("cell_specimen_id".to_string(), Field::I64(self.cell_specimen_id)),
            ("cell_roi_id".to_string(), Field::I64(self.cell_roi_id)),
            ("dff".to_string(), self.dff.clone().into()),
        ])
    }
}

/// Response summary of one cell to one stimulus presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusResponseRecord {
    /// Experiment identifier.
    pub ophys_experiment_id: i64,
    /// Cell identifier.
    pub cell_specimen_id: i64,
    /// Stimulus presentation identifier.
    pub stimulus_presentations_id: i64,
    /// Mean response in the response window.
    pub mean_response: f64,
    /// Mean response in the baseline window.
    pub baseline_response: f64,
    /// Significance of the response.
    pub p_value: f64,
    /// Image shown during the presentation.
    pub image_name: Option<String>,
    /// Further summary columns, in source order.
    pub extra: RawRecord,
}

impl StimulusResponseRecord {
    const KNOWN: &'static [&'static str] = &[
        "ophys_experiment_id",
        "cell_specimen_id",
        "stimulus_presentations_id",
        "mean_response",
        "baseline_response",
        "p_value",
        "image_name",
    ];

    /// Build from one row of the stimulus response table (already joined with
    /// `image_name`).
    pub fn from_row(ophys_experiment_id: i64, row: &RawRecord) -> anyhow::Result<Self> {
        Ok(Self {
            ophys_experiment_id,
            cell_specimen_id: require_id(row, "cell_specimen_id")?,
            stimulus_presentations_id: require_id(row, "stimulus_presentations_id")?,
            mean_response: float_or_nan(row, "mean_response")?,
            baseline_response: float_or_nan(row, "baseline_response")?,
            p_value: float_or_nan(row, "p_value")?,
            image_name: row
                .get("image_name")
                .and_then(Field::as_str)
                .map(str::to_string),
            extra: extras(row, Self::KNOWN),
        })
    }
}

impl Record for StimulusResponseRecord {
    const COLLECTION: &'static str = "stimulus_response";
    const KEY_FIELDS: &'static [&'static str] = &[
        "ophys_experiment_id",
        "cell_specimen_id",
        "stimulus_presentations_id",
    ];

    fn to_fields(&self) -> RawRecord {
        let mut out = IndexMap::from([
            ("ophys_experiment_id".to_string(), Field::I64(self.ophys_experiment_id)),
            ("cell_specimen_id".to_string(), Field::I64(self.cell_specimen_id)),
            (
                "stimulus_presentations_id".to_string(),
                Field::I64(self.stimulus_presentations_id),
            ),
            ("mean_response".to_string(), Field::F64(self.mean_response)),
            ("baseline_response".to_string(), Field::F64(self.baseline_response)),
            ("p_value".to_string(), Field::F64(self.p_value)),
            ("image_name".to_string(), self.image_name.clone().into()),
        ]);
        out.extend(self.extra.clone());
        out
    }
}

/// Trace of one cell aligned to one stimulus presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLockedTraceRecord {
    /// Experiment identifier.
    pub ophys_experiment_id: i64,
    /// Cell identifier.
    pub cell_specimen_id: i64,
    /// Stimulus presentation identifier.
    pub stimulus_presentations_id: i64,
    /// First event-locked timestamp, seconds relative to the event.
    pub t_0: f64,
    /// Last event-locked timestamp.
    pub t_f: f64,
    /// Sampled trace.
    pub dff: Vec<f64>,
}

impl Record for EventLockedTraceRecord {
    const COLLECTION: &'static str = "stimulus_response_traces";
    const KEY_FIELDS: &'static [&'static str] = &[
        "ophys_experiment_id",
        "cell_specimen_id",
        "stimulus_presentations_id",
    ];

    fn to_fields(&self) -> RawRecord {
        IndexMap::from([
            ("ophys_experiment_id".to_string(), Field::I64(self.ophys_experiment_id)),
            ("cell_specimen_id".to_string(), Field::I64(self.cell_specimen_id)),
            (
                "stimulus_presentations_id".to_string(),
                Field::I64(self.stimulus_presentations_id),
            ),
            ("t_0".to_string(), Field::F64(self.t_0)),
            ("t_f".to_string(), Field::F64(self.t_f)),
            ("dff".to_string(), self.dff.clone().into()),
        ])
    }
}

/// A session's whole stimulus table, flattened into parallel arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusPresentationsRecord {
    /// Experiment identifier (identity).
    pub ophys_experiment_id: i64,
    /// Column name → values, one entry per presentation.
    pub columns: IndexMap<String, Vec<Field>>,
}

impl Record for StimulusPresentationsRecord {
    const COLLECTION: &'static str = "stimulus_presentations";
    const KEY_FIELDS: &'static [&'static str] = &["ophys_experiment_id"];

    fn to_fields(&self) -> RawRecord {
        let mut out = IndexMap::from([(
            "ophys_experiment_id".to_string(),
            Field::I64(self.ophys_experiment_id),
        )]);
        for (name, cells) in &self.columns {
            out.insert(name.clone(), Field::Seq(cells.clone()));
        }
        out
    }
}

/// Derived summary metrics for one cell in one experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRecord {
    /// Experiment identifier.
    pub ophys_experiment_id: i64,
    /// Cell identifier.
    pub cell_specimen_id: i64,
    /// Metric name → value, in source order.
    pub metrics: RawRecord,
}

impl MetricsRecord {
    /// Build from one row of a metrics table whose experiment column is already named
    /// `ophys_experiment_id`.
    pub fn from_row(row: &RawRecord) -> anyhow::Result<Self> {
        Ok(Self {
            ophys_experiment_id: require_id(row, "ophys_experiment_id")?,
            cell_specimen_id: require_id(row, "cell_specimen_id")?,
            metrics: extras(row, Self::KEY_FIELDS),
        })
    }
}

impl Record for MetricsRecord {
    const COLLECTION: &'static str = "metrics";
    const KEY_FIELDS: &'static [&'static str] = &["ophys_experiment_id", "cell_specimen_id"];

    fn to_fields(&self) -> RawRecord {
        let mut out = IndexMap::from([
            ("ophys_experiment_id".to_string(), Field::I64(self.ophys_experiment_id)),
            ("cell_specimen_id".to_string(), Field::I64(self.cell_specimen_id)),
        ]);
        out.extend(self.metrics.clone());
        out
    }
}
