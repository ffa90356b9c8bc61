//! Upstream session boundary.
//!
//! Session objects (trial/stimulus processing, trace extraction) live outside this crate.
//! Writers only see them through [`SessionData`], which hands over already-computed tables,
//! and pipelines obtain them through a [`SessionLoader`].
//!
//! [`JsonSessionCache`] is the flat-file loader used by the batch jobs: every session is a
//! directory of column-oriented JSON tables exported by the upstream tooling.
//!
//! ```text
//! <cache_dir>/<ophys_session_id>/
//!     session.json                          {"ophys_experiment_id": 880961028}
//!     dff_traces.json
//!     stimulus_response.json
//!     stimulus_presentations.json
//!     extended_stimulus_presentations.json
//!     eventlocked_traces.json
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::table::Table;

/// Already-computed tables for one experiment.
pub trait SessionData {
    /// Experiment the tables belong to.
    fn ophys_experiment_id(&self) -> i64;

    /// One row per cell: `cell_specimen_id`, `cell_roi_id`, `dff` (sample sequence).
    fn dff_traces(&self) -> anyhow::Result<Table>;

    /// One row per (cell, presentation): ids, `mean_response`, `baseline_response`,
    /// `p_value`, and the per-row `dff_trace` / `dff_trace_timestamps` arrays.
    fn stimulus_response(&self) -> anyhow::Result<Table>;

    /// One row per presentation, including `stimulus_presentations_id` and `image_name`.
    fn stimulus_presentations(&self) -> anyhow::Result<Table>;

    /// Stimulus presentations with behavioral annotations (licks, rewards, running speed).
    fn extended_stimulus_presentations(&self) -> anyhow::Result<Table>;

    /// Cell × presentation × time cube of event-locked traces.
    fn eventlocked_traces(&self) -> anyhow::Result<EventLockedTraces>;
}

/// Produces session data for a session id.
pub trait SessionLoader {
    /// Load the session's tables.
    fn load(&self, ophys_session_id: i64) -> anyhow::Result<Box<dyn SessionData>>;
}

/// Event-locked traces as a dense cube: cells × presentations × timestamps.
///
/// `data` is laid out cell-major, then presentation, then time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLockedTraces {
    /// Cell ids along the first axis.
    pub cell_specimen_ids: Vec<i64>,
    /// Presentation ids along the second axis.
    pub stimulus_presentations_ids: Vec<i64>,
    /// Event-locked timestamps along the third axis.
    pub eventlocked_timestamps: Vec<f64>,
    /// Flattened samples.
    pub data: Vec<f64>,
}

impl EventLockedTraces {
    /// Check that `data` has exactly one sample per (cell, presentation, timestamp).
    pub fn validate(&self) -> anyhow::Result<()> {
        let expected = self.cell_specimen_ids.len()
            * self.stimulus_presentations_ids.len()
            * self.eventlocked_timestamps.len();
        if self.data.len() != expected {
            bail!(
                "event-locked cube has {} samples, expected {} ({} cells x {} presentations x {} timestamps)",
                self.data.len(),
                expected,
                self.cell_specimen_ids.len(),
                self.stimulus_presentations_ids.len(),
                self.eventlocked_timestamps.len()
            );
        }
        Ok(())
    }

    /// Number of (cell, presentation) traces.
    pub fn trace_count(&self) -> usize {
        self.cell_specimen_ids.len() * self.stimulus_presentations_ids.len()
    }

    /// Traces stacked over (cell, presentation), cell-major:
    /// `(cell_specimen_id, stimulus_presentations_id, samples)`.
    ///
    /// Fails if the cube is ragged (see [`EventLockedTraces::validate`]).
    pub fn stacked(&self) -> anyhow::Result<impl Iterator<Item = (i64, i64, &[f64])> + '_> {
        self.validate()?;
        let n_t = self.eventlocked_timestamps.len();
        let n_p = self.stimulus_presentations_ids.len();
        Ok(self.data.chunks_exact(n_t.max(1)).take(self.trace_count()).enumerate().map(
            move |(k, samples)| {
                let cell = self.cell_specimen_ids[k / n_p];
                let pres = self.stimulus_presentations_ids[k % n_p];
                (cell, pres, samples)
            },
        ))
    }

    /// First and last timestamps, or `None` for an empty time axis.
    pub fn time_bounds(&self) -> Option<(f64, f64)> {
        Some((
            *self.eventlocked_timestamps.first()?,
            *self.eventlocked_timestamps.last()?,
        ))
    }
}

/// Session data held in memory.
#[derive(Debug, Clone, Default)]
pub struct SessionTables {
    /// Experiment id.
    pub ophys_experiment_id: i64,
    /// See [`SessionData::dff_traces`].
    pub dff_traces: Table,
    /// See [`SessionData::stimulus_response`].
    pub stimulus_response: Table,
    /// See [`SessionData::stimulus_presentations`].
    pub stimulus_presentations: Table,
    /// See [`SessionData::extended_stimulus_presentations`].
    pub extended_stimulus_presentations: Table,
    /// See [`SessionData::eventlocked_traces`].
    pub eventlocked_traces: Option<EventLockedTraces>,
}

impl SessionData for SessionTables {
    fn ophys_experiment_id(&self) -> i64 {
        self.ophys_experiment_id
    }

    fn dff_traces(&self) -> anyhow::Result<Table> {
        Ok(self.dff_traces.clone())
    }

    fn stimulus_response(&self) -> anyhow::Result<Table> {
        Ok(self.stimulus_response.clone())
    }

    fn stimulus_presentations(&self) -> anyhow::Result<Table> {
        Ok(self.stimulus_presentations.clone())
    }

    fn extended_stimulus_presentations(&self) -> anyhow::Result<Table> {
        Ok(self.extended_stimulus_presentations.clone())
    }

    fn eventlocked_traces(&self) -> anyhow::Result<EventLockedTraces> {
        let traces = self
            .eventlocked_traces
            .clone()
            .context("session has no event-locked traces")?;
        traces.validate()?;
        Ok(traces)
    }
}

#[derive(Debug, Deserialize)]
struct SessionMeta {
    ophys_experiment_id: i64,
}

/// Loader over a directory of exported session tables.
#[derive(Debug, Clone)]
pub struct JsonSessionCache {
    root: PathBuf,
}

impl JsonSessionCache {
    /// Loader rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding one session's tables.
    pub fn session_dir(&self, ophys_session_id: i64) -> PathBuf {
        self.root.join(ophys_session_id.to_string())
    }
}

impl SessionLoader for JsonSessionCache {
    fn load(&self, ophys_session_id: i64) -> anyhow::Result<Box<dyn SessionData>> {
        let dir = self.session_dir(ophys_session_id);
        let meta: SessionMeta = read_json(&dir.join("session.json"))?;
        debug!(
            ophys_session_id,
            ophys_experiment_id = meta.ophys_experiment_id,
            dir = %dir.display(),
            "loaded session metadata"
        );
        Ok(Box::new(JsonSession {
            dir,
            ophys_experiment_id: meta.ophys_experiment_id,
        }))
    }
}

/// One session backed by files; each table is read when first asked for.
struct JsonSession {
    dir: PathBuf,
    ophys_experiment_id: i64,
}

impl JsonSession {
    fn table(&self, name: &str) -> anyhow::Result<Table> {
        read_json(&self.dir.join(format!("{name}.json")))
    }
}

impl SessionData for JsonSession {
    fn ophys_experiment_id(&self) -> i64 {
        self.ophys_experiment_id
    }

    fn dff_traces(&self) -> anyhow::Result<Table> {
        self.table("dff_traces")
    }

    fn stimulus_response(&self) -> anyhow::Result<Table> {
        self.table("stimulus_response")
    }

    fn stimulus_presentations(&self) -> anyhow::Result<Table> {
        self.table("stimulus_presentations")
    }

    fn extended_stimulus_presentations(&self) -> anyhow::Result<Table> {
        self.table("extended_stimulus_presentations")
    }

    fn eventlocked_traces(&self) -> anyhow::Result<EventLockedTraces> {
        let traces: EventLockedTraces = read_json(&self.dir.join("eventlocked_traces.json"))?;
        traces.validate()?;
        Ok(traces)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
}

/// Read a column-oriented JSON table from disk (e.g. the sessions table).
pub fn load_table(path: impl AsRef<Path>) -> anyhow::Result<Table> {
    read_json(path.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cube() -> EventLockedTraces {
        EventLockedTraces {
            cell_specimen_ids: vec![10, 11],
            stimulus_presentations_ids: vec![0, 1, 2],
            eventlocked_timestamps: vec![-0.5, 0.0, 0.5],
            data: (0..18).map(f64::from).collect(),
        }
    }

    #[test]
    fn stacks_cell_major() {
        let c = cube();
        c.validate().unwrap();
        let stacked: Vec<_> = c.stacked().unwrap().collect();
        assert_eq!(stacked.len(), 6);
        assert_eq!(stacked[0], (10, 0, &[0.0, 1.0, 2.0][..]));
        assert_eq!(stacked[1], (10, 1, &[3.0, 4.0, 5.0][..]));
        assert_eq!(stacked[3], (11, 0, &[9.0, 10.0, 11.0][..]));
        assert_eq!(c.time_bounds(), Some((-0.5, 0.5)));
    }

    #[test]
    fn rejects_ragged_cube() {
        let mut c = cube();
        c.data.pop();
        assert!(c.validate().unwrap_err().to_string().contains("expected 18"));
        assert!(c.stacked().is_err());
    }

    #[test]
    fn json_cache_reads_lazily() {
        let dir = TempDir::new().unwrap();
        let session_dir = dir.path().join("880374622");
        std::fs::create_dir_all(&session_dir).unwrap();
        std::fs::write(
            session_dir.join("session.json"),
            r#"{"ophys_experiment_id": 880961028}"#,
        )
        .unwrap();
        std::fs::write(
            session_dir.join("dff_traces.json"),
            r#"{"cell_specimen_id": [1], "cell_roi_id": [2], "dff": [[0.1, 0.2]]}"#,
        )
        .unwrap();

        let cache = JsonSessionCache::new(dir.path());
        let session = cache.load(880374622).unwrap();
        assert_eq!(session.ophys_experiment_id(), 880961028);
        assert_eq!(session.dff_traces().unwrap().len(), 1);
        let err = session.stimulus_response().unwrap_err();
        assert!(err.to_string().contains("stimulus_response.json"));
        assert!(cache.load(1).is_err());
    }
}
