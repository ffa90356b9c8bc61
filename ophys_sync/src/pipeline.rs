//! Per-session batch upload.
//!
//! The dispatcher selects sessions from the exported sessions table and submits one cluster
//! job per session index. Each job reloads the same table, applies the same
//! [`SessionFilter`], loads its session through a [`SessionLoader`] and runs the configured
//! [`UploadStep`]s with force-write on.
//!
//! Failure policy is best effort: [`run_upload`] records a failing index and moves on. There
//! is no retry and no backoff.

use std::fmt;
use std::process::Command;

use anyhow::{Context, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cell_metrics::metrics_table;
use crate::config::{PipelineCfg, SyncConfig};
use crate::field::Field;
use crate::records::ManifestRecord;
use crate::session::{JsonSessionCache, SessionData, SessionLoader, load_table};
use crate::store::DocumentClient;
use crate::table::Table;
use crate::writers::{
    TraceWriteMode, WriteReport, write_dff_traces, write_eventlocked_traces, write_manifest_entry,
    write_metrics, write_stimulus_presentations, write_stimulus_response,
};

/// One writer a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum UploadStep {
    /// Session row into `manifest`.
    Manifest,
    /// Per-ROI traces into `dff_traces`.
    DffTraces,
    /// Response summaries into `stimulus_response`.
    StimulusResponse,
    /// Per-presentation traces into `stimulus_response_traces`.
    EventlockedTraces,
    /// Stimulus table into `stimulus_presentations`.
    StimulusPresentations,
    /// Cell metrics derived from the stimulus response into `metrics`.
    Metrics,
}

impl UploadStep {
    fn needs_session(self) -> bool {
        self != UploadStep::Manifest
    }
}

impl fmt::Display for UploadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadStep::Manifest => "manifest",
            UploadStep::DffTraces => "dff_traces",
            UploadStep::StimulusResponse => "stimulus_response",
            UploadStep::EventlockedTraces => "eventlocked_traces",
            UploadStep::StimulusPresentations => "stimulus_presentations",
            UploadStep::Metrics => "metrics",
        };
        f.write_str(name)
    }
}

/// Which sessions of the sessions table are uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFilter {
    /// Sessions recorded on these rigs are dropped.
    pub exclude_equipment: Vec<String>,
    /// Sessions whose `stage_name` is null are dropped.
    pub require_stage: bool,
}

impl Default for SessionFilter {
    fn default() -> Self {
        Self {
            exclude_equipment: vec!["MESO.1".to_string()],
            require_stage: true,
        }
    }
}

impl SessionFilter {
    /// Filter described by the `[pipeline]` settings.
    pub fn from_config(cfg: &PipelineCfg) -> Self {
        Self {
            exclude_equipment: cfg.exclude_equipment.clone(),
            require_stage: cfg.require_stage,
        }
    }

    /// Selected rows, in source order. Row positions in the result are the job indices.
    pub fn select(&self, sessions: &Table) -> anyhow::Result<Table> {
        if !self.exclude_equipment.is_empty() {
            sessions.require_column("equipment_name")?;
        }
        if self.require_stage {
            sessions.require_column("stage_name")?;
        }
        Ok(sessions.filter_rows(|row| {
            let excluded = row
                .get("equipment_name")
                .and_then(Field::as_str)
                .is_some_and(|eq| self.exclude_equipment.iter().any(|x| x == eq));
            let staged = row.get("stage_name").is_some_and(|s| !s.is_null());
            !excluded && (staged || !self.require_stage)
        }))
    }
}

/// Load the sessions table named by the settings and apply their filter.
pub fn load_sessions(cfg: &PipelineCfg) -> anyhow::Result<Table> {
    let all = load_table(&cfg.sessions_file)
        .with_context(|| format!("load sessions table {}", cfg.sessions_file.display()))?;
    let selected = SessionFilter::from_config(cfg).select(&all)?;
    info!(
        total = all.len(),
        selected = selected.len(),
        "selected sessions for upload"
    );
    Ok(selected)
}

/// Manifest entry of the session at `index` of a selected sessions table.
pub fn session_entry(sessions: &Table, index: usize) -> anyhow::Result<ManifestRecord> {
    let row = sessions.row(index).with_context(|| {
        format!(
            "session index {index} out of range ({} sessions selected)",
            sessions.len()
        )
    })?;
    ManifestRecord::from_row(&row).with_context(|| format!("session index {index}"))
}

fn write_session_step(
    client: &mut DocumentClient,
    session: &dyn SessionData,
    step: UploadStep,
) -> anyhow::Result<WriteReport> {
    match step {
        UploadStep::Manifest => bail!("manifest step does not read session data"),
        UploadStep::DffTraces => write_dff_traces(client, session, true),
        UploadStep::StimulusResponse => write_stimulus_response(client, session, true),
        UploadStep::EventlockedTraces => {
            write_eventlocked_traces(client, session, TraceWriteMode::from_force(true))
        }
        UploadStep::StimulusPresentations => write_stimulus_presentations(client, session, true),
        UploadStep::Metrics => {
            let responses = session.stimulus_response()?;
            let metrics = metrics_table(&responses, session.ophys_experiment_id())?;
            write_metrics(client, &metrics, true)
        }
    }
}

/// Run `steps` for one session with force-write on. The session is loaded only if a step
/// needs it.
pub fn upload_session(
    client: &mut DocumentClient,
    loader: &dyn SessionLoader,
    entry: &ManifestRecord,
    steps: &[UploadStep],
) -> anyhow::Result<Vec<WriteReport>> {
    let mut session: Option<Box<dyn SessionData>> = None;
    let mut reports = Vec::with_capacity(steps.len());
    for &step in steps {
        if !step.needs_session() {
            reports.push(write_manifest_entry(client, entry)?);
            continue;
        }
        if session.is_none() {
            session = Some(
                loader
                    .load(entry.ophys_session_id)
                    .with_context(|| format!("load session {}", entry.ophys_session_id))?,
            );
        }
        if let Some(loaded) = session.as_deref() {
            let report = write_session_step(client, loaded, step)
                .with_context(|| format!("{step} for session {}", entry.ophys_session_id))?;
            reports.push(report);
        }
    }
    Ok(reports)
}

/// A session whose upload failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSession {
    /// Index into the selected sessions table.
    pub index: usize,
    /// Session id, when the entry could be read at all.
    pub ophys_session_id: Option<i64>,
    /// Rendered error chain.
    pub error: String,
}

/// Outcome of a batch upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Sessions tried.
    pub attempted: usize,
    /// Sessions uploaded without error.
    pub succeeded: usize,
    /// Sessions that failed, in index order.
    pub failed: Vec<FailedSession>,
}

impl UploadReport {
    /// Indices to inspect by hand.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failed.iter().map(|f| f.index).collect()
    }

    /// True if no session failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for UploadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} of {} sessions uploaded",
            self.succeeded, self.attempted
        )?;
        for failed in &self.failed {
            match failed.ophys_session_id {
                Some(id) => writeln!(
                    f,
                    "! index {} (session {id}): {}",
                    failed.index, failed.error
                )?,
                None => writeln!(f, "! index {}: {}", failed.index, failed.error)?,
            }
        }
        Ok(())
    }
}

/// Upload every selected session in turn, collecting failures instead of stopping.
pub fn run_upload(
    client: &mut DocumentClient,
    loader: &dyn SessionLoader,
    sessions: &Table,
    steps: &[UploadStep],
) -> UploadReport {
    let mut report = UploadReport::default();
    for index in 0..sessions.len() {
        report.attempted += 1;
        let entry = session_entry(sessions, index);
        let ophys_session_id = entry.as_ref().ok().map(|e| e.ophys_session_id);
        let result = entry.and_then(|e| upload_session(client, loader, &e, steps));
        match result {
            Ok(writes) => {
                report.succeeded += 1;
                info!(index, ophys_session_id, writes = writes.len(), "session uploaded");
            }
            Err(err) => {
                let error = format!("{err:#}");
                warn!(index, ophys_session_id, %error, "session upload failed");
                report.failed.push(FailedSession {
                    index,
                    ophys_session_id,
                    error,
                });
            }
        }
    }
    report
}

/// Job payload: upload the session at `index` using the configured pipeline.
pub fn upload_index(cfg: &SyncConfig, index: usize) -> anyhow::Result<Vec<WriteReport>> {
    let pipeline = cfg.pipeline()?;
    let sessions = load_sessions(pipeline)?;
    let entry = session_entry(&sessions, index)?;
    let loader = JsonSessionCache::new(&pipeline.session_cache_dir);
    let mut client = DocumentClient::open(&pipeline.server, cfg)?;
    let reports = upload_session(&mut client, &loader, &entry, &pipeline.steps)?;
    client.close();
    Ok(reports)
}

/// One cluster job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Job name shown by the scheduler.
    pub name: String,
    /// Session index the job uploads.
    pub index: usize,
}

/// One job per selected session.
pub fn plan_jobs(sessions: &Table) -> Vec<JobSpec> {
    (0..sessions.len())
        .map(|index| JobSpec {
            name: format!("upload_session_{index}"),
            index,
        })
        .collect()
}

/// Full submitter command line for `job`: the configured command, then the job name and
/// the session index.
pub fn command_line(job: &JobSpec, command: &[String]) -> Vec<String> {
    let mut line = command.to_vec();
    line.push(job.name.clone());
    line.push(job.index.to_string());
    line
}

/// Hand `job` to the external submitter. With `dry_run` nothing is executed. Returns the
/// command line either way.
pub fn submit(job: &JobSpec, command: &[String], dry_run: bool) -> anyhow::Result<Vec<String>> {
    let line = command_line(job, command);
    if dry_run {
        info!(job = %job.name, command = %line.join(" "), "dry run");
        return Ok(line);
    }
    if command.is_empty() {
        bail!("submit command is empty");
    }
    let (program, args) = (&line[0], &line[1..]);
    let status = Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("spawn {program}"))?;
    if !status.success() {
        bail!("submitting {} exited with {status}", job.name);
    }
    info!(job = %job.name, "submitted");
    Ok(line)
}
