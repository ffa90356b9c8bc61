//! Sync configuration: document servers and the batch upload pipeline.
//!
//! The configuration is a TOML file. Its location comes from the `OPHYS_SYNC_CONFIG`
//! environment variable, falling back to [`DEFAULT_CONFIG_PATH`] on the shared network
//! volume every cluster job can see.
//!
//! ```toml
//! [servers.visual_behavior_data]
//! url = "/allen/.../visual_behavior_data.db"
//!
//! [pipeline]
//! server = "visual_behavior_data"
//! sessions_file = "/allen/.../sessions.json"
//! session_cache_dir = "/allen/.../session_cache"
//! exclude_equipment = ["MESO.1"]
//! require_stage = true
//! steps = ["eventlocked_traces"]
//! submit_command = ["submit-job", "--queue", "braintv", "--mem", "15g"]
//! ```
//!
//! Normalization trims and lowercases server names and rejects duplicates after
//! normalization, empty URLs, and a pipeline pointing at an undeclared server.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::pipeline::UploadStep;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "OPHYS_SYNC_CONFIG";

/// Fallback configuration path on the shared network volume.
pub const DEFAULT_CONFIG_PATH: &str =
    "/allen/programs/braintv/workgroups/nc-ophys/visual_behavior/ophys_sync.toml";

/// Server used when a caller does not name one.
pub const DEFAULT_SERVER: &str = "visual_behavior_data";

/// Errors raised while resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The named server is not declared under `[servers]`.
    #[error("unknown document server '{0}'")]
    UnknownServer(String),
    /// A command needs the `[pipeline]` table but the file has none.
    #[error("configuration has no [pipeline] section")]
    MissingPipeline,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Named document servers.
    pub servers: IndexMap<String, ServerCfg>,
    /// Batch upload settings; only required by the pipeline commands.
    pub pipeline: Option<PipelineCfg>,
}

/// Connection details for one named document server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerCfg {
    /// Store location: a `sqlite:` URL or a bare file path.
    pub url: String,
}

/// Settings shared by the dispatcher and the per-session job payload.
///
/// Both sides select sessions with the same filter so a job index means the same session
/// on either end.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineCfg {
    /// Server the jobs write to.
    #[serde(default = "default_server")]
    pub server: String,
    /// Sessions table exported from the warehouse (JSON, column orientation).
    pub sessions_file: PathBuf,
    /// Root directory of per-session exported tables.
    pub session_cache_dir: PathBuf,
    /// Sessions recorded on these rigs are skipped.
    #[serde(default = "default_excluded_equipment")]
    pub exclude_equipment: Vec<String>,
    /// Skip sessions with no behavior stage.
    #[serde(default = "default_true")]
    pub require_stage: bool,
    /// Writers each job runs, in order.
    #[serde(default = "default_steps")]
    pub steps: Vec<UploadStep>,
    /// External job submitter; the job name and session index are appended.
    pub submit_command: Option<Vec<String>>,
}

fn default_server() -> String {
    DEFAULT_SERVER.to_string()
}

fn default_excluded_equipment() -> Vec<String> {
    vec!["MESO.1".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_steps() -> Vec<UploadStep> {
    vec![UploadStep::EventlockedTraces]
}

fn normalize_server_name(name: &str) -> String {
    name.trim().to_lowercase()
}

impl SyncConfig {
    /// Look up a server by name (case and surrounding whitespace are ignored).
    pub fn server(&self, name: &str) -> Result<&ServerCfg, ConfigError> {
        self.servers
            .get(&normalize_server_name(name))
            .ok_or_else(|| ConfigError::UnknownServer(name.to_string()))
    }

    /// The `[pipeline]` table, or [`ConfigError::MissingPipeline`].
    pub fn pipeline(&self) -> Result<&PipelineCfg, ConfigError> {
        self.pipeline.as_ref().ok_or(ConfigError::MissingPipeline)
    }

    /// Point the pipeline at another declared server and/or replace its steps.
    ///
    /// `None` and an empty `steps` keep the configured values.
    pub fn override_pipeline(
        &mut self,
        server: Option<&str>,
        steps: &[UploadStep],
    ) -> Result<(), ConfigError> {
        let server = server
            .map(|name| self.server(name).map(|_| normalize_server_name(name)))
            .transpose()?;
        let pipeline = self.pipeline.as_mut().ok_or(ConfigError::MissingPipeline)?;
        if let Some(server) = server {
            pipeline.server = server;
        }
        if !steps.is_empty() {
            pipeline.steps = steps.to_vec();
        }
        Ok(())
    }
}

/// Normalize server names in place and validate cross references.
pub fn normalize_config(cfg: &mut SyncConfig) -> anyhow::Result<()> {
    let mut rebuilt: IndexMap<String, ServerCfg> = IndexMap::new();
    for (raw_name, mut server) in std::mem::take(&mut cfg.servers) {
        let name = normalize_server_name(&raw_name);
        if name.is_empty() {
            bail!("server name cannot be empty after trimming");
        }
        if rebuilt.contains_key(&name) {
            bail!("duplicate server name after normalization: {name}");
        }
        server.url = server.url.trim().to_string();
        if server.url.is_empty() {
            bail!("server '{name}' has an empty url");
        }
        rebuilt.insert(name, server);
    }
    cfg.servers = rebuilt;

    if let Some(pipeline) = cfg.pipeline.as_mut() {
        pipeline.server = normalize_server_name(&pipeline.server);
        if !cfg.servers.contains_key(&pipeline.server) {
            bail!(
                "pipeline server '{}' is not declared under [servers]",
                pipeline.server
            );
        }
    }
    Ok(())
}

/// Parse and normalize a configuration from a TOML string.
pub fn load_config_str(toml_str: &str) -> anyhow::Result<SyncConfig> {
    let mut cfg: SyncConfig = toml::from_str(toml_str).context("failed to parse sync config")?;
    normalize_config(&mut cfg).context("invalid sync config")?;
    Ok(cfg)
}

/// Read, parse and normalize a configuration file.
pub fn load_config_path(path: impl AsRef<Path>) -> anyhow::Result<SyncConfig> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("read sync config {}", path.as_ref().display()))?;
    load_config_str(&text)
}

/// Path of the configuration file: `$OPHYS_SYNC_CONFIG` or [`DEFAULT_CONFIG_PATH`].
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load the configuration from [`config_path`]. A missing file is fatal.
pub fn load_config() -> anyhow::Result<SyncConfig> {
    load_config_path(config_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [servers." Visual_Behavior_Data "]
        url = " /data/vbd.db "

        [servers.scratch]
        url = "sqlite:///tmp/scratch.db"

        [pipeline]
        server = "VISUAL_BEHAVIOR_DATA"
        sessions_file = "/data/sessions.json"
        session_cache_dir = "/data/cache"
    "#;

    #[test]
    fn normalizes_server_names_and_urls() {
        let cfg = load_config_str(SAMPLE).unwrap();
        let names: Vec<&str> = cfg.servers.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["visual_behavior_data", "scratch"]);
        assert_eq!(cfg.server("Visual_Behavior_Data").unwrap().url, "/data/vbd.db");
    }

    #[test]
    fn pipeline_defaults_apply() {
        let cfg = load_config_str(SAMPLE).unwrap();
        let p = cfg.pipeline().unwrap();
        assert_eq!(p.server, "visual_behavior_data");
        assert_eq!(p.exclude_equipment, vec!["MESO.1"]);
        assert!(p.require_stage);
        assert_eq!(p.steps, vec![UploadStep::EventlockedTraces]);
        assert!(p.submit_command.is_none());
    }

    #[test]
    fn pipeline_overrides_replace_server_and_steps() {
        let mut cfg = load_config_str(SAMPLE).unwrap();
        cfg.override_pipeline(None, &[]).unwrap();
        assert_eq!(cfg.pipeline().unwrap().server, "visual_behavior_data");

        cfg.override_pipeline(Some(" Scratch "), &[UploadStep::Manifest, UploadStep::Metrics])
            .unwrap();
        let p = cfg.pipeline().unwrap();
        assert_eq!(p.server, "scratch");
        assert_eq!(p.steps, vec![UploadStep::Manifest, UploadStep::Metrics]);

        let err = cfg.override_pipeline(Some("mouseseeks"), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownServer(_)));
        assert_eq!(cfg.pipeline().unwrap().server, "scratch");

        let mut bare = load_config_str("[servers.vbd]\nurl = \"a.db\"").unwrap();
        assert!(matches!(
            bare.override_pipeline(Some("vbd"), &[]),
            Err(ConfigError::MissingPipeline)
        ));
    }

    #[test]
    fn unknown_server_is_reported() {
        let cfg = load_config_str(SAMPLE).unwrap();
        let err = cfg.server("mouseseeks").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownServer(ref s) if s == "mouseseeks"));
    }

    #[test]
    fn duplicate_server_after_normalization_errors() {
        let toml_str = r#"
            [servers.VBD]
            url = "a.db"
            [servers.vbd]
            url = "b.db"
        "#;
        let err = load_config_str(toml_str).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate server name"));
    }

    #[test]
    fn pipeline_must_reference_declared_server() {
        let toml_str = r#"
            [servers.vbd]
            url = "a.db"
            [pipeline]
            server = "other"
            sessions_file = "s.json"
            session_cache_dir = "cache"
        "#;
        let err = load_config_str(toml_str).unwrap_err();
        assert!(format!("{err:#}").contains("not declared"));
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = load_config_path("/nonexistent/ophys_sync.toml").unwrap_err();
        assert!(err.to_string().contains("read sync config"));
    }
}
