use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use ophys_sync::config::{DEFAULT_SERVER, load_config};
use ophys_sync::pipeline::{
    UploadStep, load_sessions, plan_jobs, run_upload, submit, upload_index,
};
use ophys_sync::readers;
use ophys_sync::session::JsonSessionCache;
use ophys_sync::store::{DocumentClient, Filter};

#[derive(Parser)]
#[command(version, about = "Sync ophys experiment tables into the document store")]
struct Cli {
    /// Document server to use (see [servers] in the config file). Overrides the
    /// [pipeline] server for `upload` and `run-all`.
    #[arg(long, global = true)]
    server: Option<String>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Apply pending store migrations.
    Migrate,
    /// List databases and their collections.
    Databases,
    /// Upload one session of the configured sessions table.
    Upload {
        /// Index into the selected sessions.
        index: usize,
        /// Writer to run instead of the configured steps; repeatable.
        #[arg(long = "step", value_enum)]
        steps: Vec<UploadStep>,
    },
    /// Upload every selected session in this process.
    RunAll {
        /// Writer to run instead of the configured steps; repeatable.
        #[arg(long = "step", value_enum)]
        steps: Vec<UploadStep>,
    },
    /// Submit one cluster job per selected session.
    Dispatch {
        #[arg(long)]
        dry_run: bool,
    },
    /// Print a stored table as column-oriented JSON.
    Read {
        #[arg(value_enum)]
        table: ReadTarget,
        /// Condition `field=value`; repeatable.
        #[arg(long = "filter", value_name = "FIELD=VALUE")]
        filters: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
enum ReadTarget {
    Manifest,
    DffTraces,
    StimulusResponse,
    EventlockedTraces,
    StimulusPresentations,
    Metrics,
}

fn main() -> Result<()> {
    ophys_sync::logging::init_tracing();
    let cli = Cli::parse();
    let mut cfg = load_config()?;
    let server = cli.server.as_deref().unwrap_or(DEFAULT_SERVER);

    match cli.cmd {
        Cmd::Migrate => {
            ophys_sync::db::migrate::run_all(&cfg.server(server)?.url)?;
            println!("migrations applied on {server}");
        }
        Cmd::Databases => {
            let client = DocumentClient::open(server, &cfg)?;
            for name in client.database_names() {
                let collections = client
                    .database(name)
                    .map(|db| db.collections.join(", "))
                    .unwrap_or_default();
                println!("{name}: {collections}");
            }
        }
        Cmd::Upload { index, steps } => {
            cfg.override_pipeline(cli.server.as_deref(), &steps)?;
            for report in upload_index(&cfg, index)? {
                println!("{report}");
            }
        }
        Cmd::RunAll { steps } => {
            cfg.override_pipeline(cli.server.as_deref(), &steps)?;
            let pipeline = cfg.pipeline()?;
            let sessions = load_sessions(pipeline)?;
            let loader = JsonSessionCache::new(&pipeline.session_cache_dir);
            let mut client = DocumentClient::open(&pipeline.server, &cfg)?;
            let report = run_upload(&mut client, &loader, &sessions, &pipeline.steps);
            print!("{report}");
        }
        Cmd::Dispatch { dry_run } => {
            if cli.server.is_some() {
                anyhow::bail!("dispatched jobs write to the [pipeline] server; drop --server");
            }
            let pipeline = cfg.pipeline()?;
            let command = match (&pipeline.submit_command, dry_run) {
                (Some(cmd), _) => cmd.clone(),
                (None, true) => Vec::new(),
                (None, false) => anyhow::bail!("[pipeline] has no submit_command"),
            };
            let sessions = load_sessions(pipeline)?;
            for job in plan_jobs(&sessions) {
                let line = submit(&job, &command, dry_run)?;
                if dry_run {
                    println!("{}", line.join(" "));
                }
            }
        }
        Cmd::Read { table, filters } => {
            let filter = Filter::from_args(filters.as_slice())?;
            let mut client = DocumentClient::open(server, &cfg)?;
            let filter = Some(&filter);
            let out = match table {
                ReadTarget::Manifest => readers::get_manifest(&mut client, filter),
                ReadTarget::DffTraces => readers::get_dff_traces(&mut client, filter),
                ReadTarget::StimulusResponse => readers::get_stimulus_response(&mut client, filter),
                ReadTarget::EventlockedTraces => {
                    readers::get_eventlocked_traces(&mut client, filter)
                }
                ReadTarget::StimulusPresentations => {
                    readers::get_stimulus_presentations(&mut client, filter)
                }
                ReadTarget::Metrics => readers::get_metrics(&mut client, filter),
            }?;
            println!(
                "{}",
                serde_json::to_string_pretty(&out).context("render table")?
            );
        }
    }

    Ok(())
}
