mod http;
mod renderer;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use profview_core::{ReselectPolicy, Severity, Viewer, ViewerConfig};
use profview_protocol::Point;
use tracing_subscriber::EnvFilter;

use crate::http::HttpBackend;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    CancelSuperseded,
    LastWriteWins,
}

impl From<Policy> for ReselectPolicy {
    fn from(p: Policy) -> Self {
        match p {
            Policy::CancelSuperseded => Self::CancelSuperseded,
            Policy::LastWriteWins => Self::LastWriteWins,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "profview")]
#[command(about = "Browse profiling sessions served by a profiling results server")]
#[command(version)]
struct Args {
    /// Session id on the server
    #[arg(value_name = "SESSION")]
    session: String,

    /// Name shown for the session (defaults to its id)
    #[arg(long)]
    label: Option<String>,

    /// Config file
    #[arg(long, short = 'c', value_name = "FILE", default_value = "profview.toml")]
    config: PathBuf,

    /// Server base URL, overrides the config file
    #[arg(long, short = 's')]
    server: Option<String>,

    /// Flame graph block threshold in percent
    #[arg(long)]
    flame_threshold: Option<String>,

    /// Sampled runtime difference warning threshold in percent
    #[arg(long)]
    diff_threshold: Option<String>,

    /// Off-CPU display sampling stride in ms
    #[arg(long)]
    offcpu_sampling: Option<f64>,

    #[arg(long, value_enum)]
    policy: Option<Policy>,

    /// Write the flame graphs of GROUP as SVG to FILE and exit
    #[arg(long, num_args = 2, value_names = ["GROUP", "FILE"])]
    export_flame_graph: Option<Vec<String>>,

    /// Log file, filtered by PROFVIEW_LOG (e.g. `profview_core=debug`)
    #[arg(long, value_name = "FILE", default_value = "profview.log")]
    log_file: PathBuf,
}

fn init_logging(path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PROFVIEW_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn config_from(args: &Args) -> ViewerConfig {
    let mut config = ViewerConfig::load_optional(&args.config);
    if let Some(server) = &args.server {
        config.server.clone_from(server);
    }
    if let Some(pct) = &args.flame_threshold {
        config.flame_graph_threshold_pct = profview_core::config::parse_percentage(pct);
    }
    if let Some(pct) = &args.diff_threshold {
        config.runtime_diff_threshold_pct = profview_core::config::parse_percentage(pct);
    }
    if let Some(ms) = args.offcpu_sampling {
        config.offcpu_sampling_ms = ms.max(0.0);
    }
    if let Some(policy) = args.policy {
        config.reselect_policy = policy.into();
    }
    config
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_file)?;

    let config = config_from(&args);
    tracing::info!(server = %config.server, session = %args.session, "starting");
    let mut backend = HttpBackend::new(config.server.clone());
    let mut viewer = Viewer::new(config);

    let label = args.label.clone().unwrap_or_else(|| args.session.clone());
    let first = viewer.select_session(&args.session, &label);
    viewer.drive(&mut backend, first);

    let mut warnings = Vec::new();
    for notice in viewer.take_notices() {
        match notice.severity {
            Severity::Error => bail!("{}", notice.message),
            Severity::Warning => warnings.push(notice.message),
        }
    }

    if let Some([group, file]) = args.export_flame_graph.as_deref() {
        let (id, fetch) = viewer.open_flame_graphs(group, Point::new(0.0, 0.0))?;
        viewer.drive(&mut backend, fetch);
        let svg = viewer.export_svg(&id)?;
        std::fs::write(file, svg).with_context(|| format!("writing {file}"))?;
        return Ok(());
    }

    renderer::run(viewer, backend, warnings)
}
