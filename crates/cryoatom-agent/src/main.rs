//! cryoatom-bridge: build an atomic model with CryoAtom from a CryoSPARC map
//! and publish it back into the job directory.

mod config;

use anyhow::Context;
use clap::Parser;
use cryoatom_accel::{NvidiaSmiSource, VisibleDevices};
use cryoatom_builder::{BridgePipeline, BuilderRunner, PipelineOptions};
use cryoatom_platform::CryoSparcClient;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cryoatom-bridge", version, about)]
struct Args {
    /// CryoSPARC project UID, e.g. P164
    #[arg(short, long)]
    project: String,

    /// Job holding the density map, e.g. J44
    #[arg(short, long)]
    job: String,

    /// Sequence file passed to CryoAtom
    #[arg(short, long)]
    fasta: PathBuf,

    /// GPU index; skips automatic selection
    #[arg(long)]
    gpu: Option<u32>,

    /// Output group holding the map (default from config, "volume")
    #[arg(long)]
    volume_output: Option<String>,

    /// Use exactly this output field instead of the priority list
    #[arg(long)]
    map_field: Option<String>,

    /// Only consider this row of each field
    #[arg(long)]
    row_index: Option<usize>,

    /// Work directory (default: <project_dir>/cryoatom_<project>_<job>)
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Pass the map to CryoAtom in place instead of copying it
    #[arg(long)]
    no_copy_map: bool,

    /// Path to cryoatom.toml (default: $CRYOATOM_CONFIG, then ./cryoatom.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    /// Passed through to `cryoatom build`
    #[arg(last = true)]
    extra: Vec<String>,
}

impl Args {
    fn log_filter(&self) -> EnvFilter {
        let level = match (self.quiet, self.verbose) {
            (true, _) => Some("error"),
            (false, 0) => None,
            (false, 1) => Some("cryoatom=debug,debug"),
            (false, _) => Some("trace"),
        };
        match level {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cryoatom=debug,info")),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(args.log_filter())
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("cryoatom-bridge: {}", one_line(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

/// Builder stderr can span many lines; the failure message must not.
fn one_line(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!("cryoatom-bridge {}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::load(args.config.as_deref()).context("loading configuration")?;

    let settings = config.connection_settings()?;
    let session = CryoSparcClient::connect(&settings)
        .await
        .with_context(|| format!("connecting to CryoSPARC at {}", settings.api_url()))?;

    let visible = if config.accelerator.respect_visible_devices {
        VisibleDevices::from_env()
    } else {
        VisibleDevices::all()
    };
    let pipeline = BridgePipeline::new(
        Arc::new(session),
        Arc::new(NvidiaSmiSource::new(&config.accelerator.telemetry_command)),
        BuilderRunner::new(config.builder.command()),
    )
    .with_visible_devices(visible)
    .with_priorities(config.locator.priorities.clone());

    let mut opts = PipelineOptions::new(&args.project, &args.job, &args.fasta);
    opts.volume_output = args
        .volume_output
        .unwrap_or_else(|| config.locator.volume_output.clone());
    opts.map_field = args.map_field;
    opts.row_index = args.row_index;
    opts.out_dir = args.out_dir.or_else(|| {
        config
            .workspace
            .root
            .as_ref()
            .map(|root| root.join(format!("cryoatom_{}_{}", args.project, args.job)))
    });
    opts.copy_map = config.workspace.copy_map && !args.no_copy_map;
    opts.accelerator = args.gpu;
    opts.extra_args = config.builder.extra_args.iter().cloned().chain(args.extra).collect();

    let report = pipeline.run(&opts).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.publish.destination.display());
    }
    if !report.publish.logged {
        tracing::warn!("Model copied but the job event log was not updated");
    }
    info!(
        "Done: GPU {}, model {}",
        report.accelerator_index,
        report.publish.destination.display()
    );
    Ok(())
}
