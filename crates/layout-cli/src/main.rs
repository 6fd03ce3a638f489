//! `layout` - terrain-aware energy site layout from the command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use layout_cli::config::Config;
use layout_cli::demo::{demo_request, DemoTerrain};
use layout_cli::worker::{BatchManifest, JobStore, Worker, WorkerSettings};
use layout_cli::{exit_code, exit_code_for, load_engine_config};
use layout_core::{GenerationRequest, LayoutEngine, LayoutResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Terrain-aware layout engine for energy sites
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate one layout from a request file
    Generate {
        /// Generation request (JSON)
        #[arg(long)]
        request: PathBuf,

        /// Override the request's strategy
        #[arg(long)]
        strategy: Option<String>,

        /// Engine configuration (JSON); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Result file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run every job in a batch manifest
    Batch {
        /// Manifest (JSON) listing job id, request path, optional strategy
        #[arg(long)]
        manifest: PathBuf,

        /// Jobs run at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Wall-clock budget per generation attempt
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write a synthetic request for trying the engine
    Demo {
        #[arg(long, value_enum, default_value = "flat")]
        terrain: DemoTerrain,

        /// Side of the square site
        #[arg(long, default_value_t = 500.0)]
        size_m: f64,

        #[arg(long, default_value_t = 5.0)]
        cell_m: f64,

        /// Request file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new("layout=info,layout_cli=info,layout_core=info")
    })?;
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    if let Err(err) = init_tracing(config.log_json) {
        eprintln!("failed to initialise logging: {:#}", err);
    }

    let cli = Cli::parse();
    let code = match run(cli, config).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("error: {:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli, config: Config) -> Result<i32> {
    match cli.command {
        Command::Generate {
            request,
            strategy,
            config: engine_config,
            out,
        } => {
            let engine_config = engine_config.or(config.engine_config);
            generate(&request, strategy, engine_config.as_deref(), out.as_deref()).await?;
            Ok(0)
        }
        Command::Batch {
            manifest,
            concurrency,
            timeout_secs,
            config: engine_config,
        } => {
            let settings = WorkerSettings {
                concurrency: concurrency.unwrap_or(config.concurrency),
                job_timeout: timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(config.job_timeout),
                max_retries: config.max_retries,
                backoff_base: config.backoff_base,
                backoff_max: config.backoff_max,
                output_dir: config.output_dir.clone(),
            };
            let engine_config = engine_config.or(config.engine_config.clone());
            batch(&manifest, &config.state_file, engine_config.as_deref(), settings).await
        }
        Command::Demo {
            terrain,
            size_m,
            cell_m,
            out,
        } => {
            let request = demo_request(terrain, size_m, cell_m)?;
            write_json(&request, out.as_deref())?;
            tracing::info!(?terrain, size_m, cell_m, "demo request written");
            Ok(0)
        }
    }
}

async fn generate(
    request_path: &Path,
    strategy: Option<String>,
    engine_config: Option<&Path>,
    out: Option<&Path>,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(request_path)
        .await
        .with_context(|| format!("reading request {}", request_path.display()))?;
    let mut request: GenerationRequest = serde_json::from_str(&raw)
        .with_context(|| format!("parsing request {}", request_path.display()))?;
    if let Some(strategy) = strategy {
        request.strategy = strategy;
    }
    let engine = LayoutEngine::new(load_engine_config(engine_config)?)?;

    let result: LayoutResult =
        tokio::task::spawn_blocking(move || engine.generate(&request)).await??;
    for flag in &result.flags {
        tracing::warn!(kind = ?flag.kind, subject = ?flag.subject_id, "{}", flag.message);
    }
    tracing::info!(
        assets = result.assets.len(),
        roads = result.roads.len(),
        achieved_kw = result.achieved_capacity_kw,
        cut_m3 = result.earthwork.total_cut_m3,
        fill_m3 = result.earthwork.total_fill_m3,
        "layout generated"
    );
    write_json(&result, out)
}

async fn batch(
    manifest_path: &Path,
    state_file: &Path,
    engine_config: Option<&Path>,
    settings: WorkerSettings,
) -> Result<i32> {
    let manifest = BatchManifest::load(manifest_path)?;
    let engine = Arc::new(LayoutEngine::new(load_engine_config(engine_config)?)?);
    let store = Arc::new(JobStore::open(state_file)?);
    let worker = Worker::new(engine, store, settings);

    let stopping = worker.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing running jobs");
            stopping.store(true, Ordering::SeqCst);
        }
    });

    let summary = worker.run(manifest.jobs).await?;
    println!(
        "completed {}, failed {}, skipped {}",
        summary.completed, summary.failed, summary.skipped
    );
    Ok(summary.first_failure.map(exit_code).unwrap_or(0))
}

fn write_json<T: serde::Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => std::fs::write(path, json).with_context(|| format!("writing {}", path.display())),
        None => {
            println!("{}", json);
            Ok(())
        }
    }
}
