//! Fee Oracle - daily market-index fee updater
//!
//! Entry point for the oracle binary. Two invocation modes:
//!
//! - **once**: run a single cycle now, print the recent records, exit 0 on
//!   success and 1 otherwise
//! - **scheduled**: run a cycle at the configured local time every day until
//!   Ctrl-C

// Compiler warning configuration
#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use fee_oracle::chain::{ChainSubmitter, EvmFeeContract};
use fee_oracle::config::OracleConfig;
use fee_oracle::endpoints;
use fee_oracle::fetcher::{HttpFetcher, WeightedIdentitySelector};
use fee_oracle::recorder::{CycleRecord, JsonLinesRecorder, TracingRecorder};
use fee_oracle::scheduler::{DailySchedule, Scheduler};
use fee_oracle::types::TxHandle;
use fee_oracle::wallet::OracleWallet;
use fee_oracle::{OraclePipeline, Target};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMode {
    /// Run one cycle now and exit
    Once,
    /// Run the daily schedule until interrupted
    Scheduled,
}

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "oracle.toml")]
    config: PathBuf,

    /// Fail instead of falling back to defaults when the config file is missing
    #[arg(long)]
    require_config: bool,

    /// Invocation mode
    #[arg(short, long, value_enum, default_value = "scheduled")]
    mode: RunMode,

    /// Fetch, compute and record without submitting on-chain
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// Metrics port (overrides config and enables the endpoint)
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose, args.json_logs) {
        eprintln!("Failed to initialise logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    info!("🚀 Starting Fee Oracle");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    info!("📋 Loading configuration from: {}", args.config.display());
    let config = Arc::new(
        OracleConfig::load(&args.config, args.require_config, args.dry_run)
            .context("Failed to load configuration")?,
    );

    let schedule = DailySchedule::new(
        config.timezone()?,
        config.schedule.update_hour,
        config.schedule.update_minute,
    )?;
    log_banner(&config, args.mode);

    let shutdown = CancellationToken::new();
    spawn_metrics(&config, args.metrics_port, shutdown.clone());

    let (pipeline, records) = build_pipeline(&config).await?;
    let pipeline = Arc::new(pipeline);

    let code = match args.mode {
        RunMode::Once => run_once(pipeline, schedule, records.as_ref(), config.recorder.show_recent).await,
        RunMode::Scheduled => run_scheduled(pipeline, schedule).await,
    };

    shutdown.cancel();
    info!("👋 Shutting down");
    Ok(code)
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "fee_oracle=debug,info"
    } else {
        "fee_oracle=info,warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| env_filter.into());
    let human = (!json).then(|| tracing_subscriber::fmt::layer().with_target(true));
    let structured = json.then(|| tracing_subscriber::fmt::layer().json().with_target(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(human)
        .with(structured)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

fn log_banner(config: &OracleConfig, mode: RunMode) {
    info!("🎯 Mode: {:?}", mode);
    info!("   Target: {} [{}]", config.source.target_url, config.source.target_selector);
    info!(
        "   Schedule: {:02}:{:02} {}",
        config.schedule.update_hour, config.schedule.update_minute, config.schedule.timezone
    );
    info!(
        "   Fee range: {}-{} bp around baseline {}",
        config.fee.min_fee_rate_bps, config.fee.max_fee_rate_bps, config.fee.index_baseline
    );
    if config.chain.enabled {
        info!(
            "   Chain: id {} contract {} via {}",
            config.chain.chain_id, config.chain.contract_address, config.chain.rpc_url
        );
    } else {
        info!("   Chain: disabled (dry run)");
    }
}

fn spawn_metrics(config: &OracleConfig, port_override: Option<u16>, cancel: CancellationToken) {
    if !config.monitoring.enable_metrics && port_override.is_none() {
        return;
    }
    let port = port_override.unwrap_or(config.monitoring.metrics_port);
    info!("📊 Starting metrics server on port {}", port);
    tokio::spawn(async move {
        if let Err(e) = endpoints::endpoint_server(port, cancel).await {
            error!("Metrics server error: {:#}", e);
        }
    });
}

/// Wire fetcher, submitter and recorders into a pipeline
///
/// Also returns the JSON lines sink so one-shot mode can print its tail.
async fn build_pipeline(config: &OracleConfig) -> Result<(OraclePipeline, Option<Arc<JsonLinesRecorder>>)> {
    let identities = Arc::new(
        WeightedIdentitySelector::new(config.identities()).context("Invalid identity corpus")?,
    );
    info!("🌐 {} client identities loaded", identities.len());
    let fetcher = HttpFetcher::new(config.fetcher_settings(), identities)
        .context("Failed to build HTTP fetcher")?;

    let submitter = if config.chain.enabled {
        Some(build_submitter(config).await?)
    } else {
        None
    };

    let target = Target {
        url: config.source.target_url.clone(),
        selector: config.source.target_selector.clone(),
    };
    let mut pipeline = OraclePipeline::new(
        Arc::new(fetcher),
        config.retry.fetch.clone(),
        submitter,
        target,
        config.fee_parameters(),
    );

    let mut records = None;
    if !config.recorder.jsonl_path.as_os_str().is_empty() {
        info!("🗂️ Recording cycles to {}", config.recorder.jsonl_path.display());
        let sink = Arc::new(JsonLinesRecorder::new(config.recorder.jsonl_path.clone()));
        pipeline = pipeline.with_recorder(sink.clone());
        records = Some(sink);
    }
    if config.recorder.log_records {
        pipeline = pipeline.with_recorder(Arc::new(TracingRecorder));
    }

    Ok((pipeline, records))
}

async fn build_submitter(config: &OracleConfig) -> Result<ChainSubmitter> {
    let wallet = OracleWallet::from_key(&config.chain.private_key).context("Failed to load signing key")?;
    info!("🔑 Signer address: {}", wallet.address());

    let contract = EvmFeeContract::new(config.evm_settings()?, wallet.into_signer())?;
    match contract.remote_chain_id().await {
        Ok(remote) if remote != config.chain.chain_id => warn!(
            configured = config.chain.chain_id,
            remote,
            "Configured chain id differs from the node's, transactions will be rejected"
        ),
        Ok(remote) => info!("⛓️ Connected to chain {}", remote),
        Err(e) => warn!("Could not query chain id at startup: {}", e),
    }

    Ok(ChainSubmitter::new(
        Arc::new(contract),
        config.retry.submit.clone(),
        config.submit_settings(),
    ))
}

async fn run_once(
    pipeline: Arc<OraclePipeline>,
    schedule: DailySchedule,
    records: Option<&Arc<JsonLinesRecorder>>,
    show_recent: usize,
) -> ExitCode {
    let scheduler = Scheduler::new(pipeline, schedule);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("🛑 Received shutdown signal, abandoning cycle");
    };

    let outcome = scheduler.run_once_until(shutdown).await;

    let report = match outcome {
        Ok(report) => report,
        Err(rejected) => {
            error!("Cycle not started: {}", rejected);
            return ExitCode::FAILURE;
        }
    };

    if let Some(sink) = records {
        match sink.recent(show_recent).await {
            Ok(recent) => print_recent(&recent),
            Err(e) => warn!("Failed to read recent records: {:#}", e),
        }
    }

    if report.success {
        info!("✅ Cycle {} succeeded", report.cycle_id);
        ExitCode::SUCCESS
    } else {
        error!(
            "❌ Cycle {} failed: {}",
            report.cycle_id,
            report.error.map(|e| e.to_string()).unwrap_or_default()
        );
        ExitCode::FAILURE
    }
}

async fn run_scheduled(pipeline: Arc<OraclePipeline>, schedule: DailySchedule) -> ExitCode {
    let scheduler = Arc::new(Scheduler::new(pipeline, schedule));
    info!("🎬 Next update at {}", scheduler.next_trigger());
    let mut handle = scheduler.clone().start();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Received shutdown signal");
            scheduler.stop();
            if let Err(e) = handle.await {
                error!("Scheduler task failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
        joined = &mut handle => {
            if let Err(e) = joined {
                error!("Scheduler task failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

fn print_recent(records: &[CycleRecord]) {
    if records.is_empty() {
        return;
    }
    println!("Recent cycles:");
    for r in records {
        let rate = r
            .computed_rate_bps
            .map(|bps| format!("{bps} bp"))
            .unwrap_or_else(|| "-".to_string());
        let value = r
            .raw_value
            .map(|v| format!("{v}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {:<9}  index {:>10}  rate {:>7}  {:<13}  {}",
            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
            r.trigger.to_string(),
            value,
            rate,
            r.submission_status,
            r.tx_handle.as_ref().map(TxHandle::as_str).unwrap_or("")
        );
    }
}
