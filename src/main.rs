//! cgm-bridge
//!
//! CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use cgm_bridge::cli::{Cli, Commands};
use cgm_bridge::core::logging;
use cgm_bridge::core::{
    Authenticator, ChannelSink, CycleResult, FetchPipeline, JsonLinesSink, JsonLinesWriter,
    PollingScheduler, SessionDelays, SessionManager, Sink, drain_to_writer,
};
use cgm_bridge::error::{BridgeError, Result};
use cgm_bridge::render::{self, CheckReport};
use cgm_bridge::sources::glooko::{self, GlookoSource, GlookoTransformer};
use cgm_bridge::storage::ResolvedConfig;

/// Results queued between the driver and the output writer.
const EMIT_QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (level, format, log_file) =
        logging::resolve(cli.log_level.as_deref(), cli.verbose, cli.json_output);
    logging::init(level, format, log_file);

    let json = cli.json_output;
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.error_code(), "{}", e);
            eprintln!("{}", render::error::render_error(&e, json));
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ResolvedConfig::resolve(&cli)?;

    match cli.selected_command() {
        Commands::Run => run_driver(&config).await,
        Commands::Once => run_once(&config).await,
        Commands::Check => check(&config, cli.json_output).await,
    }
}

fn open_writer(config: &ResolvedConfig) -> Result<Arc<JsonLinesWriter>> {
    let writer = match &config.output {
        Some(path) => JsonLinesWriter::append_to(path)?,
        None => JsonLinesWriter::stdout(),
    };
    Ok(Arc::new(writer))
}

fn build_scheduler(
    config: &ResolvedConfig,
    driver: &cgm_bridge::core::DriverConfig,
    sink: Arc<dyn Sink>,
) -> Result<PollingScheduler> {
    let source = Arc::new(GlookoSource::for_server(&config.server, config.timeout)?);
    let delays = SessionDelays::from_millis(driver.refresh_delay_ms, driver.expire_delay_ms)?;
    let sessions = SessionManager::new(source.clone(), config.credentials.clone(), delays);
    let pipeline = FetchPipeline::new(
        source,
        Arc::new(GlookoTransformer),
        driver.timezone_offset_ms,
    );
    Ok(PollingScheduler::new(sessions, pipeline, sink, driver))
}

async fn run_driver(config: &ResolvedConfig) -> Result<()> {
    let writer = open_writer(config)?;
    let (tx, rx) = mpsc::channel(EMIT_QUEUE_CAPACITY);
    let emitter = tokio::spawn(drain_to_writer(rx, writer));

    let sink = Arc::new(ChannelSink::new(glooko::SOURCE_NAME, tx));
    let scheduler = build_scheduler(config, &config.driver, sink)?;
    tracing::info!(
        source = glooko::SOURCE_NAME,
        server = %config.server,
        interval_ms = config.driver.expected_data_interval_ms,
        "Starting polling driver"
    );
    let handle = scheduler.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, stopping");

    // Dropping the scheduler closes the emitter queue.
    if let Some(scheduler) = handle.stop().await {
        tracing::debug!(cursor = ?scheduler.cursor(), "Driver stopped");
    }

    let written = emitter
        .await
        .map_err(|e| BridgeError::Other(anyhow::anyhow!("emitter task failed: {e}")))?;
    tracing::info!(written, "Emitter drained");
    Ok(())
}

async fn run_once(config: &ResolvedConfig) -> Result<()> {
    // Single attempt: any failure is reported instead of scheduling a retry.
    let mut driver = config.driver;
    driver.backoff.max_attempts = 0;

    let sink = Arc::new(JsonLinesSink::new(glooko::SOURCE_NAME, open_writer(config)?));
    let mut scheduler = build_scheduler(config, &driver, sink)?;

    match scheduler.tick().await.result {
        CycleResult::TerminalFailure { reason } => Err(BridgeError::Other(anyhow::anyhow!(
            "cycle failed: {reason}"
        ))),
        _ => Ok(()),
    }
}

async fn check(config: &ResolvedConfig, json: bool) -> Result<()> {
    let source = GlookoSource::for_server(&config.server, config.timeout)?;
    let token = source.authenticate(&config.credentials).await?;

    let report = CheckReport {
        config_path: config.config_path.display().to_string(),
        server: source.client().base_url().to_string(),
        email: config.credentials.username.clone(),
        account_id: token.account_id,
        expected_data_interval_ms: config.driver.expected_data_interval_ms,
        timezone_offset_ms: config.driver.timezone_offset_ms,
    };
    println!("{}", render::render_check(&report, json)?);
    Ok(())
}
