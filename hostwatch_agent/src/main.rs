//! Entry point for the hostwatch agent. Parses args, loads config, runs the loop.

use anyhow::Context;
use hostwatch_agent::alert::AlertEvaluator;
use hostwatch_agent::config::{AgentConfig, LoggingSettings, DEFAULT_CONFIG_PATH};
use hostwatch_agent::logging;
use hostwatch_agent::metrics::SysinfoProvider;
use hostwatch_agent::notify::ChannelNotifier;
use hostwatch_agent::scheduler::Scheduler;
use hostwatch_agent::shutdown::ShutdownCoordinator;
use hostwatch_agent::snapshot::SnapshotBuilder;
use hostwatch_agent::transmit::{HttpSink, Transmitter};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, PartialEq)]
struct ParsedArgs {
    config: String,
    once: bool,
    check_config: bool,
}

enum ArgsOutcome {
    Run(ParsedArgs),
    Help(String),
}

fn usage(prog: &str) -> String {
    format!("Usage: {prog} [--config PATH|-c PATH] [--once] [--check-config]")
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ArgsOutcome, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "hostwatch_agent".into());
    let mut config: Option<String> = None;
    let mut once = false;
    let mut check_config = false;

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(ArgsOutcome::Help(usage(&prog))),
            "--config" | "-c" => match it.next() {
                Some(v) => config = Some(v),
                None => return Err(format!("--config needs a path. {}", usage(&prog))),
            },
            "--once" => once = true,
            "--check-config" => check_config = true,
            _ if arg.starts_with("--config=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        config = Some(v.to_string());
                    }
                }
            }
            _ => return Err(format!("Unexpected argument `{arg}`. {}", usage(&prog))),
        }
    }
    Ok(ArgsOutcome::Run(ParsedArgs {
        config: config.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
        once,
        check_config,
    }))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args(env::args()) {
        Ok(ArgsOutcome::Run(a)) => a,
        Ok(ArgsOutcome::Help(msg)) => {
            println!("{msg}");
            return ExitCode::SUCCESS;
        }
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let config = match AgentConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            // no logging settings without a config; log the failure with defaults
            let _ = logging::init(&LoggingSettings::default());
            error!(path = %args.config, error = %e, "failed to load configuration");
            eprintln!("error: {}: {e}", args.config);
            return ExitCode::FAILURE;
        }
    };

    if args.check_config {
        return match serde_json::to_string_pretty(&config) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        };
    }

    match run(config, args.once).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = format!("{e:#}"), "agent failed to start");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AgentConfig, once: bool) -> anyhow::Result<()> {
    logging::init(&config.logging).context("initialising logging")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %config.endpoint.url,
        interval_secs = config.interval.as_secs(),
        "hostwatch agent starting"
    );

    // handlers go in before priming so an early SIGTERM stops the loop instead of the process
    let shutdown = ShutdownCoordinator::new();
    let _signals = if once {
        None
    } else {
        Some(shutdown.listen().context("installing signal handlers")?)
    };

    let provider = tokio::task::spawn_blocking(SysinfoProvider::new)
        .await
        .context("priming system metrics")?;
    let builder = SnapshotBuilder::new(Arc::new(provider), config.metrics.include_network);
    let notifier = ChannelNotifier::new(config.alerts.slack_webhook_url.clone())
        .context("building alert notifier")?;
    let evaluator =
        AlertEvaluator::new(config.thresholds, config.alerts.clone(), Arc::new(notifier));
    let sink = HttpSink::new().context("building http client")?;
    let transmitter = Transmitter::new(Arc::new(sink), config.endpoint.retry);

    let mut scheduler = Scheduler::new(
        builder,
        evaluator,
        transmitter,
        config.endpoint.url.clone(),
        config.interval,
        shutdown.clone(),
    );

    if once {
        let report = scheduler.run_once().await;
        info!(
            delivered = report.delivered,
            alerts_fired = report.alerts_fired,
            snapshot_error = report.snapshot_error,
            "single cycle complete"
        );
        return Ok(());
    }

    scheduler.run().await;
    Ok(())
}
