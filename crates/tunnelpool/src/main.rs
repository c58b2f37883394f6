//! tunnelpool - open a pooled PostgreSQL connection, optionally through an SSH tunnel.
//!
//! Usage: `tunnelpool [--log-filter <directive>] <config.json>`

use std::process::ExitCode;
use tunnelpool_core::logging::{init_logging, LogConfig};
use tunnelpool_core::{ClientConfig, ConnectionFactory, TunnelPoolResult};

const USAGE: &str = "Usage: tunnelpool [--log-filter <directive>] <config.json>";

/// Parsed command line.
#[derive(Debug, PartialEq)]
struct Args {
    config_path: String,
    log_filter: Option<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Option<Args> {
    let mut config_path = None;
    let mut log_filter = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--log-filter" => log_filter = Some(args.next()?),
            _ if arg.starts_with("--") => return None,
            _ if config_path.is_none() => config_path = Some(arg),
            _ => return None,
        }
    }

    Some(Args { config_path: config_path?, log_filter })
}

fn main() -> ExitCode {
    let Some(args) = parse_args(std::env::args().skip(1)) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    let mut log_config = LogConfig::detect();
    if let Some(filter) = &args.log_filter {
        log_config = log_config.with_filter(filter);
    }
    let _logging_guard = init_logging(log_config);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(&args.config_path)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(
                category = e.category(),
                hint = e.hint().unwrap_or(""),
                "{e}"
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: &str) -> TunnelPoolResult<()> {
    let config = ClientConfig::load(config_path)?;

    let factory = ConnectionFactory::new();
    let handle = factory.open(&config.database, config.tunnel.as_ref()).await?;

    let started = std::time::Instant::now();
    handle.ping().await?;
    let status = handle.status();

    tracing::info!(
        dsn = %handle.dsn(),
        tunneled = handle.is_tunneled(),
        round_trip_ms = started.elapsed().as_millis() as u64,
        max_size = status.max_size,
        size = status.size,
        available = status.available,
        "Database reachable"
    );

    handle.close().await
}
