// route-tracker command line: collect, purge and list routes

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use route_tracker::collector::Collector;
use route_tracker::config::{CliArgs, CollectArgs, Command, Config, RoutesArgs, TransportSettings};
use route_tracker::error::CollectError;
use route_tracker::inventory::StaticInventory;
use route_tracker::parsers::ParserRegistry;
use route_tracker::purge::purge;
use route_tracker::store::RouteStore;
use route_tracker::transport::{CaptureTransport, ExecTransport, Transport};

#[tokio::main]
async fn main() -> ExitCode {
    let cli_args = CliArgs::parse();

    let config = match Config::load(&cli_args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    // Logs go to stderr; stdout carries the JSON report
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &config.source {
        Some(path) => tracing::info!("Loaded configuration from: {}", path.display()),
        None => tracing::info!("No config file found, using defaults"),
    }

    match run(cli_args.command, config).await {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<CollectError>() {
                Some(err) => tracing::error!("{} ({})", err.user_message(), err),
                None => tracing::error!("{:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: Config) -> anyhow::Result<ExitCode> {
    let store = RouteStore::open(&config.database)
        .with_context(|| format!("opening route database {}", config.database.display()))?;
    let store = Arc::new(store);

    match command {
        Command::Collect(args) => collect(&config, &args, store).await,
        Command::Purge(args) => {
            let report = purge(&store, config.retention_days, !args.dry_run, Utc::now())?;
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Routes(args) => list_routes(&args, &store),
    }
}

async fn collect(config: &Config, args: &CollectArgs, store: Arc<RouteStore>) -> anyhow::Result<ExitCode> {
    let registry = Arc::new(ParserRegistry::with_builtin()?);
    config.check_platforms(&registry)?;

    let inventory = Arc::new(StaticInventory::load(&config.inventory_file)?);
    tracing::info!("Inventory holds {} device(s)", inventory.device_count());

    let transport: Arc<dyn Transport> = match &config.transport {
        TransportSettings::Exec { program } => Arc::new(ExecTransport::new(program)),
        TransportSettings::Capture { dir } => Arc::new(CaptureTransport::new(dir)),
    };

    let collector = Collector::new(inventory, registry, transport, store)
        .with_supported_platforms(config.supported_platforms.clone())
        .with_time_limits(config.soft_time_limit, config.time_limit);

    match collector.collect(&config.collect_options(args)).await {
        Ok(report) => {
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(CollectError::TotalCollectionFailure { summary, stats }) => {
            tracing::error!("All targeted devices failed");
            print_json(&serde_json::json!({
                "success": false,
                "message": "All devices failed",
                "summary": summary,
                "stats": stats,
            }))?;
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

fn list_routes(args: &RoutesArgs, store: &RouteStore) -> anyhow::Result<ExitCode> {
    let records = match args.lookup {
        Some(address) => {
            let [device] = args.devices.as_slice() else {
                anyhow::bail!("--lookup needs exactly one --device");
            };
            store.lookup(&device.as_str().into(), address)?
        }
        None => store.query(&args.query())?,
    };
    tracing::info!("{} route(s) matched", records.len());
    print_json(&records)?;
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
