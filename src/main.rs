mod cli;

use std::process::ExitCode;

use chunkledger::config::Config;
use chunkledger::ledger::LedgerStore;
use chunkledger::observability::init_tracing;
use clap::Parser;
use cli::{Cli, Commands};
use serde_json::json;
use tracing::{error, info};

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.config.clone() {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.telemetry.log_filter);

    match dispatch(cli.command, config).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "Command failed");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Commands, config: Config) -> Result<ExitCode, AnyError> {
    match command {
        Commands::Serve(args) => {
            let address = args.address.unwrap_or(config.server.bind_addr);
            chunkledger::api::run(address, config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stats => {
            let store = open_store(&config)?;
            let summary = json!({
                "store": store.stats()?,
                "schema_version": store.schema_version()?,
                "last_prune": store.last_prune()?.map(|at| at.to_rfc3339()),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Audit => {
            let store = open_store(&config)?;
            let report = store.audit()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        Commands::Prune(args) => {
            let ttl_days = args.ttl_days.unwrap_or(config.retention.task_ttl_days);
            let store = open_store(&config)?;
            let stats = store.prune_expired(ttl_days)?;
            info!(ttl_days, tasks = stats.tasks_pruned, "Prune finished");
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_store(config: &Config) -> Result<LedgerStore, AnyError> {
    Ok(LedgerStore::open_with(&config.server.ledger_path, &config.ledger)?)
}
