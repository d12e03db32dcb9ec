mod batch;
mod capture;
mod cli;
mod config;
mod delivery;
mod host;
mod orchestrator;
mod staging;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use clap::Parser;
use miette::{miette, Context, IntoDiagnostic, Result};
use shared::items::ids::parse_log_into_sorted_ids;
use shared::logging::initialize_console_and_file_logging;
use shared::storage::memory::MemoryBlobStore;
use shared::storage::BlobStore;
use tracing::info;

use crate::batch::BatchDriver;
use crate::cli::{BuildIds, CLIArgs, CLICommand, RunBatch};
use crate::config::CapturerConfiguration;
use crate::host::webdriver::WebDriverHost;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CLIArgs::parse();

    let _log_guard = initialize_console_and_file_logging(args.log_file_path.as_deref())?;

    match args.command {
        CLICommand::Run(run_args) => run_batch(run_args).await,
        CLICommand::BuildIds(build_args) => build_ids(build_args),
    }
}

async fn run_batch(args: RunBatch) -> Result<()> {
    info!(path = ?args.configuration_file_path, "Loading configuration file.");
    let configuration = CapturerConfiguration::load_from_file(&args.configuration_file_path)
        .wrap_err_with(|| miette!("Could not load configuration file."))?
        .with_window_overrides(args.page, args.size);

    let source_store = configuration.source_storage.open()?;
    let destination_store: Arc<dyn BlobStore> = if args.dry_run {
        info!("Dry run: artifacts will be kept in memory and not uploaded.");
        Arc::new(MemoryBlobStore::new())
    } else {
        configuration.destination_storage.open()?
    };

    info!("Launching render host.");
    let host = Arc::new(WebDriverHost::launch(&configuration.webdriver).await?);

    BatchDriver::new(configuration, host, source_store, destination_store)
        .run()
        .await?;

    Ok(())
}

fn build_ids(args: BuildIds) -> Result<()> {
    info!(input = ?args.input_path, "Reading ID log.");
    let log_contents = std::fs::read_to_string(&args.input_path)
        .into_diagnostic()
        .wrap_err_with(|| miette!("Could not read log file {:?}.", args.input_path))?;

    let item_ids = parse_log_into_sorted_ids(&log_contents)
        .into_diagnostic()
        .wrap_err_with(|| miette!("Could not parse log file {:?}.", args.input_path))?;

    let serialized = serde_json::to_string_pretty(&item_ids)
        .into_diagnostic()
        .wrap_err_with(|| miette!("Could not serialize item IDs."))?;

    std::fs::write(&args.output_path, serialized)
        .into_diagnostic()
        .wrap_err_with(|| miette!("Could not write item IDs to {:?}.", args.output_path))?;

    info!(
        output = ?args.output_path,
        "Wrote {} item IDs.",
        item_ids.len()
    );

    Ok(())
}
