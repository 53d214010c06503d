mod cli;
mod config;
mod error;
mod logging;
mod model;
mod providers;
mod store;
mod sync;
mod util;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use cli::Cli;
use store::integrations::JsonIntegrationStore;
use store::tasks::JsonTaskStore;
use sync::manager::SyncLimits;
use sync::IntegrationManager;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let data_dir = cli.data_dir.unwrap_or_else(config::default_data_dir);
    let config = config::load_config(&data_dir)?;

    let (integrations, tasks) = if cli.dry_run {
        eprintln!("Dry run: nothing is written to {}", data_dir.display());
        (
            JsonIntegrationStore::open_detached(&data_dir)?,
            JsonTaskStore::open_detached(&data_dir)?,
        )
    } else {
        (
            JsonIntegrationStore::open(&data_dir)?,
            JsonTaskStore::open(&data_dir)?,
        )
    };
    let manager = IntegrationManager::new(
        Arc::new(integrations),
        Arc::new(tasks),
        providers::create_registry(),
        SyncLimits::from(&config.sync),
    );

    cli::run(cli.command, &manager).await
}
