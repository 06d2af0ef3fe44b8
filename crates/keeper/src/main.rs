mod cli;
mod commands;
mod error;
mod logging;
mod progress;
mod settings;
mod store;

use clap::Parser;
use keeper_platform::AppPaths;
use log::{info, warn};

use crate::cli::Cli;
use crate::commands::Context;
use crate::error::AppError;
use crate::settings::AppSettings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let paths = AppPaths::new()?;
    let settings = AppSettings::load(&paths);
    logging::init_logging(
        &paths,
        settings.debug_logging || cli.verbose,
        settings.max_log_size_bytes,
    );
    info!("keeper {} starting", env!("CARGO_PKG_VERSION"));

    // Write the defaults out once so there is a file to edit.
    if !paths.settings_file().exists()
        && let Err(error) = settings.save(&paths)
    {
        warn!("Failed to write default settings: {error}");
    }

    let mut ctx = Context::new(paths, settings)?;
    commands::execute(cli.command, &mut ctx).await
}
