mod logging;

use std::env;
use std::error::Error;
use std::path::{Path, PathBuf};

use clap::Parser;
use tetra_core::connections::{config_base_dir, resolve_connections_path, ConnectionStore};
use tetra_core::settings::{Settings, SETTINGS_FILE_NAME};
use tetra_tui::{LaunchOptions, TuiError};
use tracing::info;

use crate::logging::LogTarget;

#[derive(Parser, Debug)]
#[command(name = "tetra", version, about = "Four-pane terminal browser for PostgreSQL and SQLite")]
struct Cli {
    /// Directory holding connections.json, settings.toml and logs.
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,
    /// Saved connection to open on start, skipping the picker.
    #[arg(long, value_name = "NAME")]
    connection: Option<String>,
    /// Write logs to this file instead of the daily log in the config dir.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

/// Everything the terminal UI needs, resolved from the CLI and disk.
#[derive(Debug)]
struct Startup {
    config_dir: PathBuf,
    options: LaunchOptions,
}

fn prepare(cli: &Cli, working_dir: &Path) -> Result<Startup, Box<dyn Error>> {
    let config_dir = match &cli.config_dir {
        Some(dir) => dir.clone(),
        None => config_base_dir()?,
    };
    let settings = Settings::load_from_path(&config_dir.join(SETTINGS_FILE_NAME))?;
    let store = ConnectionStore::load_from_path(resolve_connections_path(working_dir, &config_dir))?;

    Ok(Startup {
        config_dir,
        options: LaunchOptions {
            store,
            settings,
            auto_connect: cli.connection.clone(),
        },
    })
}

fn run_app(
    cli: &Cli,
    working_dir: &Path,
    run_tui: impl FnOnce(LaunchOptions) -> Result<(), TuiError>,
) -> Result<(), Box<dyn Error>> {
    let startup = prepare(cli, working_dir)?;
    let target = LogTarget::resolve(&startup.config_dir, cli.log_file.clone());
    let _guard = logging::init(&target, &startup.options.settings.log_filter)?;
    info!(
        config_dir = %startup.config_dir.display(),
        connections = %startup.options.store.path().display(),
        "starting tetra"
    );

    run_tui(startup.options)?;
    info!("tetra exited");
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let working_dir = env::current_dir()?;
    run_app(&cli, &working_dir, tetra_tui::run)
}
