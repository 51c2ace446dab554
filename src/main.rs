pub mod cli;
pub mod config;
pub mod server;
pub mod sync;
pub mod types;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;

use crate::cli::{AppError, CheckStatus, ExitStatus};
use crate::config::AppPaths;
use crate::sync::Synchronizer;

#[derive(Parser)]
#[command(
    name = "gitsite",
    version,
    about = "Mirror a git repository over SSH and serve it as a static site"
)]
struct Cli {
    /// Configuration file (default: <config dir>/<executable name>.yaml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Working copy to sync and serve (default: <cache dir>/<executable name>)
    #[arg(long, global = true, value_name = "PATH")]
    working_copy: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the working copy, then serve it over HTTP (default)
    Serve {
        /// Serve the working copy as it is, without syncing first
        #[arg(long)]
        skip_sync: bool,
    },

    /// Sync the working copy once and exit
    Sync,

    /// Check configuration, key, working copy and libgit2
    Doctor,

    /// Print the resolved file locations
    Paths,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let status = match run(cli) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let AppError::Config(config::ConfigError::Missing(path)) = &e {
                eprintln!();
                eprintln!("Hint: create {} with gitUrl and sshPrivateKey", path.display());
            }
            e.exit_status()
        }
    };

    std::process::exit(status.code());
}

fn run(cli: Cli) -> Result<ExitStatus, AppError> {
    let paths = resolve_paths(cli.config, cli.working_copy)?;

    match cli.command.unwrap_or(Commands::Serve { skip_sync: false }) {
        Commands::Serve { skip_sync } => cmd_serve(&paths, skip_sync),
        Commands::Sync => cmd_sync(&paths),
        Commands::Doctor => Ok(cmd_doctor(&paths)),
        Commands::Paths => Ok(cmd_paths(&paths)),
    }
}

fn resolve_paths(
    config: Option<PathBuf>,
    working_copy: Option<PathBuf>,
) -> Result<AppPaths, AppError> {
    let mut paths = AppPaths::for_user(config::executable_name()?)?;
    if let Some(config) = config {
        paths = paths.with_config_file(config);
    }
    if let Some(working_copy) = working_copy {
        paths = paths.with_working_copy(working_copy);
    }
    Ok(paths)
}

fn cmd_serve(paths: &AppPaths, skip_sync: bool) -> Result<ExitStatus, AppError> {
    let config = config::load(paths.config_file())?;

    if skip_sync {
        log::info!("skipping sync");
    } else {
        cli::sync_before_serve(&Synchronizer::new(), &config, paths.working_copy());
    }

    cli::run_server(&config, paths.working_copy())?;
    Ok(ExitStatus::Success)
}

fn cmd_sync(paths: &AppPaths) -> Result<ExitStatus, AppError> {
    let config = config::load(paths.config_file())?;

    let outcome = Synchronizer::new().ensure_synced(
        config.remote(),
        config.ssh_key().expose_secret().as_bytes(),
        paths.working_copy(),
    )?;

    println!("{}: {}", paths.working_copy().display(), outcome);
    Ok(ExitStatus::Success)
}

fn cmd_doctor(paths: &AppPaths) -> ExitStatus {
    println!("{} system check\n", paths.name());

    let checks = cli::run_checks(paths);
    for check in &checks {
        println!("{}", check);
    }

    if checks.iter().any(|c| c.status == CheckStatus::Fail) {
        ExitStatus::Failure
    } else {
        ExitStatus::Success
    }
}

fn cmd_paths(paths: &AppPaths) -> ExitStatus {
    println!("Config file:  {}", paths.config_file().display());
    println!("Working copy: {}", paths.working_copy().display());
    println!("Lock file:    {}", paths.lock_file().display());
    ExitStatus::Success
}
