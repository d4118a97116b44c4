#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use ghostwire::config::{self, ConfigFile, InitArgs, WatcherArgs};
use std::path::PathBuf;
use tracing::info;

/// Invisible in-cluster traffic switcher for blue/green and canary
/// rollouts.
///
/// Pods labeled `preview` route to matching preview services (like
/// `*-preview`) instead of the active ones. Switching happens at L4 with
/// DNAT rules: no app code changes, no mesh dependency, no DNS roulette.
#[derive(Parser)]
#[clap(name = "ghostwire", version, about)]
struct Args {
    /// Log level (debug, info, warn, error)
    #[clap(long, global = true)]
    log_level: Option<String>,

    /// Log output format (plain or json)
    #[clap(long, global = true, default_value = "plain")]
    log_format: kubert::LogFormat,

    /// Path to a YAML configuration file
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Discover services and build DNAT rules
    Init(InitArgs),
    /// Poll pod labels and toggle the DNAT jump
    Watcher(WatcherArgs),
    /// Run the mutating admission webhook server (reserved)
    Injector,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let file = ConfigFile::load(args.config.as_deref())?;

    let log_level = config::resolve_log_level(args.log_level.clone(), &file)?;
    args.log_format.try_init(log_level)?;

    match args.command {
        Command::Init(init) => ghostwire::prepare::run(&init, &file).await,
        Command::Watcher(watcher) => ghostwire::watcher::run(&watcher, &file).await,
        Command::Injector => {
            info!("injector command not yet implemented");
            Ok(())
        }
    }
}
