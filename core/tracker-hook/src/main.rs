//! tracker-hook: host driver for the activity tracker.
//!
//! Runs a live tracker for one tab scope against the analytics backend, fed by
//! host events instead of a browser.
//!
//! ## Subcommands
//!
//! - `run`: Apply newline-delimited JSON host events from stdin (or `--input`)
//! - `probe`: Call the identity endpoint and report whether the cookie is accepted
//! - `tab-id`: Print (allocating if needed) the tab id for `--tab`

mod events;
mod logging;
mod probe;
mod run;
mod settings;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use tracker_core::TabIdProvider;

use crate::settings::Overrides;

#[derive(Parser)]
#[command(name = "tracker-hook")]
#[command(about = "Activity tracker host driver")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.config/activity-tracker/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Analytics API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Heartbeat interval in seconds
    #[arg(long, global = true)]
    heartbeat_secs: Option<u64>,

    /// Cookie header sent with every request (e.g. "sessionid=...")
    #[arg(long, global = true)]
    cookie: Option<String>,

    /// Skip the identity probe before session start
    #[arg(long, global = true)]
    no_probe: bool,

    /// Directory holding per-tab state files
    #[arg(long, global = true, value_name = "DIR")]
    store_dir: Option<PathBuf>,

    /// Tab scope name; each scope keeps its own tab and session ids
    #[arg(long, global = true, default_value = "default")]
    tab: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a tracker from host events (one JSON object per line)
    Run {
        /// Read events from a file instead of stdin
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,

        /// Abort on the first malformed line
        #[arg(long)]
        strict: bool,
    },

    /// Check the backend identity endpoint
    Probe,

    /// Print the tab id for the selected scope
    TabId,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            config_path: self.config.clone(),
            base_url: self.base_url.clone(),
            heartbeat_secs: self.heartbeat_secs,
            cookie: self.cookie.clone(),
            no_probe: self.no_probe,
            store_dir: self.store_dir.clone(),
            tab: self.tab.clone(),
        }
    }
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();
    let overrides = cli.overrides();

    let result = match cli.command {
        Commands::Run { input, strict } => run::run(&overrides, input.as_deref(), strict),
        Commands::Probe => probe::run(&overrides),
        Commands::TabId => print_tab_id(&overrides),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "tracker-hook failed");
        eprintln!("tracker-hook: {}", e);
        std::process::exit(1);
    }
}

fn print_tab_id(overrides: &Overrides) -> Result<(), String> {
    let store = settings::open_store(overrides)?;
    let tabs = TabIdProvider::new(Arc::new(store));
    println!("{}", tabs.tab_id());
    Ok(())
}
