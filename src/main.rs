//! Campaign Manager CLI - builds campaign archives from local run records
//!
//! Usage:
//!   campaign-manager create <campaign> [-s <store>] [-n <hostname>]
//!   campaign-manager update <campaign>
//!   campaign-manager info <campaign> [-v]
//!   campaign-manager list [-s <store>]
//!   campaign-manager delete <campaign>

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use campaign_manager::{
    commands::{self, Command},
    config::{normalize_store, CampaignConfig},
    error::{CommandError, CommandResult},
    Settings,
};

#[derive(Parser)]
#[command(name = "campaign-manager")]
#[command(about = "Consolidate local run records into a campaign archive")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More verbosity (repeat for more)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to local campaign store
    #[arg(short = 's', long = "campaign_store", global = true)]
    campaign_store: Option<PathBuf>,

    /// Host name unique for hosts in a campaign
    #[arg(short = 'n', long, global = true)]
    hostname: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new archive from the local run records
    Create {
        /// Campaign name or path, with .aca or without
        campaign: String,
    },
    /// Merge the local run records into an existing archive
    Update {
        /// Campaign name or path, with .aca or without
        campaign: String,
    },
    /// Delete an archive
    Delete {
        /// Campaign name or path, with .aca or without
        campaign: String,
    },
    /// Print the content of an archive
    Info {
        /// Campaign name or path, with .aca or without
        campaign: String,
    },
    /// List the archives in the campaign store
    List,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter(cli.verbose).to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            match &e {
                CommandError::Storage(inner) => eprintln!("ERROR: {:#}", inner),
                other => eprintln!("ERROR: {}", other),
            }
            e.exit_code()
        }
    };
    std::process::exit(code);
}

/// Log filter used when `RUST_LOG` is unset
fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "campaign_manager=warn",
        1 => "campaign_manager=info",
        2 => "campaign_manager=debug",
        _ => "campaign_manager=trace",
    }
}

fn run(cli: Cli) -> CommandResult<()> {
    let config = CampaignConfig::load()?;
    let working_dir = std::env::current_dir().map_err(anyhow::Error::from)?;

    let settings = Settings {
        store_root: cli
            .campaign_store
            .map(|p| normalize_store(&p))
            .or(config.store_path),
        working_dir,
        hostname: cli.hostname,
        codec: config.codec.unwrap_or_default(),
        verbose: cli.verbose,
    };

    let (command, campaign) = match cli.command {
        Commands::Create { campaign } => (Command::Create, Some(campaign)),
        Commands::Update { campaign } => (Command::Update, Some(campaign)),
        Commands::Delete { campaign } => (Command::Delete, Some(campaign)),
        Commands::Info { campaign } => (Command::Info, Some(campaign)),
        Commands::List => (Command::List, None),
    };

    debug!("Command = {}", command.name());
    debug!("Campaign = {:?}", campaign);
    debug!("Campaign store = {:?}", settings.store_root);

    let stdout = std::io::stdout();
    commands::run(command, campaign.as_deref(), &settings, &mut stdout.lock())
}
