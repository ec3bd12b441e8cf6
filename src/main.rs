//! ipban-platform main entry point
//!
//! This binary exposes the platform layer for inspection and manual use:
//! printing the detected host, showing which firewall backend would be
//! chosen, checking address eligibility and editing the managed sets.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ipban_platform::{
    address, config::Config, BackendRegistry, FirewallBackend, HostProfile, APP_NAME, VERSION,
};

/// Host probing and firewall backend tool for IPBan
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path [default: /etc/ipban/platform.toml]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the detected host profile
    Host {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which firewall backend would be selected
    Backend,

    /// Print the normalized form of each address, or "ineligible"
    Check {
        /// Addresses to check
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Replace the managed block set with the given addresses
    Block {
        /// Addresses to block; none clears the set
        addresses: Vec<String>,
    },

    /// Replace the managed allow set with the given addresses
    Allow {
        /// Addresses to allow; none clears the set
        addresses: Vec<String>,
    },

    /// List the managed block set
    List {
        /// List the allow set instead
        #[arg(long)]
        allowed: bool,
    },

    /// Show whether an address is blocked or allowed
    Query {
        /// Address to look up
        address: String,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    debug!("Starting {} v{}", APP_NAME, VERSION);

    if let Err(e) = run(cli) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize structured logging with tracing
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Run the CLI command
fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Host { json } => {
            let profile = HostProfile::detect();
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                println!("{}", profile);
            }
            Ok(())
        }
        Commands::Backend => {
            let config = Config::load(cli.config.as_deref())?;
            let profile = HostProfile::detect();
            let registry = BackendRegistry::builtin();
            let entry = registry.resolve(&profile, &config.firewall.backends)?;
            println!("{}", entry.descriptor);
            Ok(())
        }
        Commands::Check { addresses } => {
            for raw in &addresses {
                match address::normalize(raw) {
                    Some(normalized) => println!("{}", normalized),
                    None => println!("{:?} ineligible", raw),
                }
            }
            Ok(())
        }
        Commands::Block { addresses } => {
            let mut backend = open_backend(cli.config)?;
            if !backend.block_addresses(&addresses) {
                anyhow::bail!("Block set update was incomplete, see log for details");
            }
            info!("Block set updated");
            Ok(())
        }
        Commands::Allow { addresses } => {
            let mut backend = open_backend(cli.config)?;
            if !backend.allow_addresses(&addresses) {
                anyhow::bail!("Allow set update was incomplete, see log for details");
            }
            info!("Allow set updated");
            Ok(())
        }
        Commands::List { allowed } => {
            let backend = open_backend(cli.config)?;
            let entries = if allowed {
                backend.enumerate_allowed()
            } else {
                backend.enumerate_blocked()
            };
            for entry in entries {
                println!("{}", entry);
            }
            Ok(())
        }
        Commands::Query { address } => {
            let backend = open_backend(cli.config)?;
            let status = match (backend.is_blocked(&address), backend.is_allowed(&address)) {
                (true, true) => "blocked and allowed",
                (true, false) => "blocked",
                (false, true) => "allowed",
                (false, false) => "not managed",
            };
            println!("{}: {}", address.trim(), status);
            Ok(())
        }
    }
}

/// Load config, detect the host and select an initialized backend
fn open_backend(config_path: Option<PathBuf>) -> anyhow::Result<Box<dyn FirewallBackend>> {
    let config = Config::load(config_path.as_deref())?;
    let profile = HostProfile::detect();
    info!("Detected host: {}", profile.summary());

    let backend = BackendRegistry::builtin().select_backend(
        &profile,
        &config.firewall.backends,
        config.firewall.rule_prefix(),
    )?;
    Ok(backend)
}
