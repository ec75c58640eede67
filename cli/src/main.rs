use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
use commands::{analyze, inspect, ledger, serve};

#[derive(Parser)]
#[command(name = "auditctl", author, version, about = "Smart-contract audit service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file; environment variables override it
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Listen address, defaults to the config value
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Expose Prometheus metrics on this address
        #[arg(long)]
        metrics: Option<SocketAddr>,
    },
    /// Analyze a contract once and print the findings
    Analyze {
        file: PathBuf,
        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
    },
    /// Show the processing tier for a contract
    Tier { file: PathBuf },
    /// Print the content hash used as the ledger key
    Hash { file: PathBuf },
    /// Read the provenance ledger
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },
}

#[derive(Subcommand)]
enum LedgerCommands {
    /// Look up the locator stored for an owner and content hash
    Get {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        hash: String,
    },
    /// List the content hashes an owner has anchored
    Hashes {
        #[arg(long)]
        owner: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind, metrics } => serve::run(config, bind, metrics).await?,
        Commands::Analyze { file, json } => analyze::run(&config, &file, json).await?,
        Commands::Tier { file } => inspect::tier(&config, &file)?,
        Commands::Hash { file } => inspect::hash(&file)?,
        Commands::Ledger { command } => match command {
            LedgerCommands::Get { owner, hash } => ledger::get(&config, &owner, &hash).await?,
            LedgerCommands::Hashes { owner } => ledger::hashes(&config, &owner).await?,
        },
    }

    Ok(())
}
