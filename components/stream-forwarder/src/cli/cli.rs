// Local crates
use crate::helpers::load_config::Overrides;
use crate::runtime;

// External crates
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "stream-forwarder",
    version,
    about = "Follows a log file and forwards its lines to a remote data stream"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow the configured file and forward lines until interrupted
    Run {
        #[arg(short, long, default_value = "/etc/stream_forwarder.toml")]
        config: PathBuf,

        /// Stream name, overrides `stream.name`
        #[arg(short, long)]
        stream: Option<String>,

        /// File to follow, overrides `source.log_path`
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Region, overrides `stream.region`
        #[arg(short, long)]
        region: Option<String>,

        /// Print records to stdout instead of delivering them
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the configuration file and exit
    Validate {
        #[arg(short, long, default_value = "/etc/stream_forwarder.toml")]
        config: PathBuf,
    },

    /// Display version information
    Version,
}

/// Entry function for CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            stream,
            file,
            region,
            dry_run,
        } => {
            let overrides = Overrides {
                stream_name: stream,
                log_path: file,
                region,
            };
            runtime::runtime::run_forwarder(config, overrides, dry_run).await?;
        }
        Commands::Validate { config } => validate_config(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

//
// ------------------------ Command Implementations ------------------------------
//

/// Validate configuration file
fn validate_config(config: PathBuf) -> Result<()> {
    println!("Validating configuration file: {:?}", config);
    let cfg = runtime::runtime::load_config(&config, Overrides::default())?;
    println!("Configuration valid:\n{:#?}", cfg);
    Ok(())
}

/// Show version information
fn show_version() {
    println!("Stream Forwarder {}", env!("CARGO_PKG_VERSION"));
}
