//! Kiln CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Kiln build server CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "KILN_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a trigger payload (JSON file, `-` for stdin)
    Submit {
        /// Path to the payload file
        path: PathBuf,
        /// Wait for the build to finish
        #[arg(short, long)]
        wait: bool,
    },
    /// Inspect builds
    Builds {
        #[command(subcommand)]
        command: BuildCommands,
    },
    /// Run an existing build again
    Rebuild {
        /// Build ID
        id: String,
        /// Wait for the build to finish
        #[arg(short, long)]
        wait: bool,
    },
    /// Show what the worker is doing
    Status,
    /// Failed builds per author
    Blame,
    /// Show the server settings
    Settings,
    /// Validate a settings file
    Validate {
        /// Path to the settings file
        #[arg(default_value = "kiln.kdl")]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum BuildCommands {
    /// List all builds
    List,
    /// Show build details
    Show {
        /// Build ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Submit { path, wait } => {
            commands::submit(&cli.api_url, &path, wait).await?;
        }
        Commands::Builds { command } => match command {
            BuildCommands::List => {
                commands::builds::list(&cli.api_url).await?;
            }
            BuildCommands::Show { id } => {
                commands::builds::show(&cli.api_url, &id).await?;
            }
        },
        Commands::Rebuild { id, wait } => {
            commands::rebuild(&cli.api_url, &id, wait).await?;
        }
        Commands::Status => {
            commands::status(&cli.api_url).await?;
        }
        Commands::Blame => {
            commands::blame(&cli.api_url).await?;
        }
        Commands::Settings => {
            commands::settings(&cli.api_url).await?;
        }
        Commands::Validate { path } => {
            if let Err(e) = commands::validate(&path) {
                eprintln!("Configuration error: {:#}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
