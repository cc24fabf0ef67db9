//! Unified tollgate CLI.
//!
//! - `tollgate serve` - Run the control-plane server
//! - `tollgate render` - Render the forwarder configuration and print it
//! - `tollgate check-config` - Validate a configuration file

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tollgate_config::{CliOverrides, apply_overrides, load_config, validate_config};

/// Tollgate unified CLI.
#[derive(Parser)]
#[command(
    name = "tollgate",
    version,
    about = "Quota and configuration control plane for external traffic forwarders",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control-plane server.
    #[command(name = "serve", alias = "server")]
    Serve(Box<tollgate_server::ServeArgs>),

    /// Render the forwarder configuration from the store and print it.
    #[command(name = "render")]
    Render(RenderArgs),

    /// Load and validate a configuration file.
    #[command(name = "check-config")]
    CheckConfig(CheckConfigArgs),
}

#[derive(Parser)]
struct RenderArgs {
    /// Config file path (json/yaml/toml)
    #[arg(short, long, default_value = "tollgate.toml")]
    config: PathBuf,

    #[command(flatten)]
    overrides: CliOverrides,
}

#[derive(Parser)]
struct CheckConfigArgs {
    /// Config file path (json/yaml/toml)
    #[arg(short, long, default_value = "tollgate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => tollgate_server::run(*args).await,
        Commands::Render(args) => render(args).await,
        Commands::CheckConfig(args) => check_config(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Render the forwarder document exactly as a sync would, without writing
/// it or restarting anything.
async fn render(args: RenderArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args.overrides);
    validate_config(&config)?;

    let store = tollgate_server::connect_store(&config).await?;
    let document = tollgate_sync::render(store.as_ref(), &config.server.public_url).await?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn check_config(args: CheckConfigArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args.config)?;
    validate_config(&config)?;
    println!("{}: ok", args.config.display());
    Ok(())
}
