//! Lattice CLI entrypoint.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;

use commands::{Commands, ConfigCommands};
use config::{CliConfig, OutputFormat};

#[derive(Parser)]
#[command(name = "lattice")]
#[command(author, version, about = "Expand CI job matrices and plan their steps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (overrides the configured one)
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CliConfig::load().unwrap_or_default();
    let format = cli.format.unwrap_or(config.output_format);

    match cli.command {
        Commands::Init { path } => handlers::init(&path)?,
        Commands::Validate { path } => handlers::validate(&path)?,
        Commands::Expand { path, filters } => handlers::expand(&path, &filters, format)?,
        Commands::Plan { path, job, host } => handlers::plan(&config, &path, job, &host, format)?,
        Commands::Qualify { step, path, host } => {
            handlers::qualify(&config, &path, &step, &host, format)?
        }
        Commands::Schema => handlers::schema()?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(())
}
