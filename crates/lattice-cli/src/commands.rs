//! CLI command definitions.

use clap::{Args, Subcommand};

#[derive(Subcommand)]
pub enum Commands {
    /// Create a starter matrix document
    Init {
        /// Where to write the document
        #[arg(default_value = "lattice.yaml")]
        path: String,
    },

    /// Validate a matrix document
    Validate {
        /// Path to the matrix document
        #[arg(default_value = "lattice.yaml")]
        path: String,
    },

    /// List the jobs a matrix expands to
    Expand {
        /// Path to the matrix document
        #[arg(default_value = "lattice.yaml")]
        path: String,

        /// Only show jobs with this field value (repeatable)
        #[arg(short, long = "filter", value_name = "FIELD=VALUE", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
    },

    /// Show the steps each job runs on a host
    Plan {
        /// Path to the matrix document
        #[arg(default_value = "lattice.yaml")]
        path: String,

        /// Plan only the job with this index
        #[arg(short, long)]
        job: Option<usize>,

        #[command(flatten)]
        host: HostArgs,
    },

    /// List the jobs that run a given step
    Qualify {
        /// Step id
        step: String,

        /// Path to the matrix document
        #[arg(default_value = "lattice.yaml")]
        path: String,

        #[command(flatten)]
        host: HostArgs,
    },

    /// Print the JSON schema of the matrix document
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Host fact overrides.
#[derive(Args, Debug, Default)]
pub struct HostArgs {
    /// Runner OS (defaults to the configured or current OS)
    #[arg(long)]
    pub host_os: Option<String>,

    /// Host fact (repeatable)
    #[arg(long = "fact", value_name = "NAME=VALUE", value_parser = parse_key_value)]
    pub facts: Vec<(String, String)>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}

pub fn parse_key_value(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{}'", input)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("gpu=true"),
            Ok(("gpu".to_string(), "true".to_string()))
        );
        assert_eq!(
            parse_key_value("flags=--a=b"),
            Ok(("flags".to_string(), "--a=b".to_string()))
        );
        assert_eq!(parse_key_value("empty="), Ok(("empty".to_string(), String::new())));
        assert!(parse_key_value("gpu").is_err());
        assert!(parse_key_value("=true").is_err());
    }
}
