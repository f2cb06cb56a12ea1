use clap::{Parser, Subcommand, ValueEnum};
use conclave::{Capabilities, ConclaveConfig, Instance, SessionGroup};
use std::path::PathBuf;

mod error;
mod serve;

use error::CliError;

#[derive(Parser, Debug)]
#[command(name = "conclave", version = "0.3.0")]
#[command(about = "Conclave CLI - shared storage, tool dispatch and session contexts")]
struct Cli {
    /// Log output format (logs go to stderr)
    #[arg(long, value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an instance and answer JSON-lines tool calls on stdin
    Serve {
        /// SQLite file for the session group (default: in-memory)
        #[arg(long)]
        database: Option<PathBuf>,
    },
    /// Print the tool descriptors as JSON
    Tools,
    /// Translate a natural-language request into a parameterised statement
    Sql {
        #[arg(required = true)]
        natural: Vec<String>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    if let Err(e) = run(cli.command).await {
        tracing::error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}

/// RUST_LOG wins when set; otherwise `info`. Logs go to stderr, stdout carries responses.
fn init_logging(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}

async fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Serve { database } => {
            let mut config = ConclaveConfig::from_env()?;
            if let Some(path) = database {
                config.database_path = Some(path);
            }
            serve::run(config).await
        }
        Commands::Tools => {
            let config = ConclaveConfig::builder().in_memory().build()?;
            let group = SessionGroup::new(&config);
            let instance = Instance::start(&group, config, Capabilities::default()).await?;
            let descriptors = instance.registry().descriptors();
            instance.shutdown().await;
            println!("{}", serde_json::to_string_pretty(&descriptors)?);
            Ok(())
        }
        Commands::Sql { natural } => {
            let statement = conclave::tools::builtins::natural_to_sql(&natural.join(" "));
            println!("{}", serde_json::to_string_pretty(&statement)?);
            Ok(())
        }
        Commands::Config => {
            let config = ConclaveConfig::from_env()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_defaults_to_json() {
        let cli = Cli::try_parse_from(["conclave", "tools"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn log_format_is_global() {
        let cli = Cli::try_parse_from(["conclave", "--log-format", "pretty", "tools"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Pretty);

        let cli = Cli::try_parse_from(["conclave", "config", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["conclave", "--log-format", "xml", "tools"]).is_err());
    }
}
