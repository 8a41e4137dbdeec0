//! tikdog CLI entry point

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod args;
mod commands;
mod config;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let configured = config::AppConfig::load(cli.config.as_deref())
        .ok()
        .map(|c| c.general.log_level);
    init_logging(&resolve_log_level(
        cli.log_level.as_deref(),
        configured.as_deref(),
    ))?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, cli.config).await,
        Commands::Config(args) => commands::config::execute(args).await,
        Commands::Doctor(args) => commands::doctor::execute(args, cli.config).await,
    }
}

/// `--log-level`, then `general.log_level`, then `info`. `RUST_LOG` overrides all.
fn resolve_log_level(flag: Option<&str>, configured: Option<&str>) -> String {
    [flag, configured]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|level| !level.is_empty())
        .unwrap_or("info")
        .to_string()
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_precedence() {
        assert_eq!(resolve_log_level(Some("debug"), Some("warn")), "debug");
        assert_eq!(resolve_log_level(None, Some("warn")), "warn");
        assert_eq!(resolve_log_level(None, Some("  ")), "info");
        assert_eq!(resolve_log_level(None, None), "info");
    }
}
