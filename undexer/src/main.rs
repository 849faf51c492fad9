#![warn(
    clippy::suspicious,
    clippy::complexity,
    clippy::perf,
    clippy::style,
    clippy::pedantic
)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::module_name_repetitions
)]

mod chain;
mod config;
mod db;
mod retry;
mod router;
mod subcommands;
#[cfg(test)]
mod testing;

use anyhow::bail;
use clap::Parser;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // These two need no config file.
    match config::Cli::parse().subcommand {
        config::Subcommand::Init => return subcommands::init(),
        config::Subcommand::Version => {
            subcommands::version();
            return Ok(());
        }
        _ => {}
    }
    let config = parse_config()?;
    config.validate()?;

    let pool = db::initialize(&config).await?;

    match &config.cli.subcommand {
        config::Subcommand::Init => subcommands::init()?,
        config::Subcommand::Index => subcommands::index(&config, &pool).await?,
        config::Subcommand::Server => subcommands::start(&config, &pool).await?,
        config::Subcommand::Reindex { from, to } => {
            subcommands::reindex(&config, &pool, *from, *to).await?;
        }
        config::Subcommand::Rescan { blockheight } => {
            subcommands::rescan(&pool, *blockheight).await?;
        }
        config::Subcommand::ResetValidators => {
            subcommands::reset_validators(&config, &pool).await?;
        }
        config::Subcommand::Status => subcommands::status(&config, &pool).await?,
        config::Subcommand::Version => {
            subcommands::version();
        }
    }

    Ok(())
}

fn parse_config() -> anyhow::Result<Config> {
    let cli = config::Cli::parse();

    let file = if cli.config.is_file() {
        let config_str = std::fs::read_to_string(&cli.config)?;

        toml::from_str(&config_str)?
    } else {
        tracing::error!("Config file not found.");
        bail!("Missing config file.")
    };

    let config = Config::new(cli, file);

    tracing::debug!("Config loaded: {config:?}");

    Ok(config)
}
