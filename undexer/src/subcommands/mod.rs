mod index;
mod server;

pub use index::*;
pub use server::*;

use std::{sync::Arc, time::Duration};

use sqlx::SqlitePool;
use yansi::Paint;

use crate::{
    chain::{Chain, HttpConnector},
    config::{Config, ConfigFile},
    db,
};

const RECENT_ERRORS: u32 = 5;

pub(crate) fn init() -> anyhow::Result<()> {
    let config_file = ConfigFile::example();
    let cfg = toml::to_string(&config_file)?;
    println!("{cfg} ");
    Ok(())
}

/// An indexer for one-off commands. Events it raises are dropped.
fn standalone(config: &Config, pool: &SqlitePool) -> anyhow::Result<Arc<Indexer<HttpConnector>>> {
    let (events, _) = EventBus::channel();
    Ok(Arc::new(Indexer::new(
        pool.clone(),
        config.rpc_router()?,
        events,
        SyncOptions::from(config),
    )))
}

pub(crate) async fn reindex(
    config: &Config,
    pool: &SqlitePool,
    from: u64,
    to: Option<u64>,
) -> anyhow::Result<()> {
    let indexer = standalone(config, pool)?;
    let to = match to {
        Some(to) => to,
        None => indexer.router().head().await?.fetch_height().await?,
    };
    tracing::info!("Re-indexing blocks {from} to {to}.");
    indexer
        .reindex(from, to, Duration::from_secs(1))
        .await?;
    Ok(())
}

pub(crate) async fn rescan(pool: &SqlitePool, blockheight: u64) -> anyhow::Result<()> {
    tracing::info!("Re-scanning blockchain from blockheight {blockheight}.");
    let mut tx = pool.begin().await?;
    let deleted = db::block::delete_from(&mut tx, blockheight).await?;
    tx.commit().await?;
    tracing::info!("Deleted {deleted} blocks.");
    Ok(())
}

pub(crate) async fn reset_validators(config: &Config, pool: &SqlitePool) -> anyhow::Result<()> {
    let count = standalone(config, pool)?.reset_validators().await?;
    println!("{}{count}", Paint::green("Validators stored: "));
    Ok(())
}

pub(crate) async fn status(config: &Config, pool: &SqlitePool) -> anyhow::Result<()> {
    let status = db::stats::status(pool).await?;
    let height = |h: Option<i64>| h.map_or_else(|| "-".to_string(), |h| h.to_string());
    println!("{}{}", Paint::yellow("Chain:             "), config.chain_id());
    println!("{}{}", Paint::green("Blocks:            "), status.total_blocks);
    println!("{}{}", Paint::green("  oldest:          "), height(status.oldest_block));
    println!("{}{}", Paint::green("  latest:          "), height(status.latest_block));
    println!("{}{}", Paint::green("  without epoch:   "), status.blocks_without_epoch);
    println!("{}{}", Paint::green("Transactions:      "), status.total_transactions);
    println!("{}{}", Paint::green("Validators:        "), status.total_validators);
    println!("{}{}", Paint::green("Proposals:         "), status.total_proposals);
    println!("{}{}", Paint::green("Votes:             "), status.total_votes);
    let errors = if status.total_errors > 0 {
        Paint::red(status.total_errors)
    } else {
        Paint::green(status.total_errors)
    };
    println!("{}{}", Paint::green("Logged errors:     "), errors);
    for row in db::error_log::latest(pool, RECENT_ERRORS).await? {
        println!(
            "  #{} {} {} {}",
            row.id,
            Paint::yellow(&row.timestamp),
            row.message,
            Paint::default(row.info.unwrap_or_default()).dimmed()
        );
        tracing::debug!("{}", row.stack);
    }
    Ok(())
}

pub(crate) fn version() {
    let version = env!("CARGO_PKG_VERSION");
    println!("Current version is {version}");
}
