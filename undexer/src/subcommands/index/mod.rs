mod blocks;
mod epochs;
mod events;
mod proposals;
mod transactions;
mod validators;

use std::{
    future::Future,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use sqlx::SqlitePool;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

use crate::{chain::Connect, config::Config, router::RpcRouter};

pub use events::{EventBus, EventReceiver};
pub use proposals::ProposalCounts;
pub use validators::ValidatorCounts;

#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Highest height considered indexed when the store holds no blocks.
    pub floor_height: u64,
    pub validator_fetch_parallel: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            floor_height: 0,
            validator_fetch_parallel: true,
        }
    }
}

impl From<&Config> for SyncOptions {
    fn from(config: &Config) -> Self {
        SyncOptions {
            floor_height: config.floor_height(),
            validator_fetch_parallel: config.validator_fetch_parallel(),
        }
    }
}

/// Everything a sync job needs: the store, the RPC router and the event bus.
pub struct Indexer<K: Connect> {
    pool: SqlitePool,
    router: RpcRouter<K>,
    events: EventBus,
    options: SyncOptions,
    /// Held for the whole of any validator sync, periodic or event driven.
    validator_sync: Mutex<()>,
    /// Set by a validators-changed event, cleared by the next validator sync to start.
    validators_stale: AtomicBool,
    /// Held for the whole of a proposal sweep or single proposal sync.
    proposal_sync: Mutex<()>,
}

impl<K: Connect> Indexer<K> {
    pub fn new(pool: SqlitePool, router: RpcRouter<K>, events: EventBus, options: SyncOptions) -> Self {
        Indexer {
            pool,
            router,
            events,
            options,
            validator_sync: Mutex::new(()),
            validators_stale: AtomicBool::new(false),
            proposal_sync: Mutex::new(()),
        }
    }

    pub fn router(&self) -> &RpcRouter<K> {
        &self.router
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Intervals {
    pub block: Duration,
    pub epoch: Duration,
    pub validator: Duration,
    pub consensus_validator: Duration,
    pub proposal: Duration,
}

impl From<&Config> for Intervals {
    fn from(config: &Config) -> Self {
        Intervals {
            block: config.block_interval(),
            epoch: config.epoch_interval(),
            validator: config.validator_interval(),
            consensus_validator: config.consensus_validator_interval(),
            proposal: config.proposal_interval(),
        }
    }
}

/// Start the periodic sync jobs and the event dispatcher. Jobs stop at process shutdown.
pub fn spawn_jobs<K: Connect>(
    indexer: &Arc<Indexer<K>>,
    receiver: EventReceiver,
    intervals: Intervals,
) -> Vec<JoinHandle<()>> {
    tracing::info!("Starting indexer: {intervals:?}");
    vec![
        tokio::spawn(events::dispatch(Arc::clone(indexer), receiver)),
        every(intervals.block, indexer, |i| async move { i.try_update_blocks().await }),
        every(intervals.epoch, indexer, |i| async move { i.try_update_epoch().await }),
        every(intervals.validator, indexer, |i| async move {
            i.try_update_validators(None).await;
        }),
        every(intervals.consensus_validator, indexer, |i| async move {
            i.try_update_consensus_validators().await;
        }),
        every(intervals.proposal, indexer, |i| async move {
            i.try_update_proposals(None).await;
        }),
    ]
}

/// Run `job` every `period`. A run that overruns its period delays the next one instead of
/// stacking up behind it.
fn every<K, F, Fut>(period: Duration, indexer: &Arc<Indexer<K>>, job: F) -> JoinHandle<()>
where
    K: Connect,
    F: Fn(Arc<Indexer<K>>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let indexer = Arc::clone(indexer);
    tokio::spawn(async move {
        let guard = elegant_departure::get_shutdown_guard();
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = guard.wait() => break,
            }
            job(Arc::clone(&indexer)).await;
        }
    })
}

pub async fn index(config: &Config, pool: &SqlitePool) -> anyhow::Result<()> {
    let (events, receiver) = EventBus::channel();
    let indexer = Arc::new(Indexer::new(
        pool.clone(),
        config.rpc_router()?,
        events,
        SyncOptions::from(config),
    ));
    let _jobs = spawn_jobs(&indexer, receiver, Intervals::from(config));

    elegant_departure::tokio::depart().on_termination().await;
    tracing::info!("Indexer shutting down.");
    elegant_departure::shutdown().await;
    Ok(())
}
