mod api;

use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;

use crate::{
    chain::Connect,
    config::Config,
    router::RpcRouter,
    subcommands::{spawn_jobs, EventBus, Indexer, Intervals, SyncOptions},
};

pub struct AppState<K: Connect> {
    chain_id: String,
    pool: SqlitePool,
    router: Arc<RpcRouter<K>>,
}

impl<K: Connect> Clone for AppState<K> {
    fn clone(&self) -> Self {
        AppState {
            chain_id: self.chain_id.clone(),
            pool: self.pool.clone(),
            router: Arc::clone(&self.router),
        }
    }
}

pub fn app<K: Connect>(state: AppState<K>) -> Router {
    Router::new()
        .route("/", get(api::overview::<K>))
        .route("/status", get(api::status::<K>))
        .route("/search", get(api::search::<K>))
        .route("/blocks", get(api::blocks::<K>))
        .route("/block", get(api::block::<K>))
        .route("/txs", get(api::transactions::<K>))
        .route("/tx/:hash", get(api::transaction::<K>))
        .route("/validators", get(api::validators::<K>))
        .route("/validators/states", get(api::validator_states::<K>))
        .route("/validator", get(api::validator::<K>))
        .route("/proposals", get(api::proposals::<K>))
        .route("/proposals/stats", get(api::proposal_stats::<K>))
        .route("/proposal/:id", get(api::proposal::<K>))
        .route("/proposal/votes/:id", get(api::proposal_votes::<K>))
        .route("/epochs", get(api::epochs::<K>))
        .route("/epoch", get(api::epoch::<K>))
        .route("/total-staked", get(api::total_staked::<K>))
        .route("/parameters", get(api::protocol_parameters::<K>))
        .route("/parameters/staking", get(api::staking_parameters::<K>))
        .route("/parameters/governance", get(api::governance_parameters::<K>))
        .route("/parameters/pgf", get(api::pgf_parameters::<K>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(config: &Config, conn: &SqlitePool) -> anyhow::Result<()> {
    if config.indexer() {
        let (events, receiver) = EventBus::channel();
        let indexer = Arc::new(Indexer::new(
            conn.clone(),
            config.rpc_router()?,
            events,
            SyncOptions::from(config),
        ));
        let _jobs = spawn_jobs(&indexer, receiver, Intervals::from(config));
    }

    let mut app = Router::new();
    if config.api() {
        app = app.merge(self::app(AppState {
            chain_id: config.chain_id(),
            pool: conn.clone(),
            router: Arc::new(config.rpc_router()?),
        }));
    }

    let addr = config.server_bind().parse()?;

    tracing::info!("Starting server on {addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(elegant_departure::tokio::depart().on_termination())
        .await?;

    tracing::info!("Server shutdown complete.");
    elegant_departure::shutdown().await;
    Ok(())
}
