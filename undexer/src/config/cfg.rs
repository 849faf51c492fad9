use std::{path::PathBuf, time::Duration};

use crate::{
    chain::{ChainError, HttpConnector},
    retry::RetryPolicy,
    router::{parse_routes, RouterError, RpcRouter},
};

use super::{Cli, ConfigFile};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("epoch interval ({epoch:?}) must be shorter than block interval ({block:?})")]
    IntervalOrder { epoch: Duration, block: Duration },
    #[error("invalid RPC routes")]
    Routes(#[from] RouterError),
    #[error("failed to build RPC client")]
    Client(#[from] ChainError),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub cli: Cli,
    pub file: ConfigFile,
}

impl Config {
    pub fn new(cli: Cli, file: ConfigFile) -> Self {
        Self { cli, file }
    }

    /// Fail fast on settings the indexer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_routes(self.routes())?;
        let (epoch, block) = (self.epoch_interval(), self.block_interval());
        if epoch >= block {
            return Err(ConfigError::IntervalOrder { epoch, block });
        }
        Ok(())
    }

    pub fn rpc_router(&self) -> Result<RpcRouter<HttpConnector>, ConfigError> {
        Ok(RpcRouter::new(
            HttpConnector::new()?,
            self.connect_retry(),
            self.routes(),
        )?)
    }

    pub fn data(&self) -> PathBuf {
        self.file.data.clone().unwrap_or_else(|| "undexer.db".into())
    }

    pub fn chain_id(&self) -> String {
        self.file
            .chain
            .chain_id
            .clone()
            .unwrap_or_else(|| "housefire-envelope.b8f955720ab".to_string())
    }

    pub fn floor_height(&self) -> u64 {
        self.file.chain.floor_height.unwrap_or(0)
    }

    pub fn validator_fetch_parallel(&self) -> bool {
        self.file.chain.validator_fetch_parallel.unwrap_or(true)
    }

    pub fn routes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.file
            .chain
            .routes
            .iter()
            .map(|(start, url)| (start.as_str(), url.as_str()))
    }

    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.file.indexer.block_interval_ms.unwrap_or(5000))
    }

    pub fn epoch_interval(&self) -> Duration {
        Duration::from_millis(self.file.indexer.epoch_interval_ms.unwrap_or(250))
    }

    pub fn validator_interval(&self) -> Duration {
        Duration::from_millis(self.file.indexer.validator_interval_ms.unwrap_or(30000))
    }

    pub fn consensus_validator_interval(&self) -> Duration {
        Duration::from_millis(
            self.file
                .indexer
                .consensus_validator_interval_ms
                .unwrap_or(30000),
        )
    }

    pub fn proposal_interval(&self) -> Duration {
        Duration::from_millis(self.file.indexer.proposal_interval_ms.unwrap_or(30000))
    }

    /// Connecting to an RPC endpoint never gives up.
    pub fn connect_retry(&self) -> RetryPolicy {
        RetryPolicy::forever(Duration::from_millis(
            self.file.indexer.connect_backoff_ms.unwrap_or(1000),
        ))
    }

    pub fn server_bind(&self) -> String {
        self.file
            .server
            .bind
            .clone()
            .unwrap_or_else(|| "0.0.0.0:8888".to_string())
    }

    pub fn indexer(&self) -> bool {
        self.file.server.indexer.unwrap_or(true)
    }

    pub fn api(&self) -> bool {
        self.file.server.api.unwrap_or(true)
    }
}
