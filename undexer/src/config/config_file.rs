use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub api: Option<bool>,
    pub indexer: Option<bool>,
}
impl ServerConfig {
    fn example() -> ServerConfig {
        ServerConfig {
            bind: Some("0.0.0.0:8888".into()),
            api: Some(true),
            indexer: Some(true),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ChainConfig {
    pub chain_id: Option<String>,
    /// Height to start from when nothing has been indexed yet.
    pub floor_height: Option<u64>,
    pub validator_fetch_parallel: Option<bool>,
    /// First block height served by an RPC endpoint, mapped to its URL.
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
}
impl ChainConfig {
    fn example() -> ChainConfig {
        ChainConfig {
            chain_id: Some("housefire-envelope.b8f955720ab".into()),
            floor_height: Some(0),
            validator_fetch_parallel: Some(true),
            routes: BTreeMap::from([
                ("0".into(), "https://archive-rpc.example.com/".into()),
                ("237907".into(), "https://rpc.example.com/".into()),
            ]),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct IndexerConfig {
    pub block_interval_ms: Option<u64>,
    pub epoch_interval_ms: Option<u64>,
    pub validator_interval_ms: Option<u64>,
    pub consensus_validator_interval_ms: Option<u64>,
    pub proposal_interval_ms: Option<u64>,
    pub connect_backoff_ms: Option<u64>,
}
impl IndexerConfig {
    fn example() -> IndexerConfig {
        IndexerConfig {
            block_interval_ms: Some(5000),
            epoch_interval_ms: Some(250),
            validator_interval_ms: Some(30000),
            consensus_validator_interval_ms: Some(30000),
            proposal_interval_ms: Some(30000),
            connect_backoff_ms: Some(1000),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ConfigFile {
    pub data: Option<PathBuf>,
    pub chain: ChainConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl ConfigFile {
    pub fn example() -> ConfigFile {
        ConfigFile {
            data: Some("undexer.db".into()),
            chain: ChainConfig::example(),
            indexer: IndexerConfig::example(),
            server: ServerConfig::example(),
        }
    }
}
