//! Fakes shared by the unit tests: a scripted chain and an in-memory store.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use futures::{
    stream::{self, BoxStream},
    StreamExt,
};
use serde_json::{json, Value};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use undexer_core::{
    ChainBlock, ChainTransaction, ProposalInfo, ProposalWasm, ValidatorInfo, ValidatorState,
};

use crate::{
    chain::{Chain, ChainError, Connect, ParameterKind, ValidatorQuery},
    db,
};

/// A migrated in-memory database. One connection, kept open, so every query sees the same data.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::migrate(&pool).await.unwrap();
    pool
}

/// A migrated database file in WAL mode, removed on drop. Unlike [`memory_pool`] it serves
/// several connections at once.
pub struct FileDb {
    pub pool: SqlitePool,
    path: PathBuf,
}

pub async fn file_db() -> FileDb {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let path = std::env::temp_dir().join(format!(
        "undexer-test-{}-{}.db",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::SeqCst)
    ));
    let pool = db::connect(&path).await.unwrap();
    db::migrate(&pool).await.unwrap();
    FileDb { pool, path }
}

impl Drop for FileDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.path.display()));
        }
    }
}

pub fn transaction(id: &str, content: Value) -> ChainTransaction {
    serde_json::from_value(json!({
        "id": id,
        "data": {
            "chainId": "test-chain",
            "timestamp": "2024-05-01T00:00:00Z",
            "content": content,
            "sections": [{ "type": "Header" }, { "type": "Code", "tag": "wasm" }]
        }
    }))
    .unwrap()
}

pub fn chain_block(height: u64, transactions: Vec<ChainTransaction>) -> ChainBlock {
    let block_data = json!({
        "result": { "block": { "last_commit": { "signatures": [
            { "validator_address": "AAA" },
            { "validator_address": "BBB" },
            { "validator_address": "" }
        ] } } }
    });
    serde_json::from_value(json!({
        "hash": format!("HASH{height}"),
        "height": height,
        "time": format!("2024-05-01T00:{:02}:{:02}Z", height / 60 % 60, height % 60),
        "header": { "chainId": "test-chain", "proposerAddress": "AAA" },
        "transactions": transactions,
        "responses": {
            "block": { "response": block_data.to_string() },
            "results": { "response": "{}" }
        }
    }))
    .unwrap()
}

pub fn validator_info(address: &str, public_key: &str, consensus: &str, stake: &str) -> ValidatorInfo {
    ValidatorInfo {
        namada_address: address.into(),
        public_key: Some(public_key.into()),
        address: Some(consensus.into()),
        voting_power: Some(stake.into()),
        stake: Some(stake.into()),
        state: Some(ValidatorState::Consensus),
        ..Default::default()
    }
}

pub fn proposal_info(
    id: u64,
    kind: &str,
    status: &str,
    result: Option<&str>,
    votes: usize,
) -> ProposalInfo {
    let votes: Vec<Value> = (0..votes)
        .map(|n| json!({ "voter": format!("tnam1voter{n}"), "vote": "yay" }))
        .collect();
    serde_json::from_value(json!({
        "proposal": {
            "id": id.to_string(),
            "content": { "title": format!("Proposal {id}") },
            "type": { "type": kind },
            "author": "tnam1author",
            "status": status,
            "tallyType": "TwoThirds"
        },
        "votes": votes,
        "result": result.map(|r| json!({ "result": r }))
    }))
    .unwrap()
}

fn unavailable(what: impl std::fmt::Display) -> ChainError {
    ChainError::Rpc {
        code: -32000,
        message: format!("{what} unavailable"),
    }
}

/// What the fake chain knows, and what it was asked.
#[derive(Default)]
pub struct FakeState {
    pub height: u64,
    pub blocks: BTreeMap<u64, ChainBlock>,
    /// Epoch by block height. Heights without an entry fail.
    pub epochs: HashMap<u64, u64>,
    pub validators: Vec<ValidatorInfo>,
    /// Validators whose details cannot be fetched.
    pub broken_validators: HashSet<String>,
    pub proposals: BTreeMap<u64, ProposalInfo>,
    pub wasm: HashMap<u64, ProposalWasm>,
    pub calls: Vec<String>,
    /// When set, every block fetch records the latest height committed to this store.
    pub observer: Option<SqlitePool>,
    pub committed_at_fetch: Vec<(u64, Option<u64>)>,
}

#[derive(Clone, Default)]
pub struct FakeChain {
    url: String,
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeChain {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    /// Chain head at `height`, with an empty block and an epoch for every height from 1.
    pub fn grow_to(&self, height: u64) {
        self.with(|s| {
            for h in 1..=height {
                s.blocks.entry(h).or_insert_with(|| chain_block(h, vec![]));
                s.epochs.entry(h).or_insert(h / 10);
            }
            s.height = height;
        });
    }
}

#[async_trait]
impl Chain for FakeChain {
    async fn fetch_height(&self) -> Result<u64, ChainError> {
        Ok(self.with(|s| s.height))
    }

    async fn fetch_block(&self, height: u64) -> Result<ChainBlock, ChainError> {
        let observer = self.with(|s| {
            s.calls.push(format!("block {height}"));
            s.observer.clone()
        });
        if let Some(pool) = observer {
            let committed = db::block::latest_height(&pool).await.unwrap();
            self.with(|s| s.committed_at_fetch.push((height, committed)));
        }
        self.with(|s| s.blocks.get(&height).cloned())
            .ok_or_else(|| unavailable(format!("block {height}")))
    }

    async fn fetch_epoch(&self, height: Option<u64>) -> Result<u64, ChainError> {
        self.with(|s| {
            let height = height.unwrap_or(s.height);
            s.calls.push(format!("epoch {height}"));
            s.epochs.get(&height).copied()
        })
        .ok_or_else(|| unavailable("epoch"))
    }

    async fn fetch_epoch_first_block(&self) -> Result<u64, ChainError> {
        Ok(self.with(|s| s.height - s.height % 10))
    }

    async fn fetch_epoch_duration(&self) -> Result<Value, ChainError> {
        Ok(json!({ "minNumOfBlocks": "10", "minDuration": "60" }))
    }

    fn fetch_validators(
        &self,
        query: ValidatorQuery,
    ) -> BoxStream<'_, Result<ValidatorInfo, ChainError>> {
        let validators: Vec<_> = self.with(|s| {
            s.calls.push(match &query.addresses {
                Some(addresses) => format!("validators {}", addresses.join(",")),
                None => "validators".to_string(),
            });
            s.validators
                .iter()
                .filter(|v| {
                    query
                        .addresses
                        .as_ref()
                        .map_or(true, |a| a.contains(&v.namada_address))
                })
                .map(|v| {
                    if s.broken_validators.contains(&v.namada_address) {
                        Err(unavailable(&v.namada_address))
                    } else {
                        Ok(v.clone())
                    }
                })
                .collect()
        });
        stream::iter(validators).boxed()
    }

    async fn fetch_proposal_count(&self) -> Result<u64, ChainError> {
        Ok(self.with(|s| s.proposals.len() as u64))
    }

    async fn fetch_proposal_info(&self, id: u64) -> Result<ProposalInfo, ChainError> {
        self.with(|s| {
            s.calls.push(format!("proposal {id}"));
            s.proposals.get(&id).cloned()
        })
        .ok_or_else(|| unavailable(format!("proposal {id}")))
    }

    async fn fetch_proposal_wasm(&self, id: u64) -> Result<Option<ProposalWasm>, ChainError> {
        Ok(self.with(|s| {
            s.calls.push(format!("wasm {id}"));
            s.wasm.get(&id).cloned()
        }))
    }

    async fn fetch_total_staked(&self, epoch: Option<u64>) -> Result<String, ChainError> {
        Ok(format!("{}000", epoch.unwrap_or(1)))
    }

    async fn fetch_parameters(&self, kind: ParameterKind) -> Result<Value, ChainError> {
        Ok(json!({ "kind": kind.as_str() }))
    }
}

/// Hands out [`FakeChain`]s sharing one state, failing a scripted number of attempts per URL.
#[derive(Default)]
pub struct FakeConnector {
    pub state: Arc<Mutex<FakeState>>,
    attempts: Mutex<HashMap<String, u32>>,
    failures: Mutex<HashMap<String, u32>>,
}

impl FakeConnector {
    pub fn new(chain: &FakeChain) -> FakeConnector {
        FakeConnector {
            state: Arc::clone(&chain.state),
            ..Default::default()
        }
    }

    pub fn fail_next(&self, url: &str, times: u32) {
        self.failures.lock().unwrap().insert(url.to_string(), times);
    }

    pub fn attempts(&self, url: &str) -> u32 {
        self.attempts.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Connect for FakeConnector {
    type Chain = FakeChain;

    async fn connect(&self, url: &str) -> Result<FakeChain, ChainError> {
        *self.attempts.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let mut failures = self.failures.lock().unwrap();
        if let Some(left) = failures.get_mut(url).filter(|left| **left > 0) {
            *left -= 1;
            return Err(unavailable(url));
        }
        Ok(FakeChain {
            url: url.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}
