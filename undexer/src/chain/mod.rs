mod http;

pub use http::*;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use undexer_core::{ChainBlock, ProposalInfo, ProposalWasm, ValidatorInfo};

#[derive(thiserror::Error, Debug)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default)]
pub struct ValidatorQuery {
    /// Fetch validator details concurrently.
    pub parallel: bool,
    /// Restrict the query to these addresses. `None` means every known validator.
    pub addresses: Option<Vec<String>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterKind {
    Protocol,
    Staking,
    Governance,
    Pgf,
}

impl ParameterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterKind::Protocol => "protocol",
            ParameterKind::Staking => "staking",
            ParameterKind::Governance => "governance",
            ParameterKind::Pgf => "pgf",
        }
    }
}

/// Read access to the chain. Every error is transient from the indexer's point of view.
#[async_trait]
pub trait Chain: Send + Sync + 'static {
    async fn fetch_height(&self) -> Result<u64, ChainError>;

    async fn fetch_block(&self, height: u64) -> Result<ChainBlock, ChainError>;

    /// Epoch at `height`, or the current epoch.
    async fn fetch_epoch(&self, height: Option<u64>) -> Result<u64, ChainError>;

    async fn fetch_epoch_first_block(&self) -> Result<u64, ChainError>;

    async fn fetch_epoch_duration(&self) -> Result<Value, ChainError>;

    /// Validators one at a time, so memory stays bounded whatever the size of the set.
    fn fetch_validators(
        &self,
        query: ValidatorQuery,
    ) -> BoxStream<'_, Result<ValidatorInfo, ChainError>>;

    async fn fetch_proposal_count(&self) -> Result<u64, ChainError>;

    async fn fetch_proposal_info(&self, id: u64) -> Result<ProposalInfo, ChainError>;

    async fn fetch_proposal_wasm(&self, id: u64) -> Result<Option<ProposalWasm>, ChainError>;

    async fn fetch_total_staked(&self, epoch: Option<u64>) -> Result<String, ChainError>;

    async fn fetch_parameters(&self, kind: ParameterKind) -> Result<Value, ChainError>;
}

/// Establishes a [`Chain`] connection to an RPC endpoint.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    type Chain: Chain;

    async fn connect(&self, url: &str) -> Result<Self::Chain, ChainError>;
}
