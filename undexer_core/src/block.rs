use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Content, CoreError, Section};

/// A block as returned by the chain, with its transactions already decoded.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainBlock {
    pub hash: String,
    pub height: u64,
    #[serde(default)]
    pub time: Option<String>,
    pub header: BlockHeader,
    #[serde(default)]
    pub transactions: Vec<ChainTransaction>,
    #[serde(default)]
    pub responses: Option<RawResponses>,
}

impl ChainBlock {
    /// The decoded `/block` response, if the raw response was captured.
    pub fn block_data(&self) -> Result<Option<Value>, CoreError> {
        self.responses
            .as_ref()
            .and_then(|r| r.block.as_ref())
            .map(RawResponse::decode)
            .transpose()
    }

    /// The decoded `/block_results` response, if the raw response was captured.
    pub fn block_results(&self) -> Result<Option<Value>, CoreError> {
        self.responses
            .as_ref()
            .and_then(|r| r.results.as_ref())
            .map(RawResponse::decode)
            .transpose()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub chain_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposer_address: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResponses {
    #[serde(default)]
    pub block: Option<RawResponse>,
    #[serde(default)]
    pub results: Option<RawResponse>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub response: String,
}

impl RawResponse {
    pub fn decode(&self) -> Result<Value, CoreError> {
        Ok(serde_json::from_str(&self.response)?)
    }
}

/// A transaction as received. Serializing it gives back the fields it was read from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub id: String,
    pub data: TransactionData,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Consensus addresses of the validators that signed the previous block,
/// taken from `result.block.last_commit.signatures` of a `/block` response.
pub fn commit_signers(block_data: &Value) -> Vec<&str> {
    block_data
        .pointer("/result/block/last_commit/signatures")
        .and_then(Value::as_array)
        .map(|signatures| {
            signatures
                .iter()
                .filter_map(|s| s.get("validator_address").and_then(Value::as_str))
                .filter(|a| !a.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// How often a consensus address appears among the signers of a run of blocks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Uptime {
    pub current_height: Option<u64>,
    pub counted_blocks: usize,
    pub last_signed_blocks: Vec<u64>,
}

impl Uptime {
    /// `blocks` is expected newest first.
    pub fn count<'a>(
        address: &str,
        blocks: impl IntoIterator<Item = (u64, Option<&'a Value>)>,
    ) -> Uptime {
        let mut uptime = Uptime::default();
        for (height, block_data) in blocks {
            uptime.current_height.get_or_insert(height);
            uptime.counted_blocks += 1;
            let signed = block_data
                .map(|data| commit_signers(data).contains(&address))
                .unwrap_or(false);
            if signed {
                uptime.last_signed_blocks.push(height);
            }
        }
        uptime
    }

    pub fn uptime(&self) -> usize {
        self.last_signed_blocks.len()
    }
}
