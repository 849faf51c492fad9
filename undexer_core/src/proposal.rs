use std::{convert::Infallible, fmt::Display, str::FromStr};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{serde_as, DisplayFromStr, PickFirst};

/// Everything the chain knows about one governance proposal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposalInfo {
    pub proposal: ChainProposal,
    #[serde(default)]
    pub votes: Vec<Value>,
    #[serde(default)]
    pub result: Option<Value>,
}

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainProposal {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: u64,
    #[serde(default)]
    pub content: Value,
    #[serde(flatten)]
    pub metadata: ProposalMetadata,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProposalMetadata {
    #[serde(rename = "type")]
    pub proposal_type: ProposalType,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProposalMetadata {
    /// Steward and payment operations arrive as a set; store them in a stable order.
    pub fn normalize(&mut self) {
        if let Some(ops) = self.proposal_type.ops.as_mut() {
            *ops = ops
                .drain(..)
                .map(|op| (op.to_string(), op))
                .sorted_by(|(a, _), (b, _)| a.cmp(b))
                .dedup_by(|(a, _), (b, _)| a == b)
                .map(|(_, op)| op)
                .collect();
        }
    }

    pub fn carries_wasm(&self) -> bool {
        self.proposal_type.kind == ProposalKind::DefaultWithWasm
    }

    pub fn status(&self) -> Option<&str> {
        self.extra.get("status").and_then(Value::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProposalType {
    #[serde(rename = "type")]
    pub kind: ProposalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ops: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde_with::DeserializeFromStr, serde_with::SerializeDisplay)]
pub enum ProposalKind {
    Default,
    DefaultWithWasm,
    PgfSteward,
    PgfPayment,
    Unknown(String),
}

impl Display for ProposalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProposalKind::Default => "Default",
            ProposalKind::DefaultWithWasm => "DefaultWithWasm",
            ProposalKind::PgfSteward => "PGFSteward",
            ProposalKind::PgfPayment => "PGFPayment",
            ProposalKind::Unknown(s) => s.as_str(),
        };
        write!(f, "{s}")
    }
}

impl FromStr for ProposalKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Default" => ProposalKind::Default,
            "DefaultWithWasm" => ProposalKind::DefaultWithWasm,
            "PGFSteward" => ProposalKind::PgfSteward,
            "PGFPayment" => ProposalKind::PgfPayment,
            other => ProposalKind::Unknown(other.to_string()),
        })
    }
}

/// Code attached to a `DefaultWithWasm` proposal.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalWasm {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: u64,
    pub code_key: String,
    #[serde(with = "hex")]
    pub wasm: Vec<u8>,
}
