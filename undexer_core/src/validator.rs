use std::{fmt::Display, str::FromStr};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CoreError;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde_with::DeserializeFromStr, serde_with::SerializeDisplay,
)]
pub enum ValidatorState {
    BelowThreshold,
    BelowCapacity,
    Jailed,
    Consensus,
    Inactive,
}

impl ValidatorState {
    pub const ALL: [ValidatorState; 5] = [
        ValidatorState::BelowThreshold,
        ValidatorState::BelowCapacity,
        ValidatorState::Jailed,
        ValidatorState::Consensus,
        ValidatorState::Inactive,
    ];
}

impl Display for ValidatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValidatorState::BelowThreshold => "BelowThreshold",
            ValidatorState::BelowCapacity => "BelowCapacity",
            ValidatorState::Jailed => "Jailed",
            ValidatorState::Consensus => "Consensus",
            ValidatorState::Inactive => "Inactive",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ValidatorState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ValidatorState::ALL
            .into_iter()
            .find(|state| state.to_string() == s)
            .ok_or_else(|| CoreError::ValidatorState(s.to_string()))
    }
}

/// A validator as reported by the chain.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorInfo {
    pub namada_address: String,
    #[serde(default)]
    pub public_key: Option<String>,
    /// Consensus (tendermint) address.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub voting_power: Option<String>,
    #[serde(default)]
    pub proposer_priority: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub commission: Option<Value>,
    #[serde(default)]
    pub stake: Option<String>,
    #[serde(default)]
    pub state: Option<ValidatorState>,
}

/// A validator as stored, including every key and consensus address it has used.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorRecord {
    pub namada_address: String,
    pub public_key: Option<String>,
    pub past_public_keys: Vec<String>,
    pub consensus_address: Option<String>,
    pub past_consensus_addresses: Vec<String>,
    pub voting_power: Option<String>,
    pub proposer_priority: Option<String>,
    pub metadata: Option<Value>,
    pub commission: Option<Value>,
    pub stake: Option<String>,
    pub state: Option<ValidatorState>,
}

impl From<ValidatorInfo> for ValidatorRecord {
    fn from(info: ValidatorInfo) -> Self {
        ValidatorRecord {
            namada_address: info.namada_address,
            public_key: info.public_key,
            past_public_keys: Vec::new(),
            consensus_address: info.address,
            past_consensus_addresses: Vec::new(),
            voting_power: info.voting_power,
            proposer_priority: info.proposer_priority,
            metadata: info.metadata,
            commission: info.commission,
            stake: info.stake,
            state: info.state,
        }
    }
}

impl ValidatorRecord {
    /// Overwrite the current fields with the chain's view, moving a replaced public key or
    /// consensus address into its history. Histories only ever grow and never hold duplicates.
    pub fn merge(&mut self, info: ValidatorInfo) {
        let previous_key = std::mem::replace(&mut self.public_key, info.public_key);
        retire(&mut self.past_public_keys, previous_key, self.public_key.as_deref());

        let previous_address = std::mem::replace(&mut self.consensus_address, info.address);
        retire(
            &mut self.past_consensus_addresses,
            previous_address,
            self.consensus_address.as_deref(),
        );

        self.voting_power = info.voting_power;
        self.proposer_priority = info.proposer_priority;
        self.metadata = info.metadata;
        self.commission = info.commission;
        self.stake = info.stake;
        self.state = info.state;
    }
}

fn retire(history: &mut Vec<String>, previous: Option<String>, current: Option<&str>) {
    if let Some(previous) = previous {
        if Some(previous.as_str()) != current {
            history.push(previous);
        }
    }
    *history = history.drain(..).unique().collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(public_key: &str, address: &str) -> ValidatorInfo {
        ValidatorInfo {
            namada_address: "tnam1validator".into(),
            public_key: Some(public_key.into()),
            address: Some(address.into()),
            stake: Some("1000".into()),
            state: Some(ValidatorState::Consensus),
            ..Default::default()
        }
    }

    #[test]
    fn test_state_parse() {
        assert_eq!(
            "BelowCapacity".parse::<ValidatorState>().unwrap(),
            ValidatorState::BelowCapacity
        );
        assert!("Retired".parse::<ValidatorState>().is_err());
        let json = serde_json::to_string(&ValidatorState::Jailed).unwrap();
        assert_eq!(json, r#""Jailed""#);
    }

    #[test]
    fn test_merge_moves_key_to_history() {
        let mut record = ValidatorRecord::from(info("pkA", "addrA"));
        assert!(record.past_public_keys.is_empty());

        record.merge(info("pkB", "addrA"));
        assert_eq!(record.public_key.as_deref(), Some("pkB"));
        assert_eq!(record.past_public_keys, vec!["pkA"]);
        assert!(record.past_consensus_addresses.is_empty());
    }

    #[test]
    fn test_merge_history_is_monotonic() {
        let mut record = ValidatorRecord::from(info("pkA", "addrA"));
        let mut seen = 0;
        for (pk, addr) in [
            ("pkB", "addrB"),
            ("pkA", "addrA"),
            ("pkB", "addrB"),
            ("pkC", "addrB"),
            ("pkC", "addrB"),
        ] {
            record.merge(info(pk, addr));
            assert!(record.past_public_keys.len() >= seen);
            seen = record.past_public_keys.len();
            assert_eq!(
                record.past_public_keys.iter().unique().count(),
                record.past_public_keys.len()
            );
        }
        assert_eq!(record.public_key.as_deref(), Some("pkC"));
        assert_eq!(record.past_public_keys, vec!["pkA", "pkB"]);
        assert_eq!(record.past_consensus_addresses, vec!["addrA", "addrB"]);
    }

    #[test]
    fn test_merge_overwrites_current_fields() {
        let mut record = ValidatorRecord::from(info("pkA", "addrA"));
        let mut update = info("pkA", "addrA");
        update.stake = None;
        update.state = Some(ValidatorState::Jailed);
        record.merge(update);
        assert_eq!(record.stake, None);
        assert_eq!(record.state, Some(ValidatorState::Jailed));
        assert!(record.past_public_keys.is_empty());
    }
}
